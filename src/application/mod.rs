//! Application services orchestrating the billing domain.
//!
//! Every service that mutates tenant state goes through the shared
//! `TenantLocks` table, so metering, credits and lifecycle transitions for one
//! tenant are serialized while different tenants proceed in parallel.

pub mod core;
pub mod gateway;
pub mod ingestor;
pub mod ledger;
pub mod locks;
pub mod reconciler;
pub mod registry;
pub mod tenants;

pub use self::core::BillingCore;
