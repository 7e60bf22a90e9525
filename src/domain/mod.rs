//! Entities, value objects and the ports the application layer depends on.

pub mod integration;
pub mod money;
pub mod payment;
pub mod ports;
pub mod principal;
pub mod tenant;
pub mod transaction;
pub mod wallet;
pub mod webhook;
