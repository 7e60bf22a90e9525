use crate::domain::integration::{IntegrationState, LifecycleAction};
use std::fmt;
use thiserror::Error;

/// Why an inbound webhook was refused before any metering happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    TokenMismatch,
    CredentialExpired,
    IntegrationInactive(IntegrationState),
    TenantInactive,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthFailure::TokenMismatch => write!(f, "token does not match integration credential"),
            AuthFailure::CredentialExpired => write!(f, "integration credential expired"),
            AuthFailure::IntegrationInactive(state) => {
                write!(f, "integration is {state}, not accepting events")
            }
            AuthFailure::TenantInactive => write!(f, "tenant is not active"),
        }
    }
}

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("Authentication failed: {0}")]
    Authentication(AuthFailure),
    #[error("Insufficient balance for tenant {tenant}")]
    InsufficientBalance { tenant: String },
    #[error("Invalid transition: cannot {action} an integration in state {from}: {reason}")]
    InvalidTransition {
        from: IntegrationState,
        action: LifecycleAction,
        reason: String,
    },
    #[error("Signature verification failed for order {order_id}")]
    SignatureVerification { order_id: String },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Downstream processing failed: {0}")]
    Downstream(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Ledger corrupted for tenant {tenant}: {detail}")]
    LedgerCorrupted { tenant: String, detail: String },
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),
}

pub type Result<T> = std::result::Result<T, BillingError>;
