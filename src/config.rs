use crate::domain::money::Amount;
use crate::error::{BillingError, Result};
use rust_decimal_macros::dec;
use std::time::Duration;

/// Tunables of the metering and recharge paths.
///
/// None of these are observable from the tenant-facing contracts, so they are
/// all configuration; `Default` only gives workable development values.
#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// Charged per accepted event once the free quota is used up.
    pub metering_fee: Amount,
    /// Free events granted to a newly opened wallet.
    pub default_free_quota: u32,
    /// How long an accepted idempotency key suppresses redeliveries.
    pub dedupe_window: chrono::Duration,
    /// How long webhook events are kept for audit before purging.
    pub audit_retention: chrono::Duration,
    pub downstream_timeout: Duration,
    pub gateway_timeout: Duration,
    /// Shared secret the gateway signs callbacks with.
    pub gateway_secret: String,
    /// Public key id handed to clients alongside a gateway order.
    pub gateway_key_id: String,
    pub currency: String,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            metering_fee: Amount::from_literal(dec!(2)),
            default_free_quota: 100,
            dedupe_window: chrono::Duration::hours(24),
            audit_retention: chrono::Duration::days(90),
            downstream_timeout: Duration::from_secs(10),
            gateway_timeout: Duration::from_secs(15),
            gateway_secret: String::new(),
            gateway_key_id: "local".to_string(),
            currency: "INR".to_string(),
        }
    }
}

impl BillingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.dedupe_window <= chrono::Duration::zero() {
            return Err(BillingError::ValidationError(
                "dedupe window must be positive".to_string(),
            ));
        }
        if self.audit_retention < self.dedupe_window {
            return Err(BillingError::ValidationError(
                "audit retention must cover the dedupe window".to_string(),
            ));
        }
        if self.downstream_timeout.is_zero() || self.gateway_timeout.is_zero() {
            return Err(BillingError::ValidationError(
                "timeouts must be non-zero".to_string(),
            ));
        }
        if self.gateway_secret.is_empty() {
            return Err(BillingError::ValidationError(
                "gateway secret is required".to_string(),
            ));
        }
        if self.currency.trim().is_empty() {
            return Err(BillingError::ValidationError(
                "currency is required".to_string(),
            ));
        }
        Ok(())
    }
}
