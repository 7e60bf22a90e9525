use super::money::{Amount, Balance};
use super::tenant::TenantId;
use super::transaction::{LedgerReference, Transaction, TransactionKind};
use crate::error::BillingError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Materialized view of a tenant's ledger.
///
/// `balance` is a cache of the sum of the tenant's transactions; it is only
/// changed together with the entry that explains the change.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Wallet {
    pub tenant: TenantId,
    pub balance: Balance,
    pub free_quota_remaining: u32,
    /// Set when metering ran out of funds; cleared by any credit.
    pub is_paused: bool,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(tenant: TenantId, free_quota: u32, now: DateTime<Utc>) -> Self {
        Self {
            tenant,
            balance: Balance::ZERO,
            free_quota_remaining: free_quota,
            is_paused: false,
            updated_at: now,
        }
    }

    /// Charges one metered event.
    ///
    /// Free quota is consumed first (zero-amount entry), then `fee` is taken
    /// from the balance. Leaves the wallet untouched on `InsufficientBalance`.
    pub fn meter(
        &mut self,
        fee: Amount,
        reference: LedgerReference,
        now: DateTime<Utc>,
    ) -> Result<Transaction, BillingError> {
        let (amount, quota_units) = if self.free_quota_remaining > 0 {
            (Balance::ZERO, 1)
        } else if self.balance.covers(fee) {
            (-Balance::from(fee), 0)
        } else {
            return Err(BillingError::InsufficientBalance {
                tenant: self.tenant.to_string(),
            });
        };

        self.free_quota_remaining -= quota_units;
        self.balance += amount;
        self.updated_at = now;

        Ok(Transaction {
            id: Uuid::new_v4(),
            tenant: self.tenant.clone(),
            amount,
            kind: TransactionKind::DebitMetering,
            quota_units,
            reference,
            created_at: now,
        })
    }

    /// Adds funds. Credits are never refused and always lift the pause.
    pub fn credit(
        &mut self,
        amount: Amount,
        kind: TransactionKind,
        reference: LedgerReference,
        now: DateTime<Utc>,
    ) -> Transaction {
        self.balance += amount.into();
        self.is_paused = false;
        self.updated_at = now;

        Transaction {
            id: Uuid::new_v4(),
            tenant: self.tenant.clone(),
            amount: amount.into(),
            kind,
            quota_units: 0,
            reference,
            created_at: now,
        }
    }
}
