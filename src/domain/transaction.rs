use super::money::Balance;
use super::tenant::TenantId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionKind {
    DebitMetering,
    CreditRecharge,
    Adjustment,
}

/// What caused a ledger entry.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum LedgerReference {
    WebhookEvent(Uuid),
    PaymentOrder(Uuid),
    /// Free-text reference for admin adjustments.
    Note(String),
}

/// An append-only ledger entry. Never mutated or deleted once stored.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Transaction {
    pub id: Uuid,
    pub tenant: TenantId,
    /// Signed: negative for metering debits, positive for credits.
    pub amount: Balance,
    pub kind: TransactionKind,
    /// Free-quota units consumed by this entry (0 or 1).
    pub quota_units: u32,
    pub reference: LedgerReference,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn is_free(&self) -> bool {
        self.quota_units > 0
    }
}

/// Recomputes a balance from its ledger entries.
pub fn replay<'a>(entries: impl IntoIterator<Item = &'a Transaction>) -> Balance {
    entries.into_iter().map(|tx| tx.amount).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(amount: rust_decimal::Decimal, kind: TransactionKind) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            tenant: TenantId::new("acme"),
            amount: Balance::new(amount),
            kind,
            quota_units: 0,
            reference: LedgerReference::Note("test".to_string()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_replay_sums_signed_amounts() {
        let entries = vec![
            entry(dec!(10), TransactionKind::CreditRecharge),
            entry(dec!(-2), TransactionKind::DebitMetering),
            entry(dec!(0), TransactionKind::DebitMetering),
            entry(dec!(1.5), TransactionKind::Adjustment),
        ];
        assert_eq!(replay(&entries), Balance::new(dec!(9.5)));
        assert_eq!(replay(&Vec::<Transaction>::new()), Balance::ZERO);
    }

    #[test]
    fn test_transaction_serialization() {
        let mut tx = entry(dec!(-2), TransactionKind::DebitMetering);
        let event_id = Uuid::new_v4();
        tx.reference = LedgerReference::WebhookEvent(event_id);

        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["kind"], "debit-metering");
        assert_eq!(json["reference"]["type"], "webhook_event");

        let back: Transaction = serde_json::from_value(json).unwrap();
        assert_eq!(back, tx);
    }
}
