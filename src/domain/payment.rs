use super::money::Amount;
use super::tenant::TenantId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Created,
    Verified,
    Failed,
}

/// A wallet recharge registered with the payment gateway.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PaymentOrder {
    pub id: Uuid,
    pub tenant: TenantId,
    pub amount: Amount,
    pub gateway_order_id: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What the client needs to complete payment against the gateway.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct GatewayOrderParams {
    pub order_id: Uuid,
    pub gateway_order_id: String,
    pub amount: Amount,
    pub currency: String,
    pub key_id: String,
}

/// Body of a gateway payment callback.
///
/// `amount` is kept as sent: it is only trusted after the signature checks
/// out, and a bad value must still be escalated against the order.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct CallbackPayload {
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub amount: Decimal,
}

/// A recharge that could not be verified automatically and awaits an admin.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct FailedPayment {
    pub id: Uuid,
    pub tenant: TenantId,
    pub order_id: Uuid,
    pub amount: Amount,
    pub error_message: String,
    pub resolved: bool,
    pub admin_notes: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FailedPayment {
    pub fn new(order: &PaymentOrder, error_message: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant: order.tenant.clone(),
            order_id: order.id,
            amount: order.amount,
            error_message: error_message.into(),
            resolved: false,
            admin_notes: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Marks the entry resolved. Re-resolving only replaces the notes;
    /// `resolved_at` keeps the first resolution time.
    pub fn resolve(&mut self, notes: Option<String>, now: DateTime<Utc>) {
        if !self.resolved {
            self.resolved = true;
            self.resolved_at = Some(now);
        }
        if notes.is_some() {
            self.admin_notes = notes;
        }
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn order() -> PaymentOrder {
        PaymentOrder {
            id: Uuid::new_v4(),
            tenant: TenantId::new("acme"),
            amount: Amount::new(dec!(500)).unwrap(),
            gateway_order_id: "order_abc".to_string(),
            status: OrderStatus::Failed,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_failed_payment_copies_order() {
        let order = order();
        let failed = FailedPayment::new(&order, "signature mismatch", Utc::now());
        assert_eq!(failed.order_id, order.id);
        assert_eq!(failed.amount, order.amount);
        assert!(!failed.resolved);
        assert!(failed.resolved_at.is_none());
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let mut failed = FailedPayment::new(&order(), "signature mismatch", Utc::now());
        let first = Utc::now();
        failed.resolve(Some("verified manually".to_string()), first);
        assert!(failed.resolved);
        assert_eq!(failed.resolved_at, Some(first));

        let later = first + Duration::minutes(5);
        failed.resolve(Some("bank confirmed".to_string()), later);
        assert!(failed.resolved);
        assert_eq!(failed.resolved_at, Some(first));
        assert_eq!(failed.admin_notes.as_deref(), Some("bank confirmed"));

        failed.resolve(None, later);
        assert_eq!(failed.admin_notes.as_deref(), Some("bank confirmed"));
    }

    #[test]
    fn test_callback_payload_parsing() {
        let payload: CallbackPayload = serde_json::from_str(
            r#"{"gateway_order_id":"order_1","gateway_payment_id":"pay_1","amount":"500.00"}"#,
        )
        .unwrap();
        assert_eq!(payload.amount, dec!(500));

        let negative: CallbackPayload = serde_json::from_str(
            r#"{"gateway_order_id":"order_1","gateway_payment_id":"pay_1","amount":"-500"}"#,
        )
        .unwrap();
        assert_eq!(negative.amount, dec!(-500));
    }
}
