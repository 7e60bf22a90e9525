use super::integration::{Integration, IntegrationId};
use super::money::Amount;
use super::payment::{FailedPayment, OrderStatus, PaymentOrder};
use super::tenant::{Tenant, TenantId};
use super::transaction::Transaction;
use super::wallet::Wallet;
use super::webhook::{IdempotencyKey, WebhookEvent};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn store(&self, tenant: Tenant) -> Result<()>;
    async fn get(&self, id: &TenantId) -> Result<Option<Tenant>>;
    async fn get_all(&self) -> Result<Vec<Tenant>>;
}

/// Wallet projections and their transaction logs.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Stores `wallet` unless the tenant already has one; returns the stored wallet.
    async fn open(&self, wallet: Wallet) -> Result<Wallet>;
    async fn wallet(&self, tenant: &TenantId) -> Result<Option<Wallet>>;
    async fn wallets(&self) -> Result<Vec<Wallet>>;
    /// Appends `tx` and replaces the wallet projection in one atomic write.
    async fn commit(&self, tx: Transaction, wallet: Wallet) -> Result<()>;
    /// Replaces the projection for changes that carry no ledger entry (pause flag).
    async fn save_wallet(&self, wallet: Wallet) -> Result<()>;
    /// The tenant's entries in append order.
    async fn transactions(&self, tenant: &TenantId) -> Result<Vec<Transaction>>;
}

#[async_trait]
pub trait IntegrationStore: Send + Sync {
    async fn store(&self, integration: Integration) -> Result<()>;
    async fn get(&self, id: &IntegrationId) -> Result<Option<Integration>>;
    async fn list_for_tenant(&self, tenant: &TenantId) -> Result<Vec<Integration>>;
}

#[async_trait]
pub trait WebhookEventStore: Send + Sync {
    /// Inserts or replaces the event with the same id.
    async fn record(&self, event: WebhookEvent) -> Result<()>;
    /// Most recent `accepted` event carrying `key`, if any.
    async fn find_accepted(&self, key: &IdempotencyKey) -> Result<Option<WebhookEvent>>;
    async fn list_for_integration(&self, integration: &IntegrationId) -> Result<Vec<WebhookEvent>>;
    /// Drops events received before `cutoff`; returns how many were removed.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

#[async_trait]
pub trait PaymentOrderStore: Send + Sync {
    async fn insert(&self, order: PaymentOrder) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<PaymentOrder>>;
    async fn find_by_gateway_order(&self, gateway_order_id: &str) -> Result<Option<PaymentOrder>>;
    /// Moves the order from `expected` to `next`.
    ///
    /// Returns the updated order, or `None` when the order was not in
    /// `expected` (someone else won the race).
    async fn transition(
        &self,
        id: Uuid,
        expected: OrderStatus,
        next: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<PaymentOrder>>;
}

#[async_trait]
pub trait FailedPaymentStore: Send + Sync {
    async fn store(&self, failed: FailedPayment) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<FailedPayment>>;
    async fn find_by_order(&self, order_id: Uuid) -> Result<Option<FailedPayment>>;
    async fn get_all(&self) -> Result<Vec<FailedPayment>>;
}

/// Marketplace-specific consumer of accepted webhook payloads.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    async fn process(&self, event: &WebhookEvent, payload: &[u8]) -> Result<()>;
}

/// Outbound side of the payment gateway.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Registers an order with the gateway and returns the gateway's order id.
    async fn create_order(&self, order_id: Uuid, amount: Amount, currency: &str) -> Result<String>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type TenantStoreHandle = Arc<dyn TenantStore>;
pub type LedgerStoreHandle = Arc<dyn LedgerStore>;
pub type IntegrationStoreHandle = Arc<dyn IntegrationStore>;
pub type WebhookEventStoreHandle = Arc<dyn WebhookEventStore>;
pub type PaymentOrderStoreHandle = Arc<dyn PaymentOrderStore>;
pub type FailedPaymentStoreHandle = Arc<dyn FailedPaymentStore>;
pub type EventProcessorHandle = Arc<dyn EventProcessor>;
pub type GatewayClientHandle = Arc<dyn GatewayClient>;
pub type ClockHandle = Arc<dyn Clock>;

/// One backend's worth of stores.
#[derive(Clone)]
pub struct Stores {
    pub tenants: TenantStoreHandle,
    pub ledger: LedgerStoreHandle,
    pub integrations: IntegrationStoreHandle,
    pub events: WebhookEventStoreHandle,
    pub orders: PaymentOrderStoreHandle,
    pub failed_payments: FailedPaymentStoreHandle,
}
