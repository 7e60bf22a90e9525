use crate::domain::integration::{Integration, IntegrationId};
use crate::domain::payment::{FailedPayment, OrderStatus, PaymentOrder};
use crate::domain::ports::{
    FailedPaymentStore, IntegrationStore, LedgerStore, PaymentOrderStore, Stores, TenantStore,
    WebhookEventStore,
};
use crate::domain::tenant::{Tenant, TenantId};
use crate::domain::transaction::Transaction;
use crate::domain::wallet::Wallet;
use crate::domain::webhook::{EventOutcome, IdempotencyKey, WebhookEvent};
use crate::error::{BillingError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Builds a full set of empty in-memory stores.
pub fn stores() -> Stores {
    Stores {
        tenants: Arc::new(InMemoryTenantStore::new()),
        ledger: Arc::new(InMemoryLedgerStore::new()),
        integrations: Arc::new(InMemoryIntegrationStore::new()),
        events: Arc::new(InMemoryWebhookEventStore::new()),
        orders: Arc::new(InMemoryPaymentOrderStore::new()),
        failed_payments: Arc::new(InMemoryFailedPaymentStore::new()),
    }
}

#[derive(Default, Clone)]
pub struct InMemoryTenantStore {
    tenants: Arc<RwLock<HashMap<TenantId, Tenant>>>,
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn store(&self, tenant: Tenant) -> Result<()> {
        let mut tenants = self.tenants.write().await;
        tenants.insert(tenant.id.clone(), tenant);
        Ok(())
    }

    async fn get(&self, id: &TenantId) -> Result<Option<Tenant>> {
        let tenants = self.tenants.read().await;
        Ok(tenants.get(id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<Tenant>> {
        let tenants = self.tenants.read().await;
        Ok(tenants.values().cloned().collect())
    }
}

#[derive(Default)]
struct LedgerState {
    wallets: HashMap<TenantId, Wallet>,
    entries: HashMap<TenantId, Vec<Transaction>>,
}

/// Wallets and their logs behind a single lock, so a commit is atomic.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn open(&self, wallet: Wallet) -> Result<Wallet> {
        let mut state = self.state.write().await;
        Ok(state
            .wallets
            .entry(wallet.tenant.clone())
            .or_insert(wallet)
            .clone())
    }

    async fn wallet(&self, tenant: &TenantId) -> Result<Option<Wallet>> {
        let state = self.state.read().await;
        Ok(state.wallets.get(tenant).cloned())
    }

    async fn wallets(&self) -> Result<Vec<Wallet>> {
        let state = self.state.read().await;
        Ok(state.wallets.values().cloned().collect())
    }

    async fn commit(&self, tx: Transaction, wallet: Wallet) -> Result<()> {
        if tx.tenant != wallet.tenant {
            return Err(BillingError::Storage(format!(
                "entry for {} committed against wallet of {}",
                tx.tenant, wallet.tenant
            )));
        }
        let mut state = self.state.write().await;
        state.entries.entry(tx.tenant.clone()).or_default().push(tx);
        state.wallets.insert(wallet.tenant.clone(), wallet);
        Ok(())
    }

    async fn save_wallet(&self, wallet: Wallet) -> Result<()> {
        let mut state = self.state.write().await;
        state.wallets.insert(wallet.tenant.clone(), wallet);
        Ok(())
    }

    async fn transactions(&self, tenant: &TenantId) -> Result<Vec<Transaction>> {
        let state = self.state.read().await;
        Ok(state.entries.get(tenant).cloned().unwrap_or_default())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryIntegrationStore {
    integrations: Arc<RwLock<HashMap<IntegrationId, Integration>>>,
}

impl InMemoryIntegrationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IntegrationStore for InMemoryIntegrationStore {
    async fn store(&self, integration: Integration) -> Result<()> {
        let mut integrations = self.integrations.write().await;
        integrations.insert(integration.id.clone(), integration);
        Ok(())
    }

    async fn get(&self, id: &IntegrationId) -> Result<Option<Integration>> {
        let integrations = self.integrations.read().await;
        Ok(integrations.get(id).cloned())
    }

    async fn list_for_tenant(&self, tenant: &TenantId) -> Result<Vec<Integration>> {
        let integrations = self.integrations.read().await;
        let mut owned: Vec<Integration> = integrations
            .values()
            .filter(|integration| &integration.tenant == tenant)
            .cloned()
            .collect();
        owned.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(owned)
    }
}

#[derive(Default)]
struct EventLog {
    events: HashMap<Uuid, WebhookEvent>,
    accepted: HashMap<IdempotencyKey, Uuid>,
}

#[derive(Default, Clone)]
pub struct InMemoryWebhookEventStore {
    log: Arc<RwLock<EventLog>>,
}

impl InMemoryWebhookEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookEventStore for InMemoryWebhookEventStore {
    async fn record(&self, event: WebhookEvent) -> Result<()> {
        let mut log = self.log.write().await;
        if event.outcome == EventOutcome::Accepted {
            log.accepted.insert(event.key.clone(), event.id);
        }
        log.events.insert(event.id, event);
        Ok(())
    }

    async fn find_accepted(&self, key: &IdempotencyKey) -> Result<Option<WebhookEvent>> {
        let log = self.log.read().await;
        Ok(log
            .accepted
            .get(key)
            .and_then(|id| log.events.get(id))
            .cloned())
    }

    async fn list_for_integration(&self, integration: &IntegrationId) -> Result<Vec<WebhookEvent>> {
        let log = self.log.read().await;
        let mut events: Vec<WebhookEvent> = log
            .events
            .values()
            .filter(|event| &event.integration == integration)
            .cloned()
            .collect();
        events.sort_by_key(|event| event.received_at);
        Ok(events)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut log = self.log.write().await;
        let before = log.events.len();
        log.events.retain(|_, event| event.received_at >= cutoff);
        let EventLog { events, accepted } = &mut *log;
        accepted.retain(|_, id| events.contains_key(id));
        Ok(before - events.len())
    }
}

#[derive(Default)]
struct OrderBook {
    orders: HashMap<Uuid, PaymentOrder>,
    by_gateway: HashMap<String, Uuid>,
}

#[derive(Default, Clone)]
pub struct InMemoryPaymentOrderStore {
    book: Arc<RwLock<OrderBook>>,
}

impl InMemoryPaymentOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentOrderStore for InMemoryPaymentOrderStore {
    async fn insert(&self, order: PaymentOrder) -> Result<()> {
        let mut book = self.book.write().await;
        if book.by_gateway.contains_key(&order.gateway_order_id) {
            return Err(BillingError::ValidationError(format!(
                "gateway order {} already registered",
                order.gateway_order_id
            )));
        }
        book.by_gateway
            .insert(order.gateway_order_id.clone(), order.id);
        book.orders.insert(order.id, order);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PaymentOrder>> {
        let book = self.book.read().await;
        Ok(book.orders.get(&id).cloned())
    }

    async fn find_by_gateway_order(&self, gateway_order_id: &str) -> Result<Option<PaymentOrder>> {
        let book = self.book.read().await;
        Ok(book
            .by_gateway
            .get(gateway_order_id)
            .and_then(|id| book.orders.get(id))
            .cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: OrderStatus,
        next: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<PaymentOrder>> {
        let mut book = self.book.write().await;
        let order = book
            .orders
            .get_mut(&id)
            .ok_or_else(|| BillingError::NotFound(format!("payment order {id}")))?;
        if order.status != expected {
            return Ok(None);
        }
        order.status = next;
        order.updated_at = now;
        Ok(Some(order.clone()))
    }
}

#[derive(Default, Clone)]
pub struct InMemoryFailedPaymentStore {
    failed: Arc<RwLock<HashMap<Uuid, FailedPayment>>>,
}

impl InMemoryFailedPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FailedPaymentStore for InMemoryFailedPaymentStore {
    async fn store(&self, failed: FailedPayment) -> Result<()> {
        let mut entries = self.failed.write().await;
        entries.insert(failed.id, failed);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<FailedPayment>> {
        let entries = self.failed.read().await;
        Ok(entries.get(&id).cloned())
    }

    async fn find_by_order(&self, order_id: Uuid) -> Result<Option<FailedPayment>> {
        let entries = self.failed.read().await;
        Ok(entries
            .values()
            .find(|failed| failed.order_id == order_id)
            .cloned())
    }

    async fn get_all(&self) -> Result<Vec<FailedPayment>> {
        let entries = self.failed.read().await;
        Ok(entries.values().cloned().collect())
    }
}
