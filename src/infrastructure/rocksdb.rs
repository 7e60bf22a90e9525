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
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const CF_TENANTS: &str = "tenants";
pub const CF_WALLETS: &str = "wallets";
/// Ledger entries keyed by `tenant \0 sequence` so a prefix scan yields append order.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Next ledger sequence number per tenant.
pub const CF_SEQUENCES: &str = "sequences";
pub const CF_INTEGRATIONS: &str = "integrations";
pub const CF_EVENTS: &str = "events";
/// Idempotency key -> id of the latest accepted event.
pub const CF_EVENT_KEYS: &str = "event_keys";
pub const CF_ORDERS: &str = "orders";
/// Gateway order id -> payment order id.
pub const CF_ORDER_GATEWAY_INDEX: &str = "order_gateway_index";
pub const CF_FAILED_PAYMENTS: &str = "failed_payments";

const COLUMN_FAMILIES: [&str; 10] = [
    CF_TENANTS,
    CF_WALLETS,
    CF_TRANSACTIONS,
    CF_SEQUENCES,
    CF_INTEGRATIONS,
    CF_EVENTS,
    CF_EVENT_KEYS,
    CF_ORDERS,
    CF_ORDER_GATEWAY_INDEX,
    CF_FAILED_PAYMENTS,
];

/// Persistent implementation of every store port over one RocksDB instance.
///
/// Values are JSON. Multi-key updates go through a `WriteBatch`, and
/// read-modify-write sequences (wallet open, ledger sequence, order
/// transitions) are serialized by `write_lock`. `Clone` shares the database.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates the database at `path` with all column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// All stores backed by this database.
    pub fn stores(&self) -> Stores {
        Stores {
            tenants: Arc::new(self.clone()),
            ledger: Arc::new(self.clone()),
            integrations: Arc::new(self.clone()),
            events: Arc::new(self.clone()),
            orders: Arc::new(self.clone()),
            failed_payments: Arc::new(self.clone()),
        }
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| BillingError::Storage(format!("column family {name} not found")))
    }

    fn put_json<T: Serialize>(&self, cf: &str, key: impl AsRef<[u8]>, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.db.put_cf(self.cf(cf)?, key, bytes)?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &str, key: impl AsRef<[u8]>) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_json<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let mut values = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, IteratorMode::Start) {
            let (_key, value) = item?;
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    fn get_uuid(&self, cf: &str, key: impl AsRef<[u8]>) -> Result<Option<Uuid>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Uuid::from_slice(&bytes)
                .map(Some)
                .map_err(|e| BillingError::Storage(format!("corrupt id in {cf}: {e}"))),
            None => Ok(None),
        }
    }

    fn next_sequence(&self, tenant: &TenantId) -> Result<u64> {
        match self.db.get_cf(self.cf(CF_SEQUENCES)?, tenant.as_str())? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    BillingError::Storage(format!("corrupt ledger sequence for tenant {tenant}"))
                })?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }
}

fn ledger_prefix(tenant: &TenantId) -> Vec<u8> {
    let mut prefix = tenant.as_str().as_bytes().to_vec();
    prefix.push(0);
    prefix
}

fn ledger_key(tenant: &TenantId, sequence: u64) -> Vec<u8> {
    let mut key = ledger_prefix(tenant);
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

#[async_trait]
impl TenantStore for RocksDBStore {
    async fn store(&self, tenant: Tenant) -> Result<()> {
        self.put_json(CF_TENANTS, tenant.id.as_str(), &tenant)
    }

    async fn get(&self, id: &TenantId) -> Result<Option<Tenant>> {
        self.get_json(CF_TENANTS, id.as_str())
    }

    async fn get_all(&self) -> Result<Vec<Tenant>> {
        self.scan_json(CF_TENANTS)
    }
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn open(&self, wallet: Wallet) -> Result<Wallet> {
        let _lock = self.write_lock.lock().await;
        if let Some(existing) = self.get_json(CF_WALLETS, wallet.tenant.as_str())? {
            return Ok(existing);
        }
        self.put_json(CF_WALLETS, wallet.tenant.as_str(), &wallet)?;
        Ok(wallet)
    }

    async fn wallet(&self, tenant: &TenantId) -> Result<Option<Wallet>> {
        self.get_json(CF_WALLETS, tenant.as_str())
    }

    async fn wallets(&self) -> Result<Vec<Wallet>> {
        self.scan_json(CF_WALLETS)
    }

    async fn commit(&self, tx: Transaction, wallet: Wallet) -> Result<()> {
        if tx.tenant != wallet.tenant {
            return Err(BillingError::Storage(format!(
                "entry for {} committed against wallet of {}",
                tx.tenant, wallet.tenant
            )));
        }
        let _lock = self.write_lock.lock().await;
        let sequence = self.next_sequence(&tx.tenant)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_TRANSACTIONS)?,
            ledger_key(&tx.tenant, sequence),
            serde_json::to_vec(&tx)?,
        );
        batch.put_cf(
            self.cf(CF_SEQUENCES)?,
            tx.tenant.as_str(),
            (sequence + 1).to_be_bytes(),
        );
        batch.put_cf(
            self.cf(CF_WALLETS)?,
            wallet.tenant.as_str(),
            serde_json::to_vec(&wallet)?,
        );
        self.db.write(batch)?;
        Ok(())
    }

    async fn save_wallet(&self, wallet: Wallet) -> Result<()> {
        self.put_json(CF_WALLETS, wallet.tenant.as_str(), &wallet)
    }

    async fn transactions(&self, tenant: &TenantId) -> Result<Vec<Transaction>> {
        let prefix = ledger_prefix(tenant);
        let iter = self.db.iterator_cf(
            self.cf(CF_TRANSACTIONS)?,
            IteratorMode::From(&prefix, Direction::Forward),
        );
        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            entries.push(serde_json::from_slice(&value)?);
        }
        Ok(entries)
    }
}

#[async_trait]
impl IntegrationStore for RocksDBStore {
    async fn store(&self, integration: Integration) -> Result<()> {
        self.put_json(CF_INTEGRATIONS, integration.id.as_str(), &integration)
    }

    async fn get(&self, id: &IntegrationId) -> Result<Option<Integration>> {
        self.get_json(CF_INTEGRATIONS, id.as_str())
    }

    async fn list_for_tenant(&self, tenant: &TenantId) -> Result<Vec<Integration>> {
        let mut owned: Vec<Integration> = self
            .scan_json::<Integration>(CF_INTEGRATIONS)?
            .into_iter()
            .filter(|integration| &integration.tenant == tenant)
            .collect();
        owned.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(owned)
    }
}

#[async_trait]
impl WebhookEventStore for RocksDBStore {
    async fn record(&self, event: WebhookEvent) -> Result<()> {
        let mut batch = WriteBatch::default();
        if event.outcome == EventOutcome::Accepted {
            batch.put_cf(
                self.cf(CF_EVENT_KEYS)?,
                event.key.as_str(),
                event.id.as_bytes(),
            );
        }
        batch.put_cf(
            self.cf(CF_EVENTS)?,
            event.id.as_bytes(),
            serde_json::to_vec(&event)?,
        );
        self.db.write(batch)?;
        Ok(())
    }

    async fn find_accepted(&self, key: &IdempotencyKey) -> Result<Option<WebhookEvent>> {
        match self.get_uuid(CF_EVENT_KEYS, key.as_str())? {
            Some(id) => self.get_json(CF_EVENTS, id.as_bytes()),
            None => Ok(None),
        }
    }

    async fn list_for_integration(&self, integration: &IntegrationId) -> Result<Vec<WebhookEvent>> {
        let mut events: Vec<WebhookEvent> = self
            .scan_json::<WebhookEvent>(CF_EVENTS)?
            .into_iter()
            .filter(|event| &event.integration == integration)
            .collect();
        events.sort_by_key(|event| event.received_at);
        Ok(events)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let _lock = self.write_lock.lock().await;
        let expired: Vec<WebhookEvent> = self
            .scan_json::<WebhookEvent>(CF_EVENTS)?
            .into_iter()
            .filter(|event| event.received_at < cutoff)
            .collect();

        let mut batch = WriteBatch::default();
        for event in &expired {
            batch.delete_cf(self.cf(CF_EVENTS)?, event.id.as_bytes());
            if self.get_uuid(CF_EVENT_KEYS, event.key.as_str())? == Some(event.id) {
                batch.delete_cf(self.cf(CF_EVENT_KEYS)?, event.key.as_str());
            }
        }
        self.db.write(batch)?;
        Ok(expired.len())
    }
}

#[async_trait]
impl PaymentOrderStore for RocksDBStore {
    async fn insert(&self, order: PaymentOrder) -> Result<()> {
        let _lock = self.write_lock.lock().await;
        if self
            .get_uuid(CF_ORDER_GATEWAY_INDEX, &order.gateway_order_id)?
            .is_some()
        {
            return Err(BillingError::ValidationError(format!(
                "gateway order {} already registered",
                order.gateway_order_id
            )));
        }
        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_ORDER_GATEWAY_INDEX)?,
            &order.gateway_order_id,
            order.id.as_bytes(),
        );
        batch.put_cf(
            self.cf(CF_ORDERS)?,
            order.id.as_bytes(),
            serde_json::to_vec(&order)?,
        );
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PaymentOrder>> {
        self.get_json(CF_ORDERS, id.as_bytes())
    }

    async fn find_by_gateway_order(&self, gateway_order_id: &str) -> Result<Option<PaymentOrder>> {
        match self.get_uuid(CF_ORDER_GATEWAY_INDEX, gateway_order_id)? {
            Some(id) => self.get_json(CF_ORDERS, id.as_bytes()),
            None => Ok(None),
        }
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: OrderStatus,
        next: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<PaymentOrder>> {
        let _lock = self.write_lock.lock().await;
        let mut order: PaymentOrder = self
            .get_json(CF_ORDERS, id.as_bytes())?
            .ok_or_else(|| BillingError::NotFound(format!("payment order {id}")))?;
        if order.status != expected {
            return Ok(None);
        }
        order.status = next;
        order.updated_at = now;
        self.put_json(CF_ORDERS, id.as_bytes(), &order)?;
        Ok(Some(order))
    }
}

#[async_trait]
impl FailedPaymentStore for RocksDBStore {
    async fn store(&self, failed: FailedPayment) -> Result<()> {
        self.put_json(CF_FAILED_PAYMENTS, failed.id.as_bytes(), &failed)
    }

    async fn get(&self, id: Uuid) -> Result<Option<FailedPayment>> {
        self.get_json(CF_FAILED_PAYMENTS, id.as_bytes())
    }

    async fn find_by_order(&self, order_id: Uuid) -> Result<Option<FailedPayment>> {
        Ok(self
            .scan_json::<FailedPayment>(CF_FAILED_PAYMENTS)?
            .into_iter()
            .find(|failed| failed.order_id == order_id))
    }

    async fn get_all(&self) -> Result<Vec<FailedPayment>> {
        self.scan_json(CF_FAILED_PAYMENTS)
    }
}
