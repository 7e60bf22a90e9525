use crate::domain::tenant::TenantId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Idle entries are dropped once the table holds more tenants than this.
const PRUNE_ABOVE: usize = 1024;

/// Per-tenant serialization of ledger and lifecycle mutations.
///
/// Tenants never contend with each other; within a tenant every metering,
/// credit and state transition runs while holding that tenant's guard.
#[derive(Default, Clone)]
pub struct TenantLocks {
    locks: Arc<Mutex<HashMap<TenantId, Arc<Mutex<()>>>>>,
}

/// Proof that the holder has exclusive access to one tenant's state.
pub struct TenantGuard {
    tenant: TenantId,
    _guard: OwnedMutexGuard<()>,
}

impl TenantGuard {
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }
}

impl TenantLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, tenant: &TenantId) -> TenantGuard {
        let lock = {
            let mut locks = self.locks.lock().await;
            if locks.len() > PRUNE_ABOVE {
                // Only the table references an idle lock: no holder, no waiter.
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(tenant.clone()).or_default().clone()
        };
        TenantGuard {
            tenant: tenant.clone(),
            _guard: lock.lock_owned().await,
        }
    }
}
