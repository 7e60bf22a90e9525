use super::locks::{TenantGuard, TenantLocks};
use crate::domain::payment::{FailedPayment, PaymentOrder};
use crate::domain::ports::{ClockHandle, FailedPaymentStoreHandle};
use crate::domain::principal::Principal;
use crate::error::{BillingError, Result};
use serde::Serialize;
use uuid::Uuid;

const MAX_PER_PAGE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionFilter {
    #[default]
    All,
    Resolved,
    Unresolved,
}

impl ResolutionFilter {
    fn admits(self, failed: &FailedPayment) -> bool {
        match self {
            ResolutionFilter::All => true,
            ResolutionFilter::Resolved => failed.resolved,
            ResolutionFilter::Unresolved => !failed.resolved,
        }
    }
}

/// One page of a listing. `page` is 1-based.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
}

/// Durable queue of recharges that need a human decision.
#[derive(Clone)]
pub struct FailedPaymentReconciler {
    store: FailedPaymentStoreHandle,
    locks: TenantLocks,
    clock: ClockHandle,
}

impl FailedPaymentReconciler {
    pub fn new(store: FailedPaymentStoreHandle, locks: TenantLocks, clock: ClockHandle) -> Self {
        Self { store, locks, clock }
    }

    /// Records a failure for `order`. A second failure of the same order
    /// updates the existing entry instead of adding another.
    pub async fn record(&self, order: &PaymentOrder, error: &str) -> Result<FailedPayment> {
        let guard = self.locks.acquire(&order.tenant).await;
        self.record_locked(&guard, order, error).await
    }

    /// The lookup and the insert run under the order tenant's guard, so
    /// concurrent failures of one order share a single entry.
    pub(crate) async fn record_locked(
        &self,
        guard: &TenantGuard,
        order: &PaymentOrder,
        error: &str,
    ) -> Result<FailedPayment> {
        if guard.tenant() != &order.tenant {
            return Err(BillingError::ValidationError(format!(
                "order {} belongs to tenant {}, not {}",
                order.id,
                order.tenant,
                guard.tenant()
            )));
        }
        let now = self.clock.now();
        let failed = match self.store.find_by_order(order.id).await? {
            Some(mut existing) => {
                existing.error_message = error.to_string();
                existing.updated_at = now;
                existing
            }
            None => FailedPayment::new(order, error, now),
        };
        self.store.store(failed.clone()).await?;
        tracing::warn!(
            order_id = %order.id,
            tenant = %order.tenant,
            amount = %order.amount,
            error,
            "failed payment recorded"
        );
        Ok(failed)
    }

    /// Marks an entry resolved. Never touches the wallet: an admin who decides
    /// the payment was real credits it separately.
    pub async fn resolve(
        &self,
        principal: &Principal,
        id: Uuid,
        notes: Option<String>,
    ) -> Result<FailedPayment> {
        principal.require_admin("resolving failed payments")?;
        let mut failed = self.find(id).await?;
        failed.resolve(notes, self.clock.now());
        self.store.store(failed.clone()).await?;
        tracing::info!(failed_payment = %id, order_id = %failed.order_id, "failed payment resolved");
        Ok(failed)
    }

    pub async fn get(&self, principal: &Principal, id: Uuid) -> Result<FailedPayment> {
        let failed = self.find(id).await?;
        principal.authorize_for(&failed.tenant)?;
        Ok(failed)
    }

    /// Admin listing, newest first.
    pub async fn list(
        &self,
        principal: &Principal,
        filter: ResolutionFilter,
        page: usize,
        per_page: usize,
    ) -> Result<Page<FailedPayment>> {
        principal.require_admin("listing failed payments")?;
        if page == 0 || per_page == 0 || per_page > MAX_PER_PAGE {
            return Err(BillingError::ValidationError(format!(
                "page must be >= 1 and per_page within 1..={MAX_PER_PAGE}"
            )));
        }

        let mut matching: Vec<FailedPayment> = self
            .store
            .get_all()
            .await?
            .into_iter()
            .filter(|failed| filter.admits(failed))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matching.len();
        let items = matching
            .into_iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .collect();
        Ok(Page {
            items,
            total,
            page,
            per_page,
        })
    }

    async fn find(&self, id: Uuid) -> Result<FailedPayment> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("failed payment {id}")))
    }
}
