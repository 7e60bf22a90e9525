use super::ledger::WalletLedger;
use crate::domain::ports::{ClockHandle, TenantStoreHandle};
use crate::domain::principal::Principal;
use crate::domain::tenant::{Tenant, TenantId, TenantStatus};
use crate::domain::wallet::Wallet;
use crate::error::{BillingError, Result};

/// Tenant records and wallet opening.
#[derive(Clone)]
pub struct TenantDirectory {
    store: TenantStoreHandle,
    ledger: WalletLedger,
    clock: ClockHandle,
    default_free_quota: u32,
}

impl TenantDirectory {
    pub fn new(
        store: TenantStoreHandle,
        ledger: WalletLedger,
        clock: ClockHandle,
        default_free_quota: u32,
    ) -> Self {
        Self {
            store,
            ledger,
            clock,
            default_free_quota,
        }
    }

    /// Registers a tenant and opens its wallet. Registering again returns the
    /// existing records untouched.
    pub async fn register(
        &self,
        principal: &Principal,
        id: &TenantId,
        status: TenantStatus,
        free_quota: Option<u32>,
    ) -> Result<(Tenant, Wallet)> {
        if matches!(principal, Principal::Tenant(_)) {
            return Err(BillingError::Forbidden(
                "tenants cannot register other tenants".to_string(),
            ));
        }
        let tenant = match self.store.get(id).await? {
            Some(existing) => existing,
            None => {
                let tenant = Tenant::new(id.clone(), status, self.clock.now());
                self.store.store(tenant.clone()).await?;
                tracing::info!(tenant = %id, ?status, "tenant registered");
                tenant
            }
        };
        let wallet = self
            .ledger
            .open(id, free_quota.unwrap_or(self.default_free_quota))
            .await?;
        Ok((tenant, wallet))
    }

    pub async fn set_status(
        &self,
        principal: &Principal,
        id: &TenantId,
        status: TenantStatus,
    ) -> Result<Tenant> {
        principal.require_admin("changing tenant status")?;
        let mut tenant = self.get(id).await?;
        tenant.status = status;
        tenant.updated_at = self.clock.now();
        self.store.store(tenant.clone()).await?;
        tracing::info!(tenant = %id, ?status, "tenant status changed");
        Ok(tenant)
    }

    pub async fn get(&self, id: &TenantId) -> Result<Tenant> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("tenant {id}")))
    }

    pub async fn list(&self) -> Result<Vec<Tenant>> {
        let mut tenants = self.store.get_all().await?;
        tenants.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tenants)
    }
}
