use super::ledger::WalletLedger;
use super::locks::{TenantGuard, TenantLocks};
use crate::domain::integration::{ConnectionTest, Credential, Integration, IntegrationId};
use crate::domain::ports::{ClockHandle, IntegrationStoreHandle};
use crate::domain::principal::Principal;
use crate::domain::tenant::TenantId;
use crate::error::{BillingError, Result};
use chrono::{DateTime, Utc};

/// Request to register a new marketplace integration.
#[derive(Debug, Clone)]
pub struct NewIntegration {
    pub id: IntegrationId,
    pub tenant: TenantId,
    pub marketplace: String,
    /// Plain webhook token; only its digest is stored.
    pub token: String,
    pub token_expires_at: Option<DateTime<Utc>>,
}

/// Owner of integration records and their lifecycle.
///
/// Transitions run under the owning tenant's guard so they serialize with
/// metering for that tenant.
#[derive(Clone)]
pub struct IntegrationRegistry {
    store: IntegrationStoreHandle,
    ledger: WalletLedger,
    locks: TenantLocks,
    clock: ClockHandle,
}

impl IntegrationRegistry {
    pub fn new(
        store: IntegrationStoreHandle,
        ledger: WalletLedger,
        locks: TenantLocks,
        clock: ClockHandle,
    ) -> Self {
        Self {
            store,
            ledger,
            locks,
            clock,
        }
    }

    pub async fn create(&self, principal: &Principal, request: NewIntegration) -> Result<Integration> {
        principal.authorize_for(&request.tenant)?;
        if request.token.is_empty() {
            return Err(BillingError::ValidationError(
                "webhook token must not be empty".to_string(),
            ));
        }
        // The tenant must have a wallet before it can be metered.
        self.ledger.wallet(&request.tenant).await?;

        let _guard = self.locks.acquire(&request.tenant).await;
        if self.store.get(&request.id).await?.is_some() {
            return Err(BillingError::ValidationError(format!(
                "integration {} already exists",
                request.id
            )));
        }
        let integration = Integration::new(
            request.id,
            request.tenant,
            request.marketplace,
            Credential::issue(&request.token, request.token_expires_at),
            self.clock.now(),
        );
        self.store.store(integration.clone()).await?;
        tracing::info!(
            integration = %integration.id,
            tenant = %integration.tenant,
            marketplace = %integration.marketplace,
            "integration created"
        );
        Ok(integration)
    }

    pub async fn get(&self, id: &IntegrationId) -> Result<Integration> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("integration {id}")))
    }

    pub async fn list_for_tenant(
        &self,
        principal: &Principal,
        tenant: &TenantId,
    ) -> Result<Vec<Integration>> {
        principal.authorize_for(tenant)?;
        self.store.list_for_tenant(tenant).await
    }

    pub async fn begin_test(&self, principal: &Principal, id: &IntegrationId) -> Result<Integration> {
        self.apply(principal, id, |integration, now| integration.begin_test(now))
            .await
    }

    /// Activates with the connector's connectivity test result.
    pub async fn activate(
        &self,
        principal: &Principal,
        id: &IntegrationId,
        test: ConnectionTest,
    ) -> Result<Integration> {
        self.apply(principal, id, move |integration, now| {
            integration.activate(test, now)
        })
        .await
    }

    pub async fn pause(&self, principal: &Principal, id: &IntegrationId) -> Result<Integration> {
        self.apply(principal, id, |integration, now| integration.pause(now))
            .await
    }

    pub async fn resume(&self, principal: &Principal, id: &IntegrationId) -> Result<Integration> {
        let current = self.get(id).await?;
        principal.authorize_for(&current.tenant)?;
        let guard = self.locks.acquire(&current.tenant).await;
        let wallet_paused = self.ledger.wallet(&current.tenant).await?.is_paused;
        self.apply_locked(&guard, id, |integration, now| {
            integration.resume(wallet_paused, now)
        })
        .await
    }

    pub async fn suspend(&self, principal: &Principal, id: &IntegrationId) -> Result<Integration> {
        principal.require_admin("suspend")?;
        self.apply(principal, id, |integration, now| integration.suspend(now))
            .await
    }

    pub async fn reinstate(&self, principal: &Principal, id: &IntegrationId) -> Result<Integration> {
        principal.require_admin("reinstate")?;
        self.apply(principal, id, |integration, now| integration.reinstate(now))
            .await
    }

    pub async fn delete(&self, principal: &Principal, id: &IntegrationId) -> Result<Integration> {
        self.apply(principal, id, |integration, now| integration.delete(now))
            .await
    }

    pub async fn rotate_token(
        &self,
        principal: &Principal,
        id: &IntegrationId,
        token: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Integration> {
        if token.is_empty() {
            return Err(BillingError::ValidationError(
                "webhook token must not be empty".to_string(),
            ));
        }
        let credential = Credential::issue(token, expires_at);
        self.apply(principal, id, move |integration, now| {
            integration.rotate_token(credential, now)
        })
        .await
    }

    /// Pauses an integration whose tenant ran out of funds.
    pub(crate) async fn auto_pause_locked(
        &self,
        guard: &TenantGuard,
        id: &IntegrationId,
    ) -> Result<Integration> {
        let integration = self
            .apply_locked(guard, id, |integration, now| integration.pause(now))
            .await?;
        tracing::warn!(
            integration = %integration.id,
            tenant = %integration.tenant,
            "integration auto-paused on insufficient balance"
        );
        Ok(integration)
    }

    async fn apply<F>(&self, principal: &Principal, id: &IntegrationId, change: F) -> Result<Integration>
    where
        F: FnOnce(&mut Integration, DateTime<Utc>) -> Result<()>,
    {
        let current = self.get(id).await?;
        principal.authorize_for(&current.tenant)?;
        let guard = self.locks.acquire(&current.tenant).await;
        self.apply_locked(&guard, id, change).await
    }

    async fn apply_locked<F>(&self, guard: &TenantGuard, id: &IntegrationId, change: F) -> Result<Integration>
    where
        F: FnOnce(&mut Integration, DateTime<Utc>) -> Result<()>,
    {
        let mut integration = self.get(id).await?;
        if &integration.tenant != guard.tenant() {
            return Err(BillingError::Forbidden(format!(
                "integration {id} does not belong to tenant {}",
                guard.tenant()
            )));
        }
        let from = integration.state;
        change(&mut integration, self.clock.now())?;
        self.store.store(integration.clone()).await?;
        if from != integration.state {
            tracing::info!(
                integration = %integration.id,
                tenant = %integration.tenant,
                %from,
                to = %integration.state,
                "integration state changed"
            );
        }
        Ok(integration)
    }
}
