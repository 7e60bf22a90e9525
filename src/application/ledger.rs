use super::locks::{TenantGuard, TenantLocks};
use crate::domain::money::{Amount, Balance};
use crate::domain::ports::{ClockHandle, LedgerStoreHandle};
use crate::domain::tenant::TenantId;
use crate::domain::transaction::{self, LedgerReference, Transaction, TransactionKind};
use crate::domain::wallet::Wallet;
use crate::error::{BillingError, Result};

/// A committed ledger entry together with the wallet state it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerReceipt {
    pub transaction: Transaction,
    pub wallet: Wallet,
}

/// Append-only per-tenant ledger with a materialized balance.
///
/// Every mutation takes the tenant's guard, reads the projection, applies the
/// change and commits entry plus projection in one store write.
#[derive(Clone)]
pub struct WalletLedger {
    store: LedgerStoreHandle,
    locks: TenantLocks,
    clock: ClockHandle,
}

impl WalletLedger {
    pub fn new(store: LedgerStoreHandle, locks: TenantLocks, clock: ClockHandle) -> Self {
        Self {
            store,
            locks,
            clock,
        }
    }

    /// Opens the tenant's wallet, or returns the existing one unchanged.
    pub async fn open(&self, tenant: &TenantId, free_quota: u32) -> Result<Wallet> {
        let _guard = self.locks.acquire(tenant).await;
        self.store
            .open(Wallet::new(tenant.clone(), free_quota, self.clock.now()))
            .await
    }

    pub async fn wallet(&self, tenant: &TenantId) -> Result<Wallet> {
        self.store
            .wallet(tenant)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("wallet for tenant {tenant}")))
    }

    pub async fn wallets(&self) -> Result<Vec<Wallet>> {
        let mut wallets = self.store.wallets().await?;
        wallets.sort_by(|a, b| a.tenant.cmp(&b.tenant));
        Ok(wallets)
    }

    pub async fn transactions(&self, tenant: &TenantId) -> Result<Vec<Transaction>> {
        self.store.transactions(tenant).await
    }

    /// Meters one event: free quota first, then `amount` from the balance.
    pub async fn try_debit(
        &self,
        tenant: &TenantId,
        amount: Amount,
        reference: LedgerReference,
    ) -> Result<LedgerReceipt> {
        let guard = self.locks.acquire(tenant).await;
        self.try_debit_locked(&guard, amount, reference).await
    }

    pub(crate) async fn try_debit_locked(
        &self,
        guard: &TenantGuard,
        amount: Amount,
        reference: LedgerReference,
    ) -> Result<LedgerReceipt> {
        let mut wallet = self.wallet(guard.tenant()).await?;
        let transaction = wallet.meter(amount, reference, self.clock.now())?;
        self.store.commit(transaction.clone(), wallet.clone()).await?;

        tracing::debug!(
            tenant = %wallet.tenant,
            amount = %transaction.amount,
            free = transaction.is_free(),
            balance = %wallet.balance,
            "metered event"
        );
        Ok(LedgerReceipt {
            transaction,
            wallet,
        })
    }

    /// Appends a credit. Verified recharges and adjustments are never refused.
    pub async fn credit(
        &self,
        tenant: &TenantId,
        amount: Amount,
        kind: TransactionKind,
        reference: LedgerReference,
    ) -> Result<LedgerReceipt> {
        let guard = self.locks.acquire(tenant).await;
        self.credit_locked(&guard, amount, kind, reference).await
    }

    pub(crate) async fn credit_locked(
        &self,
        guard: &TenantGuard,
        amount: Amount,
        kind: TransactionKind,
        reference: LedgerReference,
    ) -> Result<LedgerReceipt> {
        if kind == TransactionKind::DebitMetering {
            return Err(BillingError::ValidationError(
                "metering debits cannot be recorded as credits".to_string(),
            ));
        }
        let mut wallet = self.wallet(guard.tenant()).await?;
        let was_paused = wallet.is_paused;
        let transaction = wallet.credit(amount, kind, reference, self.clock.now());
        self.store.commit(transaction.clone(), wallet.clone()).await?;

        tracing::info!(
            tenant = %wallet.tenant,
            amount = %amount,
            balance = %wallet.balance,
            unpaused = was_paused,
            "wallet credited"
        );
        Ok(LedgerReceipt {
            transaction,
            wallet,
        })
    }

    /// Flags the wallet as exhausted so its integrations stay paused until a credit.
    pub(crate) async fn mark_paused_locked(&self, guard: &TenantGuard) -> Result<Wallet> {
        let mut wallet = self.wallet(guard.tenant()).await?;
        if !wallet.is_paused {
            wallet.is_paused = true;
            wallet.updated_at = self.clock.now();
            self.store.save_wallet(wallet.clone()).await?;
            tracing::warn!(tenant = %wallet.tenant, balance = %wallet.balance, "wallet paused on exhaustion");
        }
        Ok(wallet)
    }

    /// Recomputes the balance from the transaction log alone.
    pub async fn replay_balance(&self, tenant: &TenantId) -> Result<Balance> {
        let entries = self.store.transactions(tenant).await?;
        Ok(transaction::replay(&entries))
    }

    /// Checks the cached balance against a full replay of the log.
    pub async fn verify(&self, tenant: &TenantId) -> Result<Wallet> {
        let _guard = self.locks.acquire(tenant).await;
        let wallet = self.wallet(tenant).await?;
        let replayed = self.replay_balance(tenant).await?;
        if replayed != wallet.balance {
            tracing::error!(%tenant, cached = %wallet.balance, %replayed, "ledger projection drifted");
            return Err(BillingError::LedgerCorrupted {
                tenant: tenant.to_string(),
                detail: format!("cached balance {} but log sums to {replayed}", wallet.balance),
            });
        }
        Ok(wallet)
    }
}
