use super::ledger::WalletLedger;
use super::locks::{TenantGuard, TenantLocks};
use super::registry::IntegrationRegistry;
use crate::config::BillingConfig;
use crate::domain::integration::{Integration, IntegrationId, IntegrationState};
use crate::domain::money::Amount;
use crate::domain::ports::{ClockHandle, EventProcessorHandle, TenantStoreHandle, WebhookEventStoreHandle};
use crate::domain::principal::Principal;
use crate::domain::transaction::{LedgerReference, Transaction, TransactionKind};
use crate::domain::wallet::Wallet;
use crate::domain::webhook::{
    EventOutcome, HandoffStatus, IdempotencyKey, WebhookDelivery, WebhookEvent,
};
use crate::error::{AuthFailure, BillingError, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

/// Result of a webhook delivery that passed authentication.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Metered and handed to the downstream processor.
    Accepted {
        event: WebhookEvent,
        transaction: Transaction,
        wallet: Wallet,
    },
    /// Already accepted within the dedupe window; nothing was charged.
    Duplicate { original: WebhookEvent },
    /// Not enough funds; the integration was paused. Safe to redeliver
    /// after a recharge.
    InsufficientBalance {
        event: WebhookEvent,
        integration: Integration,
        wallet: Wallet,
    },
}

/// Authenticates, deduplicates and meters inbound webhook deliveries.
#[derive(Clone)]
pub struct WebhookIngestor {
    registry: IntegrationRegistry,
    ledger: WalletLedger,
    tenants: TenantStoreHandle,
    events: WebhookEventStoreHandle,
    processor: EventProcessorHandle,
    locks: TenantLocks,
    clock: ClockHandle,
    fee: Amount,
    dedupe_window: chrono::Duration,
    audit_retention: chrono::Duration,
    downstream_timeout: Duration,
}

impl WebhookIngestor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: IntegrationRegistry,
        ledger: WalletLedger,
        tenants: TenantStoreHandle,
        events: WebhookEventStoreHandle,
        processor: EventProcessorHandle,
        locks: TenantLocks,
        clock: ClockHandle,
        config: &BillingConfig,
    ) -> Self {
        Self {
            registry,
            ledger,
            tenants,
            events,
            processor,
            locks,
            clock,
            fee: config.metering_fee,
            dedupe_window: config.dedupe_window,
            audit_retention: config.audit_retention,
            downstream_timeout: config.downstream_timeout,
        }
    }

    pub async fn ingest(&self, delivery: WebhookDelivery) -> Result<IngestOutcome> {
        let tenant = self.registry.get(&delivery.integration).await?.tenant;
        let key = IdempotencyKey::derive(
            &delivery.integration,
            delivery.category,
            delivery.source_event_id.as_deref(),
            &delivery.payload,
        );

        let guard = self.locks.acquire(&tenant).await;
        let integration = self.registry.get(&delivery.integration).await?;
        let now = self.clock.now();

        if let Some(failure) = self.authenticate(&integration, &delivery.token, now).await? {
            let event = self.new_event(&integration, &delivery, key, EventOutcome::RejectedUnauthorized, now);
            self.events.record(event).await?;
            tracing::warn!(
                integration = %integration.id,
                tenant = %integration.tenant,
                reason = %failure,
                "webhook rejected"
            );
            return Err(BillingError::Authentication(failure));
        }

        if let Some(original) = self.events.find_accepted(&key).await?
            && now - original.received_at < self.dedupe_window
        {
            tracing::info!(integration = %integration.id, %key, "duplicate webhook ignored");
            // Only a failed handoff is retried; claiming it as pending under the
            // guard keeps concurrent redeliveries from retrying it twice.
            if original.handoff != HandoffStatus::Failed {
                return Ok(IngestOutcome::Duplicate { original });
            }
            let mut retry = original;
            retry.handoff = HandoffStatus::Pending;
            self.events.record(retry.clone()).await?;
            drop(guard);
            let original = self.hand_off(retry, &delivery.payload).await?;
            return Ok(IngestOutcome::Duplicate { original });
        }

        let mut event = self.new_event(&integration, &delivery, key, EventOutcome::Accepted, now);
        match self
            .ledger
            .try_debit_locked(&guard, self.fee, LedgerReference::WebhookEvent(event.id))
            .await
        {
            Ok(receipt) => {
                event.handoff = HandoffStatus::Pending;
                event.transaction = Some(receipt.transaction.id);
                if let Err(e) = self.events.record(event.clone()).await {
                    self.reverse_charge_locked(&guard, &receipt.transaction, event.id)
                        .await?;
                    return Err(e);
                }
                drop(guard);
                tracing::info!(
                    integration = %integration.id,
                    key = %event.key,
                    charged = %receipt.transaction.amount,
                    balance = %receipt.wallet.balance,
                    "webhook accepted"
                );

                let event = self.hand_off(event, &delivery.payload).await?;
                Ok(IngestOutcome::Accepted {
                    event,
                    transaction: receipt.transaction,
                    wallet: receipt.wallet,
                })
            }
            Err(BillingError::InsufficientBalance { .. }) => {
                event.outcome = EventOutcome::RejectedInsufficientBalance;
                self.events.record(event.clone()).await?;
                let wallet = self.ledger.mark_paused_locked(&guard).await?;
                let integration = self
                    .registry
                    .auto_pause_locked(&guard, &integration.id)
                    .await?;
                Ok(IngestOutcome::InsufficientBalance {
                    event,
                    integration,
                    wallet,
                })
            }
            Err(other) => Err(other),
        }
    }

    /// Recorded deliveries of one integration, oldest first.
    pub async fn events_for(
        &self,
        principal: &Principal,
        integration: &IntegrationId,
    ) -> Result<Vec<WebhookEvent>> {
        let owner = self.registry.get(integration).await?.tenant;
        principal.authorize_for(&owner)?;
        self.events.list_for_integration(integration).await
    }

    /// Drops event records older than the audit retention.
    pub async fn purge_expired(&self) -> Result<usize> {
        let cutoff = self.clock.now() - self.audit_retention;
        let removed = self.events.purge_before(cutoff).await?;
        if removed > 0 {
            tracing::info!(removed, %cutoff, "purged expired webhook events");
        }
        Ok(removed)
    }

    async fn authenticate(
        &self,
        integration: &Integration,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthFailure>> {
        if !integration.credential.matches(token) {
            return Ok(Some(AuthFailure::TokenMismatch));
        }
        if integration.credential.is_expired(now) {
            return Ok(Some(AuthFailure::CredentialExpired));
        }
        let tenant_active = self
            .tenants
            .get(&integration.tenant)
            .await?
            .is_some_and(|tenant| tenant.is_active());
        if !tenant_active {
            return Ok(Some(AuthFailure::TenantInactive));
        }
        if integration.state != IntegrationState::Active {
            return Ok(Some(AuthFailure::IntegrationInactive(integration.state)));
        }
        Ok(None)
    }

    /// Refunds a charge whose event could not be recorded, so a redelivery
    /// is not billed twice. A consumed free-quota unit stays consumed.
    async fn reverse_charge_locked(
        &self,
        guard: &TenantGuard,
        charge: &Transaction,
        event: Uuid,
    ) -> Result<()> {
        tracing::error!(
            tenant = %charge.tenant,
            event_id = %event,
            charged = %charge.amount,
            "webhook event not recorded; reversing charge"
        );
        if charge.is_free() {
            return Ok(());
        }
        let amount = Amount::new(-charge.amount.value())?;
        self.ledger
            .credit_locked(
                guard,
                amount,
                TransactionKind::Adjustment,
                LedgerReference::WebhookEvent(event),
            )
            .await?;
        Ok(())
    }

    fn new_event(
        &self,
        integration: &Integration,
        delivery: &WebhookDelivery,
        key: IdempotencyKey,
        outcome: EventOutcome,
        now: DateTime<Utc>,
    ) -> WebhookEvent {
        WebhookEvent {
            id: Uuid::new_v4(),
            key,
            integration: integration.id.clone(),
            tenant: integration.tenant.clone(),
            category: delivery.category,
            outcome,
            handoff: HandoffStatus::Skipped,
            transaction: None,
            received_at: now,
        }
    }

    /// Gives the payload to the downstream processor. The charge is already
    /// committed, so a failure here is reported as an infrastructure error and
    /// the event stays retriable through redelivery.
    async fn hand_off(&self, mut event: WebhookEvent, payload: &[u8]) -> Result<WebhookEvent> {
        let result =
            tokio::time::timeout(self.downstream_timeout, self.processor.process(&event, payload)).await;
        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(BillingError::Downstream(e.to_string())),
            Err(_) => Some(BillingError::Timeout(format!(
                "downstream processing of event {} exceeded {:?}",
                event.id, self.downstream_timeout
            ))),
        };

        event.handoff = if failure.is_some() {
            HandoffStatus::Failed
        } else {
            HandoffStatus::Delivered
        };
        self.events.record(event.clone()).await?;

        match failure {
            Some(e) => {
                tracing::error!(event_id = %event.id, integration = %event.integration, error = %e, "downstream handoff failed");
                Err(e)
            }
            None => Ok(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::tenants::TenantDirectory;
    use crate::application::registry::NewIntegration;
    use crate::domain::integration::ConnectionTest;
    use crate::domain::ports::{EventProcessor, Stores, WebhookEventStore};
    use crate::domain::tenant::{TenantId, TenantStatus};
    use crate::domain::webhook::EventCategory;
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::in_memory;
    use crate::infrastructure::processor::LoggingProcessor;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Fails the first `failures` calls, then succeeds. Every call takes `delay`.
    struct FlakyProcessor {
        failures: usize,
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EventProcessor for FlakyProcessor {
        async fn process(&self, _event: &WebhookEvent, _payload: &[u8]) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if call < self.failures {
                Err(BillingError::Downstream("connector unavailable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    /// Event store that refuses to record accepted events while `refuse` is set.
    struct RefusingEventStore {
        inner: WebhookEventStoreHandle,
        refuse: AtomicBool,
    }

    #[async_trait]
    impl WebhookEventStore for RefusingEventStore {
        async fn record(&self, event: WebhookEvent) -> Result<()> {
            if self.refuse.load(Ordering::SeqCst) && event.outcome == EventOutcome::Accepted {
                return Err(BillingError::Storage("event log unavailable".to_string()));
            }
            self.inner.record(event).await
        }
        async fn find_accepted(&self, key: &IdempotencyKey) -> Result<Option<WebhookEvent>> {
            self.inner.find_accepted(key).await
        }
        async fn list_for_integration(&self, integration: &IntegrationId) -> Result<Vec<WebhookEvent>> {
            self.inner.list_for_integration(integration).await
        }
        async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
            self.inner.purge_before(cutoff).await
        }
    }

    struct Fixture {
        ingestor: WebhookIngestor,
        ledger: WalletLedger,
        registry: IntegrationRegistry,
        clock: Arc<ManualClock>,
    }

    async fn fixture(processor: EventProcessorHandle, quota: u32, balance: rust_decimal::Decimal) -> Fixture {
        fixture_with(in_memory::stores(), processor, quota, balance).await
    }

    async fn fixture_with(
        stores: Stores,
        processor: EventProcessorHandle,
        quota: u32,
        balance: rust_decimal::Decimal,
    ) -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let clock_handle: ClockHandle = clock.clone();
        let locks = TenantLocks::new();
        let config = BillingConfig {
            gateway_secret: "secret".to_string(),
            ..BillingConfig::default()
        };
        let ledger = WalletLedger::new(stores.ledger.clone(), locks.clone(), clock_handle.clone());
        let registry = IntegrationRegistry::new(
            stores.integrations.clone(),
            ledger.clone(),
            locks.clone(),
            clock_handle.clone(),
        );
        let directory = TenantDirectory::new(
            stores.tenants.clone(),
            ledger.clone(),
            clock_handle.clone(),
            config.default_free_quota,
        );
        let ingestor = WebhookIngestor::new(
            registry.clone(),
            ledger.clone(),
            stores.tenants.clone(),
            stores.events.clone(),
            processor,
            locks,
            clock_handle,
            &config,
        );

        let tenant = TenantId::new("acme");
        directory
            .register(&Principal::Admin, &tenant, TenantStatus::Active, Some(quota))
            .await
            .unwrap();
        if let Ok(amount) = Amount::new(balance) {
            ledger
                .credit(&tenant, amount, TransactionKind::Adjustment, LedgerReference::Note("opening".to_string()))
                .await
                .unwrap();
        }
        registry
            .create(
                &Principal::Admin,
                NewIntegration {
                    id: IntegrationId::new("int-1"),
                    tenant,
                    marketplace: "flipkart".to_string(),
                    token: "tok".to_string(),
                    token_expires_at: None,
                },
            )
            .await
            .unwrap();
        registry
            .activate(&Principal::Admin, &IntegrationId::new("int-1"), ConnectionTest::passed(Utc::now()))
            .await
            .unwrap();

        Fixture {
            ingestor,
            ledger,
            registry,
            clock,
        }
    }

    fn delivery(event_id: &str, token: &str) -> WebhookDelivery {
        WebhookDelivery {
            integration: IntegrationId::new("int-1"),
            category: EventCategory::Order,
            token: token.to_string(),
            source_event_id: Some(event_id.to_string()),
            payload: br#"{"order":"A-1"}"#.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_wrong_token_is_rejected_and_recorded() {
        let f = fixture(Arc::new(LoggingProcessor), 1, dec!(0)).await;
        let result = f.ingestor.ingest(delivery("e1", "bad")).await;
        assert!(matches!(
            result,
            Err(BillingError::Authentication(AuthFailure::TokenMismatch))
        ));

        let events = f
            .ingestor
            .events_for(&Principal::Admin, &IntegrationId::new("int-1"))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome, EventOutcome::RejectedUnauthorized);
        assert_eq!(f.ledger.wallet(&TenantId::new("acme")).await.unwrap().free_quota_remaining, 1);
    }

    #[tokio::test]
    async fn test_inactive_integration_reports_state() {
        let f = fixture(Arc::new(LoggingProcessor), 1, dec!(0)).await;
        f.registry
            .suspend(&Principal::Admin, &IntegrationId::new("int-1"))
            .await
            .unwrap();
        let result = f.ingestor.ingest(delivery("e1", "tok")).await;
        assert!(matches!(
            result,
            Err(BillingError::Authentication(AuthFailure::IntegrationInactive(
                IntegrationState::Suspended
            )))
        ));
    }

    #[tokio::test]
    async fn test_unknown_integration() {
        let f = fixture(Arc::new(LoggingProcessor), 1, dec!(0)).await;
        let mut unknown = delivery("e1", "tok");
        unknown.integration = IntegrationId::new("nope");
        assert!(matches!(
            f.ingestor.ingest(unknown).await,
            Err(BillingError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_within_window_is_free() {
        let f = fixture(Arc::new(LoggingProcessor), 0, dec!(10)).await;
        let first = f.ingestor.ingest(delivery("e1", "tok")).await.unwrap();
        assert!(matches!(first, IngestOutcome::Accepted { .. }));

        let second = f.ingestor.ingest(delivery("e1", "tok")).await.unwrap();
        assert!(matches!(second, IngestOutcome::Duplicate { .. }));

        let tenant = TenantId::new("acme");
        assert_eq!(f.ledger.wallet(&tenant).await.unwrap().balance.value(), dec!(8));
    }

    #[tokio::test]
    async fn test_redelivery_after_window_is_charged_again() {
        let f = fixture(Arc::new(LoggingProcessor), 0, dec!(10)).await;
        f.ingestor.ingest(delivery("e1", "tok")).await.unwrap();
        f.clock.advance(chrono::Duration::hours(25));

        let again = f.ingestor.ingest(delivery("e1", "tok")).await.unwrap();
        assert!(matches!(again, IngestOutcome::Accepted { .. }));
        assert_eq!(
            f.ledger.wallet(&TenantId::new("acme")).await.unwrap().balance.value(),
            dec!(6)
        );
    }

    #[tokio::test]
    async fn test_handoff_failure_keeps_charge_and_retries_on_redelivery() {
        let processor = Arc::new(FlakyProcessor {
            failures: 1,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        });
        let f = fixture(processor.clone(), 0, dec!(10)).await;

        let first = f.ingestor.ingest(delivery("e1", "tok")).await;
        assert!(matches!(first, Err(BillingError::Downstream(_))));
        let tenant = TenantId::new("acme");
        assert_eq!(f.ledger.wallet(&tenant).await.unwrap().balance.value(), dec!(8));

        let retry = f.ingestor.ingest(delivery("e1", "tok")).await.unwrap();
        match retry {
            IngestOutcome::Duplicate { original } => {
                assert_eq!(original.handoff, HandoffStatus::Delivered)
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
        assert_eq!(processor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(f.ledger.wallet(&tenant).await.unwrap().balance.value(), dec!(8));
    }

    #[tokio::test]
    async fn test_purge_respects_retention() {
        let f = fixture(Arc::new(LoggingProcessor), 5, dec!(0)).await;
        f.ingestor.ingest(delivery("e1", "tok")).await.unwrap();
        assert_eq!(f.ingestor.purge_expired().await.unwrap(), 0);

        f.clock.advance(chrono::Duration::days(91));
        assert_eq!(f.ingestor.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_redeliveries_retry_failed_handoff_once() {
        let processor = Arc::new(FlakyProcessor {
            failures: 1,
            delay: Duration::from_millis(30),
            calls: AtomicUsize::new(0),
        });
        let f = fixture(processor.clone(), 0, dec!(10)).await;
        assert!(f.ingestor.ingest(delivery("e1", "tok")).await.is_err());

        let mut handles = Vec::new();
        for _ in 0..6 {
            let ingestor = f.ingestor.clone();
            handles.push(tokio::spawn(async move {
                ingestor.ingest(delivery("e1", "tok")).await.unwrap()
            }));
        }
        for handle in handles {
            assert!(matches!(handle.await.unwrap(), IngestOutcome::Duplicate { .. }));
        }
        assert_eq!(processor.calls.load(Ordering::SeqCst), 2);

        let events = f
            .ingestor
            .events_for(&Principal::Admin, &IntegrationId::new("int-1"))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].handoff, HandoffStatus::Delivered);
    }

    #[tokio::test]
    async fn test_unrecorded_event_reverses_its_charge() {
        let mut stores = in_memory::stores();
        let events = Arc::new(RefusingEventStore {
            inner: stores.events.clone(),
            refuse: AtomicBool::new(true),
        });
        stores.events = events.clone();
        let f = fixture_with(stores, Arc::new(LoggingProcessor), 0, dec!(10)).await;
        let tenant = TenantId::new("acme");

        let result = f.ingestor.ingest(delivery("e1", "tok")).await;
        assert!(matches!(result, Err(BillingError::Storage(_))));
        let wallet = f.ledger.verify(&tenant).await.unwrap();
        assert_eq!(wallet.balance.value(), dec!(10));

        events.refuse.store(false, Ordering::SeqCst);
        let retry = f.ingestor.ingest(delivery("e1", "tok")).await.unwrap();
        assert!(matches!(retry, IngestOutcome::Accepted { .. }));
        let wallet = f.ledger.verify(&tenant).await.unwrap();
        assert_eq!(wallet.balance.value(), dec!(8));

        let kinds: Vec<TransactionKind> = f
            .ledger
            .transactions(&tenant)
            .await
            .unwrap()
            .iter()
            .map(|tx| tx.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                TransactionKind::Adjustment,
                TransactionKind::DebitMetering,
                TransactionKind::Adjustment,
                TransactionKind::DebitMetering,
            ]
        );
    }
}
