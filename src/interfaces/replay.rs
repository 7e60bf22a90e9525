use super::csv::feed_reader::{FeedKind, FeedRecord};
use crate::application::BillingCore;
use crate::application::gateway::sign_payload;
use crate::application::ingestor::IngestOutcome;
use crate::application::registry::NewIntegration;
use crate::domain::integration::{ConnectionTest, IntegrationId};
use crate::domain::money::Amount;
use crate::domain::payment::GatewayOrderParams;
use crate::domain::principal::Principal;
use crate::domain::tenant::{TenantId, TenantStatus};
use crate::domain::transaction::{LedgerReference, TransactionKind};
use crate::domain::webhook::{EventCategory, WebhookDelivery};
use crate::error::{BillingError, Result};
use rust_decimal::prelude::ToPrimitive;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub applied: usize,
    pub skipped: usize,
}

/// Drives a `BillingCore` from feed records.
///
/// Tenant-owned operations run as that tenant; suspension and adjustments run
/// as an admin. Recharges are settled with a callback signed by the configured
/// gateway secret, exactly as the gateway would send it.
pub struct FeedReplayer {
    core: BillingCore,
}

impl FeedReplayer {
    pub fn new(core: BillingCore) -> Self {
        Self { core }
    }

    pub fn core(&self) -> &BillingCore {
        &self.core
    }

    /// Applies every record; bad rows are logged and skipped.
    pub async fn replay(&self, records: impl IntoIterator<Item = Result<FeedRecord>>) -> ReplaySummary {
        let mut summary = ReplaySummary::default();
        for (index, record) in records.into_iter().enumerate() {
            let row = index + 1;
            let result = match record {
                Ok(record) => self.apply(record).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => summary.applied += 1,
                Err(e) => {
                    tracing::warn!(row, error = %e, "skipping feed row");
                    summary.skipped += 1;
                }
            }
        }
        summary
    }

    pub async fn apply(&self, record: FeedRecord) -> Result<()> {
        let core = &self.core;
        let tenant = TenantId::new(record.tenant.as_str());
        let owner = Principal::Tenant(tenant.clone());

        match record.kind {
            FeedKind::Tenant => {
                let quota = record
                    .amount
                    .map(|quota| {
                        quota.to_u32().filter(|_| quota.fract().is_zero()).ok_or_else(|| {
                            BillingError::ValidationError(format!("invalid free quota {quota}"))
                        })
                    })
                    .transpose()?;
                core.tenants
                    .register(&Principal::Admin, &tenant, TenantStatus::Active, quota)
                    .await?;
            }
            FeedKind::Integration => {
                let request = NewIntegration {
                    id: IntegrationId::new(record.require_integration()?),
                    tenant,
                    marketplace: record.reference.clone().unwrap_or_default(),
                    token: record.token.clone().unwrap_or_default(),
                    token_expires_at: None,
                };
                core.registry.create(&owner, request).await?;
            }
            FeedKind::Activate => {
                let id = IntegrationId::new(record.require_integration()?);
                core.registry
                    .activate(&owner, &id, ConnectionTest::passed(core.now()))
                    .await?;
            }
            FeedKind::Pause => {
                let id = IntegrationId::new(record.require_integration()?);
                core.registry.pause(&owner, &id).await?;
            }
            FeedKind::Resume => {
                let id = IntegrationId::new(record.require_integration()?);
                core.registry.resume(&owner, &id).await?;
            }
            FeedKind::Suspend => {
                let id = IntegrationId::new(record.require_integration()?);
                core.registry.suspend(&Principal::Admin, &id).await?;
            }
            FeedKind::Delete => {
                let id = IntegrationId::new(record.require_integration()?);
                core.registry.delete(&owner, &id).await?;
            }
            FeedKind::Event => {
                let integration = IntegrationId::new(record.require_integration()?);
                let payload = serde_json::to_vec(&serde_json::json!({
                    "tenant": record.tenant,
                    "integration": integration.as_str(),
                    "reference": record.reference,
                }))?;
                let delivery = WebhookDelivery {
                    integration,
                    category: EventCategory::Order,
                    token: record.token.clone().unwrap_or_default(),
                    source_event_id: record.reference.clone(),
                    payload,
                };
                if let IngestOutcome::InsufficientBalance { integration, .. } =
                    core.ingestor.ingest(delivery).await?
                {
                    tracing::debug!(integration = %integration.id, "event dropped for lack of funds");
                }
            }
            FeedKind::Recharge => {
                let params = self.order(&owner, &tenant, &record).await?;
                let body = callback_body(&params, "pay_feed")?;
                let signature = sign_payload(&core.config().gateway_secret, &body)?;
                core.gateway.handle_callback(&body, &signature).await?;
            }
            FeedKind::Tampered => {
                let params = self.order(&owner, &tenant, &record).await?;
                let signed = callback_body(&params, "pay_feed")?;
                let signature = sign_payload(&core.config().gateway_secret, &signed)?;
                let forged = callback_body(&params, "pay_forged")?;
                core.gateway.handle_callback(&forged, &signature).await?;
            }
            FeedKind::Adjust => {
                let amount = Amount::new(record.require_amount()?)?;
                let note = record
                    .reference
                    .clone()
                    .unwrap_or_else(|| "manual adjustment".to_string());
                core.ledger
                    .credit(&tenant, amount, TransactionKind::Adjustment, LedgerReference::Note(note))
                    .await?;
            }
        }
        Ok(())
    }

    async fn order(
        &self,
        owner: &Principal,
        tenant: &TenantId,
        record: &FeedRecord,
    ) -> Result<GatewayOrderParams> {
        let amount = Amount::new(record.require_amount()?)?;
        self.core.gateway.create_order(owner, tenant, amount).await
    }
}

fn callback_body(params: &GatewayOrderParams, payment_id: &str) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&serde_json::json!({
        "gateway_order_id": params.gateway_order_id,
        "gateway_payment_id": payment_id,
        "amount": params.amount,
    }))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::reconciler::ResolutionFilter;
    use crate::config::BillingConfig;
    use crate::infrastructure::clock::SystemClock;
    use crate::infrastructure::gateway::LocalGatewayClient;
    use crate::infrastructure::in_memory;
    use crate::infrastructure::processor::LoggingProcessor;
    use crate::interfaces::csv::feed_reader::FeedReader;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn replayer() -> FeedReplayer {
        let config = BillingConfig {
            gateway_secret: "feed-secret".to_string(),
            ..BillingConfig::default()
        };
        let core = BillingCore::new(
            in_memory::stores(),
            config,
            Arc::new(LoggingProcessor),
            Arc::new(LocalGatewayClient::new()),
            Arc::new(SystemClock),
        )
        .unwrap();
        FeedReplayer::new(core)
    }

    #[tokio::test]
    async fn test_replay_meters_and_recharges() {
        let feed = "\
type,tenant,integration,reference,amount,token
tenant,acme,,,1,
adjust,acme,,opening,3,
integration,acme,int-1,flipkart,,tok
activate,acme,int-1,,,
event,acme,int-1,e1,,tok
event,acme,int-1,e2,,tok
event,acme,int-1,e2,,tok
event,acme,int-1,e3,,tok
recharge,acme,,,100,
tampered,acme,,,500,
bogus,acme,,,,
";
        let replayer = replayer();
        let summary = replayer
            .replay(FeedReader::new(feed.as_bytes()).records())
            .await;
        // The unknown row and the tampered callback are skipped.
        assert_eq!(summary.skipped, 2);

        let core = replayer.core();
        let wallet = core.ledger.wallet(&TenantId::new("acme")).await.unwrap();
        // 1 free event, one charged 2, duplicate free, last one short of funds.
        assert_eq!(wallet.balance.value(), dec!(101));
        assert!(!wallet.is_paused);

        let failed = core
            .reconciler
            .list(&Principal::Admin, ResolutionFilter::Unresolved, 1, 10)
            .await
            .unwrap();
        assert_eq!(failed.total, 1);
        assert_eq!(failed.items[0].amount.value(), dec!(500));
    }

    #[tokio::test]
    async fn test_activation_is_stamped_with_core_clock() {
        use crate::infrastructure::clock::ManualClock;

        let start = chrono::Utc::now() - chrono::Duration::days(30);
        let core = BillingCore::new(
            in_memory::stores(),
            BillingConfig {
                gateway_secret: "feed-secret".to_string(),
                ..BillingConfig::default()
            },
            Arc::new(LoggingProcessor),
            Arc::new(LocalGatewayClient::new()),
            Arc::new(ManualClock::new(start)),
        )
        .unwrap();
        let replayer = FeedReplayer::new(core);
        let feed = "\
type,tenant,integration,reference,amount,token
tenant,acme,,,,
integration,acme,int-1,flipkart,,tok
activate,acme,int-1,,,
";
        let summary = replayer
            .replay(FeedReader::new(feed.as_bytes()).records())
            .await;
        assert_eq!(summary.skipped, 0);

        let integration = replayer
            .core()
            .registry
            .get(&IntegrationId::new("int-1"))
            .await
            .unwrap();
        let test = integration.last_test.unwrap();
        assert!(test.passed);
        assert_eq!(test.checked_at, start);
    }

    #[tokio::test]
    async fn test_rows_missing_integration_are_rejected() {
        let replayer = replayer();
        let record = FeedRecord {
            kind: FeedKind::Pause,
            tenant: "acme".to_string(),
            integration: None,
            reference: None,
            amount: None,
            token: None,
        };
        assert!(matches!(
            replayer.apply(record).await,
            Err(BillingError::ValidationError(_))
        ));
    }
}
