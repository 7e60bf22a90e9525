#![allow(dead_code)]

use billing_core::application::BillingCore;
use billing_core::application::registry::NewIntegration;
use billing_core::config::BillingConfig;
use billing_core::domain::integration::{ConnectionTest, IntegrationId};
use billing_core::domain::money::Amount;
use billing_core::domain::ports::EventProcessorHandle;
use billing_core::domain::principal::Principal;
use billing_core::domain::tenant::{TenantId, TenantStatus};
use billing_core::domain::transaction::{LedgerReference, TransactionKind};
use billing_core::domain::webhook::{EventCategory, WebhookDelivery};
use billing_core::infrastructure::clock::ManualClock;
use billing_core::infrastructure::gateway::LocalGatewayClient;
use billing_core::infrastructure::in_memory;
use billing_core::infrastructure::processor::LoggingProcessor;
use chrono::Utc;
use rust_decimal::Decimal;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;

pub const SECRET: &str = "test-gateway-secret";
pub const TOKEN: &str = "webhook-token";

pub struct Harness {
    pub core: BillingCore,
    pub clock: Arc<ManualClock>,
}

pub fn config() -> BillingConfig {
    BillingConfig {
        gateway_secret: SECRET.to_string(),
        ..BillingConfig::default()
    }
}

pub fn harness() -> Harness {
    harness_with(Arc::new(LoggingProcessor))
}

pub fn harness_with(processor: EventProcessorHandle) -> Harness {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let core = BillingCore::new(
        in_memory::stores(),
        config(),
        processor,
        Arc::new(LocalGatewayClient::new()),
        clock.clone(),
    )
    .unwrap();
    Harness { core, clock }
}

/// Registers an active tenant with `quota` free events and `balance` in the wallet.
pub async fn tenant(core: &BillingCore, id: &str, quota: u32, balance: Decimal) -> TenantId {
    let tenant = TenantId::new(id);
    core.tenants
        .register(&Principal::Admin, &tenant, TenantStatus::Active, Some(quota))
        .await
        .unwrap();
    if balance > Decimal::ZERO {
        core.ledger
            .credit(
                &tenant,
                Amount::new(balance).unwrap(),
                TransactionKind::Adjustment,
                LedgerReference::Note("opening balance".to_string()),
            )
            .await
            .unwrap();
    }
    tenant
}

pub async fn active_integration(core: &BillingCore, tenant: &TenantId, id: &str) -> IntegrationId {
    let owner = Principal::Tenant(tenant.clone());
    let integration = core
        .registry
        .create(
            &owner,
            NewIntegration {
                id: IntegrationId::new(id),
                tenant: tenant.clone(),
                marketplace: "amazon".to_string(),
                token: TOKEN.to_string(),
                token_expires_at: None,
            },
        )
        .await
        .unwrap();
    core.registry
        .activate(&owner, &integration.id, ConnectionTest::passed(Utc::now()))
        .await
        .unwrap();
    integration.id
}

pub fn delivery(integration: &IntegrationId, event_id: &str) -> WebhookDelivery {
    WebhookDelivery {
        integration: integration.clone(),
        category: EventCategory::Order,
        token: TOKEN.to_string(),
        source_event_id: Some(event_id.to_string()),
        payload: format!(r#"{{"id":"{event_id}"}}"#).into_bytes(),
    }
}

/// Writes a feed for one funded tenant followed by `events` distinct events.
pub fn generate_feed(path: &Path, events: usize) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(["type", "tenant", "integration", "reference", "amount", "token"])?;
    wtr.write_record(["tenant", "acme", "", "", "0", ""])?;
    wtr.write_record(["adjust", "acme", "", "opening", "1000", ""])?;
    wtr.write_record(["integration", "acme", "int-1", "amazon", "", TOKEN])?;
    wtr.write_record(["activate", "acme", "int-1", "", "", ""])?;

    for i in 1..=events {
        let reference = format!("evt-{i}");
        wtr.write_record(["event", "acme", "int-1", reference.as_str(), "", TOKEN])?;
    }

    wtr.flush()?;
    Ok(())
}
