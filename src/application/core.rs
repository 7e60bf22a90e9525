use super::gateway::PaymentGatewayAdapter;
use super::ingestor::WebhookIngestor;
use super::ledger::WalletLedger;
use super::locks::TenantLocks;
use super::reconciler::FailedPaymentReconciler;
use super::registry::IntegrationRegistry;
use super::tenants::TenantDirectory;
use crate::config::BillingConfig;
use crate::domain::ports::{ClockHandle, EventProcessorHandle, GatewayClientHandle, Stores};
use crate::error::Result;
use chrono::{DateTime, Utc};

/// All billing services over one set of stores, sharing one per-tenant lock
/// table and one configuration.
#[derive(Clone)]
pub struct BillingCore {
    pub tenants: TenantDirectory,
    pub ledger: WalletLedger,
    pub registry: IntegrationRegistry,
    pub ingestor: WebhookIngestor,
    pub gateway: PaymentGatewayAdapter,
    pub reconciler: FailedPaymentReconciler,
    config: BillingConfig,
    clock: ClockHandle,
}

impl BillingCore {
    /// Wires the services. Fails if the configuration is inconsistent.
    pub fn new(
        stores: Stores,
        config: BillingConfig,
        processor: EventProcessorHandle,
        gateway_client: GatewayClientHandle,
        clock: ClockHandle,
    ) -> Result<Self> {
        config.validate()?;
        let locks = TenantLocks::new();

        let ledger = WalletLedger::new(stores.ledger.clone(), locks.clone(), clock.clone());
        let tenants = TenantDirectory::new(
            stores.tenants.clone(),
            ledger.clone(),
            clock.clone(),
            config.default_free_quota,
        );
        let registry = IntegrationRegistry::new(
            stores.integrations.clone(),
            ledger.clone(),
            locks.clone(),
            clock.clone(),
        );
        let ingestor = WebhookIngestor::new(
            registry.clone(),
            ledger.clone(),
            stores.tenants.clone(),
            stores.events.clone(),
            processor,
            locks.clone(),
            clock.clone(),
            &config,
        );
        let reconciler = FailedPaymentReconciler::new(
            stores.failed_payments.clone(),
            locks.clone(),
            clock.clone(),
        );
        let gateway = PaymentGatewayAdapter::new(
            stores.orders.clone(),
            gateway_client,
            ledger.clone(),
            reconciler.clone(),
            locks,
            clock.clone(),
            &config,
        );

        Ok(Self {
            tenants,
            ledger,
            registry,
            ingestor,
            gateway,
            reconciler,
            config,
            clock,
        })
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    /// Current time as seen by every service of this core.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::SystemClock;
    use crate::infrastructure::gateway::LocalGatewayClient;
    use crate::infrastructure::in_memory;
    use crate::infrastructure::processor::LoggingProcessor;
    use std::sync::Arc;

    #[test]
    fn test_rejects_invalid_config() {
        let result = BillingCore::new(
            in_memory::stores(),
            BillingConfig::default(),
            Arc::new(LoggingProcessor),
            Arc::new(LocalGatewayClient::new()),
            Arc::new(SystemClock),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_builds_with_valid_config() {
        let config = BillingConfig {
            gateway_secret: "s".to_string(),
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
        assert_eq!(core.config().default_free_quota, 100);
    }

    #[test]
    fn test_now_follows_injected_clock() {
        use crate::infrastructure::clock::ManualClock;

        let start = chrono::Utc::now() - chrono::Duration::days(3);
        let clock = Arc::new(ManualClock::new(start));
        let config = BillingConfig {
            gateway_secret: "s".to_string(),
            ..BillingConfig::default()
        };
        let core = BillingCore::new(
            in_memory::stores(),
            config,
            Arc::new(LoggingProcessor),
            Arc::new(LocalGatewayClient::new()),
            clock.clone(),
        )
        .unwrap();
        assert_eq!(core.now(), start);
        clock.advance(chrono::Duration::hours(1));
        assert_eq!(core.now(), start + chrono::Duration::hours(1));
    }
}
