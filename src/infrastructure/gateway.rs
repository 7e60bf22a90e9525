use crate::domain::money::Amount;
use crate::domain::ports::GatewayClient;
use crate::error::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Gateway client that mints order ids locally.
///
/// Stands in for the hosted gateway when replaying feeds and in tests; the
/// callback side is exercised with real signatures either way.
#[derive(Debug, Default, Clone)]
pub struct LocalGatewayClient;

impl LocalGatewayClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GatewayClient for LocalGatewayClient {
    async fn create_order(&self, order_id: Uuid, amount: Amount, currency: &str) -> Result<String> {
        tracing::debug!(%order_id, %amount, currency, "registering order with local gateway");
        Ok(format!("order_{}", order_id.simple()))
    }
}
