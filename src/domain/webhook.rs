use super::integration::IntegrationId;
use super::tenant::TenantId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Endpoint family an event arrived on.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Inventory,
    Order,
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventCategory::Inventory => f.write_str("inventory"),
            EventCategory::Order => f.write_str("order"),
        }
    }
}

impl FromStr for EventCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inventory" => Ok(EventCategory::Inventory),
            "order" => Ok(EventCategory::Order),
            other => Err(format!("unknown event category '{other}'")),
        }
    }
}

/// Deterministic identity of a webhook delivery, used to spot redeliveries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Derives the key for a delivery.
    ///
    /// Preference order: the caller-supplied source event id, then a top-level
    /// `id` or `event_id` string in a JSON payload, then a SHA-256 of the raw
    /// payload bytes.
    pub fn derive(
        integration: &IntegrationId,
        category: EventCategory,
        source_event_id: Option<&str>,
        payload: &[u8],
    ) -> Self {
        let source = source_event_id
            .filter(|id| !id.trim().is_empty())
            .map(|id| format!("id:{}", id.trim()))
            .or_else(|| embedded_event_id(payload).map(|id| format!("id:{id}")))
            .unwrap_or_else(|| format!("sha256:{}", hex::encode(Sha256::digest(payload))));
        Self(format!("{integration}:{category}:{source}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn embedded_event_id(payload: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
    ["id", "event_id"]
        .iter()
        .find_map(|field| value.get(field)?.as_str().map(str::to_string))
        .filter(|id| !id.is_empty())
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub enum EventOutcome {
    Accepted,
    RejectedInsufficientBalance,
    RejectedUnauthorized,
}

/// Progress of handing an accepted event to the downstream processor.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum HandoffStatus {
    /// Rejected events are never handed off.
    Skipped,
    Pending,
    Delivered,
    Failed,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub key: IdempotencyKey,
    pub integration: IntegrationId,
    pub tenant: TenantId,
    pub category: EventCategory,
    pub outcome: EventOutcome,
    pub handoff: HandoffStatus,
    /// Ledger entry that paid for this event, when accepted.
    pub transaction: Option<Uuid>,
    pub received_at: DateTime<Utc>,
}

/// An inbound webhook as received by an ingestion endpoint.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    pub integration: IntegrationId,
    pub category: EventCategory,
    pub token: String,
    pub source_event_id: Option<String>,
    pub payload: Vec<u8>,
}
