use crate::error::{BillingError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Tenant,
    Integration,
    Activate,
    Pause,
    Resume,
    Suspend,
    Delete,
    Event,
    Recharge,
    Tampered,
    Adjust,
}

/// One operation of a billing feed. Which columns matter depends on `kind`.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct FeedRecord {
    #[serde(rename = "type")]
    pub kind: FeedKind,
    pub tenant: String,
    pub integration: Option<String>,
    /// Marketplace for `integration`, source event id for `event`, note for `adjust`.
    pub reference: Option<String>,
    /// Money for `recharge`/`tampered`/`adjust`, free quota for `tenant`.
    pub amount: Option<Decimal>,
    pub token: Option<String>,
}

impl FeedRecord {
    pub fn require_integration(&self) -> Result<&str> {
        self.integration
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                BillingError::ValidationError(format!("{:?} row needs an integration", self.kind))
            })
    }

    pub fn require_amount(&self) -> Result<Decimal> {
        self.amount.ok_or_else(|| {
            BillingError::ValidationError(format!("{:?} row needs an amount", self.kind))
        })
    }
}

/// Reads feed records from a CSV source, trimming whitespace and tolerating
/// short rows.
pub struct FeedReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> FeedReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes records so large feeds stream.
    pub fn records(self) -> impl Iterator<Item = Result<FeedRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(BillingError::from))
    }
}
