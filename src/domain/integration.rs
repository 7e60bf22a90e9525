use super::tenant::TenantId;
use crate::error::{BillingError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntegrationId(String);

impl IntegrationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IntegrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IntegrationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Lifecycle of a marketplace integration.
///
/// `Deleted` is terminal: no action is accepted once reached.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationState {
    Draft,
    Testing,
    Active,
    Paused,
    Suspended,
    Deleted,
}

impl fmt::Display for IntegrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IntegrationState::Draft => "draft",
            IntegrationState::Testing => "testing",
            IntegrationState::Active => "active",
            IntegrationState::Paused => "paused",
            IntegrationState::Suspended => "suspended",
            IntegrationState::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum LifecycleAction {
    BeginTest,
    Activate,
    Pause,
    Resume,
    Suspend,
    Reinstate,
    Delete,
    RotateToken,
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleAction::BeginTest => "begin testing",
            LifecycleAction::Activate => "activate",
            LifecycleAction::Pause => "pause",
            LifecycleAction::Resume => "resume",
            LifecycleAction::Suspend => "suspend",
            LifecycleAction::Reinstate => "reinstate",
            LifecycleAction::Delete => "delete",
            LifecycleAction::RotateToken => "rotate the token of",
        };
        f.write_str(name)
    }
}

/// Webhook credential of an integration. Only the token digest is kept.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Credential {
    pub token_sha256: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn issue(token: &str, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            token_sha256: digest_token(token),
            expires_at,
        }
    }

    pub fn matches(&self, token: &str) -> bool {
        digest_token(token) == self.token_sha256
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }
}

fn digest_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Result of a connectivity check performed by the marketplace connector.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ConnectionTest {
    pub passed: bool,
    pub detail: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl ConnectionTest {
    pub fn passed(checked_at: DateTime<Utc>) -> Self {
        Self {
            passed: true,
            detail: None,
            checked_at,
        }
    }

    pub fn failed(detail: impl Into<String>, checked_at: DateTime<Utc>) -> Self {
        Self {
            passed: false,
            detail: Some(detail.into()),
            checked_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Integration {
    pub id: IntegrationId,
    pub tenant: TenantId,
    pub marketplace: String,
    pub credential: Credential,
    pub state: IntegrationState,
    pub last_test: Option<ConnectionTest>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Integration {
    pub fn new(
        id: IntegrationId,
        tenant: TenantId,
        marketplace: impl Into<String>,
        credential: Credential,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant,
            marketplace: marketplace.into(),
            credential,
            state: IntegrationState::Draft,
            last_test: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn reject(&self, action: LifecycleAction, reason: impl Into<String>) -> BillingError {
        BillingError::InvalidTransition {
            from: self.state,
            action,
            reason: reason.into(),
        }
    }

    fn ensure_not_deleted(&self, action: LifecycleAction) -> Result<()> {
        if self.state == IntegrationState::Deleted {
            return Err(self.reject(action, "integration is deleted"));
        }
        Ok(())
    }

    fn enter(&mut self, state: IntegrationState, now: DateTime<Utc>) {
        self.state = state;
        self.updated_at = now;
    }

    /// Draft -> Testing while the connector checks the credentials.
    pub fn begin_test(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.state != IntegrationState::Draft {
            return Err(self.reject(LifecycleAction::BeginTest, "only drafts can be tested"));
        }
        self.enter(IntegrationState::Testing, now);
        Ok(())
    }

    /// Draft | Testing -> Active, only with a passed connectivity test.
    pub fn activate(&mut self, test: ConnectionTest, now: DateTime<Utc>) -> Result<()> {
        if !matches!(
            self.state,
            IntegrationState::Draft | IntegrationState::Testing
        ) {
            return Err(self.reject(
                LifecycleAction::Activate,
                "only draft or testing integrations can be activated",
            ));
        }
        if !test.passed {
            let detail = test.detail.as_deref().unwrap_or("no detail");
            return Err(self.reject(
                LifecycleAction::Activate,
                format!("connectivity test failed: {detail}"),
            ));
        }
        self.last_test = Some(test);
        self.enter(IntegrationState::Active, now);
        Ok(())
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.state != IntegrationState::Active {
            return Err(self.reject(LifecycleAction::Pause, "only active integrations can be paused"));
        }
        self.enter(IntegrationState::Paused, now);
        Ok(())
    }

    pub fn resume(&mut self, wallet_paused: bool, now: DateTime<Utc>) -> Result<()> {
        if self.state != IntegrationState::Paused {
            return Err(self.reject(LifecycleAction::Resume, "only paused integrations can be resumed"));
        }
        if wallet_paused {
            return Err(self.reject(
                LifecycleAction::Resume,
                "wallet is paused until it is recharged",
            ));
        }
        if self.credential.is_expired(now) {
            return Err(self.reject(LifecycleAction::Resume, "credential expired"));
        }
        self.enter(IntegrationState::Active, now);
        Ok(())
    }

    pub fn suspend(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.ensure_not_deleted(LifecycleAction::Suspend)?;
        if self.state == IntegrationState::Suspended {
            return Err(self.reject(LifecycleAction::Suspend, "already suspended"));
        }
        self.enter(IntegrationState::Suspended, now);
        Ok(())
    }

    /// Suspended -> Paused once an admin has reviewed the integration.
    pub fn reinstate(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.state != IntegrationState::Suspended {
            return Err(self.reject(
                LifecycleAction::Reinstate,
                "only suspended integrations can be reinstated",
            ));
        }
        self.enter(IntegrationState::Paused, now);
        Ok(())
    }

    pub fn delete(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.ensure_not_deleted(LifecycleAction::Delete)?;
        self.enter(IntegrationState::Deleted, now);
        Ok(())
    }

    pub fn rotate_token(&mut self, credential: Credential, now: DateTime<Utc>) -> Result<()> {
        self.ensure_not_deleted(LifecycleAction::RotateToken)?;
        self.credential = credential;
        self.updated_at = now;
        Ok(())
    }
}
