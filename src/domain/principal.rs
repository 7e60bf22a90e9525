use super::tenant::TenantId;
use crate::error::{BillingError, Result};

/// The already-authenticated caller of a core operation.
///
/// Session handling lives outside the core; every entry point that cares
/// about who is acting receives one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Tenant(TenantId),
    Admin,
    /// The core acting on its own behalf, e.g. auto-pausing on exhaustion.
    System,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        matches!(self, Principal::Admin)
    }

    /// Fails unless the principal may act on resources owned by `owner`.
    pub fn authorize_for(&self, owner: &TenantId) -> Result<()> {
        match self {
            Principal::Admin | Principal::System => Ok(()),
            Principal::Tenant(id) if id == owner => Ok(()),
            Principal::Tenant(id) => Err(BillingError::Forbidden(format!(
                "tenant {id} cannot act on resources of tenant {owner}"
            ))),
        }
    }

    pub fn require_admin(&self, operation: &str) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(BillingError::Forbidden(format!("{operation} is admin-only")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_scoping() {
        let owner = TenantId::new("acme");
        assert!(Principal::Tenant(owner.clone()).authorize_for(&owner).is_ok());
        assert!(matches!(
            Principal::Tenant(TenantId::new("other")).authorize_for(&owner),
            Err(BillingError::Forbidden(_))
        ));
        assert!(Principal::Admin.authorize_for(&owner).is_ok());
        assert!(Principal::System.authorize_for(&owner).is_ok());
    }

    #[test]
    fn test_require_admin() {
        assert!(Principal::Admin.require_admin("suspend").is_ok());
        assert!(Principal::System.require_admin("suspend").is_err());
        assert!(
            Principal::Tenant(TenantId::new("acme"))
                .require_admin("suspend")
                .is_err()
        );
    }
}
