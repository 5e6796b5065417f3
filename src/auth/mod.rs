//! Authentication/authorization provider seam: principals, model and object permissions,
//! and provisioning of the synthetic `view_<model>` permission.

mod memory;
mod pg;

pub use memory::MemoryAuthBackend;
pub use pg::{auth_schema, ensure_auth_tables, ensure_database_exists, qualified_auth_table, PgAuthBackend};

use crate::config::ModelDescriptor;
use crate::error::AppError;
use crate::store::Record;
use async_trait::async_trait;
use std::collections::HashSet;

/// The actor making a request.
#[derive(Clone, Debug, Default)]
pub struct Principal {
    /// `None` for anonymous requests.
    pub id: Option<String>,
    pub is_active: bool,
    pub is_superuser: bool,
    /// Permission identifiers held, as `<app_label>.<codename>`.
    pub permissions: HashSet<String>,
}

impl Principal {
    pub fn anonymous() -> Self {
        Principal::default()
    }

    pub fn user(id: impl Into<String>) -> Self {
        Principal {
            id: Some(id.into()),
            is_active: true,
            ..Principal::default()
        }
    }

    pub fn superuser(id: impl Into<String>) -> Self {
        Principal {
            is_superuser: true,
            ..Principal::user(id)
        }
    }

    pub fn with_perm(mut self, perm: impl Into<String>) -> Self {
        self.permissions.insert(perm.into());
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.id.is_some()
    }

    /// Model-level permission check. Inactive principals hold nothing; superusers hold everything.
    pub fn has_perm(&self, perm: &str) -> bool {
        if !self.is_active {
            return false;
        }
        self.is_superuser || self.permissions.contains(perm)
    }
}

/// Answer of an object-level permission check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObjectPermission {
    Granted,
    Denied,
    /// The backend has no object-level permissions.
    Unsupported,
    /// The backend supports object checks but this one failed.
    Errored(String),
}

/// Result of ensuring the synthetic `view_<model>` permission exists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created,
    Existing,
    /// Metadata lookup or insert failed; provisioning was skipped.
    Skipped(String),
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Build the principal for a request. Unknown ids resolve to an anonymous principal.
    async fn load_principal(&self, user_id: Option<&str>) -> Result<Principal, AppError>;

    /// Object-level check; backends without object permissions keep the default.
    async fn has_object_perm(
        &self,
        _principal: &Principal,
        _perm: &str,
        _model: &ModelDescriptor,
        _record: &Record,
    ) -> ObjectPermission {
        ObjectPermission::Unsupported
    }

    /// Ensure the content-type descriptor and `view_<model>` permission exist. Must be idempotent.
    async fn ensure_view_permission(&self, model: &ModelDescriptor) -> Result<ProvisionOutcome, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn principal_perms() {
        let p = Principal::user("u1").with_perm("billing.add_invoice");
        assert!(p.is_authenticated());
        assert!(p.has_perm("billing.add_invoice"));
        assert!(!p.has_perm("billing.delete_invoice"));
        assert!(Principal::superuser("root").has_perm("anything.at_all"));
        assert!(!Principal::anonymous().has_perm("billing.add_invoice"));
    }

    #[test]
    fn inactive_principal_holds_nothing() {
        let mut p = Principal::superuser("root");
        p.is_active = false;
        assert!(!p.has_perm("billing.add_invoice"));
    }
}
