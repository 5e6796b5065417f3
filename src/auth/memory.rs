//! In-process auth backend for tests and embedded use.

use crate::auth::{AuthBackend, ObjectPermission, Principal, ProvisionOutcome};
use crate::config::ModelDescriptor;
use crate::error::AppError;
use crate::store::{pk_string, Record};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

#[derive(Default)]
pub struct MemoryAuthBackend {
    users: RwLock<HashMap<String, Principal>>,
    /// (user id, permission, model key, pk)
    object_grants: RwLock<HashSet<(String, String, String, String)>>,
    object_checks: bool,
    content_types: RwLock<BTreeSet<(String, String)>>,
    /// (app_label, codename)
    permissions: RwLock<BTreeSet<(String, String)>>,
    fail_provisioning: bool,
}

impl MemoryAuthBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable object-level permission checks (disabled backends answer `Unsupported`).
    pub fn with_object_permissions(mut self) -> Self {
        self.object_checks = true;
        self
    }

    /// Make provisioning fail, as when the metadata tables are unavailable.
    pub fn with_failing_provisioning(mut self) -> Self {
        self.fail_provisioning = true;
        self
    }

    pub fn add_user(&self, principal: Principal) {
        if let Some(id) = principal.id.clone() {
            if let Ok(mut users) = self.users.write() {
                users.insert(id, principal);
            }
        }
    }

    pub fn grant_object(&self, user_id: &str, perm: &str, model: &ModelDescriptor, pk: &str) {
        if let Ok(mut grants) = self.object_grants.write() {
            grants.insert((user_id.to_string(), perm.to_string(), model.key(), pk.to_string()));
        }
    }

    /// Permission identifiers provisioned so far, as `<app_label>.<codename>`.
    pub fn provisioned_permissions(&self) -> Vec<String> {
        self.permissions
            .read()
            .map(|p| p.iter().map(|(app, code)| format!("{}.{}", app, code)).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuthBackend for MemoryAuthBackend {
    async fn load_principal(&self, user_id: Option<&str>) -> Result<Principal, AppError> {
        let Some(id) = user_id else {
            return Ok(Principal::anonymous());
        };
        let users = self
            .users
            .read()
            .map_err(|_| AppError::Internal("auth backend poisoned".into()))?;
        Ok(users.get(id).cloned().unwrap_or_else(Principal::anonymous))
    }

    async fn has_object_perm(
        &self,
        principal: &Principal,
        perm: &str,
        model: &ModelDescriptor,
        record: &Record,
    ) -> ObjectPermission {
        if !self.object_checks {
            return ObjectPermission::Unsupported;
        }
        let (Some(user), Some(pk)) = (principal.id.as_ref(), record.get(&model.pk)) else {
            return ObjectPermission::Errored("record has no primary key".into());
        };
        let key = (user.clone(), perm.to_string(), model.key(), pk_string(pk));
        match self.object_grants.read() {
            Ok(grants) if grants.contains(&key) => ObjectPermission::Granted,
            Ok(_) => ObjectPermission::Denied,
            Err(_) => ObjectPermission::Errored("object grants poisoned".into()),
        }
    }

    async fn ensure_view_permission(&self, model: &ModelDescriptor) -> Result<ProvisionOutcome, AppError> {
        if self.fail_provisioning {
            return Err(AppError::NotFound(format!("content type {}", model.key())));
        }
        if let Ok(mut cts) = self.content_types.write() {
            cts.insert((model.app_label.clone(), model.model_name()));
        }
        let mut perms = self
            .permissions
            .write()
            .map_err(|_| AppError::Internal("auth backend poisoned".into()))?;
        let inserted = perms.insert((model.app_label.clone(), format!("view_{}", model.model_name())));
        Ok(if inserted {
            ProvisionOutcome::Created
        } else {
            ProvisionOutcome::Existing
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn provisioning_is_idempotent() {
        let auth = MemoryAuthBackend::new();
        let model = ModelDescriptor::new("billing", "Invoice");
        assert_eq!(auth.ensure_view_permission(&model).await.unwrap(), ProvisionOutcome::Created);
        assert_eq!(auth.ensure_view_permission(&model).await.unwrap(), ProvisionOutcome::Existing);
        assert_eq!(auth.provisioned_permissions(), vec!["billing.view_invoice".to_string()]);
    }

    #[tokio::test]
    async fn unknown_user_is_anonymous() {
        let auth = MemoryAuthBackend::new();
        auth.add_user(Principal::user("alice"));
        assert!(auth.load_principal(Some("alice")).await.unwrap().is_authenticated());
        assert!(!auth.load_principal(Some("bob")).await.unwrap().is_authenticated());
        assert!(!auth.load_principal(None).await.unwrap().is_authenticated());
    }
}
