//! Permission rules per operation and the resolver that evaluates them for a request.

use crate::auth::{AuthBackend, ObjectPermission, Principal, ProvisionOutcome};
use crate::config::{ModelDescriptor, Operation, ViewConfig};
use crate::store::Record;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;

pub type PermissionCheck = Arc<dyn Fn(&Principal, Operation) -> bool + Send + Sync>;

/// A static permission identifier or a callable deciding for `(principal, operation)`.
#[derive(Clone)]
pub enum PermissionRule {
    Static(String),
    Callable(PermissionCheck),
}

impl PermissionRule {
    pub fn perm(identifier: impl Into<String>) -> Self {
        PermissionRule::Static(identifier.into())
    }

    pub fn callable<F>(f: F) -> Self
    where
        F: Fn(&Principal, Operation) -> bool + Send + Sync + 'static,
    {
        PermissionRule::Callable(Arc::new(f))
    }
}

impl fmt::Debug for PermissionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionRule::Static(s) => f.debug_tuple("Static").field(s).finish(),
            PermissionRule::Callable(_) => f.write_str("Callable(..)"),
        }
    }
}

/// Rules keyed by operation. Always holds all five operation keys.
#[derive(Clone, Debug)]
pub struct PermissionMap {
    rules: BTreeMap<Operation, Vec<PermissionRule>>,
}

impl Default for PermissionMap {
    fn default() -> Self {
        PermissionMap {
            rules: Operation::ALL.iter().map(|op| (*op, Vec::new())).collect(),
        }
    }
}

impl PermissionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: Operation, rule: PermissionRule) {
        self.rules.entry(op).or_default().push(rule);
    }

    pub fn rules(&self, op: Operation) -> &[PermissionRule] {
        self.rules.get(&op).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.rules.keys()
    }

    /// Append `<app>.<verb>_<model>` to every operation unless already listed.
    pub fn with_model_defaults(mut self, model: &ModelDescriptor) -> Self {
        for op in Operation::ALL {
            let default = default_permission(model, op);
            let rules = self.rules.entry(op).or_default();
            let present = rules
                .iter()
                .any(|r| matches!(r, PermissionRule::Static(s) if *s == default));
            if !present {
                rules.push(PermissionRule::Static(default));
            }
        }
        self
    }
}

/// `<app_label>.<add|change|delete|view>_<model>`
pub fn default_permission(model: &ModelDescriptor, op: Operation) -> String {
    format!("{}.{}_{}", model.app_label, op.default_perm_verb(), model.model_name())
}

/// Evaluates a view's permission map. One resolver is shared by all handlers of a view.
pub struct PermissionResolver {
    view: Arc<ViewConfig>,
    provisioned: OnceCell<ProvisionOutcome>,
}

impl PermissionResolver {
    pub fn new(view: Arc<ViewConfig>) -> Self {
        PermissionResolver {
            view,
            provisioned: OnceCell::new(),
        }
    }

    /// AND of every rule for `op`; an empty rule list passes.
    pub async fn resolve(
        &self,
        auth: &dyn AuthBackend,
        principal: &Principal,
        op: Operation,
        target: Option<&Record>,
    ) -> bool {
        if self.view.check_perms {
            self.ensure_provisioned(auth).await;
        }
        for rule in self.view.perms.rules(op) {
            if !self.check_rule(auth, principal, op, rule, target).await {
                tracing::debug!(operation = %op, rule = ?rule, principal = ?principal.id, "permission denied");
                return false;
            }
        }
        true
    }

    /// `crud_perms` for the render context.
    pub async fn available(
        &self,
        auth: &dyn AuthBackend,
        principal: &Principal,
        target: Option<&Record>,
    ) -> BTreeMap<&'static str, bool> {
        let mut out = BTreeMap::new();
        for op in Operation::ALL {
            let allowed = if !self.view.check_perms {
                true
            } else if self.view.is_available(op) {
                self.resolve(auth, principal, op, target).await
            } else {
                false
            };
            out.insert(op.as_str(), allowed);
        }
        out
    }

    async fn check_rule(
        &self,
        auth: &dyn AuthBackend,
        principal: &Principal,
        op: Operation,
        rule: &PermissionRule,
        target: Option<&Record>,
    ) -> bool {
        match rule {
            PermissionRule::Callable(f) => f(principal, op),
            PermissionRule::Static(perm) => {
                if let (Operation::Update, Some(record)) = (op, target) {
                    match auth.has_object_perm(principal, perm, &self.view.model, record).await {
                        ObjectPermission::Granted => return true,
                        ObjectPermission::Denied | ObjectPermission::Unsupported => {}
                        ObjectPermission::Errored(reason) => {
                            tracing::warn!(perm = %perm, reason = %reason, "object permission check failed, using model permission");
                        }
                    }
                }
                principal.has_perm(perm)
            }
        }
    }

    async fn ensure_provisioned(&self, auth: &dyn AuthBackend) {
        let model = &self.view.model;
        self.provisioned
            .get_or_init(|| async {
                match auth.ensure_view_permission(model).await {
                    Ok(outcome) => {
                        tracing::debug!(model = %model.key(), outcome = ?outcome, "view permission provisioned");
                        outcome
                    }
                    Err(e) => {
                        tracing::warn!(model = %model.key(), error = %e, "skipping view permission provisioning");
                        ProvisionOutcome::Skipped(e.to_string())
                    }
                }
            })
            .await;
    }

    pub fn provision_outcome(&self) -> Option<&ProvisionOutcome> {
        self.provisioned.get()
    }
}
