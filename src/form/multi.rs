//! Multi-entity form: several models behind one shared key, validated and saved as one unit.

use super::{bind_model, BoundForm};
use crate::config::ModelDescriptor;
use crate::error::{AppError, ConfigError};
use crate::store::{pk_string, Record, Store};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct FormRole {
    pub name: String,
    pub model: Arc<ModelDescriptor>,
    /// Field holding the shared key. For the primary role this is its primary key.
    pub key_field: String,
    pub fields: Vec<String>,
}

impl FormRole {
    /// Role keyed by the model's primary key, editing every editable field.
    pub fn new(name: impl Into<String>, model: Arc<ModelDescriptor>) -> Self {
        FormRole {
            name: name.into(),
            key_field: model.pk.clone(),
            fields: model.editable_fields(),
            model,
        }
    }

    pub fn key_field(mut self, field: impl Into<String>) -> Self {
        self.key_field = field.into();
        self
    }

    pub fn fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }
}

/// One entry of the merged field map.
#[derive(Clone, Debug, PartialEq)]
pub struct MultiField {
    pub external: String,
    pub role: String,
    pub field: String,
}

#[derive(Debug)]
pub struct MultiEntityForm {
    roles: Vec<FormRole>,
    primary: usize,
}

/// Result of binding submitted data to every role.
#[derive(Clone, Debug, Default)]
pub struct MultiValidation {
    pub roles: BTreeMap<String, BoundForm>,
}

impl MultiValidation {
    /// Valid only when every role is valid.
    pub fn is_valid(&self) -> bool {
        self.roles.values().all(BoundForm::is_valid)
    }

    /// Errors keyed by external field name.
    pub fn errors(&self, form: &MultiEntityForm) -> BTreeMap<String, Vec<String>> {
        let mut out = BTreeMap::new();
        for f in form.field_map() {
            if let Some(errs) = self.roles.get(&f.role).and_then(|b| b.errors.get(&f.field)) {
                out.insert(f.external.clone(), errs.clone());
            }
        }
        out
    }
}

/// What a successful save returns: the primary role's model and key plus every saved record.
#[derive(Clone, Debug)]
pub struct CompositeEntity {
    pub model: Arc<ModelDescriptor>,
    pub pk: Value,
    pub records: BTreeMap<String, Record>,
}

impl CompositeEntity {
    pub fn pk_string(&self) -> String {
        pk_string(&self.pk)
    }
}

impl MultiEntityForm {
    pub fn new(primary: &str, roles: Vec<FormRole>) -> Result<Self, ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for role in &roles {
            if !seen.insert(role.name.clone()) {
                return Err(ConfigError::Validation(format!("duplicate form role '{}'", role.name)));
            }
            for f in role.fields.iter().chain(std::iter::once(&role.key_field)) {
                if role.model.get_field(f).is_none() {
                    return Err(ConfigError::UnknownField {
                        model: role.model.key(),
                        field: f.clone(),
                    });
                }
            }
        }
        let primary = roles
            .iter()
            .position(|r| r.name == primary)
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "form role",
                id: primary.to_string(),
            })?;
        if roles[primary].key_field != roles[primary].model.pk {
            return Err(ConfigError::Validation(format!(
                "primary role '{}' must be keyed by its primary key",
                roles[primary].name
            )));
        }
        Ok(MultiEntityForm { roles, primary })
    }

    pub fn roles(&self) -> &[FormRole] {
        &self.roles
    }

    pub fn primary(&self) -> &FormRole {
        &self.roles[self.primary]
    }

    fn secondaries(&self) -> impl Iterator<Item = &FormRole> {
        self.roles
            .iter()
            .enumerate()
            .filter(move |(i, _)| *i != self.primary)
            .map(|(_, r)| r)
    }

    /// Ordered external name -> (role, field). A field name shared by several roles is
    /// qualified as `<role>-<field>`.
    pub fn field_map(&self) -> Vec<MultiField> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for role in &self.roles {
            for f in &role.fields {
                *counts.entry(f.as_str()).or_default() += 1;
            }
        }
        let mut out = Vec::new();
        for role in &self.roles {
            for f in &role.fields {
                let external = if counts.get(f.as_str()).copied().unwrap_or(0) > 1 {
                    format!("{}-{}", role.name, f)
                } else {
                    f.clone()
                };
                out.push(MultiField {
                    external,
                    role: role.name.clone(),
                    field: f.clone(),
                });
            }
        }
        out
    }

    /// Render-context field list over external names.
    pub fn fields_context(&self) -> Value {
        let fields = self
            .field_map()
            .into_iter()
            .map(|f| {
                let info = self
                    .roles
                    .iter()
                    .find(|r| r.name == f.role)
                    .and_then(|r| r.model.get_field(&f.field));
                json!({
                    "name": f.external,
                    "role": f.role,
                    "field": f.field,
                    "verbose_name": info.map(|i| i.verbose_name.clone()).unwrap_or_else(|| f.field.clone()),
                    "kind": info.map(|i| i.kind.as_str()).unwrap_or("text"),
                })
            })
            .collect();
        Value::Array(fields)
    }

    /// Flatten loaded records into one record keyed by external names.
    pub fn initial(&self, records: &BTreeMap<String, Record>) -> Record {
        let mut out = Record::new();
        for f in self.field_map() {
            if let Some(v) = records.get(&f.role).and_then(|r| r.get(&f.field)) {
                out.insert(f.external, v.clone());
            }
        }
        out
    }

    /// Fetch every role's record by the shared key. Any missing role is a 404.
    pub async fn load(&self, store: &dyn Store, key: &Value) -> Result<BTreeMap<String, Record>, AppError> {
        let mut out = BTreeMap::new();
        for role in &self.roles {
            let record = if role.key_field == role.model.pk {
                store.get(&role.model, key).await?
            } else {
                store.find_one(&role.model, &role.key_field, key).await?
            };
            let record = record.ok_or_else(|| {
                AppError::NotFound(format!("{} for {} {}", role.name, role.model.key(), pk_string(key)))
            })?;
            out.insert(role.name.clone(), record);
        }
        Ok(out)
    }

    /// Split submitted data by role and validate each part.
    pub fn bind(&self, data: &Record) -> MultiValidation {
        let map = self.field_map();
        let mut roles = BTreeMap::new();
        for role in &self.roles {
            let mut part = Record::new();
            for f in map.iter().filter(|f| f.role == role.name) {
                if let Some(v) = data.get(&f.external) {
                    part.insert(f.field.clone(), v.clone());
                }
            }
            roles.insert(role.name.clone(), bind_model(&role.model, &role.fields, &part));
        }
        MultiValidation { roles }
    }

    /// Persist every role in one transaction. Primary first; on create each secondary is
    /// linked to the new primary key through its key field.
    pub async fn save(
        &self,
        store: &dyn Store,
        bound: &MultiValidation,
        existing: Option<&BTreeMap<String, Record>>,
    ) -> Result<CompositeEntity, AppError> {
        if !bound.is_valid() {
            return Err(AppError::Validation("multi-entity form has invalid roles".into()));
        }
        let values = |role: &FormRole| {
            bound
                .roles
                .get(&role.name)
                .map(|b| b.cleaned.clone())
                .unwrap_or_default()
        };
        let mut tx = store.begin().await?;
        let mut records = BTreeMap::new();

        let primary = self.primary();
        let saved = match existing.and_then(|e| e.get(&primary.name)) {
            Some(current) => {
                let pk = current.get(&primary.model.pk).cloned().unwrap_or(Value::Null);
                match tx.update(&primary.model, &pk, &values(primary)).await {
                    Ok(Some(r)) => r,
                    Ok(None) => {
                        tx.rollback().await?;
                        return Err(AppError::NotFound(format!("{} {}", primary.model.key(), pk_string(&pk))));
                    }
                    Err(e) => {
                        tx.rollback().await?;
                        return Err(e);
                    }
                }
            }
            None => match tx.insert(&primary.model, &values(primary)).await {
                Ok(r) => r,
                Err(e) => {
                    tx.rollback().await?;
                    return Err(e);
                }
            },
        };
        let key = saved.get(&primary.model.pk).cloned().unwrap_or(Value::Null);
        records.insert(primary.name.clone(), saved);

        for role in self.secondaries() {
            let mut vals = values(role);
            let result = match existing.and_then(|e| e.get(&role.name)) {
                Some(current) => {
                    let pk = current.get(&role.model.pk).cloned().unwrap_or(Value::Null);
                    tx.update(&role.model, &pk, &vals).await.and_then(|r| {
                        r.ok_or_else(|| AppError::NotFound(format!("{} {}", role.model.key(), pk_string(&pk))))
                    })
                }
                None => {
                    vals.insert(role.key_field.clone(), key.clone());
                    tx.insert(&role.model, &vals).await
                }
            };
            match result {
                Ok(r) => {
                    records.insert(role.name.clone(), r);
                }
                Err(e) => {
                    tracing::debug!(role = %role.name, error = %e, "multi-entity save rolled back");
                    tx.rollback().await?;
                    return Err(e);
                }
            }
        }
        tx.commit().await?;
        Ok(CompositeEntity {
            model: primary.model.clone(),
            pk: key,
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldInfo, FieldKind};
    use crate::store::MemoryStore;

    fn models() -> (Arc<ModelDescriptor>, Arc<ModelDescriptor>) {
        let user = ModelDescriptor::new("accounts", "User")
            .field(FieldInfo::new("name", FieldKind::Text).required())
            .field(FieldInfo::new("email", FieldKind::Text));
        let profile = ModelDescriptor::new("accounts", "Profile")
            .field(FieldInfo::new("user", FieldKind::ForeignKey("accounts.user".into())).required())
            .field(FieldInfo::new("name", FieldKind::Text))
            .field(FieldInfo::new("bio", FieldKind::Text));
        (Arc::new(user), Arc::new(profile))
    }

    fn form() -> MultiEntityForm {
        let (user, profile) = models();
        MultiEntityForm::new(
            "user",
            vec![
                FormRole::new("user", user),
                FormRole::new("profile", profile)
                    .key_field("user")
                    .fields(vec!["name".into(), "bio".into()]),
            ],
        )
        .unwrap()
    }

    fn data(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn shared_names_are_qualified() {
        let names: Vec<String> = form().field_map().into_iter().map(|f| f.external).collect();
        assert_eq!(names, vec!["user-name", "email", "profile-name", "bio"]);
    }

    #[test]
    fn unknown_primary_is_rejected() {
        let (user, _) = models();
        assert!(MultiEntityForm::new("owner", vec![FormRole::new("user", user)]).is_err());
    }

    #[tokio::test]
    async fn create_links_secondary_to_primary() {
        let store = MemoryStore::new();
        let form = form();
        let bound = form.bind(&data(json!({ "user-name": "Ann", "email": "a@x.io", "bio": "hi" })));
        assert!(bound.is_valid());
        let saved = form.save(&store, &bound, None).await.unwrap();
        let loaded = form.load(&store, &saved.pk).await.unwrap();
        assert_eq!(loaded["profile"]["user"], saved.pk);
        assert_eq!(loaded["profile"]["bio"], json!("hi"));
        assert_eq!(form.initial(&loaded)["user-name"], json!("Ann"));
    }

    #[tokio::test]
    async fn missing_role_fails_load() {
        let store = MemoryStore::new();
        let form = form();
        let user = store
            .insert(&form.roles()[0].model, &data(json!({ "name": "Solo" })))
            .await
            .unwrap();
        let err = form.load(&store, &user["id"]).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn invalid_role_writes_nothing() {
        let store = MemoryStore::new();
        let form = form();
        let bound = form.bind(&data(json!({ "user-name": "", "bio": "x" })));
        assert!(!bound.is_valid());
        assert!(bound.errors(&form).contains_key("user-name"));
        assert!(form.save(&store, &bound, None).await.is_err());
        assert!(store.is_empty(&form.roles()[0].model));
        assert!(store.is_empty(&form.roles()[1].model));
    }
}
