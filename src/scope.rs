//! Related-field scoping and the query parameters carried across generated links.

use crate::config::{ModelDescriptor, ViewConfig};
use crate::error::AppError;
use crate::introspect;
use crate::query::Predicate;
use crate::store::{pk_string, Record, Store};
use serde_json::Value;
use std::sync::Arc;
use url::form_urlencoded;

#[derive(Clone, Debug)]
pub struct ScopeEntry {
    pub field: String,
    pub model: Arc<ModelDescriptor>,
    pub pk: Value,
    pub record: Record,
}

/// Parent records named by `<field>=<pk>` query parameters.
#[derive(Clone, Debug, Default)]
pub struct Scope {
    entries: Vec<ScopeEntry>,
}

impl Scope {
    /// Look up every related field present in `params`. A pk that does not name a record is a 404.
    pub async fn resolve(view: &ViewConfig, store: &dyn Store, params: &[(String, String)]) -> Result<Scope, AppError> {
        let mut entries = Vec::new();
        for (field, target) in &view.related_fields {
            let Some((_, raw)) = params.iter().find(|(k, v)| k == field && !v.is_empty()) else {
                continue;
            };
            let pk = introspect::parse_pk(target, raw)?;
            let record = store
                .get(target, &pk)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("{} {}", target.key(), raw)))?;
            tracing::debug!(field = %field, target = %target.key(), pk = %raw, "related scope resolved");
            entries.push(ScopeEntry {
                field: field.clone(),
                model: target.clone(),
                pk,
                record,
            });
        }
        Ok(Scope { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ScopeEntry] {
        &self.entries
    }

    pub fn fields(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.field.clone()).collect()
    }

    /// AND of `field = pk` for every entry.
    pub fn predicate(&self) -> Predicate {
        self.entries
            .iter()
            .fold(Predicate::All, |acc, e| acc.and(Predicate::eq(e.field.clone(), e.pk.clone())))
    }

    /// Write scope values onto a record about to be persisted.
    pub fn stamp(&self, record: &mut Record) {
        for e in &self.entries {
            record.insert(e.field.clone(), e.pk.clone());
        }
    }

    /// Whether `record` lies inside the scope.
    pub fn contains(&self, record: &Record) -> bool {
        self.predicate().matches(record)
    }

    /// Encoded `field=pk` pairs.
    pub fn params(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| {
                form_urlencoded::Serializer::new(String::new())
                    .append_pair(&e.field, &pk_string(&e.pk))
                    .finish()
            })
            .collect()
    }

    /// `{field: related record}` for the render context.
    pub fn context(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|e| (e.field.clone(), Value::Object(e.record.clone())))
                .collect(),
        )
    }
}

/// Accumulated `k=v` pairs echoed into links and redirects.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GetParams {
    pairs: Vec<String>,
}

impl GetParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, pairs: impl IntoIterator<Item = String>) {
        for p in pairs {
            if !self.pairs.contains(&p) {
                self.pairs.push(p);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// `a=1&b=2`
    pub fn query(&self) -> String {
        self.pairs.join("&")
    }

    /// Append to a URL: unchanged when empty, else `url?a=1`.
    pub fn append_to(&self, url: &str) -> String {
        if self.is_empty() {
            url.to_string()
        } else if url.contains('?') {
            format!("{}&{}", url, self.query())
        } else {
            format!("{}?{}", url, self.query())
        }
    }

    /// Template prefix for further parameters: `?` or `?a=1&`.
    pub fn template_prefix(&self) -> String {
        if self.is_empty() {
            "?".to_string()
        } else {
            format!("?{}&", self.query())
        }
    }
}

/// Decode a raw query string into ordered pairs, keeping repeats.
pub fn parse_query(raw: Option<&str>) -> Vec<(String, String)> {
    raw.map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldInfo, FieldKind, ViewConfigBuilder};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn models() -> (Arc<ModelDescriptor>, Arc<ModelDescriptor>) {
        let customer = Arc::new(ModelDescriptor::new("crm", "Customer").field(FieldInfo::new("name", FieldKind::Text)));
        let invoice = Arc::new(
            ModelDescriptor::new("billing", "Invoice")
                .field(FieldInfo::new("customer", FieldKind::ForeignKey("crm.customer".into()))),
        );
        (customer, invoice)
    }

    fn rec(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn resolves_scope_from_params() {
        let (customer, invoice) = models();
        let store = MemoryStore::new();
        let c = store.insert(&customer, &rec(json!({ "name": "Acme" }))).await.unwrap();
        let view = ViewConfigBuilder::new(invoice)
            .related_field("customer", customer.clone())
            .build()
            .unwrap();
        let params = parse_query(Some(&format!("customer={}&q=x", pk_string(&c["id"]))));
        let scope = Scope::resolve(&view, &store, &params).await.unwrap();
        assert_eq!(scope.params(), vec![format!("customer={}", pk_string(&c["id"]))]);
        let mut draft = Record::new();
        scope.stamp(&mut draft);
        assert_eq!(draft.get("customer"), Some(&c["id"]));
        assert!(scope.contains(&draft));
    }

    #[tokio::test]
    async fn unknown_scope_pk_is_not_found() {
        let (customer, invoice) = models();
        let store = MemoryStore::new();
        let view = ViewConfigBuilder::new(invoice).related_field("customer", customer).build().unwrap();
        for raw in ["customer=99", "customer=abc"] {
            let err = Scope::resolve(&view, &store, &parse_query(Some(raw))).await.unwrap_err();
            assert!(matches!(err, AppError::NotFound(_)));
        }
    }

    #[test]
    fn getparams_formatting() {
        let mut g = GetParams::new();
        assert_eq!(g.template_prefix(), "?");
        assert_eq!(g.append_to("/a/list"), "/a/list");
        g.extend(vec!["customer=3".to_string(), "status=draft".to_string(), "customer=3".to_string()]);
        assert_eq!(g.append_to("/a/list"), "/a/list?customer=3&status=draft");
        assert_eq!(g.template_prefix(), "?customer=3&status=draft&");
    }
}
