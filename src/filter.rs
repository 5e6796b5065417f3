//! List filters: declarative specs turned into per-request predicates plus the query
//! parameters each one claims.

use crate::config::{FieldKind, ModelDescriptor};
use crate::error::ConfigError;
use crate::introspect;
use crate::query::{ListQuery, Lookup, Predicate};
use serde_json::{json, Value};
use url::form_urlencoded;

#[derive(Clone, Debug, PartialEq)]
pub enum FilterKind {
    Exact,
    /// Repeatable parameter matched with IN.
    Choice(Vec<String>),
    /// `<field>__gte` / `<field>__lte`.
    Range,
    Boolean,
    /// Foreign key matched by the target's primary key.
    Related(String),
}

impl FilterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterKind::Exact => "exact",
            FilterKind::Choice(_) => "choice",
            FilterKind::Range => "range",
            FilterKind::Boolean => "boolean",
            FilterKind::Related(_) => "related",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FilterSpec {
    pub field: String,
    pub label: String,
    pub kind: FilterKind,
}

impl FilterSpec {
    /// Pick the filter kind from the field type.
    pub fn infer(model: &ModelDescriptor, field: &str) -> Result<FilterSpec, ConfigError> {
        let info = model.get_field(field).ok_or_else(|| ConfigError::UnknownField {
            model: model.key(),
            field: field.to_string(),
        })?;
        let kind = match &info.kind {
            FieldKind::Choice(choices) => FilterKind::Choice(choices.clone()),
            FieldKind::Boolean => FilterKind::Boolean,
            FieldKind::ForeignKey(target) => FilterKind::Related(target.clone()),
            FieldKind::Integer | FieldKind::BigInt | FieldKind::Float | FieldKind::Date | FieldKind::Timestamp => {
                FilterKind::Range
            }
            FieldKind::Text | FieldKind::Uuid => FilterKind::Exact,
        };
        Ok(FilterSpec {
            field: info.name.clone(),
            label: info.verbose_name.clone(),
            kind,
        })
    }

    /// Explicit kind by name (`exact`, `choice`, `range`, `boolean`, `related`).
    pub fn with_kind(model: &ModelDescriptor, field: &str, kind: &str) -> Result<FilterSpec, ConfigError> {
        let inferred = FilterSpec::infer(model, field)?;
        let kind = match (kind, &inferred.kind) {
            ("exact", _) => FilterKind::Exact,
            ("range", _) => FilterKind::Range,
            ("boolean", _) => FilterKind::Boolean,
            ("choice", FilterKind::Choice(c)) => FilterKind::Choice(c.clone()),
            ("choice", _) => FilterKind::Choice(Vec::new()),
            ("related", FilterKind::Related(t)) => FilterKind::Related(t.clone()),
            (other, _) => {
                return Err(ConfigError::Validation(format!(
                    "list_filter {}.{}: unsupported kind '{}'",
                    model.key(),
                    field,
                    other
                )))
            }
        };
        Ok(FilterSpec { kind, ..inferred })
    }

    /// Query parameter names this filter reads.
    pub fn param_names(&self) -> Vec<String> {
        match self.kind {
            FilterKind::Range => vec![format!("{}__gte", self.field), format!("{}__lte", self.field)],
            _ => vec![self.field.clone()],
        }
    }
}

/// One filter bound to the current request.
#[derive(Clone, Debug)]
pub struct FilterPredicate {
    pub spec: FilterSpec,
    predicate: Option<Predicate>,
    consumed: Vec<(String, String)>,
}

impl FilterPredicate {
    pub fn is_active(&self) -> bool {
        self.predicate.is_some()
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    pub fn apply(&self, query: ListQuery) -> ListQuery {
        match &self.predicate {
            Some(p) => query.filter(p.clone()),
            None => query,
        }
    }

    /// Encoded `k=v` pairs to carry into generated links. Filters on a field listed in
    /// `exclude` claim nothing, since scoping already echoes them.
    pub fn consumed_url_params(&self, exclude: &[String]) -> Vec<String> {
        if exclude.iter().any(|f| *f == self.spec.field) {
            return Vec::new();
        }
        self.consumed
            .iter()
            .map(|(k, v)| form_urlencoded::Serializer::new(String::new()).append_pair(k, v).finish())
            .collect()
    }

    pub fn context(&self) -> Value {
        let choices = match &self.spec.kind {
            FilterKind::Choice(c) => json!(c),
            FilterKind::Boolean => json!(["true", "false"]),
            _ => Value::Null,
        };
        let values: serde_json::Map<String, Value> = self
            .consumed
            .iter()
            .fold(serde_json::Map::new(), |mut acc, (k, v)| {
                match acc.get_mut(k) {
                    Some(Value::Array(items)) => items.push(json!(v)),
                    _ => {
                        acc.insert(k.clone(), json!([v]));
                    }
                }
                acc
            });
        json!({
            "field": self.spec.field,
            "kind": self.spec.kind.as_str(),
            "label": self.spec.label,
            "choices": choices,
            "values": values,
            "active": self.is_active(),
        })
    }
}

fn values_of<'a>(params: &'a [(String, String)], name: &str) -> Vec<&'a str> {
    params
        .iter()
        .filter(|(k, v)| k == name && !v.is_empty())
        .map(|(_, v)| v.as_str())
        .collect()
}

/// Bind every spec to the request parameters. Values that do not parse for the field are ignored.
pub fn build(model: &ModelDescriptor, specs: &[FilterSpec], params: &[(String, String)]) -> Vec<FilterPredicate> {
    specs.iter().map(|spec| bind(model, spec, params)).collect()
}

fn bind(model: &ModelDescriptor, spec: &FilterSpec, params: &[(String, String)]) -> FilterPredicate {
    let mut consumed = Vec::new();
    let mut preds = Vec::new();
    let field = model.get_field(&spec.field);
    let coerce = |raw: &str| field.and_then(|f| introspect::coerce(f, &Value::String(raw.to_string())).ok());

    match &spec.kind {
        FilterKind::Exact | FilterKind::Related(_) => {
            if let Some(raw) = values_of(params, &spec.field).first() {
                if let Some(v) = coerce(raw).filter(|v| !v.is_null()) {
                    preds.push(Predicate::eq(spec.field.clone(), v));
                    consumed.push((spec.field.clone(), raw.to_string()));
                }
            }
        }
        FilterKind::Boolean => {
            if let Some(raw) = values_of(params, &spec.field).first() {
                let parsed = match raw.to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" | "on" => Some(true),
                    "false" | "0" | "no" | "off" => Some(false),
                    _ => None,
                };
                if let Some(b) = parsed {
                    preds.push(Predicate::eq(spec.field.clone(), Value::Bool(b)));
                    consumed.push((spec.field.clone(), raw.to_string()));
                }
            }
        }
        FilterKind::Choice(choices) => {
            let mut picked = Vec::new();
            for raw in values_of(params, &spec.field) {
                let allowed = choices.is_empty() || choices.iter().any(|c| c == raw);
                if allowed && !picked.iter().any(|p: &Value| p.as_str() == Some(raw)) {
                    picked.push(Value::String(raw.to_string()));
                    consumed.push((spec.field.clone(), raw.to_string()));
                }
            }
            if !picked.is_empty() {
                preds.push(Predicate::field(spec.field.clone(), Lookup::In, Value::Array(picked)));
            }
        }
        FilterKind::Range => {
            for (suffix, lookup) in [("gte", Lookup::Gte), ("lte", Lookup::Lte)] {
                let name = format!("{}__{}", spec.field, suffix);
                if let Some(raw) = values_of(params, &name).first() {
                    if let Some(v) = coerce(raw).filter(|v| !v.is_null()) {
                        preds.push(Predicate::field(spec.field.clone(), lookup, v));
                        consumed.push((name, raw.to_string()));
                    }
                }
            }
        }
    }

    let predicate = preds.into_iter().reduce(Predicate::and);
    FilterPredicate {
        spec: spec.clone(),
        predicate,
        consumed,
    }
}
