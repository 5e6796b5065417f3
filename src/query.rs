//! Query predicates over records: field lookups combined with AND / OR / NOT.
//! Compiled to SQL by `sql::builder` and evaluated directly by `MemoryStore`.

use crate::store::Record;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lookup {
    Exact,
    IExact,
    Contains,
    IContains,
    StartsWith,
    IStartsWith,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    IsNull,
}

impl Lookup {
    pub fn parse(suffix: &str) -> Option<Lookup> {
        Some(match suffix {
            "exact" => Lookup::Exact,
            "iexact" => Lookup::IExact,
            "contains" => Lookup::Contains,
            "icontains" => Lookup::IContains,
            "startswith" => Lookup::StartsWith,
            "istartswith" => Lookup::IStartsWith,
            "gt" => Lookup::Gt,
            "gte" => Lookup::Gte,
            "lt" => Lookup::Lt,
            "lte" => Lookup::Lte,
            "in" => Lookup::In,
            "isnull" => Lookup::IsNull,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Lookup::Exact => "exact",
            Lookup::IExact => "iexact",
            Lookup::Contains => "contains",
            Lookup::IContains => "icontains",
            Lookup::StartsWith => "startswith",
            Lookup::IStartsWith => "istartswith",
            Lookup::Gt => "gt",
            Lookup::Gte => "gte",
            Lookup::Lt => "lt",
            Lookup::Lte => "lte",
            Lookup::In => "in",
            Lookup::IsNull => "isnull",
        }
    }
}

/// Split `name__icontains` into `("name", IContains)`. Without a known suffix the whole
/// expression is the field and `default` is the lookup.
pub fn split_lookup(expr: &str, default: Lookup) -> (&str, Lookup) {
    if let Some((field, suffix)) = expr.rsplit_once("__") {
        if let Some(lookup) = Lookup::parse(suffix) {
            return (field, lookup);
        }
    }
    (expr, default)
}

#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// Matches every record.
    All,
    Field {
        field: String,
        lookup: Lookup,
        value: Value,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn field(field: impl Into<String>, lookup: Lookup, value: Value) -> Self {
        Predicate::Field {
            field: field.into(),
            lookup,
            value,
        }
    }

    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Predicate::field(field, Lookup::Exact, value)
    }

    /// AND two predicates; `All` is the identity and nested ANDs are flattened.
    pub fn and(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::All, p) | (p, Predicate::All) => p,
            (Predicate::And(mut a), Predicate::And(b)) => {
                a.extend(b);
                Predicate::And(a)
            }
            (Predicate::And(mut a), p) => {
                a.push(p);
                Predicate::And(a)
            }
            (p, Predicate::And(mut b)) => {
                b.insert(0, p);
                Predicate::And(b)
            }
            (a, b) => Predicate::And(vec![a, b]),
        }
    }

    /// OR of all predicates; `None` when the iterator is empty.
    pub fn any(preds: impl IntoIterator<Item = Predicate>) -> Option<Predicate> {
        let mut preds: Vec<Predicate> = preds.into_iter().collect();
        match preds.len() {
            0 => None,
            1 => preds.pop(),
            _ => Some(Predicate::Or(preds)),
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Predicate::All => true,
            Predicate::And(ps) => ps.iter().all(|p| p.matches(record)),
            Predicate::Or(ps) => ps.iter().any(|p| p.matches(record)),
            Predicate::Not(p) => !p.matches(record),
            Predicate::Field { field, lookup, value } => {
                let actual = record.get(field).unwrap_or(&Value::Null);
                lookup_matches(actual, *lookup, value)
            }
        }
    }
}

fn lookup_matches(actual: &Value, lookup: Lookup, expected: &Value) -> bool {
    match lookup {
        Lookup::IsNull => {
            let want_null = expected.as_bool().unwrap_or(true);
            actual.is_null() == want_null
        }
        Lookup::In => match expected {
            Value::Array(items) => items.iter().any(|v| values_equal(actual, v)),
            other => values_equal(actual, other),
        },
        _ if actual.is_null() => false,
        Lookup::Exact => values_equal(actual, expected),
        Lookup::IExact => text(actual).to_lowercase() == text(expected).to_lowercase(),
        Lookup::Contains => text(actual).contains(&text(expected)),
        Lookup::IContains => text(actual).to_lowercase().contains(&text(expected).to_lowercase()),
        Lookup::StartsWith => text(actual).starts_with(&text(expected)),
        Lookup::IStartsWith => text(actual).to_lowercase().starts_with(&text(expected).to_lowercase()),
        Lookup::Gt => compare(actual, expected) == Some(Ordering::Greater),
        Lookup::Gte => matches!(compare(actual, expected), Some(Ordering::Greater | Ordering::Equal)),
        Lookup::Lt => compare(actual, expected) == Some(Ordering::Less),
        Lookup::Lte => matches!(compare(actual, expected), Some(Ordering::Less | Ordering::Equal)),
    }
}

fn text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Equality that treats `1`, `1.0` and `"1"` alike, since form and query values arrive as text.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => text(a) == text(b),
        (Value::Bool(x), Value::String(s)) | (Value::String(s), Value::Bool(x)) => {
            s.eq_ignore_ascii_case(if *x { "true" } else { "false" })
        }
        _ => a == b,
    }
}

pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => match (a, b) {
            (Value::Null, _) | (_, Value::Null) => None,
            _ => Some(text(a).cmp(&text(b))),
        },
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::All => f.write_str("ALL"),
            Predicate::Field { field, lookup, value } => {
                let v = text(value);
                match lookup {
                    Lookup::IContains => write!(f, "{}~\"{}\"", field, v),
                    Lookup::Exact => write!(f, "{}=\"{}\"", field, v),
                    other => write!(f, "{}__{}=\"{}\"", field, other.as_str(), v),
                }
            }
            Predicate::And(ps) | Predicate::Or(ps) => {
                let sep = if matches!(self, Predicate::And(_)) { " AND " } else { " OR " };
                let parts: Vec<String> = ps.iter().map(|p| p.to_string()).collect();
                write!(f, "({})", parts.join(sep))
            }
            Predicate::Not(p) => write!(f, "NOT {}", p),
        }
    }
}

/// Predicate plus ordering and window, the unit a store lists by.
#[derive(Clone, Debug, PartialEq)]
pub struct ListQuery {
    pub predicate: Predicate,
    /// Field names; a leading `-` sorts descending. Empty means primary key ascending.
    pub order_by: Vec<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl Default for ListQuery {
    fn default() -> Self {
        ListQuery {
            predicate: Predicate::All,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = self.predicate.and(predicate);
        self
    }

    pub fn window(mut self, limit: u32, offset: u32) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn lookup_suffixes() {
        assert_eq!(split_lookup("name__iexact", Lookup::IContains), ("name", Lookup::IExact));
        assert_eq!(split_lookup("name", Lookup::IContains), ("name", Lookup::IContains));
        assert_eq!(split_lookup("customer__name", Lookup::Exact), ("customer__name", Lookup::Exact));
    }

    #[test]
    fn and_flattens_and_skips_all() {
        let p = Predicate::All
            .and(Predicate::eq("a", json!(1)))
            .and(Predicate::eq("b", json!(2)));
        assert_eq!(p.to_string(), "(a=\"1\" AND b=\"2\")");
    }

    #[test]
    fn matching() {
        let r = rec(json!({ "name": "John Smith", "total": 12.5, "paid": false, "note": null }));
        assert!(Predicate::field("name", Lookup::IContains, json!("john")).matches(&r));
        assert!(!Predicate::field("name", Lookup::Contains, json!("john")).matches(&r));
        assert!(Predicate::field("total", Lookup::Gte, json!(12.5)).matches(&r));
        assert!(Predicate::field("total", Lookup::Lt, json!("20")).matches(&r));
        assert!(Predicate::eq("paid", json!("false")).matches(&r));
        assert!(Predicate::field("note", Lookup::IsNull, json!(true)).matches(&r));
        assert!(Predicate::field("name", Lookup::In, json!(["x", "John Smith"])).matches(&r));
        assert!(!Predicate::Or(vec![]).matches(&r));
    }
}
