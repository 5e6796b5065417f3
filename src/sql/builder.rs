//! Builds parameterized SELECT, COUNT, INSERT, UPDATE, DELETE from a model descriptor and predicates.

use crate::config::ModelDescriptor;
use crate::query::{ListQuery, Lookup, Predicate};
use crate::store::Record;
use serde_json::Value;

/// Quote identifier for PostgreSQL (safe: only from config).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
fn qualified_table(model: &ModelDescriptor) -> String {
    format!("{}.{}", quoted(&model.schema_name), quoted(&model.table_name))
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }

    /// Push a value and return its placeholder, cast to the column type when needed.
    fn placeholder(&mut self, model: &ModelDescriptor, field: &str, v: Value) -> String {
        let n = self.push_param(v);
        model
            .get_field(field)
            .and_then(|f| f.kind.pg_cast())
            .map(|t| format!("${}::{}", n, t))
            .unwrap_or_else(|| format!("${}", n))
    }
}

fn select_column_list(model: &ModelDescriptor) -> String {
    model
        .fields
        .iter()
        .map(|f| quoted(&f.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Escape LIKE wildcards in a user supplied term.
fn like_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Compile a predicate into a WHERE expression, pushing its values onto `q`.
/// Unknown fields compile to FALSE: identifiers only ever come from the model.
pub fn compile_predicate(model: &ModelDescriptor, pred: &Predicate, q: &mut QueryBuf) -> String {
    match pred {
        Predicate::All => "TRUE".into(),
        Predicate::And(ps) if ps.is_empty() => "TRUE".into(),
        Predicate::Or(ps) if ps.is_empty() => "FALSE".into(),
        Predicate::And(ps) => {
            let parts: Vec<String> = ps.iter().map(|p| compile_predicate(model, p, q)).collect();
            format!("({})", parts.join(" AND "))
        }
        Predicate::Or(ps) => {
            let parts: Vec<String> = ps.iter().map(|p| compile_predicate(model, p, q)).collect();
            format!("({})", parts.join(" OR "))
        }
        Predicate::Not(p) => format!("NOT ({})", compile_predicate(model, p, q)),
        Predicate::Field { field, lookup, value } => {
            if model.get_field(field).is_none() {
                return "FALSE".into();
            }
            let col = quoted(field);
            match lookup {
                Lookup::IsNull => {
                    if value.as_bool().unwrap_or(true) {
                        format!("{} IS NULL", col)
                    } else {
                        format!("{} IS NOT NULL", col)
                    }
                }
                Lookup::Exact if value.is_null() => format!("{} IS NULL", col),
                Lookup::Exact => format!("{} = {}", col, q.placeholder(model, field, value.clone())),
                Lookup::IExact => {
                    let n = q.push_param(Value::String(value_text(value)));
                    format!("LOWER({}::text) = LOWER(${})", col, n)
                }
                Lookup::Contains | Lookup::IContains | Lookup::StartsWith | Lookup::IStartsWith => {
                    let term = like_escape(&value_text(value));
                    let pattern = match lookup {
                        Lookup::StartsWith | Lookup::IStartsWith => format!("{}%", term),
                        _ => format!("%{}%", term),
                    };
                    let op = match lookup {
                        Lookup::Contains | Lookup::StartsWith => "LIKE",
                        _ => "ILIKE",
                    };
                    let n = q.push_param(Value::String(pattern));
                    format!("{}::text {} ${}", col, op, n)
                }
                Lookup::Gt | Lookup::Gte | Lookup::Lt | Lookup::Lte => {
                    let op = match lookup {
                        Lookup::Gt => ">",
                        Lookup::Gte => ">=",
                        Lookup::Lt => "<",
                        _ => "<=",
                    };
                    format!("{} {} {}", col, op, q.placeholder(model, field, value.clone()))
                }
                Lookup::In => {
                    let items: Vec<Value> = match value {
                        Value::Array(items) => items.clone(),
                        other => vec![other.clone()],
                    };
                    if items.is_empty() {
                        return "FALSE".into();
                    }
                    let phs: Vec<String> = items
                        .into_iter()
                        .map(|v| q.placeholder(model, field, v))
                        .collect();
                    format!("{} IN ({})", col, phs.join(", "))
                }
            }
        }
    }
}

fn order_clause(model: &ModelDescriptor, order_by: &[String]) -> String {
    let mut parts = Vec::new();
    for key in order_by {
        let (field, dir) = match key.strip_prefix('-') {
            Some(f) => (f, "DESC"),
            None => (key.as_str(), "ASC"),
        };
        if model.get_field(field).is_some() {
            parts.push(format!("{} {}", quoted(field), dir));
        }
    }
    if parts.is_empty() {
        parts.push(format!("{} ASC", quoted(&model.pk)));
    }
    format!(" ORDER BY {}", parts.join(", "))
}

/// SELECT by primary key. Caller's id is the sole param.
pub fn select_by_id(model: &ModelDescriptor, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(model);
    let cols = select_column_list(model);
    let ph = q.placeholder(model, &model.pk, id.clone());
    q.sql = format!("SELECT {} FROM {} WHERE {} = {}", cols, table, quoted(&model.pk), ph);
    q
}

/// SELECT with predicate, ordering (default pk) and optional LIMIT/OFFSET.
pub fn select_list(model: &ModelDescriptor, query: &ListQuery) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(model);
    let where_sql = compile_predicate(model, &query.predicate, &mut q);
    let limit_clause = query.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = query.offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {} WHERE {}{}{}{}",
        select_column_list(model),
        table,
        where_sql,
        order_clause(model, &query.order_by),
        limit_clause,
        offset_clause
    );
    q
}

pub fn count(model: &ModelDescriptor, predicate: &Predicate) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = compile_predicate(model, predicate, &mut q);
    q.sql = format!("SELECT COUNT(*) FROM {} WHERE {}", qualified_table(model), where_sql);
    q
}

/// INSERT the declared fields present in `values`. Columns with a storage default are omitted
/// when absent so the database fills them.
pub fn insert(model: &ModelDescriptor, values: &Record) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for f in &model.fields {
        let val = values.get(&f.name).cloned();
        let val = match val {
            None | Some(Value::Null) if f.has_default || f.primary_key => continue,
            None => Value::Null,
            Some(v) => v,
        };
        placeholders.push(q.placeholder(model, &f.name, val));
        cols.push(quoted(&f.name));
    }
    q.sql = if cols.is_empty() {
        format!(
            "INSERT INTO {} DEFAULT VALUES RETURNING {}",
            qualified_table(model),
            select_column_list(model)
        )
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            qualified_table(model),
            cols.join(", "),
            placeholders.join(", "),
            select_column_list(model)
        )
    };
    q
}

/// UPDATE by id: SET only declared, non-key fields present in `values`.
pub fn update(model: &ModelDescriptor, id: &Value, values: &Record) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(model);
    let mut sets = Vec::new();
    for f in &model.fields {
        if f.primary_key {
            continue;
        }
        let Some(v) = values.get(&f.name) else { continue };
        let ph = q.placeholder(model, &f.name, v.clone());
        sets.push(format!("{} = {}", quoted(&f.name), ph));
    }
    if sets.is_empty() {
        return select_by_id(model, id);
    }
    let id_ph = q.placeholder(model, &model.pk, id.clone());
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = {} RETURNING {}",
        table,
        sets.join(", "),
        quoted(&model.pk),
        id_ph,
        select_column_list(model)
    );
    q
}

/// DELETE by id.
pub fn delete(model: &ModelDescriptor, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.placeholder(model, &model.pk, id.clone());
    q.sql = format!(
        "DELETE FROM {} WHERE {} = {} RETURNING {}",
        qualified_table(model),
        quoted(&model.pk),
        ph,
        select_column_list(model)
    );
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldInfo, FieldKind};
    use serde_json::json;

    fn customer() -> ModelDescriptor {
        ModelDescriptor::new("crm", "Customer")
            .field(FieldInfo::new("name", FieldKind::Text))
            .field(FieldInfo::new("email", FieldKind::Text))
            .field(FieldInfo::new("joined", FieldKind::Date))
    }

    #[test]
    fn search_predicate_compiles_to_ilike() {
        let m = customer();
        let pred = Predicate::Or(vec![
            Predicate::field("name", Lookup::IContains, json!("jo_n")),
            Predicate::field("email", Lookup::IContains, json!("jo_n")),
        ]);
        let q = select_list(&m, &ListQuery::new().filter(pred).window(10, 20));
        assert_eq!(
            q.sql,
            "SELECT \"id\", \"name\", \"email\", \"joined\" FROM \"public\".\"crm_customer\" \
             WHERE (\"name\"::text ILIKE $1 OR \"email\"::text ILIKE $2) ORDER BY \"id\" ASC LIMIT 10 OFFSET 20"
        );
        assert_eq!(q.params, vec![json!("%jo\\_n%"), json!("%jo\\_n%")]);
    }

    #[test]
    fn typed_columns_are_cast_and_unknown_fields_are_false() {
        let m = customer();
        let mut q = QueryBuf::new();
        let sql = compile_predicate(
            &m,
            &Predicate::field("joined", Lookup::Gte, json!("2024-01-01")).and(Predicate::eq("nope", json!(1))),
            &mut q,
        );
        assert_eq!(sql, "(\"joined\" >= $1::date AND FALSE)");
    }

    #[test]
    fn insert_skips_generated_key() {
        let m = customer();
        let values = json!({ "name": "a", "email": null }).as_object().cloned().unwrap();
        let q = insert(&m, &values);
        assert!(q.sql.starts_with("INSERT INTO \"public\".\"crm_customer\" (\"name\", \"email\", \"joined\") VALUES ($1, $2, $3::date)"));
        assert_eq!(q.params.len(), 3);
    }
}
