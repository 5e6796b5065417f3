//! Field and URL introspection: ordered field lists, URL names, value coercion from request text.

use crate::config::{FieldInfo, FieldKind, ModelDescriptor, Operation, PkType, ViewConfig};
use crate::error::AppError;
use serde_json::{json, Value};

/// Fields in `include` order, or every declared field when `include` is unset.
/// Unknown names are skipped.
pub fn get_fields<'a>(model: &'a ModelDescriptor, include: Option<&[String]>) -> Vec<&'a FieldInfo> {
    match include {
        Some(names) => names.iter().filter_map(|n| model.get_field(n)).collect(),
        None => model.fields.iter().collect(),
    }
}

/// Render-context field list: `[{name, verbose_name, kind}]`.
pub fn fields_context(fields: &[&FieldInfo]) -> Value {
    Value::Array(
        fields
            .iter()
            .map(|f| {
                json!({
                    "name": f.name,
                    "verbose_name": f.verbose_name,
                    "kind": f.kind.as_str(),
                })
            })
            .collect(),
    )
}

/// URL name of one operation: `<namespace>:<url_prefix><app>_<model>_<op>`.
pub fn crud_url_name(view: &ViewConfig, op: Operation) -> String {
    let local = format!(
        "{}{}_{}_{}",
        view.url_prefix,
        view.model.app_label,
        view.model.model_name(),
        op.as_str()
    );
    match &view.namespace {
        Some(ns) if !ns.is_empty() => format!("{}:{}", ns, local),
        _ => local,
    }
}

/// Parse a path or query primary key into the model's key type.
pub fn parse_pk(model: &ModelDescriptor, raw: &str) -> Result<Value, AppError> {
    Ok(match model.pk_type {
        PkType::Uuid => {
            let u = uuid::Uuid::parse_str(raw).map_err(|_| AppError::NotFound(format!("{} {}", model.key(), raw)))?;
            Value::String(u.to_string())
        }
        PkType::BigInt | PkType::Int => {
            let n: i64 = raw
                .parse()
                .map_err(|_| AppError::NotFound(format!("{} {}", model.key(), raw)))?;
            Value::Number(n.into())
        }
        PkType::Text => Value::String(raw.to_string()),
    })
}

fn truthy(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "on" | "1" | "yes" => Some(true),
        "false" | "off" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Convert a submitted value (form text or JSON) to the field's storage value.
/// Empty strings become null; the caller decides whether null is allowed.
pub fn coerce(field: &FieldInfo, raw: &Value) -> Result<Value, String> {
    let text = match raw {
        Value::Null => return Ok(Value::Null),
        Value::String(s) if s.trim().is_empty() && !matches!(field.kind, FieldKind::Text) => {
            return Ok(Value::Null)
        }
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    match &field.kind {
        FieldKind::Text => Ok(match raw {
            Value::String(s) if s.is_empty() => Value::Null,
            Value::String(s) => Value::String(s.clone()),
            _ => Value::String(text),
        }),
        FieldKind::Integer | FieldKind::BigInt => text
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .map_err(|_| "Enter a whole number.".to_string()),
        FieldKind::Float => text
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| "Enter a number.".to_string()),
        FieldKind::Boolean => match raw {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            _ => truthy(&text).map(Value::Bool).ok_or_else(|| "Enter true or false.".to_string()),
        },
        FieldKind::Uuid => uuid::Uuid::parse_str(&text)
            .map(|u| Value::String(u.to_string()))
            .map_err(|_| "Enter a valid UUID.".to_string()),
        FieldKind::Date => chrono::NaiveDate::parse_from_str(&text, "%Y-%m-%d")
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
            .map_err(|_| "Enter a valid date.".to_string()),
        FieldKind::Timestamp => chrono::DateTime::parse_from_rfc3339(&text)
            .map(|d| d.with_timezone(&chrono::Utc))
            .or_else(|_| {
                chrono::NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M")
                    .or_else(|_| chrono::NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S"))
                    .map(|d| d.and_utc())
            })
            .map(|d| Value::String(d.to_rfc3339()))
            .map_err(|_| "Enter a valid date/time.".to_string()),
        FieldKind::Choice(choices) => {
            if choices.iter().any(|c| *c == text) {
                Ok(Value::String(text))
            } else {
                Err(format!("Select a valid choice. {} is not one of the available choices.", text))
            }
        }
        FieldKind::ForeignKey(_) => Ok(match text.parse::<i64>() {
            Ok(n) => Value::Number(n.into()),
            Err(_) => Value::String(text),
        }),
    }
}
