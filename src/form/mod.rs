//! Forms: single-model forms and the multi-entity adapter, tagged once at configuration time.

mod multi;

pub use multi::{CompositeEntity, FormRole, MultiEntityForm, MultiField, MultiValidation};

use crate::config::{FieldKind, ModelDescriptor};
use crate::introspect;
use crate::service::{FieldErrors, RequestValidator};
use crate::store::Record;
use serde_json::{json, Value};
use std::sync::Arc;

/// Single-model form: which fields it edits. `None` falls back to the view's `fields`,
/// then to every editable field.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FormSpec {
    pub fields: Option<Vec<String>>,
}

impl FormSpec {
    pub fn fields(fields: Vec<String>) -> Self {
        FormSpec { fields: Some(fields) }
    }
}

#[derive(Clone, Debug)]
pub enum FormKind {
    Single(FormSpec),
    Multi(Arc<MultiEntityForm>),
}

impl Default for FormKind {
    fn default() -> Self {
        FormKind::Single(FormSpec::default())
    }
}

impl FormKind {
    pub fn is_multi(&self) -> bool {
        matches!(self, FormKind::Multi(_))
    }
}

/// Submitted data bound to a set of fields: the raw data for re-rendering, cleaned values
/// and per-field errors.
#[derive(Clone, Debug, Default)]
pub struct BoundForm {
    pub data: Record,
    pub cleaned: Record,
    pub errors: FieldErrors,
}

impl BoundForm {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn context(&self) -> Value {
        json!({
            "data": self.data,
            "errors": self.errors,
            "is_valid": self.is_valid(),
        })
    }
}

fn is_required(model: &ModelDescriptor, name: &str) -> bool {
    model
        .get_field(name)
        .map(|f| f.validation.required == Some(true) || (!f.nullable && !f.has_default))
        .unwrap_or(false)
}

/// Bind `data` to `fields` of `model`.
///
/// A field missing from `data` is left out of `cleaned` unless it is required (an error)
/// or a boolean, which reads as `false` the way an unchecked checkbox does. Present values
/// are coerced to the field type and checked against its validation rule.
pub fn bind_model(model: &ModelDescriptor, fields: &[String], data: &Record) -> BoundForm {
    let mut bound = BoundForm {
        data: data.clone(),
        ..Default::default()
    };
    for name in fields {
        let Some(info) = model.get_field(name) else { continue };
        if info.primary_key && info.has_default {
            continue;
        }
        let value = match data.get(name) {
            None if info.kind == FieldKind::Boolean => Value::Bool(false),
            None => {
                if is_required(model, name) {
                    bound
                        .errors
                        .entry(name.clone())
                        .or_default()
                        .push("This field is required.".into());
                }
                continue;
            }
            Some(raw) => match introspect::coerce(info, raw) {
                Ok(v) => v,
                Err(msg) => {
                    bound.errors.entry(name.clone()).or_default().push(msg);
                    continue;
                }
            },
        };
        if value.is_null() && is_required(model, name) {
            bound
                .errors
                .entry(name.clone())
                .or_default()
                .push("This field is required.".into());
            continue;
        }
        if let Err(msg) = RequestValidator::check(name, &value, &info.validation) {
            bound.errors.entry(name.clone()).or_default().push(msg);
            continue;
        }
        bound.cleaned.insert(name.clone(), value);
    }
    bound
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldInfo, ValidationRule};

    fn customer() -> ModelDescriptor {
        ModelDescriptor::new("crm", "Customer")
            .field(FieldInfo::new("name", FieldKind::Text).required())
            .field(
                FieldInfo::new("email", FieldKind::Text).with_validation(ValidationRule {
                    format: Some("email".into()),
                    ..Default::default()
                }),
            )
            .field(FieldInfo::new("vip", FieldKind::Boolean))
            .field(FieldInfo::new("age", FieldKind::Integer))
    }

    fn data(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn binds_and_coerces_form_text() {
        let m = customer();
        let bound = bind_model(&m, &m.editable_fields(), &data(json!({ "name": "Ann", "age": "41", "vip": "on" })));
        assert!(bound.is_valid(), "{:?}", bound.errors);
        assert_eq!(bound.cleaned.get("age"), Some(&json!(41)));
        assert_eq!(bound.cleaned.get("vip"), Some(&json!(true)));
        assert!(!bound.cleaned.contains_key("email"));
    }

    #[test]
    fn collects_errors_without_cleaning() {
        let m = customer();
        let bound = bind_model(&m, &m.editable_fields(), &data(json!({ "name": "", "email": "nope", "age": "x" })));
        assert!(!bound.is_valid());
        assert_eq!(bound.errors.len(), 3);
        assert_eq!(bound.cleaned.get("vip"), Some(&json!(false)));
    }
}
