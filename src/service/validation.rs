//! Field validation from config rules. Errors are collected per field for re-rendering.

use crate::config::ValidationRule;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

/// Field name -> messages.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

pub struct RequestValidator;

impl RequestValidator {
    /// Validate every `(field, rule)` against `body`. Required fields must be present and non-null.
    pub fn validate(body: &serde_json::Map<String, Value>, rules: &[(String, ValidationRule)]) -> FieldErrors {
        let mut errors = FieldErrors::new();
        for (col, rule) in rules {
            let val = body.get(col);
            if rule.required == Some(true) && (val.is_none() || val == Some(&Value::Null)) {
                errors.entry(col.clone()).or_default().push("This field is required.".into());
                continue;
            }
            if let Some(v) = val {
                if let Err(msg) = Self::check(col, v, rule) {
                    errors.entry(col.clone()).or_default().push(msg);
                }
            }
        }
        errors
    }

    /// Validate one present value. Null passes; presence is checked by `validate`.
    pub fn check(col: &str, v: &Value, rule: &ValidationRule) -> Result<(), String> {
        if v.is_null() {
            return Ok(());
        }
        if let Some(format) = &rule.format {
            validate_format(col, v, format)?;
        }
        if let Some(max) = rule.max_length {
            if let Some(s) = v.as_str() {
                if s.chars().count() > max as usize {
                    return Err(format!("{} must be at most {} characters", col, max));
                }
            }
        }
        if let Some(min) = rule.min_length {
            if let Some(s) = v.as_str() {
                if s.chars().count() < min as usize {
                    return Err(format!("{} must be at least {} characters", col, min));
                }
            }
        }
        if let Some(ref pattern) = rule.pattern {
            let re = Regex::new(pattern).map_err(|_| format!("invalid pattern for {}", col))?;
            if let Some(s) = v.as_str() {
                if !re.is_match(s) {
                    return Err(format!("{} does not match required pattern", col));
                }
            }
        }
        if let Some(ref allowed) = rule.allowed {
            if !allowed.iter().any(|a| value_eq(v, a)) {
                return Err(format!(
                    "{} must be one of: {:?}",
                    col,
                    allowed.iter().take(5).collect::<Vec<_>>()
                ));
            }
        }
        if let Some(min) = rule.minimum {
            if let Some(n) = v.as_f64() {
                if n < min {
                    return Err(format!("{} must be at least {}", col, min));
                }
            }
        }
        if let Some(max) = rule.maximum {
            if let Some(n) = v.as_f64() {
                if n > max {
                    return Err(format!("{} must be at most {}", col, max));
                }
            }
        }
        Ok(())
    }
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(s), Value::String(t)) => s == t,
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn validate_format(col: &str, v: &Value, format: &str) -> Result<(), String> {
    match format.to_lowercase().as_str() {
        "email" => {
            if let Some(s) = v.as_str() {
                if !s.contains('@') || s.len() < 3 {
                    return Err(format!("{} must be a valid email", col));
                }
            }
        }
        "uuid" => {
            if let Some(s) = v.as_str() {
                if uuid::Uuid::parse_str(s).is_err() {
                    return Err(format!("{} must be a valid UUID", col));
                }
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rules() -> Vec<(String, ValidationRule)> {
        vec![
            (
                "email".into(),
                ValidationRule {
                    required: Some(true),
                    format: Some("email".into()),
                    ..Default::default()
                },
            ),
            (
                "age".into(),
                ValidationRule {
                    minimum: Some(18.0),
                    ..Default::default()
                },
            ),
        ]
    }

    #[test]
    fn errors_collected_per_field() {
        let body = json!({ "age": 12 }).as_object().cloned().unwrap();
        let errors = RequestValidator::validate(&body, &rules());
        assert_eq!(errors["email"], vec!["This field is required.".to_string()]);
        assert_eq!(errors["age"], vec!["age must be at least 18".to_string()]);
    }

    #[test]
    fn valid_body_has_no_errors() {
        let body = json!({ "email": "a@b.co", "age": 30 }).as_object().cloned().unwrap();
        assert!(RequestValidator::validate(&body, &rules()).is_empty());
    }
}
