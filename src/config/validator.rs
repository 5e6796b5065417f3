//! Config validation: referential integrity and route consistency.

use crate::config::{FullConfig, ModelConfig, Operation, ViewConfigFile};
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};

/// Normalized registry key for `app_label.Model`.
pub fn model_key(reference: &str) -> String {
    match reference.split_once('.') {
        Some((app, model)) => format!("{}.{}", app, model.to_lowercase()),
        None => reference.to_lowercase(),
    }
}

pub const FIELD_TYPES: &[&str] = &[
    "text", "string", "varchar", "integer", "int", "bigint", "bigserial", "serial", "float", "double",
    "numeric", "decimal", "boolean", "bool", "uuid", "date", "timestamp", "timestamptz", "datetime",
    "choice", "foreign_key", "fk",
];

pub fn validate(config: &FullConfig) -> Result<(), ConfigError> {
    let mut models: HashMap<String, &ModelConfig> = HashMap::new();
    for m in &config.models {
        let key = model_key(&format!("{}.{}", m.app_label, m.name));
        if models.insert(key.clone(), m).is_some() {
            return Err(ConfigError::Validation(format!("model {} declared twice", key)));
        }
    }

    for m in &config.models {
        let mut names = HashSet::new();
        for f in &m.fields {
            if !names.insert(f.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "field {} declared twice on {}.{}",
                    f.name, m.app_label, m.name
                )));
            }
            let ty = f.type_.to_lowercase();
            if !FIELD_TYPES.contains(&ty.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "field {}.{}.{}: unknown type '{}'",
                    m.app_label, m.name, f.name, f.type_
                )));
            }
            if ty == "choice" && f.choices.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "field {}.{}.{}: choice fields need choices",
                    m.app_label, m.name, f.name
                )));
            }
            if ty == "foreign_key" || ty == "fk" {
                let target = f.references.as_deref().unwrap_or_default();
                if !models.contains_key(&model_key(target)) {
                    return Err(ConfigError::MissingReference {
                        kind: "model",
                        id: target.to_string(),
                    });
                }
            }
        }
        if m.primary_key != "id" && !names.contains(m.primary_key.as_str()) {
            return Err(ConfigError::UnknownField {
                model: format!("{}.{}", m.app_label, m.name),
                field: m.primary_key.clone(),
            });
        }
    }

    let mut routes = HashSet::new();
    for v in &config.views {
        validate_view(v, &models, &mut routes, "")?;
    }
    Ok(())
}

fn validate_view(
    v: &ViewConfigFile,
    models: &HashMap<String, &ModelConfig>,
    routes: &mut HashSet<String>,
    parent: &str,
) -> Result<(), ConfigError> {
    let key = model_key(&v.model);
    let model = models.get(&key).ok_or_else(|| ConfigError::MissingReference {
        kind: "model",
        id: v.model.clone(),
    })?;

    for op in v.views_available.iter().flatten() {
        op.parse::<Operation>()?;
    }
    for op in v.perms.iter().flat_map(|p| p.keys()) {
        op.parse::<Operation>()?;
    }
    match v.mode.as_deref() {
        None | Some("html") | Some("json") => {}
        Some(other) => return Err(ConfigError::Validation(format!("view {}: unknown mode '{}'", v.model, other))),
    }

    for related in &v.related_fields {
        let is_fk = model.fields.iter().any(|f| {
            f.name == *related && matches!(f.type_.to_lowercase().as_str(), "foreign_key" | "fk")
        });
        if !is_fk {
            return Err(ConfigError::Validation(format!(
                "view {}: related field '{}' is not a foreign key",
                v.model, related
            )));
        }
    }

    let json_suffix = if v.mode.as_deref() == Some("json") { "_json" } else { "" };
    let route = format!(
        "{}{}/{}{}",
        parent,
        v.cruds_url.as_deref().unwrap_or("").trim_matches('/'),
        key.replace('.', "/"),
        json_suffix
    );
    if !routes.insert(route.clone()) {
        return Err(ConfigError::DuplicateRoute(route));
    }

    let inline_parent = format!("{}inline/", parent);
    for inline in &v.inlines {
        validate_view(inline, models, routes, &inline_parent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(views: serde_json::Value) -> FullConfig {
        serde_json::from_value(json!({
            "models": [
                { "app_label": "crm", "name": "Customer", "fields": [{ "name": "name", "type": "text" }] },
                { "app_label": "billing", "name": "Invoice", "fields": [
                    { "name": "customer", "type": "foreign_key", "references": "crm.Customer" },
                    { "name": "number", "type": "text" }
                ] }
            ],
            "views": views
        }))
        .unwrap()
    }

    #[test]
    fn accepts_consistent_config() {
        let c = config(json!([
            { "model": "crm.Customer" },
            { "model": "billing.Invoice", "related_fields": ["customer"], "views_available": ["list", "detail"] },
            { "model": "billing.Invoice", "mode": "json" }
        ]));
        validate(&c).unwrap();
    }

    #[test]
    fn rejects_bad_references() {
        assert!(matches!(
            validate(&config(json!([{ "model": "crm.Lead" }]))),
            Err(ConfigError::MissingReference { .. })
        ));
        assert!(matches!(
            validate(&config(json!([{ "model": "billing.Invoice", "views_available": ["patch"] }]))),
            Err(ConfigError::UnknownOperation(_))
        ));
        assert!(validate(&config(json!([{ "model": "billing.Invoice", "related_fields": ["number"] }]))).is_err());
        assert!(matches!(
            validate(&config(json!([{ "model": "crm.Customer" }, { "model": "crm.Customer" }]))),
            Err(ConfigError::DuplicateRoute(_))
        ));
    }
}
