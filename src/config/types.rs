//! Raw config types matching the JSON files (`models.json`, `views.json`).

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelConfig {
    pub app_label: String,
    /// Model name as declared, e.g. "Invoice". URL and permission names use the lowercase form.
    pub name: String,
    #[serde(default)]
    pub verbose_name: Option<String>,
    #[serde(default)]
    pub verbose_name_plural: Option<String>,
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Table name; defaults to `<app_label>_<model>`.
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default = "default_pk")]
    pub primary_key: String,
    pub fields: Vec<FieldConfig>,
}

fn default_schema() -> String {
    "public".into()
}

fn default_pk() -> String {
    "id".into()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub verbose_name: Option<String>,
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Whether the column has a storage default (sequence, NOW(), ...).
    #[serde(default)]
    pub has_default: bool,
    #[serde(default)]
    pub choices: Vec<String>,
    /// Target model for foreign keys, as `app_label.Model`.
    #[serde(default)]
    pub references: Option<String>,
    #[serde(default)]
    pub validation: ValidationRule,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

/// `split_space_search`: `true` splits on whitespace, a string splits on that separator.
#[derive(Clone, Debug, Serialize)]
pub enum SplitSearchConfig {
    Disabled,
    Whitespace,
    Separator(String),
}

impl Default for SplitSearchConfig {
    fn default() -> Self {
        SplitSearchConfig::Disabled
    }
}

impl<'de> Deserialize<'de> for SplitSearchConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = serde_json::Value::deserialize(deserializer)?;
        match v {
            serde_json::Value::Null | serde_json::Value::Bool(false) => Ok(SplitSearchConfig::Disabled),
            serde_json::Value::Bool(true) => Ok(SplitSearchConfig::Whitespace),
            serde_json::Value::String(s) if s.is_empty() => Ok(SplitSearchConfig::Disabled),
            serde_json::Value::String(s) => Ok(SplitSearchConfig::Separator(s)),
            other => Err(serde::de::Error::custom(format!(
                "split_space_search must be a boolean or a separator string; got {}",
                other
            ))),
        }
    }
}

/// One `list_filter` entry: a bare field name, or `{ "field": ..., "kind": ... }`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterConfig {
    Field(String),
    Spec { field: String, kind: String },
}

impl FilterConfig {
    pub fn field(&self) -> &str {
        match self {
            FilterConfig::Field(f) => f,
            FilterConfig::Spec { field, .. } => field,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FormRoleConfig {
    pub name: String,
    /// `app_label.Model`
    pub model: String,
    /// Field on this role's model holding the shared key. Defaults to the model's primary key.
    #[serde(default)]
    pub key_field: Option<String>,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormConfig {
    Multi { primary: String, roles: Vec<FormRoleConfig> },
    Single { fields: Vec<String> },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ViewConfigFile {
    /// `app_label.Model`
    pub model: String,
    #[serde(default)]
    pub namespace: Option<String>,
    /// Path prefix placed before `<app>/<model>`.
    #[serde(default)]
    pub cruds_url: Option<String>,
    /// Prefix for URL names.
    #[serde(default)]
    pub url_prefix: String,
    /// `null` selects `<app>/<model>` as the template base.
    #[serde(default = "default_template_base")]
    pub template_name_base: Option<String>,
    #[serde(default = "default_template_father")]
    pub template_father: String,
    #[serde(default)]
    pub template_blocks: serde_json::Map<String, serde_json::Value>,
    #[serde(default = "default_true")]
    pub check_login: bool,
    #[serde(default = "default_login_url")]
    pub login_url: String,
    #[serde(default = "default_true")]
    pub check_perms: bool,
    #[serde(default = "default_paginate_by")]
    pub paginate_by: Option<u32>,
    #[serde(default = "default_paginate_template")]
    pub paginate_template: String,
    #[serde(default = "default_paginate_position")]
    pub paginate_position: String,
    #[serde(default)]
    pub views_available: Option<Vec<String>>,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub display_fields: Option<Vec<String>>,
    #[serde(default)]
    pub list_fields: Option<Vec<String>>,
    #[serde(default)]
    pub search_fields: Option<Vec<String>>,
    #[serde(default)]
    pub split_space_search: SplitSearchConfig,
    #[serde(default)]
    pub related_fields: Vec<String>,
    #[serde(default)]
    pub list_filter: Vec<FilterConfig>,
    /// Extra static permission identifiers per operation.
    #[serde(default)]
    pub perms: Option<HashMap<String, Vec<String>>>,
    #[serde(default)]
    pub add_form: Option<FormConfig>,
    #[serde(default)]
    pub update_form: Option<FormConfig>,
    #[serde(default)]
    pub owner_field: Option<String>,
    /// "html" (default) or "json".
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub inlines: Vec<ViewConfigFile>,
}

fn default_template_base() -> Option<String> {
    Some("cruds".into())
}

fn default_template_father() -> String {
    "cruds/base.html".into()
}

fn default_login_url() -> String {
    "/accounts/login/".into()
}

fn default_paginate_by() -> Option<u32> {
    Some(10)
}

fn default_paginate_template() -> String {
    "cruds/pagination/prev_next.html".into()
}

fn default_paginate_position() -> String {
    "Bottom".into()
}

/// All config in one struct for in-memory loading.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FullConfig {
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub views: Vec<ViewConfigFile>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_defaults() {
        let v: ViewConfigFile = serde_json::from_value(serde_json::json!({ "model": "billing.Invoice" })).unwrap();
        assert_eq!(v.template_name_base.as_deref(), Some("cruds"));
        assert!(v.check_login);
        assert!(v.check_perms);
        assert_eq!(v.paginate_by, Some(10));
        assert!(matches!(v.split_space_search, SplitSearchConfig::Disabled));
    }

    #[test]
    fn explicit_null_template_base() {
        let v: ViewConfigFile = serde_json::from_value(serde_json::json!({
            "model": "billing.Invoice",
            "template_name_base": null,
            "split_space_search": true
        }))
        .unwrap();
        assert!(v.template_name_base.is_none());
        assert!(matches!(v.split_space_search, SplitSearchConfig::Whitespace));
    }

    #[test]
    fn form_config_variants() {
        let single: FormConfig = serde_json::from_value(serde_json::json!({ "fields": ["a"] })).unwrap();
        assert!(matches!(single, FormConfig::Single { .. }));
        let multi: FormConfig = serde_json::from_value(serde_json::json!({
            "primary": "user",
            "roles": [{ "name": "user", "model": "auth.User" }]
        }))
        .unwrap();
        assert!(matches!(multi, FormConfig::Multi { .. }));
    }
}
