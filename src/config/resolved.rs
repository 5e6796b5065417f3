//! Resolved model: config validated and flattened for runtime use.

use crate::case;
use crate::config::ValidationRule;
use crate::filter::FilterSpec;
use crate::form::FormKind;
use crate::permission::PermissionMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// The five generated operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    Create,
    List,
    Update,
    Delete,
    Detail,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Create,
        Operation::List,
        Operation::Delete,
        Operation::Update,
        Operation::Detail,
    ];

    /// Operations addressed by an instance pk.
    pub const INSTANCE: [Operation; 3] = [Operation::Update, Operation::Delete, Operation::Detail];

    /// Operations addressed without a pk.
    pub const COLLECTION: [Operation; 2] = [Operation::Create, Operation::List];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::List => "list",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Detail => "detail",
        }
    }

    /// Default permission codename verb (`<app>.<verb>_<model>`).
    pub fn default_perm_verb(&self) -> &'static str {
        match self {
            Operation::Create => "add",
            Operation::Update => "change",
            Operation::Delete => "delete",
            Operation::List | Operation::Detail => "view",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = crate::error::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Operation::Create),
            "list" => Ok(Operation::List),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            "detail" => Ok(Operation::Detail),
            other => Err(crate::error::ConfigError::UnknownOperation(other.to_string())),
        }
    }
}

/// Primary key type for parsing path and query ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PkType {
    Uuid,
    BigInt,
    Int,
    Text,
}

impl PkType {
    /// Key type for a primary-key field of `kind`. Anything non-numeric and non-uuid is text.
    pub fn of(kind: &FieldKind) -> Self {
        match kind {
            FieldKind::Uuid => PkType::Uuid,
            FieldKind::BigInt => PkType::BigInt,
            FieldKind::Integer => PkType::Int,
            _ => PkType::Text,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FieldKind {
    Text,
    Integer,
    BigInt,
    Float,
    Boolean,
    Uuid,
    Date,
    Timestamp,
    Choice(Vec<String>),
    /// Key of the target model (`app_label.model`, lowercase model).
    ForeignKey(String),
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Integer => "integer",
            FieldKind::BigInt => "bigint",
            FieldKind::Float => "float",
            FieldKind::Boolean => "boolean",
            FieldKind::Uuid => "uuid",
            FieldKind::Date => "date",
            FieldKind::Timestamp => "timestamptz",
            FieldKind::Choice(_) => "choice",
            FieldKind::ForeignKey(_) => "foreign_key",
        }
    }

    /// PostgreSQL cast applied to bound parameters, when a bare text bind would not coerce.
    pub fn pg_cast(&self) -> Option<&'static str> {
        match self {
            FieldKind::Uuid => Some("uuid"),
            FieldKind::Date => Some("date"),
            FieldKind::Timestamp => Some("timestamptz"),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct FieldInfo {
    pub name: String,
    pub verbose_name: String,
    pub kind: FieldKind,
    pub nullable: bool,
    pub has_default: bool,
    pub primary_key: bool,
    pub validation: ValidationRule,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        FieldInfo {
            verbose_name: case::verbose_name(&name),
            name,
            kind,
            nullable: true,
            has_default: false,
            primary_key: false,
            validation: ValidationRule::default(),
        }
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self.validation.required = Some(true);
        self
    }

    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }

    pub fn with_validation(mut self, rule: ValidationRule) -> Self {
        self.validation = rule;
        self
    }

    pub fn related_model(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::ForeignKey(target) => Some(target),
            _ => None,
        }
    }
}

/// Read-only description of one data model.
#[derive(Clone, Debug)]
pub struct ModelDescriptor {
    pub app_label: String,
    /// Declared name, e.g. "Invoice".
    pub name: String,
    pub verbose_name: String,
    pub verbose_name_plural: String,
    pub schema_name: String,
    pub table_name: String,
    pub pk: String,
    pub pk_type: PkType,
    pub fields: Vec<FieldInfo>,
}

impl ModelDescriptor {
    /// Start a descriptor with an integer `id` primary key backed by a storage sequence.
    pub fn new(app_label: impl Into<String>, name: impl Into<String>) -> Self {
        let app_label = app_label.into();
        let name = name.into();
        let verbose_name = case::verbose_name(&name);
        let model = name.to_lowercase();
        ModelDescriptor {
            verbose_name_plural: case::pluralize(&verbose_name),
            verbose_name,
            schema_name: "public".into(),
            table_name: format!("{}_{}", app_label, model),
            pk: "id".into(),
            pk_type: PkType::BigInt,
            fields: vec![FieldInfo {
                primary_key: true,
                has_default: true,
                nullable: false,
                ..FieldInfo::new("id", FieldKind::BigInt)
            }],
            app_label,
            name,
        }
    }

    pub fn field(mut self, field: FieldInfo) -> Self {
        self.fields.retain(|f| f.name != field.name);
        self.fields.push(field);
        self
    }

    /// Replace the default `id` key with `field`.
    pub fn primary_key(mut self, mut field: FieldInfo) -> Self {
        self.fields.retain(|f| !f.primary_key && f.name != field.name);
        field.primary_key = true;
        field.nullable = false;
        self.pk = field.name.clone();
        self.pk_type = PkType::of(&field.kind);
        self.fields.insert(0, field);
        self
    }

    /// Lowercase model name used in URLs, templates and permission codenames.
    pub fn model_name(&self) -> String {
        self.name.to_lowercase()
    }

    /// Registry key: `<app_label>.<model_name>`.
    pub fn key(&self) -> String {
        format!("{}.{}", self.app_label, self.model_name())
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn pk_field(&self) -> Option<&FieldInfo> {
        self.get_field(&self.pk)
    }

    /// Fields a form may write: everything except the primary key.
    pub fn editable_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| !f.primary_key)
            .map(|f| f.name.clone())
            .collect()
    }
}

/// All known models, keyed by `<app_label>.<model_name>`.
#[derive(Clone, Debug, Default)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<ModelDescriptor>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, model: ModelDescriptor) -> Arc<ModelDescriptor> {
        let model = Arc::new(model);
        self.models.insert(model.key(), model.clone());
        model
    }

    /// Lookup by `app_label.Model` (case-insensitive model part).
    pub fn get(&self, key: &str) -> Option<&Arc<ModelDescriptor>> {
        let normalized = match key.split_once('.') {
            Some((app, model)) => format!("{}.{}", app, model.to_lowercase()),
            None => key.to_lowercase(),
        };
        self.models.get(&normalized)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ModelDescriptor>> {
        self.models.values()
    }
}

/// How the search term is tokenised.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SplitSearch {
    Disabled,
    Whitespace,
    Separator(String),
}

/// Html views render pages; Json views expose only create/update with `_json` templates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewMode {
    Html,
    Json,
}

/// Immutable per-model view configuration. Built once at wiring time.
#[derive(Clone, Debug)]
pub struct ViewConfig {
    pub model: Arc<ModelDescriptor>,
    pub namespace: Option<String>,
    pub cruds_url: Option<String>,
    pub url_prefix: String,
    pub template_name_base: Option<String>,
    pub template_father: String,
    pub template_blocks: serde_json::Map<String, serde_json::Value>,
    pub check_login: bool,
    pub login_url: String,
    pub check_perms: bool,
    pub paginate_by: Option<u32>,
    pub paginate_template: String,
    pub paginate_position: String,
    pub views_available: Vec<Operation>,
    pub fields: Option<Vec<String>>,
    pub display_fields: Option<Vec<String>>,
    pub list_fields: Option<Vec<String>>,
    pub search_fields: Option<Vec<String>>,
    pub split_space_search: SplitSearch,
    /// Related field name -> target model.
    pub related_fields: Vec<(String, Arc<ModelDescriptor>)>,
    pub list_filter: Vec<FilterSpec>,
    pub add_form: FormKind,
    pub update_form: FormKind,
    pub perms: PermissionMap,
    pub owner_field: Option<String>,
    pub mode: ViewMode,
    pub inlines: Vec<Arc<ViewConfig>>,
}

impl ViewConfig {
    pub fn is_available(&self, op: Operation) -> bool {
        self.views_available.contains(&op)
    }

    /// Operations that get a route in this view's mode.
    pub fn routed_operations(&self) -> Vec<Operation> {
        self.views_available
            .iter()
            .copied()
            .filter(|op| match self.mode {
                ViewMode::Html => true,
                ViewMode::Json => matches!(op, Operation::Create | Operation::Update),
            })
            .collect()
    }

    /// Template base name: configured base, or `<app>/<model>` when unset.
    pub fn base_name(&self) -> String {
        match &self.template_name_base {
            Some(base) if !base.is_empty() => base.clone(),
            _ => format!("{}/{}", self.model.app_label, self.model.model_name()),
        }
    }

    pub fn form_for(&self, op: Operation) -> &FormKind {
        match op {
            Operation::Update => &self.update_form,
            _ => &self.add_form,
        }
    }

    pub fn related_field_names(&self) -> Vec<String> {
        self.related_fields.iter().map(|(f, _)| f.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_defaults() {
        let m = ModelDescriptor::new("billing", "Invoice")
            .field(FieldInfo::new("number", FieldKind::Text).required());
        assert_eq!(m.model_name(), "invoice");
        assert_eq!(m.key(), "billing.invoice");
        assert_eq!(m.table_name, "billing_invoice");
        assert_eq!(m.verbose_name_plural, "invoices");
        assert_eq!(m.editable_fields(), vec!["number".to_string()]);
    }

    #[test]
    fn text_primary_key_replaces_id() {
        let m = ModelDescriptor::new("catalog", "Sku")
            .field(FieldInfo::new("title", FieldKind::Text))
            .primary_key(FieldInfo::new("code", FieldKind::Text));
        assert_eq!(m.pk, "code");
        assert_eq!(m.pk_type, PkType::Text);
        assert!(m.get_field("id").is_none());
        assert!(m.pk_field().is_some_and(|f| f.primary_key && !f.nullable));
        assert_eq!(m.editable_fields(), vec!["title".to_string()]);
    }

    #[test]
    fn registry_lookup_is_model_case_insensitive() {
        let mut reg = ModelRegistry::new();
        reg.register(ModelDescriptor::new("billing", "Invoice"));
        assert!(reg.get("billing.Invoice").is_some());
        assert!(reg.get("billing.invoice").is_some());
        assert!(reg.get("sales.Invoice").is_none());
    }

    #[test]
    fn operation_parse() {
        assert_eq!("update".parse::<Operation>().unwrap(), Operation::Update);
        assert!("patch".parse::<Operation>().is_err());
    }
}
