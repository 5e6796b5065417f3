//! Load config from JSON files or in-memory structs and resolve it into models and views.

use crate::config::types::*;
use crate::config::validator::{model_key, validate};
use crate::config::{
    FieldInfo, FieldKind, ModelDescriptor, ModelRegistry, Operation, PkType, SplitSearch, ViewConfig,
    ViewConfigBuilder, ViewMode,
};
use crate::error::ConfigError;
use crate::filter::FilterSpec;
use crate::form::{FormKind, FormRole, FormSpec, MultiEntityForm};
use crate::permission::PermissionRule;
use std::path::Path;
use std::sync::Arc;

/// Build the model registry and view configs from full config (validates first).
pub fn resolve(config: &FullConfig) -> Result<(ModelRegistry, Vec<Arc<ViewConfig>>), ConfigError> {
    validate(config)?;

    let mut registry = ModelRegistry::new();
    for m in &config.models {
        registry.register(resolve_model(m)?);
    }

    let mut views = Vec::with_capacity(config.views.len());
    for v in &config.views {
        views.push(Arc::new(resolve_view(v, &registry)?));
    }
    Ok((registry, views))
}

fn parse_field_kind(f: &FieldConfig) -> Result<FieldKind, ConfigError> {
    Ok(match f.type_.to_lowercase().as_str() {
        "text" | "string" | "varchar" => FieldKind::Text,
        "integer" | "int" | "serial" => FieldKind::Integer,
        "bigint" | "bigserial" => FieldKind::BigInt,
        "float" | "double" | "numeric" | "decimal" => FieldKind::Float,
        "boolean" | "bool" => FieldKind::Boolean,
        "uuid" => FieldKind::Uuid,
        "date" => FieldKind::Date,
        "timestamp" | "timestamptz" | "datetime" => FieldKind::Timestamp,
        "choice" => FieldKind::Choice(f.choices.clone()),
        "foreign_key" | "fk" => FieldKind::ForeignKey(model_key(f.references.as_deref().unwrap_or_default())),
        other => {
            return Err(ConfigError::Validation(format!(
                "field {}: unknown type '{}'",
                f.name, other
            )))
        }
    })
}

fn resolve_model(m: &ModelConfig) -> Result<ModelDescriptor, ConfigError> {
    let mut model = ModelDescriptor::new(m.app_label.clone(), m.name.clone());
    model.schema_name = m.schema.clone();
    if let Some(table) = &m.table {
        model.table_name = table.clone();
    }
    if let Some(v) = &m.verbose_name {
        model.verbose_name = v.clone();
    }
    if let Some(v) = &m.verbose_name_plural {
        model.verbose_name_plural = v.clone();
    }
    if m.primary_key != "id" {
        model.fields.retain(|f| f.name != "id");
    }
    for f in &m.fields {
        let kind = parse_field_kind(f)?;
        let mut info = FieldInfo::new(f.name.clone(), kind).with_validation(f.validation.clone());
        info.nullable = f.nullable;
        info.has_default = f.has_default;
        if let Some(v) = &f.verbose_name {
            info.verbose_name = v.clone();
        }
        if f.name == m.primary_key {
            info.primary_key = true;
            info.nullable = false;
        }
        model = model.field(info);
    }
    model.pk = m.primary_key.clone();
    let pk_kind = model.pk_field().map(|f| f.kind.clone()).ok_or_else(|| ConfigError::UnknownField {
        model: model.key(),
        field: m.primary_key.clone(),
    })?;
    model.pk_type = PkType::of(&pk_kind);
    Ok(model)
}

fn lookup<'a>(registry: &'a ModelRegistry, reference: &str) -> Result<&'a Arc<ModelDescriptor>, ConfigError> {
    registry.get(reference).ok_or_else(|| ConfigError::MissingReference {
        kind: "model",
        id: reference.to_string(),
    })
}

fn resolve_form(form: &FormConfig, registry: &ModelRegistry) -> Result<FormKind, ConfigError> {
    Ok(match form {
        FormConfig::Single { fields } => FormKind::Single(FormSpec::fields(fields.clone())),
        FormConfig::Multi { primary, roles } => {
            let mut resolved = Vec::with_capacity(roles.len());
            for r in roles {
                let model = lookup(registry, &r.model)?.clone();
                let mut role = FormRole::new(r.name.clone(), model);
                if let Some(key) = &r.key_field {
                    role = role.key_field(key.clone());
                }
                if let Some(fields) = &r.fields {
                    role = role.fields(fields.clone());
                }
                resolved.push(role);
            }
            FormKind::Multi(Arc::new(MultiEntityForm::new(primary, resolved)?))
        }
    })
}

fn resolve_view(v: &ViewConfigFile, registry: &ModelRegistry) -> Result<ViewConfig, ConfigError> {
    let model = lookup(registry, &v.model)?.clone();
    let mut b = ViewConfigBuilder::new(model.clone())
        .url_prefix(v.url_prefix.clone())
        .template_name_base(v.template_name_base.clone())
        .template_father(v.template_father.clone())
        .template_blocks(v.template_blocks.clone())
        .check_login(v.check_login)
        .login_url(v.login_url.clone())
        .check_perms(v.check_perms)
        .paginate_by(v.paginate_by)
        .paginate_template(v.paginate_template.clone())
        .paginate_position(v.paginate_position.clone())
        .split_space_search(match &v.split_space_search {
            SplitSearchConfig::Disabled => SplitSearch::Disabled,
            SplitSearchConfig::Whitespace => SplitSearch::Whitespace,
            SplitSearchConfig::Separator(s) => SplitSearch::Separator(s.clone()),
        });
    if let Some(ns) = &v.namespace {
        b = b.namespace(ns.clone());
    }
    if let Some(url) = &v.cruds_url {
        b = b.cruds_url(url.clone());
    }
    if let Some(ops) = &v.views_available {
        let ops = ops.iter().map(|s| s.parse::<Operation>()).collect::<Result<Vec<_>, _>>()?;
        b = b.views_available(ops);
    }
    if let Some(f) = &v.fields {
        b = b.fields(f.clone());
    }
    if let Some(f) = &v.display_fields {
        b = b.display_fields(f.clone());
    }
    if let Some(f) = &v.list_fields {
        b = b.list_fields(f.clone());
    }
    if let Some(f) = &v.search_fields {
        b = b.search_fields(f.clone());
    }
    for field in &v.related_fields {
        let target = model
            .get_field(field)
            .and_then(|f| f.related_model())
            .ok_or_else(|| ConfigError::UnknownField {
                model: model.key(),
                field: field.clone(),
            })?;
        b = b.related_field(field.clone(), lookup(registry, target)?.clone());
    }
    let mut filters = Vec::with_capacity(v.list_filter.len());
    for f in &v.list_filter {
        filters.push(match f {
            FilterConfig::Field(name) => FilterSpec::infer(&model, name)?,
            FilterConfig::Spec { field, kind } => FilterSpec::with_kind(&model, field, kind)?,
        });
    }
    b = b.list_filter(filters);
    if let Some(perms) = &v.perms {
        let mut ops: Vec<(&String, &Vec<String>)> = perms.iter().collect();
        ops.sort_by(|a, b| a.0.cmp(b.0));
        for (op, ids) in ops {
            let op: Operation = op.parse()?;
            for id in ids {
                b = b.permission(op, PermissionRule::perm(id.clone()));
            }
        }
    }
    if let Some(form) = &v.add_form {
        b = b.add_form(resolve_form(form, registry)?);
    }
    if let Some(form) = &v.update_form {
        b = b.update_form(resolve_form(form, registry)?);
    }
    if let Some(owner) = &v.owner_field {
        b = b.owner_field(owner.clone());
    }
    if v.mode.as_deref() == Some("json") {
        b = b.mode(ViewMode::Json);
    }
    for inline in &v.inlines {
        b = b.inline(Arc::new(resolve_view(inline, registry)?));
    }
    b.build()
}

/// Read `models.json` and `views.json` from a config directory.
pub async fn load_from_path(dir: impl AsRef<Path>) -> Result<FullConfig, ConfigError> {
    let dir = dir.as_ref();
    let models = read_json::<Vec<ModelConfig>>(&dir.join("models.json")).await?;
    let views = read_json::<Vec<ViewConfigFile>>(&dir.join("views.json")).await?;
    tracing::info!(path = %dir.display(), models = models.len(), views = views.len(), "config loaded");
    Ok(FullConfig { models, views })
}

async fn read_json<T>(path: &Path) -> Result<T, ConfigError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))
}
