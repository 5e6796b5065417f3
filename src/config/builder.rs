//! Programmatic view configuration. JSON config resolves through this too, so both paths
//! share defaults and checks.

use super::{ModelDescriptor, Operation, SplitSearch, ViewConfig, ViewMode};
use crate::error::ConfigError;
use crate::filter::FilterSpec;
use crate::form::FormKind;
use crate::permission::{PermissionMap, PermissionRule};
use crate::query::{split_lookup, Lookup};
use std::sync::Arc;

pub struct ViewConfigBuilder {
    model: Arc<ModelDescriptor>,
    namespace: Option<String>,
    cruds_url: Option<String>,
    url_prefix: String,
    template_name_base: Option<String>,
    template_father: String,
    template_blocks: serde_json::Map<String, serde_json::Value>,
    check_login: bool,
    login_url: String,
    check_perms: bool,
    paginate_by: Option<u32>,
    paginate_template: String,
    paginate_position: String,
    views_available: Option<Vec<Operation>>,
    fields: Option<Vec<String>>,
    display_fields: Option<Vec<String>>,
    list_fields: Option<Vec<String>>,
    search_fields: Option<Vec<String>>,
    split_space_search: SplitSearch,
    related_fields: Vec<(String, Arc<ModelDescriptor>)>,
    list_filter: Vec<FilterSpec>,
    add_form: Option<FormKind>,
    update_form: Option<FormKind>,
    perms: PermissionMap,
    owner_field: Option<String>,
    mode: ViewMode,
    inlines: Vec<Arc<ViewConfig>>,
}

impl ViewConfigBuilder {
    pub fn new(model: Arc<ModelDescriptor>) -> Self {
        ViewConfigBuilder {
            model,
            namespace: None,
            cruds_url: None,
            url_prefix: String::new(),
            template_name_base: Some("cruds".into()),
            template_father: "cruds/base.html".into(),
            template_blocks: serde_json::Map::new(),
            check_login: true,
            login_url: "/accounts/login/".into(),
            check_perms: true,
            paginate_by: Some(10),
            paginate_template: "cruds/pagination/prev_next.html".into(),
            paginate_position: "Bottom".into(),
            views_available: None,
            fields: None,
            display_fields: None,
            list_fields: None,
            search_fields: None,
            split_space_search: SplitSearch::Disabled,
            related_fields: Vec::new(),
            list_filter: Vec::new(),
            add_form: None,
            update_form: None,
            perms: PermissionMap::new(),
            owner_field: None,
            mode: ViewMode::Html,
            inlines: Vec::new(),
        }
    }

    pub fn namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = Some(ns.into());
        self
    }

    pub fn cruds_url(mut self, prefix: impl Into<String>) -> Self {
        self.cruds_url = Some(prefix.into());
        self
    }

    pub fn url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.url_prefix = prefix.into();
        self
    }

    /// `None` uses `<app>/<model>` as the template base.
    pub fn template_name_base(mut self, base: Option<String>) -> Self {
        self.template_name_base = base;
        self
    }

    pub fn template_father(mut self, father: impl Into<String>) -> Self {
        self.template_father = father.into();
        self
    }

    pub fn template_blocks(mut self, blocks: serde_json::Map<String, serde_json::Value>) -> Self {
        self.template_blocks = blocks;
        self
    }

    pub fn check_login(mut self, on: bool) -> Self {
        self.check_login = on;
        self
    }

    pub fn login_url(mut self, url: impl Into<String>) -> Self {
        self.login_url = url.into();
        self
    }

    pub fn check_perms(mut self, on: bool) -> Self {
        self.check_perms = on;
        self
    }

    pub fn paginate_by(mut self, n: Option<u32>) -> Self {
        self.paginate_by = n;
        self
    }

    pub fn paginate_template(mut self, template: impl Into<String>) -> Self {
        self.paginate_template = template.into();
        self
    }

    pub fn paginate_position(mut self, position: impl Into<String>) -> Self {
        self.paginate_position = position.into();
        self
    }

    pub fn views_available(mut self, ops: Vec<Operation>) -> Self {
        self.views_available = Some(ops);
        self
    }

    pub fn fields(mut self, fields: Vec<String>) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn display_fields(mut self, fields: Vec<String>) -> Self {
        self.display_fields = Some(fields);
        self
    }

    pub fn list_fields(mut self, fields: Vec<String>) -> Self {
        self.list_fields = Some(fields);
        self
    }

    pub fn search_fields(mut self, fields: Vec<String>) -> Self {
        self.search_fields = Some(fields);
        self
    }

    pub fn split_space_search(mut self, split: SplitSearch) -> Self {
        self.split_space_search = split;
        self
    }

    pub fn related_field(mut self, field: impl Into<String>, target: Arc<ModelDescriptor>) -> Self {
        self.related_fields.push((field.into(), target));
        self
    }

    pub fn list_filter(mut self, specs: Vec<FilterSpec>) -> Self {
        self.list_filter = specs;
        self
    }

    pub fn add_form(mut self, form: FormKind) -> Self {
        self.add_form = Some(form);
        self
    }

    pub fn update_form(mut self, form: FormKind) -> Self {
        self.update_form = Some(form);
        self
    }

    pub fn permission(mut self, op: Operation, rule: PermissionRule) -> Self {
        self.perms.push(op, rule);
        self
    }

    pub fn owner_field(mut self, field: impl Into<String>) -> Self {
        self.owner_field = Some(field.into());
        self
    }

    pub fn mode(mut self, mode: ViewMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn inline(mut self, view: Arc<ViewConfig>) -> Self {
        self.inlines.push(view);
        self
    }

    fn check_fields<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<(), ConfigError> {
        for name in names {
            if self.model.get_field(name).is_none() {
                return Err(ConfigError::UnknownField {
                    model: self.model.key(),
                    field: name.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn build(self) -> Result<ViewConfig, ConfigError> {
        let lists = [&self.fields, &self.display_fields, &self.list_fields];
        for list in lists.into_iter().flatten() {
            self.check_fields(list.iter().map(String::as_str))?;
        }
        if let Some(search) = &self.search_fields {
            self.check_fields(search.iter().map(|s| split_lookup(s, Lookup::IContains).0))?;
        }
        self.check_fields(self.related_fields.iter().map(|(f, _)| f.as_str()))?;
        self.check_fields(self.list_filter.iter().map(|s| s.field.as_str()))?;
        self.check_fields(self.owner_field.iter().map(String::as_str))?;

        for form in [&self.add_form, &self.update_form].into_iter().flatten() {
            match form {
                FormKind::Single(spec) => {
                    if let Some(fields) = &spec.fields {
                        self.check_fields(fields.iter().map(String::as_str))?;
                    }
                }
                FormKind::Multi(multi) => {
                    if multi.primary().model.key() != self.model.key() {
                        return Err(ConfigError::Validation(format!(
                            "multi-entity form for {} has primary model {}",
                            self.model.key(),
                            multi.primary().model.key()
                        )));
                    }
                }
            }
        }

        let mut views_available = Vec::new();
        for op in self.views_available.unwrap_or_else(|| Operation::ALL.to_vec()) {
            if !views_available.contains(&op) {
                views_available.push(op);
            }
        }

        let perms = if self.check_perms {
            self.perms.with_model_defaults(&self.model)
        } else {
            self.perms
        };
        let add_form = self.add_form.unwrap_or_default();
        let update_form = self.update_form.unwrap_or_else(|| add_form.clone());

        Ok(ViewConfig {
            model: self.model,
            namespace: self.namespace.filter(|n| !n.is_empty()),
            cruds_url: self.cruds_url.map(|u| u.trim_matches('/').to_string()).filter(|u| !u.is_empty()),
            url_prefix: self.url_prefix,
            template_name_base: self.template_name_base,
            template_father: self.template_father,
            template_blocks: self.template_blocks,
            check_login: self.check_login,
            login_url: self.login_url,
            check_perms: self.check_perms,
            paginate_by: self.paginate_by.filter(|n| *n > 0),
            paginate_template: self.paginate_template,
            paginate_position: self.paginate_position,
            views_available,
            fields: self.fields,
            display_fields: self.display_fields,
            list_fields: self.list_fields,
            search_fields: self.search_fields,
            split_space_search: self.split_space_search,
            related_fields: self.related_fields,
            list_filter: self.list_filter,
            add_form,
            update_form,
            perms,
            owner_field: self.owner_field,
            mode: self.mode,
            inlines: self.inlines,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldInfo, FieldKind};
    use crate::form::FormSpec;

    fn invoice() -> Arc<ModelDescriptor> {
        Arc::new(ModelDescriptor::new("billing", "Invoice").field(FieldInfo::new("number", FieldKind::Text)))
    }

    #[test]
    fn defaults() {
        let v = ViewConfigBuilder::new(invoice()).build().unwrap();
        assert_eq!(v.views_available.len(), 5);
        assert_eq!(v.paginate_by, Some(10));
        assert_eq!(v.base_name(), "cruds");
        assert_eq!(v.perms.rules(Operation::Delete).len(), 1);
        assert!(!v.update_form.is_multi());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = ViewConfigBuilder::new(invoice())
            .search_fields(vec!["number__iexact".into(), "missing".into()])
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownField { field, .. } if field == "missing"));
        assert!(ViewConfigBuilder::new(invoice())
            .add_form(FormKind::Single(FormSpec::fields(vec!["nope".into()])))
            .build()
            .is_err());
    }

    #[test]
    fn null_base_uses_model_path() {
        let v = ViewConfigBuilder::new(invoice())
            .template_name_base(None)
            .cruds_url("/admin/")
            .build()
            .unwrap();
        assert_eq!(v.base_name(), "billing/invoice");
        assert_eq!(v.cruds_url.as_deref(), Some("admin"));
    }
}
