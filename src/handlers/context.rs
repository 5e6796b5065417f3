//! Render context shared by every generated page: model meta, URLs, permissions, scope.

use crate::config::{Operation, ViewConfig};
use crate::introspect::crud_url_name;
use crate::scope::{GetParams, Scope};
use crate::site::UrlTable;
use crate::store::{pk_string, Record};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Reverse one operation's URL; `None` when that route is not registered.
pub fn operation_url(urls: &UrlTable, view: &ViewConfig, op: Operation, pk: Option<&str>) -> Option<String> {
    urls.reverse(&crud_url_name(view, op), pk)
}

/// Context keys every page carries.
pub fn base_context(
    view: &ViewConfig,
    op: Operation,
    urls: &UrlTable,
    getparams: &GetParams,
    scope: &Scope,
    crud_perms: BTreeMap<&'static str, bool>,
    instance_pk: Option<&str>,
) -> Map<String, Value> {
    let model = &view.model;
    let mut ctx = Map::new();
    ctx.insert("view_type".into(), json!(op.as_str()));
    ctx.insert(
        "model".into(),
        json!({
            "app_label": model.app_label,
            "model_name": model.model_name(),
            "verbose_name": model.verbose_name,
            "verbose_name_plural": model.verbose_name_plural,
        }),
    );
    ctx.insert("template_father".into(), json!(view.template_father));
    ctx.insert("template_blocks".into(), Value::Object(view.template_blocks.clone()));
    ctx.insert(
        "views_available".into(),
        json!(view.views_available.iter().map(|o| o.as_str()).collect::<Vec<_>>()),
    );
    ctx.insert("crud_perms".into(), json!(crud_perms));

    let mut links = Map::new();
    for action in Operation::COLLECTION {
        let url = operation_url(urls, view, action, None);
        links.insert(action.as_str().into(), json!(url.as_deref().map(|u| getparams.append_to(u))));
        ctx.insert(format!("url_{}", action.as_str()), json!(url));
    }
    if let Some(pk) = instance_pk {
        for action in Operation::INSTANCE {
            let url = operation_url(urls, view, action, Some(pk));
            links.insert(action.as_str().into(), json!(url.as_deref().map(|u| getparams.append_to(u))));
            ctx.insert(format!("url_{}", action.as_str()), json!(url));
        }
    }
    ctx.insert("links".into(), Value::Object(links));
    ctx.insert("getparams".into(), json!(getparams.template_prefix()));
    ctx.insert("related_fields".into(), json!(view.related_field_names()));
    ctx.insert("context_rel".into(), scope.context());
    ctx.insert(
        "search".into(),
        match &view.search_fields {
            Some(fields) if !fields.is_empty() => json!(fields),
            _ => Value::Bool(false),
        },
    );
    ctx
}

/// One list row: the record with its pk and per-row links (scope and filters preserved).
pub fn list_entry(view: &ViewConfig, urls: &UrlTable, getparams: &GetParams, record: &Record) -> Value {
    let pk = record.get(&view.model.pk).map(pk_string).unwrap_or_default();
    let mut links = Map::new();
    for action in Operation::INSTANCE {
        let url = operation_url(urls, view, action, Some(&pk)).map(|u| getparams.append_to(&u));
        links.insert(action.as_str().into(), json!(url));
    }
    json!({
        "pk": pk,
        "object": record,
        "links": links,
    })
}

/// Nested views listed on a parent instance page, each linked through its scoping field.
pub fn inlines_context(view: &ViewConfig, urls: &UrlTable, parent_pk: &str) -> Value {
    let parent_key = view.model.key();
    let entries: Vec<Value> = view
        .inlines
        .iter()
        .map(|inline| {
            let field = inline
                .related_fields
                .iter()
                .find(|(_, target)| target.key() == parent_key)
                .map(|(f, _)| f.clone());
            let url_list = operation_url(urls, inline, Operation::List, None).map(|u| match &field {
                Some(f) => {
                    let mut g = GetParams::new();
                    g.extend(vec![url::form_urlencoded::Serializer::new(String::new())
                        .append_pair(f, parent_pk)
                        .finish()]);
                    g.append_to(&u)
                }
                None => u,
            });
            json!({
                "model_name": inline.model.model_name(),
                "verbose_name_plural": inline.model.verbose_name_plural,
                "field": field,
                "url_list": url_list,
            })
        })
        .collect();
    Value::Array(entries)
}
