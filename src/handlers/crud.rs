//! Generated operation handlers. `build` produces one handler per enabled operation of a view;
//! each runs login, scope, permission and then the operation itself.

use crate::auth::Principal;
use crate::config::{Operation, ViewConfig, ViewMode};
use crate::error::AppError;
use crate::filter;
use crate::form::{self, FormKind, FormSpec};
use crate::handlers::context::{base_context, inlines_context, list_entry, operation_url};
use crate::introspect::{self, fields_context, get_fields};
use crate::permission::PermissionResolver;
use crate::query::{ListQuery, Predicate};
use crate::render::{template_candidates, RenderedPage};
use crate::response::{login_redirect, redirect};
use crate::scope::{parse_query, GetParams, Scope};
use crate::search::build_search;
use crate::service::CrudService;
use crate::state::AppState;
use crate::store::{pk_string, Record};
use axum::http::{StatusCode, Uri};
use axum::response::Response;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Per-view state shared by all of its operation handlers.
pub struct ViewRuntime {
    pub view: Arc<ViewConfig>,
    pub resolver: PermissionResolver,
}

impl ViewRuntime {
    pub fn new(view: Arc<ViewConfig>) -> Arc<Self> {
        Arc::new(ViewRuntime {
            resolver: PermissionResolver::new(view.clone()),
            view,
        })
    }
}

/// What the router hands a handler: who is asking, for which path, with which parameters.
#[derive(Clone, Debug, Default)]
pub struct CrudRequest {
    pub user: Option<String>,
    /// Path and query as requested, used as the login `next`.
    pub full_path: String,
    pub query: Vec<(String, String)>,
    pub pk: Option<String>,
}

impl CrudRequest {
    pub fn new(user: Option<String>, uri: &Uri, pk: Option<String>) -> Self {
        CrudRequest {
            user,
            full_path: uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| uri.path().to_string()),
            query: parse_query(uri.query()),
            pk,
        }
    }

    fn param(&self, name: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

#[derive(Clone)]
pub struct OperationHandler {
    op: Operation,
    runtime: Arc<ViewRuntime>,
}

/// Handler for one operation of a view.
pub fn build(op: Operation, runtime: Arc<ViewRuntime>) -> OperationHandler {
    OperationHandler { op, runtime }
}

/// Per-request state after the common prelude.
struct Prepared {
    principal: Principal,
    scope: Scope,
    getparams: GetParams,
    pk: Option<Value>,
    target: Option<Record>,
}

enum Method {
    Get,
    Post(Record),
}

impl OperationHandler {
    pub fn operation(&self) -> Operation {
        self.op
    }

    fn view(&self) -> &ViewConfig {
        &self.runtime.view
    }

    pub async fn get(&self, state: &AppState, req: CrudRequest) -> Result<Response, AppError> {
        self.dispatch(state, req, Method::Get).await
    }

    pub async fn post(&self, state: &AppState, req: CrudRequest, data: Record) -> Result<Response, AppError> {
        self.dispatch(state, req, Method::Post(data)).await
    }

    async fn dispatch(&self, state: &AppState, req: CrudRequest, method: Method) -> Result<Response, AppError> {
        let view = self.view();
        let principal = state.auth.load_principal(req.user.as_deref()).await?;
        if view.check_login && !principal.is_authenticated() {
            return Ok(login_redirect(&view.login_url, &req.full_path));
        }

        let scope = Scope::resolve(view, state.store.as_ref(), &req.query).await?;
        let pk = req.pk.as_deref().map(|raw| introspect::parse_pk(&view.model, raw));
        let target = match (self.op, &pk) {
            (Operation::Update, Some(Ok(pk))) => state.store.get(&view.model, pk).await?,
            _ => None,
        };
        if !self
            .runtime
            .resolver
            .resolve(state.auth.as_ref(), &principal, self.op, target.as_ref())
            .await
        {
            tracing::info!(model = %view.model.key(), operation = %self.op, user = ?principal.id, "forbidden");
            return Err(AppError::Forbidden);
        }

        let mut getparams = GetParams::new();
        getparams.extend(scope.params());
        let mut cx = Prepared {
            principal,
            scope,
            getparams,
            pk: pk.transpose()?,
            target,
        };

        match (self.op, method) {
            (Operation::List, _) => self.list(state, &req, &mut cx).await,
            (Operation::Detail, _) => self.detail(state, &cx).await,
            (Operation::Create, Method::Get) => self.create_form(state, &cx).await,
            (Operation::Create, Method::Post(data)) => self.create(state, &cx, data).await,
            (Operation::Update, Method::Get) => self.update_form(state, &cx).await,
            (Operation::Update, Method::Post(data)) => self.update(state, &cx, data).await,
            (Operation::Delete, Method::Get) => self.delete_confirm(state, &cx).await,
            (Operation::Delete, Method::Post(_)) => self.delete(state, &cx).await,
        }
    }

    fn owner_value(&self, principal: &Principal) -> Option<(String, Value)> {
        let field = self.view().owner_field.as_ref()?;
        let value = match (&principal.id, self.view().model.get_field(field)) {
            (Some(id), Some(info)) => introspect::coerce(info, &Value::String(id.clone()))
                .unwrap_or_else(|_| Value::String(id.clone())),
            (Some(id), None) => Value::String(id.clone()),
            (None, _) => Value::Null,
        };
        Some((field.clone(), value))
    }

    fn owner_predicate(&self, principal: &Principal) -> Option<Predicate> {
        self.owner_value(principal).map(|(field, value)| match value {
            Value::Null => Predicate::Or(Vec::new()),
            v => Predicate::eq(field, v),
        })
    }

    fn visible(&self, cx: &Prepared, record: &Record) -> bool {
        let owned = self
            .owner_predicate(&cx.principal)
            .map(|p| p.matches(record))
            .unwrap_or(true);
        owned && cx.scope.contains(record)
    }

    /// The addressed record, 404 when it is absent or outside the scope or owner filter.
    async fn instance(&self, state: &AppState, cx: &Prepared) -> Result<(Value, Record), AppError> {
        let model = &self.view().model;
        let pk = cx
            .pk
            .clone()
            .ok_or_else(|| AppError::NotFound(format!("{} without key", model.key())))?;
        let record = match &cx.target {
            Some(r) => r.clone(),
            None => CrudService::read(state.store.as_ref(), model, &pk).await?,
        };
        if !self.visible(cx, &record) {
            return Err(AppError::NotFound(format!("{} {}", model.key(), pk_string(&pk))));
        }
        Ok((pk, record))
    }

    /// Fields a single-model form binds: scoped and owner fields are stamped, not submitted.
    fn form_fields(&self, spec: &FormSpec, scope: &Scope) -> Vec<String> {
        let view = self.view();
        let base = spec
            .fields
            .clone()
            .or_else(|| view.fields.clone())
            .unwrap_or_else(|| view.model.editable_fields());
        let scoped = scope.fields();
        base.into_iter()
            .filter(|f| !scoped.contains(f) && view.owner_field.as_ref() != Some(f))
            .filter(|f| view.model.get_field(f).map(|i| !i.primary_key).unwrap_or(false))
            .collect()
    }

    fn context(
        &self,
        state: &AppState,
        cx: &Prepared,
        crud_perms: BTreeMap<&'static str, bool>,
        instance_pk: Option<&str>,
    ) -> Map<String, Value> {
        let view = self.view();
        let mut ctx = base_context(
            view,
            self.op,
            &state.urls,
            &cx.getparams,
            &cx.scope,
            crud_perms,
            instance_pk,
        );
        if let Some(pk) = instance_pk {
            ctx.insert("inlines".into(), inlines_context(view, &state.urls, pk));
        }
        ctx
    }

    fn render(&self, state: &AppState, ctx: Map<String, Value>, status: StatusCode) -> Result<Response, AppError> {
        state.renderer.render(RenderedPage {
            templates: template_candidates(self.view(), self.op),
            context: Value::Object(ctx),
            status,
        })
    }

    fn invalid_status(&self) -> StatusCode {
        match self.view().mode {
            ViewMode::Html => StatusCode::OK,
            ViewMode::Json => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    /// Where a successful write goes: the list, else the saved record's detail, else the root.
    fn success_url(&self, state: &AppState, cx: &Prepared, pk: Option<&str>) -> String {
        let view = self.view();
        let url = operation_url(&state.urls, view, Operation::List, None)
            .or_else(|| pk.and_then(|pk| operation_url(&state.urls, view, Operation::Detail, Some(pk))))
            .unwrap_or_else(|| "/".to_string());
        cx.getparams.append_to(&url)
    }

    fn form_context(&self, form: &FormKind, cx: &Prepared) -> Value {
        match form {
            FormKind::Single(spec) => {
                let names = self.form_fields(spec, &cx.scope);
                fields_context(&get_fields(&self.view().model, Some(&names)))
            }
            FormKind::Multi(multi) => multi.fields_context(),
        }
    }

    async fn list(&self, state: &AppState, req: &CrudRequest, cx: &mut Prepared) -> Result<Response, AppError> {
        let view = self.view();
        let model = &view.model;
        let mut query = ListQuery::new();

        if let Some(owner) = self.owner_predicate(&cx.principal) {
            query = query.filter(owner);
        }
        let q = req.param("q").unwrap_or("").trim().to_string();
        if let Some(fields) = &view.search_fields {
            if let Some(search) = build_search(fields, &q, &view.split_space_search, &cx.scope.fields()) {
                query = query.filter(search);
            }
        }
        if !cx.scope.is_empty() {
            query = query.filter(cx.scope.predicate());
        }
        let scoped = cx.scope.fields();
        let filters = filter::build(model, &view.list_filter, &req.query);
        for f in &filters {
            query = f.apply(query);
            cx.getparams.extend(f.consumed_url_params(&scoped));
        }

        let page = CrudService::list_page(
            state.store.as_ref(),
            model,
            query,
            view.paginate_by,
            req.param("page"),
        )
        .await?;

        let perms = self
            .runtime
            .resolver
            .available(state.auth.as_ref(), &cx.principal, None)
            .await;
        let mut ctx = self.context(state, cx, perms, None);
        let fields = get_fields(model, view.list_fields.as_deref());
        ctx.insert("fields".into(), fields_context(&fields));
        ctx.insert(
            "object_list".into(),
            Value::Array(
                page.records
                    .iter()
                    .map(|r| list_entry(view, &state.urls, &cx.getparams, r))
                    .collect(),
            ),
        );
        ctx.insert("page_obj".into(), json!(page.page));
        ctx.insert("is_paginated".into(), json!(page.page.as_ref().map(|p| p.num_pages > 1).unwrap_or(false)));
        ctx.insert("paginate_template".into(), json!(view.paginate_template));
        ctx.insert("paginate_position".into(), json!(view.paginate_position));
        ctx.insert("filters".into(), Value::Array(filters.iter().map(|f| f.context()).collect()));
        ctx.insert("q".into(), json!(q));
        self.render(state, ctx, StatusCode::OK)
    }

    async fn detail(&self, state: &AppState, cx: &Prepared) -> Result<Response, AppError> {
        let view = self.view();
        let (pk, record) = self.instance(state, cx).await?;
        let pk = pk_string(&pk);
        let perms = self
            .runtime
            .resolver
            .available(state.auth.as_ref(), &cx.principal, Some(&record))
            .await;
        let mut ctx = self.context(state, cx, perms, Some(&pk));
        let fields = get_fields(&view.model, view.display_fields.as_deref());
        ctx.insert("fields".into(), fields_context(&fields));
        ctx.insert("object".into(), Value::Object(record));
        self.render(state, ctx, StatusCode::OK)
    }

    async fn create_form(&self, state: &AppState, cx: &Prepared) -> Result<Response, AppError> {
        let form = self.view().form_for(Operation::Create);
        let perms = self
            .runtime
            .resolver
            .available(state.auth.as_ref(), &cx.principal, None)
            .await;
        let mut ctx = self.context(state, cx, perms, None);
        ctx.insert("fields".into(), self.form_context(form, cx));
        ctx.insert("form".into(), json!({ "data": {}, "errors": {}, "is_valid": false }));
        self.render(state, ctx, StatusCode::OK)
    }

    async fn rerender_invalid(
        &self,
        state: &AppState,
        cx: &Prepared,
        form: &FormKind,
        form_ctx: Value,
        object: Option<(&str, &Record)>,
    ) -> Result<Response, AppError> {
        let perms = self
            .runtime
            .resolver
            .available(state.auth.as_ref(), &cx.principal, object.map(|(_, r)| r))
            .await;
        let mut ctx = self.context(state, cx, perms, object.map(|(pk, _)| pk));
        ctx.insert("fields".into(), self.form_context(form, cx));
        ctx.insert("form".into(), form_ctx);
        if let Some((_, record)) = object {
            ctx.insert("object".into(), Value::Object(record.clone()));
        }
        self.render(state, ctx, self.invalid_status())
    }

    async fn create(&self, state: &AppState, cx: &Prepared, data: Record) -> Result<Response, AppError> {
        let view = self.view();
        let form = view.form_for(Operation::Create);
        let saved_pk = match form {
            FormKind::Single(spec) => {
                let bound = form::bind_model(&view.model, &self.form_fields(spec, &cx.scope), &data);
                if !bound.is_valid() {
                    return self.rerender_invalid(state, cx, form, bound.context(), None).await;
                }
                let mut values = bound.cleaned;
                cx.scope.stamp(&mut values);
                if let Some((field, value)) = self.owner_value(&cx.principal) {
                    values.insert(field, value);
                }
                let row = CrudService::create(state.store.as_ref(), &view.model, &values).await?;
                row.get(&view.model.pk).map(pk_string)
            }
            FormKind::Multi(multi) => {
                let bound = multi.bind(&data);
                if !bound.is_valid() {
                    let ctx = multi_form_context(&data, bound.errors(multi));
                    return self.rerender_invalid(state, cx, form, ctx, None).await;
                }
                Some(multi.save(state.store.as_ref(), &bound, None).await?.pk_string())
            }
        };
        tracing::info!(model = %view.model.key(), pk = ?saved_pk, "created");
        Ok(redirect(&self.success_url(state, cx, saved_pk.as_deref())))
    }

    async fn update_form(&self, state: &AppState, cx: &Prepared) -> Result<Response, AppError> {
        let view = self.view();
        let form = view.form_for(Operation::Update);
        let (pk, record) = self.instance(state, cx).await?;
        let pk_text = pk_string(&pk);
        let initial = match form {
            FormKind::Single(_) => record.clone(),
            FormKind::Multi(multi) => multi.initial(&multi.load(state.store.as_ref(), &pk).await?),
        };
        let perms = self
            .runtime
            .resolver
            .available(state.auth.as_ref(), &cx.principal, Some(&record))
            .await;
        let mut ctx = self.context(state, cx, perms, Some(&pk_text));
        ctx.insert("fields".into(), self.form_context(form, cx));
        ctx.insert("form".into(), json!({ "data": initial, "errors": {}, "is_valid": false }));
        ctx.insert("object".into(), Value::Object(record));
        self.render(state, ctx, StatusCode::OK)
    }

    async fn update(&self, state: &AppState, cx: &Prepared, data: Record) -> Result<Response, AppError> {
        let view = self.view();
        let form = view.form_for(Operation::Update);
        let (pk, record) = self.instance(state, cx).await?;
        let pk_text = pk_string(&pk);
        match form {
            FormKind::Single(spec) => {
                let bound = form::bind_model(&view.model, &self.form_fields(spec, &cx.scope), &data);
                if !bound.is_valid() {
                    return self
                        .rerender_invalid(state, cx, form, bound.context(), Some((pk_text.as_str(), &record)))
                        .await;
                }
                let mut values = bound.cleaned;
                cx.scope.stamp(&mut values);
                CrudService::update(state.store.as_ref(), &view.model, &pk, &values).await?;
            }
            FormKind::Multi(multi) => {
                let existing = multi.load(state.store.as_ref(), &pk).await?;
                let bound = multi.bind(&data);
                if !bound.is_valid() {
                    let ctx = multi_form_context(&data, bound.errors(multi));
                    return self.rerender_invalid(state, cx, form, ctx, Some((pk_text.as_str(), &record))).await;
                }
                multi.save(state.store.as_ref(), &bound, Some(&existing)).await?;
            }
        }
        tracing::info!(model = %view.model.key(), pk = %pk_text, "updated");
        Ok(redirect(&self.success_url(state, cx, Some(&pk_text))))
    }

    async fn delete_confirm(&self, state: &AppState, cx: &Prepared) -> Result<Response, AppError> {
        let view = self.view();
        let (pk, record) = self.instance(state, cx).await?;
        let pk = pk_string(&pk);
        let perms = self
            .runtime
            .resolver
            .available(state.auth.as_ref(), &cx.principal, Some(&record))
            .await;
        let mut ctx = self.context(state, cx, perms, Some(&pk));
        ctx.insert("fields".into(), fields_context(&get_fields(&view.model, None)));
        ctx.insert("object".into(), Value::Object(record));
        self.render(state, ctx, StatusCode::OK)
    }

    async fn delete(&self, state: &AppState, cx: &Prepared) -> Result<Response, AppError> {
        let view = self.view();
        let (pk, _) = self.instance(state, cx).await?;
        CrudService::delete(state.store.as_ref(), &view.model, &pk).await?;
        tracing::info!(model = %view.model.key(), pk = %pk_string(&pk), "deleted");
        Ok(redirect(&self.success_url(state, cx, None)))
    }
}

fn multi_form_context(data: &Record, errors: BTreeMap<String, Vec<String>>) -> Value {
    json!({
        "data": data,
        "errors": errors,
        "is_valid": false,
    })
}
