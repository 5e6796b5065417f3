//! Per-view routers: every generated route bound to its operation handler.

use crate::config::Operation;
use crate::extractors::{CurrentUser, FormBody};
use crate::handlers::crud::{build, CrudRequest, OperationHandler, ViewRuntime};
use crate::site::RouteSpec;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::Uri,
    routing::{get, MethodRouter},
    Router,
};
use std::sync::Arc;

fn collection_route(handler: OperationHandler) -> MethodRouter<AppState> {
    let on_get = handler.clone();
    let route = get(move |State(state): State<AppState>, CurrentUser(user): CurrentUser, uri: Uri| {
        let h = on_get.clone();
        async move { h.get(&state, CrudRequest::new(user, &uri, None)).await }
    });
    if handler.operation() != Operation::Create {
        return route;
    }
    route.post(
        move |State(state): State<AppState>, CurrentUser(user): CurrentUser, uri: Uri, FormBody(data): FormBody| {
            let h = handler.clone();
            async move { h.post(&state, CrudRequest::new(user, &uri, None), data).await }
        },
    )
}

fn instance_route(handler: OperationHandler) -> MethodRouter<AppState> {
    let on_get = handler.clone();
    let route = get(
        move |State(state): State<AppState>, CurrentUser(user): CurrentUser, uri: Uri, Path(pk): Path<String>| {
            let h = on_get.clone();
            async move { h.get(&state, CrudRequest::new(user, &uri, Some(pk))).await }
        },
    );
    match handler.operation() {
        Operation::Update => route.post(
            move |State(state): State<AppState>,
                  CurrentUser(user): CurrentUser,
                  uri: Uri,
                  Path(pk): Path<String>,
                  FormBody(data): FormBody| {
                let h = handler.clone();
                async move { h.post(&state, CrudRequest::new(user, &uri, Some(pk)), data).await }
            },
        ),
        // Confirmation posts carry no fields worth reading.
        Operation::Delete => route.post(
            move |State(state): State<AppState>, CurrentUser(user): CurrentUser, uri: Uri, Path(pk): Path<String>| {
                let h = handler.clone();
                async move { h.post(&state, CrudRequest::new(user, &uri, Some(pk)), Default::default()).await }
            },
        ),
        _ => route,
    }
}

/// Router for one view's routes. State is supplied by the site router.
pub fn view_router(runtime: Arc<ViewRuntime>, routes: &[RouteSpec]) -> Router<AppState> {
    routes.iter().fold(Router::new(), |router, spec| {
        let handler = build(spec.op, runtime.clone());
        let method_router = if Operation::INSTANCE.contains(&spec.op) {
            instance_route(handler)
        } else {
            collection_route(handler)
        };
        router.route(&spec.path, method_router)
    })
}
