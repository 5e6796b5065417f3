//! Service routes mounted beside the CRUD views: liveness, store readiness, build and site info.

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum Status {
    Ok,
    Degraded,
}

#[derive(Serialize)]
struct Probe {
    status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    store: Option<&'static str>,
}

#[derive(Serialize)]
struct BuildInfo {
    name: &'static str,
    version: &'static str,
}

fn build_info() -> BuildInfo {
    BuildInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    }
}

/// Build info plus every URL name the site can reverse.
#[derive(Serialize)]
struct SiteInfo {
    #[serde(flatten)]
    build: BuildInfo,
    url_names: Vec<String>,
}

async fn health() -> Json<Probe> {
    Json(Probe {
        status: Status::Ok,
        store: None,
    })
}

async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Probe>) {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(Probe {
                status: Status::Ok,
                store: Some("ok"),
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "store ping failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(Probe {
                    status: Status::Degraded,
                    store: Some("unavailable"),
                }),
            )
        }
    }
}

async fn version() -> Json<BuildInfo> {
    Json(build_info())
}

async fn site_info(State(state): State<AppState>) -> Json<SiteInfo> {
    Json(SiteInfo {
        build: build_info(),
        url_names: state.urls.names().into_iter().map(str::to_string).collect(),
    })
}

/// GET /health and GET /version, without a store.
pub fn common_routes() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
}

/// [`common_routes`] plus GET /ready (store ping) and GET /info (registered URL names).
pub fn common_routes_with_ready(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/version", get(version))
        .route("/info", get(site_info))
        .with_state(state)
}
