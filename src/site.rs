//! Routing façade: registers views, names their URLs and assembles one axum router.

use crate::auth::AuthBackend;
use crate::config::{Operation, ViewConfig, ViewMode};
use crate::error::ConfigError;
use crate::handlers::crud::ViewRuntime;
use crate::introspect::crud_url_name;
use crate::render::{JsonRenderer, Renderer};
use crate::routes::{common_routes_with_ready, crud::view_router};
use crate::state::AppState;
use crate::store::Store;
use axum::Router;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use url::Url;

/// Default cap on submitted form bodies.
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

const PK_SEGMENT: &str = ":pk";

/// Percent-encode `raw` as one path segment (space as `%20`, `/` as `%2F`).
fn path_segment(raw: &str) -> Option<String> {
    let mut url = Url::parse("http://localhost/").ok()?;
    url.path_segments_mut().ok()?.clear().push(raw);
    Some(url.path().trim_start_matches('/').to_string())
}

/// URL name to path pattern, for reversing generated routes.
#[derive(Clone, Debug, Default)]
pub struct UrlTable {
    names: HashMap<String, String>,
}

impl UrlTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a name. The first registration of a name wins; returns whether this one did.
    pub fn insert(&mut self, name: impl Into<String>, pattern: impl Into<String>) -> bool {
        let name = name.into();
        if self.names.contains_key(&name) {
            tracing::debug!(name = %name, "url name already registered, keeping first");
            return false;
        }
        self.names.insert(name, pattern.into());
        true
    }

    /// Path for `name`. Patterns with a pk segment need `pk`; without one they resolve to `None`.
    pub fn reverse(&self, name: &str, pk: Option<&str>) -> Option<String> {
        let pattern = self.names.get(name)?;
        if !pattern.contains(PK_SEGMENT) {
            return Some(pattern.clone());
        }
        Some(pattern.replace(PK_SEGMENT, &path_segment(pk?)?))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.names.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One generated route of a view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteSpec {
    pub op: Operation,
    pub name: String,
    pub path: String,
}

fn base_path(view: &ViewConfig, prefix: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    let prefix = prefix.trim_matches('/');
    if !prefix.is_empty() {
        parts.push(prefix.to_string());
    }
    if let Some(url) = view.cruds_url.as_deref().filter(|u| !u.is_empty()) {
        parts.push(url.to_string());
    }
    parts.push(view.model.app_label.clone());
    let suffix = match view.mode {
        ViewMode::Html => "",
        ViewMode::Json => "_json",
    };
    parts.push(format!("{}{}", view.model.model_name(), suffix));
    format!("/{}", parts.join("/"))
}

/// Routes for every operation the view exposes in its mode, under `prefix`.
pub fn view_routes(view: &ViewConfig, prefix: &str) -> Vec<RouteSpec> {
    let base = base_path(view, prefix);
    view.routed_operations()
        .into_iter()
        .map(|op| {
            let path = match op {
                Operation::List => format!("{}/list", base),
                Operation::Create => format!("{}/create", base),
                Operation::Detail => format!("{}/{}", base, PK_SEGMENT),
                Operation::Update => format!("{}/{}/update", base, PK_SEGMENT),
                Operation::Delete => format!("{}/{}/delete", base, PK_SEGMENT),
            };
            RouteSpec {
                op,
                name: crud_url_name(view, op),
                path,
            }
        })
        .collect()
}

struct Mount {
    runtime: Arc<ViewRuntime>,
    routes: Vec<RouteSpec>,
}

/// Registered views plus the shared state their handlers run against.
pub struct CrudSite {
    state: AppState,
    mounts: Vec<Mount>,
    body_limit: usize,
}

pub struct CrudSiteBuilder {
    store: Arc<dyn Store>,
    auth: Arc<dyn AuthBackend>,
    renderer: Arc<dyn Renderer>,
    views: Vec<Arc<ViewConfig>>,
    body_limit: usize,
}

impl CrudSite {
    pub fn builder(store: Arc<dyn Store>, auth: Arc<dyn AuthBackend>) -> CrudSiteBuilder {
        CrudSiteBuilder {
            store,
            auth,
            renderer: Arc::new(JsonRenderer),
            views: Vec::new(),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn reverse(&self, name: &str, pk: Option<&str>) -> Option<String> {
        self.state.urls.reverse(name, pk)
    }

    /// Every generated route, in registration order.
    pub fn routes(&self) -> Vec<&RouteSpec> {
        self.mounts.iter().flat_map(|m| m.routes.iter()).collect()
    }

    /// View routes plus health/readiness/version, with request tracing and a body size limit.
    pub fn router(&self) -> Router {
        let mut views: Router<AppState> = Router::new();
        for mount in &self.mounts {
            views = views.merge(view_router(mount.runtime.clone(), &mount.routes));
        }
        views
            .with_state(self.state.clone())
            .merge(common_routes_with_ready(self.state.clone()))
            .layer(RequestBodyLimitLayer::new(self.body_limit))
            .layer(TraceLayer::new_for_http())
    }
}

impl CrudSiteBuilder {
    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }

    pub fn register(mut self, view: Arc<ViewConfig>) -> Self {
        self.views.push(view);
        self
    }

    pub fn register_all(mut self, views: impl IntoIterator<Item = Arc<ViewConfig>>) -> Self {
        self.views.extend(views);
        self
    }

    /// Compute every route and URL name. Two views generating the same path is an error.
    pub fn build(self) -> Result<CrudSite, ConfigError> {
        let mut urls = UrlTable::new();
        let mut paths = HashSet::new();
        let mut mounts = Vec::new();
        for view in &self.views {
            mount_view(view, "", &mut urls, &mut paths, &mut mounts)?;
        }
        tracing::info!(views = mounts.len(), urls = urls.len(), "crud site built");
        Ok(CrudSite {
            state: AppState {
                store: self.store,
                auth: self.auth,
                renderer: self.renderer,
                urls: Arc::new(urls),
            },
            mounts,
            body_limit: self.body_limit,
        })
    }
}

fn mount_view(
    view: &Arc<ViewConfig>,
    prefix: &str,
    urls: &mut UrlTable,
    paths: &mut HashSet<String>,
    mounts: &mut Vec<Mount>,
) -> Result<(), ConfigError> {
    let routes = view_routes(view, prefix);
    for route in &routes {
        if !paths.insert(route.path.clone()) {
            return Err(ConfigError::DuplicateRoute(route.path.clone()));
        }
        urls.insert(route.name.clone(), route.path.clone());
    }
    tracing::debug!(model = %view.model.key(), routes = routes.len(), "view mounted");
    mounts.push(Mount {
        runtime: ViewRuntime::new(view.clone()),
        routes,
    });
    let inline_prefix = format!("{}inline/", prefix);
    for inline in &view.inlines {
        mount_view(inline, &inline_prefix, urls, paths, mounts)?;
    }
    Ok(())
}
