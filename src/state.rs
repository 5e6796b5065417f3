//! Shared application state for all routes.

use crate::auth::AuthBackend;
use crate::render::Renderer;
use crate::site::UrlTable;
use crate::store::Store;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub auth: Arc<dyn AuthBackend>,
    pub renderer: Arc<dyn Renderer>,
    /// Every registered URL name, for reverse lookups while rendering.
    pub urls: Arc<UrlTable>,
}
