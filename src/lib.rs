//! Cruds SDK: configuration-driven CRUD views (list, create, detail, update, delete) for
//! data models, with permissions, search, list filters, related-field scoping and
//! multi-entity forms.

pub mod auth;
pub mod case;
pub mod config;
pub mod error;
pub mod extractors;
pub mod filter;
pub mod form;
pub mod handlers;
pub mod introspect;
pub mod migration;
pub mod paginate;
pub mod permission;
pub mod query;
pub mod render;
pub mod response;
pub mod routes;
pub mod scope;
pub mod search;
pub mod service;
pub mod site;
pub mod sql;
pub mod state;
pub mod store;

pub use auth::{ensure_auth_tables, ensure_database_exists, AuthBackend, MemoryAuthBackend, PgAuthBackend, Principal};
pub use config::{
    load_from_path, resolve, FieldInfo, FieldKind, FullConfig, ModelDescriptor, ModelRegistry, Operation,
    SplitSearch, ViewConfig, ViewConfigBuilder, ViewMode,
};
pub use error::{AppError, ConfigError};
pub use filter::{FilterKind, FilterSpec};
pub use form::{FormKind, FormRole, FormSpec, MultiEntityForm};
pub use migration::apply_migrations;
pub use permission::{PermissionResolver, PermissionRule};
pub use render::{JsonRenderer, RenderedPage, Renderer};
pub use routes::{common_routes, common_routes_with_ready};
pub use service::CrudService;
pub use site::{CrudSite, CrudSiteBuilder, UrlTable};
pub use state::AppState;
pub use store::{MemoryStore, PgStore, Record, Store};
