//! Route assembly: generated CRUD routes and the common service routes.

pub mod common;
pub mod crud;

pub use common::{common_routes, common_routes_with_ready};
pub use crud::view_router;
