//! Generated CRUD handlers and their render context.

pub mod context;
pub mod crud;

pub use crud::{build, CrudRequest, OperationHandler, ViewRuntime};
