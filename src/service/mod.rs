//! CrudService: list/create/update/delete over a `Store`, plus field validation.

mod crud;
mod validation;
pub use crud::{CrudService, ListPage};
pub use validation::{FieldErrors, RequestValidator};
