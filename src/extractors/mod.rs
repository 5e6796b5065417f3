//! Request extractors.

pub mod form;
pub mod principal;

pub use form::FormBody;
pub use principal::{CurrentUser, USER_ID_HEADER};
