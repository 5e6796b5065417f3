//! Redirect helpers shared by the generated handlers.

use axum::{
    http::{header::LOCATION, StatusCode},
    response::{IntoResponse, Response},
};
use url::form_urlencoded;

/// 302 to `url`.
pub fn redirect(url: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, url.to_string())]).into_response()
}

/// 302 to the login page with `next` set to the requested path and query.
pub fn login_redirect(login_url: &str, next: &str) -> Response {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("next", next)
        .finish();
    let sep = if login_url.contains('?') { '&' } else { '?' };
    redirect(&format!("{}{}{}", login_url, sep, query))
}
