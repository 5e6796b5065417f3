//! Submitted form data: urlencoded bodies or JSON objects, read into one record.

use crate::error::AppError;
use crate::store::Record;
use async_trait::async_trait;
use axum::{
    extract::{FromRequest, Request},
    http::header::CONTENT_TYPE,
    Form, Json,
};
use serde_json::Value;

#[derive(Clone, Debug, Default)]
pub struct FormBody(pub Record);

#[async_trait]
impl<S> FromRequest<S> for FormBody
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("application/json"))
            .unwrap_or(false);
        if is_json {
            let Json(value) = Json::<Value>::from_request(req, state)
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            match value {
                Value::Object(map) => Ok(FormBody(map)),
                _ => Err(AppError::BadRequest("body must be a JSON object".into())),
            }
        } else {
            let Form(pairs) = Form::<Vec<(String, String)>>::from_request(req, state)
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            Ok(FormBody(
                pairs.into_iter().map(|(k, v)| (k, Value::String(v))).collect(),
            ))
        }
    }
}
