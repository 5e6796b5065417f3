//! Template rendering seam. The crate ships a JSON renderer; HTML engines plug in through `Renderer`.

use crate::config::{Operation, ViewConfig, ViewMode};
use crate::error::AppError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

/// What a handler hands to the renderer: ordered template candidates and the context.
#[derive(Clone, Debug)]
pub struct RenderedPage {
    pub templates: Vec<String>,
    pub context: Value,
    pub status: StatusCode,
}

pub trait Renderer: Send + Sync {
    fn render(&self, page: RenderedPage) -> Result<Response, AppError>;
}

/// Responds with `{template, templates, context}`: the first candidate is the chosen template.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render(&self, page: RenderedPage) -> Result<Response, AppError> {
        let template = page
            .templates
            .first()
            .cloned()
            .ok_or_else(|| AppError::Render("no template candidates".into()))?;
        let body = json!({
            "template": template,
            "templates": page.templates,
            "context": page.context,
        });
        Ok((page.status, Json(body)).into_response())
    }
}

/// `<app>/<model>/<base>/<op>.html`, then `<base>/<op>.html`. JSON views use `<op>_json.html`.
pub fn template_candidates(view: &ViewConfig, op: Operation) -> Vec<String> {
    let file = match view.mode {
        ViewMode::Html => format!("{}.html", op.as_str()),
        ViewMode::Json => format!("{}_json.html", op.as_str()),
    };
    let base = view.base_name();
    vec![
        format!("{}/{}/{}/{}", view.model.app_label, view.model.model_name(), base, file),
        format!("{}/{}", base, file),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelDescriptor, ViewConfigBuilder};
    use std::sync::Arc;

    fn invoice() -> Arc<ModelDescriptor> {
        Arc::new(ModelDescriptor::new("billing", "Invoice"))
    }

    #[test]
    fn candidates_follow_base_name() {
        let v = ViewConfigBuilder::new(invoice()).build().unwrap();
        assert_eq!(
            template_candidates(&v, Operation::List),
            vec!["billing/invoice/cruds/list.html", "cruds/list.html"]
        );
        let v = ViewConfigBuilder::new(invoice()).mode(ViewMode::Json).build().unwrap();
        assert_eq!(template_candidates(&v, Operation::Update)[1], "cruds/update_json.html");
    }

    #[test]
    fn json_renderer_picks_first_candidate() {
        let page = RenderedPage {
            templates: vec!["a.html".into(), "b.html".into()],
            context: json!({ "x": 1 }),
            status: StatusCode::OK,
        };
        let resp = JsonRenderer.render(page).unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let empty = RenderedPage {
            templates: vec![],
            context: Value::Null,
            status: StatusCode::OK,
        };
        assert!(matches!(JsonRenderer.render(empty), Err(AppError::Render(_))));
    }
}
