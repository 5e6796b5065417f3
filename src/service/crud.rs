//! Generic CRUD execution against any `Store`.

use crate::config::ModelDescriptor;
use crate::error::AppError;
use crate::paginate::{Page, Paginator};
use crate::query::ListQuery;
use crate::store::{pk_string, Record, Store};
use serde_json::Value;

/// One page of a list plus the page metadata (absent when pagination is off).
#[derive(Clone, Debug)]
pub struct ListPage {
    pub records: Vec<Record>,
    pub page: Option<Page>,
}

pub struct CrudService;

impl CrudService {
    /// Count, pick the requested page, then fetch it. Without `paginate_by` every match is returned.
    pub async fn list_page(
        store: &dyn Store,
        model: &ModelDescriptor,
        query: ListQuery,
        paginate_by: Option<u32>,
        page_param: Option<&str>,
    ) -> Result<ListPage, AppError> {
        let Some(per_page) = paginate_by else {
            let records = store.list(model, &query).await?;
            return Ok(ListPage { records, page: None });
        };
        let count = store.count(model, &query.predicate).await?;
        let page = Paginator::new(count, per_page).page(page_param)?;
        let query = query.window(per_page, page.offset());
        let records = store.list(model, &query).await?;
        tracing::debug!(model = %model.key(), count, page = page.number, "list page");
        Ok(ListPage {
            records,
            page: Some(page),
        })
    }

    /// Fetch one record by primary key; 404 when absent.
    pub async fn read(store: &dyn Store, model: &ModelDescriptor, pk: &Value) -> Result<Record, AppError> {
        store
            .get(model, pk)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {}", model.key(), pk_string(pk))))
    }

    pub async fn create(store: &dyn Store, model: &ModelDescriptor, values: &Record) -> Result<Record, AppError> {
        let row = store.insert(model, values).await?;
        tracing::debug!(model = %model.key(), pk = %row.get(&model.pk).map(pk_string).unwrap_or_default(), "created");
        Ok(row)
    }

    pub async fn update(
        store: &dyn Store,
        model: &ModelDescriptor,
        pk: &Value,
        values: &Record,
    ) -> Result<Record, AppError> {
        let row = store
            .update(model, pk, values)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {}", model.key(), pk_string(pk))))?;
        tracing::debug!(model = %model.key(), pk = %pk_string(pk), "updated");
        Ok(row)
    }

    pub async fn delete(store: &dyn Store, model: &ModelDescriptor, pk: &Value) -> Result<Record, AppError> {
        let row = store
            .delete(model, pk)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {}", model.key(), pk_string(pk))))?;
        tracing::debug!(model = %model.key(), pk = %pk_string(pk), "deleted");
        Ok(row)
    }
}
