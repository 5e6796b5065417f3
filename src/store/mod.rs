//! Storage seam: record CRUD, predicate queries and transactions.

mod memory;
mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

use crate::config::ModelDescriptor;
use crate::error::AppError;
use crate::query::{ListQuery, Predicate};
use async_trait::async_trait;
use serde_json::Value;

/// One stored entity as a JSON object keyed by field name.
pub type Record = serde_json::Map<String, Value>;

/// Text form of a primary key value, as used in URLs and query strings.
pub fn pk_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn ping(&self) -> Result<(), AppError>;

    async fn count(&self, model: &ModelDescriptor, predicate: &Predicate) -> Result<u64, AppError>;

    async fn list(&self, model: &ModelDescriptor, query: &ListQuery) -> Result<Vec<Record>, AppError>;

    async fn get(&self, model: &ModelDescriptor, pk: &Value) -> Result<Option<Record>, AppError>;

    /// First record whose `field` equals `value`.
    async fn find_one(&self, model: &ModelDescriptor, field: &str, value: &Value) -> Result<Option<Record>, AppError> {
        let query = ListQuery::new().filter(Predicate::eq(field, value.clone())).window(1, 0);
        Ok(self.list(model, &query).await?.into_iter().next())
    }

    /// Insert one record; returns it with generated values (primary key, defaults).
    async fn insert(&self, model: &ModelDescriptor, values: &Record) -> Result<Record, AppError>;

    /// Update the given fields of one record. `None` when no record has that key.
    async fn update(&self, model: &ModelDescriptor, pk: &Value, values: &Record) -> Result<Option<Record>, AppError>;

    /// Delete one record. Returns the deleted record, or `None` when absent.
    async fn delete(&self, model: &ModelDescriptor, pk: &Value) -> Result<Option<Record>, AppError>;

    /// Start a transaction. Dropping it without `commit` discards every write.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError>;
}

#[async_trait]
pub trait StoreTx: Send {
    async fn insert(&mut self, model: &ModelDescriptor, values: &Record) -> Result<Record, AppError>;

    async fn update(&mut self, model: &ModelDescriptor, pk: &Value, values: &Record) -> Result<Option<Record>, AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;

    async fn rollback(self: Box<Self>) -> Result<(), AppError>;
}
