//! PostgreSQL store: predicates compiled by `sql::builder`, rows decoded to JSON records.

use super::{Record, Store, StoreTx};
use crate::config::ModelDescriptor;
use crate::error::AppError;
use crate::query::{ListQuery, Predicate};
use crate::sql::{self, bind_all, QueryBuf};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{PgConnection, Postgres, Transaction};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Constraint violations become 409s; everything else stays a database error.
fn map_db_error(e: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db) = &e {
        let code = db.code().map(|c| c.to_string()).unwrap_or_default();
        if code.starts_with("23") {
            return AppError::Constraint(db.message().to_string());
        }
    }
    AppError::Db(e)
}

async fn fetch_one_conn(conn: &mut PgConnection, q: &QueryBuf) -> Result<Option<Record>, AppError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
    let row = bind_all(sqlx::query(&q.sql), &q.params)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error)?;
    Ok(row.map(|r| row_to_record(&r)))
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn count(&self, model: &ModelDescriptor, predicate: &Predicate) -> Result<u64, AppError> {
        let q = sql::count(model, predicate);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let n: i64 = bind_all(sqlx::query(&q.sql), &q.params)
            .fetch_one(&self.pool)
            .await
            .and_then(|row| sqlx::Row::try_get(&row, 0))?;
        Ok(n.max(0) as u64)
    }

    async fn list(&self, model: &ModelDescriptor, query: &ListQuery) -> Result<Vec<Record>, AppError> {
        let q = sql::select_list(model, query);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let rows = bind_all(sqlx::query(&q.sql), &q.params).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn get(&self, model: &ModelDescriptor, pk: &Value) -> Result<Option<Record>, AppError> {
        let q = sql::select_by_id(model, pk);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let row = bind_all(sqlx::query(&q.sql), &q.params)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_record(&r)))
    }

    async fn insert(&self, model: &ModelDescriptor, values: &Record) -> Result<Record, AppError> {
        let mut conn = self.pool.acquire().await?;
        fetch_one_conn(&mut conn, &sql::insert(model, values))
            .await?
            .ok_or_else(|| AppError::Constraint(format!("insert into {} returned no row", model.key())))
    }

    async fn update(&self, model: &ModelDescriptor, pk: &Value, values: &Record) -> Result<Option<Record>, AppError> {
        let mut conn = self.pool.acquire().await?;
        fetch_one_conn(&mut conn, &sql::update(model, pk, values)).await
    }

    async fn delete(&self, model: &ModelDescriptor, pk: &Value) -> Result<Option<Record>, AppError> {
        let mut conn = self.pool.acquire().await?;
        fetch_one_conn(&mut conn, &sql::delete(model, pk)).await
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn insert(&mut self, model: &ModelDescriptor, values: &Record) -> Result<Record, AppError> {
        fetch_one_conn(&mut self.tx, &sql::insert(model, values))
            .await?
            .ok_or_else(|| AppError::Constraint(format!("insert into {} returned no row", model.key())))
    }

    async fn update(&mut self, model: &ModelDescriptor, pk: &Value, values: &Record) -> Result<Option<Record>, AppError> {
        fetch_one_conn(&mut self.tx, &sql::update(model, pk, values)).await
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await.map_err(map_db_error)
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn row_to_record(row: &PgRow) -> Record {
    use sqlx::Column;
    use sqlx::Row;
    let mut map = Record::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    map
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<serde_json::Value>, _>(name) {
        return j;
    }
    Value::Null
}
