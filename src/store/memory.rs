//! In-process store: tables of JSON records behind a lock. Transactions stage writes and apply them
//! to a copy of the tables on commit, so a failing write leaves nothing behind.

use crate::config::{ModelDescriptor, PkType};
use crate::error::AppError;
use crate::query::{compare, ListQuery, Predicate};
use crate::store::{pk_string, Record, Store, StoreTx};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

#[derive(Clone, Default)]
struct Tables {
    rows: HashMap<String, BTreeMap<String, Record>>,
    sequences: HashMap<String, i64>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

fn poisoned<T>(_: T) -> AppError {
    AppError::Internal("memory store lock poisoned".into())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records of `model`.
    pub fn len(&self, model: &ModelDescriptor) -> usize {
        self.tables
            .read()
            .map(|t| t.rows.get(&model.key()).map(BTreeMap::len).unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, model: &ModelDescriptor) -> bool {
        self.len(model) == 0
    }
}

impl Tables {
    /// Normalize to declared fields, assign a primary key when missing, check NOT NULL columns.
    fn prepare_insert(&mut self, model: &ModelDescriptor, values: &Record) -> Result<Record, AppError> {
        let mut record = Record::new();
        for f in &model.fields {
            record.insert(f.name.clone(), values.get(&f.name).cloned().unwrap_or(Value::Null));
        }
        let key = model.key();
        let seq = self.sequences.entry(key).or_insert(0);
        match record.get(&model.pk).cloned() {
            Some(Value::Null) | None => {
                let pk = match model.pk_type {
                    PkType::BigInt | PkType::Int => {
                        *seq += 1;
                        Value::from(*seq)
                    }
                    PkType::Uuid => Value::String(uuid::Uuid::new_v4().to_string()),
                    PkType::Text => {
                        return Err(AppError::Constraint(format!("{} requires a primary key", model.key())))
                    }
                };
                record.insert(model.pk.clone(), pk);
            }
            Some(v) => {
                if let Some(n) = v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())) {
                    if matches!(model.pk_type, PkType::BigInt | PkType::Int) {
                        *seq = (*seq).max(n);
                        record.insert(model.pk.clone(), Value::from(n));
                    }
                }
            }
        }
        check_not_null(model, &record)?;
        Ok(record)
    }

    fn put_new(&mut self, model: &ModelDescriptor, record: Record) -> Result<Record, AppError> {
        let pk = record.get(&model.pk).map(pk_string).unwrap_or_default();
        let table = self.rows.entry(model.key()).or_default();
        if table.contains_key(&pk) {
            return Err(AppError::Constraint(format!("duplicate key {} for {}", pk, model.key())));
        }
        table.insert(pk, record.clone());
        Ok(record)
    }

    fn merged_update(&self, model: &ModelDescriptor, pk: &Value, values: &Record) -> Result<Option<Record>, AppError> {
        let Some(existing) = self.rows.get(&model.key()).and_then(|t| t.get(&pk_string(pk))) else {
            return Ok(None);
        };
        let mut record = existing.clone();
        for f in &model.fields {
            if f.primary_key {
                continue;
            }
            if let Some(v) = values.get(&f.name) {
                record.insert(f.name.clone(), v.clone());
            }
        }
        check_not_null(model, &record)?;
        Ok(Some(record))
    }

    fn put_existing(&mut self, model: &ModelDescriptor, pk: &Value, record: Record) {
        self.rows.entry(model.key()).or_default().insert(pk_string(pk), record);
    }
}

fn check_not_null(model: &ModelDescriptor, record: &Record) -> Result<(), AppError> {
    for f in &model.fields {
        if f.nullable || f.has_default || f.primary_key {
            continue;
        }
        if record.get(&f.name).map(Value::is_null).unwrap_or(true) {
            return Err(AppError::Constraint(format!(
                "null value in column \"{}\" of {}",
                f.name,
                model.key()
            )));
        }
    }
    Ok(())
}

fn sort_records(model: &ModelDescriptor, rows: &mut [Record], order_by: &[String]) {
    let default_order = [model.pk.clone()];
    let order: &[String] = if order_by.is_empty() { &default_order } else { order_by };
    rows.sort_by(|a, b| {
        for key in order {
            let (field, desc) = match key.strip_prefix('-') {
                Some(f) => (f, true),
                None => (key.as_str(), false),
            };
            let av = a.get(field).unwrap_or(&Value::Null);
            let bv = b.get(field).unwrap_or(&Value::Null);
            let ord = compare(av, bv).unwrap_or(Ordering::Equal);
            let ord = if desc { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn count(&self, model: &ModelDescriptor, predicate: &Predicate) -> Result<u64, AppError> {
        let tables = self.tables.read().map_err(poisoned)?;
        let n = tables
            .rows
            .get(&model.key())
            .map(|t| t.values().filter(|r| predicate.matches(r)).count())
            .unwrap_or(0);
        Ok(n as u64)
    }

    async fn list(&self, model: &ModelDescriptor, query: &ListQuery) -> Result<Vec<Record>, AppError> {
        let tables = self.tables.read().map_err(poisoned)?;
        let mut rows: Vec<Record> = tables
            .rows
            .get(&model.key())
            .map(|t| t.values().filter(|r| query.predicate.matches(r)).cloned().collect())
            .unwrap_or_default();
        sort_records(model, &mut rows, &query.order_by);
        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map(|n| n as usize).unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn get(&self, model: &ModelDescriptor, pk: &Value) -> Result<Option<Record>, AppError> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables
            .rows
            .get(&model.key())
            .and_then(|t| t.get(&pk_string(pk)))
            .cloned())
    }

    async fn insert(&self, model: &ModelDescriptor, values: &Record) -> Result<Record, AppError> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        let record = tables.prepare_insert(model, values)?;
        tables.put_new(model, record)
    }

    async fn update(&self, model: &ModelDescriptor, pk: &Value, values: &Record) -> Result<Option<Record>, AppError> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        let Some(record) = tables.merged_update(model, pk, values)? else {
            return Ok(None);
        };
        tables.put_existing(model, pk, record.clone());
        Ok(Some(record))
    }

    async fn delete(&self, model: &ModelDescriptor, pk: &Value) -> Result<Option<Record>, AppError> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        Ok(tables
            .rows
            .get_mut(&model.key())
            .and_then(|t| t.remove(&pk_string(pk))))
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError> {
        Ok(Box::new(MemoryTx {
            tables: self.tables.clone(),
            staged: Vec::new(),
        }))
    }
}

enum Staged {
    Insert(ModelDescriptor, Record),
    Update(ModelDescriptor, Value, Record),
}

struct MemoryTx {
    tables: Arc<RwLock<Tables>>,
    staged: Vec<Staged>,
}

impl MemoryTx {
    /// Committed tables with this transaction's writes applied.
    fn snapshot(&self) -> Result<Tables, AppError> {
        let tables = self.tables.read().map_err(poisoned)?;
        apply_staged(&tables, &self.staged)
    }
}

fn apply_staged(base: &Tables, staged: &[Staged]) -> Result<Tables, AppError> {
    let mut view = base.clone();
    for op in staged {
        match op {
            Staged::Insert(model, record) => {
                view.put_new(model, record.clone())?;
            }
            Staged::Update(model, pk, values) => {
                if let Some(record) = view.merged_update(model, pk, values)? {
                    view.put_existing(model, pk, record);
                }
            }
        }
    }
    Ok(view)
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn insert(&mut self, model: &ModelDescriptor, values: &Record) -> Result<Record, AppError> {
        let record = {
            let mut tables = self.tables.write().map_err(poisoned)?;
            tables.prepare_insert(model, values)?
        };
        self.staged.push(Staged::Insert(model.clone(), record.clone()));
        Ok(record)
    }

    async fn update(&mut self, model: &ModelDescriptor, pk: &Value, values: &Record) -> Result<Option<Record>, AppError> {
        let view = self.snapshot()?;
        let merged = view.merged_update(model, pk, values)?;
        if merged.is_some() {
            self.staged.push(Staged::Update(model.clone(), pk.clone(), values.clone()));
        }
        Ok(merged)
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        let view = apply_staged(&tables, &self.staged)?;
        let sequences = std::mem::take(&mut tables.sequences);
        *tables = Tables { sequences, ..view };
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldInfo, FieldKind};
    use serde_json::json;

    fn customer() -> ModelDescriptor {
        ModelDescriptor::new("crm", "Customer")
            .field(FieldInfo::new("name", FieldKind::Text).required())
            .field(FieldInfo::new("email", FieldKind::Text))
    }

    fn rec(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn poisoned_lock_is_an_internal_error() {
        let store = MemoryStore::new();
        let tables = store.tables.clone();
        let _ = std::thread::spawn(move || {
            let _guard = tables.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();
        let err = store.get(&customer(), &json!(1)).await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        assert_eq!(err.status_and_code().0, axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn insert_assigns_sequential_keys_and_lists_in_pk_order() {
        let store = MemoryStore::new();
        let m = customer();
        for i in 0..11 {
            store.insert(&m, &rec(json!({ "name": format!("c{}", i) }))).await.unwrap();
        }
        let rows = store.list(&m, &ListQuery::new().window(3, 8)).await.unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![9, 10, 11]);
    }

    #[tokio::test]
    async fn not_null_columns_are_enforced() {
        let store = MemoryStore::new();
        let err = store.insert(&customer(), &rec(json!({ "email": "x@y" }))).await.unwrap_err();
        assert!(matches!(err, AppError::Constraint(_)));
    }

    #[tokio::test]
    async fn failed_commit_applies_nothing() {
        let store = MemoryStore::new();
        let m = customer();
        let first = store.insert(&m, &rec(json!({ "name": "a" }))).await.unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.update(&m, &first["id"], &rec(json!({ "name": "changed" }))).await.unwrap();
        tx.insert(&m, &rec(json!({ "name": "b" }))).await.unwrap();
        // Same key as an existing row: the commit must fail as a whole.
        tx.insert(&m, &rec(json!({ "id": 1, "name": "dup" }))).await.unwrap();
        assert!(tx.commit().await.is_err());
        assert_eq!(store.len(&m), 1);
        let row = store.get(&m, &json!(1)).await.unwrap().unwrap();
        assert_eq!(row["name"], json!("a"));
    }

    #[tokio::test]
    async fn committed_transaction_is_visible() {
        let store = MemoryStore::new();
        let m = customer();
        let mut tx = store.begin().await.unwrap();
        let created = tx.insert(&m, &rec(json!({ "name": "a" }))).await.unwrap();
        let updated = tx.update(&m, &created["id"], &rec(json!({ "email": "a@b" }))).await.unwrap();
        assert_eq!(updated.unwrap()["email"], json!("a@b"));
        assert!(store.is_empty(&m));
        tx.commit().await.unwrap();
        assert_eq!(store.len(&m), 1);
    }
}
