//! DDL for registered models: schemas, tables, then foreign keys once every table exists.

use crate::config::{FieldInfo, FieldKind, ModelDescriptor, ModelRegistry};
use crate::error::AppError;
use sqlx::PgPool;
use std::collections::BTreeSet;

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn full_table(model: &ModelDescriptor) -> String {
    format!("{}.{}", quote(&model.schema_name), quote(&model.table_name))
}

fn column_type(field: &FieldInfo, registry: &ModelRegistry) -> String {
    match &field.kind {
        FieldKind::Text | FieldKind::Choice(_) => "TEXT".into(),
        FieldKind::Integer if field.primary_key && field.has_default => "SERIAL".into(),
        FieldKind::Integer => "INTEGER".into(),
        FieldKind::BigInt if field.primary_key && field.has_default => "BIGSERIAL".into(),
        FieldKind::BigInt => "BIGINT".into(),
        FieldKind::Float => "DOUBLE PRECISION".into(),
        FieldKind::Boolean => "BOOLEAN".into(),
        FieldKind::Uuid if field.primary_key && field.has_default => "UUID DEFAULT gen_random_uuid()".into(),
        FieldKind::Uuid => "UUID".into(),
        FieldKind::Date => "DATE".into(),
        FieldKind::Timestamp => "TIMESTAMPTZ".into(),
        // Same column type as the target's primary key.
        FieldKind::ForeignKey(target) => registry
            .get(target)
            .and_then(|m| m.pk_field())
            .map(|pk| match pk.kind {
                FieldKind::Integer => "INTEGER".to_string(),
                FieldKind::BigInt => "BIGINT".to_string(),
                FieldKind::Uuid => "UUID".to_string(),
                _ => "TEXT".to_string(),
            })
            .unwrap_or_else(|| "BIGINT".into()),
    }
}

/// `CREATE TABLE IF NOT EXISTS` for one model. Choice fields get a CHECK over their choices.
pub fn create_table_sql(model: &ModelDescriptor, registry: &ModelRegistry) -> String {
    let mut defs = Vec::with_capacity(model.fields.len() + 1);
    for f in &model.fields {
        let mut def = format!("{} {}", quote(&f.name), column_type(f, registry));
        if !f.nullable || f.primary_key {
            def.push_str(" NOT NULL");
        }
        if let FieldKind::Choice(choices) = &f.kind {
            let values: Vec<String> = choices.iter().map(|c| format!("'{}'", c.replace('\'', "''"))).collect();
            def.push_str(&format!(" CHECK ({} IN ({}))", quote(&f.name), values.join(", ")));
        }
        defs.push(def);
    }
    defs.push(format!("PRIMARY KEY ({})", quote(&model.pk)));
    format!("CREATE TABLE IF NOT EXISTS {} (\n  {}\n)", full_table(model), defs.join(",\n  "))
}

/// `ALTER TABLE .. ADD CONSTRAINT .. FOREIGN KEY` for every foreign key whose target is registered.
pub fn foreign_key_sql(model: &ModelDescriptor, registry: &ModelRegistry) -> Vec<String> {
    model
        .fields
        .iter()
        .filter_map(|f| {
            let target = registry.get(f.related_model()?)?;
            Some(format!(
                "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE CASCADE",
                full_table(model),
                quote(&format!("{}_{}_fk", model.table_name, f.name)),
                quote(&f.name),
                full_table(target),
                quote(&target.pk)
            ))
        })
        .collect()
}

/// Create every model's schema and table, then its foreign keys. Tables are created only
/// when missing; a foreign key that already exists is left alone.
pub async fn apply_migrations(pool: &PgPool, registry: &ModelRegistry) -> Result<(), AppError> {
    let mut models: Vec<_> = registry.iter().collect();
    models.sort_by_key(|m| m.key());

    let schemas: BTreeSet<&str> = models.iter().map(|m| m.schema_name.as_str()).collect();
    for schema in schemas {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote(schema)))
            .execute(pool)
            .await?;
    }
    for model in &models {
        sqlx::query(&create_table_sql(model, registry)).execute(pool).await?;
        tracing::debug!(model = %model.key(), table = %model.table_name, "table ensured");
    }
    for model in &models {
        for sql in foreign_key_sql(model, registry) {
            if let Err(e) = sqlx::query(&sql).execute(pool).await {
                tracing::debug!(model = %model.key(), error = %e, "foreign key not added");
            }
        }
    }
    tracing::info!(models = models.len(), "migrations applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ModelRegistry {
        let mut reg = ModelRegistry::new();
        reg.register(ModelDescriptor::new("crm", "Customer").field(FieldInfo::new("name", FieldKind::Text).required()));
        reg.register(
            ModelDescriptor::new("billing", "Invoice")
                .field(FieldInfo::new("customer", FieldKind::ForeignKey("crm.customer".into())))
                .field(FieldInfo::new("status", FieldKind::Choice(vec!["draft".into(), "sent".into()]))),
        );
        reg
    }

    #[test]
    fn table_ddl() {
        let reg = registry();
        let sql = create_table_sql(reg.get("billing.Invoice").unwrap(), &reg);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"public\".\"billing_invoice\""));
        assert!(sql.contains("\"id\" BIGSERIAL NOT NULL"));
        assert!(sql.contains("\"customer\" BIGINT,"));
        assert!(sql.contains("CHECK (\"status\" IN ('draft', 'sent'))"));
        assert!(sql.ends_with("PRIMARY KEY (\"id\")\n)"));
    }

    #[test]
    fn foreign_keys_reference_target_pk() {
        let reg = registry();
        let fks = foreign_key_sql(reg.get("billing.invoice").unwrap(), &reg);
        assert_eq!(fks.len(), 1);
        assert!(fks[0].contains("REFERENCES \"public\".\"crm_customer\" (\"id\")"));
    }
}
