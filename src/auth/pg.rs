//! PostgreSQL auth backend. Users, content types and permissions live in `_sys_*` tables in a schema
//! named from `CRUDS_AUTH_SCHEMA` env (default `cruds`).

use crate::auth::{AuthBackend, Principal, ProvisionOutcome};
use crate::config::ModelDescriptor;
use crate::error::AppError;
use async_trait::async_trait;
use sqlx::ConnectOptions;
use sqlx::PgPool;
use std::str::FromStr;

/// Schema name for auth tables. From env `CRUDS_AUTH_SCHEMA`, default `cruds`. Must be a valid PostgreSQL identifier.
pub fn auth_schema() -> String {
    std::env::var("CRUDS_AUTH_SCHEMA").unwrap_or_else(|_| "cruds".into())
}

/// Returns schema-qualified table name (e.g. "cruds._sys_permissions").
pub fn qualified_auth_table(table: &str) -> String {
    format!("{}.{}", auth_schema(), table)
}

/// Create the auth schema and `_sys_*` tables if they do not exist.
pub async fn ensure_auth_tables(pool: &PgPool) -> Result<(), AppError> {
    let schema = auth_schema();
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
        .execute(pool)
        .await?;

    let content_types = qualified_auth_table("_sys_content_types");
    let permissions = qualified_auth_table("_sys_permissions");
    let users = qualified_auth_table("_sys_users");
    let user_permissions = qualified_auth_table("_sys_user_permissions");

    let ddl = [
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id BIGSERIAL PRIMARY KEY,
                app_label TEXT NOT NULL,
                model TEXT NOT NULL,
                UNIQUE (app_label, model)
            )
            "#,
            content_types
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id BIGSERIAL PRIMARY KEY,
                content_type_id BIGINT NOT NULL REFERENCES {} (id) ON DELETE CASCADE,
                codename TEXT NOT NULL,
                name TEXT NOT NULL,
                UNIQUE (content_type_id, codename)
            )
            "#,
            permissions, content_types
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                is_superuser BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            users
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                user_id TEXT NOT NULL REFERENCES {} (id) ON DELETE CASCADE,
                permission_id BIGINT NOT NULL REFERENCES {} (id) ON DELETE CASCADE,
                PRIMARY KEY (user_id, permission_id)
            )
            "#,
            user_permissions, users, permissions
        ),
    ];
    for sql in &ddl {
        sqlx::query(sql).execute(pool).await?;
    }
    Ok(())
}

#[derive(Clone)]
pub struct PgAuthBackend {
    pool: PgPool,
}

impl PgAuthBackend {
    pub fn new(pool: PgPool) -> Self {
        PgAuthBackend { pool }
    }

    async fn provision(&self, model: &ModelDescriptor) -> Result<ProvisionOutcome, sqlx::Error> {
        let content_types = qualified_auth_table("_sys_content_types");
        let permissions = qualified_auth_table("_sys_permissions");
        let model_name = model.model_name();

        sqlx::query(&format!(
            "INSERT INTO {} (app_label, model) VALUES ($1, $2) ON CONFLICT (app_label, model) DO NOTHING",
            content_types
        ))
        .bind(&model.app_label)
        .bind(&model_name)
        .execute(&self.pool)
        .await?;
        let (ct_id,): (i64,) = sqlx::query_as(&format!(
            "SELECT id FROM {} WHERE app_label = $1 AND model = $2",
            content_types
        ))
        .bind(&model.app_label)
        .bind(&model_name)
        .fetch_one(&self.pool)
        .await?;

        let inserted: Option<(i64,)> = sqlx::query_as(&format!(
            "INSERT INTO {} (content_type_id, codename, name) VALUES ($1, $2, $3) \
             ON CONFLICT (content_type_id, codename) DO NOTHING RETURNING id",
            permissions
        ))
        .bind(ct_id)
        .bind(format!("view_{}", model_name))
        .bind(format!("Can see available {}", model_name))
        .fetch_optional(&self.pool)
        .await?;
        Ok(if inserted.is_some() {
            ProvisionOutcome::Created
        } else {
            ProvisionOutcome::Existing
        })
    }
}

#[async_trait]
impl AuthBackend for PgAuthBackend {
    async fn load_principal(&self, user_id: Option<&str>) -> Result<Principal, AppError> {
        let Some(id) = user_id else {
            return Ok(Principal::anonymous());
        };
        let users = qualified_auth_table("_sys_users");
        let row: Option<(bool, bool)> = sqlx::query_as(&format!(
            "SELECT is_active, is_superuser FROM {} WHERE id = $1",
            users
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        let Some((is_active, is_superuser)) = row else {
            tracing::debug!(user_id = %id, "unknown user, treating as anonymous");
            return Ok(Principal::anonymous());
        };

        let sql = format!(
            "SELECT ct.app_label || '.' || p.codename FROM {} up \
             JOIN {} p ON p.id = up.permission_id \
             JOIN {} ct ON ct.id = p.content_type_id \
             WHERE up.user_id = $1",
            qualified_auth_table("_sys_user_permissions"),
            qualified_auth_table("_sys_permissions"),
            qualified_auth_table("_sys_content_types"),
        );
        let perms: Vec<String> = sqlx::query_scalar(&sql).bind(id).fetch_all(&self.pool).await?;
        Ok(Principal {
            id: Some(id.to_string()),
            is_active,
            is_superuser,
            permissions: perms.into_iter().collect(),
        })
    }

    async fn ensure_view_permission(&self, model: &ModelDescriptor) -> Result<ProvisionOutcome, AppError> {
        Ok(self.provision(model).await?)
    }
}

/// Ensure the database in `database_url` exists; create it if not. Connects to the
/// default `postgres` database to run CREATE DATABASE. Call before creating the main pool.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), AppError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)
        .map_err(|e| AppError::BadRequest(format!("invalid DATABASE_URL: {}", e)))?;
    let mut conn: sqlx::PgConnection = opts.connect().await.map_err(AppError::Db)?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await
        .map_err(AppError::Db)?;
    if !exists.0 {
        let quoted = quote_ident(&db_name);
        sqlx::query(&format!("CREATE DATABASE {}", quoted))
            .execute(&mut conn)
            .await
            .map_err(AppError::Db)?;
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), AppError> {
    let path_start = url.rfind('/').ok_or_else(|| AppError::BadRequest("DATABASE_URL: no path".into()))? + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    let admin_url = format!("{}postgres", base);
    Ok((admin_url, db_name.to_string()))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
