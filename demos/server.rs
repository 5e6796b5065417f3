//! Demo server: loads models and views from CONFIG_PATH, creates their tables, mounts the CRUD site.

use cruds_sdk::{
    apply_migrations, ensure_auth_tables, ensure_database_exists, load_from_path, resolve, CrudSite, PgAuthBackend,
    PgStore,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("cruds_sdk=info".parse()?))
        .init();

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/cruds".into());
    ensure_database_exists(&database_url).await?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;
    ensure_auth_tables(&pool).await?;

    let config_dir = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "demos/config".into());
    let config = load_from_path(&config_dir).await?;
    let (registry, views) = resolve(&config)?;
    apply_migrations(&pool, &registry).await?;

    let site = CrudSite::builder(Arc::new(PgStore::new(pool.clone())), Arc::new(PgAuthBackend::new(pool)))
        .register_all(views)
        .build()?;

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, site.router()).await?;
    Ok(())
}
