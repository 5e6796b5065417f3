//! Example consumer: builds models and views in code and serves them from the in-memory store.
//!
//! Run from repo root: `cargo run -p example-consumer`, then browse with an `X-User-ID: admin` header.

use cruds_sdk::{
    CrudSite, FieldInfo, FieldKind, MemoryAuthBackend, MemoryStore, ModelDescriptor, Principal, SplitSearch,
    ViewConfigBuilder,
};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cruds_sdk=info")),
        )
        .init();

    let author = Arc::new(
        ModelDescriptor::new("library", "Author").field(FieldInfo::new("name", FieldKind::Text).required()),
    );
    let book = Arc::new(
        ModelDescriptor::new("library", "Book")
            .field(FieldInfo::new("title", FieldKind::Text).required())
            .field(FieldInfo::new("author", FieldKind::ForeignKey(author.key())))
            .field(FieldInfo::new("in_print", FieldKind::Boolean)),
    );

    let authors = ViewConfigBuilder::new(author.clone())
        .namespace("library")
        .search_fields(vec!["name".into()])
        .build()?;
    let books = ViewConfigBuilder::new(book)
        .namespace("library")
        .search_fields(vec!["title".into()])
        .split_space_search(SplitSearch::Whitespace)
        .related_field("author", author)
        .build()?;

    let auth = MemoryAuthBackend::new();
    auth.add_user(Principal::superuser("admin"));

    let site = CrudSite::builder(Arc::new(MemoryStore::new()), Arc::new(auth))
        .register(Arc::new(authors))
        .register(Arc::new(books))
        .build()?;

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".into());
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("example consumer listening on http://{}", listener.local_addr()?);
    axum::serve(listener, site.router()).await?;
    Ok(())
}
