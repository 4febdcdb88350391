//! Identity webhook server
//!
//! Usage: `evergreen-identity [config.yaml]`. `EVERGREEN_DATABASE_URL` and
//! `EVERGREEN_BIND_ADDR` override the file.

use anyhow::{Context, Result};
use evergreen::config::{Backend, StoreConfig};
use evergreen::core::IdentityResolver;
use evergreen::server;
use evergreen::storage::InMemoryStore;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => StoreConfig::from_yaml_file(&path)
            .with_context(|| format!("failed to load config from {}", path))?,
        None => StoreConfig::default(),
    }
    .apply_env();
    config.validate()?;

    let app = match config.backend {
        Backend::InMemory => {
            tracing::warn!("Running with the in-memory backend; data is lost on exit");
            server::router(IdentityResolver::new(Arc::new(InMemoryStore::new())))
        }
        Backend::Postgres => postgres_router(&config).await?,
    };

    server::serve(app, &config.bind_addr).await?;
    Ok(())
}

#[cfg(feature = "postgres")]
async fn postgres_router(config: &StoreConfig) -> Result<axum::Router> {
    use evergreen::storage::{PostgresStore, postgres};

    let pool = postgres::connect(config).await?;
    Ok(server::router(IdentityResolver::new(Arc::new(
        PostgresStore::new(pool),
    ))))
}

#[cfg(not(feature = "postgres"))]
async fn postgres_router(_config: &StoreConfig) -> Result<axum::Router> {
    anyhow::bail!("the postgres backend requires building with the `postgres` feature")
}
