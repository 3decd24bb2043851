/// Database abstraction layer
///
/// Target and check-history storage behind the `Database` trait, with a
/// libsql implementation and versioned migrations.

pub mod migrations;
pub mod models;
pub mod repository;

#[cfg(test)]
pub(crate) mod memory;

pub use repository::{Database, DatabaseImpl};

use anyhow::Result;
use std::sync::Arc;

use crate::config::DatabaseConfig;
use crate::pool::open_pool;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}

/// Open the configured database, migrate it, and hand back the shared handle.
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn Database>> {
    tracing::info!("Opening database at {}", config.path.display());

    let pool = open_pool(&config.path.to_string_lossy(), config.pool_size).await?;
    let conn = pool.get().await.map_err(|e| anyhow::anyhow!("failed to acquire connection: {e}"))?;
    initialize_database(&conn).await?;
    drop(conn);

    Ok(Arc::new(DatabaseImpl::new_from_pool(pool)))
}
