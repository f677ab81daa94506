//! # tackle-db
//!
//! Storage layer for the tackle analysis hub.
//!
//! This crate provides:
//! - An in-memory graph store on persistent `im` maps
//! - A PostgreSQL graph store and message queue
//! - Loading of run result graphs from their output directories
//! - The analysis/run repository over the central graph
//! - The graph merge engine
//!
//! ## Example
//!
//! ```rust,ignore
//! use tackle_db::{Database, GraphMerger, JsonGraphLoader};
//!
//! let db = Database::connect("postgres://localhost/tackle").await?;
//! db.migrate().await?;
//! let source = JsonGraphLoader::new().open("/opt/windup/shared/42").await?;
//! merger.merge(&db.graph, source.as_ref(), 42, run_id).await?;
//! ```

pub mod analyses;
pub mod memory;
pub mod merge;
pub mod pool;
pub mod postgres;
pub mod queue;
pub mod source;

// Always compiled so integration tests (in tests/) can build result graphs
pub mod test_fixtures;

pub use analyses::{Aggregates, AnalysisRepository};
pub use memory::{MemoryGraph, MemoryTx};
pub use merge::{delete_subgraph, DeleteReport, GraphMerger, MergeReport, MERGING_STATE};
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use postgres::{PgGraphStore, PgGraphTx};
pub use queue::PgMessageQueue;
pub use source::{GraphDocument, JsonGraphLoader, StaticSourceGraphs};

use std::sync::Arc;

use tackle_core::{Error, Result};

/// PostgreSQL-backed graph store and queue sharing one pool.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Central graph.
    pub graph: Arc<PgGraphStore>,
    /// Worker message queue.
    pub queue: Arc<PgMessageQueue>,
}

impl Database {
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            graph: Arc::new(PgGraphStore::new(pool.clone())),
            queue: Arc::new(PgMessageQueue::new(pool.clone())),
            pool,
        }
    }

    /// Connect with the default pool configuration.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
