//! Database bootstrap. The service runs over sqlx's Any driver so the same
//! query code serves both supported dialects: Postgres (with the vector
//! extension when present) and embedded SQLite for tests and single-node
//! deployments. Everything we bind is an Any-portable type; timestamps are
//! i64 nanoseconds since the epoch throughout.

pub mod schema;

use std::path::Path;
use std::sync::{Arc, Once};

use anyhow::{bail, Context, Result};
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use tracing::{info, warn};

use crate::application::config::configuration::Configuration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    pub fn from_dsn(dsn: &str) -> Result<Self> {
        if dsn.starts_with("postgres://") || dsn.starts_with("postgresql://") {
            Ok(Dialect::Postgres)
        } else if dsn.starts_with("sqlite:") {
            Ok(Dialect::Sqlite)
        } else {
            bail!("unsupported database dsn: {dsn}")
        }
    }

    pub fn supports_advisory_locks(self) -> bool {
        matches!(self, Dialect::Postgres)
    }

    pub fn supports_skip_locked(self) -> bool {
        matches!(self, Dialect::Postgres)
    }
}

/// Shared handle over the pool plus everything we learned at startup.
pub struct SqlDb {
    pool: AnyPool,
    dialect: Dialect,
    native_vectors: bool,
}

pub type Db = Arc<SqlDb>;

impl SqlDb {
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// True when the Postgres vector extension installed and embeddings
    /// live in a native vector column; false means serialized embeddings
    /// and the in-process cosine scan.
    pub fn native_vectors(&self) -> bool {
        self.native_vectors
    }
}

/// Build the pool and make sure the schema exists. The default DSN is an
/// SQLite database under the index directory.
pub async fn init(config: &Configuration) -> Result<SqlDb> {
    static DRIVERS: Once = Once::new();
    DRIVERS.call_once(sqlx::any::install_default_drivers);

    let dsn = match &config.dsn {
        Some(dsn) => dsn.clone(),
        None => {
            tokio::fs::create_dir_all(&config.index_dir)
                .await
                .context("creating the index directory")?;
            sqlite_dsn(&config.index_dir.join("fileio.db"))
        }
    };
    let dialect = Dialect::from_dsn(&dsn)?;

    let pool = AnyPoolOptions::new()
        .max_connections(config.sql_max_connections)
        .connect(&dsn)
        .await
        .context("connecting to the database")?;

    let native_vectors = schema::ensure_schema(&pool, dialect, config.embedding_dimensions).await?;
    match dialect {
        Dialect::Postgres if native_vectors => info!("database ready, native vector search on"),
        Dialect::Postgres => {
            warn!("vector extension unavailable, embeddings fall back to serialized storage")
        }
        Dialect::Sqlite => info!("database ready (embedded sqlite)"),
    }

    Ok(SqlDb {
        pool,
        dialect,
        native_vectors,
    })
}

pub fn sqlite_dsn(path: &Path) -> String {
    format!("sqlite://{}?mode=rwc", path.display())
}

/// Current wall-clock in i64 nanoseconds. This is the timestamp format for
/// every persisted row and for the credential cache key.
pub fn now_nanos() -> i64 {
    // nanosecond i64 overflows in 2262; saturate rather than panic
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_detection() {
        assert_eq!(
            Dialect::from_dsn("postgres://u@localhost/db").unwrap(),
            Dialect::Postgres
        );
        assert_eq!(
            Dialect::from_dsn("sqlite:///tmp/x.db?mode=rwc").unwrap(),
            Dialect::Sqlite
        );
        assert!(Dialect::from_dsn("mysql://nope").is_err());
    }

    #[test]
    fn capabilities_follow_the_dialect() {
        assert!(Dialect::Postgres.supports_advisory_locks());
        assert!(Dialect::Postgres.supports_skip_locked());
        assert!(!Dialect::Sqlite.supports_advisory_locks());
        assert!(!Dialect::Sqlite.supports_skip_locked());
    }
}
