//! SQLite connection pools for the conductor database.
//!
//! Every execution mutation (sequence assignment, projection write, job
//! merge) relies on there being exactly one writer connection, so those
//! transactions queue behind each other. Reads go through a separate
//! read-only pool and see the last committed state under WAL.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const READER_CONNECTIONS: u32 = 8;

/// How long a connection waits on a lock before the store reports
/// `RepositoryError::Busy`.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Read-only pool plus the single writer connection.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open both pools and apply pending migrations through the writer before
    /// any reader connects.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let base_opts = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT)
            .create_if_missing(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(base_opts.clone())
            .await?;
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(READER_CONNECTIONS)
            .connect_with(base_opts.read_only(true))
            .await?;

        tracing::debug!(database_url, "database pools ready");
        Ok(Self { reader, writer })
    }
}

/// Data directory: `CONDUCTOR_DATA_DIR`, else `~/.conductor`.
pub fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CONDUCTOR_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".conductor")
}

/// Database URL for a data directory.
pub fn database_url(data_dir: &Path) -> String {
    format!("sqlite://{}/conductor.db", data_dir.display())
}
