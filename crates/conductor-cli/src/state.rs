//! Application state wiring the stores together.
//!
//! AppState pins the core services, which are generic over repository
//! traits, to the SQLite implementations.

use std::path::PathBuf;
use std::sync::Arc;

use conductor_core::workflow::{WorkflowCache, WorkflowCatalog};
use conductor_infra::config::{load_engine_config, workflows_dir};
use conductor_infra::sqlite::execution::SqliteExecutionRepository;
use conductor_infra::sqlite::pool::{DatabasePool, database_url, default_data_dir};
use conductor_infra::sqlite::workflow::SqliteWorkflowRepository;
use conductor_types::config::EngineConfig;

/// Catalog pinned to the SQLite workflow store.
pub type ConcreteCatalog = WorkflowCatalog<SqliteWorkflowRepository>;

/// Shared state for commands that touch the database.
pub struct AppState {
    pub data_dir: PathBuf,
    pub config: EngineConfig,
    pub catalog: ConcreteCatalog,
    pub executions: Arc<SqliteExecutionRepository>,
}

impl AppState {
    /// Resolve the data directory, load config and open the database.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = default_data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_engine_config(&data_dir).await;
        let db_url = format!("{}?mode=rwc", database_url(&data_dir));
        let db_pool = DatabasePool::new(&db_url).await?;

        let catalog = WorkflowCatalog::new(
            Arc::new(WorkflowCache::new()),
            Some(SqliteWorkflowRepository::new(db_pool.clone())),
            Some(workflows_dir(&config, &data_dir)),
        );
        let executions = Arc::new(SqliteExecutionRepository::new(db_pool.clone()));

        tracing::debug!(data_dir = %data_dir.display(), "state initialized");

        Ok(Self {
            data_dir,
            config,
            catalog,
            executions,
        })
    }
}
