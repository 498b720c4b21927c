//! Periodic stale-execution recovery.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use conductor_types::config::EngineConfig;
use conductor_types::error::RepositoryError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::repository::execution::ExecutionRepository;

/// Fails running executions that stopped reporting progress.
///
/// Overlapping sweeps, and sweeps racing live updates, are safe: the store
/// re-checks staleness inside its transaction.
pub struct StaleExecutionSweeper<R: ExecutionRepository> {
    repo: Arc<R>,
    stale_after: chrono::Duration,
    interval: StdDuration,
}

impl<R: ExecutionRepository> StaleExecutionSweeper<R> {
    pub fn new(repo: Arc<R>, config: &EngineConfig) -> Self {
        Self {
            repo,
            stale_after: config.stale_after(),
            interval: config.sweep_interval(),
        }
    }

    pub async fn sweep_once(&self) -> Result<Vec<Uuid>, RepositoryError> {
        let recovered = self.repo.recover_stale_executions(self.stale_after).await?;
        if !recovered.is_empty() {
            tracing::info!(count = recovered.len(), "recovered stale executions");
        }
        Ok(recovered)
    }

    /// Sweep now and then every interval until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("stale execution sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        if e.is_retryable() {
                            tracing::debug!(error = %e, "stale sweep skipped, store busy");
                        } else {
                            tracing::warn!(error = %e, "stale sweep failed");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::test_support::MemoryExecutionStore;
    use chrono::Utc;
    use conductor_types::execution::{ExecutionStatus, WorkflowExecution};

    async fn seed(store: &MemoryExecutionStore, work_item: &str, age_minutes: i64) -> Uuid {
        let then = Utc::now() - chrono::Duration::minutes(age_minutes);
        let exec = WorkflowExecution::new("wf", work_item, None, then);
        store
            .create_execution(&exec, chrono::Duration::minutes(30))
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_sweep_once_fails_only_stale() {
        let store = Arc::new(MemoryExecutionStore::default());
        let stale = seed(&store, "1", 45).await;
        let fresh = seed(&store, "2", 5).await;

        let sweeper = StaleExecutionSweeper::new(Arc::clone(&store), &EngineConfig::default());
        assert_eq!(sweeper.sweep_once().await.unwrap(), vec![stale]);
        assert!(sweeper.sweep_once().await.unwrap().is_empty());

        let failed = store.get_execution(&stale).await.unwrap().unwrap();
        assert_eq!(failed.status, ExecutionStatus::Failed);
        let live = store.get_execution(&fresh).await.unwrap().unwrap();
        assert_eq!(live.status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn test_run_sweeps_then_stops_on_cancel() {
        let store = Arc::new(MemoryExecutionStore::default());
        let stale = seed(&store, "1", 90).await;
        let sweeper = Arc::new(StaleExecutionSweeper::new(
            Arc::clone(&store),
            &EngineConfig::default(),
        ));

        let cancel = CancellationToken::new();
        let handle = {
            let sweeper = Arc::clone(&sweeper);
            let cancel = cancel.clone();
            tokio::spawn(async move { sweeper.run(cancel).await })
        };
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        let failed = store.get_execution(&stale).await.unwrap().unwrap();
        assert_eq!(failed.status, ExecutionStatus::Failed);
    }
}
