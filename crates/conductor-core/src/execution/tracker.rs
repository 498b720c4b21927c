//! Driver-facing API for recording execution progress.
//!
//! Wraps an `ExecutionRepository`. Every call appends exactly one event;
//! the store folds it into the execution row in the same transaction, so
//! the row never runs ahead of the log. The status checks here give early,
//! descriptive errors; the store re-checks inside the append transaction.

use chrono::{Duration, Utc};
use conductor_types::config::EngineConfig;
use conductor_types::error::RepositoryError;
use conductor_types::event::{EventData, NewWorkflowEvent, WorkflowEvent};
use conductor_types::execution::{ExecutionStatus, StepResult, StepStatus, WorkflowExecution};
use serde_json::Value;
use uuid::Uuid;

use crate::repository::execution::ExecutionRepository;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("execution not found: {0}")]
    NotFound(Uuid),

    #[error("cannot {action} execution {execution_id} while it is {status}")]
    InvalidTransition {
        execution_id: Uuid,
        status: ExecutionStatus,
        action: &'static str,
    },

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// ExecutionTracker
// ---------------------------------------------------------------------------

/// Records execution lifecycle and step progress as events.
///
/// Generic over `R: ExecutionRepository` so tests can use an in-memory
/// store.
pub struct ExecutionTracker<R: ExecutionRepository> {
    repo: R,
    stale_after: Duration,
}

impl<R: ExecutionRepository> ExecutionTracker<R> {
    pub fn new(repo: R, config: &EngineConfig) -> Self {
        Self {
            repo,
            stale_after: config.stale_after(),
        }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Create a running execution for a work item.
    ///
    /// Fails with [`RepositoryError::AlreadyRunning`] while a fresh running
    /// execution exists for the same work item.
    pub async fn start(
        &self,
        workflow_id: &str,
        work_item_id: &str,
        job_id: Option<String>,
    ) -> Result<WorkflowExecution, TrackerError> {
        let execution = WorkflowExecution::new(workflow_id, work_item_id, job_id, Utc::now());
        let created = self.repo.create_execution(&execution, self.stale_after).await?;
        tracing::debug!(
            execution_id = %created.id,
            workflow_id,
            work_item_id,
            "execution started"
        );
        Ok(created)
    }

    // -----------------------------------------------------------------------
    // Step-level events
    // -----------------------------------------------------------------------

    pub async fn step_started(
        &self,
        execution_id: Uuid,
        step_id: &str,
    ) -> Result<WorkflowEvent, TrackerError> {
        self.require_status(execution_id, "start a step in", &[ExecutionStatus::Running])
            .await?;
        let result = StepResult::running(step_id, Utc::now());
        self.append(execution_id, EventData::StepExecuted { result }).await
    }

    pub async fn step_completed(
        &self,
        execution_id: Uuid,
        step_id: &str,
        output: Option<Value>,
    ) -> Result<WorkflowEvent, TrackerError> {
        let result = self
            .in_flight(execution_id, step_id)
            .await?
            .complete(output, Utc::now());
        self.append(execution_id, EventData::StepExecuted { result }).await
    }

    pub async fn step_failed(
        &self,
        execution_id: Uuid,
        step_id: &str,
        error: &str,
    ) -> Result<WorkflowEvent, TrackerError> {
        let result = self
            .in_flight(execution_id, step_id)
            .await?
            .fail(error, Utc::now());
        self.append(execution_id, EventData::StepExecuted { result }).await
    }

    pub async fn record_decision(
        &self,
        execution_id: Uuid,
        step_id: &str,
        decision: &str,
        rationale: Option<String>,
    ) -> Result<WorkflowEvent, TrackerError> {
        self.append(
            execution_id,
            EventData::AgentDecision {
                step_id: step_id.to_string(),
                decision: decision.to_string(),
                rationale,
            },
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Lifecycle events
    // -----------------------------------------------------------------------

    pub async fn pause(
        &self,
        execution_id: Uuid,
        reason: Option<String>,
        step_id: Option<String>,
    ) -> Result<WorkflowEvent, TrackerError> {
        self.require_status(execution_id, "pause", &[ExecutionStatus::Running])
            .await?;
        self.append(execution_id, EventData::WorkflowPaused { reason, step_id })
            .await
    }

    pub async fn resume(
        &self,
        execution_id: Uuid,
        resume_job_id: Option<String>,
    ) -> Result<WorkflowEvent, TrackerError> {
        self.require_status(execution_id, "resume", &[ExecutionStatus::Paused])
            .await?;
        self.append(execution_id, EventData::WorkflowResumed { resume_job_id })
            .await
    }

    pub async fn complete(
        &self,
        execution_id: Uuid,
        summary: Option<String>,
    ) -> Result<WorkflowEvent, TrackerError> {
        self.require_status(execution_id, "complete", &[ExecutionStatus::Running])
            .await?;
        self.append(execution_id, EventData::WorkflowCompleted { summary })
            .await
    }

    pub async fn fail(
        &self,
        execution_id: Uuid,
        error: &str,
        step_id: Option<String>,
    ) -> Result<WorkflowEvent, TrackerError> {
        self.require_live(execution_id, "fail").await?;
        self.append(
            execution_id,
            EventData::WorkflowFailed {
                error: error.to_string(),
                step_id,
            },
        )
        .await
    }

    pub async fn cancel(
        &self,
        execution_id: Uuid,
        reason: Option<String>,
    ) -> Result<WorkflowEvent, TrackerError> {
        self.require_live(execution_id, "cancel").await?;
        self.append(execution_id, EventData::WorkflowCancelled { reason })
            .await
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn append(
        &self,
        execution_id: Uuid,
        data: EventData,
    ) -> Result<WorkflowEvent, TrackerError> {
        let event = self
            .repo
            .append_event(NewWorkflowEvent::new(execution_id, data))
            .await?;
        tracing::debug!(
            execution_id = %execution_id,
            event_type = event.event_type(),
            sequence = event.sequence_number,
            "event recorded"
        );
        Ok(event)
    }

    async fn load(&self, execution_id: Uuid) -> Result<WorkflowExecution, TrackerError> {
        self.repo
            .get_execution(&execution_id)
            .await?
            .ok_or(TrackerError::NotFound(execution_id))
    }

    async fn require_status(
        &self,
        execution_id: Uuid,
        action: &'static str,
        allowed: &[ExecutionStatus],
    ) -> Result<WorkflowExecution, TrackerError> {
        let execution = self.load(execution_id).await?;
        if !allowed.contains(&execution.status) {
            return Err(TrackerError::InvalidTransition {
                execution_id,
                status: execution.status,
                action,
            });
        }
        Ok(execution)
    }

    async fn require_live(
        &self,
        execution_id: Uuid,
        action: &'static str,
    ) -> Result<WorkflowExecution, TrackerError> {
        self.require_status(
            execution_id,
            action,
            &[
                ExecutionStatus::Pending,
                ExecutionStatus::Running,
                ExecutionStatus::Paused,
            ],
        )
        .await
    }

    /// The running result for `step_id`, or a fresh one when the start was
    /// never recorded.
    async fn in_flight(&self, execution_id: Uuid, step_id: &str) -> Result<StepResult, TrackerError> {
        let execution = self
            .require_status(execution_id, "finish a step in", &[ExecutionStatus::Running])
            .await?;
        Ok(execution
            .step_result(step_id)
            .filter(|r| r.status == StepStatus::Running)
            .cloned()
            .unwrap_or_else(|| StepResult::running(step_id, Utc::now())))
    }
}
