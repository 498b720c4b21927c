//! Execution state: event projection, replay, progress tracking and
//! stale-execution recovery.

pub mod projection;
pub mod replay;
pub mod sweeper;
pub mod tracker;

use conductor_types::event::{EventData, NewWorkflowEvent};
use conductor_types::execution::WorkflowExecution;

pub use projection::{apply_event, check_append, event_derived_change, project_execution};
pub use replay::{ReplaySummary, replay};
pub use sweeper::StaleExecutionSweeper;
pub use tracker::{ExecutionTracker, TrackerError};

/// Error recorded on an execution failed by the stale sweep.
pub fn stale_failure_message(stale_after: chrono::Duration) -> String {
    format!(
        "execution marked failed: no progress reported for more than {} minutes",
        stale_after.num_minutes()
    )
}

/// Error recorded on a stale execution replaced by a new start.
pub fn superseded_failure_message(new_execution_id: &uuid::Uuid) -> String {
    format!("execution marked failed: stale, superseded by execution {new_execution_id}")
}

/// The `workflow.started` event every execution log begins with, stamped
/// with the execution's creation time.
pub fn started_event(execution: &WorkflowExecution) -> NewWorkflowEvent {
    let mut event = NewWorkflowEvent::new(
        execution.id,
        EventData::WorkflowStarted {
            workflow_id: execution.workflow_id.clone(),
            work_item_id: execution.work_item_id.clone(),
            job_id: execution.job_id.clone(),
        },
    );
    event.timestamp = execution.created_at;
    event
}
