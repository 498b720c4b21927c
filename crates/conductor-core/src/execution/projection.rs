//! Folding events into the `WorkflowExecution` projection.
//!
//! The store applies each event as it is appended; `project_execution`
//! rebuilds the same state from a full log.

use conductor_types::event::{EventData, WorkflowEvent};
use conductor_types::execution::{ExecutionStatus, WorkflowExecution};

/// Check that `data` may be appended to `execution` at `sequence`.
///
/// `workflow.started` only opens a log. A terminal execution accepts agent
/// decisions and nothing else.
pub fn check_append(execution: &WorkflowExecution, data: &EventData, sequence: i64) -> Result<(), String> {
    match data {
        EventData::AgentDecision { .. } => Ok(()),
        EventData::WorkflowStarted { .. } if sequence > 0 => {
            Err(format!("execution {} has already started", execution.id))
        }
        _ if execution.status.is_terminal() => Err(format!(
            "cannot record {} on {} execution {}",
            data.event_type(),
            execution.status,
            execution.id
        )),
        _ => Ok(()),
    }
}

/// Name of the first field that only events may change, if `after` differs
/// from `before` in one.
pub fn event_derived_change(before: &WorkflowExecution, after: &WorkflowExecution) -> Option<&'static str> {
    let checks = [
        ("id", before.id == after.id),
        ("workflowId", before.workflow_id == after.workflow_id),
        ("workItemId", before.work_item_id == after.work_item_id),
        ("jobId", before.job_id == after.job_id),
        ("status", before.status == after.status),
        ("currentStepId", before.current_step_id == after.current_step_id),
        ("stepResults", before.step_results == after.step_results),
        ("resumeJobId", before.resume_job_id == after.resume_job_id),
        ("error", before.error == after.error),
        ("createdAt", before.created_at == after.created_at),
        ("completedAt", before.completed_at == after.completed_at),
    ];
    checks.into_iter().find(|(_, same)| !same).map(|(field, _)| field)
}

/// Apply one event. Only agent decisions touch a terminal execution, and a
/// `workflow.started` past the head of the log is ignored.
pub fn apply_event(execution: &mut WorkflowExecution, event: &WorkflowEvent) {
    let at = event.timestamp;

    match &event.data {
        EventData::AgentDecision { .. } => {}
        _ if execution.status.is_terminal() => {
            tracing::debug!(
                execution_id = %execution.id,
                event_type = event.event_type(),
                "ignoring event on terminal execution"
            );
            return;
        }
        EventData::WorkflowStarted { .. } if event.sequence_number > 0 => {
            tracing::debug!(
                execution_id = %execution.id,
                sequence = event.sequence_number,
                "ignoring repeated workflow.started"
            );
            return;
        }
        EventData::WorkflowStarted {
            workflow_id,
            work_item_id,
            job_id,
        } => {
            execution.workflow_id = workflow_id.clone();
            execution.work_item_id = work_item_id.clone();
            execution.job_id = job_id.clone();
            execution.status = ExecutionStatus::Running;
        }
        EventData::StepExecuted { result } => {
            execution.current_step_id = Some(result.step_id.clone());
            execution.upsert_step_result(result.clone());
        }
        EventData::WorkflowPaused { step_id, .. } => {
            execution.status = ExecutionStatus::Paused;
            if step_id.is_some() {
                execution.current_step_id = step_id.clone();
            }
        }
        EventData::WorkflowResumed { resume_job_id } => {
            execution.status = ExecutionStatus::Running;
            if resume_job_id.is_some() {
                execution.resume_job_id = resume_job_id.clone();
            }
        }
        EventData::WorkflowCompleted { .. } => {
            execution.status = ExecutionStatus::Completed;
            execution.current_step_id = None;
            execution.completed_at = Some(at);
        }
        EventData::WorkflowFailed { error, step_id } => {
            execution.mark_failed(error.clone(), at);
            if step_id.is_some() {
                execution.current_step_id = step_id.clone();
            }
        }
        EventData::WorkflowCancelled { reason } => {
            let error = match reason {
                Some(reason) => format!("cancelled: {reason}"),
                None => "cancelled".to_string(),
            };
            execution.mark_failed(error, at);
        }
    }

    execution.updated_at = at;
}

/// Rebuild an execution from its log. `None` unless the earliest event is
/// `workflow.started`.
pub fn project_execution(events: &[WorkflowEvent]) -> Option<WorkflowExecution> {
    let mut ordered: Vec<&WorkflowEvent> = events.iter().collect();
    ordered.sort_by_key(|e| e.sequence_number);

    let first = ordered.first()?;
    let EventData::WorkflowStarted {
        workflow_id,
        work_item_id,
        job_id,
    } = &first.data
    else {
        return None;
    };

    let mut execution = WorkflowExecution::new(
        workflow_id.clone(),
        work_item_id.clone(),
        job_id.clone(),
        first.timestamp,
    );
    execution.id = first.execution_id;

    for event in ordered {
        apply_event(&mut execution, event);
    }
    Some(execution)
}
