//! Pure reconstruction of an execution summary from its event log.

use conductor_types::event::{EventData, WorkflowEvent};
use conductor_types::execution::StepStatus;
use serde::Serialize;
use uuid::Uuid;

/// What an event log says about an execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaySummary {
    pub execution_id: Option<Uuid>,
    pub workflow_id: Option<String>,
    pub work_item_id: Option<String>,
    pub job_id: Option<String>,
    pub completed_steps: usize,
    pub failed_steps: usize,
    /// `running`, `paused`, `completed`, `failed`, `cancelled`, or `unknown`
    /// before any lifecycle event.
    pub status: String,
    pub last_sequence: Option<i64>,
    pub timeline: Vec<String>,
}

/// Summarise `events`. The input is not modified; a sorted copy is walked
/// in sequence order.
pub fn replay(events: &[WorkflowEvent]) -> ReplaySummary {
    let mut ordered: Vec<&WorkflowEvent> = events.iter().collect();
    ordered.sort_by_key(|e| e.sequence_number);

    let mut summary = ReplaySummary {
        execution_id: ordered.first().map(|e| e.execution_id),
        workflow_id: None,
        work_item_id: None,
        job_id: None,
        completed_steps: 0,
        failed_steps: 0,
        status: "unknown".to_string(),
        last_sequence: ordered.last().map(|e| e.sequence_number),
        timeline: Vec::with_capacity(ordered.len()),
    };

    for event in ordered {
        let detail = match &event.data {
            EventData::WorkflowStarted {
                workflow_id,
                work_item_id,
                job_id,
            } => {
                summary.workflow_id = Some(workflow_id.clone());
                summary.work_item_id = Some(work_item_id.clone());
                summary.job_id = job_id.clone();
                summary.status = "running".to_string();
                format!("workflow '{workflow_id}' started for work item {work_item_id}")
            }
            EventData::StepExecuted { result } => {
                match result.status {
                    StepStatus::Completed => summary.completed_steps += 1,
                    StepStatus::Failed => summary.failed_steps += 1,
                    _ => {}
                }
                match &result.error {
                    Some(error) => format!("step '{}' {}: {error}", result.step_id, result.status.as_str()),
                    None => format!("step '{}' {}", result.step_id, result.status.as_str()),
                }
            }
            EventData::AgentDecision {
                step_id, decision, ..
            } => format!("decision in '{step_id}': {decision}"),
            EventData::WorkflowPaused { reason, .. } => {
                summary.status = "paused".to_string();
                with_reason("paused", reason.as_deref())
            }
            EventData::WorkflowResumed { .. } => {
                summary.status = "running".to_string();
                "resumed".to_string()
            }
            EventData::WorkflowCompleted { summary: text } => {
                summary.status = "completed".to_string();
                with_reason("completed", text.as_deref())
            }
            EventData::WorkflowFailed { error, .. } => {
                summary.status = "failed".to_string();
                format!("failed: {error}")
            }
            EventData::WorkflowCancelled { reason } => {
                summary.status = "cancelled".to_string();
                with_reason("cancelled", reason.as_deref())
            }
        };

        summary.timeline.push(format!(
            "#{} {} {}",
            event.sequence_number,
            event
                .timestamp
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            detail
        ));
    }

    summary
}

fn with_reason(label: &str, reason: Option<&str>) -> String {
    match reason {
        Some(reason) => format!("{label}: {reason}"),
        None => label.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use conductor_types::event::NewWorkflowEvent;
    use conductor_types::execution::StepResult;

    fn sample() -> Vec<WorkflowEvent> {
        let id = Uuid::now_v7();
        let t0 = Utc::now();
        let data = vec![
            EventData::WorkflowStarted {
                workflow_id: "fix-bug".into(),
                work_item_id: "42".into(),
                job_id: None,
            },
            EventData::StepExecuted { result: StepResult::running("setup", t0).complete(None, t0) },
            EventData::AgentDecision {
                step_id: "apply-fix".into(),
                decision: "patch parser".into(),
                rationale: None,
            },
            EventData::StepExecuted { result: StepResult::running("apply-fix", t0).fail("tests red", t0) },
            EventData::WorkflowFailed { error: "tests red".into(), step_id: Some("apply-fix".into()) },
        ];
        data.into_iter()
            .enumerate()
            .map(|(i, d)| {
                let mut e = NewWorkflowEvent::new(id, d);
                e.timestamp = t0 + Duration::seconds(i as i64);
                e.into_event(i as i64)
            })
            .collect()
    }

    #[test]
    fn test_replay_counts_and_status() {
        let summary = replay(&sample());
        assert_eq!(summary.workflow_id.as_deref(), Some("fix-bug"));
        assert_eq!(summary.work_item_id.as_deref(), Some("42"));
        assert_eq!(summary.completed_steps, 1);
        assert_eq!(summary.failed_steps, 1);
        assert_eq!(summary.status, "failed");
        assert_eq!(summary.last_sequence, Some(4));
        assert_eq!(summary.timeline.len(), 5);
        assert!(summary.timeline[3].contains("step 'apply-fix' failed: tests red"));
    }

    #[test]
    fn test_replay_is_pure() {
        let mut events = sample();
        let first = serde_json::to_string(&replay(&events)).unwrap();
        let second = serde_json::to_string(&replay(&events)).unwrap();
        assert_eq!(first, second);

        let before = events.clone();
        events.reverse();
        assert_eq!(serde_json::to_string(&replay(&events)).unwrap(), first);
        events.reverse();
        assert_eq!(events, before);
    }

    #[test]
    fn test_replay_empty_log() {
        let summary = replay(&[]);
        assert_eq!(summary.status, "unknown");
        assert!(summary.execution_id.is_none());
        assert!(summary.timeline.is_empty());
    }
}
