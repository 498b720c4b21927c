//! Workflow execution state.
//!
//! A `WorkflowExecution` is the materialized projection of an execution's
//! event log. It is owned by the execution driver and only ever mutated
//! through the store's updater transactions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Paused => "paused",
        }
    }

    /// Completed and failed executions never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "paused" => Ok(ExecutionStatus::Paused),
            other => Err(format!("invalid execution status: '{other}'")),
        }
    }
}

/// Status of a single step result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

// ---------------------------------------------------------------------------
// StepResult
// ---------------------------------------------------------------------------

/// Outcome of one executed step.
///
/// Appended to the execution and never mutated in place, except for the
/// `running -> completed | failed` transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl StepResult {
    pub fn running(step_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Running,
            result: None,
            error: None,
            started_at,
            completed_at: None,
            duration_ms: None,
        }
    }

    /// Transition to `completed`, stamping completion time and duration.
    pub fn complete(mut self, result: Option<Value>, at: DateTime<Utc>) -> Self {
        self.status = StepStatus::Completed;
        self.result = result;
        self.finish(at);
        self
    }

    /// Transition to `failed`, stamping completion time and duration.
    pub fn fail(mut self, error: impl Into<String>, at: DateTime<Utc>) -> Self {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
        self.finish(at);
        self
    }

    fn finish(&mut self, at: DateTime<Utc>) {
        self.completed_at = Some(at);
        let elapsed = (at - self.started_at).num_milliseconds().max(0);
        self.duration_ms = Some(elapsed as u64);
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecution
// ---------------------------------------------------------------------------

/// One concrete run of a workflow against a work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: String,
    pub work_item_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_id: Option<String>,
    #[serde(default)]
    pub step_results: Vec<StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    /// A fresh `running` execution with a time-ordered id.
    pub fn new(
        workflow_id: impl Into<String>,
        work_item_id: impl Into<String>,
        job_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id: workflow_id.into(),
            work_item_id: work_item_id.into(),
            job_id,
            status: ExecutionStatus::Running,
            current_step_id: None,
            step_results: Vec::new(),
            plan: None,
            worktree_path: None,
            branch_name: None,
            resume_job_id: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Latest result recorded for `step_id`.
    pub fn step_result(&self, step_id: &str) -> Option<&StepResult> {
        self.step_results.iter().rev().find(|r| r.step_id == step_id)
    }

    /// Replace the running entry for the same step, or append.
    pub fn upsert_step_result(&mut self, result: StepResult) {
        let running = self
            .step_results
            .iter_mut()
            .rev()
            .find(|r| r.step_id == result.step_id && r.status == StepStatus::Running);
        match running {
            Some(slot) => *slot = result,
            None => self.step_results.push(result),
        }
    }

    /// Fail every step result still marked `running`.
    pub fn fail_running_steps(&mut self, error: &str, at: DateTime<Utc>) {
        for result in self.step_results.iter_mut() {
            if result.status == StepStatus::Running {
                *result = result.clone().fail(error, at);
            }
        }
    }

    /// Set a terminal `failed` status with `error`, failing in-flight steps.
    pub fn mark_failed(&mut self, error: impl Into<String>, at: DateTime<Utc>) {
        let error = error.into();
        self.fail_running_steps(&error, at);
        self.status = ExecutionStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(at);
        self.updated_at = at;
    }

    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: chrono::Duration) -> bool {
        self.status == ExecutionStatus::Running && now - self.updated_at > stale_after
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_step_result_complete_sets_duration() {
        let start = Utc::now();
        let done = StepResult::running("build", start)
            .complete(Some(json!({"ok": true})), start + Duration::milliseconds(1500));
        assert_eq!(done.status, StepStatus::Completed);
        assert_eq!(done.duration_ms, Some(1500));
        assert!(done.completed_at.is_some());
    }

    #[test]
    fn test_upsert_replaces_running_entry() {
        let now = Utc::now();
        let mut exec = WorkflowExecution::new("wf", "item-1", None, now);
        exec.upsert_step_result(StepResult::running("a", now));
        exec.upsert_step_result(StepResult::running("a", now).complete(None, now));
        assert_eq!(exec.step_results.len(), 1);
        assert_eq!(exec.step_results[0].status, StepStatus::Completed);

        // A rerun of a finished step appends a new entry.
        exec.upsert_step_result(StepResult::running("a", now));
        assert_eq!(exec.step_results.len(), 2);
        assert_eq!(exec.step_result("a").map(|r| r.status), Some(StepStatus::Running));
    }

    #[test]
    fn test_mark_failed_fails_running_steps() {
        let now = Utc::now();
        let mut exec = WorkflowExecution::new("wf", "item-1", None, now);
        exec.upsert_step_result(StepResult::running("a", now));
        exec.mark_failed("boom", now);
        assert_eq!(exec.status, ExecutionStatus::Failed);
        assert_eq!(exec.step_results[0].status, StepStatus::Failed);
        assert_eq!(exec.step_results[0].error.as_deref(), Some("boom"));
        assert!(exec.completed_at.is_some());
    }

    #[test]
    fn test_is_stale() {
        let now = Utc::now();
        let exec = WorkflowExecution::new("wf", "item-1", None, now - Duration::minutes(45));
        assert!(exec.is_stale(now, Duration::minutes(30)));
        assert!(!exec.is_stale(now, Duration::minutes(60)));
    }

    #[test]
    fn test_execution_status_roundtrip() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Paused,
        ] {
            let parsed: ExecutionStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("cancelled".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn test_execution_serializes_camel_case() {
        let exec = WorkflowExecution::new("wf", "item-1", Some("job-1".into()), Utc::now());
        let json = serde_json::to_value(&exec).unwrap();
        assert_eq!(json["workItemId"], "item-1");
        assert_eq!(json["jobId"], "job-1");
        assert_eq!(json["status"], "running");
    }
}
