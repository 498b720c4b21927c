//! Jobs linked to workflow executions.
//!
//! A job is the user-facing record of background work (logs, chat transcript,
//! file changes). Several writers append to the same job concurrently, so
//! updates merge array fields with the latest persisted state instead of
//! overwriting them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("invalid job status: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub chat: Vec<Value>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub files_created: Vec<String>,
    #[serde(default)]
    pub files_deleted: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Queued,
            logs: Vec::new(),
            chat: Vec::new(),
            files_modified: Vec::new(),
            files_created: Vec::new(),
            files_deleted: Vec::new(),
            summary: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_failed(&mut self, error: impl Into<String>, at: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = at;
    }

    /// Combine an updated copy with the latest persisted job.
    ///
    /// Scalars come from `updated`. Each array keeps everything in `latest`
    /// and appends the entries `updated` added past their shared prefix, so
    /// appends made by another writer since `updated` was read survive.
    pub fn merge_with_latest(latest: &Job, updated: Job) -> Job {
        Job {
            logs: merge_appended(&latest.logs, updated.logs),
            chat: merge_appended(&latest.chat, updated.chat),
            files_modified: merge_appended(&latest.files_modified, updated.files_modified),
            files_created: merge_appended(&latest.files_created, updated.files_created),
            files_deleted: merge_appended(&latest.files_deleted, updated.files_deleted),
            created_at: latest.created_at,
            ..updated
        }
    }
}

fn merge_appended<T: PartialEq + Clone>(latest: &[T], updated: Vec<T>) -> Vec<T> {
    let shared = latest
        .iter()
        .zip(updated.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut merged = latest.to_vec();
    merged.extend(updated.into_iter().skip(shared));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_keeps_concurrent_appends() {
        let now = Utc::now();
        let mut base = Job::new("job-1", now);
        base.logs = vec!["cloned".to_string()];

        // Another writer appended since we read `base`.
        let mut latest = base.clone();
        latest.logs.push("agent started".to_string());
        latest.chat.push(json!({"role": "assistant", "text": "hi"}));

        let mut ours = base.clone();
        ours.logs.push("tests passed".to_string());
        ours.status = JobStatus::Completed;
        ours.summary = Some("done".to_string());

        let merged = Job::merge_with_latest(&latest, ours);
        assert_eq!(merged.logs, vec!["cloned", "agent started", "tests passed"]);
        assert_eq!(merged.chat.len(), 1);
        assert_eq!(merged.status, JobStatus::Completed);
        assert_eq!(merged.summary.as_deref(), Some("done"));
    }

    #[test]
    fn test_merge_preserves_repeated_lines() {
        let now = Utc::now();
        let mut latest = Job::new("job-1", now);
        latest.logs = vec!["retrying".to_string()];
        let mut ours = latest.clone();
        ours.logs.push("retrying".to_string());
        let merged = Job::merge_with_latest(&latest, ours);
        assert_eq!(merged.logs, vec!["retrying", "retrying"]);
    }

    #[test]
    fn test_merge_with_stale_copy_drops_nothing() {
        let now = Utc::now();
        let mut latest = Job::new("job-1", now);
        latest.files_modified = vec!["a.rs".to_string(), "b.rs".to_string()];
        let stale = Job::new("job-1", now);
        let merged = Job::merge_with_latest(&latest, stale);
        assert_eq!(merged.files_modified, vec!["a.rs", "b.rs"]);
    }

    #[test]
    fn test_job_status_parse() {
        assert_eq!("failed".parse::<JobStatus>().unwrap(), JobStatus::Failed);
        assert!("unknown".parse::<JobStatus>().is_err());
    }
}
