//! SQLite execution state store.
//!
//! Implements `ExecutionRepository` from `conductor-core`. Every mutation
//! runs in one transaction on the single-connection writer pool and re-reads
//! the rows it changes, so concurrent callers serialize instead of
//! overwriting each other. Appending an event assigns the next sequence
//! number, folds the event into the execution row and, on a terminal
//! transition, updates the linked job, all in the same transaction.

use chrono::{Duration, SubsecRound, Utc};
use conductor_core::execution::{
    apply_event, check_append, event_derived_change, stale_failure_message, started_event,
    superseded_failure_message,
};
use conductor_core::repository::execution::ExecutionRepository;
use conductor_types::error::RepositoryError;
use conductor_types::event::{EventData, NewWorkflowEvent, WorkflowEvent};
use conductor_types::execution::{ExecutionStatus, WorkflowExecution};
use conductor_types::job::{Job, JobStatus};
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::job::update_job_on;
use super::pool::DatabasePool;
use super::{format_datetime, from_json, map_sqlx_error, parse_datetime, parse_uuid, to_json};

const EXECUTION_COLUMNS: &str = "id, workflow_id, work_item_id, job_id, status, current_step_id, \
     step_results, plan, worktree_path, branch_name, resume_job_id, error, created_at, updated_at, completed_at";

const EVENT_COLUMNS: &str =
    "id, execution_id, event_type, event_data, timestamp, sequence_number, metadata";

/// SQLite-backed implementation of `ExecutionRepository`.
pub struct SqliteExecutionRepository {
    pool: DatabasePool,
}

impl SqliteExecutionRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Row conversion
// ---------------------------------------------------------------------------

fn execution_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowExecution, RepositoryError> {
    let get = |col: &str| -> Result<Option<String>, RepositoryError> {
        row.try_get(col).map_err(|e| RepositoryError::Query(e.to_string()))
    };
    let required = |col: &str| -> Result<String, RepositoryError> {
        get(col)?.ok_or_else(|| RepositoryError::Query(format!("column {col} is NULL")))
    };

    let status = required("status")?;
    Ok(WorkflowExecution {
        id: parse_uuid(&required("id")?)?,
        workflow_id: required("workflow_id")?,
        work_item_id: required("work_item_id")?,
        job_id: get("job_id")?,
        status: status
            .parse::<ExecutionStatus>()
            .map_err(RepositoryError::Query)?,
        current_step_id: get("current_step_id")?,
        step_results: from_json(&required("step_results")?, "step results")?,
        plan: get("plan")?
            .as_deref()
            .map(|s| from_json(s, "plan"))
            .transpose()?,
        worktree_path: get("worktree_path")?,
        branch_name: get("branch_name")?,
        resume_job_id: get("resume_job_id")?,
        error: get("error")?,
        created_at: parse_datetime(&required("created_at")?)?,
        updated_at: parse_datetime(&required("updated_at")?)?,
        completed_at: get("completed_at")?
            .as_deref()
            .map(parse_datetime)
            .transpose()?,
    })
}

fn event_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowEvent, RepositoryError> {
    let q = |e: sqlx::Error| RepositoryError::Query(e.to_string());
    let id: String = row.try_get("id").map_err(q)?;
    let execution_id: String = row.try_get("execution_id").map_err(q)?;
    let event_type: String = row.try_get("event_type").map_err(q)?;
    let event_data: String = row.try_get("event_data").map_err(q)?;
    let timestamp: String = row.try_get("timestamp").map_err(q)?;
    let sequence_number: i64 = row.try_get("sequence_number").map_err(q)?;
    let metadata: Option<String> = row.try_get("metadata").map_err(q)?;

    let payload = from_json(&event_data, "event data")?;
    let data = EventData::from_parts(&event_type, payload)
        .map_err(|e| RepositoryError::Query(format!("invalid {event_type} event: {e}")))?;

    Ok(WorkflowEvent {
        id: parse_uuid(&id)?,
        execution_id: parse_uuid(&execution_id)?,
        data,
        timestamp: parse_datetime(&timestamp)?,
        sequence_number,
        metadata: metadata
            .as_deref()
            .map(|s| from_json(s, "event metadata"))
            .transpose()?,
    })
}

// ---------------------------------------------------------------------------
// Transaction-scoped helpers
// ---------------------------------------------------------------------------

async fn load_execution(
    conn: &mut SqliteConnection,
    id: &Uuid,
) -> Result<Option<WorkflowExecution>, RepositoryError> {
    let row = sqlx::query(&format!(
        "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE id = ?"
    ))
    .bind(id.to_string())
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    row.as_ref().map(execution_from_row).transpose()
}

async fn load_running_for(
    conn: &mut SqliteConnection,
    work_item_id: &str,
) -> Result<Option<WorkflowExecution>, RepositoryError> {
    let row = sqlx::query(&format!(
        "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE work_item_id = ? AND status = 'running'"
    ))
    .bind(work_item_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    row.as_ref().map(execution_from_row).transpose()
}

/// Turn a violation of the one-running-execution index into
/// [`RepositoryError::AlreadyRunning`].
async fn running_conflict(
    conn: &mut SqliteConnection,
    work_item_id: &str,
    e: sqlx::Error,
) -> RepositoryError {
    let unique = matches!(&e, sqlx::Error::Database(db) if db.message().contains("UNIQUE"));
    if unique {
        if let Ok(Some(existing)) = load_running_for(conn, work_item_id).await {
            return RepositoryError::AlreadyRunning {
                work_item_id: work_item_id.to_string(),
                execution_id: existing.id,
            };
        }
    }
    map_sqlx_error(e)
}

async fn insert_execution(
    conn: &mut SqliteConnection,
    execution: &WorkflowExecution,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(&format!(
        "INSERT INTO workflow_executions ({EXECUTION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(execution.id.to_string())
    .bind(&execution.workflow_id)
    .bind(&execution.work_item_id)
    .bind(&execution.job_id)
    .bind(execution.status.as_str())
    .bind(&execution.current_step_id)
    .bind(to_json(&execution.step_results, "step results")?)
    .bind(execution.plan.as_ref().map(|p| to_json(p, "plan")).transpose()?)
    .bind(&execution.worktree_path)
    .bind(&execution.branch_name)
    .bind(&execution.resume_job_id)
    .bind(&execution.error)
    .bind(format_datetime(&execution.created_at))
    .bind(format_datetime(&execution.updated_at))
    .bind(execution.completed_at.as_ref().map(format_datetime))
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) => Err(running_conflict(conn, &execution.work_item_id, e).await),
    }
}

async fn write_execution(
    conn: &mut SqliteConnection,
    execution: &WorkflowExecution,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        r#"UPDATE workflow_executions SET
             workflow_id = ?, work_item_id = ?, job_id = ?, status = ?, current_step_id = ?,
             step_results = ?, plan = ?, worktree_path = ?, branch_name = ?, resume_job_id = ?,
             error = ?, updated_at = ?, completed_at = ?
           WHERE id = ?"#,
    )
    .bind(&execution.workflow_id)
    .bind(&execution.work_item_id)
    .bind(&execution.job_id)
    .bind(execution.status.as_str())
    .bind(&execution.current_step_id)
    .bind(to_json(&execution.step_results, "step results")?)
    .bind(execution.plan.as_ref().map(|p| to_json(p, "plan")).transpose()?)
    .bind(&execution.worktree_path)
    .bind(&execution.branch_name)
    .bind(&execution.resume_job_id)
    .bind(&execution.error)
    .bind(format_datetime(&execution.updated_at))
    .bind(execution.completed_at.as_ref().map(format_datetime))
    .bind(execution.id.to_string())
    .execute(&mut *conn)
    .await;

    match result {
        Ok(done) if done.rows_affected() == 0 => Err(RepositoryError::NotFound),
        Ok(_) => Ok(()),
        Err(e) => Err(running_conflict(conn, &execution.work_item_id, e).await),
    }
}

async fn load_event(
    conn: &mut SqliteConnection,
    id: &Uuid,
) -> Result<Option<WorkflowEvent>, RepositoryError> {
    let row = sqlx::query(&format!("SELECT {EVENT_COLUMNS} FROM workflow_events WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    row.as_ref().map(event_from_row).transpose()
}

/// Job changes implied by an execution reaching a terminal status.
fn job_transition(event: &EventData, execution: &WorkflowExecution) -> Option<impl FnOnce(Job) -> Job> {
    let now = Utc::now();
    let (status, summary, error) = match (execution.status, event) {
        (ExecutionStatus::Completed, EventData::WorkflowCompleted { summary }) => {
            (JobStatus::Completed, summary.clone(), None)
        }
        (ExecutionStatus::Failed, EventData::WorkflowCancelled { reason }) => {
            (JobStatus::Cancelled, None, reason.clone())
        }
        (ExecutionStatus::Failed, _) => (JobStatus::Failed, None, execution.error.clone()),
        _ => return None,
    };
    Some(move |mut job: Job| {
        job.status = status;
        if summary.is_some() {
            job.summary = summary;
        }
        if error.is_some() {
            job.error = error;
        }
        job.updated_at = now;
        job
    })
}

/// Append `event` on an open transaction: idempotent on event id, dense
/// per-execution sequence, projection and job kept in step.
async fn append_on(
    conn: &mut SqliteConnection,
    event: NewWorkflowEvent,
) -> Result<WorkflowEvent, RepositoryError> {
    if let Some(existing) = load_event(&mut *conn, &event.id).await? {
        return Ok(existing);
    }

    let mut execution = load_execution(&mut *conn, &event.execution_id)
        .await?
        .ok_or(RepositoryError::NotFound)?;

    let next: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(sequence_number), -1) + 1 FROM workflow_events WHERE execution_id = ?",
    )
    .bind(event.execution_id.to_string())
    .fetch_one(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    check_append(&execution, &event.data, next).map_err(RepositoryError::Conflict)?;

    let mut stored = event.into_event(next);
    stored.timestamp = stored.timestamp.trunc_subsecs(6);
    let payload = stored
        .data
        .payload()
        .map_err(|e| RepositoryError::Query(format!("serialize event data: {e}")))?;

    let inserted = sqlx::query(&format!(
        "INSERT OR IGNORE INTO workflow_events ({EVENT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(stored.id.to_string())
    .bind(stored.execution_id.to_string())
    .bind(stored.event_type())
    .bind(to_json(&payload, "event data")?)
    .bind(format_datetime(&stored.timestamp))
    .bind(stored.sequence_number)
    .bind(stored.metadata.as_ref().map(|m| to_json(m, "event metadata")).transpose()?)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    if inserted.rows_affected() == 0 {
        return load_event(&mut *conn, &stored.id)
            .await?
            .ok_or_else(|| RepositoryError::Conflict(format!("event {} was not stored", stored.id)));
    }

    let was_terminal = execution.status.is_terminal();
    apply_event(&mut execution, &stored);
    write_execution(&mut *conn, &execution).await?;

    if !was_terminal && execution.status.is_terminal() {
        if let (Some(job_id), Some(transition)) =
            (execution.job_id.clone(), job_transition(&stored.data, &execution))
        {
            update_job_on(&mut *conn, &job_id, transition).await?;
        }
    }

    Ok(stored)
}

/// Re-read, transform and write back an execution on an open transaction.
/// Fields folded from the event log are rejected with `Conflict` if the
/// transform changes them.
async fn update_on<F>(
    conn: &mut SqliteConnection,
    id: &Uuid,
    update: F,
) -> Result<WorkflowExecution, RepositoryError>
where
    F: FnOnce(WorkflowExecution) -> Result<WorkflowExecution, RepositoryError>,
{
    let current = load_execution(&mut *conn, id)
        .await?
        .ok_or(RepositoryError::NotFound)?;
    let mut updated = update(current.clone())?;
    if let Some(field) = event_derived_change(&current, &updated) {
        return Err(RepositoryError::Conflict(format!(
            "execution {id}: {field} only changes through events"
        )));
    }
    updated.updated_at = Utc::now().trunc_subsecs(6);
    write_execution(&mut *conn, &updated).await?;
    Ok(updated)
}

/// Fail a stale running execution through its event log.
async fn fail_stale(
    conn: &mut SqliteConnection,
    execution: &WorkflowExecution,
    error: String,
) -> Result<(), RepositoryError> {
    let event = NewWorkflowEvent::new(
        execution.id,
        EventData::WorkflowFailed {
            error,
            step_id: execution.current_step_id.clone(),
        },
    );
    append_on(conn, event).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// ExecutionRepository impl
// ---------------------------------------------------------------------------

impl ExecutionRepository for SqliteExecutionRepository {
    async fn create_execution(
        &self,
        execution: &WorkflowExecution,
        stale_after: Duration,
    ) -> Result<WorkflowExecution, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(map_sqlx_error)?;

        if execution.status == ExecutionStatus::Running {
            if let Some(existing) = load_running_for(&mut tx, &execution.work_item_id).await? {
                if !existing.is_stale(Utc::now(), stale_after) {
                    return Err(RepositoryError::AlreadyRunning {
                        work_item_id: execution.work_item_id.clone(),
                        execution_id: existing.id,
                    });
                }
                tracing::info!(
                    execution_id = %existing.id,
                    work_item_id = %existing.work_item_id,
                    "failing stale execution before starting a new one"
                );
                fail_stale(&mut tx, &existing, superseded_failure_message(&execution.id)).await?;
            }
        }

        insert_execution(&mut tx, execution).await?;
        append_on(&mut tx, started_event(execution)).await?;
        let created = load_execution(&mut tx, &execution.id)
            .await?
            .ok_or(RepositoryError::NotFound)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(created)
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        let mut conn = self.pool.reader.acquire().await.map_err(map_sqlx_error)?;
        load_execution(&mut conn, id).await
    }

    async fn find_running_for_work_item(
        &self,
        work_item_id: &str,
    ) -> Result<Option<WorkflowExecution>, RepositoryError> {
        let mut conn = self.pool.reader.acquire().await.map_err(map_sqlx_error)?;
        load_running_for(&mut conn, work_item_id).await
    }

    async fn list_executions(
        &self,
        status: Option<ExecutionStatus>,
        limit: u32,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let rows = match status {
            Some(s) => {
                sqlx::query(&format!(
                    "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE status = ? ORDER BY updated_at DESC LIMIT ?"
                ))
                .bind(s.as_str())
                .bind(limit)
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {EXECUTION_COLUMNS} FROM workflow_executions ORDER BY updated_at DESC LIMIT ?"
                ))
                .bind(limit)
                .fetch_all(&self.pool.reader)
                .await
            }
        }
        .map_err(map_sqlx_error)?;

        rows.iter().map(execution_from_row).collect()
    }

    async fn update_execution<F>(&self, id: &Uuid, update: F) -> Result<WorkflowExecution, RepositoryError>
    where
        F: FnOnce(WorkflowExecution) -> Result<WorkflowExecution, RepositoryError> + Send,
    {
        let mut tx = self.pool.writer.begin().await.map_err(map_sqlx_error)?;
        let updated = update_on(&mut tx, id, update).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(updated)
    }

    async fn update_execution_and_job<F, G>(
        &self,
        id: &Uuid,
        update: F,
        job_update: G,
    ) -> Result<WorkflowExecution, RepositoryError>
    where
        F: FnOnce(WorkflowExecution) -> Result<WorkflowExecution, RepositoryError> + Send,
        G: FnOnce(Job) -> Job + Send,
    {
        let mut tx = self.pool.writer.begin().await.map_err(map_sqlx_error)?;

        let updated = update_on(&mut tx, id, update).await?;

        if let Some(job_id) = &updated.job_id {
            if update_job_on(&mut tx, job_id, job_update).await?.is_none() {
                tracing::debug!(execution_id = %id, job_id, "linked job not found, skipping job update");
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(updated)
    }

    async fn append_event(&self, event: NewWorkflowEvent) -> Result<WorkflowEvent, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(map_sqlx_error)?;
        let stored = append_on(&mut tx, event).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(stored)
    }

    async fn list_events(&self, execution_id: &Uuid) -> Result<Vec<WorkflowEvent>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM workflow_events WHERE execution_id = ? ORDER BY sequence_number ASC"
        ))
        .bind(execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(event_from_row).collect()
    }

    async fn recover_stale_executions(&self, stale_after: Duration) -> Result<Vec<Uuid>, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(map_sqlx_error)?;
        let cutoff = format_datetime(&(Utc::now() - stale_after));

        let rows = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE status = 'running' AND updated_at < ? ORDER BY id"
        ))
        .bind(&cutoff)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let mut recovered = Vec::with_capacity(rows.len());
        for row in &rows {
            let execution = execution_from_row(row)?;
            fail_stale(&mut tx, &execution, stale_failure_message(stale_after)).await?;
            tracing::info!(
                execution_id = %execution.id,
                work_item_id = %execution.work_item_id,
                "stale execution marked failed"
            );
            recovered.push(execution.id);
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(recovered)
    }

    async fn delete_execution(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM workflow_executions WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
