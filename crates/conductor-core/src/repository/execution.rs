//! Execution state store trait.
//!
//! The event log is authoritative; the execution row is a projection kept
//! in step with it inside the same transaction as every append.

use chrono::Duration;
use conductor_types::error::RepositoryError;
use conductor_types::event::{NewWorkflowEvent, WorkflowEvent};
use conductor_types::execution::{ExecutionStatus, WorkflowExecution};
use conductor_types::job::Job;
use uuid::Uuid;

/// Durable, event-sourced store of workflow executions.
pub trait ExecutionRepository: Send + Sync {
    /// Insert a new execution and its `workflow.started` event (sequence 0).
    ///
    /// When `execution` is `running` and the work item already has a running
    /// execution, fails with [`RepositoryError::AlreadyRunning`] unless that
    /// execution has not been updated for longer than `stale_after`; a stale
    /// one is failed (with its job) in the same transaction first.
    fn create_execution(
        &self,
        execution: &WorkflowExecution,
        stale_after: Duration,
    ) -> impl std::future::Future<Output = Result<WorkflowExecution, RepositoryError>> + Send;

    fn get_execution(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowExecution>, RepositoryError>> + Send;

    /// The running execution for a work item, if any.
    fn find_running_for_work_item(
        &self,
        work_item_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowExecution>, RepositoryError>> + Send;

    /// Most recently updated executions first.
    fn list_executions(
        &self,
        status: Option<ExecutionStatus>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecution>, RepositoryError>> + Send;

    /// Re-read the execution inside a transaction, apply `update`, write back.
    ///
    /// Only `plan`, `worktree_path` and `branch_name` may change here; a
    /// transform touching a field folded from the event log fails with
    /// [`RepositoryError::Conflict`].
    fn update_execution<F>(
        &self,
        id: &Uuid,
        update: F,
    ) -> impl std::future::Future<Output = Result<WorkflowExecution, RepositoryError>> + Send
    where
        F: FnOnce(WorkflowExecution) -> Result<WorkflowExecution, RepositoryError> + Send;

    /// Like [`update_execution`](Self::update_execution), and also update the
    /// linked job (if any) in the same transaction.
    fn update_execution_and_job<F, G>(
        &self,
        id: &Uuid,
        update: F,
        job_update: G,
    ) -> impl std::future::Future<Output = Result<WorkflowExecution, RepositoryError>> + Send
    where
        F: FnOnce(WorkflowExecution) -> Result<WorkflowExecution, RepositoryError> + Send,
        G: FnOnce(Job) -> Job + Send;

    /// Append an event with the next sequence number and fold it into the
    /// execution. Re-appending an existing event id returns the stored event.
    /// A repeated `workflow.started`, or anything but an agent decision on a
    /// terminal execution, fails with [`RepositoryError::Conflict`].
    fn append_event(
        &self,
        event: NewWorkflowEvent,
    ) -> impl std::future::Future<Output = Result<WorkflowEvent, RepositoryError>> + Send;

    /// All events of an execution in sequence order.
    fn list_events(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowEvent>, RepositoryError>> + Send;

    /// Fail every running execution not updated within `stale_after`.
    /// Returns the ids that were failed.
    fn recover_stale_executions(
        &self,
        stale_after: Duration,
    ) -> impl std::future::Future<Output = Result<Vec<Uuid>, RepositoryError>> + Send;

    /// Remove an execution and its events. Returns `true` if it existed.
    fn delete_execution(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
