//! Workflow definition repository trait.
//!
//! The durable tier of catalog lookup. Definitions are stored whole; the
//! repository does not validate them (see `WorkflowCatalog::publish`).

use conductor_types::error::RepositoryError;
use conductor_types::workflow::Workflow;

/// Repository trait for workflow definition persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    /// Upsert a workflow definition (insert or replace by id).
    fn save_workflow(
        &self,
        workflow: &Workflow,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a workflow definition by id.
    fn get_workflow(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Workflow>, RepositoryError>> + Send;

    /// List all workflow definitions ordered by id.
    fn list_workflows(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Workflow>, RepositoryError>> + Send;

    /// Delete a workflow definition. Returns `true` if it existed.
    fn delete_workflow(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
