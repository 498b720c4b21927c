//! Job repository trait.

use conductor_types::error::RepositoryError;
use conductor_types::job::Job;

/// Storage for jobs linked to executions.
///
/// Updates are transactional and merge array fields with the latest
/// persisted row (see [`Job::merge_with_latest`]).
pub trait JobRepository: Send + Sync {
    fn create_job(
        &self,
        job: &Job,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_job(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Job>, RepositoryError>> + Send;

    /// Re-read the job, apply `transform`, merge arrays and write back in one
    /// transaction. Returns the stored job.
    fn update_job<F>(
        &self,
        id: &str,
        transform: F,
    ) -> impl std::future::Future<Output = Result<Job, RepositoryError>> + Send
    where
        F: FnOnce(Job) -> Job + Send;
}
