//! SQLite job repository.
//!
//! The whole job is kept as a JSON blob in `data`; `status` is copied out.
//! Updates re-read the row inside the writer transaction and merge array
//! fields with it before writing back.

use chrono::Utc;
use conductor_core::repository::job::JobRepository;
use conductor_types::error::RepositoryError;
use conductor_types::job::Job;
use sqlx::{Row, SqliteConnection};

use super::pool::DatabasePool;
use super::{format_datetime, from_json, map_sqlx_error, to_json};

/// SQLite-backed implementation of `JobRepository`.
pub struct SqliteJobRepository {
    pool: DatabasePool,
}

impl SqliteJobRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

async fn load_job(conn: &mut SqliteConnection, id: &str) -> Result<Option<Job>, RepositoryError> {
    let row = sqlx::query("SELECT data FROM jobs WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    match row {
        Some(row) => {
            let data: String = row
                .try_get("data")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            Ok(Some(from_json(&data, "job")?))
        }
        None => Ok(None),
    }
}

/// Apply `transform` to the stored job and merge it back, on the caller's
/// connection (normally inside an open transaction). `None` if the job does
/// not exist.
pub(crate) async fn update_job_on(
    conn: &mut SqliteConnection,
    id: &str,
    transform: impl FnOnce(Job) -> Job,
) -> Result<Option<Job>, RepositoryError> {
    let Some(latest) = load_job(&mut *conn, id).await? else {
        return Ok(None);
    };

    let mut merged = Job::merge_with_latest(&latest, transform(latest.clone()));
    merged.id = latest.id.clone();
    merged.updated_at = Utc::now();

    sqlx::query("UPDATE jobs SET status = ?, data = ?, updated_at = ? WHERE id = ?")
        .bind(merged.status.as_str())
        .bind(to_json(&merged, "job")?)
        .bind(format_datetime(&merged.updated_at))
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    Ok(Some(merged))
}

impl JobRepository for SqliteJobRepository {
    async fn create_job(&self, job: &Job) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO jobs (id, status, data, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&job.id)
        .bind(job.status.as_str())
        .bind(to_json(job, "job")?)
        .bind(format_datetime(&job.created_at))
        .bind(format_datetime(&job.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.message().contains("UNIQUE") {
                    return RepositoryError::Conflict(format!("job {} already exists", job.id));
                }
            }
            map_sqlx_error(e)
        })?;

        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>, RepositoryError> {
        let mut conn = self.pool.reader.acquire().await.map_err(map_sqlx_error)?;
        load_job(&mut conn, id).await
    }

    async fn update_job<F>(&self, id: &str, transform: F) -> Result<Job, RepositoryError>
    where
        F: FnOnce(Job) -> Job + Send,
    {
        let mut tx = self.pool.writer.begin().await.map_err(map_sqlx_error)?;
        let updated = update_job_on(&mut tx, id, transform)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::job::JobStatus;

    async fn test_repo() -> (SqliteJobRepository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (SqliteJobRepository::new(pool), dir)
    }

    #[tokio::test]
    async fn test_create_get_and_duplicate() {
        let (repo, _dir) = test_repo().await;
        let job = Job::new("job-1", Utc::now());
        repo.create_job(&job).await.unwrap();
        assert_eq!(repo.get_job("job-1").await.unwrap().unwrap().status, JobStatus::Queued);
        assert!(matches!(repo.create_job(&job).await, Err(RepositoryError::Conflict(_))));
        assert!(repo.get_job("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_appends_and_keeps_arrays() {
        let (repo, _dir) = test_repo().await;
        repo.create_job(&Job::new("job-1", Utc::now())).await.unwrap();

        repo.update_job("job-1", |mut j| {
            j.logs.push("cloned".into());
            j.status = JobStatus::Running;
            j
        })
        .await
        .unwrap();

        // A transform that drops entries cannot erase persisted ones.
        let updated = repo
            .update_job("job-1", |mut j| {
                j.logs = vec!["replaced".into()];
                j.files_modified.push("src/lib.rs".into());
                j
            })
            .await
            .unwrap();
        assert_eq!(updated.logs, vec!["cloned".to_string(), "replaced".to_string()]);
        assert_eq!(updated.files_modified, vec!["src/lib.rs".to_string()]);
        assert_eq!(updated.status, JobStatus::Running);
        assert_eq!(repo.get_job("job-1").await.unwrap().unwrap(), updated);
    }

    #[tokio::test]
    async fn test_update_missing_job() {
        let (repo, _dir) = test_repo().await;
        assert!(matches!(
            repo.update_job("ghost", |j| j).await,
            Err(RepositoryError::NotFound)
        ));
    }
}
