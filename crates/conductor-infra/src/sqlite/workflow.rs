//! SQLite workflow definition repository.
//!
//! Implements `WorkflowRepository` from `conductor-core`. Definitions are
//! stored whole as JSON; `extends_id` and `is_abstract` are copied out for
//! querying.

use conductor_core::repository::workflow::WorkflowRepository;
use conductor_types::error::RepositoryError;
use conductor_types::workflow::Workflow;
use sqlx::Row;

use super::pool::DatabasePool;
use super::{format_datetime, from_json, map_sqlx_error, to_json};

/// SQLite-backed implementation of `WorkflowRepository`.
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn definition_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Workflow, RepositoryError> {
    let definition: String = row
        .try_get("definition")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    from_json(&definition, "workflow definition")
}

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        let definition = to_json(workflow, "workflow definition")?;

        sqlx::query(
            r#"INSERT INTO workflows (id, name, extends_id, is_abstract, definition, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 extends_id = excluded.extends_id,
                 is_abstract = excluded.is_abstract,
                 definition = excluded.definition,
                 updated_at = excluded.updated_at"#,
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.extends)
        .bind(workflow.is_abstract)
        .bind(&definition)
        .bind(format_datetime(&workflow.created_at))
        .bind(format_datetime(&workflow.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, RepositoryError> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(map_sqlx_error)?;

        row.as_ref().map(definition_from_row).transpose()
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>, RepositoryError> {
        let rows = sqlx::query("SELECT definition FROM workflows ORDER BY id ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(map_sqlx_error)?;

        rows.iter().map(definition_from_row).collect()
    }

    async fn delete_workflow(&self, id: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id)
            .execute(&self.pool.writer)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use conductor_types::workflow::Step;

    async fn test_pool() -> (DatabasePool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (pool, dir)
    }

    fn workflow(id: &str, extends: Option<&str>) -> Workflow {
        let now = Utc::now();
        Workflow {
            id: id.to_string(),
            name: format!("Workflow {id}"),
            description: None,
            steps: vec![Step::action("build", "shell")],
            variables: Default::default(),
            parameters: Default::default(),
            extends: extends.map(str::to_string),
            is_abstract: false,
            metadata: Default::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_save_and_get_workflow() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let wf = workflow("fix-bug", Some("base"));
        repo.save_workflow(&wf).await.unwrap();

        let loaded = repo.get_workflow("fix-bug").await.unwrap().unwrap();
        assert_eq!(loaded, wf);
        assert!(repo.get_workflow("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_upserts() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let mut wf = workflow("a", None);
        repo.save_workflow(&wf).await.unwrap();
        wf.name = "Renamed".into();
        repo.save_workflow(&wf).await.unwrap();

        let all = repo.list_workflows().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "Renamed");
    }

    #[tokio::test]
    async fn test_list_is_ordered_and_delete() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        for id in ["c", "a", "b"] {
            repo.save_workflow(&workflow(id, None)).await.unwrap();
        }
        let ids: Vec<String> = repo.list_workflows().await.unwrap().into_iter().map(|w| w.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        assert!(repo.delete_workflow("b").await.unwrap());
        assert!(!repo.delete_workflow("b").await.unwrap());
        assert_eq!(repo.list_workflows().await.unwrap().len(), 2);
    }
}
