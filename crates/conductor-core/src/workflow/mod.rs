//! Workflow definitions: documents, inheritance, catalog and preparation.
//!
//! - `document` -- structured (YAML) parsing and validation
//! - `legacy` -- the flat JSON form and conversion to it
//! - `compiler` -- document to runtime model and back
//! - `inheritance` -- `extends` resolution and step merging
//! - `catalog` -- cache, store and file lookup of workflows by id
//! - `params` -- parameter, variable and step template binding
//! - `preparer` -- the one-call path from workflow id to a runnable workflow

pub mod catalog;
pub mod compiler;
pub mod document;
pub mod inheritance;
pub mod legacy;
pub mod params;
pub mod preparer;

use conductor_types::error::RepositoryError;

use crate::expression::ExpressionError;

pub use catalog::{WorkflowCache, WorkflowCatalog};
pub use compiler::{compile, convert, parse_workflow, serialize};
pub use document::{DocumentFormat, WorkflowDocument};
pub use inheritance::{WorkflowLookup, resolve};
pub use params::{resolve_parameters, resolve_step_variables};
pub use preparer::{PreparedWorkflow, WorkflowPreparer};

/// Errors raised while loading, resolving or preparing workflows.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("step '{step_id}' uses unsupported type '{step_type}': {hint}")]
    UnsupportedStepType {
        step_id: String,
        step_type: String,
        hint: String,
    },

    #[error("workflow '{workflow_id}' requires parameter '{parameter}'")]
    MissingParameter {
        workflow_id: String,
        parameter: String,
    },

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("parent workflow '{parent_id}' of '{child_id}' not found")]
    ParentNotFound { parent_id: String, child_id: String },

    #[error("circular inheritance: {chain}")]
    CircularInheritance { chain: String },

    #[error("inheritance chain of '{workflow_id}' exceeds max depth {max_depth}")]
    InheritanceDepthExceeded {
        workflow_id: String,
        max_depth: usize,
    },

    #[error("workflow '{0}' is abstract and can only be extended")]
    AbstractWorkflow(String),

    #[error("expression error: {0}")]
    Expression(#[from] ExpressionError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use chrono::Utc;
    use conductor_types::error::RepositoryError;
    use conductor_types::workflow::{Step, Workflow};

    use super::WorkflowError;
    use super::inheritance::WorkflowLookup;
    use crate::repository::workflow::WorkflowRepository;

    /// A workflow whose steps are `shell` actions with the given ids.
    pub fn workflow(id: &str, extends: Option<&str>, step_ids: &[&str]) -> Workflow {
        let now = Utc::now();
        Workflow {
            id: id.to_string(),
            name: id.to_string(),
            description: None,
            steps: step_ids.iter().map(|s| Step::action(*s, "shell")).collect(),
            variables: Default::default(),
            parameters: Default::default(),
            extends: extends.map(str::to_string),
            is_abstract: false,
            metadata: Default::default(),
            created_at: now,
            updated_at: now,
        }
    }

    impl WorkflowLookup for HashMap<String, Workflow> {
        async fn find_workflow(&self, id: &str) -> Result<Option<Workflow>, WorkflowError> {
            Ok(self.get(id).cloned())
        }
    }

    #[derive(Default)]
    pub struct MemoryWorkflowStore {
        items: Mutex<HashMap<String, Workflow>>,
    }

    impl WorkflowRepository for MemoryWorkflowStore {
        async fn save_workflow(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
            let mut items = self.items.lock().map_err(|e| RepositoryError::Query(e.to_string()))?;
            items.insert(workflow.id.clone(), workflow.clone());
            Ok(())
        }

        async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, RepositoryError> {
            let items = self.items.lock().map_err(|e| RepositoryError::Query(e.to_string()))?;
            Ok(items.get(id).cloned())
        }

        async fn list_workflows(&self) -> Result<Vec<Workflow>, RepositoryError> {
            let items = self.items.lock().map_err(|e| RepositoryError::Query(e.to_string()))?;
            let mut all: Vec<Workflow> = items.values().cloned().collect();
            all.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(all)
        }

        async fn delete_workflow(&self, id: &str) -> Result<bool, RepositoryError> {
            let mut items = self.items.lock().map_err(|e| RepositoryError::Query(e.to_string()))?;
            Ok(items.remove(id).is_some())
        }
    }
}
