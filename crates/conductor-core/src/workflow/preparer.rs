//! From workflow id to a runnable, fully bound workflow.

use std::collections::BTreeMap;

use conductor_types::config::EngineConfig;
use conductor_types::workflow::Workflow;
use serde_json::Value;

use super::WorkflowError;
use super::inheritance::{WorkflowLookup, resolve};
use super::params::{resolve_parameters, resolve_steps};
use crate::expression::{ExpressionContext, ExpressionEngine};

/// A flattened workflow with its bound variables.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedWorkflow {
    pub workflow: Workflow,
    pub variables: BTreeMap<String, Value>,
}

/// Runs inheritance resolution and template binding for a driver.
pub struct WorkflowPreparer<L: WorkflowLookup> {
    lookup: L,
    engine: ExpressionEngine,
    max_depth: usize,
}

impl<L: WorkflowLookup> WorkflowPreparer<L> {
    pub fn new(lookup: L, config: &EngineConfig) -> Self {
        Self {
            lookup,
            engine: ExpressionEngine::new(config.max_expression_passes),
            max_depth: config.max_inheritance_depth,
        }
    }

    pub fn engine(&self) -> &ExpressionEngine {
        &self.engine
    }

    /// Look up `workflow_id` and prepare it.
    pub async fn prepare(
        &self,
        workflow_id: &str,
        provided: &BTreeMap<String, Value>,
        work_item: Option<Value>,
    ) -> Result<PreparedWorkflow, WorkflowError> {
        let workflow = self
            .lookup
            .find_workflow(workflow_id)
            .await?
            .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))?;
        self.prepare_workflow(&workflow, provided, work_item).await
    }

    /// Resolve inheritance, reject abstract workflows, then bind parameters,
    /// variables and step templates.
    pub async fn prepare_workflow(
        &self,
        workflow: &Workflow,
        provided: &BTreeMap<String, Value>,
        work_item: Option<Value>,
    ) -> Result<PreparedWorkflow, WorkflowError> {
        let mut resolved = resolve(workflow, &self.lookup, self.max_depth).await?;
        if resolved.is_abstract {
            return Err(WorkflowError::AbstractWorkflow(resolved.id));
        }

        let mut ctx = ExpressionContext::default();
        ctx.work_item = work_item;
        let variables = resolve_parameters(&resolved, provided, &ctx, &self.engine)?;
        resolved.steps = resolve_steps(&resolved.steps, &variables, &ctx, &self.engine);

        tracing::debug!(
            workflow = %resolved.id,
            steps = resolved.step_count(),
            variables = variables.len(),
            "workflow prepared"
        );
        Ok(PreparedWorkflow {
            workflow: resolved,
            variables,
        })
    }
}
