//! Workflow inheritance (`extends`) resolution.
//!
//! The parent chain is walked iteratively with a visited list, so cycles
//! and over-deep chains are reported instead of recursing. Merging then
//! folds from the root ancestor down to the requested workflow.

use std::collections::BTreeMap;

use conductor_types::workflow::{SimpleStep, Step, StepKind, Workflow};

use super::WorkflowError;

/// Default maximum `extends` chain length.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Source of parent workflows during resolution.
pub trait WorkflowLookup: Send + Sync {
    fn find_workflow(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Workflow>, WorkflowError>> + Send;
}

impl<T: WorkflowLookup> WorkflowLookup for &T {
    async fn find_workflow(&self, id: &str) -> Result<Option<Workflow>, WorkflowError> {
        (**self).find_workflow(id).await
    }
}

/// Resolve `workflow`'s inheritance chain into a single flattened workflow.
///
/// Returns the workflow unchanged when it does not extend anything. The
/// result never has `extends` set.
pub async fn resolve<L: WorkflowLookup>(
    workflow: &Workflow,
    lookup: &L,
    max_depth: usize,
) -> Result<Workflow, WorkflowError> {
    if workflow.extends.is_none() {
        return Ok(workflow.clone());
    }

    let mut visited = vec![workflow.id.clone()];
    let mut chain = vec![workflow.clone()];
    let mut next = workflow.extends.clone();

    while let Some(parent_id) = next {
        if visited.contains(&parent_id) {
            visited.push(parent_id);
            return Err(WorkflowError::CircularInheritance {
                chain: visited.join(" -> "),
            });
        }
        if chain.len() > max_depth {
            return Err(WorkflowError::InheritanceDepthExceeded {
                workflow_id: workflow.id.clone(),
                max_depth,
            });
        }

        let child_id = visited.last().cloned().unwrap_or_default();
        let parent = lookup
            .find_workflow(&parent_id)
            .await?
            .ok_or_else(|| WorkflowError::ParentNotFound {
                parent_id: parent_id.clone(),
                child_id,
            })?;
        tracing::debug!(workflow = %workflow.id, parent = %parent_id, "resolved parent workflow");

        next = parent.extends.clone();
        visited.push(parent_id);
        chain.push(parent);
    }

    let mut lineage = chain.into_iter().rev();
    let root = lineage
        .next()
        .ok_or_else(|| WorkflowError::Validation("empty inheritance chain".to_string()))?;
    let mut merged = lineage.fold(root, merge);
    merged.extends = None;
    Ok(merged)
}

/// Overlay `child` onto an already-resolved `parent`.
pub fn merge(parent: Workflow, child: Workflow) -> Workflow {
    Workflow {
        id: child.id,
        name: child.name,
        description: child.description.or(parent.description),
        steps: merge_steps(parent.steps, child.steps),
        variables: overlay(parent.variables, child.variables),
        parameters: overlay(parent.parameters, child.parameters),
        extends: child.extends,
        is_abstract: child.is_abstract,
        metadata: overlay(parent.metadata, child.metadata),
        created_at: child.created_at,
        updated_at: child.updated_at,
    }
}

fn overlay<V>(mut base: BTreeMap<String, V>, top: BTreeMap<String, V>) -> BTreeMap<String, V> {
    base.extend(top);
    base
}

/// Merge step lists by id.
///
/// Walking the child's steps in order: a step whose id is already present
/// replaces it in place (simple steps merge their config). A new id goes
/// right after the last step the child placed; before anything is placed it
/// goes ahead of the first later child step the parent already has, or at
/// the end.
pub fn merge_steps(parent: Vec<Step>, child: Vec<Step>) -> Vec<Step> {
    let child_ids: Vec<String> = child.iter().map(|s| s.id.clone()).collect();
    let mut result = parent;
    let mut last_placed: Option<usize> = None;

    for (ci, step) in child.into_iter().enumerate() {
        if let Some(pos) = result.iter().position(|s| s.id == step.id) {
            let base = result.remove(pos);
            result.insert(pos, overlay_step(base, step));
            last_placed = Some(pos);
            continue;
        }

        let at = match last_placed {
            Some(p) => p + 1,
            None => child_ids[ci + 1..]
                .iter()
                .find_map(|id| result.iter().position(|s| &s.id == id))
                .unwrap_or(result.len()),
        };
        result.insert(at, step);
        last_placed = Some(at);
    }
    result
}

/// Child step over parent step with the same id.
fn overlay_step(parent: Step, child: Step) -> Step {
    let kind = match (parent.kind, child.kind) {
        (StepKind::Simple(p), StepKind::Simple(c)) => StepKind::Simple(SimpleStep {
            action: c.action,
            config: overlay(p.config, c.config),
            model: c.model.or(p.model),
            prompt: c.prompt.or(p.prompt),
        }),
        (_, other) => other,
    };
    Step {
        id: child.id,
        name: child.name.or(parent.name),
        kind,
        timeout: child.timeout.or(parent.timeout),
        retry_count: child.retry_count.or(parent.retry_count),
        continue_on_error: child.continue_on_error,
    }
}
