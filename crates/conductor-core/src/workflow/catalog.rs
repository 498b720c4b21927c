//! Workflow catalog: cache, then durable store, then workflow files.
//!
//! The cache is an explicit, caller-owned object shared through `Arc`;
//! nothing here is process-global.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use conductor_types::workflow::Workflow;
use dashmap::DashMap;

use super::WorkflowError;
use super::compiler::parse_workflow;
use super::document::{self, DocumentFormat};
use super::inheritance::WorkflowLookup;
use crate::repository::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// WorkflowCache
// ---------------------------------------------------------------------------

/// In-memory workflow cache keyed by id.
#[derive(Debug, Default)]
pub struct WorkflowCache {
    entries: DashMap<String, Workflow>,
}

impl WorkflowCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Workflow> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, workflow: Workflow) {
        self.entries.insert(workflow.id.clone(), workflow);
    }

    pub fn invalidate(&self, id: &str) {
        self.entries.remove(id);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// WorkflowCatalog
// ---------------------------------------------------------------------------

/// Finds workflows by id across the cache, an optional store and an
/// optional directory of workflow documents, in that order.
pub struct WorkflowCatalog<R: WorkflowRepository> {
    cache: Arc<WorkflowCache>,
    store: Option<R>,
    workflows_dir: Option<PathBuf>,
}

impl<R: WorkflowRepository> WorkflowCatalog<R> {
    pub fn new(cache: Arc<WorkflowCache>, store: Option<R>, workflows_dir: Option<PathBuf>) -> Self {
        Self {
            cache,
            store,
            workflows_dir,
        }
    }

    pub fn cache(&self) -> &Arc<WorkflowCache> {
        &self.cache
    }

    pub fn store(&self) -> Option<&R> {
        self.store.as_ref()
    }

    /// Look a workflow up by id. Hits from the store or files are cached.
    pub async fn find(&self, id: &str) -> Result<Option<Workflow>, WorkflowError> {
        if let Some(hit) = self.cache.get(id) {
            return Ok(Some(hit));
        }

        if let Some(store) = &self.store {
            if let Some(found) = store.get_workflow(id).await? {
                tracing::debug!(workflow = id, "workflow loaded from store");
                self.cache.insert(found.clone());
                return Ok(Some(found));
            }
        }

        if let Some(dir) = &self.workflows_dir {
            if let Some(found) = find_in_directory(dir, id).await? {
                tracing::debug!(workflow = id, "workflow loaded from file catalog");
                self.cache.insert(found.clone());
                return Ok(Some(found));
            }
        }

        Ok(None)
    }

    /// Validate and persist a workflow, refreshing the cache.
    pub async fn publish(&self, workflow: &Workflow) -> Result<(), WorkflowError> {
        document::validate(workflow)?;
        if let Some(store) = &self.store {
            store.save_workflow(workflow).await?;
        }
        self.cache.insert(workflow.clone());
        tracing::info!(workflow = %workflow.id, "workflow published");
        Ok(())
    }

    /// Remove a workflow from the store and cache. Returns `true` if the
    /// store had it.
    pub async fn remove(&self, id: &str) -> Result<bool, WorkflowError> {
        self.cache.invalidate(id);
        match &self.store {
            Some(store) => Ok(store.delete_workflow(id).await?),
            None => Ok(false),
        }
    }
}

impl<R: WorkflowRepository> WorkflowLookup for WorkflowCatalog<R> {
    async fn find_workflow(&self, id: &str) -> Result<Option<Workflow>, WorkflowError> {
        self.find(id).await
    }
}

// ---------------------------------------------------------------------------
// File catalog
// ---------------------------------------------------------------------------

/// Load one workflow document, choosing the format by extension.
pub async fn load_workflow_file(path: &Path) -> Result<Workflow, WorkflowError> {
    let format = DocumentFormat::from_path(path).ok_or_else(|| {
        WorkflowError::Validation(format!(
            "unsupported workflow file extension: {}",
            path.display()
        ))
    })?;
    let text = tokio::fs::read_to_string(path).await?;
    parse_workflow(&text, format, Utc::now())
}

/// All `.yaml`, `.yml` and `.json` files under `dir`, sorted.
pub async fn discover_workflow_files(dir: &Path) -> Result<Vec<PathBuf>, WorkflowError> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if DocumentFormat::from_path(&path).is_some() {
                found.push(path);
            }
        }
    }

    found.sort();
    Ok(found)
}

/// `{dir}/{id}.yaml|yml|json` first, then any document under `dir` whose
/// `id` matches. Unparseable files are skipped with a warning.
async fn find_in_directory(dir: &Path, id: &str) -> Result<Option<Workflow>, WorkflowError> {
    for ext in ["yaml", "yml", "json"] {
        let candidate = dir.join(format!("{id}.{ext}"));
        if tokio::fs::try_exists(&candidate).await? {
            let workflow = load_workflow_file(&candidate).await?;
            if workflow.id == id {
                return Ok(Some(workflow));
            }
        }
    }

    for path in discover_workflow_files(dir).await? {
        match load_workflow_file(&path).await {
            Ok(workflow) if workflow.id == id => return Ok(Some(workflow)),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable workflow file");
            }
        }
    }
    Ok(None)
}
