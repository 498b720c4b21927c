//! Lowering between workflow documents and the runtime `Workflow` model.
//!
//! `compile` and `serialize` are inverses: for any valid workflow `w` in a
//! format that can express it, `compile(parse(serialize(w)))` equals `w`
//! apart from timestamps.

use chrono::{DateTime, Utc};
use conductor_types::workflow::Workflow;
use serde_json::Value;

use super::WorkflowError;
use super::document::{self, DocumentFormat, WorkflowDocument};
use super::legacy;

/// Build the runtime model from a parsed document.
pub fn compile(doc: WorkflowDocument, now: DateTime<Utc>) -> Workflow {
    Workflow {
        id: doc.id,
        name: doc.name,
        description: doc.description,
        steps: doc.steps,
        variables: doc.variables,
        parameters: doc.parameters,
        extends: doc.extends,
        is_abstract: doc.is_abstract,
        metadata: doc.metadata,
        created_at: now,
        updated_at: now,
    }
}

/// Parse and compile in one go.
pub fn parse_workflow(
    text: &str,
    format: DocumentFormat,
    now: DateTime<Utc>,
) -> Result<Workflow, WorkflowError> {
    Ok(compile(document::parse(text, format)?, now))
}

/// Document tree for the structured form (no timestamps).
pub fn to_structured_value(workflow: &Workflow) -> Result<Value, WorkflowError> {
    let mut value =
        serde_json::to_value(workflow).map_err(|e| WorkflowError::Parse(e.to_string()))?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("createdAt");
        obj.remove("updatedAt");
    }
    Ok(value)
}

/// Render a workflow as document text.
pub fn serialize(workflow: &Workflow, format: DocumentFormat) -> Result<String, WorkflowError> {
    match format {
        DocumentFormat::Structured => serde_yaml_ng::to_string(&to_structured_value(workflow)?)
            .map_err(|e| WorkflowError::Parse(e.to_string())),
        DocumentFormat::Legacy => serde_json::to_string_pretty(&legacy::to_legacy_value(workflow)?)
            .map_err(|e| WorkflowError::Parse(e.to_string())),
    }
}

/// Convert document text from one format to another.
pub fn convert(
    text: &str,
    from: DocumentFormat,
    to: DocumentFormat,
) -> Result<String, WorkflowError> {
    let workflow = parse_workflow(text, from, Utc::now())?;
    serialize(&workflow, to)
}
