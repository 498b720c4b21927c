//! Legacy flat workflow form (JSON).
//!
//! Every step is a simple action and its `type` field names the action.
//! There is no inheritance and no nesting.

use std::collections::BTreeMap;

use conductor_types::workflow::{Parameter, SimpleStep, Step, StepKind, Workflow};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::WorkflowError;
use super::document::{
    WorkflowDocument, check_document, from_tree, invalid, step_header, unsupported_or_unknown,
};

const COMPOUND_TYPES: [&str; 3] = ["conditional", "loop", "parallel"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct LegacyDocument {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: BTreeMap<String, Parameter>,
    #[serde(default)]
    variables: BTreeMap<String, Value>,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
    steps: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct LegacyStep {
    id: String,
    #[serde(rename = "type")]
    step_type: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    config: BTreeMap<String, Value>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    retry_count: Option<u32>,
    #[serde(default)]
    continue_on_error: bool,
}

pub fn parse_legacy(root: &Value) -> Result<WorkflowDocument, WorkflowError> {
    let obj = root
        .as_object()
        .ok_or_else(|| invalid("legacy workflow must be a JSON object"))?;
    for key in ["extends", "abstract"] {
        if obj.contains_key(key) {
            return Err(invalid(format!(
                "legacy workflow: '{key}' is only supported by the structured (YAML) format"
            )));
        }
    }

    let raw: LegacyDocument = from_tree(root, "legacy workflow")?;
    let steps = raw
        .steps
        .iter()
        .map(parse_legacy_step)
        .collect::<Result<Vec<_>, _>>()?;
    check_document(&raw.id, &raw.name, false, false, &steps)?;

    Ok(WorkflowDocument {
        id: raw.id,
        name: raw.name,
        description: raw.description,
        extends: None,
        is_abstract: false,
        parameters: raw.parameters,
        variables: raw.variables,
        metadata: raw.metadata,
        steps,
    })
}

fn parse_legacy_step(value: &Value) -> Result<Step, WorkflowError> {
    let header = step_header(value, "legacy workflow")?;
    let scope = format!("step '{}'", header.id);
    let step_type = header
        .step_type
        .ok_or_else(|| invalid(format!("{scope} is missing 'type'")))?;

    if COMPOUND_TYPES.contains(&step_type.as_str()) {
        return Err(invalid(format!(
            "{scope} uses '{step_type}', which needs the structured (YAML) format"
        )));
    }
    if step_type == "subworkflow" || step_type == "slot" {
        return Err(unsupported_or_unknown(&header.id, &step_type));
    }

    let raw: LegacyStep = from_tree(value, &scope)?;
    let action = match raw.action {
        Some(action) if raw.step_type == "action" => action,
        _ => raw.step_type,
    };
    if action.trim().is_empty() {
        return Err(invalid(format!("{scope}: 'type' must not be empty")));
    }

    Ok(Step {
        id: raw.id,
        name: raw.name,
        kind: StepKind::Simple(SimpleStep {
            action,
            config: raw.config,
            model: raw.model,
            prompt: raw.prompt,
        }),
        timeout: raw.timeout,
        retry_count: raw.retry_count,
        continue_on_error: raw.continue_on_error,
    })
}

/// Lower a workflow to the legacy form. Fails for anything the flat form
/// cannot express.
pub fn to_legacy_value(workflow: &Workflow) -> Result<Value, WorkflowError> {
    let scope = format!("workflow '{}'", workflow.id);
    if workflow.extends.is_some() {
        return Err(invalid(format!(
            "{scope} uses 'extends'; resolve inheritance before converting to the legacy format"
        )));
    }
    if workflow.is_abstract {
        return Err(invalid(format!(
            "{scope} is abstract and cannot be expressed in the legacy format"
        )));
    }

    let mut steps = Vec::with_capacity(workflow.steps.len());
    for step in &workflow.steps {
        let StepKind::Simple(simple) = &step.kind else {
            return Err(invalid(format!(
                "step '{}' is a {} step, which the legacy format cannot express",
                step.id,
                step.type_name()
            )));
        };
        let mut out = Map::new();
        out.insert("id".into(), json!(step.id));
        if let Some(name) = &step.name {
            out.insert("name".into(), json!(name));
        }
        out.insert("type".into(), json!(simple.action));
        if !simple.config.is_empty() {
            out.insert("config".into(), to_object(&simple.config));
        }
        if let Some(model) = &simple.model {
            out.insert("model".into(), json!(model));
        }
        if let Some(prompt) = &simple.prompt {
            out.insert("prompt".into(), json!(prompt));
        }
        if let Some(timeout) = step.timeout {
            out.insert("timeout".into(), json!(timeout));
        }
        if let Some(retry_count) = step.retry_count {
            out.insert("retryCount".into(), json!(retry_count));
        }
        if step.continue_on_error {
            out.insert("continueOnError".into(), json!(true));
        }
        steps.push(Value::Object(out));
    }

    let mut root = Map::new();
    root.insert("id".into(), json!(workflow.id));
    root.insert("name".into(), json!(workflow.name));
    if let Some(description) = &workflow.description {
        root.insert("description".into(), json!(description));
    }
    if !workflow.parameters.is_empty() {
        root.insert(
            "parameters".into(),
            serde_json::to_value(&workflow.parameters)
                .map_err(|e| WorkflowError::Parse(e.to_string()))?,
        );
    }
    if !workflow.variables.is_empty() {
        root.insert("variables".into(), to_object(&workflow.variables));
    }
    if !workflow.metadata.is_empty() {
        root.insert("metadata".into(), to_object(&workflow.metadata));
    }
    root.insert("steps".into(), Value::Array(steps));
    Ok(Value::Object(root))
}

fn to_object(map: &BTreeMap<String, Value>) -> Value {
    Value::Object(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::document::{DocumentFormat, parse};

    const LEGACY: &str = r#"{
        "id": "triage",
        "name": "Triage",
        "parameters": {"label": {"type": "string", "required": true}},
        "steps": [
            {"id": "read", "type": "ado.fetch", "config": {"expand": true}},
            {"id": "classify", "type": "agent.run", "model": "large", "prompt": "Classify ${workItem.title}", "retryCount": 2},
            {"id": "tag", "type": "action", "action": "ado.tag", "continueOnError": true}
        ]
    }"#;

    #[test]
    fn test_parse_legacy_uses_type_as_action() {
        let doc = parse(LEGACY, DocumentFormat::Legacy).unwrap();
        assert_eq!(doc.steps.len(), 3);
        match &doc.steps[0].kind {
            StepKind::Simple(s) => {
                assert_eq!(s.action, "ado.fetch");
                assert_eq!(s.config["expand"], json!(true));
            }
            other => panic!("unexpected {other:?}"),
        }
        match &doc.steps[2].kind {
            StepKind::Simple(s) => assert_eq!(s.action, "ado.tag"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(doc.steps[1].retry_count, Some(2));
        assert!(doc.parameters["label"].required);
    }

    #[test]
    fn test_legacy_rejects_nested_types() {
        let text = r#"{"id":"x","name":"X","steps":[{"id":"l","type":"loop"}]}"#;
        let err = parse(text, DocumentFormat::Legacy).unwrap_err();
        assert!(err.to_string().contains("structured"), "{err}");
    }

    #[test]
    fn test_legacy_rejects_subworkflow_with_hint() {
        let text = r#"{"id":"x","name":"X","steps":[{"id":"s","type":"subworkflow"}]}"#;
        assert!(matches!(
            parse(text, DocumentFormat::Legacy),
            Err(WorkflowError::UnsupportedStepType { .. })
        ));
    }

    #[test]
    fn test_legacy_rejects_inheritance_keys() {
        let text = r#"{"id":"x","name":"X","extends":"base","steps":[{"id":"a","type":"shell"}]}"#;
        assert!(parse(text, DocumentFormat::Legacy).is_err());
    }

    #[test]
    fn test_legacy_rejects_unknown_step_fields() {
        let text = r#"{"id":"x","name":"X","steps":[{"id":"a","type":"shell","retries":2}]}"#;
        let err = parse(text, DocumentFormat::Legacy).unwrap_err();
        assert!(err.to_string().contains("step 'a'"), "{err}");
        assert!(err.to_string().contains("retries"), "{err}");
    }

    #[test]
    fn test_to_legacy_rejects_compound_steps() {
        let yaml = "id: x\nname: X\nsteps:\n  - id: p\n    type: parallel\n    steps: [{id: a, action: shell}]\n";
        let doc = parse(yaml, DocumentFormat::Structured).unwrap();
        let wf = crate::workflow::compiler::compile(doc, chrono::Utc::now());
        let err = to_legacy_value(&wf).unwrap_err();
        assert!(err.to_string().contains("parallel"));
    }
}
