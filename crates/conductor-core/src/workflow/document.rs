//! Structured workflow documents (YAML).
//!
//! Text is first read into a `serde_json::Value` tree, so syntax errors stay
//! apart from shape errors. Each step is then deserialized on its own into a
//! typed record, which lets an error name the step it comes from.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use conductor_types::workflow::{
    ConditionalStep, LoopErrorPolicy, LoopStep, LoopType, ParallelStep, Parameter, SimpleStep, Step,
    StepKind, Workflow,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{WorkflowError, legacy};

/// On-disk workflow formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// YAML with the full step grammar and `extends`.
    Structured,
    /// Flat JSON where each step's `type` is its action.
    Legacy,
}

impl DocumentFormat {
    /// Pick a format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Some(DocumentFormat::Structured),
            Some("json") => Some(DocumentFormat::Legacy),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Structured => "yaml",
            DocumentFormat::Legacy => "json",
        }
    }
}

/// Parsed and validated workflow document, before timestamps are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowDocument {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub extends: Option<String>,
    pub is_abstract: bool,
    pub parameters: BTreeMap<String, Parameter>,
    pub variables: BTreeMap<String, Value>,
    pub metadata: BTreeMap<String, Value>,
    pub steps: Vec<Step>,
}

// ---------------------------------------------------------------------------
// Document records
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StructuredDocument {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    extends: Option<String>,
    #[serde(default, rename = "abstract")]
    is_abstract: bool,
    #[serde(default)]
    parameters: BTreeMap<String, Parameter>,
    #[serde(default)]
    variables: BTreeMap<String, Value>,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
    #[serde(default)]
    steps: Option<Vec<Value>>,
}

/// The fields needed to pick a step's shape. Everything else is ignored
/// here and checked by the full record.
#[derive(Debug, Deserialize)]
pub(crate) struct StepHeader {
    pub id: String,
    #[serde(rename = "type", default)]
    pub step_type: Option<String>,
    #[serde(default)]
    pub action: Option<Value>,
}

/// Every field any structured step may carry. Nested step lists stay as
/// trees and are parsed with their own scope.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StructuredStep {
    id: String,
    #[serde(rename = "type", default)]
    step_type: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    retry_count: Option<u32>,
    #[serde(default)]
    continue_on_error: bool,

    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    config: BTreeMap<String, Value>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    prompt: Option<String>,

    #[serde(default)]
    condition: Option<String>,
    #[serde(rename = "if", default)]
    then_steps: Option<Vec<Value>>,
    #[serde(rename = "else", default)]
    else_steps: Option<Vec<Value>>,
    #[serde(default)]
    switch: BTreeMap<String, Vec<Value>>,
    #[serde(rename = "default", default)]
    default_steps: Option<Vec<Value>>,

    #[serde(default)]
    loop_type: Option<LoopType>,
    #[serde(default)]
    max_iterations: Option<u32>,
    #[serde(default)]
    steps: Option<Vec<Value>>,
    #[serde(default)]
    break_on: Option<String>,
    #[serde(default)]
    on_error: Option<LoopErrorPolicy>,

    #[serde(default)]
    max_concurrency: Option<u32>,
    #[serde(default)]
    fail_fast: bool,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse document text in the given format.
pub fn parse(text: &str, format: DocumentFormat) -> Result<WorkflowDocument, WorkflowError> {
    match format {
        DocumentFormat::Structured => {
            let root: Value = serde_yaml_ng::from_str(text)
                .map_err(|e| WorkflowError::Parse(e.to_string()))?;
            parse_structured(&root)
        }
        DocumentFormat::Legacy => {
            let root: Value =
                serde_json::from_str(text).map_err(|e| WorkflowError::Parse(e.to_string()))?;
            legacy::parse_legacy(&root)
        }
    }
}

/// Parse a structured document tree.
pub fn parse_structured(root: &Value) -> Result<WorkflowDocument, WorkflowError> {
    if !root.is_object() {
        return Err(invalid("workflow document must be a mapping"));
    }
    let raw: StructuredDocument = from_tree(root, "workflow")?;
    let scope = format!("workflow '{}'", raw.id);
    let steps = match &raw.steps {
        Some(items) => parse_steps(items, &scope)?,
        None => Vec::new(),
    };

    let doc = WorkflowDocument {
        id: raw.id,
        name: raw.name,
        description: raw.description,
        extends: raw.extends,
        is_abstract: raw.is_abstract,
        parameters: raw.parameters,
        variables: raw.variables,
        metadata: raw.metadata,
        steps,
    };
    check_document(&doc.id, &doc.name, doc.is_abstract, doc.extends.is_some(), &doc.steps)?;
    Ok(doc)
}

fn parse_steps(items: &[Value], scope: &str) -> Result<Vec<Step>, WorkflowError> {
    items.iter().map(|item| parse_step(item, scope)).collect()
}

fn parse_step(value: &Value, scope: &str) -> Result<Step, WorkflowError> {
    let header = step_header(value, scope)?;
    let sscope = format!("step '{}'", header.id);
    match header.step_type.as_deref() {
        None if header.action.is_none() => {
            return Err(invalid(format!("{sscope} is missing 'type'")));
        }
        None | Some("action" | "simple" | "conditional" | "loop" | "parallel") => {}
        Some(other) => return Err(unsupported_or_unknown(&header.id, other)),
    }

    let StructuredStep {
        id,
        step_type,
        name,
        timeout,
        retry_count,
        continue_on_error,
        action,
        config,
        model,
        prompt,
        condition,
        then_steps,
        else_steps,
        switch,
        default_steps,
        loop_type,
        max_iterations,
        steps,
        break_on,
        on_error,
        max_concurrency,
        fail_fast,
    } = from_tree(value, &sscope)?;

    let kind = match step_type.as_deref() {
        Some("conditional") => StepKind::Conditional(ConditionalStep {
            condition: required_text(condition, "condition", &sscope)?,
            then_steps: branch(then_steps, "if", &sscope)?,
            else_steps: branch(else_steps, "else", &sscope)?,
            switch: switch
                .iter()
                .map(|(label, items)| {
                    Ok((label.clone(), parse_steps(items, &format!("{sscope} case '{label}'"))?))
                })
                .collect::<Result<_, WorkflowError>>()?,
            default_steps: branch(default_steps, "default", &sscope)?,
        }),
        Some("loop") => StepKind::Loop(LoopStep {
            loop_type: required(loop_type, "loopType", &sscope)?,
            condition,
            max_iterations,
            steps: parse_steps(&required(steps, "steps", &sscope)?, &sscope)?,
            break_on,
            on_error: on_error.unwrap_or_default(),
        }),
        Some("parallel") => StepKind::Parallel(ParallelStep {
            steps: parse_steps(&required(steps, "steps", &sscope)?, &sscope)?,
            max_concurrency,
            fail_fast,
        }),
        _ => StepKind::Simple(SimpleStep {
            action: required_text(action, "action", &sscope)?,
            config,
            model,
            prompt,
        }),
    };

    Ok(Step {
        id,
        name,
        kind,
        timeout,
        retry_count,
        continue_on_error,
    })
}

fn branch(items: Option<Vec<Value>>, key: &str, scope: &str) -> Result<Vec<Step>, WorkflowError> {
    match items {
        Some(items) => parse_steps(&items, &format!("{scope} '{key}' branch")),
        None => Ok(Vec::new()),
    }
}

/// Read a step's id and type, for both document formats.
pub(crate) fn step_header(value: &Value, scope: &str) -> Result<StepHeader, WorkflowError> {
    if !value.is_object() {
        return Err(invalid(format!("{scope}: each step must be a mapping")));
    }
    from_tree(value, &format!("{scope} step"))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Error for a step type this engine does not run.
///
/// `subworkflow` and `slot` belonged to an older composition model and get a
/// migration hint.
pub(crate) fn unsupported_or_unknown(step_id: &str, step_type: &str) -> WorkflowError {
    let hint = match step_type {
        "subworkflow" => {
            "inline the sub-workflow's steps, or move shared steps into a parent workflow and use 'extends'"
        }
        "slot" => {
            "slots were replaced by inheritance: declare a step with the same id in a workflow that 'extends' this one"
        }
        _ => {
            return invalid(format!(
                "step '{step_id}' has unknown type '{step_type}' (expected action, conditional, loop or parallel)"
            ));
        }
    };
    WorkflowError::UnsupportedStepType {
        step_id: step_id.to_string(),
        step_type: step_type.to_string(),
        hint: hint.to_string(),
    }
}

fn check_unique_ids(steps: &[Step], scope: &str) -> Result<(), WorkflowError> {
    let mut seen = HashSet::new();
    for step in steps {
        if step.id.trim().is_empty() {
            return Err(invalid(format!("{scope}: step id must not be empty")));
        }
        if !seen.insert(step.id.as_str()) {
            return Err(invalid(format!("{scope}: duplicate step id '{}'", step.id)));
        }
    }
    Ok(())
}

/// Document-level rules shared by both parsers and [`validate`].
pub(crate) fn check_document(
    id: &str,
    name: &str,
    is_abstract: bool,
    extends: bool,
    steps: &[Step],
) -> Result<(), WorkflowError> {
    if id.trim().is_empty() {
        return Err(invalid("workflow id must not be empty"));
    }
    if name.trim().is_empty() {
        return Err(invalid(format!("workflow '{id}' has an empty name")));
    }
    if steps.is_empty() && !is_abstract && !extends {
        return Err(invalid(format!(
            "workflow '{id}' must define at least one step in 'steps'"
        )));
    }
    validate_steps(steps, &format!("workflow '{id}'"))
}

/// Check the invariants of an in-memory workflow: non-empty id and name,
/// steps present unless abstract or extending, and the step rules every
/// parsed document obeys.
pub fn validate(workflow: &Workflow) -> Result<(), WorkflowError> {
    check_document(
        &workflow.id,
        &workflow.name,
        workflow.is_abstract,
        workflow.extends.is_some(),
        &workflow.steps,
    )
}

/// Unique ids per list, bounded loops, non-empty loop and parallel bodies.
fn validate_steps(steps: &[Step], scope: &str) -> Result<(), WorkflowError> {
    check_unique_ids(steps, scope)?;
    for step in steps {
        let sscope = format!("step '{}'", step.id);
        match &step.kind {
            StepKind::Loop(l) => {
                if l.condition.is_none() && l.max_iterations.is_none() {
                    return Err(invalid(format!(
                        "{sscope}: a loop needs a 'condition' or 'maxIterations'"
                    )));
                }
                if l.steps.is_empty() {
                    return Err(invalid(format!("{sscope}: 'steps' must not be empty")));
                }
            }
            StepKind::Parallel(p) => {
                if p.max_concurrency == Some(0) {
                    return Err(invalid(format!(
                        "{sscope}: 'maxConcurrency' must be at least 1"
                    )));
                }
                if p.steps.is_empty() {
                    return Err(invalid(format!("{sscope}: 'steps' must not be empty")));
                }
            }
            StepKind::Simple(_) | StepKind::Conditional(_) => {}
        }
        for list in step.child_lists() {
            validate_steps(list, &sscope)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

pub(crate) fn invalid(msg: impl Into<String>) -> WorkflowError {
    WorkflowError::Validation(msg.into())
}

/// Deserialize a document tree, prefixing serde's message with `scope`.
pub(crate) fn from_tree<T: DeserializeOwned>(value: &Value, scope: &str) -> Result<T, WorkflowError> {
    T::deserialize(value).map_err(|e| invalid(format!("{scope}: {e}")))
}

fn required<T>(value: Option<T>, key: &str, scope: &str) -> Result<T, WorkflowError> {
    value.ok_or_else(|| invalid(format!("{scope} is missing '{key}'")))
}

fn required_text(value: Option<String>, key: &str, scope: &str) -> Result<String, WorkflowError> {
    match required(value, key, scope)? {
        s if s.trim().is_empty() => Err(invalid(format!("{scope}: '{key}' must not be empty"))),
        s => Ok(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::workflow::ParameterType;

    const FIX_BUG: &str = r#"
id: fix-bug
name: Fix bug
description: Branch, let the agent fix, push
parameters:
  base:
    type: string
    default: main
  reviewers:
    type: array
variables:
  branch: "fix/${workItem.id}"
steps:
  - id: setup
    action: git.checkout
    config:
      ref: "${base}"
  - id: gate
    type: conditional
    condition: "${workItem.type}"
    switch:
      bug:
        - id: reproduce
          type: action
          action: agent.run
    default:
      - id: skip-note
        type: simple
        action: log
  - id: retry-tests
    type: loop
    loopType: retry
    maxIterations: 3
    onError: break
    steps:
      - id: test
        action: shell
        timeout: 600
        retryCount: 1
  - id: checks
    type: parallel
    maxConcurrency: 2
    failFast: true
    steps:
      - { id: lint, action: shell }
      - { id: audit, action: shell, continueOnError: true }
"#;

    #[test]
    fn test_parse_structured_document() {
        let doc = parse(FIX_BUG, DocumentFormat::Structured).unwrap();
        assert_eq!(doc.id, "fix-bug");
        assert_eq!(doc.steps.len(), 4);
        assert_eq!(doc.parameters["base"].default, Some(Value::String("main".into())));
        assert_eq!(doc.parameters["reviewers"].param_type, ParameterType::Array);

        match &doc.steps[1].kind {
            StepKind::Conditional(c) => {
                assert_eq!(c.switch["bug"][0].id, "reproduce");
                assert_eq!(c.default_steps[0].type_name(), "action");
            }
            other => panic!("expected conditional, got {other:?}"),
        }
        match &doc.steps[2].kind {
            StepKind::Loop(l) => {
                assert_eq!(l.on_error, LoopErrorPolicy::Break);
                assert_eq!(l.steps[0].timeout, Some(600));
                assert_eq!(l.steps[0].retry_count, Some(1));
            }
            other => panic!("expected loop, got {other:?}"),
        }
        match &doc.steps[3].kind {
            StepKind::Parallel(p) => {
                assert_eq!(p.max_concurrency, Some(2));
                assert!(p.steps[1].continue_on_error);
            }
            other => panic!("expected parallel, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_required_fields() {
        let err = parse("name: x\nsteps: []", DocumentFormat::Structured).unwrap_err();
        assert!(err.to_string().contains("`id`"), "{err}");
        let err = parse("id: x\nsteps: []", DocumentFormat::Structured).unwrap_err();
        assert!(err.to_string().contains("`name`"), "{err}");
        let err = parse("id: x\nname: X", DocumentFormat::Structured).unwrap_err();
        assert!(err.to_string().contains("'steps'"), "{err}");
    }

    #[test]
    fn test_empty_steps_only_allowed_for_abstract_or_child() {
        assert!(parse("id: x\nname: X\nsteps: []", DocumentFormat::Structured).is_err());
        assert!(parse("id: x\nname: X\nabstract: true", DocumentFormat::Structured).is_ok());
        assert!(parse("id: x\nname: X\nextends: base", DocumentFormat::Structured).is_ok());
    }

    #[test]
    fn test_rejects_subworkflow_with_hint() {
        let yaml = "id: x\nname: X\nsteps:\n  - id: nested\n    type: subworkflow\n";
        match parse(yaml, DocumentFormat::Structured).unwrap_err() {
            WorkflowError::UnsupportedStepType { step_id, step_type, hint } => {
                assert_eq!(step_id, "nested");
                assert_eq!(step_type, "subworkflow");
                assert!(hint.contains("extends"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_rejects_slot_and_unknown_types() {
        let slot = "id: x\nname: X\nsteps:\n  - id: s\n    type: slot\n";
        assert!(matches!(
            parse(slot, DocumentFormat::Structured),
            Err(WorkflowError::UnsupportedStepType { .. })
        ));
        let unknown = "id: x\nname: X\nsteps:\n  - id: s\n    type: teleport\n";
        assert!(matches!(
            parse(unknown, DocumentFormat::Structured),
            Err(WorkflowError::Validation(_))
        ));
    }

    #[test]
    fn test_duplicate_ids_rejected_per_list() {
        let dup = "id: x\nname: X\nsteps:\n  - {id: a, action: shell}\n  - {id: a, action: shell}\n";
        let err = parse(dup, DocumentFormat::Structured).unwrap_err();
        assert!(err.to_string().contains("duplicate step id 'a'"));

        // The same id in a nested list is a different scope.
        let nested = r#"
id: x
name: X
steps:
  - {id: a, action: shell}
  - id: p
    type: parallel
    steps:
      - {id: a, action: shell}
"#;
        assert!(parse(nested, DocumentFormat::Structured).is_ok());
    }

    #[test]
    fn test_invalid_loop_and_parallel_shapes() {
        let bad_loop = "id: x\nname: X\nsteps:\n  - id: l\n    type: loop\n    loopType: forever\n    maxIterations: 2\n    steps: [{id: a, action: shell}]\n";
        assert!(parse(bad_loop, DocumentFormat::Structured).is_err());
        let unbounded = "id: x\nname: X\nsteps:\n  - id: l\n    type: loop\n    loopType: while\n    steps: [{id: a, action: shell}]\n";
        assert!(parse(unbounded, DocumentFormat::Structured).is_err());
        let zero = "id: x\nname: X\nsteps:\n  - id: p\n    type: parallel\n    maxConcurrency: 0\n    steps: [{id: a, action: shell}]\n";
        assert!(parse(zero, DocumentFormat::Structured).is_err());
    }

    #[test]
    fn test_unknown_fields_are_rejected_with_scope() {
        let err = parse("id: x\nname: X\nstepz: []\n", DocumentFormat::Structured).unwrap_err();
        assert!(err.to_string().contains("stepz"), "{err}");

        let yaml = "id: x\nname: X\nsteps:\n  - id: build\n    action: shell\n    retries: 3\n";
        let err = parse(yaml, DocumentFormat::Structured).unwrap_err();
        assert!(err.to_string().contains("step 'build'"), "{err}");
        assert!(err.to_string().contains("retries"), "{err}");
    }

    #[test]
    fn test_wrong_field_type_names_the_step() {
        let yaml = "id: x\nname: X\nsteps:\n  - id: build\n    action: shell\n    timeout: soon\n";
        let err = parse(yaml, DocumentFormat::Structured).unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
        assert!(err.to_string().contains("step 'build'"), "{err}");
    }

    #[test]
    fn test_empty_parallel_body_rejected() {
        let yaml = "id: x\nname: X\nsteps:\n  - id: p\n    type: parallel\n    steps: []\n";
        let err = parse(yaml, DocumentFormat::Structured).unwrap_err();
        assert!(err.to_string().contains("must not be empty"), "{err}");
    }

    #[test]
    fn test_bad_yaml_is_parse_error() {
        assert!(matches!(
            parse("id: [unclosed", DocumentFormat::Structured),
            Err(WorkflowError::Parse(_))
        ));
        assert!(matches!(
            parse("- just\n- a list\n", DocumentFormat::Structured),
            Err(WorkflowError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_in_memory_workflow() {
        let now = chrono::Utc::now();
        let mut wf = Workflow {
            id: "wf".into(),
            name: "WF".into(),
            description: None,
            steps: vec![Step::action("a", "shell"), Step::action("a", "shell")],
            variables: BTreeMap::new(),
            parameters: BTreeMap::new(),
            extends: None,
            is_abstract: false,
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        };
        assert!(validate(&wf).is_err());
        wf.steps.pop();
        assert!(validate(&wf).is_ok());
        wf.steps.clear();
        assert!(validate(&wf).is_err());
        wf.is_abstract = true;
        assert!(validate(&wf).is_ok());
    }

    #[test]
    fn test_validate_applies_document_step_rules() {
        let now = chrono::Utc::now();
        let unbounded = Step::new(
            "retry",
            StepKind::Loop(LoopStep {
                loop_type: LoopType::While,
                condition: None,
                max_iterations: None,
                steps: vec![Step::action("test", "shell")],
                break_on: None,
                on_error: LoopErrorPolicy::Fail,
            }),
        );
        let empty_parallel = Step::new(
            "checks",
            StepKind::Parallel(ParallelStep {
                steps: Vec::new(),
                max_concurrency: None,
                fail_fast: false,
            }),
        );
        let mut wf = Workflow {
            id: "wf".into(),
            name: "WF".into(),
            description: None,
            steps: vec![unbounded],
            variables: BTreeMap::new(),
            parameters: BTreeMap::new(),
            extends: None,
            is_abstract: false,
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        };
        let err = validate(&wf).unwrap_err();
        assert!(err.to_string().contains("'maxIterations'"), "{err}");

        wf.steps = vec![empty_parallel];
        let err = validate(&wf).unwrap_err();
        assert!(err.to_string().contains("step 'checks'"), "{err}");

        // Nested lists are checked too.
        wf.steps = vec![Step::new(
            "outer",
            StepKind::Parallel(ParallelStep {
                steps: vec![Step::new(
                    "inner",
                    StepKind::Parallel(ParallelStep {
                        steps: Vec::new(),
                        max_concurrency: None,
                        fail_fast: false,
                    }),
                )],
                max_concurrency: Some(2),
                fail_fast: false,
            }),
        )];
        assert!(validate(&wf).unwrap_err().to_string().contains("step 'inner'"));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            DocumentFormat::from_path(Path::new("a/fix.yml")),
            Some(DocumentFormat::Structured)
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("fix.json")),
            Some(DocumentFormat::Legacy)
        );
        assert_eq!(DocumentFormat::from_path(Path::new("fix.toml")), None);
    }
}
