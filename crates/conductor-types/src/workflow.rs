//! Workflow definition types for conductor.
//!
//! `Workflow` is the canonical runtime model: the structured YAML form, the
//! legacy flat JSON form and the stored JSON blob all convert to and from it.
//! Steps form a tree (conditional, loop and parallel steps own nested step
//! lists), and every list is addressed by step id.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn is_false(value: &bool) -> bool {
    !*value
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A declarative workflow definition.
///
/// Immutable once published. A workflow may `extend` another one, in which
/// case its steps are overlaid onto the parent's by the inheritance resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Catalog id (e.g. "fix-bug"). Unique across the catalog.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered top-level steps.
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Workflow-level variables, evaluated before parameters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, Value>,
    /// Declared parameters the caller may (or must) supply.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Parameter>,
    /// Parent workflow id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    /// Abstract workflows exist only to be extended and cannot run directly.
    #[serde(default, rename = "abstract", skip_serializing_if = "is_false")]
    pub is_abstract: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Find a step anywhere in the step tree by id (depth-first, first match).
    pub fn find_step(&self, step_id: &str) -> Option<&Step> {
        find_in(&self.steps, step_id)
    }

    /// Total number of steps, counting nested ones.
    pub fn step_count(&self) -> usize {
        fn count(steps: &[Step]) -> usize {
            steps
                .iter()
                .map(|s| 1 + s.child_lists().into_iter().map(|l| count(l)).sum::<usize>())
                .sum()
        }
        count(&self.steps)
    }
}

fn find_in<'a>(steps: &'a [Step], step_id: &str) -> Option<&'a Step> {
    for step in steps {
        if step.id == step_id {
            return Some(step);
        }
        for list in step.child_lists() {
            if let Some(found) = find_in(list, step_id) {
                return Some(found);
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// A declared workflow parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The JSON type a parameter value is expected to have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterType::String => "string",
            ParameterType::Number => "number",
            ParameterType::Boolean => "boolean",
            ParameterType::Object => "object",
            ParameterType::Array => "array",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(ParameterType::String),
            "number" => Some(ParameterType::Number),
            "boolean" => Some(ParameterType::Boolean),
            "object" => Some(ParameterType::Object),
            "array" => Some(ParameterType::Array),
            _ => None,
        }
    }

    /// Whether `value` has this JSON type.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParameterType::String => value.is_string(),
            ParameterType::Number => value.is_number(),
            ParameterType::Boolean => value.is_boolean(),
            ParameterType::Object => value.is_object(),
            ParameterType::Array => value.is_array(),
        }
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// One unit of work. The `type` field selects the [`StepKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Unique within the containing step list.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub kind: StepKind,
    /// Timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub continue_on_error: bool,
}

impl Step {
    pub fn new(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind,
            timeout: None,
            retry_count: None,
            continue_on_error: false,
        }
    }

    /// Shorthand for a simple action step with an empty config.
    pub fn action(id: impl Into<String>, action: impl Into<String>) -> Self {
        Self::new(
            id,
            StepKind::Simple(SimpleStep {
                action: action.into(),
                config: BTreeMap::new(),
                model: None,
                prompt: None,
            }),
        )
    }

    /// The document-level `type` tag of this step.
    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            StepKind::Simple(_) => "action",
            StepKind::Conditional(_) => "conditional",
            StepKind::Loop(_) => "loop",
            StepKind::Parallel(_) => "parallel",
        }
    }

    pub fn is_compound(&self) -> bool {
        !matches!(self.kind, StepKind::Simple(_))
    }

    /// All nested step lists owned by this step.
    pub fn child_lists(&self) -> Vec<&Vec<Step>> {
        match &self.kind {
            StepKind::Simple(_) => Vec::new(),
            StepKind::Conditional(c) => {
                let mut lists = vec![&c.then_steps, &c.else_steps];
                lists.extend(c.switch.values());
                lists.push(&c.default_steps);
                lists
            }
            StepKind::Loop(l) => vec![&l.steps],
            StepKind::Parallel(p) => vec![&p.steps],
        }
    }

    /// Mutable access to all nested step lists owned by this step.
    pub fn child_lists_mut(&mut self) -> Vec<&mut Vec<Step>> {
        match &mut self.kind {
            StepKind::Simple(_) => Vec::new(),
            StepKind::Conditional(c) => {
                let mut lists = vec![&mut c.then_steps, &mut c.else_steps];
                lists.extend(c.switch.values_mut());
                lists.push(&mut c.default_steps);
                lists
            }
            StepKind::Loop(l) => vec![&mut l.steps],
            StepKind::Parallel(p) => vec![&mut p.steps],
        }
    }
}

/// Step variants, internally tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StepKind {
    /// Run a single action (agent call, git operation, shell command, ...).
    #[serde(rename = "action")]
    Simple(SimpleStep),
    Conditional(ConditionalStep),
    Loop(LoopStep),
    Parallel(ParallelStep),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleStep {
    pub action: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// If/else branching, or switch on the condition's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalStep {
    pub condition: String,
    #[serde(rename = "if", default, skip_serializing_if = "Vec::is_empty")]
    pub then_steps: Vec<Step>,
    #[serde(rename = "else", default, skip_serializing_if = "Vec::is_empty")]
    pub else_steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub switch: BTreeMap<String, Vec<Step>>,
    #[serde(rename = "default", default, skip_serializing_if = "Vec::is_empty")]
    pub default_steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopStep {
    pub loop_type: LoopType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub break_on: Option<String>,
    #[serde(default)]
    pub on_error: LoopErrorPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopType {
    While,
    For,
    Retry,
}

impl LoopType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "while" => Some(LoopType::While),
            "for" => Some(LoopType::For),
            "retry" => Some(LoopType::Retry),
            _ => None,
        }
    }
}

/// What a loop does when an iteration fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopErrorPolicy {
    Continue,
    Break,
    #[default]
    Fail,
}

impl LoopErrorPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "continue" => Some(LoopErrorPolicy::Continue),
            "break" => Some(LoopErrorPolicy::Break),
            "fail" => Some(LoopErrorPolicy::Fail),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelStep {
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<u32>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub fail_fast: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_workflow() -> Workflow {
        let mut build = Step::action("build", "shell");
        if let StepKind::Simple(simple) = &mut build.kind {
            simple.config.insert("command".to_string(), json!("cargo build"));
        }
        Workflow {
            id: "fix-bug".to_string(),
            name: "Fix bug".to_string(),
            description: Some("Apply an agent fix and push".to_string()),
            steps: vec![
                Step::action("setup", "git.checkout"),
                Step::new(
                    "gate",
                    StepKind::Conditional(ConditionalStep {
                        condition: "${variables.run_build}".to_string(),
                        then_steps: vec![build],
                        else_steps: vec![],
                        switch: BTreeMap::new(),
                        default_steps: vec![],
                    }),
                ),
                Step::new(
                    "fanout",
                    StepKind::Parallel(ParallelStep {
                        steps: vec![Step::action("lint", "shell"), Step::action("test", "shell")],
                        max_concurrency: Some(2),
                        fail_fast: true,
                    }),
                ),
            ],
            variables: BTreeMap::from([("run_build".to_string(), json!(true))]),
            parameters: BTreeMap::from([(
                "branch".to_string(),
                Parameter {
                    param_type: ParameterType::String,
                    required: true,
                    default: None,
                    description: None,
                },
            )]),
            extends: None,
            is_abstract: false,
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_step_kind_serializes_type_tag() {
        let step = Step::action("setup", "git.checkout");
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["type"], "action");
        assert_eq!(json["action"], "git.checkout");
        assert!(json.get("continueOnError").is_none());
    }

    #[test]
    fn test_conditional_uses_if_else_keys() {
        let wf = sample_workflow();
        let json = serde_json::to_value(&wf.steps[1]).unwrap();
        assert_eq!(json["type"], "conditional");
        assert!(json["if"].is_array());
        assert!(json.get("else").is_none());
    }

    #[test]
    fn test_workflow_json_roundtrip() {
        let wf = sample_workflow();
        let text = serde_json::to_string(&wf).unwrap();
        let parsed: Workflow = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, wf);
    }

    #[test]
    fn test_workflow_yaml_roundtrip() {
        let wf = sample_workflow();
        let yaml = serde_yaml_ng::to_string(&wf).unwrap();
        assert!(yaml.contains("type: parallel"));
        let parsed: Workflow = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(parsed, wf);
    }

    #[test]
    fn test_find_step_descends_into_children() {
        let wf = sample_workflow();
        assert!(wf.find_step("build").is_some());
        assert!(wf.find_step("test").is_some());
        assert!(wf.find_step("missing").is_none());
        assert_eq!(wf.step_count(), 6);
    }

    #[test]
    fn test_loop_on_error_defaults_to_fail() {
        let step: Step = serde_json::from_value(json!({
            "id": "retry-tests",
            "type": "loop",
            "loopType": "retry",
            "maxIterations": 3,
            "steps": [{"id": "t", "type": "action", "action": "shell"}]
        }))
        .unwrap();
        match step.kind {
            StepKind::Loop(l) => {
                assert_eq!(l.on_error, LoopErrorPolicy::Fail);
                assert_eq!(l.loop_type, LoopType::Retry);
                assert_eq!(l.max_iterations, Some(3));
            }
            other => panic!("expected loop, got {other:?}"),
        }
    }

    #[test]
    fn test_parameter_type_matches() {
        assert!(ParameterType::String.matches(&json!("x")));
        assert!(ParameterType::Number.matches(&json!(1.5)));
        assert!(!ParameterType::Boolean.matches(&json!("true")));
        assert!(ParameterType::Array.matches(&json!([])));
        assert_eq!(ParameterType::parse("object"), Some(ParameterType::Object));
        assert_eq!(ParameterType::parse("date"), None);
    }
}
