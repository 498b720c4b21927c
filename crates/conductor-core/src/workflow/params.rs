//! Binding of parameters, workflow variables and step templates.

use std::collections::BTreeMap;

use conductor_types::workflow::{Step, StepKind, Workflow};
use serde_json::Value;

use super::WorkflowError;
use crate::expression::{ExpressionContext, ExpressionEngine, display};

/// Resolve the variables a workflow run sees.
///
/// Merge priority, lowest first: caller-provided values, the workflow's own
/// `variables` (evaluated, so they may reference each other and the
/// provided values), then declared parameters (provided value, else
/// default, both evaluated). A required parameter with neither is an error.
pub fn resolve_parameters(
    workflow: &Workflow,
    provided: &BTreeMap<String, Value>,
    ctx: &ExpressionContext,
    engine: &ExpressionEngine,
) -> Result<BTreeMap<String, Value>, WorkflowError> {
    let mut vars = provided.clone();
    vars.extend(workflow.variables.clone());

    // Variables may reference one another in any order; iterate to a fixpoint.
    for _ in 0..=workflow.variables.len() {
        let scope = ctx.clone().with_variables(vars.clone());
        let mut changed = false;
        for (name, raw) in &workflow.variables {
            let current = vars.get(name).unwrap_or(raw);
            let next = engine.evaluate_value(current, &scope);
            if &next != current {
                vars.insert(name.clone(), next);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    for (name, param) in &workflow.parameters {
        let source = provided.get(name).or(param.default.as_ref());
        let Some(raw) = source else {
            if param.required {
                return Err(WorkflowError::MissingParameter {
                    workflow_id: workflow.id.clone(),
                    parameter: name.clone(),
                });
            }
            continue;
        };

        let scope = ctx.clone().with_variables(vars.clone());
        let value = engine.evaluate_value(raw, &scope);
        if !param.param_type.matches(&value) {
            tracing::warn!(
                workflow = %workflow.id,
                parameter = %name,
                expected = param.param_type.as_str(),
                "parameter value does not match its declared type"
            );
        }
        vars.insert(name.clone(), value);
    }

    Ok(vars)
}

/// Resolve templates in a step's `config` and `prompt`, recursing into the
/// step lists of compound steps. Unresolvable fragments are kept verbatim.
pub fn resolve_step_variables(
    step: &Step,
    vars: &BTreeMap<String, Value>,
    ctx: &ExpressionContext,
    engine: &ExpressionEngine,
) -> Step {
    let scope = ctx.clone().with_variables(vars.clone());
    let mut out = step.clone();
    resolve_in_place(&mut out, &scope, engine);
    out
}

/// [`resolve_step_variables`] over a whole step list.
pub fn resolve_steps(
    steps: &[Step],
    vars: &BTreeMap<String, Value>,
    ctx: &ExpressionContext,
    engine: &ExpressionEngine,
) -> Vec<Step> {
    let scope = ctx.clone().with_variables(vars.clone());
    steps
        .iter()
        .map(|step| {
            let mut out = step.clone();
            resolve_in_place(&mut out, &scope, engine);
            out
        })
        .collect()
}

fn resolve_in_place(step: &mut Step, scope: &ExpressionContext, engine: &ExpressionEngine) {
    if let StepKind::Simple(simple) = &mut step.kind {
        for value in simple.config.values_mut() {
            *value = engine.evaluate_value(value, scope);
        }
        if let Some(prompt) = simple.prompt.as_mut() {
            *prompt = match engine.evaluate(prompt, scope) {
                Value::String(s) => s,
                other => display(&other),
            };
        }
    }
    for list in step.child_lists_mut() {
        for child in list.iter_mut() {
            resolve_in_place(child, scope, engine);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::workflow::{
        ConditionalStep, LoopErrorPolicy, LoopStep, LoopType, Parameter, ParameterType, SimpleStep,
    };
    use crate::workflow::test_support::workflow;
    use serde_json::json;

    fn param(ty: ParameterType, required: bool, default: Option<Value>) -> Parameter {
        Parameter {
            param_type: ty,
            required,
            default,
            description: None,
        }
    }

    fn ctx() -> ExpressionContext {
        ExpressionContext::default().with_work_item(json!({"id": 42, "title": "Broken Login"}))
    }

    #[test]
    fn test_variables_can_reference_each_other() {
        let mut wf = workflow("wf", None, &["a"]);
        wf.variables.insert("branch".into(), json!("fix/${ticket}"));
        wf.variables.insert("ticket".into(), json!("${workItem.id}"));
        let vars = resolve_parameters(&wf, &BTreeMap::new(), &ctx(), &ExpressionEngine::default()).unwrap();
        assert_eq!(vars["ticket"], json!(42));
        assert_eq!(vars["branch"], json!("fix/42"));
    }

    #[test]
    fn test_parameters_use_provided_then_default() {
        let mut wf = workflow("wf", None, &["a"]);
        wf.variables.insert("prefix".into(), json!("feature"));
        wf.parameters.insert("base".into(), param(ParameterType::String, false, Some(json!("main"))));
        wf.parameters.insert(
            "branch".into(),
            param(ParameterType::String, true, Some(json!("${prefix}/${slugify(workItem.title)}"))),
        );
        wf.parameters.insert("depth".into(), param(ParameterType::Number, false, None));

        let provided = BTreeMap::from([
            ("base".to_string(), json!("develop")),
            ("extra".to_string(), json!("kept")),
        ]);
        let vars = resolve_parameters(&wf, &provided, &ctx(), &ExpressionEngine::default()).unwrap();
        assert_eq!(vars["base"], json!("develop"));
        assert_eq!(vars["branch"], json!("feature/broken-login"));
        assert_eq!(vars["extra"], json!("kept"));
        assert!(!vars.contains_key("depth"));
    }

    #[test]
    fn test_workflow_variables_override_provided_passthrough() {
        let mut wf = workflow("wf", None, &["a"]);
        wf.variables.insert("mode".into(), json!("strict"));
        let provided = BTreeMap::from([("mode".to_string(), json!("loose"))]);
        let vars = resolve_parameters(&wf, &provided, &ctx(), &ExpressionEngine::default()).unwrap();
        assert_eq!(vars["mode"], json!("strict"));
    }

    #[test]
    fn test_missing_required_parameter() {
        let mut wf = workflow("wf", None, &["a"]);
        wf.parameters.insert("target".into(), param(ParameterType::String, true, None));
        match resolve_parameters(&wf, &BTreeMap::new(), &ctx(), &ExpressionEngine::default()) {
            Err(WorkflowError::MissingParameter { workflow_id, parameter }) => {
                assert_eq!(workflow_id, "wf");
                assert_eq!(parameter, "target");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_type_mismatch_is_not_fatal() {
        let mut wf = workflow("wf", None, &["a"]);
        wf.parameters.insert("count".into(), param(ParameterType::Number, false, None));
        let provided = BTreeMap::from([("count".to_string(), json!("many"))]);
        let vars = resolve_parameters(&wf, &provided, &ctx(), &ExpressionEngine::default()).unwrap();
        assert_eq!(vars["count"], json!("many"));
    }

    #[test]
    fn test_step_variables_recurse_and_preserve_unresolved() {
        let leaf = Step::new(
            "fix",
            StepKind::Simple(SimpleStep {
                action: "agent.run".into(),
                config: BTreeMap::from([
                    ("branch".to_string(), json!("${branch}")),
                    ("later".to_string(), json!("${stepResults.plan.result}")),
                    ("nested".to_string(), json!({"files": ["${workItem.id}.md"]})),
                ]),
                model: None,
                prompt: Some("Fix ${workItem.title}".into()),
            }),
        );
        let looped = Step::new(
            "retry",
            StepKind::Loop(LoopStep {
                loop_type: LoopType::Retry,
                condition: None,
                max_iterations: Some(3),
                steps: vec![leaf],
                break_on: None,
                on_error: LoopErrorPolicy::Fail,
            }),
        );
        let gate = Step::new(
            "gate",
            StepKind::Conditional(ConditionalStep {
                condition: "${branch}".into(),
                then_steps: vec![looped],
                else_steps: vec![],
                switch: BTreeMap::new(),
                default_steps: vec![],
            }),
        );

        let vars = BTreeMap::from([("branch".to_string(), json!("fix/42"))]);
        let resolved = resolve_step_variables(&gate, &vars, &ctx(), &ExpressionEngine::default());

        let StepKind::Conditional(cond) = &resolved.kind else { panic!("kind changed") };
        assert_eq!(cond.condition, "${branch}");
        let StepKind::Loop(lp) = &cond.then_steps[0].kind else { panic!("kind changed") };
        let StepKind::Simple(simple) = &lp.steps[0].kind else { panic!("kind changed") };
        assert_eq!(simple.config["branch"], json!("fix/42"));
        assert_eq!(simple.config["later"], json!("${stepResults.plan.result}"));
        assert_eq!(simple.config["nested"], json!({"files": ["42.md"]}));
        assert_eq!(simple.prompt.as_deref(), Some("Fix Broken Login"));
    }

    #[test]
    fn test_resolve_steps_maps_every_step() {
        let mut wf = workflow("wf", None, &["a", "b"]);
        for step in &mut wf.steps {
            if let StepKind::Simple(s) = &mut step.kind {
                s.config.insert("ticket".into(), json!("${workItem.id}"));
            }
        }
        let out = resolve_steps(&wf.steps, &BTreeMap::new(), &ctx(), &ExpressionEngine::default());
        for step in out {
            let StepKind::Simple(s) = step.kind else { panic!("kind changed") };
            assert_eq!(s.config["ticket"], json!(42));
        }
    }
}
