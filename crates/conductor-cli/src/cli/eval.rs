//! `conductor eval`: evaluate a template or condition from the command line.

use std::collections::BTreeMap;

use anyhow::Result;
use serde_json::Value;

use conductor_core::expression::{ExpressionContext, ExpressionEngine, display};
use conductor_types::config::EngineConfig;

/// Build the evaluation context from CLI inputs.
pub fn build_context(work_item: Option<Value>, vars: BTreeMap<String, Value>) -> ExpressionContext {
    let ctx = ExpressionContext::default().with_variables(vars);
    match work_item {
        Some(item) => ctx.with_work_item(item),
        None => ctx,
    }
}

/// Evaluate `text` and render the result.
pub fn evaluate(text: &str, ctx: &ExpressionContext, condition: bool, config: &EngineConfig) -> Value {
    let engine = ExpressionEngine::new(config.max_expression_passes);
    if condition {
        match engine.evaluate_condition(text, ctx) {
            Some(b) => Value::Bool(b),
            None => Value::Null,
        }
    } else {
        engine.evaluate(text, ctx)
    }
}

pub fn handle_eval(
    text: &str,
    work_item: Option<Value>,
    vars: BTreeMap<String, Value>,
    condition: bool,
    json: bool,
) -> Result<()> {
    let ctx = build_context(work_item, vars);
    let value = evaluate(text, &ctx, condition, &EngineConfig::default());

    if json {
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", display(&value));
    }
    Ok(())
}
