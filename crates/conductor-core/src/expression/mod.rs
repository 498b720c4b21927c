//! `${...}` expression language for workflow templates.
//!
//! Templates are plain strings containing zero or more `${expr}` spans. Each
//! span is tokenized and parsed once into an [`Expr`] tree (cached per
//! engine), then evaluated against an [`ExpressionContext`].
//!
//! An expression that evaluates to `undefined`, or fails, leaves its span
//! untouched so a later pass with more context can resolve it.

pub mod eval;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod template;
pub mod value;

use std::collections::BTreeMap;
use std::sync::Arc;

use conductor_types::execution::WorkflowExecution;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;

pub use parser::Expr;
pub use value::{display, truthy};

/// Default bound on template substitution passes.
pub const DEFAULT_MAX_PASSES: usize = 10;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while parsing or evaluating a single expression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("type error: {0}")]
    Type(String),
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Outcome of a step as seen from expressions (`stepResults.<id>.*`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Values visible to expressions. Built fresh for each evaluation round.
#[derive(Debug, Clone, Default)]
pub struct ExpressionContext {
    pub work_item: Option<Value>,
    pub step_results: BTreeMap<String, StepOutcome>,
    pub execution: Option<Value>,
    pub variables: BTreeMap<String, Value>,
}

impl ExpressionContext {
    pub fn with_work_item(mut self, work_item: Value) -> Self {
        self.work_item = Some(work_item);
        self
    }

    pub fn with_variables(mut self, variables: BTreeMap<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    pub fn insert_step_result(
        &mut self,
        step_id: &str,
        status: &str,
        result: Option<Value>,
        error: Option<String>,
    ) {
        self.step_results.insert(
            step_id.to_string(),
            StepOutcome {
                status: status.to_string(),
                result,
                error,
            },
        );
    }

    /// Context for evaluating templates mid-run. The latest result per step wins.
    pub fn for_execution(
        execution: &WorkflowExecution,
        work_item: Option<Value>,
        variables: BTreeMap<String, Value>,
    ) -> Self {
        let mut ctx = Self {
            work_item,
            variables,
            ..Self::default()
        };
        for r in &execution.step_results {
            ctx.insert_step_result(&r.step_id, r.status.as_str(), r.result.clone(), r.error.clone());
        }
        ctx.execution = serde_json::to_value(execution).ok().map(|mut v| {
            if let Some(obj) = v.as_object_mut() {
                obj.remove("stepResults");
            }
            v
        });
        ctx
    }

    /// Value of a top-level name: a context key, else a variable.
    pub fn root(&self, name: &str) -> Option<Value> {
        match name {
            "workItem" => self.work_item.clone(),
            "stepResults" => serde_json::to_value(&self.step_results).ok(),
            "execution" => self.execution.clone(),
            "variables" => Some(Value::Object(
                self.variables
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            )),
            other => self.variables.get(other).cloned(),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Template evaluator with a parsed-expression cache.
pub struct ExpressionEngine {
    max_passes: usize,
    cache: DashMap<String, Arc<Expr>>,
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PASSES)
    }
}

impl ExpressionEngine {
    pub fn new(max_passes: usize) -> Self {
        Self {
            max_passes: max_passes.max(1),
            cache: DashMap::new(),
        }
    }

    /// Parse `src` (the text inside `${...}`), reusing a cached tree.
    pub fn compile(&self, src: &str) -> Result<Arc<Expr>, ExpressionError> {
        if let Some(expr) = self.cache.get(src) {
            return Ok(Arc::clone(expr.value()));
        }
        let tokens = lexer::tokenize(src)?;
        let expr = Arc::new(parser::parse(&tokens)?);
        self.cache.insert(src.to_string(), Arc::clone(&expr));
        Ok(expr)
    }

    /// Evaluate a bare expression. `Ok(None)` is `undefined`.
    pub fn evaluate_expression(
        &self,
        src: &str,
        ctx: &ExpressionContext,
    ) -> Result<Option<Value>, ExpressionError> {
        let expr = self.compile(src)?;
        eval::eval(&expr, ctx)
    }

    /// Render a template.
    ///
    /// Text without `${` is returned verbatim. A template that is exactly one
    /// span yields the span's typed value; otherwise each span is replaced by
    /// its string form. Passes repeat until nothing changes or the pass bound
    /// is hit.
    pub fn evaluate(&self, text: &str, ctx: &ExpressionContext) -> Value {
        let mut current = text.to_string();

        for _ in 0..self.max_passes {
            if !current.contains("${") {
                break;
            }
            let spans = template::find_spans(&current);
            if spans.is_empty() {
                break;
            }

            if spans.len() == 1 && spans[0] == (0, current.len()) {
                match self.fragment(&current[2..current.len() - 1], ctx) {
                    Some(Value::String(s)) if s != current => {
                        current = s;
                        continue;
                    }
                    Some(Value::String(_)) | None => break,
                    Some(other) => return other,
                }
            }

            let mut next = String::with_capacity(current.len());
            let mut cursor = 0;
            for (start, end) in spans {
                next.push_str(&current[cursor..start]);
                match self.fragment(&current[start + 2..end - 1], ctx) {
                    Some(v) => next.push_str(&display(&v)),
                    None => next.push_str(&current[start..end]),
                }
                cursor = end;
            }
            next.push_str(&current[cursor..]);

            if next == current {
                break;
            }
            current = next;
        }

        Value::String(current)
    }

    /// Render every string inside `value`, recursing into arrays and objects.
    pub fn evaluate_value(&self, value: &Value, ctx: &ExpressionContext) -> Value {
        match value {
            Value::String(s) => self.evaluate(s, ctx),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.evaluate_value(v, ctx)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.evaluate_value(v, ctx)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Render a template and coerce to a boolean. `None` while unresolved
    /// spans remain.
    pub fn evaluate_condition(&self, text: &str, ctx: &ExpressionContext) -> Option<bool> {
        match self.evaluate(text, ctx) {
            Value::String(s) if !template::find_spans(&s).is_empty() => None,
            Value::String(s) if s == "false" => Some(false),
            other => Some(truthy(Some(&other))),
        }
    }

    fn fragment(&self, src: &str, ctx: &ExpressionContext) -> Option<Value> {
        match self.evaluate_expression(src, ctx) {
            Ok(Some(v)) => Some(v),
            Ok(None) => {
                tracing::debug!(expression = src, "expression undefined, preserving fragment");
                None
            }
            Err(e) => {
                tracing::warn!(expression = src, error = %e, "expression evaluation failed, preserving fragment");
                None
            }
        }
    }
}

/// Render `template` with a default engine.
pub fn evaluate(text: &str, ctx: &ExpressionContext) -> Value {
    ExpressionEngine::default().evaluate(text, ctx)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
