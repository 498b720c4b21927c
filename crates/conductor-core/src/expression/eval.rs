//! Tree-walking evaluator for parsed expressions.

use serde_json::Value;

use super::parser::{BinaryOp, Expr, LogicalOp, Segment};
use super::value::{as_number, compare, display, number, strict_equals, truthy};
use super::{ExpressionContext, ExpressionError, functions};

/// Evaluate `expr` against `ctx`. `Ok(None)` means the result is undefined.
pub fn eval(expr: &Expr, ctx: &ExpressionContext) -> Result<Option<Value>, ExpressionError> {
    match expr {
        Expr::Literal(v) => Ok(Some(v.clone())),
        Expr::Undefined => Ok(None),
        Expr::Path { root, segments } => resolve_path(root, segments, ctx),
        Expr::Call { name, args } => {
            let values = args
                .iter()
                .map(|a| eval(a, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            functions::call(name, values)
        }
        Expr::Ternary {
            condition,
            then,
            otherwise,
        } => match eval(condition, ctx)? {
            None => Ok(None),
            Some(c) if truthy(Some(&c)) => eval(then, ctx),
            Some(_) => eval(otherwise, ctx),
        },
        Expr::Logical { op, left, right } => {
            let l = eval(left, ctx)?;
            let take_left = match op {
                LogicalOp::Or => truthy(l.as_ref()),
                LogicalOp::And => !truthy(l.as_ref()),
            };
            if take_left { Ok(l) } else { eval(right, ctx) }
        }
        Expr::Negate(inner) => match eval(inner, ctx)? {
            None => Ok(None),
            Some(v) => {
                let n = as_number(&v).ok_or_else(|| {
                    ExpressionError::Type(format!("cannot negate '{}'", display(&v)))
                })?;
                Ok(Some(number(-n)?))
            }
        },
        Expr::Binary { op, left, right } => {
            let (Some(l), Some(r)) = (eval(left, ctx)?, eval(right, ctx)?) else {
                return Ok(None);
            };
            binary(*op, &l, &r).map(Some)
        }
    }
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, ExpressionError> {
    match op {
        BinaryOp::StrictEq => Ok(Value::Bool(strict_equals(l, r))),
        BinaryOp::StrictNe => Ok(Value::Bool(!strict_equals(l, r))),
        BinaryOp::Gt => Ok(Value::Bool(compare(l, r).is_some_and(|o| o.is_gt()))),
        BinaryOp::Ge => Ok(Value::Bool(compare(l, r).is_some_and(|o| o.is_ge()))),
        BinaryOp::Lt => Ok(Value::Bool(compare(l, r).is_some_and(|o| o.is_lt()))),
        BinaryOp::Le => Ok(Value::Bool(compare(l, r).is_some_and(|o| o.is_le()))),
        BinaryOp::Add if l.is_string() || r.is_string() => {
            Ok(Value::String(format!("{}{}", display(l), display(r))))
        }
        BinaryOp::Add => arithmetic(l, r, "+", |a, b| Ok(a + b)),
        BinaryOp::Sub => arithmetic(l, r, "-", |a, b| Ok(a - b)),
        BinaryOp::Mul => arithmetic(l, r, "*", |a, b| Ok(a * b)),
        BinaryOp::Div => arithmetic(l, r, "/", |a, b| {
            if b == 0.0 {
                Err(ExpressionError::Type("division by zero".to_string()))
            } else {
                Ok(a / b)
            }
        }),
    }
}

fn arithmetic(
    l: &Value,
    r: &Value,
    symbol: &str,
    op: impl Fn(f64, f64) -> Result<f64, ExpressionError>,
) -> Result<Value, ExpressionError> {
    match (as_number(l), as_number(r)) {
        (Some(a), Some(b)) => number(op(a, b)?),
        _ => Err(ExpressionError::Type(format!(
            "operator '{symbol}' needs numbers, got {l} and {r}"
        ))),
    }
}

/// Resolve a path. The root is a context key (`workItem`, `stepResults`,
/// `execution`, `variables`) or, failing that, a variable name.
fn resolve_path(
    root: &str,
    segments: &[Segment],
    ctx: &ExpressionContext,
) -> Result<Option<Value>, ExpressionError> {
    let Some(mut current) = ctx.root(root) else {
        return Ok(None);
    };
    for segment in segments {
        let key = match segment {
            Segment::Key(k) => Value::String(k.clone()),
            Segment::Index(expr) => match eval(expr, ctx)? {
                Some(k) => k,
                None => return Ok(None),
            },
        };
        match step(current, &key) {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

fn step(current: Value, key: &Value) -> Option<Value> {
    match current {
        Value::Object(mut map) => map.remove(&display(key)),
        Value::Array(mut items) => {
            if key.as_str() == Some("length") {
                return Some(Value::from(items.len()));
            }
            let index = match key {
                Value::Number(n) => n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0)? as usize,
                Value::String(s) => s.parse::<usize>().ok()?,
                _ => return None,
            };
            (index < items.len()).then(|| items.swap_remove(index))
        }
        Value::String(s) if key.as_str() == Some("length") => Some(Value::from(s.chars().count())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::super::lexer::tokenize;
    use super::super::parser::parse;
    use super::*;
    use serde_json::json;

    fn ctx() -> ExpressionContext {
        let mut ctx = ExpressionContext::default()
            .with_work_item(json!({"id": 42, "title": "Login fails", "tags": ["bug", "ui"]}));
        ctx.variables.insert("count".to_string(), json!(3));
        ctx.variables.insert("name".to_string(), json!("conductor"));
        ctx.variables
            .insert("config".to_string(), json!({"retries": 2, "nested": {"flag": true}}));
        ctx.insert_step_result("create-branch", "completed", Some(json!({"branch": "fix/42"})), None);
        ctx
    }

    fn run(src: &str) -> Option<Value> {
        let tokens = tokenize(src).unwrap();
        eval(&parse(&tokens).unwrap(), &ctx()).unwrap()
    }

    #[test]
    fn test_paths_resolve_context_and_variables() {
        assert_eq!(run("workItem.id"), Some(json!(42)));
        assert_eq!(run("workItem.tags[1]"), Some(json!("ui")));
        assert_eq!(run("workItem['title']"), Some(json!("Login fails")));
        assert_eq!(run("count"), Some(json!(3)));
        assert_eq!(run("variables.name"), Some(json!("conductor")));
        assert_eq!(run("config.nested.flag"), Some(json!(true)));
        assert_eq!(run("stepResults.create-branch.status"), Some(json!("completed")));
        assert_eq!(run("stepResults.create-branch.result.branch"), Some(json!("fix/42")));
        assert_eq!(run("workItem.tags.length"), Some(json!(2)));
    }

    #[test]
    fn test_missing_paths_are_undefined() {
        assert_eq!(run("missing"), None);
        assert_eq!(run("workItem.nope.deeper"), None);
        assert_eq!(run("workItem.tags[9]"), None);
        assert_eq!(run("stepResults.other.status"), None);
    }

    #[test]
    fn test_undefined_propagates_through_operators() {
        assert_eq!(run("missing === 1"), None);
        assert_eq!(run("missing + 1"), None);
        assert_eq!(run("missing ? 'a' : 'b'"), None);
        assert_eq!(run("-missing"), None);
    }

    #[test]
    fn test_logical_returns_operands() {
        assert_eq!(run("0 || 'fallback'"), Some(json!("fallback")));
        assert_eq!(run("'x' && 'y'"), Some(json!("y")));
        assert_eq!(run("'' && 'y'"), Some(json!("")));
        assert_eq!(run("missing || 'default'"), Some(json!("default")));
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(run("count * 2 + 1"), Some(json!(7)));
        assert_eq!(run("10 / 4"), Some(json!(2.5)));
        assert_eq!(run("'v' + count"), Some(json!("v3")));
        assert_eq!(run("(1 + 2) * 3"), Some(json!(9)));
        assert_eq!(run("-count + 5"), Some(json!(2)));
    }

    #[test]
    fn test_arithmetic_coerces_numeric_strings() {
        assert_eq!(run("'10' - 4"), Some(json!(6)));
        assert_eq!(run("' 2.5 ' * 2"), Some(json!(5)));
        // `+` with a string operand still concatenates.
        assert_eq!(run("'10' + 4"), Some(json!("104")));
        let tokens = tokenize("'ten' - 4").unwrap();
        assert!(eval(&parse(&tokens).unwrap(), &ctx()).is_err());
    }

    #[test]
    fn test_arithmetic_errors() {
        let tokens = tokenize("1 / 0").unwrap();
        assert!(eval(&parse(&tokens).unwrap(), &ctx()).is_err());
        let tokens = tokenize("true * 2").unwrap();
        assert!(eval(&parse(&tokens).unwrap(), &ctx()).is_err());
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(run("count >= 3"), Some(json!(true)));
        assert_eq!(run("count < 3"), Some(json!(false)));
        assert_eq!(run("name !== 'other'"), Some(json!(true)));
        assert_eq!(run("workItem.id === 42"), Some(json!(true)));
    }

    #[test]
    fn test_calls_nest() {
        assert_eq!(
            run("concat(upper(name), '-', join(workItem.tags, '+'))"),
            Some(json!("CONDUCTOR-bug+ui"))
        );
        assert_eq!(run("length(workItem.tags) > 1"), Some(json!(true)));
        assert_eq!(run("add(count, 2) * 2"), Some(json!(10)));
    }
}
