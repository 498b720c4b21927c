//! Built-in functions callable from expressions.
//!
//! All functions are pure except `now`, `timestamp` and `uuid`. Arguments
//! arrive already evaluated; `None` is `undefined`. Unless a function is
//! listed in [`observes_undefined`], an undefined argument makes the whole
//! call undefined so the surrounding fragment is preserved for a later pass.

use chrono::{DateTime, Datelike, SecondsFormat, TimeZone, Timelike, Utc};
use serde_json::{Value, json};
use uuid::Uuid;

use super::ExpressionError;
use super::value::{as_number, compare, display, number, strict_equals, truthy};

type Args = Vec<Option<Value>>;
type CallResult = Result<Option<Value>, ExpressionError>;

/// Names of every built-in, for diagnostics and the CLI.
pub const BUILTINS: &[&str] = &[
    "now", "timestamp", "formatDate", "uuid", "concat", "join", "add", "subtract", "multiply",
    "divide", "length", "isString", "isNumber", "isBoolean", "isArray", "isObject", "if",
    "coalesce", "slugify", "upper", "lower", "trim", "contains", "startsWith", "endsWith",
    "replace", "eq", "ne", "gt", "gte", "lt", "lte", "and", "or", "not", "isDefined", "isNull",
    "isEmpty", "toString", "toNumber", "json",
];

/// Functions that receive `undefined` arguments instead of short-circuiting.
fn observes_undefined(name: &str) -> bool {
    matches!(
        name,
        "if" | "coalesce"
            | "isDefined"
            | "isNull"
            | "isEmpty"
            | "isString"
            | "isNumber"
            | "isBoolean"
            | "isArray"
            | "isObject"
            | "and"
            | "or"
            | "not"
            | "formatDate"
    )
}

/// Invoke built-in `name`.
pub fn call(name: &str, args: Args) -> CallResult {
    if !BUILTINS.contains(&name) {
        return Err(ExpressionError::UnknownFunction(name.to_string()));
    }
    if !observes_undefined(name) && args.iter().any(Option::is_none) {
        return Ok(None);
    }

    match name {
        // Date/time
        "now" => Ok(Some(json!(
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
        ))),
        "timestamp" => Ok(Some(json!(Utc::now().timestamp_millis()))),
        "formatDate" => format_date(args),
        "uuid" => Ok(Some(json!(Uuid::now_v7().to_string()))),

        // Strings
        "concat" => Ok(Some(json!(
            defined(args).iter().map(display).collect::<String>()
        ))),
        "join" => join(args),
        "slugify" => Ok(Some(json!(slugify(&display(&arg(&args, 0, name)?))))),
        "upper" => Ok(Some(json!(display(&arg(&args, 0, name)?).to_uppercase()))),
        "lower" => Ok(Some(json!(display(&arg(&args, 0, name)?).to_lowercase()))),
        "trim" => Ok(Some(json!(display(&arg(&args, 0, name)?).trim()))),
        "contains" => {
            let haystack = arg(&args, 0, name)?;
            let needle = arg(&args, 1, name)?;
            let found = match &haystack {
                Value::Array(items) => items.iter().any(|v| strict_equals(v, &needle)),
                Value::Object(map) => map.contains_key(&display(&needle)),
                other => display(other).contains(&display(&needle)),
            };
            Ok(Some(json!(found)))
        }
        "startsWith" => {
            let s = display(&arg(&args, 0, name)?);
            Ok(Some(json!(s.starts_with(&display(&arg(&args, 1, name)?)))))
        }
        "endsWith" => {
            let s = display(&arg(&args, 0, name)?);
            Ok(Some(json!(s.ends_with(&display(&arg(&args, 1, name)?)))))
        }
        "replace" => {
            let s = display(&arg(&args, 0, name)?);
            let from = display(&arg(&args, 1, name)?);
            let to = display(&arg(&args, 2, name)?);
            if from.is_empty() {
                return Ok(Some(json!(s)));
            }
            Ok(Some(json!(s.replace(&from, &to))))
        }
        "toString" => Ok(Some(json!(display(&arg(&args, 0, name)?)))),
        "json" => Ok(Some(json!(arg(&args, 0, name)?.to_string()))),

        // Arithmetic
        "add" => reduce(name, args, |acc, n| Ok(acc + n)),
        "subtract" => reduce(name, args, |acc, n| Ok(acc - n)),
        "multiply" => reduce(name, args, |acc, n| Ok(acc * n)),
        "divide" => reduce(name, args, |acc, n| {
            if n == 0.0 {
                Err(ExpressionError::InvalidArgument(
                    "divide: division by zero".to_string(),
                ))
            } else {
                Ok(acc / n)
            }
        }),
        "toNumber" => {
            let v = arg(&args, 0, name)?;
            let n = as_number(&v).ok_or_else(|| {
                ExpressionError::InvalidArgument(format!("toNumber: '{}' is not numeric", display(&v)))
            })?;
            Ok(Some(number(n)?))
        }
        "length" => {
            let len = match arg(&args, 0, name)? {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                Value::Null => 0,
                other => {
                    return Err(ExpressionError::InvalidArgument(format!(
                        "length: unsupported value {other}"
                    )));
                }
            };
            Ok(Some(json!(len)))
        }

        // Type predicates
        "isString" => Ok(Some(json!(matches!(first(&args), Some(Value::String(_)))))),
        "isNumber" => Ok(Some(json!(matches!(first(&args), Some(Value::Number(_)))))),
        "isBoolean" => Ok(Some(json!(matches!(first(&args), Some(Value::Bool(_)))))),
        "isArray" => Ok(Some(json!(matches!(first(&args), Some(Value::Array(_)))))),
        "isObject" => Ok(Some(json!(matches!(first(&args), Some(Value::Object(_)))))),
        "isDefined" => Ok(Some(json!(first(&args).is_some()))),
        "isNull" => Ok(Some(json!(matches!(first(&args), None | Some(Value::Null))))),
        "isEmpty" => Ok(Some(json!(match first(&args) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(Value::Array(a)) => a.is_empty(),
            Some(Value::Object(o)) => o.is_empty(),
            Some(_) => false,
        }))),

        // Logic and comparison
        "if" => {
            let mut it = args.into_iter();
            let condition = it.next().flatten();
            let then = it.next().flatten();
            let otherwise = it.next().flatten();
            Ok(if truthy(condition.as_ref()) { then } else { otherwise })
        }
        "coalesce" => {
            let any_null = args.iter().any(|a| matches!(a, Some(Value::Null)));
            let found = args.into_iter().flatten().find(|v| !v.is_null());
            Ok(found.or(if any_null { Some(Value::Null) } else { None }))
        }
        "and" => Ok(Some(json!(
            !args.is_empty() && args.iter().all(|a| truthy(a.as_ref()))
        ))),
        "or" => Ok(Some(json!(args.iter().any(|a| truthy(a.as_ref()))))),
        "not" => Ok(Some(json!(!truthy(first(&args))))),
        "eq" => Ok(Some(json!(strict_equals(&arg(&args, 0, name)?, &arg(&args, 1, name)?)))),
        "ne" => Ok(Some(json!(!strict_equals(&arg(&args, 0, name)?, &arg(&args, 1, name)?)))),
        "gt" | "gte" | "lt" | "lte" => {
            let ord = compare(&arg(&args, 0, name)?, &arg(&args, 1, name)?);
            let result = match (name, ord) {
                (_, None) => false,
                ("gt", Some(o)) => o.is_gt(),
                ("gte", Some(o)) => o.is_ge(),
                ("lt", Some(o)) => o.is_lt(),
                (_, Some(o)) => o.is_le(),
            };
            Ok(Some(json!(result)))
        }

        other => Err(ExpressionError::UnknownFunction(other.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn first(args: &Args) -> Option<&Value> {
    args.first().and_then(Option::as_ref)
}

fn defined(args: Args) -> Vec<Value> {
    args.into_iter().flatten().collect()
}

fn arg(args: &Args, index: usize, name: &str) -> Result<Value, ExpressionError> {
    args.get(index).cloned().flatten().ok_or_else(|| {
        ExpressionError::InvalidArgument(format!("{name}: missing argument {}", index + 1))
    })
}

fn reduce(
    name: &str,
    args: Args,
    op: impl Fn(f64, f64) -> Result<f64, ExpressionError>,
) -> CallResult {
    let mut numbers = defined(args).into_iter().map(|v| {
        as_number(&v).ok_or_else(|| {
            ExpressionError::InvalidArgument(format!("{name}: '{}' is not numeric", display(&v)))
        })
    });
    let mut acc = numbers
        .next()
        .ok_or_else(|| ExpressionError::InvalidArgument(format!("{name}: expects arguments")))??;
    for n in numbers {
        acc = op(acc, n?)?;
    }
    Ok(Some(number(acc)?))
}

/// `join(a, b, ..., separator)`. Array arguments are flattened. With a single
/// array argument the separator defaults to `,`.
fn join(args: Args) -> CallResult {
    let mut values = defined(args);
    let separator = match values.len() {
        0 => return Ok(Some(json!(""))),
        1 => ",".to_string(),
        _ => values.pop().map(|v| display(&v)).unwrap_or_default(),
    };
    let parts: Vec<String> = values
        .iter()
        .flat_map(|v| match v {
            Value::Array(items) => items.iter().map(display).collect::<Vec<_>>(),
            other => vec![display(other)],
        })
        .collect();
    Ok(Some(json!(parts.join(&separator))))
}

/// `formatDate(date?, pattern?)` with `YYYY MM DD HH mm ss` tokens.
fn format_date(args: Args) -> CallResult {
    let date = match first(&args) {
        None | Some(Value::Null) => Utc::now(),
        Some(Value::Number(n)) => {
            let invalid =
                || ExpressionError::InvalidArgument(format!("formatDate: invalid timestamp {n}"));
            // Epoch milliseconds; fractional parts are dropped.
            let ms = n.as_f64().filter(|f| f.is_finite()).ok_or_else(invalid)?.trunc() as i64;
            Utc.timestamp_millis_opt(ms).single().ok_or_else(invalid)?
        }
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| ExpressionError::InvalidArgument(format!("formatDate: {e}")))?,
        Some(other) => {
            return Err(ExpressionError::InvalidArgument(format!(
                "formatDate: unsupported date {other}"
            )));
        }
    };
    let pattern = match args.get(1).and_then(Option::as_ref) {
        Some(Value::String(p)) => p.clone(),
        _ => "YYYY-MM-DD".to_string(),
    };
    let formatted = pattern
        .replace("YYYY", &format!("{:04}", date.year()))
        .replace("MM", &format!("{:02}", date.month()))
        .replace("DD", &format!("{:02}", date.day()))
        .replace("HH", &format!("{:02}", date.hour()))
        .replace("mm", &format!("{:02}", date.minute()))
        .replace("ss", &format!("{:02}", date.second()));
    Ok(Some(json!(formatted)))
}

pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;
    for c in input.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Option<Value> {
        Some(json!(v))
    }

    fn n(v: f64) -> Option<Value> {
        Some(json!(v))
    }

    #[test]
    fn test_unknown_function_is_error() {
        assert!(matches!(
            call("explode", vec![]),
            Err(ExpressionError::UnknownFunction(_))
        ));
    }

    #[test]
    fn test_arithmetic_reducers() {
        assert_eq!(call("add", vec![n(1.0), n(2.0), n(3.5)]).unwrap(), Some(json!(6.5)));
        assert_eq!(call("subtract", vec![n(10.0), n(3.0), n(2.0)]).unwrap(), Some(json!(5)));
        assert_eq!(call("multiply", vec![n(2.0), s("4")]).unwrap(), Some(json!(8)));
        assert_eq!(call("divide", vec![n(9.0), n(3.0)]).unwrap(), Some(json!(3)));
        assert!(call("divide", vec![n(1.0), n(0.0)]).is_err());
        assert!(call("add", vec![s("x")]).is_err());
    }

    #[test]
    fn test_join_uses_last_argument_as_separator() {
        assert_eq!(call("join", vec![s("a"), s("b"), s("-")]).unwrap(), Some(json!("a-b")));
        assert_eq!(
            call("join", vec![Some(json!(["x", "y", 3])), s(", ")]).unwrap(),
            Some(json!("x, y, 3"))
        );
        assert_eq!(call("join", vec![Some(json!(["x", "y"]))]).unwrap(), Some(json!("x,y")));
    }

    #[test]
    fn test_undefined_argument_short_circuits() {
        assert_eq!(call("concat", vec![s("a"), None]).unwrap(), None);
        assert_eq!(call("upper", vec![None]).unwrap(), None);
        assert_eq!(call("isDefined", vec![None]).unwrap(), Some(json!(false)));
    }

    #[test]
    fn test_coalesce() {
        assert_eq!(call("coalesce", vec![None, Some(Value::Null), s("x")]).unwrap(), s("x"));
        assert_eq!(call("coalesce", vec![None, Some(Value::Null)]).unwrap(), Some(Value::Null));
        assert_eq!(call("coalesce", vec![None]).unwrap(), None);
    }

    #[test]
    fn test_if_selects_branch() {
        assert_eq!(call("if", vec![Some(json!(true)), s("a"), s("b")]).unwrap(), s("a"));
        assert_eq!(call("if", vec![None, s("a"), s("b")]).unwrap(), s("b"));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Fix: Login  Button (iOS)!"), "fix-login-button-ios");
        assert_eq!(slugify("--already-slugged--"), "already-slugged");
    }

    #[test]
    fn test_format_date_tokens() {
        let out = call(
            "formatDate",
            vec![s("2024-03-05T07:08:09Z"), s("YYYY/MM/DD HH:mm:ss")],
        )
        .unwrap();
        assert_eq!(out, s("2024/03/05 07:08:09"));
        let default = call("formatDate", vec![s("2024-12-31T23:59:59Z")]).unwrap();
        assert_eq!(default, s("2024-12-31"));
        assert!(call("formatDate", vec![s("not a date")]).is_err());
    }

    #[test]
    fn test_format_date_accepts_epoch_millis() {
        // 2023-11-14T22:13:20Z
        let pattern = s("YYYY-MM-DD HH:mm");
        let whole = call("formatDate", vec![Some(json!(1_700_000_000_000_i64)), pattern.clone()]).unwrap();
        assert_eq!(whole, s("2023-11-14 22:13"));
        let float = call("formatDate", vec![Some(json!(1.7e12)), pattern]).unwrap();
        assert_eq!(float, whole);
        let fractional = call("formatDate", vec![Some(json!(1_700_000_000_000.75)), s("ss")]).unwrap();
        assert_eq!(fractional, s("20"));
        assert!(call("formatDate", vec![Some(json!(1.0e300))]).is_err());
    }

    #[test]
    fn test_length_and_predicates() {
        assert_eq!(call("length", vec![s("héllo")]).unwrap(), Some(json!(5)));
        assert_eq!(call("length", vec![Some(json!([1, 2]))]).unwrap(), Some(json!(2)));
        assert_eq!(call("isArray", vec![Some(json!([]))]).unwrap(), Some(json!(true)));
        assert_eq!(call("isString", vec![None]).unwrap(), Some(json!(false)));
        assert_eq!(call("isEmpty", vec![s("")]).unwrap(), Some(json!(true)));
    }

    #[test]
    fn test_comparison_helpers() {
        assert_eq!(call("gt", vec![n(3.0), n(2.0)]).unwrap(), Some(json!(true)));
        assert_eq!(call("lte", vec![s("a"), s("b")]).unwrap(), Some(json!(true)));
        assert_eq!(call("eq", vec![n(1.0), s("1")]).unwrap(), Some(json!(false)));
        assert_eq!(call("and", vec![Some(json!(1)), s("x")]).unwrap(), Some(json!(true)));
        assert_eq!(call("or", vec![None, Some(json!(0))]).unwrap(), Some(json!(false)));
    }

    #[test]
    fn test_now_and_uuid_shapes() {
        let now = call("now", vec![]).unwrap().unwrap();
        let text = now.as_str().unwrap();
        assert!(text.ends_with('Z'));
        assert!(DateTime::parse_from_rfc3339(text).is_ok());
        let id = call("uuid", vec![]).unwrap().unwrap();
        assert!(Uuid::parse_str(id.as_str().unwrap()).is_ok());
    }
}
