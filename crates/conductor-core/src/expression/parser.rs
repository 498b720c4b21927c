//! Recursive-descent parser producing an [`Expr`] tree.
//!
//! Each level scans the token slice for its operator at bracket depth zero
//! and splits there, loosest level first:
//!
//! 1. ternary: first top-level `?` and its matching `:`
//! 2. whole call: `name(...)` spanning the entire slice
//! 3. comparison: `===`, `!==`, `>=`, `<=`, `>`, `<` tried in that order,
//!    split at the first occurrence
//! 4. logical: `||`, then `&&`, split at the first occurrence
//! 5. additive: `+`/`-`, split at the last binary occurrence
//! 6. multiplicative: `*`/`/`, split at the last occurrence
//! 7. primary: literal, parenthesised expression, unary minus, call, path
//!
//! The order is a compatibility contract with existing workflow documents
//! and differs from JavaScript precedence (comparison binds looser than
//! logical operators).

use serde_json::Value;

use super::ExpressionError;
use super::lexer::Token;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Undefined,
    Path {
        root: String,
        segments: Vec<Segment>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Ternary {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Negate(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Key(String),
    Index(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    StrictEq,
    StrictNe,
    Ge,
    Le,
    Gt,
    Lt,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

const COMPARISONS: [(Token, BinaryOp); 6] = [
    (Token::StrictEq, BinaryOp::StrictEq),
    (Token::StrictNe, BinaryOp::StrictNe),
    (Token::Ge, BinaryOp::Ge),
    (Token::Le, BinaryOp::Le),
    (Token::Gt, BinaryOp::Gt),
    (Token::Lt, BinaryOp::Lt),
];

/// Parse a full token stream.
pub fn parse(tokens: &[Token]) -> Result<Expr, ExpressionError> {
    parse_ternary(tokens)
}

// ---------------------------------------------------------------------------
// Levels
// ---------------------------------------------------------------------------

fn parse_ternary(t: &[Token]) -> Result<Expr, ExpressionError> {
    if t.is_empty() {
        return Err(ExpressionError::Syntax("empty expression".to_string()));
    }
    let Some(q) = find_first(t, |tok| *tok == Token::Question) else {
        return parse_call(t);
    };
    let colon = matching_colon(t, q)?;
    Ok(Expr::Ternary {
        condition: Box::new(parse_ternary(&t[..q])?),
        then: Box::new(parse_ternary(&t[q + 1..colon])?),
        otherwise: Box::new(parse_ternary(&t[colon + 1..])?),
    })
}

fn parse_call(t: &[Token]) -> Result<Expr, ExpressionError> {
    if let (Some(Token::Ident(_)), Some(Token::LParen)) = (t.first(), t.get(1)) {
        if closing_index(t, 1)? == t.len() - 1 {
            return parse_primary(t);
        }
    }
    parse_comparison(t)
}

fn parse_comparison(t: &[Token]) -> Result<Expr, ExpressionError> {
    for (token, op) in COMPARISONS.iter() {
        if let Some(i) = find_first(t, |tok| tok == token) {
            return Ok(Expr::Binary {
                op: *op,
                left: Box::new(parse_ternary(&t[..i])?),
                right: Box::new(parse_ternary(&t[i + 1..])?),
            });
        }
    }
    parse_logical(t)
}

fn parse_logical(t: &[Token]) -> Result<Expr, ExpressionError> {
    for (token, op) in [(Token::Or, LogicalOp::Or), (Token::And, LogicalOp::And)] {
        if let Some(i) = find_first(t, |tok| *tok == token) {
            return Ok(Expr::Logical {
                op,
                left: Box::new(parse_ternary(&t[..i])?),
                right: Box::new(parse_ternary(&t[i + 1..])?),
            });
        }
    }
    parse_additive(t)
}

fn parse_additive(t: &[Token]) -> Result<Expr, ExpressionError> {
    let split = find_last(t, |i, tok| {
        matches!(tok, Token::Plus | Token::Minus) && i > 0 && t[i - 1].ends_operand()
    });
    match split {
        Some(i) => Ok(Expr::Binary {
            op: if t[i] == Token::Plus {
                BinaryOp::Add
            } else {
                BinaryOp::Sub
            },
            left: Box::new(parse_additive(&t[..i])?),
            right: Box::new(parse_multiplicative(&t[i + 1..])?),
        }),
        None => parse_multiplicative(t),
    }
}

fn parse_multiplicative(t: &[Token]) -> Result<Expr, ExpressionError> {
    match find_last(t, |_, tok| matches!(tok, Token::Star | Token::Slash)) {
        Some(i) => Ok(Expr::Binary {
            op: if t[i] == Token::Star {
                BinaryOp::Mul
            } else {
                BinaryOp::Div
            },
            left: Box::new(parse_multiplicative(&t[..i])?),
            right: Box::new(parse_primary(&t[i + 1..])?),
        }),
        None => parse_primary(t),
    }
}

fn parse_primary(t: &[Token]) -> Result<Expr, ExpressionError> {
    let Some(first) = t.first() else {
        return Err(ExpressionError::Syntax("missing operand".to_string()));
    };

    match first {
        Token::Minus => Ok(Expr::Negate(Box::new(parse_primary(&t[1..])?))),
        Token::LParen => {
            let close = closing_index(t, 0)?;
            if close != t.len() - 1 {
                return Err(unexpected(&t[close + 1]));
            }
            parse_ternary(&t[1..close])
        }
        Token::Number(n) if t.len() == 1 => Ok(Expr::Literal(Value::from(*n))),
        Token::Str(s) if t.len() == 1 => Ok(Expr::Literal(Value::String(s.clone()))),
        Token::Ident(name) => match (name.as_str(), t.get(1)) {
            ("true", None) => Ok(Expr::Literal(Value::Bool(true))),
            ("false", None) => Ok(Expr::Literal(Value::Bool(false))),
            ("null", None) => Ok(Expr::Literal(Value::Null)),
            ("undefined", None) => Ok(Expr::Undefined),
            (_, Some(Token::LParen)) => {
                let close = closing_index(t, 1)?;
                if close != t.len() - 1 {
                    return Err(unexpected(&t[close + 1]));
                }
                let args = split_top_level(&t[2..close], &Token::Comma)
                    .into_iter()
                    .map(parse_ternary)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Expr::Call {
                    name: name.clone(),
                    args,
                })
            }
            _ => parse_path(name, &t[1..]),
        },
        other => Err(unexpected(other)),
    }
}

fn parse_path(root: &str, mut rest: &[Token]) -> Result<Expr, ExpressionError> {
    let mut segments = Vec::new();
    while let Some(tok) = rest.first() {
        match tok {
            Token::Dot => match rest.get(1) {
                Some(Token::Ident(key)) => {
                    segments.push(Segment::Key(key.clone()));
                    rest = &rest[2..];
                }
                _ => return Err(ExpressionError::Syntax("expected name after '.'".to_string())),
            },
            Token::LBracket => {
                let close = closing_index(rest, 0)?;
                let inner = parse_ternary(&rest[1..close])?;
                segments.push(Segment::Index(Box::new(inner)));
                rest = &rest[close + 1..];
            }
            other => return Err(unexpected(other)),
        }
    }
    Ok(Expr::Path {
        root: root.to_string(),
        segments,
    })
}

// ---------------------------------------------------------------------------
// Scanning helpers
// ---------------------------------------------------------------------------

fn unexpected(tok: &Token) -> ExpressionError {
    ExpressionError::Syntax(format!("unexpected token {tok:?}"))
}

fn depth_delta(tok: &Token) -> i32 {
    match tok {
        Token::LParen | Token::LBracket => 1,
        Token::RParen | Token::RBracket => -1,
        _ => 0,
    }
}

/// First index at depth zero matching `pred`.
fn find_first(t: &[Token], pred: impl Fn(&Token) -> bool) -> Option<usize> {
    let mut depth = 0;
    for (i, tok) in t.iter().enumerate() {
        if depth == 0 && pred(tok) {
            return Some(i);
        }
        depth += depth_delta(tok);
    }
    None
}

/// Last index at depth zero matching `pred`.
fn find_last(t: &[Token], pred: impl Fn(usize, &Token) -> bool) -> Option<usize> {
    let mut depth = 0;
    let mut found = None;
    for (i, tok) in t.iter().enumerate() {
        if depth == 0 && pred(i, tok) {
            found = Some(i);
        }
        depth += depth_delta(tok);
    }
    found
}

/// Index of the `:` pairing with the `?` at `q`, honouring nested ternaries.
fn matching_colon(t: &[Token], q: usize) -> Result<usize, ExpressionError> {
    let mut depth = 0;
    let mut pending = 0;
    for (i, tok) in t.iter().enumerate().skip(q + 1) {
        if depth == 0 {
            match tok {
                Token::Question => pending += 1,
                Token::Colon if pending == 0 => return Ok(i),
                Token::Colon => pending -= 1,
                _ => {}
            }
        }
        depth += depth_delta(tok);
    }
    Err(ExpressionError::Syntax("ternary is missing ':'".to_string()))
}

/// Index of the bracket closing the one opened at `open`.
fn closing_index(t: &[Token], open: usize) -> Result<usize, ExpressionError> {
    let mut depth = 0;
    for (i, tok) in t.iter().enumerate().skip(open) {
        depth += depth_delta(tok);
        if depth == 0 {
            return Ok(i);
        }
    }
    Err(ExpressionError::Syntax("unbalanced brackets".to_string()))
}

fn split_top_level<'a>(t: &'a [Token], sep: &Token) -> Vec<&'a [Token]> {
    if t.is_empty() {
        return Vec::new();
    }
    let mut parts = Vec::new();
    let mut depth = 0;
    let mut start = 0;
    for (i, tok) in t.iter().enumerate() {
        if depth == 0 && tok == sep {
            parts.push(&t[start..i]);
            start = i + 1;
        }
        depth += depth_delta(tok);
    }
    parts.push(&t[start..]);
    parts
}
