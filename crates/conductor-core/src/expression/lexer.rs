//! Tokenizer for the `${...}` expression language.

use super::ExpressionError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Question,
    Colon,
    Plus,
    Minus,
    Star,
    Slash,
    StrictEq,
    StrictNe,
    Ge,
    Le,
    Gt,
    Lt,
    And,
    Or,
}

impl Token {
    /// Tokens that can end an operand; a following `+`/`-` is then binary.
    pub fn ends_operand(&self) -> bool {
        matches!(
            self,
            Token::Number(_) | Token::Str(_) | Token::Ident(_) | Token::RParen | Token::RBracket
        )
    }
}

/// Split expression source into tokens.
///
/// A path segment directly after `.` may contain `-` and start with a digit,
/// so `stepResults.create-branch.status` and `items.0` lex as single segments.
pub fn tokenize(src: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if matches!(tokens.last(), Some(Token::Dot)) && is_segment_char(c) {
            let start = i;
            while i < chars.len() && is_segment_char(chars[i]) {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        match c {
            '\'' | '"' | '`' => {
                let (s, next) = read_string(&chars, i)?;
                tokens.push(Token::Str(s));
                i = next;
            }
            '0'..='9' => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                if i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| ExpressionError::Syntax(format!("invalid number '{text}'")))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '?' => {
                tokens.push(Token::Question);
                i += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '=' if starts_with(&chars, i, "===") => {
                tokens.push(Token::StrictEq);
                i += 3;
            }
            '!' if starts_with(&chars, i, "!==") => {
                tokens.push(Token::StrictNe);
                i += 3;
            }
            '>' if starts_with(&chars, i, ">=") => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '<' if starts_with(&chars, i, "<=") => {
                tokens.push(Token::Le);
                i += 2;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '&' if starts_with(&chars, i, "&&") => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if starts_with(&chars, i, "||") => {
                tokens.push(Token::Or);
                i += 2;
            }
            other => {
                return Err(ExpressionError::Syntax(format!(
                    "unexpected character '{other}' at offset {i}"
                )));
            }
        }
    }

    Ok(tokens)
}

fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '$'
}

fn starts_with(chars: &[char], at: usize, pattern: &str) -> bool {
    pattern
        .chars()
        .enumerate()
        .all(|(k, p)| chars.get(at + k) == Some(&p))
}

/// Read a quoted string starting at `start`; returns the unescaped text and
/// the index just past the closing quote.
fn read_string(chars: &[char], start: usize) -> Result<(String, usize), ExpressionError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            let escaped = chars
                .get(i + 1)
                .ok_or_else(|| ExpressionError::Syntax("dangling escape in string".to_string()))?;
            out.push(match escaped {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                other => *other,
            });
            i += 2;
            continue;
        }
        if c == quote {
            return Ok((out, i + 1));
        }
        out.push(c);
        i += 1;
    }
    Err(ExpressionError::Syntax("unterminated string literal".to_string()))
}
