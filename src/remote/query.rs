//! The small subset of the drive query language the offline backend honors.
//!
//! Clauses are joined with `and`:
//!
//! ```text
//! 'FOLDER_ID' in parents
//! name = 'a.jpg'        name != 'a.jpg'        name contains 'jpg'
//! mimeType = 'TYPE'     mimeType != 'TYPE'
//! trashed = false       trashed != true
//! ```
//!
//! Anything else is rejected as an invalid request rather than ignored.

use crate::remote::error::RemoteError;
use crate::remote::service::RemoteResult;
use crate::remote::types::RemoteItem;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Str(String),
    Word(String),
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Contains,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Clause {
    InParents(String),
    Name(Op, String),
    MimeType(Op, String),
    Trashed(bool),
}

/// A parsed conjunction of filter clauses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemQuery {
    clauses: Vec<Clause>,
}

fn invalid(raw: &str, details: impl std::fmt::Display) -> RemoteError {
    RemoteError::from_status(400, format!("invalid query {raw:?}: {details}"))
}

fn tokenize(raw: &str) -> RemoteResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = raw.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '\'' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some(escaped) => value.push(escaped),
                            None => return Err(invalid(raw, "dangling escape")),
                        },
                        Some('\'') => break,
                        Some(ch) => value.push(ch),
                        None => return Err(invalid(raw, "unterminated string")),
                    }
                }
                tokens.push(Token::Str(value));
            }
            '=' => {
                chars.next();
                tokens.push(Token::Eq);
            }
            '!' => {
                chars.next();
                if chars.next_if_eq(&'=').is_none() {
                    return Err(invalid(raw, "expected '=' after '!'"));
                }
                tokens.push(Token::Ne);
            }
            _ => {
                let mut word = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() || matches!(ch, '=' | '!' | '\'') {
                        break;
                    }
                    word.push(ch);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }
    Ok(tokens)
}

fn is_word(token: &Token, expected: &str) -> bool {
    matches!(token, Token::Word(w) if w.eq_ignore_ascii_case(expected))
}

fn comparison(token: &Token) -> Option<Op> {
    match token {
        Token::Eq => Some(Op::Eq),
        Token::Ne => Some(Op::Ne),
        t if is_word(t, "contains") => Some(Op::Contains),
        _ => None,
    }
}

/// Parse one clause off the front of `tokens`, returning it and the rest.
fn clause<'t>(raw: &str, tokens: &'t [Token]) -> RemoteResult<(Clause, &'t [Token])> {
    match tokens {
        [Token::Str(id), kw, Token::Word(field), rest @ ..]
            if is_word(kw, "in") && field == "parents" =>
        {
            Ok((Clause::InParents(id.clone()), rest))
        }
        [Token::Word(field), op, value, rest @ ..] => {
            let op = comparison(op)
                .ok_or_else(|| invalid(raw, format!("unsupported operator after {field}")))?;
            let parsed = match (field.as_str(), op, value) {
                ("name", _, Token::Str(v)) => Clause::Name(op, v.clone()),
                ("mimeType", Op::Eq | Op::Ne, Token::Str(v)) => Clause::MimeType(op, v.clone()),
                ("trashed", Op::Eq | Op::Ne, Token::Word(v)) => {
                    let flag = match v.as_str() {
                        "true" => true,
                        "false" => false,
                        other => return Err(invalid(raw, format!("trashed needs true or false, got {other}"))),
                    };
                    Clause::Trashed(if op == Op::Eq { flag } else { !flag })
                }
                _ => return Err(invalid(raw, format!("unsupported clause on {field}"))),
            };
            Ok((parsed, rest))
        }
        _ => Err(invalid(raw, "incomplete clause")),
    }
}

impl ItemQuery {
    pub fn parse(raw: &str) -> RemoteResult<Self> {
        let tokens = tokenize(raw)?;
        let mut rest = tokens.as_slice();
        let mut clauses = Vec::new();
        loop {
            let (parsed, tail) = clause(raw, rest)?;
            clauses.push(parsed);
            match tail {
                [] => break,
                [and, more @ ..] if is_word(and, "and") => rest = more,
                _ => return Err(invalid(raw, "clauses must be joined with 'and'")),
            }
        }
        Ok(Self { clauses })
    }

    pub fn matches(&self, item: &RemoteItem) -> bool {
        self.clauses.iter().all(|clause| match clause {
            Clause::InParents(id) => item.parents.iter().any(|p| p == id),
            Clause::Name(op, value) => compare(*op, item.name.as_deref(), value),
            Clause::MimeType(op, value) => compare(*op, item.mime_type.as_deref(), value),
            Clause::Trashed(flag) => item.trashed == *flag,
        })
    }
}

fn compare(op: Op, actual: Option<&str>, expected: &str) -> bool {
    match op {
        Op::Eq => actual == Some(expected),
        Op::Ne => actual != Some(expected),
        Op::Contains => actual.is_some_and(|a| a.contains(expected)),
    }
}
