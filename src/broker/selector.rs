//! Message selectors for the in-memory broker.
//!
//! Supports the subset of the JMS selector grammar that covers the usual
//! routing cases: comparisons between a header or property and a literal,
//! joined with `AND`.
//!
//! ```text
//! region = 'emea' AND priority >= 5 AND JMSType <> 'audit'
//! ```
//!
//! Recognized headers are `JMSType`, `JMSCorrelationID`, `JMSPriority` and
//! `JMSMessageID`. Any other identifier names a message property. A clause
//! over a missing property never matches.

use crate::broker::ProviderError;
use crate::broker::message::{WireMessage, WireValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Str(String),
    Num(f64),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Op(Op),
    Lit(Literal),
    And,
}

#[derive(Debug, Clone, PartialEq)]
struct Clause {
    field: String,
    op: Op,
    literal: Literal,
}

/// A parsed selector expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    source: String,
    clauses: Vec<Clause>,
}

impl Selector {
    /// Parses an expression. A blank expression yields `None`, which selects everything.
    pub fn parse(expression: &str) -> Result<Option<Selector>, ProviderError> {
        if expression.trim().is_empty() {
            return Ok(None);
        }

        let tokens = tokenize(expression)?;
        let mut clauses = Vec::new();
        let mut iter = tokens.into_iter();
        loop {
            let field = match iter.next() {
                Some(Token::Ident(name)) => name,
                other => return Err(unexpected(expression, other)),
            };
            let op = match iter.next() {
                Some(Token::Op(op)) => op,
                other => return Err(unexpected(expression, other)),
            };
            let literal = match iter.next() {
                Some(Token::Lit(literal)) => literal,
                other => return Err(unexpected(expression, other)),
            };
            clauses.push(Clause { field, op, literal });

            match iter.next() {
                None => break,
                Some(Token::And) => continue,
                other => return Err(unexpected(expression, other)),
            }
        }

        Ok(Some(Selector {
            source: expression.trim().to_string(),
            clauses,
        }))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, message: &WireMessage) -> bool {
        self.clauses.iter().all(|clause| clause.matches(message))
    }
}

impl Clause {
    fn matches(&self, message: &WireMessage) -> bool {
        let Some(actual) = lookup(message, &self.field) else {
            return false;
        };
        match (&actual, &self.literal) {
            (Literal::Num(a), Literal::Num(b)) => match self.op {
                Op::Eq => a == b,
                Op::Ne => a != b,
                Op::Lt => a < b,
                Op::Le => a <= b,
                Op::Gt => a > b,
                Op::Ge => a >= b,
            },
            (Literal::Str(a), Literal::Str(b)) => match self.op {
                Op::Eq => a == b,
                Op::Ne => a != b,
                _ => false,
            },
            (Literal::Bool(a), Literal::Bool(b)) => match self.op {
                Op::Eq => a == b,
                Op::Ne => a != b,
                _ => false,
            },
            _ => false,
        }
    }
}

fn lookup(message: &WireMessage, field: &str) -> Option<Literal> {
    match field {
        "JMSType" => message.jms_type.clone().map(Literal::Str),
        "JMSCorrelationID" => message.correlation_id.clone().map(Literal::Str),
        "JMSMessageID" => message.message_id.clone().map(Literal::Str),
        "JMSPriority" => Some(Literal::Num(f64::from(message.priority))),
        name => match message.property(name)? {
            WireValue::Boolean(b) => Some(Literal::Bool(*b)),
            WireValue::Byte(v) => Some(Literal::Num(f64::from(*v))),
            WireValue::Short(v) => Some(Literal::Num(f64::from(*v))),
            WireValue::Int(v) => Some(Literal::Num(f64::from(*v))),
            WireValue::Long(v) => Some(Literal::Num(*v as f64)),
            WireValue::Float(v) => Some(Literal::Num(f64::from(*v))),
            WireValue::Double(v) => Some(Literal::Num(*v)),
            WireValue::Char(c) => Some(Literal::Str(c.to_string())),
            WireValue::String(s) => Some(Literal::Str(s.clone())),
            WireValue::Bytes(_) | WireValue::Object { .. } => None,
        },
    }
}

fn unexpected(expression: &str, token: Option<Token>) -> ProviderError {
    match token {
        Some(token) => {
            ProviderError::InvalidSelector(format!("unexpected {token:?} in '{expression}'"))
        }
        None => ProviderError::InvalidSelector(format!("incomplete expression '{expression}'")),
    }
}

fn tokenize(expression: &str) -> Result<Vec<Token>, ProviderError> {
    let chars: Vec<char> = expression.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c == '\'' {
            // '' inside a literal is an escaped quote
            let mut literal = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => {
                        return Err(ProviderError::InvalidSelector(format!(
                            "unterminated string literal in '{expression}'"
                        )));
                    }
                    Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                        literal.push('\'');
                        i += 2;
                    }
                    Some('\'') => {
                        i += 1;
                        break;
                    }
                    Some(other) => {
                        literal.push(*other);
                        i += 1;
                    }
                }
            }
            tokens.push(Token::Lit(Literal::Str(literal)));
            continue;
        }

        if matches!(c, '=' | '<' | '>') {
            let (op, width) = match (c, chars.get(i + 1)) {
                ('<', Some('>')) => (Op::Ne, 2),
                ('<', Some('=')) => (Op::Le, 2),
                ('>', Some('=')) => (Op::Ge, 2),
                ('<', _) => (Op::Lt, 1),
                ('>', _) => (Op::Gt, 1),
                _ => (Op::Eq, 1),
            };
            tokens.push(Token::Op(op));
            i += width;
            continue;
        }

        if c.is_ascii_digit() || c == '-' || c == '.' {
            let start = i;
            i += 1;
            while let Some(&next) = chars.get(i) {
                let exponent_sign =
                    matches!(next, '+' | '-') && matches!(chars[i - 1], 'e' | 'E');
                if next.is_ascii_digit() || matches!(next, '.' | 'e' | 'E') || exponent_sign {
                    i += 1;
                } else {
                    break;
                }
            }
            let text: String = chars[start..i].iter().collect();
            let value = text.parse::<f64>().map_err(|_| {
                ProviderError::InvalidSelector(format!("bad numeric literal '{text}'"))
            })?;
            tokens.push(Token::Lit(Literal::Num(value)));
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while let Some(&next) = chars.get(i) {
                if next.is_alphanumeric() || matches!(next, '_' | '$' | '.') {
                    i += 1;
                } else {
                    break;
                }
            }
            let word: String = chars[start..i].iter().collect();
            let token = match word.to_ascii_uppercase().as_str() {
                "AND" => Token::And,
                "TRUE" => Token::Lit(Literal::Bool(true)),
                "FALSE" => Token::Lit(Literal::Bool(false)),
                _ => Token::Ident(word),
            };
            tokens.push(token);
            continue;
        }

        return Err(ProviderError::InvalidSelector(format!(
            "unexpected character '{c}' in '{expression}'"
        )));
    }

    Ok(tokens)
}
