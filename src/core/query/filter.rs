// src/core/query/filter.rs

//! The filter expression language query options carry: a boolean predicate
//! over record fields with `==`, `!=`, `matches`, `contains`, `in`,
//! `is empty`, and `and`/`or`/`not` combinators. Hand-rolled lexer and
//! recursive-descent parser; expressions are parsed once per request and
//! evaluated per record, after ACL projection and before pagination.

use crate::core::errors::DroverError;
use crate::core::types::{Allocation, Job, Node, NodePool};
use regex::Regex;
use std::collections::HashMap;

/// A field value surfaced to the filter evaluator.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<String>),
    Map(HashMap<String, String>),
}

/// Records that expose their fields to filter expressions. Selectors use the
/// API field names (`Name`, `Namespace`, `Meta.<key>`); an unknown selector
/// is a user-visible error, not a silent false.
pub trait Fields {
    fn field(&self, selector: &[String]) -> Option<FieldValue>;
}

// --- Lexer ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Eq,
    Neq,
    LParen,
    RParen,
}

fn invalid(msg: impl Into<String>) -> DroverError {
    DroverError::InvalidFilter(msg.into())
}

fn lex(input: &str) -> Result<Vec<Token>, DroverError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '=' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err(invalid("expected \"==\""));
                }
                tokens.push(Token::Eq);
            }
            '!' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err(invalid("expected \"!=\""));
                }
                tokens.push(Token::Neq);
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some(esc) => s.push(esc),
                            None => return Err(invalid("unterminated escape in string")),
                        },
                        Some(ch) if ch == quote => break,
                        Some(ch) => s.push(ch),
                        None => return Err(invalid("unterminated string literal")),
                    }
                }
                tokens.push(Token::Str(s));
            }
            _ if c.is_alphanumeric() || c == '_' || c == '.' || c == '-' => {
                let mut s = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' || ch == '.' || ch == '-' {
                        s.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(s));
            }
            other => return Err(invalid(format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

// --- AST ---

#[derive(Debug)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Eq { selector: Vec<String>, value: String, negate: bool },
    Matches { selector: Vec<String>, pattern: Regex, negate: bool },
    Contains { selector: Vec<String>, value: String, negate: bool },
    In { value: String, selector: Vec<String>, negate: bool },
    IsEmpty { selector: Vec<String>, negate: bool },
}

/// A parsed, reusable filter expression.
#[derive(Debug)]
pub struct FilterExpr {
    root: Expr,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if let Some(Token::Ident(s)) = self.peek() {
            if s.eq_ignore_ascii_case(kw) {
                self.pos += 1;
                return true;
            }
        }
        false
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), DroverError> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(invalid(format!("expected \"{kw}\"")))
        }
    }

    fn or_expr(&mut self) -> Result<Expr, DroverError> {
        let mut left = self.and_expr()?;
        while self.eat_keyword("or") {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, DroverError> {
        let mut left = self.not_expr()?;
        while self.eat_keyword("and") {
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, DroverError> {
        if self.eat_keyword("not") {
            return Ok(Expr::Not(Box::new(self.not_expr()?)));
        }
        if matches!(self.peek(), Some(Token::LParen)) {
            self.next();
            let inner = self.or_expr()?;
            match self.next() {
                Some(Token::RParen) => return Ok(inner),
                _ => return Err(invalid("expected \")\"")),
            }
        }
        self.match_expr()
    }

    fn selector(&mut self) -> Result<Vec<String>, DroverError> {
        match self.next() {
            Some(Token::Ident(s)) => Ok(s.split('.').map(str::to_string).collect()),
            other => Err(invalid(format!("expected a selector, found {other:?}"))),
        }
    }

    fn value(&mut self) -> Result<String, DroverError> {
        match self.next() {
            Some(Token::Str(s)) => Ok(s),
            Some(Token::Ident(s)) => Ok(s),
            other => Err(invalid(format!("expected a value, found {other:?}"))),
        }
    }

    fn match_expr(&mut self) -> Result<Expr, DroverError> {
        // Value-first form: `<literal> in <selector>` / `<literal> not in <selector>`.
        if let Some(Token::Str(_)) = self.peek() {
            let value = self.value()?;
            let negate = self.eat_keyword("not");
            self.expect_keyword("in")?;
            let selector = self.selector()?;
            return Ok(Expr::In { value, selector, negate });
        }

        let selector = self.selector()?;
        match self.next() {
            Some(Token::Eq) => Ok(Expr::Eq { selector, value: self.value()?, negate: false }),
            Some(Token::Neq) => Ok(Expr::Eq { selector, value: self.value()?, negate: true }),
            Some(Token::Ident(kw)) if kw.eq_ignore_ascii_case("matches") => {
                let pattern = self.value()?;
                let pattern = Regex::new(&pattern)
                    .map_err(|e| invalid(format!("invalid regex \"{pattern}\": {e}")))?;
                Ok(Expr::Matches { selector, pattern, negate: false })
            }
            Some(Token::Ident(kw)) if kw.eq_ignore_ascii_case("contains") => {
                Ok(Expr::Contains { selector, value: self.value()?, negate: false })
            }
            Some(Token::Ident(kw)) if kw.eq_ignore_ascii_case("is") => {
                let negate = self.eat_keyword("not");
                self.expect_keyword("empty")?;
                Ok(Expr::IsEmpty { selector, negate })
            }
            Some(Token::Ident(kw)) if kw.eq_ignore_ascii_case("not") => {
                if self.eat_keyword("matches") {
                    let pattern = self.value()?;
                    let pattern = Regex::new(&pattern)
                        .map_err(|e| invalid(format!("invalid regex \"{pattern}\": {e}")))?;
                    Ok(Expr::Matches { selector, pattern, negate: true })
                } else if self.eat_keyword("contains") {
                    Ok(Expr::Contains { selector, value: self.value()?, negate: true })
                } else {
                    Err(invalid("expected \"matches\" or \"contains\" after \"not\""))
                }
            }
            other => Err(invalid(format!("expected an operator, found {other:?}"))),
        }
    }
}

impl FilterExpr {
    pub fn parse(input: &str) -> Result<FilterExpr, DroverError> {
        let tokens = lex(input)?;
        if tokens.is_empty() {
            return Err(invalid("empty expression"));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.or_expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(invalid("trailing tokens after expression"));
        }
        Ok(FilterExpr { root })
    }

    /// Evaluates the predicate against one record. An unknown selector or an
    /// operator applied to an incompatible field fails the whole query.
    pub fn eval(&self, record: &dyn Fields) -> Result<bool, DroverError> {
        eval_expr(&self.root, record)
    }
}

fn lookup(record: &dyn Fields, selector: &[String]) -> Result<FieldValue, DroverError> {
    record
        .field(selector)
        .ok_or_else(|| invalid(format!("selector \"{}\" is not valid", selector.join("."))))
}

fn eval_expr(expr: &Expr, record: &dyn Fields) -> Result<bool, DroverError> {
    match expr {
        Expr::Or(l, r) => Ok(eval_expr(l, record)? || eval_expr(r, record)?),
        Expr::And(l, r) => Ok(eval_expr(l, record)? && eval_expr(r, record)?),
        Expr::Not(inner) => Ok(!eval_expr(inner, record)?),
        Expr::Eq { selector, value, negate } => {
            let eq = match lookup(record, selector)? {
                FieldValue::Str(s) => s == *value,
                FieldValue::Int(i) => value
                    .parse::<i64>()
                    .map_err(|_| invalid(format!("\"{value}\" is not an integer")))?
                    == i,
                FieldValue::Bool(b) => value
                    .parse::<bool>()
                    .map_err(|_| invalid(format!("\"{value}\" is not a boolean")))?
                    == b,
                FieldValue::List(_) | FieldValue::Map(_) => {
                    return Err(invalid(format!(
                        "selector \"{}\" does not support equality",
                        selector.join(".")
                    )));
                }
            };
            Ok(eq != *negate)
        }
        Expr::Matches { selector, pattern, negate } => match lookup(record, selector)? {
            FieldValue::Str(s) => Ok(pattern.is_match(&s) != *negate),
            _ => Err(invalid(format!(
                "selector \"{}\" does not support \"matches\"",
                selector.join(".")
            ))),
        },
        Expr::Contains { selector, value, negate } | Expr::In { value, selector, negate } => {
            let held = match lookup(record, selector)? {
                FieldValue::Str(s) => s.contains(value.as_str()),
                FieldValue::List(items) => items.iter().any(|i| i == value),
                FieldValue::Map(map) => map.contains_key(value.as_str()),
                _ => {
                    return Err(invalid(format!(
                        "selector \"{}\" does not support membership",
                        selector.join(".")
                    )));
                }
            };
            Ok(held != *negate)
        }
        Expr::IsEmpty { selector, negate } => {
            let empty = match lookup(record, selector)? {
                FieldValue::Str(s) => s.is_empty(),
                FieldValue::List(items) => items.is_empty(),
                FieldValue::Map(map) => map.is_empty(),
                FieldValue::Int(_) | FieldValue::Bool(_) => {
                    return Err(invalid(format!(
                        "selector \"{}\" does not support \"is empty\"",
                        selector.join(".")
                    )));
                }
            };
            Ok(empty != *negate)
        }
    }
}

// --- Field exposure for the filterable record types ---

impl Fields for NodePool {
    fn field(&self, selector: &[String]) -> Option<FieldValue> {
        match selector {
            [one] => match one.as_str() {
                "Name" => Some(FieldValue::Str(self.name.clone())),
                "Description" => Some(FieldValue::Str(self.description.clone())),
                "Meta" => Some(FieldValue::Map(self.meta.clone())),
                _ => None,
            },
            [first, key] if first == "Meta" => Some(FieldValue::Str(
                self.meta.get(key.as_str()).cloned().unwrap_or_default(),
            )),
            _ => None,
        }
    }
}

impl Fields for Job {
    fn field(&self, selector: &[String]) -> Option<FieldValue> {
        match selector {
            [one] => match one.as_str() {
                "ID" => Some(FieldValue::Str(self.id.clone())),
                "Name" => Some(FieldValue::Str(self.name.clone())),
                "Namespace" => Some(FieldValue::Str(self.namespace.clone())),
                "NodePool" => Some(FieldValue::Str(self.node_pool.clone())),
                "Type" => Some(FieldValue::Str(self.job_type.to_string())),
                "Status" => Some(FieldValue::Str(self.status.to_string())),
                "Priority" => Some(FieldValue::Int(self.priority as i64)),
                "Stop" => Some(FieldValue::Bool(self.stop)),
                "ParentID" => Some(FieldValue::Str(self.parent_id.clone().unwrap_or_default())),
                "Meta" => Some(FieldValue::Map(self.meta.clone())),
                _ => None,
            },
            [first, key] if first == "Meta" => Some(FieldValue::Str(
                self.meta.get(key.as_str()).cloned().unwrap_or_default(),
            )),
            _ => None,
        }
    }
}

impl Fields for Node {
    fn field(&self, selector: &[String]) -> Option<FieldValue> {
        match selector {
            [one] => match one.as_str() {
                "ID" => Some(FieldValue::Str(self.id.clone())),
                "Name" => Some(FieldValue::Str(self.name.clone())),
                "Datacenter" => Some(FieldValue::Str(self.datacenter.clone())),
                "NodePool" => Some(FieldValue::Str(self.node_pool.clone())),
                "Status" => Some(FieldValue::Str(self.status.to_string())),
                "Attributes" => Some(FieldValue::Map(self.attributes.clone())),
                _ => None,
            },
            [first, key] if first == "Attributes" => Some(FieldValue::Str(
                self.attributes.get(key.as_str()).cloned().unwrap_or_default(),
            )),
            _ => None,
        }
    }
}

impl Fields for Allocation {
    fn field(&self, selector: &[String]) -> Option<FieldValue> {
        match selector {
            [one] => match one.as_str() {
                "ID" => Some(FieldValue::Str(self.id.clone())),
                "Namespace" => Some(FieldValue::Str(self.namespace.clone())),
                "JobID" => Some(FieldValue::Str(self.job_id.clone())),
                "TaskGroup" => Some(FieldValue::Str(self.task_group.clone())),
                "NodeID" => Some(FieldValue::Str(self.node_id.clone())),
                "ClientStatus" => Some(FieldValue::Str(self.client_status.to_string())),
                "DesiredStatus" => Some(FieldValue::Str(self.desired_status.to_string())),
                _ => None,
            },
            _ => None,
        }
    }
}
