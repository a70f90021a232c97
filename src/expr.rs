//! Visibility expressions
//!
//! A small, sandboxed boolean language used by field, section and action
//! `visibility` rules. Expressions can only read `record.*` and `user.*`
//! values and compare them with literals; nothing else is reachable.
//!
//! ```text
//! expr    := or
//! or      := and (("||" | "or") and)*
//! and     := unary (("&&" | "and") unary)*
//! unary   := ("!" | "not") unary | compare
//! compare := primary (("==" | "===" | "!=" | "!==" | "<" | "<=" | ">" | ">=") primary)?
//! primary := "(" expr ")" | string | number | true | false | null | path
//! path    := ("record" | "user") ("." ident)+
//! ```

use std::cmp::Ordering;

use serde_json::{Map, Number, Value};
use thiserror::Error;
use tracing::warn;

use crate::audit::deep_equal;
use crate::query::partial_compare;
use crate::schema::Role;

/// Maximum accepted expression length in bytes
const MAX_EXPR_BYTES: usize = 4096;
/// Maximum nesting of parentheses and negations
const MAX_EXPR_NESTING: usize = 32;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("expression is empty")]
    EmptyInput,

    #[error("expression exceeds size limit: {actual} bytes (max {max})")]
    InputTooLarge { max: usize, actual: usize },

    #[error("expression nesting exceeds limit of {max} at {position}")]
    NestingTooDeep { max: usize, position: usize },

    #[error("unexpected `{found}` at {position}, expected {expected}")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
        position: usize,
    },

    #[error("unterminated string starting at {position}")]
    UnterminatedString { position: usize },

    #[error("invalid number `{raw}` at {position}")]
    InvalidNumber { raw: String, position: usize },

    #[error("unknown root `{name}` at {position}, expected `record` or `user`")]
    UnknownRoot { name: String, position: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRoot {
    Record,
    User,
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(PathRoot, Vec<String>),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Compare(Box<Expr>, CompareOp, Box<Expr>),
}

/// Values an expression may read
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub record: &'a Map<String, Value>,
    pub role: Role,
    pub user_id: Option<&'a str>,
}

impl<'a> EvalContext<'a> {
    pub fn new(record: &'a Map<String, Value>, role: Role) -> Self {
        Self {
            record,
            role,
            user_id: None,
        }
    }

    pub fn with_user_id(mut self, user_id: &'a str) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// A parsed, reusable expression
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    root: Expr,
}

impl Expression {
    pub fn parse(input: &str) -> Result<Self, ExprError> {
        if input.len() > MAX_EXPR_BYTES {
            return Err(ExprError::InputTooLarge {
                max: MAX_EXPR_BYTES,
                actual: input.len(),
            });
        }
        let tokens = Lexer::new(input).lex()?;
        let mut parser = Parser::new(tokens);
        let root = parser.parse_or()?;
        parser.expect_eof()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Expr {
        &self.root
    }

    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> bool {
        truthy(&eval(&self.root, ctx))
    }
}

/// Evaluate an optional visibility rule. Missing or blank rules and rules
/// that fail to parse all resolve to visible.
pub fn evaluate_visibility(expr: Option<&str>, record: &Map<String, Value>, role: Role) -> bool {
    let Some(source) = expr.map(str::trim).filter(|s| !s.is_empty()) else {
        return true;
    };
    match Expression::parse(source) {
        Ok(expression) => expression.evaluate(&EvalContext::new(record, role)),
        Err(err) => {
            warn!(expression = %source, error = %err, "Visibility expression failed, treating as visible");
            true
        }
    }
}

/// null, missing, false, 0 and "" are false; everything else is true
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn lookup<'v>(mut current: &'v Value, segments: &[String]) -> Option<&'v Value> {
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn eval(expr: &Expr, ctx: &EvalContext<'_>) -> Value {
    match expr {
        Expr::Literal(value) => value.clone(),
        Expr::Path(PathRoot::Record, segments) => {
            let Some((first, rest)) = segments.split_first() else {
                return Value::Null;
            };
            ctx.record
                .get(first)
                .and_then(|v| lookup(v, rest))
                .cloned()
                .unwrap_or(Value::Null)
        }
        Expr::Path(PathRoot::User, segments) => match segments.as_slice() {
            [field] if field == "role" => Value::String(ctx.role.as_str().to_string()),
            [field] if field == "id" => ctx
                .user_id
                .map(|id| Value::String(id.to_string()))
                .unwrap_or(Value::Null),
            _ => Value::Null,
        },
        Expr::Not(inner) => Value::Bool(!truthy(&eval(inner, ctx))),
        Expr::And(parts) => Value::Bool(parts.iter().all(|p| truthy(&eval(p, ctx)))),
        Expr::Or(parts) => Value::Bool(parts.iter().any(|p| truthy(&eval(p, ctx)))),
        Expr::Compare(left, op, right) => {
            let (l, r) = (eval(left, ctx), eval(right, ctx));
            let result = match op {
                CompareOp::Eq => deep_equal(Some(&l), Some(&r)),
                CompareOp::Ne => !deep_equal(Some(&l), Some(&r)),
                CompareOp::Lt => partial_compare(Some(&l), Some(&r)) == Some(Ordering::Less),
                CompareOp::Le => matches!(
                    partial_compare(Some(&l), Some(&r)),
                    Some(Ordering::Less | Ordering::Equal)
                ),
                CompareOp::Gt => partial_compare(Some(&l), Some(&r)) == Some(Ordering::Greater),
                CompareOp::Ge => matches!(
                    partial_compare(Some(&l), Some(&r)),
                    Some(Ordering::Greater | Ordering::Equal)
                ),
            };
            Value::Bool(result)
        }
    }
}

// Lexer

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Str(String),
    Num(Number),
    Dot,
    LParen,
    RParen,
    AndAnd,
    OrOr,
    Bang,
    Op(CompareOp),
    Eof,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Word(w) => w.clone(),
            Token::Str(s) => format!("'{}'", s),
            Token::Num(n) => n.to_string(),
            Token::Dot => ".".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::AndAnd => "&&".into(),
            Token::OrOr => "||".into(),
            Token::Bang => "!".into(),
            Token::Op(op) => format!("{:?}", op),
            Token::Eof => "end of input".into(),
        }
    }
}

#[derive(Debug, Clone)]
struct SpannedToken {
    token: Token,
    position: usize,
}

struct Lexer<'a> {
    input: &'a str,
    offset: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, offset: 0 }
    }

    fn lex(mut self) -> Result<Vec<SpannedToken>, ExprError> {
        let mut tokens = Vec::new();
        let bytes = self.input.as_bytes();

        while self.offset < bytes.len() {
            let start = self.offset;
            let ch = bytes[start];
            let next = bytes.get(start + 1).copied();
            let token = match ch {
                b' ' | b'\t' | b'\n' | b'\r' => {
                    self.offset += 1;
                    continue;
                }
                b'(' => self.single(Token::LParen),
                b')' => self.single(Token::RParen),
                b'.' => self.single(Token::Dot),
                b'&' if next == Some(b'&') => self.advance_by(2, Token::AndAnd),
                b'|' if next == Some(b'|') => self.advance_by(2, Token::OrOr),
                b'=' if next == Some(b'=') => {
                    let len = if bytes.get(start + 2) == Some(&b'=') { 3 } else { 2 };
                    self.advance_by(len, Token::Op(CompareOp::Eq))
                }
                b'!' if next == Some(b'=') => {
                    let len = if bytes.get(start + 2) == Some(&b'=') { 3 } else { 2 };
                    self.advance_by(len, Token::Op(CompareOp::Ne))
                }
                b'!' => self.single(Token::Bang),
                b'<' if next == Some(b'=') => self.advance_by(2, Token::Op(CompareOp::Le)),
                b'<' => self.single(Token::Op(CompareOp::Lt)),
                b'>' if next == Some(b'=') => self.advance_by(2, Token::Op(CompareOp::Ge)),
                b'>' => self.single(Token::Op(CompareOp::Gt)),
                b'\'' | b'"' => self.string(ch)?,
                b'0'..=b'9' => self.number()?,
                b'-' if next.is_some_and(|b| b.is_ascii_digit()) => self.number()?,
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                    self.consume_while(|b| b.is_ascii_alphanumeric() || b == b'_');
                    Token::Word(self.input[start..self.offset].to_string())
                }
                _ => {
                    let found = self.input[start..].chars().next().unwrap_or('?');
                    return Err(ExprError::UnexpectedToken {
                        expected: "operator, literal or path",
                        found: found.to_string(),
                        position: start,
                    });
                }
            };
            tokens.push(SpannedToken {
                token,
                position: start,
            });
        }

        if tokens.is_empty() {
            return Err(ExprError::EmptyInput);
        }
        tokens.push(SpannedToken {
            token: Token::Eof,
            position: self.offset,
        });
        Ok(tokens)
    }

    fn single(&mut self, token: Token) -> Token {
        self.advance_by(1, token)
    }

    fn advance_by(&mut self, len: usize, token: Token) -> Token {
        self.offset += len;
        token
    }

    fn consume_while<F: Fn(u8) -> bool>(&mut self, condition: F) {
        while let Some(&b) = self.input.as_bytes().get(self.offset) {
            if !condition(b) {
                break;
            }
            self.offset += 1;
        }
    }

    fn string(&mut self, quote: u8) -> Result<Token, ExprError> {
        let start = self.offset;
        self.offset += 1;
        let mut out = String::new();
        let mut chars = self.input[self.offset..].char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some((_, escaped)) => out.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    }),
                    None => break,
                },
                c if c as u32 == u32::from(quote) => {
                    self.offset += i + 1;
                    return Ok(Token::Str(out));
                }
                c => out.push(c),
            }
        }
        Err(ExprError::UnterminatedString { position: start })
    }

    fn number(&mut self) -> Result<Token, ExprError> {
        let start = self.offset;
        if self.input.as_bytes()[start] == b'-' {
            self.offset += 1;
        }
        self.consume_while(|b| b.is_ascii_digit());
        if self.input.as_bytes().get(self.offset) == Some(&b'.') {
            self.offset += 1;
            self.consume_while(|b| b.is_ascii_digit());
        }
        let raw = &self.input[start..self.offset];
        let invalid = || ExprError::InvalidNumber {
            raw: raw.to_string(),
            position: start,
        };
        let number = match raw.parse::<i64>() {
            Ok(i) => Number::from(i),
            Err(_) => raw
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .ok_or_else(invalid)?,
        };
        Ok(Token::Num(number))
    }
}

// Parser

struct Parser {
    tokens: Vec<SpannedToken>,
    index: usize,
    nesting: usize,
}

impl Parser {
    fn new(tokens: Vec<SpannedToken>) -> Self {
        Self {
            tokens,
            index: 0,
            nesting: 0,
        }
    }

    fn current(&self) -> &SpannedToken {
        let last = self.tokens.len() - 1;
        &self.tokens[self.index.min(last)]
    }

    fn advance(&mut self) {
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
    }

    fn is_word(&self, word: &str) -> bool {
        matches!(&self.current().token, Token::Word(w) if w == word)
    }

    fn eat(&mut self, token: &Token, keyword: Option<&str>) -> bool {
        if &self.current().token == token || keyword.is_some_and(|k| self.is_word(k)) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &'static str) -> ExprError {
        ExprError::UnexpectedToken {
            expected,
            found: self.current().token.describe(),
            position: self.current().position,
        }
    }

    fn expect_eof(&self) -> Result<(), ExprError> {
        match self.current().token {
            Token::Eof => Ok(()),
            _ => Err(self.unexpected("end of input")),
        }
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, ExprError>) -> Result<T, ExprError> {
        if self.nesting >= MAX_EXPR_NESTING {
            return Err(ExprError::NestingTooDeep {
                max: MAX_EXPR_NESTING,
                position: self.current().position,
            });
        }
        self.nesting += 1;
        let result = f(self);
        self.nesting -= 1;
        result
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut parts = vec![self.parse_and()?];
        while self.eat(&Token::OrOr, Some("or")) {
            parts.push(self.parse_and()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Expr::Or(parts)
        })
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut parts = vec![self.parse_unary()?];
        while self.eat(&Token::AndAnd, Some("and")) {
            parts.push(self.parse_unary()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Expr::And(parts)
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Bang, Some("not")) {
            return self.nested(|p| Ok(Expr::Not(Box::new(p.parse_unary()?))));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, ExprError> {
        let left = self.parse_primary()?;
        if let Token::Op(op) = self.current().token {
            self.advance();
            let right = self.parse_primary()?;
            return Ok(Expr::Compare(Box::new(left), op, Box::new(right)));
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let position = self.current().position;
        match self.current().token.clone() {
            Token::LParen => {
                self.advance();
                self.nested(|p| {
                    let inner = p.parse_or()?;
                    if !p.eat(&Token::RParen, None) {
                        return Err(p.unexpected("`)`"));
                    }
                    Ok(inner)
                })
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Value::String(s)))
            }
            Token::Num(n) => {
                self.advance();
                Ok(Expr::Literal(Value::Number(n)))
            }
            Token::Word(word) => {
                self.advance();
                match word.as_str() {
                    "true" => Ok(Expr::Literal(Value::Bool(true))),
                    "false" => Ok(Expr::Literal(Value::Bool(false))),
                    "null" | "undefined" => Ok(Expr::Literal(Value::Null)),
                    "record" => self.parse_path(PathRoot::Record),
                    "user" => self.parse_path(PathRoot::User),
                    _ => Err(ExprError::UnknownRoot {
                        name: word.clone(),
                        position,
                    }),
                }
            }
            _ => Err(self.unexpected("literal, path or `(`")),
        }
    }

    fn parse_path(&mut self, root: PathRoot) -> Result<Expr, ExprError> {
        let mut segments = Vec::new();
        while self.eat(&Token::Dot, None) {
            match self.current().token.clone() {
                Token::Word(segment) => {
                    self.advance();
                    segments.push(segment);
                }
                _ => return Err(self.unexpected("field name")),
            }
        }
        if segments.is_empty() {
            return Err(self.unexpected("`.` after path root"));
        }
        Ok(Expr::Path(root, segments))
    }
}
