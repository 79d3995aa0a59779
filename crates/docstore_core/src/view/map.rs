//! Map-function compilation and evaluation.
//!
//! # Responsibility
//! - Accept the map sources design documents carry
//!   (`function (doc) { ... }` or `(doc) => { ... }`).
//! - Compile the body into a small statement tree and run it per document.
//!
//! # Supported body
//! - `emit(key[, value]);`
//! - `if (cond) { ... } [else { ... }]`
//! - conditions: `path.startsWith('x')`, `===`, `!==`, `==`, `!=`, `&&`,
//!   `||`, `!` and plain truthiness.
//! - expressions: string/number/boolean/null literals, `doc.a.b`, `[..]`.
//!
//! # Invariants
//! - Sources outside this grammar fail compilation, never evaluation.

use crate::model::document::Document;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Number, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

static FUNCTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*function\s+[A-Za-z_$][\w$]*\s*\(\s*([A-Za-z_$][\w$]*)\s*\)\s*\{(.*)\}\s*;?\s*$")
        .expect("valid named function regex")
});
static ANONYMOUS_FUNCTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*function\s*\(\s*([A-Za-z_$][\w$]*)\s*\)\s*\{(.*)\}\s*;?\s*$")
        .expect("valid function regex")
});
static ARROW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*\(?\s*([A-Za-z_$][\w$]*)\s*\)?\s*=>\s*\{(.*)\}\s*;?\s*$")
        .expect("valid arrow regex")
});

/// Map source could not be compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapCompileError {
    pub message: String,
}

impl MapCompileError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for MapCompileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "unsupported map function: {}", self.message)
    }
}

impl Error for MapCompileError {}

/// Compiled map function.
#[derive(Debug, Clone, PartialEq)]
pub struct MapProgram {
    param: String,
    body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
enum Statement {
    Emit {
        key: Expr,
        value: Option<Expr>,
    },
    If {
        condition: Expr,
        then: Vec<Statement>,
        otherwise: Vec<Statement>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Path(Vec<String>),
    Array(Vec<Expr>),
    StartsWith(Box<Expr>, Box<Expr>),
    Equals(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl MapProgram {
    /// Compiles a map source string.
    pub fn compile(source: &str) -> Result<Self, MapCompileError> {
        let captures = ANONYMOUS_FUNCTION_RE
            .captures(source)
            .or_else(|| FUNCTION_RE.captures(source))
            .or_else(|| ARROW_RE.captures(source))
            .ok_or_else(|| MapCompileError::new("expected `function (doc) { ... }`"))?;

        let param = captures[1].to_string();
        let tokens = tokenize(&captures[2])?;
        let mut parser = Parser {
            tokens,
            position: 0,
            param: param.as_str(),
        };
        let body = parser.statements_until(None)?;

        Ok(Self { param, body })
    }

    /// Runs the map body and returns emitted `(key, value)` pairs.
    pub fn run(&self, doc: &Document) -> Vec<(Value, Value)> {
        let mut emitted = Vec::new();
        run_statements(&self.body, doc, &mut emitted);
        emitted
    }
}

fn run_statements(statements: &[Statement], doc: &Document, emitted: &mut Vec<(Value, Value)>) {
    for statement in statements {
        match statement {
            Statement::Emit { key, value } => {
                let key = evaluate(key, doc);
                let value = value
                    .as_ref()
                    .map_or(Value::Null, |value| evaluate(value, doc));
                emitted.push((key, value));
            }
            Statement::If {
                condition,
                then,
                otherwise,
            } => {
                if is_truthy(&evaluate(condition, doc)) {
                    run_statements(then, doc, emitted);
                } else {
                    run_statements(otherwise, doc, emitted);
                }
            }
        }
    }
}

fn evaluate(expr: &Expr, doc: &Document) -> Value {
    match expr {
        Expr::Literal(value) => value.clone(),
        Expr::Path(path) => doc.lookup(path).unwrap_or(Value::Null),
        Expr::Array(items) => Value::Array(items.iter().map(|item| evaluate(item, doc)).collect()),
        Expr::StartsWith(target, prefix) => {
            match (evaluate(target, doc), evaluate(prefix, doc)) {
                (Value::String(target), Value::String(prefix)) => {
                    Value::Bool(target.starts_with(prefix.as_str()))
                }
                _ => Value::Bool(false),
            }
        }
        Expr::Equals(left, right) => Value::Bool(evaluate(left, doc) == evaluate(right, doc)),
        Expr::Not(inner) => Value::Bool(!is_truthy(&evaluate(inner, doc))),
        Expr::And(left, right) => {
            Value::Bool(is_truthy(&evaluate(left, doc)) && is_truthy(&evaluate(right, doc)))
        }
        Expr::Or(left, right) => {
            Value::Bool(is_truthy(&evaluate(left, doc)) || is_truthy(&evaluate(right, doc)))
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Punct(&'static str),
}

const PUNCTUATION: &[&str] = &[
    "===", "!==", "==", "!=", "&&", "||", "(", ")", "{", "}", "[", "]", ",", ";", ".", "!",
];

fn tokenize(source: &str) -> Result<Vec<Token>, MapCompileError> {
    let chars = source.chars().collect::<Vec<_>>();
    let mut tokens = Vec::new();
    let mut index = 0;

    while index < chars.len() {
        let current = chars[index];
        if current.is_whitespace() {
            index += 1;
            continue;
        }
        if current == '/' && chars.get(index + 1) == Some(&'/') {
            while index < chars.len() && chars[index] != '\n' {
                index += 1;
            }
            continue;
        }
        if current == '\'' || current == '"' {
            let (text, next) = read_string(&chars, index)?;
            tokens.push(Token::Str(text));
            index = next;
            continue;
        }
        if current.is_ascii_digit()
            || (current == '-' && chars.get(index + 1).is_some_and(char::is_ascii_digit))
        {
            let start = index;
            index += 1;
            while index < chars.len() && (chars[index].is_ascii_digit() || chars[index] == '.') {
                index += 1;
            }
            let literal = chars[start..index].iter().collect::<String>();
            let number = literal
                .parse::<f64>()
                .map_err(|_| MapCompileError::new(format!("invalid number `{literal}`")))?;
            tokens.push(Token::Num(number));
            continue;
        }
        if current.is_alphabetic() || current == '_' || current == '$' {
            let start = index;
            while index < chars.len()
                && (chars[index].is_alphanumeric() || chars[index] == '_' || chars[index] == '$')
            {
                index += 1;
            }
            tokens.push(Token::Ident(chars[start..index].iter().collect()));
            continue;
        }

        let rest = chars[index..chars.len().min(index + 3)]
            .iter()
            .collect::<String>();
        let punct = PUNCTUATION
            .iter()
            .find(|candidate| rest.starts_with(**candidate))
            .ok_or_else(|| MapCompileError::new(format!("unexpected character `{current}`")))?;
        tokens.push(Token::Punct(punct));
        index += punct.len();
    }

    Ok(tokens)
}

fn read_string(chars: &[char], start: usize) -> Result<(String, usize), MapCompileError> {
    let quote = chars[start];
    let mut text = String::new();
    let mut index = start + 1;

    while index < chars.len() {
        match chars[index] {
            c if c == quote => return Ok((text, index + 1)),
            '\\' => {
                let escaped = chars
                    .get(index + 1)
                    .ok_or_else(|| MapCompileError::new("unterminated escape"))?;
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => *other,
                });
                index += 2;
            }
            other => {
                text.push(other);
                index += 1;
            }
        }
    }

    Err(MapCompileError::new("unterminated string literal"))
}

struct Parser<'a> {
    tokens: Vec<Token>,
    position: usize,
    param: &'a str,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(p)) if *p == punct) {
            self.position += 1;
            return true;
        }
        false
    }

    fn expect_punct(&mut self, punct: &str) -> Result<(), MapCompileError> {
        if self.eat_punct(punct) {
            return Ok(());
        }
        Err(MapCompileError::new(format!(
            "expected `{punct}`, found {}",
            describe(self.peek())
        )))
    }

    fn eat_ident(&mut self, ident: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(name)) if name == ident) {
            self.position += 1;
            return true;
        }
        false
    }

    /// Parses statements up to `closing` (or end of input when `None`).
    fn statements_until(
        &mut self,
        closing: Option<&str>,
    ) -> Result<Vec<Statement>, MapCompileError> {
        let mut statements = Vec::new();
        loop {
            match (self.peek(), closing) {
                (None, None) => return Ok(statements),
                (None, Some(punct)) => {
                    return Err(MapCompileError::new(format!("missing `{punct}`")));
                }
                (Some(Token::Punct(p)), Some(punct)) if *p == punct => {
                    self.position += 1;
                    return Ok(statements);
                }
                _ => {}
            }
            if self.eat_punct(";") {
                continue;
            }
            statements.push(self.statement()?);
        }
    }

    fn statement(&mut self) -> Result<Statement, MapCompileError> {
        if self.eat_ident("emit") {
            self.expect_punct("(")?;
            let key = self.expression()?;
            let value = if self.eat_punct(",") {
                Some(self.expression()?)
            } else {
                None
            };
            self.expect_punct(")")?;
            self.eat_punct(";");
            return Ok(Statement::Emit { key, value });
        }

        if self.eat_ident("if") {
            self.expect_punct("(")?;
            let condition = self.expression()?;
            self.expect_punct(")")?;
            let then = self.block()?;
            let otherwise = if self.eat_ident("else") {
                self.block()?
            } else {
                Vec::new()
            };
            return Ok(Statement::If {
                condition,
                then,
                otherwise,
            });
        }

        Err(MapCompileError::new(format!(
            "expected `emit(...)` or `if (...)`, found {}",
            describe(self.peek())
        )))
    }

    fn block(&mut self) -> Result<Vec<Statement>, MapCompileError> {
        if self.eat_punct("{") {
            return self.statements_until(Some("}"));
        }
        Ok(vec![self.statement()?])
    }

    fn expression(&mut self) -> Result<Expr, MapCompileError> {
        let mut left = self.conjunction()?;
        while self.eat_punct("||") {
            let right = self.conjunction()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn conjunction(&mut self) -> Result<Expr, MapCompileError> {
        let mut left = self.unary()?;
        while self.eat_punct("&&") {
            let right = self.unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, MapCompileError> {
        if self.eat_punct("!") {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, MapCompileError> {
        let left = self.operand()?;
        if self.eat_punct("===") || self.eat_punct("==") {
            let right = self.operand()?;
            return Ok(Expr::Equals(Box::new(left), Box::new(right)));
        }
        if self.eat_punct("!==") || self.eat_punct("!=") {
            let right = self.operand()?;
            return Ok(Expr::Not(Box::new(Expr::Equals(
                Box::new(left),
                Box::new(right),
            ))));
        }
        Ok(left)
    }

    fn operand(&mut self) -> Result<Expr, MapCompileError> {
        let target = self.primary()?;
        if self.tokens.get(self.position) == Some(&Token::Punct("."))
            && self.tokens.get(self.position + 1) == Some(&Token::Ident("startsWith".to_string()))
        {
            self.position += 2;
            self.expect_punct("(")?;
            let prefix = self.expression()?;
            self.expect_punct(")")?;
            return Ok(Expr::StartsWith(Box::new(target), Box::new(prefix)));
        }
        Ok(target)
    }

    fn primary(&mut self) -> Result<Expr, MapCompileError> {
        match self.next() {
            Some(Token::Str(text)) => Ok(Expr::Literal(Value::String(text))),
            Some(Token::Num(number)) => Ok(Expr::Literal(number_value(number))),
            Some(Token::Ident(name)) => match name.as_str() {
                "null" | "undefined" => Ok(Expr::Literal(Value::Null)),
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                _ if name == self.param => self.path(),
                other => Err(MapCompileError::new(format!(
                    "unknown identifier `{other}`"
                ))),
            },
            Some(Token::Punct("[")) => {
                let mut items = Vec::new();
                if self.eat_punct("]") {
                    return Ok(Expr::Array(items));
                }
                loop {
                    items.push(self.expression()?);
                    if self.eat_punct("]") {
                        return Ok(Expr::Array(items));
                    }
                    self.expect_punct(",")?;
                }
            }
            Some(Token::Punct("(")) => {
                let inner = self.expression()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            other => Err(MapCompileError::new(format!(
                "expected expression, found {}",
                describe(other.as_ref())
            ))),
        }
    }

    fn path(&mut self) -> Result<Expr, MapCompileError> {
        let mut segments = Vec::new();
        while self.tokens.get(self.position) == Some(&Token::Punct(".")) {
            match self.tokens.get(self.position + 1) {
                Some(Token::Ident(name)) if name == "startsWith" => break,
                Some(Token::Ident(name)) => {
                    segments.push(name.clone());
                    self.position += 2;
                }
                other => {
                    return Err(MapCompileError::new(format!(
                        "expected field name, found {}",
                        describe(other)
                    )));
                }
            }
        }
        if segments.is_empty() {
            return Err(MapCompileError::new(format!(
                "`{}` must be read through a field path",
                self.param
            )));
        }
        Ok(Expr::Path(segments))
    }
}

fn number_value(number: f64) -> Value {
    if number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
        return Value::Number(Number::from(number as i64));
    }
    Number::from_f64(number).map_or(Value::Null, Value::Number)
}

fn describe(token: Option<&Token>) -> String {
    match token {
        None => "end of source".to_string(),
        Some(Token::Ident(name)) => format!("`{name}`"),
        Some(Token::Str(text)) => format!("string '{text}'"),
        Some(Token::Num(number)) => format!("number {number}"),
        Some(Token::Punct(punct)) => format!("`{punct}`"),
    }
}

#[cfg(test)]
mod tests {
    use super::MapProgram;
    use crate::model::document::Document;
    use serde_json::json;

    const NOTES_MAP: &str = "function(doc) {
              if (doc._id.startsWith('note:')) {
                emit(['notes', doc._id])
              }
            }";

    #[test]
    fn compiles_prefix_guarded_emit() {
        let program = MapProgram::compile(NOTES_MAP).unwrap();

        let rows = program.run(&Document::new("note:foobar"));
        assert_eq!(rows, vec![(json!(["notes", "note:foobar"]), json!(null))]);
        assert!(program.run(&Document::new("task:1")).is_empty());
    }

    #[test]
    fn supports_arrow_functions_values_and_else_branches() {
        let program = MapProgram::compile(
            "(d) => { if (d.kind === 'task' && !d.done) { emit(d.title, 1); } else emit(null, [d.kind, 2.5]); }",
        )
        .unwrap();

        let open_task = Document::new("t1")
            .with_field("kind", "task")
            .with_field("done", false)
            .with_field("title", "write");
        assert_eq!(program.run(&open_task), vec![(json!("write"), json!(1))]);

        let note = Document::new("n1").with_field("kind", "note");
        assert_eq!(program.run(&note), vec![(json!(null), json!(["note", 2.5]))]);
    }

    #[test]
    fn missing_fields_evaluate_to_null() {
        let program = MapProgram::compile("function (doc) { emit(doc.meta.tag, doc.body); }")
            .unwrap();
        assert_eq!(
            program.run(&Document::new("x").with_field("body", "hi")),
            vec![(json!(null), json!("hi"))]
        );
    }

    #[test]
    fn rejects_unsupported_sources() {
        assert!(MapProgram::compile("emit(doc._id)").is_err());
        assert!(MapProgram::compile("function (doc) { console.log(doc) }").is_err());
        assert!(MapProgram::compile("function (doc) { emit(doc._id }").is_err());
        assert!(MapProgram::compile("function (doc) { emit(doc) }").is_err());
        assert!(MapProgram::compile("function (doc) { if (doc.a) { emit(1) }").is_err());
    }
}
