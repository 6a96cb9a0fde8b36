//! Output-path templates.
//!
//! A small `text/template`-style language: literal text plus `{{ pipeline }}` actions.
//!
//! ```text
//! {{ .Info.Name }}
//! {{ ext .Info.Name }}/{{ count "%03d" }}{{ ext .Info.Name }}
//! {{ .Info.ModTime.Format "2006/01" }}/{{ .Info.Name | printf "%s" }}
//! {{- /* trim markers and comments */ -}}
//! ```
//!
//! Functions are resolved through a [`FuncMap`] when the template is parsed, so a
//! misspelled helper is reported before any file is touched.

use std::fmt;

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};
use thiserror::Error;

use crate::plan::{FileInfo, FileMode};
use crate::timefmt;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template: offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("template: executing {action:?}: {message}")]
    Exec { action: String, message: String },
}

/// Helper functions available to templates.
pub trait FuncMap {
    /// Whether `name` may be called from a template.
    fn defines(&self, name: &str) -> bool;

    /// Call `name`; errors abort rendering.
    fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, String>;
}

/// The data a template is executed against: `.From`, `.To`, `.Info`.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    pub from: String,
    pub to:   String,
    pub info: FileInfo,
}

/// Runtime value of an operand or pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    Time(DateTime<FixedOffset>),
    Mode(FileMode),
    Info(FileInfo),
    Scope(Box<Scope>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::Time(_) => "time",
            Value::Mode(_) => "mode",
            Value::Info(_) => "info",
            Value::Scope(_) => "file",
        }
    }

    /// Text written for this value when it ends a pipeline.
    pub fn to_text(&self) -> Result<String, String> {
        match self {
            Value::Str(s) => Ok(s.clone()),
            Value::Int(i) => Ok(i.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Time(t) => Ok(timefmt::display(t)),
            Value::Mode(m) => Ok(m.to_string()),
            Value::Info(_) | Value::Scope(_) => Err(format!("can't print value of type {}", self.type_name())),
        }
    }

    /// Field access or method call `receiver.name args...`.
    fn field(self, name: &str, args: Vec<Value>) -> Result<Value, String> {
        let value = match (&self, name) {
            (Value::Scope(s), "From") => Value::Str(s.from.clone()),
            (Value::Scope(s), "To") => Value::Str(s.to.clone()),
            (Value::Scope(s), "Info") => Value::Info(s.info.clone()),
            (Value::Info(i), "Name") => Value::Str(i.name.clone()),
            (Value::Info(i), "Size") => Value::Int(i64::try_from(i.size).unwrap_or(i64::MAX)),
            (Value::Info(i), "Mode") => Value::Mode(i.mode),
            (Value::Info(i), "ModTime") => Value::Time(i.mod_time),
            (Value::Info(i), "IsDir") => Value::Bool(i.is_dir),
            (Value::Mode(m), "Perm") => Value::Int(i64::from(m.perm())),
            (Value::Time(t), "Format") => return time_format(t, args),
            (Value::Time(t), method) => time_method(t, method)?,
            _ => return Err(format!("can't evaluate field {} in type {}", name, self.type_name())),
        };
        if !args.is_empty() {
            return Err(format!("{} is not a method but has arguments", name));
        }
        Ok(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_text() {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "<{}>", self.type_name()),
        }
    }
}

fn time_format(t: &DateTime<FixedOffset>, args: Vec<Value>) -> Result<Value, String> {
    match args.as_slice() {
        [Value::Str(layout)] => Ok(Value::Str(timefmt::format(t, layout))),
        [other] => Err(format!("Format: layout must be string, got {}", other.type_name())),
        _ => Err(format!("Format: want 1 argument, got {}", args.len())),
    }
}

fn time_method(t: &DateTime<FixedOffset>, method: &str) -> Result<Value, String> {
    let int = |n: u32| Value::Int(i64::from(n));
    Ok(match method {
        "Year" => Value::Int(i64::from(t.year())),
        "Month" => int(t.month()),
        "Day" => int(t.day()),
        "YearDay" => int(t.ordinal()),
        "Hour" => int(t.hour()),
        "Minute" => int(t.minute()),
        "Second" => int(t.second()),
        "Unix" => Value::Int(t.timestamp()),
        "UTC" => Value::Time(t.with_timezone(&Utc).fixed_offset()),
        _ => return Err(format!("can't evaluate field {} in type time", method)),
    })
}

// Syntax tree

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Action { source: String, pipeline: Pipeline },
}

#[derive(Debug, Clone, PartialEq)]
struct Pipeline {
    commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
struct Command {
    operands: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    /// `.` followed by zero or more field names.
    Field(Vec<String>),
    Func(String),
    Literal(Value),
    /// `( pipeline )` optionally followed by `.Field` chain.
    Sub(Box<Pipeline>, Vec<String>),
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    /// Parse `source`, checking every called function against `funcs`.
    #[tracing::instrument(skip(funcs))]
    pub fn parse(source: &str, funcs: &impl FuncMap) -> Result<Self, TemplateError> {
        let mut nodes = Vec::new();
        let mut pos = 0;

        while let Some(found) = source[pos..].find("{{") {
            let open = pos + found;
            let mut text = &source[pos..open];
            let mut inner = open + 2;

            if source[inner..].starts_with('-') && source[inner + 1..].starts_with(char::is_whitespace) {
                text = text.trim_end();
                inner += 1;
            }
            if !text.is_empty() {
                nodes.push(Node::Text(text.to_string()));
            }

            let action = lex_action(source, inner)?;
            if let Some(tokens) = action.tokens {
                let mut parser = Parser { tokens, at: 0, offset: open, funcs };
                let pipeline = parser.pipeline()?;
                if parser.at < parser.tokens.len() {
                    return Err(parse_error(open, "unexpected \")\" in command"));
                }
                nodes.push(Node::Action { source: source[open..action.end].to_string(), pipeline });
            }

            pos = action.end;
            if action.trim_right {
                let rest = &source[pos..];
                pos += rest.len() - rest.trim_start().len();
            }
        }
        if pos < source.len() {
            nodes.push(Node::Text(source[pos..].to_string()));
        }

        tracing::debug!("parsed template into {} nodes", nodes.len());
        Ok(Template { nodes })
    }

    /// Execute against `scope`, calling helpers through `funcs`.
    pub fn render(&self, scope: &Scope, funcs: &mut impl FuncMap) -> Result<String, TemplateError> {
        let dot = Value::Scope(Box::new(scope.clone()));
        let mut out = String::new();
        for node in &self.nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Action { source, pipeline } => {
                    let text = eval_pipeline(pipeline, &dot, funcs).and_then(|v| v.to_text())
                                                                   .map_err(|message| TemplateError::Exec { action: source.clone(),
                                                                                                            message })?;
                    out.push_str(&text);
                }
            }
        }
        Ok(out)
    }
}

fn parse_error(offset: usize, message: impl Into<String>) -> TemplateError {
    TemplateError::Parse { offset, message: message.into() }
}

// Lexer

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Field(Vec<String>),
    Ident(String),
    Literal(Value),
    LParen,
    RParen,
    Pipe,
}

struct LexedAction {
    /// `None` for a comment.
    tokens:     Option<Vec<(Token, bool)>>,
    /// Byte offset just past the closing `}}`.
    end:        usize,
    trim_right: bool,
}

/// Lex one action starting just after `{{` (and any left trim marker).
///
/// Each token carries whether whitespace preceded it, which decides if a `.Field`
/// after `)` chains onto the parenthesised value.
fn lex_action(src: &str, start: usize) -> Result<LexedAction, TemplateError> {
    let bytes = src.as_bytes();
    let mut i = start;
    let mut tokens = Vec::new();
    let mut spaced = true;

    let after_ws = src[i..].trim_start();
    if after_ws.starts_with("/*") {
        let body = i + (src[i..].len() - after_ws.len()) + 2;
        let close = src[body..].find("*/").ok_or_else(|| parse_error(start, "unclosed comment"))?;
        let tail = &src[body + close + 2..];
        let trimmed = tail.trim_start();
        let (trim_right, rest) = match trimmed.strip_prefix("-}}") {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix("}}").ok_or_else(|| parse_error(start, "comment ends before closing delimiter"))?),
        };
        return Ok(LexedAction { tokens: None, end: src.len() - rest.len(), trim_right });
    }

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b'}' if src[i..].starts_with("}}") => {
                return Ok(LexedAction { tokens: Some(tokens), end: i + 2, trim_right: false });
            }
            b'-' if spaced && src[i..].starts_with("-}}") => {
                return Ok(LexedAction { tokens: Some(tokens), end: i + 3, trim_right: true });
            }
            _ if c.is_ascii_whitespace() => {
                spaced = true;
                i += 1;
                continue;
            }
            b'(' => {
                tokens.push((Token::LParen, spaced));
                i += 1;
            }
            b')' => {
                tokens.push((Token::RParen, spaced));
                i += 1;
            }
            b'|' => {
                tokens.push((Token::Pipe, spaced));
                i += 1;
            }
            b'"' => {
                let (s, len) = lex_quoted(&src[i..]).ok_or_else(|| parse_error(i, "unterminated quoted string"))?;
                tokens.push((Token::Literal(Value::Str(s)), spaced));
                i += len;
            }
            b'`' => {
                let close = src[i + 1..].find('`').ok_or_else(|| parse_error(i, "unterminated raw quoted string"))?;
                tokens.push((Token::Literal(Value::Str(src[i + 1..i + 1 + close].to_string())), spaced));
                i += close + 2;
            }
            b'.' => {
                let mut names = Vec::new();
                let mut j = i;
                while bytes.get(j) == Some(&b'.') {
                    let len = ident_len(&src[j + 1..]);
                    if len == 0 {
                        break;
                    }
                    names.push(src[j + 1..j + 1 + len].to_string());
                    j += 1 + len;
                }
                if names.is_empty() {
                    j = i + 1;
                }
                tokens.push((Token::Field(names), spaced));
                i = j;
            }
            b'0'..=b'9' | b'-' | b'+' => {
                let len = 1 + src[i + 1..].bytes().take_while(u8::is_ascii_digit).count();
                let number = src[i..i + len].parse::<i64>()
                                            .map_err(|_| parse_error(i, format!("bad number syntax: {:?}", &src[i..i + len])))?;
                tokens.push((Token::Literal(Value::Int(number)), spaced));
                i += len;
            }
            _ if c.is_ascii_alphabetic() || c == b'_' => {
                let len = ident_len(&src[i..]);
                let word = &src[i..i + len];
                let token = match word {
                    "true" => Token::Literal(Value::Bool(true)),
                    "false" => Token::Literal(Value::Bool(false)),
                    _ => Token::Ident(word.to_string()),
                };
                tokens.push((token, spaced));
                i += len;
            }
            _ => {
                let ch = src[i..].chars().next().unwrap_or_default();
                return Err(parse_error(i, format!("unexpected {:?} in command", ch)));
            }
        }
        spaced = false;
    }

    Err(parse_error(start, "unclosed action"))
}

fn ident_len(s: &str) -> usize {
    s.bytes().take_while(|b| b.is_ascii_alphanumeric() || *b == b'_').count()
}

/// Double-quoted literal with backslash escapes; returns the value and consumed length.
fn lex_quoted(s: &str) -> Option<(String, usize)> {
    let mut out = String::new();
    let mut chars = s.char_indices().skip(1);
    while let Some((idx, ch)) = chars.next() {
        match ch {
            '"' => return Some((out, idx + 1)),
            '\n' => return None,
            '\\' => {
                let (_, escaped) = chars.next()?;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    other => other,
                });
            }
            other => out.push(other),
        }
    }
    None
}

// Parser

struct Parser<'f, F> {
    tokens: Vec<(Token, bool)>,
    at:     usize,
    offset: usize,
    funcs:  &'f F,
}

impl<F: FuncMap> Parser<'_, F> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.at).map(|(t, _)| t)
    }

    fn pipeline(&mut self) -> Result<Pipeline, TemplateError> {
        let mut commands = vec![self.command()?];
        while self.peek() == Some(&Token::Pipe) {
            self.at += 1;
            commands.push(self.command()?);
        }
        Ok(Pipeline { commands })
    }

    fn command(&mut self) -> Result<Command, TemplateError> {
        let mut operands = Vec::new();
        while let Some(token) = self.peek() {
            if matches!(token, Token::Pipe | Token::RParen) {
                break;
            }
            operands.push(self.operand()?);
        }
        if operands.is_empty() {
            return Err(parse_error(self.offset, "missing value for command"));
        }
        if operands.len() > 1 && matches!(operands[0], Operand::Literal(_)) {
            return Err(parse_error(self.offset, "can't give argument to non-function"));
        }
        Ok(Command { operands })
    }

    fn operand(&mut self) -> Result<Operand, TemplateError> {
        let (token, _) = self.tokens[self.at].clone();
        self.at += 1;
        match token {
            Token::Field(names) => Ok(Operand::Field(names)),
            Token::Literal(value) => Ok(Operand::Literal(value)),
            Token::Ident(name) => {
                if !self.funcs.defines(&name) {
                    return Err(parse_error(self.offset, format!("function {:?} not defined", name)));
                }
                Ok(Operand::Func(name))
            }
            Token::LParen => {
                let inner = self.pipeline()?;
                if self.peek() != Some(&Token::RParen) {
                    return Err(parse_error(self.offset, "unclosed left paren"));
                }
                self.at += 1;
                let chain = match self.tokens.get(self.at) {
                    Some((Token::Field(names), false)) if !names.is_empty() => {
                        self.at += 1;
                        names.clone()
                    }
                    _ => Vec::new(),
                };
                Ok(Operand::Sub(Box::new(inner), chain))
            }
            Token::RParen => Err(parse_error(self.offset, "unexpected \")\" in operand")),
            Token::Pipe => Err(parse_error(self.offset, "unexpected \"|\" in operand")),
        }
    }
}

// Evaluation

fn eval_pipeline(pipeline: &Pipeline, dot: &Value, funcs: &mut impl FuncMap) -> Result<Value, String> {
    let mut piped = None;
    for command in &pipeline.commands {
        piped = Some(eval_command(command, dot, funcs, piped)?);
    }
    piped.ok_or_else(|| "empty pipeline".to_string())
}

fn eval_command(command: &Command, dot: &Value, funcs: &mut impl FuncMap, piped: Option<Value>) -> Result<Value, String> {
    let (head, rest) = command.operands.split_first().ok_or("empty command")?;

    let mut args = Vec::with_capacity(rest.len() + 1);
    for operand in rest {
        args.push(eval_operand(operand, dot, funcs)?);
    }
    args.extend(piped);

    match head {
        Operand::Func(name) => funcs.call(name, args),
        Operand::Field(names) if !names.is_empty() => {
            let (last, path) = names.split_last().ok_or("empty field chain")?;
            let receiver = walk_fields(dot.clone(), path)?;
            receiver.field(last, args)
        }
        Operand::Sub(inner, chain) if !chain.is_empty() => {
            let (last, path) = chain.split_last().ok_or("empty field chain")?;
            let receiver = walk_fields(eval_pipeline(inner, dot, funcs)?, path)?;
            receiver.field(last, args)
        }
        other if args.is_empty() => eval_operand(other, dot, funcs),
        _ => Err("can't give argument to non-function".to_string()),
    }
}

fn eval_operand(operand: &Operand, dot: &Value, funcs: &mut impl FuncMap) -> Result<Value, String> {
    match operand {
        Operand::Field(names) => walk_fields(dot.clone(), names),
        Operand::Literal(value) => Ok(value.clone()),
        Operand::Func(name) => funcs.call(name, Vec::new()),
        Operand::Sub(inner, chain) => walk_fields(eval_pipeline(inner, dot, funcs)?, chain),
    }
}

fn walk_fields(mut value: Value, names: &[String]) -> Result<Value, String> {
    for name in names {
        value = value.field(name, Vec::new())?;
    }
    Ok(value)
}
