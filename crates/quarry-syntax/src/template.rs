//! Logic-light text templates for output grammars.
//!
//! Supported tags:
//! - `{{path}}` and `{{path|filter|filter:'arg'}}`, with dotted paths
//! - `{{#if cond}}...{{else}}...{{/if}}`; `cond` is a path, `!path`, or
//!   `path OP value` with `== != < > <= >=`
//! - `{{#each path}}...{{/each}}` exposing `@item`, `@index`, `@first`, `@last`
//!   and the fields of object items
//! - `{{>name}}` partial includes and `{{! comments }}`

use once_cell::sync::Lazy;
use quarry_core::{value, QueryError};
use regex::Regex;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use thiserror::Error;

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{\{(.*?)\}\}").expect("valid tag regex"));

const PARTIAL_DEPTH_LIMIT: usize = 32;

#[derive(Debug, Error, PartialEq)]
pub enum TemplateError {
    #[error("unclosed {{{{#{0}}}}} block")]
    Unclosed(&'static str),

    #[error("unexpected {{{{{0}}}}}")]
    Unexpected(String),

    #[error("unknown filter '{0}'")]
    UnknownFilter(String),

    #[error("unknown partial '{0}'")]
    UnknownPartial(String),

    #[error("partials nested deeper than {0}")]
    PartialDepth(usize),
}

impl From<TemplateError> for QueryError {
    fn from(err: TemplateError) -> Self {
        QueryError::format(err.to_string())
    }
}

// ============================================================================
// Parsed form
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Filter {
    name: String,
    arg: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Literal(Value),
    Path(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Truthy(String),
    Not(Box<Condition>),
    Compare(String, CompareOp, Operand),
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Var { path: String, filters: Vec<Filter> },
    If { cond: Condition, then: Vec<Node>, otherwise: Vec<Node> },
    Each { path: String, body: Vec<Node> },
    Partial(String),
}

/// A parsed template
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    nodes: Vec<Node>,
}

enum Token<'a> {
    Text(&'a str),
    Tag(&'a str),
}

fn tokenize(source: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut last = 0;
    for caps in TAG.captures_iter(source) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if whole.start() > last {
            tokens.push(Token::Text(&source[last..whole.start()]));
        }
        tokens.push(Token::Tag(inner.as_str().trim()));
        last = whole.end();
    }
    if last < source.len() {
        tokens.push(Token::Text(&source[last..]));
    }
    tokens
}

/// Split on `sep` outside single or double quotes
fn split_unquoted(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == sep => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            None => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn unquote(text: &str) -> Option<&str> {
    let text = text.trim();
    ['\'', '"'].into_iter().find_map(|q| {
        text.strip_prefix(q)
            .and_then(|rest| rest.strip_suffix(q))
    })
}

fn parse_var(tag: &str) -> Node {
    let mut parts = split_unquoted(tag, '|').into_iter();
    let path = parts.next().unwrap_or_default().trim().to_string();
    let filters = parts
        .map(|part| {
            let part = part.trim();
            match part.split_once(':') {
                Some((name, arg)) => Filter {
                    name: name.trim().to_string(),
                    arg: Some(unquote(arg).unwrap_or(arg.trim()).to_string()),
                },
                None => Filter {
                    name: part.to_string(),
                    arg: None,
                },
            }
        })
        .collect();
    Node::Var { path, filters }
}

fn parse_operand(text: &str) -> Operand {
    let text = text.trim();
    if let Some(s) = unquote(text) {
        return Operand::Literal(Value::String(s.to_string()));
    }
    match serde_json::from_str::<Value>(text) {
        Ok(v) if !v.is_object() && !v.is_array() => Operand::Literal(v),
        _ => Operand::Path(text.to_string()),
    }
}

fn parse_condition(text: &str) -> Condition {
    let text = text.trim();
    if let Some(rest) = text.strip_prefix('!') {
        if !rest.starts_with('=') {
            return Condition::Not(Box::new(parse_condition(rest)));
        }
    }
    const OPS: [(&str, CompareOp); 6] = [
        ("==", CompareOp::Eq),
        ("!=", CompareOp::Ne),
        ("<=", CompareOp::Le),
        (">=", CompareOp::Ge),
        ("<", CompareOp::Lt),
        (">", CompareOp::Gt),
    ];
    for (symbol, op) in OPS {
        if let Some((left, right)) = text.split_once(symbol) {
            return Condition::Compare(left.trim().to_string(), op, parse_operand(right));
        }
    }
    Condition::Truthy(text.to_string())
}

/// Block being collected while parsing
enum Frame {
    Root,
    If {
        cond: Condition,
        then: Option<Vec<Node>>,
    },
    Each {
        path: String,
    },
}

impl Template {
    pub fn parse(source: &str) -> Result<Template, TemplateError> {
        let mut stack: Vec<(Frame, Vec<Node>)> = vec![(Frame::Root, Vec::new())];

        for token in tokenize(source) {
            let tag = match token {
                Token::Text(text) => {
                    if let Some((_, nodes)) = stack.last_mut() {
                        nodes.push(Node::Text(text.to_string()));
                    }
                    continue;
                }
                Token::Tag(tag) => tag,
            };

            if tag.starts_with('!') {
                continue;
            }
            if let Some(cond) = tag.strip_prefix("#if ") {
                stack.push((
                    Frame::If {
                        cond: parse_condition(cond),
                        then: None,
                    },
                    Vec::new(),
                ));
                continue;
            }
            if let Some(path) = tag.strip_prefix("#each ") {
                stack.push((
                    Frame::Each {
                        path: path.trim().to_string(),
                    },
                    Vec::new(),
                ));
                continue;
            }
            if tag == "else" {
                match stack.last_mut() {
                    Some((Frame::If { then, .. }, nodes)) if then.is_none() => {
                        *then = Some(std::mem::take(nodes));
                    }
                    _ => return Err(TemplateError::Unexpected(tag.to_string())),
                }
                continue;
            }
            if tag == "/if" || tag == "/each" {
                let node = match (stack.pop(), tag) {
                    (Some((Frame::If { cond, then }, nodes)), "/if") => match then {
                        Some(then) => Node::If {
                            cond,
                            then,
                            otherwise: nodes,
                        },
                        None => Node::If {
                            cond,
                            then: nodes,
                            otherwise: Vec::new(),
                        },
                    },
                    (Some((Frame::Each { path }, body)), "/each") => Node::Each { path, body },
                    _ => return Err(TemplateError::Unexpected(tag.to_string())),
                };
                match stack.last_mut() {
                    Some((_, nodes)) => nodes.push(node),
                    None => return Err(TemplateError::Unexpected(tag.to_string())),
                }
                continue;
            }
            let node = match tag.strip_prefix('>') {
                Some(name) => Node::Partial(name.trim().to_string()),
                None => parse_var(tag),
            };
            if let Some((_, nodes)) = stack.last_mut() {
                nodes.push(node);
            }
        }

        match stack.pop() {
            Some((Frame::Root, nodes)) if stack.is_empty() => Ok(Template { nodes }),
            Some((Frame::If { .. }, _)) => Err(TemplateError::Unclosed("if")),
            Some((Frame::Each { .. }, _)) => Err(TemplateError::Unclosed("each")),
            _ => Err(TemplateError::Unexpected("end of template".to_string())),
        }
    }
}

// ============================================================================
// Values
// ============================================================================

/// Text a value renders as: strings raw, null empty, arrays comma-joined
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(_) => value::normalize_number(value).to_string(),
        Value::Array(items) => items.iter().map(display).collect::<Vec<_>>().join(", "),
        Value::Object(_) => value.to_string(),
    }
}

/// Plural collection name to its row element (`users` → `user`)
pub fn singular(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{stem}y");
        }
    }
    for suffix in ["sses", "shes", "ches", "xes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    match word.strip_suffix('s') {
        Some(stem) if !stem.is_empty() && !stem.ends_with('s') => stem.to_string(),
        _ => word.to_string(),
    }
}

fn join_items(value: &Value, sep: &str) -> String {
    match value {
        Value::Array(items) => items
            .iter()
            .map(display)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(sep),
        other => display(other),
    }
}

fn apply_filter(filter: &Filter, value: Value) -> Result<Value, TemplateError> {
    let text = display(&value);
    Ok(match filter.name.as_str() {
        "upper" => Value::String(text.to_uppercase()),
        "lower" => Value::String(text.to_lowercase()),
        "trim" => Value::String(text.trim().to_string()),
        "quote" => Value::String(format!("'{text}'")),
        "sql_escape" => Value::String(text.replace('\'', "''")),
        "json_escape" => {
            let quoted = Value::String(text.clone()).to_string();
            Value::String(quoted[1..quoted.len() - 1].to_string())
        }
        "comma_list" => Value::String(join_items(&value, ", ")),
        "and_list" => Value::String(join_items(&value, " AND ")),
        "or_list" => Value::String(join_items(&value, " OR ")),
        "join" => Value::String(join_items(&value, filter.arg.as_deref().unwrap_or(", "))),
        "length" => Value::from(match &value {
            Value::Array(items) => items.len(),
            Value::Object(map) => map.len(),
            Value::String(s) => s.chars().count(),
            _ => 0,
        }),
        "default" if !value::truthy(&value) => Value::String(filter.arg.clone().unwrap_or_default()),
        "default" => value,
        "singular" => Value::String(singular(&text)),
        other => return Err(TemplateError::UnknownFilter(other.to_string())),
    })
}

// ============================================================================
// Rendering
// ============================================================================

/// Lookup scope; loop bodies push a frame over the enclosing one
struct Scope<'a> {
    value: &'a Value,
    locals: Map<String, Value>,
    parent: Option<&'a Scope<'a>>,
}

impl<'a> Scope<'a> {
    fn root(value: &'a Value) -> Self {
        Scope {
            value,
            locals: Map::new(),
            parent: None,
        }
    }

    fn lookup(&self, path: &str) -> Value {
        if path == "this" || path == "." {
            return self.value.clone();
        }
        let mut segments = path.split('.');
        let head = segments.next().unwrap_or_default();
        let start = self
            .locals
            .get(head)
            .or_else(|| self.value.get(head));
        match start {
            Some(found) => segments
                .try_fold(found, |current, seg| match current {
                    Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
                    other => other.get(seg),
                })
                .cloned()
                .unwrap_or(Value::Null),
            None => self.parent.map_or(Value::Null, |p| p.lookup(path)),
        }
    }
}

/// Renders templates against JSON contexts, with registered partials
#[derive(Debug, Clone, Default)]
pub struct TemplateEngine {
    partials: HashMap<String, Template>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_partial(&mut self, name: impl Into<String>, source: &str) -> Result<(), TemplateError> {
        self.partials.insert(name.into(), Template::parse(source)?);
        Ok(())
    }

    pub fn render(&self, template: &Template, context: &Value) -> Result<String, TemplateError> {
        let mut out = String::new();
        self.render_nodes(&template.nodes, &Scope::root(context), 0, &mut out)?;
        Ok(out)
    }

    /// Parse and render in one step
    pub fn render_str(&self, source: &str, context: &Value) -> Result<String, TemplateError> {
        self.render(&Template::parse(source)?, context)
    }

    fn evaluate(&self, cond: &Condition, scope: &Scope<'_>) -> bool {
        match cond {
            Condition::Truthy(path) => value::truthy(&scope.lookup(path)),
            Condition::Not(inner) => !self.evaluate(inner, scope),
            Condition::Compare(path, op, operand) => {
                let left = scope.lookup(path);
                let right = match operand {
                    Operand::Literal(v) => v.clone(),
                    Operand::Path(p) => scope.lookup(p),
                };
                let ordering = value::compare(&left, &right, true);
                match op {
                    CompareOp::Eq => ordering == Some(Ordering::Equal) || left == right,
                    CompareOp::Ne => !(ordering == Some(Ordering::Equal) || left == right),
                    CompareOp::Lt => ordering == Some(Ordering::Less),
                    CompareOp::Gt => ordering == Some(Ordering::Greater),
                    CompareOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                    CompareOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
                }
            }
        }
    }

    fn render_nodes(
        &self,
        nodes: &[Node],
        scope: &Scope<'_>,
        depth: usize,
        out: &mut String,
    ) -> Result<(), TemplateError> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Var { path, filters } => {
                    let mut value = scope.lookup(path);
                    for filter in filters {
                        value = apply_filter(filter, value)?;
                    }
                    out.push_str(&display(&value));
                }
                Node::If {
                    cond,
                    then,
                    otherwise,
                } => {
                    let branch = if self.evaluate(cond, scope) { then } else { otherwise };
                    self.render_nodes(branch, scope, depth, out)?;
                }
                Node::Each { path, body } => {
                    let items = match scope.lookup(path) {
                        Value::Array(items) => items,
                        Value::Null => Vec::new(),
                        other => vec![other],
                    };
                    let last = items.len().saturating_sub(1);
                    for (index, item) in items.iter().enumerate() {
                        let mut locals = Map::new();
                        locals.insert("@item".into(), item.clone());
                        locals.insert("@index".into(), Value::from(index));
                        locals.insert("@first".into(), Value::Bool(index == 0));
                        locals.insert("@last".into(), Value::Bool(index == last));
                        let frame = Scope {
                            value: item,
                            locals,
                            parent: Some(scope),
                        };
                        self.render_nodes(body, &frame, depth, out)?;
                    }
                }
                Node::Partial(name) => {
                    if depth >= PARTIAL_DEPTH_LIMIT {
                        return Err(TemplateError::PartialDepth(PARTIAL_DEPTH_LIMIT));
                    }
                    let partial = self
                        .partials
                        .get(name)
                        .ok_or_else(|| TemplateError::UnknownPartial(name.clone()))?;
                    self.render_nodes(&partial.nodes, scope, depth + 1, out)?;
                }
            }
        }
        Ok(())
    }
}
