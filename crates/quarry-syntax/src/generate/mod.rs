//! Query generation from action trees.
//!
//! A [`Generator`] renders an action tree bottom-up: children first, then
//! the parent's template with the rendered children in its context. The
//! templates and expression style come from an output grammar file, one per
//! target format.

mod expr;
mod style;

pub use expr::ExprRenderer;
pub use style::{ExprNotation, ExprStyle, FormatStyle, OutputGrammar};

use crate::format::QueryFormat;
use crate::template::{Template, TemplateEngine};
use quarry_core::{
    Action, ActionKind, AlterOp, Assignment, BinaryOp, ColumnDef, ConversionMode, Expr, NodePattern,
    Params, PatternElement, Projection, QueryError, Result, SchemaObject, SchemaParams, SelectParams,
    WindowFunction, WindowParams, WriteParams,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

const SQL_GRAMMAR: &str = include_str!("../../grammars/sql.toml");
const CYPHER_GRAMMAR: &str = include_str!("../../grammars/cypher.toml");
const XPATH_GRAMMAR: &str = include_str!("../../grammars/xpath.toml");
const JSONPATH_GRAMMAR: &str = include_str!("../../grammars/jsonpath.toml");
const GRAPHQL_GRAMMAR: &str = include_str!("../../grammars/graphql.toml");

/// Bundled output grammar source for `format`
pub fn builtin_grammar(format: QueryFormat) -> Option<&'static str> {
    match format {
        QueryFormat::Sql => Some(SQL_GRAMMAR),
        QueryFormat::Cypher => Some(CYPHER_GRAMMAR),
        QueryFormat::XPath => Some(XPATH_GRAMMAR),
        QueryFormat::JsonPath => Some(JSONPATH_GRAMMAR),
        QueryFormat::GraphQl => Some(GRAPHQL_GRAMMAR),
        _ => None,
    }
}

/// Formats with a bundled output grammar
pub fn output_formats() -> Vec<QueryFormat> {
    QueryFormat::ALL
        .into_iter()
        .filter(|f| builtin_grammar(*f).is_some())
        .collect()
}

/// Kinds whose output can stand in for a collection name
fn is_source(kind: ActionKind) -> bool {
    matches!(
        kind,
        ActionKind::Select
            | ActionKind::Union
            | ActionKind::Values
            | ActionKind::Load
            | ActionKind::Pipe
            | ActionKind::With
    )
}

/// Kinds rendered after the projection in pattern-first languages
fn is_tail(kind: ActionKind) -> bool {
    matches!(kind, ActionKind::Order | ActionKind::By | ActionKind::Limit | ActionKind::Offset)
}

/// Template-driven query text generator for one target format
pub struct Generator {
    format: QueryFormat,
    style: FormatStyle,
    templates: HashMap<String, Template>,
    engine: TemplateEngine,
    mode: ConversionMode,
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("format", &self.format)
            .field("templates", &self.templates.len())
            .field("mode", &self.mode)
            .finish()
    }
}

impl Generator {
    /// Generator using the bundled grammar for `format`
    pub fn for_format(format: QueryFormat) -> Result<Self> {
        let source = builtin_grammar(format).ok_or_else(|| QueryError::GrammarNotFound {
            format: format.id().to_string(),
        })?;
        Self::new(format, OutputGrammar::from_toml(source)?)
    }

    /// Generator for a custom output grammar
    pub fn new(format: QueryFormat, grammar: OutputGrammar) -> Result<Self> {
        let mut engine = TemplateEngine::new();
        for (name, source) in &grammar.partials {
            engine.register_partial(name.as_str(), source)?;
        }
        let mut templates = HashMap::with_capacity(grammar.templates.len());
        for (kind, source) in &grammar.templates {
            let template = Template::parse(source).map_err(|e| {
                QueryError::format(format!("template '{kind}' in {} grammar: {e}", format.id()))
            })?;
            templates.insert(kind.to_ascii_lowercase(), template);
        }
        Ok(Self {
            format,
            style: grammar.format,
            templates,
            engine,
            mode: ConversionMode::default(),
        })
    }

    pub fn with_mode(mut self, mode: ConversionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn format(&self) -> QueryFormat {
        self.format
    }

    /// Whether the grammar has a template for `kind`
    pub fn supports(&self, kind: ActionKind) -> bool {
        self.templates.contains_key(&template_key(kind))
    }

    /// Render `action` as query text in the target format
    pub fn generate(&self, action: &Action) -> Result<String> {
        let text = self.render(action, None)?;
        debug!(format = self.format.id(), kind = %action.kind, "generated query");
        Ok(text.trim().to_string())
    }

    fn renderer(&self) -> ExprRenderer<'_> {
        ExprRenderer::new(&self.style.expression, self.style.sorted_keys)
    }

    fn render(&self, action: &Action, parent: Option<ActionKind>) -> Result<String> {
        let mut rendered = Vec::with_capacity(action.children.len());
        for child in &action.children {
            rendered.push(self.render(child, Some(action.kind))?);
        }

        let template = self
            .templates
            .get(&template_key(action.kind))
            .filter(|_| self.expressible(action));
        let Some(template) = template else {
            if self.mode == ConversionMode::Strict {
                return Err(QueryError::unsupported(
                    action.kind,
                    format!("no {} equivalent", self.format.name()),
                ));
            }
            warn!(kind = %action.kind, format = self.format.id(), "no template, emitting children only");
            let parts: Vec<&str> = rendered.iter().map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
            return Ok(parts.join(" "));
        };

        let context = self.context(action, parent, &rendered)?;
        let text = self.engine.render(template, &context)?;
        Ok(text.trim().to_string())
    }

    /// Edge patterns only render in grammars that allow them
    fn expressible(&self, action: &Action) -> bool {
        match &action.params {
            Params::Pattern(p) if !self.style.graph_patterns => p
                .elements
                .iter()
                .all(|e| matches!(e, PatternElement::Node(n) if n.properties.is_empty())),
            _ => true,
        }
    }

    /// Template context: the params record plus rendered children and
    /// per-record helpers
    fn context(&self, action: &Action, parent: Option<ActionKind>, rendered: &[String]) -> Result<Value> {
        let r = self.renderer();
        let mut ctx = match serde_json::to_value(&action.params) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        ctx.remove("record");
        ctx.insert("kind".into(), action.kind.as_str().into());
        ctx.insert("is_root".into(), parent.is_none().into());
        ctx.insert(
            "parent".into(),
            parent.map_or(Value::Null, |p| p.as_str().into()),
        );
        let sep = self.style.separator();
        ctx.insert("sep".into(), sep.clone().into());

        let source_child = match (&action.params, action.children.first()) {
            (Params::Select(_), Some(first)) if is_source(first.kind) => Some(0),
            _ => None,
        };

        let mut children = Vec::new();
        let mut clauses = Vec::new();
        let mut tail = Vec::new();
        let mut by_kind: Map<String, Value> = Map::new();
        for (i, (child, text)) in action.children.iter().zip(rendered).enumerate() {
            if Some(i) == source_child || text.is_empty() {
                continue;
            }
            children.push(Value::String(text.clone()));
            if is_tail(child.kind) {
                tail.push(Value::String(text.clone()));
            } else if child.kind != ActionKind::Return {
                clauses.push(Value::String(text.clone()));
            }
            let key = template_key(child.kind);
            let joined = match by_kind.get(&key).and_then(Value::as_str) {
                Some(prev) => format!("{prev} {text}"),
                None => text.clone(),
            };
            by_kind.insert(key, joined.into());
        }
        let body: Vec<&str> = children.iter().filter_map(Value::as_str).collect();
        ctx.insert("body".into(), body.join(&sep).into());
        ctx.insert("children".into(), Value::Array(children));
        ctx.insert("clauses".into(), Value::Array(clauses));
        ctx.insert("tail".into(), Value::Array(tail));
        ctx.insert("child".into(), Value::Object(by_kind));

        match &action.params {
            Params::Select(p) => {
                let source = source_child.map(|i| rendered[i].as_str());
                self.select_helpers(&mut ctx, p, &action.children, source)?;
            }
            Params::Predicate(p) => {
                ctx.insert("predicate".into(), r.predicate(&p.predicate)?.into());
            }
            Params::Order(p) => {
                let keys = p.keys.iter().map(|k| r.sort_key(k)).collect::<Result<Vec<_>>>()?;
                ctx.insert("keys_object".into(), object_text(&keys).into());
                ctx.insert("keys".into(), keys.into());
            }
            Params::Group(p) => {
                let keys = p.keys.iter().map(|k| r.infix(k)).collect::<Result<Vec<_>>>()?;
                ctx.insert("keys".into(), keys.into());
            }
            Params::Summarize(p) => {
                let keys = p.group_by.iter().map(|k| r.infix(k)).collect::<Result<Vec<_>>>()?;
                ctx.insert("group_by".into(), keys.into());
                ctx.insert("aggregates".into(), projections(&r, &p.aggregates)?.into());
            }
            Params::Project(p) => {
                ctx.insert("columns".into(), projections(&r, &p.fields)?.into());
            }
            Params::Extend(p) => {
                ctx.insert("columns".into(), projections(&r, &p.fields)?.into());
            }
            Params::Limit(p) => {
                ctx.insert("offset".into(), p.offset.into());
                ctx.insert("position".into(), (p.offset + 1).into());
                if let Some(count) = p.count {
                    ctx.insert("end".into(), (p.offset + count).into());
                }
            }
            Params::Write(p) => self.write_helpers(&mut ctx, p)?,
            Params::Schema(p) => schema_helpers(&r, &mut ctx, p),
            Params::Join(p) => {
                ctx.insert("join_keyword".into(), join_keyword(&r, p.join_type.keyword()).into());
                ctx.insert("target".into(), source_text(&r, &p.target.name, p.target.alias.as_deref()).into());
                if let Some(on) = &p.on {
                    ctx.insert("on".into(), r.infix(on)?.into());
                }
            }
            Params::Binding(p) => {
                if let Some(value) = &p.value {
                    ctx.insert("value".into(), r.infix(value)?.into());
                }
            }
            Params::Pattern(p) => {
                ctx.insert("pattern".into(), r.pattern(&p.elements).into());
                let tables: Vec<String> = p
                    .elements
                    .iter()
                    .filter_map(|e| match e {
                        PatternElement::Node(node) => node_source(node),
                        PatternElement::Edge(_) => None,
                    })
                    .collect();
                ctx.insert("tables".into(), tables.into());
            }
            Params::Edge(p) => {
                for (key, value) in [("from", &p.from), ("to", &p.to)] {
                    if let Some(e) = value {
                        ctx.insert(key.into(), graph_ref(&r, e)?.into());
                    }
                }
                ctx.insert("assignments".into(), assignments(&r, &p.properties)?.into());
            }
            Params::Properties(p) => {
                ctx.insert("assignments".into(), assignments(&r, &p.assignments)?.into());
                if let Some(target) = &p.target {
                    ctx.insert("target".into(), graph_ref(&r, target)?.into());
                }
            }
            Params::GraphTarget(p) => {
                let targets = p.targets.iter().map(|t| graph_ref(&r, t)).collect::<Result<Vec<_>>>()?;
                ctx.insert("targets".into(), targets.into());
            }
            Params::Aggregate(p) => {
                let arg = p.field.as_deref().map(|f| Box::new(Expr::field(f)));
                let call = match action.kind {
                    ActionKind::Count => "COUNT",
                    ActionKind::Sum => "SUM",
                    ActionKind::Avg => "AVG",
                    ActionKind::Min => "MIN",
                    _ => "MAX",
                };
                let inner = match arg {
                    Some(a) if p.distinct => format!("{} {}", r.keyword("distinct"), r.infix(&a)?),
                    Some(a) => r.infix(&a)?,
                    None => "*".to_string(),
                };
                ctx.insert("call".into(), format!("{call}({inner})").into());
            }
            Params::Window(p) => {
                ctx.insert("call".into(), window_call(&r, p)?.into());
            }
            Params::Values(p) => {
                let rows: Vec<String> = p
                    .rows
                    .iter()
                    .map(|row| {
                        let items: Vec<String> = row.iter().map(|v| r.literal(v)).collect();
                        format!("({})", items.join(", "))
                    })
                    .collect();
                ctx.insert("rows_text".into(), rows.into());
            }
            Params::Subscribe(p) => {
                ctx.insert("columns".into(), projections(&r, &p.fields)?.into());
                ctx.insert("selection".into(), self.selection(&p.fields)?.into());
            }
            _ => {}
        }

        Ok(Value::Object(ctx))
    }

    fn select_helpers(
        &self,
        ctx: &mut Map<String, Value>,
        p: &SelectParams,
        children: &[Action],
        source: Option<&str>,
    ) -> Result<()> {
        let r = self.renderer();
        let windows: HashMap<&str, &WindowParams> = children
            .iter()
            .filter_map(|c| c.params.as_window())
            .map(|w| (w.alias.as_str(), w))
            .collect();

        let mut columns = Vec::with_capacity(p.fields.len());
        for field in &p.fields {
            let window = match &field.expr {
                Expr::Field(name) => windows.get(name.as_str()),
                _ => None,
            };
            columns.push(match window {
                Some(w) => format!("{} {} {}", window_call(&r, w)?, r.keyword("as"), w.alias),
                None => r.projection(field)?,
            });
        }
        ctx.insert("columns".into(), columns.into());

        if let [Projection {
            expr: Expr::Field(path),
            ..
        }] = p.fields.as_slice()
        {
            ctx.insert("single_field".into(), r.path(path).into());
        }

        match (source, &p.from) {
            (Some(inner), from) => {
                let alias = from.as_ref().map(|s| s.qualifier()).unwrap_or("t");
                ctx.insert("from".into(), format!("({inner}) {alias}").into());
                ctx.insert("from_name".into(), alias.into());
                ctx.insert("collection".into(), alias.into());
            }
            (None, Some(from)) => {
                ctx.insert("from".into(), source_text(&r, &from.name, from.alias.as_deref()).into());
                ctx.insert("from_name".into(), r.path(&from.name).into());
                let last = from.name.rsplit('.').next().unwrap_or(&from.name);
                ctx.insert("collection".into(), last.into());
            }
            (None, None) => {}
        }

        ctx.insert("selection".into(), self.selection(&p.fields)?.into());
        Ok(())
    }

    fn write_helpers(&self, ctx: &mut Map<String, Value>, p: &WriteParams) -> Result<()> {
        let r = self.renderer();
        let mut values = Vec::with_capacity(p.rows.len());
        let mut records = Vec::with_capacity(p.rows.len());
        for row in &p.rows {
            let items = row.iter().map(|e| r.infix(e)).collect::<Result<Vec<_>>>()?;
            let pairs: Vec<String> = p
                .columns
                .iter()
                .zip(&items)
                .map(|(c, v)| format!("{c}: {v}"))
                .collect();
            values.push(format!("({})", items.join(", ")));
            records.push(format!("{{{}}}", pairs.join(", ")));
        }
        ctx.insert("values".into(), values.into());
        ctx.insert("records".into(), records.into());
        ctx.insert("assignments".into(), assignments(&r, &p.assignments)?.into());

        // `x = x + n` is an increment in object-notation targets
        let mut set_pairs = Vec::new();
        let mut inc_pairs = Vec::new();
        for a in &p.assignments {
            match &a.value {
                Expr::Binary {
                    op: BinaryOp::Add,
                    left,
                    right,
                } if matches!(left.as_ref(), Expr::Field(f) if *f == a.path) => {
                    inc_pairs.push(format!("{}: {}", a.path, r.infix(right)?));
                }
                value => set_pairs.push(format!("{}: {}", a.path, r.infix(value)?)),
            }
        }
        if !set_pairs.is_empty() {
            ctx.insert("set_object".into(), object_text(&set_pairs).into());
        }
        if !inc_pairs.is_empty() {
            ctx.insert("inc_object".into(), object_text(&inc_pairs).into());
        }
        Ok(())
    }

    /// GraphQL selection set body; dotted paths become nested selections
    fn selection(&self, fields: &[Projection]) -> Result<String> {
        let mut root = Selection::default();
        for field in fields {
            match &field.expr {
                Expr::Star => {}
                Expr::Field(path) => {
                    let segments: Vec<&str> = path.split('.').collect();
                    let leaf = match (&field.alias, segments.as_slice()) {
                        (Some(alias), [single]) if alias != single => format!("{alias}: {single}"),
                        _ => segments.last().copied().unwrap_or(path).to_string(),
                    };
                    root.insert(&segments, leaf);
                }
                other if self.mode == ConversionMode::Strict => {
                    return Err(QueryError::unsupported(
                        ActionKind::Select,
                        format!("'{other}' cannot be selected in {}", self.format.name()),
                    ));
                }
                other => warn!(expr = %other, "dropping computed selection"),
            }
        }
        if root.entries.is_empty() {
            return Ok("__typename".to_string());
        }
        Ok(root.render())
    }
}

fn template_key(kind: ActionKind) -> String {
    kind.as_str().to_ascii_lowercase()
}

#[derive(Debug, Default)]
struct Selection {
    entries: Vec<(String, Selection)>,
}

impl Selection {
    fn insert(&mut self, segments: &[&str], leaf: String) {
        match segments {
            [] => {}
            [_] => self.entries.push((leaf, Selection::default())),
            [first, rest @ ..] => {
                let index = match self.entries.iter().position(|(name, _)| name == first) {
                    Some(i) => i,
                    None => {
                        self.entries.push((first.to_string(), Selection::default()));
                        self.entries.len() - 1
                    }
                };
                self.entries[index].1.insert(rest, leaf);
            }
        }
    }

    fn render(&self) -> String {
        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|(name, sub)| {
                if sub.entries.is_empty() {
                    name.clone()
                } else {
                    format!("{name} {{ {} }}", sub.render())
                }
            })
            .collect();
        parts.join(" ")
    }
}

/// `Label var` for a node, the relational reading of `(var:Label)`
fn node_source(node: &NodePattern) -> Option<String> {
    match (node.labels.first(), &node.variable) {
        (Some(label), Some(var)) => Some(format!("{label} {var}")),
        (Some(label), None) => Some(label.clone()),
        (None, Some(var)) => Some(var.clone()),
        (None, None) => None,
    }
}

/// Pattern variables are spelled bare when they name a node or edge
fn graph_ref(r: &ExprRenderer<'_>, e: &Expr) -> Result<String> {
    match e {
        Expr::Variable(name) => Ok(name.clone()),
        other => r.infix(other),
    }
}

/// `{a: 1, b: 2}` from rendered `key: value` pairs
fn object_text(pairs: &[String]) -> String {
    format!("{{{}}}", pairs.join(", "))
}

fn projections(r: &ExprRenderer<'_>, fields: &[Projection]) -> Result<Vec<String>> {
    fields.iter().map(|p| r.projection(p)).collect()
}

fn assignments(r: &ExprRenderer<'_>, list: &[Assignment]) -> Result<Vec<String>> {
    list.iter()
        .map(|a| Ok(format!("{} = {}", r.field(&a.path), r.infix(&a.value)?)))
        .collect()
}

fn source_text(r: &ExprRenderer<'_>, name: &str, alias: Option<&str>) -> String {
    match alias {
        Some(alias) if alias != name => format!("{} {alias}", r.path(name)),
        _ => r.path(name),
    }
}

fn join_keyword(r: &ExprRenderer<'_>, join_type: &str) -> String {
    format!("{} {}", r.keyword(join_type), r.keyword("join"))
}

fn window_call(r: &ExprRenderer<'_>, w: &WindowParams) -> Result<String> {
    let args = match (w.function, &w.field) {
        (WindowFunction::Lag | WindowFunction::Lead, Some(field)) => {
            format!("{}, {}", r.field(field), w.offset)
        }
        (_, Some(field)) => r.field(field),
        (WindowFunction::Count, None) => "*".to_string(),
        (_, None) => String::new(),
    };
    let mut over = Vec::new();
    if !w.partition_by.is_empty() {
        let keys = w.partition_by.iter().map(|k| r.infix(k)).collect::<Result<Vec<_>>>()?;
        over.push(format!("{} {}", r.keyword("partition by"), keys.join(", ")));
    }
    if !w.order_by.is_empty() {
        let keys = w.order_by.iter().map(|k| r.sort_key(k)).collect::<Result<Vec<_>>>()?;
        over.push(format!("{} {}", r.keyword("order by"), keys.join(", ")));
    }
    Ok(format!(
        "{}({args}) {} ({})",
        w.function.name(),
        r.keyword("over"),
        over.join(" ")
    ))
}

fn column_def(r: &ExprRenderer<'_>, c: &ColumnDef) -> String {
    let mut text = c.name.clone();
    if let Some(data_type) = &c.data_type {
        text.push(' ');
        text.push_str(data_type);
    }
    if c.primary_key {
        text.push(' ');
        text.push_str(&r.keyword("primary key"));
    }
    if !c.nullable && !c.primary_key {
        text.push(' ');
        text.push_str(&r.keyword("not null"));
    }
    if let Some(default) = &c.default {
        text.push_str(&format!(" {} {}", r.keyword("default"), r.literal(default)));
    }
    text
}

fn schema_helpers(r: &ExprRenderer<'_>, ctx: &mut Map<String, Value>, p: &SchemaParams) {
    let defs: Vec<String> = p.columns.iter().map(|c| column_def(r, c)).collect();
    let names: Vec<&str> = p.columns.iter().map(|c| c.name.as_str()).collect();
    ctx.insert("column_defs".into(), defs.into());
    ctx.insert("column_names".into(), names.into());
    let keyword = match p.object {
        SchemaObject::Collection => "table",
        SchemaObject::Index => "index",
        SchemaObject::View => "view",
        SchemaObject::Vertex => "vertex",
    };
    ctx.insert("object_keyword".into(), r.keyword(keyword).into());

    let ops: Vec<String> = p
        .alter
        .iter()
        .map(|op| match op {
            AlterOp::AddColumn { column } => format!("{} {}", r.keyword("add column"), column_def(r, column)),
            AlterOp::DropColumn { name } => format!("{} {name}", r.keyword("drop column")),
            AlterOp::RenameColumn { from, to } => {
                format!("{} {from} {} {to}", r.keyword("rename column"), r.keyword("to"))
            }
            AlterOp::RenameTo { name } => format!("{} {name}", r.keyword("rename to")),
        })
        .collect();
    ctx.insert("alter_ops".into(), ops.into());

    let labels: String = p.labels.iter().map(|l| format!(":{l}")).collect();
    ctx.insert("labels_text".into(), labels.into());
    if !p.properties.is_empty() {
        ctx.insert(
            "props_text".into(),
            r.literal(&Value::Object(p.properties.clone())).into(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::ParserBridge;
    use quarry_core::{LimitParams, PredicateParams, Source};
    use test_case::test_case;

    fn translate(text: &str, from: QueryFormat, to: QueryFormat) -> String {
        let action = ParserBridge::new().parse(text, from).unwrap().action;
        Generator::for_format(to).unwrap().generate(&action).unwrap()
    }

    #[test]
    fn test_bundled_grammars_load() {
        for format in output_formats() {
            assert!(Generator::for_format(format).is_ok(), "{format:?}");
        }
        assert!(matches!(
            Generator::for_format(QueryFormat::Sparql),
            Err(QueryError::GrammarNotFound { .. })
        ));
    }

    #[test_case("SELECT name FROM users WHERE age > 18", QueryFormat::XPath, "//users/user[age>18]/name"; "sql to xpath")]
    #[test_case("SELECT name FROM users WHERE age > 18", QueryFormat::JsonPath, "$.users[?(@.age > 18)].name"; "sql to jsonpath")]
    #[test_case("SELECT name FROM users WHERE age > 18 ORDER BY age DESC LIMIT 5", QueryFormat::Cypher, "MATCH (n:users) WHERE n.age > 18 RETURN n.name ORDER BY n.age DESC LIMIT 5"; "sql to cypher")]
    #[test_case("SELECT * FROM users LIMIT 3 OFFSET 1", QueryFormat::JsonPath, "$.users[1:4]"; "sql slice to jsonpath")]
    fn test_sql_translations(sql: &str, to: QueryFormat, expected: &str) {
        assert_eq!(translate(sql, QueryFormat::Sql, to), expected);
    }

    #[test]
    fn test_sql_to_graphql_uses_hasura_arguments() {
        let text = translate(
            "SELECT name, city FROM users WHERE age > 25 ORDER BY age DESC LIMIT 10",
            QueryFormat::Sql,
            QueryFormat::GraphQl,
        );
        assert_eq!(
            text,
            "{ users(where: {age: {_gt: 25}}, order_by: {age: desc}, limit: 10) { name city } }"
        );
    }

    #[test]
    fn test_graphql_nested_selection_to_sql() {
        let text = translate(
            "{ users(where: {age: {_gt: 25}}) { name address { city } } }",
            QueryFormat::GraphQl,
            QueryFormat::Sql,
        );
        assert_eq!(text, "SELECT name, address.city FROM users WHERE age > 25");
    }

    #[test]
    fn test_subquery_is_inlined() {
        let text = translate(
            "SELECT t.name FROM (SELECT name FROM users WHERE age > 1) t",
            QueryFormat::Sql,
            QueryFormat::Sql,
        );
        assert_eq!(text, "SELECT t.name FROM (SELECT name FROM users WHERE age > 1) t");
    }

    #[test]
    fn test_window_column_is_inlined() {
        let text = translate(
            "SELECT name, RANK() OVER (PARTITION BY dept ORDER BY salary DESC) AS r FROM emp",
            QueryFormat::Sql,
            QueryFormat::Sql,
        );
        assert_eq!(
            text,
            "SELECT name, RANK() OVER (PARTITION BY dept ORDER BY salary DESC) AS r FROM emp"
        );
    }

    #[test]
    fn test_unknown_kind_by_mode() {
        let action = Action::bare(ActionKind::Pipe).with_child(Action::new(
            ActionKind::Select,
            Params::Select(SelectParams {
                fields: vec![Projection::new(Expr::Star)],
                from: Some(Source::new("users")),
                distinct: false,
            }),
        ));
        let strict = Generator::for_format(QueryFormat::Sql)
            .unwrap()
            .with_mode(ConversionMode::Strict);
        assert!(matches!(
            strict.generate(&action),
            Err(QueryError::UnsupportedOperation { .. })
        ));
        let flexible = Generator::for_format(QueryFormat::Sql).unwrap();
        assert_eq!(flexible.generate(&action).unwrap(), "SELECT * FROM users");
    }

    #[test]
    fn test_custom_grammar_with_partials() {
        let grammar = OutputGrammar::from_toml(
            r#"
            [templates]
            select = "FETCH {{columns|comma_list}} FROM {{from}}{{#if body}} {{body}}{{/if}}"
            where = "{{>cond}}"
            limit = "TAKE {{count}}"

            [partials]
            cond = "IF {{predicate}}"
            "#,
        )
        .unwrap();
        let generator = Generator::new(QueryFormat::Sql, grammar).unwrap();
        let action = Action::new(
            ActionKind::Select,
            Params::Select(SelectParams {
                fields: vec![Projection::new(Expr::field("name"))],
                from: Some(Source::new("users")),
                distinct: false,
            }),
        )
        .with_child(Action::new(
            ActionKind::Where,
            Params::Predicate(PredicateParams {
                predicate: Expr::eq(Expr::field("id"), Expr::lit(7)),
            }),
        ))
        .with_child(Action::new(
            ActionKind::Limit,
            Params::Limit(LimitParams {
                count: Some(1),
                offset: 0,
            }),
        ));
        assert_eq!(
            generator.generate(&action).unwrap(),
            "FETCH name FROM users IF id = 7 TAKE 1"
        );
    }

    #[test]
    fn test_broken_template_is_a_format_error() {
        let grammar = OutputGrammar::from_toml("[templates]\nselect = \"{{#if x}}open\"").unwrap();
        assert!(matches!(
            Generator::new(QueryFormat::Sql, grammar),
            Err(QueryError::Format { .. })
        ));
    }
}
