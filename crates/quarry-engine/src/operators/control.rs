//! Composition and control flow: UNION, WITH, PIPE, LET, FOR, FOREACH,
//! ASK, SUBSCRIBE, SUBSCRIPTION, MUTATION, OPTIONS, CONSTRUCT, DESCRIBE.

use super::aggregate::dedup;
use super::graph::is_unseeded;
use super::project::project_rows;
use super::{bad_params, OperatorRegistry};
use crate::executor::{piped, ExecutionContext};
use crate::graph::{is_graph, GraphView, EDGES_KEY};
use quarry_core::value::{truthy, type_name};
use quarry_core::{schema_for, Action, ActionKind, ExecutionResult, QueryError, ResultShape, Result};
use serde_json::{json, Map, Value};
use tracing::debug;

pub(super) fn register(registry: &mut OperatorRegistry) {
    registry.builtin(ActionKind::Union, union);
    registry.builtin(ActionKind::With, with);
    registry.builtin(ActionKind::Pipe, pipe);
    registry.builtin(ActionKind::Let, let_binding);
    registry.builtin(ActionKind::For, for_each);
    registry.builtin(ActionKind::Foreach, for_each);
    registry.builtin(ActionKind::Ask, ask);
    registry.builtin(ActionKind::Subscribe, subscribe);
    registry.builtin(ActionKind::Subscription, subscribe);
    registry.builtin(ActionKind::Mutation, mutation);
    registry.builtin(ActionKind::Options, options);
    registry.builtin(ActionKind::Construct, construct);
    registry.builtin(ActionKind::Describe, describe);
}

fn empty_row() -> Value {
    Value::Object(Map::new())
}

/// Pipeline over the children of `action` starting at `from`
fn run_from(
    ctx: &mut ExecutionContext<'_>,
    action: &Action,
    from: usize,
    input: ExecutionResult,
) -> Result<ExecutionResult> {
    let mut current = input;
    for (index, child) in action.children.iter().enumerate().skip(from) {
        let output = ctx.run_child(action, index, child, current.clone())?;
        current = piped(current, output);
    }
    Ok(current)
}

/// Every branch sees the same input; outputs are concatenated
fn union(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let distinct = action.params.as_union().is_some_and(|p| p.distinct);
    let mut rows = Vec::new();
    for (index, child) in action.children.iter().enumerate() {
        rows.extend(ctx.run_child(action, index, child, input.clone())?.into_rows());
    }
    if distinct {
        rows = dedup(rows);
    }
    Ok(ExecutionResult::rows(rows).with_meta("branches", action.children.len()))
}

/// Value bound by WITH / LET: the expression, or else the first child's rows.
/// Returns the index of the first remaining child.
fn bound_value(
    action: &Action,
    input: &ExecutionResult,
    ctx: &mut ExecutionContext<'_>,
) -> Result<(Value, usize)> {
    let p = action.params.as_binding().ok_or_else(|| bad_params(action))?;
    if let Some(expr) = &p.value {
        let row = input.row_slice().into_iter().next().unwrap_or_else(empty_row);
        return Ok((ctx.eval(expr, &row)?, 0));
    }
    let source = action
        .children
        .first()
        .ok_or_else(|| QueryError::validation(format!("{} '{}' binds nothing", action.kind, p.name)))?;
    let result = ctx.run_child(action, 0, source, input.clone())?;
    let value = match result.shape {
        ResultShape::Scalar | ResultShape::Boolean => result.data,
        _ => Value::Array(result.into_rows()),
    };
    Ok((value, 1))
}

/// Named subquery visible to the body only
fn with(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let name = action.params.as_binding().ok_or_else(|| bad_params(action))?.name.clone();
    let (value, body) = bound_value(action, &input, ctx)?;
    if body >= action.children.len() {
        return Ok(ExecutionResult::rows(quarry_core::value::as_rows(&value)));
    }
    debug!(name = %name, "binding common table expression");
    ctx.scoped(&name, value, |ctx| run_from(ctx, action, body, input))
}

fn pipe(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    ctx.run_children(action, input)
}

/// Binding stays visible to later siblings
fn let_binding(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let name = action.params.as_binding().ok_or_else(|| bad_params(action))?.name.clone();
    let (value, _) = bound_value(action, &input, ctx)?;
    ctx.bindings.insert(name, value);
    Ok(ExecutionResult::void(0))
}

/// FOR collects the body's rows; FOREACH runs it for its effects only
fn for_each(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let name = action.params.as_binding().ok_or_else(|| bad_params(action))?.name.clone();
    let (items, body) = bound_value(action, &input, ctx)?;
    let items = match items {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    };

    let collect = action.kind == ActionKind::For;
    let mut rows = Vec::new();
    let mut affected = 0;
    for item in &items {
        ctx.checkpoint()?;
        let mut seed = ExecutionResult::rows(vec![item.clone()]);
        seed.affected_count = 0;
        let out = ctx.scoped(&name, item.clone(), |ctx| run_from(ctx, action, body, seed))?;
        affected += out.affected_count;
        if collect {
            rows.extend(out.into_rows());
        }
    }

    let result = if collect {
        ExecutionResult::rows(rows)
    } else {
        ExecutionResult::void(affected)
    };
    Ok(result.with_meta("iterations", items.len()))
}

fn ask(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let out = ctx.run_children(action, input)?;
    let answer = match out.shape {
        ResultShape::Boolean | ResultShape::Scalar => truthy(&out.data),
        _ => out.row_count() > 0,
    };
    Ok(ExecutionResult::boolean(answer))
}

/// Current snapshot of the subscribed data, tagged with its topic
fn subscribe(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_subscribe().ok_or_else(|| bad_params(action))?;
    let rows = if action.children.is_empty() {
        let rows = if is_unseeded(&input) {
            ctx.resolve_source(&p.topic)?
        } else {
            input.into_rows()
        };
        if p.fields.is_empty() {
            rows
        } else {
            project_rows(ctx, &p.fields, rows)?
        }
    } else {
        ctx.run_children(action, input)?.into_rows()
    };
    Ok(ExecutionResult::rows(rows).with_meta("topic", p.topic.clone()))
}

/// Root fields run in order against the original data; counts add up
fn mutation(action: &Action, _input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let name = action.params.as_mutation().and_then(|p| p.name.clone());
    let mut affected = 0;
    let mut operations = Vec::with_capacity(action.children.len());
    for (index, child) in action.children.iter().enumerate() {
        let out = ctx.run_child(action, index, child, ExecutionResult::void(0))?;
        affected += out.affected_count;
        operations.push(json!({"operation": child.kind.as_str(), "affected": out.affected_count}));
    }
    let mut result = ExecutionResult::void(affected).with_meta("operations", operations);
    if let Some(name) = name {
        result = result.with_meta("mutation", name);
    }
    Ok(result)
}

/// Overrides for the subtree. The row cap also stays in force for the
/// final result.
fn options(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = *action.params.as_options().ok_or_else(|| bad_params(action))?;
    let saved = (ctx.options.timeout_ms, ctx.options.max_depth);
    if let Some(timeout_ms) = p.timeout_ms {
        ctx.options.timeout_ms = Some(timeout_ms);
    }
    if let Some(max_depth) = p.max_depth {
        ctx.options.max_depth = max_depth;
    }
    if let Some(limit) = p.limit {
        ctx.options.limit = Some(limit);
    }
    let out = ctx.run_children(action, input);
    (ctx.options.timeout_ms, ctx.options.max_depth) = saved;

    let mut result = out?;
    if let (Some(limit), Value::Array(rows)) = (p.limit, &mut result.data) {
        if rows.len() as u64 > limit {
            rows.truncate(limit as usize);
            result.metadata.insert("truncated".into(), Value::Bool(true));
        }
    }
    Ok(result)
}

/// Copy of `template` with `?name` / `$name` leaves taken from `row`
fn instantiate(ctx: &ExecutionContext<'_>, template: &Value, row: &Value) -> Value {
    match template {
        Value::String(s) if s.len() > 1 && (s.starts_with('?') || s.starts_with('$')) => {
            ctx.lookup(&s[1..], row).unwrap_or(Value::Null)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| instantiate(ctx, v, row)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), instantiate(ctx, v, row)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn construct(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_construct().ok_or_else(|| bad_params(action))?;
    let rows = if is_unseeded(&input) {
        vec![empty_row()]
    } else {
        input.into_rows()
    };
    let built = rows.iter().map(|row| instantiate(ctx, &p.template, row)).collect();
    Ok(ExecutionResult::rows(built))
}

fn describe_collection(ctx: &ExecutionContext<'_>, name: &str, rows: &[Value]) -> Value {
    let mut columns = Map::new();
    for row in rows {
        let Value::Object(map) = row else {
            continue;
        };
        for (key, value) in map {
            let slot = columns.entry(key.clone()).or_insert(Value::Null);
            if slot.is_null() && !value.is_null() {
                *slot = Value::from(type_name(value));
            }
        }
    }
    let mut out = json!({
        "name": name,
        "type": "collection",
        "rows": rows.len(),
        "columns": columns,
    });
    if let Some(stats) = ctx.statistics() {
        let indexes: Vec<Value> = stats
            .indexes(name)
            .into_iter()
            .map(|i| json!({"name": i.name, "columns": i.columns, "unique": i.unique}))
            .collect();
        out["indexes"] = Value::Array(indexes);
    }
    out
}

/// Shape of a collection, a vertex or an action kind
fn describe(action: &Action, _input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_describe().ok_or_else(|| bad_params(action))?;
    if let Some(found) = ctx.data.get(&p.target) {
        let description = match found {
            Value::Array(rows) => describe_collection(ctx, &p.target, rows),
            other => json!({"name": p.target, "type": type_name(other)}),
        };
        return Ok(ExecutionResult::scalar(description));
    }

    let root = ctx.data.root();
    if is_graph(root) {
        let view = GraphView::from_root(root);
        if let Some(vertex) = view.resolve(&Value::String(p.target.clone())) {
            let edges: Vec<Value> = view
                .incident(&vertex.key, quarry_core::Direction::Both, &[])
                .into_iter()
                .filter_map(|i| view.edge(i).map(|e| e.value.clone()))
                .collect();
            let mut description = Map::new();
            description.insert("vertex".into(), vertex.value.clone());
            description.insert(EDGES_KEY.into(), Value::Array(edges));
            return Ok(ExecutionResult::scalar(Value::Object(description)));
        }
    }

    if let Some(kind) = ActionKind::from_name(&p.target) {
        let schema = serde_json::to_value(schema_for(kind))
            .map_err(|e| QueryError::execution(format!("cannot describe {kind}: {e}")))?;
        return Ok(ExecutionResult::scalar(schema));
    }
    Err(QueryError::value(format!("nothing named '{}' to describe", p.target)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{
        BindingParams, ConstructParams, DataNode, DescribeParams, Expr, JsonNode, OptionsParams,
        Params, QueryOptions,
    };
    use std::sync::Arc;

    fn users() -> JsonNode {
        JsonNode::from_native(json!({"users": [
            {"name": "Alice", "age": 30},
            {"name": "Bob", "age": 25},
            {"name": "Charlie", "age": 35}
        ]}))
    }

    fn sql(text: &str) -> Action {
        quarry_syntax::ParserBridge::new()
            .parse(text, quarry_syntax::QueryFormat::Sql)
            .unwrap()
            .action
    }

    fn run(data: &mut JsonNode, action: &Action) -> Result<ExecutionResult> {
        let mut ctx = ExecutionContext::new(data, QueryOptions::new(), Arc::new(OperatorRegistry::with_defaults()));
        ctx.execute(action, ExecutionResult::void(0))
    }

    fn binding(kind: ActionKind, name: &str, value: Option<Expr>) -> Action {
        Action::new(kind, Params::Binding(BindingParams { name: name.into(), value }))
    }

    #[test]
    fn test_union_all_and_distinct() {
        let mut data = users();
        let all = run(&mut data, &sql("SELECT name FROM users UNION ALL SELECT name FROM users")).unwrap();
        assert_eq!(all.row_count(), 6);
        let distinct = run(&mut data, &sql("SELECT name FROM users UNION SELECT name FROM users")).unwrap();
        assert_eq!(distinct.row_count(), 3);
    }

    #[test]
    fn test_with_binds_subquery_for_body() {
        let mut data = users();
        let action = sql("WITH old AS (SELECT * FROM users WHERE age > 28) SELECT name FROM old");
        let result = run(&mut data, &action).unwrap();
        assert_eq!(result.data, json!([{"name": "Alice"}, {"name": "Charlie"}]));
    }

    #[test]
    fn test_let_is_visible_to_later_siblings() {
        let mut data = users();
        let action = Action::bare(ActionKind::Pipe).with_children(vec![
            binding(ActionKind::Let, "limit", Some(Expr::lit(2))),
            binding(ActionKind::For, "x", Some(Expr::lit(json!([1])))).with_child(Action::new(
                ActionKind::Extend,
                Params::Extend(quarry_core::ExtendParams {
                    fields: vec![quarry_core::Projection::aliased(Expr::Variable("limit".into()), "cap")],
                }),
            )),
        ]);
        let result = run(&mut data, &action).unwrap();
        assert_eq!(result.data, json!([{"value": 1, "cap": 2}]));
    }

    #[test]
    fn test_for_collects_and_foreach_counts() {
        let mut data = users();
        let body = || sql("INSERT INTO seen (n) VALUES (1)");
        let foreach = binding(ActionKind::Foreach, "x", Some(Expr::lit(json!([1, 2, 3])))).with_child(body());
        let result = run(&mut data, &foreach).unwrap();
        assert_eq!(result.shape, ResultShape::Void);
        assert_eq!(result.affected_count, 3);
        assert_eq!(data.root()["seen"].as_array().map(Vec::len), Some(3));

        let collect = binding(ActionKind::For, "x", Some(Expr::lit(json!([1, 2])))).with_child(Action::new(
            ActionKind::Extend,
            Params::Extend(quarry_core::ExtendParams {
                fields: vec![quarry_core::Projection::aliased(
                    Expr::binary(quarry_core::BinaryOp::Mul, Expr::Variable("x".into()), Expr::lit(10)),
                    "scaled",
                )],
            }),
        ));
        let result = run(&mut data, &collect).unwrap();
        assert_eq!(
            result.data,
            json!([{"value": 1, "scaled": 10}, {"value": 2, "scaled": 20}])
        );
        assert_eq!(result.metadata["iterations"], json!(2));
    }

    #[test]
    fn test_ask() {
        let mut data = users();
        let yes = Action::bare(ActionKind::Ask).with_child(sql("SELECT * FROM users WHERE age > 30"));
        assert_eq!(run(&mut data, &yes).unwrap().data, json!(true));
        let no = Action::bare(ActionKind::Ask).with_child(sql("SELECT * FROM users WHERE age > 90"));
        assert_eq!(run(&mut data, &no).unwrap().data, json!(false));
    }

    #[test]
    fn test_options_limit_and_restore() {
        let mut data = users();
        let action = Action::new(
            ActionKind::Options,
            Params::Options(OptionsParams { limit: Some(2), max_depth: Some(50), timeout_ms: None }),
        )
        .with_child(sql("SELECT name FROM users"));
        let mut ctx = ExecutionContext::new(&mut data, QueryOptions::new(), Arc::new(OperatorRegistry::with_defaults()));
        let depth = ctx.options.max_depth;
        let result = ctx.execute(&action, ExecutionResult::void(0)).unwrap();
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.metadata["truncated"], json!(true));
        assert_eq!(ctx.options.max_depth, depth);
        assert_eq!(ctx.options.limit, Some(2));
    }

    #[test]
    fn test_construct_leaves_data_alone() {
        let mut data = users();
        let before = data.root().clone();
        let action = Action::new(
            ActionKind::Construct,
            Params::Construct(ConstructParams {
                template: json!({"person": "?name", "facts": {"age": "$age"}, "kind": "Person"}),
            }),
        )
        .with_child(sql("SELECT * FROM users WHERE name = 'Bob'"));
        let result = run(&mut data, &action).unwrap();
        assert_eq!(result.data, json!([{"person": "Bob", "facts": {"age": 25}, "kind": "Person"}]));
        assert_eq!(data.root(), &before);
    }

    #[test]
    fn test_describe_collection_and_kind() {
        let mut data = users();
        let describe = |target: &str| {
            Action::new(ActionKind::Describe, Params::Describe(DescribeParams { target: target.into() }))
        };
        let result = run(&mut data, &describe("users")).unwrap();
        assert_eq!(result.data["rows"], json!(3));
        assert_eq!(result.data["columns"]["age"], json!("number"));

        let schema = run(&mut data, &describe("WHERE")).unwrap();
        assert_eq!(schema.data["kind"], json!("WHERE"));
        assert!(run(&mut data, &describe("nothing")).is_err());
    }

    #[test]
    fn test_graphql_subscription_snapshot() {
        let mut data = users();
        let bridge = quarry_syntax::ParserBridge::new();
        let subscription = bridge
            .parse("subscription { users { name } }", quarry_syntax::QueryFormat::GraphQl)
            .unwrap()
            .action;
        let result = run(&mut data, &subscription).unwrap();
        assert_eq!(result.metadata["topic"], json!("users"));
        assert_eq!(result.row_count(), 3);
    }
}
