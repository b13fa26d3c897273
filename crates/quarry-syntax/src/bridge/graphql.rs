//! GraphQL operations to actions, following Hasura conventions.
//!
//! A query root field is a collection: `where`, `order_by`, `limit` and
//! `offset` arguments become clauses, any other argument an equality
//! filter, and the selection set the projection. Mutations map
//! `insert_*`, `update_*` and `delete_*` root fields to writes.

use super::extract::json_from_cst;
use super::BuildContext;
use crate::cst::SyntaxNode;
use quarry_core::{
    Action, ActionKind, Assignment, BinaryOp, Expr, LimitParams, MutationParams, OrderParams,
    Params, PredicateParams, Projection, QueryError, Result, SelectParams, SortKey, Source,
    SubscribeParams, WriteParams,
};
use serde_json::{Map, Value};

pub(super) fn build(node: &SyntaxNode, ctx: &mut BuildContext) -> Result<Action> {
    let selections = node
        .child("selection_set")
        .ok_or_else(|| QueryError::validation("GraphQL operation without a selection set"))?;
    let name = node.child("name").map(|n| n.text().to_string());

    match node.text() {
        "mutation" => {
            let mut children = Vec::new();
            for field in selections.children_by("field") {
                children.extend(mutation_field(field, ctx)?);
            }
            if children.is_empty() {
                return Err(QueryError::validation("mutation has no supported root fields"));
            }
            Ok(Action::new(ActionKind::Mutation, Params::Mutation(MutationParams { name }))
                .with_children(children))
        }
        "subscription" => {
            let field = single_root(selections, ctx)?;
            let select = query_field(field, ctx)?;
            let fields = select
                .params
                .as_select()
                .map(|s| s.fields.clone())
                .unwrap_or_default();
            Ok(Action::new(
                ActionKind::Subscription,
                Params::Subscribe(SubscribeParams {
                    topic: field.text().to_string(),
                    fields,
                }),
            )
            .with_child(select))
        }
        _ => query_field(single_root(selections, ctx)?, ctx),
    }
}

fn single_root<'a>(selections: &'a SyntaxNode, ctx: &mut BuildContext) -> Result<&'a SyntaxNode> {
    let mut fields = selections.children_by("field");
    let first = fields
        .next()
        .ok_or_else(|| QueryError::validation("empty selection set"))?;
    for extra in fields {
        ctx.skip(&format!("additional root field '{}'", extra.text()))?;
    }
    Ok(first)
}

fn arguments(field: &SyntaxNode) -> Result<Map<String, Value>> {
    let mut args = Map::new();
    if let Some(list) = field.child("arguments") {
        for arg in list.children_by("argument") {
            let value = arg
                .first()
                .ok_or_else(|| QueryError::validation("argument without a value"))?;
            args.insert(arg.text().to_string(), json_from_cst(value)?);
        }
    }
    Ok(args)
}

/// Leaf paths of a selection set, nested selections joined with `.`
fn projections(selections: &SyntaxNode, prefix: &str, out: &mut Vec<Projection>) {
    for field in selections.children_by("field") {
        let name = field.text();
        if name.starts_with("__") {
            continue;
        }
        let path = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}.{name}")
        };
        match field.child("selection_set") {
            Some(nested) => projections(nested, &path, out),
            None => out.push(Projection {
                expr: Expr::Field(path),
                alias: field.child("alias").map(|a| a.text().to_string()),
            }),
        }
    }
}

// ============================================================================
// Filters
// ============================================================================

/// Argument value as an expression; `$name` strings are variables
fn value_expr(value: &Value) -> Expr {
    match value {
        Value::String(s) if s.starts_with('$') => Expr::Param(s[1..].to_string()),
        Value::Array(items) => Expr::List(items.iter().map(value_expr).collect()),
        other => Expr::Literal(other.clone()),
    }
}

fn comparison(field: &str, op: &str, value: &Value, ctx: &mut BuildContext) -> Result<Option<Expr>> {
    let target = Expr::field(field);
    let binary = |op| Some(Expr::binary(op, target.clone(), value_expr(value)));
    let like = |negated, case_insensitive| {
        Some(Expr::Like {
            expr: Box::new(target.clone()),
            pattern: Box::new(value_expr(value)),
            negated,
            case_insensitive,
        })
    };
    let list = || match value_expr(value) {
        Expr::List(items) => items,
        single => vec![single],
    };
    Ok(match op {
        "_eq" => binary(BinaryOp::Eq),
        "_neq" => binary(BinaryOp::Ne),
        "_gt" => binary(BinaryOp::Gt),
        "_gte" => binary(BinaryOp::Ge),
        "_lt" => binary(BinaryOp::Lt),
        "_lte" => binary(BinaryOp::Le),
        "_like" => like(false, false),
        "_nlike" => like(true, false),
        "_ilike" => like(false, true),
        "_nilike" => like(true, true),
        "_regex" => binary(BinaryOp::Regex),
        "_in" => Some(Expr::In {
            expr: Box::new(target.clone()),
            list: list(),
            negated: false,
        }),
        "_nin" => Some(Expr::In {
            expr: Box::new(target.clone()),
            list: list(),
            negated: true,
        }),
        "_is_null" => Some(Expr::IsNull {
            expr: Box::new(target.clone()),
            negated: value == &Value::Bool(false),
        }),
        other => return ctx.unhandled(&format!("operator '{other}'"), format!("{field} {other} {value}")),
    })
}

/// Hasura boolean expression (`{age: {_gt: 25}, _or: [...]}`) to a predicate
pub fn hasura_filter(value: &Value, prefix: &str, ctx: &mut BuildContext) -> Result<Option<Expr>> {
    let Value::Object(map) = value else {
        return Err(QueryError::validation(format!("filter must be an object, got {value}")));
    };
    let mut conjuncts = Vec::new();
    for (key, inner) in map {
        match key.as_str() {
            "_and" | "_or" => {
                let items = match inner {
                    Value::Array(items) => items.clone(),
                    other => vec![other.clone()],
                };
                let mut parts = Vec::new();
                for item in &items {
                    parts.extend(hasura_filter(item, prefix, ctx)?);
                }
                let op = if key == "_and" { BinaryOp::And } else { BinaryOp::Or };
                conjuncts.extend(parts.into_iter().reduce(|l, r| Expr::binary(op, l, r)));
            }
            "_not" => {
                conjuncts.extend(hasura_filter(inner, prefix, ctx)?.map(|e| Expr::Not(Box::new(e))));
            }
            field => {
                let path = if prefix.is_empty() {
                    field.to_string()
                } else {
                    format!("{prefix}.{field}")
                };
                match inner {
                    Value::Object(ops) if ops.keys().all(|k| k.starts_with('_')) => {
                        for (op, operand) in ops {
                            conjuncts.extend(comparison(&path, op, operand, ctx)?);
                        }
                    }
                    Value::Object(_) => conjuncts.extend(hasura_filter(inner, &path, ctx)?),
                    scalar => conjuncts.push(Expr::eq(Expr::field(path), value_expr(scalar))),
                }
            }
        }
    }
    Ok(Expr::conjoin(conjuncts))
}

fn order_keys(value: &Value, prefix: &str, out: &mut Vec<SortKey>) -> Result<()> {
    match value {
        Value::Array(items) => {
            for item in items {
                order_keys(item, prefix, out)?;
            }
        }
        Value::Object(map) => {
            for (field, direction) in map {
                let path = if prefix.is_empty() {
                    field.clone()
                } else {
                    format!("{prefix}.{field}")
                };
                match direction {
                    Value::String(d) => out.push(SortKey {
                        expr: Expr::Field(path),
                        descending: d.to_ascii_lowercase().starts_with("desc"),
                    }),
                    nested @ Value::Object(_) => order_keys(nested, &path, out)?,
                    other => {
                        return Err(QueryError::validation(format!(
                            "invalid order_by direction {other}"
                        )))
                    }
                }
            }
        }
        other => return Err(QueryError::validation(format!("invalid order_by {other}"))),
    }
    Ok(())
}

fn as_count(args: &Map<String, Value>, key: &str) -> Result<Option<u64>> {
    match args.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| QueryError::value(format!("{key} must be a non-negative integer"))),
    }
}

fn where_action(predicate: Expr) -> Action {
    Action::new(ActionKind::Where, Params::Predicate(PredicateParams { predicate }))
}

/// Filter from `where` plus any plain equality arguments
fn field_filter(
    args: &Map<String, Value>,
    reserved: &[&str],
    ctx: &mut BuildContext,
) -> Result<Option<Expr>> {
    let mut conjuncts = Vec::new();
    if let Some(filter) = args.get("where") {
        conjuncts.extend(hasura_filter(filter, "", ctx)?);
    }
    for (key, value) in args {
        if key == "where" || reserved.contains(&key.as_str()) {
            continue;
        }
        conjuncts.push(Expr::eq(Expr::field(key.as_str()), value_expr(value)));
    }
    Ok(Expr::conjoin(conjuncts))
}

// ============================================================================
// Queries
// ============================================================================

fn query_field(field: &SyntaxNode, ctx: &mut BuildContext) -> Result<Action> {
    let args = arguments(field)?;
    let mut fields = Vec::new();
    if let Some(selections) = field.child("selection_set") {
        projections(selections, "", &mut fields);
    }
    if fields.is_empty() {
        fields.push(Projection::new(Expr::Star));
    }

    let mut children = Vec::new();
    let reserved = ["order_by", "limit", "offset", "distinct_on"];
    children.extend(field_filter(&args, &reserved, ctx)?.map(where_action));

    if let Some(order) = args.get("order_by") {
        let mut keys = Vec::new();
        order_keys(order, "", &mut keys)?;
        if !keys.is_empty() {
            children.push(Action::new(ActionKind::Order, Params::Order(OrderParams { keys })));
        }
    }

    let count = as_count(&args, "limit")?;
    let offset = as_count(&args, "offset")?;
    match (count, offset) {
        (Some(count), offset) => children.push(Action::new(
            ActionKind::Limit,
            Params::Limit(LimitParams {
                count: Some(count),
                offset: offset.unwrap_or(0),
            }),
        )),
        (None, Some(offset)) => children.push(Action::new(
            ActionKind::Offset,
            Params::Limit(LimitParams {
                count: None,
                offset,
            }),
        )),
        (None, None) => {}
    }

    Ok(Action::new(
        ActionKind::Select,
        Params::Select(SelectParams {
            fields,
            from: Some(Source::new(field.text())),
            distinct: args.contains_key("distinct_on"),
        }),
    )
    .with_children(children))
}

// ============================================================================
// Mutations
// ============================================================================

fn objects(args: &Map<String, Value>) -> Result<Vec<Map<String, Value>>> {
    let value = args
        .get("objects")
        .or_else(|| args.get("object"))
        .ok_or_else(|| QueryError::validation("insert requires 'objects' or 'object'"))?;
    let items = match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(map) => Ok(map),
            other => Err(QueryError::validation(format!("insert object expected, got {other}"))),
        })
        .collect()
}

fn insert_action(target: &str, args: &Map<String, Value>) -> Result<Action> {
    let objects = objects(args)?;
    let mut columns: Vec<String> = Vec::new();
    for object in &objects {
        for key in object.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    let rows = objects
        .iter()
        .map(|object| {
            columns
                .iter()
                .map(|c| object.get(c).map_or(Expr::Literal(Value::Null), value_expr))
                .collect()
        })
        .collect();
    Ok(Action::new(
        ActionKind::Insert,
        Params::Write(WriteParams {
            target: target.to_string(),
            columns,
            rows,
            ..WriteParams::default()
        }),
    ))
}

fn update_action(target: &str, args: &Map<String, Value>, ctx: &mut BuildContext) -> Result<Action> {
    let mut assignments = Vec::new();
    if let Some(Value::Object(set)) = args.get("_set") {
        for (key, value) in set {
            assignments.push(Assignment::new(key.as_str(), value_expr(value)));
        }
    }
    if let Some(Value::Object(inc)) = args.get("_inc") {
        for (key, value) in inc {
            assignments.push(Assignment::new(
                key.as_str(),
                Expr::binary(BinaryOp::Add, Expr::field(key.as_str()), value_expr(value)),
            ));
        }
    }
    if assignments.is_empty() {
        return Err(QueryError::validation("update requires '_set' or '_inc'"));
    }

    let filter = match args.get("pk_columns") {
        Some(pk) => hasura_filter(pk, "", ctx)?,
        None => field_filter(args, &["_set", "_inc"], ctx)?,
    };
    Ok(Action::new(
        ActionKind::Update,
        Params::Write(WriteParams {
            target: target.to_string(),
            assignments,
            ..WriteParams::default()
        }),
    )
    .with_children(filter.map(where_action)))
}

fn delete_action(target: &str, args: &Map<String, Value>, ctx: &mut BuildContext) -> Result<Action> {
    let filter = field_filter(args, &[], ctx)?;
    Ok(Action::new(
        ActionKind::Delete,
        Params::Write(WriteParams {
            target: target.to_string(),
            ..WriteParams::default()
        }),
    )
    .with_children(filter.map(where_action)))
}

fn mutation_field(field: &SyntaxNode, ctx: &mut BuildContext) -> Result<Option<Action>> {
    let name = field.text();
    let args = arguments(field)?;
    let strip = |prefix: &str| {
        name.strip_prefix(prefix).map(|rest| {
            rest.strip_suffix("_one")
                .or_else(|| rest.strip_suffix("_by_pk"))
                .unwrap_or(rest)
                .to_string()
        })
    };

    if let Some(target) = strip("insert_") {
        return insert_action(&target, &args).map(Some);
    }
    if let Some(target) = strip("update_") {
        return update_action(&target, &args, ctx).map(Some);
    }
    if let Some(target) = strip("delete_") {
        return delete_action(&target, &args, ctx).map(Some);
    }
    ctx.skip(&format!("mutation field '{name}'"))?;
    Ok(None)
}

#[cfg(test)]
mod tests {
    use crate::bridge::ParserBridge;
    use crate::format::QueryFormat;
    use quarry_core::{Action, ActionKind, ConversionMode, Expr};

    fn parse(query: &str) -> Action {
        ParserBridge::new()
            .parse(query, QueryFormat::GraphQl)
            .unwrap()
            .action
    }

    #[test]
    fn test_query_with_hasura_arguments() {
        let action = parse(
            "{ users(where: {age: {_gt: 25}, city: {_eq: \"NYC\"}}, order_by: {age: desc}, limit: 2) { name age } }",
        );
        let select = action.params.as_select().unwrap();
        assert_eq!(select.from.as_ref().unwrap().name, "users");
        assert_eq!(select.fields.len(), 2);
        let kinds: Vec<_> = action.children.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![ActionKind::Where, ActionKind::Order, ActionKind::Limit]);
        let filter = action.children[0].params.as_predicate().unwrap();
        assert_eq!(filter.predicate.to_string(), "age > 25 AND city = 'NYC'");
        assert!(action.children[1].params.as_order().unwrap().keys[0].descending);
    }

    #[test]
    fn test_nested_selection_and_equality_argument() {
        let action = parse("query { users(id: 1) { name address { city } } }");
        let select = action.params.as_select().unwrap();
        assert_eq!(select.fields[1].expr, Expr::field("address.city"));
        let filter = action.children[0].params.as_predicate().unwrap();
        assert_eq!(filter.predicate, Expr::eq(Expr::field("id"), Expr::lit(1)));
    }

    #[test]
    fn test_or_and_not() {
        let action = parse("{ users(where: {_or: [{age: {_lt: 20}}, {_not: {city: {_eq: \"LA\"}}}]}) { name } }");
        let filter = action.children[0].params.as_predicate().unwrap();
        assert_eq!(filter.predicate.to_string(), "age < 20 OR NOT (city = 'LA')");
    }

    #[test]
    fn test_mutation_fields() {
        let action = parse(
            "mutation AddAndFix { \
               insert_users(objects: [{name: \"Dan\", age: 40}, {name: \"Eve\"}]) { affected_rows } \
               update_users(where: {name: {_eq: \"Bob\"}}, _inc: {age: 1}) { affected_rows } \
               delete_users(where: {age: {_lt: 18}}) { affected_rows } }",
        );
        assert_eq!(action.kind, ActionKind::Mutation);
        let kinds: Vec<_> = action.children.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![ActionKind::Insert, ActionKind::Update, ActionKind::Delete]);
        let insert = action.children[0].params.as_write().unwrap();
        assert_eq!(insert.columns, vec!["name", "age"]);
        assert_eq!(insert.rows[1][1], Expr::Literal(serde_json::Value::Null));
    }

    #[test]
    fn test_subscription_wraps_select() {
        let action = parse("subscription { orders(where: {status: {_eq: \"new\"}}) { id } }");
        assert_eq!(action.kind, ActionKind::Subscription);
        assert_eq!(action.params.as_subscribe().unwrap().topic, "orders");
        assert_eq!(action.children[0].kind, ActionKind::Select);
    }

    #[test]
    fn test_extra_root_fields_by_mode() {
        let query = "{ users { name } orders { id } }";
        assert!(ParserBridge::new()
            .with_mode(ConversionMode::Strict)
            .parse(query, QueryFormat::GraphQl)
            .is_err());
        let outcome = ParserBridge::new().parse(query, QueryFormat::GraphQl).unwrap();
        assert_eq!(outcome.warnings.len(), 1);
    }
}
