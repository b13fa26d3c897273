//! Aggregation: single-column aggregates, DISTINCT, GROUP, HAVING and
//! SUMMARIZE.

use super::filter::filter_groups;
use super::{bad_params, OperatorRegistry};
use crate::eval::aggregate;
use crate::executor::ExecutionContext;
use quarry_core::value::{canonical_string, display, normalize_number};
use quarry_core::{
    Action, ActionKind, AggregateFunc, ExecutionResult, Expr, Projection, ResultShape, Result,
};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

pub(super) fn register(registry: &mut OperatorRegistry) {
    for kind in [
        ActionKind::Count,
        ActionKind::Sum,
        ActionKind::Avg,
        ActionKind::Min,
        ActionKind::Max,
    ] {
        registry.builtin(kind, column_aggregate);
    }
    registry.builtin(ActionKind::Distinct, distinct);
    registry.builtin(ActionKind::Group, group);
    registry.builtin(ActionKind::Having, having);
    registry.builtin(ActionKind::Summarize, summarize);
    registry.builtin(ActionKind::Aggregate, summarize);
}

/// Rows partitioned by key tuple, in order of first appearance
pub(crate) struct Partition {
    pub key: Vec<Value>,
    pub rows: Vec<Value>,
}

pub(crate) fn partition(ctx: &ExecutionContext<'_>, rows: Vec<Value>, keys: &[Expr]) -> Result<Vec<Partition>> {
    let mut out: Vec<Partition> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for row in rows {
        let mut key = Vec::with_capacity(keys.len());
        for expr in keys {
            key.push(normalize_number(&ctx.eval(expr, &row)?));
        }
        let canonical = canonical_string(&Value::Array(key.clone()));
        match index.get(&canonical) {
            Some(&i) => out[i].rows.push(row),
            None => {
                index.insert(canonical, out.len());
                out.push(Partition { key, rows: vec![row] });
            }
        }
    }
    Ok(out)
}

/// Display name of a group key tuple
pub(crate) fn group_name(key: &[Value]) -> String {
    match key {
        [single] => display(single),
        many => many.iter().map(display).collect::<Vec<_>>().join(","),
    }
}

/// Drop rows whose canonical form was already seen, keeping the first
pub(crate) fn dedup(rows: Vec<Value>) -> Vec<Value> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| seen.insert(canonical_string(&normalize_number(row))))
        .collect()
}

fn func_of(kind: ActionKind) -> AggregateFunc {
    match kind {
        ActionKind::Sum => AggregateFunc::Sum,
        ActionKind::Avg => AggregateFunc::Avg,
        ActionKind::Min => AggregateFunc::Min,
        ActionKind::Max => AggregateFunc::Max,
        _ => AggregateFunc::Count,
    }
}

/// COUNT / SUM / AVG / MIN / MAX over one field, or COUNT of rows
fn column_aggregate(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_aggregate().ok_or_else(|| bad_params(action))?;
    let func = func_of(action.kind);
    let coerce = ctx.coerces();
    let apply = |rows: &[Value]| -> Result<Value> {
        match &p.field {
            Some(field) => {
                let values = rows
                    .iter()
                    .map(|row| ctx.lookup(field, row).unwrap_or(Value::Null))
                    .collect();
                aggregate(func, values, p.distinct, coerce)
            }
            None if p.distinct => Ok(Value::from(dedup(rows.to_vec()).len())),
            None => Ok(Value::from(rows.len())),
        }
    };
    let name = p
        .alias
        .clone()
        .unwrap_or_else(|| action.kind.as_str().to_ascii_lowercase());

    if let (ResultShape::Groups, Value::Object(groups)) = (input.shape, &input.data) {
        let mut out = Map::new();
        for (key, rows) in groups {
            let rows = quarry_core::value::as_rows(rows);
            out.insert(key.clone(), apply(&rows)?);
        }
        return Ok(ExecutionResult::scalar(Value::Object(out)));
    }

    let value = apply(&input.into_rows())?;
    Ok(match p.alias {
        Some(_) => {
            let mut row = Map::new();
            row.insert(name, value);
            ExecutionResult::scalar(Value::Object(row))
        }
        None => ExecutionResult::scalar(value),
    })
}

fn distinct(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_distinct().ok_or_else(|| bad_params(action))?;
    let rows = input.into_rows();
    if p.fields.is_empty() {
        return Ok(ExecutionResult::rows(dedup(rows)));
    }
    let keys: Vec<Expr> = p.fields.iter().map(Expr::field).collect();
    let kept = partition(ctx, rows, &keys)?
        .into_iter()
        .filter_map(|part| part.rows.into_iter().next())
        .collect();
    Ok(ExecutionResult::rows(kept))
}

/// GROUP: `group key -> rows`; a null key is its own group
fn group(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_group().ok_or_else(|| bad_params(action))?;
    let mut groups = Map::new();
    for part in partition(ctx, input.into_rows(), &p.keys)? {
        let mut name = group_name(&part.key);
        if groups.contains_key(&name) {
            // "1" and 1 display alike but are different keys
            name = canonical_string(&Value::Array(part.key));
        }
        groups.insert(name, Value::Array(part.rows));
    }
    Ok(ExecutionResult::groups(groups))
}

/// HAVING; without a GROUP the whole input is one group
fn having(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_predicate().ok_or_else(|| bad_params(action))?;
    match (input.shape, input.data) {
        (ResultShape::Groups, Value::Object(groups)) => {
            Ok(ExecutionResult::groups(filter_groups(ctx, &p.predicate, groups)?))
        }
        (shape, data) => {
            let rows = ExecutionResult { data, shape, ..ExecutionResult::empty() }.into_rows();
            let first = rows.first().cloned().unwrap_or(Value::Null);
            let keep = quarry_core::value::truthy(&ctx.eval_group(&p.predicate, &first, &rows)?);
            Ok(ExecutionResult::rows(if keep { rows } else { Vec::new() }))
        }
    }
}

/// One output row per group: group fields by name, then the aggregates
pub(crate) fn summarize_rows(
    ctx: &ExecutionContext<'_>,
    rows: Vec<Value>,
    group_by: &[Expr],
    aggregates: &[Projection],
) -> Result<Vec<Value>> {
    let parts = if group_by.is_empty() {
        vec![Partition { key: Vec::new(), rows }]
    } else {
        partition(ctx, rows, group_by)?
    };
    let mut out = Vec::with_capacity(parts.len());
    for part in parts {
        let mut row = Map::new();
        for (expr, value) in group_by.iter().zip(part.key) {
            row.insert(expr.output_name(), value);
        }
        let first = part.rows.first().cloned().unwrap_or(Value::Null);
        for projection in aggregates {
            let value = ctx.eval_group(&projection.expr, &first, &part.rows)?;
            row.insert(projection.output_name(), value);
        }
        out.push(Value::Object(row));
    }
    Ok(out)
}

fn summarize(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_summarize().ok_or_else(|| bad_params(action))?;
    let rows = summarize_rows(ctx, input.into_rows(), &p.group_by, &p.aggregates)?;
    Ok(ExecutionResult::rows(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{
        AggregateParams, DistinctParams, GroupParams, JsonNode, Params, QueryOptions,
        SummarizeParams,
    };
    use serde_json::json;
    use std::sync::Arc;

    fn run(action: Action, input: ExecutionResult) -> ExecutionResult {
        let mut data = JsonNode::from_native(json!({}));
        let mut ctx = ExecutionContext::new(&mut data, QueryOptions::new(), Arc::new(OperatorRegistry::with_defaults()));
        ctx.execute(&action, input).unwrap()
    }

    fn orders() -> ExecutionResult {
        ExecutionResult::rows(vec![
            json!({"dept": "A", "price": 10}),
            json!({"dept": "A", "price": "20"}),
            json!({"dept": "B", "price": null}),
            json!({"dept": null, "price": "bad"}),
        ])
    }

    fn agg(kind: ActionKind, field: Option<&str>) -> Action {
        Action::new(
            kind,
            Params::Aggregate(AggregateParams {
                field: field.map(str::to_string),
                distinct: false,
                alias: None,
            }),
        )
    }

    #[test]
    fn test_aggregates_skip_null_and_bad_values() {
        assert_eq!(run(agg(ActionKind::Sum, Some("price")), orders()).data, json!(30));
        assert_eq!(run(agg(ActionKind::Avg, Some("price")), orders()).data, json!(15));
        assert_eq!(run(agg(ActionKind::Max, Some("price")), orders()).data, json!(20));
        assert_eq!(run(agg(ActionKind::Count, Some("price")), orders()).data, json!(3));
        assert_eq!(run(agg(ActionKind::Count, None), orders()).data, json!(4));
    }

    #[test]
    fn test_group_keeps_null_group() {
        let action = Action::new(
            ActionKind::Group,
            Params::Group(GroupParams {
                keys: vec![Expr::field("dept")],
            }),
        );
        let result = run(action, orders());
        assert_eq!(result.shape, ResultShape::Groups);
        assert_eq!(result.metadata["total_groups"], json!(3));
        assert_eq!(result.metadata["total_items"], json!(4));
        assert_eq!(result.data["A"].as_array().unwrap().len(), 2);
        assert!(result.data.get("null").is_some());
    }

    #[test]
    fn test_count_per_group() {
        let grouped = run(
            Action::new(
                ActionKind::Group,
                Params::Group(GroupParams {
                    keys: vec![Expr::field("dept")],
                }),
            ),
            orders(),
        );
        let counts = run(agg(ActionKind::Count, None), grouped);
        assert_eq!(counts.data, json!({"A": 2, "B": 1, "null": 1}));
    }

    #[test]
    fn test_distinct_handles_composites() {
        let input = ExecutionResult::rows(vec![
            json!({"a": [1, 2]}),
            json!({"a": [1, 2]}),
            json!({"a": 1.0}),
            json!({"a": 1}),
        ]);
        let action = Action::new(ActionKind::Distinct, Params::Distinct(DistinctParams::default()));
        assert_eq!(run(action, input).data, json!([{"a": [1, 2]}, {"a": 1.0}]));
    }

    #[test]
    fn test_summarize_names_group_fields() {
        let action = Action::new(
            ActionKind::Summarize,
            Params::Summarize(SummarizeParams {
                group_by: vec![Expr::field("dept")],
                aggregates: vec![Projection::aliased(
                    Expr::aggregate(AggregateFunc::Sum, Some(Expr::field("price"))),
                    "total",
                )],
            }),
        );
        let result = run(action, orders());
        assert_eq!(
            result.data,
            json!([
                {"dept": "A", "total": 30},
                {"dept": "B", "total": null},
                {"dept": null, "total": null}
            ])
        );
    }
}
