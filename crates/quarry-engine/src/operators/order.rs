//! Ordering and row windows: ORDER, BY, LIMIT, OFFSET, SLICING, INDEXING.

use super::{bad_params, OperatorRegistry};
use crate::executor::ExecutionContext;
use quarry_core::value::sort_cmp;
use quarry_core::{Action, ActionKind, ExecutionResult, QueryError, Result, SliceParams, SortKey};
use serde_json::{Map, Value};
use std::cmp::Ordering;

pub(super) fn register(registry: &mut OperatorRegistry) {
    registry.builtin(ActionKind::Order, order);
    registry.builtin(ActionKind::By, order);
    registry.builtin(ActionKind::Limit, limit);
    registry.builtin(ActionKind::Offset, limit);
    registry.builtin(ActionKind::Slicing, slicing);
    registry.builtin(ActionKind::Indexing, indexing);
}

/// Compare two sort keys; nulls sort last in either direction
pub(crate) fn key_cmp(a: &Value, b: &Value, descending: bool, coerce: bool) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) if descending => sort_cmp(b, a, coerce),
        (false, false) => sort_cmp(a, b, coerce),
    }
}

/// Stable multi-key sort
pub(crate) fn sort_rows(ctx: &ExecutionContext<'_>, rows: Vec<Value>, keys: &[SortKey]) -> Result<Vec<Value>> {
    if keys.is_empty() {
        return Ok(rows);
    }
    let coerce = ctx.coerces();
    let mut keyed = Vec::with_capacity(rows.len());
    for row in rows {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(ctx.eval(&key.expr, &row)?);
        }
        keyed.push((values, row));
    }
    keyed.sort_by(|(a, _), (b, _)| {
        keys.iter()
            .zip(a.iter().zip(b))
            .map(|(key, (x, y))| key_cmp(x, y, key.descending, coerce))
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
    Ok(keyed.into_iter().map(|(_, row)| row).collect())
}

fn order(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_order().ok_or_else(|| bad_params(action))?;
    if let Some(groups) = input.as_groups() {
        let mut sorted = Map::new();
        for (key, rows) in groups {
            let rows = sort_rows(ctx, quarry_core::value::as_rows(rows), &p.keys)?;
            sorted.insert(key.clone(), Value::Array(rows));
        }
        return Ok(ExecutionResult::groups(sorted));
    }
    Ok(ExecutionResult::rows(sort_rows(ctx, input.into_rows(), &p.keys)?))
}

/// Skip `offset` rows, then keep at most `count`
pub(crate) fn window_rows(rows: Vec<Value>, count: Option<u64>, offset: u64) -> Vec<Value> {
    let skipped = rows.into_iter().skip(offset as usize);
    match count {
        Some(n) => skipped.take(n as usize).collect(),
        None => skipped.collect(),
    }
}

fn limit(action: &Action, input: ExecutionResult, _ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_limit().ok_or_else(|| bad_params(action))?;
    let rows = window_rows(input.into_rows(), p.count, p.offset);
    let mut result = ExecutionResult::rows(rows).with_meta("offset", p.offset);
    if let Some(count) = p.count {
        result = result.with_meta("limit", count);
    }
    Ok(result)
}

/// Resolve a possibly negative index against `len`
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let resolved = if index < 0 { len + index } else { index };
    (0..len).contains(&resolved).then_some(resolved as usize)
}

/// Python-style `[start:end:step]`
pub(crate) fn slice_items(items: &[Value], p: &SliceParams) -> Result<Vec<Value>> {
    let step = p.step.unwrap_or(1);
    if step == 0 {
        return Err(QueryError::value("slice step cannot be zero"));
    }
    let len = items.len() as i64;
    let clamp = |bound: i64, low: i64, high: i64| -> i64 {
        let b = if bound < 0 { bound + len } else { bound };
        b.clamp(low, high)
    };
    let mut out = Vec::new();
    if step > 0 {
        let start = p.start.map_or(0, |s| clamp(s, 0, len));
        let end = p.end.map_or(len, |e| clamp(e, 0, len));
        let mut i = start;
        while i < end {
            out.push(items[i as usize].clone());
            i += step;
        }
    } else {
        let start = p.start.map_or(len - 1, |s| clamp(s, -1, len - 1));
        let end = p.end.map_or(-1, |e| clamp(e, -1, len - 1));
        let mut i = start;
        while i > end {
            out.push(items[i as usize].clone());
            i += step;
        }
    }
    Ok(out)
}

/// Slice the row list, or an array field of every row
fn slicing(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_slice().ok_or_else(|| bad_params(action))?;
    match &p.field {
        None => Ok(ExecutionResult::rows(slice_items(&input.into_rows(), p)?)),
        Some(field) => {
            let mut out = Vec::new();
            for row in input.into_rows() {
                match ctx.lookup(field, &row) {
                    Some(Value::Array(items)) => out.push(Value::Array(slice_items(&items, p)?)),
                    Some(Value::String(text)) => {
                        let chars: Vec<Value> = text.chars().map(|c| Value::String(c.into())).collect();
                        let picked: String = slice_items(&chars, p)?
                            .iter()
                            .filter_map(Value::as_str)
                            .collect();
                        out.push(Value::String(picked));
                    }
                    _ => out.push(Value::Null),
                }
            }
            Ok(ExecutionResult::rows(out))
        }
    }
}

/// One element by (possibly negative) position
fn indexing(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_slice().ok_or_else(|| bad_params(action))?;
    let index = p
        .index
        .or(p.start)
        .ok_or_else(|| QueryError::validation("INDEXING needs an index"))?;
    match &p.field {
        None => {
            let rows = input.into_rows();
            let picked = resolve_index(index, rows.len()).map(|i| rows[i].clone());
            Ok(ExecutionResult::scalar(picked.unwrap_or(Value::Null)))
        }
        Some(field) => {
            let picked = input
                .into_rows()
                .iter()
                .map(|row| match ctx.lookup(field, row) {
                    Some(Value::Array(items)) => resolve_index(index, items.len())
                        .map_or(Value::Null, |i| items[i].clone()),
                    _ => Value::Null,
                })
                .collect();
            Ok(ExecutionResult::rows(picked))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{Expr, JsonNode, LimitParams, OrderParams, Params, QueryOptions};
    use serde_json::json;
    use std::sync::Arc;
    use test_case::test_case;

    fn run(action: Action, rows: Vec<Value>) -> ExecutionResult {
        let mut data = JsonNode::from_native(json!({}));
        let mut ctx = ExecutionContext::new(&mut data, QueryOptions::new(), Arc::new(OperatorRegistry::with_defaults()));
        ctx.execute(&action, ExecutionResult::rows(rows)).unwrap()
    }

    fn ages() -> Vec<Value> {
        vec![
            json!({"n": "a", "age": 30}),
            json!({"n": "b", "age": null}),
            json!({"n": "c", "age": 25}),
            json!({"n": "d", "age": 30}),
        ]
    }

    fn names(result: &ExecutionResult) -> Vec<String> {
        result.row_slice().iter().map(|r| r["n"].as_str().unwrap_or("").to_string()).collect()
    }

    #[test_case(false, vec!["c", "a", "d", "b"] ; "ascending")]
    #[test_case(true, vec!["a", "d", "c", "b"] ; "descending keeps nulls last")]
    fn test_order_is_stable(descending: bool, expected: Vec<&str>) {
        let key = SortKey { expr: Expr::field("age"), descending };
        let action = Action::new(ActionKind::Order, Params::Order(OrderParams { keys: vec![key] }));
        assert_eq!(names(&run(action, ages())), expected);
    }

    #[test]
    fn test_limit_with_offset() {
        let action = Action::new(
            ActionKind::Limit,
            Params::Limit(LimitParams { count: Some(2), offset: 1 }),
        );
        let result = run(action, ages());
        assert_eq!(names(&result), vec!["b", "c"]);
        assert_eq!(result.metadata["limit"], json!(2));
        assert_eq!(result.metadata["offset"], json!(1));
    }

    #[test]
    fn test_offset_past_end() {
        let action = Action::new(
            ActionKind::Offset,
            Params::Limit(LimitParams { count: None, offset: 10 }),
        );
        assert_eq!(run(action, ages()).data, json!([]));
    }

    #[test_case(Some(1), Some(3), None, json!([2, 3]) ; "range")]
    #[test_case(Some(-2), None, None, json!([4, 5]) ; "negative start")]
    #[test_case(None, None, Some(-2), json!([5, 3, 1]) ; "reverse step")]
    #[test_case(Some(10), None, None, json!([]) ; "past end")]
    fn test_slice_items(start: Option<i64>, end: Option<i64>, step: Option<i64>, expected: Value) {
        let items: Vec<Value> = (1..=5).map(Value::from).collect();
        let p = SliceParams { field: None, start, end, step, index: None };
        assert_eq!(Value::Array(slice_items(&items, &p).unwrap()), expected);
    }

    #[test]
    fn test_indexing_negative() {
        let action = Action::new(
            ActionKind::Indexing,
            Params::Slice(SliceParams { index: Some(-1), ..SliceParams::default() }),
        );
        assert_eq!(run(action, ages()).data["n"], json!("d"));
    }

    #[test]
    fn test_zero_step_is_rejected() {
        let p = SliceParams { step: Some(0), ..SliceParams::default() };
        assert!(slice_items(&[], &p).is_err());
    }
}
