//! Row filters.
//!
//! A row survives a predicate only when it evaluates to a truthy value, so
//! comparisons against null (unknown) drop the row. HAS with `present =
//! false` and OPTIONAL are the only operators that keep missing values.

use super::{bad_params, OperatorRegistry};
use crate::eval::like_matches;
use crate::executor::ExecutionContext;
use quarry_core::value::{as_rows, compare, display, loose_eq, truthy};
use quarry_core::{
    Action, ActionKind, ExecutionResult, Expr, RangeParams, ResultShape, Result,
};
use serde_json::{Map, Value};
use std::cmp::Ordering;

pub(super) fn register(registry: &mut OperatorRegistry) {
    registry.builtin(ActionKind::Where, predicate);
    registry.builtin(ActionKind::Filter, predicate);
    registry.builtin(ActionKind::Like, like);
    registry.builtin(ActionKind::In, in_list);
    registry.builtin(ActionKind::Has, has);
    registry.builtin(ActionKind::Between, range);
    registry.builtin(ActionKind::Range, range);
    registry.builtin(ActionKind::Term, term);
    registry.builtin(ActionKind::Optional, optional);
    registry.builtin(ActionKind::Values, values);
}

/// Keep the rows of `input` for which `keep` holds
pub(crate) fn retain(
    input: ExecutionResult,
    mut keep: impl FnMut(&Value) -> Result<bool>,
) -> Result<ExecutionResult> {
    let mut kept = Vec::new();
    for row in input.into_rows() {
        if keep(&row)? {
            kept.push(row);
        }
    }
    Ok(ExecutionResult::rows(kept))
}

/// Keep the groups whose rows satisfy `predicate` under aggregate scope
pub(crate) fn filter_groups(
    ctx: &ExecutionContext<'_>,
    predicate: &Expr,
    groups: Map<String, Value>,
) -> Result<Map<String, Value>> {
    let mut kept = Map::new();
    for (key, rows) in groups {
        let members = as_rows(&rows);
        let first = members.first().cloned().unwrap_or(Value::Null);
        if truthy(&ctx.eval_group(predicate, &first, &members)?) {
            kept.insert(key, rows);
        }
    }
    Ok(kept)
}

/// WHERE / FILTER; against groups the predicate sees each group
fn predicate(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_predicate().ok_or_else(|| bad_params(action))?;
    match (input.shape, input.data) {
        (ResultShape::Groups, Value::Object(groups)) => {
            Ok(ExecutionResult::groups(filter_groups(ctx, &p.predicate, groups)?))
        }
        (shape, data) => {
            let input = ExecutionResult { data, shape, ..ExecutionResult::empty() };
            retain(input, |row| ctx.test(&p.predicate, row))
        }
    }
}

fn text_of(ctx: &ExecutionContext<'_>, field: &str, row: &Value) -> Option<String> {
    match ctx.lookup(field, row)? {
        Value::String(s) => Some(s),
        Value::Null => None,
        other => Some(display(&other)),
    }
}

fn like(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_like().ok_or_else(|| bad_params(action))?;
    retain(input, |row| {
        Ok(match text_of(ctx, &p.field, row) {
            Some(text) => like_matches(&text, &p.pattern, p.case_insensitive)? != p.negated,
            None => false,
        })
    })
}

fn in_list(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_in().ok_or_else(|| bad_params(action))?;
    let coerce = ctx.coerces();
    retain(input, |row| {
        Ok(match ctx.lookup(&p.field, row) {
            None | Some(Value::Null) => false,
            Some(v) => p.values.iter().any(|c| loose_eq(&v, c, coerce)) != p.negated,
        })
    })
}

fn has(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_has().ok_or_else(|| bad_params(action))?;
    retain(input, |row| {
        let present = ctx.lookup(&p.field, row).is_some_and(|v| !v.is_null());
        Ok(present == p.present)
    })
}

fn in_range(p: &RangeParams, v: &Value, coerce: bool) -> Option<bool> {
    let above = match &p.low {
        Some(low) => {
            let ord = compare(v, low, coerce)?;
            ord == Ordering::Greater || (p.low_inclusive && ord == Ordering::Equal)
        }
        None => true,
    };
    let below = match &p.high {
        Some(high) => {
            let ord = compare(v, high, coerce)?;
            ord == Ordering::Less || (p.high_inclusive && ord == Ordering::Equal)
        }
        None => true,
    };
    Some(above && below)
}

/// BETWEEN / RANGE over one field
fn range(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_range().ok_or_else(|| bad_params(action))?;
    let coerce = ctx.coerces();
    retain(input, |row| {
        Ok(match ctx.lookup(&p.field, row) {
            None | Some(Value::Null) => false,
            Some(v) => in_range(p, &v, coerce).is_some_and(|inside| inside != p.negated),
        })
    })
}

fn contains_term(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s.to_lowercase().contains(needle),
        Value::Array(items) => items.iter().any(|i| contains_term(i, needle)),
        Value::Object(map) => map.values().any(|v| contains_term(v, needle)),
        Value::Null => false,
        other => display(other).to_lowercase().contains(needle),
    }
}

/// Case-insensitive term search in one field, or anywhere in the row
fn term(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_term().ok_or_else(|| bad_params(action))?;
    let needle = p.term.to_lowercase();
    retain(input, |row| {
        Ok(match &p.field {
            Some(field) => ctx.lookup(field, row).is_some_and(|v| contains_term(&v, &needle)),
            None => contains_term(row, &needle),
        })
    })
}

/// Children narrow the input; when they leave nothing the input is kept
fn optional(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let narrowed = ctx.run_children(action, input.clone())?;
    if narrowed.row_count() == 0 {
        Ok(input)
    } else {
        Ok(narrowed)
    }
}

/// Inline rows
fn values(action: &Action, _input: ExecutionResult, _ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_values().ok_or_else(|| bad_params(action))?;
    let rows = p
        .rows
        .iter()
        .map(|row| {
            if p.columns.is_empty() {
                return Value::Array(row.clone());
            }
            let map: Map<String, Value> = p
                .columns
                .iter()
                .cloned()
                .zip(row.iter().cloned().chain(std::iter::repeat(Value::Null)))
                .collect();
            Value::Object(map)
        })
        .collect();
    Ok(ExecutionResult::rows(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::OperatorRegistry;
    use quarry_core::{
        HasParams, InParams, JsonNode, LikeParams, Params, QueryOptions, TermParams, ValuesParams,
    };
    use serde_json::json;
    use std::sync::Arc;
    use test_case::test_case;

    fn people() -> Vec<Value> {
        vec![
            json!({"name": "Alice", "age": 30, "tags": ["admin"]}),
            json!({"name": "bob", "age": null}),
            json!({"name": "Charlie", "age": "35"}),
        ]
    }

    fn run(action: Action, rows: Vec<Value>) -> Vec<Value> {
        let mut data = JsonNode::from_native(json!({}));
        let mut ctx = ExecutionContext::new(&mut data, QueryOptions::new(), Arc::new(OperatorRegistry::with_defaults()));
        ctx.execute(&action, ExecutionResult::rows(rows)).unwrap().into_rows()
    }

    fn names(rows: &[Value]) -> Vec<&str> {
        rows.iter().filter_map(|r| r["name"].as_str()).collect()
    }

    #[test]
    fn test_where_drops_unknown() {
        let action = Action::new(
            ActionKind::Where,
            Params::Predicate(quarry_core::PredicateParams {
                predicate: Expr::binary(quarry_core::BinaryOp::Gt, Expr::field("age"), Expr::Literal(json!(25))),
            }),
        );
        // "35" coerces in FLEXIBLE mode; null is unknown
        assert_eq!(names(&run(action, people())), vec!["Alice", "Charlie"]);
    }

    #[test_case("A%", false, vec!["Alice"] ; "case sensitive")]
    #[test_case("a%", true, vec!["Alice"] ; "case insensitive")]
    #[test_case("%o%", false, vec!["bob"] ; "infix")]
    fn test_like(pattern: &str, ci: bool, expected: Vec<&str>) {
        let action = Action::new(
            ActionKind::Like,
            Params::Like(LikeParams {
                field: "name".into(),
                pattern: pattern.into(),
                negated: false,
                case_insensitive: ci,
            }),
        );
        assert_eq!(names(&run(action, people())), expected);
    }

    #[test]
    fn test_in_and_has() {
        let action = Action::new(
            ActionKind::In,
            Params::In(InParams {
                field: "age".into(),
                values: vec![json!(30), json!(35)],
                negated: false,
            }),
        );
        assert_eq!(names(&run(action, people())), vec!["Alice", "Charlie"]);

        let missing = Action::new(
            ActionKind::Has,
            Params::Has(HasParams {
                field: "age".into(),
                present: false,
            }),
        );
        assert_eq!(names(&run(missing, people())), vec!["bob"]);
    }

    #[test]
    fn test_between_is_inclusive() {
        let action = Action::new(
            ActionKind::Between,
            Params::Range(RangeParams {
                field: "age".into(),
                low: Some(json!(30)),
                high: Some(json!(35)),
                low_inclusive: true,
                high_inclusive: true,
                negated: false,
            }),
        );
        assert_eq!(names(&run(action, people())), vec!["Alice", "Charlie"]);
    }

    #[test]
    fn test_term_searches_nested_values() {
        let action = Action::new(
            ActionKind::Term,
            Params::Term(TermParams {
                field: None,
                term: "ADMIN".into(),
            }),
        );
        assert_eq!(names(&run(action, people())), vec!["Alice"]);
    }

    #[test]
    fn test_values_builds_rows() {
        let action = Action::new(
            ActionKind::Values,
            Params::Values(ValuesParams {
                columns: vec!["a".into(), "b".into()],
                rows: vec![vec![json!(1), json!(2)], vec![json!(3)]],
            }),
        );
        assert_eq!(
            run(action, vec![]),
            vec![json!({"a": 1, "b": 2}), json!({"a": 3, "b": null})]
        );
    }
}
