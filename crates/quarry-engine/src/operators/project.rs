//! Projection: PROJECT, RETURN, EXTEND.

use super::aggregate::{dedup, partition};
use super::{bad_params, OperatorRegistry};
use crate::executor::ExecutionContext;
use quarry_core::value::as_rows;
use quarry_core::{
    Action, ActionKind, ExecutionResult, Expr, Projection, QueryError, Result,
};
use serde_json::{Map, Value};

pub(super) fn register(registry: &mut OperatorRegistry) {
    registry.builtin(ActionKind::Project, project);
    registry.builtin(ActionKind::Return, project);
    registry.builtin(ActionKind::Extend, extend);
}

/// Output key of a projection, with a known source alias stripped
pub(crate) fn column_name(ctx: &ExecutionContext<'_>, projection: &Projection) -> String {
    let name = projection.output_name();
    if projection.alias.is_some() {
        return name;
    }
    match name.split_once('.') {
        Some((head, rest)) if ctx.qualifiers.iter().any(|q| q == head) => rest.to_string(),
        _ => name,
    }
}

/// Project one row; aggregate calls range over `group` when given
pub(crate) fn project_row(
    ctx: &ExecutionContext<'_>,
    fields: &[Projection],
    row: &Value,
    group: Option<&[Value]>,
) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    for projection in fields {
        match (&projection.expr, row) {
            (Expr::Star, Value::Object(map)) => {
                for (key, value) in map {
                    // merged join rows keep each side under its alias too
                    if value.is_object() && ctx.qualifiers.iter().any(|q| q == key) {
                        continue;
                    }
                    out.entry(key.clone()).or_insert_with(|| value.clone());
                }
                continue;
            }
            (Expr::Star, other) => {
                out.insert("value".into(), other.clone());
                continue;
            }
            (Expr::Field(path), _) if ctx.is_strict() && group.is_none() => {
                if ctx.lookup(path, row).is_none() {
                    return Err(QueryError::value(format!("unknown field '{path}'")));
                }
            }
            _ => {}
        }

        let value = match group {
            Some(rows) => ctx.eval_group(&projection.expr, row, rows)?,
            None => ctx.eval(&projection.expr, row)?,
        };
        let mut name = column_name(ctx, projection);
        if out.contains_key(&name) {
            if let Expr::Aggregate { arg: Some(arg), .. } = &projection.expr {
                name = format!("{name}_{}", arg.output_name());
            }
        }
        out.insert(name, value);
    }
    Ok(out)
}

/// Project `rows`, grouping implicitly when `fields` hold aggregates.
///
/// Non-aggregate fields become the group keys; with none, every row forms a
/// single group and one row comes out even for empty input.
pub(crate) fn project_rows(
    ctx: &ExecutionContext<'_>,
    fields: &[Projection],
    rows: Vec<Value>,
) -> Result<Vec<Value>> {
    if !fields.iter().any(|f| f.expr.contains_aggregate()) {
        return rows
            .iter()
            .map(|row| project_row(ctx, fields, row, None).map(Value::Object))
            .collect();
    }

    let keys: Vec<Expr> = fields
        .iter()
        .filter(|f| !f.is_star() && !f.expr.contains_aggregate())
        .map(|f| f.expr.clone())
        .collect();
    let groups = if keys.is_empty() {
        vec![rows]
    } else {
        partition(ctx, rows, &keys)?.into_iter().map(|p| p.rows).collect()
    };
    groups
        .iter()
        .map(|group| {
            let first = group.first().cloned().unwrap_or(Value::Null);
            project_row(ctx, fields, &first, Some(group)).map(Value::Object)
        })
        .collect()
}

/// Project each group of a GROUP result into one row
pub(crate) fn project_groups(
    ctx: &ExecutionContext<'_>,
    fields: &[Projection],
    groups: &Map<String, Value>,
) -> Result<Vec<Value>> {
    groups
        .values()
        .map(|rows| {
            let members = as_rows(rows);
            let first = members.first().cloned().unwrap_or(Value::Null);
            project_row(ctx, fields, &first, Some(&members)).map(Value::Object)
        })
        .collect()
}

fn project(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_project().ok_or_else(|| bad_params(action))?;
    let mut rows = match input.as_groups() {
        Some(groups) => project_groups(ctx, &p.fields, groups)?,
        None => project_rows(ctx, &p.fields, input.into_rows())?,
    };
    if p.distinct {
        rows = dedup(rows);
    }
    Ok(ExecutionResult::rows(rows))
}

/// Add computed fields, keeping the existing ones
fn extend(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_extend().ok_or_else(|| bad_params(action))?;
    let mut out = Vec::new();
    for row in input.into_rows() {
        let mut extended = match &row {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other.clone());
                map
            }
        };
        for projection in &p.fields {
            let value = ctx.eval(&projection.expr, &row)?;
            extended.insert(projection.output_name(), value);
        }
        out.push(Value::Object(extended));
    }
    Ok(ExecutionResult::rows(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{
        AggregateFunc, BinaryOp, ConversionMode, ExtendParams, JsonNode, Params, ProjectParams,
        QueryOptions,
    };
    use serde_json::json;
    use std::sync::Arc;

    fn run_with(action: Action, rows: Vec<Value>, options: QueryOptions) -> Result<ExecutionResult> {
        let mut data = JsonNode::from_native(json!({}));
        let mut ctx = ExecutionContext::new(&mut data, options, Arc::new(OperatorRegistry::with_defaults()));
        ctx.execute(&action, ExecutionResult::rows(rows))
    }

    fn run(action: Action, rows: Vec<Value>) -> ExecutionResult {
        run_with(action, rows, QueryOptions::new()).unwrap()
    }

    fn project_of(fields: Vec<Projection>, distinct: bool) -> Action {
        Action::new(ActionKind::Project, Params::Project(ProjectParams { fields, distinct }))
    }

    fn staff() -> Vec<Value> {
        vec![
            json!({"name": "a", "dept": "A", "salary": 10}),
            json!({"name": "b", "dept": "A", "salary": 20}),
            json!({"name": "c", "dept": "B", "salary": 5}),
        ]
    }

    #[test]
    fn test_project_fields_and_alias() {
        let action = project_of(
            vec![
                Projection::new(Expr::field("name")),
                Projection::aliased(
                    Expr::binary(BinaryOp::Mul, Expr::field("salary"), Expr::lit(2)),
                    "double",
                ),
            ],
            false,
        );
        let result = run(action, staff());
        assert_eq!(result.data[0], json!({"name": "a", "double": 20}));
    }

    #[test]
    fn test_implicit_grouping() {
        let action = project_of(
            vec![
                Projection::new(Expr::field("dept")),
                Projection::new(Expr::aggregate(AggregateFunc::Sum, Some(Expr::field("salary")))),
            ],
            false,
        );
        assert_eq!(
            run(action, staff()).data,
            json!([{"dept": "A", "sum": 30}, {"dept": "B", "sum": 5}])
        );
    }

    #[test]
    fn test_aggregate_only_on_empty_input() {
        let action = project_of(
            vec![Projection::new(Expr::aggregate(AggregateFunc::Count, None))],
            false,
        );
        assert_eq!(run(action, vec![]).data, json!([{"count": 0}]));
    }

    #[test]
    fn test_colliding_aggregate_names() {
        let action = project_of(
            vec![
                Projection::new(Expr::aggregate(AggregateFunc::Max, Some(Expr::field("salary")))),
                Projection::new(Expr::aggregate(AggregateFunc::Max, Some(Expr::field("name")))),
            ],
            false,
        );
        assert_eq!(run(action, staff()).data, json!([{"max": 20, "max_name": "c"}]));
    }

    #[test]
    fn test_distinct_projection() {
        let action = project_of(vec![Projection::new(Expr::field("dept"))], true);
        assert_eq!(run(action, staff()).data, json!([{"dept": "A"}, {"dept": "B"}]));
    }

    #[test]
    fn test_strict_rejects_unknown_field() {
        let action = project_of(vec![Projection::new(Expr::field("nope"))], false);
        let strict = run_with(action.clone(), staff(), QueryOptions::new().with_mode(ConversionMode::Strict));
        assert!(strict.is_err());
        let flexible = run(action, staff());
        assert_eq!(flexible.data[0], json!({"nope": null}));
    }

    #[test]
    fn test_extend_keeps_fields() {
        let action = Action::new(
            ActionKind::Extend,
            Params::Extend(ExtendParams {
                fields: vec![Projection::aliased(
                    Expr::binary(BinaryOp::Add, Expr::field("salary"), Expr::lit(1)),
                    "raised",
                )],
            }),
        );
        let result = run(action, staff());
        assert_eq!(result.data[2], json!({"name": "c", "dept": "B", "salary": 5, "raised": 6}));
    }
}
