//! SELECT, JOIN and WINDOW.
//!
//! SELECT drives its clause children itself so that each clause sees rows
//! at the right stage. Without aggregation the clauses run in tree order on
//! source rows and the projection comes last; DISTINCT moves LIMIT after the
//! de-duplication. With aggregation, joins and WHERE run on source rows,
//! GROUP and HAVING on groups, and windows, ORDER and LIMIT on the projected
//! rows.

use super::aggregate::dedup;
use super::order::key_cmp;
use super::project::{column_name, project_groups, project_rows};
use super::{bad_params, OperatorRegistry};
use crate::cost::JoinAlgorithm;
use crate::eval::aggregate;
use crate::executor::{piped, ExecutionContext};
use quarry_core::value::{as_number, as_rows, canonical_string, compare, number, sort_cmp};
use quarry_core::{
    Action, ActionKind, AggregateFunc, BinaryOp, ExecutionResult, Expr, JoinType, Params,
    Result, ResultShape, SelectParams, WindowFunction, WindowParams,
};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::trace;

pub(super) fn register(registry: &mut OperatorRegistry) {
    registry.builtin(ActionKind::Select, select);
    registry.builtin(ActionKind::Join, join);
    registry.builtin(ActionKind::Window, window);
}

/// Children a SELECT treats as its own clauses
fn is_clause(kind: ActionKind) -> bool {
    matches!(
        kind,
        ActionKind::Join
            | ActionKind::Where
            | ActionKind::Filter
            | ActionKind::Group
            | ActionKind::Having
            | ActionKind::Window
            | ActionKind::Order
            | ActionKind::By
            | ActionKind::Limit
            | ActionKind::Offset
    )
}

fn is_ordering(kind: ActionKind) -> bool {
    matches!(kind, ActionKind::Order | ActionKind::By)
}

fn is_limit(kind: ActionKind) -> bool {
    matches!(kind, ActionKind::Limit | ActionKind::Offset)
}

fn select(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_select().ok_or_else(|| bad_params(action))?;
    let saved = ctx.qualifiers.clone();
    let outcome = run_select(action, p, input, ctx);
    ctx.qualifiers = saved;
    outcome
}

/// A clause child and its index among the SELECT's children
type Clause<'a> = (usize, &'a Action);

fn run_select(
    action: &Action,
    p: &SelectParams,
    input: ExecutionResult,
    ctx: &mut ExecutionContext<'_>,
) -> Result<ExecutionResult> {
    let subquery = action.children.first().filter(|c| !is_clause(c.kind));
    let rows = match (subquery, &p.from) {
        (Some(child), _) => ctx
            .run_child(action, 0, child, ExecutionResult::void(0))?
            .into_rows(),
        (None, Some(from)) => ctx.resolve_source(&from.name)?,
        (None, None) if input.shape == ResultShape::Void || input.data.is_null() => {
            as_rows(ctx.data.root())
        }
        (None, None) => input.into_rows(),
    };
    if let Some(from) = &p.from {
        ctx.qualifiers.push(from.qualifier().to_string());
        if from.alias.as_deref().is_some_and(|a| a != from.name) {
            ctx.qualifiers.push(from.name.clone());
        }
    }

    let skip = usize::from(subquery.is_some());
    let clauses: Vec<Clause<'_>> = action.children.iter().enumerate().skip(skip).collect();
    let aggregated = p.fields.iter().any(|f| f.expr.contains_aggregate())
        || clauses.iter().any(|(_, c)| c.kind == ActionKind::Group);
    trace!(action_id = action.id, rows = rows.len(), aggregated, "select source");

    let mut meta = Map::new();
    let result = if aggregated {
        aggregated_select(action, p, rows, &clauses, &mut meta, ctx)?
    } else {
        plain_select(action, p, rows, &clauses, &mut meta, ctx)?
    };
    Ok(meta
        .into_iter()
        .fold(result, |result, (key, value)| result.with_meta(&key, value)))
}

fn run_clause(
    action: &Action,
    (index, child): Clause<'_>,
    current: ExecutionResult,
    meta: &mut Map<String, Value>,
    ctx: &mut ExecutionContext<'_>,
) -> Result<ExecutionResult> {
    let output = ctx.run_child(action, index, child, current.clone())?;
    if is_limit(child.kind) {
        for key in ["limit", "offset"] {
            if let Some(value) = output.metadata.get(key) {
                meta.insert(key.to_string(), value.clone());
            }
        }
    }
    Ok(piped(current, output))
}

/// Copy of an ORDER child with keys rewritten by `rewrite`
fn rewritten_order(child: &Action, rewrite: impl Fn(&Expr) -> Option<Expr>) -> Action {
    let mut rewritten = child.clone();
    if let Params::Order(order) = &mut rewritten.params {
        for key in &mut order.keys {
            if let Some(expr) = rewrite(&key.expr) {
                key.expr = expr;
            }
        }
    }
    rewritten
}

fn plain_select(
    action: &Action,
    p: &SelectParams,
    rows: Vec<Value>,
    clauses: &[Clause<'_>],
    meta: &mut Map<String, Value>,
    ctx: &mut ExecutionContext<'_>,
) -> Result<ExecutionResult> {
    let mut current = ExecutionResult::rows(rows);
    let mut deferred = Vec::new();
    for &(index, child) in clauses {
        if p.distinct && is_limit(child.kind) {
            deferred.push((index, child));
        } else if is_ordering(child.kind) {
            // ORDER BY may name a select-list alias
            let order = rewritten_order(child, |expr| match expr {
                Expr::Field(name) => p
                    .fields
                    .iter()
                    .find(|f| f.alias.as_deref() == Some(name.as_str()))
                    .map(|f| f.expr.clone()),
                _ => None,
            });
            current = run_clause(action, (index, &order), current, meta, ctx)?;
        } else {
            current = run_clause(action, (index, child), current, meta, ctx)?;
        }
    }

    let mut projected = project_rows(ctx, &p.fields, current.into_rows())?;
    if p.distinct {
        projected = dedup(projected);
    }
    let mut current = ExecutionResult::rows(projected);
    for clause in deferred {
        current = run_clause(action, clause, current, meta, ctx)?;
    }
    Ok(current)
}

fn aggregated_select(
    action: &Action,
    p: &SelectParams,
    rows: Vec<Value>,
    clauses: &[Clause<'_>],
    meta: &mut Map<String, Value>,
    ctx: &mut ExecutionContext<'_>,
) -> Result<ExecutionResult> {
    let mut current = ExecutionResult::rows(rows);
    let mut grouped = false;
    let mut filtered = false;
    let mut after = Vec::new();

    for &(index, child) in clauses {
        match child.kind {
            ActionKind::Group => {
                current = run_clause(action, (index, child), current, meta, ctx)?;
                grouped = true;
            }
            ActionKind::Having => {
                if current.as_groups().is_none() {
                    let mut single = Map::new();
                    single.insert("*".into(), Value::Array(current.into_rows()));
                    current = ExecutionResult::groups(single);
                }
                current = run_clause(action, (index, child), current, meta, ctx)?;
                filtered = true;
            }
            ActionKind::Join | ActionKind::Where | ActionKind::Filter => {
                current = run_clause(action, (index, child), current, meta, ctx)?;
            }
            _ => after.push((index, child)),
        }
    }

    let mut projected = match current.as_groups() {
        Some(groups) => project_groups(ctx, &p.fields, groups)?,
        None => project_rows(ctx, &p.fields, current.into_rows())?,
    };
    if p.distinct {
        projected = dedup(projected);
    }

    let mut current = ExecutionResult::rows(projected);
    for (index, child) in after {
        if is_ordering(child.kind) {
            // ORDER BY COUNT(*) sorts on the projected `count` column
            let order = rewritten_order(child, |expr| {
                p.fields
                    .iter()
                    .find(|f| !f.is_star() && f.expr.structurally_eq(expr))
                    .map(|f| Expr::field(column_name(ctx, f)))
            });
            current = run_clause(action, (index, &order), current, meta, ctx)?;
        } else {
            current = run_clause(action, (index, child), current, meta, ctx)?;
        }
    }

    let all_aggregates = p.fields.iter().all(|f| f.expr.contains_aggregate());
    if !grouped && !filtered && all_aggregates && current.row_count() == 1 {
        let row = current.into_rows().into_iter().next().unwrap_or(Value::Null);
        return Ok(ExecutionResult::scalar(row));
    }
    Ok(current)
}

// ============================================================================
// JOIN
// ============================================================================

/// Alias layout of a merged row
struct Sides {
    left_alias: Option<String>,
    right_alias: String,
    left_nulls: Value,
    right_nulls: Value,
}

/// Object with every key seen in `rows` set to null
fn null_template(rows: &[Value]) -> Value {
    let mut nulls = Map::new();
    for row in rows {
        if let Value::Object(map) = row {
            for key in map.keys() {
                nulls.entry(key.clone()).or_insert(Value::Null);
            }
        }
    }
    Value::Object(nulls)
}

/// Flattened fields (left wins) plus each side under its alias
fn merge_rows(left: Option<&Value>, right: Option<&Value>, sides: &Sides) -> Value {
    let mut out = Map::new();
    if let Some(Value::Object(map)) = left {
        out.extend(map.clone());
    }
    if let Some(alias) = &sides.left_alias {
        // an already merged row carries its alias
        if !out.contains_key(alias) {
            out.insert(alias.clone(), left.cloned().unwrap_or_else(|| sides.left_nulls.clone()));
        }
    }
    if let Some(Value::Object(map)) = right {
        for (key, value) in map {
            out.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    out.insert(
        sides.right_alias.clone(),
        right.cloned().unwrap_or_else(|| sides.right_nulls.clone()),
    );
    Value::Object(out)
}

/// `left_key = right_key` from the ON conjuncts, oriented by qualifier
fn equi_keys<'e>(on: &'e Expr, right_names: &[String]) -> Option<(&'e Expr, &'e Expr)> {
    let is_right = |e: &Expr| match e {
        Expr::Field(path) => path
            .split_once('.')
            .is_some_and(|(head, _)| right_names.iter().any(|n| n == head)),
        _ => false,
    };
    on.conjuncts().into_iter().find_map(|c| match c {
        Expr::Binary {
            op: BinaryOp::Eq,
            left,
            right,
        } => match (is_right(left), is_right(right)) {
            (false, true) => Some((left.as_ref(), right.as_ref())),
            (true, false) => Some((right.as_ref(), left.as_ref())),
            _ => None,
        },
        _ => None,
    })
}

/// Hashable join key; null never joins
fn join_key(value: &Value, coerce: bool) -> Option<String> {
    if value.is_null() {
        return None;
    }
    match as_number(value, coerce) {
        Some(n) if !value.is_boolean() => Some(number(n).to_string()),
        _ => Some(canonical_string(value)),
    }
}

fn keys_of(ctx: &ExecutionContext<'_>, expr: &Expr, rows: &[Value]) -> Result<Vec<Value>> {
    rows.iter().map(|row| ctx.eval(expr, row)).collect()
}

fn hash_pairs(left_keys: &[Value], right_keys: &[Value], coerce: bool) -> Vec<(usize, usize)> {
    let mut table: HashMap<String, Vec<usize>> = HashMap::new();
    for (ri, key) in right_keys.iter().enumerate() {
        if let Some(k) = join_key(key, coerce) {
            table.entry(k).or_default().push(ri);
        }
    }
    let mut pairs = Vec::new();
    for (li, key) in left_keys.iter().enumerate() {
        if let Some(matches) = join_key(key, coerce).and_then(|k| table.get(&k)) {
            pairs.extend(matches.iter().map(|&ri| (li, ri)));
        }
    }
    pairs
}

fn merge_pairs(left_keys: &[Value], right_keys: &[Value], coerce: bool) -> Vec<(usize, usize)> {
    let sorted = |keys: &[Value]| {
        let mut idx: Vec<usize> = (0..keys.len()).filter(|&i| !keys[i].is_null()).collect();
        idx.sort_by(|&a, &b| sort_cmp(&keys[a], &keys[b], coerce));
        idx
    };
    let (ls, rs) = (sorted(left_keys), sorted(right_keys));
    let (mut i, mut j) = (0, 0);
    let mut pairs = Vec::new();
    while i < ls.len() && j < rs.len() {
        let (l, r) = (&left_keys[ls[i]], &right_keys[rs[j]]);
        match sort_cmp(l, r, coerce) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                let run_end = |sorted: &[usize], keys: &[Value], from: usize| {
                    let mut end = from;
                    while end < sorted.len() && sort_cmp(&keys[sorted[end]], &keys[sorted[from]], coerce) == Ordering::Equal {
                        end += 1;
                    }
                    end
                };
                let (li_end, rj_end) = (run_end(&ls, left_keys, i), run_end(&rs, right_keys, j));
                for &li in &ls[i..li_end] {
                    for &ri in &rs[j..rj_end] {
                        if compare(&left_keys[li], &right_keys[ri], coerce) == Some(Ordering::Equal) {
                            pairs.push((li, ri));
                        }
                    }
                }
                i = li_end;
                j = rj_end;
            }
        }
    }
    pairs
}

fn all_pairs(left: usize, right: usize) -> Vec<(usize, usize)> {
    (0..left).flat_map(|li| (0..right).map(move |ri| (li, ri))).collect()
}

fn join(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_join().ok_or_else(|| bad_params(action))?;
    let right_rows = ctx.resolve_source(&p.target.name)?;
    let mut right_names = vec![p.target.qualifier().to_string()];
    if p.target.alias.is_some() {
        right_names.push(p.target.name.clone());
    }
    let left_alias = ctx.qualifiers.first().cloned();
    for name in &right_names {
        if !ctx.qualifiers.contains(name) {
            ctx.qualifiers.push(name.clone());
        }
    }

    let left_rows = input.into_rows();
    let sides = Sides {
        left_alias,
        right_alias: p.target.qualifier().to_string(),
        left_nulls: null_template(&left_rows),
        right_nulls: null_template(&right_rows),
    };
    let coerce = ctx.coerces();

    let mut pairs = match (&p.on, p.join_type) {
        (None, _) | (_, JoinType::Cross) => all_pairs(left_rows.len(), right_rows.len()),
        (Some(on), _) => {
            let algorithm = ctx.join_hint(action.id).unwrap_or(JoinAlgorithm::Hash);
            let candidates = match (algorithm, equi_keys(on, &right_names)) {
                (JoinAlgorithm::NestedLoop, _) | (_, None) => all_pairs(left_rows.len(), right_rows.len()),
                (JoinAlgorithm::Merge, Some((lk, rk))) => {
                    merge_pairs(&keys_of(ctx, lk, &left_rows)?, &keys_of(ctx, rk, &right_rows)?, coerce)
                }
                (_, Some((lk, rk))) => {
                    hash_pairs(&keys_of(ctx, lk, &left_rows)?, &keys_of(ctx, rk, &right_rows)?, coerce)
                }
            };
            trace!(action_id = action.id, algorithm = algorithm.as_str(), candidates = candidates.len(), "join");
            let mut matched = Vec::with_capacity(candidates.len());
            for (li, ri) in candidates {
                let merged = merge_rows(Some(&left_rows[li]), Some(&right_rows[ri]), &sides);
                if ctx.test(on, &merged)? {
                    matched.push((li, ri));
                }
            }
            matched
        }
    };
    pairs.sort_unstable();

    let mut by_left: Vec<Vec<usize>> = vec![Vec::new(); left_rows.len()];
    let mut right_matched = vec![false; right_rows.len()];
    for (li, ri) in pairs {
        by_left[li].push(ri);
        right_matched[ri] = true;
    }

    let keep_left = matches!(p.join_type, JoinType::Left | JoinType::Full);
    let keep_right = matches!(p.join_type, JoinType::Right | JoinType::Full);
    let mut out = Vec::new();
    for (left, matches) in left_rows.iter().zip(&by_left) {
        if matches.is_empty() && keep_left {
            out.push(merge_rows(Some(left), None, &sides));
        }
        for &ri in matches {
            out.push(merge_rows(Some(left), Some(&right_rows[ri]), &sides));
        }
    }
    if keep_right {
        for (right, _) in right_rows.iter().zip(&right_matched).filter(|(_, m)| !**m) {
            out.push(merge_rows(None, Some(right), &sides));
        }
    }
    Ok(ExecutionResult::rows(out))
}

// ============================================================================
// WINDOW
// ============================================================================

fn window_aggregate(function: WindowFunction) -> Option<AggregateFunc> {
    match function {
        WindowFunction::Sum => Some(AggregateFunc::Sum),
        WindowFunction::Avg => Some(AggregateFunc::Avg),
        WindowFunction::Count => Some(AggregateFunc::Count),
        WindowFunction::Min => Some(AggregateFunc::Min),
        WindowFunction::Max => Some(AggregateFunc::Max),
        _ => None,
    }
}

/// Window values for one partition, already in window order
fn partition_values(
    ctx: &ExecutionContext<'_>,
    p: &WindowParams,
    rows: &[&Value],
    order_keys: &[Vec<Value>],
) -> Result<Vec<Value>> {
    let coerce = ctx.coerces();
    let peers = |a: usize, b: usize| {
        p.order_by
            .iter()
            .enumerate()
            .all(|(k, key)| key_cmp(&order_keys[a][k], &order_keys[b][k], key.descending, coerce) == Ordering::Equal)
    };
    let field = |row: &Value| match &p.field {
        Some(path) => ctx.lookup(path, row).unwrap_or(Value::Null),
        None => Value::Bool(true),
    };

    let n = rows.len();
    let mut out = Vec::with_capacity(n);
    let (mut rank, mut dense) = (0usize, 0usize);
    for pos in 0..n {
        let new_peer_group = pos == 0 || !peers(pos - 1, pos);
        if new_peer_group {
            rank = pos + 1;
            dense += 1;
        }
        let offset = p.offset as usize;
        let value = match p.function {
            WindowFunction::RowNumber => Value::from(pos + 1),
            WindowFunction::Rank => Value::from(rank),
            WindowFunction::DenseRank => Value::from(dense),
            WindowFunction::Lag => pos.checked_sub(offset).map_or(Value::Null, |i| field(rows[i])),
            WindowFunction::Lead => rows.get(pos + offset).map_or(Value::Null, |r| field(*r)),
            other => {
                // ordered windows are running totals including peers
                let end = if p.order_by.is_empty() {
                    n
                } else {
                    let mut end = pos + 1;
                    while end < n && peers(pos, end) {
                        end += 1;
                    }
                    end
                };
                let values = rows[..end].iter().map(|r| field(*r)).collect();
                match window_aggregate(other) {
                    Some(func) => aggregate(func, values, false, coerce)?,
                    None => Value::Null,
                }
            }
        };
        out.push(value);
    }
    Ok(out)
}

fn window(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_window().ok_or_else(|| bad_params(action))?;
    let rows = input.into_rows();
    let coerce = ctx.coerces();

    let mut partitions: Vec<Vec<usize>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for (i, row) in rows.iter().enumerate() {
        let mut key = Vec::with_capacity(p.partition_by.len());
        for expr in &p.partition_by {
            key.push(ctx.eval(expr, row)?);
        }
        let key = canonical_string(&Value::Array(key));
        let slot = *index.entry(key).or_insert_with(|| {
            partitions.push(Vec::new());
            partitions.len() - 1
        });
        partitions[slot].push(i);
    }

    let mut order_keys: Vec<Vec<Value>> = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut keys = Vec::with_capacity(p.order_by.len());
        for key in &p.order_by {
            keys.push(ctx.eval(&key.expr, row)?);
        }
        order_keys.push(keys);
    }

    let mut values = vec![Value::Null; rows.len()];
    for mut members in partitions {
        members.sort_by(|&a, &b| {
            p.order_by
                .iter()
                .enumerate()
                .map(|(k, key)| key_cmp(&order_keys[a][k], &order_keys[b][k], key.descending, coerce))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        let member_rows: Vec<&Value> = members.iter().map(|&i| &rows[i]).collect();
        let member_keys: Vec<Vec<Value>> = members.iter().map(|&i| order_keys[i].clone()).collect();
        for (&i, value) in members.iter().zip(partition_values(ctx, p, &member_rows, &member_keys)?) {
            values[i] = value;
        }
    }

    let out = rows
        .into_iter()
        .zip(values)
        .map(|(row, value)| {
            let mut map = match row {
                Value::Object(map) => map,
                other => {
                    let mut map = Map::new();
                    map.insert("value".into(), other);
                    map
                }
            };
            map.insert(p.alias.clone(), value);
            Value::Object(map)
        })
        .collect();
    Ok(ExecutionResult::rows(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanHints;
    use quarry_core::{JoinParams, JsonNode, Projection, QueryOptions, SortKey, Source};
    use serde_json::json;
    use std::sync::Arc;
    use test_case::test_case;

    fn sql(text: &str) -> Action {
        quarry_syntax::ParserBridge::new()
            .parse(text, quarry_syntax::QueryFormat::Sql)
            .unwrap()
            .action
    }

    fn shop() -> Value {
        json!({
            "users": [
                {"id": 1, "name": "Alice", "dept": "A"},
                {"id": 2, "name": "Bob", "dept": "B"},
                {"id": 3, "name": "Carol", "dept": "A"}
            ],
            "orders": [
                {"oid": 10, "user_id": 1, "amount": 5},
                {"oid": 11, "user_id": 1, "amount": 7},
                {"oid": 12, "user_id": 2, "amount": 3},
                {"oid": 13, "user_id": 9, "amount": 1}
            ]
        })
    }

    fn run_hinted(action: &Action, hints: PlanHints) -> ExecutionResult {
        let mut data = JsonNode::from_native(shop());
        let mut ctx = ExecutionContext::new(&mut data, QueryOptions::new(), Arc::new(OperatorRegistry::with_defaults()))
            .with_hints(hints);
        ctx.execute(action, ExecutionResult::void(0)).unwrap()
    }

    fn run(text: &str) -> ExecutionResult {
        run_hinted(&sql(text), PlanHints::default())
    }

    #[test]
    fn test_select_where_order() {
        let result = run("SELECT name FROM users WHERE dept = 'A' ORDER BY name DESC");
        assert_eq!(result.data, json!([{"name": "Carol"}, {"name": "Alice"}]));
        assert_eq!(result.affected_count, 2);
    }

    #[test]
    fn test_order_by_select_alias() {
        let result = run("SELECT name AS n FROM users ORDER BY n DESC LIMIT 1");
        assert_eq!(result.data, json!([{"n": "Carol"}]));
        assert_eq!(result.metadata["limit"], json!(1));
    }

    #[test]
    fn test_distinct_applies_before_limit() {
        let result = run("SELECT DISTINCT dept FROM users LIMIT 2");
        assert_eq!(result.data, json!([{"dept": "A"}, {"dept": "B"}]));
    }

    #[test]
    fn test_group_by_order_by_aggregate() {
        let result = run("SELECT dept, COUNT(*) FROM users GROUP BY dept ORDER BY COUNT(*) DESC");
        assert_eq!(result.data, json!([{"dept": "A", "count": 2}, {"dept": "B", "count": 1}]));
    }

    #[test]
    fn test_having_without_group_by() {
        let result = run("SELECT COUNT(*) FROM users HAVING COUNT(*) > 5");
        assert_eq!(result.data, json!([]));
    }

    fn inner_join(algorithm: Option<JoinAlgorithm>) -> ExecutionResult {
        let mut action = sql("SELECT u.name, o.amount FROM users u JOIN orders o ON u.id = o.user_id");
        action.assign_ids();
        let mut hints = PlanHints::default();
        if let Some(algorithm) = algorithm {
            let join_id = action.children[0].id;
            hints.set_join(join_id, algorithm);
        }
        run_hinted(&action, hints)
    }

    #[test_case(None ; "default hash")]
    #[test_case(Some(JoinAlgorithm::NestedLoop) ; "nested loop")]
    #[test_case(Some(JoinAlgorithm::Merge) ; "merge")]
    #[test_case(Some(JoinAlgorithm::IndexedNestedLoop) ; "indexed")]
    fn test_join_algorithms_agree(algorithm: Option<JoinAlgorithm>) {
        assert_eq!(
            inner_join(algorithm).data,
            json!([
                {"name": "Alice", "amount": 5},
                {"name": "Alice", "amount": 7},
                {"name": "Bob", "amount": 3}
            ])
        );
    }

    #[test]
    fn test_left_join_null_extends() {
        let result = run("SELECT u.name, o.amount FROM users u LEFT JOIN orders o ON u.id = o.user_id");
        let rows = result.row_slice();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[3], json!({"name": "Carol", "amount": null}));
    }

    #[test]
    fn test_full_join_keeps_unmatched_right() {
        let action = Action::new(
            ActionKind::Select,
            Params::Select(SelectParams {
                fields: vec![Projection::new(Expr::field("o.oid")), Projection::new(Expr::field("u.name"))],
                from: Some(Source { name: "users".into(), alias: Some("u".into()) }),
                distinct: false,
            }),
        )
        .with_child(Action::new(
            ActionKind::Join,
            Params::Join(JoinParams {
                join_type: JoinType::Full,
                target: Source { name: "orders".into(), alias: Some("o".into()) },
                on: Some(Expr::eq(Expr::field("u.id"), Expr::field("o.user_id"))),
            }),
        ));
        let rows = run_hinted(&action, PlanHints::default()).into_rows();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[4], json!({"oid": 13, "name": null}));
    }

    #[test]
    fn test_window_rank_and_running_sum() {
        let window = |function, alias: &str| {
            Action::new(
                ActionKind::Window,
                Params::Window(WindowParams {
                    function,
                    field: Some("amount".into()),
                    partition_by: vec![Expr::field("user_id")],
                    order_by: vec![SortKey::asc(Expr::field("amount"))],
                    offset: 1,
                    alias: alias.into(),
                }),
            )
        };
        let action = Action::new(
            ActionKind::Select,
            Params::Select(SelectParams {
                fields: vec![
                    Projection::new(Expr::field("oid")),
                    Projection::new(Expr::field("rn")),
                    Projection::new(Expr::field("total")),
                ],
                from: Some(Source::new("orders")),
                distinct: false,
            }),
        )
        .with_child(window(WindowFunction::RowNumber, "rn"))
        .with_child(window(WindowFunction::Sum, "total"));
        let rows = run_hinted(&action, PlanHints::default()).into_rows();
        assert_eq!(rows[0], json!({"oid": 10, "rn": 1, "total": 5}));
        assert_eq!(rows[1], json!({"oid": 11, "rn": 2, "total": 12}));
        assert_eq!(rows[2], json!({"oid": 12, "rn": 1, "total": 3}));
    }

    #[test]
    fn test_subquery_source() {
        let result = run("SELECT name FROM (SELECT name, dept FROM users WHERE dept = 'A') AS t ORDER BY name");
        assert_eq!(result.data, json!([{"name": "Alice"}, {"name": "Carol"}]));
    }
}
