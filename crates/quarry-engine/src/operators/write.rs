//! Writes and DDL: INSERT, UPDATE, DELETE, MERGE, CREATE, ALTER, DROP.
//!
//! Collections are arrays of objects addressed by `target` (a dotted path
//! into the data node). Every write reports the number of touched items as
//! a void result's `affected_count` and keeps the statistics store, when
//! one is attached, in step with the data.

use super::graph::{create_vertex, next_id};
use super::{bad_params, OperatorRegistry};
use crate::executor::ExecutionContext;
use crate::graph::vertex_array_key;
use crate::stats::IndexInfo;
use quarry_core::value::{loose_eq, set_path};
use quarry_core::{
    Action, ActionKind, AlterOp, ExecutionResult, Expr, QueryError, Result, SchemaObject,
    WriteParams,
};
use serde_json::{Map, Value};
use tracing::debug;

pub(super) fn register(registry: &mut OperatorRegistry) {
    registry.builtin(ActionKind::Insert, insert);
    registry.builtin(ActionKind::Update, update);
    registry.builtin(ActionKind::Delete, delete);
    registry.builtin(ActionKind::Merge, merge);
    registry.builtin(ActionKind::Create, create);
    registry.builtin(ActionKind::Alter, alter);
    registry.builtin(ActionKind::Drop, drop_object);
}

fn unknown_collection(name: &str) -> QueryError {
    QueryError::value(format!("unknown collection '{name}'"))
}

fn collection_mut<'d>(
    ctx: &'d mut ExecutionContext<'_>,
    name: &str,
    create: bool,
) -> Result<&'d mut Vec<Value>> {
    match ctx.data.get(name).map(Value::is_array) {
        Some(true) => {}
        None if create => ctx.data.set(name, Value::Array(Vec::new()))?,
        None => return Err(unknown_collection(name)),
        Some(false) => return Err(QueryError::value(format!("'{name}' is not a collection"))),
    }
    ctx.data
        .get_mut(name)
        .and_then(Value::as_array_mut)
        .ok_or_else(|| unknown_collection(name))
}

/// Keep the row count of a known collection current
fn refresh_row_count(ctx: &ExecutionContext<'_>, name: &str) {
    let Some(stats) = ctx.statistics() else {
        return;
    };
    if stats.is_known(name) {
        let rows = ctx.data.get(name).and_then(Value::as_array).map_or(0, Vec::len);
        stats.set_row_count(name, rows as u64);
    }
}

/// Objects described by `columns` x `rows`, or by `assignments`
fn literal_rows(ctx: &ExecutionContext<'_>, p: &WriteParams, columns: &[String]) -> Result<Vec<Value>> {
    let scope = Value::Object(Map::new());
    let mut out = Vec::with_capacity(p.rows.len().max(1));
    for exprs in &p.rows {
        if exprs.len() != columns.len() {
            return Err(QueryError::validation(format!(
                "row has {} values for {} columns",
                exprs.len(),
                columns.len()
            )));
        }
        let mut row = Map::new();
        for (column, expr) in columns.iter().zip(exprs) {
            row.insert(column.clone(), ctx.eval(expr, &scope)?);
        }
        out.push(Value::Object(row));
    }
    if p.rows.is_empty() && !p.assignments.is_empty() {
        let mut row = Value::Object(Map::new());
        for assignment in &p.assignments {
            let value = ctx.eval(&assignment.value, &scope)?;
            if !set_path(&mut row, &assignment.path, value) {
                return Err(QueryError::value(format!("cannot write '{}'", assignment.path)));
            }
        }
        out.push(row);
    }
    Ok(out)
}

/// Column order for positional rows: declared, or that of the first stored row
fn insert_columns(ctx: &ExecutionContext<'_>, p: &WriteParams) -> Result<Vec<String>> {
    if !p.columns.is_empty() || p.rows.is_empty() {
        return Ok(p.columns.clone());
    }
    let first = ctx
        .data
        .get(&p.target)
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(Value::as_object);
    match first {
        Some(map) => Ok(map.keys().cloned().collect()),
        None => Err(QueryError::validation(format!(
            "INSERT into empty '{}' needs a column list",
            p.target
        ))),
    }
}

/// INSERT of literal rows, or of the rows produced by its source child
fn insert(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_write().ok_or_else(|| bad_params(action))?;
    let rows = if p.rows.is_empty() && p.assignments.is_empty() {
        if action.children.is_empty() {
            return Err(QueryError::validation("INSERT without values"));
        }
        input.into_rows()
    } else {
        let columns = insert_columns(ctx, p)?;
        literal_rows(ctx, p, &columns)?
    };
    if let Some(bad) = rows.iter().find(|r| !r.is_object()) {
        return Err(QueryError::value(format!(
            "cannot insert {} into '{}'",
            quarry_core::value::type_name(bad),
            p.target
        )));
    }
    let count = rows.len();
    collection_mut(ctx, &p.target, true)?.extend(rows);
    refresh_row_count(ctx, &p.target);
    debug!(target = %p.target, count, "rows inserted");
    Ok(ExecutionResult::void(count as u64))
}

/// WHERE / FILTER children of UPDATE and DELETE
fn write_filter(action: &Action) -> Result<Vec<&Expr>> {
    action
        .children
        .iter()
        .map(|child| {
            child
                .params
                .as_predicate()
                .map(|p| &p.predicate)
                .ok_or_else(|| QueryError::unsupported(child.kind, "only predicates can narrow a write"))
        })
        .collect()
}

fn selected(ctx: &ExecutionContext<'_>, predicates: &[&Expr], row: &Value) -> Result<bool> {
    for predicate in predicates {
        if !ctx.test(predicate, row)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Run `f` with `name` usable as a field qualifier
fn qualified<T>(
    ctx: &mut ExecutionContext<'_>,
    name: &str,
    f: impl FnOnce(&mut ExecutionContext<'_>) -> Result<T>,
) -> Result<T> {
    ctx.qualifiers.push(name.to_string());
    let out = f(ctx);
    ctx.qualifiers.pop();
    out
}

/// UPDATE: assignments see the row as it was before the statement
fn update(action: &Action, _input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_write().ok_or_else(|| bad_params(action))?;
    if p.assignments.is_empty() {
        return Err(QueryError::validation("UPDATE without assignments"));
    }
    let predicates = write_filter(action)?;
    let snapshot = collection_mut(ctx, &p.target, false)?.clone();
    let changed = qualified(ctx, &p.target, |ctx| {
        let mut changed = Vec::new();
        for (index, row) in snapshot.iter().enumerate() {
            ctx.checkpoint()?;
            if !selected(ctx, &predicates, row)? {
                continue;
            }
            let mut updated = row.clone();
            for assignment in &p.assignments {
                let value = ctx.eval(&assignment.value, row)?;
                if !set_path(&mut updated, &assignment.path, value) {
                    return Err(QueryError::value(format!("cannot write '{}'", assignment.path)));
                }
            }
            changed.push((index, updated));
        }
        Ok(changed)
    })?;

    let count = changed.len();
    let rows = collection_mut(ctx, &p.target, false)?;
    for (index, row) in changed {
        rows[index] = row;
    }
    debug!(target = %p.target, count, "rows updated");
    Ok(ExecutionResult::void(count as u64))
}

/// DELETE; without a filter every row goes
fn delete(action: &Action, _input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_write().ok_or_else(|| bad_params(action))?;
    let predicates = write_filter(action)?;
    let snapshot = collection_mut(ctx, &p.target, false)?.clone();
    let doomed = qualified(ctx, &p.target, |ctx| {
        let mut doomed = Vec::with_capacity(snapshot.len());
        for row in &snapshot {
            ctx.checkpoint()?;
            doomed.push(selected(ctx, &predicates, row)?);
        }
        Ok(doomed)
    })?;

    let rows = collection_mut(ctx, &p.target, false)?;
    let before = rows.len();
    let mut flags = doomed.iter();
    rows.retain(|_| !flags.next().copied().unwrap_or(false));
    let count = before - rows.len();
    refresh_row_count(ctx, &p.target);
    debug!(target = %p.target, count, "rows deleted");
    Ok(ExecutionResult::void(count as u64))
}

fn same_key(existing: &Value, incoming: &Map<String, Value>, key: &[String]) -> bool {
    key.iter().all(|k| match (existing.get(k), incoming.get(k)) {
        (Some(a), Some(b)) => loose_eq(a, b, false),
        _ => false,
    })
}

fn carries_label(vertex: &Value, label: &str) -> bool {
    match (vertex.get("labels"), vertex.get("label")) {
        (Some(Value::Array(labels)), _) => labels.iter().any(|l| l.as_str() == Some(label)),
        (_, Some(Value::String(l))) => l == label,
        _ => false,
    }
}

/// MERGE: upsert keyed by `key` (every column when empty). A target that
/// is not a stored collection names a vertex label instead.
fn merge(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_write().ok_or_else(|| bad_params(action))?;
    let incoming: Vec<Map<String, Value>> = if p.rows.is_empty() && p.assignments.is_empty() {
        input.into_rows()
    } else {
        literal_rows(ctx, p, &p.columns)?
    }
    .into_iter()
    .filter_map(|row| match row {
        Value::Object(map) => Some(map),
        _ => None,
    })
    .collect();
    let key: Vec<String> = if p.key.is_empty() {
        p.columns.clone()
    } else {
        p.key.clone()
    };
    if key.is_empty() {
        return Err(QueryError::validation("MERGE needs key columns"));
    }

    let as_vertices = !matches!(ctx.data.get(&p.target), Some(Value::Array(_)));
    let collection = if as_vertices {
        vertex_array_key(ctx.data.root()).to_string()
    } else {
        p.target.clone()
    };
    let rows = collection_mut(ctx, &collection, true)?;
    let (mut inserted, mut updated) = (0u64, 0u64);
    for row in incoming {
        let found = rows.iter_mut().find(|existing| {
            (!as_vertices || carries_label(existing, &p.target)) && same_key(existing, &row, &key)
        });
        match found {
            Some(Value::Object(existing)) => {
                existing.extend(row);
                updated += 1;
            }
            Some(_) => {}
            None if as_vertices => {
                let mut vertex = Map::new();
                vertex.insert("id".into(), row.get("id").cloned().unwrap_or_else(|| next_id(rows)));
                vertex.insert("label".into(), Value::String(p.target.clone()));
                for (k, v) in row {
                    vertex.entry(k).or_insert(v);
                }
                rows.push(Value::Object(vertex));
                inserted += 1;
            }
            None => {
                rows.push(Value::Object(row));
                inserted += 1;
            }
        }
    }
    refresh_row_count(ctx, &collection);
    debug!(target = %p.target, inserted, updated, "merged");
    Ok(ExecutionResult::void(inserted + updated)
        .with_meta("inserted", inserted)
        .with_meta("updated", updated))
}

/// CREATE of a collection, an index or a vertex
fn create(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_schema().ok_or_else(|| bad_params(action))?;
    match p.object {
        SchemaObject::Vertex => create_vertex(p, input, ctx),
        SchemaObject::View => Err(QueryError::unsupported(action.kind, "views are not supported")),
        SchemaObject::Collection => {
            if ctx.data.has(&p.name) {
                if p.if_exists {
                    return Ok(ExecutionResult::void(0));
                }
                return Err(QueryError::value(format!("collection '{}' already exists", p.name)));
            }
            ctx.data.set(&p.name, Value::Array(Vec::new()))?;
            if let Some(stats) = ctx.statistics() {
                stats.set_row_count(&p.name, 0);
                let primary: Vec<String> = p
                    .columns
                    .iter()
                    .filter(|c| c.primary_key)
                    .map(|c| c.name.clone())
                    .collect();
                if !primary.is_empty() {
                    let mut index = IndexInfo::new(format!("pk_{}", p.name), primary);
                    index.primary = true;
                    index.unique = true;
                    stats.register_index(&p.name, index);
                }
            }
            debug!(collection = %p.name, "collection created");
            Ok(ExecutionResult::void(1).with_meta("collection", p.name.clone()))
        }
        SchemaObject::Index => {
            let on = p
                .on
                .as_deref()
                .ok_or_else(|| QueryError::validation("CREATE INDEX needs a collection"))?;
            if p.columns.is_empty() {
                return Err(QueryError::validation("CREATE INDEX needs columns"));
            }
            if !ctx.data.has(on) {
                return Err(unknown_collection(on));
            }
            let Some(stats) = ctx.statistics() else {
                return Ok(ExecutionResult::void(0).with_meta("index", p.name.clone()));
            };
            if stats.indexes(on).iter().any(|i| i.name == p.name) {
                if p.if_exists {
                    return Ok(ExecutionResult::void(0));
                }
                return Err(QueryError::value(format!("index '{}' already exists", p.name)));
            }
            let columns = p.columns.iter().map(|c| c.name.clone()).collect();
            stats.register_index(on, IndexInfo::new(p.name.clone(), columns));
            Ok(ExecutionResult::void(1).with_meta("index", p.name.clone()))
        }
    }
}

/// ALTER: column changes apply to every stored row
fn alter(action: &Action, _input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_schema().ok_or_else(|| bad_params(action))?;
    if p.alter.is_empty() {
        return Err(QueryError::validation("ALTER without changes"));
    }
    let mut name = p.name.clone();
    for op in &p.alter {
        if let AlterOp::RenameTo { name: renamed } = op {
            if ctx.data.has(renamed) {
                return Err(QueryError::value(format!("collection '{renamed}' already exists")));
            }
            let rows = ctx.data.delete(&name)?.ok_or_else(|| unknown_collection(&name))?;
            ctx.data.set(renamed, rows)?;
            if let Some(stats) = ctx.statistics() {
                stats.remove(&name);
            }
            name = renamed.clone();
            continue;
        }
        for row in collection_mut(ctx, &name, false)?.iter_mut() {
            let Value::Object(map) = row else {
                continue;
            };
            match op {
                AlterOp::AddColumn { column } => {
                    map.entry(column.name.clone())
                        .or_insert_with(|| column.default.clone().unwrap_or(Value::Null));
                }
                AlterOp::DropColumn { name } => {
                    map.remove(name);
                }
                AlterOp::RenameColumn { from, to } => {
                    if let Some(value) = map.remove(from) {
                        map.insert(to.clone(), value);
                    }
                }
                AlterOp::RenameTo { .. } => {}
            }
        }
    }
    let count = collection_mut(ctx, &name, false)?.len();
    Ok(ExecutionResult::void(count as u64).with_meta("collection", name))
}

fn drop_object(action: &Action, _input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_schema().ok_or_else(|| bad_params(action))?;
    match p.object {
        SchemaObject::Collection => match ctx.data.delete(&p.name)? {
            Some(_) => {
                if let Some(stats) = ctx.statistics() {
                    stats.remove(&p.name);
                }
                debug!(collection = %p.name, "collection dropped");
                Ok(ExecutionResult::void(1))
            }
            None if p.if_exists => Ok(ExecutionResult::void(0)),
            None => Err(unknown_collection(&p.name)),
        },
        SchemaObject::Index => {
            let dropped = ctx.statistics().is_some_and(|stats| stats.drop_index(&p.name));
            match (dropped, p.if_exists) {
                (true, _) => Ok(ExecutionResult::void(1)),
                (false, true) => Ok(ExecutionResult::void(0)),
                (false, false) => Err(QueryError::value(format!("unknown index '{}'", p.name))),
            }
        }
        SchemaObject::Vertex => Err(QueryError::unsupported(action.kind, "vertices are removed with DETACH_DELETE")),
        SchemaObject::View => Err(QueryError::unsupported(action.kind, "views are not supported")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatisticsStore;
    use quarry_core::{DataNode, JsonNode, Params, QueryOptions, SchemaParams};
    use serde_json::json;
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

    fn run_with(data: &mut JsonNode, action: &Action, stats: Option<Arc<StatisticsStore>>) -> Result<ExecutionResult> {
        let mut ctx = ExecutionContext::new(data, QueryOptions::new(), Arc::new(OperatorRegistry::with_defaults()));
        if let Some(stats) = stats {
            ctx = ctx.with_statistics(stats);
        }
        ctx.execute(action, ExecutionResult::void(0))
    }

    fn run(data: &mut JsonNode, action: &Action) -> Result<ExecutionResult> {
        run_with(data, action, None)
    }

    #[test]
    fn test_insert_rows() {
        let mut data = users();
        let result = run(&mut data, &sql("INSERT INTO users (name, age) VALUES ('Dan', 40), ('Eve', 22)")).unwrap();
        assert_eq!(result.affected_count, 2);
        assert_eq!(data.root()["users"][4], json!({"name": "Eve", "age": 22}));
    }

    #[test]
    fn test_insert_creates_collection() {
        let mut data = JsonNode::from_native(json!({}));
        run(&mut data, &sql("INSERT INTO logs (level) VALUES ('warn')")).unwrap();
        assert_eq!(data.root()["logs"], json!([{"level": "warn"}]));
    }

    #[test]
    fn test_update_sees_old_values() {
        let mut data = users();
        let result = run(&mut data, &sql("UPDATE users SET age = age + 1 WHERE name = 'Bob'")).unwrap();
        assert_eq!(result.affected_count, 1);
        assert_eq!(data.root()["users"][1]["age"], json!(26));
        assert_eq!(data.root()["users"][0]["age"], json!(30));
    }

    #[test]
    fn test_delete_with_filter() {
        let mut data = users();
        let result = run(&mut data, &sql("DELETE FROM users WHERE age < 30")).unwrap();
        assert_eq!(result.affected_count, 1);
        assert_eq!(data.root()["users"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_update_unknown_collection_fails() {
        let mut data = users();
        assert!(run(&mut data, &sql("UPDATE nobody SET age = 1")).is_err());
    }

    #[test]
    fn test_create_and_drop_table() {
        let mut data = users();
        let stats = Arc::new(StatisticsStore::new());
        let create = sql("CREATE TABLE t (id INT PRIMARY KEY)");
        run_with(&mut data, &create, Some(stats.clone())).unwrap();
        assert_eq!(data.root()["t"], json!([]));
        assert!(stats.has_index("t", "id"));
        assert!(run(&mut data, &create).is_err());

        run_with(&mut data, &sql("DROP TABLE t"), Some(stats.clone())).unwrap();
        assert!(!data.has("t"));
        assert!(!stats.is_known("t"));
        assert_eq!(run(&mut data, &sql("DROP TABLE IF EXISTS t")).unwrap().affected_count, 0);
    }

    #[test]
    fn test_create_index_registers_statistics() {
        let mut data = users();
        let stats = Arc::new(StatisticsStore::new());
        run_with(&mut data, &sql("CREATE INDEX ON users (age)"), Some(stats.clone())).unwrap();
        assert!(stats.has_index("users", "age"));
    }

    #[test]
    fn test_alter_columns_and_rename() {
        let mut data = users();
        run(&mut data, &sql("ALTER TABLE users ADD COLUMN city TEXT")).unwrap();
        assert_eq!(data.root()["users"][0]["city"], Value::Null);

        let rename = Action::new(
            ActionKind::Alter,
            Params::Schema(SchemaParams {
                name: "users".into(),
                alter: vec![
                    AlterOp::RenameColumn { from: "age".into(), to: "years".into() },
                    AlterOp::RenameTo { name: "people".into() },
                ],
                ..SchemaParams::default()
            }),
        );
        let result = run(&mut data, &rename).unwrap();
        assert_eq!(result.affected_count, 3);
        assert!(!data.has("users"));
        assert_eq!(data.root()["people"][2]["years"], json!(35));
    }

    #[test]
    fn test_merge_upserts_rows() {
        let mut data = users();
        let action = Action::new(
            ActionKind::Merge,
            Params::Write(WriteParams {
                target: "users".into(),
                columns: vec!["name".into(), "age".into()],
                rows: vec![
                    vec![Expr::lit("Bob"), Expr::lit(26)],
                    vec![Expr::lit("Dan"), Expr::lit(50)],
                ],
                key: vec!["name".into()],
                ..WriteParams::default()
            }),
        );
        let result = run(&mut data, &action).unwrap();
        assert_eq!(result.metadata["inserted"], json!(1));
        assert_eq!(result.metadata["updated"], json!(1));
        assert_eq!(data.root()["users"][1], json!({"name": "Bob", "age": 26}));
        assert_eq!(data.root()["users"][3], json!({"name": "Dan", "age": 50}));
    }

    #[test]
    fn test_cypher_merge_creates_vertex_once() {
        let mut data = JsonNode::from_native(json!({
            "nodes": [{"id": 1, "label": "Person", "name": "Alice"}],
            "edges": []
        }));
        let merge = quarry_syntax::ParserBridge::new()
            .parse("MERGE (n:Person {name: 'Zed'})", quarry_syntax::QueryFormat::Cypher)
            .unwrap()
            .action;
        run(&mut data, &merge).unwrap();
        run(&mut data, &merge).unwrap();
        let nodes = data.root()["nodes"].as_array().cloned().unwrap_or_default();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1], json!({"id": 2, "label": "Person", "name": "Zed"}));
    }

    #[test]
    fn test_views_are_unsupported() {
        let mut data = users();
        let action = Action::new(
            ActionKind::Create,
            Params::Schema(SchemaParams {
                object: SchemaObject::View,
                name: "v".into(),
                ..SchemaParams::default()
            }),
        );
        let err = run(&mut data, &action).unwrap_err();
        assert_eq!(err.kind(), quarry_core::ErrorKind::UnsupportedOperation);
    }
}
