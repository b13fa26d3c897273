//! LOAD and STORE: JSON files in and out of the data node.
//!
//! File I/O is the only blocking work an operator does, so both sides check
//! the deadline before touching the file and again once it is done.

use super::{bad_params, OperatorRegistry};
use crate::executor::ExecutionContext;
use quarry_core::value::as_rows;
use quarry_core::{Action, ActionKind, ExecutionResult, QueryError, Result, TransferParams};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::debug;

pub(super) fn register(registry: &mut OperatorRegistry) {
    registry.builtin(ActionKind::Load, load);
    registry.builtin(ActionKind::Store, store);
}

fn location(action: &Action) -> Result<&TransferParams> {
    let p = action.params.as_transfer().ok_or_else(|| bad_params(action))?;
    if p.location.trim().is_empty() {
        return Err(QueryError::validation(format!("{} without a location", action.kind)));
    }
    Ok(p)
}

/// Read a JSON document; with a collection it is stored there, otherwise
/// its rows are the result
fn load(action: &Action, _input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = location(action)?;
    ctx.checkpoint()?;
    let text = fs::read_to_string(&p.location)
        .map_err(|e| QueryError::execution(format!("cannot read '{}': {e}", p.location)))?;
    ctx.checkpoint()?;
    let document: Value = serde_json::from_str(&text)
        .map_err(|e| QueryError::format(format!("'{}' is not JSON: {e}", p.location)))?;
    debug!(location = %p.location, bytes = text.len(), "loaded");

    match &p.collection {
        Some(collection) => {
            let count = as_rows(&document).len();
            ctx.data.set(collection, document)?;
            if let Some(stats) = ctx.statistics() {
                stats.remove(collection);
            }
            Ok(ExecutionResult::void(count as u64).with_meta("collection", collection.clone()))
        }
        None => Ok(ExecutionResult::rows(as_rows(&document))),
    }
}

/// Write the input rows, or a stored collection, as pretty JSON
fn store(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = location(action)?;
    let rows = match &p.collection {
        Some(collection) => ctx
            .data
            .get(collection)
            .map(as_rows)
            .ok_or_else(|| QueryError::value(format!("unknown collection '{collection}'")))?,
        None => input.into_rows(),
    };
    let text = serde_json::to_string_pretty(&rows)
        .map_err(|e| QueryError::execution(format!("cannot serialize rows: {e}")))?;

    ctx.checkpoint()?;
    if let Some(parent) = Path::new(&p.location).parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| QueryError::execution(format!("cannot create '{}': {e}", parent.display())))?;
    }
    fs::write(&p.location, text)
        .map_err(|e| QueryError::execution(format!("cannot write '{}': {e}", p.location)))?;
    ctx.checkpoint()?;
    debug!(location = %p.location, rows = rows.len(), "stored");
    Ok(ExecutionResult::void(rows.len() as u64).with_meta("location", p.location.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{DataNode, ErrorKind, JsonNode, Params, QueryOptions};
    use serde_json::json;
    use std::sync::Arc;

    fn transfer(kind: ActionKind, location: &Path, collection: Option<&str>) -> Action {
        Action::new(
            kind,
            Params::Transfer(TransferParams {
                location: location.to_string_lossy().into_owned(),
                collection: collection.map(str::to_string),
            }),
        )
    }

    fn run(data: &mut JsonNode, action: &Action, options: QueryOptions) -> Result<ExecutionResult> {
        let mut ctx = ExecutionContext::new(data, options, Arc::new(OperatorRegistry::with_defaults()));
        ctx.execute(action, ExecutionResult::void(0))
    }

    #[test]
    fn test_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("out").join("users.json");
        let mut data = JsonNode::from_native(json!({"users": [{"name": "Alice"}, {"name": "Bob"}]}));

        let stored = run(&mut data, &transfer(ActionKind::Store, &file, Some("users")), QueryOptions::new()).unwrap();
        assert_eq!(stored.affected_count, 2);

        let mut fresh = JsonNode::from_native(json!({}));
        run(&mut fresh, &transfer(ActionKind::Load, &file, Some("people")), QueryOptions::new()).unwrap();
        assert_eq!(fresh.root()["people"], json!([{"name": "Alice"}, {"name": "Bob"}]));

        let rows = run(&mut fresh, &transfer(ActionKind::Load, &file, None), QueryOptions::new()).unwrap();
        assert_eq!(rows.row_count(), 2);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = JsonNode::from_native(json!({}));
        let err = run(&mut data, &transfer(ActionKind::Load, &dir.path().join("nope.json"), None), QueryOptions::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execution);
    }

    #[test]
    fn test_load_rejects_non_json() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bad.json");
        fs::write(&file, "not json").unwrap();
        let mut data = JsonNode::from_native(json!({}));
        let err = run(&mut data, &transfer(ActionKind::Load, &file, None), QueryOptions::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn test_expired_deadline_stops_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("late.json");
        let mut data = JsonNode::from_native(json!({"users": []}));
        let options = QueryOptions::new().with_timeout_ms(0);
        let mut ctx = ExecutionContext::new(&mut data, options, Arc::new(OperatorRegistry::with_defaults()));
        std::thread::sleep(std::time::Duration::from_millis(5));
        let err = ctx
            .execute(&transfer(ActionKind::Store, &file, Some("users")), ExecutionResult::void(0))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(!file.exists());
    }
}
