//! Query text and JSON documents from arguments, files or stdin.

use crate::cli::QueryArg;
use anyhow::{bail, Context, Result};
use quarry_core::{DataNode, JsonNode};
use serde_json::Value;
use std::io::Read;
use std::path::Path;

const STDIN: &str = "-";

fn read_stdin() -> Result<String> {
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("failed to read stdin")?;
    Ok(buf)
}

fn is_stdin(path: &Path) -> bool {
    path.as_os_str() == STDIN
}

pub fn read_query(arg: &QueryArg) -> Result<String> {
    let text = match (&arg.query, &arg.query_file) {
        (Some(q), _) if q == STDIN => read_stdin()?,
        (Some(q), _) => q.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read query file {}", path.display()))?,
        (None, None) => bail!("no query given"),
    };
    let text = text.trim().to_string();
    if text.is_empty() {
        bail!("query is empty");
    }
    Ok(text)
}

/// Whether the query itself is read from stdin
pub fn query_uses_stdin(arg: &QueryArg) -> bool {
    arg.query.as_deref() == Some(STDIN)
}

/// The document at `path`, or an empty object
pub fn read_data(path: Option<&Path>) -> Result<JsonNode> {
    let Some(path) = path else {
        return Ok(JsonNode::from_native(Value::Object(Default::default())));
    };
    let text = if is_stdin(path) {
        read_stdin()?
    } else {
        std::fs::read_to_string(path).with_context(|| format!("failed to read data file {}", path.display()))?
    };
    let value: Value =
        serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))?;
    Ok(JsonNode::from_native(value))
}

pub fn write_data(path: &Path, data: &JsonNode) -> Result<()> {
    let text = serde_json::to_string_pretty(data.root())?;
    std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}
