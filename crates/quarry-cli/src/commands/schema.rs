use super::Outcome;
use anyhow::{anyhow, Result};
use quarry_core::{catalog, schema_for, ActionKind};
use quarry_syntax::{output_formats, QueryFormat};
use serde_json::{json, Value};

/// One kind's schema, or the whole catalog
pub fn execute(kind: Option<&str>) -> Result<Outcome> {
    match kind {
        Some(name) => {
            let kind = ActionKind::from_name(name).ok_or_else(|| anyhow!("unknown action kind '{name}'"))?;
            Outcome::json(&schema_for(kind), true)
        }
        None => Outcome::json(&catalog(), true),
    }
}

pub fn formats() -> Result<Outcome> {
    let generated = output_formats();
    let rows: Vec<Value> = QueryFormat::ALL
        .iter()
        .map(|format| {
            json!({
                "format": format.id(),
                "name": format.name(),
                "generate": generated.contains(format),
            })
        })
        .collect();
    Outcome::json(&rows, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_kind() {
        let outcome = execute(Some("where")).unwrap();
        let value: Value = serde_json::from_str(&outcome.output).unwrap();
        assert_eq!(value["kind"], json!("WHERE"));
    }

    #[test]
    fn test_catalog_lists_every_kind() {
        let outcome = execute(None).unwrap();
        let value: Value = serde_json::from_str(&outcome.output).unwrap();
        assert_eq!(value.as_array().map(Vec::len), Some(ActionKind::ALL.len()));
    }

    #[test]
    fn test_unknown_kind() {
        assert!(execute(Some("FROBNICATE")).is_err());
    }

    #[test]
    fn test_formats_mark_sql_generated() {
        let value: Value = serde_json::from_str(&formats().unwrap().output).unwrap();
        assert_eq!(value[0]["format"], json!("sql"));
        assert_eq!(value[0]["generate"], json!(true));
    }
}
