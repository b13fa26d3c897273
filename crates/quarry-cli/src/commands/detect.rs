use super::Outcome;
use crate::cli::QueryArg;
use crate::input::read_query;
use anyhow::Result;
use quarry_engine::Converter;
use quarry_syntax::Detection;
use serde_json::{json, Value};

fn entry(detection: &Detection) -> Value {
    json!({
        "format": detection.format.id(),
        "name": detection.format.name(),
        "confidence": detection.confidence,
    })
}

/// Best guess, or every candidate with `all`. A guess below the configured
/// threshold is reported but fails the command.
pub fn execute(converter: &Converter, query: &QueryArg, all: bool) -> Result<Outcome> {
    let text = read_query(query)?;
    let best = converter.detect(&text);
    let confident = best.confidence >= converter.config().detector.confidence_threshold;
    if all {
        let candidates: Vec<Value> = converter.detect_candidates(&text).iter().map(entry).collect();
        return Outcome::json(&candidates, confident);
    }
    Outcome::json(&entry(&best), confident)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(text: &str) -> QueryArg {
        QueryArg {
            query: Some(text.to_string()),
            query_file: None,
            from: None,
        }
    }

    #[test]
    fn test_detects_cypher() {
        let outcome = execute(
            &Converter::default(),
            &query("MATCH (u:User)-[:FOLLOWS]->(v:User) RETURN u.name"),
            false,
        )
        .unwrap();
        assert!(outcome.success);
        let value: Value = serde_json::from_str(&outcome.output).unwrap();
        assert_eq!(value["format"], json!("cypher"));
    }

    #[test]
    fn test_lists_candidates() {
        let outcome = execute(&Converter::default(), &query("SELECT name FROM users"), true).unwrap();
        let value: Value = serde_json::from_str(&outcome.output).unwrap();
        assert_eq!(value[0]["format"], json!("sql"));
    }
}
