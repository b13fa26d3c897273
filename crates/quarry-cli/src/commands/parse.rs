use super::Outcome;
use crate::cli::QueryArg;
use crate::input::read_query;
use anyhow::Result;
use quarry_engine::Converter;
use serde_json::json;

/// Print the action tree; LENIENT warnings ride along
pub fn execute(converter: &Converter, query: &QueryArg) -> Result<Outcome> {
    let text = read_query(query)?;
    let mut options = converter.options();
    if let Some(format) = query.from {
        options = options.with_format(format.id());
    }
    let format = converter.resolve_format(&text, &options)?;
    let outcome = converter.parse(&text, format, &options)?;
    Outcome::json(
        &json!({
            "format": format.id(),
            "action": outcome.action,
            "warnings": outcome.warnings,
        }),
        true,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_syntax::QueryFormat;
    use serde_json::Value;

    #[test]
    fn test_parse_prints_tree() {
        let arg = QueryArg {
            query: Some("SELECT name FROM users WHERE age > 1".into()),
            query_file: None,
            from: Some(QueryFormat::Sql),
        };
        let outcome = execute(&Converter::default(), &arg).unwrap();
        let value: Value = serde_json::from_str(&outcome.output).unwrap();
        assert_eq!(value["format"], json!("sql"));
        assert_eq!(value["action"]["kind"], json!("SELECT"));
    }

    #[test]
    fn test_parse_error_propagates() {
        let arg = QueryArg {
            query: Some("SELECT FROM".into()),
            query_file: None,
            from: Some(QueryFormat::Sql),
        };
        assert!(execute(&Converter::default(), &arg).is_err());
    }
}
