use super::Outcome;
use crate::cli::{QueryArg, RunArgs};
use crate::input::{query_uses_stdin, read_data, read_query, write_data};
use anyhow::{bail, Result};
use quarry_core::QueryOptions;
use quarry_engine::Converter;
use std::path::PathBuf;
use tracing::{info, warn};

pub struct ExecArgs {
    pub query: QueryArg,
    pub run: RunArgs,
    pub limit: Option<u64>,
    pub output: Option<PathBuf>,
    pub data_only: bool,
}

/// Configured defaults with the command-line overrides applied
pub(crate) fn run_options(converter: &Converter, query: &QueryArg, run: &RunArgs) -> QueryOptions {
    let mut options = converter.options();
    if let Some(format) = query.from {
        options = options.with_format(format.id());
    }
    if let Some(level) = run.level {
        options = options.with_optimization(level);
    }
    if let Some(timeout_ms) = run.timeout_ms {
        options = options.with_timeout_ms(timeout_ms);
    }
    options
}

pub(crate) fn check_stdin(query: &QueryArg, run: &RunArgs) -> Result<()> {
    if query_uses_stdin(query) && run.data.as_deref().is_some_and(|p| p.as_os_str() == "-") {
        bail!("the query and the data cannot both come from stdin");
    }
    Ok(())
}

pub fn execute(converter: &Converter, args: ExecArgs) -> Result<Outcome> {
    check_stdin(&args.query, &args.run)?;
    let text = read_query(&args.query)?;
    let mut data = read_data(args.run.data.as_deref())?;
    if args.run.analyze {
        let collections = converter.analyze(&data);
        info!(collections, "analyzed document");
    }

    let mut options = run_options(converter, &args.query, &args.run);
    if let Some(limit) = args.limit {
        options = options.with_limit(limit);
    }

    let result = converter.execute(&text, &mut data, &options);
    if !result.success {
        warn!(
            kind = ?result.error_kind,
            message = result.error_message.as_deref().unwrap_or_default(),
            "query failed"
        );
    } else if let Some(path) = &args.output {
        write_data(path, &data)?;
        info!(path = %path.display(), "wrote document");
    }

    if args.data_only && result.success {
        Outcome::json(&result.data, true)
    } else {
        Outcome::json(&result, result.success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_syntax::QueryFormat;
    use serde_json::{json, Value};
    use std::path::Path;

    fn args(text: &str, data: &Path, output: Option<PathBuf>) -> ExecArgs {
        ExecArgs {
            query: QueryArg {
                query: Some(text.to_string()),
                query_file: None,
                from: Some(QueryFormat::Sql),
            },
            run: RunArgs {
                data: Some(data.to_path_buf()),
                level: None,
                timeout_ms: None,
                analyze: true,
            },
            limit: None,
            output,
            data_only: false,
        }
    }

    fn users_file(dir: &Path) -> PathBuf {
        let path = dir.join("users.json");
        std::fs::write(
            &path,
            json!({"users": [{"name": "Alice", "age": 30}, {"name": "Bob", "age": 25}]}).to_string(),
        )
        .unwrap();
        path
    }

    #[test]
    fn test_exec_prints_result() {
        let dir = tempfile::tempdir().unwrap();
        let data = users_file(dir.path());
        let outcome = execute(&Converter::default(), args("SELECT name FROM users WHERE age > 26", &data, None)).unwrap();
        assert!(outcome.success);
        let value: Value = serde_json::from_str(&outcome.output).unwrap();
        assert_eq!(value["data"], json!([{"name": "Alice"}]));
        assert_eq!(value["affected_count"], json!(1));
    }

    #[test]
    fn test_writes_are_saved_to_output() {
        let dir = tempfile::tempdir().unwrap();
        let data = users_file(dir.path());
        let out = dir.path().join("after.json");
        let outcome = execute(
            &Converter::default(),
            args("DELETE FROM users WHERE age < 26", &data, Some(out.clone())),
        )
        .unwrap();
        assert!(outcome.success);
        let saved: Value = serde_json::from_str(&std::fs::read_to_string(out).unwrap()).unwrap();
        assert_eq!(saved, json!({"users": [{"name": "Alice", "age": 30}]}));
    }

    #[test]
    fn test_failure_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let data = users_file(dir.path());
        let outcome = execute(&Converter::default(), args("UPDATE nowhere_at_all SET age = 1", &data, None)).unwrap();
        assert!(!outcome.success);
        let value: Value = serde_json::from_str(&outcome.output).unwrap();
        assert_eq!(value["success"], json!(false));
    }

    #[test]
    fn test_both_stdin_rejected() {
        let mut bad = args("-", Path::new("-"), None);
        bad.query.query = Some("-".into());
        assert!(execute(&Converter::default(), bad).is_err());
    }
}
