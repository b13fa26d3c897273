use super::exec::{check_stdin, run_options};
use super::Outcome;
use crate::cli::{QueryArg, RunArgs};
use crate::input::{read_data, read_query};
use anyhow::Result;
use quarry_engine::Converter;

pub fn execute(converter: &Converter, query: &QueryArg, run: &RunArgs) -> Result<Outcome> {
    check_stdin(query, run)?;
    let text = read_query(query)?;
    let data = read_data(run.data.as_deref())?;
    if run.analyze {
        converter.analyze(&data);
    }
    let plan = converter.explain(&text, &data, &run_options(converter, query, run))?;
    Ok(Outcome::ok(plan))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::OptimizationLevel;

    #[test]
    fn test_explain_names_level_and_scan() {
        let query = QueryArg {
            query: Some("SELECT name FROM users WHERE age > 1".into()),
            query_file: None,
            from: None,
        };
        let run = RunArgs {
            data: None,
            level: Some(OptimizationLevel::Aggressive),
            timeout_ms: None,
            analyze: false,
        };
        let outcome = execute(&Converter::default(), &query, &run).unwrap();
        assert!(outcome.output.contains("level: AGGRESSIVE"));
        assert!(outcome.output.contains("SCAN"));
    }
}
