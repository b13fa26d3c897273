//! Argument vectors through to rendered output.

use clap::Parser;
use quarry_cli::cli::Cli;
use quarry_cli::commands::{self, Outcome};
use quarry_config::QuarryConfig;
use serde_json::{json, Value};

fn run(args: &[&str]) -> Outcome {
    let cli = Cli::try_parse_from(args).unwrap();
    let mut config = QuarryConfig::default();
    if let Some(mode) = cli.mode {
        config.execution.conversion_mode = mode;
    }
    commands::run(cli.command, config).unwrap()
}

#[test]
fn test_exec_against_file() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("staff.json");
    std::fs::write(&data, json!({"staff": [{"dept": "A"}, {"dept": "A"}, {"dept": "B"}]}).to_string()).unwrap();

    let outcome = run(&[
        "quarry",
        "exec",
        "SELECT dept, COUNT(*) FROM staff GROUP BY dept HAVING COUNT(*)>1",
        "--data",
        data.to_str().unwrap(),
        "--data-only",
    ]);
    assert!(outcome.success);
    let value: Value = serde_json::from_str(&outcome.output).unwrap();
    assert_eq!(value, json!([{"dept": "A", "count": 2}]));
}

#[test]
fn test_strict_mode_flag_reaches_execution() {
    let outcome = run(&["quarry", "--mode", "strict", "exec", "SELECT name FROM missing"]);
    assert!(!outcome.success);

    let flexible = run(&["quarry", "exec", "SELECT name FROM missing", "--data-only"]);
    assert!(flexible.success);
    assert_eq!(flexible.output, "[]");
}

#[test]
fn test_convert_round_trip_through_xpath() {
    let xpath = run(&["quarry", "convert", "SELECT name FROM users WHERE age > 18", "--to", "xpath"]);
    assert_eq!(xpath.output, "//users/user[age>18]/name");
    let back = run(&["quarry", "convert", &xpath.output, "--from", "xpath", "--to", "sql"]);
    assert!(back.output.starts_with("SELECT"), "{}", back.output);
}

#[test]
fn test_validate_reports_failure() {
    let outcome = run(&["quarry", "validate", "SELECT FROM WHERE", "--from", "sql"]);
    assert!(!outcome.success);
    let report: Value = serde_json::from_str(&outcome.output).unwrap();
    assert_eq!(report["valid"], json!(false));
    assert!(report["errors"].as_array().is_some_and(|e| !e.is_empty()));
}
