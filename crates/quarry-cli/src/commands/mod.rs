pub mod convert;
pub mod detect;
pub mod exec;
pub mod explain;
pub mod parse;
pub mod schema;
pub mod validate;

use crate::cli::Commands;
use anyhow::Result;
use quarry_config::QuarryConfig;
use quarry_engine::Converter;
use serde::Serialize;

/// Rendered command output and whether the process should exit cleanly
#[derive(Debug)]
pub struct Outcome {
    pub output: String,
    pub success: bool,
}

impl Outcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: true,
        }
    }

    pub fn json<T: Serialize>(value: &T, success: bool) -> Result<Self> {
        Ok(Self {
            output: serde_json::to_string_pretty(value)?,
            success,
        })
    }
}

pub fn run(command: Commands, config: QuarryConfig) -> Result<Outcome> {
    match command {
        Commands::Detect { query, all } => detect::execute(&Converter::new(config), &query, all),
        Commands::Parse { query } => parse::execute(&Converter::new(config), &query),
        Commands::Convert { query, to } => convert::execute(&Converter::new(config), &query, to),
        Commands::Exec {
            query,
            run,
            limit,
            output,
            data_only,
        } => exec::execute(
            &Converter::new(config),
            exec::ExecArgs {
                query,
                run,
                limit,
                output,
                data_only,
            },
        ),
        Commands::Validate { query } => validate::execute(&Converter::new(config), &query),
        Commands::Explain { query, run } => explain::execute(&Converter::new(config), &query, &run),
        Commands::Schema { kind } => schema::execute(kind.as_deref()),
        Commands::Formats => schema::formats(),
    }
}
