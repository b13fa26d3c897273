use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use quarry_cli::{cli::Cli, commands};
use quarry_config::QuarryConfig;

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over the flags
    let env_filter = EnvFilter::builder()
        .with_default_directive(cli.level_filter().into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = QuarryConfig::load(cli.config.as_deref())?;
    if let Some(mode) = cli.mode {
        config.execution.conversion_mode = mode;
    }
    debug!(?config, "configuration loaded");

    let outcome = commands::run(cli.command, config)?;
    println!("{}", outcome.output);
    Ok(if outcome.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
