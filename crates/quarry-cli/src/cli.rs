use clap::{Args, Parser, Subcommand, ValueEnum};
use quarry_core::{ConversionMode, OptimizationLevel};
use quarry_syntax::QueryFormat;
use std::path::PathBuf;
use tracing_subscriber::filter::LevelFilter;

/// Log level options for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// No logging output
    Off,
    /// Error messages only
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Trace-level messages (most verbose)
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "quarry")]
#[command(about = "quarry - translate and run queries across SQL, Cypher, GraphQL, XPath and more")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Set log level (off, error, warn, info, debug, trace).
    /// `RUST_LOG` wins when set; the default is 'warn'
    #[arg(short = 'l', long, global = true, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Enable verbose logging (shortcut for --log-level=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file path (TOML); `QUARRY_*` variables override it
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Conversion mode (strict, flexible, lenient)
    #[arg(short, long, global = true)]
    pub mode: Option<ConversionMode>,
}

impl Cli {
    /// Effective log filter: explicit level, then --verbose, then warn
    pub fn level_filter(&self) -> LevelFilter {
        match (self.log_level, self.verbose) {
            (Some(level), _) => level.into(),
            (None, true) => LevelFilter::DEBUG,
            (None, false) => LevelFilter::WARN,
        }
    }
}

/// Query text given inline, as `-` for stdin, or from a file
#[derive(Debug, Clone, Args)]
pub struct QueryArg {
    /// Query text, or `-` to read it from stdin
    #[arg(required_unless_present = "query_file")]
    pub query: Option<String>,

    /// Read the query from a file
    #[arg(long = "query-file", conflicts_with = "query")]
    pub query_file: Option<PathBuf>,

    /// Input format; detected when omitted
    #[arg(short, long)]
    pub from: Option<QueryFormat>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Detect the format of a query
    Detect {
        #[command(flatten)]
        query: QueryArg,

        /// List every candidate with its confidence
        #[arg(short, long)]
        all: bool,
    },

    /// Parse a query and print its action tree as JSON
    Parse {
        #[command(flatten)]
        query: QueryArg,
    },

    /// Translate a query into another format
    Convert {
        #[command(flatten)]
        query: QueryArg,

        /// Output format
        #[arg(short, long)]
        to: QueryFormat,
    },

    /// Run a query against a JSON document
    Exec {
        #[command(flatten)]
        query: QueryArg,

        #[command(flatten)]
        run: RunArgs,

        /// Cap on returned rows
        #[arg(long)]
        limit: Option<u64>,

        /// Write the (possibly modified) document here after the query
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print only the result data instead of the full result
        #[arg(long)]
        data_only: bool,
    },

    /// Check a query in strict mode and report every problem
    Validate {
        #[command(flatten)]
        query: QueryArg,
    },

    /// Print the optimized plan for a query
    Explain {
        #[command(flatten)]
        query: QueryArg,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Describe action kinds: parameters, children and result shape
    Schema {
        /// Kind name, e.g. SELECT; all kinds when omitted
        kind: Option<String>,
    },

    /// List supported formats and whether they can be generated
    Formats,
}

/// Data and planning options shared by exec and explain
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// JSON document to query, or `-` for stdin; an empty object when omitted
    #[arg(short, long)]
    pub data: Option<PathBuf>,

    /// Optimization level (none, basic, standard, aggressive)
    #[arg(long)]
    pub level: Option<OptimizationLevel>,

    /// Abort after this many milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Collect table statistics from the document before planning
    #[arg(long)]
    pub analyze: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_args() {
        let cli = Cli::try_parse_from(["quarry", "convert", "SELECT * FROM t", "--to", "cypher", "-f", "sql"]).unwrap();
        match cli.command {
            Commands::Convert { query, to } => {
                assert_eq!(query.query.as_deref(), Some("SELECT * FROM t"));
                assert_eq!(query.from, Some(QueryFormat::Sql));
                assert_eq!(to, QueryFormat::Cypher);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        assert!(Cli::try_parse_from(["quarry", "convert", "q", "--to", "cobol"]).is_err());
    }

    #[test]
    fn test_query_or_file_required() {
        assert!(Cli::try_parse_from(["quarry", "parse"]).is_err());
        assert!(Cli::try_parse_from(["quarry", "parse", "--query-file", "q.sql"]).is_ok());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from(["quarry", "exec", "SELECT 1", "--mode", "lenient", "-v", "--level", "none"])
            .unwrap();
        assert_eq!(cli.mode, Some(ConversionMode::Lenient));
        assert_eq!(cli.level_filter(), LevelFilter::DEBUG);
        match cli.command {
            Commands::Exec { run, .. } => assert_eq!(run.level, Some(OptimizationLevel::None)),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_default_log_level() {
        let cli = Cli::try_parse_from(["quarry", "formats"]).unwrap();
        assert_eq!(cli.level_filter(), LevelFilter::WARN);
        let quiet = Cli::try_parse_from(["quarry", "-l", "off", "formats"]).unwrap();
        assert_eq!(quiet.level_filter(), LevelFilter::OFF);
    }
}
