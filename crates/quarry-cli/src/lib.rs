//! Command-line front end: argument parsing, input loading and one module
//! per subcommand. Commands render to a `String` so they can be tested
//! without a terminal.

pub mod cli;
pub mod commands;
pub mod input;
