//! # Quarry Configuration
//!
//! Layered configuration for the quarry engine: built-in defaults, then an
//! optional TOML file, then `QUARRY_<SECTION>_<KEY>` environment variables.
//!
//! ```rust,no_run
//! use quarry_config::QuarryConfig;
//!
//! let config = QuarryConfig::load(Some("quarry.toml".as_ref()))?;
//! let options = config.query_options();
//! # Ok::<(), quarry_config::ConfigError>(())
//! ```

mod config;
mod error;
mod loader;

pub use config::*;
pub use error::ConfigError;
pub use loader::ENV_PREFIX;
