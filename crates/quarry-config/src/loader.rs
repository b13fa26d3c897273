//! Loading: defaults, then TOML file, then environment.

use crate::config::QuarryConfig;
use crate::error::ConfigError;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Prefix of environment overrides, e.g. `QUARRY_CACHE_CAPACITY`
pub const ENV_PREFIX: &str = "QUARRY_";

impl QuarryConfig {
    /// Load from an optional file and the process environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded configuration file");
        Ok(config)
    }

    /// Defaults overlaid with the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(std::env::vars())
    }

    /// Apply `QUARRY_*` pairs from any source. Unknown keys are ignored.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref());
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let applied = self.apply_one(key, &name.to_ascii_uppercase(), value)?;
            if applied {
                debug!(key, value, "applied environment override");
            }
        }
        Ok(())
    }

    fn apply_one(&mut self, key: &str, name: &str, value: &str) -> Result<bool, ConfigError> {
        match name {
            "EXECUTION_MAX_DEPTH" => self.execution.max_depth = parse(key, value)?,
            "EXECUTION_TIMEOUT_MS" => {
                self.execution.timeout_ms = match value.trim() {
                    "" | "none" => None,
                    v => Some(parse(key, v)?),
                }
            }
            "EXECUTION_MAX_RESULT_SIZE" => self.execution.max_result_size = parse(key, value)?,
            "EXECUTION_SLOW_QUERY_THRESHOLD_MS" => {
                self.execution.slow_query_threshold_ms = parse(key, value)?
            }
            "EXECUTION_CONVERSION_MODE" => self.execution.conversion_mode = parse(key, value)?,
            "PARSER_MAX_STATEMENT_LENGTH" => {
                self.parser.max_statement_length = parse(key, value)?
            }
            "OPTIMIZER_LEVEL" => self.optimizer.level = parse(key, value)?,
            "OPTIMIZER_MAX_ITERATIONS" => self.optimizer.max_iterations = parse(key, value)?,
            "CACHE_ENABLED" => self.cache.enabled = parse_bool(key, value)?,
            "CACHE_CAPACITY" => self.cache.capacity = parse(key, value)?,
            "DETECTOR_CONFIDENCE_THRESHOLD" => {
                self.detector.confidence_threshold = parse(key, value)?
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnv {
            key: key.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{ConversionMode, OptimizationLevel};
    use std::io::Write;
    use test_case::test_case;

    #[test]
    fn test_from_file_partial_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[cache]\ncapacity = 16\n\n[execution]\nconversion_mode = \"LENIENT\""
        )
        .unwrap();
        let config = QuarryConfig::from_file(file.path()).unwrap();
        assert_eq!(config.cache.capacity, 16);
        assert!(config.cache.enabled);
        assert_eq!(config.execution.conversion_mode, ConversionMode::Lenient);
        assert_eq!(config.execution.max_depth, 1000);
    }

    #[test]
    fn test_from_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[cache\ncapacity = ").unwrap();
        let err = QuarryConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = QuarryConfig::from_file(Path::new("/nonexistent/quarry.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = QuarryConfig::default();
        config
            .apply_overrides([
                ("QUARRY_CACHE_CAPACITY", "32"),
                ("QUARRY_OPTIMIZER_LEVEL", "aggressive"),
                ("QUARRY_EXECUTION_TIMEOUT_MS", "500"),
                ("QUARRY_CACHE_ENABLED", "off"),
                ("HOME", "/root"),
                ("QUARRY_UNKNOWN_KEY", "x"),
            ])
            .unwrap();
        assert_eq!(config.cache.capacity, 32);
        assert!(!config.cache.enabled);
        assert_eq!(config.optimizer.level, OptimizationLevel::Aggressive);
        assert_eq!(config.execution.timeout_ms, Some(500));
    }

    #[test_case("QUARRY_CACHE_CAPACITY", "many"; "non numeric")]
    #[test_case("QUARRY_CACHE_ENABLED", "perhaps"; "non boolean")]
    #[test_case("QUARRY_EXECUTION_CONVERSION_MODE", "sloppy"; "unknown mode")]
    fn test_invalid_override(key: &str, value: &str) {
        let mut config = QuarryConfig::default();
        let err = config.apply_overrides([(key, value)]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }
}
