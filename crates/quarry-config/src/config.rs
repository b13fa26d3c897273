//! Configuration sections and their defaults.

use crate::error::ConfigError;
use quarry_core::{ConversionMode, OptimizationLevel, QueryOptions};
use serde::{Deserialize, Serialize};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarryConfig {
    pub execution: ExecutionConfig,
    pub parser: ParserConfig,
    pub optimizer: OptimizerConfig,
    pub cache: CacheConfig,
    pub detector: DetectorConfig,
}

/// Executor limits and defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub max_depth: usize,
    pub timeout_ms: Option<u64>,
    /// Rows materialised before a LIMIT error is raised
    pub max_result_size: usize,
    pub slow_query_threshold_ms: u64,
    pub conversion_mode: ConversionMode,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_depth: 1000,
            timeout_ms: None,
            max_result_size: 1_000_000,
            slow_query_threshold_ms: 1000,
            conversion_mode: ConversionMode::Flexible,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Longer input is rejected as a security violation
    pub max_statement_length: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_statement_length: 100_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub level: OptimizationLevel,
    pub max_iterations: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            level: OptimizationLevel::Standard,
            max_iterations: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub confidence_threshold: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.8,
        }
    }
}

impl QuarryConfig {
    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(field: &'static str, value: usize) -> Result<(), ConfigError> {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
            Ok(())
        }

        positive("execution.max_depth", self.execution.max_depth)?;
        positive("execution.max_result_size", self.execution.max_result_size)?;
        positive("parser.max_statement_length", self.parser.max_statement_length)?;
        positive("optimizer.max_iterations", self.optimizer.max_iterations)?;
        if self.cache.enabled {
            positive("cache.capacity", self.cache.capacity)?;
        }
        if self.execution.timeout_ms == Some(0) {
            return Err(ConfigError::Invalid {
                field: "execution.timeout_ms",
                reason: "must be greater than zero when set".to_string(),
            });
        }
        let threshold = self.detector.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid {
                field: "detector.confidence_threshold",
                reason: format!("{threshold} is outside [0, 1]"),
            });
        }
        Ok(())
    }

    /// Per-call defaults derived from this configuration
    pub fn query_options(&self) -> QueryOptions {
        QueryOptions::from(self)
    }
}

impl From<&QuarryConfig> for QueryOptions {
    fn from(config: &QuarryConfig) -> Self {
        let mut options = QueryOptions::new()
            .with_mode(config.execution.conversion_mode)
            .with_optimization(config.optimizer.level)
            .with_max_depth(config.execution.max_depth);
        options.timeout_ms = config.execution.timeout_ms;
        options
    }
}
