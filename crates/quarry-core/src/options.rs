//! Per-call execution options.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Leniency knob for parser, generator and executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversionMode {
    /// Fail on the first unsupported construct or coercion failure
    Strict,
    /// Substitute the closest representable action, coerce types
    #[default]
    Flexible,
    /// Flexible, and child errors are recorded instead of raised
    Lenient,
}

impl ConversionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversionMode::Strict => "STRICT",
            ConversionMode::Flexible => "FLEXIBLE",
            ConversionMode::Lenient => "LENIENT",
        }
    }

    /// Whether string/number coercion is allowed
    pub fn coerces(self) -> bool {
        self != ConversionMode::Strict
    }
}

impl FromStr for ConversionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STRICT" => Ok(ConversionMode::Strict),
            "FLEXIBLE" => Ok(ConversionMode::Flexible),
            "LENIENT" => Ok(ConversionMode::Lenient),
            other => Err(format!("unknown conversion mode '{other}'")),
        }
    }
}

impl fmt::Display for ConversionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How many rewrite rules the optimizer applies
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptimizationLevel {
    None,
    /// Pushdowns only
    Basic,
    /// Pushdowns and index selection
    #[default]
    Standard,
    /// Every registered rule
    Aggressive,
}

impl OptimizationLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            OptimizationLevel::None => "NONE",
            OptimizationLevel::Basic => "BASIC",
            OptimizationLevel::Standard => "STANDARD",
            OptimizationLevel::Aggressive => "AGGRESSIVE",
        }
    }
}

impl FromStr for OptimizationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(OptimizationLevel::None),
            "BASIC" => Ok(OptimizationLevel::Basic),
            "STANDARD" => Ok(OptimizationLevel::Standard),
            "AGGRESSIVE" => Ok(OptimizationLevel::Aggressive),
            other => Err(format!("unknown optimization level '{other}'")),
        }
    }
}

impl fmt::Display for OptimizationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared flag checked before every node invocation.
///
/// Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Options accepted by execute/convert/validate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Global cap on rows in the final result
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default)]
    pub conversion_mode: ConversionMode,
    #[serde(default)]
    pub optimization_level: OptimizationLevel,
    #[serde(default = "default_auto_detect")]
    pub auto_detect: bool,
    /// Source format; overrides detection when set
    #[serde(default)]
    pub format: Option<String>,
    #[serde(skip)]
    pub cancel: Option<CancellationToken>,
}

/// Default tree-walk and parse depth cap
pub const DEFAULT_MAX_DEPTH: usize = 1000;

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_auto_detect() -> bool {
    true
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            limit: None,
            max_depth: DEFAULT_MAX_DEPTH,
            conversion_mode: ConversionMode::default(),
            optimization_level: OptimizationLevel::default(),
            auto_detect: true,
            format: None,
            cancel: None,
        }
    }
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: ConversionMode) -> Self {
        self.conversion_mode = mode;
        self
    }

    pub fn with_optimization(mut self, level: OptimizationLevel) -> Self {
        self.optimization_level = level;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = QueryOptions::default();
        assert_eq!(opts.max_depth, 1000);
        assert_eq!(opts.conversion_mode, ConversionMode::Flexible);
        assert_eq!(opts.optimization_level, OptimizationLevel::Standard);
        assert!(opts.auto_detect);
        assert!(!opts.is_cancelled());
    }

    #[test]
    fn test_cancellation_is_shared() {
        let token = CancellationToken::new();
        let opts = QueryOptions::new().with_cancellation(token.clone());
        token.cancel();
        assert!(opts.is_cancelled());
    }

    #[test]
    fn test_levels_are_ordered() {
        assert!(OptimizationLevel::Basic < OptimizationLevel::Standard);
        assert_eq!("aggressive".parse(), Ok(OptimizationLevel::Aggressive));
        assert_eq!("lenient".parse(), Ok(ConversionMode::Lenient));
        assert!("sloppy".parse::<ConversionMode>().is_err());
    }
}
