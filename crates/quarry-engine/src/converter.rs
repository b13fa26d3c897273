//! Converter facade
//!
//! One entry point over the whole pipeline: detect (unless the caller names
//! the format), parse, plan, optimize, cache and execute, or parse and
//! generate text in another language.

use crate::cache::{fingerprint, CacheStats, PlanCache};
use crate::executor::{effective_kind, Executor};
use crate::operators::OperatorRegistry;
use crate::optimizer::Optimizer;
use crate::plan::{PhysicalPlan, Planner};
use crate::stats::StatisticsStore;
use quarry_config::QuarryConfig;
use quarry_core::{
    Action, ConversionMode, DataNode, ErrorRecord, ExecutionResult, OptimizationLevel, QueryError,
    QueryOptions, Result,
};
use quarry_syntax::{Detection, FormatDetector, Generator, ParseOutcome, ParserBridge, QueryFormat};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of [`Converter::validate`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub format: Option<QueryFormat>,
    pub errors: Vec<ErrorRecord>,
    pub warnings: Vec<String>,
}

/// Text-in, result-or-text-out facade.
///
/// Holds the pieces that outlive a single call: configuration, statistics,
/// the plan cache and the operator registry. Each call builds its own
/// execution context, so one converter can serve concurrent callers.
pub struct Converter {
    config: Arc<QuarryConfig>,
    detector: FormatDetector,
    stats: Arc<StatisticsStore>,
    planner: Planner,
    optimizer: Optimizer,
    cache: Option<PlanCache>,
    executor: Executor,
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Default for Converter {
    fn default() -> Self {
        Self::new(QuarryConfig::default())
    }
}

impl Converter {
    pub fn new(config: QuarryConfig) -> Self {
        Self::with_registry(config, Arc::new(OperatorRegistry::with_defaults()))
    }

    /// Converter running a custom operator registry
    pub fn with_registry(config: QuarryConfig, registry: Arc<OperatorRegistry>) -> Self {
        let stats = Arc::new(StatisticsStore::new());
        let cache = config
            .cache
            .enabled
            .then(|| PlanCache::new(config.cache.capacity));
        let executor = Executor::new(registry)
            .with_statistics(Arc::clone(&stats))
            .with_max_result_size(config.execution.max_result_size)
            .with_slow_query_threshold_ms(config.execution.slow_query_threshold_ms);
        Self {
            detector: FormatDetector::new(config.detector.confidence_threshold),
            planner: Planner::new(Arc::clone(&stats)),
            optimizer: Optimizer::new(Arc::clone(&stats))
                .with_max_iterations(config.optimizer.max_iterations),
            config: Arc::new(config),
            stats,
            cache,
            executor,
        }
    }

    pub fn config(&self) -> &QuarryConfig {
        &self.config
    }

    /// Per-call defaults from the configuration
    pub fn options(&self) -> QueryOptions {
        self.config.query_options()
    }

    pub fn statistics(&self) -> &Arc<StatisticsStore> {
        &self.stats
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(PlanCache::stats)
    }

    /// Drop one cached plan
    pub fn invalidate(&self, fingerprint: &str) -> bool {
        self.cache.as_ref().is_some_and(|c| c.invalidate(fingerprint))
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    /// Collect statistics for every collection of `data`; cached plans were
    /// costed without them and are dropped
    pub fn analyze(&self, data: &dyn DataNode) -> usize {
        let analyzed = self.stats.analyze_node(data);
        self.clear_cache();
        analyzed
    }

    // ------------------------------------------------------------------------
    // Text front end
    // ------------------------------------------------------------------------

    pub fn detect(&self, text: &str) -> Detection {
        self.detector.detect(text)
    }

    pub fn detect_candidates(&self, text: &str) -> Vec<Detection> {
        self.detector.detect_with_candidates(text)
    }

    /// Format named by `options`, else the detected one
    pub fn resolve_format(&self, text: &str, options: &QueryOptions) -> Result<QueryFormat> {
        if let Some(name) = &options.format {
            return QueryFormat::from_name(name)
                .ok_or_else(|| QueryError::UnsupportedFormat { format: name.clone() });
        }
        if !options.auto_detect {
            return Err(QueryError::validation("no source format given and detection is off"));
        }
        let detection = self.detector.detect(text);
        debug!(
            format = detection.format.id(),
            confidence = detection.confidence,
            "detected query format"
        );
        Ok(detection.format)
    }

    fn bridge(&self, options: &QueryOptions) -> ParserBridge {
        ParserBridge::from_options(options)
            .with_max_statement_length(self.config.parser.max_statement_length)
    }

    pub fn parse(&self, text: &str, format: QueryFormat, options: &QueryOptions) -> Result<ParseOutcome> {
        self.bridge(options).parse(text, format)
    }

    // ------------------------------------------------------------------------
    // Planning
    // ------------------------------------------------------------------------

    /// Optimized plan for `action` over data of this shape, from the cache
    /// when possible
    pub fn plan(&self, action: &Action, data: &dyn DataNode, level: OptimizationLevel) -> Arc<PhysicalPlan> {
        let key = fingerprint(action, level, &data.signature());
        if let Some(plan) = self.cache.as_ref().and_then(|c| c.get(&key)) {
            return plan;
        }

        let outcome = self.optimizer.optimize(self.planner.logical(action), level);
        let mut plan = self.planner.physicalize(outcome.plan, key, level);
        plan.passes = outcome.passes;
        plan.applied_rules = outcome.applied;
        debug!(
            fingerprint = %plan.fingerprint,
            passes = plan.passes,
            rules = ?plan.applied_rules,
            est_cost = plan.est_cost(),
            "planned"
        );

        let plan = Arc::new(plan);
        if let Some(cache) = &self.cache {
            cache.insert(Arc::clone(&plan));
        }
        plan
    }

    // ------------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------------

    /// Run query text against `data`. Failures come back on the result.
    pub fn execute(&self, text: &str, data: &mut dyn DataNode, options: &QueryOptions) -> ExecutionResult {
        let parsed = self
            .resolve_format(text, options)
            .and_then(|format| self.parse(text, format, options).map(|p| (format, p)));
        let (format, outcome) = match parsed {
            Ok(parsed) => parsed,
            Err(err) => {
                debug!(error = %err, "query rejected before execution");
                return ExecutionResult::failure(&err);
            }
        };

        let mut result = self.execute_action(&outcome.action, data, options);
        result
            .metadata
            .insert("format".into(), Value::from(format.id()));
        if !outcome.warnings.is_empty() {
            result
                .metadata
                .insert("warnings".into(), Value::from(outcome.warnings));
        }
        result
    }

    /// Run an already-built action tree
    pub fn execute_action(&self, action: &Action, data: &mut dyn DataNode, options: &QueryOptions) -> ExecutionResult {
        let plan = self.plan(action, &*data, options.optimization_level);
        let result = self.executor.execute(action, data, options, Some(&plan));
        if result.success && effective_kind(action).is_ddl() {
            info!(kind = %effective_kind(action), "schema changed, dropping cached plans");
            self.clear_cache();
        }
        result
    }

    /// Translate `text` into `to`. The source format is detected unless
    /// given; translating into the same format returns the input.
    pub fn convert(
        &self,
        text: &str,
        from: Option<QueryFormat>,
        to: QueryFormat,
        options: &QueryOptions,
    ) -> Result<String> {
        let from = match from {
            Some(format) => format,
            None => self.resolve_format(text, options)?,
        };
        if from == to {
            return Ok(text.to_string());
        }
        let outcome = self.parse(text, from, options)?;
        let generated = Generator::for_format(to)?
            .with_mode(options.conversion_mode)
            .generate(&outcome.action)?;
        debug!(from = from.id(), to = to.id(), "converted");
        Ok(generated)
    }

    /// Parse in STRICT mode and report every problem
    pub fn validate(&self, text: &str, format: Option<QueryFormat>) -> ValidationReport {
        let options = self.options().with_mode(ConversionMode::Strict);
        let format = match format.map_or_else(|| self.resolve_format(text, &options), Ok) {
            Ok(format) => format,
            Err(err) => {
                return ValidationReport {
                    valid: false,
                    format: None,
                    errors: vec![ErrorRecord::from(&err)],
                    warnings: Vec::new(),
                }
            }
        };
        match self.parse(text, format, &options) {
            Ok(outcome) => ValidationReport {
                valid: true,
                format: Some(format),
                errors: Vec::new(),
                warnings: outcome.warnings,
            },
            Err(err) => ValidationReport {
                valid: false,
                format: Some(format),
                errors: vec![ErrorRecord::from(&err)],
                warnings: Vec::new(),
            },
        }
    }

    /// The optimized physical plan for `text` over `data`, as an indented tree
    pub fn explain(&self, text: &str, data: &dyn DataNode, options: &QueryOptions) -> Result<String> {
        let format = self.resolve_format(text, options)?;
        let outcome = self.parse(text, format, options)?;
        let plan = self.plan(&outcome.action, data, options.optimization_level);
        let mut out = format!(
            "format: {}\nlevel: {}\nfingerprint: {}\npasses: {}\n",
            format.id(),
            plan.level.as_str(),
            plan.fingerprint,
            plan.passes
        );
        if !plan.applied_rules.is_empty() {
            out.push_str(&format!("rules: {}\n", plan.applied_rules.join(", ")));
        }
        out.push_str(&plan.explain());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{ErrorKind, JsonNode};
    use serde_json::json;

    fn users() -> JsonNode {
        JsonNode::from_native(json!({"users": [
            {"name": "Alice", "age": 30},
            {"name": "Bob", "age": 25},
            {"name": "Charlie", "age": 35}
        ]}))
    }

    #[test]
    fn test_execute_detects_and_runs() {
        let converter = Converter::default();
        let mut data = users();
        let result = converter.execute(
            "SELECT name FROM users WHERE age > 28",
            &mut data,
            &converter.options(),
        );
        assert!(result.success, "{:?}", result.error_message);
        assert_eq!(result.data, json!([{"name": "Alice"}, {"name": "Charlie"}]));
        assert_eq!(result.metadata["format"], json!("sql"));
        assert!(result.metadata.contains_key("plan_fingerprint"));
    }

    #[test]
    fn test_parse_failure_is_reported_on_result() {
        let converter = Converter::default();
        let mut data = users();
        let options = converter.options().with_format("sql");
        let result = converter.execute("SELECT FROM WHERE", &mut data, &options);
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Parse));
    }

    #[test]
    fn test_unknown_format_name() {
        let converter = Converter::default();
        let options = converter.options().with_format("cobol");
        let err = converter.resolve_format("SELECT 1", &options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    }

    #[test]
    fn test_same_format_convert_is_identity() {
        let converter = Converter::default();
        let text = "select  name from users";
        let out = converter
            .convert(text, Some(QueryFormat::Sql), QueryFormat::Sql, &converter.options())
            .unwrap();
        assert_eq!(out, text);
    }

    #[test]
    fn test_plan_cache_hit_on_repeat() {
        let converter = Converter::default();
        let mut data = users();
        let options = converter.options();
        converter.execute("SELECT name FROM users WHERE age > 28", &mut data, &options);
        converter.execute("SELECT name FROM users WHERE age > 40", &mut data, &options);
        let stats = converter.cache_stats().unwrap();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn test_ddl_clears_cache() {
        let converter = Converter::default();
        let mut data = users();
        let options = converter.options();
        converter.execute("SELECT name FROM users", &mut data, &options);
        assert_eq!(converter.cache_stats().unwrap().size, 1);
        let result = converter.execute("CREATE TABLE logs (id INT)", &mut data, &options);
        assert!(result.success);
        assert_eq!(converter.cache_stats().unwrap().size, 0);
    }

    #[test]
    fn test_disabled_cache() {
        let mut config = QuarryConfig::default();
        config.cache.enabled = false;
        let converter = Converter::new(config);
        assert!(converter.cache_stats().is_none());
        assert!(!converter.invalidate("anything"));
    }

    #[test]
    fn test_validate_reports_errors() {
        let converter = Converter::default();
        assert!(converter.validate("SELECT name FROM users", Some(QueryFormat::Sql)).valid);
        let report = converter.validate("SELECT name FROM", Some(QueryFormat::Sql));
        assert!(!report.valid);
        assert_eq!(report.errors[0].kind, ErrorKind::Parse);
    }

    #[test]
    fn test_statement_length_limit() {
        let mut config = QuarryConfig::default();
        config.parser.max_statement_length = 10;
        let converter = Converter::new(config);
        let report = converter.validate("SELECT name FROM users", Some(QueryFormat::Sql));
        assert_eq!(report.errors[0].kind, ErrorKind::Security);
    }

    #[test]
    fn test_explain_names_level_and_tree() {
        let converter = Converter::default();
        let data = users();
        let text = converter
            .explain("SELECT name FROM users WHERE age > 28", &data, &converter.options())
            .unwrap();
        assert!(text.contains("level: STANDARD"));
        assert!(text.contains("SCAN"));
    }
}
