//! Tree-walking executor.
//!
//! [`ExecutionContext`] carries everything one `execute()` call needs: the
//! data node, bindings, options, soft errors and the plan hints. Nodes are
//! evaluated depth first. Children of the same parent form a pipeline where
//! child `i` receives child `i - 1`'s output, and a void output passes the
//! previous value through unchanged.

use crate::cost::JoinAlgorithm;
use crate::eval::{Evaluator, Scope};
use crate::operators::OperatorRegistry;
use crate::plan::{PhysicalPlan, PlanHints};
use crate::stats::StatisticsStore;
use quarry_core::value::as_rows;
use quarry_core::{
    Action, ActionId, ActionKind, ConversionMode, DataNode, ErrorRecord, ExecutionResult,
    ExecutionState, Expr, QueryError, QueryOptions, ResultShape, Result,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

pub const DEFAULT_MAX_RESULT_SIZE: usize = 1_000_000;
pub const DEFAULT_SLOW_QUERY_THRESHOLD_MS: u64 = 1000;

/// Summary of a child's result, kept in its parent's scratch area
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChildRecord {
    /// `child_<index>_<kind>`
    pub key: String,
    pub shape: ResultShape,
    pub rows: usize,
    pub success: bool,
}

/// Per-call execution state
pub struct ExecutionContext<'a> {
    pub data: &'a mut dyn DataNode,
    /// LET / FOR / WITH bindings
    pub bindings: Map<String, Value>,
    pub options: QueryOptions,
    /// Soft errors recorded in LENIENT mode
    pub errors: Vec<ErrorRecord>,
    /// Source aliases valid for the expressions being evaluated
    pub qualifiers: Vec<String>,
    registry: Arc<OperatorRegistry>,
    hints: PlanHints,
    stats: Option<Arc<StatisticsStore>>,
    started: Instant,
    depth: usize,
    max_result_size: usize,
    scratch: HashMap<ActionId, Vec<ChildRecord>>,
    evaluator: Evaluator,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(data: &'a mut dyn DataNode, options: QueryOptions, registry: Arc<OperatorRegistry>) -> Self {
        let evaluator = Evaluator::new(options.conversion_mode);
        Self {
            data,
            bindings: Map::new(),
            options,
            errors: Vec::new(),
            qualifiers: Vec::new(),
            registry,
            hints: PlanHints::default(),
            stats: None,
            started: Instant::now(),
            depth: 0,
            max_result_size: DEFAULT_MAX_RESULT_SIZE,
            scratch: HashMap::new(),
            evaluator,
        }
    }

    pub fn with_hints(mut self, hints: PlanHints) -> Self {
        self.hints = hints;
        self
    }

    pub fn with_statistics(mut self, stats: Arc<StatisticsStore>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_max_result_size(mut self, size: usize) -> Self {
        self.max_result_size = size;
        self
    }

    pub fn with_bindings(mut self, bindings: Map<String, Value>) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn mode(&self) -> ConversionMode {
        self.options.conversion_mode
    }

    pub fn coerces(&self) -> bool {
        self.options.conversion_mode.coerces()
    }

    pub fn is_strict(&self) -> bool {
        self.options.conversion_mode == ConversionMode::Strict
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn statistics(&self) -> Option<&Arc<StatisticsStore>> {
        self.stats.as_ref()
    }

    /// Join algorithm the planner chose for a JOIN action
    pub fn join_hint(&self, action_id: ActionId) -> Option<JoinAlgorithm> {
        self.hints.join(action_id)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Children results recorded under `parent`
    pub fn scratch(&self, parent: ActionId) -> &[ChildRecord] {
        self.scratch.get(&parent).map_or(&[], Vec::as_slice)
    }

    // ------------------------------------------------------------------------
    // Expression helpers
    // ------------------------------------------------------------------------

    pub fn scope<'s>(&'s self, row: &'s Value) -> Scope<'s> {
        Scope::row(row)
            .with_bindings(&self.bindings)
            .with_qualifiers(&self.qualifiers)
    }

    pub fn eval(&self, expr: &Expr, row: &Value) -> Result<Value> {
        self.evaluator.eval(expr, &self.scope(row))
    }

    pub fn test(&self, expr: &Expr, row: &Value) -> Result<bool> {
        self.evaluator.test(expr, &self.scope(row))
    }

    /// Evaluate with aggregate calls ranging over `group`
    pub fn eval_group(&self, expr: &Expr, row: &Value, group: &[Value]) -> Result<Value> {
        self.evaluator.eval(expr, &self.scope(row).with_group(group))
    }

    pub fn lookup(&self, path: &str, row: &Value) -> Option<Value> {
        self.evaluator.lookup(path, &self.scope(row))
    }

    /// Run `f` with `name` bound, restoring the previous binding afterwards
    pub fn scoped<T>(
        &mut self,
        name: &str,
        value: Value,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let previous = self.bindings.insert(name.to_string(), value);
        let out = f(self);
        match previous {
            Some(old) => self.bindings.insert(name.to_string(), old),
            None => self.bindings.remove(name),
        };
        out
    }

    /// Rows of a named source: a binding first, then a data node path
    pub fn resolve_source(&self, name: &str) -> Result<Vec<Value>> {
        if let Some(bound) = self.bindings.get(name) {
            return Ok(as_rows(bound));
        }
        match self.data.get(name) {
            Some(found) => Ok(as_rows(found)),
            None if self.is_strict() => Err(QueryError::value(format!("unknown collection '{name}'"))),
            None => {
                debug!(collection = name, "unknown collection, treating as empty");
                Ok(Vec::new())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Walking
    // ------------------------------------------------------------------------

    /// Fail when the deadline passed or the caller cancelled
    pub fn checkpoint(&self) -> Result<()> {
        if self.options.is_cancelled() {
            return Err(QueryError::Cancelled);
        }
        if let Some(limit_ms) = self.options.timeout_ms {
            let elapsed_ms = self.started.elapsed().as_millis() as u64;
            if elapsed_ms > limit_ms {
                return Err(QueryError::Timeout {
                    elapsed_ms,
                    limit_ms,
                });
            }
        }
        Ok(())
    }

    /// Time left before the deadline, if one is set
    pub fn remaining(&self) -> Option<Duration> {
        self.options
            .timeout_ms
            .map(|ms| Duration::from_millis(ms).saturating_sub(self.started.elapsed()))
    }

    /// Execute one node against `input`
    pub fn execute(&mut self, action: &Action, input: ExecutionResult) -> Result<ExecutionResult> {
        self.checkpoint().map_err(|e| e.at_action(action.id, action.kind))?;
        if self.depth >= self.options.max_depth {
            return Err(QueryError::ExecutionDepthExceeded {
                depth: self.depth + 1,
                limit: self.options.max_depth,
            }
            .at_action(action.id, action.kind));
        }

        self.depth += 1;
        let outcome = self.invoke(action, input);
        self.depth -= 1;

        match outcome {
            Ok(mut result) => {
                if result.row_count() > self.max_result_size {
                    return Err(QueryError::limit(format!(
                        "{} rows exceed the result size limit {}",
                        result.row_count(),
                        self.max_result_size
                    ))
                    .at_action(action.id, action.kind));
                }
                result.state = ExecutionState::Succeeded;
                result.kind = Some(action.kind);
                trace!(action_id = action.id, kind = %action.kind, state = "SUCCEEDED", rows = result.row_count());
                Ok(result)
            }
            Err(err) => {
                trace!(action_id = action.id, kind = %action.kind, state = "FAILED", error = %err);
                Err(err.at_action(action.id, action.kind))
            }
        }
    }

    fn invoke(&mut self, action: &Action, input: ExecutionResult) -> Result<ExecutionResult> {
        trace!(action_id = action.id, kind = %action.kind, state = "VALIDATING");
        let operator = self
            .registry
            .get(action.kind)
            .ok_or_else(|| QueryError::unsupported(action.kind, "no operator registered"))?;

        let shapes = self.data.shapes();
        let capabilities = operator.capabilities();
        if !shapes.is_empty() && !shapes.intersects(capabilities) {
            return Err(QueryError::unsupported(
                action.kind,
                format!("operator supports {capabilities}, data is {shapes}"),
            ));
        }

        trace!(action_id = action.id, kind = %action.kind, state = "EXECUTING");
        if operator.descends() {
            operator.execute(action, input, self)
        } else {
            let piped = self.run_children(action, input)?;
            operator.execute(action, piped, self)
        }
    }

    /// Run every child of `action` as a pipeline starting from `input`
    pub fn run_children(&mut self, action: &Action, input: ExecutionResult) -> Result<ExecutionResult> {
        let mut current = input;
        for (index, child) in action.children.iter().enumerate() {
            let output = self.run_child(action, index, child, current.clone())?;
            current = piped(current, output);
        }
        Ok(current)
    }

    /// Run one child, applying the LENIENT policy and recording the result
    pub fn run_child(
        &mut self,
        parent: &Action,
        index: usize,
        child: &Action,
        input: ExecutionResult,
    ) -> Result<ExecutionResult> {
        let result = match self.execute(child, input) {
            Ok(result) => result,
            Err(err) if self.absorbs(child, &err) => {
                warn!(action_id = child.id, kind = %child.kind, error = %err, "skipping failed child");
                self.errors.push(ErrorRecord::from(&err));
                let mut empty = ExecutionResult::empty();
                empty.success = false;
                empty
            }
            Err(err) => return Err(err),
        };
        self.scratch.entry(parent.id).or_default().push(ChildRecord {
            key: format!("child_{index}_{}", child.kind.as_str().to_ascii_lowercase()),
            shape: result.shape,
            rows: result.row_count(),
            success: result.success,
        });
        let mut result = result;
        result.success = true;
        Ok(result)
    }

    fn absorbs(&self, child: &Action, err: &QueryError) -> bool {
        self.options.conversion_mode == ConversionMode::Lenient && !err.is_fatal() && !child.has_writes()
    }
}

/// Runs action trees against data nodes
#[derive(Debug, Clone)]
pub struct Executor {
    registry: Arc<OperatorRegistry>,
    stats: Option<Arc<StatisticsStore>>,
    max_result_size: usize,
    slow_query_threshold_ms: u64,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(Arc::new(OperatorRegistry::with_defaults()))
    }
}

impl Executor {
    pub fn new(registry: Arc<OperatorRegistry>) -> Self {
        Self {
            registry,
            stats: None,
            max_result_size: DEFAULT_MAX_RESULT_SIZE,
            slow_query_threshold_ms: DEFAULT_SLOW_QUERY_THRESHOLD_MS,
        }
    }

    pub fn with_statistics(mut self, stats: Arc<StatisticsStore>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_max_result_size(mut self, size: usize) -> Self {
        self.max_result_size = size;
        self
    }

    pub fn with_slow_query_threshold_ms(mut self, threshold_ms: u64) -> Self {
        self.slow_query_threshold_ms = threshold_ms;
        self
    }

    pub fn registry(&self) -> &Arc<OperatorRegistry> {
        &self.registry
    }

    /// Execute `action` against `data`; failures are reported on the result
    pub fn execute(
        &self,
        action: &Action,
        data: &mut dyn DataNode,
        options: &QueryOptions,
        plan: Option<&PhysicalPlan>,
    ) -> ExecutionResult {
        let mut ctx = ExecutionContext::new(data, options.clone(), Arc::clone(&self.registry))
            .with_max_result_size(self.max_result_size)
            .with_hints(plan.map(|p| p.hints.clone()).unwrap_or_default());
        if let Some(stats) = &self.stats {
            ctx = ctx.with_statistics(Arc::clone(stats));
        }

        let outcome = ctx.execute(action, ExecutionResult::void(0));
        let elapsed_ms = ctx.elapsed().as_millis() as u64;
        let mut result = match outcome {
            Ok(result) => result,
            Err(err) => {
                debug!(error = %err, "execution failed");
                ExecutionResult::failure(&err)
            }
        };

        // OPTIONS may have changed the cap while running
        if let Some(limit) = ctx.options.limit {
            cap_rows(&mut result, limit as usize);
        }
        result.errors = std::mem::take(&mut ctx.errors);
        result.metadata.insert("execution_time_ms".into(), Value::from(elapsed_ms));
        result
            .metadata
            .insert("rows_affected".into(), Value::from(result.affected_count));
        if let Some(plan) = plan {
            result
                .metadata
                .insert("plan_fingerprint".into(), Value::from(plan.fingerprint.clone()));
        }
        if elapsed_ms > self.slow_query_threshold_ms {
            warn!(
                elapsed_ms,
                threshold_ms = self.slow_query_threshold_ms,
                kind = %action.kind,
                "slow query"
            );
        }
        result
    }
}

/// Next pipeline value: a void output keeps the previous one
pub fn piped(previous: ExecutionResult, output: ExecutionResult) -> ExecutionResult {
    if output.shape == ResultShape::Void {
        let mut previous = previous;
        previous.affected_count += output.affected_count;
        previous
    } else {
        output
    }
}

fn cap_rows(result: &mut ExecutionResult, limit: usize) {
    if let (Value::Array(rows), ResultShape::Rows) = (&mut result.data, result.shape) {
        if rows.len() > limit {
            rows.truncate(limit);
            result.affected_count = limit as u64;
            result.metadata.insert("truncated".into(), Value::Bool(true));
        }
    }
}

/// Kind of the root action, skipping WITH / OPTIONS wrappers
pub fn effective_kind(action: &Action) -> ActionKind {
    match action.kind {
        ActionKind::With | ActionKind::Options => action
            .children
            .last()
            .map_or(action.kind, effective_kind),
        kind => kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{CancellationToken, ErrorKind, JsonNode, Params, PredicateParams};
    use serde_json::json;

    fn sql(text: &str) -> Action {
        quarry_syntax::ParserBridge::new()
            .parse(text, quarry_syntax::QueryFormat::Sql)
            .unwrap()
            .action
    }

    fn users() -> JsonNode {
        JsonNode::from_native(json!({"users": [
            {"name": "Alice", "age": 30},
            {"name": "Bob", "age": 25},
            {"name": "Charlie", "age": 35}
        ]}))
    }

    #[test]
    fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let options = QueryOptions::new().with_cancellation(token);
        let mut data = users();
        let result = Executor::default().execute(&sql("SELECT * FROM users"), &mut data, &options, None);
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Cancelled));
    }

    #[test]
    fn test_depth_limit() {
        let options = QueryOptions::new().with_max_depth(1);
        let mut data = users();
        let result = Executor::default().execute(
            &sql("SELECT name FROM users WHERE age > 1"),
            &mut data,
            &options,
            None,
        );
        assert_eq!(result.error_kind, Some(ErrorKind::Limit));
    }

    #[test]
    fn test_global_limit_caps_rows() {
        let options = QueryOptions::new().with_limit(1);
        let mut data = users();
        let result = Executor::default().execute(&sql("SELECT name FROM users"), &mut data, &options, None);
        assert_eq!(result.data, json!([{"name": "Alice"}]));
        assert_eq!(result.metadata["truncated"], json!(true));
        assert_eq!(result.metadata["rows_affected"], json!(1));
        assert!(result.metadata.contains_key("execution_time_ms"));
    }

    #[test]
    fn test_max_result_size_is_a_limit_error() {
        let executor = Executor::default().with_max_result_size(2);
        let mut data = users();
        let result = executor.execute(&sql("SELECT * FROM users"), &mut data, &QueryOptions::new(), None);
        assert_eq!(result.error_kind, Some(ErrorKind::Limit));
    }

    fn unknown_call() -> Action {
        Action::new(
            ActionKind::Where,
            Params::Predicate(PredicateParams {
                predicate: Expr::Call {
                    name: "NO_SUCH_FUNCTION".into(),
                    args: vec![],
                },
            }),
        )
    }

    #[test]
    fn test_failure_names_the_action() {
        let mut data = users();
        let mut action = sql("SELECT name FROM users").with_child(unknown_call());
        action.assign_ids();
        let result = Executor::default().execute(&action, &mut data, &QueryOptions::new(), None);
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Validation));
        assert_eq!(result.metadata["action_kind"], json!("WHERE"));
    }

    #[test]
    fn test_lenient_child_failure_is_recorded() {
        let bad = unknown_call();
        let mut action = Action::bare(ActionKind::Pipe)
            .with_child(sql("SELECT name FROM users"))
            .with_child(bad);
        action.assign_ids();

        let mut data = users();
        let options = QueryOptions::new().with_mode(ConversionMode::Lenient);
        let result = Executor::default().execute(&action, &mut data, &options, None);
        assert!(result.success);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.data, json!([]));

        let strict = Executor::default().execute(&action, &mut data, &QueryOptions::new(), None);
        assert!(!strict.success);
    }

    #[test]
    fn test_scratch_records_children() {
        let mut data = users();
        let action = sql("SELECT name FROM users WHERE age > 26 ORDER BY age");
        let registry = Arc::new(OperatorRegistry::with_defaults());
        let mut ctx = ExecutionContext::new(&mut data, QueryOptions::new(), registry);
        let result = ctx.execute(&action, ExecutionResult::void(0)).unwrap();
        assert_eq!(result.row_count(), 2);
        let keys: Vec<&str> = ctx.scratch(action.id).iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["child_0_where", "child_1_order"]);
    }

    #[test]
    fn test_effective_kind_skips_wrappers() {
        let action = Action::new(
            ActionKind::With,
            Params::Binding(quarry_core::BindingParams {
                name: "a".into(),
                value: None,
            }),
        )
        .with_child(sql("SELECT * FROM users"))
        .with_child(sql("DELETE FROM users"));
        assert_eq!(effective_kind(&action), ActionKind::Delete);
    }
}
