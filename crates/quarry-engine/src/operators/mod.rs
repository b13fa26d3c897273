//! Operator registry: one executor per action kind
//!
//! Every operator declares the data shapes it can run against. Most are
//! post-order: the executor evaluates their children as a pipeline first and
//! hands them the last child's output. Pre-order operators receive their
//! parent's input untouched and descend into children themselves.
//!
//! ## Families
//!
//! - [`filter`]: WHERE, LIKE, IN, HAS, BETWEEN, TERM, OPTIONAL, VALUES
//! - [`aggregate`]: COUNT..MAX, DISTINCT, GROUP, HAVING, SUMMARIZE
//! - [`project`]: PROJECT, EXTEND, RETURN
//! - [`order`]: ORDER, LIMIT, OFFSET, SLICING, INDEXING
//! - [`select`]: SELECT with joins and windows
//! - [`graph`]: MATCH, traversals, paths and graph mutations
//! - [`write`]: INSERT, UPDATE, DELETE, MERGE and DDL
//! - [`control`]: UNION, WITH, LET, FOR, PIPE and the remaining advanced kinds
//! - [`transfer`]: LOAD and STORE

pub mod aggregate;
pub mod control;
pub mod filter;
pub mod graph;
pub mod order;
pub mod project;
pub mod select;
pub mod transfer;
pub mod write;

use crate::executor::ExecutionContext;
use quarry_core::{
    Action, ActionKind, DataShape, ExecutionResult, QueryError, Result, ShapeSet,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Executor for one action kind
pub trait Operator: Send + Sync {
    fn kind(&self) -> ActionKind;

    /// Data shapes this operator can run against
    fn capabilities(&self) -> ShapeSet {
        ShapeSet::all()
    }

    /// Whether the operator walks its own children (pre-order)
    fn descends(&self) -> bool {
        false
    }

    fn execute(
        &self,
        action: &Action,
        input: ExecutionResult,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<ExecutionResult>;
}

pub type OperatorFn =
    fn(&Action, ExecutionResult, &mut ExecutionContext<'_>) -> Result<ExecutionResult>;

/// An operator backed by a plain function
#[derive(Clone, Copy)]
pub struct Builtin {
    kind: ActionKind,
    capabilities: ShapeSet,
    descends: bool,
    run: OperatorFn,
}

impl Builtin {
    pub fn new(kind: ActionKind, run: OperatorFn) -> Self {
        Self {
            kind,
            capabilities: default_capabilities(kind),
            descends: is_pre_order(kind),
            run,
        }
    }

    pub fn with_capabilities(mut self, capabilities: ShapeSet) -> Self {
        self.capabilities = capabilities;
        self
    }
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builtin")
            .field("kind", &self.kind)
            .field("capabilities", &self.capabilities)
            .field("descends", &self.descends)
            .finish()
    }
}

impl Operator for Builtin {
    fn kind(&self) -> ActionKind {
        self.kind
    }

    fn capabilities(&self) -> ShapeSet {
        self.capabilities
    }

    fn descends(&self) -> bool {
        self.descends
    }

    fn execute(
        &self,
        action: &Action,
        input: ExecutionResult,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<ExecutionResult> {
        (self.run)(action, input, ctx)
    }
}

/// Kinds that rebind the context or choose when to evaluate their children
pub fn is_pre_order(kind: ActionKind) -> bool {
    matches!(
        kind,
        ActionKind::Select
            | ActionKind::Match
            | ActionKind::With
            | ActionKind::Let
            | ActionKind::For
            | ActionKind::Foreach
            | ActionKind::Options
            | ActionKind::Update
            | ActionKind::Delete
            | ActionKind::Mutation
            | ActionKind::Subscribe
            | ActionKind::Subscription
            | ActionKind::Ask
            | ActionKind::Optional
            | ActionKind::Union
            | ActionKind::Pipe
    )
}

fn default_capabilities(kind: ActionKind) -> ShapeSet {
    use ActionKind::*;
    match kind {
        Match | Path | Out | InTraverse | Both | Neighbors | OutE | InE | BothE | OutV | InV
        | BothV | Expand | Degree | ShortestPath | AllPaths | VariablePath | PathLength
        | ExtractPath | ConnectedComponents | CycleDetection | Traversal | Subgraph => {
            ShapeSet::of(&[DataShape::Graph])
        }
        CreateEdge | DeleteEdge | UpdateEdge | DetachDelete | Clone => {
            ShapeSet::of(&[DataShape::Graph, DataShape::Document])
        }
        kind if kind.is_write() => ShapeSet::all_except(DataShape::Stream),
        _ => ShapeSet::all(),
    }
}

/// Thread-safe after construction; share it behind an `Arc`
#[derive(Clone, Default)]
pub struct OperatorRegistry {
    operators: HashMap<ActionKind, Arc<dyn Operator>>,
}

impl fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl OperatorRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in operator for every kind
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        filter::register(&mut registry);
        aggregate::register(&mut registry);
        project::register(&mut registry);
        order::register(&mut registry);
        select::register(&mut registry);
        graph::register(&mut registry);
        write::register(&mut registry);
        control::register(&mut registry);
        transfer::register(&mut registry);
        registry
    }

    /// Register (or replace) the operator for its kind
    pub fn register(&mut self, operator: Arc<dyn Operator>) {
        self.operators.insert(operator.kind(), operator);
    }

    pub(crate) fn builtin(&mut self, kind: ActionKind, run: OperatorFn) {
        self.register(Arc::new(Builtin::new(kind, run)));
    }

    pub fn get(&self, kind: ActionKind) -> Option<Arc<dyn Operator>> {
        self.operators.get(&kind).cloned()
    }

    pub fn contains(&self, kind: ActionKind) -> bool {
        self.operators.contains_key(&kind)
    }

    pub fn capabilities(&self, kind: ActionKind) -> Option<ShapeSet> {
        self.operators.get(&kind).map(|op| op.capabilities())
    }

    /// Registered kinds in declaration order
    pub fn kinds(&self) -> Vec<ActionKind> {
        let mut kinds: Vec<ActionKind> = self.operators.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

/// Error for a record that does not match the operator
pub(crate) fn bad_params(action: &Action) -> QueryError {
    QueryError::validation(format!(
        "{} does not accept {:?} parameters",
        action.kind,
        action.params.record()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_an_operator() {
        let registry = OperatorRegistry::with_defaults();
        let missing: Vec<_> = ActionKind::ALL
            .iter()
            .filter(|k| !registry.contains(**k))
            .collect();
        assert!(missing.is_empty(), "no operator for {missing:?}");
        assert_eq!(registry.len(), ActionKind::ALL.len());
    }

    #[test]
    fn test_graph_kinds_require_graph_shape() {
        let registry = OperatorRegistry::with_defaults();
        let caps = registry.capabilities(ActionKind::ShortestPath).unwrap();
        assert!(caps.contains(DataShape::Graph));
        assert!(!caps.contains(DataShape::Tabular));
        let caps = registry.capabilities(ActionKind::Insert).unwrap();
        assert!(!caps.contains(DataShape::Stream));
        assert!(registry.capabilities(ActionKind::Where).unwrap().contains(DataShape::Stream));
    }

    #[test]
    fn test_register_replaces_operator() {
        fn nothing(_: &Action, _: ExecutionResult, _: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
            Ok(ExecutionResult::void(0))
        }
        let mut registry = OperatorRegistry::with_defaults();
        let custom = Builtin::new(ActionKind::Where, nothing).with_capabilities(ShapeSet::of(&[DataShape::Stream]));
        registry.register(Arc::new(custom));
        assert_eq!(
            registry.capabilities(ActionKind::Where),
            Some(ShapeSet::of(&[DataShape::Stream]))
        );
    }

    #[test]
    fn test_pre_order_kinds() {
        let registry = OperatorRegistry::with_defaults();
        assert!(registry.get(ActionKind::Select).unwrap().descends());
        assert!(registry.get(ActionKind::Foreach).unwrap().descends());
        assert!(!registry.get(ActionKind::Where).unwrap().descends());
        assert!(!registry.get(ActionKind::Insert).unwrap().descends());
    }
}
