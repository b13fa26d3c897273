//! Rule-driven plan rewriting.
//!
//! Each pass tries every rule enabled for the optimization level. A rewrite
//! is kept when it lowers the estimated cost, or keeps it equal while
//! changing the plan. Passes stop at a fixed point or after
//! `max_iterations`.

use crate::cost::CostModel;
use crate::plan::{rewrite_first, unqualified, IndexProbe, PlanNode, PlanOp};
use crate::stats::StatisticsStore;
use quarry_core::{BinaryOp, Expr, JoinType, OptimizationLevel};
use std::sync::Arc;
use tracing::{debug, trace};

pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// What a rule may consult while rewriting
pub struct RuleContext<'a> {
    pub stats: &'a StatisticsStore,
}

pub trait Rule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lowest level at which the rule runs
    fn level(&self) -> OptimizationLevel;

    fn is_applicable(&self, plan: &PlanNode, ctx: &RuleContext<'_>) -> bool {
        self.apply(plan, ctx).is_some()
    }

    /// Rewritten plan, or `None` when nothing matches
    fn apply(&self, plan: &PlanNode, ctx: &RuleContext<'_>) -> Option<PlanNode>;
}

#[derive(Debug, Clone)]
pub struct OptimizeOutcome {
    pub plan: PlanNode,
    pub passes: usize,
    pub applied: Vec<String>,
}

pub struct Optimizer {
    rules: Vec<Box<dyn Rule>>,
    max_iterations: usize,
    stats: Arc<StatisticsStore>,
    model: CostModel,
}

impl std::fmt::Debug for Optimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Optimizer")
            .field("rules", &self.rules.iter().map(|r| r.name()).collect::<Vec<_>>())
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}

impl Optimizer {
    /// Optimizer with the built-in rules
    pub fn new(stats: Arc<StatisticsStore>) -> Self {
        Self {
            rules: vec![
                Box::new(PredicatePushdown),
                Box::new(ProjectionPushdown),
                Box::new(IndexSelection),
                Box::new(FilterBelowSort),
                Box::new(MergeFilters),
            ],
            max_iterations: DEFAULT_MAX_ITERATIONS,
            stats,
            model: CostModel::default(),
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_cost_model(mut self, model: CostModel) -> Self {
        self.model = model;
        self
    }

    pub fn register(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    pub fn rule_names(&self, level: OptimizationLevel) -> Vec<&'static str> {
        self.enabled(level).map(|r| r.name()).collect()
    }

    fn enabled(&self, level: OptimizationLevel) -> impl Iterator<Item = &dyn Rule> {
        self.rules
            .iter()
            .map(|r| r.as_ref())
            .filter(move |r| level != OptimizationLevel::None && r.level() <= level)
    }

    pub fn optimize(&self, plan: PlanNode, level: OptimizationLevel) -> OptimizeOutcome {
        let ctx = RuleContext { stats: &self.stats };
        let mut plan = plan;
        plan.annotate(&self.stats, &self.model);
        let mut applied = Vec::new();
        let mut passes = 0;

        if level == OptimizationLevel::None {
            return OptimizeOutcome {
                plan,
                passes,
                applied,
            };
        }

        while passes < self.max_iterations {
            passes += 1;
            let mut changed = false;
            for rule in self.enabled(level) {
                if !rule.is_applicable(&plan, &ctx) {
                    continue;
                }
                let Some(mut candidate) = rule.apply(&plan, &ctx) else {
                    continue;
                };
                candidate.annotate(&self.stats, &self.model);
                let cheaper = candidate.est_cost < plan.est_cost - f64::EPSILON;
                let same_cost = (candidate.est_cost - plan.est_cost).abs() <= f64::EPSILON;
                if cheaper || (same_cost && candidate != plan) {
                    trace!(
                        rule = rule.name(),
                        before = plan.est_cost,
                        after = candidate.est_cost,
                        "kept rewrite"
                    );
                    plan = candidate;
                    applied.push(rule.name().to_string());
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        debug!(passes, rules = applied.len(), cost = plan.est_cost, "optimized plan");
        OptimizeOutcome {
            plan,
            passes,
            applied,
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Whether every field of `expr` is qualified by one of `qualifiers`
fn references_only(expr: &Expr, qualifiers: &[&str]) -> bool {
    let fields = expr.referenced_fields();
    !fields.is_empty()
        && fields.iter().all(|f| {
            f.split_once('.')
                .is_some_and(|(head, _)| qualifiers.contains(&head))
        })
}

fn filter(predicate: Expr, child: PlanNode) -> PlanNode {
    PlanNode::new(PlanOp::Filter { predicate }).with_child(child)
}

// ============================================================================
// Rules
// ============================================================================

/// Move filter conjuncts that touch one join side below the join
pub struct PredicatePushdown;

impl Rule for PredicatePushdown {
    fn name(&self) -> &'static str {
        "predicate_pushdown"
    }

    fn level(&self) -> OptimizationLevel {
        OptimizationLevel::Basic
    }

    fn apply(&self, plan: &PlanNode, _ctx: &RuleContext<'_>) -> Option<PlanNode> {
        rewrite_first(plan, &|node| {
            let PlanOp::Filter { predicate } = &node.op else {
                return None;
            };
            let join = node.children.first()?;
            let PlanOp::Join { join_type, .. } = &join.op else {
                return None;
            };
            let (left, right) = (join.children.first()?, join.children.get(1)?);
            let (lq, rq) = (left.qualifiers(), right.qualifiers());
            let left_ok = matches!(join_type, JoinType::Inner | JoinType::Cross | JoinType::Left);
            let right_ok = matches!(join_type, JoinType::Inner | JoinType::Cross | JoinType::Right);

            let mut to_left = Vec::new();
            let mut to_right = Vec::new();
            let mut keep = Vec::new();
            for conjunct in predicate.conjuncts() {
                if left_ok && references_only(conjunct, &lq) {
                    to_left.push(conjunct.clone());
                } else if right_ok && references_only(conjunct, &rq) {
                    to_right.push(conjunct.clone());
                } else {
                    keep.push(conjunct.clone());
                }
            }
            if to_left.is_empty() && to_right.is_empty() {
                return None;
            }

            let mut new_join = join.clone();
            if let Some(p) = Expr::conjoin(to_left) {
                new_join.children[0] = filter(p, left.clone());
            }
            if let Some(p) = Expr::conjoin(to_right) {
                new_join.children[1] = filter(p, right.clone());
            }
            Some(match Expr::conjoin(keep) {
                Some(rest) => {
                    let mut out = filter(rest, new_join);
                    out.action_id = node.action_id;
                    out
                }
                None => new_join,
            })
        })
    }
}

/// Record the columns a projection needs on the scan beneath it
pub struct ProjectionPushdown;

impl ProjectionPushdown {
    fn push(node: &PlanNode, needed: &mut Vec<String>) -> Option<PlanNode> {
        match &node.op {
            PlanOp::Scan {
                collection,
                alias,
                columns: None,
                index,
            } => {
                let qualifiers = node.qualifiers();
                let mut columns: Vec<String> = needed
                    .iter()
                    .map(|c| unqualified(c, &qualifiers).to_string())
                    .collect();
                columns.sort();
                columns.dedup();
                let mut out = node.clone();
                out.op = PlanOp::Scan {
                    collection: collection.clone(),
                    alias: alias.clone(),
                    columns: Some(columns),
                    index: index.clone(),
                };
                Some(out)
            }
            PlanOp::Filter { predicate } => {
                needed.extend(predicate.referenced_fields().into_iter().map(str::to_string));
                Self::descend(node, needed)
            }
            PlanOp::Sort { keys } => {
                needed.extend(keys.iter().map(|k| k.column.clone()));
                Self::descend(node, needed)
            }
            PlanOp::Limit { .. } => Self::descend(node, needed),
            _ => None,
        }
    }

    fn descend(node: &PlanNode, needed: &mut Vec<String>) -> Option<PlanNode> {
        let child = Self::push(node.children.first()?, needed)?;
        let mut out = node.clone();
        out.children[0] = child;
        Some(out)
    }
}

impl Rule for ProjectionPushdown {
    fn name(&self) -> &'static str {
        "projection_pushdown"
    }

    fn level(&self) -> OptimizationLevel {
        OptimizationLevel::Basic
    }

    fn apply(&self, plan: &PlanNode, _ctx: &RuleContext<'_>) -> Option<PlanNode> {
        rewrite_first(plan, &|node| {
            let PlanOp::Project {
                required: Some(required),
                ..
            } = &node.op
            else {
                return None;
            };
            let mut needed = required.clone();
            Self::descend(node, &mut needed)
        })
    }
}

fn indexable(op: BinaryOp) -> bool {
    matches!(
        op,
        BinaryOp::Eq | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
    )
}

/// Column of an equality or range conjunct against a literal
fn probe_column(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Binary { op, left, right } if indexable(*op) => {
            match (left.as_ref(), right.as_ref()) {
                (Expr::Field(f), Expr::Literal(_)) | (Expr::Literal(_), Expr::Field(f)) => Some(f),
                _ => None,
            }
        }
        Expr::Between {
            expr,
            low,
            high,
            negated: false,
        } => match (expr.as_ref(), low.as_ref(), high.as_ref()) {
            (Expr::Field(f), Expr::Literal(_), Expr::Literal(_)) => Some(f),
            _ => None,
        },
        _ => None,
    }
}

/// Serve a filter conjunct from an index on the scanned collection
pub struct IndexSelection;

impl Rule for IndexSelection {
    fn name(&self) -> &'static str {
        "index_selection"
    }

    fn level(&self) -> OptimizationLevel {
        OptimizationLevel::Standard
    }

    fn apply(&self, plan: &PlanNode, ctx: &RuleContext<'_>) -> Option<PlanNode> {
        rewrite_first(plan, &|node| {
            let PlanOp::Filter { predicate } = &node.op else {
                return None;
            };
            let scan = node.children.first()?;
            let PlanOp::Scan {
                collection,
                alias,
                columns,
                index: None,
            } = &scan.op
            else {
                return None;
            };
            let qualifiers = scan.qualifiers();
            let conjuncts = predicate.conjuncts();
            // equality probes first
            let mut candidates: Vec<(usize, &Expr)> = conjuncts.iter().copied().enumerate().collect();
            candidates.sort_by_key(|(_, c)| !matches!(c, Expr::Binary { op: BinaryOp::Eq, .. }));
            let (pos, info, column) = candidates.into_iter().find_map(|(i, c)| {
                let column = unqualified(probe_column(c)?, &qualifiers).to_string();
                let info = ctx.stats.index_on(collection, &column)?;
                Some((i, info, column))
            })?;

            let mut new_scan = scan.clone();
            new_scan.op = PlanOp::Scan {
                collection: collection.clone(),
                alias: alias.clone(),
                columns: columns.clone(),
                index: Some(IndexProbe {
                    index: info.name,
                    column,
                    predicate: conjuncts[pos].clone(),
                }),
            };
            let rest: Vec<Expr> = conjuncts
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != pos)
                .map(|(_, c)| (*c).clone())
                .collect();
            Some(match Expr::conjoin(rest) {
                Some(rest) => {
                    let mut out = filter(rest, new_scan);
                    out.action_id = node.action_id;
                    out
                }
                None => new_scan,
            })
        })
    }
}

/// Sort fewer rows by filtering first
pub struct FilterBelowSort;

impl Rule for FilterBelowSort {
    fn name(&self) -> &'static str {
        "filter_below_sort"
    }

    fn level(&self) -> OptimizationLevel {
        OptimizationLevel::Aggressive
    }

    fn apply(&self, plan: &PlanNode, _ctx: &RuleContext<'_>) -> Option<PlanNode> {
        rewrite_first(plan, &|node| {
            let PlanOp::Filter { .. } = &node.op else {
                return None;
            };
            let sort = node.children.first()?;
            let PlanOp::Sort { .. } = &sort.op else {
                return None;
            };
            let mut new_filter = node.clone();
            new_filter.children = sort.children.clone();
            let mut new_sort = sort.clone();
            new_sort.children = vec![new_filter];
            Some(new_sort)
        })
    }
}

/// Collapse stacked filters into one conjunction
pub struct MergeFilters;

impl Rule for MergeFilters {
    fn name(&self) -> &'static str {
        "merge_filters"
    }

    fn level(&self) -> OptimizationLevel {
        OptimizationLevel::Aggressive
    }

    fn apply(&self, plan: &PlanNode, _ctx: &RuleContext<'_>) -> Option<PlanNode> {
        rewrite_first(plan, &|node| {
            let PlanOp::Filter { predicate: outer } = &node.op else {
                return None;
            };
            let inner = node.children.first()?;
            let PlanOp::Filter { predicate: below } = &inner.op else {
                return None;
            };
            let mut merged = filter(Expr::and(below.clone(), outer.clone()), inner.children.first()?.clone());
            merged.action_id = inner.action_id;
            Some(merged)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{PlanKind, Planner};
    use crate::stats::IndexInfo;
    use quarry_core::Action;
    use quarry_syntax::{ParserBridge, QueryFormat};

    fn sql(text: &str) -> Action {
        ParserBridge::new().parse(text, QueryFormat::Sql).unwrap().action
    }

    fn optimize(stats: Arc<StatisticsStore>, text: &str, level: OptimizationLevel) -> OptimizeOutcome {
        let logical = Planner::new(stats.clone()).logical(&sql(text));
        Optimizer::new(stats).optimize(logical, level)
    }

    #[test]
    fn test_none_level_keeps_plan() {
        let stats = Arc::new(StatisticsStore::new());
        let logical = Planner::new(stats.clone()).logical(&sql("SELECT a FROM t WHERE a = 1"));
        let outcome = Optimizer::new(stats).optimize(logical.clone(), OptimizationLevel::None);
        assert_eq!(outcome.plan, logical);
        assert_eq!(outcome.passes, 0);
    }

    #[test]
    fn test_predicate_pushdown_below_join() {
        let outcome = optimize(
            Arc::new(StatisticsStore::new()),
            "SELECT u.name FROM users u JOIN orders o ON u.id = o.user_id WHERE u.age > 30 AND o.total > 5",
            OptimizationLevel::Basic,
        );
        assert!(outcome.applied.iter().any(|r| r == "predicate_pushdown"));
        let join = outcome.plan.iter().find(|n| n.kind() == PlanKind::Join).unwrap();
        assert_eq!(join.children[0].kind(), PlanKind::Filter);
        assert_eq!(join.children[1].kind(), PlanKind::Filter);
    }

    #[test]
    fn test_outer_join_keeps_right_predicate_above() {
        let outcome = optimize(
            Arc::new(StatisticsStore::new()),
            "SELECT u.name FROM users u LEFT JOIN orders o ON u.id = o.user_id WHERE o.total > 5",
            OptimizationLevel::Basic,
        );
        assert!(!outcome.applied.iter().any(|r| r == "predicate_pushdown"));
    }

    #[test]
    fn test_projection_pushdown_sets_scan_columns() {
        let outcome = optimize(
            Arc::new(StatisticsStore::new()),
            "SELECT name FROM users WHERE age > 3 ORDER BY city",
            OptimizationLevel::Basic,
        );
        let scan = outcome.plan.iter().find(|n| n.kind() == PlanKind::Scan).unwrap();
        match &scan.op {
            PlanOp::Scan { columns, .. } => assert_eq!(
                columns.as_deref(),
                Some(&["age".to_string(), "city".to_string(), "name".to_string()][..])
            ),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_index_selection_needs_standard() {
        let stats = Arc::new(StatisticsStore::new());
        stats.register_index("users", IndexInfo::new("idx_age", vec!["age".into()]));
        let text = "SELECT name FROM users WHERE age = 30";

        let basic = optimize(stats.clone(), text, OptimizationLevel::Basic);
        assert!(!basic.applied.iter().any(|r| r == "index_selection"));

        let standard = optimize(stats, text, OptimizationLevel::Standard);
        assert!(standard.applied.iter().any(|r| r == "index_selection"));
        assert!(standard.plan.est_cost < basic.plan.est_cost);
        // the filter was absorbed by the index probe
        assert!(standard.plan.iter().all(|n| n.kind() != PlanKind::Filter));
    }

    #[test]
    fn test_merge_filters_at_aggressive() {
        let stats = Arc::new(StatisticsStore::new());
        let scan = PlanNode::new(PlanOp::Scan {
            collection: "t".into(),
            alias: None,
            columns: None,
            index: None,
        });
        let stacked = filter(
            Expr::binary(BinaryOp::Gt, Expr::field("a"), Expr::lit(1)),
            filter(Expr::binary(BinaryOp::Lt, Expr::field("b"), Expr::lit(2)), scan),
        );
        let outcome = Optimizer::new(stats).optimize(stacked, OptimizationLevel::Aggressive);
        assert_eq!(outcome.plan.node_count(), 2);
        assert!(outcome.applied.iter().any(|r| r == "merge_filters"));
    }

    #[test]
    fn test_level_rule_sets() {
        let optimizer = Optimizer::new(Arc::new(StatisticsStore::new()));
        assert!(optimizer.rule_names(OptimizationLevel::None).is_empty());
        assert_eq!(
            optimizer.rule_names(OptimizationLevel::Basic),
            vec!["predicate_pushdown", "projection_pushdown"]
        );
        assert_eq!(optimizer.rule_names(OptimizationLevel::Standard).len(), 3);
        assert_eq!(optimizer.rule_names(OptimizationLevel::Aggressive).len(), 5);
    }
}
