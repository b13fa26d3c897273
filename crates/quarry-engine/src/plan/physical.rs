//! Physicalization: algorithm choice per node, hints and EXPLAIN output.

use super::{unqualified, Algorithm, PlanNode, PlanOp, Planner};
use crate::cost::{JoinAlgorithm, EXTERNAL_SORT_THRESHOLD};
use quarry_core::{ActionId, BinaryOp, Expr, OptimizationLevel};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-action decisions the executor reads back
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanHints {
    joins: HashMap<ActionId, JoinAlgorithm>,
}

impl PlanHints {
    pub fn join(&self, action_id: ActionId) -> Option<JoinAlgorithm> {
        self.joins.get(&action_id).copied()
    }

    pub fn set_join(&mut self, action_id: ActionId, algorithm: JoinAlgorithm) {
        self.joins.insert(action_id, algorithm);
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalPlan {
    pub root: PlanNode,
    pub fingerprint: String,
    pub level: OptimizationLevel,
    pub hints: PlanHints,
    /// Optimizer passes that ran
    pub passes: usize,
    /// Names of rewrites kept by the optimizer, in order
    pub applied_rules: Vec<String>,
}

impl PhysicalPlan {
    pub fn est_cost(&self) -> f64 {
        self.root.est_cost
    }

    pub fn est_rows(&self) -> f64 {
        self.root.est_rows
    }

    /// Indented tree, one node per line
    pub fn explain(&self) -> String {
        let mut out = String::new();
        write_tree(&self.root, 0, &mut out);
        out
    }
}

fn write_tree(node: &PlanNode, depth: usize, out: &mut String) {
    out.push_str(&"  ".repeat(depth));
    out.push_str(&node.describe());
    out.push('\n');
    for child in &node.children {
        write_tree(child, depth + 1, out);
    }
}

/// Right-hand column of the first equi-join conjunct
fn inner_join_key(on: &Expr, right_qualifiers: &[&str]) -> Option<String> {
    on.conjuncts().into_iter().find_map(|c| match c {
        Expr::Binary {
            op: BinaryOp::Eq,
            left,
            right,
        } => match (left.as_ref(), right.as_ref()) {
            (Expr::Field(l), Expr::Field(r)) => {
                let on_right = |f: &str| {
                    f.split_once('.')
                        .is_some_and(|(head, _)| right_qualifiers.contains(&head))
                };
                if on_right(r) {
                    Some(unqualified(r, right_qualifiers).to_string())
                } else if on_right(l) {
                    Some(unqualified(l, right_qualifiers).to_string())
                } else {
                    None
                }
            }
            _ => None,
        },
        _ => None,
    })
}

impl Planner {
    /// Pick algorithms for every node and collect executor hints
    pub fn physicalize(
        &self,
        mut logical: PlanNode,
        fingerprint: String,
        level: OptimizationLevel,
    ) -> PhysicalPlan {
        let mut hints = PlanHints::default();
        self.choose(&mut logical, &mut hints);
        logical.annotate(&self.stats, &self.model);
        PhysicalPlan {
            root: logical,
            fingerprint,
            level,
            hints,
            passes: 0,
            applied_rules: Vec::new(),
        }
    }

    fn choose(&self, node: &mut PlanNode, hints: &mut PlanHints) {
        for child in &mut node.children {
            self.choose(child, hints);
        }
        node.algorithm = match &node.op {
            PlanOp::Scan { index, .. } => Some(if index.is_some() {
                Algorithm::IndexScan
            } else {
                Algorithm::SeqScan
            }),
            PlanOp::Join { on, .. } => {
                let outer = node.children.first().map_or(1.0, |c| c.est_rows);
                let inner_node = node.children.get(1);
                let inner = inner_node.map_or(1.0, |c| c.est_rows);
                let indexed = match (on, inner_node) {
                    (Some(on), Some(inner_node)) => {
                        let qualifiers = inner_node.qualifiers();
                        let collection = inner_node.base_collection().unwrap_or_default();
                        inner_join_key(on, &qualifiers)
                            .is_some_and(|key| self.stats.has_index(collection, &key))
                    }
                    _ => false,
                };
                let algorithm = self.model.choose_join(outer, inner, indexed);
                if let Some(id) = node.action_id {
                    hints.set_join(id, algorithm);
                }
                Some(Algorithm::Join(algorithm))
            }
            PlanOp::Aggregate { group_by, .. } => Some(if group_by.is_empty() {
                Algorithm::PlainAggregate
            } else {
                Algorithm::HashAggregate
            }),
            PlanOp::Sort { .. } => {
                let rows = node.children.first().map_or(0.0, |c| c.est_rows);
                Some(if rows > EXTERNAL_SORT_THRESHOLD {
                    Algorithm::ExternalSort
                } else {
                    Algorithm::InMemorySort
                })
            }
            _ => None,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{IndexInfo, StatisticsStore};
    use quarry_core::Action;
    use quarry_syntax::{ParserBridge, QueryFormat};
    use serde_json::json;
    use std::sync::Arc;

    fn sql(text: &str) -> Action {
        ParserBridge::new().parse(text, QueryFormat::Sql).unwrap().action
    }

    #[test]
    fn test_join_hint_uses_index_on_inner_key() {
        let stats = Arc::new(StatisticsStore::new());
        let users: Vec<_> = (0..50).map(|i| json!({"id": i})).collect();
        stats.analyze("users", &users);
        stats.register_index("orders", IndexInfo::new("idx_user", vec!["user_id".into()]));
        let planner = Planner::new(stats);

        let action = sql("SELECT u.id FROM users u JOIN orders o ON u.id = o.user_id");
        let join_id = action.children[0].id;
        let plan = planner.physicalize(planner.logical(&action), "fp".into(), OptimizationLevel::None);
        assert_eq!(plan.hints.join(join_id), Some(JoinAlgorithm::IndexedNestedLoop));
    }

    #[test]
    fn test_default_join_is_hash() {
        let planner = Planner::new(Arc::new(StatisticsStore::new()));
        let action = sql("SELECT a.x FROM a JOIN b ON a.id = b.id");
        let join_id = action.children[0].id;
        let plan = planner.physicalize(planner.logical(&action), String::new(), OptimizationLevel::None);
        assert_eq!(plan.hints.join(join_id), Some(JoinAlgorithm::Hash));
    }

    #[test]
    fn test_explain_is_indented_tree() {
        let planner = Planner::new(Arc::new(StatisticsStore::new()));
        let action = sql("SELECT name FROM users WHERE age > 25");
        let plan = planner.physicalize(planner.logical(&action), String::new(), OptimizationLevel::None);
        let text = plan.explain();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("PROJECT name"));
        assert!(lines[1].starts_with("  FILTER age > 25"));
        assert!(lines[2].starts_with("    SCAN users"));
        assert!(lines[2].contains("algorithm=seq_scan"));
    }
}
