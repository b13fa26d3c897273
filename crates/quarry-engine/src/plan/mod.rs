//! Logical and physical query plans.
//!
//! A plan is a tree of [`PlanNode`]s carrying row and cost estimates. The
//! executor never runs a plan; it runs the action tree and consults the
//! plan only for per-action hints (join algorithm).

mod builder;
mod physical;

pub use builder::Planner;
pub use physical::{PhysicalPlan, PlanHints};

use crate::cost::{CostModel, JoinAlgorithm};
use crate::stats::{StatisticsStore, DEFAULT_SELECTIVITY};
use quarry_core::{ActionId, ActionKind, Expr, JoinType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Equality or range predicate served by an index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexProbe {
    pub index: String,
    pub column: String,
    pub predicate: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: String,
    pub descending: bool,
}

/// Operation performed by a plan node, with its arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PlanOp {
    Scan {
        collection: String,
        alias: Option<String>,
        /// Columns kept after projection pushdown; `None` keeps all
        columns: Option<Vec<String>>,
        index: Option<IndexProbe>,
    },
    /// Rows handed in by the enclosing operator
    Input,
    Filter {
        predicate: Expr,
    },
    Project {
        fields: Vec<String>,
        /// Input columns the projection reads; `None` for `*`
        required: Option<Vec<String>>,
        distinct: bool,
    },
    Join {
        join_type: JoinType,
        on: Option<Expr>,
        right: String,
    },
    Sort {
        keys: Vec<SortSpec>,
    },
    Aggregate {
        group_by: Vec<String>,
        aggregates: Vec<String>,
    },
    Limit {
        count: Option<u64>,
        offset: u64,
    },
    Union {
        distinct: bool,
    },
    Cte {
        name: String,
    },
    Window {
        function: String,
        partition_by: Vec<String>,
    },
    GraphMatch {
        elements: usize,
    },
    GraphPath {
        kind: ActionKind,
    },
    VarBind {
        name: String,
    },
    ForEach {
        name: String,
    },
    Options,
    Write {
        kind: ActionKind,
        target: String,
    },
    Passthrough {
        kind: ActionKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanKind {
    Scan,
    Input,
    Filter,
    Project,
    Join,
    Sort,
    Aggregate,
    Limit,
    Union,
    Cte,
    Window,
    GraphMatch,
    GraphPath,
    VarBind,
    ForEach,
    Options,
    Write,
    Passthrough,
}

impl PlanKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanKind::Scan => "SCAN",
            PlanKind::Input => "INPUT",
            PlanKind::Filter => "FILTER",
            PlanKind::Project => "PROJECT",
            PlanKind::Join => "JOIN",
            PlanKind::Sort => "SORT",
            PlanKind::Aggregate => "AGGREGATE",
            PlanKind::Limit => "LIMIT",
            PlanKind::Union => "UNION",
            PlanKind::Cte => "CTE",
            PlanKind::Window => "WINDOW",
            PlanKind::GraphMatch => "GRAPH_MATCH",
            PlanKind::GraphPath => "GRAPH_PATH",
            PlanKind::VarBind => "VAR_BIND",
            PlanKind::ForEach => "FOR_EACH",
            PlanKind::Options => "OPTIONS",
            PlanKind::Write => "WRITE",
            PlanKind::Passthrough => "PASSTHROUGH",
        }
    }
}

impl fmt::Display for PlanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PlanOp {
    pub fn kind(&self) -> PlanKind {
        match self {
            PlanOp::Scan { .. } => PlanKind::Scan,
            PlanOp::Input => PlanKind::Input,
            PlanOp::Filter { .. } => PlanKind::Filter,
            PlanOp::Project { .. } => PlanKind::Project,
            PlanOp::Join { .. } => PlanKind::Join,
            PlanOp::Sort { .. } => PlanKind::Sort,
            PlanOp::Aggregate { .. } => PlanKind::Aggregate,
            PlanOp::Limit { .. } => PlanKind::Limit,
            PlanOp::Union { .. } => PlanKind::Union,
            PlanOp::Cte { .. } => PlanKind::Cte,
            PlanOp::Window { .. } => PlanKind::Window,
            PlanOp::GraphMatch { .. } => PlanKind::GraphMatch,
            PlanOp::GraphPath { .. } => PlanKind::GraphPath,
            PlanOp::VarBind { .. } => PlanKind::VarBind,
            PlanOp::ForEach { .. } => PlanKind::ForEach,
            PlanOp::Options => PlanKind::Options,
            PlanOp::Write { .. } => PlanKind::Write,
            PlanOp::Passthrough { .. } => PlanKind::Passthrough,
        }
    }
}

/// Algorithm picked for a node during physicalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    SeqScan,
    IndexScan,
    Join(JoinAlgorithm),
    HashAggregate,
    PlainAggregate,
    InMemorySort,
    ExternalSort,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::SeqScan => f.write_str("seq_scan"),
            Algorithm::IndexScan => f.write_str("index_scan"),
            Algorithm::Join(j) => write!(f, "{j}_join"),
            Algorithm::HashAggregate => f.write_str("hash_aggregate"),
            Algorithm::PlainAggregate => f.write_str("plain_aggregate"),
            Algorithm::InMemorySort => f.write_str("in_memory_sort"),
            Algorithm::ExternalSort => f.write_str("external_sort"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    pub op: PlanOp,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PlanNode>,
    pub est_rows: f64,
    pub est_cost: f64,
    /// Action this node was planned from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<ActionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<Algorithm>,
}

impl PlanNode {
    pub fn new(op: PlanOp) -> Self {
        Self {
            op,
            children: Vec::new(),
            est_rows: 0.0,
            est_cost: 0.0,
            action_id: None,
            algorithm: None,
        }
    }

    pub fn with_child(mut self, child: PlanNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = PlanNode>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn with_action(mut self, id: ActionId) -> Self {
        self.action_id = Some(id);
        self
    }

    pub fn kind(&self) -> PlanKind {
        self.op.kind()
    }

    /// Pre-order iterator
    pub fn iter(&self) -> impl Iterator<Item = &PlanNode> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }

    pub fn node_count(&self) -> usize {
        self.iter().count()
    }

    /// Collection scanned at the bottom of the left spine
    pub fn base_collection(&self) -> Option<&str> {
        match &self.op {
            PlanOp::Scan { collection, .. } => Some(collection),
            _ => self.children.first().and_then(PlanNode::base_collection),
        }
    }

    /// Qualifiers (alias and collection) visible from this subtree's scans
    pub fn qualifiers(&self) -> Vec<&str> {
        self.iter()
            .filter_map(|n| match &n.op {
                PlanOp::Scan {
                    collection, alias, ..
                } => Some(
                    std::iter::once(collection.as_str())
                        .chain(alias.as_deref())
                        .collect::<Vec<_>>(),
                ),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Recompute `est_rows` and `est_cost` bottom-up
    pub fn annotate(&mut self, stats: &StatisticsStore, model: &CostModel) {
        for child in &mut self.children {
            child.annotate(stats, model);
        }
        let child_cost: f64 = self.children.iter().map(|c| c.est_cost).sum();
        let input_rows = self.children.first().map_or(1.0, |c| c.est_rows);
        let last_rows = self.children.last().map_or(1.0, |c| c.est_rows);

        let (rows, own_cost) = match &self.op {
            PlanOp::Scan {
                collection, index, ..
            } => {
                let rows = stats.row_count(collection) as f64;
                let size = stats.avg_row_size(collection);
                match index {
                    Some(probe) => {
                        let sel = stats.selectivity(Some(collection), &probe.predicate);
                        (rows * sel, model.index_scan(rows, size, sel))
                    }
                    None => (rows, model.seq_scan(rows, size)),
                }
            }
            PlanOp::Input => (crate::stats::DEFAULT_ROW_COUNT as f64, 0.0),
            PlanOp::Filter { predicate } => {
                let sel = stats.selectivity(self.base_collection(), predicate);
                (input_rows * sel, model.per_row(input_rows))
            }
            PlanOp::Project { distinct, .. } => {
                let rows = if *distinct {
                    input_rows * DEFAULT_SELECTIVITY
                } else {
                    input_rows
                };
                (rows, model.per_row(input_rows))
            }
            PlanOp::Join { join_type, on, .. } => {
                let left = input_rows;
                let right = self.children.get(1).map_or(1.0, |c| c.est_rows);
                let sel = match (join_type, on) {
                    (JoinType::Cross, _) | (_, None) => 1.0,
                    (_, Some(on)) => self.join_selectivity(on, stats),
                };
                let mut rows = left * right * sel;
                if matches!(join_type, JoinType::Left | JoinType::Full) {
                    rows = rows.max(left);
                }
                if matches!(join_type, JoinType::Right | JoinType::Full) {
                    rows = rows.max(right);
                }
                let algorithm = match self.algorithm {
                    Some(Algorithm::Join(a)) => a,
                    _ => JoinAlgorithm::Hash,
                };
                (rows, model.join(algorithm, left, right))
            }
            PlanOp::Sort { keys } => {
                let size = self
                    .base_collection()
                    .map_or(crate::stats::DEFAULT_ROW_SIZE, |c| stats.avg_row_size(c));
                (input_rows, model.sort(input_rows, keys.len(), size))
            }
            PlanOp::Aggregate { group_by, .. } => {
                if group_by.is_empty() {
                    (1.0, model.aggregate(input_rows, false))
                } else {
                    let collection = self.base_collection().unwrap_or_default();
                    let groups = group_by
                        .iter()
                        .map(|k| stats.cardinality(collection, k) as f64)
                        .product::<f64>()
                        .min(input_rows)
                        .max(1.0);
                    (groups, model.aggregate(input_rows, true))
                }
            }
            PlanOp::Limit { count, offset } => {
                let after_offset = (input_rows - *offset as f64).max(0.0);
                let rows = count.map_or(after_offset, |c| after_offset.min(c as f64));
                (rows, 0.0)
            }
            PlanOp::Union { distinct } => {
                let rows: f64 = self.children.iter().map(|c| c.est_rows).sum();
                let dedup = if *distinct { model.per_row(rows) } else { 0.0 };
                (rows, dedup)
            }
            PlanOp::Window { .. } => (input_rows, model.per_row(input_rows)),
            PlanOp::GraphMatch { elements } => {
                let rows = input_rows.max(1.0) * (*elements as f64).max(1.0);
                (rows, model.per_row(rows))
            }
            _ => (last_rows, 0.0),
        };
        self.est_rows = rows.max(0.0);
        self.est_cost = child_cost + own_cost;
    }

    fn join_selectivity(&self, on: &Expr, stats: &StatisticsStore) -> f64 {
        let equi = on.conjuncts().into_iter().find_map(|c| match c {
            Expr::Binary {
                op: quarry_core::BinaryOp::Eq,
                left,
                right,
            } => match (left.as_ref(), right.as_ref()) {
                (Expr::Field(l), Expr::Field(r)) => Some((l.clone(), r.clone())),
                _ => None,
            },
            _ => None,
        });
        match equi {
            Some((l, r)) => {
                let left = self.children.first().and_then(PlanNode::base_collection);
                let right = self.children.get(1).and_then(PlanNode::base_collection);
                let lc = stats.cardinality(left.unwrap_or_default(), &l);
                let rc = stats.cardinality(right.unwrap_or_default(), &r);
                1.0 / lc.max(rc).max(1) as f64
            }
            None => DEFAULT_SELECTIVITY,
        }
    }

    /// One-line description used by EXPLAIN
    pub fn describe(&self) -> String {
        let detail = match &self.op {
            PlanOp::Scan {
                collection,
                alias,
                columns,
                index,
            } => {
                let mut s = collection.clone();
                if let Some(a) = alias {
                    s.push_str(&format!(" AS {a}"));
                }
                if let Some(cols) = columns {
                    s.push_str(&format!(" columns=[{}]", cols.join(", ")));
                }
                if let Some(probe) = index {
                    s.push_str(&format!(" index={} ({})", probe.index, probe.predicate));
                }
                s
            }
            PlanOp::Filter { predicate } => predicate.to_string(),
            PlanOp::Project {
                fields, distinct, ..
            } => {
                let prefix = if *distinct { "DISTINCT " } else { "" };
                format!("{prefix}{}", fields.join(", "))
            }
            PlanOp::Join {
                join_type,
                on,
                right,
            } => match on {
                Some(on) => format!("{} {right} ON {on}", join_type.keyword()),
                None => format!("{} {right}", join_type.keyword()),
            },
            PlanOp::Sort { keys } => keys
                .iter()
                .map(|k| {
                    if k.descending {
                        format!("{} DESC", k.column)
                    } else {
                        k.column.clone()
                    }
                })
                .collect::<Vec<_>>()
                .join(", "),
            PlanOp::Aggregate {
                group_by,
                aggregates,
            } => {
                if group_by.is_empty() {
                    aggregates.join(", ")
                } else {
                    format!("{} BY {}", aggregates.join(", "), group_by.join(", "))
                }
            }
            PlanOp::Limit { count, offset } => match count {
                Some(c) => format!("{c} OFFSET {offset}"),
                None => format!("ALL OFFSET {offset}"),
            },
            PlanOp::Union { distinct } => {
                if *distinct {
                    "DISTINCT".into()
                } else {
                    "ALL".into()
                }
            }
            PlanOp::Cte { name } | PlanOp::VarBind { name } | PlanOp::ForEach { name } => {
                name.clone()
            }
            PlanOp::Window {
                function,
                partition_by,
            } => {
                if partition_by.is_empty() {
                    function.clone()
                } else {
                    format!("{function} PARTITION BY {}", partition_by.join(", "))
                }
            }
            PlanOp::GraphMatch { elements } => format!("{elements} elements"),
            PlanOp::GraphPath { kind } | PlanOp::Passthrough { kind } => kind.to_string(),
            PlanOp::Write { kind, target } => format!("{kind} {target}"),
            PlanOp::Input | PlanOp::Options => String::new(),
        };
        let mut line = self.kind().to_string();
        if !detail.is_empty() {
            line.push(' ');
            line.push_str(&detail);
        }
        line.push_str(&format!(
            " (rows={:.0} cost={:.2}",
            self.est_rows, self.est_cost
        ));
        if let Some(algorithm) = self.algorithm {
            line.push_str(&format!(" algorithm={algorithm}"));
        }
        line.push(')');
        line
    }
}

/// Rewrite the first node (pre-order) for which `f` returns a replacement
pub fn rewrite_first(
    node: &PlanNode,
    f: &dyn Fn(&PlanNode) -> Option<PlanNode>,
) -> Option<PlanNode> {
    if let Some(replaced) = f(node) {
        return Some(replaced);
    }
    for (i, child) in node.children.iter().enumerate() {
        if let Some(replaced) = rewrite_first(child, f) {
            let mut out = node.clone();
            out.children[i] = replaced;
            return Some(out);
        }
    }
    None
}

/// Strip a leading qualifier known to the plan (`u.age` -> `age`)
pub fn unqualified<'a>(path: &'a str, qualifiers: &[&str]) -> &'a str {
    match path.split_once('.') {
        Some((head, rest)) if qualifiers.contains(&head) => rest,
        _ => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::BinaryOp;

    fn scan(collection: &str) -> PlanNode {
        PlanNode::new(PlanOp::Scan {
            collection: collection.into(),
            alias: None,
            columns: None,
            index: None,
        })
    }

    #[test]
    fn test_annotate_scan_filter_limit() {
        let stats = StatisticsStore::new();
        let model = CostModel::default();
        let mut plan = PlanNode::new(PlanOp::Limit {
            count: Some(5),
            offset: 0,
        })
        .with_child(
            PlanNode::new(PlanOp::Filter {
                predicate: Expr::eq(Expr::field("age"), Expr::lit(3)),
            })
            .with_child(scan("users")),
        );
        plan.annotate(&stats, &model);

        let filter = &plan.children[0];
        assert!((filter.est_rows - 10.0).abs() < 1e-9);
        assert!((filter.est_cost - (23.0 + 2.5)).abs() < 1e-9);
        assert!((plan.est_rows - 5.0).abs() < 1e-9);
        assert_eq!(plan.est_cost, filter.est_cost);
    }

    #[test]
    fn test_annotate_join_uses_key_cardinality() {
        let stats = StatisticsStore::new();
        let model = CostModel::default();
        let on = Expr::eq(Expr::field("u.id"), Expr::field("o.user_id"));
        let mut plan = PlanNode::new(PlanOp::Join {
            join_type: JoinType::Inner,
            on: Some(on),
            right: "orders".into(),
        })
        .with_children([scan("users"), scan("orders")]);
        plan.annotate(&stats, &model);
        // 1000 * 1000 / 100
        assert!((plan.est_rows - 10_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_rewrite_first_replaces_deepest_match_once() {
        let plan = PlanNode::new(PlanOp::Filter {
            predicate: Expr::binary(BinaryOp::Gt, Expr::field("a"), Expr::lit(1)),
        })
        .with_child(scan("t"));
        let rewritten = rewrite_first(&plan, &|n| match &n.op {
            PlanOp::Scan { .. } => Some(scan("other")),
            _ => None,
        })
        .unwrap();
        assert_eq!(rewritten.base_collection(), Some("other"));
        assert_eq!(plan.base_collection(), Some("t"));
    }

    #[test]
    fn test_describe_line() {
        let mut node = scan("users");
        node.est_rows = 3.0;
        node.est_cost = 1.234;
        node.algorithm = Some(Algorithm::SeqScan);
        assert_eq!(node.describe(), "SCAN users (rows=3 cost=1.23 algorithm=seq_scan)");
    }
}
