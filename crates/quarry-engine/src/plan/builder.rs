//! Action tree to logical plan.

use super::{PlanNode, PlanOp, SortSpec};
use crate::cost::CostModel;
use crate::stats::StatisticsStore;
use quarry_core::{Action, ActionKind, Expr, Params, Projection};
use std::sync::Arc;
use tracing::debug;

/// Builds annotated logical plans and physicalizes them.
#[derive(Debug, Clone)]
pub struct Planner {
    pub(crate) stats: Arc<StatisticsStore>,
    pub(crate) model: CostModel,
}

fn sort_specs(keys: &[quarry_core::SortKey]) -> Vec<SortSpec> {
    keys.iter()
        .map(|k| SortSpec {
            column: k.expr.output_name(),
            descending: k.descending,
        })
        .collect()
}

/// Input columns a projection list reads; `None` when it contains `*`
fn required_columns(fields: &[Projection]) -> Option<Vec<String>> {
    if fields.is_empty() || fields.iter().any(Projection::is_star) {
        return None;
    }
    let mut cols: Vec<String> = fields
        .iter()
        .flat_map(|f| f.expr.referenced_fields())
        .map(str::to_string)
        .collect();
    cols.sort();
    cols.dedup();
    Some(cols)
}

impl Planner {
    pub fn new(stats: Arc<StatisticsStore>) -> Self {
        Self {
            stats,
            model: CostModel::default(),
        }
    }

    pub fn with_cost_model(mut self, model: CostModel) -> Self {
        self.model = model;
        self
    }

    pub fn statistics(&self) -> &StatisticsStore {
        &self.stats
    }

    pub fn cost_model(&self) -> &CostModel {
        &self.model
    }

    /// Logical plan for a whole tree, with estimates filled in
    pub fn logical(&self, action: &Action) -> PlanNode {
        let mut plan = self.plan(action, None);
        plan.annotate(&self.stats, &self.model);
        debug!(
            nodes = plan.node_count(),
            est_cost = plan.est_cost,
            "built logical plan"
        );
        plan
    }

    fn plan(&self, action: &Action, input: Option<PlanNode>) -> PlanNode {
        let node = match (&action.kind, &action.params) {
            (ActionKind::Select, Params::Select(_)) => return self.plan_select(action, input),
            (ActionKind::Where | ActionKind::Filter | ActionKind::Having, Params::Predicate(p)) => {
                let filter = PlanNode::new(PlanOp::Filter {
                    predicate: p.predicate.clone(),
                });
                self.chain(filter, input)
            }
            (ActionKind::Order | ActionKind::By, Params::Order(p)) => self.chain(
                PlanNode::new(PlanOp::Sort {
                    keys: sort_specs(&p.keys),
                }),
                input,
            ),
            (ActionKind::Limit | ActionKind::Offset, Params::Limit(p)) => self.chain(
                PlanNode::new(PlanOp::Limit {
                    count: p.count,
                    offset: p.offset,
                }),
                input,
            ),
            (ActionKind::Project | ActionKind::Return, Params::Project(p)) => self.chain(
                PlanNode::new(PlanOp::Project {
                    fields: p.fields.iter().map(Projection::output_name).collect(),
                    required: required_columns(&p.fields),
                    distinct: p.distinct,
                }),
                input,
            ),
            (ActionKind::Group, Params::Group(p)) => self.chain(
                PlanNode::new(PlanOp::Aggregate {
                    group_by: p.keys.iter().map(Expr::output_name).collect(),
                    aggregates: Vec::new(),
                }),
                input,
            ),
            (ActionKind::Summarize | ActionKind::Aggregate, Params::Summarize(p)) => self.chain(
                PlanNode::new(PlanOp::Aggregate {
                    group_by: p.group_by.iter().map(Expr::output_name).collect(),
                    aggregates: p.aggregates.iter().map(Projection::output_name).collect(),
                }),
                input,
            ),
            (
                ActionKind::Count
                | ActionKind::Sum
                | ActionKind::Avg
                | ActionKind::Min
                | ActionKind::Max,
                _,
            ) => {
                let source = self.pipeline(&action.children, input);
                PlanNode::new(PlanOp::Aggregate {
                    group_by: Vec::new(),
                    aggregates: vec![action.kind.as_str().to_ascii_lowercase()],
                })
                .with_child(source)
            }
            (ActionKind::Union, Params::Union(p)) => PlanNode::new(PlanOp::Union {
                distinct: p.distinct,
            })
            .with_children(action.children.iter().map(|c| self.plan(c, input.clone()))),
            (ActionKind::With, Params::Binding(p)) => PlanNode::new(PlanOp::Cte {
                name: p.name.clone(),
            })
            .with_children(action.children.iter().map(|c| self.plan(c, None))),
            (ActionKind::Let, Params::Binding(p)) => PlanNode::new(PlanOp::VarBind {
                name: p.name.clone(),
            })
            .with_children(action.children.iter().map(|c| self.plan(c, None))),
            (ActionKind::For | ActionKind::Foreach, Params::Binding(p)) => {
                PlanNode::new(PlanOp::ForEach {
                    name: p.name.clone(),
                })
                .with_child(self.pipeline(&action.children, input))
            }
            (ActionKind::Window, Params::Window(p)) => self.chain(
                PlanNode::new(PlanOp::Window {
                    function: p.function.name().to_string(),
                    partition_by: p.partition_by.iter().map(Expr::output_name).collect(),
                }),
                input,
            ),
            (ActionKind::Match, Params::Pattern(p)) => {
                let matched = PlanNode::new(PlanOp::GraphMatch {
                    elements: p.elements.len(),
                });
                let matched = self.chain(matched, input);
                self.pipeline(&action.children, Some(matched))
                    .with_action_if_unset(action.id)
            }
            (kind, Params::Path(_)) => self.chain(PlanNode::new(PlanOp::GraphPath { kind: *kind }), input),
            (ActionKind::Options, _) => {
                PlanNode::new(PlanOp::Options).with_child(self.pipeline(&action.children, input))
            }
            (kind, Params::Write(p)) => {
                let scan = PlanNode::new(PlanOp::Scan {
                    collection: p.target.clone(),
                    alias: None,
                    columns: None,
                    index: None,
                });
                let body = if action.children.is_empty() {
                    scan
                } else {
                    self.pipeline(&action.children, Some(scan))
                };
                PlanNode::new(PlanOp::Write {
                    kind: *kind,
                    target: p.target.clone(),
                })
                .with_child(body)
            }
            (kind, _) => {
                let node = PlanNode::new(PlanOp::Passthrough { kind: *kind });
                if action.children.is_empty() {
                    self.chain(node, input)
                } else {
                    node.with_child(self.pipeline(&action.children, input))
                }
            }
        };
        node.with_action_if_unset(action.id)
    }

    /// Children of one parent, each fed the previous child's output
    fn pipeline(&self, children: &[Action], input: Option<PlanNode>) -> PlanNode {
        let mut current = input;
        for child in children {
            current = Some(self.plan(child, current));
        }
        current.unwrap_or_else(|| PlanNode::new(PlanOp::Input))
    }

    fn chain(&self, node: PlanNode, input: Option<PlanNode>) -> PlanNode {
        node.with_child(input.unwrap_or_else(|| PlanNode::new(PlanOp::Input)))
    }

    /// SCAN -> JOIN* -> FILTER -> AGGREGATE -> FILTER(having) -> WINDOW* ->
    /// PROJECT -> SORT -> LIMIT
    fn plan_select(&self, action: &Action, input: Option<PlanNode>) -> PlanNode {
        let Some(select) = action.params.as_select() else {
            return self.chain(PlanNode::new(PlanOp::Input), input);
        };

        let source_child = action.children.iter().find(|c| {
            matches!(
                c.kind,
                ActionKind::Select
                    | ActionKind::Union
                    | ActionKind::Values
                    | ActionKind::Pipe
                    | ActionKind::With
                    | ActionKind::Load
            )
        });
        let mut current = match (source_child, &select.from) {
            (Some(child), _) => self.plan(child, None),
            (None, Some(from)) => PlanNode::new(PlanOp::Scan {
                collection: from.name.clone(),
                alias: from.alias.clone(),
                columns: None,
                index: None,
            }),
            (None, None) => input.unwrap_or_else(|| PlanNode::new(PlanOp::Input)),
        };

        let aggregated = select.fields.iter().any(|f| f.expr.contains_aggregate())
            || action.child(ActionKind::Group).is_some()
            || action.child(ActionKind::Having).is_some();
        let mut group_by = Vec::new();

        for child in &action.children {
            match (&child.kind, &child.params) {
                (ActionKind::Join, Params::Join(j)) => {
                    let right = PlanNode::new(PlanOp::Scan {
                        collection: j.target.name.clone(),
                        alias: j.target.alias.clone(),
                        columns: None,
                        index: None,
                    });
                    current = PlanNode::new(PlanOp::Join {
                        join_type: j.join_type,
                        on: j.on.clone(),
                        right: j.target.name.clone(),
                    })
                    .with_children([current, right])
                    .with_action(child.id);
                }
                (ActionKind::Where, Params::Predicate(p)) => {
                    current = PlanNode::new(PlanOp::Filter {
                        predicate: p.predicate.clone(),
                    })
                    .with_child(current)
                    .with_action(child.id);
                }
                (ActionKind::Group, Params::Group(g)) => {
                    group_by = g.keys.iter().map(Expr::output_name).collect();
                }
                _ => {}
            }
        }

        if aggregated {
            let aggregates = select
                .fields
                .iter()
                .filter(|f| f.expr.contains_aggregate())
                .map(Projection::output_name)
                .collect();
            current = PlanNode::new(PlanOp::Aggregate {
                group_by,
                aggregates,
            })
            .with_child(current);
            if let Some(having) = action.child(ActionKind::Having) {
                if let Some(p) = having.params.as_predicate() {
                    current = PlanNode::new(PlanOp::Filter {
                        predicate: p.predicate.clone(),
                    })
                    .with_child(current)
                    .with_action(having.id);
                }
            }
        }

        for child in action.children.iter().filter(|c| c.kind == ActionKind::Window) {
            current = self.plan(child, Some(current));
        }

        let fields: Vec<String> = select.fields.iter().map(Projection::output_name).collect();
        // sort keys outside the select list are read before projection
        let required = required_columns(&select.fields).map(|mut cols| {
            if let Some(order) = action.child(ActionKind::Order).and_then(|o| o.params.as_order()) {
                for key in &order.keys {
                    for field in key.expr.referenced_fields() {
                        if !fields.iter().any(|f| f == field) && !cols.iter().any(|c| c == field) {
                            cols.push(field.to_string());
                        }
                    }
                }
            }
            cols.sort();
            cols
        });
        current = PlanNode::new(PlanOp::Project {
            fields,
            required,
            distinct: select.distinct,
        })
        .with_child(current);

        for child in &action.children {
            if matches!(
                child.kind,
                ActionKind::Order | ActionKind::Limit | ActionKind::Offset
            ) {
                current = self.plan(child, Some(current));
            }
        }
        current.with_action_if_unset(action.id)
    }
}

impl PlanNode {
    fn with_action_if_unset(mut self, id: quarry_core::ActionId) -> Self {
        if self.action_id.is_none() {
            self.action_id = Some(id);
        }
        self
    }
}
