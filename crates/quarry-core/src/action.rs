//! Query action nodes.

use crate::error::{QueryError, Result};
use crate::kind::ActionKind;
use crate::params::Params;
use crate::schema::{self, ChildRule};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Node id, unique within one tree. `0` means unassigned.
pub type ActionId = u32;

/// Byte range of the source text a node was parsed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn slice<'a>(&self, input: &'a str) -> &'a str {
        input.get(self.start..self.end).unwrap_or_default()
    }
}

/// One node of a query action tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default)]
    pub id: ActionId,
    pub kind: ActionKind,
    #[serde(default)]
    pub params: Params,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl Action {
    pub fn new(kind: ActionKind, params: Params) -> Self {
        Self {
            id: 0,
            kind,
            params,
            children: Vec::new(),
            span: None,
        }
    }

    /// Node with no parameters
    pub fn bare(kind: ActionKind) -> Self {
        Self::new(kind, Params::None)
    }

    pub fn with_child(mut self, child: Action) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Action>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Number ids 1..=n in pre-order
    pub fn assign_ids(&mut self) {
        fn walk(action: &mut Action, next: &mut ActionId) {
            *next += 1;
            action.id = *next;
            for child in &mut action.children {
                walk(child, next);
            }
        }
        let mut next = 0;
        walk(self, &mut next);
    }

    /// Pre-order iterator over the tree
    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(next.children.iter().rev());
            Some(next)
        })
    }

    pub fn node_count(&self) -> usize {
        self.iter().count()
    }

    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(Action::depth).max().unwrap_or(0)
    }

    pub fn find(&self, id: ActionId) -> Option<&Action> {
        self.iter().find(|a| a.id == id)
    }

    /// First direct child of the given kind
    pub fn child(&self, kind: ActionKind) -> Option<&Action> {
        self.children.iter().find(|c| c.kind == kind)
    }

    pub fn contains_kind(&self, kind: ActionKind) -> bool {
        self.iter().any(|a| a.kind == kind)
    }

    pub fn has_writes(&self) -> bool {
        self.iter().any(|a| a.kind.is_write())
    }

    /// Check record/kind agreement, required params, child legality and id
    /// uniqueness for the whole tree.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for action in self.iter() {
            if action.id != 0 && !seen.insert(action.id) {
                return Err(QueryError::validation(format!(
                    "duplicate action id {}",
                    action.id
                )));
            }
            action.validate_node()?;
        }
        Ok(())
    }

    fn validate_node(&self) -> Result<()> {
        let expected = self.kind.record();
        let actual = self.params.record();
        if expected != actual {
            return Err(QueryError::validation(format!(
                "{} expects {:?} params, found {:?}",
                self.kind, expected, actual
            )));
        }
        let spec = schema::schema_for(self.kind);
        let missing = schema::missing_required(&self.params, &spec);
        if let Some(name) = missing.first() {
            return Err(QueryError::validation(format!(
                "{} is missing required parameter '{}'",
                self.kind, name
            )));
        }
        match &spec.children {
            ChildRule::Leaf if !self.children.is_empty() => Err(QueryError::validation(format!(
                "{} does not accept children",
                self.kind
            ))),
            ChildRule::Any { min, max } => {
                let n = self.children.len();
                if n < *min || max.is_some_and(|m| n > m) {
                    return Err(QueryError::validation(format!(
                        "{} has {} children, expected {}..{}",
                        self.kind,
                        n,
                        min,
                        max.map_or("*".to_string(), |m| m.to_string())
                    )));
                }
                Ok(())
            }
            ChildRule::Ordered { slots } => {
                let kinds: Vec<ActionKind> = self.children.iter().map(|c| c.kind).collect();
                if schema::match_slots(slots, &kinds) {
                    Ok(())
                } else {
                    Err(QueryError::validation(format!(
                        "{} children {:?} are not in a legal order",
                        self.kind,
                        kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>()
                    )))
                }
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinaryOp, Expr};
    use crate::params::{LimitParams, PredicateParams, Projection, SelectParams, Source};

    fn select_users() -> Action {
        Action::new(
            ActionKind::Select,
            Params::Select(SelectParams {
                fields: vec![Projection::new(Expr::Star)],
                from: Some(Source::new("users")),
                distinct: false,
            }),
        )
    }

    fn where_age() -> Action {
        Action::new(
            ActionKind::Where,
            Params::Predicate(PredicateParams {
                predicate: Expr::binary(BinaryOp::Gt, Expr::field("age"), Expr::lit(25)),
            }),
        )
    }

    fn limit(n: u64) -> Action {
        Action::new(
            ActionKind::Limit,
            Params::Limit(LimitParams {
                count: Some(n),
                offset: 0,
            }),
        )
    }

    #[test]
    fn test_assign_ids_preorder() {
        let mut tree = select_users().with_child(where_age()).with_child(limit(1));
        tree.assign_ids();
        let ids: Vec<_> = tree.iter().map(|a| (a.id, a.kind)).collect();
        assert_eq!(
            ids,
            vec![
                (1, ActionKind::Select),
                (2, ActionKind::Where),
                (3, ActionKind::Limit)
            ]
        );
        assert_eq!(tree.depth(), 2);
    }

    #[test]
    fn test_validate_accepts_select_clauses() {
        let mut tree = select_users().with_child(where_age()).with_child(limit(1));
        tree.assign_ids();
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_wrong_record() {
        let bad = Action::new(ActionKind::Where, Params::Limit(LimitParams::default()));
        let err = bad.validate().unwrap_err();
        assert!(err.to_string().contains("WHERE expects"));
    }

    #[test]
    fn test_validate_rejects_clause_order() {
        let tree = select_users().with_child(limit(1)).with_child(where_age());
        assert!(tree.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_leaf_children() {
        let values = Action::new(
            ActionKind::Values,
            Params::Values(crate::params::ValuesParams::default()),
        );
        assert!(values.clone().validate().is_ok());
        assert!(values.with_child(limit(1)).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let mut tree = select_users().with_child(where_age());
        tree.id = 1;
        tree.children[0].id = 1;
        assert!(tree.validate().is_err());
    }

    #[test]
    fn test_span_slice() {
        let span = Span::new(7, 11);
        assert_eq!(span.slice("SELECT name FROM"), "name");
        assert_eq!(Span::new(3, 99).slice("abc"), "");
    }
}
