//! XPath location paths to a SELECT.
//!
//! The collection is the path up to the step whose child is its singular
//! form (`users/user`) or `*`; that child step is the row, its predicates
//! filter, and the steps after it name the projected field. Without such a
//! pair the first step is the collection.

use super::extract::{convert_expr, number_value};
use super::BuildContext;
use crate::cst::SyntaxNode;
use crate::template::singular;
use quarry_core::{
    Action, ActionKind, Expr, LimitParams, Params, PredicateParams, Projection, QueryError,
    Result, SelectParams, Source,
};

fn node_test(step: &SyntaxNode) -> Result<&SyntaxNode> {
    step.first()
        .ok_or_else(|| QueryError::validation("XPath step without a node test"))
}

fn step_name(step: &SyntaxNode) -> Option<&str> {
    step.first().filter(|t| t.is("name")).map(SyntaxNode::text)
}

/// Index of the row step; 0 when no collection/row pair exists
fn row_index(steps: &[SyntaxNode]) -> usize {
    for (i, pair) in steps.windows(2).enumerate() {
        let Some(parent) = step_name(&pair[0]) else {
            continue;
        };
        let child_is_row = match pair[1].first() {
            Some(test) if test.is("wildcard") => true,
            Some(test) if test.is("name") => {
                test.text() != parent && test.text() == singular(parent)
            }
            _ => false,
        };
        if child_is_row {
            return i + 1;
        }
    }
    0
}

pub(super) fn build(node: &SyntaxNode, ctx: &mut BuildContext) -> Result<Action> {
    let steps = &node.children;
    if steps.is_empty() {
        return Err(QueryError::validation("empty XPath expression"));
    }

    let row = row_index(steps);
    let collection_steps = if row == 0 { &steps[..1] } else { &steps[..row] };
    let mut collection = Vec::with_capacity(collection_steps.len());
    for step in collection_steps {
        match step_name(step) {
            Some(name) => collection.push(name.to_string()),
            None => {
                return Err(QueryError::validation(format!(
                    "XPath collection step '{}' must be an element name",
                    node_test(step)?.text()
                )))
            }
        }
        if row > 0 && step.child("predicate").is_some() {
            ctx.skip("predicate on a collection step")?;
        }
    }

    let mut conditions = Vec::new();
    let mut position: Option<u64> = None;
    for predicate in steps[row].children_by("predicate") {
        let Some(expr) = predicate.first() else {
            continue;
        };
        if expr.is("number") {
            let n = number_value(expr.text())?
                .as_u64()
                .filter(|n| *n >= 1)
                .ok_or_else(|| QueryError::value(format!("invalid position {}", expr.text())))?;
            if position.is_some() {
                ctx.skip("second position predicate")?;
            } else {
                position = Some(n);
            }
            continue;
        }
        conditions.extend(convert_expr(expr, ctx)?);
    }

    let mut children = Vec::new();
    if let Some(predicate) = Expr::conjoin(conditions) {
        children.push(Action::new(
            ActionKind::Where,
            Params::Predicate(PredicateParams { predicate }),
        ));
    }
    if let Some(n) = position {
        children.push(Action::new(
            ActionKind::Limit,
            Params::Limit(LimitParams {
                count: Some(1),
                offset: n - 1,
            }),
        ));
    }

    let field_start = if row == 0 { 1 } else { row + 1 };
    let mut path = Vec::new();
    let mut star = false;
    for step in &steps[field_start..] {
        if step.child("predicate").is_some() {
            ctx.skip("predicate on a field step")?;
        }
        let test = node_test(step)?;
        match test.rule {
            "name" | "attribute" => path.push(test.text().to_string()),
            "wildcard" => star = true,
            "text_fn" => {}
            _ => ctx.skip(&format!("'{}' step", test.text()))?,
        }
    }

    let field = if path.is_empty() || star {
        Projection::new(Expr::Star)
    } else {
        Projection::new(Expr::field(path.join(".")))
    };

    Ok(Action::new(
        ActionKind::Select,
        Params::Select(SelectParams {
            fields: vec![field],
            from: Some(Source::new(collection.join("."))),
            distinct: false,
        }),
    )
    .with_children(children))
}

#[cfg(test)]
mod tests {
    use crate::bridge::ParserBridge;
    use crate::format::QueryFormat;
    use quarry_core::{Action, ActionKind, ConversionMode, Expr};

    fn parse(path: &str) -> Action {
        ParserBridge::new()
            .parse(path, QueryFormat::XPath)
            .unwrap()
            .action
    }

    #[test]
    fn test_singular_child_is_the_row() {
        let action = parse("//users/user[age>18]/name");
        let select = action.params.as_select().unwrap();
        assert_eq!(select.from.as_ref().unwrap().name, "users");
        assert_eq!(select.fields[0].expr, Expr::field("name"));
        let filter = action.children[0].params.as_predicate().unwrap();
        assert_eq!(filter.predicate.to_string(), "age > 18");
    }

    #[test]
    fn test_first_step_is_the_collection() {
        let action = parse("/users[age > 25]/name");
        let select = action.params.as_select().unwrap();
        assert_eq!(select.from.as_ref().unwrap().name, "users");
        assert_eq!(action.children[0].kind, ActionKind::Where);
    }

    #[test]
    fn test_nested_collection_and_attribute() {
        let action = parse("/store/books/book/@isbn");
        let select = action.params.as_select().unwrap();
        assert_eq!(select.from.as_ref().unwrap().name, "store.books");
        assert_eq!(select.fields[0].expr, Expr::field("isbn"));
    }

    #[test]
    fn test_position_predicate_is_a_limit() {
        let action = parse("//users/user[2]");
        let limit = action.children[0].params.as_limit().unwrap();
        assert_eq!((limit.count, limit.offset), (Some(1), 1));
        assert!(action.params.as_select().unwrap().fields[0].is_star());
    }

    #[test]
    fn test_field_predicates_by_mode() {
        let strict = ParserBridge::new().with_mode(ConversionMode::Strict);
        assert!(strict.parse("/users/name[1]", QueryFormat::XPath).is_err());

        let lenient = ParserBridge::new().with_mode(ConversionMode::Lenient);
        let outcome = lenient.parse("/users/name[1]", QueryFormat::XPath).unwrap();
        assert_eq!(outcome.warnings.len(), 1);
    }
}
