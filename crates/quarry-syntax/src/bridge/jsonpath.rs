//! JSONPath to a SELECT.
//!
//! Member segments up to the first selector (`[?()]`, `[n]`, `[a:b]`, `[*]`)
//! name the collection; members after it name the projected field.

use super::extract::convert_expr;
use super::BuildContext;
use crate::cst::SyntaxNode;
use quarry_core::{
    Action, ActionKind, Expr, LimitParams, Params, PredicateParams, Projection, QueryError,
    Result, SelectParams, Source,
};

fn parse_bound(text: &str) -> Result<Option<i64>> {
    if text.is_empty() {
        return Ok(None);
    }
    text.parse::<i64>()
        .map(Some)
        .map_err(|_| QueryError::value(format!("invalid slice bound '{text}'")))
}

fn slice_limit(text: &str, ctx: &mut BuildContext) -> Result<Option<LimitParams>> {
    let (start, end) = text.split_once(':').unwrap_or((text, ""));
    let (start, end) = (parse_bound(start)?, parse_bound(end)?);
    if start.is_some_and(|s| s < 0) || end.is_some_and(|e| e < 0) {
        ctx.skip("negative slice bound")?;
        return Ok(None);
    }
    let offset = start.unwrap_or(0) as u64;
    let count = end.map(|e| (e as u64).saturating_sub(offset));
    Ok(Some(LimitParams { count, offset }))
}

pub(super) fn build(node: &SyntaxNode, ctx: &mut BuildContext) -> Result<Action> {
    let mut collection = Vec::new();
    let mut field = Vec::new();
    let mut selected = false;
    let mut conditions = Vec::new();
    let mut limit: Option<LimitParams> = None;

    for segment in &node.children {
        match segment.rule {
            "member" if !selected => collection.push(segment.text().to_string()),
            "member" => field.push(segment.text().to_string()),
            "wildcard" => selected = true,
            "filter" => {
                selected = true;
                if let Some(expr) = segment.first() {
                    conditions.extend(convert_expr(expr, ctx)?);
                }
            }
            "index" => {
                selected = true;
                let index: i64 = segment
                    .text()
                    .parse()
                    .map_err(|_| QueryError::value(format!("invalid index '{}'", segment.text())))?;
                if index < 0 {
                    ctx.skip("negative index")?;
                } else {
                    limit = Some(LimitParams {
                        count: Some(1),
                        offset: index as u64,
                    });
                }
            }
            "slice" => {
                selected = true;
                limit = slice_limit(segment.text(), ctx)?.or(limit);
            }
            "descendant" => {
                ctx.skip("recursive descent")?;
                field.push(segment.text().to_string());
            }
            other => ctx.skip(&format!("'{other}' segment"))?,
        }
    }

    let mut children = Vec::new();
    if let Some(predicate) = Expr::conjoin(conditions) {
        children.push(Action::new(
            ActionKind::Where,
            Params::Predicate(PredicateParams { predicate }),
        ));
    }
    if let Some(limit) = limit {
        let kind = if limit.count.is_some() {
            ActionKind::Limit
        } else {
            ActionKind::Offset
        };
        children.push(Action::new(kind, Params::Limit(limit)));
    }

    let projection = if field.is_empty() {
        Projection::new(Expr::Star)
    } else {
        Projection::new(Expr::field(field.join(".")))
    };
    let from = (!collection.is_empty()).then(|| Source::new(collection.join(".")));

    Ok(Action::new(
        ActionKind::Select,
        Params::Select(SelectParams {
            fields: vec![projection],
            from,
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
    use test_case::test_case;

    fn parse(path: &str) -> Action {
        ParserBridge::new()
            .parse(path, QueryFormat::JsonPath)
            .unwrap()
            .action
    }

    #[test]
    fn test_filter_and_field() {
        let action = parse("$.users[?(@.age > 25)].name");
        let select = action.params.as_select().unwrap();
        assert_eq!(select.from.as_ref().unwrap().name, "users");
        assert_eq!(select.fields[0].expr, Expr::field("name"));
        assert_eq!(action.children[0].kind, ActionKind::Where);
    }

    #[test_case("$.users[0]", Some(1), 0; "index")]
    #[test_case("$.users[1:3]", Some(2), 1; "slice")]
    #[test_case("$.users[:2]", Some(2), 0; "open start")]
    #[test_case("$.users[2:]", None, 2; "open end")]
    fn test_positional_selectors(path: &str, count: Option<u64>, offset: u64) {
        let action = parse(path);
        let limit = action.children[0].params.as_limit().unwrap();
        assert_eq!((limit.count, limit.offset), (count, offset));
    }

    #[test]
    fn test_nested_collection() {
        let action = parse("$.store.book[*].title");
        let select = action.params.as_select().unwrap();
        assert_eq!(select.from.as_ref().unwrap().name, "store.book");
        assert_eq!(select.fields[0].expr, Expr::field("title"));
        assert!(action.children.is_empty());
    }

    #[test]
    fn test_root_only_selects_everything() {
        let action = parse("$");
        let select = action.params.as_select().unwrap();
        assert!(select.from.is_none());
        assert!(select.fields[0].is_star());
    }

    #[test]
    fn test_recursive_descent_is_unsupported_in_strict() {
        let strict = ParserBridge::new().with_mode(ConversionMode::Strict);
        assert!(strict.parse("$..name", QueryFormat::JsonPath).is_err());
    }
}
