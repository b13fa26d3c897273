//! Cypher grammar.
//!
//! Clauses: `[OPTIONAL] MATCH pattern, ... [WHERE]`, `CREATE`, `MERGE`,
//! `[DETACH] DELETE`, `SET`, `REMOVE`, `WITH [DISTINCT] ... [WHERE]`,
//! `RETURN [DISTINCT]`, `ORDER BY`, `SKIP`, `LIMIT`.
//!
//! Patterns support multiple labels (`:A:B`), relationship type alternatives
//! (`:A|B`), property maps and variable-length quantifiers (`*`, `*2`,
//! `*1..3`, `*..5`, `*2..`).

use super::common::{dotted, format_errors, ident, integer, kw, kw_node, raw_ident, to_span, Extra};
use super::expr::expression;
use super::Grammar;
use crate::cst::{SyntaxNode, TokenType};
use crate::format::QueryFormat;
use chumsky::prelude::*;
use quarry_core::Result;

const RESERVED: &[&str] = &[
    "MATCH", "OPTIONAL", "WHERE", "RETURN", "WITH", "CREATE", "MERGE", "DELETE", "DETACH", "SET",
    "REMOVE", "ORDER", "BY", "SKIP", "LIMIT", "AS", "AND", "OR", "NOT", "XOR", "IN", "IS", "NULL",
    "STARTS", "ENDS", "CONTAINS", "DISTINCT", "ASC", "DESC", "TRUE", "FALSE",
];

/// Cypher input grammar
pub struct CypherGrammar;

impl Grammar for CypherGrammar {
    fn format(&self) -> QueryFormat {
        QueryFormat::Cypher
    }

    fn parse(&self, input: &str) -> Result<SyntaxNode> {
        cypher_parser()
            .parse(input)
            .into_result()
            .map_err(|errs| format_errors(&errs, input))
    }
}

fn cypher_parser<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> {
    clause()
        .repeated()
        .at_least(1)
        .collect::<Vec<_>>()
        .map_with(|clauses, e| SyntaxNode::node("cypher_query", clauses).with_span(to_span(e.span())))
        .padded()
        .then_ignore(just(';').padded().or_not())
        .then_ignore(end())
}

fn cypher_expr<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    expression(RESERVED)
}

fn comma<'src>() -> impl Parser<'src, &'src str, (), Extra<'src>> + Clone {
    just(',').padded().ignored()
}

// ============================================================================
// Clauses
// ============================================================================

fn clause<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    let where_clause = kw("WHERE")
        .ignore_then(cypher_expr())
        .map(|e| SyntaxNode::node("where_clause", vec![e]));

    let match_clause = kw("OPTIONAL")
        .or_not()
        .then_ignore(kw("MATCH"))
        .then(pattern().separated_by(comma()).at_least(1).collect::<Vec<_>>())
        .then(where_clause.clone().or_not())
        .map(|((optional, patterns), filter)| {
            let mut children = patterns;
            children.extend(filter);
            let text = if optional.is_some() {
                "OPTIONAL MATCH"
            } else {
                "MATCH"
            };
            SyntaxNode::node("match_clause", children).with_text(text)
        });

    let create_clause = kw("CREATE")
        .ignore_then(pattern().separated_by(comma()).at_least(1).collect::<Vec<_>>())
        .map(|patterns| SyntaxNode::node("create_clause", patterns));

    let merge_clause = kw("MERGE")
        .ignore_then(pattern())
        .map(|p| SyntaxNode::node("merge_clause", vec![p]));

    let delete_clause = kw("DETACH")
        .or_not()
        .then_ignore(kw("DELETE"))
        .then(cypher_expr().separated_by(comma()).at_least(1).collect::<Vec<_>>())
        .map(|(detach, targets)| {
            let text = if detach.is_some() {
                "DETACH DELETE"
            } else {
                "DELETE"
            };
            SyntaxNode::node("delete_clause", targets).with_text(text)
        });

    let set_item = choice((
        ident(RESERVED)
            .padded()
            .then_ignore(just("+=").padded())
            .then(properties())
            .map(|(var, props)| SyntaxNode::node("set_merge", vec![props]).with_text(var)),
        dotted(RESERVED)
            .padded()
            .then_ignore(just('=').padded())
            .then(cypher_expr())
            .map(|(path, value)| SyntaxNode::node("set_property", vec![value]).with_text(path)),
    ));
    let set_clause = kw("SET")
        .ignore_then(set_item.separated_by(comma()).at_least(1).collect::<Vec<_>>())
        .map(|items| SyntaxNode::node("set_clause", items));

    let remove_clause = kw("REMOVE")
        .ignore_then(
            dotted(RESERVED)
                .padded()
                .map(|path| SyntaxNode::leaf("field", TokenType::Identifier, path))
                .separated_by(comma())
                .at_least(1)
                .collect::<Vec<_>>(),
        )
        .map(|fields| SyntaxNode::node("remove_clause", fields));

    let with_clause = kw("WITH")
        .ignore_then(projection_body())
        .then(where_clause.or_not())
        .map(|(mut items, filter)| {
            items.extend(filter);
            SyntaxNode::node("with_clause", items)
        });

    let return_clause = kw("RETURN")
        .ignore_then(projection_body())
        .map(|items| SyntaxNode::node("return_clause", items));

    let skip = kw("SKIP")
        .ignore_then(integer().padded())
        .map(|n| SyntaxNode::node("skip_clause", Vec::new()).with_text(n.to_string()));
    let limit = kw("LIMIT")
        .ignore_then(integer().padded())
        .map(|n| SyntaxNode::node("limit_clause", Vec::new()).with_text(n.to_string()));

    choice((
        match_clause,
        create_clause,
        merge_clause,
        delete_clause,
        set_clause,
        remove_clause,
        with_clause,
        return_clause,
        order_by(),
        skip,
        limit,
    ))
    .boxed()
}

/// `[DISTINCT] item [AS alias], ...`
fn projection_body<'src>() -> impl Parser<'src, &'src str, Vec<SyntaxNode>, Extra<'src>> + Clone {
    let item = cypher_expr()
        .then(kw("AS").ignore_then(raw_ident().padded()).or_not())
        .map(|(expr, alias)| {
            let mut children = vec![expr];
            children.extend(alias.map(|a| SyntaxNode::ident("alias", a)));
            SyntaxNode::node("return_item", children)
        });

    kw_node("DISTINCT")
        .or_not()
        .then(item.separated_by(comma()).at_least(1).collect::<Vec<_>>())
        .map(|(distinct, items)| {
            let mut children: Vec<SyntaxNode> = distinct.into_iter().collect();
            children.extend(items);
            children
        })
}

fn order_by<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    let direction = choice((
        kw("ASCENDING").to("ASC"),
        kw("ASC").to("ASC"),
        kw("DESCENDING").to("DESC"),
        kw("DESC").to("DESC"),
    ));
    let item = cypher_expr()
        .then(direction.or_not())
        .map(|(expr, dir)| SyntaxNode::node("order_item", vec![expr]).with_text(dir.unwrap_or("ASC")));

    kw("ORDER")
        .then(kw("BY"))
        .ignore_then(item.separated_by(comma()).at_least(1).collect::<Vec<_>>())
        .map(|items| SyntaxNode::node("order_by", items))
}

// ============================================================================
// Patterns
// ============================================================================

fn pattern<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    node_pattern()
        .then(rel_pattern().then(node_pattern()).repeated().collect::<Vec<_>>())
        .map(|(first, rest)| {
            let mut children = vec![first];
            for (rel, node) in rest {
                children.push(rel);
                children.push(node);
            }
            SyntaxNode::node("pattern", children)
        })
        .labelled("pattern like (a:User)-[:FOLLOWS]->(b)")
}

/// `{key: expr, ...}`
fn properties<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    let property = raw_ident()
        .padded()
        .then_ignore(just(':').padded())
        .then(cypher_expr())
        .map(|(key, value)| SyntaxNode::node("property", vec![value]).with_text(key));

    property
        .separated_by(comma())
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(just('{').padded(), just('}').padded())
        .map(|props| SyntaxNode::node("properties", props))
}

fn labels<'src>() -> impl Parser<'src, &'src str, Vec<SyntaxNode>, Extra<'src>> + Clone {
    just(':')
        .padded()
        .ignore_then(raw_ident())
        .map(|l| SyntaxNode::ident("label", l))
        .repeated()
        .collect::<Vec<_>>()
}

fn node_pattern<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    ident(RESERVED)
        .padded()
        .or_not()
        .then(labels())
        .then(properties().or_not())
        .delimited_by(just('(').padded(), just(')').padded())
        .map(|((var, labels), props)| {
            let mut children: Vec<SyntaxNode> = var
                .map(|v| SyntaxNode::leaf("variable", TokenType::Variable, v))
                .into_iter()
                .collect();
            children.extend(labels);
            children.extend(props);
            SyntaxNode::node("node_pattern", children)
        })
        .labelled("node pattern like (n:User {name: 'x'})")
}

/// Quantifier text `min..max`; a missing bound is left empty
fn quantifier<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    let number = text::int(10);
    just('*')
        .padded()
        .ignore_then(
            number
                .or_not()
                .then(just("..").ignore_then(number.or_not()).or_not()),
        )
        .map(|(min, range): (Option<&str>, Option<Option<&str>>)| {
            let text = match range {
                None => match min {
                    Some(n) => format!("{n}..{n}"),
                    None => "1..".to_string(),
                },
                Some(max) => format!("{}..{}", min.unwrap_or("1"), max.unwrap_or_default()),
            };
            SyntaxNode::leaf("quantifier", TokenType::Punct, text)
        })
}

fn rel_detail<'src>() -> impl Parser<'src, &'src str, Vec<SyntaxNode>, Extra<'src>> + Clone {
    let types = just(':')
        .padded()
        .ignore_then(
            raw_ident()
                .separated_by(just('|').padded().then(just(':').or_not()))
                .at_least(1)
                .collect::<Vec<_>>(),
        )
        .map(|types| {
            types
                .into_iter()
                .map(|t| SyntaxNode::ident("label", t))
                .collect::<Vec<_>>()
        });

    ident(RESERVED)
        .padded()
        .or_not()
        .then(types.or_not())
        .then(quantifier().or_not())
        .then(properties().or_not())
        .delimited_by(just('['), just(']'))
        .map(|(((var, types), quantifier), props)| {
            let mut children: Vec<SyntaxNode> = var
                .map(|v| SyntaxNode::leaf("variable", TokenType::Variable, v))
                .into_iter()
                .collect();
            children.extend(types.unwrap_or_default());
            children.extend(quantifier);
            children.extend(props);
            children
        })
}

fn rel_pattern<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    let detail = rel_detail().or_not().map(Option::unwrap_or_default);

    choice((
        just("<-")
            .ignore_then(detail.clone())
            .then_ignore(just('-'))
            .map(|d| ("in", d)),
        just('-')
            .ignore_then(detail.clone())
            .then_ignore(just("->"))
            .map(|d| ("out", d)),
        just('-')
            .ignore_then(detail)
            .then_ignore(just('-'))
            .map(|d| ("both", d)),
    ))
    .padded()
    .map(|(direction, children)| SyntaxNode::node("rel_pattern", children).with_text(direction))
    .labelled("relationship like -[:FOLLOWS]->")
}
