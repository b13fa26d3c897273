//! GraphQL grammar: operations, selection sets, arguments and aliases.
//!
//! Argument values use the relaxed JSON grammar, so Hasura-style filters
//! (`where: {age: {_gt: 25}}`) and enum values (`order_by: {age: asc}`) parse.
//! Fragments and directives are not supported.

use super::common::{format_errors, json_value, raw_ident, to_span, Extra};
use super::Grammar;
use crate::cst::SyntaxNode;
use crate::format::QueryFormat;
use chumsky::prelude::*;
use quarry_core::Result;

/// GraphQL input grammar
pub struct GraphQlGrammar;

impl Grammar for GraphQlGrammar {
    fn format(&self) -> QueryFormat {
        QueryFormat::GraphQl
    }

    fn parse(&self, input: &str) -> Result<SyntaxNode> {
        graphql_parser()
            .parse(input)
            .into_result()
            .map_err(|errs| format_errors(&errs, input))
    }
}

fn graphql_parser<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> {
    let operation_type = choice((
        just("query").to("query"),
        just("mutation").to("mutation"),
        just("subscription").to("subscription"),
    ));

    // `query Name($id: Int!)`; variable definitions are skipped
    let variable_defs = none_of(")")
        .repeated()
        .delimited_by(just('('), just(')'))
        .padded();

    let header = operation_type
        .then(raw_ident().padded().or_not())
        .then_ignore(variable_defs.or_not());

    header
        .or_not()
        .padded()
        .then(selection_set())
        .map_with(|(header, selections), e| {
            let (operation, name) = header.unwrap_or(("query", None));
            let mut node = SyntaxNode::node("operation", vec![selections]).with_text(operation);
            if let Some(name) = name {
                node.children.insert(0, SyntaxNode::ident("name", name));
            }
            node.with_span(to_span(e.span()))
        })
        .padded()
        .then_ignore(end())
}

fn selection_set<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    recursive(|selection_set| {
        let argument = raw_ident()
            .padded()
            .then_ignore(just(':').padded())
            .then(json_value())
            .map(|(name, value)| SyntaxNode::node("argument", vec![value]).with_text(name));

        let arguments = argument
            .separated_by(just(',').padded().or_not())
            .collect::<Vec<_>>()
            .delimited_by(just('(').padded(), just(')').padded())
            .map(|args| SyntaxNode::node("arguments", args));

        let alias = raw_ident().padded().then_ignore(just(':').padded());

        let field = alias
            .or_not()
            .then(raw_ident().padded())
            .then(arguments.or_not())
            .then(selection_set.or_not())
            .map(|(((alias, name), args), selections)| {
                let mut children = Vec::new();
                children.extend(alias.map(|a| SyntaxNode::ident("alias", a)));
                children.extend(args);
                children.extend(selections);
                SyntaxNode::node("field", children).with_text(name)
            });

        field
            .separated_by(just(',').padded().or_not())
            .at_least(1)
            .collect::<Vec<_>>()
            .delimited_by(just('{').padded(), just('}').padded())
            .map(|fields| SyntaxNode::node("selection_set", fields))
    })
}
