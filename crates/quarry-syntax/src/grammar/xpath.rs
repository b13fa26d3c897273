//! XPath grammar: location paths with predicates.
//!
//! `//users/user[age > 18][1]/name`, `/a/*/@id`, `//item/text()`.

use super::common::{format_errors, to_span, Extra};
use super::expr::expression;
use super::Grammar;
use crate::cst::{SyntaxNode, TokenType};
use crate::format::QueryFormat;
use chumsky::prelude::*;
use quarry_core::Result;

const RESERVED: &[&str] = &["AND", "OR", "DIV", "MOD"];

/// XPath input grammar
pub struct XPathGrammar;

impl Grammar for XPathGrammar {
    fn format(&self) -> QueryFormat {
        QueryFormat::XPath
    }

    fn parse(&self, input: &str) -> Result<SyntaxNode> {
        xpath_parser()
            .parse(input)
            .into_result()
            .map_err(|errs| format_errors(&errs, input))
    }
}

fn xpath_parser<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> {
    let separator = choice((just("//").to("//"), just('/').to("/")));

    separator
        .clone()
        .or_not()
        .map(Option::unwrap_or_default)
        .then(step_body())
        .then(separator.then(step_body()).repeated().collect::<Vec<_>>())
        .map_with(|((axis, first), rest), e| {
            let mut steps = vec![first.with_text(axis)];
            steps.extend(rest.into_iter().map(|(axis, step)| step.with_text(axis)));
            SyntaxNode::node("xpath", steps).with_span(to_span(e.span()))
        })
        .padded()
        .then_ignore(end())
}

/// Element name; XML names may contain `-` and `.`
fn name<'src>() -> impl Parser<'src, &'src str, &'src str, Extra<'src>> + Clone {
    any()
        .filter(|c: &char| c.is_alphabetic() || *c == '_')
        .then(
            any()
                .filter(|c: &char| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
                .repeated(),
        )
        .to_slice()
}

fn node_test<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    choice((
        just("text()").to(SyntaxNode::leaf("text_fn", TokenType::Keyword, "text()")),
        just("node()").to(SyntaxNode::leaf("wildcard", TokenType::Punct, "*")),
        just('@')
            .ignore_then(name())
            .map(|n: &str| SyntaxNode::leaf("attribute", TokenType::Identifier, n)),
        just('*').to(SyntaxNode::leaf("wildcard", TokenType::Punct, "*")),
        just("..").to(SyntaxNode::leaf("parent", TokenType::Punct, "..")),
        just('.').to(SyntaxNode::leaf("self", TokenType::Punct, ".")),
        name().map(|n: &str| SyntaxNode::leaf("name", TokenType::Identifier, n)),
    ))
    .labelled("node test")
}

fn step_body<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    let predicate = expression(RESERVED)
        .delimited_by(just('[').padded(), just(']').padded())
        .map(|e| SyntaxNode::node("predicate", vec![e]));

    node_test()
        .then(predicate.repeated().collect::<Vec<_>>())
        .map(|(test, predicates)| {
            let mut children = vec![test];
            children.extend(predicates);
            SyntaxNode::node("step", children)
        })
}
