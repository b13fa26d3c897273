//! JSONPath grammar.
//!
//! `$.users[?(@.age > 25)].name`, `$['store'].book[0]`, `$.items[1:3]`,
//! `$.a[*]`, `$..name`.

use super::common::{format_errors, integer, raw_ident, string_literal, to_span, Extra};
use super::expr::expression;
use super::Grammar;
use crate::cst::{SyntaxNode, TokenType};
use crate::format::QueryFormat;
use chumsky::prelude::*;
use quarry_core::Result;

const RESERVED: &[&str] = &["AND", "OR"];

/// JSONPath input grammar
pub struct JsonPathGrammar;

impl Grammar for JsonPathGrammar {
    fn format(&self) -> QueryFormat {
        QueryFormat::JsonPath
    }

    fn parse(&self, input: &str) -> Result<SyntaxNode> {
        jsonpath_parser()
            .parse(input)
            .into_result()
            .map_err(|errs| format_errors(&errs, input))
    }
}

fn jsonpath_parser<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> {
    just('$')
        .ignore_then(segment().repeated().collect::<Vec<_>>())
        .map_with(|segments, e| SyntaxNode::node("jsonpath", segments).with_span(to_span(e.span())))
        .padded()
        .then_ignore(end())
}

fn segment<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    let wildcard = || SyntaxNode::leaf("wildcard", TokenType::Punct, "*");

    let descendant = just("..")
        .ignore_then(raw_ident())
        .map(|name| SyntaxNode::leaf("descendant", TokenType::Identifier, name));

    let dot_member = just('.').ignore_then(choice((
        just('*').to(wildcard()),
        raw_ident().map(|name| SyntaxNode::leaf("member", TokenType::Identifier, name)),
    )));

    let filter = just('?')
        .padded()
        .ignore_then(expression(RESERVED))
        .map(|e| SyntaxNode::node("filter", vec![e]));

    let slice = integer()
        .or_not()
        .then_ignore(just(':').padded())
        .then(integer().or_not())
        .map(|(start, end)| {
            let text = format!(
                "{}:{}",
                start.map(|s| s.to_string()).unwrap_or_default(),
                end.map(|e| e.to_string()).unwrap_or_default()
            );
            SyntaxNode::leaf("slice", TokenType::Punct, text)
        });

    let bracket = choice((
        filter,
        just('*').to(wildcard()),
        string_literal().map(|name| SyntaxNode::leaf("member", TokenType::Identifier, name)),
        slice,
        integer().map(|n| SyntaxNode::leaf("index", TokenType::Number, n.to_string())),
    ))
    .padded()
    .delimited_by(just('['), just(']'));

    choice((descendant, dot_member, bracket)).labelled("path segment")
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn parse(input: &str) -> SyntaxNode {
        JsonPathGrammar.parse(input).unwrap()
    }

    #[test]
    fn test_parse_filter_path() {
        let node = parse("$.users[?(@.age > 25 && @.city == 'NYC')].name");
        let rules: Vec<_> = node.children.iter().map(|c| c.rule).collect();
        assert_eq!(rules, vec!["member", "filter", "member"]);
        let pred = &node.children[1].children[0];
        assert_eq!(pred.children[1].text(), "AND");
    }

    #[test_case("$.a[0]", "index", "0"; "index")]
    #[test_case("$.a[-1]", "index", "-1"; "negative index")]
    #[test_case("$.a[1:3]", "slice", "1:3"; "slice")]
    #[test_case("$.a[:2]", "slice", ":2"; "open slice")]
    #[test_case("$.a[*]", "wildcard", "*"; "wildcard")]
    #[test_case("$['a']['b c']", "member", "b c"; "bracket member")]
    fn test_segments(input: &str, rule: &str, text: &str) {
        let node = parse(input);
        let last = node.children.last().unwrap();
        assert_eq!(last.rule, rule);
        assert_eq!(last.text(), text);
    }

    #[test]
    fn test_descendant() {
        let node = parse("$..name");
        assert!(node.children[0].is("descendant"));
    }

    #[test]
    fn test_root_only() {
        assert!(parse("$").children.is_empty());
        assert!(JsonPathGrammar.parse("users").is_err());
    }
}
