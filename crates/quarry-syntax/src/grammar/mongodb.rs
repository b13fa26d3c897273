//! MongoDB shell grammar.
//!
//! `db.users.find({age: {$gt: 25}}, {name: 1}).sort({age: -1}).skip(1).limit(2)`,
//! `db.getCollection('users').aggregate([...])`, the write methods, and a bare
//! aggregation pipeline (`[{$match: ...}, ...]`) or filter document.

use super::common::{format_errors, json_value, raw_ident, string_literal, to_span, Extra};
use super::Grammar;
use crate::cst::{SyntaxNode, TokenType};
use crate::format::QueryFormat;
use chumsky::prelude::*;
use quarry_core::Result;

/// MongoDB input grammar
pub struct MongoGrammar;

impl Grammar for MongoGrammar {
    fn format(&self) -> QueryFormat {
        QueryFormat::MongoDb
    }

    fn parse(&self, input: &str) -> Result<SyntaxNode> {
        mongo_parser()
            .parse(input)
            .into_result()
            .map_err(|errs| format_errors(&errs, input))
    }
}

fn mongo_parser<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> {
    let collection = choice((
        just("getCollection")
            .ignore_then(string_literal().padded().delimited_by(just('('), just(')'))),
        raw_ident(),
    ))
    .map(|name| SyntaxNode::leaf("collection", TokenType::Identifier, name));

    let call = raw_ident()
        .then(
            json_value()
                .separated_by(just(',').padded())
                .collect::<Vec<_>>()
                .delimited_by(just('(').padded(), just(')').padded()),
        )
        .map(|(method, args)| SyntaxNode::node("call", args).with_text(method));

    let shell = just("db")
        .ignore_then(just('.'))
        .ignore_then(collection)
        .then(
            just('.')
                .padded()
                .ignore_then(call)
                .repeated()
                .at_least(1)
                .collect::<Vec<_>>(),
        )
        .map(|(collection, calls)| {
            let mut children = vec![collection];
            children.extend(calls);
            children
        });

    // A bare pipeline or filter document has no collection
    let bare = json_value().try_map(|value, span| {
        let method = match value.rule {
            "array" => "aggregate",
            "object" => "find",
            _ => return Err(Rich::custom(span, "expected a pipeline or filter document")),
        };
        Ok(vec![SyntaxNode::node("call", vec![value]).with_text(method)])
    });

    choice((shell, bare))
        .map_with(|children, e| SyntaxNode::node("mongo", children).with_span(to_span(e.span())))
        .padded()
        .then_ignore(just(';').padded().or_not())
        .then_ignore(end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> SyntaxNode {
        MongoGrammar.parse(input).unwrap()
    }

    #[test]
    fn test_parse_find_chain() {
        let node = parse("db.users.find({age: {$gt: 25}}, {name: 1}).sort({age: -1}).limit(2)");
        assert_eq!(node.children[0].text(), "users");
        let methods: Vec<_> = node.children[1..].iter().map(|c| c.text()).collect();
        assert_eq!(methods, vec!["find", "sort", "limit"]);
        assert_eq!(node.children[1].children.len(), 2);
    }

    #[test]
    fn test_parse_get_collection() {
        let node = parse("db.getCollection('order items').countDocuments({})");
        assert_eq!(node.children[0].text(), "order items");
    }

    #[test]
    fn test_parse_bare_pipeline() {
        let node = parse("[{$match: {age: {$gt: 25}}}, {$group: {_id: '$city', n: {$sum: 1}}}]");
        assert!(node.child("collection").is_none());
        assert_eq!(node.children[0].text(), "aggregate");
    }

    #[test]
    fn test_rejects_scalar() {
        assert!(MongoGrammar.parse("42").is_err());
    }
}
