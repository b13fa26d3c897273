//! Expression grammar shared by SQL, Cypher, XPath and JSONPath predicates.
//!
//! Precedence, loosest first: `OR`, `AND`, `NOT`, comparison suffixes,
//! additive, multiplicative, unary minus, atoms.
//!
//! CST rules produced: `binary` (children `[left, operator, right]`), `not`,
//! `neg`, `like`, `in`, `between`, `is_null` (negation and variant in the
//! node text), `call`, `list`, `star`, `field`, `parameter` and the literal
//! leaves from [`literal`].

use super::common::{dotted, ident, kw, literal, number_text, raw_ident, Boxed, Extra};
use crate::cst::{SyntaxNode, TokenType};
use chumsky::prelude::*;

enum Suffix {
    Compare(&'static str, SyntaxNode),
    Like(String, SyntaxNode),
    In(bool, Vec<SyntaxNode>),
    Between(bool, SyntaxNode, SyntaxNode),
    IsNull(bool),
}

fn operator(op: &str) -> SyntaxNode {
    SyntaxNode::leaf("operator", TokenType::Operator, op)
}

fn binary(left: SyntaxNode, op: &str, right: SyntaxNode) -> SyntaxNode {
    SyntaxNode::node("binary", vec![left, operator(op), right])
}

fn fold_binary((first, rest): (SyntaxNode, Vec<(&'static str, SyntaxNode)>)) -> SyntaxNode {
    rest.into_iter()
        .fold(first, |left, (op, right)| binary(left, op, right))
}

fn negation(negated: bool, word: &str) -> String {
    if negated {
        format!("NOT {word}")
    } else {
        word.to_string()
    }
}

/// Expression parser; `reserved` words are never read as field names.
pub fn expression<'src>(
    reserved: &'static [&'static str],
) -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    recursive(move |expr| {
        let args = kw("DISTINCT")
            .or_not()
            .then(
                expr.clone()
                    .separated_by(just(',').padded())
                    .collect::<Vec<_>>(),
            )
            .delimited_by(just('(').padded(), just(')').padded());

        let call = ident(reserved)
            .then(args)
            .map(|(name, (distinct, args)): (String, (Option<()>, Vec<SyntaxNode>))| {
                let mut children = Vec::with_capacity(args.len() + 1);
                if distinct.is_some() {
                    children.push(SyntaxNode::keyword("DISTINCT"));
                }
                children.extend(args);
                SyntaxNode::node("call", children).with_text(name)
            });

        let parameter = choice((
            just('$').ignore_then(raw_ident()),
            just('$').ignore_then(number_text().map(|s: &str| s.to_string())),
            just(':').ignore_then(raw_ident()),
            just('?').to("?".to_string()),
        ))
        .map(|name| SyntaxNode::leaf("parameter", TokenType::Parameter, name));

        let at_field = just('@')
            .ignore_then(just('.').or_not())
            .ignore_then(dotted(&[]))
            .map(|path| SyntaxNode::leaf("field", TokenType::Identifier, path));

        let field = dotted(reserved).map(|path| SyntaxNode::leaf("field", TokenType::Identifier, path));

        let list = expr
            .clone()
            .separated_by(just(',').padded())
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just('[').padded(), just(']').padded())
            .map(|items| SyntaxNode::node("list", items));

        let parens = expr
            .clone()
            .delimited_by(just('(').padded(), just(')').padded());

        let star = just('*').to(SyntaxNode::leaf("star", TokenType::Operator, "*"));

        let atom = choice((
            literal(),
            parameter,
            call,
            list,
            parens,
            star,
            at_field,
            field,
        ))
        .padded()
        .boxed();

        let unary: Boxed<'src, SyntaxNode> = just('-')
            .padded()
            .repeated()
            .collect::<Vec<_>>()
            .then(atom)
            .map(|(signs, node)| signs.iter().fold(node, |inner, _| SyntaxNode::node("neg", vec![inner])))
            .boxed();

        let product_op = choice((just('*').to("*"), just('/').to("/"), just('%').to("%"))).padded();
        let product = unary
            .clone()
            .then(product_op.then(unary).repeated().collect::<Vec<_>>())
            .map(fold_binary)
            .boxed();

        let sum_op = choice((just('+').to("+"), just('-').to("-"))).padded();
        let sum = product
            .clone()
            .then(sum_op.then(product).repeated().collect::<Vec<_>>())
            .map(fold_binary)
            .boxed();

        let cmp_op = choice((
            just("<=").to("<="),
            just(">=").to(">="),
            just("<>").to("!="),
            just("!=").to("!="),
            just("==").to("="),
            just("=~").to("=~"),
            just('=').to("="),
            just('<').to("<"),
            just('>').to(">"),
        ))
        .padded();

        let not_flag = kw("NOT").or_not().map(|n| n.is_some());

        let in_list = choice((
            expr.clone()
                .separated_by(just(',').padded())
                .collect::<Vec<_>>()
                .delimited_by(just('(').padded(), just(')').padded()),
            expr.clone()
                .separated_by(just(',').padded())
                .collect::<Vec<_>>()
                .delimited_by(just('[').padded(), just(']').padded()),
        ));

        let suffix = choice((
            cmp_op.then(sum.clone()).map(|(op, right)| Suffix::Compare(op, right)),
            kw("STARTS")
                .then(kw("WITH"))
                .ignore_then(sum.clone())
                .map(|right| Suffix::Compare("STARTS WITH", right)),
            kw("ENDS")
                .then(kw("WITH"))
                .ignore_then(sum.clone())
                .map(|right| Suffix::Compare("ENDS WITH", right)),
            kw("CONTAINS")
                .ignore_then(sum.clone())
                .map(|right| Suffix::Compare("CONTAINS", right)),
            not_flag
                .clone()
                .then(choice((kw("LIKE").to("LIKE"), kw("ILIKE").to("ILIKE"))))
                .then(sum.clone())
                .map(|((negated, word), pattern)| Suffix::Like(negation(negated, word), pattern)),
            not_flag
                .clone()
                .then_ignore(kw("IN"))
                .then(in_list)
                .map(|(negated, items)| Suffix::In(negated, items)),
            not_flag
                .then_ignore(kw("BETWEEN"))
                .then(sum.clone())
                .then_ignore(kw("AND"))
                .then(sum.clone())
                .map(|((negated, low), high)| Suffix::Between(negated, low, high)),
            kw("IS")
                .ignore_then(kw("NOT").or_not())
                .then_ignore(kw("NULL"))
                .map(|not| Suffix::IsNull(not.is_some())),
        ));

        let comparison = sum
            .then(suffix.or_not())
            .map(|(left, suffix)| match suffix {
                None => left,
                Some(Suffix::Compare(op, right)) => binary(left, op, right),
                Some(Suffix::Like(word, pattern)) => {
                    SyntaxNode::node("like", vec![left, pattern]).with_text(word)
                }
                Some(Suffix::In(negated, items)) => {
                    let mut children = vec![left];
                    children.extend(items);
                    SyntaxNode::node("in", children).with_text(negation(negated, "IN"))
                }
                Some(Suffix::Between(negated, low, high)) => {
                    SyntaxNode::node("between", vec![left, low, high])
                        .with_text(negation(negated, "BETWEEN"))
                }
                Some(Suffix::IsNull(negated)) => SyntaxNode::node("is_null", vec![left])
                    .with_text(if negated { "IS NOT NULL" } else { "IS NULL" }),
            })
            .boxed();

        let not = choice((kw("NOT"), just('!').padded().ignored()))
            .repeated()
            .collect::<Vec<_>>()
            .then(comparison)
            .map(|(nots, node)| nots.iter().fold(node, |inner, _| SyntaxNode::node("not", vec![inner])))
            .boxed();

        let and_op = choice((kw("AND"), just("&&").padded().ignored())).to("AND");
        let conjunction = not
            .clone()
            .then(and_op.then(not).repeated().collect::<Vec<_>>())
            .map(fold_binary)
            .boxed();

        let or_op = choice((kw("OR"), kw("XOR").ignored(), just("||").padded().ignored())).to("OR");
        conjunction
            .clone()
            .then(or_op.then(conjunction).repeated().collect::<Vec<_>>())
            .map(fold_binary)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESERVED: &[&str] = &["FROM", "WHERE", "AND", "OR", "NOT", "IN", "IS", "NULL"];

    fn parse(input: &str) -> SyntaxNode {
        expression(RESERVED)
            .then_ignore(end())
            .parse(input)
            .into_result()
            .unwrap()
    }

    #[test]
    fn test_precedence() {
        let node = parse("a = 1 OR b = 2 AND c = 3");
        assert!(node.is("binary"));
        assert_eq!(node.children[1].text(), "OR");
        assert_eq!(node.children[2].children[1].text(), "AND");
    }

    #[test]
    fn test_arithmetic_binds_tighter_than_comparison() {
        let node = parse("price * 2 + 1 > 10");
        assert_eq!(node.children[1].text(), ">");
        assert_eq!(node.children[0].children[1].text(), "+");
    }

    #[test]
    fn test_suffixes() {
        assert_eq!(parse("name NOT LIKE 'A%'").text(), "NOT LIKE");
        assert_eq!(parse("x IN (1, 2, 3)").children.len(), 4);
        assert_eq!(parse("x BETWEEN 1 AND 5").rule, "between");
        assert_eq!(parse("x IS NOT NULL").text(), "IS NOT NULL");
        assert_eq!(parse("n.name STARTS WITH 'A'").children[1].text(), "STARTS WITH");
    }

    #[test]
    fn test_calls_and_fields() {
        let node = parse("COUNT(DISTINCT u.city)");
        assert!(node.is("call"));
        assert_eq!(node.text(), "COUNT");
        assert!(node.has_keyword("DISTINCT"));
        assert_eq!(node.children[1].text(), "u.city");
        assert!(parse("count(*)").children[0].is("star"));
    }

    #[test]
    fn test_at_fields_and_symbolic_logic() {
        let node = parse("@.age > 25 && !(@.name == 'x')");
        assert_eq!(node.children[1].text(), "AND");
        assert_eq!(node.children[0].children[0].text(), "age");
        assert!(node.children[2].is("not"));
    }

    #[test]
    fn test_parameters() {
        assert!(parse("$min").is("parameter"));
        assert_eq!(parse("age > :min").children[2].text(), "min");
    }

    #[test]
    fn test_reserved_word_is_not_a_field() {
        assert!(expression(RESERVED)
            .then_ignore(end())
            .parse("from")
            .into_result()
            .is_err());
    }
}
