//! Shared parser primitives for the input grammars.

use crate::cst::{SyntaxNode, TokenType};
use chumsky::error::RichReason;
use chumsky::extra;
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;
use quarry_core::{QueryError, Span};

/// Extra type for parsers - uses Rich errors for better messages
pub type Extra<'src> = extra::Err<Rich<'src, char>>;

/// Type-erased parser, used to keep clause parser types small
pub type Boxed<'src, T> = chumsky::Boxed<'src, 'src, &'src str, T, Extra<'src>>;

pub fn to_span(span: SimpleSpan) -> Span {
    Span::new(span.start, span.end)
}

// ============================================================================
// Words
// ============================================================================

/// A run of identifier characters, starting with a letter or underscore
fn word<'src>() -> impl Parser<'src, &'src str, &'src str, Extra<'src>> + Clone {
    any()
        .filter(|c: &char| c.is_alphabetic() || *c == '_')
        .then(
            any()
                .filter(|c: &char| c.is_alphanumeric() || *c == '_')
                .repeated(),
        )
        .to_slice()
}

/// Case-insensitive keyword, padded
pub fn kw<'src>(keyword: &'static str) -> impl Parser<'src, &'src str, (), Extra<'src>> + Clone {
    word()
        .try_map(move |s: &str, span| {
            if s.eq_ignore_ascii_case(keyword) {
                Ok(())
            } else {
                Err(Rich::custom(span, format!("expected {keyword}")))
            }
        })
        .padded()
        .labelled(keyword)
}

/// Keyword kept in the tree as a marker child
pub fn kw_node<'src>(
    keyword: &'static str,
) -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    kw(keyword).to(SyntaxNode::keyword(keyword))
}

/// Bare or backtick-quoted identifier, any word allowed
pub fn raw_ident<'src>() -> impl Parser<'src, &'src str, String, Extra<'src>> + Clone {
    let quoted = just('`')
        .ignore_then(none_of("`").repeated().to_slice())
        .then_ignore(just('`'));
    choice((quoted, word()))
        .map(|s: &str| s.to_string())
        .labelled("identifier")
}

/// Identifier that is not one of `reserved` (case-insensitive)
pub fn ident<'src>(
    reserved: &'static [&'static str],
) -> impl Parser<'src, &'src str, String, Extra<'src>> + Clone {
    let quoted = just('`')
        .ignore_then(none_of("`").repeated().to_slice())
        .then_ignore(just('`'))
        .map(|s: &str| s.to_string());
    let bare = word().try_map(move |s: &str, span| {
        if reserved.iter().any(|r| r.eq_ignore_ascii_case(s)) {
            Err(Rich::custom(span, format!("unexpected keyword {s}")))
        } else {
            Ok(s.to_string())
        }
    });
    quoted.or(bare).labelled("identifier")
}

/// Dotted name (`a.b.c`)
pub fn dotted<'src>(
    reserved: &'static [&'static str],
) -> impl Parser<'src, &'src str, String, Extra<'src>> + Clone {
    ident(reserved)
        .then(just('.').ignore_then(raw_ident()).repeated().collect::<Vec<_>>())
        .map(|(head, rest)| {
            let mut path = head;
            for part in rest {
                path.push('.');
                path.push_str(&part);
            }
            path
        })
}

// ============================================================================
// Literals
// ============================================================================

/// Quoted string with doubled-quote and backslash escapes
pub fn quoted<'src>(q: char) -> impl Parser<'src, &'src str, String, Extra<'src>> + Clone {
    let escape = just('\\').ignore_then(any().map(|c| match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        other => other,
    }));
    let doubled = just(q).then(just(q)).to(q);
    let plain = any().filter(move |c: &char| *c != q && *c != '\\');
    just(q)
        .ignore_then(
            choice((escape, doubled, plain))
                .repeated()
                .collect::<String>(),
        )
        .then_ignore(just(q))
}

/// Single- or double-quoted string
pub fn string_literal<'src>() -> impl Parser<'src, &'src str, String, Extra<'src>> + Clone {
    quoted('\'').or(quoted('"')).labelled("string literal")
}

fn digits<'src>() -> impl Parser<'src, &'src str, &'src str, Extra<'src>> + Clone {
    any()
        .filter(|c: &char| c.is_ascii_digit())
        .repeated()
        .at_least(1)
        .to_slice()
}

/// Unsigned number text: `12`, `1.5`, `2e10`
pub fn number_text<'src>() -> impl Parser<'src, &'src str, &'src str, Extra<'src>> + Clone {
    digits()
        .then(just('.').then(digits()).or_not())
        .then(
            one_of("eE")
                .then(one_of("+-").or_not())
                .then(digits())
                .or_not(),
        )
        .to_slice()
        .labelled("number")
}

/// Number text with an optional leading minus
pub fn signed_number_text<'src>() -> impl Parser<'src, &'src str, &'src str, Extra<'src>> + Clone
{
    just('-').or_not().then(number_text()).to_slice()
}

pub fn integer<'src>() -> impl Parser<'src, &'src str, i64, Extra<'src>> + Clone {
    just('-')
        .or_not()
        .then(digits())
        .to_slice()
        .try_map(|s: &str, span| {
            s.parse::<i64>()
                .map_err(|_| Rich::custom(span, "integer overflow"))
        })
        .labelled("integer")
}

/// Literal leaves: strings, numbers, booleans and null
pub fn literal<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    choice((
        string_literal().map(|s| SyntaxNode::leaf("string", TokenType::String, s)),
        number_text().map(|s: &str| SyntaxNode::leaf("number", TokenType::Number, s)),
        kw("TRUE").to(SyntaxNode::leaf("boolean", TokenType::Boolean, "true")),
        kw("FALSE").to(SyntaxNode::leaf("boolean", TokenType::Boolean, "false")),
        kw("NULL").to(SyntaxNode::leaf("null", TokenType::Null, "null")),
    ))
    .padded()
}

// ============================================================================
// JSON-like values (GraphQL arguments, MongoDB documents)
// ============================================================================

/// Relaxed JSON: unquoted or quoted keys, `$` keys, single or double quotes,
/// bare identifiers as enum values, `$name` as variables.
pub fn json_value<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    recursive(|value| {
        let key = choice((
            string_literal(),
            just('$')
                .or_not()
                .then(word())
                .to_slice()
                .map(|s: &str| s.to_string()),
        ))
        .padded();

        let member = key
            .then_ignore(just(':').padded())
            .then(value.clone())
            .map(|(key, value)| SyntaxNode::node("member", vec![value]).with_text(key));

        let object = member
            .separated_by(just(',').padded())
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just('{').padded(), just('}').padded())
            .map(|members| SyntaxNode::node("object", members));

        let array = value
            .separated_by(just(',').padded())
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just('[').padded(), just(']').padded())
            .map(|items| SyntaxNode::node("array", items));

        let variable = just('$')
            .ignore_then(word())
            .map(|s: &str| SyntaxNode::leaf("variable", TokenType::Variable, s));

        let scalar = choice((
            string_literal().map(|s| SyntaxNode::leaf("string", TokenType::String, s)),
            signed_number_text().map(|s: &str| SyntaxNode::leaf("number", TokenType::Number, s)),
            kw("true").to(SyntaxNode::leaf("boolean", TokenType::Boolean, "true")),
            kw("false").to(SyntaxNode::leaf("boolean", TokenType::Boolean, "false")),
            kw("null").to(SyntaxNode::leaf("null", TokenType::Null, "null")),
            variable,
            word().map(|s: &str| SyntaxNode::leaf("enum", TokenType::Identifier, s)),
        ));

        choice((object, array, scalar)).padded()
    })
}

// ============================================================================
// Error formatting
// ============================================================================

/// Convert chumsky errors into a positioned parse error.
///
/// The position is that of the first error; the message lists all of them.
pub fn format_errors(errs: &[Rich<'_, char>], input: &str) -> QueryError {
    let start = errs.first().map_or(input.len(), |e| e.span().start);
    let message = errs
        .iter()
        .map(|e| match (e.reason(), e.found()) {
            (RichReason::Custom(message), _) => message.to_string(),
            (reason, Some(c)) => format!("{reason} (found '{c}')"),
            (reason, None) => format!("{reason} (found end of input)"),
        })
        .collect::<Vec<_>>()
        .join("; ");
    QueryError::parse_at(input, start, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_errors_keep_their_message() {
        let input = "99999999999999999999999";
        let err = format_errors(&[Rich::custom(SimpleSpan::from(0..input.len()), "integer overflow")], input);
        let message = err.to_string();
        assert!(message.contains("integer overflow"), "{message}");
        assert!(!message.contains("end of input"), "{message}");

        let eoi = integer().parse("-").into_errors();
        assert!(format_errors(&eoi, "-").to_string().contains("end of input"));
    }

    #[test]
    fn test_kw_is_case_insensitive() {
        assert!(kw("SELECT").parse("select").into_result().is_ok());
        assert!(kw("SELECT").parse("  SeLeCt ").into_result().is_ok());
        assert!(kw("SELECT").parse("selection").into_result().is_err());
    }

    #[test]
    fn test_ident_rejects_reserved() {
        const RESERVED: &[&str] = &["FROM"];
        assert_eq!(ident(RESERVED).parse("users").into_result().unwrap(), "users");
        assert!(ident(RESERVED).parse("from").into_result().is_err());
        assert_eq!(ident(RESERVED).parse("`from`").into_result().unwrap(), "from");
    }

    #[test]
    fn test_dotted_path() {
        let path = dotted(&[]).parse("address.city").into_result().unwrap();
        assert_eq!(path, "address.city");
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(string_literal().parse("'it''s'").into_result().unwrap(), "it's");
        assert_eq!(string_literal().parse(r#""a\"b""#).into_result().unwrap(), "a\"b");
    }

    #[test]
    fn test_number_text() {
        assert_eq!(number_text().parse("1.5e3").into_result().unwrap(), "1.5e3");
        assert_eq!(signed_number_text().parse("-2").into_result().unwrap(), "-2");
        assert_eq!(integer().parse("-42").into_result().unwrap(), -42);
    }

    #[test]
    fn test_json_value_relaxed() {
        let node = json_value()
            .parse("{age: {$gt: 25}, 'name': \"x\", tags: [1, 2]}")
            .into_result()
            .unwrap();
        assert!(node.is("object"));
        assert_eq!(node.children.len(), 3);
        assert_eq!(node.children[0].text(), "age");
        assert_eq!(node.children[0].children[0].children[0].text(), "$gt");
    }

    #[test]
    fn test_format_errors_positions() {
        let input = "SELECT\n  @";
        let errs = kw("SELECT")
            .then(kw("FROM"))
            .parse(input)
            .into_result()
            .unwrap_err();
        let err = format_errors(&errs, input);
        assert_eq!(err.position(), Some((2, 3)));
    }
}
