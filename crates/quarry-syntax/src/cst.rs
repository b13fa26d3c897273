//! Concrete syntax tree produced by every input grammar.
//!
//! Nodes carry a rule name and children; terminals additionally carry a
//! token type and their text. The parser bridge walks this tree to build the
//! query action tree.

use quarry_core::{QueryError, Result, Span};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Identifier,
    Keyword,
    String,
    Number,
    Boolean,
    Null,
    Operator,
    Parameter,
    Variable,
    Punct,
    /// Text kept verbatim
    Raw,
}

/// One node of a concrete syntax tree
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyntaxNode {
    pub rule: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SyntaxNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl SyntaxNode {
    pub fn node(rule: &'static str, children: Vec<SyntaxNode>) -> Self {
        Self {
            rule,
            token: None,
            text: None,
            children,
            span: None,
        }
    }

    /// Terminal
    pub fn leaf(rule: &'static str, token: TokenType, text: impl Into<String>) -> Self {
        Self {
            rule,
            token: Some(token),
            text: Some(text.into()),
            children: Vec::new(),
            span: None,
        }
    }

    pub fn keyword(text: impl Into<String>) -> Self {
        Self::leaf("keyword", TokenType::Keyword, text)
    }

    pub fn ident(rule: &'static str, text: impl Into<String>) -> Self {
        Self::leaf(rule, TokenType::Identifier, text)
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn is(&self, rule: &str) -> bool {
        self.rule == rule
    }

    /// Text of a terminal, or the node's annotation
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    pub fn first(&self) -> Option<&SyntaxNode> {
        self.children.first()
    }

    /// First direct child with the given rule
    pub fn child(&self, rule: &str) -> Option<&SyntaxNode> {
        self.children.iter().find(|c| c.rule == rule)
    }

    pub fn children_by<'a>(&'a self, rule: &'a str) -> impl Iterator<Item = &'a SyntaxNode> + 'a {
        self.children.iter().filter(move |c| c.rule == rule)
    }

    /// True when a keyword child with this text exists
    pub fn has_keyword(&self, keyword: &str) -> bool {
        self.children
            .iter()
            .any(|c| c.token == Some(TokenType::Keyword) && c.text().eq_ignore_ascii_case(keyword))
    }

    /// Children that are not keyword markers
    pub fn operands(&self) -> impl Iterator<Item = &SyntaxNode> {
        self.children
            .iter()
            .filter(|c| c.token != Some(TokenType::Keyword))
    }

    /// Maximum depth, computed without recursion
    pub fn depth(&self) -> usize {
        let mut max = 0;
        let mut stack = vec![(self, 1usize)];
        while let Some((node, depth)) = stack.pop() {
            max = max.max(depth);
            stack.extend(node.children.iter().map(|c| (c, depth + 1)));
        }
        max
    }

    /// Fail with `ParseDepthExceeded` when the tree is deeper than `limit`
    pub fn check_depth(&self, limit: usize) -> Result<()> {
        let depth = self.depth();
        if depth > limit {
            return Err(QueryError::ParseDepthExceeded { depth, limit });
        }
        Ok(())
    }
}

impl fmt::Display for SyntaxNode {
    /// S-expression form, one node per line
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write(node: &SyntaxNode, indent: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:indent$}({}", "", node.rule, indent = indent)?;
            if let Some(text) = &node.text {
                write!(f, " {text:?}")?;
            }
            if node.children.is_empty() {
                return writeln!(f, ")");
            }
            writeln!(f)?;
            for child in &node.children {
                write(child, indent + 2, f)?;
            }
            writeln!(f, "{:indent$})", "", indent = indent)
        }
        write(self, 0, f)
    }
}

/// Deepest bracket nesting in `input`, ignoring quoted text.
pub fn bracket_depth(input: &str) -> usize {
    let mut depth = 0usize;
    let mut max = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in input.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '(' | '[' | '{' => {
                depth += 1;
                max = max.max(depth);
            }
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    max
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SyntaxNode {
        SyntaxNode::node(
            "binary",
            vec![
                SyntaxNode::leaf("field", TokenType::Identifier, "age"),
                SyntaxNode::leaf("operator", TokenType::Operator, ">"),
                SyntaxNode::leaf("number", TokenType::Number, "18"),
            ],
        )
    }

    #[test]
    fn test_depth_and_lookup() {
        let node = SyntaxNode::node("where_clause", vec![sample()]);
        assert_eq!(node.depth(), 3);
        assert_eq!(node.child("binary").map(|b| b.children.len()), Some(3));
        assert!(node.check_depth(3).is_ok());
        assert!(matches!(
            node.check_depth(2),
            Err(QueryError::ParseDepthExceeded { depth: 3, limit: 2 })
        ));
    }

    #[test]
    fn test_keyword_markers() {
        let node = SyntaxNode::node(
            "select_clause",
            vec![SyntaxNode::keyword("DISTINCT"), sample()],
        );
        assert!(node.has_keyword("distinct"));
        assert_eq!(node.operands().count(), 1);
    }

    #[test]
    fn test_display_is_sexpr() {
        let text = sample().to_string();
        assert!(text.starts_with("(binary\n"));
        assert!(text.contains("  (field \"age\")"));
    }

    #[test]
    fn test_bracket_depth_ignores_strings() {
        assert_eq!(bracket_depth("f((a), [b])"), 2);
        assert_eq!(bracket_depth("x = '((((('"), 0);
        assert_eq!(bracket_depth("{a: {b: [1]}}"), 3);
    }
}
