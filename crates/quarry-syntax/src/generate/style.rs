//! Output grammar files: format rules plus a template per action kind.

use quarry_core::{QueryError, Result};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprNotation {
    #[default]
    Infix,
    /// GraphQL boolean-expression objects
    Hasura,
}

/// How expressions are spelled in the target language
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExprStyle {
    pub notation: ExprNotation,
    /// Spaces around comparison and arithmetic operators
    pub spacing: bool,
    pub quote: String,
    pub upper_keywords: bool,
    /// Prepended to fields without a path separator
    pub field_prefix: String,
    pub path_separator: String,
    pub param_prefix: String,
    pub not_equal: String,
    /// `()` or `[]` around IN lists
    pub in_list: String,
    /// Spelling of a whole-row projection
    pub star: String,
}

impl Default for ExprStyle {
    fn default() -> Self {
        Self {
            notation: ExprNotation::Infix,
            spacing: true,
            quote: "'".to_string(),
            upper_keywords: true,
            field_prefix: String::new(),
            path_separator: ".".to_string(),
            param_prefix: ":".to_string(),
            not_equal: "!=".to_string(),
            in_list: "()".to_string(),
            star: "*".to_string(),
        }
    }
}

impl ExprStyle {
    pub fn list_brackets(&self) -> (&str, &str) {
        if self.in_list.starts_with('[') {
            ("[", "]")
        } else {
            ("(", ")")
        }
    }
}

/// Pretty-printing rules
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FormatStyle {
    /// Indent width for clauses on continuation lines
    pub indent: usize,
    /// Put each child clause on its own line
    pub newline: bool,
    /// Sort keys of rendered objects
    pub sorted_keys: bool,
    /// MATCH patterns may carry edges and property maps; when false only
    /// bare labelled nodes render
    pub graph_patterns: bool,
    pub expression: ExprStyle,
}

impl Default for FormatStyle {
    fn default() -> Self {
        Self {
            indent: 2,
            newline: false,
            sorted_keys: false,
            graph_patterns: true,
            expression: ExprStyle::default(),
        }
    }
}

impl FormatStyle {
    /// Separator between a node's rendered children
    pub fn separator(&self) -> String {
        if self.newline {
            format!("\n{}", " ".repeat(self.indent))
        } else {
            " ".to_string()
        }
    }
}

/// A parsed output grammar
#[derive(Debug, Clone, Deserialize)]
pub struct OutputGrammar {
    #[serde(default)]
    pub format: FormatStyle,
    /// Templates keyed by lower-case kind name
    pub templates: HashMap<String, String>,
    #[serde(default)]
    pub partials: HashMap<String, String>,
}

impl OutputGrammar {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| QueryError::format(format!("invalid output grammar: {e}")))
    }
}
