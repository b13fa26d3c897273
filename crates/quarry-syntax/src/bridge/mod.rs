//! Parser bridge: turns a grammar's concrete syntax tree into a query action
//! tree.
//!
//! Every input format has a builder that walks its CST shape and emits
//! actions with typed params. Constructs a builder cannot map go through
//! [`BuildContext`], which applies the conversion mode: STRICT fails,
//! FLEXIBLE keeps the construct as a raw expression, LENIENT drops it and
//! records a warning.

mod context;
pub mod extract;
mod cypher;
mod graphql;
mod jsonpath;
mod mongodb;
mod sql;
mod xpath;

pub use context::BuildContext;

use crate::cst::{bracket_depth, SyntaxNode};
use crate::format::QueryFormat;
use crate::grammar::GrammarRegistry;
use quarry_core::options::DEFAULT_MAX_DEPTH;
use quarry_core::{Action, ConversionMode, QueryError, QueryOptions, Result};
use tracing::{debug, warn};

/// Hard cap on bracket nesting accepted before parsing; the recursive
/// descent grammars use stack proportional to it.
pub const NESTING_LIMIT: usize = 128;

/// Default maximum statement length in bytes
pub const DEFAULT_MAX_STATEMENT_LENGTH: usize = 1_000_000;

/// Result of a successful parse
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    pub action: Action,
    /// Constructs dropped in LENIENT mode
    pub warnings: Vec<String>,
}

/// Text to action tree, for every registered input format.
pub struct ParserBridge {
    registry: GrammarRegistry,
    mode: ConversionMode,
    max_depth: usize,
    max_statement_length: usize,
}

impl Default for ParserBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl ParserBridge {
    pub fn new() -> Self {
        Self {
            registry: GrammarRegistry::standard(),
            mode: ConversionMode::default(),
            max_depth: DEFAULT_MAX_DEPTH,
            max_statement_length: DEFAULT_MAX_STATEMENT_LENGTH,
        }
    }

    /// Bridge honoring the mode and depth bound of `options`
    pub fn from_options(options: &QueryOptions) -> Self {
        Self::new()
            .with_mode(options.conversion_mode)
            .with_max_depth(options.max_depth)
    }

    pub fn with_registry(mut self, registry: GrammarRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_mode(mut self, mode: ConversionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_max_statement_length(mut self, length: usize) -> Self {
        self.max_statement_length = length;
        self
    }

    pub fn mode(&self) -> ConversionMode {
        self.mode
    }

    pub fn registry(&self) -> &GrammarRegistry {
        &self.registry
    }

    /// Parse `text` into a CST without building actions
    pub fn parse_cst(&self, text: &str, format: QueryFormat) -> Result<SyntaxNode> {
        if text.len() > self.max_statement_length {
            return Err(QueryError::security(format!(
                "statement length {} exceeds limit {}",
                text.len(),
                self.max_statement_length
            )));
        }
        if text.trim().is_empty() {
            return Err(QueryError::parse_at(text, 0, "empty query"));
        }

        let limit = self.max_depth.min(NESTING_LIMIT);
        let nesting = bracket_depth(text);
        if nesting > limit {
            return Err(QueryError::ParseDepthExceeded {
                depth: nesting,
                limit,
            });
        }

        let grammar = self.registry.get(format)?;
        let cst = grammar.parse(text)?;
        cst.check_depth(self.max_depth)?;
        Ok(cst)
    }

    /// Parse `text` as `format` into a validated action tree with ids assigned
    pub fn parse(&self, text: &str, format: QueryFormat) -> Result<ParseOutcome> {
        let cst = self.parse_cst(text, format)?;
        let mut ctx = BuildContext::new(self.mode);

        let mut action = match format {
            QueryFormat::Sql => sql::build(&cst, &mut ctx)?,
            QueryFormat::Cypher => cypher::build(&cst, &mut ctx)?,
            QueryFormat::XPath => xpath::build(&cst, &mut ctx)?,
            QueryFormat::JsonPath => jsonpath::build(&cst, &mut ctx)?,
            QueryFormat::GraphQl => graphql::build(&cst, &mut ctx)?,
            QueryFormat::MongoDb => mongodb::build(&cst, &mut ctx)?,
            other => {
                return Err(QueryError::GrammarNotFound {
                    format: other.id().to_string(),
                })
            }
        };

        if action.span.is_none() {
            action.span = cst.span;
        }
        let depth = action.depth();
        if depth > self.max_depth {
            return Err(QueryError::ParseDepthExceeded {
                depth,
                limit: self.max_depth,
            });
        }
        action.assign_ids();
        action.validate()?;

        let warnings = ctx.into_warnings();
        for warning in &warnings {
            warn!(format = %format, "{}", warning);
        }
        debug!(
            format = %format,
            root = %action.kind,
            nodes = action.node_count(),
            "parsed query"
        );
        Ok(ParseOutcome { action, warnings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{ActionKind, ErrorKind};

    #[test]
    fn test_ids_are_assigned_in_pre_order() {
        let outcome = ParserBridge::new()
            .parse("SELECT name FROM users WHERE age > 25 LIMIT 2", QueryFormat::Sql)
            .unwrap();
        let ids: Vec<_> = outcome.action.iter().map(|a| a.id).collect();
        assert_eq!(ids, (1..=ids.len() as u32).collect::<Vec<_>>());
        assert_eq!(outcome.action.kind, ActionKind::Select);
    }

    #[test]
    fn test_nesting_is_capped_before_parsing() {
        let deep = format!("SELECT * FROM t WHERE {}1{}", "(".repeat(200), ")".repeat(200));
        let err = ParserBridge::new().parse(&deep, QueryFormat::Sql).unwrap_err();
        assert!(matches!(err, QueryError::ParseDepthExceeded { limit: 128, .. }));
    }

    #[test]
    fn test_max_depth_lowers_the_cap() {
        let nested = format!("SELECT * FROM t WHERE {}1{}", "(".repeat(10), ")".repeat(10));
        let err = ParserBridge::new()
            .with_max_depth(5)
            .parse(&nested, QueryFormat::Sql)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_statement_length_is_a_security_error() {
        let err = ParserBridge::new()
            .with_max_statement_length(10)
            .parse("SELECT * FROM users", QueryFormat::Sql)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Security);
    }

    #[test]
    fn test_empty_input_is_a_parse_error() {
        let err = ParserBridge::new().parse("   ", QueryFormat::Sql).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_unregistered_format() {
        let err = ParserBridge::new()
            .parse("g.V()", QueryFormat::Gremlin)
            .unwrap_err();
        assert!(matches!(err, QueryError::GrammarNotFound { .. }));
    }

    #[test]
    fn test_root_carries_statement_span() {
        let outcome = ParserBridge::new()
            .parse("SELECT * FROM users", QueryFormat::Sql)
            .unwrap();
        assert!(outcome.action.span.is_some());
    }
}
