//! Input grammars.
//!
//! Each grammar turns query text into a [`SyntaxNode`] tree. The
//! [`GrammarRegistry`] maps formats to grammars; formats without one fail
//! with `GrammarNotFound`.

pub mod common;
pub mod cypher;
pub mod expr;
pub mod graphql;
pub mod jsonpath;
pub mod mongodb;
pub mod sql;
pub mod xpath;

use crate::cst::SyntaxNode;
use crate::format::QueryFormat;
use quarry_core::{QueryError, Result};
use std::collections::HashMap;
use std::sync::Arc;

pub use cypher::CypherGrammar;
pub use graphql::GraphQlGrammar;
pub use jsonpath::JsonPathGrammar;
pub use mongodb::MongoGrammar;
pub use sql::SqlGrammar;
pub use xpath::XPathGrammar;

/// A parser for one query language.
pub trait Grammar: Send + Sync {
    fn format(&self) -> QueryFormat;

    /// Parse the whole input into a concrete syntax tree.
    fn parse(&self, input: &str) -> Result<SyntaxNode>;
}

/// Grammars keyed by format
#[derive(Clone, Default)]
pub struct GrammarRegistry {
    grammars: HashMap<QueryFormat, Arc<dyn Grammar>>,
}

impl GrammarRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in grammar
    pub fn standard() -> Self {
        GrammarRegistryBuilder::new()
            .with_grammar(SqlGrammar)
            .with_grammar(CypherGrammar)
            .with_grammar(XPathGrammar)
            .with_grammar(JsonPathGrammar)
            .with_grammar(GraphQlGrammar)
            .with_grammar(MongoGrammar)
            .build()
    }

    /// Register a grammar, replacing any previous one for its format
    pub fn register(&mut self, grammar: Arc<dyn Grammar>) {
        self.grammars.insert(grammar.format(), grammar);
    }

    pub fn get(&self, format: QueryFormat) -> Result<&dyn Grammar> {
        self.grammars
            .get(&format)
            .map(|g| g.as_ref())
            .ok_or_else(|| QueryError::GrammarNotFound {
                format: format.id().to_string(),
            })
    }

    pub fn supports(&self, format: QueryFormat) -> bool {
        self.grammars.contains_key(&format)
    }

    /// Registered formats in detection order
    pub fn formats(&self) -> Vec<QueryFormat> {
        QueryFormat::ALL
            .into_iter()
            .filter(|f| self.grammars.contains_key(f))
            .collect()
    }
}

/// Builder for ergonomic registry construction
#[derive(Default)]
pub struct GrammarRegistryBuilder {
    grammars: Vec<Arc<dyn Grammar>>,
}

impl GrammarRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_grammar(mut self, grammar: impl Grammar + 'static) -> Self {
        self.grammars.push(Arc::new(grammar));
        self
    }

    pub fn build(self) -> GrammarRegistry {
        let mut registry = GrammarRegistry::new();
        for grammar in self.grammars {
            registry.register(grammar);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::ErrorKind;

    #[test]
    fn test_standard_registry() {
        let registry = GrammarRegistry::standard();
        assert_eq!(
            registry.formats(),
            vec![
                QueryFormat::Sql,
                QueryFormat::Cypher,
                QueryFormat::GraphQl,
                QueryFormat::JsonPath,
                QueryFormat::XPath,
                QueryFormat::MongoDb,
            ]
        );
    }

    #[test]
    fn test_missing_grammar() {
        let registry = GrammarRegistry::standard();
        let err = registry.get(QueryFormat::Gremlin).err().unwrap();
        assert!(matches!(err, QueryError::GrammarNotFound { .. }));
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    }
}
