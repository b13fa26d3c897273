//! Query format identifiers.

use quarry_core::QueryError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Query languages known to the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryFormat {
    Sql,
    Cypher,
    GraphQl,
    Sparql,
    Gremlin,
    JmesPath,
    JsonPath,
    XPath,
    MongoDb,
}

impl QueryFormat {
    /// Detection order; ties resolve to the earlier format
    pub const ALL: [QueryFormat; 9] = [
        QueryFormat::Sql,
        QueryFormat::Cypher,
        QueryFormat::GraphQl,
        QueryFormat::Sparql,
        QueryFormat::Gremlin,
        QueryFormat::JmesPath,
        QueryFormat::JsonPath,
        QueryFormat::XPath,
        QueryFormat::MongoDb,
    ];

    /// Display name, e.g. `Cypher`
    pub fn name(self) -> &'static str {
        match self {
            QueryFormat::Sql => "SQL",
            QueryFormat::Cypher => "Cypher",
            QueryFormat::GraphQl => "GraphQL",
            QueryFormat::Sparql => "SPARQL",
            QueryFormat::Gremlin => "Gremlin",
            QueryFormat::JmesPath => "JMESPath",
            QueryFormat::JsonPath => "JSONPath",
            QueryFormat::XPath => "XPath",
            QueryFormat::MongoDb => "MongoDB",
        }
    }

    /// Lower-case identifier used on the command line and in grammar files
    pub fn id(self) -> &'static str {
        match self {
            QueryFormat::Sql => "sql",
            QueryFormat::Cypher => "cypher",
            QueryFormat::GraphQl => "graphql",
            QueryFormat::Sparql => "sparql",
            QueryFormat::Gremlin => "gremlin",
            QueryFormat::JmesPath => "jmespath",
            QueryFormat::JsonPath => "jsonpath",
            QueryFormat::XPath => "xpath",
            QueryFormat::MongoDb => "mongodb",
        }
    }

    pub fn from_name(name: &str) -> Option<QueryFormat> {
        let format = match name.trim().to_ascii_lowercase().as_str() {
            "sql" => QueryFormat::Sql,
            "cypher" | "opencypher" => QueryFormat::Cypher,
            "graphql" | "gql" => QueryFormat::GraphQl,
            "sparql" => QueryFormat::Sparql,
            "gremlin" => QueryFormat::Gremlin,
            "jmespath" => QueryFormat::JmesPath,
            "jsonpath" => QueryFormat::JsonPath,
            "xpath" => QueryFormat::XPath,
            "mongodb" | "mongo" | "mql" => QueryFormat::MongoDb,
            _ => return None,
        };
        Some(format)
    }
}

impl fmt::Display for QueryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QueryFormat {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueryFormat::from_name(s).ok_or_else(|| QueryError::UnsupportedFormat {
            format: s.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("SQL", QueryFormat::Sql)]
    #[test_case("mongo", QueryFormat::MongoDb)]
    #[test_case(" GraphQL ", QueryFormat::GraphQl)]
    fn test_from_name(name: &str, expected: QueryFormat) {
        assert_eq!(name.parse::<QueryFormat>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_format() {
        let err = "promql".parse::<QueryFormat>().unwrap_err();
        assert_eq!(err.kind(), quarry_core::ErrorKind::UnsupportedFormat);
    }

    #[test]
    fn test_ids_round_trip() {
        for format in QueryFormat::ALL {
            assert_eq!(QueryFormat::from_name(format.id()), Some(format));
        }
    }
}
