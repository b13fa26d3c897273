//! The closed set of operation kinds a query action can carry.

use crate::params::RecordType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operation family, used for documentation and capability defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Crud,
    Filtering,
    Aggregation,
    Projection,
    Ordering,
    Graph,
    DataTransfer,
    Array,
    Advanced,
}

macro_rules! action_kinds {
    ($($category:ident { $($variant:ident => $name:literal : $record:ident),* $(,)? })*) => {
        /// Operation kind of a query action.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum ActionKind {
            $($(
                #[serde(rename = $name)]
                $variant,
            )*)*
        }

        impl ActionKind {
            /// Every kind, in declaration order
            pub const ALL: &'static [ActionKind] = &[$($(ActionKind::$variant,)*)*];

            /// Canonical upper-case name
            pub fn as_str(self) -> &'static str {
                match self {
                    $($(ActionKind::$variant => $name,)*)*
                }
            }

            pub fn category(self) -> Category {
                match self {
                    $($(ActionKind::$variant => Category::$category,)*)*
                }
            }

            /// Parameter record this kind accepts
            pub fn record(self) -> RecordType {
                match self {
                    $($(ActionKind::$variant => RecordType::$record,)*)*
                }
            }
        }
    };
}

action_kinds! {
    Crud {
        Select => "SELECT": Select,
        Insert => "INSERT": Write,
        Update => "UPDATE": Write,
        Delete => "DELETE": Write,
        Create => "CREATE": Schema,
        Alter => "ALTER": Schema,
        Drop => "DROP": Schema,
    }
    Filtering {
        Where => "WHERE": Predicate,
        Filter => "FILTER": Predicate,
        Like => "LIKE": Like,
        In => "IN": In,
        Has => "HAS": Has,
        Between => "BETWEEN": Range,
        Range => "RANGE": Range,
        Term => "TERM": Term,
        Optional => "OPTIONAL": None,
        Values => "VALUES": Values,
    }
    Aggregation {
        Count => "COUNT": Aggregate,
        Sum => "SUM": Aggregate,
        Avg => "AVG": Aggregate,
        Min => "MIN": Aggregate,
        Max => "MAX": Aggregate,
        Distinct => "DISTINCT": Distinct,
        Group => "GROUP": Group,
        Having => "HAVING": Predicate,
        Summarize => "SUMMARIZE": Summarize,
        Aggregate => "AGGREGATE": Summarize,
    }
    Projection {
        Project => "PROJECT": Project,
        Extend => "EXTEND": Extend,
    }
    Ordering {
        Order => "ORDER": Order,
        By => "BY": Order,
        Limit => "LIMIT": Limit,
        Offset => "OFFSET": Limit,
    }
    Graph {
        Match => "MATCH": Pattern,
        Path => "PATH": Path,
        Out => "OUT": Traverse,
        InTraverse => "IN_TRAVERSE": Traverse,
        Both => "BOTH": Traverse,
        Neighbors => "NEIGHBORS": Traverse,
        OutE => "OUT_E": Traverse,
        InE => "IN_E": Traverse,
        BothE => "BOTH_E": Traverse,
        OutV => "OUT_V": Traverse,
        InV => "IN_V": Traverse,
        BothV => "BOTH_V": Traverse,
        Return => "RETURN": Project,
        CreateEdge => "CREATE_EDGE": Edge,
        DeleteEdge => "DELETE_EDGE": Edge,
        UpdateEdge => "UPDATE_EDGE": Edge,
        Set => "SET": Properties,
        Properties => "PROPERTIES": Properties,
        Expand => "EXPAND": Traverse,
        Degree => "DEGREE": Traverse,
        ShortestPath => "SHORTEST_PATH": Path,
        AllPaths => "ALL_PATHS": Path,
        VariablePath => "VARIABLE_PATH": Path,
        DetachDelete => "DETACH_DELETE": GraphTarget,
        PathLength => "PATH_LENGTH": Path,
        ExtractPath => "EXTRACT_PATH": Path,
        ConnectedComponents => "CONNECTED_COMPONENTS": GraphTarget,
        CycleDetection => "CYCLE_DETECTION": GraphTarget,
        Traversal => "TRAVERSAL": Traverse,
        Subgraph => "SUBGRAPH": GraphTarget,
        Clone => "CLONE": GraphTarget,
    }
    DataTransfer {
        Load => "LOAD": Transfer,
        Store => "STORE": Transfer,
        Merge => "MERGE": Write,
    }
    Array {
        Slicing => "SLICING": Slice,
        Indexing => "INDEXING": Slice,
    }
    Advanced {
        Join => "JOIN": Join,
        Union => "UNION": Union,
        With => "WITH": Binding,
        Window => "WINDOW": Window,
        Pipe => "PIPE": None,
        Let => "LET": Binding,
        For => "FOR": Binding,
        Foreach => "FOREACH": Binding,
        Ask => "ASK": None,
        Subscribe => "SUBSCRIBE": Subscribe,
        Subscription => "SUBSCRIPTION": Subscribe,
        Mutation => "MUTATION": Mutation,
        Options => "OPTIONS": Options,
        Construct => "CONSTRUCT": Construct,
        Describe => "DESCRIBE": Describe,
    }
}

impl ActionKind {
    /// Kinds that mutate the data node.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            ActionKind::Insert
                | ActionKind::Update
                | ActionKind::Delete
                | ActionKind::Merge
                | ActionKind::Alter
                | ActionKind::Create
                | ActionKind::Drop
                | ActionKind::CreateEdge
                | ActionKind::DeleteEdge
                | ActionKind::UpdateEdge
                | ActionKind::Set
                | ActionKind::DetachDelete
                | ActionKind::Clone
        )
    }

    /// Kinds whose semantics are schema changes (plan caches must be dropped)
    pub fn is_ddl(self) -> bool {
        matches!(
            self,
            ActionKind::Create | ActionKind::Alter | ActionKind::Drop
        )
    }

    /// Look a kind up by name, case-insensitively.
    ///
    /// `FIND` is accepted as an alias of `SELECT`.
    pub fn from_name(name: &str) -> Option<ActionKind> {
        let name = name.trim();
        if name.eq_ignore_ascii_case("FIND") {
            return Some(ActionKind::Select);
        }
        ActionKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::from_name(s).ok_or_else(|| format!("unknown action kind '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_kind_set_is_closed() {
        assert_eq!(ActionKind::ALL.len(), 84);
        let names: HashSet<_> = ActionKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(names.len(), 84);
    }

    #[test]
    fn test_find_aliases_select() {
        assert_eq!(ActionKind::from_name("find"), Some(ActionKind::Select));
        assert_eq!("select".parse::<ActionKind>(), Ok(ActionKind::Select));
    }

    #[test]
    fn test_name_round_trip() {
        for kind in ActionKind::ALL {
            assert_eq!(ActionKind::from_name(kind.as_str()), Some(*kind));
        }
    }

    #[test]
    fn test_serde_uses_canonical_names() {
        let json = serde_json::to_string(&ActionKind::InTraverse).unwrap();
        assert_eq!(json, "\"IN_TRAVERSE\"");
    }

    #[test]
    fn test_write_kinds() {
        let writes = ActionKind::ALL.iter().filter(|k| k.is_write()).count();
        assert_eq!(writes, 13);
        assert!(!ActionKind::Select.is_write());
        assert_eq!(ActionKind::DetachDelete.category(), Category::Graph);
    }
}
