//! Machine-readable parameter schema for every action kind.
//!
//! The catalog lists, per kind: the parameter names with their types and
//! whether they are required, the legal child kinds in order, and the shape
//! of the result the operator produces.

use crate::kind::{ActionKind, Category};
use crate::params::{Params, RecordType};
use crate::result::ResultShape;
use serde::{Serialize, Serializer};
use std::fmt;

/// Semantic type of a parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    Scalar,
    Identifier,
    Expression,
    Path,
    Integer,
    Boolean,
    Object,
    Enum(&'static [&'static str]),
    List(Box<ParamType>),
    Optional(Box<ParamType>),
}

impl ParamType {
    fn list(inner: ParamType) -> Self {
        ParamType::List(Box::new(inner))
    }

    fn opt(inner: ParamType) -> Self {
        ParamType::Optional(Box::new(inner))
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Scalar => f.write_str("scalar"),
            ParamType::Identifier => f.write_str("identifier"),
            ParamType::Expression => f.write_str("expression"),
            ParamType::Path => f.write_str("path"),
            ParamType::Integer => f.write_str("integer"),
            ParamType::Boolean => f.write_str("boolean"),
            ParamType::Object => f.write_str("object"),
            ParamType::Enum(values) => write!(f, "enum({})", values.join("|")),
            ParamType::List(inner) => write!(f, "list<{inner}>"),
            ParamType::Optional(inner) => write!(f, "optional<{inner}>"),
        }
    }
}

impl Serialize for ParamType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub ty: ParamType,
    pub required: bool,
}

fn req(name: &'static str, ty: ParamType) -> ParamSpec {
    ParamSpec {
        name,
        ty,
        required: true,
    }
}

fn opt(name: &'static str, ty: ParamType) -> ParamSpec {
    ParamSpec {
        name,
        ty,
        required: false,
    }
}

/// One position in an ordered child list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChildSlot {
    /// Accepted kinds; empty accepts any kind
    pub kinds: Vec<ActionKind>,
    pub min: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<usize>,
}

impl ChildSlot {
    fn optional(kinds: &[ActionKind]) -> Self {
        Self {
            kinds: kinds.to_vec(),
            min: 0,
            max: Some(1),
        }
    }

    fn repeated(kinds: &[ActionKind]) -> Self {
        Self {
            kinds: kinds.to_vec(),
            min: 0,
            max: None,
        }
    }

    fn accepts(&self, kind: ActionKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ChildRule {
    Leaf,
    Any { min: usize, max: Option<usize> },
    Ordered { slots: Vec<ChildSlot> },
}

impl ChildRule {
    const fn any(min: usize, max: Option<usize>) -> Self {
        ChildRule::Any { min, max }
    }

    /// A single optional input child
    const fn piped() -> Self {
        ChildRule::Any {
            min: 0,
            max: Some(1),
        }
    }
}

/// Full schema of one kind
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KindSchema {
    pub kind: ActionKind,
    pub category: Category,
    pub record: RecordType,
    pub params: Vec<ParamSpec>,
    pub children: ChildRule,
    pub result: ResultShape,
}

fn record_params(record: RecordType) -> Vec<ParamSpec> {
    use ParamType as T;
    match record {
        RecordType::None => vec![],
        RecordType::Select => vec![
            req("fields", T::list(T::Expression)),
            opt("from", T::Identifier),
            opt("distinct", T::Boolean),
        ],
        RecordType::Write => vec![
            req("target", T::Path),
            opt("columns", T::list(T::Identifier)),
            opt("rows", T::list(T::list(T::Expression))),
            opt("assignments", T::list(T::Expression)),
            opt("key", T::list(T::Identifier)),
        ],
        RecordType::Schema => vec![
            opt(
                "object",
                T::Enum(&["collection", "index", "view", "vertex"]),
            ),
            req("name", T::Identifier),
            opt("columns", T::list(T::Object)),
            opt("on", T::Identifier),
            opt("labels", T::list(T::Identifier)),
            opt("properties", T::Object),
            opt("alter", T::list(T::Object)),
            opt("if_exists", T::Boolean),
        ],
        RecordType::Predicate => vec![req("predicate", T::Expression)],
        RecordType::Like => vec![
            req("field", T::Path),
            req("pattern", T::Scalar),
            opt("negated", T::Boolean),
            opt("case_insensitive", T::Boolean),
        ],
        RecordType::In => vec![
            req("field", T::Path),
            req("values", T::list(T::Scalar)),
            opt("negated", T::Boolean),
        ],
        RecordType::Has => vec![req("field", T::Path), opt("present", T::Boolean)],
        RecordType::Range => vec![
            req("field", T::Path),
            opt("low", T::Scalar),
            opt("high", T::Scalar),
            opt("low_inclusive", T::Boolean),
            opt("high_inclusive", T::Boolean),
            opt("negated", T::Boolean),
        ],
        RecordType::Term => vec![opt("field", T::Path), req("term", T::Scalar)],
        RecordType::Values => vec![
            opt("columns", T::list(T::Identifier)),
            req("rows", T::list(T::list(T::Scalar))),
        ],
        RecordType::Aggregate => vec![
            opt("field", T::Path),
            opt("distinct", T::Boolean),
            opt("alias", T::Identifier),
        ],
        RecordType::Distinct => vec![opt("fields", T::list(T::Path))],
        RecordType::Group => vec![req("keys", T::list(T::Expression))],
        RecordType::Summarize => vec![
            opt("group_by", T::list(T::Expression)),
            opt("aggregates", T::list(T::Expression)),
        ],
        RecordType::Project => vec![
            req("fields", T::list(T::Expression)),
            opt("distinct", T::Boolean),
        ],
        RecordType::Extend => vec![req("fields", T::list(T::Expression))],
        RecordType::Order => vec![req("keys", T::list(T::Expression))],
        RecordType::Limit => vec![opt("count", T::Integer), opt("offset", T::Integer)],
        RecordType::Pattern => vec![
            req("elements", T::list(T::Object)),
            opt("optional", T::Boolean),
        ],
        RecordType::Traverse => vec![
            opt("start", T::list(T::Scalar)),
            opt("labels", T::list(T::Identifier)),
            opt("direction", T::Enum(&["out", "in", "both"])),
            opt("min_depth", T::Integer),
            opt("max_depth", T::Integer),
            opt("strategy", T::Enum(&["bfs", "dfs"])),
        ],
        RecordType::Path => vec![
            opt("from", T::Scalar),
            opt("to", T::Scalar),
            opt("labels", T::list(T::Identifier)),
            opt("direction", T::Enum(&["out", "in", "both"])),
            opt("min_length", T::Integer),
            opt("max_length", T::opt(T::Integer)),
            opt("weight", T::Identifier),
        ],
        RecordType::Edge => vec![
            opt("id", T::Scalar),
            opt("from", T::Expression),
            opt("to", T::Expression),
            opt("label", T::Identifier),
            opt("properties", T::list(T::Expression)),
        ],
        RecordType::Properties => vec![
            opt("target", T::Expression),
            opt("assignments", T::list(T::Expression)),
            opt("keys", T::list(T::Path)),
        ],
        RecordType::GraphTarget => vec![
            opt("targets", T::list(T::Expression)),
            opt("labels", T::list(T::Identifier)),
            opt("new_id", T::Scalar),
            opt("directed", T::Boolean),
        ],
        RecordType::Transfer => vec![req("location", T::Path), opt("collection", T::Path)],
        RecordType::Slice => vec![
            opt("field", T::Path),
            opt("start", T::Integer),
            opt("end", T::Integer),
            opt("step", T::Integer),
            opt("index", T::Integer),
        ],
        RecordType::Join => vec![
            opt(
                "join_type",
                T::Enum(&["inner", "left", "right", "full", "cross"]),
            ),
            req("target", T::Identifier),
            opt("on", T::Expression),
        ],
        RecordType::Union => vec![opt("distinct", T::Boolean)],
        RecordType::Binding => vec![req("name", T::Identifier), opt("value", T::Expression)],
        RecordType::Window => vec![
            req(
                "function",
                T::Enum(&[
                    "row_number",
                    "rank",
                    "dense_rank",
                    "lag",
                    "lead",
                    "sum",
                    "avg",
                    "count",
                    "min",
                    "max",
                ]),
            ),
            opt("field", T::Path),
            opt("partition_by", T::list(T::Expression)),
            opt("order_by", T::list(T::Expression)),
            opt("offset", T::Integer),
            req("alias", T::Identifier),
        ],
        RecordType::Subscribe => vec![
            req("topic", T::Identifier),
            opt("fields", T::list(T::Expression)),
        ],
        RecordType::Mutation => vec![opt("name", T::Identifier)],
        RecordType::Options => vec![
            opt("timeout_ms", T::Integer),
            opt("limit", T::Integer),
            opt("max_depth", T::Integer),
        ],
        RecordType::Construct => vec![req("template", T::Object)],
        RecordType::Describe => vec![req("target", T::Identifier)],
    }
}

fn child_rule(kind: ActionKind) -> ChildRule {
    use ActionKind as K;
    match kind {
        K::Select => ChildRule::Ordered {
            slots: vec![
                ChildSlot::optional(&[K::Select, K::Values, K::Union, K::Load, K::Pipe]),
                ChildSlot::repeated(&[K::Join]),
                ChildSlot::optional(&[K::Where, K::Filter]),
                ChildSlot::optional(&[K::Group]),
                ChildSlot::optional(&[K::Having]),
                ChildSlot::repeated(&[K::Window]),
                ChildSlot::optional(&[K::Order, K::By]),
                ChildSlot::optional(&[K::Offset]),
                ChildSlot::optional(&[K::Limit]),
                ChildSlot::optional(&[K::Offset]),
                ChildSlot::optional(&[K::Distinct]),
            ],
        },
        K::Update | K::Delete => ChildRule::Ordered {
            slots: vec![ChildSlot::optional(&[K::Where, K::Filter])],
        },
        K::Create | K::Alter | K::Drop | K::Values | K::Load | K::Describe => ChildRule::Leaf,
        K::Optional
        | K::Union
        | K::Pipe
        | K::With
        | K::For
        | K::Foreach
        | K::Ask
        | K::Mutation
        | K::Options => ChildRule::any(1, None),
        K::Match | K::Subscribe | K::Subscription => ChildRule::any(0, None),
        K::ConnectedComponents | K::CycleDetection => ChildRule::Leaf,
        _ => ChildRule::piped(),
    }
}

fn result_shape(kind: ActionKind) -> ResultShape {
    use ActionKind as K;
    match kind {
        K::Count | K::Sum | K::Avg | K::Min | K::Max | K::Indexing | K::Describe | K::PathLength => {
            ResultShape::Scalar
        }
        K::Group | K::Having => ResultShape::Groups,
        K::Ask | K::CycleDetection => ResultShape::Boolean,
        K::ShortestPath | K::Subgraph | K::ConnectedComponents => ResultShape::Graph,
        K::Let | K::Foreach | K::Store => ResultShape::Void,
        k if k.is_write() => ResultShape::Void,
        _ => ResultShape::Rows,
    }
}

/// Schema of one kind
pub fn schema_for(kind: ActionKind) -> KindSchema {
    KindSchema {
        kind,
        category: kind.category(),
        record: kind.record(),
        params: record_params(kind.record()),
        children: child_rule(kind),
        result: result_shape(kind),
    }
}

/// Schemas of every kind, in declaration order
pub fn catalog() -> Vec<KindSchema> {
    ActionKind::ALL.iter().copied().map(schema_for).collect()
}

/// Required parameters that are empty in `params`.
pub fn missing_required(params: &Params, schema: &KindSchema) -> Vec<&'static str> {
    let empty: Vec<&'static str> = match params {
        Params::Select(p) if p.fields.is_empty() => vec!["fields"],
        Params::Write(p) if p.target.is_empty() => vec!["target"],
        Params::Schema(p) if p.name.is_empty() => vec!["name"],
        Params::Like(p) if p.field.is_empty() => vec!["field"],
        Params::In(p) if p.field.is_empty() => vec!["field"],
        Params::Has(p) if p.field.is_empty() => vec!["field"],
        Params::Range(p) if p.field.is_empty() => vec!["field"],
        Params::Term(p) if p.term.is_empty() => vec!["term"],
        Params::Group(p) if p.keys.is_empty() => vec!["keys"],
        Params::Project(p) if p.fields.is_empty() => vec!["fields"],
        Params::Extend(p) if p.fields.is_empty() => vec!["fields"],
        Params::Order(p) if p.keys.is_empty() => vec!["keys"],
        Params::Pattern(p) if p.elements.is_empty() => vec!["elements"],
        Params::Transfer(p) if p.location.is_empty() => vec!["location"],
        Params::Join(p) if p.target.name.is_empty() => vec!["target"],
        Params::Binding(p) if p.name.is_empty() => vec!["name"],
        Params::Window(p) if p.alias.is_empty() => vec!["alias"],
        Params::Subscribe(p) if p.topic.is_empty() => vec!["topic"],
        Params::Describe(p) if p.target.is_empty() => vec!["target"],
        _ => vec![],
    };
    empty
        .into_iter()
        .filter(|name| schema.params.iter().any(|s| s.name == *name && s.required))
        .collect()
}

/// Greedy match of child kinds against ordered slots.
pub fn match_slots(slots: &[ChildSlot], kinds: &[ActionKind]) -> bool {
    let mut i = 0;
    for slot in slots {
        let mut taken = 0;
        while i < kinds.len()
            && slot.accepts(kinds[i])
            && slot.max.map_or(true, |max| taken < max)
        {
            taken += 1;
            i += 1;
        }
        if taken < slot.min {
            return false;
        }
    }
    i == kinds.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_covers_every_kind() {
        let catalog = catalog();
        assert_eq!(catalog.len(), ActionKind::ALL.len());
        assert!(catalog.iter().all(|s| s.record == s.kind.record()));
    }

    #[test]
    fn test_catalog_serializes() {
        let all = serde_json::to_value(catalog()).unwrap();
        assert_eq!(all.as_array().map(Vec::len), Some(ActionKind::ALL.len()));

        let select = serde_json::to_value(schema_for(ActionKind::Select)).unwrap();
        assert_eq!(select["children"]["rule"], "ordered");
        assert_eq!(select["children"]["slots"][1]["kinds"][0], "JOIN");
        assert!(select["children"]["slots"][1].get("max").is_none());

        let json = serde_json::to_value(schema_for(ActionKind::Like)).unwrap();
        assert_eq!(json["kind"], "LIKE");
        assert_eq!(json["params"][0]["name"], "field");
        assert_eq!(json["params"][0]["type"], "path");
        assert_eq!(json["params"][0]["required"], true);
        assert_eq!(json["result"], "rows");
    }

    #[test]
    fn test_select_child_order() {
        use ActionKind as K;
        let schema = schema_for(K::Select);
        let ChildRule::Ordered { slots } = schema.children else {
            panic!("select should have ordered children");
        };
        assert!(match_slots(&slots, &[K::Where, K::Order, K::Limit, K::Offset]));
        assert!(match_slots(&slots, &[K::Join, K::Join, K::Where]));
        assert!(match_slots(&slots, &[K::Offset, K::Limit]));
        assert!(!match_slots(&slots, &[K::Limit, K::Where]));
        assert!(!match_slots(&slots, &[K::Where, K::Where]));
    }

    #[test]
    fn test_param_type_display() {
        assert_eq!(ParamType::list(ParamType::Expression).to_string(), "list<expression>");
        assert_eq!(ParamType::Enum(&["a", "b"]).to_string(), "enum(a|b)");
    }

    #[test]
    fn test_write_kinds_produce_void() {
        assert_eq!(schema_for(ActionKind::Insert).result, ResultShape::Void);
        assert_eq!(schema_for(ActionKind::Ask).result, ResultShape::Boolean);
    }
}
