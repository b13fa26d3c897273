//! Typed parameter records.
//!
//! Every [`ActionKind`](crate::ActionKind) accepts exactly one record type,
//! given by `ActionKind::record()`. Kinds of one family share a record.

use crate::expr::Expr;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Shared building blocks
// ============================================================================

/// A projected expression with an optional output name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub expr: Expr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Projection {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn aliased(expr: Expr, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: Some(alias.into()),
        }
    }

    pub fn is_star(&self) -> bool {
        matches!(self.expr, Expr::Star)
    }

    /// Key this projection writes in an output row
    pub fn output_name(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| self.expr.output_name())
    }
}

/// A named collection, optionally aliased (`FROM users u`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Source {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
        }
    }

    /// Qualifier used for `alias.field` references
    pub fn qualifier(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub expr: Expr,
    #[serde(default)]
    pub descending: bool,
}

impl SortKey {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            descending: false,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            descending: true,
        }
    }
}

/// `path = value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub path: String,
    pub value: Expr,
}

impl Assignment {
    pub fn new(path: impl Into<String>, value: Expr) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: None,
            nullable: true,
            primary_key: false,
            default: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Edge direction relative to the start vertex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Out,
    In,
    Both,
}

// ============================================================================
// Records
// ============================================================================

/// SELECT (and FIND)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SelectParams {
    pub fields: Vec<Projection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Source>,
    #[serde(default)]
    pub distinct: bool,
}

/// INSERT, UPDATE, DELETE, MERGE
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WriteParams {
    pub target: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<Vec<Expr>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignments: Vec<Assignment>,
    /// Upsert key columns (MERGE)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaObject {
    #[default]
    Collection,
    Index,
    View,
    Vertex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum AlterOp {
    AddColumn { column: ColumnDef },
    DropColumn { name: String },
    RenameColumn { from: String, to: String },
    RenameTo { name: String },
}

/// CREATE, ALTER, DROP
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SchemaParams {
    #[serde(default)]
    pub object: SchemaObject,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<ColumnDef>,
    /// Collection an index is built on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alter: Vec<AlterOp>,
    /// `IF NOT EXISTS` for CREATE, `IF EXISTS` for DROP
    #[serde(default)]
    pub if_exists: bool,
}

/// WHERE, FILTER, HAVING
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredicateParams {
    pub predicate: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LikeParams {
    pub field: String,
    pub pattern: String,
    #[serde(default)]
    pub negated: bool,
    #[serde(default)]
    pub case_insensitive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InParams {
    pub field: String,
    pub values: Vec<Value>,
    #[serde(default)]
    pub negated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HasParams {
    pub field: String,
    /// `false` selects items where the field is absent or null
    #[serde(default = "default_true")]
    pub present: bool,
}

/// BETWEEN (inclusive both ends) and RANGE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeParams {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<Value>,
    #[serde(default = "default_true")]
    pub low_inclusive: bool,
    #[serde(default = "default_true")]
    pub high_inclusive: bool,
    #[serde(default)]
    pub negated: bool,
}

/// Case-insensitive word match, over one field or every string value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub term: String,
}

/// Inline rows
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValuesParams {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// COUNT, SUM, AVG, MIN, MAX. `field == None` means `*`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregateParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default)]
    pub distinct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// DISTINCT; empty `fields` compares whole items
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DistinctParams {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GroupParams {
    pub keys: Vec<Expr>,
}

/// SUMMARIZE, AGGREGATE: grouping plus aggregate columns in one node
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SummarizeParams {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<Expr>,
    pub aggregates: Vec<Projection>,
}

/// PROJECT, RETURN
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProjectParams {
    pub fields: Vec<Projection>,
    #[serde(default)]
    pub distinct: bool,
}

/// EXTEND; every projection needs an alias
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtendParams {
    pub fields: Vec<Projection>,
}

/// ORDER, BY
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrderParams {
    pub keys: Vec<SortKey>,
}

/// LIMIT, OFFSET
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LimitParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(default)]
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodePattern {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgePattern {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default = "default_one")]
    pub min_hops: u32,
    /// `None` is unbounded (`*`)
    #[serde(default = "default_some_one")]
    pub max_hops: Option<u32>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

impl Default for EdgePattern {
    fn default() -> Self {
        Self {
            variable: None,
            labels: Vec::new(),
            direction: Direction::Out,
            min_hops: 1,
            max_hops: Some(1),
            properties: Map::new(),
        }
    }
}

impl EdgePattern {
    pub fn is_variable_length(&self) -> bool {
        self.min_hops != 1 || self.max_hops != Some(1)
    }
}

fn default_one() -> u32 {
    1
}

fn default_some_one() -> Option<u32> {
    Some(1)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "element")]
pub enum PatternElement {
    Node(NodePattern),
    Edge(EdgePattern),
}

/// MATCH: alternating node/edge chain starting and ending with a node
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PatternParams {
    pub elements: Vec<PatternElement>,
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraversalStrategy {
    #[default]
    Bfs,
    Dfs,
}

/// Adjacency kinds (OUT, IN_TRAVERSE, BOTH, ...), EXPAND, DEGREE, TRAVERSAL.
///
/// Empty `start` takes start vertices from the piped input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraverseParams {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub start: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default = "default_one")]
    pub min_depth: u32,
    #[serde(default = "default_one")]
    pub max_depth: u32,
    #[serde(default)]
    pub strategy: TraversalStrategy,
}

impl Default for TraverseParams {
    fn default() -> Self {
        Self {
            start: Vec::new(),
            labels: Vec::new(),
            direction: Direction::Out,
            min_depth: 1,
            max_depth: 1,
            strategy: TraversalStrategy::Bfs,
        }
    }
}

/// PATH, SHORTEST_PATH, ALL_PATHS, VARIABLE_PATH, PATH_LENGTH, EXTRACT_PATH
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PathParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub min_length: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    /// Edge property holding weights; enables Dijkstra
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<String>,
}

/// CREATE_EDGE, DELETE_EDGE, UPDATE_EDGE
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EdgeParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<Assignment>,
}

/// SET, PROPERTIES
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PropertiesParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Expr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignments: Vec<Assignment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
}

/// DETACH_DELETE, CLONE, SUBGRAPH, CONNECTED_COMPONENTS, CYCLE_DETECTION
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphTargetParams {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<Expr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_id: Option<Value>,
    #[serde(default = "default_true")]
    pub directed: bool,
}

/// LOAD, STORE
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TransferParams {
    /// File location
    pub location: String,
    /// Data node path to write (LOAD) or read (STORE)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

/// SLICING, INDEXING
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SliceParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl JoinType {
    pub fn keyword(self) -> &'static str {
        match self {
            JoinType::Inner => "INNER",
            JoinType::Left => "LEFT",
            JoinType::Right => "RIGHT",
            JoinType::Full => "FULL OUTER",
            JoinType::Cross => "CROSS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinParams {
    #[serde(default)]
    pub join_type: JoinType,
    pub target: Source,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UnionParams {
    #[serde(default)]
    pub distinct: bool,
}

/// WITH, LET, FOR, FOREACH
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingParams {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowFunction {
    RowNumber,
    Rank,
    DenseRank,
    Lag,
    Lead,
    Sum,
    Avg,
    Count,
    Min,
    Max,
}

impl WindowFunction {
    pub fn from_name(name: &str) -> Option<WindowFunction> {
        match name.to_ascii_uppercase().as_str() {
            "ROW_NUMBER" => Some(WindowFunction::RowNumber),
            "RANK" => Some(WindowFunction::Rank),
            "DENSE_RANK" => Some(WindowFunction::DenseRank),
            "LAG" => Some(WindowFunction::Lag),
            "LEAD" => Some(WindowFunction::Lead),
            "SUM" => Some(WindowFunction::Sum),
            "AVG" => Some(WindowFunction::Avg),
            "COUNT" => Some(WindowFunction::Count),
            "MIN" => Some(WindowFunction::Min),
            "MAX" => Some(WindowFunction::Max),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            WindowFunction::RowNumber => "ROW_NUMBER",
            WindowFunction::Rank => "RANK",
            WindowFunction::DenseRank => "DENSE_RANK",
            WindowFunction::Lag => "LAG",
            WindowFunction::Lead => "LEAD",
            WindowFunction::Sum => "SUM",
            WindowFunction::Avg => "AVG",
            WindowFunction::Count => "COUNT",
            WindowFunction::Min => "MIN",
            WindowFunction::Max => "MAX",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowParams {
    pub function: WindowFunction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partition_by: Vec<Expr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<SortKey>,
    /// Row offset for LAG/LEAD
    #[serde(default = "default_one")]
    pub offset: u32,
    pub alias: String,
}

/// SUBSCRIBE, SUBSCRIPTION
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SubscribeParams {
    pub topic: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<Projection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MutationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Per-subtree overrides of execution options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OptionsParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
}

/// Template instantiated once per input row.
///
/// String leaves starting with `?` or `$` are replaced by the row value of
/// that name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstructParams {
    pub template: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescribeParams {
    pub target: String,
}

// ============================================================================
// Params enum
// ============================================================================

/// Discriminant of [`Params`], used by schema and validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    None,
    Select,
    Write,
    Schema,
    Predicate,
    Like,
    In,
    Has,
    Range,
    Term,
    Values,
    Aggregate,
    Distinct,
    Group,
    Summarize,
    Project,
    Extend,
    Order,
    Limit,
    Pattern,
    Traverse,
    Path,
    Edge,
    Properties,
    GraphTarget,
    Transfer,
    Slice,
    Join,
    Union,
    Binding,
    Window,
    Subscribe,
    Mutation,
    Options,
    Construct,
    Describe,
}

/// Parameters of one action, tagged by record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum Params {
    None,
    Select(SelectParams),
    Write(WriteParams),
    Schema(SchemaParams),
    Predicate(PredicateParams),
    Like(LikeParams),
    In(InParams),
    Has(HasParams),
    Range(RangeParams),
    Term(TermParams),
    Values(ValuesParams),
    Aggregate(AggregateParams),
    Distinct(DistinctParams),
    Group(GroupParams),
    Summarize(SummarizeParams),
    Project(ProjectParams),
    Extend(ExtendParams),
    Order(OrderParams),
    Limit(LimitParams),
    Pattern(PatternParams),
    Traverse(TraverseParams),
    Path(PathParams),
    Edge(EdgeParams),
    Properties(PropertiesParams),
    GraphTarget(GraphTargetParams),
    Transfer(TransferParams),
    Slice(SliceParams),
    Join(JoinParams),
    Union(UnionParams),
    Binding(BindingParams),
    Window(WindowParams),
    Subscribe(SubscribeParams),
    Mutation(MutationParams),
    Options(OptionsParams),
    Construct(ConstructParams),
    Describe(DescribeParams),
}

impl Default for Params {
    fn default() -> Self {
        Params::None
    }
}

impl Params {
    pub fn record(&self) -> RecordType {
        match self {
            Params::None => RecordType::None,
            Params::Select(_) => RecordType::Select,
            Params::Write(_) => RecordType::Write,
            Params::Schema(_) => RecordType::Schema,
            Params::Predicate(_) => RecordType::Predicate,
            Params::Like(_) => RecordType::Like,
            Params::In(_) => RecordType::In,
            Params::Has(_) => RecordType::Has,
            Params::Range(_) => RecordType::Range,
            Params::Term(_) => RecordType::Term,
            Params::Values(_) => RecordType::Values,
            Params::Aggregate(_) => RecordType::Aggregate,
            Params::Distinct(_) => RecordType::Distinct,
            Params::Group(_) => RecordType::Group,
            Params::Summarize(_) => RecordType::Summarize,
            Params::Project(_) => RecordType::Project,
            Params::Extend(_) => RecordType::Extend,
            Params::Order(_) => RecordType::Order,
            Params::Limit(_) => RecordType::Limit,
            Params::Pattern(_) => RecordType::Pattern,
            Params::Traverse(_) => RecordType::Traverse,
            Params::Path(_) => RecordType::Path,
            Params::Edge(_) => RecordType::Edge,
            Params::Properties(_) => RecordType::Properties,
            Params::GraphTarget(_) => RecordType::GraphTarget,
            Params::Transfer(_) => RecordType::Transfer,
            Params::Slice(_) => RecordType::Slice,
            Params::Join(_) => RecordType::Join,
            Params::Union(_) => RecordType::Union,
            Params::Binding(_) => RecordType::Binding,
            Params::Window(_) => RecordType::Window,
            Params::Subscribe(_) => RecordType::Subscribe,
            Params::Mutation(_) => RecordType::Mutation,
            Params::Options(_) => RecordType::Options,
            Params::Construct(_) => RecordType::Construct,
            Params::Describe(_) => RecordType::Describe,
        }
    }

    /// Every expression held by the record, for traversal and fingerprinting
    pub fn expressions(&self) -> Vec<&Expr> {
        let mut out: Vec<&Expr> = Vec::new();
        match self {
            Params::Select(p) => out.extend(p.fields.iter().map(|f| &f.expr)),
            Params::Write(p) => {
                out.extend(p.rows.iter().flatten());
                out.extend(p.assignments.iter().map(|a| &a.value));
            }
            Params::Predicate(p) => out.push(&p.predicate),
            Params::Group(p) => out.extend(p.keys.iter()),
            Params::Summarize(p) => {
                out.extend(p.group_by.iter());
                out.extend(p.aggregates.iter().map(|f| &f.expr));
            }
            Params::Project(p) => out.extend(p.fields.iter().map(|f| &f.expr)),
            Params::Extend(p) => out.extend(p.fields.iter().map(|f| &f.expr)),
            Params::Order(p) => out.extend(p.keys.iter().map(|k| &k.expr)),
            Params::Edge(p) => {
                out.extend(p.from.iter());
                out.extend(p.to.iter());
                out.extend(p.properties.iter().map(|a| &a.value));
            }
            Params::Properties(p) => {
                out.extend(p.target.iter());
                out.extend(p.assignments.iter().map(|a| &a.value));
            }
            Params::GraphTarget(p) => out.extend(p.targets.iter()),
            Params::Join(p) => out.extend(p.on.iter()),
            Params::Binding(p) => out.extend(p.value.iter()),
            Params::Window(p) => {
                out.extend(p.partition_by.iter());
                out.extend(p.order_by.iter().map(|k| &k.expr));
            }
            Params::Subscribe(p) => out.extend(p.fields.iter().map(|f| &f.expr)),
            _ => {}
        }
        out
    }
}

macro_rules! params_accessors {
    ($($fn_name:ident => $variant:ident($ty:ty)),* $(,)?) => {
        impl Params {
            $(
                pub fn $fn_name(&self) -> Option<&$ty> {
                    match self {
                        Params::$variant(p) => Some(p),
                        _ => None,
                    }
                }
            )*
        }
    };
}

params_accessors! {
    as_select => Select(SelectParams),
    as_write => Write(WriteParams),
    as_schema => Schema(SchemaParams),
    as_predicate => Predicate(PredicateParams),
    as_like => Like(LikeParams),
    as_in => In(InParams),
    as_has => Has(HasParams),
    as_range => Range(RangeParams),
    as_term => Term(TermParams),
    as_values => Values(ValuesParams),
    as_aggregate => Aggregate(AggregateParams),
    as_distinct => Distinct(DistinctParams),
    as_group => Group(GroupParams),
    as_summarize => Summarize(SummarizeParams),
    as_project => Project(ProjectParams),
    as_extend => Extend(ExtendParams),
    as_order => Order(OrderParams),
    as_limit => Limit(LimitParams),
    as_pattern => Pattern(PatternParams),
    as_traverse => Traverse(TraverseParams),
    as_path => Path(PathParams),
    as_edge => Edge(EdgeParams),
    as_properties => Properties(PropertiesParams),
    as_graph_target => GraphTarget(GraphTargetParams),
    as_transfer => Transfer(TransferParams),
    as_slice => Slice(SliceParams),
    as_join => Join(JoinParams),
    as_union => Union(UnionParams),
    as_binding => Binding(BindingParams),
    as_window => Window(WindowParams),
    as_subscribe => Subscribe(SubscribeParams),
    as_mutation => Mutation(MutationParams),
    as_options => Options(OptionsParams),
    as_construct => Construct(ConstructParams),
    as_describe => Describe(DescribeParams),
}
