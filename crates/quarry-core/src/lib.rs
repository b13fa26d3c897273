//! Core model for quarry: the query action tree, its parameter schema,
//! the data node contract, execution results and the error taxonomy.

pub mod action;
pub mod data;
pub mod error;
pub mod expr;
pub mod kind;
pub mod options;
pub mod params;
pub mod result;
pub mod schema;
pub mod value;

pub use action::{Action, ActionId, Span};
pub use data::{DataNode, DataShape, JsonNode, ShapeSet};
pub use error::{line_column, ErrorKind, QueryError, Result};
pub use expr::{AggregateFunc, BinaryOp, Expr};
pub use kind::{ActionKind, Category};
pub use options::{CancellationToken, ConversionMode, OptimizationLevel, QueryOptions};
pub use result::{ErrorRecord, ExecutionResult, ExecutionState, ResultShape};
pub use schema::{catalog, schema_for, ChildRule, KindSchema, ParamSpec, ParamType};

// Re-export parameter records used across crate boundaries
pub use params::{
    AggregateParams, AlterOp, Assignment, BindingParams, ColumnDef, ConstructParams,
    DescribeParams, Direction, DistinctParams, EdgeParams, EdgePattern, ExtendParams,
    GraphTargetParams, GroupParams, HasParams, InParams, JoinParams, JoinType, LikeParams,
    LimitParams, MutationParams, NodePattern, OptionsParams, OrderParams, Params, PathParams,
    PatternElement, PatternParams, PredicateParams, ProjectParams, Projection,
    PropertiesParams, RangeParams, RecordType, SchemaObject, SchemaParams, SelectParams,
    SliceParams, SortKey, Source, SubscribeParams, SummarizeParams, TermParams, TransferParams,
    TraversalStrategy, TraverseParams, UnionParams, ValuesParams, WindowFunction, WindowParams,
    WriteParams,
};
