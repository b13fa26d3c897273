//! Execution side of quarry: operators, statistics, cost model, planner,
//! optimizer, plan cache, executor and the [`Converter`] facade.
//!
//! ```rust,no_run
//! use quarry_core::JsonNode;
//! use quarry_engine::Converter;
//! use serde_json::json;
//!
//! let converter = Converter::default();
//! let mut data = JsonNode::from_native(json!({"users": [{"name": "Alice", "age": 30}]}));
//! let result = converter.execute("SELECT name FROM users WHERE age > 18", &mut data, &converter.options());
//! assert!(result.success);
//! ```

pub mod cache;
pub mod converter;
pub mod cost;
pub mod eval;
pub mod executor;
pub mod graph;
pub mod operators;
pub mod optimizer;
pub mod plan;
pub mod stats;

pub use cache::{CacheStats, PlanCache};
pub use converter::{Converter, ValidationReport};
pub use cost::{CostModel, JoinAlgorithm};
pub use executor::{ExecutionContext, Executor};
pub use operators::{Builtin, Operator, OperatorFn, OperatorRegistry};
pub use optimizer::{Optimizer, Rule};
pub use plan::{PhysicalPlan, PlanHints, Planner};
pub use stats::{IndexInfo, StatisticsStore};
