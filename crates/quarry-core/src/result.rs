//! Execution results.

use crate::action::ActionId;
use crate::error::{ErrorKind, QueryError};
use crate::kind::ActionKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tag describing the payload of a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultShape {
    Scalar,
    Rows,
    Groups,
    Boolean,
    Graph,
    Void,
}

/// Per-invocation operator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    #[default]
    Created,
    Validating,
    Executing,
    Succeeded,
    Failed,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionState::Succeeded | ExecutionState::Failed)
    }
}

/// Soft error recorded in LENIENT mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<ActionId>,
}

impl From<&QueryError> for ErrorRecord {
    fn from(err: &QueryError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            action_id: err.action().map(|(id, _)| id),
        }
    }
}

/// Output of one operator invocation, and of a whole query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub data: Value,
    pub shape: ResultShape,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub affected_count: u64,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorRecord>,
    #[serde(default)]
    pub state: ExecutionState,
    /// Kind of the action that produced this result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ActionKind>,
}

impl ExecutionResult {
    fn with_shape(data: Value, shape: ResultShape) -> Self {
        Self {
            data,
            shape,
            success: true,
            error_kind: None,
            error_message: None,
            affected_count: 0,
            metadata: Map::new(),
            errors: Vec::new(),
            state: ExecutionState::Succeeded,
            kind: None,
        }
    }

    /// Row list; `affected_count` is the row count
    pub fn rows(rows: Vec<Value>) -> Self {
        let count = rows.len() as u64;
        let mut result = Self::with_shape(Value::Array(rows), ResultShape::Rows);
        result.affected_count = count;
        result
    }

    pub fn scalar(value: Value) -> Self {
        Self::with_shape(value, ResultShape::Scalar)
    }

    pub fn boolean(value: bool) -> Self {
        Self::with_shape(Value::Bool(value), ResultShape::Boolean)
    }

    /// Group map with `total_groups` / `total_items` metadata
    pub fn groups(groups: Map<String, Value>) -> Self {
        let total_items: usize = groups
            .values()
            .map(|g| g.as_array().map_or(0, Vec::len))
            .sum();
        let total_groups = groups.len();
        let mut result = Self::with_shape(Value::Object(groups), ResultShape::Groups);
        result.affected_count = total_groups as u64;
        result
            .with_meta("total_groups", total_groups)
            .with_meta("total_items", total_items)
    }

    pub fn graph(value: Value) -> Self {
        Self::with_shape(value, ResultShape::Graph)
    }

    pub fn void(affected: u64) -> Self {
        let mut result = Self::with_shape(Value::Null, ResultShape::Void);
        result.affected_count = affected;
        result
    }

    /// Empty row list, contributed by a child that failed in LENIENT mode
    pub fn empty() -> Self {
        Self::rows(Vec::new())
    }

    pub fn failure(err: &QueryError) -> Self {
        let mut result = Self::with_shape(Value::Null, ResultShape::Void);
        result.success = false;
        result.error_kind = Some(err.kind());
        result.error_message = Some(err.to_string());
        result.state = ExecutionState::Failed;
        if let Some((id, kind)) = err.action() {
            result.kind = Some(kind);
            result.metadata.insert("action_id".into(), Value::from(id));
            result.metadata.insert("action_kind".into(), Value::from(kind.as_str()));
        }
        result
    }

    pub fn with_kind(mut self, kind: ActionKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Rows of the payload: arrays yield items, groups yield their rows
    /// flattened, null yields nothing and scalars are a single row.
    pub fn row_slice(&self) -> Vec<Value> {
        match (&self.data, self.shape) {
            (Value::Object(groups), ResultShape::Groups) => groups
                .values()
                .flat_map(|g| g.as_array().cloned().unwrap_or_default())
                .collect(),
            (data, _) => crate::value::as_rows(data),
        }
    }

    pub fn into_rows(self) -> Vec<Value> {
        match (self.data, self.shape) {
            (Value::Array(items), _) => items,
            (data, shape) => ExecutionResult::with_shape(data, shape).row_slice(),
        }
    }

    /// Group map of a GROUP result
    pub fn as_groups(&self) -> Option<&Map<String, Value>> {
        match (&self.data, self.shape) {
            (Value::Object(groups), ResultShape::Groups) => Some(groups),
            _ => None,
        }
    }

    pub fn row_count(&self) -> usize {
        match &self.data {
            Value::Array(items) => items.len(),
            Value::Null => 0,
            _ => 1,
        }
    }
}
