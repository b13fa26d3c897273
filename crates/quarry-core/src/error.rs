//! Error taxonomy shared by every quarry crate.
//!
//! Each variant maps to one stable [`ErrorKind`]. Runtime failures raised by
//! an operator are wrapped once in [`QueryError::Action`] so callers can see
//! which node of the tree failed.

use crate::action::ActionId;
use crate::kind::ActionKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable error categories exposed on results and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Parse,
    Validation,
    UnsupportedOperation,
    UnsupportedFormat,
    Type,
    Value,
    Limit,
    Timeout,
    Security,
    Optimization,
    Execution,
    Format,
    Cancelled,
}

impl ErrorKind {
    /// Upper-case tag used in results and logs
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Parse => "PARSE",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::UnsupportedOperation => "UNSUPPORTED_OPERATION",
            ErrorKind::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            ErrorKind::Type => "TYPE",
            ErrorKind::Value => "VALUE",
            ErrorKind::Limit => "LIMIT",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Security => "SECURITY",
            ErrorKind::Optimization => "OPTIMIZATION",
            ErrorKind::Execution => "EXECUTION",
            ErrorKind::Format => "FORMAT",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced while detecting, parsing, planning or executing a query.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// Syntax error reported by a grammar.
    #[error("parse error at line {line}, column {column}: {message}")]
    Parse {
        /// Human readable reason
        message: String,
        /// 1-based line of the offending token
        line: usize,
        /// 1-based column of the offending token
        column: usize,
    },

    /// Input nesting exceeded the parser depth bound.
    #[error("parse depth {depth} exceeds limit {limit}")]
    ParseDepthExceeded { depth: usize, limit: usize },

    /// Tree walk exceeded `max_depth`.
    #[error("execution depth {depth} exceeds limit {limit}")]
    ExecutionDepthExceeded { depth: usize, limit: usize },

    /// No input or output grammar is registered for the format.
    #[error("no grammar registered for format '{format}'")]
    GrammarNotFound { format: String },

    /// The format id is not known at all.
    #[error("unsupported format '{format}'")]
    UnsupportedFormat { format: String },

    #[error("validation failed: {message}")]
    Validation { message: String },

    /// No operator for the kind, or the operator cannot run on the data shape.
    #[error("unsupported operation {kind}: {reason}")]
    UnsupportedOperation { kind: ActionKind, reason: String },

    #[error("type error: {message}")]
    Type { message: String },

    #[error("invalid value: {message}")]
    Value { message: String },

    /// A resource cap was hit.
    #[error("limit exceeded: {message}")]
    Limit { message: String },

    #[error("query timed out after {elapsed_ms} ms (limit {limit_ms} ms)")]
    Timeout { elapsed_ms: u64, limit_ms: u64 },

    /// Policy denial.
    #[error("security policy violation: {message}")]
    Security { message: String },

    #[error("optimization failed: {message}")]
    Optimization { message: String },

    #[error("execution failed: {message}")]
    Execution { message: String },

    /// Output could not be rendered for the target format.
    #[error("format error: {message}")]
    Format { message: String },

    #[error("query cancelled")]
    Cancelled,

    /// Runtime error raised while executing a specific action.
    #[error("{kind} (action {action_id}) failed: {source}")]
    Action {
        /// Id of the failing node
        action_id: ActionId,
        /// Kind of the failing node
        kind: ActionKind,
        /// Underlying failure
        #[source]
        source: Box<QueryError>,
    },
}

/// Result alias used across the workspace
pub type Result<T, E = QueryError> = std::result::Result<T, E>;

impl QueryError {
    pub fn validation(message: impl Into<String>) -> Self {
        QueryError::Validation {
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        QueryError::Type {
            message: message.into(),
        }
    }

    pub fn value(message: impl Into<String>) -> Self {
        QueryError::Value {
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        QueryError::Execution {
            message: message.into(),
        }
    }

    pub fn format(message: impl Into<String>) -> Self {
        QueryError::Format {
            message: message.into(),
        }
    }

    pub fn limit(message: impl Into<String>) -> Self {
        QueryError::Limit {
            message: message.into(),
        }
    }

    pub fn security(message: impl Into<String>) -> Self {
        QueryError::Security {
            message: message.into(),
        }
    }

    pub fn optimization(message: impl Into<String>) -> Self {
        QueryError::Optimization {
            message: message.into(),
        }
    }

    /// Parse error positioned at a byte offset of `input`
    pub fn parse_at(input: &str, offset: usize, message: impl Into<String>) -> Self {
        let (line, column) = line_column(input, offset);
        QueryError::Parse {
            message: message.into(),
            line,
            column,
        }
    }

    pub fn unsupported(kind: ActionKind, reason: impl Into<String>) -> Self {
        QueryError::UnsupportedOperation {
            kind,
            reason: reason.into(),
        }
    }

    /// Stable category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::Parse { .. } | QueryError::ParseDepthExceeded { .. } => ErrorKind::Parse,
            QueryError::ExecutionDepthExceeded { .. } | QueryError::Limit { .. } => {
                ErrorKind::Limit
            }
            QueryError::GrammarNotFound { .. } | QueryError::UnsupportedFormat { .. } => {
                ErrorKind::UnsupportedFormat
            }
            QueryError::Validation { .. } => ErrorKind::Validation,
            QueryError::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            QueryError::Type { .. } => ErrorKind::Type,
            QueryError::Value { .. } => ErrorKind::Value,
            QueryError::Timeout { .. } => ErrorKind::Timeout,
            QueryError::Security { .. } => ErrorKind::Security,
            QueryError::Optimization { .. } => ErrorKind::Optimization,
            QueryError::Execution { .. } => ErrorKind::Execution,
            QueryError::Format { .. } => ErrorKind::Format,
            QueryError::Cancelled => ErrorKind::Cancelled,
            QueryError::Action { source, .. } => source.kind(),
        }
    }

    /// Errors that abort execution in every conversion mode.
    pub fn is_fatal(&self) -> bool {
        match self {
            QueryError::Timeout { .. }
            | QueryError::Cancelled
            | QueryError::Security { .. }
            | QueryError::ParseDepthExceeded { .. }
            | QueryError::ExecutionDepthExceeded { .. }
            | QueryError::Limit { .. } => true,
            QueryError::Action { kind, source, .. } => kind.is_write() || source.is_fatal(),
            _ => false,
        }
    }

    /// Attach the failing node, unless the error already names one.
    pub fn at_action(self, action_id: ActionId, kind: ActionKind) -> Self {
        match self {
            QueryError::Action { .. } => self,
            other => QueryError::Action {
                action_id,
                kind,
                source: Box::new(other),
            },
        }
    }

    /// Innermost error, skipping [`QueryError::Action`] wrappers
    pub fn root_cause(&self) -> &QueryError {
        match self {
            QueryError::Action { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Line/column for parse errors
    pub fn position(&self) -> Option<(usize, usize)> {
        match self {
            QueryError::Parse { line, column, .. } => Some((*line, *column)),
            _ => None,
        }
    }

    /// Id and kind of the failing action for runtime errors
    pub fn action(&self) -> Option<(ActionId, ActionKind)> {
        match self {
            QueryError::Action {
                action_id, kind, ..
            } => Some((*action_id, *kind)),
            _ => None,
        }
    }
}

/// Compute 1-based line and column of a byte offset.
pub fn line_column(input: &str, offset: usize) -> (usize, usize) {
    let mut offset = offset.min(input.len());
    while !input.is_char_boundary(offset) {
        offset -= 1;
    }
    let before = &input[..offset];
    let line = before.matches('\n').count() + 1;
    let column = before
        .rfind('\n')
        .map_or(before.chars().count(), |nl| before[nl + 1..].chars().count())
        + 1;
    (line, column)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(QueryError::Cancelled, ErrorKind::Cancelled; "cancelled")]
    #[test_case(QueryError::GrammarNotFound { format: "promql".into() }, ErrorKind::UnsupportedFormat; "grammar")]
    #[test_case(QueryError::ParseDepthExceeded { depth: 2, limit: 1 }, ErrorKind::Parse; "parse depth")]
    #[test_case(QueryError::ExecutionDepthExceeded { depth: 2, limit: 1 }, ErrorKind::Limit; "exec depth")]
    fn test_error_kind(err: QueryError, kind: ErrorKind) {
        assert_eq!(err.kind(), kind);
    }

    #[test]
    fn test_action_wrapper_delegates_kind() {
        let err = QueryError::type_error("bad").at_action(7, ActionKind::Sum);
        assert_eq!(err.kind(), ErrorKind::Type);
        assert_eq!(err.action(), Some((7, ActionKind::Sum)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_action_wrapper_is_not_nested() {
        let err = QueryError::Cancelled
            .at_action(1, ActionKind::Where)
            .at_action(2, ActionKind::Select);
        assert_eq!(err.action(), Some((1, ActionKind::Where)));
    }

    #[test]
    fn test_write_errors_are_fatal() {
        let err = QueryError::validation("missing").at_action(3, ActionKind::Insert);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_line_column() {
        let input = "SELECT *\nFROM users\nWHERE";
        assert_eq!(line_column(input, 0), (1, 1));
        assert_eq!(line_column(input, 9), (2, 1));
        assert_eq!(line_column(input, 14), (2, 6));
    }

    #[test]
    fn test_error_kind_tags() {
        assert_eq!(ErrorKind::UnsupportedOperation.as_str(), "UNSUPPORTED_OPERATION");
        let json = serde_json::to_string(&ErrorKind::Cancelled).unwrap();
        assert_eq!(json, "\"CANCELLED\"");
    }
}
