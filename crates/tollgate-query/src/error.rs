//! Error types for query parsing, rewriting and gating.

use thiserror::Error;

/// Errors raised while building or applying the query path of a dataset.
#[derive(Debug, Error)]
pub enum QueryError {
    /// SQL parsing failed
    #[error("SQL parsing failed: {0}")]
    ParseError(String),

    /// Unsupported SQL statement type
    #[error("Unsupported SQL statement: {0}")]
    UnsupportedStatement(String),

    /// Unsupported SQL expression
    #[error("Unsupported expression: {0}")]
    UnsupportedExpression(String),

    /// Multiple statements in query (only single statement supported)
    #[error("Multiple statements not supported, found {0} statements")]
    MultipleStatements(usize),

    /// Empty query
    #[error("Empty SQL query")]
    EmptyQuery,

    /// A pipeline stage refused the query; the query is left untouched
    #[error("{processor} rejected the query: {message}")]
    Processor { processor: String, message: String },

    /// A mandatory tenant-scoping predicate is absent
    #[error("Missing mandatory condition on '{field}' (required by {checker})")]
    MissingCondition { checker: String, field: String },

    /// A setting key the backend must not receive from a caller
    #[error("Invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },

    /// A processor or checker declaration is invalid for the dataset
    #[error("Invalid stage configuration: {0}")]
    InvalidConfig(String),
}

impl QueryError {
    pub(crate) fn processor(processor: &str, message: impl Into<String>) -> Self {
        QueryError::Processor {
            processor: processor.to_string(),
            message: message.into(),
        }
    }
}

impl From<sqlparser::parser::ParserError> for QueryError {
    fn from(err: sqlparser::parser::ParserError) -> Self {
        QueryError::ParseError(err.to_string())
    }
}

/// A specialized Result type for query operations.
pub type Result<T> = std::result::Result<T, QueryError>;
