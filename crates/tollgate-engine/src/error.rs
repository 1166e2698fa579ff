//! Error types for the executor.

use std::time::Duration;
use thiserror::Error;
use tollgate_core::SchemaError;
use tollgate_policy::PolicyError;
use tollgate_query::QueryError;

/// Errors talking to the SQL backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// HTTP transport error (connection, DNS, TLS, timeout)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status
    #[error("Backend error ({status}): {message}")]
    Server { status: u16, message: String },

    /// The backend answered with something we cannot read
    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BackendError {
    /// Worth retrying later with the same query
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Http(e) => e.is_timeout() || e.is_connect(),
            BackendError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Any failure along the execution path; the first one stops the request
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// The SQL names a different dataset than the one it was sent to
    #[error("Query reads from '{found}' but was sent to dataset '{expected}'")]
    DatasetMismatch { expected: String, found: String },

    /// Admission control asked the caller to come back later
    #[error("Throttled by {policy}, retry after {retry_after:?}")]
    Throttled { policy: String, retry_after: Duration },

    /// Admission control refused the query outright
    #[error("Rejected by {policy}: {reason}")]
    Rejected { policy: String, reason: String },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl ExecutionError {
    /// Returns true if the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExecutionError::Throttled { .. } => true,
            ExecutionError::Backend(e) => e.is_transient(),
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ExecutionError::Throttled { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Short label used for metrics and the query log
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::Schema(SchemaError::DatasetNotFound(_)) => "dataset_not_found",
            ExecutionError::Schema(_) => "invalid_request",
            ExecutionError::Query(QueryError::MissingCondition { .. }) => "missing_condition",
            ExecutionError::Query(QueryError::Processor { .. }) => "processor_error",
            ExecutionError::Query(QueryError::InvalidConfig(_)) => "invalid_config",
            ExecutionError::Query(QueryError::InvalidSetting { .. }) => "invalid_setting",
            ExecutionError::Query(_) => "parse_error",
            ExecutionError::Policy(_) => "policy_error",
            ExecutionError::DatasetMismatch { .. } => "invalid_request",
            ExecutionError::Throttled { .. } => "throttled",
            ExecutionError::Rejected { .. } => "rejected",
            ExecutionError::Backend(_) => "backend_error",
        }
    }
}

/// Result type for executor operations.
pub type Result<T> = std::result::Result<T, ExecutionError>;
