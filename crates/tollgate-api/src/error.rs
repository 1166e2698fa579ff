//! Mapping of execution errors to HTTP responses.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tollgate_core::SchemaError;
use tollgate_engine::ExecutionError;
use tollgate_policy::PolicyError;
use tollgate_query::QueryError;

/// Error returned by every handler
#[derive(Debug)]
pub struct ApiError(pub ExecutionError);

impl From<ExecutionError> for ApiError {
    fn from(err: ExecutionError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ExecutionError::Schema(SchemaError::DatasetNotFound(_)) => StatusCode::NOT_FOUND,
            ExecutionError::Schema(SchemaError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ExecutionError::Schema(_) => StatusCode::BAD_REQUEST,
            ExecutionError::Query(QueryError::MissingCondition { .. }) => StatusCode::FORBIDDEN,
            ExecutionError::Query(_) => StatusCode::BAD_REQUEST,
            ExecutionError::Policy(PolicyError::PolicyNotFound(_)) => StatusCode::NOT_FOUND,
            ExecutionError::Policy(_) => StatusCode::BAD_REQUEST,
            ExecutionError::DatasetMismatch { .. } => StatusCode::BAD_REQUEST,
            ExecutionError::Throttled { .. } | ExecutionError::Rejected { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ExecutionError::Backend(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = self.0.retry_after().map(|d| d.as_secs_f64().ceil().max(1.0) as u64);

        let mut body = json!({
            "error": self.0.to_string(),
            "kind": self.0.kind(),
            "retryable": self.0.is_retryable(),
        });
        if let Some(secs) = retry_after {
            body["retry_after"] = json!(secs);
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
