//! Tollgate API Library
//!
//! HTTP surface over the dataset router: dataset listing, query execution,
//! policy administration and Prometheus metrics.

pub mod error;
mod handlers;

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tollgate_engine::DatasetRouter;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use error::ApiError;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<DatasetRouter>,
}

impl AppState {
    pub fn new(router: DatasetRouter) -> Self {
        Self {
            router: Arc::new(router),
        }
    }
}

/// Build the application router
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/api/v1/datasets", get(handlers::list_datasets))
        .route("/api/v1/datasets/:name", get(handlers::get_dataset))
        .route("/api/v1/datasets/:name/query", post(handlers::execute_query))
        .route(
            "/api/v1/admin/datasets/:name/policies",
            get(handlers::list_policies),
        )
        .route(
            "/api/v1/admin/datasets/:name/policies/:policy/config",
            put(handlers::set_policy_config).delete(handlers::reset_policy_config),
        )
        .route(
            "/api/v1/admin/datasets/:name/policies/:policy/reset",
            post(handlers::reset_policy_state),
        )
        .route(
            "/api/v1/admin/datasets/:name/reload",
            post(handlers::reload_dataset),
        )
        .route("/api/v1/admin/querylog", get(handlers::recent_queries))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
