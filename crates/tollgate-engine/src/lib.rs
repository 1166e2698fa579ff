//! Tollgate Engine
//!
//! Routes a request to its dataset and runs it through the full path:
//! processor pipeline, mandatory condition checks, the allocation policy
//! chain and finally the SQL backend. Every request ends in exactly one
//! query log record.
//!
//! ```ignore
//! let backend = Arc::new(ClickhouseHttpBackend::new(ClickhouseConfig::from_env()?)?);
//! let mut router = DatasetRouter::new(backend, PolicyStoreConfig::default());
//! router.load_dir(Path::new("config/datasets"))?;
//! let response = router.execute("eap_items", request).await?;
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod error;
pub mod metrics;
pub mod querylog;
pub mod router;

pub use backend::{ClickhouseHttpBackend, ColumnMeta, QueryBackend, QueryResult};
pub use config::{ClickhouseConfig, ClickhouseConfigBuilder, EngineConfig};
pub use dataset::{ActivatedDataset, DatasetSummary, QueryPlan, QueryRequest};
pub use error::{BackendError, ExecutionError, Result};
pub use querylog::{PolicyLogEntry, QueryLog, QueryLogEntry};
pub use router::{DatasetRouter, QueryResponse};
