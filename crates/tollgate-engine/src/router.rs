//! Dataset router: owns the activated datasets and runs requests end to end.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tollgate_core::document::{document_paths, DatasetDocument};
use tollgate_core::{RegistryEntry, SchemaError, SchemaRegistry};
use tollgate_policy::{
    AllocationRequest, ChainOutcome, Decision, PolicyDescription, PolicyEvaluation,
    PolicyStoreConfig, QueryOutcome, DEFAULT_MAX_THREADS,
};
use tollgate_query::{QueryParser, SettingValue};
use tracing::{debug, info, warn};

use crate::backend::{ColumnMeta, QueryBackend};
use crate::dataset::{ActivatedDataset, DatasetSummary, QueryPlan, QueryRequest};
use crate::error::{ExecutionError, Result};
use crate::metrics;
use crate::querylog::{QueryLog, QueryLogEntry};

const MAX_THREADS_SETTING: &str = "max_threads";

/// Rows plus the admission record of a successful request
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub query_id: String,
    pub dataset: String,
    pub sql: String,
    pub meta: Vec<ColumnMeta>,
    pub data: Vec<serde_json::Value>,
    pub rows: u64,
    pub bytes_scanned: u64,
    pub max_threads: u32,
    pub policies: Vec<PolicyEvaluation>,
}

pub struct DatasetRouter {
    registry: SchemaRegistry<ActivatedDataset>,
    backend: Arc<dyn QueryBackend>,
    store: PolicyStoreConfig,
    parser: QueryParser,
    query_log: QueryLog,
    config_dir: Option<PathBuf>,
}

impl DatasetRouter {
    pub fn new(backend: Arc<dyn QueryBackend>, store: PolicyStoreConfig) -> Self {
        Self {
            registry: SchemaRegistry::new(),
            backend,
            store,
            parser: QueryParser::new(),
            query_log: QueryLog::default(),
            config_dir: None,
        }
    }

    pub fn with_query_log(mut self, query_log: QueryLog) -> Self {
        self.query_log = query_log;
        self
    }

    /// Activate every document in `dir` and remember it for `reload_from_disk`
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        let paths = document_paths(dir)?;
        for path in &paths {
            let document = DatasetDocument::from_yaml_file(path)?;
            self.activate(document)?;
        }
        self.config_dir = Some(dir.to_path_buf());
        info!(dir = %dir.display(), datasets = paths.len(), "Loaded dataset documents");
        Ok(paths.len())
    }

    /// Validate and publish a new dataset
    pub fn activate(&self, document: DatasetDocument) -> Result<Arc<ActivatedDataset>> {
        let definition = document.into_definition()?;
        let dataset = ActivatedDataset::activate(definition, &self.store, None)?;
        Ok(self.registry.register(dataset)?)
    }

    /// Replace a published dataset. The new runtime is built completely
    /// before it is swapped in; unchanged policies keep their counters.
    pub fn reload(&self, document: DatasetDocument) -> Result<Arc<ActivatedDataset>> {
        let definition = document.into_definition()?;
        let previous = self.registry.resolve(&definition.key)?;
        let dataset = ActivatedDataset::activate(definition, &self.store, Some(&previous))?;
        self.registry.reload(dataset)?;
        Ok(self.registry.resolve(previous.key())?)
    }

    /// Re-read the document that defines `name` from the loaded directory
    pub fn reload_from_disk(&self, name: &str) -> Result<Arc<ActivatedDataset>> {
        let dir = self.config_dir.as_ref().ok_or_else(|| {
            SchemaError::ConfigValidation("No configuration directory loaded".to_string())
        })?;
        for path in document_paths(dir)? {
            let document = DatasetDocument::from_yaml_file(&path)?;
            if document.name == name {
                return self.reload(document);
            }
        }
        Err(SchemaError::DatasetNotFound(name.to_string()).into())
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<ActivatedDataset>> {
        Ok(self.registry.resolve(name)?)
    }

    pub fn list(&self) -> Vec<DatasetSummary> {
        self.registry
            .list()
            .iter()
            .filter_map(|name| self.registry.resolve(name).ok())
            .map(|dataset| dataset.summary())
            .collect()
    }

    pub fn query_log(&self) -> &QueryLog {
        &self.query_log
    }

    pub fn plan(&self, dataset: &str, request: &QueryRequest) -> Result<QueryPlan> {
        self.resolve(dataset)?.plan(&self.parser, request)
    }

    /// Run a request against `dataset`; the first failing stage ends it
    pub async fn execute(&self, dataset: &str, request: QueryRequest) -> Result<QueryResponse> {
        let started = Instant::now();
        let query_id = request
            .query_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut entry = QueryLogEntry::new(&query_id, dataset, &request.tenant);

        let result = self.run(dataset, &query_id, &request, &mut entry).await;

        let elapsed = started.elapsed();
        entry.duration_ms = elapsed.as_millis() as u64;
        let status = match &result {
            Ok(_) => "success",
            Err(err) => {
                entry.error = Some(err.to_string());
                err.kind()
            }
        };
        entry.status = status.to_string();
        metrics::record_query(dataset, status, elapsed.as_secs_f64());
        self.query_log.record(entry);
        result
    }

    async fn run(
        &self,
        dataset: &str,
        query_id: &str,
        request: &QueryRequest,
        entry: &mut QueryLogEntry,
    ) -> Result<QueryResponse> {
        let activated = self.resolve(dataset)?;
        let mut query = activated.prepare(&self.parser, request)?;

        let requested_threads = query
            .settings
            .get(MAX_THREADS_SETTING)
            .and_then(SettingValue::as_int)
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_MAX_THREADS);
        let allocation = AllocationRequest::new(query_id)
            .with_estimated_bytes(request.estimated_bytes.unwrap_or(0))
            .with_max_threads(requested_threads);

        let guard = activated.policies().evaluate(&request.tenant, allocation);
        for evaluation in &guard.outcome().evaluations {
            metrics::record_policy_decision(
                evaluation.policy,
                evaluation.allowance.decision.kind(),
                evaluation.mode.as_str(),
            );
        }

        if !guard.is_allowed() {
            let outcome = guard.settle(QueryOutcome::Rejected);
            entry.record_outcome(&outcome);
            return Err(denial(&outcome));
        }

        // Policies can only lower the thread count
        let max_threads = guard
            .outcome()
            .max_threads
            .map_or(requested_threads, |t| t.min(requested_threads));
        query.set_setting(MAX_THREADS_SETTING, SettingValue::Int(i64::from(max_threads)));

        let formatted = activated.format(&query);
        entry.sql = Some(formatted.sql.clone());
        debug!(query_id, sql = %formatted.sql, max_threads, "Dispatching query");

        let result = self.backend.execute(&formatted, &query.settings).await;
        let outcome = match &result {
            Ok(r) => guard.settle(QueryOutcome::Success {
                bytes_scanned: r.bytes_scanned,
            }),
            Err(err) => {
                warn!(query_id, error = %err, "Backend query failed");
                guard.settle(QueryOutcome::Error)
            }
        };
        entry.record_outcome(&outcome);

        let mut result = result?;
        result.rename_columns(&query.output_renames());
        entry.bytes_scanned = result.bytes_scanned;
        Ok(QueryResponse {
            query_id: query_id.to_string(),
            dataset: activated.definition().key.clone(),
            sql: formatted.sql,
            meta: result.meta,
            data: result.data,
            rows: result.rows,
            bytes_scanned: result.bytes_scanned,
            max_threads,
            policies: outcome.evaluations,
        })
    }

    pub fn policies(&self, dataset: &str) -> Result<Vec<PolicyDescription>> {
        let activated = self.resolve(dataset)?;
        Ok(activated
            .policies()
            .policies()
            .iter()
            .map(|p| p.describe())
            .collect())
    }

    pub fn set_policy_config(
        &self,
        dataset: &str,
        policy: &str,
        key: &str,
        value: i64,
    ) -> Result<PolicyDescription> {
        let activated = self.resolve(dataset)?;
        let policy = activated.policies().get(policy)?;
        policy.set_config(key, value)?;
        Ok(policy.describe())
    }

    pub fn reset_policy_config(&self, dataset: &str, policy: &str) -> Result<PolicyDescription> {
        let activated = self.resolve(dataset)?;
        let policy = activated.policies().get(policy)?;
        policy.reset_config();
        info!(dataset, policy = policy.name(), "Reset policy config");
        Ok(policy.describe())
    }

    pub fn reset_policy_state(&self, dataset: &str, policy: &str) -> Result<PolicyDescription> {
        let activated = self.resolve(dataset)?;
        let policy = activated.policies().get(policy)?;
        policy.reset_state();
        info!(dataset, policy = policy.name(), "Reset policy state");
        Ok(policy.describe())
    }
}

/// Convert a refused chain outcome into the error naming the deciding policy
fn denial(outcome: &ChainOutcome) -> ExecutionError {
    let policy = outcome
        .evaluations
        .iter()
        .rev()
        .find(|e| !e.effective.is_allow())
        .map(|e| e.policy.to_string())
        .unwrap_or_default();
    match &outcome.decision {
        Decision::Throttle(retry_after) => ExecutionError::Throttled {
            policy,
            retry_after: *retry_after,
        },
        Decision::Reject(reason) => ExecutionError::Rejected {
            policy,
            reason: reason.clone(),
        },
        Decision::Allow => ExecutionError::Rejected {
            policy,
            reason: "denied".to_string(),
        },
    }
}
