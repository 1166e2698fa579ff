//! A dataset with its full runtime: pipeline, checkers and policy chain.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tollgate_core::{
    DatasetDefinition, RegistryEntry, SchemaError, StreamLoaderBinding, TenantContext,
};
use tollgate_policy::{PolicyChain, PolicyStoreConfig};
use tollgate_query::{
    check_all, format_query, validate_setting_key, ConditionChecker, FormattedQuery, Query,
    QueryError, QueryParser, QueryPipeline, QuerySettings,
};
use tracing::debug;

use crate::error::{ExecutionError, Result};
use crate::metrics;

/// A query as submitted by a caller
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryRequest {
    pub sql: String,
    #[serde(default)]
    pub tenant: TenantContext,
    /// Caller settings; static dataset settings override them
    #[serde(default)]
    pub settings: QuerySettings,
    /// Expected bytes scanned, for byte-budget policies
    #[serde(default)]
    pub estimated_bytes: Option<u64>,
    #[serde(default)]
    pub query_id: Option<String>,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>, tenant: TenantContext) -> Self {
        Self {
            sql: sql.into(),
            tenant,
            ..Default::default()
        }
    }
}

/// The rewritten query, before admission control
#[derive(Debug, Clone, Serialize)]
pub struct QueryPlan {
    pub dataset: String,
    pub sql: String,
    pub table: String,
    pub settings: QuerySettings,
    pub processors: Vec<&'static str>,
    pub checkers: Vec<&'static str>,
}

/// Read-only view of a dataset for listings
#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub name: String,
    pub kind: String,
    pub readiness_state: Option<String>,
    pub columns: Vec<tollgate_core::Column>,
    pub local_table_name: String,
    pub dist_table_name: String,
    pub partition_format: Vec<String>,
    pub query_processors: Vec<&'static str>,
    pub mandatory_condition_checkers: Vec<&'static str>,
    pub allocation_policies: Vec<&'static str>,
    pub stream_loader: Option<StreamLoaderBinding>,
}

pub struct ActivatedDataset {
    definition: Arc<DatasetDefinition>,
    pipeline: QueryPipeline,
    checkers: Vec<ConditionChecker>,
    policies: PolicyChain,
}

impl RegistryEntry for ActivatedDataset {
    fn key(&self) -> &str {
        &self.definition.key
    }
}

impl std::fmt::Debug for ActivatedDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivatedDataset")
            .field("key", &self.definition.key)
            .field("processors", &self.pipeline.stage_names())
            .field("policies", &self.policies.len())
            .finish()
    }
}

impl ActivatedDataset {
    /// Build every stage of the dataset. Nothing is shared with `previous`
    /// except policy instances whose declaration did not change.
    pub fn activate(
        definition: DatasetDefinition,
        store: &PolicyStoreConfig,
        previous: Option<&ActivatedDataset>,
    ) -> Result<Self> {
        let pipeline = QueryPipeline::build(&definition.query_processors, &definition)
            .map_err(|e| config_error(&definition.key, e))?;
        let checkers = definition
            .mandatory_condition_checkers
            .iter()
            .map(|spec| ConditionChecker::from_spec(spec, &definition))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| config_error(&definition.key, e))?;
        let policies = PolicyChain::build(
            &definition.allocation_policies,
            store,
            previous.map(|p| &p.policies),
        )
        .map_err(|e| {
            ExecutionError::Schema(SchemaError::ConfigValidation(format!(
                "dataset '{}': {}",
                definition.key, e
            )))
        })?;

        debug!(
            dataset = %definition.key,
            processors = pipeline.len(),
            checkers = checkers.len(),
            policies = policies.len(),
            "Activated dataset"
        );

        Ok(Self {
            definition: Arc::new(definition),
            pipeline,
            checkers,
            policies,
        })
    }

    pub fn definition(&self) -> &DatasetDefinition {
        &self.definition
    }

    pub fn pipeline(&self) -> &QueryPipeline {
        &self.pipeline
    }

    pub fn checkers(&self) -> &[ConditionChecker] {
        &self.checkers
    }

    pub fn policies(&self) -> &PolicyChain {
        &self.policies
    }

    /// Parse, rewrite and gate a request; returns the query ready for admission
    pub fn prepare(&self, parser: &QueryParser, request: &QueryRequest) -> Result<Query> {
        request.tenant.validate()?;

        let mut query = parser.parse(&request.sql)?;
        if query.from != self.definition.key {
            return Err(ExecutionError::DatasetMismatch {
                expected: self.definition.key.clone(),
                found: query.from,
            });
        }
        for (key, value) in &request.settings {
            validate_setting_key(key)?;
            query.set_setting(key.clone(), value.clone());
        }

        let query = self.pipeline.apply(query)?;
        if let Err(err) = check_all(&self.checkers, &query) {
            if let QueryError::MissingCondition { field, .. } = &err {
                metrics::record_missing_condition(&self.definition.key, field);
            }
            return Err(err.into());
        }
        Ok(query)
    }

    pub fn format(&self, query: &Query) -> FormattedQuery {
        format_query(query, &self.definition.dist_table_name)
    }

    /// Everything short of admission and execution
    pub fn plan(&self, parser: &QueryParser, request: &QueryRequest) -> Result<QueryPlan> {
        let query = self.prepare(parser, request)?;
        let formatted = self.format(&query);
        Ok(QueryPlan {
            dataset: self.definition.key.clone(),
            sql: formatted.sql,
            table: formatted.table,
            settings: query.settings,
            processors: self.pipeline.stage_names(),
            checkers: self.checkers.iter().map(ConditionChecker::name).collect(),
        })
    }

    pub fn summary(&self) -> DatasetSummary {
        let definition = &self.definition;
        DatasetSummary {
            name: definition.key.clone(),
            kind: definition.kind.to_string(),
            readiness_state: definition.readiness_state.clone(),
            columns: definition.columns.clone(),
            local_table_name: definition.local_table_name.clone(),
            dist_table_name: definition.dist_table_name.clone(),
            partition_format: definition.partition_format.clone(),
            query_processors: self.pipeline.stage_names(),
            mandatory_condition_checkers: self.checkers.iter().map(ConditionChecker::name).collect(),
            allocation_policies: self.policies.policies().iter().map(|p| p.name()).collect(),
            stream_loader: definition.stream_loader.clone(),
        }
    }
}

fn config_error(dataset: &str, err: QueryError) -> ExecutionError {
    ExecutionError::Schema(SchemaError::ConfigValidation(format!(
        "dataset '{}': {}",
        dataset, err
    )))
}
