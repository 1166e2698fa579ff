//! SQL backend driver interface and the ClickHouse HTTP driver.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tollgate_query::{validate_setting_key, FormattedQuery, QuerySettings};
use tracing::debug;

use crate::config::ClickhouseConfig;
use crate::error::BackendError;

/// Column name and backend type of a result set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

/// Rows and execution statistics returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub meta: Vec<ColumnMeta>,
    pub data: Vec<serde_json::Value>,
    pub rows: u64,
    pub bytes_scanned: u64,
    pub elapsed_secs: f64,
}

impl QueryResult {
    /// Rename result columns, in `meta` and in every row object
    pub fn rename_columns(&mut self, renames: &[(String, String)]) {
        if renames.is_empty() {
            return;
        }
        for column in &mut self.meta {
            if let Some((_, to)) = renames.iter().find(|(from, _)| *from == column.name) {
                column.name = to.clone();
            }
        }
        for row in &mut self.data {
            if let Some(object) = row.as_object_mut() {
                for (from, to) in renames {
                    if let Some(value) = object.remove(from) {
                        object.insert(to.clone(), value);
                    }
                }
            }
        }
    }
}

/// Executes a fully rewritten query. No retries happen at this layer.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn execute(
        &self,
        query: &FormattedQuery,
        settings: &QuerySettings,
    ) -> Result<QueryResult, BackendError>;
}

#[derive(Deserialize)]
struct JsonStatistics {
    #[serde(default)]
    elapsed: f64,
    #[serde(default)]
    bytes_read: u64,
}

/// `FORMAT JSON` response body
#[derive(Deserialize)]
struct JsonResponse {
    #[serde(default)]
    meta: Vec<ColumnMeta>,
    data: Vec<serde_json::Value>,
    #[serde(default)]
    rows: u64,
    statistics: Option<JsonStatistics>,
}

/// Sends queries to the ClickHouse HTTP interface.
///
/// The SQL goes in the POST body with `FORMAT JSON` appended; settings go in
/// the URL as query parameters, which is how the HTTP interface accepts them.
pub struct ClickhouseHttpBackend {
    http: reqwest::Client,
    config: ClickhouseConfig,
}

impl ClickhouseHttpBackend {
    pub fn new(config: ClickhouseConfig) -> Result<Self, BackendError> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("tollgate/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or_else(|_| HeaderValue::from_static("tollgate")),
        );
        headers.insert(
            "X-ClickHouse-User",
            HeaderValue::from_str(&config.user)
                .map_err(|_| BackendError::Config("Invalid user format".to_string()))?,
        );
        if let Some(ref password) = config.password {
            headers.insert(
                "X-ClickHouse-Key",
                HeaderValue::from_str(password)
                    .map_err(|_| BackendError::Config("Invalid password format".to_string()))?,
            );
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClickhouseConfig {
        &self.config
    }
}

#[async_trait]
impl QueryBackend for ClickhouseHttpBackend {
    async fn execute(
        &self,
        query: &FormattedQuery,
        settings: &QuerySettings,
    ) -> Result<QueryResult, BackendError> {
        let mut params: Vec<(String, String)> =
            vec![("database".to_string(), self.config.database.clone())];
        for (key, value) in settings {
            validate_setting_key(key).map_err(|e| BackendError::Config(e.to_string()))?;
            params.push((key.clone(), value.to_string()));
        }

        debug!(table = %query.table, settings = settings.len(), "Sending query to ClickHouse");
        let response = self
            .http
            .post(&self.config.url)
            .query(&params)
            .body(format!("{} FORMAT JSON", query.sql))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Server {
                status: status.as_u16(),
                message: message.trim().to_string(),
            });
        }

        let body: JsonResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        let (elapsed_secs, bytes_scanned) = body
            .statistics
            .map(|s| (s.elapsed, s.bytes_read))
            .unwrap_or((0.0, 0));

        Ok(QueryResult {
            rows: if body.rows > 0 { body.rows } else { body.data.len() as u64 },
            meta: body.meta,
            data: body.data,
            bytes_scanned,
            elapsed_secs,
        })
    }
}
