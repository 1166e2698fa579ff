//! Query log: one record per executed request.
//!
//! Records are emitted on the `tollgate::querylog` tracing target and the
//! most recent ones are kept in memory for inspection.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use tollgate_core::TenantContext;
use tollgate_policy::{ChainOutcome, PolicyMode};
use tracing::info;

const DEFAULT_CAPACITY: usize = 1_000;

/// Decision of one policy as logged
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyLogEntry {
    pub policy: String,
    pub mode: PolicyMode,
    pub decision: &'static str,
    pub effective: &'static str,
    pub max_threads: u32,
    pub quota_used: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryLogEntry {
    pub query_id: String,
    pub dataset: String,
    pub timestamp: DateTime<Utc>,
    pub tenant: TenantContext,
    /// `success` or an error kind
    pub status: String,
    pub sql: Option<String>,
    pub policies: Vec<PolicyLogEntry>,
    pub max_threads: Option<u32>,
    pub bytes_scanned: u64,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl QueryLogEntry {
    pub fn new(query_id: impl Into<String>, dataset: impl Into<String>, tenant: &TenantContext) -> Self {
        Self {
            query_id: query_id.into(),
            dataset: dataset.into(),
            timestamp: Utc::now(),
            tenant: tenant.clone(),
            status: "success".to_string(),
            sql: None,
            policies: Vec::new(),
            max_threads: None,
            bytes_scanned: 0,
            duration_ms: 0,
            error: None,
        }
    }

    /// Copy the per-policy decisions of a settled admission
    pub fn record_outcome(&mut self, outcome: &ChainOutcome) {
        self.max_threads = outcome.max_threads;
        self.policies = outcome
            .evaluations
            .iter()
            .map(|e| PolicyLogEntry {
                policy: e.policy.to_string(),
                mode: e.mode,
                decision: e.allowance.decision.kind(),
                effective: e.effective.kind(),
                max_threads: e.allowance.max_threads,
                quota_used: e.allowance.quota_used,
            })
            .collect();
    }
}

/// Bounded in-memory query log
pub struct QueryLog {
    capacity: usize,
    entries: Mutex<VecDeque<QueryLogEntry>>,
}

impl Default for QueryLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl QueryLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, entry: QueryLogEntry) {
        info!(
            target: "tollgate::querylog",
            query_id = %entry.query_id,
            dataset = %entry.dataset,
            status = %entry.status,
            bytes_scanned = entry.bytes_scanned,
            duration_ms = entry.duration_ms,
            max_threads = ?entry.max_threads,
            organization_id = ?entry.tenant.organization_id,
            referrer = ?entry.tenant.referrer,
            "Query finished"
        );

        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Up to `limit` entries, newest first
    pub fn recent(&self, limit: usize) -> Vec<QueryLogEntry> {
        self.entries.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
