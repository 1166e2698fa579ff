//! The allocation policy contract.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

use crate::config::{ConfigDefinition, PolicyConfig};
use crate::store::TenantKey;

/// Threads a query gets when nothing lowers them
pub const DEFAULT_MAX_THREADS: u32 = 10;

/// Admission verdict of one policy or of the whole chain
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allow,
    /// Retry once the tenant's usage has dropped
    Throttle(Duration),
    /// Will not run in this form, however long the caller waits
    Reject(String),
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Throttle(_) => "throttle",
            Decision::Reject(_) => "reject",
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Decision::Throttle(retry_after) => Some(*retry_after),
            _ => None,
        }
    }
}

impl Serialize for Decision {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", self.kind())?;
        match self {
            Decision::Allow => {}
            Decision::Throttle(retry_after) => {
                map.serialize_entry("retry_after_secs", &retry_after.as_secs_f64())?
            }
            Decision::Reject(reason) => map.serialize_entry("reason", reason)?,
        }
        map.end()
    }
}

/// What one policy decided and why
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaAllowance {
    pub decision: Decision,
    pub max_threads: u32,
    pub explanation: BTreeMap<String, serde_json::Value>,
    /// Allowed but with fewer threads
    pub is_throttled: bool,
    pub throttle_threshold: u64,
    pub rejection_threshold: u64,
    pub quota_used: u64,
    pub quota_unit: &'static str,
    pub suggestion: String,
}

impl QuotaAllowance {
    /// Unconditional allowance at the requested thread count
    pub fn allow(request: &AllocationRequest) -> Self {
        Self {
            decision: Decision::Allow,
            max_threads: request.max_threads,
            explanation: BTreeMap::new(),
            is_throttled: false,
            throttle_threshold: 0,
            rejection_threshold: 0,
            quota_used: 0,
            quota_unit: "no_units",
            suggestion: String::new(),
        }
    }

    pub fn with_explanation(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.explanation.insert(key.to_string(), value.into());
        self
    }
}

/// The query being admitted, as policies see it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    /// Identity of this admission; policy state is tracked by it, never by
    /// the caller-supplied query id
    pub admission_id: Uuid,
    pub query_id: String,
    /// Bytes the query is expected to read; 0 if unknown
    pub estimated_bytes: u64,
    /// Threads the query would run with if no policy lowers them
    pub max_threads: u32,
}

impl AllocationRequest {
    pub fn new(query_id: impl Into<String>) -> Self {
        Self {
            admission_id: Uuid::new_v4(),
            query_id: query_id.into(),
            estimated_bytes: 0,
            max_threads: DEFAULT_MAX_THREADS,
        }
    }

    pub fn with_estimated_bytes(mut self, bytes: u64) -> Self {
        self.estimated_bytes = bytes;
        self
    }

    pub fn with_max_threads(mut self, max_threads: u32) -> Self {
        self.max_threads = max_threads;
        self
    }
}

/// How an admitted (or refused) query ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    Success { bytes_scanned: u64 },
    Error,
    /// Refused by the chain; never ran
    Rejected,
    /// Dropped before it was settled (cancelled request)
    Abandoned,
}

impl QueryOutcome {
    pub fn bytes_scanned(&self) -> u64 {
        match self {
            QueryOutcome::Success { bytes_scanned } => *bytes_scanned,
            _ => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryOutcome::Success { .. } => "success",
            QueryOutcome::Error => "error",
            QueryOutcome::Rejected => "rejected",
            QueryOutcome::Abandoned => "abandoned",
        }
    }
}

/// A stateful admission policy.
///
/// `get_quota_allowance` decides and, when the query is allowed (or when
/// `force_record` is set for dry runs), records it against `key` in the same
/// critical section. `update_quota_balance` is called exactly once per
/// evaluation after the query ends; `recorded` tells the policy whether
/// the allowance call recorded anything to release.
pub trait AllocationPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Config keys beyond the common switches
    fn additional_config_definitions(&self) -> Vec<ConfigDefinition>;

    fn get_quota_allowance(
        &self,
        key: &TenantKey,
        request: &AllocationRequest,
        config: &PolicyConfig,
        force_record: bool,
    ) -> QuotaAllowance;

    fn update_quota_balance(
        &self,
        key: &TenantKey,
        request: &AllocationRequest,
        outcome: &QueryOutcome,
        recorded: bool,
    );

    /// Forget all per-tenant state
    fn reset_state(&self);

    /// Number of tenant keys currently tracked
    fn tracked_keys(&self) -> usize;
}
