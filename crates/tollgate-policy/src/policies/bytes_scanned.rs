//! Bytes-scanned budget per tenant key.
//!
//! `max_bytes_per_query` caps a single query's estimated cost and is a hard
//! reject. Over a sliding window the tenant's scanned bytes first lower its
//! threads (`bytes_throttle_threshold`) and then throttle it until the window
//! frees enough capacity (`bytes_rejection_threshold`). The estimate is
//! reserved at admission and replaced by the actual bytes when the query is
//! settled. A limit of 0 disables that check.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use super::referrer::THROTTLED_THREAD_NUMBER;
use crate::config::{ConfigDefinition, PolicyConfig};
use crate::policy::{AllocationPolicy, AllocationRequest, Decision, QueryOutcome, QuotaAllowance};
use crate::store::{BucketState, PolicyStoreConfig, TenantBuckets, TenantKey};
use crate::window::{SlidingWindow, DEFAULT_SLOTS};

pub const MAX_BYTES_PER_QUERY: &str = "max_bytes_per_query";
pub const BYTES_THROTTLE_THRESHOLD: &str = "bytes_throttle_threshold";
pub const BYTES_REJECTION_THRESHOLD: &str = "bytes_rejection_threshold";
pub const BYTES_WINDOW_S: &str = "bytes_window_s";

struct Reservation {
    slot: u64,
    bytes: u64,
}

struct TenantState {
    scanned: SlidingWindow,
    reservations: HashMap<Uuid, Reservation>,
}

impl BucketState for TenantState {
    fn is_idle(&self) -> bool {
        self.reservations.is_empty()
    }
}

pub struct BytesScannedRejectingPolicy {
    buckets: TenantBuckets<TenantState>,
}

impl BytesScannedRejectingPolicy {
    pub const NAME: &'static str = "BytesScannedRejectingPolicy";

    pub fn new(store: PolicyStoreConfig) -> Self {
        Self {
            buckets: TenantBuckets::new(store),
        }
    }
}

impl AllocationPolicy for BytesScannedRejectingPolicy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn additional_config_definitions(&self) -> Vec<ConfigDefinition> {
        vec![
            ConfigDefinition::new(
                MAX_BYTES_PER_QUERY,
                "Estimated bytes above which a single query is rejected; 0 disables",
                0,
            ),
            ConfigDefinition::new(
                BYTES_THROTTLE_THRESHOLD,
                "Bytes scanned in the window above which threads are lowered",
                1_000_000_000_000,
            ),
            ConfigDefinition::new(
                BYTES_REJECTION_THRESHOLD,
                "Bytes scanned in the window at which new queries are throttled",
                10_000_000_000_000,
            ),
            ConfigDefinition::new(BYTES_WINDOW_S, "Length of the bytes window in seconds", 600),
            ConfigDefinition::new(
                THROTTLED_THREAD_NUMBER,
                "Threads given to a query over the throttle threshold",
                1,
            ),
        ]
    }

    fn get_quota_allowance(
        &self,
        key: &TenantKey,
        request: &AllocationRequest,
        config: &PolicyConfig,
        force_record: bool,
    ) -> QuotaAllowance {
        let now = Instant::now();
        let max_per_query = config.limit(MAX_BYTES_PER_QUERY);
        let throttle_threshold = config.limit(BYTES_THROTTLE_THRESHOLD);
        let rejection_threshold = config.limit(BYTES_REJECTION_THRESHOLD);
        let window = Duration::from_secs(config.limit(BYTES_WINDOW_S).max(1));
        let throttled_threads = config.limit(THROTTLED_THREAD_NUMBER).max(1) as u32;
        let estimate = request.estimated_bytes;

        self.buckets.with_bucket(
            key,
            now,
            || TenantState {
                scanned: SlidingWindow::new(window, DEFAULT_SLOTS, now),
                reservations: HashMap::new(),
            },
            |state| {
                let used = state.scanned.sum(now);

                let mut allowance = QuotaAllowance::allow(request)
                    .with_explanation("estimated_bytes", estimate)
                    .with_explanation("window_s", window.as_secs());
                allowance.quota_unit = "bytes";
                allowance.quota_used = used;
                allowance.throttle_threshold = throttle_threshold;
                allowance.rejection_threshold = rejection_threshold;

                if max_per_query > 0 && estimate > max_per_query {
                    allowance.decision = Decision::Reject(format!(
                        "query would scan an estimated {} bytes, over the per-query limit of {}",
                        estimate, max_per_query
                    ));
                    allowance.suggestion =
                        "narrow the time range or add filters to scan less data".to_string();
                } else if rejection_threshold > 0 && used.saturating_add(estimate) > rejection_threshold {
                    let retry_after = state.scanned.retry_after(now, rejection_threshold, estimate);
                    allowance.decision = Decision::Throttle(retry_after);
                    allowance.suggestion = format!(
                        "{} bytes scanned in the last {}s (limit {}); retry later",
                        used,
                        window.as_secs(),
                        rejection_threshold
                    );
                } else if throttle_threshold > 0 && used > throttle_threshold {
                    allowance.is_throttled = true;
                    allowance.max_threads = request.max_threads.min(throttled_threads);
                    allowance.suggestion = format!(
                        "{} bytes scanned in the last {}s; threads lowered to {}",
                        used,
                        window.as_secs(),
                        allowance.max_threads
                    );
                }

                if allowance.decision.is_allow() || force_record {
                    let slot = state.scanned.add(now, estimate);
                    state.reservations.insert(
                        request.admission_id,
                        Reservation {
                            slot,
                            bytes: estimate,
                        },
                    );
                }
                debug!(
                    policy = Self::NAME,
                    key = %key,
                    used = used,
                    estimate = estimate,
                    decision = allowance.decision.kind(),
                    "Evaluated bytes budget"
                );
                allowance
            },
        )
    }

    fn update_quota_balance(
        &self,
        key: &TenantKey,
        request: &AllocationRequest,
        outcome: &QueryOutcome,
        recorded: bool,
    ) {
        if !recorded {
            return;
        }
        let now = Instant::now();
        self.buckets.update_existing(key, now, |state| {
            if let Some(reservation) = state.reservations.remove(&request.admission_id) {
                let actual = outcome.bytes_scanned();
                let delta = actual as i128 - reservation.bytes as i128;
                let delta = delta.clamp(i64::MIN as i128, i64::MAX as i128) as i64;
                state.scanned.adjust(now, reservation.slot, delta);
            }
        });
    }

    fn reset_state(&self) {
        self.buckets.clear();
    }

    fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::common_config_definitions;
    use tollgate_core::{TenantContext, TenantDimension};

    fn policy() -> BytesScannedRejectingPolicy {
        BytesScannedRejectingPolicy::new(PolicyStoreConfig {
            max_keys: 100,
            key_ttl_secs: 60,
        })
    }

    fn config(overrides: &[(&str, i64)]) -> PolicyConfig {
        let mut definitions = common_config_definitions();
        definitions.extend(policy().additional_config_definitions());
        let mut config = PolicyConfig::from_definitions(&definitions);
        for (key, value) in overrides {
            config.set(*key, *value);
        }
        config
    }

    fn key() -> TenantKey {
        TenantKey::build(
            &[TenantDimension::OrganizationId],
            &TenantContext::new().with_organization(7),
        )
        .unwrap()
    }

    fn request(id: &str, bytes: u64) -> AllocationRequest {
        AllocationRequest::new(id).with_estimated_bytes(bytes)
    }

    #[test]
    fn test_per_query_ceiling_rejects() {
        let policy = policy();
        let config = config(&[(MAX_BYTES_PER_QUERY, 1_000)]);
        let allowance = policy.get_quota_allowance(&key(), &request("q1", 5_000), &config, false);
        assert!(matches!(allowance.decision, Decision::Reject(_)));
        assert!(policy
            .get_quota_allowance(&key(), &request("q2", 500), &config, false)
            .decision
            .is_allow());
    }

    #[test]
    fn test_window_throttles_and_lowers_threads() {
        let policy = policy();
        let config = config(&[(BYTES_THROTTLE_THRESHOLD, 100), (BYTES_REJECTION_THRESHOLD, 1_000)]);
        let key = key();

        let q1 = request("q1", 0);
        policy.get_quota_allowance(&key, &q1, &config, false);
        policy.update_quota_balance(&key, &q1, &QueryOutcome::Success { bytes_scanned: 600 }, true);

        // 600 used: over throttle, under rejection
        let q2 = request("q2", 100);
        let second = policy.get_quota_allowance(&key, &q2, &config, false);
        assert!(second.decision.is_allow());
        assert!(second.is_throttled);
        assert_eq!(second.max_threads, 1);
        assert_eq!(second.quota_used, 600);

        // 700 reserved; 700 + 400 > 1000
        let third = policy.get_quota_allowance(&key, &request("q3", 400), &config, false);
        match third.decision {
            Decision::Throttle(retry_after) => assert!(retry_after > Duration::ZERO),
            other => panic!("expected throttle, got {:?}", other),
        }
    }

    #[test]
    fn test_reservation_corrected_by_actual_bytes() {
        let policy = policy();
        let config = config(&[(BYTES_REJECTION_THRESHOLD, 1_000)]);
        let key = key();

        let big = request("big", 900);
        assert!(policy.get_quota_allowance(&key, &big, &config, false).decision.is_allow());
        assert!(!policy
            .get_quota_allowance(&key, &request("next", 200), &config, false)
            .decision
            .is_allow());

        // It actually read much less
        policy.update_quota_balance(&key, &big, &QueryOutcome::Success { bytes_scanned: 50 }, true);
        let next = policy.get_quota_allowance(&key, &request("next", 200), &config, false);
        assert!(next.decision.is_allow());
        assert_eq!(next.quota_used, 50);
    }

    #[test]
    fn test_abandoned_query_releases_reservation() {
        let policy = policy();
        let config = config(&[(BYTES_REJECTION_THRESHOLD, 1_000)]);
        let key = key();

        let q1 = request("q1", 800);
        policy.get_quota_allowance(&key, &q1, &config, false);
        policy.update_quota_balance(&key, &q1, &QueryOutcome::Abandoned, true);
        let after = policy.get_quota_allowance(&key, &request("q2", 800), &config, false);
        assert_eq!(after.quota_used, 0);
        assert!(after.decision.is_allow());
    }
}
