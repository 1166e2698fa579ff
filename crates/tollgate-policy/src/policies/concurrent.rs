//! Concurrency and rate limiting per tenant key.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use crate::config::{ConfigDefinition, PolicyConfig};
use crate::policy::{AllocationPolicy, AllocationRequest, Decision, QueryOutcome, QuotaAllowance};
use crate::store::{BucketState, PolicyStoreConfig, TenantBuckets, TenantKey};
use crate::window::{SlidingWindow, DEFAULT_SLOTS};

pub const CONCURRENT_LIMIT: &str = "concurrent_limit";
pub const MAX_QUERY_DURATION_S: &str = "max_query_duration_s";
pub const RATE_LIMIT_PER_WINDOW: &str = "rate_limit_per_window";
pub const RATE_WINDOW_S: &str = "rate_window_s";

/// Suggested wait when every concurrency slot is taken
pub(crate) const CONCURRENCY_RETRY_AFTER: Duration = Duration::from_secs(1);

/// In-flight queries of one tenant key, by admission id
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    started: HashMap<Uuid, Instant>,
}

impl InFlight {
    /// Drop entries older than `max_age`; they were never settled
    pub(crate) fn purge(&mut self, now: Instant, max_age: Duration) {
        self.started
            .retain(|_, started| now.saturating_duration_since(*started) < max_age);
    }

    pub(crate) fn len(&self) -> usize {
        self.started.len()
    }

    pub(crate) fn start(&mut self, admission_id: Uuid, now: Instant) {
        self.started.insert(admission_id, now);
    }

    pub(crate) fn finish(&mut self, admission_id: &Uuid) {
        self.started.remove(admission_id);
    }
}

impl BucketState for InFlight {
    fn is_idle(&self) -> bool {
        self.started.is_empty()
    }
}

struct TenantState {
    in_flight: InFlight,
    rate: SlidingWindow,
}

impl BucketState for TenantState {
    fn is_idle(&self) -> bool {
        self.in_flight.is_idle()
    }
}

pub struct ConcurrentRateLimitAllocationPolicy {
    buckets: TenantBuckets<TenantState>,
}

impl ConcurrentRateLimitAllocationPolicy {
    pub const NAME: &'static str = "ConcurrentRateLimitAllocationPolicy";

    pub fn new(store: PolicyStoreConfig) -> Self {
        Self {
            buckets: TenantBuckets::new(store),
        }
    }
}

impl AllocationPolicy for ConcurrentRateLimitAllocationPolicy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn additional_config_definitions(&self) -> Vec<ConfigDefinition> {
        vec![
            ConfigDefinition::new(
                CONCURRENT_LIMIT,
                "Maximum number of in-flight queries per tenant key",
                22,
            ),
            ConfigDefinition::new(
                MAX_QUERY_DURATION_S,
                "In-flight entries older than this are considered finished",
                1800,
            ),
            ConfigDefinition::new(
                RATE_LIMIT_PER_WINDOW,
                "Maximum queries started per rate window; 0 disables the rate limit",
                0,
            ),
            ConfigDefinition::new(RATE_WINDOW_S, "Length of the rate window in seconds", 60),
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
        let concurrent_limit = config.limit(CONCURRENT_LIMIT);
        let max_age = Duration::from_secs(config.limit(MAX_QUERY_DURATION_S));
        let rate_limit = config.limit(RATE_LIMIT_PER_WINDOW);
        let rate_window = Duration::from_secs(config.limit(RATE_WINDOW_S).max(1));

        self.buckets.with_bucket(
            key,
            now,
            || TenantState {
                in_flight: InFlight::default(),
                rate: SlidingWindow::new(rate_window, DEFAULT_SLOTS, now),
            },
            |state| {
                state.in_flight.purge(now, max_age);
                let in_flight = state.in_flight.len() as u64;
                let started = state.rate.sum(now);

                let mut allowance = QuotaAllowance::allow(request)
                    .with_explanation("in_flight", in_flight)
                    .with_explanation("started_in_window", started);
                allowance.quota_unit = "concurrent_queries";
                allowance.quota_used = in_flight;
                allowance.rejection_threshold = concurrent_limit;

                if in_flight >= concurrent_limit {
                    allowance.decision = Decision::Throttle(CONCURRENCY_RETRY_AFTER);
                    allowance.suggestion = format!(
                        "{} queries already running for this tenant (limit {}); wait for one to finish",
                        in_flight, concurrent_limit
                    );
                } else if rate_limit > 0 && started >= rate_limit {
                    let retry_after = state.rate.retry_after(now, rate_limit, 1);
                    allowance.decision = Decision::Throttle(retry_after);
                    allowance.quota_unit = "queries_per_window";
                    allowance.quota_used = started;
                    allowance.rejection_threshold = rate_limit;
                    allowance.suggestion = format!(
                        "{} queries started in the last {}s (limit {}); spread queries out",
                        started,
                        rate_window.as_secs(),
                        rate_limit
                    );
                }

                if allowance.decision.is_allow() || force_record {
                    state.in_flight.start(request.admission_id, now);
                    state.rate.add(now, 1);
                }
                debug!(
                    policy = Self::NAME,
                    key = %key,
                    in_flight = in_flight,
                    decision = allowance.decision.kind(),
                    "Evaluated concurrency"
                );
                allowance
            },
        )
    }

    fn update_quota_balance(
        &self,
        key: &TenantKey,
        request: &AllocationRequest,
        _outcome: &QueryOutcome,
        recorded: bool,
    ) {
        if !recorded {
            return;
        }
        self.buckets.update_existing(key, Instant::now(), |state| {
            state.in_flight.finish(&request.admission_id);
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
    use std::sync::{Arc, Barrier};

    fn policy() -> ConcurrentRateLimitAllocationPolicy {
        ConcurrentRateLimitAllocationPolicy::new(PolicyStoreConfig {
            max_keys: 100,
            key_ttl_secs: 60,
        })
    }

    fn config(policy: &ConcurrentRateLimitAllocationPolicy, overrides: &[(&str, i64)]) -> PolicyConfig {
        let mut definitions = common_config_definitions();
        definitions.extend(policy.additional_config_definitions());
        let mut config = PolicyConfig::from_definitions(&definitions);
        for (key, value) in overrides {
            config.set(*key, *value);
        }
        config
    }

    fn key() -> TenantKey {
        let tenant = tollgate_core::TenantContext::new().with_organization(1);
        TenantKey::build(&[tollgate_core::TenantDimension::OrganizationId], &tenant).unwrap()
    }

    #[test]
    fn test_concurrency_limit_and_release() {
        let policy = policy();
        let config = config(&policy, &[(CONCURRENT_LIMIT, 2)]);
        let key = key();

        let q1 = AllocationRequest::new("q1");
        let q2 = AllocationRequest::new("q2");
        let q3 = AllocationRequest::new("q3");
        assert!(policy.get_quota_allowance(&key, &q1, &config, false).decision.is_allow());
        assert!(policy.get_quota_allowance(&key, &q2, &config, false).decision.is_allow());

        let third = policy.get_quota_allowance(&key, &q3, &config, false);
        assert_eq!(third.decision, Decision::Throttle(CONCURRENCY_RETRY_AFTER));
        assert_eq!(third.quota_used, 2);

        policy.update_quota_balance(&key, &q1, &QueryOutcome::Success { bytes_scanned: 0 }, true);
        assert!(policy.get_quota_allowance(&key, &q3, &config, false).decision.is_allow());
    }

    #[test]
    fn test_shared_query_id_counts_every_admission() {
        let policy = policy();
        let config = config(&policy, &[(CONCURRENT_LIMIT, 2)]);
        let key = key();

        let a = AllocationRequest::new("same");
        let b = AllocationRequest::new("same");
        let c = AllocationRequest::new("same");
        assert!(policy.get_quota_allowance(&key, &a, &config, false).decision.is_allow());
        assert!(policy.get_quota_allowance(&key, &b, &config, false).decision.is_allow());
        assert!(!policy.get_quota_allowance(&key, &c, &config, false).decision.is_allow());

        // Releasing one frees exactly one slot
        policy.update_quota_balance(&key, &a, &QueryOutcome::Error, true);
        assert!(policy.get_quota_allowance(&key, &c, &config, false).decision.is_allow());
        let d = AllocationRequest::new("same");
        assert_eq!(policy.get_quota_allowance(&key, &d, &config, false).quota_used, 2);
    }

    #[test]
    fn test_running_queries_survive_key_eviction() {
        // A zero TTL makes every bucket stale by the next call
        let policy = ConcurrentRateLimitAllocationPolicy::new(PolicyStoreConfig {
            max_keys: 2,
            key_ttl_secs: 0,
        });
        let config = config(&policy, &[(CONCURRENT_LIMIT, 1)]);
        let busy = key();

        let long_running = AllocationRequest::new("long");
        assert!(policy.get_quota_allowance(&busy, &long_running, &config, false).decision.is_allow());
        for org in 2..6 {
            let tenant = tollgate_core::TenantContext::new().with_organization(org);
            let other = TenantKey::build(&[tollgate_core::TenantDimension::OrganizationId], &tenant).unwrap();
            let request = AllocationRequest::new(format!("q{}", org));
            policy.get_quota_allowance(&other, &request, &config, false);
            policy.update_quota_balance(&other, &request, &QueryOutcome::Success { bytes_scanned: 0 }, true);
        }
        assert!(policy.tracked_keys() <= 2);

        let next = policy.get_quota_allowance(&busy, &AllocationRequest::new("next"), &config, false);
        assert_eq!(next.decision, Decision::Throttle(CONCURRENCY_RETRY_AFTER));
        assert_eq!(next.quota_used, 1);
    }

    #[test]
    fn test_unrecorded_settle_releases_nothing() {
        let policy = policy();
        let config = config(&policy, &[(CONCURRENT_LIMIT, 1)]);
        let key = key();

        let q1 = AllocationRequest::new("q1");
        let q2 = AllocationRequest::new("q2");
        assert!(policy.get_quota_allowance(&key, &q1, &config, false).decision.is_allow());
        let refused = policy.get_quota_allowance(&key, &q2, &config, false);
        assert!(!refused.decision.is_allow());
        policy.update_quota_balance(&key, &q2, &QueryOutcome::Rejected, false);

        // q1 still holds the only slot
        assert!(!policy.get_quota_allowance(&key, &q2, &config, false).decision.is_allow());
    }

    #[test]
    fn test_rate_limit_throttles() {
        let policy = policy();
        let config = config(&policy, &[(CONCURRENT_LIMIT, 100), (RATE_LIMIT_PER_WINDOW, 3)]);
        let key = key();

        for i in 0..3 {
            let request = AllocationRequest::new(format!("q{}", i));
            assert!(policy.get_quota_allowance(&key, &request, &config, false).decision.is_allow());
            policy.update_quota_balance(&key, &request, &QueryOutcome::Error, true);
        }
        let throttled = policy.get_quota_allowance(&key, &AllocationRequest::new("q3"), &config, false);
        match throttled.decision {
            Decision::Throttle(retry_after) => assert!(retry_after > Duration::ZERO),
            other => panic!("expected throttle, got {:?}", other),
        }
        assert_eq!(throttled.quota_unit, "queries_per_window");
    }

    #[test]
    fn test_force_record_counts_refused_query() {
        let policy = policy();
        let config = config(&policy, &[(CONCURRENT_LIMIT, 1)]);
        let key = key();

        policy.get_quota_allowance(&key, &AllocationRequest::new("q1"), &config, true);
        let second = policy.get_quota_allowance(&key, &AllocationRequest::new("q2"), &config, true);
        assert!(!second.decision.is_allow());
        let third = policy.get_quota_allowance(&key, &AllocationRequest::new("q3"), &config, true);
        assert_eq!(third.quota_used, 2);
    }

    #[test]
    fn test_concurrent_admissions_never_exceed_limit() {
        let policy = Arc::new(policy());
        let config = Arc::new(config(&policy, &[(CONCURRENT_LIMIT, 5)]));
        let barrier = Arc::new(Barrier::new(32));

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let policy = Arc::clone(&policy);
                let config = Arc::clone(&config);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    let request = AllocationRequest::new(format!("q{}", i));
                    policy
                        .get_quota_allowance(&key(), &request, &config, false)
                        .decision
                        .is_allow()
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|allowed| *allowed)
            .count();
        assert_eq!(admitted, 5);
    }

    #[test]
    fn test_reset_state() {
        let policy = policy();
        let config = config(&policy, &[]);
        policy.get_quota_allowance(&key(), &AllocationRequest::new("q1"), &config, false);
        assert_eq!(policy.tracked_keys(), 1);
        policy.reset_state();
        assert_eq!(policy.tracked_keys(), 0);
    }
}
