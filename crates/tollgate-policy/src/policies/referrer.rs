//! Guard rail on per-referrer concurrency.
//!
//! Referrers listed in `blocked_referrers` are always rejected. Otherwise
//! the in-flight count of the referrer first lowers the threads a query gets
//! (`referrer_throttle_threshold`) and then throttles it outright
//! (`referrer_rejection_threshold`).

use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tollgate_core::TenantDimension;
use tracing::debug;

use super::concurrent::{InFlight, CONCURRENCY_RETRY_AFTER, MAX_QUERY_DURATION_S};
use crate::config::{ConfigDefinition, PolicyConfig};
use crate::policy::{AllocationPolicy, AllocationRequest, Decision, QueryOutcome, QuotaAllowance};
use crate::store::{PolicyStoreConfig, TenantBuckets, TenantKey};

pub const REFERRER_THROTTLE_THRESHOLD: &str = "referrer_throttle_threshold";
pub const REFERRER_REJECTION_THRESHOLD: &str = "referrer_rejection_threshold";
pub const THROTTLED_THREAD_NUMBER: &str = "throttled_thread_number";

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ReferrerArgs {
    #[serde(default)]
    pub blocked_referrers: BTreeSet<String>,
}

pub struct ReferrerGuardRailPolicy {
    blocked_referrers: BTreeSet<String>,
    buckets: TenantBuckets<InFlight>,
}

impl ReferrerGuardRailPolicy {
    pub const NAME: &'static str = "ReferrerGuardRailPolicy";

    pub fn new(blocked_referrers: BTreeSet<String>, store: PolicyStoreConfig) -> Self {
        Self {
            blocked_referrers,
            buckets: TenantBuckets::new(store),
        }
    }

    fn referrer<'a>(&self, key: &'a TenantKey) -> Option<&'a str> {
        key.get(&TenantDimension::Referrer)
    }
}

impl AllocationPolicy for ReferrerGuardRailPolicy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn additional_config_definitions(&self) -> Vec<ConfigDefinition> {
        vec![
            ConfigDefinition::new(
                REFERRER_THROTTLE_THRESHOLD,
                "In-flight queries of a referrer above which threads are lowered",
                50,
            ),
            ConfigDefinition::new(
                REFERRER_REJECTION_THRESHOLD,
                "In-flight queries of a referrer at which new queries are throttled",
                100,
            ),
            ConfigDefinition::new(
                THROTTLED_THREAD_NUMBER,
                "Threads given to a query over the throttle threshold",
                1,
            ),
            ConfigDefinition::new(
                MAX_QUERY_DURATION_S,
                "In-flight entries older than this are considered finished",
                1800,
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
        if let Some(referrer) = self.referrer(key).filter(|r| self.blocked_referrers.contains(*r)) {
            let mut allowance = QuotaAllowance::allow(request).with_explanation("referrer", referrer);
            allowance.decision = Decision::Reject(format!("referrer '{}' is blocked", referrer));
            allowance.suggestion = "this referrer may not query this dataset".to_string();
            return allowance;
        }

        let now = Instant::now();
        let throttle_threshold = config.limit(REFERRER_THROTTLE_THRESHOLD);
        let rejection_threshold = config.limit(REFERRER_REJECTION_THRESHOLD);
        let throttled_threads = config.limit(THROTTLED_THREAD_NUMBER).max(1) as u32;
        let max_age = Duration::from_secs(config.limit(MAX_QUERY_DURATION_S));

        self.buckets.with_bucket(key, now, InFlight::default, |in_flight| {
            in_flight.purge(now, max_age);
            let running = in_flight.len() as u64;

            let mut allowance = QuotaAllowance::allow(request).with_explanation("in_flight", running);
            allowance.quota_unit = "concurrent_queries";
            allowance.quota_used = running;
            allowance.throttle_threshold = throttle_threshold;
            allowance.rejection_threshold = rejection_threshold;

            if running >= rejection_threshold {
                allowance.decision = Decision::Throttle(CONCURRENCY_RETRY_AFTER);
                allowance.suggestion = format!(
                    "{} queries running for this referrer (limit {}); reduce parallelism",
                    running, rejection_threshold
                );
            } else if running >= throttle_threshold {
                allowance.is_throttled = true;
                allowance.max_threads = request.max_threads.min(throttled_threads);
                allowance.suggestion = format!(
                    "{} queries running for this referrer; threads lowered to {}",
                    running, allowance.max_threads
                );
            }

            if allowance.decision.is_allow() || force_record {
                in_flight.start(request.admission_id, now);
            }
            debug!(
                policy = Self::NAME,
                key = %key,
                in_flight = running,
                decision = allowance.decision.kind(),
                "Evaluated referrer guard rail"
            );
            allowance
        })
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
        self.buckets
            .update_existing(key, Instant::now(), |in_flight| in_flight.finish(&request.admission_id));
    }

    fn reset_state(&self) {
        self.buckets.clear();
    }

    fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }
}
