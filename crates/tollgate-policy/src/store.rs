//! Per-tenant policy state.
//!
//! Each policy keeps one bucket per tenant key in a [`DashMap`]. Checking a
//! limit and recording the query happen inside a single entry guard, so two
//! requests for the same key cannot both observe the last free slot.
//!
//! ## Configuration
//!
//! - `TOLLGATE_POLICY_MAX_KEYS`: Bucket count at which idle keys start being evicted, halved (default: 10000)
//! - `TOLLGATE_POLICY_KEY_TTL_SECS`: Idle key TTL in seconds (default: 600)

use dashmap::DashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tollgate_core::{TenantContext, TenantDimension};
use tracing::debug;

/// Default maximum number of tenant keys tracked by one policy
const DEFAULT_MAX_KEYS: usize = 10_000;

/// Default TTL for idle tenant keys (10 minutes)
const DEFAULT_KEY_TTL_SECS: u64 = 600;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyStoreConfig {
    pub max_keys: usize,
    pub key_ttl_secs: u64,
}

impl Default for PolicyStoreConfig {
    fn default() -> Self {
        Self {
            max_keys: std::env::var("TOLLGATE_POLICY_MAX_KEYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_KEYS),
            key_ttl_secs: std::env::var("TOLLGATE_POLICY_KEY_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_KEY_TTL_SECS),
        }
    }
}

/// Tenant key built from a policy's required dimensions, in declared order.
///
/// The rendered form is for logs and reports only; dimension values are
/// read back through [`TenantKey::get`], never by parsing it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantKey {
    rendered: String,
    values: Vec<(TenantDimension, String)>,
}

impl TenantKey {
    /// `None` if the tenant lacks any of the dimensions
    pub fn build(dimensions: &[TenantDimension], tenant: &TenantContext) -> Option<TenantKey> {
        let values = dimensions
            .iter()
            .map(|d| tenant.get(d).map(|value| (d.clone(), value)))
            .collect::<Option<Vec<_>>>()?;
        let rendered = values
            .iter()
            .map(|(d, value)| format!("{}={}", d, value))
            .collect::<Vec<_>>()
            .join("|");
        Some(TenantKey { rendered, values })
    }

    /// Value of one dimension of the key
    pub fn get(&self, dimension: &TenantDimension) -> Option<&str> {
        self.values
            .iter()
            .find(|(d, _)| d == dimension)
            .map(|(_, value)| value.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

/// Per-key policy state that knows when it holds nothing worth keeping
pub trait BucketState {
    /// No running query or open reservation depends on this state
    fn is_idle(&self) -> bool;
}

#[derive(Debug)]
struct Bucket<S> {
    state: S,
    last_accessed: Instant,
}

/// Bounded map of per-tenant state with idle eviction
pub struct TenantBuckets<S> {
    config: PolicyStoreConfig,
    buckets: DashMap<TenantKey, Bucket<S>>,
}

impl<S: BucketState> TenantBuckets<S> {
    pub fn new(config: PolicyStoreConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    /// Run `f` on the bucket for `key`, creating it with `init` if needed.
    ///
    /// The entry stays locked for the duration of `f`.
    pub fn with_bucket<R>(
        &self,
        key: &TenantKey,
        now: Instant,
        init: impl FnOnce() -> S,
        f: impl FnOnce(&mut S) -> R,
    ) -> R {
        // Trigger at 50% of max to amortize O(n) cleanup cost
        let cleanup_threshold = self.config.max_keys / 2;
        if self.buckets.len() > cleanup_threshold {
            debug!(
                key_count = self.buckets.len(),
                threshold = cleanup_threshold,
                max_keys = self.config.max_keys,
                "Tenant key threshold reached, cleaning up"
            );
            self.cleanup_idle(now);
        }

        let mut bucket = self.buckets.entry(key.clone()).or_insert_with(|| {
            debug!(key = %key, "Creating policy bucket");
            Bucket {
                state: init(),
                last_accessed: now,
            }
        });
        bucket.last_accessed = now;
        f(&mut bucket.state)
    }

    /// Run `f` on an existing bucket only; evicted keys are not recreated
    pub fn update_existing<R>(&self, key: &TenantKey, now: Instant, f: impl FnOnce(&mut S) -> R) -> Option<R> {
        self.buckets.get_mut(key).map(|mut bucket| {
            bucket.last_accessed = now;
            f(&mut bucket.state)
        })
    }

    fn cleanup_idle(&self, now: Instant) {
        let ttl = Duration::from_secs(self.config.key_ttl_secs);

        let before_count = self.buckets.len();
        self.buckets.retain(|key, bucket| {
            // Evicting a busy bucket would forget its running queries
            let should_keep = !bucket.state.is_idle()
                || now.saturating_duration_since(bucket.last_accessed) < ttl;
            if !should_keep {
                debug!(key = %key, "Evicting idle policy bucket");
            }
            should_keep
        });

        let evicted = before_count.saturating_sub(self.buckets.len());
        if evicted > 0 {
            debug!(
                evicted = evicted,
                remaining = self.buckets.len(),
                ttl_secs = self.config.key_ttl_secs,
                "Cleaned up idle policy buckets"
            );
        }
    }

    pub fn clear(&self) {
        self.buckets.clear();
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
