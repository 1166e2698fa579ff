//! Built-in allocation policies and the lookup table that builds them.
//!
//! Every policy accepts two common args besides its own:
//! `required_tenant_types` (ordered dimensions forming its tenant key) and
//! `default_config_overrides` (integer config values replacing its defaults).

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tollgate_core::{PolicySpec, TenantDimension};

use crate::configured::ConfiguredPolicy;
use crate::error::{PolicyError, Result};
use crate::policy::AllocationPolicy;
use crate::store::PolicyStoreConfig;

mod bytes_scanned;
mod concurrent;
mod passthrough;
mod referrer;

pub use bytes_scanned::{
    BytesScannedRejectingPolicy, BYTES_REJECTION_THRESHOLD, BYTES_THROTTLE_THRESHOLD,
    BYTES_WINDOW_S, MAX_BYTES_PER_QUERY,
};
pub use concurrent::{
    ConcurrentRateLimitAllocationPolicy, CONCURRENT_LIMIT, MAX_QUERY_DURATION_S,
    RATE_LIMIT_PER_WINDOW, RATE_WINDOW_S,
};
pub use passthrough::PassthroughPolicy;
pub use referrer::{
    ReferrerGuardRailPolicy, REFERRER_REJECTION_THRESHOLD, REFERRER_THROTTLE_THRESHOLD,
    THROTTLED_THREAD_NUMBER,
};

type Builder = fn(&serde_json::Value, &PolicyStoreConfig) -> Result<Arc<dyn AllocationPolicy>>;

struct Registration {
    name: &'static str,
    build: Builder,
    default_tenant_types: &'static [&'static str],
    /// Dimensions the policy reads from its key; they may not be left out
    required_dimensions: &'static [TenantDimension],
}

const POLICIES: &[Registration] = &[
    Registration {
        name: ConcurrentRateLimitAllocationPolicy::NAME,
        build: build_concurrent,
        default_tenant_types: &["organization_id", "referrer", "project_id"],
        required_dimensions: &[],
    },
    Registration {
        name: ReferrerGuardRailPolicy::NAME,
        build: build_referrer,
        default_tenant_types: &["referrer"],
        required_dimensions: &[TenantDimension::Referrer],
    },
    Registration {
        name: BytesScannedRejectingPolicy::NAME,
        build: build_bytes_scanned,
        default_tenant_types: &["organization_id", "project_id"],
        required_dimensions: &[],
    },
    Registration {
        name: PassthroughPolicy::NAME,
        build: build_passthrough,
        default_tenant_types: &[],
        required_dimensions: &[],
    },
];

fn build_concurrent(_: &serde_json::Value, store: &PolicyStoreConfig) -> Result<Arc<dyn AllocationPolicy>> {
    Ok(Arc::new(ConcurrentRateLimitAllocationPolicy::new(store.clone())))
}

fn build_referrer(args: &serde_json::Value, store: &PolicyStoreConfig) -> Result<Arc<dyn AllocationPolicy>> {
    let args: referrer::ReferrerArgs = parse_args(ReferrerGuardRailPolicy::NAME, args)?;
    Ok(Arc::new(ReferrerGuardRailPolicy::new(
        args.blocked_referrers,
        store.clone(),
    )))
}

fn build_bytes_scanned(_: &serde_json::Value, store: &PolicyStoreConfig) -> Result<Arc<dyn AllocationPolicy>> {
    Ok(Arc::new(BytesScannedRejectingPolicy::new(store.clone())))
}

fn build_passthrough(_: &serde_json::Value, _: &PolicyStoreConfig) -> Result<Arc<dyn AllocationPolicy>> {
    Ok(Arc::new(PassthroughPolicy))
}

#[derive(Deserialize)]
struct CommonArgs {
    #[serde(default)]
    required_tenant_types: Option<Vec<TenantDimension>>,
    #[serde(default)]
    default_config_overrides: BTreeMap<String, i64>,
}

fn parse_args<T: serde::de::DeserializeOwned>(policy: &str, args: &serde_json::Value) -> Result<T> {
    let args = if args.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        args.clone()
    };
    serde_json::from_value(args)
        .map_err(|e| PolicyError::InvalidConfig(format!("{}: invalid args: {}", policy, e)))
}

/// Names accepted in `allocation_policies`
pub fn policy_names() -> Vec<&'static str> {
    POLICIES.iter().map(|r| r.name).collect()
}

/// Build a configured policy from its declaration
pub fn build_policy(spec: &PolicySpec, store: &PolicyStoreConfig) -> Result<ConfiguredPolicy> {
    let registration = POLICIES
        .iter()
        .find(|r| r.name == spec.name)
        .ok_or_else(|| PolicyError::UnknownPolicy(spec.name.clone()))?;

    let common: CommonArgs = parse_args(registration.name, &spec.args)?;
    let required_tenant_types = match common.required_tenant_types {
        Some(types) => types,
        None => registration
            .default_tenant_types
            .iter()
            .map(|t| t.parse())
            .collect::<std::result::Result<Vec<TenantDimension>, _>>()
            .map_err(|e| PolicyError::InvalidConfig(e.to_string()))?,
    };
    let mut seen = BTreeSet::new();
    if let Some(duplicate) = required_tenant_types.iter().find(|t| !seen.insert(*t)) {
        return Err(PolicyError::InvalidConfig(format!(
            "{}: tenant type '{}' listed twice",
            registration.name, duplicate
        )));
    }

    if let Some(missing) = registration
        .required_dimensions
        .iter()
        .find(|d| !required_tenant_types.contains(d))
    {
        return Err(PolicyError::InvalidConfig(format!(
            "{}: required_tenant_types must include '{}'",
            registration.name, missing
        )));
    }

    let inner = (registration.build)(&spec.args, store)?;
    ConfiguredPolicy::new(
        spec.clone(),
        inner,
        required_tenant_types,
        &common.default_config_overrides,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyMode;
    use serde_json::json;

    fn spec(name: &str, args: serde_json::Value) -> PolicySpec {
        PolicySpec {
            name: name.to_string(),
            args,
        }
    }

    fn store() -> PolicyStoreConfig {
        PolicyStoreConfig {
            max_keys: 100,
            key_ttl_secs: 60,
        }
    }

    #[test]
    fn test_build_every_registered_policy() {
        for name in policy_names() {
            let policy = build_policy(&spec(name, json!(null)), &store()).unwrap();
            assert_eq!(policy.name(), name);
        }
    }

    #[test]
    fn test_common_args() {
        let policy = build_policy(
            &spec(
                "ConcurrentRateLimitAllocationPolicy",
                json!({
                    "required_tenant_types": ["organization_id", "referrer"],
                    "default_config_overrides": {"is_enforced": 0, "concurrent_limit": 5}
                }),
            ),
            &store(),
        )
        .unwrap();
        assert_eq!(
            policy.required_tenant_types(),
            &[TenantDimension::OrganizationId, TenantDimension::Referrer]
        );
        assert_eq!(policy.mode(), PolicyMode::DryRun);
        assert_eq!(policy.config().get(CONCURRENT_LIMIT), 5);
    }

    #[test]
    fn test_default_tenant_types() {
        let policy = build_policy(&spec("ReferrerGuardRailPolicy", json!({})), &store()).unwrap();
        assert_eq!(policy.required_tenant_types(), &[TenantDimension::Referrer]);
    }

    #[test]
    fn test_referrer_guard_needs_referrer_dimension() {
        let err = build_policy(
            &spec(
                "ReferrerGuardRailPolicy",
                json!({
                    "required_tenant_types": ["organization_id"],
                    "blocked_referrers": ["api.abuse"]
                }),
            ),
            &store(),
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::InvalidConfig(msg) if msg.contains("referrer")));

        let policy = build_policy(
            &spec(
                "ReferrerGuardRailPolicy",
                json!({"required_tenant_types": ["organization_id", "referrer"]}),
            ),
            &store(),
        )
        .unwrap();
        assert_eq!(policy.required_tenant_types().len(), 2);
    }

    #[test]
    fn test_invalid_declarations() {
        assert!(matches!(
            build_policy(&spec("FairSharePolicy", json!(null)), &store()),
            Err(PolicyError::UnknownPolicy(_))
        ));
        // Override key unknown to the policy
        assert!(build_policy(
            &spec(
                "PassthroughPolicy",
                json!({"default_config_overrides": {"concurrent_limit": 1}})
            ),
            &store()
        )
        .is_err());
        // Malformed args
        assert!(build_policy(
            &spec("ReferrerGuardRailPolicy", json!({"blocked_referrers": "api"})),
            &store()
        )
        .is_err());
        assert!(build_policy(
            &spec(
                "BytesScannedRejectingPolicy",
                json!({"required_tenant_types": ["referrer", "referrer"]})
            ),
            &store()
        )
        .is_err());
    }
}
