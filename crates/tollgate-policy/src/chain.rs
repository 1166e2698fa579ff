//! Ordered policy chain and admission guard.
//!
//! Policies are evaluated in declaration order. The first policy whose
//! *effective* decision is not Allow stops the chain; policies after it are
//! never consulted. A dry-run policy computes and reports its decision but
//! its effective decision is always Allow.
//!
//! Evaluating the chain returns an [`AdmissionGuard`]. Every policy that was
//! consulted (including the one that stopped the chain) is settled exactly
//! once through it, either explicitly with the query outcome or, if the guard
//! is dropped first, as [`QueryOutcome::Abandoned`].

use serde::Serialize;
use std::sync::Arc;
use tollgate_core::{PolicySpec, TenantContext};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::PolicyMode;
use crate::configured::ConfiguredPolicy;
use crate::error::{PolicyError, Result};
use crate::policies::build_policy;
use crate::policy::{AllocationRequest, Decision, QueryOutcome, QuotaAllowance};
use crate::store::{PolicyStoreConfig, TenantKey};

/// One consulted policy
#[derive(Debug, Clone, Serialize)]
pub struct PolicyEvaluation {
    pub policy: &'static str,
    pub mode: PolicyMode,
    pub tenant_key: Option<String>,
    /// What the policy decided; the would-be decision for dry runs
    pub allowance: QuotaAllowance,
    /// What the chain applied
    pub effective: Decision,
    /// Whether the policy recorded the query and must release it
    #[serde(skip)]
    pub recorded: bool,
}

impl PolicyEvaluation {
    pub fn is_dry_run_denial(&self) -> bool {
        self.mode == PolicyMode::DryRun && !self.allowance.decision.is_allow()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainOutcome {
    pub decision: Decision,
    pub evaluations: Vec<PolicyEvaluation>,
    /// Smallest thread count among enforced allowances, if any policy spoke
    pub max_threads: Option<u32>,
}

#[derive(Debug, Default)]
pub struct PolicyChain {
    policies: Vec<Arc<ConfiguredPolicy>>,
}

impl PolicyChain {
    pub fn new(policies: Vec<Arc<ConfiguredPolicy>>) -> Result<Self> {
        for (i, policy) in policies.iter().enumerate() {
            if policies[..i].iter().any(|p| p.name() == policy.name()) {
                return Err(PolicyError::InvalidConfig(format!(
                    "Policy '{}' declared more than once",
                    policy.name()
                )));
            }
        }
        Ok(Self { policies })
    }

    /// Build every declared policy, reusing instances from `previous` whose
    /// declaration is unchanged so their state survives a reload
    pub fn build(
        specs: &[PolicySpec],
        store: &PolicyStoreConfig,
        previous: Option<&PolicyChain>,
    ) -> Result<Self> {
        let policies = specs
            .iter()
            .map(|spec| {
                let reused = previous
                    .and_then(|chain| chain.find(&spec.name))
                    .filter(|existing| existing.spec() == spec);
                match reused {
                    Some(existing) => {
                        debug!(policy = %spec.name, "Reusing policy instance");
                        Ok(Arc::clone(existing))
                    }
                    None => build_policy(spec, store).map(Arc::new),
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(policies)
    }

    pub fn policies(&self) -> &[Arc<ConfiguredPolicy>] {
        &self.policies
    }

    pub fn find(&self, name: &str) -> Option<&Arc<ConfiguredPolicy>> {
        self.policies.iter().find(|p| p.name() == name)
    }

    pub fn get(&self, name: &str) -> Result<&Arc<ConfiguredPolicy>> {
        self.find(name)
            .ok_or_else(|| PolicyError::PolicyNotFound(name.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Evaluate the chain for one query
    pub fn evaluate(&self, tenant: &TenantContext, mut request: AllocationRequest) -> AdmissionGuard {
        // A reused request must not share in-flight entries with an earlier one
        request.admission_id = Uuid::new_v4();
        let mut decision = Decision::Allow;
        let mut evaluations = Vec::new();
        let mut settlements = Vec::new();

        for policy in &self.policies {
            let config = policy.config();
            let mode = config.mode();
            if mode == PolicyMode::Inactive {
                debug!(policy = policy.name(), "Skipping inactive policy");
                continue;
            }

            let key = TenantKey::build(policy.required_tenant_types(), tenant);
            let allowance = match &key {
                Some(key) => policy.inner().get_quota_allowance(
                    key,
                    &request,
                    &config,
                    mode == PolicyMode::DryRun,
                ),
                None if config.is_mandatory() => {
                    let missing = policy
                        .required_tenant_types()
                        .iter()
                        .filter(|d| tenant.get(d).is_none())
                        .map(|d| d.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    let mut allowance = QuotaAllowance::allow(&request);
                    allowance.decision =
                        Decision::Reject(format!("missing required tenant dimensions: {}", missing));
                    allowance.suggestion = format!("supply {} with the query", missing);
                    allowance
                }
                None => QuotaAllowance::allow(&request)
                    .with_explanation("skipped", "tenant dimensions not supplied"),
            };

            let recorded = key.is_some() && (allowance.decision.is_allow() || mode == PolicyMode::DryRun);
            let effective = match mode {
                PolicyMode::DryRun => Decision::Allow,
                _ => allowance.decision.clone(),
            };

            let evaluation = PolicyEvaluation {
                policy: policy.name(),
                mode,
                tenant_key: key.as_ref().map(|k| k.to_string()),
                allowance,
                effective: effective.clone(),
                recorded,
            };
            if evaluation.is_dry_run_denial() {
                warn!(
                    policy = policy.name(),
                    tenant_key = ?evaluation.tenant_key,
                    decision = evaluation.allowance.decision.kind(),
                    "Dry-run policy would have denied query"
                );
            } else if !effective.is_allow() {
                warn!(
                    policy = policy.name(),
                    tenant_key = ?evaluation.tenant_key,
                    decision = effective.kind(),
                    "Policy denied query"
                );
            }

            if let Some(key) = key {
                settlements.push(Settlement {
                    policy: Arc::clone(policy),
                    key,
                    recorded,
                });
            }
            evaluations.push(evaluation);

            if !effective.is_allow() {
                decision = effective;
                break;
            }
        }

        let max_threads = evaluations
            .iter()
            .filter(|e| e.mode == PolicyMode::Enforced && e.effective.is_allow())
            .map(|e| e.allowance.max_threads)
            .min();

        AdmissionGuard {
            request,
            outcome: ChainOutcome {
                decision,
                evaluations,
                max_threads,
            },
            settlements,
            settled: false,
        }
    }

    /// Reset the runtime config of every policy
    pub fn reset_configs(&self) {
        self.policies.iter().for_each(|p| p.reset_config());
    }
}

struct Settlement {
    policy: Arc<ConfiguredPolicy>,
    key: TenantKey,
    recorded: bool,
}

/// Outstanding admission of one query
pub struct AdmissionGuard {
    request: AllocationRequest,
    outcome: ChainOutcome,
    settlements: Vec<Settlement>,
    settled: bool,
}

impl AdmissionGuard {
    pub fn outcome(&self) -> &ChainOutcome {
        &self.outcome
    }

    pub fn decision(&self) -> &Decision {
        &self.outcome.decision
    }

    pub fn is_allowed(&self) -> bool {
        self.outcome.decision.is_allow()
    }

    pub fn request(&self) -> &AllocationRequest {
        &self.request
    }

    /// Report how the query ended to every consulted policy
    pub fn settle(mut self, outcome: QueryOutcome) -> ChainOutcome {
        self.settle_inner(&outcome);
        std::mem::replace(
            &mut self.outcome,
            ChainOutcome {
                decision: Decision::Allow,
                evaluations: Vec::new(),
                max_threads: None,
            },
        )
    }

    fn settle_inner(&mut self, outcome: &QueryOutcome) {
        if self.settled {
            return;
        }
        self.settled = true;
        for settlement in &self.settlements {
            settlement.policy.inner().update_quota_balance(
                &settlement.key,
                &self.request,
                outcome,
                settlement.recorded,
            );
        }
        debug!(
            query_id = %self.request.query_id,
            admission_id = %self.request.admission_id,
            outcome = outcome.as_str(),
            policies = self.settlements.len(),
            "Settled admission"
        );
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        if !self.settled {
            self.settle_inner(&QueryOutcome::Abandoned);
        }
    }
}

impl std::fmt::Debug for AdmissionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGuard")
            .field("query_id", &self.request.query_id)
            .field("decision", &self.outcome.decision)
            .field("settled", &self.settled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigDefinition, PolicyConfig, IS_ACTIVE, IS_ENFORCED, IS_MANDATORY};
    use crate::policy::AllocationPolicy;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tollgate_core::TenantDimension;

    /// Returns a fixed decision and counts calls
    struct FixedPolicy {
        name: &'static str,
        decision: Decision,
        max_threads: u32,
        calls: AtomicUsize,
        settled: Mutex<Vec<(QueryOutcome, bool)>>,
    }

    impl FixedPolicy {
        fn new(name: &'static str, decision: Decision) -> Arc<Self> {
            Arc::new(Self {
                name,
                decision,
                max_threads: 10,
                calls: AtomicUsize::new(0),
                settled: Mutex::new(Vec::new()),
            })
        }

        fn with_threads(name: &'static str, max_threads: u32) -> Arc<Self> {
            Arc::new(Self {
                name,
                decision: Decision::Allow,
                max_threads,
                calls: AtomicUsize::new(0),
                settled: Mutex::new(Vec::new()),
            })
        }
    }

    impl AllocationPolicy for FixedPolicy {
        fn name(&self) -> &'static str {
            self.name
        }

        fn additional_config_definitions(&self) -> Vec<ConfigDefinition> {
            Vec::new()
        }

        fn get_quota_allowance(
            &self,
            _key: &TenantKey,
            request: &AllocationRequest,
            _config: &PolicyConfig,
            _force_record: bool,
        ) -> QuotaAllowance {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut allowance = QuotaAllowance::allow(request);
            allowance.decision = self.decision.clone();
            allowance.max_threads = self.max_threads;
            allowance
        }

        fn update_quota_balance(
            &self,
            _key: &TenantKey,
            _request: &AllocationRequest,
            outcome: &QueryOutcome,
            recorded: bool,
        ) {
            self.settled.lock().push((*outcome, recorded));
        }

        fn reset_state(&self) {}

        fn tracked_keys(&self) -> usize {
            0
        }
    }

    fn configured(policy: &Arc<FixedPolicy>, overrides: &[(&str, i64)]) -> Arc<ConfiguredPolicy> {
        let overrides: BTreeMap<String, i64> =
            overrides.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        Arc::new(
            ConfiguredPolicy::new(
                PolicySpec {
                    name: policy.name.to_string(),
                    args: serde_json::Value::Null,
                },
                Arc::clone(policy) as Arc<dyn AllocationPolicy>,
                vec![TenantDimension::OrganizationId],
                &overrides,
            )
            .unwrap(),
        )
    }

    fn tenant() -> TenantContext {
        TenantContext::new().with_organization(1).with_referrer("test")
    }

    #[test]
    fn test_first_denial_short_circuits() {
        let a = FixedPolicy::new("A", Decision::Reject("a".into()));
        let b = FixedPolicy::new("B", Decision::Reject("b".into()));
        let c = FixedPolicy::new("C", Decision::Allow);
        let chain = PolicyChain::new(vec![
            configured(&a, &[(IS_ACTIVE, 0)]),
            configured(&b, &[]),
            configured(&c, &[]),
        ])
        .unwrap();

        let guard = chain.evaluate(&tenant(), AllocationRequest::new("q1"));
        assert_eq!(guard.decision(), &Decision::Reject("b".into()));
        assert_eq!(guard.outcome().evaluations.len(), 1);
        assert_eq!(guard.outcome().evaluations[0].policy, "B");
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
        assert_eq!(c.calls.load(Ordering::SeqCst), 0);

        guard.settle(QueryOutcome::Rejected);
        // The rejecting policy is settled too, with nothing recorded
        assert_eq!(*b.settled.lock(), vec![(QueryOutcome::Rejected, false)]);
        assert!(c.settled.lock().is_empty());
    }

    #[test]
    fn test_dry_run_records_would_be_decision() {
        let a = FixedPolicy::new("A", Decision::Reject("too much".into()));
        let b = FixedPolicy::new("B", Decision::Allow);
        let chain = PolicyChain::new(vec![configured(&a, &[(IS_ENFORCED, 0)]), configured(&b, &[])]).unwrap();

        let guard = chain.evaluate(&tenant(), AllocationRequest::new("q1"));
        assert!(guard.is_allowed());
        let evaluation = &guard.outcome().evaluations[0];
        assert_eq!(evaluation.mode, PolicyMode::DryRun);
        assert_eq!(evaluation.allowance.decision, Decision::Reject("too much".into()));
        assert_eq!(evaluation.effective, Decision::Allow);
        assert!(evaluation.recorded);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_dimensions() {
        let optional = FixedPolicy::new("Optional", Decision::Reject("never".into()));
        let chain = PolicyChain::new(vec![configured(&optional, &[])]).unwrap();
        let guard = chain.evaluate(&TenantContext::new(), AllocationRequest::new("q1"));
        assert!(guard.is_allowed());
        assert_eq!(optional.calls.load(Ordering::SeqCst), 0);

        let mandatory = FixedPolicy::new("Mandatory", Decision::Allow);
        let chain = PolicyChain::new(vec![configured(&mandatory, &[(IS_MANDATORY, 1)])]).unwrap();
        let guard = chain.evaluate(&TenantContext::new(), AllocationRequest::new("q2"));
        assert!(matches!(guard.decision(), Decision::Reject(reason) if reason.contains("organization_id")));
        assert_eq!(mandatory.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_smallest_enforced_threads_wins() {
        let a = FixedPolicy::with_threads("A", 8);
        let b = FixedPolicy::with_threads("B", 2);
        let dry = FixedPolicy::with_threads("Dry", 1);
        let chain = PolicyChain::new(vec![
            configured(&a, &[]),
            configured(&b, &[]),
            configured(&dry, &[(IS_ENFORCED, 0)]),
        ])
        .unwrap();
        let guard = chain.evaluate(&tenant(), AllocationRequest::new("q1"));
        assert_eq!(guard.outcome().max_threads, Some(2));

        let empty = PolicyChain::default().evaluate(&tenant(), AllocationRequest::new("q2"));
        assert_eq!(empty.outcome().max_threads, None);
        assert!(empty.is_allowed());
    }

    #[test]
    fn test_dropped_guard_settles_abandoned() {
        let a = FixedPolicy::new("A", Decision::Allow);
        let chain = PolicyChain::new(vec![configured(&a, &[])]).unwrap();
        {
            let _guard = chain.evaluate(&tenant(), AllocationRequest::new("q1"));
        }
        assert_eq!(*a.settled.lock(), vec![(QueryOutcome::Abandoned, true)]);

        let guard = chain.evaluate(&tenant(), AllocationRequest::new("q2"));
        guard.settle(QueryOutcome::Success { bytes_scanned: 10 });
        assert_eq!(a.settled.lock().len(), 2);
    }

    #[test]
    fn test_throttle_carries_retry_after() {
        let a = FixedPolicy::new("A", Decision::Throttle(Duration::from_secs(3)));
        let chain = PolicyChain::new(vec![configured(&a, &[])]).unwrap();
        let guard = chain.evaluate(&tenant(), AllocationRequest::new("q1"));
        assert_eq!(guard.decision().retry_after(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_duplicate_policy_names_rejected() {
        let a = FixedPolicy::new("A", Decision::Allow);
        assert!(PolicyChain::new(vec![configured(&a, &[]), configured(&a, &[])]).is_err());
    }

    #[test]
    fn test_build_reuses_unchanged_policies() {
        let store = PolicyStoreConfig {
            max_keys: 100,
            key_ttl_secs: 60,
        };
        let specs: Vec<PolicySpec> = serde_json::from_value(serde_json::json!([
            {"name": "ConcurrentRateLimitAllocationPolicy"},
            {"name": "ReferrerGuardRailPolicy", "args": {"blocked_referrers": ["a"]}}
        ]))
        .unwrap();
        let first = PolicyChain::build(&specs, &store, None).unwrap();

        let mut changed = specs.clone();
        changed[1].args = serde_json::json!({"blocked_referrers": ["b"]});
        let second = PolicyChain::build(&changed, &store, Some(&first)).unwrap();

        assert!(Arc::ptr_eq(&first.policies()[0], &second.policies()[0]));
        assert!(!Arc::ptr_eq(&first.policies()[1], &second.policies()[1]));
    }
}
