//! Admission control for Tollgate datasets.
//!
//! Each dataset declares an ordered chain of allocation policies. A policy
//! keeps state per tenant key (built from the tenant dimensions it requires)
//! and returns a [`QuotaAllowance`] for every query: allow, throttle
//! (retry later) or reject (will not run in this form), together with the
//! thread budget and the usage figures behind the decision.
//!
//! [`PolicyChain::evaluate`] consults the policies in order and hands back an
//! [`AdmissionGuard`] that must be settled with the query's outcome.

pub mod chain;
pub mod config;
pub mod configured;
pub mod error;
pub mod policies;
pub mod policy;
pub mod store;
pub mod window;

pub use chain::{AdmissionGuard, ChainOutcome, PolicyChain, PolicyEvaluation};
pub use config::{ConfigDefinition, PolicyConfig, PolicyMode, IS_ACTIVE, IS_ENFORCED, IS_MANDATORY};
pub use configured::{ConfiguredPolicy, PolicyDescription};
pub use error::{PolicyError, Result};
pub use policies::{build_policy, policy_names};
pub use policy::{
    AllocationPolicy, AllocationRequest, Decision, QueryOutcome, QuotaAllowance, DEFAULT_MAX_THREADS,
};
pub use store::{BucketState, PolicyStoreConfig, TenantBuckets, TenantKey};
pub use window::SlidingWindow;
