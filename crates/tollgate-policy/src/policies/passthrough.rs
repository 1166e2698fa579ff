//! Always allows; keeps a slot in the chain without limiting anything.

use crate::config::{ConfigDefinition, PolicyConfig};
use crate::policy::{AllocationPolicy, AllocationRequest, QueryOutcome, QuotaAllowance};
use crate::store::TenantKey;

#[derive(Debug, Default)]
pub struct PassthroughPolicy;

impl PassthroughPolicy {
    pub const NAME: &'static str = "PassthroughPolicy";
}

impl AllocationPolicy for PassthroughPolicy {
    fn name(&self) -> &'static str {
        Self::NAME
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
        QuotaAllowance::allow(request)
    }

    fn update_quota_balance(
        &self,
        _key: &TenantKey,
        _request: &AllocationRequest,
        _outcome: &QueryOutcome,
        _recorded: bool,
    ) {
    }

    fn reset_state(&self) {}

    fn tracked_keys(&self) -> usize {
        0
    }
}
