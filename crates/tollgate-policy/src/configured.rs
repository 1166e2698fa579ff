//! A policy instance bound to its dataset declaration and live config.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tollgate_core::{PolicySpec, TenantDimension};
use tracing::info;

use crate::config::{common_config_definitions, ConfigDefinition, PolicyConfig, PolicyMode};
use crate::error::{PolicyError, Result};
use crate::policy::AllocationPolicy;

pub struct ConfiguredPolicy {
    spec: PolicySpec,
    required_tenant_types: Vec<TenantDimension>,
    definitions: Vec<ConfigDefinition>,
    defaults: PolicyConfig,
    config: RwLock<PolicyConfig>,
    inner: Arc<dyn AllocationPolicy>,
}

/// Snapshot returned by the administrative listing
#[derive(Debug, Clone, Serialize)]
pub struct PolicyDescription {
    pub name: &'static str,
    pub mode: PolicyMode,
    pub required_tenant_types: Vec<TenantDimension>,
    pub config: PolicyConfig,
    pub definitions: Vec<ConfigDefinition>,
    pub tracked_keys: usize,
}

impl ConfiguredPolicy {
    /// Bind `inner` to its declaration; overrides are validated like
    /// administrative updates and become the defaults `reset_config` returns to
    pub fn new(
        spec: PolicySpec,
        inner: Arc<dyn AllocationPolicy>,
        required_tenant_types: Vec<TenantDimension>,
        overrides: &BTreeMap<String, i64>,
    ) -> Result<Self> {
        let mut definitions = common_config_definitions();
        definitions.extend(inner.additional_config_definitions());

        let mut defaults = PolicyConfig::from_definitions(&definitions);
        for (key, value) in overrides {
            let definition = find_definition(&definitions, inner.name(), key)?;
            definition.validate(inner.name(), *value)?;
            defaults.set(key.clone(), *value);
        }

        Ok(Self {
            spec,
            required_tenant_types,
            definitions,
            config: RwLock::new(defaults.clone()),
            defaults,
            inner,
        })
    }

    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    /// Declaration this instance was built from; reload compares it
    pub fn spec(&self) -> &PolicySpec {
        &self.spec
    }

    pub fn required_tenant_types(&self) -> &[TenantDimension] {
        &self.required_tenant_types
    }

    pub fn definitions(&self) -> &[ConfigDefinition] {
        &self.definitions
    }

    pub fn config(&self) -> PolicyConfig {
        self.config.read().clone()
    }

    pub fn mode(&self) -> PolicyMode {
        self.config.read().mode()
    }

    pub fn set_config(&self, key: &str, value: i64) -> Result<()> {
        let definition = find_definition(&self.definitions, self.name(), key)?;
        definition.validate(self.name(), value)?;

        let mut config = self.config.write();
        let before = config.mode();
        config.set(key, value);
        info!(
            policy = self.name(),
            key = key,
            value = value,
            mode = %config.mode(),
            previous_mode = %before,
            "Policy config updated"
        );
        Ok(())
    }

    /// Back to the declared defaults
    pub fn reset_config(&self) {
        *self.config.write() = self.defaults.clone();
        info!(policy = self.name(), "Policy config reset to defaults");
    }

    pub fn reset_state(&self) {
        self.inner.reset_state();
        info!(policy = self.name(), "Policy state reset");
    }

    pub fn describe(&self) -> PolicyDescription {
        PolicyDescription {
            name: self.name(),
            mode: self.mode(),
            required_tenant_types: self.required_tenant_types.clone(),
            config: self.config(),
            definitions: self.definitions.clone(),
            tracked_keys: self.inner.tracked_keys(),
        }
    }

    pub(crate) fn inner(&self) -> &dyn AllocationPolicy {
        self.inner.as_ref()
    }
}

impl std::fmt::Debug for ConfiguredPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfiguredPolicy")
            .field("name", &self.name())
            .field("required_tenant_types", &self.required_tenant_types)
            .field("config", &*self.config.read())
            .finish()
    }
}

fn find_definition<'a>(
    definitions: &'a [ConfigDefinition],
    policy: &str,
    key: &str,
) -> Result<&'a ConfigDefinition> {
    definitions
        .iter()
        .find(|d| d.name == key)
        .ok_or_else(|| PolicyError::UnknownConfigKey {
            policy: policy.to_string(),
            key: key.to_string(),
        })
}
