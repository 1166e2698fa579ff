//! Runtime configuration of a policy.
//!
//! Every policy carries the three mode switches below plus its own numeric
//! limits. All values are integers; the switches are 0 or 1.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{PolicyError, Result};

pub const IS_ACTIVE: &str = "is_active";
pub const IS_ENFORCED: &str = "is_enforced";
pub const IS_MANDATORY: &str = "is_mandatory";

/// One tunable of a policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub default: i64,
}

impl ConfigDefinition {
    pub const fn new(name: &'static str, description: &'static str, default: i64) -> Self {
        Self {
            name,
            description,
            default,
        }
    }

    fn is_switch(&self) -> bool {
        matches!(self.name, IS_ACTIVE | IS_ENFORCED | IS_MANDATORY)
    }

    /// Check a candidate value for this key
    pub fn validate(&self, policy: &str, value: i64) -> Result<()> {
        let reason = if self.is_switch() && !(value == 0 || value == 1) {
            "must be 0 or 1"
        } else if value < 0 {
            "must not be negative"
        } else {
            return Ok(());
        };
        Err(PolicyError::InvalidConfigValue {
            policy: policy.to_string(),
            key: self.name.to_string(),
            value,
            reason: reason.to_string(),
        })
    }
}

/// Definitions shared by every policy
pub fn common_config_definitions() -> Vec<ConfigDefinition> {
    vec![
        ConfigDefinition::new(IS_ACTIVE, "Whether the policy is evaluated at all", 1),
        ConfigDefinition::new(
            IS_ENFORCED,
            "Whether decisions are applied (1) or only logged as a dry run (0)",
            1,
        ),
        ConfigDefinition::new(
            IS_MANDATORY,
            "Reject queries missing the tenant dimensions this policy requires",
            0,
        ),
    ]
}

/// Evaluation mode derived from the switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    Inactive,
    Enforced,
    DryRun,
}

impl PolicyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyMode::Inactive => "inactive",
            PolicyMode::Enforced => "enforced",
            PolicyMode::DryRun => "dry_run",
        }
    }
}

impl fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current values of every config key of a policy
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct PolicyConfig {
    values: BTreeMap<String, i64>,
}

impl PolicyConfig {
    /// Defaults of `definitions`
    pub fn from_definitions(definitions: &[ConfigDefinition]) -> Self {
        Self {
            values: definitions
                .iter()
                .map(|d| (d.name.to_string(), d.default))
                .collect(),
        }
    }

    /// Value of a key; unknown keys read as 0
    pub fn get(&self, key: &str) -> i64 {
        self.values.get(key).copied().unwrap_or(0)
    }

    /// Non-negative limit as u64
    pub fn limit(&self, key: &str) -> u64 {
        self.get(key).max(0) as u64
    }

    pub fn set(&mut self, key: impl Into<String>, value: i64) {
        self.values.insert(key.into(), value);
    }

    pub fn is_active(&self) -> bool {
        self.get(IS_ACTIVE) == 1
    }

    pub fn is_enforced(&self) -> bool {
        self.get(IS_ENFORCED) == 1
    }

    pub fn is_mandatory(&self) -> bool {
        self.get(IS_MANDATORY) == 1
    }

    pub fn mode(&self) -> PolicyMode {
        match (self.is_active(), self.is_enforced()) {
            (false, _) => PolicyMode::Inactive,
            (true, true) => PolicyMode::Enforced,
            (true, false) => PolicyMode::DryRun,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
