//! Tenant identity attached to every query
//!
//! A [`TenantContext`] is supplied by the caller, never mutated while the
//! request runs, and is what allocation policies key their state on.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::validation::{validate_identifier, validate_referrer};
use crate::{Result, SchemaError};

/// A dimension of tenant identity a policy can require
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TenantDimension {
    OrganizationId,
    ProjectId,
    Referrer,
    /// Any other caller-supplied dimension (`use_case_id`, `cross_org_query`, ...)
    Other(String),
}

impl fmt::Display for TenantDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantDimension::OrganizationId => write!(f, "organization_id"),
            TenantDimension::ProjectId => write!(f, "project_id"),
            TenantDimension::Referrer => write!(f, "referrer"),
            TenantDimension::Other(name) => write!(f, "{}", name),
        }
    }
}

impl std::str::FromStr for TenantDimension {
    type Err = SchemaError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "organization_id" => Ok(TenantDimension::OrganizationId),
            "project_id" => Ok(TenantDimension::ProjectId),
            "referrer" => Ok(TenantDimension::Referrer),
            other => {
                validate_identifier(other)?;
                Ok(TenantDimension::Other(other.to_string()))
            }
        }
    }
}

impl Serialize for TenantDimension {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TenantDimension {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Per-request tenant identity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    /// Additional dimensions, passed through to policies as text
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl TenantContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_organization(mut self, organization_id: u64) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    pub fn with_project(mut self, project_id: u64) -> Self {
        self.project_id = Some(project_id);
        self
    }

    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }

    pub fn with_dimension(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }

    /// Value of a dimension as text, if present
    pub fn get(&self, dimension: &TenantDimension) -> Option<String> {
        match dimension {
            TenantDimension::OrganizationId => self.organization_id.map(|v| v.to_string()),
            TenantDimension::ProjectId => self.project_id.map(|v| v.to_string()),
            TenantDimension::Referrer => self.referrer.clone(),
            TenantDimension::Other(name) => match self.extra.get(name) {
                None | Some(serde_json::Value::Null) => None,
                Some(serde_json::Value::String(s)) => Some(s.clone()),
                Some(other) => Some(other.to_string()),
            },
        }
    }

    /// Check caller-supplied values before they are used as tenant keys
    pub fn validate(&self) -> Result<()> {
        if let Some(referrer) = &self.referrer {
            validate_referrer(referrer)?;
        }
        for name in self.extra.keys() {
            validate_identifier(name)?;
        }
        Ok(())
    }
}
