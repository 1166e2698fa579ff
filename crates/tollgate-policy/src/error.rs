//! Error types for allocation policies.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    /// No policy is registered under this name
    #[error("Unknown allocation policy '{0}'")]
    UnknownPolicy(String),

    /// A policy's declaration (args) is invalid
    #[error("Invalid policy configuration: {0}")]
    InvalidConfig(String),

    /// The config key is not one of the policy's definitions
    #[error("Policy '{policy}' has no config '{key}'")]
    UnknownConfigKey { policy: String, key: String },

    /// The value is out of range for this config key
    #[error("Invalid value {value} for '{key}' on policy '{policy}': {reason}")]
    InvalidConfigValue {
        policy: String,
        key: String,
        value: i64,
        reason: String,
    },

    /// The dataset has no policy with this name
    #[error("Policy '{0}' is not part of this chain")]
    PolicyNotFound(String),
}

/// A specialized Result type for policy operations.
pub type Result<T> = std::result::Result<T, PolicyError>;
