// SPDX-License-Identifier: Apache-2.0

//! Errors for the config crate.

/// Errors surfaced while parsing or validating an [`crate::EngineConfig`].
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The YAML document could not be deserialized into `EngineConfig`.
    #[error("failed to parse engine config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The document parsed but two or more options are mutually
    /// inconsistent.
    #[error("inconsistent engine config: {reason}")]
    Inconsistent {
        /// Human-readable description of which options conflict.
        reason: String,
    },
}
