//! Error types for shardgate
//!
//! This module defines the common error types used throughout the system.

use crate::types::GovernanceSchemaError;
use thiserror::Error;

/// Common result type for shardgate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for shardgate
#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors (renewal validation)
    #[error("rule '{rule}' references unknown data source: {data_source}")]
    UnknownDataSource { rule: String, data_source: String },

    #[error("rule '{rule}' references unknown algorithm: {name}")]
    UnknownAlgorithm { rule: String, name: String },

    #[error("algorithm '{name}' has unknown type: {algorithm_type}")]
    UnknownAlgorithmType { name: String, algorithm_type: String },

    #[error("algorithm '{name}' has invalid props: {reason}")]
    InvalidAlgorithmProps { name: String, reason: String },

    #[error("invalid inline expression '{expression}': {reason}")]
    InvalidInlineExpression { expression: String, reason: String },

    #[error("invalid value for property '{key}': {value}")]
    InvalidProperty { key: String, value: String },

    #[error("data source '{data_source}' is still referenced by rule '{rule}'")]
    DataSourceInUse { rule: String, data_source: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    // Facade errors
    #[error("operation not supported: {0}")]
    OperationNotSupported(String),

    // Registry errors
    #[error("registry center unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("invalid governance schema: {0}")]
    InvalidGovernanceSchema(#[from] GovernanceSchemaError),

    // Metadata errors
    #[error("schema not found: {0}")]
    SchemaNotFound(String),

    #[error("schema already exists: {0}")]
    SchemaAlreadyExists(String),

    #[error("failed to open data source '{name}': {reason}")]
    DataSourceOpen { name: String, reason: String },

    #[error("metadata contexts are closed")]
    Closed,

    // Internal errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an operation-not-supported error
    pub fn not_supported(operation: impl Into<String>) -> Self {
        Self::OperationNotSupported(operation.into())
    }

    /// Create a registry unavailable error
    pub fn registry_unavailable(msg: impl Into<String>) -> Self {
        Self::RegistryUnavailable(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this error rejected a renewal during validation.
    ///
    /// Configuration errors never touch the published snapshot.
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownDataSource { .. }
                | Self::UnknownAlgorithm { .. }
                | Self::UnknownAlgorithmType { .. }
                | Self::InvalidAlgorithmProps { .. }
                | Self::InvalidInlineExpression { .. }
                | Self::InvalidProperty { .. }
                | Self::DataSourceInUse { .. }
                | Self::Configuration(_)
        )
    }

    /// Check if this error must abort process startup
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RegistryUnavailable(_))
    }

    /// Check if this is a retryable error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DataSourceOpen { .. })
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SchemaNotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            Self::Deserialization(e.to_string())
        } else {
            Self::Serialization(e.to_string())
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::Deserialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors() {
        assert!(
            Error::UnknownDataSource {
                rule: "readwrite-splitting".into(),
                data_source: "write_ds".into()
            }
            .is_configuration_error()
        );
        assert!(Error::configuration("bad").is_configuration_error());
        assert!(!Error::not_supported("getLoginTimeout").is_configuration_error());
    }

    #[test]
    fn test_error_fatal() {
        assert!(Error::registry_unavailable("localhost:2181").is_fatal());
        assert!(!Error::configuration("bad").is_fatal());
    }

    #[test]
    fn test_error_display_names_reference() {
        let err = Error::UnknownAlgorithm {
            rule: "pr_ds".into(),
            name: "roundRobin".into(),
        };
        assert_eq!(
            err.to_string(),
            "rule 'pr_ds' references unknown algorithm: roundRobin"
        );
    }
}
