//! Core type definitions for shardgate
//!
//! This module defines the fundamental types used throughout the system
//! including schema names, data-source descriptors and governance keys.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Logic schema name used when none is configured
pub const DEFAULT_SCHEMA: &str = "logic_db";

/// Connection pool sizing for a physical data source
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PoolSizing {
    /// Maximum number of pooled connections
    pub max_size: u32,
    /// Minimum number of idle connections kept open
    pub min_idle: u32,
    /// Time to wait for a connection before failing (milliseconds)
    pub connection_timeout_ms: u64,
    /// Idle connection eviction timeout (milliseconds)
    pub idle_timeout_ms: u64,
}

impl Default for PoolSizing {
    fn default() -> Self {
        Self {
            max_size: 50,
            min_idle: 1,
            connection_timeout_ms: 30_000,
            idle_timeout_ms: 60_000,
        }
    }
}

/// Connection descriptor for one physical data source.
///
/// Equality is structural: two descriptors with the same driver, endpoint,
/// credentials, sizing and props are the same data source, which lets a
/// renewal keep the existing pool instead of reopening it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DataSourceConfig {
    /// Driver identity (e.g. "h2", "mysql", "postgresql")
    pub driver: String,
    /// Endpoint URL
    pub url: String,
    /// User name
    #[serde(default)]
    pub username: String,
    /// Password
    #[serde(default)]
    pub password: String,
    /// Pool sizing
    #[serde(default)]
    pub pool: PoolSizing,
    /// Driver specific properties
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub props: BTreeMap<String, String>,
}

impl DataSourceConfig {
    /// Create a descriptor with default pool sizing
    pub fn new(driver: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            url: url.into(),
            username: String::new(),
            password: String::new(),
            pool: PoolSizing::default(),
            props: BTreeMap::new(),
        }
    }

    /// Set credentials
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set pool sizing
    #[must_use]
    pub fn with_pool(mut self, pool: PoolSizing) -> Self {
        self.pool = pool;
        self
    }

    /// Add a driver property
    #[must_use]
    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }
}

/// Data source descriptors keyed by data source name
pub type DataSourceMap = BTreeMap<String, DataSourceConfig>;

/// Governance key addressing one data source of one schema.
///
/// Rendered as `schema.data_source`, which is how the registry's state
/// channel names disabled data sources.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{schema}.{data_source}")]
pub struct GovernanceSchema {
    pub schema: String,
    pub data_source: String,
}

impl GovernanceSchema {
    /// Create a governance key
    pub fn new(schema: impl Into<String>, data_source: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            data_source: data_source.into(),
        }
    }

    /// Parse a `schema.data_source` key
    pub fn parse(value: &str) -> Result<Self, GovernanceSchemaError> {
        let (schema, data_source) = value
            .split_once('.')
            .ok_or_else(|| GovernanceSchemaError::MissingSeparator(value.to_string()))?;
        if schema.is_empty() {
            return Err(GovernanceSchemaError::EmptySchema);
        }
        if data_source.is_empty() {
            return Err(GovernanceSchemaError::EmptyDataSource);
        }
        Ok(Self::new(schema, data_source))
    }
}

impl fmt::Debug for GovernanceSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GovernanceSchema({self})")
    }
}

/// Errors that can occur when parsing a governance key
#[derive(Debug, Clone, thiserror::Error)]
pub enum GovernanceSchemaError {
    #[error("governance key must look like 'schema.data_source': {0}")]
    MissingSeparator(String),
    #[error("governance key has an empty schema name")]
    EmptySchema,
    #[error("governance key has an empty data source name")]
    EmptyDataSource,
}
