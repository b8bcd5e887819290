//! Configuration types for shardgate
//!
//! This module defines the bootstrap configuration a facade is started
//! from: the operating mode, the registry center connection, and the
//! initial data sources, rules and properties of one logic schema.

use crate::error::{Error, Result};
use crate::rule::RuleConfig;
use crate::types::{DEFAULT_SCHEMA, DataSourceMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Root bootstrap configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BootstrapConfig {
    /// Logic schema name
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Operating mode
    #[serde(default)]
    pub mode: ModeConfig,
    /// Initial data sources
    #[serde(default)]
    pub data_sources: DataSourceMap,
    /// Initial ordered rule configurations
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    /// Initial global properties
    #[serde(default)]
    pub props: BTreeMap<String, String>,
    /// Renewal dispatch settings
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            schema: default_schema(),
            mode: ModeConfig::default(),
            data_sources: DataSourceMap::new(),
            rules: Vec::new(),
            props: BTreeMap::new(),
            dispatch: DispatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl BootstrapConfig {
    /// Parse a TOML bootstrap document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML bootstrap file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check structural consistency that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.schema.is_empty() {
            return Err(Error::configuration("schema name must not be empty"));
        }
        if self.mode.mode_type == ModeType::Cluster && self.mode.registry.is_none() {
            return Err(Error::configuration(
                "cluster mode requires a [mode.registry] section",
            ));
        }
        if self.dispatch.queue_capacity == 0 {
            return Err(Error::configuration("dispatch queue capacity must be positive"));
        }
        Ok(())
    }
}

/// Operating mode type
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModeType {
    /// Fixed configuration, no registry center
    #[default]
    #[serde(alias = "Memory")]
    Standalone,
    /// Registry-backed, dynamically renewed configuration
    Cluster,
}

/// Mode configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModeConfig {
    #[serde(rename = "type", default)]
    pub mode_type: ModeType,
    /// Registry center connection (cluster mode only)
    #[serde(default)]
    pub registry: Option<RegistryCenterConfig>,
    /// Push local configuration to the registry even if it already holds one
    #[serde(default)]
    pub overwrite: bool,
}

impl ModeConfig {
    /// Standalone mode
    #[must_use]
    pub fn standalone() -> Self {
        Self::default()
    }

    /// Cluster mode backed by `registry`
    #[must_use]
    pub fn cluster(registry: RegistryCenterConfig, overwrite: bool) -> Self {
        Self {
            mode_type: ModeType::Cluster,
            registry: Some(registry),
            overwrite,
        }
    }
}

/// Registry center connection descriptor
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RegistryCenterConfig {
    /// Repository type (e.g. "Memory")
    #[serde(rename = "type")]
    pub registry_type: String,
    /// Namespace isolating this deployment's keys
    pub namespace: String,
    /// Comma separated server list
    #[serde(default)]
    pub server_lists: String,
    /// Repository specific properties
    #[serde(default)]
    pub props: BTreeMap<String, String>,
}

impl RegistryCenterConfig {
    pub fn new(
        registry_type: impl Into<String>,
        namespace: impl Into<String>,
        server_lists: impl Into<String>,
    ) -> Self {
        Self {
            registry_type: registry_type.into(),
            namespace: namespace.into(),
            server_lists: server_lists.into(),
            props: BTreeMap::new(),
        }
    }
}

/// Renewal dispatch configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DispatchConfig {
    /// Capacity of each per-schema notification queue
    pub queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { queue_capacity: 64 }
    }
}

/// Logging configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CLUSTER_TOML: &str = r#"
schema = "logic_db"

[mode]
type = "Cluster"
overwrite = true

[mode.registry]
type = "Memory"
namespace = "test_name"
server-lists = "localhost:3181"

[data-sources.ds_0]
driver = "h2"
url = "jdbc:h2:mem:ds_0"
username = "sa"

[props]
sql-show = "true"
"#;

    #[test]
    fn test_default_config() {
        let config = BootstrapConfig::default();
        assert_eq!(config.schema, DEFAULT_SCHEMA);
        assert_eq!(config.mode.mode_type, ModeType::Standalone);
        assert_eq!(config.dispatch.queue_capacity, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_cluster_config() {
        let config = BootstrapConfig::from_toml_str(CLUSTER_TOML).unwrap();
        assert_eq!(config.mode.mode_type, ModeType::Cluster);
        assert!(config.mode.overwrite);
        let registry = config.mode.registry.unwrap();
        assert_eq!(registry.namespace, "test_name");
        assert_eq!(registry.server_lists, "localhost:3181");
        assert_eq!(config.data_sources.len(), 1);
        assert_eq!(config.props["sql-show"], "true");
    }

    #[test]
    fn test_memory_alias_is_standalone() {
        let config = BootstrapConfig::from_toml_str("[mode]\ntype = \"Memory\"\n").unwrap();
        assert_eq!(config.mode.mode_type, ModeType::Standalone);
    }

    #[test]
    fn test_cluster_without_registry_rejected() {
        let err = BootstrapConfig::from_toml_str("[mode]\ntype = \"Cluster\"\n").unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_parse_demo_config() {
        let config = BootstrapConfig::from_toml_str(include_str!("../../../demos/shardgate.toml")).unwrap();
        assert_eq!(config.data_sources.len(), 2);
        match &config.rules[..] {
            [RuleConfig::ReadwriteSplitting(rule)] => {
                assert_eq!(rule.data_sources[0].name, "pr_ds");
                assert_eq!(rule.load_balancers["roundRobin"].algorithm_type, "ROUND_ROBIN");
            }
            other => panic!("unexpected rules {other:?}"),
        }
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CLUSTER_TOML.as_bytes()).unwrap();
        let config = BootstrapConfig::load(file.path()).unwrap();
        assert_eq!(config.schema, "logic_db");
    }
}
