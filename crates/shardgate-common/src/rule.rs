//! Rule configuration types
//!
//! Rule configurations are the raw, declarative form of routing rules as
//! they arrive from bootstrap files or the registry center. They form a
//! closed set: sharding and read/write splitting. Compilation into the
//! runtime form happens in `shardgate-rule`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Typed algorithm reference: `{type, props}`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    /// Algorithm type (e.g. "INLINE", "MOD", "ROUND_ROBIN")
    #[serde(rename = "type")]
    pub algorithm_type: String,
    /// Algorithm properties
    #[serde(default)]
    pub props: BTreeMap<String, String>,
}

impl AlgorithmConfig {
    /// Create an algorithm config without props
    pub fn new(algorithm_type: impl Into<String>) -> Self {
        Self {
            algorithm_type: algorithm_type.into(),
            props: BTreeMap::new(),
        }
    }

    /// Add a property
    #[must_use]
    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }
}

/// One routing rule configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RuleConfig {
    /// Logical table → physical data nodes distribution
    Sharding(ShardingRuleConfig),
    /// Logical group → write + read data sources
    ReadwriteSplitting(ReadwriteSplittingRuleConfig),
}

impl RuleConfig {
    /// Short label for logs and errors
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Sharding(_) => "sharding",
            Self::ReadwriteSplitting(_) => "readwrite-splitting",
        }
    }
}

impl From<ShardingRuleConfig> for RuleConfig {
    fn from(config: ShardingRuleConfig) -> Self {
        Self::Sharding(config)
    }
}

impl From<ReadwriteSplittingRuleConfig> for RuleConfig {
    fn from(config: ReadwriteSplittingRuleConfig) -> Self {
        Self::ReadwriteSplitting(config)
    }
}

/// Sharding rule configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ShardingRuleConfig {
    /// Sharded logic tables
    pub tables: Vec<ShardingTableRuleConfig>,
    /// Binding table groups, each a comma separated list of logic tables
    pub binding_tables: Vec<String>,
    /// Tables present on every data source
    pub broadcast_tables: Vec<String>,
    /// Database strategy used when a table declares none
    pub default_database_strategy: Option<ShardingStrategyConfig>,
    /// Table strategy used when a table declares none
    pub default_table_strategy: Option<ShardingStrategyConfig>,
    /// Named sharding algorithms
    pub sharding_algorithms: BTreeMap<String, AlgorithmConfig>,
    /// Named key generators
    pub key_generators: BTreeMap<String, AlgorithmConfig>,
}

impl ShardingRuleConfig {
    /// Add a table rule
    #[must_use]
    pub fn with_table(mut self, table: ShardingTableRuleConfig) -> Self {
        self.tables.push(table);
        self
    }

    /// Register a sharding algorithm
    #[must_use]
    pub fn with_algorithm(mut self, name: impl Into<String>, algorithm: AlgorithmConfig) -> Self {
        self.sharding_algorithms.insert(name.into(), algorithm);
        self
    }

    /// Register a key generator
    #[must_use]
    pub fn with_key_generator(mut self, name: impl Into<String>, algorithm: AlgorithmConfig) -> Self {
        self.key_generators.insert(name.into(), algorithm);
        self
    }
}

/// Sharding configuration of one logic table
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ShardingTableRuleConfig {
    /// Logic table name
    pub logic_table: String,
    /// Inline expression of `data_source.table` nodes
    pub actual_data_nodes: String,
    #[serde(default)]
    pub database_strategy: Option<ShardingStrategyConfig>,
    #[serde(default)]
    pub table_strategy: Option<ShardingStrategyConfig>,
    #[serde(default)]
    pub key_generate_strategy: Option<KeyGenerateStrategyConfig>,
}

impl ShardingTableRuleConfig {
    /// Create a table rule without strategies
    pub fn new(logic_table: impl Into<String>, actual_data_nodes: impl Into<String>) -> Self {
        Self {
            logic_table: logic_table.into(),
            actual_data_nodes: actual_data_nodes.into(),
            database_strategy: None,
            table_strategy: None,
            key_generate_strategy: None,
        }
    }

    /// Set the database strategy
    #[must_use]
    pub fn with_database_strategy(mut self, strategy: ShardingStrategyConfig) -> Self {
        self.database_strategy = Some(strategy);
        self
    }

    /// Set the table strategy
    #[must_use]
    pub fn with_table_strategy(mut self, strategy: ShardingStrategyConfig) -> Self {
        self.table_strategy = Some(strategy);
        self
    }

    /// Set the key generate strategy
    #[must_use]
    pub fn with_key_generate_strategy(mut self, strategy: KeyGenerateStrategyConfig) -> Self {
        self.key_generate_strategy = Some(strategy);
        self
    }
}

/// Standard single-column sharding strategy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ShardingStrategyConfig {
    pub sharding_column: String,
    pub sharding_algorithm_name: String,
}

impl ShardingStrategyConfig {
    pub fn new(sharding_column: impl Into<String>, sharding_algorithm_name: impl Into<String>) -> Self {
        Self {
            sharding_column: sharding_column.into(),
            sharding_algorithm_name: sharding_algorithm_name.into(),
        }
    }
}

/// Key generation strategy of a logic table
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct KeyGenerateStrategyConfig {
    pub column: String,
    pub key_generator_name: String,
}

impl KeyGenerateStrategyConfig {
    pub fn new(column: impl Into<String>, key_generator_name: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            key_generator_name: key_generator_name.into(),
        }
    }
}

/// Read/write splitting rule configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ReadwriteSplittingRuleConfig {
    /// Logical data source groups
    pub data_sources: Vec<ReadwriteSplittingDataSourceConfig>,
    /// Named load balance algorithms
    pub load_balancers: BTreeMap<String, AlgorithmConfig>,
}

impl ReadwriteSplittingRuleConfig {
    /// Add a data source group
    #[must_use]
    pub fn with_data_source(mut self, group: ReadwriteSplittingDataSourceConfig) -> Self {
        self.data_sources.push(group);
        self
    }

    /// Register a load balancer
    #[must_use]
    pub fn with_load_balancer(mut self, name: impl Into<String>, algorithm: AlgorithmConfig) -> Self {
        self.load_balancers.insert(name.into(), algorithm);
        self
    }
}

/// One logical read/write splitting group
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReadwriteSplittingDataSourceConfig {
    /// Logical data source name exposed to sharding rules
    pub name: String,
    pub write_data_source_name: String,
    pub read_data_source_names: Vec<String>,
    /// Load balancer name; empty selects round robin
    #[serde(default)]
    pub load_balancer_name: String,
}

impl ReadwriteSplittingDataSourceConfig {
    pub fn new(
        name: impl Into<String>,
        write_data_source_name: impl Into<String>,
        read_data_source_names: Vec<String>,
        load_balancer_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            write_data_source_name: write_data_source_name.into(),
            read_data_source_names,
            load_balancer_name: load_balancer_name.into(),
        }
    }
}
