//! Sharding rule
//!
//! Compiles a [`ShardingRuleConfig`] into its runtime form: every logic
//! table mapped to its expanded physical data nodes, with strategies bound
//! to built algorithms. Compilation fails on the first dangling data source
//! or algorithm reference.

use crate::algorithm::{GeneratedKey, KeyGenerator, ShardingAlgorithm, ShardingValue};
use crate::inline;
use shardgate_common::{
    Error, Result, ShardingRuleConfig, ShardingStrategyConfig, ShardingTableRuleConfig,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// One physical table on one data source
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataNode {
    pub data_source: String,
    pub table: String,
}

impl DataNode {
    pub fn new(data_source: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            data_source: data_source.into(),
            table: table.into(),
        }
    }

    /// Parse `data_source.table`
    pub fn parse(node: &str) -> Result<Self> {
        match node.trim().split_once('.') {
            Some((ds, table)) if !ds.is_empty() && !table.is_empty() && !table.contains('.') => {
                Ok(Self::new(ds, table))
            }
            _ => Err(Error::configuration(format!(
                "invalid data node '{node}', expected 'data_source.table'"
            ))),
        }
    }
}

impl fmt::Debug for DataNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataNode({self})")
    }
}

impl fmt::Display for DataNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.data_source, self.table)
    }
}

/// Strategy bound to a built algorithm
#[derive(Clone, Debug)]
pub struct ShardingStrategy {
    pub sharding_column: String,
    pub algorithm_name: String,
    algorithm: Arc<ShardingAlgorithm>,
}

impl ShardingStrategy {
    fn bind(
        rule: &str,
        config: &ShardingStrategyConfig,
        algorithms: &BTreeMap<String, Arc<ShardingAlgorithm>>,
    ) -> Result<Self> {
        let algorithm = algorithms
            .get(&config.sharding_algorithm_name)
            .cloned()
            .ok_or_else(|| Error::UnknownAlgorithm {
                rule: rule.to_string(),
                name: config.sharding_algorithm_name.clone(),
            })?;
        Ok(Self {
            sharding_column: config.sharding_column.clone(),
            algorithm_name: config.sharding_algorithm_name.clone(),
            algorithm,
        })
    }

    fn narrow<'a>(&self, candidates: Vec<&'a str>, values: &BTreeMap<String, ShardingValue>) -> Vec<&'a str> {
        match values.get(&self.sharding_column) {
            Some(value) => self
                .algorithm
                .do_sharding(&candidates, value)
                .into_iter()
                .collect(),
            None => candidates,
        }
    }
}

/// Runtime form of one sharded logic table
#[derive(Debug)]
pub struct TableRule {
    pub logic_table: String,
    pub actual_data_nodes: Vec<DataNode>,
    pub database_strategy: Option<ShardingStrategy>,
    pub table_strategy: Option<ShardingStrategy>,
    key_generator: Option<(String, Arc<KeyGenerator>)>,
}

impl TableRule {
    /// Data source names in first-appearance order
    pub fn data_source_names(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.actual_data_nodes
            .iter()
            .map(|n| n.data_source.as_str())
            .filter(|ds| seen.insert(*ds))
            .collect()
    }

    /// Column filled by the key generator, if any
    pub fn generate_key_column(&self) -> Option<&str> {
        self.key_generator.as_ref().map(|(column, _)| column.as_str())
    }
}

/// Compiled sharding rule
#[derive(Debug)]
pub struct ShardingRule {
    table_rules: BTreeMap<String, TableRule>,
    binding_table_groups: Vec<BTreeSet<String>>,
    broadcast_tables: BTreeSet<String>,
    algorithm_names: Vec<String>,
}

impl ShardingRule {
    /// Compile `config`, resolving data nodes against `data_sources`
    pub fn compile(config: &ShardingRuleConfig, data_sources: &BTreeSet<String>) -> Result<Self> {
        let algorithms = config
            .sharding_algorithms
            .iter()
            .map(|(name, algorithm)| Ok((name.clone(), Arc::new(ShardingAlgorithm::build(name, algorithm)?))))
            .collect::<Result<BTreeMap<_, _>>>()?;
        let key_generators = config
            .key_generators
            .iter()
            .map(|(name, generator)| Ok((name.clone(), Arc::new(KeyGenerator::build(name, generator)?))))
            .collect::<Result<BTreeMap<_, _>>>()?;

        let mut table_rules = BTreeMap::new();
        for table in &config.tables {
            let rule = compile_table(config, table, data_sources, &algorithms, &key_generators)?;
            if table_rules.insert(table.logic_table.to_lowercase(), rule).is_some() {
                return Err(Error::configuration(format!(
                    "logic table '{}' is configured twice",
                    table.logic_table
                )));
            }
        }

        let mut binding_table_groups = Vec::with_capacity(config.binding_tables.len());
        for group in &config.binding_tables {
            let tables: BTreeSet<String> = group
                .split(',')
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect();
            if let Some(missing) = tables.iter().find(|t| !table_rules.contains_key(*t)) {
                return Err(Error::configuration(format!(
                    "binding table '{missing}' is not a sharded logic table"
                )));
            }
            binding_table_groups.push(tables);
        }

        Ok(Self {
            table_rules,
            binding_table_groups,
            broadcast_tables: config
                .broadcast_tables
                .iter()
                .map(|t| t.to_lowercase())
                .collect(),
            algorithm_names: algorithms.into_keys().collect(),
        })
    }

    /// All table rules keyed by lower-cased logic table
    pub fn table_rules(&self) -> &BTreeMap<String, TableRule> {
        &self.table_rules
    }

    /// Find the table rule of a logic table (case-insensitive)
    pub fn find_table_rule(&self, logic_table: &str) -> Option<&TableRule> {
        self.table_rules.get(&logic_table.to_lowercase())
    }

    /// Names of the built sharding algorithms
    pub fn algorithm_names(&self) -> &[String] {
        &self.algorithm_names
    }

    /// Every data source name referenced by a data node
    pub fn data_source_names(&self) -> BTreeSet<&str> {
        self.table_rules
            .values()
            .flat_map(|t| t.actual_data_nodes.iter().map(|n| n.data_source.as_str()))
            .collect()
    }

    #[must_use]
    pub fn is_broadcast_table(&self, table: &str) -> bool {
        self.broadcast_tables.contains(&table.to_lowercase())
    }

    /// Check whether two logic tables belong to the same binding group
    #[must_use]
    pub fn is_binding(&self, a: &str, b: &str) -> bool {
        let (a, b) = (a.to_lowercase(), b.to_lowercase());
        self.binding_table_groups
            .iter()
            .any(|g| g.contains(&a) && g.contains(&b))
    }

    /// Route a logic table given sharding column values.
    ///
    /// Strategies whose column has no value leave their candidates as is,
    /// so an empty `values` map routes to every data node. Returns `None`
    /// for tables this rule does not shard.
    pub fn route(
        &self,
        logic_table: &str,
        values: &BTreeMap<String, ShardingValue>,
    ) -> Option<Vec<DataNode>> {
        let rule = self.find_table_rule(logic_table)?;
        let data_sources = match &rule.database_strategy {
            Some(strategy) => strategy.narrow(rule.data_source_names(), values),
            None => rule.data_source_names(),
        };
        let mut nodes = Vec::new();
        for ds in data_sources {
            let tables: Vec<&str> = rule
                .actual_data_nodes
                .iter()
                .filter(|n| n.data_source == ds)
                .map(|n| n.table.as_str())
                .collect();
            let tables = match &rule.table_strategy {
                Some(strategy) => strategy.narrow(tables, values),
                None => tables,
            };
            nodes.extend(tables.into_iter().map(|t| DataNode::new(ds, t)));
        }
        Some(nodes)
    }

    /// Generate a key for the logic table's key column
    pub fn generate_key(&self, logic_table: &str) -> Option<(&str, GeneratedKey)> {
        let (column, generator) = self.find_table_rule(logic_table)?.key_generator.as_ref()?;
        Some((column.as_str(), generator.generate()))
    }
}

fn compile_table(
    config: &ShardingRuleConfig,
    table: &ShardingTableRuleConfig,
    data_sources: &BTreeSet<String>,
    algorithms: &BTreeMap<String, Arc<ShardingAlgorithm>>,
    key_generators: &BTreeMap<String, Arc<KeyGenerator>>,
) -> Result<TableRule> {
    let rule = table.logic_table.as_str();
    let actual_data_nodes = inline::expand(&table.actual_data_nodes)?
        .iter()
        .map(|node| DataNode::parse(node))
        .collect::<Result<Vec<_>>>()?;
    if let Some(node) = actual_data_nodes
        .iter()
        .find(|n| !data_sources.contains(&n.data_source))
    {
        return Err(Error::UnknownDataSource {
            rule: rule.to_string(),
            data_source: node.data_source.clone(),
        });
    }

    let database_strategy = table
        .database_strategy
        .as_ref()
        .or(config.default_database_strategy.as_ref())
        .map(|s| ShardingStrategy::bind(rule, s, algorithms))
        .transpose()?;
    let table_strategy = table
        .table_strategy
        .as_ref()
        .or(config.default_table_strategy.as_ref())
        .map(|s| ShardingStrategy::bind(rule, s, algorithms))
        .transpose()?;
    let key_generator = table
        .key_generate_strategy
        .as_ref()
        .map(|s| {
            key_generators
                .get(&s.key_generator_name)
                .map(|g| (s.column.clone(), Arc::clone(g)))
                .ok_or_else(|| Error::UnknownAlgorithm {
                    rule: rule.to_string(),
                    name: s.key_generator_name.clone(),
                })
        })
        .transpose()?;

    Ok(TableRule {
        logic_table: table.logic_table.clone(),
        actual_data_nodes,
        database_strategy,
        table_strategy,
        key_generator,
    })
}
