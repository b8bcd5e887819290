//! Immutable per-schema metadata snapshots

use crate::pool::{PhysicalConnection, PooledDataSource};
use serde::Serialize;
use shardgate_common::{DataSourceMap, Error, Result, RuleConfig};
use shardgate_rule::Rule;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// One published view of a schema: data sources with their live pools,
/// the ordered rule configurations and the rules compiled from them.
///
/// A snapshot is never mutated. Renewals build a new one that shares the
/// unchanged parts (pools, compiled rules) with its predecessor.
#[derive(Debug)]
pub struct MetadataContext {
    schema: String,
    version: u64,
    data_sources: BTreeMap<String, Arc<PooledDataSource>>,
    rule_configs: Arc<[RuleConfig]>,
    rules: Arc<[Rule]>,
}

impl MetadataContext {
    pub(crate) fn new(
        schema: impl Into<String>,
        version: u64,
        data_sources: BTreeMap<String, Arc<PooledDataSource>>,
        rule_configs: Arc<[RuleConfig]>,
        rules: Arc<[Rule]>,
    ) -> Self {
        Self {
            schema: schema.into(),
            version,
            data_sources,
            rule_configs,
            rules,
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Monotonic per-schema version, starting at 1
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Physical data sources with their pools
    pub const fn data_sources(&self) -> &BTreeMap<String, Arc<PooledDataSource>> {
        &self.data_sources
    }

    pub fn data_source(&self, name: &str) -> Option<&Arc<PooledDataSource>> {
        self.data_sources.get(name)
    }

    /// Descriptors of the physical data sources
    pub fn data_source_configs(&self) -> DataSourceMap {
        self.data_sources
            .iter()
            .map(|(name, pool)| (name.clone(), pool.config().clone()))
            .collect()
    }

    pub fn data_source_names(&self) -> BTreeSet<String> {
        self.data_sources.keys().cloned().collect()
    }

    pub fn rule_configs(&self) -> &[RuleConfig] {
        &self.rule_configs
    }

    pub(crate) fn shared_rule_configs(&self) -> Arc<[RuleConfig]> {
        Arc::clone(&self.rule_configs)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub(crate) fn shared_rules(&self) -> Arc<[Rule]> {
        Arc::clone(&self.rules)
    }

    /// Whether `name` is a physical data source or a read/write splitting
    /// group of this snapshot
    pub fn contains_data_source(&self, name: &str) -> bool {
        self.data_sources.contains_key(name)
            || self
                .rules
                .iter()
                .filter_map(Rule::as_readwrite_splitting)
                .any(|rule| rule.find_data_source_rule(name).is_some())
    }

    /// Check out a connection from a physical data source
    pub fn physical_connection(&self, name: &str) -> Result<PhysicalConnection> {
        self.data_sources
            .get(name)
            .ok_or_else(|| Error::UnknownDataSource {
                rule: self.schema.clone(),
                data_source: name.to_string(),
            })?
            .connection()
    }

    /// Serializable summary for logs and tooling
    pub fn summary(&self) -> MetadataSummary {
        MetadataSummary {
            schema: self.schema.clone(),
            version: self.version,
            data_sources: self.data_sources.keys().cloned().collect(),
            rules: self.rules.iter().map(Rule::kind).collect(),
        }
    }
}

/// Serializable view of a snapshot
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MetadataSummary {
    pub schema: String,
    pub version: u64,
    pub data_sources: Vec<String>,
    pub rules: Vec<&'static str>,
}
