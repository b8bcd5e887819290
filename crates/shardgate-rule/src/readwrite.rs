//! Read/write splitting rule
//!
//! Each group exposes a logical data source name that routes writes to one
//! physical data source and reads to a load-balanced set of replicas.

use crate::algorithm::LoadBalanceAlgorithm;
use shardgate_common::{Error, ReadwriteSplittingRuleConfig, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Runtime form of one read/write splitting group
#[derive(Debug)]
pub struct ReadwriteSplittingDataSourceRule {
    pub name: String,
    pub write_data_source: String,
    pub read_data_sources: Vec<String>,
    pub load_balancer_name: String,
    load_balancer: Arc<LoadBalanceAlgorithm>,
}

impl ReadwriteSplittingDataSourceRule {
    /// Pick a read data source, skipping disabled ones.
    ///
    /// Falls back to the write data source when every read data source is
    /// disabled (or none is configured).
    pub fn route_read(&self, is_disabled: impl Fn(&str) -> bool) -> &str {
        let enabled: Vec<&str> = self
            .read_data_sources
            .iter()
            .map(String::as_str)
            .filter(|ds| !is_disabled(ds))
            .collect();
        self.load_balancer
            .select(&enabled)
            .unwrap_or(self.write_data_source.as_str())
    }

    /// Load balancer bound to this group
    pub fn load_balancer(&self) -> &LoadBalanceAlgorithm {
        &self.load_balancer
    }
}

/// Compiled read/write splitting rule
#[derive(Debug)]
pub struct ReadwriteSplittingRule {
    data_source_rules: BTreeMap<String, ReadwriteSplittingDataSourceRule>,
}

impl ReadwriteSplittingRule {
    /// Compile `config`, resolving write and read data sources against
    /// the physical `data_sources`
    pub fn compile(config: &ReadwriteSplittingRuleConfig, data_sources: &BTreeSet<String>) -> Result<Self> {
        let load_balancers = config
            .load_balancers
            .iter()
            .map(|(name, algorithm)| {
                Ok((name.clone(), Arc::new(LoadBalanceAlgorithm::build(name, algorithm)?)))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        let mut data_source_rules = BTreeMap::new();
        for group in &config.data_sources {
            let referenced = std::iter::once(&group.write_data_source_name)
                .chain(group.read_data_source_names.iter());
            for ds in referenced {
                if !data_sources.contains(ds) {
                    return Err(Error::UnknownDataSource {
                        rule: group.name.clone(),
                        data_source: ds.clone(),
                    });
                }
            }
            let load_balancer = if group.load_balancer_name.is_empty() {
                Arc::new(LoadBalanceAlgorithm::round_robin())
            } else {
                load_balancers
                    .get(&group.load_balancer_name)
                    .cloned()
                    .ok_or_else(|| Error::UnknownAlgorithm {
                        rule: group.name.clone(),
                        name: group.load_balancer_name.clone(),
                    })?
            };
            let rule = ReadwriteSplittingDataSourceRule {
                name: group.name.clone(),
                write_data_source: group.write_data_source_name.clone(),
                read_data_sources: group.read_data_source_names.clone(),
                load_balancer_name: group.load_balancer_name.clone(),
                load_balancer,
            };
            if data_source_rules.insert(group.name.clone(), rule).is_some() {
                return Err(Error::configuration(format!(
                    "read/write splitting group '{}' is configured twice",
                    group.name
                )));
            }
        }
        Ok(Self { data_source_rules })
    }

    /// Logical data source names exposed by this rule
    pub fn logical_data_sources(&self) -> impl Iterator<Item = &str> {
        self.data_source_rules.keys().map(String::as_str)
    }

    /// Find a group by logical name
    pub fn find_data_source_rule(&self, name: &str) -> Option<&ReadwriteSplittingDataSourceRule> {
        self.data_source_rules.get(name)
    }

    /// All groups keyed by logical name
    pub fn data_source_rules(&self) -> &BTreeMap<String, ReadwriteSplittingDataSourceRule> {
        &self.data_source_rules
    }

    /// Logical name → physical write and read data sources
    pub fn data_source_mapper(&self) -> BTreeMap<&str, Vec<&str>> {
        self.data_source_rules
            .values()
            .map(|rule| {
                let physical = std::iter::once(rule.write_data_source.as_str())
                    .chain(rule.read_data_sources.iter().map(String::as_str))
                    .collect();
                (rule.name.as_str(), physical)
            })
            .collect()
    }

    /// Every physical data source referenced by a group
    pub fn data_source_names(&self) -> BTreeSet<&str> {
        self.data_source_mapper().into_values().flatten().collect()
    }
}
