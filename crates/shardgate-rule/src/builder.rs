//! Compiling ordered rule configurations into runtime rules

use crate::readwrite::ReadwriteSplittingRule;
use crate::sharding::ShardingRule;
use shardgate_common::{Error, Result, RuleConfig};
use std::collections::BTreeSet;
use tracing::debug;

/// A compiled runtime rule
#[derive(Debug)]
pub enum Rule {
    Sharding(ShardingRule),
    ReadwriteSplitting(ReadwriteSplittingRule),
}

impl Rule {
    /// Stable kind name, matching [`RuleConfig::kind`]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Sharding(_) => "sharding",
            Self::ReadwriteSplitting(_) => "readwrite-splitting",
        }
    }

    /// Data source names this rule depends on, as `(owner, name)` pairs
    fn referenced_data_sources(&self) -> Vec<(String, String)> {
        match self {
            Self::Sharding(rule) => rule
                .table_rules()
                .values()
                .flat_map(|table| {
                    table
                        .data_source_names()
                        .into_iter()
                        .map(|ds| (table.logic_table.clone(), ds.to_string()))
                })
                .collect(),
            Self::ReadwriteSplitting(rule) => rule
                .data_source_mapper()
                .into_iter()
                .flat_map(|(group, physical)| {
                    physical
                        .into_iter()
                        .map(move |ds| (group.to_string(), ds.to_string()))
                })
                .collect(),
        }
    }

    /// Downcast helpers used by the routing layer
    pub const fn as_sharding(&self) -> Option<&ShardingRule> {
        match self {
            Self::Sharding(rule) => Some(rule),
            Self::ReadwriteSplitting(_) => None,
        }
    }

    pub const fn as_readwrite_splitting(&self) -> Option<&ReadwriteSplittingRule> {
        match self {
            Self::ReadwriteSplitting(rule) => Some(rule),
            Self::Sharding(_) => None,
        }
    }
}

/// Compile an ordered list of rule configurations against the physical
/// data source names.
///
/// Read/write splitting groups are compiled first so that the logical names
/// they expose can be referenced by sharding rules in the same batch. The
/// output keeps the input order. Any failure rejects the whole batch.
pub fn build_rules(configs: &[RuleConfig], data_sources: &BTreeSet<String>) -> Result<Vec<Rule>> {
    let mut resolvable = data_sources.clone();
    let mut readwrite = Vec::new();
    for config in configs {
        if let RuleConfig::ReadwriteSplitting(config) = config {
            let rule = ReadwriteSplittingRule::compile(config, data_sources)?;
            for logical in rule.logical_data_sources() {
                if data_sources.contains(logical) {
                    return Err(Error::configuration(format!(
                        "read/write splitting group '{logical}' shadows a physical data source"
                    )));
                }
                if !resolvable.insert(logical.to_string()) {
                    return Err(Error::configuration(format!(
                        "read/write splitting group '{logical}' is configured twice"
                    )));
                }
            }
            readwrite.push(rule);
        }
    }

    let mut readwrite = readwrite.into_iter();
    let mut rules = Vec::with_capacity(configs.len());
    for config in configs {
        let rule = match config {
            RuleConfig::Sharding(config) => Rule::Sharding(ShardingRule::compile(config, &resolvable)?),
            RuleConfig::ReadwriteSplitting(_) => Rule::ReadwriteSplitting(
                readwrite
                    .next()
                    .ok_or_else(|| Error::internal("read/write splitting rule count mismatch"))?,
            ),
        };
        rules.push(rule);
    }
    debug!("Compiled {} rules against {} data sources", rules.len(), data_sources.len());
    Ok(rules)
}

/// Check that `rules` only reference data sources present in
/// `data_sources` (physical) or exposed by a read/write splitting group.
///
/// Used when the data source map is replaced while the rule list stays.
/// A physical data source named like a read/write splitting group is
/// rejected, as [`build_rules`] would reject it.
pub fn validate_data_sources(rules: &[Rule], data_sources: &BTreeSet<String>) -> Result<()> {
    let logical: BTreeSet<String> = rules
        .iter()
        .filter_map(Rule::as_readwrite_splitting)
        .flat_map(|rule| rule.logical_data_sources().map(str::to_string))
        .collect();
    if let Some(shadowed) = logical.intersection(data_sources).next() {
        return Err(Error::configuration(format!(
            "read/write splitting group '{shadowed}' shadows a physical data source"
        )));
    }
    for rule in rules {
        for (owner, ds) in rule.referenced_data_sources() {
            if !data_sources.contains(&ds) && !logical.contains(&ds) {
                return Err(Error::DataSourceInUse {
                    rule: owner,
                    data_source: ds,
                });
            }
        }
    }
    Ok(())
}
