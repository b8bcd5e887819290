//! Rule renewal engine
//!
//! Turns one change plus the current snapshot into the next snapshot. The
//! engine never publishes anything; [`MetadataContexts`] owns publication.
//! Every method either returns a fully validated result or an error, so a
//! rejected change leaves no trace.
//!
//! [`MetadataContexts`]: crate::contexts::MetadataContexts

use crate::context::MetadataContext;
use crate::metrics::RenewalMetrics;
use crate::pool::{DataSourceFactory, PooledDataSource};
use shardgate_common::{ConfigurationProperties, DataSourceMap, Result, RuleConfig};
use shardgate_rule::{build_rules, validate_data_sources};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Pool work needed to move from the current data sources to a target map
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DataSourcePlan {
    /// Same name, identical descriptor: the pool is reused
    pub keep: Vec<String>,
    /// New name or changed descriptor: a pool is opened
    pub open: Vec<String>,
    /// Name absent from the target: the pool is released
    pub release: Vec<String>,
}

impl DataSourcePlan {
    /// Diff `current` pools against `target` descriptors
    pub fn diff(current: &BTreeMap<String, Arc<PooledDataSource>>, target: &DataSourceMap) -> Self {
        let mut plan = Self::default();
        for (name, config) in target {
            match current.get(name) {
                Some(pool) if pool.config() == config => plan.keep.push(name.clone()),
                _ => plan.open.push(name.clone()),
            }
        }
        plan.release = current
            .keys()
            .filter(|name| !target.contains_key(*name))
            .cloned()
            .collect();
        plan
    }

    /// No pool is opened or released
    pub fn is_noop(&self) -> bool {
        self.open.is_empty() && self.release.is_empty()
    }
}

/// Validates and compiles changes into new metadata
pub struct RuleRenewalEngine {
    factory: Arc<dyn DataSourceFactory>,
    metrics: Arc<RenewalMetrics>,
}

impl RuleRenewalEngine {
    pub fn new(factory: Arc<dyn DataSourceFactory>, metrics: Arc<RenewalMetrics>) -> Self {
        Self { factory, metrics }
    }

    /// Build the first snapshot of a schema
    pub async fn build(&self, schema: &str, data_sources: &DataSourceMap, rules: &[RuleConfig]) -> Result<MetadataContext> {
        let names: BTreeSet<String> = data_sources.keys().cloned().collect();
        let compiled = build_rules(rules, &names)?;
        let pools = self.open_all(data_sources, data_sources.keys(), &BTreeMap::new()).await?;
        Ok(MetadataContext::new(schema, 1, pools, rules.into(), compiled.into()))
    }

    /// Replace the ordered rule list of `current`.
    ///
    /// Rules may reference physical data sources of `current` and logical
    /// names exposed by read/write splitting groups of the same list.
    pub fn renew_rules(&self, current: &MetadataContext, rules: &[RuleConfig]) -> Result<Option<MetadataContext>> {
        if current.rule_configs() == rules {
            return Ok(None);
        }
        let compiled = build_rules(rules, &current.data_source_names())?;
        debug!(
            "Schema {} rules renewed: {} -> {}",
            current.schema(),
            current.rules().len(),
            compiled.len()
        );
        Ok(Some(MetadataContext::new(
            current.schema(),
            current.version() + 1,
            current.data_sources().clone(),
            rules.into(),
            compiled.into(),
        )))
    }

    /// Replace the data sources of `current`.
    ///
    /// The current rules must still resolve against the new map. Pools of
    /// unchanged descriptors are carried over; new ones are opened before
    /// anything is published, and dropped again if any open fails.
    pub async fn renew_data_sources(
        &self,
        current: &MetadataContext,
        data_sources: &DataSourceMap,
    ) -> Result<Option<MetadataContext>> {
        let plan = DataSourcePlan::diff(current.data_sources(), data_sources);
        if plan.is_noop() {
            return Ok(None);
        }
        let names: BTreeSet<String> = data_sources.keys().cloned().collect();
        validate_data_sources(current.rules(), &names)?;

        let pools = self
            .open_all(data_sources, plan.open.iter(), current.data_sources())
            .await?;
        debug!(
            "Schema {} data sources renewed: keep={:?} open={:?} release={:?}",
            current.schema(),
            plan.keep,
            plan.open,
            plan.release
        );
        Ok(Some(MetadataContext::new(
            current.schema(),
            current.version() + 1,
            pools,
            current.shared_rule_configs(),
            current.shared_rules(),
        )))
    }

    /// Key-wise overwrite of the global properties
    pub fn renew_props(
        &self,
        current: &ConfigurationProperties,
        changes: &BTreeMap<String, String>,
    ) -> Result<Option<ConfigurationProperties>> {
        let merged = current.merge(changes)?;
        Ok((merged != *current).then_some(merged))
    }

    /// Open pools for `to_open`, reusing `existing` pools for every other
    /// name of `target`
    async fn open_all<'a>(
        &self,
        target: &DataSourceMap,
        to_open: impl Iterator<Item = &'a String>,
        existing: &BTreeMap<String, Arc<PooledDataSource>>,
    ) -> Result<BTreeMap<String, Arc<PooledDataSource>>> {
        let to_open: BTreeSet<&String> = to_open.collect();
        let mut pools = BTreeMap::new();
        for (name, config) in target {
            let pool = if to_open.contains(name) {
                PooledDataSource::open(self.factory.as_ref(), name, config, Arc::clone(&self.metrics)).await?
            } else if let Some(pool) = existing.get(name) {
                Arc::clone(pool)
            } else {
                PooledDataSource::open(self.factory.as_ref(), name, config, Arc::clone(&self.metrics)).await?
            };
            pools.insert(name.clone(), pool);
        }
        Ok(pools)
    }
}
