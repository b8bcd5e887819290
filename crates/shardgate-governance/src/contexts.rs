//! Metadata contexts
//!
//! The authoritative store of published snapshots, one per schema, plus
//! the global properties and the disabled data sources.
//!
//! Readers load snapshots without locking. Writers of one schema queue on
//! that schema's writer lock, so renewals of a schema apply one at a time
//! while other schemas renew concurrently. A renewal publishes with a
//! single swap; a rejected one publishes nothing.

use crate::context::MetadataContext;
use crate::disabled::DisabledState;
use crate::event::{ChangeEvent, RenewalOutcome};
use crate::metrics::RenewalMetrics;
use crate::pool::DataSourceFactory;
use crate::renewal::RuleRenewalEngine;
use arc_swap::ArcSwap;
use shardgate_common::{ConfigurationProperties, DataSourceMap, Error, GovernanceSchema, Result, RuleConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct SchemaSlot {
    current: ArcSwap<MetadataContext>,
    writer: Mutex<()>,
}

/// Per-schema snapshot store
pub struct MetadataContexts {
    schemas: ArcSwap<HashMap<String, Arc<SchemaSlot>>>,
    /// Serializes schema creation and removal
    admin: Mutex<()>,
    props: ArcSwap<ConfigurationProperties>,
    props_writer: Mutex<()>,
    disabled: Arc<DisabledState>,
    engine: RuleRenewalEngine,
    metrics: Arc<RenewalMetrics>,
}

impl MetadataContexts {
    pub fn new(
        factory: Arc<dyn DataSourceFactory>,
        props: ConfigurationProperties,
        metrics: Arc<RenewalMetrics>,
    ) -> Self {
        Self {
            schemas: ArcSwap::from_pointee(HashMap::new()),
            admin: Mutex::new(()),
            props: ArcSwap::from_pointee(props),
            props_writer: Mutex::new(()),
            disabled: Arc::new(DisabledState::new()),
            engine: RuleRenewalEngine::new(factory, Arc::clone(&metrics)),
            metrics,
        }
    }

    /// Currently published snapshot of `schema`
    pub fn metadata(&self, schema: &str) -> Option<Arc<MetadataContext>> {
        self.schemas.load().get(schema).map(|slot| slot.current.load_full())
    }

    /// Currently published global properties
    pub fn props(&self) -> Arc<ConfigurationProperties> {
        self.props.load_full()
    }

    pub fn disabled(&self) -> &Arc<DisabledState> {
        &self.disabled
    }

    pub fn metrics(&self) -> &Arc<RenewalMetrics> {
        &self.metrics
    }

    /// Names of the live schemas, sorted
    pub fn schema_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schemas.load().keys().cloned().collect();
        names.sort();
        names
    }

    /// Build and publish the first snapshot of a new schema
    pub async fn add_schema(&self, schema: &str, data_sources: &DataSourceMap, rules: &[RuleConfig]) -> Result<()> {
        let _admin = self.admin.lock().await;
        if self.schemas.load().contains_key(schema) {
            return Err(Error::SchemaAlreadyExists(schema.to_string()));
        }
        let context = self.engine.build(schema, data_sources, rules).await?;
        let slot = Arc::new(SchemaSlot {
            current: ArcSwap::from_pointee(context),
            writer: Mutex::new(()),
        });
        let mut schemas = HashMap::clone(&self.schemas.load());
        schemas.insert(schema.to_string(), slot);
        self.schemas.store(Arc::new(schemas));
        info!(
            "Schema {} added with {} data sources and {} rules",
            schema,
            data_sources.len(),
            rules.len()
        );
        Ok(())
    }

    /// Unpublish a schema. Its pools close once in-flight users let go.
    pub async fn drop_schema(&self, schema: &str) -> Result<()> {
        let _admin = self.admin.lock().await;
        let mut schemas = HashMap::clone(&self.schemas.load());
        let slot = schemas
            .remove(schema)
            .ok_or_else(|| Error::SchemaNotFound(schema.to_string()))?;
        self.schemas.store(Arc::new(schemas));
        // wait out a renewal that may still be running against the slot
        drop(slot.writer.lock().await);
        self.disabled.remove_schema(schema);
        info!("Schema {} dropped", schema);
        Ok(())
    }

    /// Apply one change
    pub async fn renew(&self, event: ChangeEvent) -> Result<RenewalOutcome> {
        let kind = event.kind();
        let result = self.apply(event).await;
        match &result {
            Ok(outcome) => self.metrics.record_outcome(kind, *outcome),
            Err(e) => {
                self.metrics.record_rejected(kind);
                warn!("Rejected {} change: {}", kind, e);
            }
        }
        result
    }

    async fn apply(&self, event: ChangeEvent) -> Result<RenewalOutcome> {
        match event {
            ChangeEvent::RuleConfigurationsChanged { schema, rules } => {
                let slot = self.slot(&schema)?;
                let _writer = slot.writer.lock().await;
                let current = slot.current.load_full();
                Ok(Self::publish(&slot, self.engine.renew_rules(&current, &rules)?))
            }
            ChangeEvent::DataSourceChanged { schema, data_sources } => {
                let slot = self.slot(&schema)?;
                let _writer = slot.writer.lock().await;
                let current = slot.current.load_full();
                let next = self.engine.renew_data_sources(&current, &data_sources).await?;
                Ok(Self::publish(&slot, next))
            }
            ChangeEvent::PropertiesChanged { props } => {
                let _writer = self.props_writer.lock().await;
                let current = self.props.load_full();
                match self.engine.renew_props(&current, &props)? {
                    Some(merged) => {
                        self.props.store(Arc::new(merged));
                        info!("Properties renewed: {:?}", props);
                        Ok(RenewalOutcome::Applied)
                    }
                    None => Ok(RenewalOutcome::Unchanged),
                }
            }
            ChangeEvent::DisabledStateChanged { target, disabled } => {
                if self.disabled.set(&target, disabled) {
                    info!("Data source {} {}", target, if disabled { "disabled" } else { "enabled" });
                    Ok(RenewalOutcome::Applied)
                } else {
                    Ok(RenewalOutcome::Unchanged)
                }
            }
        }
    }

    fn publish(slot: &SchemaSlot, next: Option<MetadataContext>) -> RenewalOutcome {
        match next {
            Some(next) => {
                info!("Schema {} published version {}", next.schema(), next.version());
                slot.current.store(Arc::new(next));
                RenewalOutcome::Applied
            }
            None => {
                debug!("Change matches the published snapshot");
                RenewalOutcome::Unchanged
            }
        }
    }

    fn slot(&self, schema: &str) -> Result<Arc<SchemaSlot>> {
        self.schemas
            .load()
            .get(schema)
            .cloned()
            .ok_or_else(|| Error::SchemaNotFound(schema.to_string()))
    }

    /// Pick the data source a read against `group` goes to.
    ///
    /// `group` may name a read/write splitting group, whose enabled read
    /// data sources are load balanced with the write data source as the
    /// fallback, or a physical data source, which is returned as is.
    pub fn route_read(&self, schema: &str, group: &str) -> Result<String> {
        let context = self
            .metadata(schema)
            .ok_or_else(|| Error::SchemaNotFound(schema.to_string()))?;
        route_read(&context, &self.disabled, group)
    }

    /// Whether `data_source` exists in `schema` and is not disabled
    pub fn is_routable(&self, schema: &str, data_source: &str) -> bool {
        self.metadata(schema)
            .is_some_and(|context| context.contains_data_source(data_source))
            && !self.disabled.is_disabled(schema, data_source)
    }

    /// Disable or enable a data source directly
    pub fn set_disabled(&self, target: &GovernanceSchema, disabled: bool) -> bool {
        self.disabled.set(target, disabled)
    }
}

pub(crate) fn route_read(context: &MetadataContext, disabled: &DisabledState, group: &str) -> Result<String> {
    let schema = context.schema();
    let found = context
        .rules()
        .iter()
        .filter_map(|rule| rule.as_readwrite_splitting())
        .find_map(|rule| rule.find_data_source_rule(group));
    if let Some(rule) = found {
        return Ok(rule
            .route_read(|ds| disabled.is_disabled(schema, ds))
            .to_string());
    }
    if context.data_source(group).is_some() {
        return Ok(group.to_string());
    }
    Err(Error::UnknownDataSource {
        rule: schema.to_string(),
        data_source: group.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChangeKind;
    use crate::pool::MemoryDataSourceFactory;
    use shardgate_common::{
        AlgorithmConfig, DEFAULT_SCHEMA, DataSourceConfig, PropertyKey, ReadwriteSplittingDataSourceConfig,
        ReadwriteSplittingRuleConfig, ShardingRuleConfig, ShardingStrategyConfig, ShardingTableRuleConfig,
    };
    use std::collections::BTreeMap;

    fn h2(name: &str) -> DataSourceConfig {
        DataSourceConfig::new("h2", format!("jdbc:h2:mem:{name}")).with_credentials("sa", "")
    }

    fn data_sources(names: &[&str]) -> DataSourceMap {
        names.iter().map(|n| ((*n).to_string(), h2(n))).collect()
    }

    fn readwrite(reads: &[&str]) -> RuleConfig {
        ReadwriteSplittingRuleConfig::default()
            .with_data_source(ReadwriteSplittingDataSourceConfig::new(
                "pr_ds",
                "write_ds",
                reads.iter().map(|r| (*r).to_string()).collect(),
                "roundRobin",
            ))
            .with_load_balancer("roundRobin", AlgorithmConfig::new("ROUND_ROBIN"))
            .into()
    }

    fn sharding() -> RuleConfig {
        ShardingRuleConfig::default()
            .with_table(
                ShardingTableRuleConfig::new("logic_table", "pr_ds.table_${0..1}")
                    .with_table_strategy(ShardingStrategyConfig::new("id", "table_inline")),
            )
            .with_algorithm(
                "table_inline",
                AlgorithmConfig::new("INLINE").with_prop("algorithm-expression", "table_${id % 2}"),
            )
            .into()
    }

    async fn contexts_with(names: &[&str], rules: &[RuleConfig]) -> (MetadataContexts, Arc<MemoryDataSourceFactory>) {
        let factory = Arc::new(MemoryDataSourceFactory::new());
        let contexts = MetadataContexts::new(
            factory.clone(),
            ConfigurationProperties::default(),
            Arc::new(RenewalMetrics::new()),
        );
        contexts
            .add_schema(DEFAULT_SCHEMA, &data_sources(names), rules)
            .await
            .unwrap();
        (contexts, factory)
    }

    #[tokio::test]
    async fn test_rule_renewal_publishes_ordered_rules() {
        let (contexts, _) = contexts_with(&["write_ds", "read_ds"], &[]).await;
        let outcome = contexts
            .renew(ChangeEvent::RuleConfigurationsChanged {
                schema: DEFAULT_SCHEMA.into(),
                rules: vec![sharding(), readwrite(&["read_ds"])],
            })
            .await
            .unwrap();
        assert_eq!(outcome, RenewalOutcome::Applied);

        let metadata = contexts.metadata(DEFAULT_SCHEMA).unwrap();
        assert_eq!(metadata.version(), 2);
        assert_eq!(metadata.summary().rules, vec!["sharding", "readwrite-splitting"]);
        let routed = metadata.rules()[0]
            .as_sharding()
            .unwrap()
            .find_table_rule("logic_table")
            .unwrap();
        assert_eq!(
            routed.actual_data_nodes.iter().map(ToString::to_string).collect::<Vec<_>>(),
            vec!["pr_ds.table_0", "pr_ds.table_1"]
        );
    }

    #[tokio::test]
    async fn test_rejected_renewal_keeps_snapshot() {
        let (contexts, _) = contexts_with(&["write_ds", "read_ds"], &[readwrite(&["read_ds"])]).await;
        let before = contexts.metadata(DEFAULT_SCHEMA).unwrap();

        let err = contexts
            .renew(ChangeEvent::RuleConfigurationsChanged {
                schema: DEFAULT_SCHEMA.into(),
                rules: vec![readwrite(&["ghost_ds"])],
            })
            .await
            .unwrap_err();
        assert!(err.is_configuration_error());

        let after = contexts.metadata(DEFAULT_SCHEMA).unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(contexts.metrics().rejected(ChangeKind::Rules), 1);
    }

    #[tokio::test]
    async fn test_identical_data_sources_do_not_churn_pools() {
        let (contexts, factory) = contexts_with(&["ds_0", "ds_1", "ds_2"], &[]).await;
        assert_eq!(factory.opened(), 3);

        let outcome = contexts
            .renew(ChangeEvent::DataSourceChanged {
                schema: DEFAULT_SCHEMA.into(),
                data_sources: data_sources(&["ds_0", "ds_1", "ds_2"]),
            })
            .await
            .unwrap();
        assert_eq!(outcome, RenewalOutcome::Unchanged);
        assert_eq!(factory.opened(), 3);
        assert_eq!(contexts.metadata(DEFAULT_SCHEMA).unwrap().version(), 1);
    }

    #[tokio::test]
    async fn test_removed_data_source_released_after_readers_finish() {
        let (contexts, factory) = contexts_with(&["ds_0", "ds_1"], &[]).await;
        let reader = contexts.metadata(DEFAULT_SCHEMA).unwrap();
        let in_flight = reader.physical_connection("ds_1").unwrap();

        contexts
            .renew(ChangeEvent::DataSourceChanged {
                schema: DEFAULT_SCHEMA.into(),
                data_sources: data_sources(&["ds_0"]),
            })
            .await
            .unwrap();
        assert_eq!(contexts.metadata(DEFAULT_SCHEMA).unwrap().data_source_names().len(), 1);
        assert_eq!(factory.open_pools(), 2);

        drop(reader);
        assert_eq!(factory.open_pools(), 2);
        drop(in_flight);
        assert_eq!(factory.open_pools(), 1);
    }

    #[tokio::test]
    async fn test_data_source_removal_in_use_rejected() {
        let (contexts, factory) = contexts_with(&["write_ds", "read_ds"], &[readwrite(&["read_ds"])]).await;
        let err = contexts
            .renew(ChangeEvent::DataSourceChanged {
                schema: DEFAULT_SCHEMA.into(),
                data_sources: data_sources(&["write_ds"]),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DataSourceInUse { .. }));
        assert_eq!(contexts.metadata(DEFAULT_SCHEMA).unwrap().data_source_names().len(), 2);
        assert_eq!(factory.open_pools(), 2);
    }

    #[tokio::test]
    async fn test_data_source_shadowing_group_rejected() {
        let (contexts, factory) = contexts_with(&["write_ds", "read_ds"], &[readwrite(&["read_ds"])]).await;
        let before = contexts.metadata(DEFAULT_SCHEMA).unwrap();
        let err = contexts
            .renew(ChangeEvent::DataSourceChanged {
                schema: DEFAULT_SCHEMA.into(),
                data_sources: data_sources(&["write_ds", "read_ds", "pr_ds"]),
            })
            .await
            .unwrap_err();
        assert!(err.is_configuration_error());
        assert!(Arc::ptr_eq(&before, &contexts.metadata(DEFAULT_SCHEMA).unwrap()));
        assert_eq!(factory.opened(), 2);

        // the published rules still compile against the published names
        let metadata = contexts.metadata(DEFAULT_SCHEMA).unwrap();
        assert!(shardgate_rule::build_rules(metadata.rule_configs(), &metadata.data_source_names()).is_ok());
    }

    #[tokio::test]
    async fn test_props_renewal() {
        let (contexts, _) = contexts_with(&["ds_0"], &[]).await;
        let props: BTreeMap<String, String> = [
            ("sql-show".to_string(), "true".to_string()),
            ("custom-key".to_string(), "kept".to_string()),
        ]
        .into();
        let outcome = contexts
            .renew(ChangeEvent::PropertiesChanged { props: props.clone() })
            .await
            .unwrap();
        assert_eq!(outcome, RenewalOutcome::Applied);
        assert!(contexts.props().bool_value(PropertyKey::SqlShow));
        assert_eq!(contexts.props().get("custom-key"), Some("kept"));

        let outcome = contexts.renew(ChangeEvent::PropertiesChanged { props }).await.unwrap();
        assert_eq!(outcome, RenewalOutcome::Unchanged);

        let invalid: BTreeMap<String, String> = [("kernel-executor-size".to_string(), "many".to_string())].into();
        assert!(contexts.renew(ChangeEvent::PropertiesChanged { props: invalid }).await.is_err());
        assert_eq!(contexts.props().int_value(PropertyKey::KernelExecutorSize), 0);
    }

    #[tokio::test]
    async fn test_disabled_toggle_restores_routing() {
        let (contexts, _) = contexts_with(&["write_ds", "replica_ds"], &[readwrite(&["replica_ds"])]).await;
        let target = GovernanceSchema::parse("logic_db.replica_ds").unwrap();
        assert_eq!(contexts.route_read(DEFAULT_SCHEMA, "pr_ds").unwrap(), "replica_ds");

        for expected in [RenewalOutcome::Applied, RenewalOutcome::Unchanged] {
            let outcome = contexts
                .renew(ChangeEvent::DisabledStateChanged {
                    target: target.clone(),
                    disabled: true,
                })
                .await
                .unwrap();
            assert_eq!(outcome, expected);
        }
        assert!(!contexts.is_routable(DEFAULT_SCHEMA, "replica_ds"));
        assert_eq!(contexts.route_read(DEFAULT_SCHEMA, "pr_ds").unwrap(), "write_ds");

        contexts
            .renew(ChangeEvent::DisabledStateChanged {
                target,
                disabled: false,
            })
            .await
            .unwrap();
        assert!(contexts.is_routable(DEFAULT_SCHEMA, "replica_ds"));
        assert_eq!(contexts.route_read(DEFAULT_SCHEMA, "pr_ds").unwrap(), "replica_ds");
    }

    #[tokio::test]
    async fn test_schema_lifecycle() {
        let (contexts, factory) = contexts_with(&["ds_0"], &[]).await;
        assert!(matches!(
            contexts.add_schema(DEFAULT_SCHEMA, &data_sources(&["ds_0"]), &[]).await,
            Err(Error::SchemaAlreadyExists(_))
        ));
        contexts
            .add_schema("other_db", &data_sources(&["ds_9"]), &[])
            .await
            .unwrap();
        assert_eq!(contexts.schema_names(), vec!["logic_db", "other_db"]);

        contexts.drop_schema("other_db").await.unwrap();
        assert!(contexts.metadata("other_db").is_none());
        assert_eq!(factory.open_pools(), 1);
        assert!(contexts.drop_schema("other_db").await.unwrap_err().is_not_found());

        let err = contexts
            .renew(ChangeEvent::RuleConfigurationsChanged {
                schema: "other_db".into(),
                rules: vec![],
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_concurrent_renewals_serialize() {
        let (contexts, _) = contexts_with(&["write_ds", "r0", "r1"], &[]).await;
        let contexts = Arc::new(contexts);
        let mut handles = Vec::new();
        for i in 0..8 {
            let contexts = Arc::clone(&contexts);
            handles.push(tokio::spawn(async move {
                let read = if i % 2 == 0 { "r0" } else { "r1" };
                contexts
                    .renew(ChangeEvent::RuleConfigurationsChanged {
                        schema: DEFAULT_SCHEMA.into(),
                        rules: vec![readwrite(&[read])],
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let metadata = contexts.metadata(DEFAULT_SCHEMA).unwrap();
        let applied = contexts.metrics().applied(ChangeKind::Rules);
        assert_eq!(metadata.version(), 1 + applied);
        assert_eq!(metadata.rules().len(), 1);
    }
}
