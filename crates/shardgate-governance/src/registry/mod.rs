//! Registry center client
//!
//! A [`RegistryRepository`] is the key/value contract of a coordination
//! service. [`RegistryCenter`] lays governance data out on top of it:
//!
//! | Key | Payload |
//! |---|---|
//! | `/metadata/{schema}/dataSources` | JSON map of data source descriptors |
//! | `/metadata/{schema}/rules` | JSON list of rule configurations |
//! | `/props` | JSON map of global properties |
//! | `/states/datanodes/{schema}.{data_source}` | `DISABLED` or `ENABLED` |
//!
//! Watch events are decoded into [`ChangeEvent`]s. Payloads that fail to
//! decode are logged and skipped; the stream keeps going.

mod memory;

pub use memory::MemoryRegistryRepository;

use crate::event::{ChangeEvent, ChangeKind};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use shardgate_common::{DataSourceMap, Error, GovernanceSchema, RegistryCenterConfig, Result, RuleConfig};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

const DISABLED: &str = "DISABLED";
const ENABLED: &str = "ENABLED";
const STATES_PREFIX: &str = "/states/datanodes/";
const PROPS_KEY: &str = "/props";

/// A change observed under a watched prefix
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchEvent {
    Put { key: String, value: String },
    Delete { key: String },
}

impl WatchEvent {
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// Key/value contract of a coordination service
#[async_trait]
pub trait RegistryRepository: Send + Sync {
    /// Value stored at `key`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` at `key`, notifying watchers
    async fn persist(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`, notifying watchers
    async fn delete(&self, key: &str) -> Result<()>;

    /// Direct child names below `prefix`
    async fn children(&self, prefix: &str) -> Result<Vec<String>>;

    /// Changes to keys starting with `prefix`, from now on
    async fn watch(&self, prefix: &str) -> Result<BoxStream<'static, WatchEvent>>;

    /// Close the connection; open watches end
    async fn close(&self) -> Result<()>;
}

/// Connects repositories by configured type.
///
/// Memory repositories are shared per namespace for the lifetime of the
/// factory, so several facades built from one factory see one registry.
#[derive(Default)]
pub struct RegistryRepositoryFactory {
    memory: Mutex<HashMap<String, Arc<memory::MemoryStore>>>,
}

impl RegistryRepositoryFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect the repository `config` describes
    pub fn connect(&self, config: &RegistryCenterConfig) -> Result<Arc<dyn RegistryRepository>> {
        match config.registry_type.to_ascii_lowercase().as_str() {
            "memory" => {
                let store = Arc::clone(
                    self.memory
                        .lock()
                        .entry(config.namespace.clone())
                        .or_insert_with(|| Arc::new(memory::MemoryStore::new())),
                );
                info!("Connected to memory registry, namespace {}", config.namespace);
                Ok(Arc::new(MemoryRegistryRepository::new(store)))
            }
            other => Err(Error::registry_unavailable(format!(
                "unsupported registry type '{other}' at {}",
                config.server_lists
            ))),
        }
    }
}

/// Configuration of one schema as stored in the registry
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchemaConfiguration {
    pub data_sources: DataSourceMap,
    pub rules: Vec<RuleConfig>,
}

/// Governance view over a registry repository
#[derive(Clone)]
pub struct RegistryCenter {
    repository: Arc<dyn RegistryRepository>,
}

impl RegistryCenter {
    pub fn new(repository: Arc<dyn RegistryRepository>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &Arc<dyn RegistryRepository> {
        &self.repository
    }

    pub fn data_sources_path(schema: &str) -> String {
        format!("/metadata/{schema}/dataSources")
    }

    pub fn rules_path(schema: &str) -> String {
        format!("/metadata/{schema}/rules")
    }

    pub const fn props_path() -> &'static str {
        PROPS_KEY
    }

    pub fn disabled_path(target: &GovernanceSchema) -> String {
        format!("{STATES_PREFIX}{target}")
    }

    /// Schema configuration held by the registry, if any
    pub async fn load_schema(&self, schema: &str) -> Result<Option<SchemaConfiguration>> {
        let Some(data_sources) = self.load_json(&Self::data_sources_path(schema)).await? else {
            return Ok(None);
        };
        let rules = self.load_json(&Self::rules_path(schema)).await?.unwrap_or_default();
        Ok(Some(SchemaConfiguration { data_sources, rules }))
    }

    /// Store a schema configuration.
    ///
    /// Without `overwrite`, an existing configuration is left alone.
    /// Returns whether anything was written.
    pub async fn persist_schema(
        &self,
        schema: &str,
        configuration: &SchemaConfiguration,
        overwrite: bool,
    ) -> Result<bool> {
        if !overwrite && self.repository.get(&Self::data_sources_path(schema)).await?.is_some() {
            debug!("Registry already holds schema {}, keeping it", schema);
            return Ok(false);
        }
        self.persist_data_sources(schema, &configuration.data_sources).await?;
        self.persist_rules(schema, &configuration.rules).await?;
        info!("Persisted schema {} to registry", schema);
        Ok(true)
    }

    pub async fn persist_data_sources(&self, schema: &str, data_sources: &DataSourceMap) -> Result<()> {
        self.persist_json(&Self::data_sources_path(schema), data_sources).await
    }

    pub async fn persist_rules(&self, schema: &str, rules: &[RuleConfig]) -> Result<()> {
        self.persist_json(&Self::rules_path(schema), rules).await
    }

    pub async fn load_props(&self) -> Result<Option<BTreeMap<String, String>>> {
        self.load_json(PROPS_KEY).await
    }

    /// Store global properties; without `overwrite` existing ones win
    pub async fn persist_props(&self, props: &BTreeMap<String, String>, overwrite: bool) -> Result<bool> {
        if !overwrite && self.repository.get(PROPS_KEY).await?.is_some() {
            return Ok(false);
        }
        self.persist_json(PROPS_KEY, props).await?;
        Ok(true)
    }

    /// Publish a data source's disabled flag
    pub async fn persist_disabled(&self, target: &GovernanceSchema, disabled: bool) -> Result<()> {
        let state = if disabled { DISABLED } else { ENABLED };
        self.repository.persist(&Self::disabled_path(target), state).await
    }

    /// Disabled data sources of `schema` recorded in the registry
    pub async fn load_disabled(&self, schema: &str) -> Result<Vec<GovernanceSchema>> {
        let mut disabled = Vec::new();
        for child in self.repository.children(STATES_PREFIX).await? {
            let Ok(target) = GovernanceSchema::parse(&child) else {
                warn!("Ignoring malformed state node {}", child);
                continue;
            };
            if target.schema != schema {
                continue;
            }
            let state = self.repository.get(&Self::disabled_path(&target)).await?;
            if state.is_some_and(|s| is_disabled_state(&s)) {
                disabled.push(target);
            }
        }
        Ok(disabled)
    }

    /// Decoded changes of one kind for `schema`
    pub async fn subscribe(&self, schema: &str, kind: ChangeKind) -> Result<BoxStream<'static, ChangeEvent>> {
        let schema = schema.to_string();
        let stream = match kind {
            ChangeKind::DataSources => {
                let path = Self::data_sources_path(&schema);
                self.repository
                    .watch(&path)
                    .await?
                    .filter_map(move |event| {
                        let decoded = decode_put::<DataSourceMap>(&path, event).map(|data_sources| {
                            ChangeEvent::DataSourceChanged {
                                schema: schema.clone(),
                                data_sources,
                            }
                        });
                        futures::future::ready(decoded)
                    })
                    .boxed()
            }
            ChangeKind::Rules => {
                let path = Self::rules_path(&schema);
                self.repository
                    .watch(&path)
                    .await?
                    .filter_map(move |event| {
                        let decoded = decode_put::<Vec<RuleConfig>>(&path, event).map(|rules| {
                            ChangeEvent::RuleConfigurationsChanged {
                                schema: schema.clone(),
                                rules,
                            }
                        });
                        futures::future::ready(decoded)
                    })
                    .boxed()
            }
            ChangeKind::Props => self
                .repository
                .watch(PROPS_KEY)
                .await?
                .filter_map(|event| {
                    let decoded = decode_put::<BTreeMap<String, String>>(PROPS_KEY, event)
                        .map(|props| ChangeEvent::PropertiesChanged { props });
                    futures::future::ready(decoded)
                })
                .boxed(),
            ChangeKind::Disabled => self
                .repository
                .watch(STATES_PREFIX)
                .await?
                .filter_map(move |event| futures::future::ready(decode_state(&schema, &event)))
                .boxed(),
        };
        debug!("Subscribed to {} changes", kind);
        Ok(stream)
    }

    /// Close the underlying repository
    pub async fn close(&self) -> Result<()> {
        self.repository.close().await
    }

    async fn load_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.repository.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    async fn persist_json<T: serde::Serialize + ?Sized + Sync>(&self, key: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_string(value).map_err(|e| Error::Serialization(e.to_string()))?;
        self.repository.persist(key, &payload).await
    }
}

fn is_disabled_state(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case(DISABLED)
}

fn decode_put<T: DeserializeOwned>(path: &str, event: WatchEvent) -> Option<T> {
    match event {
        WatchEvent::Put { key, value } if key == path => match serde_json::from_str(&value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!("Skipping undecodable payload at {}: {}", key, e);
                None
            }
        },
        WatchEvent::Put { .. } => None,
        WatchEvent::Delete { key } => {
            debug!("Ignoring deletion of {}", key);
            None
        }
    }
}

fn decode_state(schema: &str, event: &WatchEvent) -> Option<ChangeEvent> {
    let name = event.key().strip_prefix(STATES_PREFIX)?;
    let target = match GovernanceSchema::parse(name) {
        Ok(target) => target,
        Err(e) => {
            warn!("Skipping malformed state node {}: {}", name, e);
            return None;
        }
    };
    if target.schema != schema {
        return None;
    }
    let disabled = match event {
        WatchEvent::Put { value, .. } => is_disabled_state(value),
        WatchEvent::Delete { .. } => false,
    };
    Some(ChangeEvent::DisabledStateChanged { target, disabled })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardgate_common::{
        AlgorithmConfig, DataSourceConfig, ReadwriteSplittingDataSourceConfig, ReadwriteSplittingRuleConfig,
    };
    use std::time::Duration;

    fn connect_center(namespace: &str, factory: &RegistryRepositoryFactory) -> RegistryCenter {
        RegistryCenter::new(
            factory
                .connect(&RegistryCenterConfig::new("Memory", namespace, "localhost:2181"))
                .unwrap(),
        )
    }

    fn configuration() -> SchemaConfiguration {
        let data_sources = ["write_ds", "read_ds"]
            .iter()
            .map(|n| ((*n).to_string(), DataSourceConfig::new("h2", format!("jdbc:h2:mem:{n}"))))
            .collect();
        let rules = vec![
            ReadwriteSplittingRuleConfig::default()
                .with_data_source(ReadwriteSplittingDataSourceConfig::new(
                    "pr_ds",
                    "write_ds",
                    vec!["read_ds".to_string()],
                    "roundRobin",
                ))
                .with_load_balancer("roundRobin", AlgorithmConfig::new("ROUND_ROBIN"))
                .into(),
        ];
        SchemaConfiguration { data_sources, rules }
    }

    async fn next(stream: &mut BoxStream<'static, ChangeEvent>) -> ChangeEvent {
        tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_paths() {
        assert_eq!(RegistryCenter::data_sources_path("logic_db"), "/metadata/logic_db/dataSources");
        assert_eq!(RegistryCenter::rules_path("logic_db"), "/metadata/logic_db/rules");
        assert_eq!(
            RegistryCenter::disabled_path(&GovernanceSchema::new("logic_db", "replica_ds")),
            "/states/datanodes/logic_db.replica_ds"
        );
    }

    #[test]
    fn test_unknown_registry_type_unavailable() {
        let factory = RegistryRepositoryFactory::new();
        let err = factory
            .connect(&RegistryCenterConfig::new("ZooKeeper", "test_name", "localhost:2181"))
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_schema_round_trip_and_overwrite() {
        let factory = RegistryRepositoryFactory::new();
        let center = connect_center("governance_ds", &factory);
        assert!(center.load_schema("logic_db").await.unwrap().is_none());

        assert!(center.persist_schema("logic_db", &configuration(), false).await.unwrap());
        let loaded = center.load_schema("logic_db").await.unwrap().unwrap();
        assert_eq!(loaded, configuration());

        assert!(!center.persist_schema("logic_db", &SchemaConfiguration::default(), false).await.unwrap());
        assert!(center.persist_schema("logic_db", &SchemaConfiguration::default(), true).await.unwrap());
        let loaded = center.load_schema("logic_db").await.unwrap().unwrap();
        assert!(loaded.data_sources.is_empty());

        // same namespace, same store
        let other = connect_center("governance_ds", &factory);
        assert!(other.load_schema("logic_db").await.unwrap().is_some());
        let isolated = connect_center("other_ns", &factory);
        assert!(isolated.load_schema("logic_db").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_decodes_rules() {
        let factory = RegistryRepositoryFactory::new();
        let center = connect_center("governance_ds", &factory);
        let mut stream = center.subscribe("logic_db", ChangeKind::Rules).await.unwrap();

        center
            .repository()
            .persist(&RegistryCenter::rules_path("logic_db"), "not json")
            .await
            .unwrap();
        center.persist_rules("other_db", &[]).await.unwrap();
        center.persist_rules("logic_db", &configuration().rules).await.unwrap();

        match next(&mut stream).await {
            ChangeEvent::RuleConfigurationsChanged { schema, rules } => {
                assert_eq!(schema, "logic_db");
                assert_eq!(rules, configuration().rules);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_subscribe_disabled_states() {
        let factory = RegistryRepositoryFactory::new();
        let center = connect_center("governance_ds", &factory);
        let mut stream = center.subscribe("logic_db", ChangeKind::Disabled).await.unwrap();
        let replica = GovernanceSchema::new("logic_db", "replica_ds");

        center
            .persist_disabled(&GovernanceSchema::new("other_db", "replica_ds"), true)
            .await
            .unwrap();
        center.persist_disabled(&replica, true).await.unwrap();
        assert_eq!(
            next(&mut stream).await,
            ChangeEvent::DisabledStateChanged {
                target: replica.clone(),
                disabled: true
            }
        );

        center
            .repository()
            .delete(&RegistryCenter::disabled_path(&replica))
            .await
            .unwrap();
        assert_eq!(
            next(&mut stream).await,
            ChangeEvent::DisabledStateChanged {
                target: replica,
                disabled: false
            }
        );
    }

    #[tokio::test]
    async fn test_load_disabled() {
        let factory = RegistryRepositoryFactory::new();
        let center = connect_center("governance_ds", &factory);
        center
            .persist_disabled(&GovernanceSchema::new("logic_db", "r0"), true)
            .await
            .unwrap();
        center
            .persist_disabled(&GovernanceSchema::new("logic_db", "r1"), false)
            .await
            .unwrap();
        center
            .persist_disabled(&GovernanceSchema::new("other_db", "r0"), true)
            .await
            .unwrap();
        assert_eq!(
            center.load_disabled("logic_db").await.unwrap(),
            vec![GovernanceSchema::new("logic_db", "r0")]
        );
    }

    #[tokio::test]
    async fn test_props_round_trip() {
        let factory = RegistryRepositoryFactory::new();
        let center = connect_center("governance_ds", &factory);
        let props: BTreeMap<String, String> = [("sql-show".to_string(), "true".to_string())].into();
        assert!(center.persist_props(&props, false).await.unwrap());
        assert!(!center.persist_props(&BTreeMap::new(), false).await.unwrap());
        assert_eq!(center.load_props().await.unwrap(), Some(props));
    }
}
