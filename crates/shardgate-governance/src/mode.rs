//! Operating modes and bootstrap
//!
//! - **Standalone**: the bootstrap configuration is final; nothing
//!   subscribes to changes.
//! - **Cluster**: the registry center is authoritative. At boot the local
//!   configuration is pushed when `overwrite` is set or the registry holds
//!   none; otherwise the registry's configuration is loaded. Every change
//!   channel of the schema is then forwarded into renewal dispatch.

use crate::contexts::MetadataContexts;
use crate::dispatch::RenewalDispatcher;
use crate::event::ChangeKind;
use crate::facade::ShardingDataSource;
use crate::metrics::RenewalMetrics;
use crate::pool::DataSourceFactory;
use crate::registry::{RegistryCenter, RegistryRepositoryFactory, SchemaConfiguration};
use shardgate_common::{BootstrapConfig, ConfigurationProperties, Error, ModeType, Result};
use std::sync::Arc;
use tracing::info;

/// Runtime state of the active mode
pub enum Mode {
    Standalone,
    Cluster {
        center: RegistryCenter,
        dispatcher: RenewalDispatcher,
    },
}

impl Mode {
    pub const fn mode_type(&self) -> ModeType {
        match self {
            Self::Standalone => ModeType::Standalone,
            Self::Cluster { .. } => ModeType::Cluster,
        }
    }

    pub const fn registry(&self) -> Option<&RegistryCenter> {
        match self {
            Self::Standalone => None,
            Self::Cluster { center, .. } => Some(center),
        }
    }
}

/// Boot a facade from `config`.
///
/// In cluster mode a registry that cannot be reached aborts the boot with
/// a fatal `RegistryUnavailable`.
pub async fn bootstrap(
    config: &BootstrapConfig,
    factory: Arc<dyn DataSourceFactory>,
    registries: &RegistryRepositoryFactory,
) -> Result<ShardingDataSource> {
    config.validate()?;
    let metrics = Arc::new(RenewalMetrics::new());
    match config.mode.mode_type {
        ModeType::Standalone => {
            let props = ConfigurationProperties::new(config.props.clone())?;
            let contexts = Arc::new(MetadataContexts::new(factory, props, metrics));
            contexts
                .add_schema(&config.schema, &config.data_sources, &config.rules)
                .await?;
            info!("Schema {} booted in standalone mode", config.schema);
            Ok(ShardingDataSource::new(&config.schema, contexts, Mode::Standalone))
        }
        ModeType::Cluster => bootstrap_cluster(config, factory, registries, metrics).await,
    }
}

async fn bootstrap_cluster(
    config: &BootstrapConfig,
    factory: Arc<dyn DataSourceFactory>,
    registries: &RegistryRepositoryFactory,
    metrics: Arc<RenewalMetrics>,
) -> Result<ShardingDataSource> {
    let registry = config
        .mode
        .registry
        .as_ref()
        .ok_or_else(|| Error::configuration("cluster mode requires a registry"))?;
    let center = RegistryCenter::new(registries.connect(registry)?);
    let schema = config.schema.as_str();

    // subscribe first so changes published while loading are replayed
    let mut streams = Vec::with_capacity(ChangeKind::ALL.len());
    for kind in ChangeKind::ALL {
        streams.push(center.subscribe(schema, kind).await?);
    }

    let overwrite = config.mode.overwrite;
    let local = SchemaConfiguration {
        data_sources: config.data_sources.clone(),
        rules: config.rules.clone(),
    };
    let schema_config = if center.persist_schema(schema, &local, overwrite).await? {
        local
    } else {
        info!("Loading schema {} from registry", schema);
        center.load_schema(schema).await?.unwrap_or(local)
    };
    let props = if center.persist_props(&config.props, overwrite).await? {
        config.props.clone()
    } else {
        center.load_props().await?.unwrap_or_default()
    };

    let contexts = Arc::new(MetadataContexts::new(
        factory,
        ConfigurationProperties::new(props)?,
        metrics,
    ));
    contexts
        .add_schema(schema, &schema_config.data_sources, &schema_config.rules)
        .await?;
    for target in center.load_disabled(schema).await? {
        contexts.set_disabled(&target, true);
    }

    let dispatcher = RenewalDispatcher::new(Arc::clone(&contexts), config.dispatch.queue_capacity);
    for stream in streams {
        dispatcher.forward(stream);
    }
    info!(
        "Schema {} booted in cluster mode (namespace {})",
        schema, registry.namespace
    );
    Ok(ShardingDataSource::new(
        schema,
        contexts,
        Mode::Cluster { center, dispatcher },
    ))
}
