//! shardgate governance
//!
//! This crate keeps the published metadata of every schema in step with a
//! registry center. Applications hold a [`ShardingDataSource`]; changes
//! to data sources, rule configurations, properties and disabled states
//! are renewed into fresh immutable snapshots without interrupting
//! in-flight work.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │  Registry center    │  /metadata, /props, /states
//! └──────────┬──────────┘
//!            │ watch
//! ┌──────────▼──────────┐
//! │  RenewalDispatcher  │  one ordered queue per schema
//! └──────────┬──────────┘
//!            │ renew
//! ┌──────────▼──────────┐
//! │  MetadataContexts   │  RuleRenewalEngine + atomic swap
//! └──────────┬──────────┘
//!            │ snapshot
//! ┌──────────▼──────────┐
//! │ ShardingDataSource  │  connections pinned to a snapshot
//! └─────────────────────┘
//! ```

pub mod context;
pub mod contexts;
pub mod disabled;
pub mod dispatch;
pub mod event;
pub mod facade;
pub mod metrics;
pub mod mode;
pub mod pool;
pub mod registry;
pub mod renewal;

pub use context::{MetadataContext, MetadataSummary};
pub use contexts::MetadataContexts;
pub use disabled::DisabledState;
pub use dispatch::RenewalDispatcher;
pub use event::{ChangeEvent, ChangeKind, RenewalOutcome};
pub use facade::{AdminOperation, Connection, LogWriter, ShardingDataSource, Support};
pub use metrics::{PrometheusExporter, RenewalMetrics};
pub use mode::{Mode, bootstrap};
pub use pool::{
    DataSourceFactory, DataSourcePool, MemoryDataSourceFactory, MemoryDataSourcePool, PhysicalConnection,
    PooledDataSource,
};
pub use registry::{
    MemoryRegistryRepository, RegistryCenter, RegistryRepository, RegistryRepositoryFactory, SchemaConfiguration,
    WatchEvent,
};
pub use renewal::{DataSourcePlan, RuleRenewalEngine};
