//! shardgate rule compilation
//!
//! This crate turns declarative rule configurations into runtime rules:
//! - Inline expression expansion (`ds_${0..1}.t_order_${0..1}`)
//! - The closed algorithm catalog (sharding, key generation, load balance)
//! - Sharding rules with data node routing
//! - Read/write splitting groups with load-balanced, health-aware reads
//!
//! Every data source a rule references is resolved at compile time; a
//! batch that fails to compile is rejected as a whole.

pub mod algorithm;
pub mod builder;
pub mod inline;
pub mod readwrite;
pub mod sharding;

pub use algorithm::{
    GeneratedKey, KeyGenerator, LoadBalanceAlgorithm, ShardingAlgorithm, ShardingValue,
};
pub use builder::{Rule, build_rules, validate_data_sources};
pub use readwrite::{ReadwriteSplittingDataSourceRule, ReadwriteSplittingRule};
pub use sharding::{DataNode, ShardingRule, ShardingStrategy, TableRule};
