//! shardgate Common - Shared types and utilities
//!
//! This crate provides the names, data-source descriptors, rule
//! configurations, bootstrap configuration, typed properties and error
//! definitions used across all shardgate components.

pub mod config;
pub mod error;
pub mod props;
pub mod rule;
pub mod types;

pub use config::{
    BootstrapConfig, DispatchConfig, LoggingConfig, ModeConfig, ModeType, RegistryCenterConfig,
};
pub use error::{Error, Result};
pub use props::{ConfigurationProperties, PropertyKey};
pub use rule::{
    AlgorithmConfig, KeyGenerateStrategyConfig, ReadwriteSplittingDataSourceConfig,
    ReadwriteSplittingRuleConfig, RuleConfig, ShardingRuleConfig, ShardingStrategyConfig,
    ShardingTableRuleConfig,
};
pub use types::*;
