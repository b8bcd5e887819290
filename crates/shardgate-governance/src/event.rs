//! Change notifications delivered by the registry center

use derive_more::Display;
use shardgate_common::{DataSourceMap, GovernanceSchema, RuleConfig};
use std::collections::BTreeMap;

/// Registry channel a change arrives on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub enum ChangeKind {
    #[display("data_sources")]
    DataSources,
    #[display("rules")]
    Rules,
    #[display("props")]
    Props,
    #[display("disabled")]
    Disabled,
}

impl ChangeKind {
    pub const ALL: [Self; 4] = [Self::DataSources, Self::Rules, Self::Props, Self::Disabled];

    /// Dense index for per-kind counters
    pub(crate) const fn index(self) -> usize {
        match self {
            Self::DataSources => 0,
            Self::Rules => 1,
            Self::Props => 2,
            Self::Disabled => 3,
        }
    }
}

/// A typed configuration change
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangeEvent {
    /// Full replacement of a schema's data sources
    DataSourceChanged {
        schema: String,
        data_sources: DataSourceMap,
    },
    /// Full replacement of a schema's ordered rule list
    RuleConfigurationsChanged {
        schema: String,
        rules: Vec<RuleConfig>,
    },
    /// Key-wise overwrite of the global properties
    PropertiesChanged { props: BTreeMap<String, String> },
    /// Toggle of one data source's disabled flag
    DisabledStateChanged {
        target: GovernanceSchema,
        disabled: bool,
    },
}

impl ChangeEvent {
    #[must_use]
    pub const fn kind(&self) -> ChangeKind {
        match self {
            Self::DataSourceChanged { .. } => ChangeKind::DataSources,
            Self::RuleConfigurationsChanged { .. } => ChangeKind::Rules,
            Self::PropertiesChanged { .. } => ChangeKind::Props,
            Self::DisabledStateChanged { .. } => ChangeKind::Disabled,
        }
    }

    /// Schema the change belongs to; `None` for global properties
    #[must_use]
    pub fn schema(&self) -> Option<&str> {
        match self {
            Self::DataSourceChanged { schema, .. } | Self::RuleConfigurationsChanged { schema, .. } => {
                Some(schema.as_str())
            }
            Self::PropertiesChanged { .. } => None,
            Self::DisabledStateChanged { target, .. } => Some(target.schema.as_str()),
        }
    }
}

/// Result of applying one change
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenewalOutcome {
    /// A new snapshot, property map or disabled entry was published
    Applied,
    /// The change matched the current state; nothing was published
    Unchanged,
}
