//! Global configuration properties
//!
//! Properties are a flat string map shared by every schema. A fixed set of
//! keys is typed (booleans and integers with defaults) and validated on
//! every construction or merge; any other key is carried verbatim so that
//! settings meant for other components survive a round trip through the
//! registry center.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Typed property keys
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PropertyKey {
    SqlShow,
    SqlSimple,
    KernelExecutorSize,
    MaxConnectionsSizePerQuery,
    CheckTableMetadataEnabled,
    CheckDuplicateTableEnabled,
    QueryWithCipherColumn,
    SqlCommentParseEnabled,
    ShowProcessListEnabled,
}

/// Value kind and default of a typed property
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropertyType {
    Bool(bool),
    Int(i64),
}

impl PropertyKey {
    /// All typed keys
    pub const ALL: [Self; 9] = [
        Self::SqlShow,
        Self::SqlSimple,
        Self::KernelExecutorSize,
        Self::MaxConnectionsSizePerQuery,
        Self::CheckTableMetadataEnabled,
        Self::CheckDuplicateTableEnabled,
        Self::QueryWithCipherColumn,
        Self::SqlCommentParseEnabled,
        Self::ShowProcessListEnabled,
    ];

    /// Key as written in configuration
    #[must_use]
    pub const fn key(&self) -> &'static str {
        match self {
            Self::SqlShow => "sql-show",
            Self::SqlSimple => "sql-simple",
            Self::KernelExecutorSize => "kernel-executor-size",
            Self::MaxConnectionsSizePerQuery => "max-connections-size-per-query",
            Self::CheckTableMetadataEnabled => "check-table-metadata-enabled",
            Self::CheckDuplicateTableEnabled => "check-duplicate-table-enabled",
            Self::QueryWithCipherColumn => "query-with-cipher-column",
            Self::SqlCommentParseEnabled => "sql-comment-parse-enabled",
            Self::ShowProcessListEnabled => "show-process-list-enabled",
        }
    }

    /// Value type and default
    #[must_use]
    pub const fn value_type(&self) -> PropertyType {
        match self {
            Self::SqlShow
            | Self::SqlSimple
            | Self::CheckTableMetadataEnabled
            | Self::CheckDuplicateTableEnabled
            | Self::SqlCommentParseEnabled
            | Self::ShowProcessListEnabled => PropertyType::Bool(false),
            Self::QueryWithCipherColumn => PropertyType::Bool(true),
            Self::KernelExecutorSize => PropertyType::Int(0),
            Self::MaxConnectionsSizePerQuery => PropertyType::Int(1),
        }
    }

    /// Look up a typed key by its configuration name
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.key() == key)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn validate_entry(key: &str, value: &str) -> Result<()> {
    let Some(typed) = PropertyKey::from_key(key) else {
        return Ok(());
    };
    let valid = match typed.value_type() {
        PropertyType::Bool(_) => parse_bool(value).is_some(),
        PropertyType::Int(_) => value.trim().parse::<i64>().is_ok(),
    };
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidProperty {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

/// Validated global properties
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct ConfigurationProperties {
    props: BTreeMap<String, String>,
}

impl ConfigurationProperties {
    /// Validate and wrap a raw property map
    pub fn new(props: BTreeMap<String, String>) -> Result<Self> {
        for (key, value) in &props {
            validate_entry(key, value)?;
        }
        Ok(Self { props })
    }

    /// Key-wise overwrite with `changes`, returning the merged properties.
    ///
    /// Validation covers the changed keys only; `self` is already valid.
    pub fn merge(&self, changes: &BTreeMap<String, String>) -> Result<Self> {
        for (key, value) in changes {
            validate_entry(key, value)?;
        }
        let mut props = self.props.clone();
        props.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(Self { props })
    }

    /// Raw value of any key, typed or not
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.props.get(key).map(String::as_str)
    }

    /// Typed boolean value, falling back to the key's default
    #[must_use]
    pub fn bool_value(&self, key: PropertyKey) -> bool {
        let default = match key.value_type() {
            PropertyType::Bool(default) => default,
            PropertyType::Int(_) => return false,
        };
        self.get(key.key()).and_then(parse_bool).unwrap_or(default)
    }

    /// Typed integer value, falling back to the key's default
    #[must_use]
    pub fn int_value(&self, key: PropertyKey) -> i64 {
        let default = match key.value_type() {
            PropertyType::Int(default) => default,
            PropertyType::Bool(_) => return 0,
        };
        self.get(key.key())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// All raw entries
    #[must_use]
    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.props
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.props.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }
}

impl TryFrom<BTreeMap<String, String>> for ConfigurationProperties {
    type Error = Error;

    fn try_from(props: BTreeMap<String, String>) -> Result<Self> {
        Self::new(props)
    }
}

impl From<ConfigurationProperties> for BTreeMap<String, String> {
    fn from(props: ConfigurationProperties) -> Self {
        props.props
    }
}
