//! Disabled data sources
//!
//! Health toggles arrive independently of configuration changes and are
//! kept out of the immutable snapshots; readers consult this set while
//! routing reads.

use dashmap::DashSet;
use shardgate_common::GovernanceSchema;

/// Set of disabled `(schema, data_source)` pairs
#[derive(Debug, Default)]
pub struct DisabledState {
    entries: DashSet<GovernanceSchema>,
}

impl DisabledState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the disabled flag of `target`; returns whether the set changed
    pub fn set(&self, target: &GovernanceSchema, disabled: bool) -> bool {
        if disabled {
            self.entries.insert(target.clone())
        } else {
            self.entries.remove(target).is_some()
        }
    }

    pub fn is_disabled(&self, schema: &str, data_source: &str) -> bool {
        self.entries.contains(&GovernanceSchema::new(schema, data_source))
    }

    /// Disabled data sources of one schema, sorted
    pub fn disabled_in(&self, schema: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.schema == schema)
            .map(|entry| entry.data_source.clone())
            .collect();
        names.sort();
        names
    }

    /// Forget every entry of a dropped schema
    pub fn remove_schema(&self, schema: &str) {
        self.entries.retain(|entry| entry.schema != schema);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_is_idempotent() {
        let state = DisabledState::new();
        let replica = GovernanceSchema::new("logic_db", "replica_ds");

        assert!(state.set(&replica, true));
        assert!(!state.set(&replica, true));
        assert!(state.is_disabled("logic_db", "replica_ds"));
        assert!(!state.is_disabled("other_db", "replica_ds"));

        assert!(state.set(&replica, false));
        assert!(!state.set(&replica, false));
        assert!(!state.is_disabled("logic_db", "replica_ds"));
    }

    #[test]
    fn test_schema_scoping() {
        let state = DisabledState::new();
        state.set(&GovernanceSchema::new("logic_db", "r1"), true);
        state.set(&GovernanceSchema::new("logic_db", "r0"), true);
        state.set(&GovernanceSchema::new("other_db", "r0"), true);

        assert_eq!(state.disabled_in("logic_db"), vec!["r0", "r1"]);
        state.remove_schema("logic_db");
        assert!(state.disabled_in("logic_db").is_empty());
        assert!(state.is_disabled("other_db", "r0"));
    }
}
