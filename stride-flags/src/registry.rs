//! Flag registry parsed from the `[flags]` configuration table.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use stride_core::FlagConfigError;
use tracing::warn;

/// Static definition of a feature flag. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFlag {
    pub name: String,
    /// Master switch.
    pub enabled: bool,
    /// Runtime environments the flag may be on in.
    pub environments: BTreeSet<String>,
    /// Share of sessions, 0 to 100, for which the flag evaluates true.
    pub rollout_percentage: f64,
}

impl FeatureFlag {
    /// A flag that can never evaluate true. Stands in for malformed entries.
    pub fn disabled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: false,
            environments: BTreeSet::new(),
            rollout_percentage: 0.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FlagDefinition {
    enabled: bool,
    environments: Vec<String>,
    rollout_percentage: f64,
}

/// A registry entry: the effective definition plus the reason it was
/// disabled, when the configured entry was malformed.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredFlag {
    pub flag: FeatureFlag,
    pub config_error: Option<FlagConfigError>,
}

#[derive(Debug, Clone, Default)]
pub struct FlagRegistry {
    flags: BTreeMap<String, RegisteredFlag>,
}

impl FlagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from the raw configuration table.
    ///
    /// Entries that fail to parse are kept as disabled flags and logged.
    pub fn from_config(table: &BTreeMap<String, toml::Value>) -> Self {
        let mut registry = Self::new();
        for (name, value) in table {
            match parse_flag(name, value) {
                Ok(flag) => registry.insert(flag),
                Err(error) => {
                    warn!(flag = %name, error = %error, "Malformed flag entry, treating as disabled");
                    registry.flags.insert(
                        name.clone(),
                        RegisteredFlag {
                            flag: FeatureFlag::disabled(name.clone()),
                            config_error: Some(error),
                        },
                    );
                }
            }
        }
        registry
    }

    /// Register a well-formed flag, replacing any previous entry of that name.
    pub fn insert(&mut self, flag: FeatureFlag) {
        self.flags.insert(
            flag.name.clone(),
            RegisteredFlag {
                flag,
                config_error: None,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredFlag> {
        self.flags.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.flags.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredFlag> {
        self.flags.values()
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

fn parse_flag(name: &str, value: &toml::Value) -> Result<FeatureFlag, FlagConfigError> {
    if !value.is_table() {
        return Err(FlagConfigError::NotATable {
            flag: name.to_string(),
        });
    }
    let definition: FlagDefinition =
        value
            .clone()
            .try_into()
            .map_err(|e: toml::de::Error| FlagConfigError::Malformed {
                flag: name.to_string(),
                reason: e.message().to_string(),
            })?;

    if !(0.0..=100.0).contains(&definition.rollout_percentage) {
        return Err(FlagConfigError::InvalidValue {
            flag: name.to_string(),
            field: "rollout_percentage",
            reason: format!("{} is outside 0..=100", definition.rollout_percentage),
        });
    }
    if definition.environments.iter().any(|env| env.trim().is_empty()) {
        return Err(FlagConfigError::InvalidValue {
            flag: name.to_string(),
            field: "environments",
            reason: "environment names must not be empty".to_string(),
        });
    }

    Ok(FeatureFlag {
        name: name.to_string(),
        enabled: definition.enabled,
        environments: definition.environments.into_iter().collect(),
        rollout_percentage: definition.rollout_percentage,
    })
}
