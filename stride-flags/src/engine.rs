//! Flag evaluation and the session override stack.

use std::sync::{PoisonError, RwLock};

use serde::Serialize;
use stride_core::{FlagError, RuntimeConfig, SessionId};
use tracing::{debug, warn};

use crate::bucket::bucket;
use crate::registry::{FeatureFlag, FlagRegistry};

/// A manual override for the running session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlagOverride {
    pub name: String,
    pub value: bool,
}

/// Introspection row returned by [`FeatureFlagEngine::get_all`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlagSnapshot {
    pub flag: String,
    /// Effective value, overrides included.
    pub enabled: bool,
    pub overridden: bool,
    pub config: FeatureFlag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_error: Option<String>,
}

/// Evaluates flags for the running session.
///
/// The registry is immutable after construction; only the override stack
/// changes, and only through this type.
#[derive(Debug)]
pub struct FeatureFlagEngine {
    registry: FlagRegistry,
    environment: String,
    overrides: RwLock<Vec<FlagOverride>>,
}

impl FeatureFlagEngine {
    pub fn new(registry: FlagRegistry, environment: impl Into<String>) -> Self {
        Self {
            registry,
            environment: environment.into(),
            overrides: RwLock::new(Vec::new()),
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(
            FlagRegistry::from_config(&config.flags),
            config.environment.clone(),
        )
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn registry(&self) -> &FlagRegistry {
        &self.registry
    }

    /// True when the flag is registered or currently overridden.
    pub fn is_registered(&self, flag_name: &str) -> bool {
        self.registry.contains(flag_name) || self.override_for(flag_name).is_some()
    }

    /// Effective value of `flag_name` for `session`.
    ///
    /// An override wins. Otherwise the flag must be known, switched on and
    /// allowed in this environment, and the session's bucket must fall below
    /// the rollout percentage.
    pub fn is_enabled(&self, flag_name: &str, session: &SessionId) -> bool {
        if flag_name.trim().is_empty() {
            warn!("Evaluating a blank flag name, treating it as disabled");
            return false;
        }
        if let Some(value) = self.override_for(flag_name) {
            return value;
        }
        self.computed(flag_name, session)
    }

    fn computed(&self, flag_name: &str, session: &SessionId) -> bool {
        let Some(entry) = self.registry.get(flag_name) else {
            return false;
        };
        let flag = &entry.flag;
        if !flag.enabled || !flag.environments.contains(&self.environment) {
            return false;
        }
        bucket(flag_name, session.as_str()) < flag.rollout_percentage
    }

    /// Force `flag_name` to `value` for the rest of the session.
    pub fn override_flag(&self, flag_name: &str, value: bool) -> Result<(), FlagError> {
        if flag_name.trim().is_empty() {
            return Err(FlagError::InvalidArgument {
                field: "flag_name",
                reason: "must not be empty".to_string(),
            });
        }
        let mut overrides = self
            .overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match overrides.iter_mut().find(|o| o.name == flag_name) {
            Some(existing) => existing.value = value,
            None => overrides.push(FlagOverride {
                name: flag_name.to_string(),
                value,
            }),
        }
        debug!(flag = %flag_name, value, "Flag override set");
        Ok(())
    }

    /// Drop the override for a single flag. Returns whether one existed.
    pub fn remove_override(&self, flag_name: &str) -> bool {
        let mut overrides = self
            .overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = overrides.len();
        overrides.retain(|o| o.name != flag_name);
        before != overrides.len()
    }

    pub fn clear_overrides(&self) {
        let mut overrides = self
            .overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        debug!(count = overrides.len(), "Clearing flag overrides");
        overrides.clear();
    }

    /// Current override stack, oldest first.
    pub fn overrides(&self) -> Vec<FlagOverride> {
        self.overrides
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn override_for(&self, flag_name: &str) -> Option<bool> {
        self.overrides
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|o| o.name == flag_name)
            .map(|o| o.value)
    }

    /// Every registered flag with its static config and effective value.
    pub fn get_all(&self, session: &SessionId) -> Vec<FlagSnapshot> {
        self.registry
            .iter()
            .map(|entry| {
                let name = entry.flag.name.as_str();
                let overridden = self.override_for(name);
                FlagSnapshot {
                    flag: name.to_string(),
                    enabled: overridden.unwrap_or_else(|| self.computed(name, session)),
                    overridden: overridden.is_some(),
                    config: entry.flag.clone(),
                    config_error: entry.config_error.as_ref().map(ToString::to_string),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn flag(name: &str, enabled: bool, envs: &[&str], rollout: f64) -> FeatureFlag {
        FeatureFlag {
            name: name.to_string(),
            enabled,
            environments: envs.iter().map(|e| e.to_string()).collect::<BTreeSet<_>>(),
            rollout_percentage: rollout,
        }
    }

    fn engine(flags: Vec<FeatureFlag>) -> FeatureFlagEngine {
        let mut registry = FlagRegistry::new();
        for f in flags {
            registry.insert(f);
        }
        FeatureFlagEngine::new(registry, "production")
    }

    fn session(id: &str) -> SessionId {
        SessionId::new(id).unwrap()
    }

    #[test]
    fn test_blank_flag_name_is_disabled() {
        let engine = engine(vec![flag("on", true, &["production"], 100.0)]);
        assert!(!engine.is_enabled("", &session("s")));
        assert!(!engine.is_enabled("   ", &session("s")));
        assert!(engine.override_flag("  ", true).is_err());
        assert!(!engine.is_enabled("  ", &session("s")));
    }

    #[test]
    fn test_unknown_flag_is_disabled() {
        let engine = engine(vec![]);
        assert!(!engine.is_enabled("nope", &session("s")));
    }

    #[test]
    fn test_master_switch_and_environment() {
        let engine = engine(vec![
            flag("off", false, &["production"], 100.0),
            flag("staging-only", true, &["staging"], 100.0),
            flag("on", true, &["production"], 100.0),
        ]);
        let s = session("s-1");
        assert!(!engine.is_enabled("off", &s));
        assert!(!engine.is_enabled("staging-only", &s));
        assert!(engine.is_enabled("on", &s));
    }

    #[test]
    fn test_zero_rollout_never_enabled() {
        let engine = engine(vec![flag("dark", true, &["production"], 0.0)]);
        for i in 0..200 {
            assert!(!engine.is_enabled("dark", &session(&format!("s-{i}"))));
        }
    }

    #[test]
    fn test_override_replaces_instead_of_stacking() {
        let engine = engine(vec![]);
        engine.override_flag("beta", true).unwrap();
        engine.override_flag("beta", false).unwrap();
        assert_eq!(engine.overrides().len(), 1);
        assert!(!engine.is_enabled("beta", &session("s")));
        assert!(engine.remove_override("beta"));
        assert!(!engine.remove_override("beta"));
    }

    #[test]
    fn test_override_rejects_empty_name() {
        let engine = engine(vec![]);
        assert!(engine.override_flag("", true).is_err());
    }

    #[test]
    fn test_get_all_reports_effective_values() {
        let engine = engine(vec![
            flag("a", true, &["production"], 100.0),
            flag("b", false, &["production"], 100.0),
        ]);
        engine.override_flag("b", true).unwrap();
        let all = engine.get_all(&session("s"));
        assert_eq!(all.len(), 2);
        let a = all.iter().find(|f| f.flag == "a").unwrap();
        let b = all.iter().find(|f| f.flag == "b").unwrap();
        assert!(a.enabled && !a.overridden);
        assert!(b.enabled && b.overridden);
        assert!(!b.config.enabled);
    }
}
