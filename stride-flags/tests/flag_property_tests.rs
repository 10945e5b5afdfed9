use std::collections::BTreeMap;

use proptest::prelude::*;
use stride_core::SessionId;
use stride_flags::{FeatureFlagEngine, FlagRegistry};
use stride_test_utils::generators::{arb_flag_name, arb_rollout, arb_session_id};

fn registry_from(src: &str) -> FlagRegistry {
    let table: BTreeMap<String, toml::Value> = toml::from_str(src).unwrap();
    FlagRegistry::from_config(&table)
}

fn flag_engine(name: &str, percentage: f64) -> FeatureFlagEngine {
    let registry = registry_from(&format!(
        r#"
        ["{name}"]
        enabled = true
        environments = ["production"]
        rollout_percentage = {percentage:?}
        "#
    ));
    FeatureFlagEngine::new(registry, "production")
}

fn rollout_engine(percentage: f64) -> FeatureFlagEngine {
    flag_engine("live-leaderboard", percentage)
}

#[test]
fn rollout_fraction_tracks_percentage() {
    let engine = rollout_engine(30.0);
    let enabled = (0..10_000)
        .filter(|i| {
            let session = SessionId::new(format!("session-{i}")).unwrap();
            engine.is_enabled("live-leaderboard", &session)
        })
        .count();
    let fraction = enabled as f64 / 10_000.0;
    assert!(
        (fraction - 0.30).abs() <= 0.03,
        "fraction {fraction} outside tolerance"
    );
}

#[test]
fn override_forces_value_until_cleared() {
    let engine = rollout_engine(0.0);
    let session = SessionId::new("player-1").unwrap();
    assert!(!engine.is_enabled("live-leaderboard", &session));

    engine.override_flag("live-leaderboard", true).unwrap();
    assert!(engine.is_enabled("live-leaderboard", &session));

    engine.clear_overrides();
    assert!(!engine.is_enabled("live-leaderboard", &session));
    assert!(engine.overrides().is_empty());
}

#[test]
fn malformed_registry_entry_never_breaks_evaluation() {
    let registry = registry_from(
        r#"
        [broken]
        enabled = "yes"
        environments = ["production"]
        rollout_percentage = 100

        [healthy]
        enabled = true
        environments = ["production"]
        rollout_percentage = 100
        "#,
    );
    let engine = FeatureFlagEngine::new(registry, "production");
    let session = SessionId::generate();

    assert!(!engine.is_enabled("broken", &session));
    assert!(engine.is_enabled("healthy", &session));

    let all = engine.get_all(&session);
    let broken = all.iter().find(|f| f.flag == "broken").unwrap();
    assert!(broken.config_error.is_some());
    assert!(!broken.enabled);

    let exported = serde_json::to_value(&all).unwrap();
    assert_eq!(exported.as_array().unwrap().len(), 2);
}

proptest! {
    #[test]
    fn evaluation_is_pure(
        name in arb_flag_name(),
        session in arb_session_id(),
        pct in arb_rollout(),
    ) {
        let engine = flag_engine(&name, pct);
        let session = SessionId::new(session).unwrap();
        let first = engine.is_enabled(&name, &session);
        for _ in 0..5 {
            prop_assert_eq!(engine.is_enabled(&name, &session), first);
        }
        // A second engine built from the same registry agrees.
        prop_assert_eq!(flag_engine(&name, pct).is_enabled(&name, &session), first);
    }

    #[test]
    fn full_rollout_enables_everyone(name in arb_flag_name(), session in arb_session_id()) {
        let engine = flag_engine(&name, 100.0);
        let session = SessionId::new(session).unwrap();
        prop_assert!(engine.is_enabled(&name, &session));
    }

    #[test]
    fn zero_rollout_enables_nobody(name in arb_flag_name(), session in arb_session_id()) {
        let engine = flag_engine(&name, 0.0);
        let session = SessionId::new(session).unwrap();
        prop_assert!(!engine.is_enabled(&name, &session));
    }
}
