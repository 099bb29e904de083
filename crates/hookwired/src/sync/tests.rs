//! Tests for reconciling plugin activation flags.

use std::path::Path;
use std::sync::Arc;

use rstest::{fixture, rstest};
use rust_decimal::Decimal;
use semver::Version;
use tempfile::TempDir;

use super::*;
use crate::api::StoreServices;
use crate::configuration::MemoryConfigurationStore;
use crate::environment::EnvironmentSettings;
use crate::kv::MemoryKeyValueStore;
use crate::launcher::{InProcessLauncher, PluginLauncher};
use crate::test_support::{
    PluginProbe, fast_settings, refusing_plugin, server_manifest, surcharge_plugin, write_bundle,
};

struct Harness {
    root: TempDir,
    environment: Environment,
}

#[fixture]
fn harness() -> Harness {
    let root = TempDir::new().expect("temp dir");
    let probe = PluginProbe::default();
    let launcher = InProcessLauncher::new();
    for id in ["tax.alpha", "tax.beta", "tax.gamma"] {
        launcher.register(id, surcharge_plugin(&probe, Decimal::ONE));
        write_bundle(root.path(), &server_manifest(id));
    }
    launcher.register("tax.broken", refusing_plugin(&probe));
    write_bundle(root.path(), &server_manifest("tax.broken"));

    let mut settings =
        EnvironmentSettings::new(root.path(), root.path().join(".webapps"), Version::new(3, 0, 0));
    settings.supervisor = fast_settings();
    let environment = Environment::new(
        settings,
        Arc::new(launcher) as Arc<dyn PluginLauncher>,
        Arc::new(StoreServices::new(
            Arc::new(MemoryKeyValueStore::new()),
            Arc::new(MemoryConfigurationStore::new()),
        )),
    );
    Harness { root, environment }
}

fn flags(entries: &[(&str, bool)]) -> HashMap<String, bool> {
    entries
        .iter()
        .map(|(id, active)| ((*id).to_owned(), *active))
        .collect()
}

#[rstest]
#[case::single_worker(1)]
#[case::pooled(3)]
fn flagged_plugins_are_activated(harness: Harness, #[case] workers: usize) {
    let report = sync_active_state(
        &harness.environment,
        &flags(&[("tax.alpha", true), ("tax.beta", true), ("tax.gamma", false)]),
        workers,
    )
    .expect("sync");

    assert_eq!(report.activated, vec!["tax.alpha", "tax.beta"]);
    assert!(report.deactivated.is_empty());
    assert!(report.failed.is_empty());
    assert!(!harness.environment.is_active("tax.gamma"));
}

#[rstest]
fn unflagged_running_plugins_are_stopped(harness: Harness) {
    harness.environment.activate("tax.alpha").expect("alpha");
    harness.environment.activate("tax.gamma").expect("gamma");

    let report = sync_active_state(
        &harness.environment,
        &flags(&[("tax.alpha", true), ("tax.gamma", false)]),
        2,
    )
    .expect("sync");

    assert!(report.activated.is_empty());
    assert_eq!(report.deactivated, vec!["tax.gamma"]);
    assert!(harness.environment.is_active("tax.alpha"));
}

#[rstest]
fn removed_bundles_are_stopped(harness: Harness) {
    harness.environment.activate("tax.beta").expect("beta");
    std::fs::remove_dir_all(harness.root.path().join("tax.beta")).expect("remove bundle");

    let report =
        sync_active_state(&harness.environment, &flags(&[("tax.beta", true)]), 2).expect("sync");

    assert_eq!(report.deactivated, vec!["tax.beta"]);
    assert!(!harness.environment.is_active("tax.beta"));
}

#[rstest]
fn failures_do_not_stop_other_activations(harness: Harness) {
    let report = sync_active_state(
        &harness.environment,
        &flags(&[("tax.broken", true), ("tax.gamma", true)]),
        2,
    )
    .expect("sync");

    assert_eq!(report.activated, vec!["tax.gamma"]);
    let failed: Vec<&str> = report.failed.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(failed, vec!["tax.broken"]);
}

#[test]
fn missing_plugin_directory_is_an_error() {
    let root = TempDir::new().expect("temp dir");
    let missing = root.path().join("absent");
    let environment = Environment::new(
        EnvironmentSettings::new(&missing, Path::new("/tmp"), Version::new(3, 0, 0)),
        Arc::new(InProcessLauncher::new()) as Arc<dyn PluginLauncher>,
        Arc::new(StoreServices::new(
            Arc::new(MemoryKeyValueStore::new()),
            Arc::new(MemoryConfigurationStore::new()),
        )),
    );

    assert!(sync_active_state(&environment, &HashMap::new(), 1).is_err());
}
