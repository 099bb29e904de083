//! Shared fixtures for host-side tests.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hookwire_plugins::manifest::{ConfigSetting, ServerComponent, WebappComponent};
use hookwire_plugins::model::PriceQuery;
use hookwire_plugins::sdk::HostHandle;
use hookwire_plugins::{BundleInfo, HookError, HookId, HookSet, Manifest, PluginHooks, TaxedMoney};
use rust_decimal::Decimal;

use crate::launcher::PluginFactory;
use crate::supervisor::SupervisorSettings;

/// Counters observed by the tests.
#[derive(Clone, Default)]
pub(crate) struct PluginProbe {
    pub(crate) activations: Arc<AtomicUsize>,
    pub(crate) deactivations: Arc<AtomicUsize>,
    pub(crate) configurations: Arc<Mutex<Vec<Vec<ConfigSetting>>>>,
}

impl PluginProbe {
    pub(crate) fn activations(&self) -> usize {
        self.activations.load(Ordering::Acquire)
    }

    pub(crate) fn deactivations(&self) -> usize {
        self.deactivations.load(Ordering::Acquire)
    }
}

/// Plugin that adds a fixed amount to checkout totals.
pub(crate) struct SurchargePlugin {
    probe: PluginProbe,
    host: HostHandle,
    surcharge: Decimal,
    refuse_activation: bool,
}

impl PluginHooks for SurchargePlugin {
    fn implemented(&self) -> Result<HookSet, HookError> {
        Ok([
            HookId::OnActivate,
            HookId::OnDeactivate,
            HookId::OnConfigurationChange,
            HookId::CalculateCheckoutTotal,
        ]
        .into_iter()
        .collect())
    }

    fn on_activate(&self) -> Result<(), HookError> {
        self.probe.activations.fetch_add(1, Ordering::AcqRel);
        if self.refuse_activation {
            return Err(HookError::plugin("activation refused"));
        }
        if let Some(api) = self.host.api() {
            api.kv_set("activated", b"yes")?;
        }
        Ok(())
    }

    fn on_deactivate(&self) -> Result<(), HookError> {
        self.probe.deactivations.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn on_configuration_change(&self, configuration: &[ConfigSetting]) -> Result<(), HookError> {
        self.probe
            .configurations
            .lock()
            .expect("probe lock")
            .push(configuration.to_vec());
        Ok(())
    }

    fn calculate_price(
        &self,
        query: &PriceQuery,
        previous: &TaxedMoney,
    ) -> Result<TaxedMoney, HookError> {
        if query.hook_id() != HookId::CalculateCheckoutTotal {
            return Err(HookError::not_implemented(query.hook_id()));
        }
        let mut next = previous.clone();
        next.net.amount += self.surcharge;
        next.gross.amount += self.surcharge;
        Ok(next)
    }
}

/// Factory for a [`SurchargePlugin`].
pub(crate) fn surcharge_plugin(probe: &PluginProbe, surcharge: Decimal) -> PluginFactory {
    let shared = probe.clone();
    Arc::new(move |host| {
        Arc::new(SurchargePlugin {
            probe: shared.clone(),
            host,
            surcharge,
            refuse_activation: false,
        }) as Arc<dyn PluginHooks>
    })
}

/// Factory for a plugin whose activate hook fails.
pub(crate) fn refusing_plugin(probe: &PluginProbe) -> PluginFactory {
    let shared = probe.clone();
    Arc::new(move |host| {
        Arc::new(SurchargePlugin {
            probe: shared.clone(),
            host,
            surcharge: Decimal::ZERO,
            refuse_activation: true,
        }) as Arc<dyn PluginHooks>
    })
}

/// Manifest with a server component.
pub(crate) fn server_manifest(id: &str) -> Manifest {
    Manifest::new(id, id, "1.0.0").with_server(ServerComponent::new("bin/plugin"))
}

/// Bundle whose path is never touched by the in-process launcher.
pub(crate) fn virtual_bundle(id: &str) -> BundleInfo {
    BundleInfo::new(Path::new("/nonexistent").join(id), server_manifest(id))
}

/// Writes a bundle directory holding `manifest` under `root`.
pub(crate) fn write_bundle(root: &Path, manifest: &Manifest) -> BundleInfo {
    let directory = root.join(manifest.id());
    std::fs::create_dir_all(&directory).expect("bundle directory");
    let json = serde_json::to_vec_pretty(manifest).expect("manifest json");
    std::fs::write(directory.join("plugin.json"), json).expect("manifest file");
    if let Some(webapp) = manifest.webapp() {
        let bundle_file = directory.join(webapp.bundle_path());
        if let Some(parent) = bundle_file.parent() {
            std::fs::create_dir_all(parent).expect("webapp directory");
        }
        std::fs::write(bundle_file, b"console.log('hi');").expect("webapp bundle");
    }
    BundleInfo::new(directory, manifest.clone())
}

/// Manifest with only a webapp component.
pub(crate) fn webapp_manifest(id: &str) -> Manifest {
    Manifest::new(id, id, "1.0.0").with_webapp(WebappComponent::new("webapp/main.js"))
}

/// Settings that keep tests quick.
pub(crate) fn fast_settings() -> SupervisorSettings {
    SupervisorSettings {
        ping_attempts: 2,
        ping_retry_delay: Duration::from_millis(10),
        ping_deadline: Duration::from_secs(2),
        shutdown_grace: Duration::from_secs(2),
        hook_deadline: Some(Duration::from_secs(5)),
        ..SupervisorSettings::default()
    }
}
