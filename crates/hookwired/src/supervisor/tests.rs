//! Tests for plugin supervision over in-process plugins.

use std::cell::Cell;
use std::io::{self, PipeReader, PipeWriter};
use std::sync::Arc;
use std::time::Duration;

use hookwire_bridge::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use hookwire_bridge::{FrameWriter, HandshakeConfig};
use hookwire_plugins::HookId;
use hookwire_plugins::api::Driver;
use hookwire_plugins::manifest::ConfigSetting;
use rstest::{fixture, rstest};
use rust_decimal::Decimal;
use serde_json::json;

use super::*;
use crate::api::{DisabledDriver, HostServices, StoreServices};
use crate::configuration::MemoryConfigurationStore;
use crate::kv::MemoryKeyValueStore;
use crate::launcher::InProcessLauncher;
use crate::test_support::{
    PluginProbe, fast_settings, refusing_plugin, surcharge_plugin, virtual_bundle,
};

const PLUGIN: &str = "tax.surcharge";

struct Fixture {
    launcher: InProcessLauncher,
    probe: PluginProbe,
    bundle: BundleInfo,
    services: StoreServices,
}

#[fixture]
fn plugin() -> Fixture {
    let probe = PluginProbe::default();
    let launcher = InProcessLauncher::new();
    launcher.register(PLUGIN, surcharge_plugin(&probe, Decimal::ONE));
    Fixture {
        launcher,
        probe,
        bundle: virtual_bundle(PLUGIN),
        services: StoreServices::new(
            Arc::new(MemoryKeyValueStore::new()),
            Arc::new(MemoryConfigurationStore::new()),
        ),
    }
}

fn start(fixture: &Fixture) -> Result<Supervisor, SupervisorError> {
    let driver: Arc<dyn Driver> = Arc::new(DisabledDriver);
    Supervisor::start(
        &fixture.bundle,
        &fixture.launcher,
        fixture.services.api_for(fixture.bundle.manifest()),
        driver,
        fast_settings(),
    )
}

#[rstest]
fn start_learns_capabilities_before_activation(plugin: Fixture) {
    let supervisor = start(&plugin).expect("supervisor starts");

    assert_eq!(supervisor.state(), SupervisorState::Connected);
    assert!(supervisor.implemented().contains(HookId::CalculateCheckoutTotal));
    assert!(!supervisor.implemented().contains(HookId::Webhook));
    assert_eq!(plugin.probe.activations(), 0);

    supervisor.activate().expect("activation");

    assert_eq!(supervisor.state(), SupervisorState::Activated);
    assert_eq!(plugin.probe.activations(), 1);
}

#[rstest]
fn activation_hands_the_plugin_its_host_api(plugin: Fixture) {
    let supervisor = start(&plugin).expect("supervisor starts");
    supervisor.activate().expect("activation");

    let api = plugin.services.api_for(plugin.bundle.manifest());
    assert_eq!(api.kv_get("activated").expect("kv get"), Some(b"yes".to_vec()));
}

#[rstest]
fn failing_activate_hook_is_reported(plugin: Fixture) {
    plugin.launcher.register(PLUGIN, refusing_plugin(&plugin.probe));
    let supervisor = start(&plugin).expect("supervisor starts");

    let result = supervisor.activate();

    assert!(matches!(result, Err(SupervisorError::Activation { .. })));
}

#[rstest]
fn health_check_passes_for_live_plugin(plugin: Fixture) {
    let supervisor = start(&plugin).expect("supervisor starts");

    supervisor.perform_health_check().expect("healthy");

    assert_eq!(supervisor.state(), SupervisorState::Healthy);
    assert!(supervisor.is_healthy());
}

#[rstest]
fn health_check_fails_once_process_has_exited(plugin: Fixture) {
    let supervisor = start(&plugin).expect("supervisor starts");
    plugin.launcher.simulate_exit();

    let result = supervisor.perform_health_check();

    assert!(matches!(result, Err(SupervisorError::ProcessExited { .. })));
    assert_eq!(supervisor.state(), SupervisorState::Unhealthy);
    assert!(!supervisor.is_healthy());
}

#[rstest]
fn handshake_mismatch_aborts_start(plugin: Fixture) {
    let launcher = InProcessLauncher::new().with_handshake(HandshakeConfig::new(
        1,
        "HOOKWIRE_PLUGIN_MAGIC_COOKIE",
        "not-the-cookie",
    ));
    launcher.register(PLUGIN, surcharge_plugin(&plugin.probe, Decimal::ONE));
    let fixture = Fixture { launcher, ..plugin };

    let result = start(&fixture);

    assert!(matches!(result, Err(SupervisorError::Handshake { .. })));
    assert_eq!(fixture.probe.activations(), 0);
}

#[rstest]
fn unknown_plugin_fails_to_launch(plugin: Fixture) {
    let fixture = Fixture {
        bundle: virtual_bundle("tax.unknown"),
        ..plugin
    };

    assert!(matches!(start(&fixture), Err(SupervisorError::Launch(_))));
}

#[rstest]
fn shutdown_is_idempotent(plugin: Fixture) {
    let supervisor = start(&plugin).expect("supervisor starts");
    supervisor.activate().expect("activation");

    supervisor.shutdown();
    supervisor.shutdown();

    assert_eq!(supervisor.state(), SupervisorState::Terminated);
    assert!(supervisor.hooks().is_none());
    assert!(!supervisor.is_healthy());
    assert!(supervisor.perform_health_check().is_err());
}

#[rstest]
#[case::always_failing(3, usize::MAX, false, 3)]
#[case::fails_once_then_recovers(3, 1, true, 2)]
#[case::first_ping_succeeds(3, 0, true, 1)]
#[case::zero_attempts_still_pings_once(0, usize::MAX, false, 1)]
fn retry_health_check_is_bounded(
    #[case] attempts: u32,
    #[case] failures: usize,
    #[case] succeeds: bool,
    #[case] expected_calls: usize,
) {
    let calls = Cell::new(0_usize);

    let result = retry_health_check(attempts, Duration::from_millis(1), || {
        let call = calls.get();
        calls.set(call + 1);
        if call < failures {
            Err("no pong")
        } else {
            Ok(())
        }
    });

    assert_eq!(result.is_ok(), succeeds);
    assert_eq!(calls.get(), expected_calls);
}

/// Plugin side of a scripted connection, released when the process is
/// killed so blocked host writes fail.
type PeerEnds = Arc<Mutex<Option<(FrameReader<PipeReader>, FrameWriter<PipeWriter>)>>>;

struct ScriptedProcess {
    killed: Arc<AtomicBool>,
    silent_writer: Option<PipeWriter>,
    peer: PeerEnds,
}

impl PluginProcess for ScriptedProcess {
    fn has_exited(&mut self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    fn kill(&mut self) {
        self.killed.store(true, Ordering::Release);
        drop(self.silent_writer.take());
        drop(self.peer.lock().expect("peer lock").take());
    }

    fn wait(&mut self) {}
}

/// Launches a process that never writes anything.
struct SilentLauncher {
    killed: Arc<AtomicBool>,
}

impl PluginLauncher for SilentLauncher {
    fn launch(&self, _bundle: &BundleInfo) -> Result<LaunchedPlugin, LaunchError> {
        let (reader, silent_writer) = io::pipe().expect("pipe");
        Ok(LaunchedPlugin {
            reader: Box::new(reader),
            writer: Box::new(io::sink()),
            process: Box::new(ScriptedProcess {
                killed: Arc::clone(&self.killed),
                silent_writer: Some(silent_writer),
                peer: PeerEnds::default(),
            }),
        })
    }
}

/// Launches a process that completes the handshake, reports no hooks and
/// then stops reading its input.
struct StallingLauncher {
    killed: Arc<AtomicBool>,
    peer: PeerEnds,
}

impl PluginLauncher for StallingLauncher {
    fn launch(&self, _bundle: &BundleInfo) -> Result<LaunchedPlugin, LaunchError> {
        let (host_reader, peer_writer) = io::pipe().expect("pipe");
        let (peer_reader, host_writer) = io::pipe().expect("pipe");
        let parked = Arc::clone(&self.peer);
        thread::spawn(move || {
            let mut writer = FrameWriter::new(peer_writer);
            HandshakeConfig::default().send(&mut writer).expect("handshake");
            let mut reader = FrameReader::new(peer_reader);
            let frame = reader.read_frame().expect("introspection request");
            let request: JsonRpcRequest =
                serde_json::from_slice(&frame.payload).expect("request");
            let hooks = serde_json::to_value(HookSet::default()).expect("hook set");
            let reply = serde_json::to_vec(&JsonRpcResponse::success(request.id, hooks))
                .expect("reply");
            writer.write_frame(frame.stream, &reply).expect("reply frame");
            *parked.lock().expect("peer lock") = Some((reader, writer));
        });
        Ok(LaunchedPlugin {
            reader: Box::new(host_reader),
            writer: Box::new(host_writer),
            process: Box::new(ScriptedProcess {
                killed: Arc::clone(&self.killed),
                silent_writer: None,
                peer: Arc::clone(&self.peer),
            }),
        })
    }
}

fn start_with(
    fixture: &Fixture,
    launcher: &dyn PluginLauncher,
    settings: SupervisorSettings,
) -> Result<Supervisor, SupervisorError> {
    Supervisor::start(
        &fixture.bundle,
        launcher,
        fixture.services.api_for(fixture.bundle.manifest()),
        Arc::new(DisabledDriver),
        settings,
    )
}

#[rstest]
fn silent_plugin_fails_the_handshake_in_time(plugin: Fixture) {
    let killed = Arc::new(AtomicBool::new(false));
    let launcher = SilentLauncher {
        killed: Arc::clone(&killed),
    };
    let settings = SupervisorSettings {
        handshake_timeout: Duration::from_millis(100),
        ..fast_settings()
    };

    let began = Instant::now();
    let result = start_with(&plugin, &launcher, settings);

    assert!(matches!(
        result,
        Err(SupervisorError::Handshake { source: BridgeError::Handshake { .. }, .. })
    ));
    assert!(began.elapsed() < Duration::from_secs(5));
    assert!(killed.load(Ordering::Acquire));
}

#[rstest]
fn shutdown_kills_a_plugin_that_stopped_reading(plugin: Fixture) {
    let killed = Arc::new(AtomicBool::new(false));
    let launcher = StallingLauncher {
        killed: Arc::clone(&killed),
        peer: PeerEnds::default(),
    };
    let settings = SupervisorSettings {
        shutdown_grace: Duration::from_millis(200),
        ..fast_settings()
    };
    let supervisor = start_with(&plugin, &launcher, settings).expect("supervisor starts");
    let give_up = Instant::now() + Duration::from_secs(5);
    while launcher.peer.lock().expect("peer lock").is_none() && Instant::now() < give_up {
        thread::sleep(Duration::from_millis(10));
    }

    let hooks = supervisor.hooks().expect("hooks");
    let flooding = thread::spawn(move || {
        let blob = ConfigSetting::new("blob", json!("x".repeat(1 << 20)));
        hooks.on_configuration_change(&[blob])
    });
    thread::sleep(Duration::from_millis(100));

    let began = Instant::now();
    supervisor.shutdown();

    assert!(began.elapsed() < Duration::from_secs(5));
    assert!(killed.load(Ordering::Acquire));
    assert_eq!(supervisor.state(), SupervisorState::Terminated);
    assert!(flooding.join().expect("flooding thread").is_err());
}
