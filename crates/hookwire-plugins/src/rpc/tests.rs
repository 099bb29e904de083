//! End-to-end tests of the hook stubs against an in-process plugin.

use std::collections::BTreeMap;
use std::io;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use hookwire_bridge::{
    BridgeError, FrameReader, HandshakeConfig, Multiplexer, RemoteError, Side, StreamId,
};
use rstest::{fixture, rstest};
use rust_decimal::Decimal;
use serde_json::{Value, json};

use super::*;
use crate::api::{Driver, ExecResult, HostApi, KvSetOptions, LogLevel, Row};
use crate::hooks::{HookError, HookId, HookSet, PluginHooks};
use crate::manifest::ConfigSetting;
use crate::model::{Checkout, CheckoutLine, PriceQuery};
use crate::money::{Money, TaxedMoney};
use crate::sdk::{self, HostHandle, SdkError};

const DEADLINE: Option<Duration> = Some(Duration::from_secs(5));

#[derive(Default)]
struct MemoryApi {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    configuration: Vec<ConfigSetting>,
}

impl HostApi for MemoryApi {
    fn kv_set_with_options(
        &self,
        key: &str,
        value: Option<&[u8]>,
        _options: &KvSetOptions,
    ) -> Result<bool, RemoteError> {
        let mut entries = self.entries.lock().expect("lock");
        match value {
            Some(bytes) => entries.insert(key.to_owned(), bytes.to_vec()),
            None => entries.remove(key),
        };
        Ok(true)
    }

    fn kv_get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        Ok(self.entries.lock().expect("lock").get(key).cloned())
    }

    fn kv_delete(&self, key: &str) -> Result<(), RemoteError> {
        self.entries.lock().expect("lock").remove(key);
        Ok(())
    }

    fn kv_delete_all(&self) -> Result<(), RemoteError> {
        self.entries.lock().expect("lock").clear();
        Ok(())
    }

    fn kv_list(&self, _page: u32, _per_page: u32) -> Result<Vec<String>, RemoteError> {
        Ok(self.entries.lock().expect("lock").keys().cloned().collect())
    }

    fn load_configuration(&self) -> Result<Vec<ConfigSetting>, RemoteError> {
        Ok(self.configuration.clone())
    }

    fn log(&self, _level: LogLevel, _message: &str) -> Result<(), RemoteError> {
        Ok(())
    }
}

struct EmptyDriver;

impl Driver for EmptyDriver {
    fn query(&self, _statement: &str, _args: &[Value]) -> Result<Vec<Row>, RemoteError> {
        Err(RemoteError::NoRows)
    }

    fn exec(&self, _statement: &str, _args: &[Value]) -> Result<ExecResult, RemoteError> {
        Ok(ExecResult::default())
    }
}

/// Doubles prices, fails shipping, declines everything else and records
/// what it sees from the host while activating.
struct Doubler {
    host: HostHandle,
    seen_configuration: Arc<Mutex<Vec<ConfigSetting>>>,
}

impl PluginHooks for Doubler {
    fn implemented(&self) -> Result<HookSet, HookError> {
        Ok(HookSet::empty()
            .with(HookId::OnActivate)
            .with(HookId::CalculateCheckoutTotal))
    }

    fn on_activate(&self) -> Result<(), HookError> {
        let api = self.host.api().ok_or_else(|| HookError::plugin("not connected"))?;
        api.kv_set("activated", b"yes")?;
        let driver = self.host.driver().ok_or_else(|| HookError::plugin("no driver"))?;
        match driver.query("select 1", &[]) {
            Err(RemoteError::NoRows) => Ok(()),
            other => Err(HookError::plugin(format!("unexpected driver answer {other:?}"))),
        }
    }

    fn on_configuration_change(&self, configuration: &[ConfigSetting]) -> Result<(), HookError> {
        *self.seen_configuration.lock().expect("lock") = configuration.to_vec();
        Ok(())
    }

    fn calculate_price(
        &self,
        query: &PriceQuery,
        previous: &TaxedMoney,
    ) -> Result<TaxedMoney, HookError> {
        match query {
            PriceQuery::CheckoutTotal { .. } => {
                previous.checked_mul(Decimal::TWO).map_err(HookError::plugin)
            }
            PriceQuery::CheckoutShipping { .. } => Err(HookError::Plugin(RemoteError::Application {
                id: "shipping.unavailable".into(),
                message: "no carrier".into(),
                status: 422,
            })),
            other => Err(HookError::not_implemented(other.hook_id())),
        }
    }
}

struct Harness {
    hooks: HooksClient,
    mux: Multiplexer,
    api: Arc<MemoryApi>,
    healthy: Arc<AtomicBool>,
    seen_configuration: Arc<Mutex<Vec<ConfigSetting>>>,
    plugin: Option<JoinHandle<Result<(), SdkError>>>,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.mux.close();
        if let Some(plugin) = self.plugin.take() {
            plugin.join().ok();
        }
    }
}

#[fixture]
fn harness() -> Harness {
    let (host_reader, plugin_writer) = io::pipe().expect("pipe");
    let (plugin_reader, host_writer) = io::pipe().expect("pipe");
    let seen_configuration = Arc::new(Mutex::new(Vec::new()));
    let plugin_seen = Arc::clone(&seen_configuration);
    let plugin = thread::spawn(move || {
        sdk::serve_connection(
            plugin_reader,
            plugin_writer,
            &HandshakeConfig::default(),
            move |host| {
                Arc::new(Doubler {
                    host,
                    seen_configuration: plugin_seen,
                }) as Arc<dyn PluginHooks>
            },
        )
    });

    let mut reader = FrameReader::new(host_reader);
    HandshakeConfig::default()
        .receive(&mut reader)
        .expect("handshake");
    let mux = Multiplexer::start(reader, host_writer, Side::Host).expect("host mux");
    let api = Arc::new(MemoryApi {
        configuration: vec![ConfigSetting::new("rate", json!("2"))],
        ..MemoryApi::default()
    });
    let healthy = Arc::new(AtomicBool::new(true));
    let hooks = HooksClient::connect(
        &mux,
        Arc::clone(&api) as Arc<dyn HostApi>,
        Arc::new(EmptyDriver),
        DEADLINE,
    )
    .expect("dial hooks")
    .with_health_flag(Arc::clone(&healthy));
    Harness {
        hooks,
        mux,
        api,
        healthy,
        seen_configuration,
        plugin: Some(plugin),
    }
}

fn usd(amount: &str) -> TaxedMoney {
    TaxedMoney::untaxed(Money::new(
        Decimal::from_str(amount).expect("decimal"),
        "USD",
    ))
}

#[rstest]
fn implemented_reports_plugin_hooks(harness: Harness) {
    let implemented = harness.hooks.implemented().expect("implemented");

    assert!(implemented.contains(HookId::CalculateCheckoutTotal));
    assert!(!implemented.contains(HookId::Webhook));
}

#[rstest]
fn activation_connects_host_services(harness: Harness) {
    harness.hooks.on_activate().expect("activate");

    assert_eq!(
        harness.api.kv_get("activated").expect("get"),
        Some(b"yes".to_vec())
    );
    assert_eq!(
        *harness.seen_configuration.lock().expect("lock"),
        vec![ConfigSetting::new("rate", json!("2"))]
    );
}

#[rstest]
fn priced_hooks_round_trip(harness: Harness) {
    let query = PriceQuery::CheckoutTotal {
        checkout: Checkout::default(),
    };

    let total = harness
        .hooks
        .calculate_price(&query, &usd("10.25"))
        .expect("price");

    assert_eq!(total, usd("20.50"));
}

#[rstest]
fn declined_hooks_come_back_as_not_implemented(harness: Harness) {
    let query = PriceQuery::CheckoutLineUnitPrice {
        checkout: Checkout::default(),
        line: CheckoutLine::default(),
    };

    let result = harness.hooks.calculate_price(&query, &usd("1.00"));

    assert!(matches!(
        result,
        Err(HookError::NotImplemented {
            hook: HookId::CalculateCheckoutLineUnitPrice
        })
    ));
    assert!(harness.hooks.webhook(&Default::default()).is_err_and(|e| e.is_not_implemented()));
}

#[rstest]
fn structured_plugin_errors_survive_the_boundary(harness: Harness) {
    let query = PriceQuery::CheckoutShipping {
        checkout: Checkout::default(),
    };

    let result = harness.hooks.calculate_price(&query, &usd("1.00"));

    assert!(matches!(
        result,
        Err(HookError::Plugin(RemoteError::Application { status: 422, .. }))
    ));
}

#[rstest]
fn control_stream_answers_ping_and_quit(mut harness: Harness) {
    let control = ControlClient::new(harness.mux.dial(StreamId::CONTROL).expect("dial control"));

    control.ping(Duration::from_secs(5)).expect("ping");
    control.quit(Duration::from_secs(5)).expect("quit");

    let plugin = harness.plugin.take().expect("plugin thread");
    assert!(plugin.join().expect("join").is_ok());
}

#[rstest]
fn transport_failure_clears_health_flag(harness: Harness) {
    let control = ControlClient::new(harness.mux.dial(StreamId::CONTROL).expect("dial control"));
    control.quit(Duration::from_secs(5)).expect("quit");
    let give_up = Instant::now() + Duration::from_secs(5);
    while !harness.mux.is_closed() && Instant::now() < give_up {
        thread::sleep(Duration::from_millis(10));
    }

    let result = harness.hooks.implemented();

    assert!(result.is_err_and(|error| error.is_transport()));
    assert!(!harness.healthy.load(Ordering::Acquire));
    assert!(matches!(
        harness.mux.dial(StreamId::new(40)),
        Err(BridgeError::ConnectionLost)
    ));
}
