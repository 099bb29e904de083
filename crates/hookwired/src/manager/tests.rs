//! Tests for chained and single-dispatch hooks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use hookwire_bridge::RemoteError;
use hookwire_plugins::manifest::{ServerComponent, SettingField};
use hookwire_plugins::{HookSet, MockPluginHooks, Money};
use rstest::rstest;
use serde_json::json;

use super::*;
use crate::configuration::MemoryConfigurationStore;

struct FakeSource {
    plugins: Vec<ActivePlugin>,
}

impl PluginSource for FakeSource {
    fn active_plugins(&self) -> Vec<ActivePlugin> {
        self.plugins.clone()
    }

    fn manifest(&self, plugin_id: &str) -> Option<Manifest> {
        self.plugins
            .iter()
            .find(|plugin| plugin.manifest.id() == plugin_id)
            .map(|plugin| plugin.manifest.clone())
    }
}

fn manifest(id: &str) -> Manifest {
    Manifest::new(id, id, "1.0.0").with_server(ServerComponent::new("bin/plugin"))
}

fn active(manifest: Manifest, hooks: MockPluginHooks, implemented: &[HookId]) -> ActivePlugin {
    ActivePlugin {
        manifest,
        hooks: Arc::new(hooks),
        implemented: implemented.iter().copied().collect::<HookSet>(),
        discovery_index: 0,
    }
}

fn manager_over(registered: Vec<ActivePlugin>) -> (PluginManager, Arc<MemoryConfigurationStore>) {
    let plugins = registered
        .into_iter()
        .enumerate()
        .map(|(index, plugin)| ActivePlugin {
            discovery_index: index,
            ..plugin
        })
        .collect();
    let store = Arc::new(MemoryConfigurationStore::new());
    let manager = PluginManager::new(
        Arc::new(FakeSource { plugins }),
        Arc::clone(&store) as Arc<dyn ConfigurationStore>,
    );
    (manager, store)
}

fn usd(cents: i64) -> TaxedMoney {
    TaxedMoney::untaxed(Money::new(Decimal::new(cents, 2), "USD"))
}

fn checkout() -> Checkout {
    Checkout {
        id: "checkout-1".to_owned(),
        channel_id: "default-channel".to_owned(),
        currency: "USD".to_owned(),
        ..Checkout::default()
    }
}

fn total_query() -> PriceQuery {
    PriceQuery::CheckoutTotal {
        checkout: checkout(),
    }
}

fn declining() -> MockPluginHooks {
    let mut hooks = MockPluginHooks::new();
    hooks
        .expect_calculate_price()
        .returning(|query, _| Err(HookError::not_implemented(query.hook_id())));
    hooks
}

fn adding(cents: i64) -> MockPluginHooks {
    let mut hooks = MockPluginHooks::new();
    hooks.expect_calculate_price().returning(move |_, previous| {
        let mut next = previous.clone();
        next.net.amount += Decimal::new(cents, 2);
        next.gross.amount += Decimal::new(cents, 2);
        Ok(next)
    });
    hooks
}

const PRICING: &[HookId] = &[HookId::CalculateCheckoutTotal, HookId::CalculateCheckoutLineTotal];

#[test]
fn declining_plugin_leaves_the_default_quantized() {
    let (manager, _) = manager_over(vec![active(manifest("tax.none"), declining(), PRICING)]);

    let total = manager
        .calculate_price(&total_query(), usd(1000))
        .expect("dispatch");

    assert_eq!(total, usd(1000));
    assert_eq!(total.gross.amount.to_string(), "10.00");
}

#[test]
fn chained_money_is_rounded_up_to_minor_units() {
    let mut hooks = MockPluginHooks::new();
    hooks.expect_calculate_price().returning(|_, previous| {
        let mut next = previous.clone();
        next.gross.amount += Decimal::new(1, 3);
        Ok(next)
    });
    let (manager, _) = manager_over(vec![active(manifest("tax.fraction"), hooks, PRICING)]);

    let total = manager
        .calculate_price(&total_query(), usd(1000))
        .expect("dispatch");

    assert_eq!(total.gross.amount, Decimal::new(1001, 2));
    assert_eq!(total.net.amount, Decimal::new(1000, 2));
}

#[test]
fn not_implemented_falls_through_to_the_next_plugin() {
    let (manager, _) = manager_over(vec![
        active(manifest("tax.none"), declining(), PRICING),
        active(manifest("tax.flat"), adding(250), PRICING),
    ]);

    let total = manager
        .calculate_price(&total_query(), usd(1000))
        .expect("dispatch");

    assert_eq!(total, usd(1250));
}

#[test]
fn a_failing_plugin_aborts_the_chain() {
    let mut failing = MockPluginHooks::new();
    failing
        .expect_calculate_price()
        .returning(|_, _| Err(HookError::plugin("tax service down")));
    let mut never = MockPluginHooks::new();
    never.expect_calculate_price().never();
    let (manager, _) = manager_over(vec![
        active(manifest("tax.broken"), failing, PRICING),
        active(manifest("tax.flat"), never, PRICING),
    ]);

    let result = manager.calculate_price(&total_query(), usd(1000));

    assert!(matches!(
        result,
        Err(DispatchError::Hook { plugin_id, hook: HookId::CalculateCheckoutTotal, .. })
            if plugin_id == "tax.broken"
    ));
}

#[test]
fn plugins_without_the_capability_are_skipped() {
    let mut hooks = MockPluginHooks::new();
    hooks.expect_calculate_price().never();
    let (manager, _) = manager_over(vec![active(
        manifest("tax.shipping"),
        hooks,
        &[HookId::CalculateCheckoutShipping],
    )]);

    let total = manager
        .calculate_price(&total_query(), usd(500))
        .expect("dispatch");

    assert_eq!(total, usd(500));
}

#[test]
fn lower_priority_values_run_first() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let recording = |name: &'static str| {
        let seen = Arc::clone(&order);
        let mut hooks = MockPluginHooks::new();
        hooks.expect_calculate_price().returning(move |_, previous| {
            seen.lock().expect("order lock").push(name);
            Ok(previous.clone())
        });
        hooks
    };
    let (manager, _) = manager_over(vec![
        active(manifest("tax.late").with_priority(10), recording("late"), PRICING),
        active(manifest("tax.first"), recording("first"), PRICING),
        active(manifest("tax.second"), recording("second"), PRICING),
    ]);

    manager
        .calculate_price(&total_query(), usd(100))
        .expect("dispatch");

    assert_eq!(*order.lock().expect("order lock"), vec!["first", "second", "late"]);
}

#[test]
fn subtotal_sums_the_priced_lines() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut hooks = MockPluginHooks::new();
    hooks.expect_calculate_price().returning(move |query, previous| {
        counter.fetch_add(1, Ordering::AcqRel);
        match query {
            PriceQuery::CheckoutLineTotal { .. } => {
                let mut next = previous.clone();
                next.gross.amount += Decimal::new(1001, 3);
                Ok(next)
            }
            other => Err(HookError::not_implemented(other.hook_id())),
        }
    });
    let (manager, _) = manager_over(vec![active(
        manifest("tax.lines"),
        hooks,
        &[HookId::CalculateCheckoutLineTotal, HookId::CalculateCheckoutTotal],
    )]);
    let lines = vec![
        (CheckoutLine::default(), usd(300)),
        (CheckoutLine::default(), usd(450)),
    ];

    let subtotal = manager
        .checkout_subtotal(&checkout(), &lines)
        .expect("subtotal");

    assert_eq!(subtotal.net.amount, Decimal::new(750, 2));
    assert_eq!(subtotal.gross.amount, Decimal::new(752, 2));
    assert_eq!(calls.load(Ordering::Acquire), 2);
}

#[rstest]
#[case::rounds_up(Decimal::new(123_456_789, 8), Decimal::new(12_346, 4))]
#[case::already_short(Decimal::new(23, 2), Decimal::new(23, 2))]
#[case::exact_fourth_place(Decimal::new(12_345, 4), Decimal::new(12_345, 4))]
fn chained_tax_rate_is_rounded_to_four_places(#[case] answered: Decimal, #[case] expected: Decimal) {
    let mut hooks = MockPluginHooks::new();
    hooks.expect_tax_rate().returning(move |_, _| Ok(answered));
    let (manager, _) = manager_over(vec![active(
        manifest("tax.precise"),
        hooks,
        &[HookId::GetCheckoutShippingTaxRate],
    )]);
    let query = TaxRateQuery::CheckoutShipping {
        checkout: checkout(),
    };

    let rate = manager.tax_rate(&query, Decimal::ZERO).expect("tax rate");

    assert_eq!(rate, expected);
}

#[test]
fn missing_gateway_is_reported_as_unavailable() {
    let (manager, _) = manager_over(vec![active(manifest("tax.none"), declining(), PRICING)]);
    let payment = PaymentData {
        gateway: "gateway.stripe".to_owned(),
        amount: Money::new(Decimal::TEN, "USD"),
        payment_id: "pay-1".to_owned(),
        token: None,
        customer_id: None,
        data: Value::Null,
    };

    let result = manager.payment(PaymentOperation::Capture, &payment, Some("default-channel"));

    assert!(matches!(
        result,
        Err(DispatchError::GatewayUnavailable { gateway, channel: Some(channel) })
            if gateway == "gateway.stripe" && channel == "default-channel"
    ));
}

#[test]
fn gateway_without_the_operation_is_unsupported() {
    let mut hooks = MockPluginHooks::new();
    hooks
        .expect_payment()
        .returning(|operation, _| Err(HookError::not_implemented(operation.hook_id())));
    let (manager, _) = manager_over(vec![active(
        manifest("gateway.dummy"),
        hooks,
        &[HookId::CapturePayment],
    )]);
    let payment = PaymentData {
        gateway: "gateway.dummy".to_owned(),
        amount: Money::new(Decimal::TEN, "USD"),
        payment_id: "pay-1".to_owned(),
        token: None,
        customer_id: None,
        data: Value::Null,
    };

    assert!(matches!(
        manager.payment(PaymentOperation::Refund, &payment, None),
        Err(DispatchError::UnsupportedOperation { hook: HookId::RefundPayment, .. })
    ));
    assert!(matches!(
        manager.payment(PaymentOperation::Capture, &payment, None),
        Err(DispatchError::UnsupportedOperation { hook: HookId::CapturePayment, .. })
    ));
}

#[rstest]
#[case::unknown_gateway("gateway.unknown", true)]
#[case::declared_false("gateway.dummy", false)]
fn token_requirement_defaults_to_true(#[case] gateway: &str, #[case] expected: bool) {
    let mut hooks = MockPluginHooks::new();
    hooks.expect_flag().returning(|_, _| Ok(false));
    let (manager, _) = manager_over(vec![active(
        manifest("gateway.dummy"),
        hooks,
        &[HookId::TokenIsRequiredAsPaymentInput],
    )]);

    let required = manager
        .token_is_required_as_payment_input(gateway, None)
        .expect("dispatch");

    assert_eq!(required, expected);
}

#[test]
fn webhook_falls_back_to_not_found() {
    let (manager, _) = manager_over(vec![active(manifest("shop.hooks"), MockPluginHooks::new(), &[])]);

    let response = manager
        .webhook("shop.hooks", &WebhookRequest::default())
        .expect("webhook");

    assert_eq!(response.status, WEBHOOK_NOT_FOUND);
    assert!(matches!(
        manager.webhook("shop.missing", &WebhookRequest::default()),
        Err(DispatchError::PluginNotFound { .. })
    ));
}

#[test]
fn external_auth_without_the_step_answers_an_empty_object() {
    let (manager, _) = manager_over(vec![active(manifest("auth.oidc"), MockPluginHooks::new(), &[])]);

    let answer = manager
        .external_auth("auth.oidc", ExternalAuthOperation::Refresh, &json!({}))
        .expect("auth");

    assert_eq!(answer, json!({}));
}

#[test]
fn gateways_from_every_plugin_are_concatenated() {
    let gateway = |id: &'static str| {
        let mut hooks = MockPluginHooks::new();
        hooks.expect_payment_gateways().returning(move |_| {
            Ok(vec![PaymentGateway {
                id: id.to_owned(),
                name: id.to_owned(),
                currencies: vec!["USD".to_owned()],
                config: Vec::new(),
            }])
        });
        hooks
    };
    let (manager, _) = manager_over(vec![
        active(manifest("gateway.a"), gateway("a"), &[HookId::GetPaymentGateways]),
        active(manifest("gateway.b"), gateway("b"), &[HookId::GetPaymentGateways]),
    ]);

    let gateways = manager
        .list_payment_gateways(&GatewayQuery::default(), None)
        .expect("gateways");

    let ids: Vec<&str> = gateways.iter().map(|gateway| gateway.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[test]
fn inactive_and_other_channel_instances_are_excluded() {
    let (manager, store) = manager_over(vec![
        active(manifest("tax.off"), adding(100), PRICING),
        active(manifest("tax.elsewhere"), adding(200), PRICING),
        active(manifest("tax.here"), adding(300), PRICING),
    ]);
    store
        .save(PluginConfiguration::new("tax.off", None, false, Vec::new()))
        .expect("save");
    store
        .save(PluginConfiguration::new(
            "tax.elsewhere",
            Some("other-channel".to_owned()),
            true,
            Vec::new(),
        ))
        .expect("save");
    store
        .save(PluginConfiguration::new(
            "tax.here",
            Some("default-channel".to_owned()),
            true,
            Vec::new(),
        ))
        .expect("save");

    let total = manager
        .calculate_price(&total_query(), usd(1000))
        .expect("dispatch");

    assert_eq!(total, usd(1300));
}

fn configurable_manifest() -> Manifest {
    manifest("gateway.dummy").with_settings(vec![
        SettingField::new("api_key", SettingKind::Secret),
        SettingField::new("sandbox", SettingKind::Boolean).with_default(json!(true)),
        SettingField::new("webhook_id", SettingKind::OutputOnly),
    ])
}

#[test]
fn saving_configuration_merges_persists_and_notifies() {
    let mut hooks = MockPluginHooks::new();
    hooks
        .expect_on_configuration_change()
        .withf(|settings| settings.iter().any(|setting| setting.value == json!("sk_live")))
        .times(1)
        .returning(|_| Ok(()));
    let (manager, store) = manager_over(vec![active(
        configurable_manifest(),
        hooks,
        &[HookId::OnConfigurationChange],
    )]);

    let saved = manager
        .save_plugin_configuration(
            "gateway.dummy",
            None,
            vec![ConfigSetting::new("api_key", json!("sk_live"))],
            Some(false),
        )
        .expect("save");

    assert!(!saved.active);
    assert_eq!(saved.setting("sandbox").map(|setting| &setting.value), Some(&json!(true)));
    assert_eq!(
        store.load("gateway.dummy", None).expect("load"),
        Some(saved)
    );
    assert!(manager.instances(&ChannelScope::Global).expect("instances").is_empty());
}

#[rstest]
#[case::unknown(ConfigSetting::new("region", json!("eu")))]
#[case::output_only(ConfigSetting::new("webhook_id", json!("wh_1")))]
#[case::wrong_type(ConfigSetting::new("sandbox", json!("yes")))]
fn invalid_settings_are_rejected(#[case] setting: ConfigSetting) {
    let (manager, store) = manager_over(vec![active(configurable_manifest(), MockPluginHooks::new(), &[])]);

    let result = manager.save_plugin_configuration("gateway.dummy", None, vec![setting], None);

    assert!(matches!(result, Err(DispatchError::InvalidConfiguration { .. })));
    assert!(store.list("gateway.dummy").expect("list").is_empty());
}

#[test]
fn global_plugins_refuse_channel_configuration() {
    let (manager, _) = manager_over(vec![active(configurable_manifest(), MockPluginHooks::new(), &[])]);

    let result = manager.save_plugin_configuration("gateway.dummy", Some("default-channel"), Vec::new(), None);

    assert!(matches!(result, Err(DispatchError::InvalidConfiguration { .. })));
}

#[test]
fn configuration_hook_failures_do_not_fail_the_save() {
    let mut hooks = MockPluginHooks::new();
    hooks
        .expect_on_configuration_change()
        .returning(|_| Err(HookError::from(RemoteError::message("rejected"))));
    let (manager, _) = manager_over(vec![active(
        configurable_manifest(),
        hooks,
        &[HookId::OnConfigurationChange],
    )]);

    let saved = manager.save_plugin_configuration(
        "gateway.dummy",
        None,
        vec![ConfigSetting::new("sandbox", json!(false))],
        None,
    );

    assert!(saved.is_ok());
}

fn per_channel_manifest() -> Manifest {
    manifest("gateway.channel").with_configuration_per_channel(true)
}

fn channel_configuration(channel: &str) -> PluginConfiguration {
    PluginConfiguration::new("gateway.channel", Some(channel.to_owned()), true, Vec::new())
}

#[test]
fn single_dispatch_reaches_a_per_channel_plugin() {
    let mut hooks = MockPluginHooks::new();
    hooks.expect_webhook().times(1).returning(|_| {
        Ok(WebhookResponse {
            status: 202,
            headers: BTreeMap::new(),
            body: b"accepted".to_vec(),
        })
    });
    let (manager, store) = manager_over(vec![active(
        per_channel_manifest(),
        hooks,
        &[HookId::Webhook],
    )]);
    store
        .save(channel_configuration("default-channel"))
        .expect("save");

    let response = manager
        .webhook("gateway.channel", &WebhookRequest::default())
        .expect("webhook");

    assert_eq!(response.status, 202);
    assert_eq!(manager.instances(&ChannelScope::Global).expect("instances").len(), 1);
}

#[test]
fn global_dispatch_runs_every_channel_instance() {
    let mut hooks = MockPluginHooks::new();
    hooks.expect_payment_gateways().times(2).returning(|_| {
        Ok(vec![PaymentGateway {
            id: "channel".to_owned(),
            name: "Channel gateway".to_owned(),
            currencies: vec!["USD".to_owned()],
            config: Vec::new(),
        }])
    });
    let (manager, store) = manager_over(vec![active(
        per_channel_manifest(),
        hooks,
        &[HookId::GetPaymentGateways],
    )]);
    store.save(channel_configuration("default-channel")).expect("save");
    store.save(channel_configuration("other-channel")).expect("save");
    store
        .save(PluginConfiguration::new(
            "gateway.channel",
            Some("closed-channel".to_owned()),
            false,
            Vec::new(),
        ))
        .expect("save");

    let everywhere = manager.instances(&ChannelScope::Global).expect("instances");
    let gateways = manager
        .list_payment_gateways(&GatewayQuery::default(), None)
        .expect("gateways");

    let mut channels: Vec<_> = everywhere.iter().filter_map(PluginInstance::channel_id).collect();
    channels.sort_unstable();
    assert_eq!(channels, vec!["default-channel", "other-channel"]);
    assert_eq!(gateways.len(), 2);
}

#[test]
fn channel_dispatch_sees_one_instance_per_plugin() {
    let (manager, store) = manager_over(vec![active(
        per_channel_manifest(),
        MockPluginHooks::new(),
        &[],
    )]);
    store.save(channel_configuration("default-channel")).expect("save");
    store.save(channel_configuration("other-channel")).expect("save");

    let scoped = manager
        .instances(&ChannelScope::Channel("other-channel".to_owned()))
        .expect("instances");

    let channels: Vec<_> = scoped.iter().map(PluginInstance::channel_id).collect();
    assert_eq!(channels, vec![Some("other-channel")]);
}

/// Store whose first listing pauses after reading, so a save can land
/// between the read and the cache fill.
struct PausingStore {
    inner: MemoryConfigurationStore,
    listed: Mutex<Option<mpsc::Sender<()>>>,
}

impl ConfigurationStore for PausingStore {
    fn load(
        &self,
        plugin_id: &str,
        channel_id: Option<&str>,
    ) -> Result<Option<PluginConfiguration>, ConfigurationError> {
        self.inner.load(plugin_id, channel_id)
    }

    fn list(&self, plugin_id: &str) -> Result<Vec<PluginConfiguration>, ConfigurationError> {
        let stored = self.inner.list(plugin_id)?;
        if let Some(listed) = self.listed.lock().expect("listed lock").take() {
            listed.send(()).expect("signal listing");
            thread::sleep(Duration::from_millis(100));
        }
        Ok(stored)
    }

    fn save(&self, configuration: PluginConfiguration) -> Result<(), ConfigurationError> {
        self.inner.save(configuration)
    }

    fn delete(&self, plugin_id: &str) -> Result<(), ConfigurationError> {
        self.inner.delete(plugin_id)
    }
}

#[test]
fn save_during_a_cache_fill_is_not_lost() {
    let (listed, first_listing) = mpsc::channel();
    let store = Arc::new(PausingStore {
        inner: MemoryConfigurationStore::new(),
        listed: Mutex::new(Some(listed)),
    });
    let plugins = vec![active(manifest("tax.flat"), MockPluginHooks::new(), &[])];
    let manager = PluginManager::new(
        Arc::new(FakeSource { plugins }),
        Arc::clone(&store) as Arc<dyn ConfigurationStore>,
    );

    thread::scope(|scope| {
        let filling = scope.spawn(|| manager.instances(&ChannelScope::Global));
        first_listing.recv().expect("listing started");
        manager
            .save_plugin_configuration("tax.flat", None, Vec::new(), Some(false))
            .expect("save");
        let stale = filling.join().expect("filling thread").expect("instances");
        assert_eq!(stale.len(), 1);
    });

    assert!(manager.instances(&ChannelScope::Global).expect("instances").is_empty());
}
