//! Typed hook dispatch over the running plugins.
//!
//! [`PluginManager`] turns each extension point into either a chain, where
//! a running value passes through every implementing plugin in order, or a
//! single dispatch addressed to one plugin id. Chains run over plugin
//! *instances*: one per running plugin and stored configuration, filtered by
//! channel and by the configuration's active flag. A channel-scoped dispatch
//! sees at most one instance per plugin; a global one sees every configured
//! instance. Instances are ordered by manifest priority, then by discovery
//! order.

mod chain;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use hookwire_plugins::hooks::GatewayQuery;
use hookwire_plugins::manifest::{ConfigSetting, SettingKind};
use hookwire_plugins::model::{
    AuthRequest, AuthenticatedUser, Checkout, CheckoutLine, CustomerSource,
    ExternalAuthOperation, GatewayResponse, HookFlag, LifecycleEvent, PaymentData,
    PaymentGateway, PaymentOperation, PriceQuery, TaxRateQuery, TaxType, TokenConfig,
    WebhookRequest, WebhookResponse,
};
use hookwire_plugins::money::MoneyError;
use hookwire_plugins::{HookError, HookId, Manifest, PluginHooks, TaxedMoney};
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::configuration::{ConfigurationError, ConfigurationStore, PluginConfiguration};
use crate::environment::{ActivePlugin, Environment};

use chain::run_chain;

const MANAGER_TARGET: &str = "hookwired::manager";

/// Decimal places a chained tax rate is rounded to.
pub const TAX_RATE_DECIMAL_PLACES: u32 = 4;

/// Status returned when a webhook reaches a plugin that does not serve one.
pub const WEBHOOK_NOT_FOUND: u16 = 404;

/// Supplies the plugins the manager dispatches to.
pub trait PluginSource: Send + Sync {
    /// Running plugins with a server component, in discovery order.
    fn active_plugins(&self) -> Vec<ActivePlugin>;

    /// Manifest of an installed plugin, running or not.
    fn manifest(&self, plugin_id: &str) -> Option<Manifest>;
}

impl PluginSource for Environment {
    fn active_plugins(&self) -> Vec<ActivePlugin> {
        Self::active_plugins(self)
    }

    fn manifest(&self, plugin_id: &str) -> Option<Manifest> {
        self.get_manifest(plugin_id).or_else(|| {
            self.available()
                .ok()?
                .into_iter()
                .find(|bundle| bundle.id() == plugin_id)
                .map(|bundle| bundle.manifest().clone())
        })
    }
}

/// Which configured instances take part in a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelScope {
    /// Every configured instance, whatever its channel.
    Global,
    /// Instances configured for this channel, falling back to a plugin's
    /// channel-less configuration.
    Channel(String),
}

impl ChannelScope {
    /// Scope for an optional channel id.
    #[must_use]
    pub fn from_channel(channel_id: Option<&str>) -> Self {
        channel_id.map_or(Self::Global, |channel| Self::Channel(channel.to_owned()))
    }
}

/// Errors raised while dispatching hooks.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A plugin failed a hook and ended the dispatch.
    #[error("plugin '{plugin_id}' failed hook '{hook}': {source}")]
    Hook {
        /// Failing plugin.
        plugin_id: String,
        /// Hook being dispatched.
        hook: HookId,
        /// The plugin's error.
        #[source]
        source: HookError,
    },
    /// No active plugin serves the requested gateway.
    #[error("payment gateway '{gateway}' is not available{}", channel_suffix(.channel.as_deref()))]
    GatewayUnavailable {
        /// Requested gateway id.
        gateway: String,
        /// Channel of the request.
        channel: Option<String>,
    },
    /// No active plugin has the requested id.
    #[error("plugin '{plugin_id}' is not active")]
    PluginNotFound {
        /// Requested plugin.
        plugin_id: String,
    },
    /// The addressed plugin does not implement the operation.
    #[error("plugin '{plugin_id}' does not support '{hook}'")]
    UnsupportedOperation {
        /// Addressed plugin.
        plugin_id: String,
        /// Requested hook.
        hook: HookId,
    },
    /// Chained money values could not be combined.
    #[error(transparent)]
    Money(#[from] MoneyError),
    /// Stored configuration could not be read or written.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// A configuration update does not match the plugin's schema.
    #[error("invalid configuration for plugin '{plugin_id}': {message}")]
    InvalidConfiguration {
        /// Plugin being configured.
        plugin_id: String,
        /// What is wrong.
        message: String,
    },
}

fn channel_suffix(channel: Option<&str>) -> String {
    channel.map_or_else(String::new, |channel| format!(" in channel '{channel}'"))
}

/// A running plugin bound to one stored configuration.
#[derive(Debug, Clone)]
pub struct PluginInstance {
    plugin: ActivePlugin,
    configuration: PluginConfiguration,
}

impl PluginInstance {
    /// Plugin id.
    #[must_use]
    pub fn plugin_id(&self) -> &str {
        self.plugin.manifest.id()
    }

    /// Channel the configuration targets.
    #[must_use]
    pub fn channel_id(&self) -> Option<&str> {
        self.configuration.channel_id.as_deref()
    }

    /// Configuration the instance runs with.
    #[must_use]
    pub fn configuration(&self) -> &[ConfigSetting] {
        &self.configuration.configuration
    }

    /// Manifest priority.
    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.plugin.manifest.priority()
    }

    fn implements(&self, hook: HookId) -> bool {
        self.plugin.implemented.contains(hook)
    }

    fn hooks(&self) -> &dyn PluginHooks {
        self.plugin.hooks.as_ref()
    }
}

/// Dispatches typed hooks to running plugins.
pub struct PluginManager {
    source: Arc<dyn PluginSource>,
    store: Arc<dyn ConfigurationStore>,
    configurations: Mutex<HashMap<String, Vec<PluginConfiguration>>>,
}

impl PluginManager {
    /// Creates a manager over `source`, reading configuration from `store`.
    #[must_use]
    pub fn new(source: Arc<dyn PluginSource>, store: Arc<dyn ConfigurationStore>) -> Self {
        Self {
            source,
            store,
            configurations: Mutex::new(HashMap::new()),
        }
    }

    /// Active instances in `scope`, in chain order.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Configuration`] when stored configuration
    /// cannot be read.
    pub fn instances(&self, scope: &ChannelScope) -> Result<Vec<PluginInstance>, DispatchError> {
        let mut instances = Vec::new();
        for plugin in self.source.active_plugins() {
            let configurations = self.configurations_for(&plugin.manifest)?;
            instances.extend(
                select_configurations(configurations, scope)
                    .into_iter()
                    .filter(|configuration| configuration.active)
                    .map(|configuration| PluginInstance {
                        plugin: plugin.clone(),
                        configuration,
                    }),
            );
        }
        instances.sort_by_key(|instance| (instance.priority(), instance.plugin.discovery_index));
        Ok(instances)
    }

    /// Prices a checkout or order record, starting from `default`.
    ///
    /// The chained result is quantized to the currency's minor units.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Hook`] when a plugin fails.
    pub fn calculate_price(
        &self,
        query: &PriceQuery,
        default: TaxedMoney,
    ) -> Result<TaxedMoney, DispatchError> {
        let instances = self.instances(&ChannelScope::Channel(query.channel_id().to_owned()))?;
        let priced = run_chain(&instances, query.hook_id(), default, |hooks, previous| {
            hooks.calculate_price(query, previous)
        })?;
        Ok(priced.quantize())
    }

    /// Subtotal of a checkout: every line is priced through the line-total
    /// chain and the quantized line totals are summed.
    ///
    /// # Errors
    ///
    /// Returns the first line's failure, or a [`DispatchError::Money`] when
    /// line currencies disagree.
    pub fn checkout_subtotal(
        &self,
        checkout: &Checkout,
        lines: &[(CheckoutLine, TaxedMoney)],
    ) -> Result<TaxedMoney, DispatchError> {
        let mut subtotal = TaxedMoney::zero(&checkout.currency);
        for (line, default) in lines {
            let query = PriceQuery::CheckoutLineTotal {
                checkout: checkout.clone(),
                line: line.clone(),
            };
            let line_total = self.calculate_price(&query, default.clone())?;
            subtotal = subtotal.checked_add(&line_total)?;
        }
        Ok(subtotal.quantize())
    }

    /// Tax rate for a line or shipping, starting from `default`.
    ///
    /// The chained rate is rounded away from zero to
    /// [`TAX_RATE_DECIMAL_PLACES`].
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Hook`] when a plugin fails.
    pub fn tax_rate(&self, query: &TaxRateQuery, default: Decimal) -> Result<Decimal, DispatchError> {
        let instances = self.instances(&ChannelScope::Channel(query.channel_id().to_owned()))?;
        let rate = run_chain(&instances, query.hook_id(), default, |hooks, previous| {
            hooks.tax_rate(query, *previous)
        })?;
        Ok(rate.round_dp_with_strategy(TAX_RATE_DECIMAL_PLACES, RoundingStrategy::AwayFromZero))
    }

    /// Boolean storefront flag, starting from `default`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Hook`] when a plugin fails.
    pub fn flag(
        &self,
        flag: HookFlag,
        channel_id: Option<&str>,
        default: bool,
    ) -> Result<bool, DispatchError> {
        let instances = self.instances(&ChannelScope::from_channel(channel_id))?;
        run_chain(&instances, flag.hook_id(), default, |hooks, previous| {
            hooks.flag(flag, *previous)
        })
    }

    /// Tax classifications offered by tax plugins.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Hook`] when a plugin fails.
    pub fn tax_rate_type_choices(&self) -> Result<Vec<TaxType>, DispatchError> {
        let instances = self.instances(&ChannelScope::Global)?;
        run_chain(&instances, HookId::GetTaxRateTypeChoices, Vec::new(), |hooks, previous| {
            hooks.tax_rate_type_choices(previous)
        })
    }

    /// Lets plugins rewrite a user address; the address itself is the
    /// starting value.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Hook`] when a plugin fails.
    pub fn change_user_address(
        &self,
        address: &Value,
        channel_id: Option<&str>,
    ) -> Result<Value, DispatchError> {
        let instances = self.instances(&ChannelScope::from_channel(channel_id))?;
        run_chain(&instances, HookId::ChangeUserAddress, address.clone(), |hooks, previous| {
            hooks.change_user_address(address, previous)
        })
    }

    /// Runs plugins before an order is created from `checkout`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Hook`] when a plugin refuses the checkout.
    pub fn preprocess_order_creation(&self, checkout: &Checkout) -> Result<Value, DispatchError> {
        let instances = self.instances(&ChannelScope::Channel(checkout.channel_id.clone()))?;
        run_chain(&instances, HookId::PreprocessOrderCreation, Value::Null, |hooks, previous| {
            hooks.preprocess_order_creation(checkout, previous)
        })
    }

    /// Broadcasts a domain event.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Hook`] when a plugin fails.
    pub fn on_event(
        &self,
        event: LifecycleEvent,
        payload: &Value,
        channel_id: Option<&str>,
    ) -> Result<Value, DispatchError> {
        let instances = self.instances(&ChannelScope::from_channel(channel_id))?;
        run_chain(&instances, HookId::OnEvent, Value::Null, |hooks, previous| {
            hooks.on_event(event, payload, previous)
        })
    }

    /// Gateways offered by every payment plugin, concatenated in chain order.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Hook`] when a plugin fails.
    pub fn list_payment_gateways(
        &self,
        query: &GatewayQuery,
        channel_id: Option<&str>,
    ) -> Result<Vec<PaymentGateway>, DispatchError> {
        let instances = self.instances(&ChannelScope::from_channel(channel_id))?;
        run_chain(&instances, HookId::GetPaymentGateways, Vec::new(), |hooks, previous| {
            let mut gateways = previous.clone();
            gateways.extend(hooks.payment_gateways(query)?);
            Ok(gateways)
        })
    }

    /// Resolves the user behind a request, if any plugin recognises it.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Hook`] when a plugin fails.
    pub fn authenticate_user(
        &self,
        request: &AuthRequest,
    ) -> Result<Option<AuthenticatedUser>, DispatchError> {
        let instances = self.instances(&ChannelScope::Global)?;
        run_chain(&instances, HookId::AuthenticateUser, None, |hooks, previous| {
            hooks.authenticate_user(request, previous)
        })
    }

    /// Runs a payment operation through the gateway named in `payment`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::GatewayUnavailable`] when no active plugin
    /// serves the gateway, [`DispatchError::UnsupportedOperation`] when it
    /// does not implement the operation, or the plugin's failure.
    pub fn payment(
        &self,
        operation: PaymentOperation,
        payment: &PaymentData,
        channel_id: Option<&str>,
    ) -> Result<GatewayResponse, DispatchError> {
        let gateway = self.gateway(&payment.gateway, channel_id)?;
        single(&gateway, operation.hook_id(), |hooks| hooks.payment(operation, payment))
    }

    /// Client token issued by a gateway.
    ///
    /// # Errors
    ///
    /// Same as [`PluginManager::payment`].
    pub fn client_token(
        &self,
        gateway: &str,
        config: &TokenConfig,
        channel_id: Option<&str>,
    ) -> Result<String, DispatchError> {
        let instance = self.gateway(gateway, channel_id)?;
        single(&instance, HookId::GetClientToken, |hooks| hooks.client_token(config))
    }

    /// Stored payment sources of a customer at a gateway.
    ///
    /// # Errors
    ///
    /// Same as [`PluginManager::payment`].
    pub fn list_payment_sources(
        &self,
        gateway: &str,
        customer_id: &str,
        channel_id: Option<&str>,
    ) -> Result<Vec<CustomerSource>, DispatchError> {
        let instance = self.gateway(gateway, channel_id)?;
        single(&instance, HookId::ListPaymentSources, |hooks| {
            hooks.list_payment_sources(customer_id)
        })
    }

    /// Whether a gateway needs a token as payment input.
    ///
    /// Unknown gateways and gateways that do not answer require one.
    ///
    /// # Errors
    ///
    /// Returns the plugin's failure.
    pub fn token_is_required_as_payment_input(
        &self,
        gateway: &str,
        channel_id: Option<&str>,
    ) -> Result<bool, DispatchError> {
        let Some(instance) = self.find(gateway, &ChannelScope::from_channel(channel_id))? else {
            return Ok(true);
        };
        run_chain(
            std::slice::from_ref(&instance),
            HookId::TokenIsRequiredAsPaymentInput,
            true,
            |hooks, previous| hooks.flag(HookFlag::TokenIsRequiredAsPaymentInput, *previous),
        )
    }

    /// Runs an external authentication step on one plugin.
    ///
    /// A plugin that does not implement the step answers with an empty
    /// object.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::PluginNotFound`] or the plugin's failure.
    pub fn external_auth(
        &self,
        plugin_id: &str,
        operation: ExternalAuthOperation,
        data: &Value,
    ) -> Result<Value, DispatchError> {
        let instance = self.plugin(plugin_id)?;
        let hook = operation.hook_id();
        match single(&instance, hook, |hooks| hooks.external_auth(operation, data)) {
            Err(DispatchError::UnsupportedOperation { .. }) => Ok(Value::Object(Map::new())),
            other => other,
        }
    }

    /// Forwards an HTTP request to one plugin.
    ///
    /// A plugin without a webhook answers 404.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::PluginNotFound`] or the plugin's failure.
    pub fn webhook(
        &self,
        plugin_id: &str,
        request: &WebhookRequest,
    ) -> Result<WebhookResponse, DispatchError> {
        let instance = self.plugin(plugin_id)?;
        match single(&instance, HookId::Webhook, |hooks| hooks.webhook(request)) {
            Err(DispatchError::UnsupportedOperation { .. }) => Ok(WebhookResponse {
                status: WEBHOOK_NOT_FOUND,
                headers: BTreeMap::new(),
                body: Vec::new(),
            }),
            other => other,
        }
    }

    /// Updates a plugin's stored configuration and notifies the plugin.
    ///
    /// `settings` are merged into the current configuration for the
    /// channel, or the manifest defaults when none is stored. `active`
    /// replaces the active flag when given.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::PluginNotFound`] for unknown plugins,
    /// [`DispatchError::InvalidConfiguration`] when a setting does not match
    /// the manifest schema, or [`DispatchError::Configuration`] when the
    /// store fails.
    pub fn save_plugin_configuration(
        &self,
        plugin_id: &str,
        channel_id: Option<&str>,
        settings: Vec<ConfigSetting>,
        active: Option<bool>,
    ) -> Result<PluginConfiguration, DispatchError> {
        let manifest = self
            .source
            .manifest(plugin_id)
            .ok_or_else(|| DispatchError::PluginNotFound {
                plugin_id: plugin_id.to_owned(),
            })?;
        check_channel(&manifest, channel_id)?;
        check_settings(&manifest, &settings)?;

        let mut configuration = self
            .store
            .load(plugin_id, channel_id)?
            .unwrap_or_else(|| default_configuration(&manifest, channel_id.map(str::to_owned)));
        for setting in settings {
            match configuration
                .configuration
                .iter_mut()
                .find(|current| current.name == setting.name)
            {
                Some(current) => current.value = setting.value,
                None => configuration.configuration.push(setting),
            }
        }
        if let Some(flag) = active {
            configuration.active = flag;
        }

        self.store.save(configuration.clone())?;
        self.configurations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(plugin_id);
        debug!(target: MANAGER_TARGET, plugin_id, channel = ?channel_id, "configuration saved");
        self.notify_configuration(plugin_id, &configuration);
        Ok(configuration)
    }

    fn notify_configuration(&self, plugin_id: &str, configuration: &PluginConfiguration) {
        let Some(plugin) = self
            .source
            .active_plugins()
            .into_iter()
            .find(|plugin| plugin.manifest.id() == plugin_id)
        else {
            return;
        };
        if !plugin.implemented.contains(HookId::OnConfigurationChange) {
            return;
        }
        match plugin.hooks.on_configuration_change(&configuration.configuration) {
            Err(error) if !error.is_not_implemented() => {
                warn!(target: MANAGER_TARGET, plugin_id, %error, "configuration change hook failed");
            }
            _ => {}
        }
    }

    fn gateway(&self, gateway: &str, channel_id: Option<&str>) -> Result<PluginInstance, DispatchError> {
        self.find(gateway, &ChannelScope::from_channel(channel_id))?
            .ok_or_else(|| DispatchError::GatewayUnavailable {
                gateway: gateway.to_owned(),
                channel: channel_id.map(str::to_owned),
            })
    }

    fn plugin(&self, plugin_id: &str) -> Result<PluginInstance, DispatchError> {
        self.find(plugin_id, &ChannelScope::Global)?
            .ok_or_else(|| DispatchError::PluginNotFound {
                plugin_id: plugin_id.to_owned(),
            })
    }

    fn find(&self, plugin_id: &str, scope: &ChannelScope) -> Result<Option<PluginInstance>, DispatchError> {
        Ok(self
            .instances(scope)?
            .into_iter()
            .find(|instance| instance.plugin_id() == plugin_id))
    }

    // The cache lock is held across the store read so an invalidation
    // racing with the load cannot be overwritten by a stale list.
    fn configurations_for(&self, manifest: &Manifest) -> Result<Vec<PluginConfiguration>, DispatchError> {
        let plugin_id = manifest.id();
        let mut cache = self
            .configurations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = cache.get(plugin_id) {
            return Ok(cached.clone());
        }
        let mut stored = self.store.list(plugin_id)?;
        if stored.is_empty() {
            stored.push(default_configuration(manifest, None));
        }
        cache.insert(plugin_id.to_owned(), stored.clone());
        Ok(stored)
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager").finish_non_exhaustive()
    }
}

fn single<T, F>(instance: &PluginInstance, hook: HookId, call: F) -> Result<T, DispatchError>
where
    F: FnOnce(&dyn PluginHooks) -> Result<T, HookError>,
{
    let unsupported = || DispatchError::UnsupportedOperation {
        plugin_id: instance.plugin_id().to_owned(),
        hook,
    };
    if !instance.implements(hook) {
        return Err(unsupported());
    }
    match call(instance.hooks()) {
        Ok(value) => Ok(value),
        Err(error) if error.is_not_implemented() => Err(unsupported()),
        Err(error) => Err(DispatchError::Hook {
            plugin_id: instance.plugin_id().to_owned(),
            hook,
            source: error,
        }),
    }
}

fn select_configurations(
    configurations: Vec<PluginConfiguration>,
    scope: &ChannelScope,
) -> Vec<PluginConfiguration> {
    let ChannelScope::Channel(wanted) = scope else {
        return configurations;
    };
    let mut global = None;
    for configuration in configurations {
        match configuration.channel_id.as_deref() {
            None => global = Some(configuration),
            Some(channel) if channel == wanted.as_str() => return vec![configuration],
            Some(_) => {}
        }
    }
    global.into_iter().collect()
}

fn default_configuration(manifest: &Manifest, channel_id: Option<String>) -> PluginConfiguration {
    PluginConfiguration::new(
        manifest.id(),
        channel_id,
        manifest.default_active(),
        manifest.default_configuration(),
    )
}

fn check_channel(manifest: &Manifest, channel_id: Option<&str>) -> Result<(), DispatchError> {
    let message = match (manifest.configuration_per_channel(), channel_id) {
        (true, None) => "configuration is per channel and needs a channel id",
        (false, Some(_)) => "configuration is global and takes no channel id",
        _ => return Ok(()),
    };
    Err(invalid(manifest, message))
}

fn check_settings(manifest: &Manifest, settings: &[ConfigSetting]) -> Result<(), DispatchError> {
    for setting in settings {
        let Some(field) = manifest.setting(&setting.name) else {
            return Err(invalid(manifest, format!("unknown setting '{}'", setting.name)));
        };
        if field.kind() == SettingKind::OutputOnly {
            return Err(invalid(manifest, format!("setting '{}' is read-only", setting.name)));
        }
        if !field.kind().accepts(&setting.value) {
            return Err(invalid(
                manifest,
                format!("setting '{}' expects a {:?} value", setting.name, field.kind()),
            ));
        }
    }
    Ok(())
}

fn invalid(manifest: &Manifest, message: impl Into<String>) -> DispatchError {
    DispatchError::InvalidConfiguration {
        plugin_id: manifest.id().to_owned(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests;
