//! The hook schema shared by host and plugin.
//!
//! [`PluginHooks`] is the single typed surface through which the host talks
//! to a plugin. The host holds an RPC-backed implementation per connected
//! plugin; plugin authors implement the trait directly and hand it to the
//! SDK. Every hook except [`PluginHooks::implemented`] defaults to
//! [`HookError::NotImplemented`], which is how a plugin declines to take
//! part in a chain.

mod id;

use hookwire_bridge::{BridgeError, RemoteError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::manifest::ConfigSetting;
use crate::model::{
    AuthRequest, AuthenticatedUser, Checkout, CustomerSource, ExternalAuthOperation,
    GatewayResponse, HookFlag, LifecycleEvent, PaymentData, PaymentGateway, PaymentOperation,
    PriceQuery, TaxRateQuery, TaxType, TokenConfig, WebhookRequest, WebhookResponse,
};
use crate::money::TaxedMoney;

pub use id::{HookId, HookSet};

/// Outcome of a hook call other than success.
#[derive(Debug, Error)]
pub enum HookError {
    /// The plugin declines to handle the hook.
    #[error("hook '{hook}' is not implemented")]
    NotImplemented {
        /// Hook that was declined.
        hook: HookId,
    },
    /// The plugin's hook returned an error.
    #[error(transparent)]
    Plugin(RemoteError),
    /// The call never produced an answer.
    #[error("hook transport failed: {0}")]
    Transport(#[source] BridgeError),
}

impl HookError {
    /// Shorthand for [`HookError::NotImplemented`].
    #[must_use]
    pub const fn not_implemented(hook: HookId) -> Self {
        Self::NotImplemented { hook }
    }

    /// Wraps a plugin-side failure.
    #[must_use]
    pub fn plugin(message: impl std::fmt::Display) -> Self {
        Self::Plugin(RemoteError::message(message))
    }

    /// Returns true when the plugin declined the hook.
    #[must_use]
    pub const fn is_not_implemented(&self) -> bool {
        matches!(self, Self::NotImplemented { .. })
    }

    /// Returns true when the failure came from the connection itself.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Classifies a bridge error raised while calling `hook`.
    ///
    /// Both the portable not-implemented error and an unknown method answer
    /// count as a decline, so plugins built against an older schema still
    /// fall through.
    #[must_use]
    pub fn from_bridge(hook: HookId, error: BridgeError) -> Self {
        match error {
            BridgeError::Remote(
                RemoteError::NotImplemented { .. } | RemoteError::MethodNotFound { .. },
            ) => Self::not_implemented(hook),
            BridgeError::Remote(remote) => Self::Plugin(remote),
            other => Self::Transport(other),
        }
    }

    /// Converts to the portable form sent back to the host.
    #[must_use]
    pub fn to_remote(&self) -> RemoteError {
        match self {
            Self::NotImplemented { hook } => RemoteError::NotImplemented {
                method: hook.method().to_owned(),
            },
            Self::Plugin(remote) => remote.clone(),
            Self::Transport(error) => RemoteError::message(error),
        }
    }
}

impl From<RemoteError> for HookError {
    fn from(error: RemoteError) -> Self {
        Self::Plugin(error)
    }
}

/// Filter for the gateways a plugin offers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GatewayQuery {
    /// Restrict to gateways accepting this currency.
    #[serde(default)]
    pub currency: Option<String>,
    /// Checkout being paid, when there is one.
    #[serde(default)]
    pub checkout: Option<Checkout>,
}

/// Hooks a plugin may implement.
///
/// Chained hooks receive the running value as `previous` and return the
/// replacement. Returning [`HookError::NotImplemented`] leaves the running
/// value untouched.
#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
pub trait PluginHooks: Send + Sync {
    /// Lists the hooks this plugin answers.
    ///
    /// # Errors
    ///
    /// Returns an error when the plugin cannot be introspected.
    fn implemented(&self) -> Result<HookSet, HookError>;

    /// Called once the host API and driver are connected.
    ///
    /// # Errors
    ///
    /// An error fails the activation.
    fn on_activate(&self) -> Result<(), HookError> {
        Err(HookError::not_implemented(HookId::OnActivate))
    }

    /// Called before the process is stopped.
    ///
    /// # Errors
    ///
    /// Errors are logged by the host and otherwise ignored.
    fn on_deactivate(&self) -> Result<(), HookError> {
        Err(HookError::not_implemented(HookId::OnDeactivate))
    }

    /// Called after the stored configuration changed.
    ///
    /// # Errors
    ///
    /// Returns a plugin error to report a configuration it cannot use.
    fn on_configuration_change(&self, configuration: &[ConfigSetting]) -> Result<(), HookError> {
        let _ = configuration;
        Err(HookError::not_implemented(HookId::OnConfigurationChange))
    }

    /// Prices the record described by `query`.
    ///
    /// # Errors
    ///
    /// Any error other than not-implemented aborts the chain.
    fn calculate_price(
        &self,
        query: &PriceQuery,
        previous: &TaxedMoney,
    ) -> Result<TaxedMoney, HookError> {
        let _ = previous;
        Err(HookError::not_implemented(query.hook_id()))
    }

    /// Returns the tax rate for the record described by `query`.
    ///
    /// # Errors
    ///
    /// Any error other than not-implemented aborts the chain.
    fn tax_rate(&self, query: &TaxRateQuery, previous: Decimal) -> Result<Decimal, HookError> {
        let _ = previous;
        Err(HookError::not_implemented(query.hook_id()))
    }

    /// Returns a storefront flag.
    ///
    /// # Errors
    ///
    /// Any error other than not-implemented aborts the chain.
    fn flag(&self, flag: HookFlag, previous: bool) -> Result<bool, HookError> {
        let _ = previous;
        Err(HookError::not_implemented(flag.hook_id()))
    }

    /// Extends the list of tax classifications.
    ///
    /// # Errors
    ///
    /// Any error other than not-implemented aborts the chain.
    fn tax_rate_type_choices(&self, previous: &[TaxType]) -> Result<Vec<TaxType>, HookError> {
        let _ = previous;
        Err(HookError::not_implemented(HookId::GetTaxRateTypeChoices))
    }

    /// Normalises a user address.
    ///
    /// # Errors
    ///
    /// Any error other than not-implemented aborts the chain.
    fn change_user_address(&self, address: &Value, previous: &Value) -> Result<Value, HookError> {
        let _ = (address, previous);
        Err(HookError::not_implemented(HookId::ChangeUserAddress))
    }

    /// Inspects a checkout before an order is created from it.
    ///
    /// # Errors
    ///
    /// A plugin error vetoes the order.
    fn preprocess_order_creation(
        &self,
        checkout: &Checkout,
        previous: &Value,
    ) -> Result<Value, HookError> {
        let _ = (checkout, previous);
        Err(HookError::not_implemented(HookId::PreprocessOrderCreation))
    }

    /// Reacts to a domain event.
    ///
    /// # Errors
    ///
    /// Any error other than not-implemented aborts the broadcast.
    fn on_event(
        &self,
        event: LifecycleEvent,
        payload: &Value,
        previous: &Value,
    ) -> Result<Value, HookError> {
        let _ = (event, payload, previous);
        Err(HookError::not_implemented(HookId::OnEvent))
    }

    /// Performs a payment operation.
    ///
    /// # Errors
    ///
    /// Returns the gateway's failure.
    fn payment(
        &self,
        operation: PaymentOperation,
        payment: &PaymentData,
    ) -> Result<GatewayResponse, HookError> {
        let _ = payment;
        Err(HookError::not_implemented(operation.hook_id()))
    }

    /// Issues a client token for storefront payment widgets.
    ///
    /// # Errors
    ///
    /// Returns the gateway's failure.
    fn client_token(&self, config: &TokenConfig) -> Result<String, HookError> {
        let _ = config;
        Err(HookError::not_implemented(HookId::GetClientToken))
    }

    /// Lists a customer's stored payment sources.
    ///
    /// # Errors
    ///
    /// Returns the gateway's failure.
    fn list_payment_sources(&self, customer_id: &str) -> Result<Vec<CustomerSource>, HookError> {
        let _ = customer_id;
        Err(HookError::not_implemented(HookId::ListPaymentSources))
    }

    /// Lists the gateways this plugin offers.
    ///
    /// # Errors
    ///
    /// Any error other than not-implemented aborts the listing.
    fn payment_gateways(&self, query: &GatewayQuery) -> Result<Vec<PaymentGateway>, HookError> {
        let _ = query;
        Err(HookError::not_implemented(HookId::GetPaymentGateways))
    }

    /// Runs one step of an external authentication flow.
    ///
    /// # Errors
    ///
    /// Returns the provider's failure.
    fn external_auth(
        &self,
        operation: ExternalAuthOperation,
        data: &Value,
    ) -> Result<Value, HookError> {
        let _ = data;
        Err(HookError::not_implemented(operation.hook_id()))
    }

    /// Resolves the user making a request.
    ///
    /// # Errors
    ///
    /// Any error other than not-implemented aborts the chain.
    fn authenticate_user(
        &self,
        request: &AuthRequest,
        previous: &Option<AuthenticatedUser>,
    ) -> Result<Option<AuthenticatedUser>, HookError> {
        let _ = (request, previous);
        Err(HookError::not_implemented(HookId::AuthenticateUser))
    }

    /// Answers an HTTP request routed to this plugin.
    ///
    /// # Errors
    ///
    /// Returns the plugin's failure.
    fn webhook(&self, request: &WebhookRequest) -> Result<WebhookResponse, HookError> {
        let _ = request;
        Err(HookError::not_implemented(HookId::Webhook))
    }
}
