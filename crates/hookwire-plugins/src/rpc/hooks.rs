//! Hooks stream: the host-side stub and plugin-side skeleton of
//! [`PluginHooks`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use hookwire_bridge::{
    BridgeError, Multiplexer, RemoteError, RequestHandler, RpcClient, StreamId, encode_result,
};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{ApiClient, ApiServer, DriverClient, DriverServer, IMPLEMENTED_METHOD};
use crate::api::{Driver, HostApi};
use crate::hooks::{GatewayQuery, HookError, HookId, HookSet, PluginHooks};
use crate::manifest::ConfigSetting;
use crate::model::{
    AuthRequest, AuthenticatedUser, Checkout, CustomerSource, ExternalAuthOperation,
    GatewayResponse, HookFlag, LifecycleEvent, PaymentData, PaymentGateway, PaymentOperation,
    PriceQuery, TaxRateQuery, TaxType, TokenConfig, WebhookRequest, WebhookResponse,
};
use crate::money::TaxedMoney;
use crate::sdk::HostHandle;

const HOOKS_TARGET: &str = "hookwire_plugins::rpc::hooks";

/// Streams the host serves for an activating plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateArgs {
    /// Stream carrying the host API.
    pub api_stream: StreamId,
    /// Stream carrying the data-access driver.
    pub driver_stream: StreamId,
}

#[derive(Serialize, Deserialize)]
struct ConfigurationArgs {
    configuration: Vec<ConfigSetting>,
}

#[derive(Serialize, Deserialize)]
struct PriceArgs {
    query: PriceQuery,
    previous: TaxedMoney,
}

#[derive(Serialize, Deserialize)]
struct TaxRateArgs {
    query: TaxRateQuery,
    previous: Decimal,
}

#[derive(Serialize, Deserialize)]
struct FlagArgs {
    flag: HookFlag,
    previous: bool,
}

#[derive(Serialize, Deserialize)]
struct TaxTypesArgs {
    previous: Vec<TaxType>,
}

#[derive(Serialize, Deserialize)]
struct AddressArgs {
    address: Value,
    previous: Value,
}

#[derive(Serialize, Deserialize)]
struct OrderCreationArgs {
    checkout: Checkout,
    previous: Value,
}

#[derive(Serialize, Deserialize)]
struct EventArgs {
    event: LifecycleEvent,
    payload: Value,
    previous: Value,
}

#[derive(Serialize, Deserialize)]
struct PaymentArgs {
    operation: PaymentOperation,
    payment: PaymentData,
}

#[derive(Serialize, Deserialize)]
struct TokenArgs {
    config: TokenConfig,
}

#[derive(Serialize, Deserialize)]
struct SourcesArgs {
    customer_id: String,
}

#[derive(Serialize, Deserialize)]
struct ExternalAuthArgs {
    operation: ExternalAuthOperation,
    data: Value,
}

#[derive(Serialize, Deserialize)]
struct AuthArgs {
    request: AuthRequest,
    previous: Option<AuthenticatedUser>,
}

/// Host-side [`PluginHooks`] that forwards each hook to a plugin process.
///
/// Every call carries the configured deadline. Transport failures clear the
/// optional health flag so the owning supervisor can react.
pub struct HooksClient {
    rpc: RpcClient,
    mux: Multiplexer,
    api: Arc<dyn HostApi>,
    driver: Arc<dyn Driver>,
    deadline: Option<Duration>,
    healthy: Option<Arc<AtomicBool>>,
}

impl HooksClient {
    /// Dials the hooks stream of a connected plugin.
    ///
    /// `api` and `driver` are served to the plugin when it is activated.
    ///
    /// # Errors
    ///
    /// Returns the bridge error if the stream cannot be dialled.
    pub fn connect(
        mux: &Multiplexer,
        api: Arc<dyn HostApi>,
        driver: Arc<dyn Driver>,
        deadline: Option<Duration>,
    ) -> Result<Self, BridgeError> {
        Ok(Self {
            rpc: mux.dial(StreamId::HOOKS)?,
            mux: mux.clone(),
            api,
            driver,
            deadline,
            healthy: None,
        })
    }

    /// Clears `flag` whenever a call fails at the transport level.
    #[must_use]
    pub fn with_health_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.healthy = Some(flag);
        self
    }

    fn note_failure(&self, error: &BridgeError) {
        if error.is_transport()
            && let Some(flag) = &self.healthy
        {
            flag.store(false, Ordering::Release);
        }
    }

    fn call<P: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        hook: HookId,
        params: &P,
    ) -> Result<R, HookError> {
        self.rpc
            .call(hook.method(), params, self.deadline)
            .map_err(|error| {
                self.note_failure(&error);
                HookError::from_bridge(hook, error)
            })
    }

    fn serve_host_streams(&self) -> Result<ActivateArgs, BridgeError> {
        let api_stream = self.mux.open_stream();
        self.mux
            .serve(api_stream, Arc::new(ApiServer::new(Arc::clone(&self.api))))?;
        let driver_stream = self.mux.open_stream();
        self.mux.serve(
            driver_stream,
            Arc::new(DriverServer::new(Arc::clone(&self.driver))),
        )?;
        Ok(ActivateArgs {
            api_stream,
            driver_stream,
        })
    }
}

impl std::fmt::Debug for HooksClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HooksClient")
            .field("stream", &self.rpc.stream())
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl HooksClient {
    /// Asks the plugin which hooks it implements, waiting at most
    /// `deadline` instead of the configured hook deadline.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::Transport`] when the call fails or times out and
    /// [`HookError::Plugin`] when the plugin answers with an error.
    pub fn implemented_within(&self, deadline: Option<Duration>) -> Result<HookSet, HookError> {
        self.rpc
            .call(IMPLEMENTED_METHOD, &(), deadline)
            .map_err(|error| {
                self.note_failure(&error);
                match error {
                    BridgeError::Remote(remote) => HookError::Plugin(remote),
                    other => HookError::Transport(other),
                }
            })
    }
}

impl PluginHooks for HooksClient {
    fn implemented(&self) -> Result<HookSet, HookError> {
        self.implemented_within(self.deadline)
    }

    fn on_activate(&self) -> Result<(), HookError> {
        let args = self.serve_host_streams().map_err(HookError::Transport)?;
        self.call(HookId::OnActivate, &args)
    }

    fn on_deactivate(&self) -> Result<(), HookError> {
        self.call(HookId::OnDeactivate, &())
    }

    fn on_configuration_change(&self, configuration: &[ConfigSetting]) -> Result<(), HookError> {
        let args = ConfigurationArgs {
            configuration: configuration.to_vec(),
        };
        self.call(HookId::OnConfigurationChange, &args)
    }

    fn calculate_price(
        &self,
        query: &PriceQuery,
        previous: &TaxedMoney,
    ) -> Result<TaxedMoney, HookError> {
        let args = PriceArgs {
            query: query.clone(),
            previous: previous.clone(),
        };
        self.call(query.hook_id(), &args)
    }

    fn tax_rate(&self, query: &TaxRateQuery, previous: Decimal) -> Result<Decimal, HookError> {
        let args = TaxRateArgs {
            query: query.clone(),
            previous,
        };
        self.call(query.hook_id(), &args)
    }

    fn flag(&self, flag: HookFlag, previous: bool) -> Result<bool, HookError> {
        self.call(flag.hook_id(), &FlagArgs { flag, previous })
    }

    fn tax_rate_type_choices(&self, previous: &[TaxType]) -> Result<Vec<TaxType>, HookError> {
        let args = TaxTypesArgs {
            previous: previous.to_vec(),
        };
        self.call(HookId::GetTaxRateTypeChoices, &args)
    }

    fn change_user_address(&self, address: &Value, previous: &Value) -> Result<Value, HookError> {
        let args = AddressArgs {
            address: address.clone(),
            previous: previous.clone(),
        };
        self.call(HookId::ChangeUserAddress, &args)
    }

    fn preprocess_order_creation(
        &self,
        checkout: &Checkout,
        previous: &Value,
    ) -> Result<Value, HookError> {
        let args = OrderCreationArgs {
            checkout: checkout.clone(),
            previous: previous.clone(),
        };
        self.call(HookId::PreprocessOrderCreation, &args)
    }

    fn on_event(
        &self,
        event: LifecycleEvent,
        payload: &Value,
        previous: &Value,
    ) -> Result<Value, HookError> {
        let args = EventArgs {
            event,
            payload: payload.clone(),
            previous: previous.clone(),
        };
        self.call(HookId::OnEvent, &args)
    }

    fn payment(
        &self,
        operation: PaymentOperation,
        payment: &PaymentData,
    ) -> Result<GatewayResponse, HookError> {
        let args = PaymentArgs {
            operation,
            payment: payment.clone(),
        };
        self.call(operation.hook_id(), &args)
    }

    fn client_token(&self, config: &TokenConfig) -> Result<String, HookError> {
        let args = TokenArgs {
            config: config.clone(),
        };
        self.call(HookId::GetClientToken, &args)
    }

    fn list_payment_sources(&self, customer_id: &str) -> Result<Vec<CustomerSource>, HookError> {
        let args = SourcesArgs {
            customer_id: customer_id.to_owned(),
        };
        self.call(HookId::ListPaymentSources, &args)
    }

    fn payment_gateways(&self, query: &GatewayQuery) -> Result<Vec<PaymentGateway>, HookError> {
        self.call(HookId::GetPaymentGateways, query)
    }

    fn external_auth(
        &self,
        operation: ExternalAuthOperation,
        data: &Value,
    ) -> Result<Value, HookError> {
        let args = ExternalAuthArgs {
            operation,
            data: data.clone(),
        };
        self.call(operation.hook_id(), &args)
    }

    fn authenticate_user(
        &self,
        request: &AuthRequest,
        previous: &Option<AuthenticatedUser>,
    ) -> Result<Option<AuthenticatedUser>, HookError> {
        let args = AuthArgs {
            request: request.clone(),
            previous: previous.clone(),
        };
        self.call(HookId::AuthenticateUser, &args)
    }

    fn webhook(&self, request: &WebhookRequest) -> Result<WebhookResponse, HookError> {
        self.call(HookId::Webhook, request)
    }
}

/// Plugin-side handler dispatching hook calls to a [`PluginHooks`] value.
pub struct HooksServer {
    hooks: Arc<dyn PluginHooks>,
    mux: Multiplexer,
    host: HostHandle,
    deadline: Option<Duration>,
}

impl HooksServer {
    /// Serves `hooks`; `host` is connected when the host activates the plugin.
    #[must_use]
    pub fn new(
        hooks: Arc<dyn PluginHooks>,
        mux: Multiplexer,
        host: HostHandle,
        deadline: Option<Duration>,
    ) -> Self {
        Self {
            hooks,
            mux,
            host,
            deadline,
        }
    }

    fn activate(&self, args: ActivateArgs) -> Result<(), HookError> {
        if !self.host.is_connected() {
            let api = self
                .mux
                .dial(args.api_stream)
                .map_err(HookError::Transport)?;
            let driver = self
                .mux
                .dial(args.driver_stream)
                .map_err(HookError::Transport)?;
            let connected = self.host.connect(
                Arc::new(ApiClient::new(api, self.deadline)),
                Arc::new(DriverClient::new(driver, self.deadline)),
            );
            if !connected {
                debug!(target: HOOKS_TARGET, "host services already connected");
            }
        }

        if let Some(api) = self.host.api() {
            let configuration = api.load_configuration()?;
            match self.hooks.on_configuration_change(&configuration) {
                Err(error) if !error.is_not_implemented() => return Err(error),
                _ => {}
            }
        }

        match self.hooks.on_activate() {
            Err(error) if error.is_not_implemented() => Ok(()),
            other => other,
        }
    }

    fn dispatch(&self, hook: HookId, params: Value) -> Result<Value, HookError> {
        let hooks = self.hooks.as_ref();
        let value = match hook {
            HookId::OnActivate => encode_result(&self.activate(decode(params)?)?)?,
            HookId::OnDeactivate => encode_result(&hooks.on_deactivate()?)?,
            HookId::OnConfigurationChange => {
                let args: ConfigurationArgs = decode(params)?;
                encode_result(&hooks.on_configuration_change(&args.configuration)?)?
            }
            HookId::CalculateCheckoutTotal
            | HookId::CalculateCheckoutShipping
            | HookId::CalculateCheckoutLineTotal
            | HookId::CalculateCheckoutLineUnitPrice
            | HookId::CalculateOrderShipping
            | HookId::CalculateOrderLineTotal
            | HookId::CalculateOrderLineUnit => {
                let args: PriceArgs = decode(params)?;
                encode_result(&hooks.calculate_price(&args.query, &args.previous)?)?
            }
            HookId::GetCheckoutLineTaxRate
            | HookId::GetOrderLineTaxRate
            | HookId::GetCheckoutShippingTaxRate
            | HookId::GetOrderShippingTaxRate => {
                let args: TaxRateArgs = decode(params)?;
                encode_result(&hooks.tax_rate(&args.query, args.previous)?)?
            }
            HookId::ShowTaxesOnStorefront
            | HookId::FetchTaxesData
            | HookId::TokenIsRequiredAsPaymentInput => {
                let args: FlagArgs = decode(params)?;
                encode_result(&hooks.flag(args.flag, args.previous)?)?
            }
            HookId::GetTaxRateTypeChoices => {
                let args: TaxTypesArgs = decode(params)?;
                encode_result(&hooks.tax_rate_type_choices(&args.previous)?)?
            }
            HookId::ChangeUserAddress => {
                let args: AddressArgs = decode(params)?;
                encode_result(&hooks.change_user_address(&args.address, &args.previous)?)?
            }
            HookId::PreprocessOrderCreation => {
                let args: OrderCreationArgs = decode(params)?;
                encode_result(&hooks.preprocess_order_creation(&args.checkout, &args.previous)?)?
            }
            HookId::OnEvent => {
                let args: EventArgs = decode(params)?;
                encode_result(&hooks.on_event(args.event, &args.payload, &args.previous)?)?
            }
            HookId::AuthorizePayment
            | HookId::CapturePayment
            | HookId::RefundPayment
            | HookId::VoidPayment
            | HookId::ConfirmPayment
            | HookId::ProcessPayment => {
                let args: PaymentArgs = decode(params)?;
                encode_result(&hooks.payment(args.operation, &args.payment)?)?
            }
            HookId::GetPaymentGateways => {
                let query: GatewayQuery = decode(params)?;
                encode_result(&hooks.payment_gateways(&query)?)?
            }
            HookId::GetClientToken => {
                let args: TokenArgs = decode(params)?;
                encode_result(&hooks.client_token(&args.config)?)?
            }
            HookId::ListPaymentSources => {
                let args: SourcesArgs = decode(params)?;
                encode_result(&hooks.list_payment_sources(&args.customer_id)?)?
            }
            HookId::ExternalAuthenticationUrl
            | HookId::ExternalObtainAccessTokens
            | HookId::ExternalRefresh
            | HookId::ExternalLogout
            | HookId::ExternalVerify => {
                let args: ExternalAuthArgs = decode(params)?;
                encode_result(&hooks.external_auth(args.operation, &args.data)?)?
            }
            HookId::AuthenticateUser => {
                let args: AuthArgs = decode(params)?;
                encode_result(&hooks.authenticate_user(&args.request, &args.previous)?)?
            }
            HookId::Webhook => {
                let request: WebhookRequest = decode(params)?;
                encode_result(&hooks.webhook(&request)?)?
            }
        };
        Ok(value)
    }
}

fn decode<T: DeserializeOwned>(params: Value) -> Result<T, HookError> {
    Ok(hookwire_bridge::decode_params(params)?)
}

impl RequestHandler for HooksServer {
    fn handle(&self, method: &str, params: Value) -> Result<Value, RemoteError> {
        if method == IMPLEMENTED_METHOD {
            let implemented = self.hooks.implemented().map_err(|error| error.to_remote())?;
            return encode_result(&implemented);
        }
        let Ok(hook) = method.parse::<HookId>() else {
            return Err(RemoteError::MethodNotFound {
                method: method.to_owned(),
            });
        };
        self.dispatch(hook, params).map_err(|error| {
            if !error.is_not_implemented() {
                warn!(target: HOOKS_TARGET, %hook, %error, "hook failed");
            }
            error.to_remote()
        })
    }
}
