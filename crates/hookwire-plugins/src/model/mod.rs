//! Payload types carried by hooks.
//!
//! The host's domain services own the real checkout, order and payment
//! records. Hooks only see these snapshots, which keep typed fields for the
//! parts the dispatcher reasons about and an opaque `data` value for the
//! rest.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::hooks::HookId;
use crate::money::{Money, TaxedMoney};

/// Snapshot of a checkout line.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CheckoutLine {
    /// Line identifier.
    pub id: String,
    /// Product variant identifier.
    pub variant_id: String,
    /// Quantity ordered.
    pub quantity: u32,
    /// Opaque domain data.
    #[serde(default)]
    pub data: Value,
}

/// Snapshot of a checkout.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Checkout {
    /// Checkout token.
    pub id: String,
    /// Sales channel the checkout belongs to.
    pub channel_id: String,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Lines in display order.
    #[serde(default)]
    pub lines: Vec<CheckoutLine>,
    /// Opaque domain data.
    #[serde(default)]
    pub data: Value,
}

/// Snapshot of an order line.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderLine {
    /// Line identifier.
    pub id: String,
    /// Product variant identifier, absent for deleted variants.
    #[serde(default)]
    pub variant_id: Option<String>,
    /// Quantity ordered.
    pub quantity: u32,
    /// Opaque domain data.
    #[serde(default)]
    pub data: Value,
}

/// Snapshot of an order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier.
    pub id: String,
    /// Sales channel the order belongs to.
    pub channel_id: String,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Lines in display order.
    #[serde(default)]
    pub lines: Vec<OrderLine>,
    /// Opaque domain data.
    #[serde(default)]
    pub data: Value,
}

/// A priced extension point and the record it prices.
///
/// Every variant maps onto exactly one pricing hook, so a single
/// `calculate_price` call on the plugin side can serve all of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PriceQuery {
    /// Total of a checkout.
    CheckoutTotal {
        /// Checkout being priced.
        checkout: Checkout,
    },
    /// Shipping price of a checkout.
    CheckoutShipping {
        /// Checkout being priced.
        checkout: Checkout,
    },
    /// Total of one checkout line.
    CheckoutLineTotal {
        /// Checkout containing the line.
        checkout: Checkout,
        /// Line being priced.
        line: CheckoutLine,
    },
    /// Unit price of one checkout line.
    CheckoutLineUnitPrice {
        /// Checkout containing the line.
        checkout: Checkout,
        /// Line being priced.
        line: CheckoutLine,
    },
    /// Shipping price of an order.
    OrderShipping {
        /// Order being priced.
        order: Order,
    },
    /// Total of one order line.
    OrderLineTotal {
        /// Order containing the line.
        order: Order,
        /// Line being priced.
        line: OrderLine,
    },
    /// Unit price of one order line.
    OrderLineUnit {
        /// Order containing the line.
        order: Order,
        /// Line being priced.
        line: OrderLine,
    },
}

impl PriceQuery {
    /// Returns the hook this query dispatches through.
    #[must_use]
    pub const fn hook_id(&self) -> HookId {
        match self {
            Self::CheckoutTotal { .. } => HookId::CalculateCheckoutTotal,
            Self::CheckoutShipping { .. } => HookId::CalculateCheckoutShipping,
            Self::CheckoutLineTotal { .. } => HookId::CalculateCheckoutLineTotal,
            Self::CheckoutLineUnitPrice { .. } => HookId::CalculateCheckoutLineUnitPrice,
            Self::OrderShipping { .. } => HookId::CalculateOrderShipping,
            Self::OrderLineTotal { .. } => HookId::CalculateOrderLineTotal,
            Self::OrderLineUnit { .. } => HookId::CalculateOrderLineUnit,
        }
    }

    /// Returns the channel of the priced record.
    #[must_use]
    pub fn channel_id(&self) -> &str {
        match self {
            Self::CheckoutTotal { checkout }
            | Self::CheckoutShipping { checkout }
            | Self::CheckoutLineTotal { checkout, .. }
            | Self::CheckoutLineUnitPrice { checkout, .. } => &checkout.channel_id,
            Self::OrderShipping { order }
            | Self::OrderLineTotal { order, .. }
            | Self::OrderLineUnit { order, .. } => &order.channel_id,
        }
    }
}

/// A tax-rate extension point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaxRateQuery {
    /// Rate applied to a checkout line.
    CheckoutLine {
        /// Checkout containing the line.
        checkout: Checkout,
        /// Line in question.
        line: CheckoutLine,
    },
    /// Rate applied to an order line.
    OrderLine {
        /// Order containing the line.
        order: Order,
        /// Line in question.
        line: OrderLine,
    },
    /// Rate applied to checkout shipping.
    CheckoutShipping {
        /// Checkout in question.
        checkout: Checkout,
    },
    /// Rate applied to order shipping.
    OrderShipping {
        /// Order in question.
        order: Order,
    },
}

impl TaxRateQuery {
    /// Returns the hook this query dispatches through.
    #[must_use]
    pub const fn hook_id(&self) -> HookId {
        match self {
            Self::CheckoutLine { .. } => HookId::GetCheckoutLineTaxRate,
            Self::OrderLine { .. } => HookId::GetOrderLineTaxRate,
            Self::CheckoutShipping { .. } => HookId::GetCheckoutShippingTaxRate,
            Self::OrderShipping { .. } => HookId::GetOrderShippingTaxRate,
        }
    }

    /// Returns the channel of the record.
    #[must_use]
    pub fn channel_id(&self) -> &str {
        match self {
            Self::CheckoutLine { checkout, .. } | Self::CheckoutShipping { checkout } => {
                &checkout.channel_id
            }
            Self::OrderLine { order, .. } | Self::OrderShipping { order } => &order.channel_id,
        }
    }
}

/// Boolean storefront flags threaded through the chain.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HookFlag {
    /// Whether storefronts display taxed prices.
    ShowTaxesOnStorefront,
    /// Whether the host should fetch taxes data.
    FetchTaxesData,
    /// Whether a payment gateway needs a token as payment input.
    TokenIsRequiredAsPaymentInput,
}

impl HookFlag {
    /// Returns the hook this flag dispatches through.
    #[must_use]
    pub const fn hook_id(self) -> HookId {
        match self {
            Self::ShowTaxesOnStorefront => HookId::ShowTaxesOnStorefront,
            Self::FetchTaxesData => HookId::FetchTaxesData,
            Self::TokenIsRequiredAsPaymentInput => HookId::TokenIsRequiredAsPaymentInput,
        }
    }
}

/// A tax classification offered by a tax plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaxType {
    /// Provider-specific code.
    pub code: String,
    /// Human-readable description.
    pub description: String,
}

/// Domain events broadcast to every implementing plugin.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleEvent {
    /// A customer account was created.
    CustomerCreated,
    /// A customer account changed.
    CustomerUpdated,
    /// A product was created.
    ProductCreated,
    /// A product changed.
    ProductUpdated,
    /// A product was deleted.
    ProductDeleted,
    /// An order was placed.
    OrderCreated,
    /// An order was confirmed.
    OrderConfirmed,
    /// An order was fully paid.
    OrderFullyPaid,
    /// An order changed.
    OrderUpdated,
    /// An order was cancelled.
    OrderCancelled,
    /// An order was fulfilled.
    OrderFulfilled,
    /// A fulfillment was created.
    FulfillmentCreated,
    /// A checkout was created.
    CheckoutCreated,
    /// A checkout changed.
    CheckoutUpdated,
    /// An invoice was requested.
    InvoiceRequested,
    /// An invoice was deleted.
    InvoiceDeleted,
    /// An invoice was sent.
    InvoiceSent,
    /// A notification should be delivered.
    Notify,
}

/// Payment gateway operations.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentOperation {
    /// Reserve funds.
    Authorize,
    /// Collect reserved funds.
    Capture,
    /// Return collected funds.
    Refund,
    /// Release reserved funds.
    Void,
    /// Confirm a pending payment.
    Confirm,
    /// Authorize and capture in one step.
    Process,
}

impl PaymentOperation {
    /// Returns the hook this operation dispatches through.
    #[must_use]
    pub const fn hook_id(self) -> HookId {
        match self {
            Self::Authorize => HookId::AuthorizePayment,
            Self::Capture => HookId::CapturePayment,
            Self::Refund => HookId::RefundPayment,
            Self::Void => HookId::VoidPayment,
            Self::Confirm => HookId::ConfirmPayment,
            Self::Process => HookId::ProcessPayment,
        }
    }
}

/// Input to a payment operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentData {
    /// Gateway (plugin) id handling the payment.
    pub gateway: String,
    /// Amount to operate on.
    pub amount: Money,
    /// Payment record identifier.
    pub payment_id: String,
    /// Gateway-issued token, when one exists.
    #[serde(default)]
    pub token: Option<String>,
    /// Customer identifier, when known.
    #[serde(default)]
    pub customer_id: Option<String>,
    /// Opaque domain data.
    #[serde(default)]
    pub data: Value,
}

/// Outcome of a payment operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayResponse {
    /// Whether the operation succeeded.
    pub is_success: bool,
    /// Operation the gateway performed.
    pub kind: PaymentOperation,
    /// Amount affected.
    pub amount: Money,
    /// Gateway transaction identifier.
    pub transaction_id: String,
    /// Error description from the gateway.
    #[serde(default)]
    pub error: Option<String>,
    /// Raw gateway response.
    #[serde(default)]
    pub raw_response: Value,
}

/// Options for a client token request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Customer to issue the token for.
    #[serde(default)]
    pub customer_id: Option<String>,
}

/// A stored payment source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerSource {
    /// Source identifier.
    pub id: String,
    /// Gateway owning the source.
    pub gateway: String,
    /// Card brand or method name.
    #[serde(default)]
    pub brand: Option<String>,
    /// Last four digits, for cards.
    #[serde(default)]
    pub last_4: Option<String>,
}

/// A gateway offered at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentGateway {
    /// Gateway (plugin) id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Currencies the gateway accepts.
    #[serde(default)]
    pub currencies: Vec<String>,
    /// Public configuration for storefront clients.
    #[serde(default)]
    pub config: Vec<BTreeMap<String, Value>>,
}

/// External authentication operations.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExternalAuthOperation {
    /// Begin an authentication flow.
    AuthenticationUrl,
    /// Exchange provider credentials for tokens.
    ObtainAccessTokens,
    /// Refresh issued tokens.
    Refresh,
    /// Invalidate issued tokens.
    Logout,
    /// Verify a token.
    Verify,
}

impl ExternalAuthOperation {
    /// Returns the hook this operation dispatches through.
    #[must_use]
    pub const fn hook_id(self) -> HookId {
        match self {
            Self::AuthenticationUrl => HookId::ExternalAuthenticationUrl,
            Self::ObtainAccessTokens => HookId::ExternalObtainAccessTokens,
            Self::Refresh => HookId::ExternalRefresh,
            Self::Logout => HookId::ExternalLogout,
            Self::Verify => HookId::ExternalVerify,
        }
    }
}

/// An incoming HTTP request forwarded to a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WebhookRequest {
    /// HTTP method.
    pub method: String,
    /// Path below the plugin's webhook prefix.
    pub path: String,
    /// Request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Request body.
    #[serde(default)]
    pub body: Vec<u8>,
}

/// A plugin's answer to a webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Response body.
    #[serde(default)]
    pub body: Vec<u8>,
}

/// Credentials presented for user authentication.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// A user resolved by an authentication plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    /// User identifier.
    pub id: String,
    /// Email address.
    pub email: String,
    /// Whether the user is staff.
    #[serde(default)]
    pub is_staff: bool,
}

/// A tax rate chain value.
pub type TaxRate = Decimal;

/// A price chain value.
pub type Price = TaxedMoney;
