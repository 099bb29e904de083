//! Hook identifiers and capability sets.

use std::fmt;

use serde::de::{SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::{AsRefStr, Display, EnumCount, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// Every hook a plugin may implement.
///
/// The snake_case name doubles as the RPC method name on the hooks stream.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    EnumCount,
    AsRefStr,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HookId {
    /// Plugin was activated.
    OnActivate,
    /// Plugin is about to be deactivated.
    OnDeactivate,
    /// Plugin configuration changed.
    OnConfigurationChange,
    /// Checkout total price.
    CalculateCheckoutTotal,
    /// Checkout shipping price.
    CalculateCheckoutShipping,
    /// Checkout line total price.
    CalculateCheckoutLineTotal,
    /// Checkout line unit price.
    CalculateCheckoutLineUnitPrice,
    /// Order shipping price.
    CalculateOrderShipping,
    /// Order line total price.
    CalculateOrderLineTotal,
    /// Order line unit price.
    CalculateOrderLineUnit,
    /// Tax rate of a checkout line.
    GetCheckoutLineTaxRate,
    /// Tax rate of an order line.
    GetOrderLineTaxRate,
    /// Tax rate of checkout shipping.
    GetCheckoutShippingTaxRate,
    /// Tax rate of order shipping.
    GetOrderShippingTaxRate,
    /// Storefront tax display flag.
    ShowTaxesOnStorefront,
    /// Taxes data fetch flag.
    FetchTaxesData,
    /// Payment token requirement flag.
    TokenIsRequiredAsPaymentInput,
    /// Tax classification choices.
    GetTaxRateTypeChoices,
    /// Address normalisation.
    ChangeUserAddress,
    /// Order creation pre-check.
    PreprocessOrderCreation,
    /// Domain event notification.
    OnEvent,
    /// Payment authorisation.
    AuthorizePayment,
    /// Payment capture.
    CapturePayment,
    /// Payment refund.
    RefundPayment,
    /// Payment void.
    VoidPayment,
    /// Payment confirmation.
    ConfirmPayment,
    /// Combined authorise and capture.
    ProcessPayment,
    /// Gateways offered at checkout.
    GetPaymentGateways,
    /// Client token issuance.
    GetClientToken,
    /// Stored payment sources.
    ListPaymentSources,
    /// External authentication URL.
    ExternalAuthenticationUrl,
    /// External token exchange.
    ExternalObtainAccessTokens,
    /// External token refresh.
    ExternalRefresh,
    /// External logout.
    ExternalLogout,
    /// External token verification.
    ExternalVerify,
    /// Request authentication.
    AuthenticateUser,
    /// Incoming webhook.
    Webhook,
}

impl HookId {
    /// RPC method name on the hooks stream.
    #[must_use]
    pub fn method(self) -> &'static str {
        self.into()
    }

    const fn bit(self) -> u64 {
        1_u64 << (self as u32)
    }
}

/// Set of hooks a connected plugin implements.
///
/// Serialised as a list of hook names. Names this build does not know are
/// ignored on decode so newer plugins can talk to older hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HookSet(u64);

impl HookSet {
    /// The empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every known hook.
    #[must_use]
    pub fn all() -> Self {
        HookId::iter().collect()
    }

    /// Returns the set with `hook` added.
    #[must_use]
    pub const fn with(self, hook: HookId) -> Self {
        Self(self.0 | hook.bit())
    }

    /// Adds `hook`.
    pub const fn insert(&mut self, hook: HookId) {
        self.0 |= hook.bit();
    }

    /// Returns true when `hook` is in the set.
    #[must_use]
    pub const fn contains(self, hook: HookId) -> bool {
        self.0 & hook.bit() != 0
    }

    /// Returns true when no hook is in the set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of hooks in the set.
    #[must_use]
    pub const fn len(self) -> u32 {
        self.0.count_ones()
    }

    /// Iterates the hooks in declaration order.
    pub fn iter(self) -> impl Iterator<Item = HookId> {
        HookId::iter().filter(move |hook| self.contains(*hook))
    }
}

impl FromIterator<HookId> for HookSet {
    fn from_iter<I: IntoIterator<Item = HookId>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

impl Serialize for HookSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.count_ones() as usize))?;
        for hook in self.iter() {
            seq.serialize_element(hook.method())?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for HookSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HookSetVisitor;

        impl<'de> Visitor<'de> for HookSetVisitor {
            type Value = HookSet;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a list of hook names")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<HookSet, A::Error> {
                let mut set = HookSet::empty();
                while let Some(name) = seq.next_element::<String>()? {
                    if let Ok(hook) = name.parse::<HookId>() {
                        set.insert(hook);
                    }
                }
                Ok(set)
            }
        }

        deserializer.deserialize_seq(HookSetVisitor)
    }
}

// Capacity guard for the bitset representation.
const _: () = assert!(HookId::COUNT <= 64);
