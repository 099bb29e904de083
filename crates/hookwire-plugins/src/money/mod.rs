//! Monetary chain values.
//!
//! Amounts are exact decimals. Pricing hooks may return amounts with
//! arbitrary precision; the dispatcher re-quantizes the final value to the
//! currency's minor units, always rounding away from zero.

use std::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from money arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    /// The operands are in different currencies.
    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch {
        /// Currency of the left operand.
        left: String,
        /// Currency of the right operand.
        right: String,
    },
    /// The result does not fit the decimal range.
    #[error("money arithmetic overflowed")]
    Overflow,
    /// Division by zero.
    #[error("division by zero")]
    DivisionByZero,
}

/// Number of minor-unit digits for an ISO 4217 currency code.
#[must_use]
pub fn minor_units(currency: &str) -> u32 {
    match currency.to_ascii_uppercase().as_str() {
        "JPY" | "KRW" | "VND" | "CLP" | "ISK" | "UGX" => 0,
        "BHD" | "IQD" | "JOD" | "KWD" | "LYD" | "OMR" | "TND" => 3,
        _ => 2,
    }
}

fn round_up(amount: Decimal, currency: &str) -> Decimal {
    let units = minor_units(currency);
    let mut rounded = amount.round_dp_with_strategy(units, RoundingStrategy::AwayFromZero);
    rounded.rescale(units);
    rounded
}

/// An amount in a single currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    /// Exact amount.
    pub amount: Decimal,
    /// ISO 4217 currency code.
    pub currency: String,
}

impl Money {
    /// Creates a money value.
    #[must_use]
    pub fn new(amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }

    /// Zero in `currency`.
    #[must_use]
    pub fn zero(currency: impl Into<String>) -> Self {
        Self::new(Decimal::ZERO, currency)
    }

    /// Rounds to the currency's minor units, away from zero.
    #[must_use]
    pub fn quantize(&self) -> Self {
        Self::new(round_up(self.amount, &self.currency), self.currency.clone())
    }

    /// Adds two amounts in the same currency.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::CurrencyMismatch`] or [`MoneyError::Overflow`].
    pub fn checked_add(&self, other: &Self) -> Result<Self, MoneyError> {
        self.ensure_same_currency(other)?;
        let amount = self
            .amount
            .checked_add(other.amount)
            .ok_or(MoneyError::Overflow)?;
        Ok(Self::new(amount, self.currency.clone()))
    }

    /// Multiplies the amount by `factor`.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::Overflow`].
    pub fn checked_mul(&self, factor: Decimal) -> Result<Self, MoneyError> {
        let amount = self.amount.checked_mul(factor).ok_or(MoneyError::Overflow)?;
        Ok(Self::new(amount, self.currency.clone()))
    }

    /// Divides the amount by `divisor`.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::DivisionByZero`] or [`MoneyError::Overflow`].
    pub fn checked_div(&self, divisor: Decimal) -> Result<Self, MoneyError> {
        if divisor.is_zero() {
            return Err(MoneyError::DivisionByZero);
        }
        let amount = self.amount.checked_div(divisor).ok_or(MoneyError::Overflow)?;
        Ok(Self::new(amount, self.currency.clone()))
    }

    fn ensure_same_currency(&self, other: &Self) -> Result<(), MoneyError> {
        if self.currency.eq_ignore_ascii_case(&other.currency) {
            Ok(())
        } else {
            Err(MoneyError::CurrencyMismatch {
                left: self.currency.clone(),
                right: other.currency.clone(),
            })
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

/// A net and gross pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaxedMoney {
    /// Amount before tax.
    pub net: Money,
    /// Amount including tax.
    pub gross: Money,
}

impl TaxedMoney {
    /// Creates a taxed amount.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::CurrencyMismatch`] when the halves differ in currency.
    pub fn new(net: Money, gross: Money) -> Result<Self, MoneyError> {
        net.ensure_same_currency(&gross)?;
        Ok(Self { net, gross })
    }

    /// A taxed amount whose net and gross are equal.
    #[must_use]
    pub fn untaxed(amount: Money) -> Self {
        Self {
            net: amount.clone(),
            gross: amount,
        }
    }

    /// Zero in `currency`.
    #[must_use]
    pub fn zero(currency: &str) -> Self {
        Self::untaxed(Money::zero(currency))
    }

    /// Returns the currency code.
    #[must_use]
    pub fn currency(&self) -> &str {
        &self.net.currency
    }

    /// Quantizes both halves.
    #[must_use]
    pub fn quantize(&self) -> Self {
        Self {
            net: self.net.quantize(),
            gross: self.gross.quantize(),
        }
    }

    /// Adds two taxed amounts.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::CurrencyMismatch`] or [`MoneyError::Overflow`].
    pub fn checked_add(&self, other: &Self) -> Result<Self, MoneyError> {
        Ok(Self {
            net: self.net.checked_add(&other.net)?,
            gross: self.gross.checked_add(&other.gross)?,
        })
    }

    /// Divides both halves by `divisor`.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::DivisionByZero`] or [`MoneyError::Overflow`].
    pub fn checked_div(&self, divisor: Decimal) -> Result<Self, MoneyError> {
        Ok(Self {
            net: self.net.checked_div(divisor)?,
            gross: self.gross.checked_div(divisor)?,
        })
    }

    /// Multiplies both halves by `factor`.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::Overflow`].
    pub fn checked_mul(&self, factor: Decimal) -> Result<Self, MoneyError> {
        Ok(Self {
            net: self.net.checked_mul(factor)?,
            gross: self.gross.checked_mul(factor)?,
        })
    }

    /// Effective tax rate, `gross / net - 1`, or zero for a zero net.
    #[must_use]
    pub fn tax_rate(&self) -> Decimal {
        if self.net.amount.is_zero() {
            return Decimal::ZERO;
        }
        self.gross
            .amount
            .checked_div(self.net.amount)
            .map_or(Decimal::ZERO, |ratio| ratio - Decimal::ONE)
    }
}

impl fmt::Display for TaxedMoney {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "net {} / gross {}", self.net, self.gross)
    }
}
