use rust_decimal::Decimal;
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;

use crate::errors::ServiceError;
use crate::services::checkout::DraftOrder;
use crate::services::pricing::{compute_order_totals, round_money};

/// Which currencies the payment gateway can settle in and what to do otherwise
#[derive(Debug, Clone)]
pub struct CurrencyPolicy {
    base_currency: String,
    unsupported: Vec<String>,
    settlement_currency: String,
}

/// Outcome of resolving a requested checkout currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Conversion {
    pub requested_currency: String,
    /// Currency the provider is asked to charge in
    pub settlement_currency: String,
    pub rate: Decimal,
    /// True when no rate was supplied for a foreign currency and 1.0 was assumed
    pub rate_defaulted: bool,
}

impl Conversion {
    pub fn is_identity(&self) -> bool {
        self.rate == Decimal::ONE
    }
}

impl CurrencyPolicy {
    pub fn new(
        base_currency: impl Into<String>,
        unsupported: Vec<String>,
        settlement_currency: impl Into<String>,
    ) -> Self {
        Self {
            base_currency: base_currency.into().to_ascii_uppercase(),
            unsupported: unsupported
                .into_iter()
                .map(|c| c.to_ascii_uppercase())
                .collect(),
            settlement_currency: settlement_currency.into().to_ascii_uppercase(),
        }
    }

    pub fn base_currency(&self) -> &str {
        &self.base_currency
    }

    pub fn is_unsupported(&self, currency: &str) -> bool {
        self.unsupported
            .iter()
            .any(|c| c.eq_ignore_ascii_case(currency))
    }

    /// Decides the settlement currency and rate for a checkout.
    ///
    /// * a currency the gateway cannot settle in needs a positive rate and is
    ///   charged in the settlement currency
    /// * the catalog currency is charged as is
    /// * any other currency uses the given rate, or 1.0 with a warning
    pub fn resolve(
        &self,
        requested: Option<&str>,
        rate: Option<Decimal>,
    ) -> Result<Conversion, ServiceError> {
        let requested = requested
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| self.base_currency.clone());

        if requested.len() != 3 || !requested.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ServiceError::ValidationError(format!(
                "'{}' is not a valid currency code",
                requested
            )));
        }

        if let Some(rate) = rate {
            if rate <= Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "exchange rate must be greater than zero".to_string(),
                ));
            }
        }

        if self.is_unsupported(&requested) {
            let rate = rate.ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "an exchange rate is required to pay in {}",
                    requested
                ))
            })?;
            return Ok(Conversion {
                requested_currency: requested,
                settlement_currency: self.settlement_currency.clone(),
                rate,
                rate_defaulted: false,
            });
        }

        if requested == self.base_currency {
            return Ok(Conversion {
                settlement_currency: requested.clone(),
                requested_currency: requested,
                rate: Decimal::ONE,
                rate_defaulted: false,
            });
        }

        let (rate, rate_defaulted) = match rate {
            Some(rate) => (rate, false),
            None => {
                warn!(
                    currency = %requested,
                    base_currency = %self.base_currency,
                    "no exchange rate supplied; charging at 1:1"
                );
                (Decimal::ONE, true)
            }
        };

        Ok(Conversion {
            settlement_currency: requested.clone(),
            requested_currency: requested,
            rate,
            rate_defaulted,
        })
    }
}

/// `amount * rate`
pub fn convert(amount: Decimal, rate: Decimal) -> Result<Decimal, ServiceError> {
    amount
        .checked_mul(rate)
        .ok_or_else(|| ServiceError::ValidationError("converted amount is too large".to_string()))
}

/// Converts every monetary field of a draft order with one rate.
///
/// Unit and stone prices are converted and rounded to cents, each line total is
/// recomputed from the converted unit price and the order totals are re-summed,
/// so the totals always equal the sum of the lines.
pub fn convert_order(draft: &DraftOrder, conversion: &Conversion) -> Result<DraftOrder, ServiceError> {
    let mut items = Vec::with_capacity(draft.items.len());
    for item in &draft.items {
        let mut converted = item.clone();
        converted.unit_price = round_money(convert(item.unit_price, conversion.rate)?);
        converted.stone_price = round_money(convert(item.stone_price, conversion.rate)?);
        converted.total_price = converted
            .unit_price
            .checked_mul(Decimal::from(item.quantity))
            .ok_or_else(|| {
                ServiceError::ValidationError("converted amount is too large".to_string())
            })?;
        items.push(converted);
    }

    let totals = compute_order_totals(&items)?;
    Ok(DraftOrder {
        items,
        totals,
        currency: conversion.settlement_currency.clone(),
    })
}
