//! Line and order pricing for configured jewelry.
//!
//! `unit = base_price * purity_multiplier + stone_price`, `line = unit * quantity`,
//! `subtotal = sum(line)`, `total = subtotal + shipping` with shipping currently zero.
//! Arithmetic is exact; [`round_money`] is applied where a price is frozen
//! into an order or handed to the payment provider.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::entities::order::OrderItem;
use crate::errors::ServiceError;

/// Flat shipping fee added to every order
pub const SHIPPING_FEE: Decimal = Decimal::ZERO;

/// Decimal places kept for settled amounts
pub const MONEY_SCALE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LinePrice {
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

impl LinePrice {
    /// Rounds the unit price to cents and recomputes the line total from it,
    /// so `total_price == unit_price * quantity` still holds exactly
    pub fn rounded(&self, quantity: i32) -> Result<LinePrice, ServiceError> {
        let unit_price = round_money(self.unit_price);
        let total_price = unit_price
            .checked_mul(Decimal::from(quantity))
            .ok_or_else(overflow)?;
        Ok(LinePrice {
            unit_price,
            total_price,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub shipping_fee: Decimal,
    pub total: Decimal,
}

fn overflow() -> ServiceError {
    ServiceError::ValidationError("amount is too large".to_string())
}

fn ensure_non_negative(name: &str, value: Decimal) -> Result<(), ServiceError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ServiceError::ValidationError(format!(
            "{} must not be negative",
            name
        )));
    }
    Ok(())
}

/// Prices one cart line. Negative amounts and quantities below one are rejected.
pub fn compute_line_total(
    base_price: Decimal,
    purity_multiplier: Decimal,
    stone_price: Option<Decimal>,
    quantity: i32,
) -> Result<LinePrice, ServiceError> {
    let stone_price = stone_price.unwrap_or(Decimal::ZERO);
    ensure_non_negative("base price", base_price)?;
    ensure_non_negative("purity multiplier", purity_multiplier)?;
    ensure_non_negative("stone price", stone_price)?;
    if quantity < 1 {
        return Err(ServiceError::ValidationError(
            "quantity must be at least 1".to_string(),
        ));
    }

    let unit_price = base_price
        .checked_mul(purity_multiplier)
        .and_then(|metal| metal.checked_add(stone_price))
        .ok_or_else(overflow)?;
    let total_price = unit_price
        .checked_mul(Decimal::from(quantity))
        .ok_or_else(overflow)?;

    Ok(LinePrice {
        unit_price,
        total_price,
    })
}

/// Sums line totals into order totals
pub fn compute_order_totals(items: &[OrderItem]) -> Result<OrderTotals, ServiceError> {
    let subtotal = items
        .iter()
        .try_fold(Decimal::ZERO, |acc, item| acc.checked_add(item.total_price))
        .ok_or_else(overflow)?;
    let total = subtotal.checked_add(SHIPPING_FEE).ok_or_else(overflow)?;

    Ok(OrderTotals {
        subtotal,
        shipping_fee: SHIPPING_FEE,
        total,
    })
}

/// Rounds to cents, half away from zero
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn item(total_price: Decimal) -> OrderItem {
        OrderItem {
            product_id: Uuid::new_v4(),
            product_name: "Ring".into(),
            product_image: None,
            metal_id: Uuid::new_v4(),
            metal_name: "Gold".into(),
            purity_level: "18K".into(),
            stone_id: None,
            stone_name: None,
            stone_price: Decimal::ZERO,
            ring_size: None,
            quantity: 1,
            unit_price: total_price,
            total_price,
        }
    }

    #[test]
    fn line_total_matches_catalog_formula() {
        let price = compute_line_total(dec!(1000), dec!(0.75), Some(dec!(200)), 2).unwrap();
        assert_eq!(price.unit_price, dec!(950));
        assert_eq!(price.total_price, dec!(1900));
    }

    #[test]
    fn missing_stone_costs_nothing() {
        let price = compute_line_total(dec!(499.99), dec!(1), None, 3).unwrap();
        assert_eq!(price.unit_price, dec!(499.99));
        assert_eq!(price.total_price, dec!(1499.97));
    }

    #[test]
    fn rejects_negative_inputs_and_zero_quantity() {
        assert!(compute_line_total(dec!(-1), dec!(1), None, 1).is_err());
        assert!(compute_line_total(dec!(1), dec!(-0.5), None, 1).is_err());
        assert!(compute_line_total(dec!(1), dec!(1), Some(dec!(-3)), 1).is_err());
        assert!(matches!(
            compute_line_total(dec!(1), dec!(1), None, 0),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn rounding_keeps_line_total_consistent() {
        let exact = compute_line_total(dec!(333.33), dec!(0.585), None, 3).unwrap();
        assert_eq!(exact.unit_price, dec!(194.998050));

        let rounded = exact.rounded(3).unwrap();
        assert_eq!(rounded.unit_price, dec!(195.00));
        assert_eq!(rounded.total_price, dec!(585.00));
    }

    #[test]
    fn round_money_uses_half_away_from_zero() {
        assert_eq!(round_money(dec!(2.345)), dec!(2.35));
        assert_eq!(round_money(dec!(2.344)), dec!(2.34));
        assert_eq!(round_money(dec!(-2.345)), dec!(-2.35));
    }

    #[test]
    fn order_totals_sum_items_without_shipping() {
        let totals = compute_order_totals(&[item(dec!(1900)), item(dec!(100.50))]).unwrap();
        assert_eq!(totals.subtotal, dec!(2000.50));
        assert_eq!(totals.total, dec!(2000.50));
        assert_eq!(totals.shipping_fee, Decimal::ZERO);
    }

    #[test]
    fn empty_order_totals_are_zero() {
        let totals = compute_order_totals(&[]).unwrap();
        assert_eq!(totals.subtotal, Decimal::ZERO);
        assert_eq!(totals.total, Decimal::ZERO);
    }
}
