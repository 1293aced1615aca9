//! Pure price computation for checkout.
//!
//! Nothing here touches the database: callers hand in current line prices
//! and the redeemed voucher, and get back the four amounts stored on the
//! order. `final_amount == max(0, subtotal + shipping_fee - discount_amount)`
//! holds for every quote produced.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::entities::commerce::{voucher, VoucherType};

/// Flat fee unless the subtotal strictly exceeds the free-shipping threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShippingPolicy {
    pub flat_fee: Decimal,
    pub free_threshold: Decimal,
}

impl ShippingPolicy {
    pub fn new(flat_fee: Decimal, free_threshold: Decimal) -> Self {
        Self {
            flat_fee,
            free_threshold,
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(cfg.shipping_flat_fee, cfg.free_shipping_threshold)
    }

    pub fn fee_for(&self, subtotal: Decimal) -> Decimal {
        if subtotal > self.free_threshold {
            Decimal::ZERO
        } else {
            self.flat_fee
        }
    }
}

/// What a redeemed voucher does to the order total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoucherEffect {
    /// Flat currency amount off
    Fixed(Decimal),
    /// Percentage of the subtotal
    Percent(Decimal),
    /// Waives the shipping fee
    FreeShipping,
}

impl VoucherEffect {
    pub fn from_voucher(voucher: &voucher::Model) -> Self {
        match voucher.voucher_type {
            VoucherType::Fixed => VoucherEffect::Fixed(voucher.value),
            VoucherType::Percent => VoucherEffect::Percent(voucher.value),
            VoucherType::Freeship => VoucherEffect::FreeShipping,
        }
    }

    /// Discount for the given subtotal and shipping fee, never negative and
    /// never more than `subtotal + shipping_fee`.
    pub fn discount(&self, subtotal: Decimal, shipping_fee: Decimal) -> Decimal {
        let raw = match self {
            VoucherEffect::Fixed(value) => *value,
            VoucherEffect::Percent(percent) => (subtotal * *percent / Decimal::ONE_HUNDRED)
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
            VoucherEffect::FreeShipping => shipping_fee,
        };
        raw.max(Decimal::ZERO).min(subtotal + shipping_fee)
    }
}

/// Amounts written to an order row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PriceQuote {
    pub subtotal: Decimal,
    pub shipping_fee: Decimal,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
}

impl PriceQuote {
    /// Shipping the customer actually pays once a FREESHIP waiver is applied
    pub fn payable_shipping(&self) -> Decimal {
        (self.shipping_fee - self.discount_amount).max(Decimal::ZERO)
    }
}

/// Sum of `unit_price * quantity` over the lines.
pub fn subtotal<I>(lines: I) -> Decimal
where
    I: IntoIterator<Item = (Decimal, i32)>,
{
    lines
        .into_iter()
        .map(|(price, quantity)| price * Decimal::from(quantity))
        .sum()
}

pub fn quote(
    subtotal: Decimal,
    policy: &ShippingPolicy,
    voucher: Option<&VoucherEffect>,
) -> PriceQuote {
    let shipping_fee = policy.fee_for(subtotal);
    let discount_amount = voucher
        .map(|effect| effect.discount(subtotal, shipping_fee))
        .unwrap_or(Decimal::ZERO);
    let final_amount = (subtotal + shipping_fee - discount_amount).max(Decimal::ZERO);

    PriceQuote {
        subtotal,
        shipping_fee,
        discount_amount,
        final_amount,
    }
}
