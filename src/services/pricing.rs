use crate::{
    entities::{customer, order::OrderLine, product},
    errors::ServiceError,
    services::{catalog::CatalogService, loyalty},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// One requested cart line: a live product reference and grams wanted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// The discount class selected for an order. At most one applies; the
/// first-order discount always wins over the loyalty tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppliedDiscount {
    None,
    FirstOrder(u32),
    LoyaltyTier(u32),
}

impl AppliedDiscount {
    pub fn percent(self) -> u32 {
        match self {
            AppliedDiscount::None => 0,
            AppliedDiscount::FirstOrder(p) | AppliedDiscount::LoyaltyTier(p) => p,
        }
    }
}

/// Discount-relevant view of the requesting customer.
#[derive(Debug, Clone, Copy)]
pub struct LoyaltyProfile {
    pub first_order_available: bool,
    pub verified: bool,
    pub xp: i64,
    pub personal_discount: Option<u32>,
}

impl LoyaltyProfile {
    pub fn guest() -> Self {
        Self {
            first_order_available: false,
            verified: false,
            xp: 0,
            personal_discount: None,
        }
    }

    pub fn of(customer: &customer::Model) -> Self {
        Self {
            first_order_available: !customer.first_order_discount_used,
            verified: customer.verified,
            xp: customer.xp,
            personal_discount: customer
                .personal_discount
                .and_then(|p| u32::try_from(p).ok())
                .map(|p| p.min(100)),
        }
    }
}

/// Server-computed authoritative totals for a cart.
#[derive(Debug, Clone)]
pub struct PricedCart {
    pub lines: Vec<OrderLine>,
    pub subtotal: Decimal,
    pub discount: AppliedDiscount,
    /// Operator-granted percent stacked multiplicatively after `discount`
    pub personal_percent: Option<u32>,
    pub total: Decimal,
}

#[derive(Clone)]
pub struct PricingService {
    catalog: Arc<CatalogService>,
    first_order_percent: u32,
}

impl PricingService {
    pub fn new(catalog: Arc<CatalogService>, first_order_percent: u32) -> Self {
        Self {
            catalog,
            first_order_percent: first_order_percent.min(100),
        }
    }

    /// Prices a cart against the live catalog and the customer's discount
    /// state. Client-side prices never enter this computation.
    #[instrument(skip(self, lines, customer))]
    pub async fn price_cart(
        &self,
        lines: &[CartLine],
        customer: Option<&customer::Model>,
    ) -> Result<PricedCart, ServiceError> {
        let ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
        let products = self.catalog.products_by_ids(&ids).await?;
        let profile = customer.map(LoyaltyProfile::of).unwrap_or_else(LoyaltyProfile::guest);
        Ok(compute_quote(
            &products,
            lines,
            profile,
            self.first_order_percent,
        ))
    }
}

/// Pure quote computation. Lines whose product no longer exists or is off
/// sale are dropped with a warning rather than failing the whole cart.
pub fn compute_quote(
    products: &[product::Model],
    lines: &[CartLine],
    profile: LoyaltyProfile,
    first_order_percent: u32,
) -> PricedCart {
    let by_id: HashMap<Uuid, &product::Model> = products.iter().map(|p| (p.id, p)).collect();

    let mut priced_lines = Vec::with_capacity(lines.len());
    let mut subtotal = Decimal::ZERO;

    for line in lines {
        if line.quantity <= 0 {
            warn!(product_id = %line.product_id, quantity = line.quantity, "dropping non-positive cart quantity");
            continue;
        }
        let Some(product) = by_id.get(&line.product_id).filter(|p| p.available) else {
            warn!(product_id = %line.product_id, "dropping cart line for unavailable product");
            continue;
        };

        let line_total = product.price_per_gram * Decimal::from(line.quantity);
        subtotal += line_total;
        priced_lines.push(OrderLine {
            id: product.id,
            name: product.name.clone(),
            price_per_gram: product.price_per_gram,
            quantity: line.quantity,
        });
    }
    subtotal = subtotal.round_dp(2);

    let discount = if profile.first_order_available {
        AppliedDiscount::FirstOrder(first_order_percent)
    } else if profile.verified {
        match loyalty::tier_percent(profile.xp) {
            0 => AppliedDiscount::None,
            p => AppliedDiscount::LoyaltyTier(p),
        }
    } else {
        AppliedDiscount::None
    };

    let mut total = apply_percent(subtotal, discount.percent());
    if let Some(personal) = profile.personal_discount {
        total = apply_percent(total, personal);
    }
    if total < Decimal::ZERO {
        total = Decimal::ZERO;
    }

    PricedCart {
        lines: priced_lines,
        subtotal,
        discount,
        personal_percent: profile.personal_discount,
        total,
    }
}

fn apply_percent(amount: Decimal, percent: u32) -> Decimal {
    let percent = percent.min(100);
    let keep = Decimal::from(100 - percent);
    (amount * keep / Decimal::from(100)).round_dp(2)
}
