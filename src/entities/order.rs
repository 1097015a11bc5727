use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::ServiceError;

/// A placed storefront order.
///
/// `total` is always server-computed from live catalog prices and the
/// customer's discount state; client-submitted totals are never persisted.
/// `items` is a JSON array of [`OrderLine`] kept in the wire-compatible
/// `{id, name, pricePerGram, quantity}` shape.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// NULL for guest orders
    pub customer_id: Option<Uuid>,
    pub customer_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub comment: Option<String>,
    pub items: Json,
    pub total: Decimal,
    pub status: String,
    pub used_first_order_discount: bool,
    /// Guard against double XP awards across webhook, sync and admin paths
    pub loyalty_points_awarded: bool,
    pub payment_id: Option<String>,
    pub payment_status: Option<String>,
    pub payment_url: Option<String>,
    pub receipt_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::customer::Entity",
        from = "Column::CustomerId",
        to = "super::customer::Column::Id"
    )]
    Customer,
}

impl Related<super::customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customer.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// One persisted line item, serialized into the `items` JSON column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub id: Uuid,
    pub name: String,
    pub price_per_gram: Decimal,
    /// Grams ordered
    pub quantity: i32,
}

impl Model {
    pub fn status(&self) -> Result<OrderStatus, ServiceError> {
        OrderStatus::from_str(&self.status)
            .map_err(|_| ServiceError::InvalidStatus(format!("unknown order status: {}", self.status)))
    }

    pub fn lines(&self) -> Result<Vec<OrderLine>, ServiceError> {
        serde_json::from_value(self.items.clone()).map_err(|e| {
            ServiceError::InternalError(format!("order {} has malformed items: {}", self.id, e))
        })
    }
}

/// Order lifecycle.
///
/// pending → paid → completed, with pending/paid → cancelled also legal.
/// cancelled and completed are terminal.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    utoipa::ToSchema,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Cancelled,
    Completed,
}

impl OrderStatus {
    /// Whether `self → target` is a legal lifecycle transition.
    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, target),
            (Pending, Paid)
                | (Pending, Cancelled)
                | (Pending, Completed)
                | (Paid, Cancelled)
                | (Paid, Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Completed)
    }
}
