use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Storefront customer with the loyalty/discount state attached.
///
/// XP accrues one point per currency unit of completed or confirmed-paid
/// orders. The first-order discount flag is consumed at checkout and restored
/// if that order is later cancelled. `personal_discount` is an ad-hoc percent
/// granted by an operator and cleared after a single use.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "customers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: Option<String>,
    #[sea_orm(unique)]
    pub phone: String,
    pub email: Option<String>,
    /// Phone-verified customers qualify for loyalty-tier discounts
    pub verified: bool,
    pub xp: i64,
    pub first_order_discount_used: bool,
    pub personal_discount: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order::Entity")]
    Orders,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
