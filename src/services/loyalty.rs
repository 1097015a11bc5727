use crate::{
    entities::{customer, order},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Loyalty-tier discount as a monotonic step function of accumulated XP.
/// One currency unit spent equals one point.
pub fn tier_percent(xp: i64) -> u32 {
    match xp {
        i64::MIN..=499 => 0,
        500..=1499 => 3,
        1500..=2999 => 5,
        3000..=5999 => 7,
        _ => 10,
    }
}

/// Manages customer XP and the one-shot discount flags.
#[derive(Clone)]
pub struct LoyaltyService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl LoyaltyService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Awards `floor(total)` points for an order, at most once per order.
    ///
    /// The award is gated on flipping the order's `loyalty_points_awarded`
    /// flag with a conditional update, so the webhook path, the manual-sync
    /// path and concurrent admin completions cannot double-award. Returns
    /// whether this call performed the award.
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn award_points_for_order(
        &self,
        order: &order::Model,
    ) -> Result<bool, ServiceError> {
        let claimed = order::Entity::update_many()
            .col_expr(order::Column::LoyaltyPointsAwarded, Expr::value(true))
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::LoyaltyPointsAwarded.eq(false))
            .exec(&*self.db)
            .await?;

        if claimed.rows_affected == 0 {
            return Ok(false);
        }

        let Some(customer_id) = order.customer_id else {
            // Guest orders claim the flag but have nobody to credit.
            return Ok(true);
        };

        let points = order.total.floor().to_i64().unwrap_or(0);
        if points <= 0 {
            return Ok(true);
        }

        customer::Entity::update_many()
            .col_expr(
                customer::Column::Xp,
                Expr::col(customer::Column::Xp).add(points),
            )
            .col_expr(customer::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(customer::Column::Id.eq(customer_id))
            .exec(&*self.db)
            .await?;

        info!(%customer_id, points, "awarded loyalty points");
        if let Err(e) = self
            .event_sender
            .send(Event::LoyaltyPointsAwarded {
                customer_id,
                order_id: order.id,
                points,
            })
            .await
        {
            warn!(error = %e, "failed to publish loyalty award event");
        }

        Ok(true)
    }

    /// Makes the first-order discount available again after a cancellation.
    #[instrument(skip(self))]
    pub async fn restore_first_order_discount(
        &self,
        customer_id: Uuid,
        order_id: Uuid,
    ) -> Result<(), ServiceError> {
        customer::Entity::update_many()
            .col_expr(
                customer::Column::FirstOrderDiscountUsed,
                Expr::value(false),
            )
            .col_expr(customer::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(customer::Column::Id.eq(customer_id))
            .exec(&*self.db)
            .await?;

        if let Err(e) = self
            .event_sender
            .send(Event::FirstOrderDiscountRestored {
                customer_id,
                order_id,
            })
            .await
        {
            warn!(error = %e, "failed to publish discount restore event");
        }
        Ok(())
    }

    /// Sets or clears the operator-granted one-shot discount.
    #[instrument(skip(self))]
    pub async fn set_personal_discount(
        &self,
        customer_id: Uuid,
        percent: Option<i32>,
    ) -> Result<customer::Model, ServiceError> {
        if let Some(p) = percent {
            if !(0..=100).contains(&p) {
                return Err(ServiceError::ValidationError(
                    "personal discount must be between 0 and 100".to_string(),
                ));
            }
        }

        customer::Entity::update_many()
            .col_expr(customer::Column::PersonalDiscount, Expr::value(percent))
            .col_expr(customer::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(customer::Column::Id.eq(customer_id))
            .exec(&*self.db)
            .await?;

        customer::Entity::find_by_id(customer_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Customer {} not found", customer_id)))
    }
}

/// Marks the first-order discount as spent. Runs inside the checkout
/// transaction so the order row and the flag move together.
pub async fn consume_first_order_discount<C: ConnectionTrait>(
    db: &C,
    customer_id: Uuid,
) -> Result<(), ServiceError> {
    customer::Entity::update_many()
        .col_expr(customer::Column::FirstOrderDiscountUsed, Expr::value(true))
        .col_expr(customer::Column::UpdatedAt, Expr::value(Some(Utc::now())))
        .filter(customer::Column::Id.eq(customer_id))
        .exec(db)
        .await?;
    Ok(())
}

/// Clears the one-shot personal discount after it has been applied.
pub async fn consume_personal_discount<C: ConnectionTrait>(
    db: &C,
    customer_id: Uuid,
) -> Result<(), ServiceError> {
    customer::Entity::update_many()
        .col_expr(
            customer::Column::PersonalDiscount,
            Expr::value(Option::<i32>::None),
        )
        .col_expr(customer::Column::UpdatedAt, Expr::value(Some(Utc::now())))
        .filter(customer::Column::Id.eq(customer_id))
        .exec(db)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 0)]
    #[case(499, 0)]
    #[case(500, 3)]
    #[case(1499, 3)]
    #[case(1500, 5)]
    #[case(2999, 5)]
    #[case(3000, 7)]
    #[case(5999, 7)]
    #[case(6000, 10)]
    #[case(1_000_000, 10)]
    fn tier_percent_steps(#[case] xp: i64, #[case] expected: u32) {
        assert_eq!(tier_percent(xp), expected);
    }

    #[test]
    fn tier_percent_is_monotonic() {
        let mut last = 0;
        for xp in (0..10_000).step_by(50) {
            let p = tier_percent(xp);
            assert!(p >= last, "tier dropped at xp={}", xp);
            last = p;
        }
    }
}
