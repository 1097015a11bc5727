use crate::{
    entities::{
        customer,
        order::{self, OrderLine, OrderStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        loyalty::{self, LoyaltyService},
        pricing::{AppliedDiscount, CartLine, PricingService},
    },
};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?\d{10,15}$").expect("phone regex"));

/// Checkout submission. The optional `client_total` is advisory only: the
/// serverside quote is what gets persisted, always.
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, max = 120, message = "Name is required"))]
    pub name: String,

    #[validate(email(message = "A valid email is required"))]
    pub email: String,

    #[validate(regex(path = "PHONE_RE", message = "A valid phone number is required"))]
    pub phone: String,

    #[validate(length(min = 1, max = 500, message = "Delivery address is required"))]
    pub address: String,

    pub comment: Option<String>,

    #[validate(length(min = 1, message = "Cart is empty"))]
    pub items: Vec<CheckoutLine>,

    /// Client-computed total, logged when it disagrees with the server
    pub client_total: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckoutLine {
    pub product_id: Uuid,
    /// Grams ordered
    pub quantity: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub customer_id: Option<Uuid>,
    pub status: OrderStatus,
    pub total: Decimal,
    pub items: Vec<OrderLine>,
    pub payment_status: Option<String>,
    pub payment_url: Option<String>,
    pub receipt_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OrderResponse {
    pub fn from_model(model: &order::Model) -> Result<Self, ServiceError> {
        Ok(Self {
            id: model.id,
            customer_id: model.customer_id,
            status: model.status()?,
            total: model.total,
            items: model.lines()?,
            payment_status: model.payment_status.clone(),
            payment_url: model.payment_url.clone(),
            receipt_url: model.receipt_url.clone(),
            created_at: model.created_at,
        })
    }
}

/// Guests may only touch guest orders; signed-in customers only their own.
pub fn ensure_owned_by(order: &order::Model, actor: Option<Uuid>) -> Result<(), ServiceError> {
    match (order.customer_id, actor) {
        (Some(owner), Some(user)) if owner == user => Ok(()),
        (None, None) => Ok(()),
        (Some(_), None) => Err(ServiceError::Unauthorized(
            "sign in to access this order".to_string(),
        )),
        _ => Err(ServiceError::Forbidden(
            "order belongs to another customer".to_string(),
        )),
    }
}

/// Order creation and lifecycle transitions.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    pricing: Arc<PricingService>,
    loyalty: Arc<LoyaltyService>,
    event_sender: Arc<EventSender>,
    min_order_total: u32,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        pricing: Arc<PricingService>,
        loyalty: Arc<LoyaltyService>,
        event_sender: Arc<EventSender>,
        min_order_total: u32,
    ) -> Self {
        Self {
            db,
            pricing,
            loyalty,
            event_sender,
            min_order_total,
        }
    }

    pub async fn find_order(&self, id: Uuid) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))
    }

    /// Creates a pending order from a checkout submission.
    ///
    /// The total is quoted server-side from live catalog prices; consumed
    /// one-shot discounts (first-order flag, personal percent) are spent in
    /// the same transaction as the order insert.
    #[instrument(skip(self, request), fields(actor = ?actor))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
        actor: Option<Uuid>,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;
        if request.items.iter().any(|line| line.quantity <= 0) {
            return Err(ServiceError::ValidationError(
                "Item quantities must be positive".to_string(),
            ));
        }

        let customer = match actor {
            Some(id) => Some(
                customer::Entity::find_by_id(id)
                    .one(&*self.db)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::Unauthorized("unknown customer identity".to_string())
                    })?,
            ),
            None => None,
        };

        let cart: Vec<CartLine> = request
            .items
            .iter()
            .map(|line| CartLine {
                product_id: line.product_id,
                quantity: line.quantity,
            })
            .collect();
        let priced = self.pricing.price_cart(&cart, customer.as_ref()).await?;

        if priced.lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "None of the requested items are available".to_string(),
            ));
        }
        if priced.total < Decimal::from(self.min_order_total) {
            return Err(ServiceError::InvalidOperation(format!(
                "Order total {} is below the minimum of {}",
                priced.total, self.min_order_total
            )));
        }
        if let Some(client_total) = request.client_total {
            if client_total != priced.total {
                warn!(
                    client_total = %client_total,
                    server_total = %priced.total,
                    "client-submitted total disagrees with server quote; persisting server value"
                );
            }
        }

        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let used_first_order = matches!(priced.discount, AppliedDiscount::FirstOrder(_));

        let txn = self.db.begin().await?;

        let active = order::ActiveModel {
            id: Set(order_id),
            customer_id: Set(customer.as_ref().map(|c| c.id)),
            customer_name: Set(request.name.clone()),
            email: Set(request.email.clone()),
            phone: Set(request.phone.clone()),
            address: Set(request.address.clone()),
            comment: Set(request.comment.clone()),
            items: Set(serde_json::to_value(&priced.lines).map_err(|e| {
                ServiceError::InternalError(format!("failed to serialize order items: {}", e))
            })?),
            total: Set(priced.total),
            status: Set(OrderStatus::Pending.to_string()),
            used_first_order_discount: Set(used_first_order),
            loyalty_points_awarded: Set(false),
            payment_id: Set(None),
            payment_status: Set(None),
            payment_url: Set(None),
            receipt_url: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };
        let model = active.insert(&txn).await?;

        if let Some(customer) = &customer {
            if used_first_order {
                loyalty::consume_first_order_discount(&txn, customer.id).await?;
            }
            if priced.personal_percent.is_some() {
                loyalty::consume_personal_discount(&txn, customer.id).await?;
            }
        }

        txn.commit().await?;

        info!(%order_id, total = %priced.total, "order created");
        if let Err(e) = self.event_sender.send(Event::OrderCreated(order_id)).await {
            warn!(error = %e, "failed to publish order created event");
        }

        OrderResponse::from_model(&model)
    }

    /// Operator status transition, race-safe via a conditional update.
    ///
    /// The write only applies while the row still carries the status the
    /// operator observed; a losing concurrent actor gets a conflict, not a
    /// second transition. Completion awards loyalty points at most once,
    /// cancellation restores a consumed first-order discount.
    #[instrument(skip(self))]
    pub async fn transition_status(
        &self,
        order_id: Uuid,
        expected: OrderStatus,
        target: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        if !expected.can_transition_to(target) {
            return Err(ServiceError::InvalidOperation(format!(
                "transition {} -> {} is not allowed",
                expected, target
            )));
        }

        let order = self.find_order(order_id).await?;

        let result = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(target.to_string()))
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(expected.to_string()))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(order_id));
        }

        if let Err(e) = self
            .event_sender
            .send(Event::OrderStatusChanged {
                order_id,
                old_status: expected.to_string(),
                new_status: target.to_string(),
            })
            .await
        {
            warn!(error = %e, "failed to publish status change event");
        }

        match target {
            OrderStatus::Completed => {
                self.loyalty.award_points_for_order(&order).await?;
                let _ = self.event_sender.send(Event::OrderCompleted(order_id)).await;
            }
            OrderStatus::Cancelled => {
                self.restore_discount_if_consumed(&order).await?;
                let _ = self.event_sender.send(Event::OrderCancelled(order_id)).await;
            }
            OrderStatus::Paid => {
                let _ = self.event_sender.send(Event::OrderPaid(order_id)).await;
            }
            OrderStatus::Pending => {}
        }

        self.find_order(order_id).await
    }

    /// Gives the first-order discount back when a cancelled order consumed it.
    pub async fn restore_discount_if_consumed(
        &self,
        order: &order::Model,
    ) -> Result<(), ServiceError> {
        if order.used_first_order_discount {
            if let Some(customer_id) = order.customer_id {
                self.loyalty
                    .restore_first_order_discount(customer_id, order.id)
                    .await?;
            }
        }
        Ok(())
    }

    /// Admin listing, newest first.
    pub async fn list_orders(
        &self,
        page: u64,
        limit: u64,
        status: Option<OrderStatus>,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let mut query = order::Entity::find().order_by_desc(order::Column::CreatedAt);
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status.to_string()));
        }

        let paginator = query.paginate(&*self.db, limit.clamp(1, 100));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }
}
