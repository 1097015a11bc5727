use crate::{
    entities::order::{self, OrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        gateway::{self, GatewayClient, PaymentInit, PaymentState},
        loyalty::LoyaltyService,
        notifications::SmsSender,
        orders::{ensure_owned_by, OrderService},
        receipt_poller,
    },
};
use chrono::Utc;
use sea_orm::{sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Gateway payment-state vocabulary mapped onto the order lifecycle.
/// CONFIRMED means paid, REJECTED means cancelled, everything else leaves the
/// order pending with the raw status recorded for the back office.
const STATUS_CONFIRMED: &str = "CONFIRMED";
const STATUS_REJECTED: &str = "REJECTED";

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PaymentInitResponse {
    pub order_id: Uuid,
    pub payment_id: String,
    pub payment_url: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PaymentStatusResponse {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub payment_status: Option<String>,
    pub receipt_url: Option<String>,
}

/// Orchestrates the payment flow: session creation, webhook application,
/// manual reconciliation, and fiscal receipt delivery.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<GatewayClient>,
    sms: Arc<dyn SmsSender>,
    orders: Arc<OrderService>,
    loyalty: Arc<LoyaltyService>,
    event_sender: Arc<EventSender>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<GatewayClient>,
        sms: Arc<dyn SmsSender>,
        orders: Arc<OrderService>,
        loyalty: Arc<LoyaltyService>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            gateway,
            sms,
            orders,
            loyalty,
            event_sender,
        }
    }

    /// Opens a payment session for a pending order and stores the gateway
    /// linkage on the order row.
    #[instrument(skip(self), fields(%order_id))]
    pub async fn init_payment(
        &self,
        order_id: Uuid,
        actor: Option<Uuid>,
    ) -> Result<PaymentInitResponse, ServiceError> {
        let order = self.orders.find_order(order_id).await?;
        ensure_owned_by(&order, actor)?;

        if order.status()? != OrderStatus::Pending {
            return Err(ServiceError::InvalidOperation(
                "order is not awaiting payment".to_string(),
            ));
        }

        let total_minor = gateway::to_minor_units(order.total)?;
        let lines = order.lines()?;
        let receipt_items = gateway::build_receipt_items(&lines, total_minor)?;

        let init = PaymentInit {
            order_id: order.id,
            amount_minor: total_minor,
            description: format!("Teahouse order {}", short_id(order.id)),
            customer_email: Some(order.email.clone()),
            customer_phone: order.phone.clone(),
            receipt_items,
        };
        let session = self.gateway.init_payment(&init).await?;

        order::Entity::update_many()
            .col_expr(
                order::Column::PaymentId,
                Expr::value(Some(session.payment_id.clone())),
            )
            .col_expr(
                order::Column::PaymentUrl,
                Expr::value(Some(session.payment_url.clone())),
            )
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(Some(session.status.clone())),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(order::Column::Id.eq(order.id))
            .exec(&*self.db)
            .await?;

        info!(%order_id, payment_id = %session.payment_id, "payment session initialized");
        if let Err(e) = self
            .event_sender
            .send(Event::PaymentInitialized {
                order_id,
                payment_id: session.payment_id.clone(),
            })
            .await
        {
            warn!(error = %e, "failed to publish payment init event");
        }

        Ok(PaymentInitResponse {
            order_id,
            payment_id: session.payment_id,
            payment_url: session.payment_url,
        })
    }

    /// Customer-facing status check: re-syncs against the gateway first.
    pub async fn check_payment(
        &self,
        order_id: Uuid,
        actor: Option<Uuid>,
    ) -> Result<PaymentStatusResponse, ServiceError> {
        let order = self.orders.find_order(order_id).await?;
        ensure_owned_by(&order, actor)?;
        self.sync_with_gateway(order).await
    }

    /// Operator reconciliation for missed webhooks.
    #[instrument(skip(self))]
    pub async fn sync_order(&self, order_id: Uuid) -> Result<PaymentStatusResponse, ServiceError> {
        let order = self.orders.find_order(order_id).await?;
        self.sync_with_gateway(order).await
    }

    async fn sync_with_gateway(
        &self,
        order: order::Model,
    ) -> Result<PaymentStatusResponse, ServiceError> {
        let payment_id = order.payment_id.clone().ok_or_else(|| {
            ServiceError::InvalidOperation("payment has not been initialized".to_string())
        })?;

        let state = self.gateway.get_state(&payment_id).await?;
        self.apply_gateway_status(&order, &state.status, &payment_id, Some(&state))
            .await?;

        let refreshed = self.orders.find_order(order.id).await?;
        Ok(PaymentStatusResponse {
            order_id: refreshed.id,
            status: refreshed.status()?,
            payment_status: refreshed.payment_status.clone(),
            receipt_url: refreshed.receipt_url,
        })
    }

    /// Applies an asynchronous gateway notification.
    ///
    /// The signature is verified before anything else; a mismatch mutates
    /// nothing. Application is idempotent: replaying the same notification
    /// cannot double-award points or re-send the receipt SMS.
    #[instrument(skip(self, fields))]
    pub async fn handle_notification(
        &self,
        fields: &Map<String, Value>,
    ) -> Result<(), ServiceError> {
        if !self.gateway.verify_notification(fields) {
            warn!("payment notification failed signature verification");
            return Err(ServiceError::Forbidden(
                "invalid notification signature".to_string(),
            ));
        }

        let order_id = fields
            .get("OrderId")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| {
                ServiceError::BadRequest("notification is missing a valid OrderId".to_string())
            })?;
        let gw_status = fields
            .get("Status")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ServiceError::BadRequest("notification is missing Status".to_string())
            })?
            .to_string();
        let payment_id = match fields.get("PaymentId") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };

        let order = self.orders.find_order(order_id).await?;
        if let Some(known) = &order.payment_id {
            if !payment_id.is_empty() && known != &payment_id {
                warn!(%order_id, %payment_id, expected = %known, "notification payment id differs from stored session");
            }
        }
        let payment_id = order.payment_id.clone().unwrap_or(payment_id);

        self.apply_gateway_status(&order, &gw_status, &payment_id, None)
            .await
    }

    /// Shared status application for webhook, check and sync paths.
    async fn apply_gateway_status(
        &self,
        order: &order::Model,
        gw_status: &str,
        payment_id: &str,
        known_state: Option<&PaymentState>,
    ) -> Result<(), ServiceError> {
        match gw_status {
            STATUS_CONFIRMED => self.mark_paid(order, gw_status, payment_id, known_state).await,
            STATUS_REJECTED => self.mark_cancelled(order, gw_status, payment_id).await,
            other => {
                // Intermediate states (NEW, AUTHORIZED, ...) only refresh the
                // recorded gateway status.
                order::Entity::update_many()
                    .col_expr(
                        order::Column::PaymentStatus,
                        Expr::value(Some(other.to_string())),
                    )
                    .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
                    .filter(order::Column::Id.eq(order.id))
                    .exec(&*self.db)
                    .await?;
                Ok(())
            }
        }
    }

    async fn mark_paid(
        &self,
        order: &order::Model,
        gw_status: &str,
        payment_id: &str,
        known_state: Option<&PaymentState>,
    ) -> Result<(), ServiceError> {
        let transitioned = order::Entity::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Paid.to_string()),
            )
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(Some(gw_status.to_string())),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Status.eq(OrderStatus::Pending.to_string()))
            .exec(&*self.db)
            .await?;

        if transitioned.rows_affected == 1 {
            info!(order_id = %order.id, "order confirmed paid");
            let _ = self.event_sender.send(Event::OrderPaid(order.id)).await;
            let _ = self
                .event_sender
                .send(Event::OrderStatusChanged {
                    order_id: order.id,
                    old_status: OrderStatus::Pending.to_string(),
                    new_status: OrderStatus::Paid.to_string(),
                })
                .await;
        }

        // Flag-guarded: replays and racing paths award at most once.
        self.loyalty.award_points_for_order(order).await?;

        if order.receipt_url.is_none() {
            let receipt_url = match known_state {
                Some(state) => state.receipt_url.clone(),
                None => match self.gateway.get_state(payment_id).await {
                    Ok(state) => state.receipt_url,
                    Err(e) => {
                        warn!(order_id = %order.id, error = %e, "receipt lookup failed after payment confirmation");
                        None
                    }
                },
            };

            match receipt_url {
                Some(url) => {
                    deliver_receipt(
                        &self.db,
                        self.sms.as_ref(),
                        &self.event_sender,
                        order,
                        &url,
                    )
                    .await?;
                }
                None => {
                    // Fiscal receipts show up minutes later; hand off to the
                    // durable poller.
                    receipt_poller::enqueue(&*self.db, order.id, payment_id).await?;
                }
            }
        }

        Ok(())
    }

    async fn mark_cancelled(
        &self,
        order: &order::Model,
        gw_status: &str,
        payment_id: &str,
    ) -> Result<(), ServiceError> {
        let transitioned = order::Entity::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Cancelled.to_string()),
            )
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(Some(gw_status.to_string())),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(order::Column::Id.eq(order.id))
            .filter(
                order::Column::Status.is_in([
                    OrderStatus::Pending.to_string(),
                    OrderStatus::Paid.to_string(),
                ]),
            )
            .exec(&*self.db)
            .await?;

        if transitioned.rows_affected == 1 {
            info!(order_id = %order.id, "order cancelled after payment rejection");
            self.orders.restore_discount_if_consumed(order).await?;
            let _ = self.event_sender.send(Event::OrderCancelled(order.id)).await;
            let _ = self
                .event_sender
                .send(Event::PaymentRejected {
                    order_id: order.id,
                    payment_id: payment_id.to_string(),
                })
                .await;
        }

        Ok(())
    }
}

/// Persists a receipt URL exactly once and notifies the customer.
///
/// The conditional write doubles as the idempotence guard: a second delivery
/// attempt for the same order is a no-op and sends no SMS. SMS failure is
/// logged, never propagated; the receipt stays persisted either way.
pub async fn deliver_receipt(
    db: &DatabaseConnection,
    sms: &dyn SmsSender,
    event_sender: &EventSender,
    order: &order::Model,
    url: &str,
) -> Result<bool, ServiceError> {
    let saved = order::Entity::update_many()
        .col_expr(order::Column::ReceiptUrl, Expr::value(Some(url.to_string())))
        .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
        .filter(order::Column::Id.eq(order.id))
        .filter(order::Column::ReceiptUrl.is_null())
        .exec(db)
        .await?;

    if saved.rows_affected == 0 {
        return Ok(false);
    }

    let message = format!(
        "Teahouse: your fiscal receipt for order {} is ready: {}",
        short_id(order.id),
        url
    );
    if let Err(e) = sms.send(&order.phone, &message).await {
        warn!(order_id = %order.id, error = %e, "receipt SMS delivery failed; receipt kept");
    }

    if let Err(e) = event_sender
        .send(Event::ReceiptDelivered { order_id: order.id })
        .await
    {
        warn!(error = %e, "failed to publish receipt delivered event");
    }
    Ok(true)
}

/// Short human-friendly order reference used in descriptions and SMS.
pub fn short_id(id: Uuid) -> String {
    id.to_string()[..8].to_uppercase()
}
