use crate::{
    entities::{
        order,
        receipt_job::{self, ReceiptJobStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        gateway::GatewayClient,
        notifications::{Alerter, SmsSender},
        payments,
    },
};
use chrono::{Duration as ChronoDuration, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Receipt checks run at these offsets (minutes) from the paid event:
/// immediately, then +3, +4 and +5 minute gaps.
pub const ATTEMPT_OFFSETS_MIN: [i64; 4] = [0, 3, 7, 12];

/// Attempts before the job is declared exhausted and handed to an operator.
pub const MAX_ATTEMPTS: i32 = ATTEMPT_OFFSETS_MIN.len() as i32;

/// Enqueues a durable receipt-poll job for a paid order.
///
/// One pending job per order: re-enqueueing while a job is still pending is a
/// no-op, so webhook replays do not multiply the schedule.
pub async fn enqueue(
    db: &impl ConnectionTrait,
    order_id: Uuid,
    payment_id: &str,
) -> Result<(), ServiceError> {
    let existing = receipt_job::Entity::find()
        .filter(receipt_job::Column::OrderId.eq(order_id))
        .filter(receipt_job::Column::Status.eq(ReceiptJobStatus::Pending.to_string()))
        .one(db)
        .await?;
    if existing.is_some() {
        return Ok(());
    }

    let now = Utc::now();
    receipt_job::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        payment_id: Set(payment_id.to_string()),
        attempts: Set(0),
        status: Set(ReceiptJobStatus::Pending.to_string()),
        last_error: Set(None),
        next_attempt_at: Set(now),
        created_at: Set(now),
        updated_at: Set(Some(now)),
    }
    .insert(db)
    .await?;

    info!(%order_id, %payment_id, "receipt poll job enqueued");
    Ok(())
}

/// Recovery-safe worker draining the `receipt_jobs` table.
///
/// The schedule lives in the rows, so a restart picks up exactly where the
/// previous process stopped. A successful check finishes the job, which
/// short-circuits every remaining attempt for that order.
#[derive(Clone)]
pub struct ReceiptPoller {
    db: Arc<DatabaseConnection>,
    gateway: Arc<GatewayClient>,
    sms: Arc<dyn SmsSender>,
    alerts: Arc<dyn Alerter>,
    event_sender: Arc<EventSender>,
}

impl ReceiptPoller {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<GatewayClient>,
        sms: Arc<dyn SmsSender>,
        alerts: Arc<dyn Alerter>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            gateway,
            sms,
            alerts,
            event_sender,
        }
    }

    /// Spawns the background polling loop.
    pub fn start_worker(self, poll_interval_secs: u64) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(poll_interval_secs, "receipt poller started");
            loop {
                if let Err(e) = self.process_due(20).await {
                    error!("receipt poller error: {}", e);
                }
                sleep(Duration::from_secs(poll_interval_secs)).await;
            }
        })
    }

    /// Processes one batch of due jobs. Returns how many were handled.
    pub async fn process_due(&self, batch_size: u64) -> Result<usize, ServiceError> {
        let due = receipt_job::Entity::find()
            .filter(receipt_job::Column::Status.eq(ReceiptJobStatus::Pending.to_string()))
            .filter(receipt_job::Column::NextAttemptAt.lte(Utc::now()))
            .order_by_asc(receipt_job::Column::NextAttemptAt)
            .limit(batch_size)
            .all(&*self.db)
            .await?;

        let handled = due.len();
        for job in due {
            if let Err(e) = self.handle_job(job).await {
                error!("receipt job handling failed: {}", e);
            }
        }
        Ok(handled)
    }

    #[instrument(skip(self, job), fields(order_id = %job.order_id, attempt = job.attempts + 1))]
    async fn handle_job(&self, job: receipt_job::Model) -> Result<(), ServiceError> {
        let Some(order) = order::Entity::find_by_id(job.order_id).one(&*self.db).await? else {
            warn!(order_id = %job.order_id, "receipt job references a missing order");
            self.finish_job(&job, ReceiptJobStatus::Exhausted, Some("order missing"))
                .await?;
            return Ok(());
        };

        // Another path may have delivered the receipt already.
        if order.receipt_url.is_some() {
            self.finish_job(&job, ReceiptJobStatus::Succeeded, None)
                .await?;
            return Ok(());
        }

        match self.gateway.get_state(&job.payment_id).await {
            Ok(state) => match state.receipt_url {
                Some(url) => {
                    payments::deliver_receipt(
                        &self.db,
                        self.sms.as_ref(),
                        &self.event_sender,
                        &order,
                        &url,
                    )
                    .await?;
                    self.finish_job(&job, ReceiptJobStatus::Succeeded, None)
                        .await
                }
                None => self.retry_or_exhaust(&job, &order, None).await,
            },
            Err(e) => {
                warn!(error = %e, "gateway state poll failed");
                self.retry_or_exhaust(&job, &order, Some(e.to_string()))
                    .await
            }
        }
    }

    async fn retry_or_exhaust(
        &self,
        job: &receipt_job::Model,
        order: &order::Model,
        last_error: Option<String>,
    ) -> Result<(), ServiceError> {
        let attempts = job.attempts + 1;

        if attempts >= MAX_ATTEMPTS {
            error!(
                order_id = %order.id,
                payment_id = %job.payment_id,
                attempts,
                "fiscal receipt never arrived; escalating to an operator"
            );
            self.finish_job(job, ReceiptJobStatus::Exhausted, last_error.as_deref())
                .await?;

            let alert = format!(
                "Receipt missing after {} checks.\nOrder: {}\nPayment: {}\nCustomer: {} {}",
                attempts,
                order.id,
                job.payment_id,
                order.customer_name,
                order.phone
            );
            if let Err(e) = self.alerts.alert(&alert).await {
                error!(error = %e, "operator alert delivery failed");
            }
            if let Err(e) = self
                .event_sender
                .send(Event::ReceiptPollExhausted {
                    order_id: order.id,
                    payment_id: job.payment_id.clone(),
                })
                .await
            {
                warn!(error = %e, "failed to publish receipt exhaustion event");
            }
            return Ok(());
        }

        let delay_min =
            ATTEMPT_OFFSETS_MIN[attempts as usize] - ATTEMPT_OFFSETS_MIN[attempts as usize - 1];
        receipt_job::Entity::update_many()
            .col_expr(receipt_job::Column::Attempts, Expr::value(attempts))
            .col_expr(
                receipt_job::Column::NextAttemptAt,
                Expr::value(Utc::now() + ChronoDuration::minutes(delay_min)),
            )
            .col_expr(receipt_job::Column::LastError, Expr::value(last_error))
            .col_expr(receipt_job::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(receipt_job::Column::Id.eq(job.id))
            .exec(&*self.db)
            .await?;

        info!(
            order_id = %order.id,
            attempt = attempts,
            next_in_min = delay_min,
            "receipt not ready yet; rescheduled"
        );
        Ok(())
    }

    async fn finish_job(
        &self,
        job: &receipt_job::Model,
        status: ReceiptJobStatus,
        last_error: Option<&str>,
    ) -> Result<(), ServiceError> {
        receipt_job::Entity::update_many()
            .col_expr(receipt_job::Column::Status, Expr::value(status.to_string()))
            .col_expr(
                receipt_job::Column::Attempts,
                Expr::value(job.attempts + 1),
            )
            .col_expr(
                receipt_job::Column::LastError,
                Expr::value(last_error.map(str::to_string)),
            )
            .col_expr(receipt_job::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(receipt_job::Column::Id.eq(job.id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }
}
