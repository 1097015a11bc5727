use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Durable receipt-poll job.
///
/// The gateway generates fiscal receipts minutes after a payment confirms, so
/// each paid order that arrives without a receipt URL gets one row here. A
/// background worker re-queries the gateway on a fixed offset schedule until
/// the receipt shows up or the attempts run out. Rows survive restarts, which
/// is the point: the schedule lives in the table, not in process memory.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "receipt_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub payment_id: String,
    /// Attempts already made
    pub attempts: i32,
    pub status: String,
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReceiptJobStatus {
    Pending,
    Succeeded,
    Exhausted,
}

impl Model {
    pub fn job_status(&self) -> ReceiptJobStatus {
        ReceiptJobStatus::from_str(&self.status).unwrap_or(ReceiptJobStatus::Pending)
    }
}
