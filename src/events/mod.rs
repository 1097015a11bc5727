use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

// Define the various events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Order events
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderPaid(Uuid),
    OrderCancelled(Uuid),
    OrderCompleted(Uuid),

    // Payment events
    PaymentInitialized {
        order_id: Uuid,
        payment_id: String,
    },
    PaymentRejected {
        order_id: Uuid,
        payment_id: String,
    },

    // Loyalty events
    LoyaltyPointsAwarded {
        customer_id: Uuid,
        order_id: Uuid,
        points: i64,
    },
    FirstOrderDiscountRestored {
        customer_id: Uuid,
        order_id: Uuid,
    },

    // Receipt events
    ReceiptDelivered {
        order_id: Uuid,
    },
    ReceiptPollExhausted {
        order_id: Uuid,
        payment_id: String,
    },

    // Generic event for custom messages
    Generic {
        message: String,
        timestamp: DateTime<Utc>,
        metadata: serde_json::Value,
    },
}

impl Event {
    /// Create a generic event with string data
    pub fn with_data(data: String) -> Self {
        Event::Generic {
            message: data,
            timestamp: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }
}

// Function to process incoming events. Side-effectful reactions (SMS, alerts)
// happen inline in the services; this loop is the audit trail.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderCreated(order_id) => {
                info!(%order_id, "order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "order status changed");
            }
            Event::OrderPaid(order_id) => {
                info!(%order_id, "order paid");
            }
            Event::OrderCancelled(order_id) => {
                info!(%order_id, "order cancelled");
            }
            Event::OrderCompleted(order_id) => {
                info!(%order_id, "order completed");
            }
            Event::PaymentInitialized {
                order_id,
                payment_id,
            } => {
                info!(%order_id, %payment_id, "payment session initialized");
            }
            Event::PaymentRejected {
                order_id,
                payment_id,
            } => {
                warn!(%order_id, %payment_id, "payment rejected by gateway");
            }
            Event::LoyaltyPointsAwarded {
                customer_id,
                order_id,
                points,
            } => {
                info!(%customer_id, %order_id, points, "loyalty points awarded");
            }
            Event::FirstOrderDiscountRestored {
                customer_id,
                order_id,
            } => {
                info!(%customer_id, %order_id, "first-order discount restored after cancellation");
            }
            Event::ReceiptDelivered { order_id } => {
                info!(%order_id, "fiscal receipt delivered");
            }
            Event::ReceiptPollExhausted {
                order_id,
                payment_id,
            } => {
                error!(%order_id, %payment_id, "receipt polling exhausted; manual follow-up required");
            }
            Event::Generic { message, .. } => {
                info!("{}", message);
            }
        }
    }

    warn!("Event processing loop has ended");
}
