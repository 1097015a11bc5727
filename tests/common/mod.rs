#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use teahouse_api::{
    config::AppConfig,
    db,
    entities::{customer, product},
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    services::{
        gateway::GatewayClient,
        notifications::{Alerter, SmsSender},
        receipt_poller::ReceiptPoller,
    },
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const ADMIN_TOKEN: &str = "test-admin-token";
pub const GATEWAY_PASSWORD: &str = "test-gateway-password";
pub const GATEWAY_TERMINAL: &str = "test-terminal";

/// SMS fake that records every message instead of delivering it.
#[derive(Default)]
pub struct RecordingSms {
    pub sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl SmsSender for RecordingSms {
    async fn send(&self, phone: &str, message: &str) -> Result<(), ServiceError> {
        self.sent
            .lock()
            .unwrap()
            .push((phone.to_string(), message.to_string()));
        Ok(())
    }
}

/// Operator-alert fake that records alert texts.
#[derive(Default)]
pub struct RecordingAlerter {
    pub alerts: Mutex<Vec<String>>,
}

#[async_trait]
impl Alerter for RecordingAlerter {
    async fn alert(&self, text: &str) -> Result<(), ServiceError> {
        self.alerts.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Test harness backed by a throwaway SQLite database and recording fakes for
/// the outbound side channels.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub sms: Arc<RecordingSms>,
    pub alerts: Arc<RecordingAlerter>,
    pub gateway: Arc<GatewayClient>,
    db_file: std::path::PathBuf,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// App whose gateway points nowhere; for flows that never call out.
    pub async fn new() -> Self {
        Self::with_gateway("http://127.0.0.1:9/v2").await
    }

    /// App whose gateway base URL points at a mock server.
    pub async fn with_gateway(gateway_base_url: &str) -> Self {
        let db_file =
            std::env::temp_dir().join(format!("teahouse_test_{}.db", Uuid::new_v4().simple()));

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_file.display()),
            "127.0.0.1",
            0,
            "test",
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.admin_token = ADMIN_TOKEN.to_string();
        cfg.gateway.base_url = gateway_base_url.to_string();
        cfg.gateway.terminal_key = GATEWAY_TERMINAL.to_string();
        cfg.gateway.password = GATEWAY_PASSWORD.to_string();
        cfg.gateway.notification_url = "https://shop.test/api/payments/notification".to_string();
        cfg.gateway.success_url = "https://shop.test/checkout/success".to_string();
        cfg.gateway.fail_url = "https://shop.test/checkout/fail".to_string();

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(1024);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(GatewayClient::new(cfg.gateway.clone()));
        let sms = Arc::new(RecordingSms::default());
        let alerts = Arc::new(RecordingAlerter::default());

        let services = AppServices::new(
            db.clone(),
            &cfg,
            Arc::new(event_sender.clone()),
            gateway.clone(),
            sms.clone(),
        );

        let state = AppState {
            db,
            config: cfg,
            event_sender,
            services,
        };

        let router = Router::new()
            .nest("/api", teahouse_api::api_routes(state.clone()))
            .with_state(state.clone());

        Self {
            router,
            state,
            sms,
            alerts,
            gateway,
            db_file,
            _event_task: event_task,
        }
    }

    /// A receipt poller wired to the same database and fakes.
    pub fn poller(&self) -> ReceiptPoller {
        ReceiptPoller::new(
            self.state.db.clone(),
            self.gateway.clone(),
            self.sms.clone(),
            self.alerts.clone(),
            Arc::new(self.state.event_sender.clone()),
        )
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request builds");

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router responds")
    }

    /// Request on behalf of a signed-in customer.
    pub async fn request_as(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        customer_id: Uuid,
    ) -> Response {
        let id = customer_id.to_string();
        self.request(method, uri, body, &[("x-user-id", id.as_str())])
            .await
    }

    /// Request with the admin bearer token.
    pub async fn request_admin(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let bearer = format!("Bearer {}", ADMIN_TOKEN);
        self.request(method, uri, body, &[("authorization", bearer.as_str())])
            .await
    }

    pub async fn seed_product(&self, name: &str, price_per_gram: Decimal) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            description: Set(None),
            price_per_gram: Set(price_per_gram),
            available: Set(true),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    pub async fn seed_customer(
        &self,
        phone: &str,
        verified: bool,
        xp: i64,
        first_order_discount_used: bool,
    ) -> customer::Model {
        customer::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(Some("Test Customer".to_string())),
            phone: Set(phone.to_string()),
            email: Set(Some("customer@example.com".to_string())),
            verified: Set(verified),
            xp: Set(xp),
            first_order_discount_used: Set(first_order_discount_used),
            personal_discount: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed customer")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.db_file);
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub async fn response_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

/// Parses a Decimal out of a JSON field regardless of serialized scale.
pub fn decimal_field(value: &Value) -> Decimal {
    serde_json::from_value(value.clone()).expect("decimal field")
}

/// Standard checkout payload for a single-line cart.
pub fn checkout_payload(product_id: Uuid, quantity: i32) -> Value {
    serde_json::json!({
        "name": "Ivan Petrov",
        "email": "ivan@example.com",
        "phone": "+79991234567",
        "address": "Tea Street 5, Moscow",
        "items": [{"product_id": product_id.to_string(), "quantity": quantity}],
    })
}
