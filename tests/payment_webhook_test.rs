//! Webhook tests: signature rejection, idempotent replay, status mapping and
//! receipt hand-off.

mod common;

use axum::http::Method;
use common::{
    checkout_payload, response_json, response_text, TestApp, GATEWAY_PASSWORD, GATEWAY_TERMINAL,
};
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use serde_json::{json, Value};
use teahouse_api::{
    entities::{customer, order, receipt_job},
    services::gateway::notification_token,
};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn signed_notification(order_id: Uuid, payment_id: u64, status: &str) -> Value {
    let mut fields = serde_json::Map::new();
    fields.insert("TerminalKey".to_string(), json!(GATEWAY_TERMINAL));
    fields.insert("OrderId".to_string(), json!(order_id.to_string()));
    fields.insert("Success".to_string(), json!(true));
    fields.insert("Status".to_string(), json!(status));
    fields.insert("PaymentId".to_string(), json!(payment_id));
    let token = notification_token(&fields, GATEWAY_PASSWORD);
    fields.insert("Token".to_string(), json!(token));
    Value::Object(fields)
}

async fn place_order(app: &TestApp, customer_id: Option<Uuid>, grams: i32) -> Uuid {
    let tea = app.seed_product("Jin Jun Mei", dec!(10)).await;
    let payload = checkout_payload(tea.id, grams);
    let response = match customer_id {
        Some(id) => app.request_as(Method::POST, "/api/orders", Some(payload), id).await,
        None => app.request(Method::POST, "/api/orders", Some(payload), &[]).await,
    };
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    body["data"]["order_id"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn confirmed_notification_marks_paid_and_awards_points_once() {
    let gateway = MockServer::start().await;
    // Receipt not ready yet: state comes back without a receipt URL.
    Mock::given(method("POST"))
        .and(path("/GetState"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Success": true,
            "Status": "CONFIRMED",
            "PaymentId": "700001"
        })))
        .mount(&gateway)
        .await;

    let app = TestApp::with_gateway(&gateway.uri()).await;
    let buyer = app.seed_customer("+79992220001", true, 0, true).await;
    let order_id = place_order(&app, Some(buyer.id), 80).await;

    let notification = signed_notification(order_id, 700001, "CONFIRMED");
    let response = app
        .request(
            Method::POST,
            "/api/payments/notification",
            Some(notification.clone()),
            &[],
        )
        .await;
    assert_eq!(response.status(), 200);
    assert_eq!(response_text(response).await, "OK");

    let stored = order::Entity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, "paid");
    assert_eq!(stored.payment_status.as_deref(), Some("CONFIRMED"));
    assert!(stored.loyalty_points_awarded);

    // Order total 800 -> 800 points.
    let refreshed = customer::Entity::find_by_id(buyer.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refreshed.xp, 800);

    // No receipt yet: exactly one durable poll job was enqueued.
    let jobs = receipt_job::Entity::find().all(&*app.state.db).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].order_id, order_id);

    // Replaying the same notification must not double anything.
    let response = app
        .request(
            Method::POST,
            "/api/payments/notification",
            Some(notification),
            &[],
        )
        .await;
    assert_eq!(response.status(), 200);

    let refreshed = customer::Entity::find_by_id(buyer.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refreshed.xp, 800, "replay must not double-award points");

    let jobs = receipt_job::Entity::find().all(&*app.state.db).await.unwrap();
    assert_eq!(jobs.len(), 1, "replay must not duplicate the poll job");
    assert_eq!(app.sms.sent.lock().unwrap().len(), 0);
}

#[tokio::test]
async fn receipt_available_at_confirmation_sends_one_sms() {
    let gateway = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/GetState"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Success": true,
            "Status": "CONFIRMED",
            "PaymentId": "700002",
            "Params": [{"Key": "ReceiptUrl", "Value": "https://receipts.test/r/700002"}]
        })))
        .mount(&gateway)
        .await;

    let app = TestApp::with_gateway(&gateway.uri()).await;
    let order_id = place_order(&app, None, 100).await;

    let notification = signed_notification(order_id, 700002, "CONFIRMED");
    let response = app
        .request(
            Method::POST,
            "/api/payments/notification",
            Some(notification.clone()),
            &[],
        )
        .await;
    assert_eq!(response.status(), 200);

    let stored = order::Entity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        stored.receipt_url.as_deref(),
        Some("https://receipts.test/r/700002")
    );
    assert_eq!(app.sms.sent.lock().unwrap().len(), 1);

    // No poll job needed when the receipt arrived with the confirmation.
    let jobs = receipt_job::Entity::find().all(&*app.state.db).await.unwrap();
    assert!(jobs.is_empty());

    // Replay: receipt already persisted, no second SMS.
    app.request(
        Method::POST,
        "/api/payments/notification",
        Some(notification),
        &[],
    )
    .await;
    assert_eq!(app.sms.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn forged_notification_is_rejected_without_mutation() {
    let app = TestApp::new().await;
    let order_id = place_order(&app, None, 100).await;

    let mut notification = signed_notification(order_id, 700003, "CONFIRMED");
    notification["Status"] = json!("REJECTED"); // tamper after signing

    let response = app
        .request(
            Method::POST,
            "/api/payments/notification",
            Some(notification),
            &[],
        )
        .await;
    assert_eq!(response.status(), 403);

    let stored = order::Entity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, "pending", "forged pushes must not mutate");
}

#[tokio::test]
async fn missing_token_is_rejected() {
    let app = TestApp::new().await;
    let order_id = place_order(&app, None, 100).await;

    let response = app
        .request(
            Method::POST,
            "/api/payments/notification",
            Some(json!({
                "TerminalKey": GATEWAY_TERMINAL,
                "OrderId": order_id.to_string(),
                "Status": "CONFIRMED"
            })),
            &[],
        )
        .await;
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn rejected_notification_cancels_and_restores_discount() {
    let app = TestApp::new().await;
    let buyer = app.seed_customer("+79992220002", false, 0, false).await;
    let order_id = place_order(&app, Some(buyer.id), 100).await;

    // Checkout consumed the first-order flag.
    assert!(
        customer::Entity::find_by_id(buyer.id)
            .one(&*app.state.db)
            .await
            .unwrap()
            .unwrap()
            .first_order_discount_used
    );

    let notification = signed_notification(order_id, 700004, "REJECTED");
    let response = app
        .request(
            Method::POST,
            "/api/payments/notification",
            Some(notification),
            &[],
        )
        .await;
    assert_eq!(response.status(), 200);

    let stored = order::Entity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, "cancelled");

    let restored = customer::Entity::find_by_id(buyer.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert!(!restored.first_order_discount_used);
}

#[tokio::test]
async fn intermediate_statuses_only_update_payment_status() {
    let app = TestApp::new().await;
    let order_id = place_order(&app, None, 100).await;

    let notification = signed_notification(order_id, 700005, "AUTHORIZED");
    let response = app
        .request(
            Method::POST,
            "/api/payments/notification",
            Some(notification),
            &[],
        )
        .await;
    assert_eq!(response.status(), 200);

    let stored = order::Entity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, "pending");
    assert_eq!(stored.payment_status.as_deref(), Some("AUTHORIZED"));
}
