//! End-to-end checkout tests: server-side pricing, discount consumption and
//! rejection paths.

mod common;

use axum::http::Method;
use common::{checkout_payload, decimal_field, response_json, TestApp};
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use serde_json::json;
use teahouse_api::entities::{customer, order};
use uuid::Uuid;

#[tokio::test]
async fn checkout_persists_server_computed_total() {
    let app = TestApp::new().await;
    let tea = app.seed_product("Laoshan Green", dec!(10)).await;

    // Client claims the cart costs one unit; the server disagrees.
    let mut payload = checkout_payload(tea.id, 100);
    payload["client_total"] = json!("1");

    let response = app.request(Method::POST, "/api/orders", Some(payload), &[]).await;
    assert_eq!(response.status(), 201);

    let body = response_json(response).await;
    assert_eq!(decimal_field(&body["data"]["total"]), dec!(1000));

    let order_id: Uuid = body["data"]["order_id"].as_str().unwrap().parse().unwrap();
    let stored = order::Entity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.total, dec!(1000));
    assert_eq!(stored.status, "pending");
    assert!(stored.customer_id.is_none());
}

#[tokio::test]
async fn first_order_discount_applies_once_and_flips_flag() {
    let app = TestApp::new().await;
    let tea = app.seed_product("Shou Mei", dec!(10)).await;
    let customer = app.seed_customer("+79990000001", false, 0, false).await;

    // Cart of 1000 for a fresh customer: 20% off.
    let response = app
        .request_as(
            Method::POST,
            "/api/orders",
            Some(checkout_payload(tea.id, 100)),
            customer.id,
        )
        .await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    assert_eq!(decimal_field(&body["data"]["total"]), dec!(800));

    let order_id: Uuid = body["data"]["order_id"].as_str().unwrap().parse().unwrap();
    let stored = order::Entity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.used_first_order_discount);

    let refreshed = customer::Entity::find_by_id(customer.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert!(refreshed.first_order_discount_used);

    // The second order gets no discount: unverified customer, flag spent.
    let response = app
        .request_as(
            Method::POST,
            "/api/orders",
            Some(checkout_payload(tea.id, 100)),
            customer.id,
        )
        .await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    assert_eq!(decimal_field(&body["data"]["total"]), dec!(1000));
}

#[tokio::test]
async fn verified_customer_gets_loyalty_tier_discount() {
    let app = TestApp::new().await;
    let tea = app.seed_product("Da Hong Pao", dec!(10)).await;
    // 6000 XP puts the customer in the 10% tier; first-order flag already spent.
    let customer = app.seed_customer("+79990000002", true, 6000, true).await;

    let response = app
        .request_as(
            Method::POST,
            "/api/orders",
            Some(checkout_payload(tea.id, 100)),
            customer.id,
        )
        .await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    assert_eq!(decimal_field(&body["data"]["total"]), dec!(900));
}

#[tokio::test]
async fn personal_discount_stacks_and_is_consumed() {
    let app = TestApp::new().await;
    let tea = app.seed_product("Gyokuro", dec!(10)).await;
    let customer = app.seed_customer("+79990000003", true, 6000, true).await;

    // Operator grants a one-shot 10%.
    let response = app
        .request_admin(
            Method::PATCH,
            &format!("/api/admin/customers/{}/discount", customer.id),
            Some(json!({"percent": 10})),
        )
        .await;
    assert_eq!(response.status(), 200);

    // 1000 -> tier 10% -> 900 -> personal 10% -> 810
    let response = app
        .request_as(
            Method::POST,
            "/api/orders",
            Some(checkout_payload(tea.id, 100)),
            customer.id,
        )
        .await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    assert_eq!(decimal_field(&body["data"]["total"]), dec!(810));

    let refreshed = customer::Entity::find_by_id(customer.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refreshed.personal_discount, None);
}

#[tokio::test]
async fn below_minimum_order_is_rejected_without_persisting() {
    let app = TestApp::new().await;
    let tea = app.seed_product("Bai Mu Dan", dec!(10)).await;

    // 5 grams at 10/gram: 50, under the default minimum of 100.
    let response = app
        .request(
            Method::POST,
            "/api/orders",
            Some(checkout_payload(tea.id, 5)),
            &[],
        )
        .await;
    assert_eq!(response.status(), 400);
    let body = response_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("minimum"));

    let orders = order::Entity::find().all(&*app.state.db).await.unwrap();
    assert!(orders.is_empty());
}

#[tokio::test]
async fn vanished_products_are_dropped_from_the_cart() {
    let app = TestApp::new().await;
    let tea = app.seed_product("Tie Guan Yin", dec!(10)).await;

    let payload = json!({
        "name": "Ivan Petrov",
        "email": "ivan@example.com",
        "phone": "+79991234567",
        "address": "Tea Street 5, Moscow",
        "items": [
            {"product_id": tea.id.to_string(), "quantity": 50},
            {"product_id": Uuid::new_v4().to_string(), "quantity": 50}
        ],
    });

    let response = app.request(Method::POST, "/api/orders", Some(payload), &[]).await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    assert_eq!(decimal_field(&body["data"]["total"]), dec!(500));
}

#[tokio::test]
async fn cart_with_only_unknown_products_is_rejected() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/orders",
            Some(checkout_payload(Uuid::new_v4(), 50)),
            &[],
        )
        .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn malformed_contact_details_are_rejected() {
    let app = TestApp::new().await;
    let tea = app.seed_product("Huang Shan Mao Feng", dec!(10)).await;

    let mut payload = checkout_payload(tea.id, 100);
    payload["phone"] = json!("call me maybe");

    let response = app.request(Method::POST, "/api/orders", Some(payload), &[]).await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn order_access_honors_ownership() {
    let app = TestApp::new().await;
    let tea = app.seed_product("Keemun", dec!(10)).await;
    let owner = app.seed_customer("+79990000004", false, 0, true).await;
    let stranger = app.seed_customer("+79990000005", false, 0, true).await;

    let response = app
        .request_as(
            Method::POST,
            "/api/orders",
            Some(checkout_payload(tea.id, 100)),
            owner.id,
        )
        .await;
    let body = response_json(response).await;
    let order_id = body["data"]["order_id"].as_str().unwrap().to_string();

    let uri = format!("/api/orders/{}", order_id);
    assert_eq!(
        app.request_as(Method::GET, &uri, None, owner.id).await.status(),
        200
    );
    assert_eq!(
        app.request_as(Method::GET, &uri, None, stranger.id)
            .await
            .status(),
        403
    );
    assert_eq!(app.request(Method::GET, &uri, None, &[]).await.status(), 401);
}
