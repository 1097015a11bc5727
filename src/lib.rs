//! Teahouse storefront API
//!
//! This crate provides the checkout, payment and loyalty backend for the
//! Teahouse storefront.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod services;

use axum::{extract::State, middleware, response::Json, routing::get, Router};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

// Common response wrappers
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Full route table: public storefront + gateway webhook + admin back office.
pub fn api_routes(state: AppState) -> Router<AppState> {
    let storefront = Router::new()
        .route("/orders", axum::routing::post(handlers::orders::create_order))
        .route("/orders/{id}", get(handlers::orders::get_order))
        .route(
            "/payments/init",
            axum::routing::post(handlers::payments::init_payment),
        )
        .route(
            "/payments/check/{order_id}",
            get(handlers::payments::check_payment),
        );

    // Signature-verified, so no identity requirement.
    let webhook = Router::new().route(
        "/payments/notification",
        axum::routing::post(handlers::payment_webhooks::payment_notification),
    );

    let admin = Router::new()
        .route("/orders", get(handlers::admin::list_orders))
        .route(
            "/orders/{id}/sync",
            axum::routing::post(handlers::admin::sync_order),
        )
        .route(
            "/orders/{id}/status",
            axum::routing::patch(handlers::admin::update_order_status),
        )
        .route(
            "/customers/{id}/discount",
            axum::routing::patch(handlers::admin::set_customer_discount),
        )
        .layer(middleware::from_fn_with_state(
            state,
            handlers::require_admin,
        ));

    Router::new()
        .route("/status", get(api_status))
        .route("/health", get(health_check))
        .merge(storefront)
        .merge(webhook)
        .nest("/admin", admin)
}

async fn api_status() -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let status_data = json!({
        "status": "ok",
        "service": "teahouse-api",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let db_status = match state.db.ping().await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let health_data = json!({
        "status": db_status,
        "checks": {
            "database": db_status,
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    Ok(Json(ApiResponse::success(health_data)))
}
