use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    handlers::{AppState, CurrentCustomer},
    services::orders::{ensure_owned_by, CreateOrderRequest, OrderResponse},
    ApiResponse,
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateOrderResponse {
    pub order_id: Uuid,
    pub total: rust_decimal::Decimal,
}

/// Submit a checkout
#[utoipa::path(
    post,
    path = "/api/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<CreateOrderResponse>),
        (status = 400, description = "Invalid payload or total below the minimum", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unknown customer identity", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    CurrentCustomer(actor): CurrentCustomer,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CreateOrderResponse>>), ServiceError> {
    let order = state.services.orders.create_order(request, actor).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(CreateOrderResponse {
            order_id: order.id,
            total: order.total,
        })),
    ))
}

/// Fetch one order, subject to the ownership rule
#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order details", body = ApiResponse<OrderResponse>),
        (status = 401, description = "Identity required", body = crate::errors::ErrorResponse),
        (status = 403, description = "Order belongs to another customer", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    CurrentCustomer(actor): CurrentCustomer,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.services.orders.find_order(id).await?;
    ensure_owned_by(&order, actor)?;
    Ok(Json(ApiResponse::success(OrderResponse::from_model(
        &order,
    )?)))
}
