use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    entities::order::OrderStatus,
    errors::ServiceError,
    handlers::AppState,
    services::{orders::OrderResponse, payments::PaymentStatusResponse},
    ApiResponse, PaginatedResponse,
};

#[derive(Debug, Deserialize, IntoParams)]
pub struct OrderListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
    pub status: Option<OrderStatus>,
}

fn default_page() -> u64 {
    1
}
fn default_limit() -> u64 {
    20
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    /// Target status
    pub status: OrderStatus,
    /// Status the operator observed; the update only applies while the row
    /// still carries it
    pub expected: OrderStatus,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SetDiscountRequest {
    /// Percent to grant, or null to clear
    pub percent: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CustomerDiscountResponse {
    pub customer_id: Uuid,
    pub personal_discount: Option<i32>,
}

/// List orders for the back office
#[utoipa::path(
    get,
    path = "/api/admin/orders",
    params(OrderListQuery),
    responses(
        (status = 200, description = "Orders page", body = ApiResponse<PaginatedResponse<OrderResponse>>),
        (status = 401, description = "Admin token required", body = crate::errors::ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderResponse>>>, ServiceError> {
    let (orders, total) = state
        .services
        .orders
        .list_orders(query.page, query.limit, query.status)
        .await?;

    let items = orders
        .iter()
        .map(OrderResponse::from_model)
        .collect::<Result<Vec<_>, _>>()?;
    let limit = query.limit.clamp(1, 100);

    Ok(Json(ApiResponse::success(PaginatedResponse {
        items,
        total,
        page: query.page,
        limit,
        total_pages: total.div_ceil(limit),
    })))
}

/// Manually reconcile an order against the gateway (missed webhook)
#[utoipa::path(
    post,
    path = "/api/admin/orders/{id}/sync",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order re-synchronized", body = ApiResponse<PaymentStatusResponse>),
        (status = 400, description = "Payment was never initialized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn sync_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<PaymentStatusResponse>>, ServiceError> {
    let status = state.services.payments.sync_order(id).await?;
    Ok(Json(ApiResponse::success(status)))
}

/// Race-safe status transition
#[utoipa::path(
    patch,
    path = "/api/admin/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Illegal transition", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order changed under the operator", body = crate::errors::ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .orders
        .transition_status(id, request.expected, request.status)
        .await?;
    Ok(Json(ApiResponse::success(OrderResponse::from_model(
        &order,
    )?)))
}

/// Grant or clear a one-shot personal discount
#[utoipa::path(
    patch,
    path = "/api/admin/customers/{id}/discount",
    params(("id" = Uuid, Path, description = "Customer id")),
    request_body = SetDiscountRequest,
    responses(
        (status = 200, description = "Discount updated", body = ApiResponse<CustomerDiscountResponse>),
        (status = 400, description = "Percent out of range", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown customer", body = crate::errors::ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn set_customer_discount(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SetDiscountRequest>,
) -> Result<Json<ApiResponse<CustomerDiscountResponse>>, ServiceError> {
    let customer = state
        .services
        .loyalty
        .set_personal_discount(id, request.percent)
        .await?;
    Ok(Json(ApiResponse::success(CustomerDiscountResponse {
        customer_id: customer.id,
        personal_discount: customer.personal_discount,
    })))
}
