use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    handlers::{AppState, CurrentCustomer},
    services::payments::{PaymentInitResponse, PaymentStatusResponse},
    ApiResponse,
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InitPaymentRequest {
    pub order_id: Uuid,
}

/// Open a payment session for a pending order
#[utoipa::path(
    post,
    path = "/api/payments/init",
    request_body = InitPaymentRequest,
    responses(
        (status = 200, description = "Payment session created", body = ApiResponse<PaymentInitResponse>),
        (status = 400, description = "Order is not awaiting payment", body = crate::errors::ErrorResponse),
        (status = 401, description = "Identity required", body = crate::errors::ErrorResponse),
        (status = 403, description = "Order belongs to another customer", body = crate::errors::ErrorResponse),
        (status = 402, description = "Gateway rejected the session", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn init_payment(
    State(state): State<AppState>,
    CurrentCustomer(actor): CurrentCustomer,
    Json(request): Json<InitPaymentRequest>,
) -> Result<Json<ApiResponse<PaymentInitResponse>>, ServiceError> {
    let session = state
        .services
        .payments
        .init_payment(request.order_id, actor)
        .await?;
    Ok(Json(ApiResponse::success(session)))
}

/// Re-sync and return the current payment status of an order
#[utoipa::path(
    get,
    path = "/api/payments/check/{order_id}",
    params(("order_id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Current payment status", body = ApiResponse<PaymentStatusResponse>),
        (status = 400, description = "Payment was never initialized", body = crate::errors::ErrorResponse),
        (status = 401, description = "Identity required", body = crate::errors::ErrorResponse),
        (status = 403, description = "Order belongs to another customer", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn check_payment(
    State(state): State<AppState>,
    CurrentCustomer(actor): CurrentCustomer,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<PaymentStatusResponse>>, ServiceError> {
    let status = state
        .services
        .payments
        .check_payment(order_id, actor)
        .await?;
    Ok(Json(ApiResponse::success(status)))
}
