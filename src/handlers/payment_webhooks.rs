use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::Value;
use tracing::info;

use crate::{errors::ServiceError, handlers::AppState};

/// Gateway push notification endpoint.
///
/// The signature check happens inside the payment service before any state
/// is touched. The gateway expects the literal body `OK`; anything else makes
/// it re-deliver the notification.
#[utoipa::path(
    post,
    path = "/api/payments/notification",
    request_body = String,
    responses(
        (status = 200, description = "Notification accepted"),
        (status = 400, description = "Malformed notification", body = crate::errors::ErrorResponse),
        (status = 403, description = "Signature verification failed", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_notification(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, ServiceError> {
    let fields = body.as_object().ok_or_else(|| {
        ServiceError::BadRequest("notification body must be a JSON object".to_string())
    })?;

    state.services.payments.handle_notification(fields).await?;

    info!("payment notification processed");
    Ok((StatusCode::OK, "OK"))
}
