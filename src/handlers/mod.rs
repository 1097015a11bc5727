pub mod admin;
pub mod orders;
pub mod payment_webhooks;
pub mod payments;

use crate::{
    config::AppConfig,
    db::DbPool,
    errors::ServiceError,
    events::EventSender,
    services::{
        catalog::CatalogService,
        gateway::GatewayClient,
        loyalty::LoyaltyService,
        notifications::SmsSender,
        orders::OrderService,
        payments::PaymentService,
        pricing::PricingService,
    },
};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use uuid::Uuid;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<CatalogService>,
    pub pricing: Arc<PricingService>,
    pub loyalty: Arc<LoyaltyService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        config: &AppConfig,
        event_sender: Arc<EventSender>,
        gateway: Arc<GatewayClient>,
        sms: Arc<dyn SmsSender>,
    ) -> Self {
        let catalog = Arc::new(CatalogService::new(db.clone()));
        let pricing = Arc::new(PricingService::new(
            catalog.clone(),
            config.first_order_discount_percent,
        ));
        let loyalty = Arc::new(LoyaltyService::new(db.clone(), event_sender.clone()));
        let orders = Arc::new(OrderService::new(
            db.clone(),
            pricing.clone(),
            loyalty.clone(),
            event_sender.clone(),
            config.min_order_total,
        ));
        let payments = Arc::new(PaymentService::new(
            db,
            gateway,
            sms,
            orders.clone(),
            loyalty.clone(),
            event_sender,
        ));

        Self {
            catalog,
            pricing,
            loyalty,
            orders,
            payments,
        }
    }
}

/// Optional customer identity injected by the upstream auth proxy via the
/// `x-user-id` header. Session issuing itself lives outside this service.
pub struct CurrentCustomer(pub Option<Uuid>);

impl<S> FromRequestParts<S> for CurrentCustomer
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.headers.get("x-user-id") {
            None => Ok(Self(None)),
            Some(value) => {
                let raw = value.to_str().map_err(|_| {
                    ServiceError::Unauthorized("malformed identity header".to_string())
                })?;
                let id = Uuid::parse_str(raw).map_err(|_| {
                    ServiceError::Unauthorized("malformed identity header".to_string())
                })?;
                Ok(Self(Some(id)))
            }
        }
    }
}

/// Static bearer-token guard for the admin back office.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let token = state.config.admin_token.trim();
    let authorized = !token.is_empty()
        && request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .map(|h| h == format!("Bearer {}", token))
            .unwrap_or(false);

    if !authorized {
        return ServiceError::Unauthorized("admin token required".to_string()).into_response();
    }
    next.run(request).await
}
