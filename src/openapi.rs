use utoipa::OpenApi;

/// Aggregated OpenAPI document for the storefront API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Teahouse API",
        description = "Checkout, payment and loyalty backend for the Teahouse storefront"
    ),
    paths(
        crate::handlers::orders::create_order,
        crate::handlers::orders::get_order,
        crate::handlers::payments::init_payment,
        crate::handlers::payments::check_payment,
        crate::handlers::payment_webhooks::payment_notification,
        crate::handlers::admin::list_orders,
        crate::handlers::admin::sync_order,
        crate::handlers::admin::update_order_status,
        crate::handlers::admin::set_customer_discount,
    ),
    components(schemas(
        crate::entities::order::OrderLine,
        crate::entities::order::OrderStatus,
        crate::errors::ErrorResponse,
        crate::handlers::admin::CustomerDiscountResponse,
        crate::handlers::admin::SetDiscountRequest,
        crate::handlers::admin::UpdateOrderStatusRequest,
        crate::handlers::orders::CreateOrderResponse,
        crate::handlers::payments::InitPaymentRequest,
        crate::services::orders::CheckoutLine,
        crate::services::orders::CreateOrderRequest,
        crate::services::orders::OrderResponse,
        crate::services::payments::PaymentInitResponse,
        crate::services::payments::PaymentStatusResponse,
    )),
    tags(
        (name = "Orders", description = "Storefront checkout"),
        (name = "Payments", description = "Payment sessions and reconciliation"),
        (name = "Admin", description = "Back office")
    )
)]
pub struct ApiDoc;
