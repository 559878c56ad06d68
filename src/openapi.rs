use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::delete_order,
        crate::handlers::payments::create_payment_intent,
        crate::handlers::payments::verify_payment,
        crate::handlers::payments::report_payment_failure,
        crate::handlers::addresses::create_address,
        crate::handlers::addresses::list_addresses,
        crate::handlers::addresses::update_address,
        crate::handlers::addresses::delete_address,
        crate::handlers::addresses::set_default_address,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::services::orders::CreateOrderRequest,
        crate::services::orders::OrderItemInput,
        crate::services::orders::UpdateOrderStatusRequest,
        crate::services::orders::OrderResponse,
        crate::services::orders::OrderItemResponse,
        crate::services::orders::OrderListResponse,
        crate::services::orders::OrderStatus,
        crate::services::orders::PaymentStatus,
        crate::services::payments::PaymentIntentResponse,
        crate::services::payments::PaymentCallback,
        crate::services::addresses::AddressInput,
        crate::services::addresses::AddressResponse,
    )),
    tags(
        (name = "Orders", description = "Order creation and fulfillment lifecycle"),
        (name = "Payments", description = "Payment intents and settlement callbacks"),
        (name = "Addresses", description = "User address book")
    ),
    info(
        title = "Orderflow API",
        description = "Storefront order and payment lifecycle backend"
    )
)]
pub struct ApiDoc;

/// Swagger UI mounted at /docs, serving the generated OpenAPI document.
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}
