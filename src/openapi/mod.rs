use utoipa::{
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

/// Registers the JWT bearer scheme referenced by protected paths
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "Bearer",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "0.3.0",
        description = r#"
# Storefront API

Commerce backend for a jewelry storefront.

## Features

- **Cart**: configure products by metal, purity, stone and ring size
- **Checkout**: priced order snapshots with optional currency conversion
- **Payments**: PayPal approve/capture settlement, cash on delivery, bank transfer
- **Notifications**: push fanout to registered devices plus a per-user inbox

## Authentication

Every `/api/v1` endpoint requires a JWT access token:

```
Authorization: Bearer <your-jwt-token>
```

Admin-only endpoints additionally require the `admin` role.

## Error Handling

Failures share one envelope:

```json
{
  "success": false,
  "error": "Bad Request",
  "message": "Validation failed",
  "errors": ["phone: length must be between 5 and 20"],
  "timestamp": "2026-01-01T00:00:00Z"
}
```

## Pagination

List endpoints accept `page` (default 1) and `per_page`.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "orders", description = "Checkout, payment capture and order administration"),
        (name = "cart", description = "Shopping cart"),
        (name = "notifications", description = "Push fanout, device tokens and inbox"),
        (name = "health", description = "Liveness and dependency status")
    ),
    paths(
        crate::handlers::orders::create_order,
        crate::handlers::orders::capture_paypal,
        crate::handlers::orders::list_my_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::update_order_status,
        crate::handlers::cart::get_cart,
        crate::handlers::cart::preview_cart,
        crate::handlers::cart::add_to_cart,
        crate::handlers::cart::update_cart_line,
        crate::handlers::cart::remove_cart_line,
        crate::handlers::notifications::send_to_user,
        crate::handlers::notifications::send_to_all,
        crate::handlers::notifications::register_token,
        crate::handlers::notifications::remove_token,
        crate::handlers::notifications::list_notifications,
        crate::handlers::notifications::mark_read,
        crate::handlers::notifications::mark_all_read,
        crate::handlers::notifications::delete_notification,
        crate::handlers::health::liveness_check,
        crate::handlers::health::status_check,
    ),
    components(
        schemas(
            crate::errors::ErrorResponse,
            crate::entities::order::OrderItem,
            crate::entities::order::Address,
            crate::entities::order::CardDetails,
            crate::entities::order::OrderStatus,
            crate::entities::order::PaymentMethod,
            crate::entities::order::PaymentStatus,
            crate::entities::cart_item::Model,
            crate::entities::notification::Model,
            crate::services::cart::AddCartLineInput,
            crate::services::checkout::DraftOrder,
            crate::services::pricing::OrderTotals,
            crate::services::orders::CreateOrderRequest,
            crate::services::orders::CapturePaymentRequest,
            crate::services::orders::OrderView,
            crate::services::orders::OrderPlacement,
            crate::services::orders::OrderPage,
            crate::services::notifications::TokenSelection,
            crate::services::notifications::AudienceFilter,
            crate::services::notifications::DeliveryReport,
            crate::services::notifications::InboxPage,
            crate::handlers::orders::UpdateOrderStatusRequest,
            crate::handlers::cart::CartView,
            crate::handlers::cart::UpdateCartLineRequest,
            crate::handlers::notifications::SendNotificationRequest,
            crate::handlers::notifications::BroadcastRequest,
            crate::handlers::notifications::RegisterTokenRequest,
            crate::handlers::notifications::RemoveTokenRequest,
            crate::handlers::notifications::RegisteredToken,
            crate::handlers::notifications::CountResult,
            crate::handlers::health::HealthResponse,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
