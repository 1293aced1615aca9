use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront Checkout API

Carts, saved addresses, vouchers and the checkout transaction of a fashion storefront.

## Authentication

Customer and admin endpoints take a JWT in the Authorization header:

```
Authorization: Bearer <your-jwt-token>
```

Anonymous carts are identified by the token returned from `POST /api/guest-cart`,
sent back in the `X-Guest-Cart` header.

## Error Handling

Failures share one body:

```json
{
  "error": "Bad Request",
  "message": "Validation error: cart is empty",
  "request_id": "req-abc123xyz",
  "timestamp": "2024-01-01T00:00:00Z"
}
```

`GET /api/payment/return` always answers 200 and reports its outcome in `code`.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "orders", description = "Checkout and order tracking"),
        (name = "payments", description = "Payment provider return"),
        (name = "cart", description = "Signed-in shopper cart"),
        (name = "guest-cart", description = "Anonymous cart"),
        (name = "addresses", description = "Saved shipping addresses"),
        (name = "vouchers", description = "Voucher wallet"),
        (name = "admin", description = "Order and voucher administration")
    ),
    paths(
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::admin_list_orders,
        crate::handlers::orders::admin_update_status,
        crate::handlers::payments::payment_return,
        crate::handlers::commerce::carts::get_cart,
        crate::handlers::commerce::carts::add_to_cart,
        crate::handlers::commerce::carts::update_cart_item,
        crate::handlers::commerce::carts::remove_cart_item,
        crate::handlers::commerce::carts::merge_guest_cart,
        crate::handlers::commerce::carts::create_guest_cart,
        crate::handlers::commerce::carts::get_guest_cart,
        crate::handlers::commerce::carts::add_to_guest_cart,
        crate::handlers::commerce::carts::update_guest_cart_item,
        crate::handlers::commerce::carts::remove_guest_cart_item,
        crate::handlers::commerce::addresses::list_addresses,
        crate::handlers::commerce::addresses::create_address,
        crate::handlers::commerce::addresses::update_address,
        crate::handlers::commerce::addresses::set_default_address,
        crate::handlers::commerce::addresses::delete_address,
        crate::handlers::commerce::vouchers::list_my_vouchers,
        crate::handlers::commerce::vouchers::admin_list_vouchers,
        crate::handlers::commerce::vouchers::admin_create_voucher,
        crate::handlers::commerce::vouchers::admin_update_voucher,
        crate::handlers::commerce::vouchers::admin_deactivate_voucher,
        crate::handlers::commerce::vouchers::admin_grant_voucher,
    ),
    components(
        schemas(
            crate::entities::OrderStatus,
            crate::entities::PaymentStatus,
            crate::entities::PaymentMethod,
            crate::entities::commerce::voucher::VoucherType,
            crate::services::commerce::CreateVoucherInput,
            crate::services::commerce::UpdateVoucherInput,
            crate::services::commerce::GrantVoucherInput,
            crate::services::commerce::PlaceOrderRequest,
            crate::services::commerce::PlaceOrderResponse,
            crate::services::commerce::PriceQuote,
            crate::services::commerce::ShippingAddressSnapshot,
            crate::services::orders::OrderDetail,
            crate::services::orders::OrderLine,
            crate::services::orders::OrderListResponse,
            crate::services::payments::PaymentReturnResponse,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

/// Registers the `Bearer` JWT scheme referenced by the secured paths.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
