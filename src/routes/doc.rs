use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        auth::{LoginRequest, LoginResponse, RegisterRequest},
        cart::{AddToCartRequest, SetQuantityRequest},
        orders::{CheckoutRequest, CompleteOrderRequest, OrderList, UpdateOrderStatusRequest},
        payments::{
            CashOnDeliveryRequest, CreatePaymentRequest, CreatedPayment, PaymentList,
            RefundPaymentRequest, RefundReceipt,
        },
    },
    middleware::auth::Role,
    models::{Cart, CartLine, Order, OrderItem, OrderStatus, OrderWithItems, Payment, PaymentStatus, User},
    response::{ApiResponse, Meta},
    routes::{auth, cart, health, orders, params, payments},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::login,
        auth::register,
        cart::get_cart,
        cart::add_item,
        cart::set_item_quantity,
        cart::remove_item,
        cart::clear_cart,
        orders::checkout,
        orders::initiate,
        orders::complete_order,
        orders::my_orders,
        orders::my_active_orders,
        orders::get_order,
        orders::cancel_order,
        orders::delete_order,
        orders::list_orders,
        orders::recent_orders,
        orders::update_order_status,
        payments::create_payment,
        payments::cash_on_delivery,
        payments::capture_payment,
        payments::cancel_payment,
        payments::payment_history,
        payments::payment_status,
        payments::refund_payment,
        payments::mark_refunded
    ),
    components(
        schemas(
            User,
            Role,
            Cart,
            CartLine,
            Order,
            OrderItem,
            OrderStatus,
            OrderWithItems,
            Payment,
            PaymentStatus,
            RegisterRequest,
            LoginRequest,
            LoginResponse,
            AddToCartRequest,
            SetQuantityRequest,
            CheckoutRequest,
            CompleteOrderRequest,
            UpdateOrderStatusRequest,
            CreatePaymentRequest,
            CashOnDeliveryRequest,
            RefundPaymentRequest,
            CreatedPayment,
            RefundReceipt,
            OrderList,
            PaymentList,
            params::Pagination,
            params::SortOrder,
            params::OrderListQuery,
            Meta,
            ApiResponse<Cart>,
            ApiResponse<Order>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<Payment>,
            ApiResponse<PaymentList>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Orders", description = "Order endpoints"),
        (name = "Payments", description = "Payment endpoints"),
        (name = "Admin", description = "Admin endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
