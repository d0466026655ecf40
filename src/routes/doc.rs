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
        orders::{
            OrderLineRequest, OrderList, OrderWithItems, PlaceOrderRequest, ShippingInfoPayload,
            UpdateOrderStatusRequest,
        },
        products::{Availability, ProductList},
    },
    error::ErrorData,
    models::{
        AvailabilityStatus, Order, OrderItem, OrderStatus, PaymentStatus, Product, RentalUnit,
        ShippingInfo,
    },
    response::{ApiResponse, Meta},
    routes::{health, orders, products},
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
        products::list_products,
        products::get_product,
        products::check_availability,
        orders::place_order,
        orders::list_orders,
        orders::get_order,
        orders::update_order_status
    ),
    components(
        schemas(
            Product,
            Order,
            OrderItem,
            OrderStatus,
            PaymentStatus,
            AvailabilityStatus,
            RentalUnit,
            ShippingInfo,
            PlaceOrderRequest,
            OrderLineRequest,
            ShippingInfoPayload,
            UpdateOrderStatusRequest,
            OrderList,
            OrderWithItems,
            ProductList,
            Availability,
            ErrorData,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<Availability>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<ErrorData>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Products", description = "Catalog reads and stock availability"),
        (name = "Orders", description = "Checkout, order history and status workflow"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
