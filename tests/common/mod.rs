#![allow(dead_code)]

use std::time::Duration;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, EntityTrait, Set};
use uuid::Uuid;

use kisantech_api::{
    db::create_schema,
    dto::orders::{OrderLineRequest, PlaceOrderRequest, ShippingInfoPayload},
    entity::{
        Products,
        products::{ActiveModel as ProductActive, Model as ProductModel},
        users::ActiveModel as UserActive,
    },
    middleware::auth::{AuthUser, issue_token},
    models::{AvailabilityStatus, RentalUnit, Role},
    state::AppState,
};

pub const SECRET: &str = "kisantech-test-secret";

/// Fresh in-memory database. One connection only: every SQLite in-memory
/// connection would otherwise see its own empty database.
pub async fn setup_state() -> anyhow::Result<AppState> {
    let mut options = ConnectOptions::new("sqlite::memory:".to_owned());
    options
        .max_connections(1)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .sqlx_logging(false);
    let orm = Database::connect(options).await?;
    create_schema(&orm).await?;
    Ok(AppState::new(orm, SECRET))
}

pub async fn create_user(state: &AppState, role: Role) -> anyhow::Result<AuthUser> {
    let id = Uuid::new_v4();
    UserActive {
        id: Set(id),
        email: Set(format!("{id}@kisantech.test")),
        name: Set(format!("{} {}", role.as_str(), &id.simple().to_string()[..6])),
        role: Set(role.as_str().to_string()),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await?;
    Ok(AuthUser { user_id: id, role })
}

pub async fn create_product(
    state: &AppState,
    seller: &AuthUser,
    name: &str,
    sale_price: i64,
    quantity: i32,
) -> anyhow::Result<ProductModel> {
    let now = Utc::now();
    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        seller_id: Set(seller.user_id),
        category_id: Set(None),
        name: Set(name.to_string()),
        description: Set(None),
        is_sellable: Set(true),
        is_rentable: Set(false),
        sale_price: Set(Some(sale_price)),
        rental_price: Set(None),
        rental_unit: Set(None),
        rental_available_from: Set(None),
        rental_available_until: Set(None),
        quantity: Set(quantity),
        availability_status: Set(AvailabilityStatus::Available.as_str().to_string()),
        shipping_eligible: Set(true),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&state.orm)
    .await?;
    Ok(product)
}

/// Rent-only product offered from a day ago for the next 30 days.
pub async fn create_rental_product(
    state: &AppState,
    seller: &AuthUser,
    name: &str,
    rental_price: i64,
    unit: RentalUnit,
    quantity: i32,
) -> anyhow::Result<ProductModel> {
    let now = Utc::now();
    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        seller_id: Set(seller.user_id),
        category_id: Set(None),
        name: Set(name.to_string()),
        description: Set(None),
        is_sellable: Set(false),
        is_rentable: Set(true),
        sale_price: Set(None),
        rental_price: Set(Some(rental_price)),
        rental_unit: Set(Some(unit.as_str().to_string())),
        rental_available_from: Set(Some((now - chrono::Duration::days(1)).into())),
        rental_available_until: Set(Some((now + chrono::Duration::days(30)).into())),
        quantity: Set(quantity),
        availability_status: Set(AvailabilityStatus::Available.as_str().to_string()),
        shipping_eligible: Set(false),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&state.orm)
    .await?;
    Ok(product)
}

pub async fn reload_product(state: &AppState, id: Uuid) -> anyhow::Result<ProductModel> {
    Products::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| anyhow::anyhow!("product {id} vanished"))
}

pub fn shipping() -> ShippingInfoPayload {
    ShippingInfoPayload {
        full_name: Some("Sunita Patil".into()),
        email: Some("sunita@example.in".into()),
        phone: Some("+91 98220 12345".into()),
        address: Some("Plot 14, Market Yard Road".into()),
        city: Some("Nashik".into()),
        state: Some("Maharashtra".into()),
        postal_code: Some("422003".into()),
    }
}

pub fn line(product_id: Uuid, quantity: i64) -> OrderLineRequest {
    OrderLineRequest {
        product_id: Some(product_id.to_string()),
        quantity: Some(quantity),
        ..Default::default()
    }
}

pub fn order_request(lines: Vec<OrderLineRequest>, payment_method: &str) -> PlaceOrderRequest {
    PlaceOrderRequest {
        products: Some(lines),
        shipping_info: Some(shipping()),
        payment_method: Some(payment_method.to_string()),
        payment_info: None,
        total_amount: None,
    }
}

pub fn bearer(user: &AuthUser) -> anyhow::Result<String> {
    let token = issue_token(SECRET, user.user_id, user.role, chrono::Duration::hours(1))?;
    Ok(format!("Bearer {token}"))
}
