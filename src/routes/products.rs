use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{PathRejection, QueryRejection},
    },
    routing::get,
};
use uuid::Uuid;

use crate::{
    dto::products::{Availability, AvailabilityQuery, ProductList},
    error::AppResult,
    models::Product,
    response::{ApiResponse, Meta},
    routes::params::ProductQuery,
    services::catalog_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products))
        .route("/{id}", get(get_product))
        .route("/{id}/availability", get(check_availability))
}

#[utoipa::path(
    get,
    path = "/api/products",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20"),
        ("q" = Option<String>, Query, description = "Name search"),
        ("kind" = Option<String>, Query, description = "sellable or rentable"),
        ("status" = Option<String>, Query, description = "available, unavailable or out_of_stock"),
        ("seller_id" = Option<Uuid>, Query, description = "Only this seller's products"),
        ("sort_by" = Option<String>, Query, description = "created_at, price or name"),
        ("sort_order" = Option<String>, Query, description = "asc or desc")
    ),
    responses(
        (status = 200, description = "List products", body = ApiResponse<ProductList>)
    ),
    tag = "Products"
)]
pub async fn list_products(
    State(state): State<AppState>,
    query: Result<Query<ProductQuery>, QueryRejection>,
) -> AppResult<Json<ApiResponse<ProductList>>> {
    let Query(query) = query?;
    let resp = catalog_service::list_products(&state, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/products/{id}",
    params(
        ("id" = Uuid, Path, description = "Product ID")
    ),
    responses(
        (status = 200, description = "Get product", body = ApiResponse<Product>),
        (status = 404, description = "Product not found"),
    ),
    tag = "Products"
)]
pub async fn get_product(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Json<ApiResponse<Product>>> {
    let Path(id) = id?;
    let resp = catalog_service::get_product(&state, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/products/{id}/availability",
    params(
        ("id" = Uuid, Path, description = "Product ID"),
        ("quantity" = Option<i32>, Query, description = "Units wanted, default 1")
    ),
    responses(
        (status = 200, description = "Current stock and whether the quantity fits", body = ApiResponse<Availability>),
        (status = 404, description = "Product not found"),
    ),
    tag = "Products"
)]
pub async fn check_availability(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<AvailabilityQuery>, QueryRejection>,
) -> AppResult<Json<ApiResponse<Availability>>> {
    let Path(id) = id?;
    let Query(query) = query?;
    let availability =
        catalog_service::check_availability(&state.orm, id, query.quantity.unwrap_or(1)).await?;
    Ok(Json(ApiResponse::success(
        "Availability",
        availability,
        Some(Meta::empty()),
    )))
}
