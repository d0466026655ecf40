use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    routing::{get, put},
};
use uuid::Uuid;

use crate::{
    dto::orders::{OrderList, OrderWithItems, PlaceOrderRequest, UpdateOrderStatusRequest},
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    routes::params::OrderListQuery,
    services::{order_service, status_service},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders).post(place_order))
        .route("/{id}", get(get_order))
        .route("/{id}/status", put(update_order_status))
}

#[utoipa::path(
    post,
    path = "/api/orders",
    request_body = PlaceOrderRequest,
    responses(
        (status = 201, description = "Order placed", body = ApiResponse<OrderWithItems>),
        (status = 400, description = "Missing or malformed field"),
        (status = 401, description = "Not logged in"),
        (status = 409, description = "Insufficient stock"),
        (status = 500, description = "Internal Server Error"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn place_order(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<PlaceOrderRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<ApiResponse<OrderWithItems>>)> {
    let Json(payload) = payload?;
    let command = payload.validate()?;
    let resp = order_service::place_order(&state, &user, command).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[utoipa::path(
    get,
    path = "/api/orders",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20"),
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("sort_order" = Option<String>, Query, description = "Sort order: asc, desc")
    ),
    responses(
        (status = 200, description = "Orders visible to the caller", body = ApiResponse<OrderList>),
        (status = 401, description = "Not logged in"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    query: Result<Query<OrderListQuery>, QueryRejection>,
) -> AppResult<Json<ApiResponse<OrderList>>> {
    let Query(query) = query?;
    let resp = order_service::list_orders(&state, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Order with items", body = ApiResponse<OrderWithItems>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Json<ApiResponse<OrderWithItems>>> {
    let Path(id) = id?;
    let resp = order_service::get_order(&state, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    put,
    path = "/api/orders/{id}/status",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<OrderWithItems>),
        (status = 400, description = "Unknown status or illegal transition"),
        (status = 401, description = "Not logged in"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthUser,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateOrderStatusRequest>, JsonRejection>,
) -> AppResult<Json<ApiResponse<OrderWithItems>>> {
    let Path(id) = id?;
    let Json(payload) = payload?;
    let resp = status_service::update_status(&state, &user, id, payload).await?;
    Ok(Json(resp))
}
