//! Product reads and the stock operations every other component must go through.
//!
//! `quantity` is only ever changed by a single conditional `UPDATE`, so the
//! check and the write cannot be separated by a concurrent request.

use chrono::Utc;
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect,
    sea_query::{Expr, Func, SimpleExpr},
};
use uuid::Uuid;

use crate::{
    dto::products::{Availability, ProductList},
    entity::products::{Column as ProdCol, Entity as Products, Model as ProductModel},
    error::{AppError, AppResult},
    models::{AvailabilityStatus, Product, RentalUnit},
    response::{ApiResponse, Meta},
    routes::params::{ProductKind, ProductQuery, ProductSortBy, SortOrder},
    state::AppState,
};

pub async fn list_products(
    state: &AppState,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, limit, offset) = query.pagination().normalize();
    let mut condition = Condition::all();

    if let Some(search) = query.q.as_ref().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search.to_lowercase());
        condition = condition.add(Expr::expr(Func::lower(Expr::col(ProdCol::Name))).like(pattern));
    }

    match query.kind {
        Some(ProductKind::Sellable) => condition = condition.add(ProdCol::IsSellable.eq(true)),
        Some(ProductKind::Rentable) => condition = condition.add(ProdCol::IsRentable.eq(true)),
        None => {}
    }

    if let Some(status) = query.status {
        condition = condition.add(ProdCol::AvailabilityStatus.eq(status.as_str()));
    }

    if let Some(seller_id) = query.seller_id {
        condition = condition.add(ProdCol::SellerId.eq(seller_id));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    let sort_col = match query.sort_by.unwrap_or(ProductSortBy::CreatedAt) {
        ProductSortBy::CreatedAt => ProdCol::CreatedAt,
        ProductSortBy::Price => ProdCol::SalePrice,
        ProductSortBy::Name => ProdCol::Name,
    };

    let mut finder = Products::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(sort_col),
        SortOrder::Desc => finder.order_by_desc(sort_col),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(product_from_entity)
        .collect::<AppResult<Vec<_>>>()?;

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Products", ProductList { items }, Some(meta)))
}

pub async fn get_product(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Product>> {
    let product = Products::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(ApiResponse::success(
        "Product",
        product_from_entity(product)?,
        None,
    ))
}

/// Report whether `requested` units could be reserved right now.
///
/// Advisory only: the answer may be stale by the time a checkout runs, which
/// is why [`reserve_stock`] re-checks atomically.
pub async fn check_availability<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    requested: i32,
) -> AppResult<Availability> {
    if requested < 1 {
        return Err(AppError::invalid("quantity", "must be at least 1"));
    }
    let product = Products::find_by_id(product_id)
        .one(conn)
        .await?
        .ok_or(AppError::NotFound)?;

    let listed = product.availability_status != AvailabilityStatus::Unavailable.as_str();
    Ok(Availability {
        product_id,
        available: listed && product.quantity >= requested,
        current_stock: product.quantity,
    })
}

/// Take `qty` units out of stock.
///
/// Runs as one conditional update (`... WHERE id = $1 AND quantity >= $2`);
/// when it drains the product the status flips to `out_of_stock` in the same
/// statement. Fails with `NotFound` for an unknown id and `InsufficientStock`
/// when fewer than `qty` units remain.
pub async fn reserve_stock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    qty: i32,
) -> AppResult<()> {
    if qty < 1 {
        return Err(AppError::invalid("quantity", "must be at least 1"));
    }

    let drained = Expr::case(
        Expr::col(ProdCol::Quantity).eq(qty),
        Expr::val(AvailabilityStatus::OutOfStock.as_str()),
    )
    .finally(Expr::col(ProdCol::AvailabilityStatus));

    let result = Products::update_many()
        .col_expr(ProdCol::Quantity, Expr::col(ProdCol::Quantity).sub(qty))
        .col_expr(ProdCol::AvailabilityStatus, Into::<SimpleExpr>::into(drained))
        .col_expr(ProdCol::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
        .filter(ProdCol::Id.eq(product_id))
        .filter(ProdCol::Quantity.gte(qty))
        .exec(conn)
        .await?;

    if result.rows_affected == 1 {
        tracing::debug!(%product_id, qty, "stock reserved");
        return Ok(());
    }

    let current = Products::find_by_id(product_id)
        .one(conn)
        .await?
        .ok_or(AppError::NotFound)?;
    Err(AppError::InsufficientStock {
        product: current.name,
        available: current.quantity,
        requested: qty,
    })
}

/// Return `qty` units to stock, flipping `out_of_stock` back to `available`.
///
/// A product marked `unavailable` by its seller stays unavailable.
pub async fn release_stock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    qty: i32,
) -> AppResult<()> {
    if qty < 1 {
        return Err(AppError::invalid("quantity", "must be at least 1"));
    }

    let restocked = Expr::case(
        Expr::col(ProdCol::AvailabilityStatus).eq(AvailabilityStatus::OutOfStock.as_str()),
        Expr::val(AvailabilityStatus::Available.as_str()),
    )
    .finally(Expr::col(ProdCol::AvailabilityStatus));

    let result = Products::update_many()
        .col_expr(ProdCol::Quantity, Expr::col(ProdCol::Quantity).add(qty))
        .col_expr(ProdCol::AvailabilityStatus, Into::<SimpleExpr>::into(restocked))
        .col_expr(ProdCol::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
        .filter(ProdCol::Id.eq(product_id))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }
    tracing::debug!(%product_id, qty, "stock released");
    Ok(())
}

pub(crate) fn product_from_entity(model: ProductModel) -> AppResult<Product> {
    let availability_status = model
        .availability_status
        .parse::<AvailabilityStatus>()
        .map_err(|err| AppError::Internal(anyhow::anyhow!("product {}: {err}", model.id)))?;
    let rental_unit = model
        .rental_unit
        .as_deref()
        .map(str::parse::<RentalUnit>)
        .transpose()
        .map_err(|err| AppError::Internal(anyhow::anyhow!("product {}: {err}", model.id)))?;

    Ok(Product {
        id: model.id,
        seller_id: model.seller_id,
        category_id: model.category_id,
        name: model.name,
        description: model.description,
        sellable: model.is_sellable,
        rentable: model.is_rentable,
        sale_price: model.sale_price,
        rental_price: model.rental_price,
        rental_unit,
        rental_available_from: model.rental_available_from.map(|dt| dt.with_timezone(&Utc)),
        rental_available_until: model.rental_available_until.map(|dt| dt.with_timezone(&Utc)),
        quantity: model.quantity,
        availability_status,
        shipping_eligible: model.shipping_eligible,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}
