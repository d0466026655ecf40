use chrono::Utc;
use sea_orm::{
    ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, TransactionTrait,
    sea_query::Expr,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::orders::{OrderWithItems, UpdateOrderStatusRequest},
    entity::{
        order_items::Model as OrderItemModel,
        orders::{Column as OrderCol, Entity as Orders},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderStatus, PaymentStatus},
    response::{ApiResponse, Meta},
    services::{
        catalog_service,
        order_service::{ensure_order_party, load_items, order_from_entity, order_item_from_entity},
    },
    state::AppState,
};

/// Move an order along the status graph.
///
/// The write is a compare-and-set on the status read at the start, so two
/// parties racing to change the same order cannot both win. Cancelling an
/// order returns every line's quantity to stock inside the same transaction.
/// Only sellers on the order and admins may mark it shipped or delivered.
pub async fn update_status(
    state: &AppState,
    actor: &AuthUser,
    order_id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let txn = state.orm.begin().await?;

    let (from, updated, items) = match apply_transition(&txn, actor, order_id, &payload).await {
        Ok(applied) => applied,
        Err(err) => {
            txn.rollback().await?;
            return Err(err);
        }
    };

    txn.commit().await?;

    tracing::info!(
        %order_id,
        actor_id = %actor.user_id,
        from = %from,
        to = %updated.status,
        "order status updated"
    );
    audit::record(
        &state.orm,
        actor.user_id,
        "order_status_update",
        "orders",
        serde_json::json!({
            "order_id": order_id,
            "from": from.as_str(),
            "to": updated.status.as_str(),
        }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order updated",
        OrderWithItems {
            order: updated,
            items: items.into_iter().map(order_item_from_entity).collect(),
        },
        Some(Meta::empty()),
    ))
}

async fn apply_transition(
    txn: &DatabaseTransaction,
    actor: &AuthUser,
    order_id: Uuid,
    payload: &UpdateOrderStatusRequest,
) -> AppResult<(OrderStatus, Order, Vec<OrderItemModel>)> {
    let existing = Orders::find_by_id(order_id)
        .one(txn)
        .await?
        .ok_or(AppError::NotFound)?;
    let party = ensure_order_party(txn, actor, &existing).await?;

    let next = payload
        .status
        .parse::<OrderStatus>()
        .map_err(|err| AppError::InvalidStatus(err.to_string()))?;
    let current = order_from_entity(existing)?;

    if !current.status.can_transition_to(next) {
        return Err(AppError::InvalidStatus(format!(
            "cannot move order from {} to {}",
            current.status, next
        )));
    }
    if !party.may_set(next) {
        return Err(AppError::Forbidden);
    }

    let now = Utc::now().fixed_offset();
    let mut update = Orders::update_many()
        .col_expr(OrderCol::Status, Expr::value(next.as_str()))
        .col_expr(OrderCol::UpdatedAt, Expr::value(now));

    // Delivery settles cash-on-delivery payments.
    if next == OrderStatus::Delivered && current.payment_status == PaymentStatus::Pending {
        update = update
            .col_expr(
                OrderCol::PaymentStatus,
                Expr::value(PaymentStatus::Completed.as_str()),
            )
            .col_expr(OrderCol::PaidAt, Expr::value(now));
    }

    let result = update
        .filter(OrderCol::Id.eq(order_id))
        .filter(OrderCol::Status.eq(current.status.as_str()))
        .exec(txn)
        .await?;
    if result.rows_affected == 0 {
        return Err(AppError::InvalidStatus(format!(
            "order is no longer {}",
            current.status
        )));
    }

    let items = load_items(txn, order_id).await?;

    if next == OrderStatus::Cancelled {
        for item in &items {
            match catalog_service::release_stock(txn, item.product_id, item.quantity).await {
                Ok(()) => {}
                Err(AppError::NotFound) => {
                    tracing::warn!(
                        %order_id,
                        product_id = %item.product_id,
                        "product removed from catalog; nothing to restock"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    let updated = Orders::find_by_id(order_id)
        .one(txn)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok((current.status, order_from_entity(updated)?, items))
}
