use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::orders::{OrderLine, OrderList, OrderWithItems, PlaceOrderCommand, RentalPeriod},
    entity::{
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        products::{Column as ProdCol, Entity as Products, Model as ProductModel},
        users::Entity as Users,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{
        AvailabilityStatus, Order, OrderItem, OrderStatus, PaymentStatus, RentalUnit, Role,
        ShippingInfo,
    },
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::catalog_service,
    state::AppState,
};

/// A cart line re-priced against the catalog.
#[derive(Debug, Clone)]
struct PricedLine {
    product_id: Uuid,
    seller_id: Uuid,
    product_name: String,
    quantity: i32,
    unit_price: i64,
    rental: Option<RentalPeriod>,
}

/// Place an order for `buyer` from already-validated checkout input.
///
/// All reads and checks happen before the transaction opens. Inside it, stock
/// for every product is reserved, then the order and its items are written.
/// Any failure rolls the whole transaction back, so a failed checkout leaves
/// neither an order nor a stock change behind.
pub async fn place_order(
    state: &AppState,
    buyer: &AuthUser,
    command: PlaceOrderCommand,
) -> AppResult<ApiResponse<OrderWithItems>> {
    Users::find_by_id(buyer.user_id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::Unauthenticated)?;

    let priced = price_lines(&state.orm, &command.lines).await?;
    let total_amount = order_total(&priced)?;

    if let Some(client_total) = command.client_total {
        if client_total != total_amount {
            tracing::warn!(
                buyer_id = %buyer.user_id,
                client_total,
                total_amount,
                "client total differs from catalog pricing; using server total"
            );
        }
    }

    let txn = state.orm.begin().await?;

    if let Err(err) = reserve_all(&txn, &priced).await {
        txn.rollback().await?;
        tracing::info!(buyer_id = %buyer.user_id, error = %err, "checkout rejected");
        return Err(err);
    }

    let now = Utc::now();
    let order_id = Uuid::new_v4();
    let payment_status = PaymentStatus::for_method(&command.payment_method);
    let shipping_info = serde_json::to_value(&command.shipping)
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

    let order = OrderActive {
        id: Set(order_id),
        order_number: Set(build_order_number(order_id, now)),
        user_id: Set(buyer.user_id),
        total_amount: Set(total_amount),
        status: Set(OrderStatus::Processing.as_str().to_string()),
        payment_method: Set(command.payment_method.clone()),
        payment_status: Set(payment_status.as_str().to_string()),
        payment_info: Set(command.payment_info.clone()),
        shipping_info: Set(shipping_info),
        paid_at: Set((payment_status == PaymentStatus::Completed).then(|| now.into())),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&txn)
    .await?;

    let mut items = Vec::with_capacity(priced.len());
    for line in &priced {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(line.product_id),
            seller_id: Set(line.seller_id),
            product_name: Set(line.product_name.clone()),
            quantity: Set(line.quantity),
            unit_price: Set(line.unit_price),
            rental_start: Set(line.rental.map(|r| r.start.into())),
            rental_end: Set(line.rental.map(|r| r.end.into())),
            created_at: Set(now.into()),
        }
        .insert(&txn)
        .await?;
        items.push(order_item_from_entity(item));
    }

    txn.commit().await?;

    tracing::info!(
        order_id = %order.id,
        buyer_id = %buyer.user_id,
        total_amount,
        lines = items.len(),
        "order placed"
    );
    audit::record(
        &state.orm,
        buyer.user_id,
        "order_placed",
        "orders",
        serde_json::json!({ "order_id": order.id, "total_amount": total_amount }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order placed",
        OrderWithItems {
            order: order_from_entity(order)?,
            items,
        },
        Some(Meta::empty()),
    ))
}

/// Orders visible to `user`: their own as a buyer, those containing their
/// products as a seller, everything as an admin.
pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination().normalize();

    let mut condition = Condition::all();
    match user.role {
        Role::Admin => {}
        Role::Seller => {
            let order_ids: Vec<Uuid> = OrderItems::find()
                .select_only()
                .column(OrderItemCol::OrderId)
                .distinct()
                .filter(OrderItemCol::SellerId.eq(user.user_id))
                .into_tuple()
                .all(&state.orm)
                .await?;
            condition = condition.add(
                Condition::any()
                    .add(OrderCol::UserId.eq(user.user_id))
                    .add(OrderCol::Id.is_in(order_ids)),
            );
        }
        Role::Buyer => condition = condition.add(OrderCol::UserId.eq(user.user_id)),
    }

    if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty()) {
        let status = status
            .parse::<OrderStatus>()
            .map_err(|err| AppError::InvalidStatus(err.to_string()))?;
        condition = condition.add(OrderCol::Status.eq(status.as_str()));
    }

    let mut finder = Orders::find().filter(condition);
    finder = match query.sort_order.unwrap_or(SortOrder::Desc) {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect::<AppResult<Vec<_>>>()?;

    Ok(ApiResponse::success(
        "Orders",
        OrderList { items },
        Some(Meta::new(page, limit, total)),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    ensure_order_party(&state.orm, user, &order).await?;

    let items = load_items(&state.orm, order.id).await?;
    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: order_from_entity(order)?,
            items: items.into_iter().map(order_item_from_entity).collect(),
        },
        Some(Meta::empty()),
    ))
}

/// How the caller relates to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OrderParty {
    Admin,
    Seller,
    Buyer,
}

impl OrderParty {
    /// Fulfilment moves belong to whoever ships the goods.
    pub(crate) fn may_set(self, next: OrderStatus) -> bool {
        match next {
            OrderStatus::Shipped | OrderStatus::Delivered => self != OrderParty::Buyer,
            _ => true,
        }
    }
}

/// Allow the buyer, any seller with a line in the order, or an admin.
/// A user who is both buyer and seller on the order counts as a seller.
pub(crate) async fn ensure_order_party<C: ConnectionTrait>(
    conn: &C,
    user: &AuthUser,
    order: &OrderModel,
) -> AppResult<OrderParty> {
    if user.is_admin() {
        return Ok(OrderParty::Admin);
    }
    let seller_lines = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .filter(OrderItemCol::SellerId.eq(user.user_id))
        .count(conn)
        .await?;
    if seller_lines > 0 {
        Ok(OrderParty::Seller)
    } else if order.user_id == user.user_id {
        Ok(OrderParty::Buyer)
    } else {
        Err(AppError::Forbidden)
    }
}

pub(crate) async fn load_items<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> AppResult<Vec<OrderItemModel>> {
    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .order_by_asc(OrderItemCol::CreatedAt)
        .all(conn)
        .await?;
    Ok(items)
}

async fn price_lines<C: ConnectionTrait>(
    conn: &C,
    lines: &[OrderLine],
) -> AppResult<Vec<PricedLine>> {
    let ids: Vec<Uuid> = lines.iter().map(|line| line.product_id).collect();
    let products: HashMap<Uuid, ProductModel> = Products::find()
        .filter(ProdCol::Id.is_in(ids))
        .all(conn)
        .await?
        .into_iter()
        .map(|product| (product.id, product))
        .collect();

    lines
        .iter()
        .enumerate()
        .map(|(index, line)| {
            let product = products.get(&line.product_id).ok_or_else(|| {
                AppError::invalid(format!("products[{index}].productId"), "product does not exist")
            })?;
            price_line(index, line, product)
        })
        .collect()
}

fn price_line(index: usize, line: &OrderLine, product: &ProductModel) -> AppResult<PricedLine> {
    let id_field = format!("products[{index}].productId");
    if product.availability_status == AvailabilityStatus::Unavailable.as_str() {
        return Err(AppError::invalid(id_field, "product is not currently offered"));
    }

    let unit_price = match &line.rental {
        None => {
            if !product.is_sellable {
                return Err(AppError::invalid(id_field, "product is not for sale"));
            }
            product
                .sale_price
                .ok_or_else(|| AppError::invalid(id_field, "product has no sale price"))?
        }
        Some(period) => rental_price(index, product, period)?,
    };

    Ok(PricedLine {
        product_id: product.id,
        seller_id: product.seller_id,
        product_name: product.name.clone(),
        quantity: line.quantity,
        unit_price,
        rental: line.rental,
    })
}

fn rental_price(index: usize, product: &ProductModel, period: &RentalPeriod) -> AppResult<i64> {
    let id_field = format!("products[{index}].productId");
    if !product.is_rentable {
        return Err(AppError::invalid(id_field, "product is not for rent"));
    }
    let (Some(rate), Some(unit)) = (product.rental_price, product.rental_unit.as_deref()) else {
        return Err(AppError::invalid(id_field, "product has no rental price"));
    };
    let unit = unit
        .parse::<RentalUnit>()
        .map_err(|err| AppError::Internal(anyhow::anyhow!("product {}: {err}", product.id)))?;

    let from: Option<DateTime<Utc>> =
        product.rental_available_from.map(|dt| dt.with_timezone(&Utc));
    let until: Option<DateTime<Utc>> =
        product.rental_available_until.map(|dt| dt.with_timezone(&Utc));
    if from.is_some_and(|from| period.start < from) {
        return Err(AppError::invalid(
            format!("products[{index}].rentalStart"),
            "is before the product's rental availability",
        ));
    }
    if until.is_some_and(|until| period.end > until) {
        return Err(AppError::invalid(
            format!("products[{index}].rentalEnd"),
            "is after the product's rental availability",
        ));
    }

    let end_field = format!("products[{index}].rentalEnd");
    let units = unit
        .units_between(period.start, period.end)
        .ok_or_else(|| AppError::invalid(end_field.clone(), "must be after rentalStart"))?;
    rate.checked_mul(units)
        .ok_or_else(|| AppError::invalid(end_field, "rental period is too long"))
}

fn order_total(lines: &[PricedLine]) -> AppResult<i64> {
    lines.iter().try_fold(0_i64, |total, line| {
        line.unit_price
            .checked_mul(i64::from(line.quantity))
            .and_then(|line_total| total.checked_add(line_total))
            .ok_or_else(|| AppError::invalid("products", "order total is out of range"))
    })
}

/// Reserve the summed quantity per product, in product-id order so that
/// concurrent checkouts lock rows in the same sequence.
async fn reserve_all(txn: &DatabaseTransaction, lines: &[PricedLine]) -> AppResult<()> {
    let mut demand: BTreeMap<Uuid, (i32, &str)> = BTreeMap::new();
    for line in lines {
        let entry = demand
            .entry(line.product_id)
            .or_insert((0, line.product_name.as_str()));
        entry.0 = entry.0.checked_add(line.quantity).ok_or_else(|| {
            AppError::invalid("products", "combined quantity for a product is out of range")
        })?;
    }

    for (product_id, (qty, name)) in demand {
        match catalog_service::reserve_stock(txn, product_id, qty).await {
            Ok(()) => {}
            Err(AppError::NotFound) => {
                return Err(AppError::InsufficientStock {
                    product: name.to_string(),
                    available: 0,
                    requested: qty,
                });
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

pub(crate) fn order_from_entity(model: OrderModel) -> AppResult<Order> {
    let corrupt = |err: String| AppError::Internal(anyhow::anyhow!("order {}: {err}", model.id));

    let status = model
        .status
        .parse::<OrderStatus>()
        .map_err(|e| corrupt(e.to_string()))?;
    let payment_status = model
        .payment_status
        .parse::<PaymentStatus>()
        .map_err(|e| corrupt(e.to_string()))?;
    let shipping_info = serde_json::from_value::<ShippingInfo>(model.shipping_info.clone())
        .map_err(|e| corrupt(e.to_string()))?;

    Ok(Order {
        id: model.id,
        order_number: model.order_number,
        buyer_id: model.user_id,
        status,
        total_amount: model.total_amount,
        payment_method: model.payment_method,
        payment_status,
        payment_info: model.payment_info,
        shipping_info,
        paid_at: model.paid_at.map(|dt| dt.with_timezone(&Utc)),
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}

pub(crate) fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        seller_id: model.seller_id,
        product_name: model.product_name,
        quantity: model.quantity,
        unit_price: model.unit_price,
        line_total: model.unit_price * i64::from(model.quantity),
        rental_start: model.rental_start.map(|dt| dt.with_timezone(&Utc)),
        rental_end: model.rental_end.map(|dt| dt.with_timezone(&Utc)),
        created_at: model.created_at.with_timezone(&Utc),
    }
}

fn build_order_number(order_id: Uuid, placed_at: DateTime<Utc>) -> String {
    let date = placed_at.format("%Y%m%d");
    let suffix = order_id.simple().to_string();
    format!("KT-{}-{}", date, &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn product(sellable: bool, rentable: bool) -> ProductModel {
        let created = Utc.with_ymd_and_hms(2026, 1, 10, 6, 0, 0).unwrap().fixed_offset();
        ProductModel {
            id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            category_id: None,
            name: "Power tiller".into(),
            description: None,
            is_sellable: sellable,
            is_rentable: rentable,
            sale_price: sellable.then_some(85_000),
            rental_price: rentable.then_some(1_200),
            rental_unit: rentable.then(|| "day".to_string()),
            rental_available_from: None,
            rental_available_until: None,
            quantity: 3,
            availability_status: "available".into(),
            shipping_eligible: true,
            created_at: created,
            updated_at: created,
        }
    }

    fn sale_line(product: &ProductModel, quantity: i32) -> OrderLine {
        OrderLine {
            product_id: product.id,
            quantity,
            rental: None,
        }
    }

    #[test]
    fn sale_line_uses_catalog_price() {
        let p = product(true, false);
        let priced = price_line(0, &sale_line(&p, 2), &p).unwrap();
        assert_eq!(priced.unit_price, 85_000);
        assert_eq!(priced.seller_id, p.seller_id);
        assert_eq!(order_total(&[priced]).unwrap(), 170_000);
    }

    #[test]
    fn rent_only_product_cannot_be_bought() {
        let p = product(false, true);
        let err = price_line(1, &sale_line(&p, 1), &p).unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest { field, .. } if field == "products[1].productId"));
    }

    #[test]
    fn unavailable_product_is_rejected() {
        let mut p = product(true, false);
        p.availability_status = "unavailable".into();
        assert!(price_line(0, &sale_line(&p, 1), &p).is_err());
    }

    #[test]
    fn rental_line_is_priced_per_started_unit() {
        let p = product(false, true);
        let start = Utc.with_ymd_and_hms(2026, 7, 1, 9, 0, 0).unwrap();
        let line = OrderLine {
            product_id: p.id,
            quantity: 1,
            rental: Some(RentalPeriod {
                start,
                end: start + Duration::hours(50),
            }),
        };
        let priced = price_line(0, &line, &p).unwrap();
        assert_eq!(priced.unit_price, 3 * 1_200);
    }

    #[test]
    fn rental_outside_availability_window_is_rejected() {
        let mut p = product(false, true);
        let start = Utc.with_ymd_and_hms(2026, 7, 1, 9, 0, 0).unwrap();
        p.rental_available_until = Some((start + Duration::days(2)).fixed_offset());
        let line = OrderLine {
            product_id: p.id,
            quantity: 1,
            rental: Some(RentalPeriod {
                start,
                end: start + Duration::days(3),
            }),
        };
        let err = price_line(0, &line, &p).unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest { field, .. } if field == "products[0].rentalEnd"));
    }

    #[test]
    fn total_overflow_is_reported_not_wrapped() {
        let p = product(true, false);
        let mut priced = price_line(0, &sale_line(&p, i32::MAX), &p).unwrap();
        priced.unit_price = i64::MAX / 2;
        assert!(order_total(&[priced]).is_err());
    }

    #[test]
    fn buyers_cannot_make_fulfilment_moves() {
        assert!(!OrderParty::Buyer.may_set(OrderStatus::Shipped));
        assert!(!OrderParty::Buyer.may_set(OrderStatus::Delivered));
        assert!(OrderParty::Buyer.may_set(OrderStatus::Cancelled));
        assert!(OrderParty::Seller.may_set(OrderStatus::Delivered));
        assert!(OrderParty::Admin.may_set(OrderStatus::Shipped));
    }

    #[test]
    fn order_number_embeds_date_and_id_prefix() {
        let id = Uuid::parse_str("0b7e6a52-9f3d-4c1e-8a55-1d2e3f4a5b6c").unwrap();
        let placed = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        assert_eq!(build_order_number(id, placed), "KT-20261019-0b7e6a52");
    }
}
