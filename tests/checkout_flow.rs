mod common;

use chrono::{Duration, Utc};
use common::{
    create_product, create_rental_product, create_user, line, order_request, reload_product,
    setup_state,
};
use kisantech_api::{
    dto::orders::UpdateOrderStatusRequest,
    entity::{
        AuditLogs, OrderItems, Orders, audit_logs::Column as AuditCol,
        products::ActiveModel as ProductActive,
    },
    error::AppError,
    middleware::auth::AuthUser,
    models::{AvailabilityStatus, OrderStatus, PaymentStatus, RentalUnit, Role},
    routes::params::OrderListQuery,
    services::{catalog_service, order_service, status_service},
};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};

fn status(value: &str) -> UpdateOrderStatusRequest {
    UpdateOrderStatusRequest {
        status: value.to_string(),
    }
}

#[tokio::test]
async fn checkout_reserves_stock_and_uses_catalog_prices() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let seller = create_user(&state, Role::Seller).await?;
    let buyer = create_user(&state, Role::Buyer).await?;
    let seeds = create_product(&state, &seller, "Hybrid tomato seeds", 45_000, 10).await?;
    let sprayer = create_product(&state, &seller, "Knapsack sprayer", 350_000, 2).await?;

    let mut request = order_request(vec![line(seeds.id, 3), line(sprayer.id, 1)], "UPI");
    // A stale client total is ignored.
    request.total_amount = Some(1);
    let command = request.validate()?;

    let resp = order_service::place_order(&state, &buyer, command).await?;
    let placed = resp.data.expect("order data");

    assert_eq!(placed.order.total_amount, 3 * 45_000 + 350_000);
    assert_eq!(placed.order.status, OrderStatus::Processing);
    assert_eq!(placed.order.payment_method, "upi");
    assert_eq!(placed.order.payment_status, PaymentStatus::Completed);
    assert!(placed.order.paid_at.is_some());
    assert!(placed.order.order_number.starts_with("KT-"));
    assert_eq!(placed.order.shipping_info.city, "Nashik");
    assert_eq!(placed.items.len(), 2);
    assert!(placed.items.iter().all(|item| item.seller_id == seller.user_id));

    assert_eq!(reload_product(&state, seeds.id).await?.quantity, 7);
    assert_eq!(reload_product(&state, sprayer.id).await?.quantity, 1);

    let audits = AuditLogs::find()
        .filter(AuditCol::Action.eq("order_placed"))
        .count(&state.orm)
        .await?;
    assert_eq!(audits, 1);
    Ok(())
}

#[tokio::test]
async fn draining_stock_marks_product_out_of_stock_and_cod_stays_pending() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let seller = create_user(&state, Role::Seller).await?;
    let buyer = create_user(&state, Role::Buyer).await?;
    let tiller = create_product(&state, &seller, "Power tiller", 85_000, 2).await?;

    // Two lines for the same product are reserved together.
    let command = order_request(vec![line(tiller.id, 1), line(tiller.id, 1)], "cod").validate()?;
    let placed = order_service::place_order(&state, &buyer, command)
        .await?
        .data
        .expect("order data");

    assert_eq!(placed.order.payment_status, PaymentStatus::Pending);
    assert!(placed.order.paid_at.is_none());

    let after = reload_product(&state, tiller.id).await?;
    assert_eq!(after.quantity, 0);
    assert_eq!(after.availability_status, "out_of_stock");

    let availability = catalog_service::check_availability(&state.orm, tiller.id, 1).await?;
    assert!(!availability.available);
    assert_eq!(availability.current_stock, 0);
    Ok(())
}

#[tokio::test]
async fn failed_line_rolls_back_every_reservation() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let seller = create_user(&state, Role::Seller).await?;
    let buyer = create_user(&state, Role::Buyer).await?;
    let plenty = create_product(&state, &seller, "Neem cake 25kg", 120_000, 10).await?;
    let scarce = create_product(&state, &seller, "Drip kit", 900_000, 1).await?;

    let command = order_request(vec![line(plenty.id, 2), line(scarce.id, 3)], "card").validate()?;
    let err = order_service::place_order(&state, &buyer, command)
        .await
        .expect_err("checkout should fail");

    match err {
        AppError::InsufficientStock {
            product,
            available,
            requested,
        } => {
            assert_eq!(product, "Drip kit");
            assert_eq!(available, 1);
            assert_eq!(requested, 3);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(reload_product(&state, plenty.id).await?.quantity, 10);
    assert_eq!(reload_product(&state, scarce.id).await?.quantity, 1);
    assert_eq!(Orders::find().count(&state.orm).await?, 0);
    assert_eq!(OrderItems::find().count(&state.orm).await?, 0);
    Ok(())
}

#[tokio::test]
async fn incomplete_address_is_rejected_before_any_write() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let seller = create_user(&state, Role::Seller).await?;
    let product = create_product(&state, &seller, "Vermicompost", 30_000, 5).await?;

    let mut request = order_request(vec![line(product.id, 1)], "upi");
    if let Some(shipping) = request.shipping_info.as_mut() {
        shipping.city = Some("   ".into());
    }
    let err = request.validate().expect_err("city is required");
    assert!(matches!(err, AppError::InvalidRequest { ref field, .. } if field == "city"));

    assert_eq!(reload_product(&state, product.id).await?.quantity, 5);
    assert_eq!(Orders::find().count(&state.orm).await?, 0);
    Ok(())
}

#[tokio::test]
async fn unknown_product_is_an_invalid_line() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let buyer = create_user(&state, Role::Buyer).await?;

    let command = order_request(vec![line(uuid::Uuid::new_v4(), 1)], "upi").validate()?;
    let err = order_service::place_order(&state, &buyer, command)
        .await
        .expect_err("product does not exist");
    assert!(
        matches!(err, AppError::InvalidRequest { ref field, .. } if field == "products[0].productId")
    );
    Ok(())
}

#[tokio::test]
async fn concurrent_checkouts_never_oversell() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let seller = create_user(&state, Role::Seller).await?;
    let first = create_user(&state, Role::Buyer).await?;
    let second = create_user(&state, Role::Buyer).await?;
    let harvester = create_product(&state, &seller, "Paddy harvester hire", 500_000, 5).await?;

    let a = order_request(vec![line(harvester.id, 3)], "upi").validate()?;
    let b = order_request(vec![line(harvester.id, 3)], "upi").validate()?;

    let (ra, rb) = tokio::join!(
        order_service::place_order(&state, &first, a),
        order_service::place_order(&state, &second, b),
    );

    let outcomes = [ra.is_ok(), rb.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    let failure = if ra.is_err() { ra.err() } else { rb.err() };
    assert!(matches!(failure, Some(AppError::InsufficientStock { available: 2, .. })));

    assert_eq!(reload_product(&state, harvester.id).await?.quantity, 2);
    assert_eq!(Orders::find().count(&state.orm).await?, 1);
    Ok(())
}

#[tokio::test]
async fn status_follows_the_workflow_graph() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let seller = create_user(&state, Role::Seller).await?;
    let buyer = create_user(&state, Role::Buyer).await?;
    let product = create_product(&state, &seller, "Mulch film roll", 210_000, 4).await?;

    let command = order_request(vec![line(product.id, 1)], "cod").validate()?;
    let order_id = order_service::place_order(&state, &buyer, command)
        .await?
        .data
        .expect("order data")
        .order
        .id;

    let skipped = status_service::update_status(&state, &seller, order_id, status("Shipped")).await;
    assert!(matches!(skipped, Err(AppError::InvalidStatus(_))));

    let garbage = status_service::update_status(&state, &seller, order_id, status("Lost")).await;
    assert!(matches!(garbage, Err(AppError::InvalidStatus(_))));

    for next in ["Confirmed", "shipped", "Delivered"] {
        status_service::update_status(&state, &seller, order_id, status(next)).await?;
    }

    let delivered = order_service::get_order(&state, &buyer, order_id)
        .await?
        .data
        .expect("order data");
    assert_eq!(delivered.order.status, OrderStatus::Delivered);
    // Cash on delivery is settled at delivery.
    assert_eq!(delivered.order.payment_status, PaymentStatus::Completed);
    assert!(delivered.order.paid_at.is_some());

    let reopened = status_service::update_status(&state, &buyer, order_id, status("Cancelled")).await;
    assert!(matches!(reopened, Err(AppError::InvalidStatus(_))));
    Ok(())
}

#[tokio::test]
async fn cancelling_returns_stock() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let seller = create_user(&state, Role::Seller).await?;
    let buyer = create_user(&state, Role::Buyer).await?;
    let product = create_product(&state, &seller, "Solar pump", 2_500_000, 1).await?;

    let command = order_request(vec![line(product.id, 1)], "upi").validate()?;
    let order_id = order_service::place_order(&state, &buyer, command)
        .await?
        .data
        .expect("order data")
        .order
        .id;
    assert_eq!(reload_product(&state, product.id).await?.availability_status, "out_of_stock");

    let resp = status_service::update_status(&state, &buyer, order_id, status("Cancelled")).await?;
    assert_eq!(resp.data.expect("order data").order.status, OrderStatus::Cancelled);

    let restocked = reload_product(&state, product.id).await?;
    assert_eq!(restocked.quantity, 1);
    assert_eq!(restocked.availability_status, "available");

    let again = status_service::update_status(&state, &buyer, order_id, status("Confirmed")).await;
    assert!(matches!(again, Err(AppError::InvalidStatus(_))));
    Ok(())
}

#[tokio::test]
async fn only_parties_to_an_order_can_see_or_change_it() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let seller = create_user(&state, Role::Seller).await?;
    let other_seller = create_user(&state, Role::Seller).await?;
    let buyer = create_user(&state, Role::Buyer).await?;
    let stranger = create_user(&state, Role::Buyer).await?;
    let admin = create_user(&state, Role::Admin).await?;
    let product = create_product(&state, &seller, "Wheat seed 40kg", 180_000, 9).await?;

    let command = order_request(vec![line(product.id, 2)], "upi").validate()?;
    let order_id = order_service::place_order(&state, &buyer, command)
        .await?
        .data
        .expect("order data")
        .order
        .id;

    let peek = order_service::get_order(&state, &stranger, order_id).await;
    assert!(matches!(peek, Err(AppError::Forbidden)));
    let meddle =
        status_service::update_status(&state, &other_seller, order_id, status("Confirmed")).await;
    assert!(matches!(meddle, Err(AppError::Forbidden)));

    order_service::get_order(&state, &seller, order_id).await?;
    status_service::update_status(&state, &admin, order_id, status("Confirmed")).await?;

    let listed = |user: AuthUser| {
        let state = state.clone();
        async move {
            let resp = order_service::list_orders(&state, &user, OrderListQuery::default()).await?;
            anyhow::Ok(resp.data.expect("order list").items.len())
        }
    };
    assert_eq!(listed(buyer.clone()).await?, 1);
    assert_eq!(listed(seller.clone()).await?, 1);
    assert_eq!(listed(admin.clone()).await?, 1);
    assert_eq!(listed(stranger.clone()).await?, 0);
    assert_eq!(listed(other_seller.clone()).await?, 0);

    let missing = order_service::get_order(&state, &admin, uuid::Uuid::new_v4()).await;
    assert!(matches!(missing, Err(AppError::NotFound)));
    Ok(())
}

#[tokio::test]
async fn duplicate_lines_are_reserved_as_one_quantity() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let seller = create_user(&state, Role::Seller).await?;
    let buyer = create_user(&state, Role::Buyer).await?;
    let seed = create_product(&state, &seller, "Bajra seed 5kg", 60_000, 3).await?;

    // Each line fits on its own; together they do not.
    let command = order_request(vec![line(seed.id, 2), line(seed.id, 2)], "upi").validate()?;
    let err = order_service::place_order(&state, &buyer, command)
        .await
        .expect_err("combined quantity exceeds stock");

    assert!(matches!(
        err,
        AppError::InsufficientStock {
            available: 3,
            requested: 4,
            ..
        }
    ));
    let after = reload_product(&state, seed.id).await?;
    assert_eq!(after.quantity, 3);
    assert_eq!(after.availability_status, "available");
    assert_eq!(Orders::find().count(&state.orm).await?, 0);
    Ok(())
}

#[tokio::test]
async fn rental_checkout_prices_per_started_unit() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let seller = create_user(&state, Role::Seller).await?;
    let buyer = create_user(&state, Role::Buyer).await?;
    let tractor =
        create_rental_product(&state, &seller, "Mini tractor 20HP", 500, RentalUnit::Day, 2)
            .await?;

    let start = Utc::now() + Duration::days(1);
    let mut rental = line(tractor.id, 1);
    rental.rental_start = Some(start);
    rental.rental_end = Some(start + Duration::days(2) + Duration::hours(3));
    let command = order_request(vec![rental], "upi").validate()?;

    let placed = order_service::place_order(&state, &buyer, command)
        .await?
        .data
        .expect("order data");

    assert_eq!(placed.order.total_amount, 3 * 500);
    assert_eq!(placed.items[0].unit_price, 1_500);
    assert!(placed.items[0].rental_start.is_some());
    assert!(placed.items[0].rental_end.is_some());
    assert_eq!(reload_product(&state, tractor.id).await?.quantity, 1);

    // Buying a rent-only product is refused.
    let command = order_request(vec![line(tractor.id, 1)], "upi").validate()?;
    let err = order_service::place_order(&state, &buyer, command)
        .await
        .expect_err("not for sale");
    assert!(
        matches!(err, AppError::InvalidRequest { ref field, .. } if field == "products[0].productId")
    );
    Ok(())
}

#[tokio::test]
async fn cancelling_keeps_a_delisted_product_unavailable() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let seller = create_user(&state, Role::Seller).await?;
    let buyer = create_user(&state, Role::Buyer).await?;
    let product = create_product(&state, &seller, "Seed drill", 400_000, 3).await?;

    let command = order_request(vec![line(product.id, 3)], "upi").validate()?;
    let order_id = order_service::place_order(&state, &buyer, command)
        .await?
        .data
        .expect("order data")
        .order
        .id;

    let mut delisted: ProductActive = reload_product(&state, product.id).await?.into();
    delisted.availability_status = Set(AvailabilityStatus::Unavailable.as_str().to_string());
    delisted.update(&state.orm).await?;

    status_service::update_status(&state, &buyer, order_id, status("Cancelled")).await?;

    let after = reload_product(&state, product.id).await?;
    assert_eq!(after.quantity, 3);
    assert_eq!(after.availability_status, "unavailable");
    Ok(())
}

// The test pool has one connection, so checkouts never truly interleave
// here; only Postgres exercises concurrent transactions. This checks that the
// guard lives in the UPDATE itself: a caller acting on a stale read still
// cannot take more than is left.
#[tokio::test]
async fn reservation_guard_rejects_a_stale_read() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let seller = create_user(&state, Role::Seller).await?;
    let product = create_product(&state, &seller, "Cotton seed 450g", 85_000, 5).await?;

    let stale = catalog_service::check_availability(&state.orm, product.id, 3).await?;
    assert!(stale.available);

    catalog_service::reserve_stock(&state.orm, product.id, 3).await?;

    let err = catalog_service::reserve_stock(&state.orm, product.id, 3)
        .await
        .expect_err("only two units remain");
    assert!(matches!(
        err,
        AppError::InsufficientStock {
            available: 2,
            requested: 3,
            ..
        }
    ));

    catalog_service::reserve_stock(&state.orm, product.id, 2).await?;
    let drained = reload_product(&state, product.id).await?;
    assert_eq!(drained.quantity, 0);
    assert_eq!(drained.availability_status, "out_of_stock");

    let missing = catalog_service::reserve_stock(&state.orm, uuid::Uuid::new_v4(), 1).await;
    assert!(matches!(missing, Err(AppError::NotFound)));
    Ok(())
}

#[tokio::test]
async fn buyers_cannot_mark_their_own_order_delivered() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let seller = create_user(&state, Role::Seller).await?;
    let buyer = create_user(&state, Role::Buyer).await?;
    let product = create_product(&state, &seller, "Sprinkler set", 150_000, 4).await?;

    let command = order_request(vec![line(product.id, 1)], "cod").validate()?;
    let order_id = order_service::place_order(&state, &buyer, command)
        .await?
        .data
        .expect("order data")
        .order
        .id;

    status_service::update_status(&state, &buyer, order_id, status("Confirmed")).await?;
    let shipped = status_service::update_status(&state, &buyer, order_id, status("Shipped")).await;
    assert!(matches!(shipped, Err(AppError::Forbidden)));

    status_service::update_status(&state, &seller, order_id, status("Shipped")).await?;
    let delivered =
        status_service::update_status(&state, &buyer, order_id, status("Delivered")).await;
    assert!(matches!(delivered, Err(AppError::Forbidden)));

    let order = order_service::get_order(&state, &buyer, order_id)
        .await?
        .data
        .expect("order data")
        .order;
    assert_eq!(order.status, OrderStatus::Shipped);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert!(order.paid_at.is_none());
    Ok(())
}
