use chrono::{Duration, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use kisantech_api::{
    config::AppConfig,
    db::{OrmConn, create_orm_conn, run_migrations},
    entity::{
        Products, Users,
        products::{ActiveModel as ProductActive, Column as ProdCol},
        users::{ActiveModel as UserActive, Column as UserCol},
    },
    middleware::auth::issue_token,
    models::{AvailabilityStatus, RentalUnit, Role},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let orm = create_orm_conn(&config.database_url, 1).await?;
    run_migrations(&orm).await?;

    let admin_id = ensure_user(&orm, "admin@kisantech.in", "KisanTech Admin", Role::Admin).await?;
    let seller_id = ensure_user(&orm, "seller@kisantech.in", "Ramesh Farms", Role::Seller).await?;
    let buyer_id = ensure_user(&orm, "buyer@kisantech.in", "Sunita Patil", Role::Buyer).await?;
    seed_products(&orm, seller_id).await?;

    let ttl = Duration::days(7);
    for (label, id, role) in [
        ("admin", admin_id, Role::Admin),
        ("seller", seller_id, Role::Seller),
        ("buyer", buyer_id, Role::Buyer),
    ] {
        let token = issue_token(&config.jwt_secret, id, role, ttl)?;
        println!("{label} {id}\n  Bearer {token}");
    }

    println!("Seed completed");
    Ok(())
}

async fn ensure_user(orm: &OrmConn, email: &str, name: &str, role: Role) -> anyhow::Result<Uuid> {
    if let Some(existing) = Users::find()
        .filter(UserCol::Email.eq(email))
        .one(orm)
        .await?
    {
        return Ok(existing.id);
    }

    let user = UserActive {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        name: Set(name.to_string()),
        role: Set(role.as_str().to_string()),
        created_at: Set(Utc::now().into()),
    }
    .insert(orm)
    .await?;

    println!("Ensured user {email} (role={})", role.as_str());
    Ok(user.id)
}

struct SeedProduct {
    name: &'static str,
    description: &'static str,
    sale_price: Option<i64>,
    rental: Option<(i64, RentalUnit)>,
    quantity: i32,
}

async fn seed_products(orm: &OrmConn, seller_id: Uuid) -> anyhow::Result<()> {
    let products = [
        SeedProduct {
            name: "Hybrid tomato seeds 50g",
            description: "High-yield, disease resistant",
            sale_price: Some(45_000),
            rental: None,
            quantity: 200,
        },
        SeedProduct {
            name: "Neem cake fertilizer 25kg",
            description: "Organic soil conditioner",
            sale_price: Some(120_000),
            rental: None,
            quantity: 80,
        },
        SeedProduct {
            name: "Battery knapsack sprayer",
            description: "16L tank, 8 hour charge",
            sale_price: Some(350_000),
            rental: Some((20_000, RentalUnit::Day)),
            quantity: 10,
        },
        SeedProduct {
            name: "Mini tractor 20HP",
            description: "Available for weekly hire with operator",
            sale_price: None,
            rental: Some((1_500_000, RentalUnit::Week)),
            quantity: 2,
        },
    ];

    let now = Utc::now();
    for product in products {
        let exists = Products::find()
            .filter(ProdCol::Name.eq(product.name))
            .filter(ProdCol::SellerId.eq(seller_id))
            .one(orm)
            .await?
            .is_some();
        if exists {
            continue;
        }

        ProductActive {
            id: Set(Uuid::new_v4()),
            seller_id: Set(seller_id),
            category_id: Set(None),
            name: Set(product.name.to_string()),
            description: Set(Some(product.description.to_string())),
            is_sellable: Set(product.sale_price.is_some()),
            is_rentable: Set(product.rental.is_some()),
            sale_price: Set(product.sale_price),
            rental_price: Set(product.rental.map(|(price, _)| price)),
            rental_unit: Set(product.rental.map(|(_, unit)| unit.as_str().to_string())),
            rental_available_from: Set(product.rental.map(|_| now.into())),
            rental_available_until: Set(product.rental.map(|_| (now + Duration::days(180)).into())),
            quantity: Set(product.quantity),
            availability_status: Set(AvailabilityStatus::Available.as_str().to_string()),
            shipping_eligible: Set(true),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(orm)
        .await?;
    }

    println!("Seeded products");
    Ok(())
}
