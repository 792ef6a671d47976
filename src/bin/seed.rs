use chrono::Utc;
use marketplace_checkout::{
    config::AppConfig,
    db::{create_orm_conn, run_migrations},
    entity::{
        Products, Users,
        products::{ActiveModel as ProductActive, Column as ProductCol},
        users::Column as UserCol,
    },
    middleware::auth::Role,
    services::auth_service::create_user,
};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set, sea_query::OnConflict,
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let orm = create_orm_conn(&config.database_url).await?;
    run_migrations(&orm).await?;

    let admin_id = ensure_user(&orm, "admin@example.com", "admin12345", Role::Admin).await?;
    let seller_id = ensure_user(&orm, "seller@example.com", "seller12345", Role::Seller).await?;
    let user_id = ensure_user(&orm, "user@example.com", "user12345", Role::User).await?;
    seed_products(&orm).await?;

    println!("Seed completed. Admin ID: {admin_id}, Seller ID: {seller_id}, User ID: {user_id}");
    Ok(())
}

async fn ensure_user(
    db: &DatabaseConnection,
    email: &str,
    password: &str,
    role: Role,
) -> anyhow::Result<Uuid> {
    let existing = Users::find()
        .filter(UserCol::Email.eq(email))
        .one(db)
        .await?;
    let user_id = match existing {
        Some(user) => user.id,
        None => create_user(db, email, password, role)
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))?
            .id,
    };

    println!("Ensured user {email} (role={role})");
    Ok(user_id)
}

async fn seed_products(db: &DatabaseConnection) -> anyhow::Result<()> {
    // prices in cents
    let products = vec![
        ("Axum Hoodie", "Warm hoodie for Rustaceans", 5500, 50),
        ("Ferris Mug", "Coffee tastes better with Ferris", 1200, 100),
        ("Rust Sticker Pack", "Decorate your laptop", 500, 200),
        ("E-book: Async Rust", "Learn async Rust patterns", 2500, 75),
    ];

    for (name, desc, price, stock) in products {
        let product = ProductActive {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            description: Set(Some(desc.to_string())),
            price: Set(price),
            stock: Set(stock),
            created_at: Set(Utc::now().into()),
        };
        match Products::insert(product)
            .on_conflict(OnConflict::column(ProductCol::Name).do_nothing().to_owned())
            .exec_without_returning(db)
            .await
        {
            Ok(_) | Err(DbErr::RecordNotInserted) => {}
            Err(err) => return Err(err.into()),
        }
    }

    println!("Seeded products");
    Ok(())
}
