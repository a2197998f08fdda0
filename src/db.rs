use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    errors::{conflict_on_unique, AppError},
    query::eager_load,
    structs::{Brand, NewProduct, Product, ProductView, Role, User},
};

const PRODUCT_SELECT: &str =
    "SELECT id, name, description, price, category_id, brand_id, created_at FROM products";

pub async fn create_user(
    pool: &SqlitePool,
    email: &str,
    pwd_hash: &str,
    name: Option<&str>,
) -> Result<User, AppError> {
    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, pwd_hash, name, role, created_at)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(email)
    .bind(pwd_hash)
    .bind(name)
    .bind(Role::Buyer)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .map_err(|e| conflict_on_unique(e, "Email is already registered"))?;
    log::info!("User created: {} ({})", user.id, user.email);
    Ok(user)
}

pub async fn find_user_by_email(
    pool: &SqlitePool,
    email: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await
}

pub async fn find_brand_by_owner(
    pool: &SqlitePool,
    owner_id: i64,
) -> Result<Option<Brand>, sqlx::Error> {
    sqlx::query_as::<_, Brand>("SELECT * FROM brands WHERE owner_id = $1")
        .bind(owner_id)
        .fetch_optional(pool)
        .await
}

/// Creates the caller's brand and promotes them to seller in one transaction.
///
/// The brand insert is the first statement, so concurrent callers queue on the
/// write lock and the unique index on `brands.name` picks the winner. Nothing is
/// written when the caller already owns a brand or the name is taken.
pub async fn open_store(
    pool: &SqlitePool,
    owner: &User,
    name: &str,
    description: Option<&str>,
) -> Result<(Brand, User), AppError> {
    let mut tx = pool.begin().await?;

    let brand = sqlx::query_as::<_, Brand>(
        r#"
        INSERT INTO brands (name, description, owner_id, created_at)
        SELECT $1, $2, $3, $4
        WHERE NOT EXISTS (SELECT 1 FROM brands WHERE owner_id = $3)
        RETURNING *
        "#,
    )
    .bind(name)
    .bind(description)
    .bind(owner.id)
    .bind(Utc::now())
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| conflict_on_unique(e, "Brand name is already taken"))?
    .ok_or_else(|| AppError::Conflict("You already own a store".to_owned()))?;

    let user = if owner.role == Role::Seller {
        owner.clone()
    } else {
        sqlx::query_as::<_, User>("UPDATE users SET role = $1 WHERE id = $2 RETURNING *")
            .bind(Role::Seller)
            .bind(owner.id)
            .fetch_one(&mut *tx)
            .await?
    };

    tx.commit().await?;
    log::info!("Brand {} ({}) opened by user {}", brand.id, brand.name, user.id);
    Ok((brand, user))
}

pub async fn category_exists(pool: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM categories WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

/// Inserts the product, its inventory row and its main image as one unit.
pub async fn insert_product(pool: &SqlitePool, new: &NewProduct) -> Result<Product, AppError> {
    let mut tx = pool.begin().await?;

    let product = sqlx::query_as::<_, Product>(
        r#"
        INSERT INTO products (name, description, price, category_id, brand_id, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, name, description, price, category_id, brand_id, created_at
        "#,
    )
    .bind(&new.name)
    .bind(&new.description)
    .bind(new.price)
    .bind(new.category_id)
    .bind(new.brand_id)
    .bind(Utc::now())
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| conflict_on_unique(e, "Product name is already taken"))?;

    sqlx::query("INSERT INTO inventory (product_id, quantity) VALUES ($1, $2)")
        .bind(product.id)
        .bind(new.stock)
        .execute(&mut *tx)
        .await?;

    sqlx::query("INSERT INTO product_images (product_id, image_url, is_main) VALUES ($1, $2, TRUE)")
        .bind(product.id)
        .bind(&new.main_image_url)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    log::info!(
        "Product created: {} ({}) for brand {}",
        product.id,
        product.name,
        product.brand_id
    );
    Ok(product)
}

pub async fn get_product_view(
    pool: &SqlitePool,
    id: i64,
) -> Result<Option<ProductView>, AppError> {
    let row = sqlx::query_as::<_, Product>(&format!("{} WHERE id = $1", PRODUCT_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    match row {
        Some(product) => Ok(eager_load(pool, vec![product]).await?.pop()),
        None => Ok(None),
    }
}

pub async fn list_brand_products(
    pool: &SqlitePool,
    brand_id: i64,
) -> Result<Vec<ProductView>, AppError> {
    let sql = format!("{} WHERE brand_id = $1 ORDER BY id", PRODUCT_SELECT);
    let rows = sqlx::query_as::<_, Product>(&sql)
        .bind(brand_id)
        .fetch_all(pool)
        .await?;
    eager_load(pool, rows).await
}

pub async fn log_user_activity(
    pool: &SqlitePool,
    user_id: i64,
    activity_type: &str,
    related_type: &str,
    related_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO user_activities (user_id, activity_type, related_type, related_id, created_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(user_id)
    .bind(activity_type)
    .bind(related_type)
    .bind(related_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    log::debug!(
        "Activity {} on {} {} by user {}",
        activity_type,
        related_type,
        related_id,
        user_id
    );
    Ok(())
}
