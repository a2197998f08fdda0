use std::{path::Path, str::FromStr, sync::Arc, sync::OnceLock};

use actix_web::http::header;
use chrono::{TimeDelta, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};

use crate::{
    config::{Config, PageLimits},
    db,
    storage::LocalImageStore,
    structs::{Brand, NewProduct, Role, User},
    utils::hash_password,
    AppState,
};

pub const TEST_PASSWORD: &str = "password123";
pub const BOUNDARY: &str = "pasar-test-boundary";

/// Builds an app service over `configure` with the given state.
macro_rules! init_app {
    ($state:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data(actix_web::web::Data::new($state.clone()))
                .configure(crate::routes::configure),
        )
        .await
    };
}
pub(crate) use init_app;

/// Single-connection in-memory database with migrations applied.
pub async fn memory_pool() -> SqlitePool {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(opts)
        .await
        .unwrap();
    sqlx::migrate!().run(&pool).await.unwrap();
    pool
}

/// File-backed WAL database with the server's connection settings, for tests
/// that need several connections writing at once.
pub async fn file_pool(dir: &Path) -> SqlitePool {
    let opts = SqliteConnectOptions::new()
        .filename(dir.join("test.db"))
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(std::time::Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(opts)
        .await
        .unwrap();
    sqlx::migrate!().run(&pool).await.unwrap();
    pool
}

pub fn test_config(upload_folder: &Path) -> Config {
    Config {
        database_url: "sqlite::memory:".to_owned(),
        bind_addr: "127.0.0.1:0".to_owned(),
        pagination: PageLimits {
            default_page_size: 10,
            max_page_size: 50,
        },
        upload_folder: upload_folder.to_path_buf(),
        token_ttl: TimeDelta::try_hours(1).unwrap(),
    }
}

pub async fn test_state(upload_folder: &Path) -> AppState {
    let pool = memory_pool().await;
    let images = LocalImageStore::new(upload_folder).unwrap();
    AppState::new(pool, test_config(upload_folder), Arc::new(images))
}

fn test_hash() -> &'static str {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| hash_password(TEST_PASSWORD).unwrap())
}

pub async fn seed_user(pool: &SqlitePool, email: &str, role: Role) -> User {
    let user = db::create_user(pool, email, test_hash(), Some("Tester"))
        .await
        .unwrap();
    if role == user.role {
        return user;
    }
    sqlx::query_as::<_, User>("UPDATE users SET role = $1 WHERE id = $2 RETURNING *")
        .bind(role)
        .bind(user.id)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn seed_brand(pool: &SqlitePool, owner_id: i64, name: &str) -> Brand {
    sqlx::query_as::<_, Brand>(
        r#"
        INSERT INTO brands (name, description, owner_id, created_at)
        VALUES ($1, NULL, $2, $3)
        RETURNING *
        "#,
    )
    .bind(name)
    .bind(owner_id)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .unwrap()
}

pub async fn seed_product(
    pool: &SqlitePool,
    brand_id: i64,
    name: &str,
    price: f64,
    stock: i64,
) -> i64 {
    db::insert_product(
        pool,
        &NewProduct {
            name: name.to_owned(),
            description: None,
            price,
            category_id: None,
            brand_id,
            stock,
            main_image_url: format!(
                "http://localhost/static/uploads/{}.png",
                name.replace(' ', "-")
            ),
        },
    )
    .await
    .unwrap()
    .id
}

pub fn bearer(token: &str) -> (header::HeaderName, String) {
    (header::AUTHORIZATION, format!("Bearer {}", token))
}

/// Encodes text fields and an optional `main_image` file as multipart/form-data.
pub fn multipart_body(fields: &[(&str, &str)], image: Option<(&str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, bytes)) = image {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"main_image\"; filename=\"{}\"\r\nContent-Type: image/png\r\n\r\n",
                BOUNDARY, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn multipart_content_type() -> (header::HeaderName, String) {
    (
        header::CONTENT_TYPE,
        format!("multipart/form-data; boundary={}", BOUNDARY),
    )
}
