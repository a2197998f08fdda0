use std::{str::FromStr, sync::Arc};

use actix_files::Files;
use actix_web::{
    http::Method,
    middleware,
    web::{self, Data},
    App, HttpResponse, HttpServer,
};
use log::info;
use serde_json::json;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};

mod auth;
mod config;
mod db;
mod errors;
mod query;
mod routes;
mod storage;
mod structs;
#[cfg(test)]
mod testing;
mod utils;

use auth::TokenService;
use config::Config;
use errors::AppError;
use storage::{ImageStore, LocalImageStore, PUBLIC_PREFIX};

#[derive(Clone)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub config: Arc<Config>,
    pub tokens: TokenService,
    pub images: Arc<dyn ImageStore>,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, config: Config, images: Arc<dyn ImageStore>) -> Self {
        let tokens = TokenService::new(db_pool.clone(), config.token_ttl);
        AppState {
            db_pool,
            config: Arc::new(config),
            tokens,
            images,
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env()?;

    let opts = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(AppError::SqlxError)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(std::time::Duration::from_secs(5));

    let db_pool = SqlitePoolOptions::new()
        .connect_with(opts)
        .await
        .map_err(AppError::SqlxError)?;

    sqlx::migrate!()
        .run(&db_pool)
        .await
        .map_err(AppError::MigrateError)?;
    info!("Database migrated successfully");

    let images = LocalImageStore::new(&config.upload_folder)?;
    let upload_folder = images.root().to_path_buf();
    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(db_pool, config, Arc::new(images));

    info!("Starting HTTP server on http://{}/", bind_addr);

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Compress::default())
            // always register the Logger last
            .wrap(middleware::Logger::default())
            .service(Files::new(PUBLIC_PREFIX, &upload_folder))
            .app_data(Data::new(state.clone()))
            .configure(routes::configure)
            .default_service(web::to(default_handler))
    })
    .bind(bind_addr)?
    .run()
    .await
}

async fn default_handler(req_method: Method) -> Result<HttpResponse, AppError> {
    match req_method {
        Method::GET => Err(AppError::NotFound("Resource not found".to_owned())),
        _ => Ok(HttpResponse::MethodNotAllowed().json(json!({ "message": "Method not allowed" }))),
    }
}
