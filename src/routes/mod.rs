use actix_multipart::form::MultipartFormConfig;
use actix_web::web;

use crate::errors::AppError;

pub mod auth;
pub mod products;

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        log::debug!("Rejected JSON body: {}", err);
        AppError::BadRequest("Request body must be valid JSON".to_owned()).into()
    })
}

fn multipart_config() -> MultipartFormConfig {
    MultipartFormConfig::default()
        .total_limit(MAX_UPLOAD_BYTES)
        .error_handler(|err, _req| {
            log::debug!("Rejected multipart body: {}", err);
            AppError::BadRequest("Request body must be valid multipart form data".to_owned()).into()
        })
}

/// Mounts the `/auth` and `/products` scopes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .app_data(multipart_config())
        .service(
            web::scope("/auth")
                .service(auth::register)
                .service(auth::login)
                .service(auth::open_store)
                .service(auth::my_brand),
        )
        .service(
            web::scope("/products")
                .service(products::list_products)
                .service(products::create_product)
                .service(products::my_brand_products)
                .service(products::product_detail),
        );
}
