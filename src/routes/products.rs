use actix_multipart::form::{tempfile::TempFile, text::Text, MultipartForm};
use actix_web::{
    get,
    middleware::from_fn,
    post, routes,
    web::{self, Data, ReqData},
    HttpRequest, HttpResponse,
};
use serde_json::json;

use crate::{
    auth::{authenticate, require_seller},
    db,
    errors::AppError,
    query::{ListParams, ProductQuery},
    storage::public_url,
    structs::{BrandProduct, NewProduct, User},
    AppState,
};

#[routes]
#[get("")]
#[get("/")]
pub async fn list_products(
    state: Data<AppState>,
    params: web::Query<ListParams>,
) -> Result<HttpResponse, AppError> {
    let query = ProductQuery::from_params(&params, state.config.pagination)?;
    let page = query.fetch(&state.db_pool).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[get("/{product_id:\\d+}", wrap = "from_fn(authenticate)")]
pub async fn product_detail(
    state: Data<AppState>,
    user: ReqData<User>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let product_id = path.into_inner();
    let product = db::get_product_view(&state.db_pool, product_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Product not found".to_owned()))?;

    record_activity(&state, &user, "view_product", product.id).await;
    Ok(HttpResponse::Ok().json(product))
}

/// Activity logging never fails the request it describes.
async fn record_activity(state: &AppState, user: &User, activity_type: &str, product_id: i64) {
    if let Err(e) =
        db::log_user_activity(&state.db_pool, user.id, activity_type, "product", product_id).await
    {
        log::warn!(
            "Failed to record {} for user {} on product {}: {}",
            activity_type,
            user.id,
            product_id,
            e
        );
    }
}

#[derive(MultipartForm)]
pub struct CreateProductForm {
    name: Option<Text<String>>,
    description: Option<Text<String>>,
    price: Option<Text<String>>,
    category_id: Option<Text<String>>,
    stock: Option<Text<String>>,
    main_image: Option<TempFile>,
}

fn non_empty(field: Option<Text<String>>) -> Option<String> {
    field
        .map(Text::into_inner)
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
}

/// A file part with no name or no bytes is what browsers send when nothing was chosen.
fn chosen_file(file: Option<TempFile>) -> Option<TempFile> {
    file.filter(|f| f.size > 0 && f.file_name.as_deref().is_some_and(|n| !n.is_empty()))
}

#[post(
    "/create",
    wrap = "from_fn(require_seller)",
    wrap = "from_fn(authenticate)"
)]
pub async fn create_product(
    state: Data<AppState>,
    user: ReqData<User>,
    req: HttpRequest,
    MultipartForm(form): MultipartForm<CreateProductForm>,
) -> Result<HttpResponse, AppError> {
    let user = user.into_inner();
    let brand = db::find_brand_by_owner(&state.db_pool, user.id)
        .await?
        .ok_or_else(|| AppError::BadRequest("Seller does not have a brand yet".to_owned()))?;

    let fields = (
        non_empty(form.name),
        non_empty(form.price),
        non_empty(form.stock),
        chosen_file(form.main_image),
    );
    let (Some(name), Some(price), Some(stock), Some(main_image)) = fields else {
        return Err(AppError::BadRequest(
            "Product name, price, initial stock and main image are required".to_owned(),
        ));
    };

    let price: f64 = price
        .parse()
        .ok()
        .filter(|p: &f64| p.is_finite() && *p > 0.0)
        .ok_or_else(|| AppError::BadRequest("Price must be a positive number".to_owned()))?;
    let stock: i64 = stock
        .parse()
        .ok()
        .filter(|s: &i64| *s >= 0)
        .ok_or_else(|| {
            AppError::BadRequest("Stock must be a non-negative whole number".to_owned())
        })?;

    let category_id = match non_empty(form.category_id) {
        None => None,
        Some(raw) => {
            let id: i64 = raw
                .parse()
                .map_err(|_| AppError::BadRequest("category_id is not valid".to_owned()))?;
            if !db::category_exists(&state.db_pool, id).await? {
                return Err(AppError::BadRequest("category_id is not valid".to_owned()));
            }
            Some(id)
        }
    };

    let images = state.images.clone();
    let file_name = web::block(move || {
        images.store(main_image.file.path(), main_image.file_name.as_deref())
    })
    .await
    .map_err(|e| AppError::Internal(format!("image upload task failed: {}", e)))??;
    let main_image_url = public_url(&req.connection_info(), &file_name);

    let inserted = db::insert_product(
        &state.db_pool,
        &NewProduct {
            name,
            description: non_empty(form.description),
            price,
            category_id,
            brand_id: brand.id,
            stock,
            main_image_url: main_image_url.clone(),
        },
    )
    .await;
    let product = match inserted {
        Ok(product) => product,
        Err(e) => {
            discard_image(&state, file_name).await;
            return Err(e);
        }
    };

    record_activity(&state, &user, "create_product", product.id).await;

    Ok(HttpResponse::Created().json(json!({
        "message": "Product created",
        "product_id": product.id,
        "product_name": product.name,
        "main_image_url": main_image_url,
    })))
}

/// Drops an upload whose product row was never written.
async fn discard_image(state: &AppState, file_name: String) {
    let images = state.images.clone();
    let removed = web::block(move || images.remove(&file_name)).await;
    match removed {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::warn!("Failed to remove orphaned image: {}", e),
        Err(e) => log::warn!("Image cleanup task failed: {}", e),
    }
}

#[get("/my-brand", wrap = "from_fn(authenticate)")]
pub async fn my_brand_products(
    state: Data<AppState>,
    user: ReqData<User>,
) -> Result<HttpResponse, AppError> {
    let brand = db::find_brand_by_owner(&state.db_pool, user.id)
        .await?
        .ok_or_else(|| AppError::NotFound("Brand not found".to_owned()))?;

    let products: Vec<BrandProduct> = db::list_brand_products(&state.db_pool, brand.id)
        .await?
        .into_iter()
        .map(BrandProduct::from)
        .collect();
    Ok(HttpResponse::Ok().json(products))
}

#[cfg(test)]
mod tests {
    use crate::{
        structs::Role,
        testing::{self, init_app},
    };
    use actix_web::test;
    use serde_json::Value;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake";

    async fn count(pool: &sqlx::SqlitePool, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(pool)
            .await
            .unwrap()
    }

    fn uploaded_files(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[actix_web::test]
    async fn listing_is_public_and_paginated() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::test_state(dir.path()).await;
        let seller = testing::seed_user(&state.db_pool, "seller@example.com", Role::Seller).await;
        let brand = testing::seed_brand(&state.db_pool, seller.id, "Toko").await;
        for i in 0..4 {
            let name = format!("item {}", i);
            testing::seed_product(&state.db_pool, brand.id, &name, 10.0 + i as f64, 5).await;
        }
        let app = init_app!(state);

        let req = test::TestRequest::get()
            .uri("/products/?per_page=3&sort_by=price&sort_order=desc")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["total_items"], 4);
        assert_eq!(body["total_pages"], 2);
        assert_eq!(body["per_page"], 3);
        assert_eq!(body["has_next"], true);
        assert_eq!(body["has_prev"], false);
        assert_eq!(body["products"][0]["price"], 13.0);
        assert_eq!(body["products"][0]["brand"]["name"], "Toko");
        assert_eq!(body["products"][0]["images"][0]["is_main"], true);
    }

    #[actix_web::test]
    async fn oversized_page_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::test_state(dir.path()).await;
        let app = init_app!(state);

        let req = test::TestRequest::get().uri("/products/?per_page=1000").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["per_page"], 50);

        let req = test::TestRequest::get().uri("/products?per_page=0").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["per_page"], 1);
    }

    #[actix_web::test]
    async fn invalid_sort_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::test_state(dir.path()).await;
        let app = init_app!(state);

        for uri in [
            "/products/?sort_by=name,price,stock&sort_order=asc,desc",
            "/products/?sort_by=password",
        ] {
            let req = test::TestRequest::get().uri(uri).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), 400, "{}", uri);
            let body: Value = test::read_body_json(resp).await;
            assert!(body.get("products").is_none());
        }
    }

    #[actix_web::test]
    async fn buyers_cannot_create_products() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::test_state(dir.path()).await;
        let buyer = testing::seed_user(&state.db_pool, "buyer@example.com", Role::Buyer).await;
        let token = state.tokens.issue(buyer.id).await.unwrap();
        let app = init_app!(state);

        let req = test::TestRequest::post()
            .uri("/products/create")
            .insert_header(testing::bearer(&token))
            .insert_header(testing::multipart_content_type())
            .set_payload(testing::multipart_body(
                &[("name", "Kopi"), ("price", "10"), ("stock", "1")],
                Some(("kopi.png", PNG)),
            ))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 403);
        assert_eq!(count(&state.db_pool, "products").await, 0);
    }

    #[actix_web::test]
    async fn missing_main_image_persists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::test_state(dir.path()).await;
        let seller = testing::seed_user(&state.db_pool, "seller@example.com", Role::Seller).await;
        testing::seed_brand(&state.db_pool, seller.id, "Toko").await;
        let token = state.tokens.issue(seller.id).await.unwrap();
        let app = init_app!(state);

        // no file part, then the empty part a form sends when no file was chosen
        for image in [None, Some(("", &b""[..]))] {
            let req = test::TestRequest::post()
                .uri("/products/create")
                .insert_header(testing::bearer(&token))
                .insert_header(testing::multipart_content_type())
                .set_payload(testing::multipart_body(
                    &[("name", "Kopi"), ("price", "10"), ("stock", "1")],
                    image,
                ))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), 400);
        }

        for table in ["products", "inventory", "product_images"] {
            assert_eq!(count(&state.db_pool, table).await, 0, "{}", table);
        }
        assert_eq!(uploaded_files(dir.path()), 0);
    }

    #[actix_web::test]
    async fn non_numeric_price_or_stock_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::test_state(dir.path()).await;
        let seller = testing::seed_user(&state.db_pool, "seller@example.com", Role::Seller).await;
        testing::seed_brand(&state.db_pool, seller.id, "Toko").await;
        let token = state.tokens.issue(seller.id).await.unwrap();
        let app = init_app!(state);

        for fields in [
            [("name", "Kopi"), ("price", "sepuluh"), ("stock", "1")],
            [("name", "Kopi"), ("price", "10"), ("stock", "banyak")],
            [("name", "Kopi"), ("price", "-5"), ("stock", "1")],
        ] {
            let req = test::TestRequest::post()
                .uri("/products/create")
                .insert_header(testing::bearer(&token))
                .insert_header(testing::multipart_content_type())
                .set_payload(testing::multipart_body(&fields, Some(("kopi.png", PNG))))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), 400);
        }
        assert_eq!(count(&state.db_pool, "products").await, 0);
    }

    #[actix_web::test]
    async fn seller_without_brand_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::test_state(dir.path()).await;
        let seller = testing::seed_user(&state.db_pool, "seller@example.com", Role::Seller).await;
        let token = state.tokens.issue(seller.id).await.unwrap();
        let app = init_app!(state);

        let req = test::TestRequest::post()
            .uri("/products/create")
            .insert_header(testing::bearer(&token))
            .insert_header(testing::multipart_content_type())
            .set_payload(testing::multipart_body(
                &[("name", "Kopi"), ("price", "10"), ("stock", "1")],
                Some(("kopi.png", PNG)),
            ))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], "Seller does not have a brand yet");
    }

    #[actix_web::test]
    async fn created_product_round_trips_through_detail() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::test_state(dir.path()).await;
        let seller = testing::seed_user(&state.db_pool, "seller@example.com", Role::Seller).await;
        testing::seed_brand(&state.db_pool, seller.id, "Toko").await;
        let token = state.tokens.issue(seller.id).await.unwrap();
        let app = init_app!(state);

        let req = test::TestRequest::post()
            .uri("/products/create")
            .insert_header(testing::bearer(&token))
            .insert_header(testing::multipart_content_type())
            .set_payload(testing::multipart_body(
                &[
                    ("name", "Kopi Gayo"),
                    ("description", "arabica"),
                    ("price", "12.5"),
                    ("stock", "30"),
                    ("category_id", "4"),
                ],
                Some(("kopi.PNG", PNG)),
            ))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);
        let created: Value = test::read_body_json(resp).await;
        let product_id = created["product_id"].as_i64().unwrap();
        let image_url = created["main_image_url"].as_str().unwrap().to_owned();
        assert!(image_url.contains("/static/uploads/"));
        assert!(image_url.ends_with(".png"));

        let stored_name = image_url.rsplit('/').next().unwrap();
        assert_eq!(std::fs::read(dir.path().join(stored_name)).unwrap(), PNG);

        let req = test::TestRequest::get()
            .uri(&format!("/products/{}", product_id))
            .insert_header(testing::bearer(&token))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let detail: Value = test::read_body_json(resp).await;
        assert_eq!(detail["name"], "Kopi Gayo");
        assert_eq!(detail["price"], 12.5);
        assert_eq!(detail["stock"], 30);
        assert_eq!(detail["category"]["id"], 4);
        assert_eq!(detail["images"][0]["image_url"], image_url.as_str());
        assert_eq!(detail["images"][0]["is_main"], true);

        let activities: Vec<String> = sqlx::query_scalar(
            "SELECT activity_type FROM user_activities WHERE user_id = $1 ORDER BY id",
        )
        .bind(seller.id)
        .fetch_all(&state.db_pool)
        .await
        .unwrap();
        assert_eq!(activities, vec!["create_product", "view_product"]);
    }

    #[actix_web::test]
    async fn duplicate_product_name_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::test_state(dir.path()).await;
        let seller = testing::seed_user(&state.db_pool, "seller@example.com", Role::Seller).await;
        let brand = testing::seed_brand(&state.db_pool, seller.id, "Toko").await;
        testing::seed_product(&state.db_pool, brand.id, "Kopi", 10.0, 1).await;
        let token = state.tokens.issue(seller.id).await.unwrap();
        let app = init_app!(state);

        let req = test::TestRequest::post()
            .uri("/products/create")
            .insert_header(testing::bearer(&token))
            .insert_header(testing::multipart_content_type())
            .set_payload(testing::multipart_body(
                &[("name", "Kopi"), ("price", "10"), ("stock", "1")],
                Some(("kopi.png", PNG)),
            ))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 409);
        assert_eq!(count(&state.db_pool, "products").await, 1);
        assert_eq!(uploaded_files(dir.path()), 0);
    }

    #[actix_web::test]
    async fn detail_requires_auth_and_reports_missing_products() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::test_state(dir.path()).await;
        let buyer = testing::seed_user(&state.db_pool, "buyer@example.com", Role::Buyer).await;
        let token = state.tokens.issue(buyer.id).await.unwrap();
        let app = init_app!(state);

        let req = test::TestRequest::get().uri("/products/1").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 401);

        let req = test::TestRequest::get()
            .uri("/products/999")
            .insert_header(testing::bearer(&token))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404);
    }

    #[actix_web::test]
    async fn my_brand_lists_flattened_products() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::test_state(dir.path()).await;
        let seller = testing::seed_user(&state.db_pool, "seller@example.com", Role::Seller).await;
        let brand = testing::seed_brand(&state.db_pool, seller.id, "Toko").await;
        let other = testing::seed_user(&state.db_pool, "other@example.com", Role::Seller).await;
        let other_brand = testing::seed_brand(&state.db_pool, other.id, "Lain").await;
        testing::seed_product(&state.db_pool, brand.id, "Kopi", 10.0, 3).await;
        testing::seed_product(&state.db_pool, brand.id, "Teh", 8.0, 0).await;
        testing::seed_product(&state.db_pool, other_brand.id, "Gula", 2.0, 9).await;
        let token = state.tokens.issue(seller.id).await.unwrap();
        let app = init_app!(state);

        let req = test::TestRequest::get()
            .uri("/products/my-brand")
            .insert_header(testing::bearer(&token))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let body: Value = test::read_body_json(resp).await;
        let items = body.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["name"], "Kopi");
        assert_eq!(items[0]["stock"], 3);
        assert_eq!(items[0]["brand"]["name"], "Toko");
        assert!(items[0].get("category").is_none());
        assert_eq!(items[1]["images"].as_array().unwrap().len(), 1);
    }
}
