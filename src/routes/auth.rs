use actix_web::{
    get,
    middleware::from_fn,
    post,
    web::{self, Data, ReqData},
    HttpResponse,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::authenticate,
    db,
    errors::AppError,
    structs::User,
    utils::{hash_password, verify_password},
    AppState,
};

#[derive(Deserialize)]
pub struct Register {
    email: String,
    password: String,
    name: Option<String>,
}

#[post("/register")]
pub async fn register(
    state: Data<AppState>,
    web::Json(form): web::Json<Register>,
) -> Result<HttpResponse, AppError> {
    let email = form.email.trim().to_lowercase();
    if email.is_empty() || form.password.is_empty() {
        return Err(AppError::BadRequest("Email and password are required".to_owned()));
    }
    if !email.contains('@') {
        return Err(AppError::BadRequest("Invalid email address".to_owned()));
    }
    if form.password.len() < 8 {
        return Err(AppError::BadRequest(
            "Password must be at least 8 characters long".to_owned(),
        ));
    }
    if form.password.len() > 128 {
        return Err(AppError::BadRequest(
            "Password must be at most 128 characters long".to_owned(),
        ));
    }
    let name = form.name.as_deref().map(str::trim).filter(|n| !n.is_empty());

    let pwd_hash = hash_password(&form.password)?;
    let user = db::create_user(&state.db_pool, &email, &pwd_hash, name).await?;

    Ok(HttpResponse::Created().json(json!({
        "message": "Registration successful",
        "user": {
            "id": user.id,
            "name": user.name,
            "email": user.email,
        }
    })))
}

#[derive(Deserialize)]
pub struct Login {
    email: Option<String>,
    password: Option<String>,
    client_type: Option<String>,
}

#[post("/login")]
pub async fn login(
    state: Data<AppState>,
    web::Json(form): web::Json<Login>,
) -> Result<HttpResponse, AppError> {
    let email = form.email.as_deref().map(str::trim).unwrap_or_default().to_lowercase();
    let password = form.password.unwrap_or_default();
    if email.is_empty() || password.is_empty() {
        return Err(AppError::BadRequest("Email and password are required".to_owned()));
    }
    if form.client_type.as_deref().unwrap_or("mobile") != "mobile" {
        return Err(AppError::BadRequest("Unsupported client type".to_owned()));
    }

    let user = match db::find_user_by_email(&state.db_pool, &email).await? {
        Some(user) => user,
        None => {
            log::info!("Login attempt for unknown email");
            return Err(AppError::Unauthorized("Invalid email or password".to_owned()));
        }
    };
    if !verify_password(&password, &user.pwd_hash)? {
        log::warn!("Wrong password for user ID: {}", user.id);
        return Err(AppError::Unauthorized("Invalid email or password".to_owned()));
    }

    let token = state.tokens.issue(user.id).await?;
    log::info!("User {} logged in", user.id);

    Ok(HttpResponse::Ok().json(json!({
        "message": "Login successful",
        "user_role": user.role,
        "auth_token": token,
        "user": {
            "id": user.id,
            "name": user.name,
            "email": user.email,
        }
    })))
}

#[derive(Deserialize)]
pub struct OpenStore {
    name: Option<String>,
    description: Option<String>,
}

#[post("/open_store", wrap = "from_fn(authenticate)")]
pub async fn open_store(
    state: Data<AppState>,
    user: ReqData<User>,
    web::Json(form): web::Json<OpenStore>,
) -> Result<HttpResponse, AppError> {
    let name = form.name.as_deref().map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return Err(AppError::BadRequest("Brand name is required".to_owned()));
    }

    let (brand, user) =
        db::open_store(&state.db_pool, &user, name, form.description.as_deref()).await?;

    Ok(HttpResponse::Created().json(json!({
        "message": "Brand created and user role updated",
        "brand": {
            "id": brand.id,
            "name": brand.name,
            "description": brand.description,
        },
        "user": {
            "id": user.id,
            "name": user.name,
            "role": user.role,
        }
    })))
}

#[get("/brands/my", wrap = "from_fn(authenticate)")]
pub async fn my_brand(
    state: Data<AppState>,
    user: ReqData<User>,
) -> Result<HttpResponse, AppError> {
    let brand = db::find_brand_by_owner(&state.db_pool, user.id)
        .await?
        .ok_or_else(|| AppError::NotFound("Brand not found".to_owned()))?;

    Ok(HttpResponse::Ok().json(json!({
        "id": brand.id,
        "name": brand.name,
        "description": brand.description,
    })))
}
