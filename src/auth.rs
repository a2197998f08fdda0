//! Bearer-token issuing and the request gates built on it.
//!
//! Routes compose the gates explicitly, outermost first:
//! `authenticate` resolves the caller and attaches the [`User`] to the request,
//! `require_seller` then checks the attached user's role. Handlers receive the
//! user through `web::ReqData<User>` and pass it on as a plain argument.

use actix_web::{
    body::{EitherBody, MessageBody},
    dev::{ServiceRequest, ServiceResponse},
    http::header::{self, HeaderValue},
    middleware::Next,
    web, Error, HttpMessage,
};
use chrono::{TimeDelta, Utc};
use rand::{distr::Alphanumeric, Rng};
use sqlx::SqlitePool;

use crate::{
    errors::AppError,
    structs::{Role, User},
    AppState,
};

const TOKEN_LEN: usize = 48;

#[derive(Debug, Clone)]
pub struct TokenService {
    pool: SqlitePool,
    ttl: TimeDelta,
}

impl TokenService {
    pub fn new(pool: SqlitePool, ttl: TimeDelta) -> Self {
        TokenService { pool, ttl }
    }

    pub async fn issue(&self, user_id: i64) -> Result<String, AppError> {
        let token: String = rand::rng()
            .sample_iter(Alphanumeric)
            .take(TOKEN_LEN)
            .map(char::from)
            .collect();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO auth_tokens (token, user_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&token)
        .bind(user_id)
        .bind(now)
        .bind(now + self.ttl)
        .execute(&self.pool)
        .await?;

        log::info!("Issued auth token for user {}", user_id);
        Ok(token)
    }

    /// Resolves an unexpired token to its user.
    pub async fn verify(&self, token: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.email, u.pwd_hash, u.name, u.role, u.created_at
            FROM auth_tokens t
            JOIN users u ON u.id = t.user_id
            WHERE t.token = $1 AND t.expires_at > $2
            "#,
        )
        .bind(token)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }
}

fn malformed_header() -> AppError {
    AppError::Unauthorized("Authorization header must be 'Bearer <token>'".to_owned())
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
pub fn parse_bearer(header: Option<&HeaderValue>) -> Result<&str, AppError> {
    let value = header
        .ok_or_else(|| AppError::Unauthorized("Authorization header is missing".to_owned()))?
        .to_str()
        .map_err(|_| malformed_header())?;

    let (scheme, token) = value.split_once(' ').ok_or_else(malformed_header)?;
    if !scheme.eq_ignore_ascii_case("bearer")
        || token.is_empty()
        || token.contains(char::is_whitespace)
    {
        return Err(malformed_header());
    }
    Ok(token)
}

pub fn authorize(user: Option<&User>, required: Role) -> Result<(), AppError> {
    match user {
        None => Err(AppError::Unauthorized("User is not authenticated".to_owned())),
        Some(user) if user.role != required => {
            log::warn!(
                "User {} with role {} denied, {} required",
                user.id,
                user.role.as_str(),
                required.as_str()
            );
            Err(AppError::Forbidden(format!(
                "This action requires the {} role",
                required.as_str()
            )))
        }
        Some(_) => Ok(()),
    }
}

async fn resolve_user(req: &ServiceRequest) -> Result<User, AppError> {
    let token = parse_bearer(req.headers().get(header::AUTHORIZATION))?;
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| AppError::Internal("application state is not registered".to_owned()))?;

    state
        .tokens
        .verify(token)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Token is invalid or expired".to_owned()))
}

pub async fn authenticate(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<EitherBody<impl MessageBody>>, Error> {
    match resolve_user(&req).await {
        Ok(user) => {
            log::debug!("Authenticated user {} for {}", user.id, req.path());
            req.extensions_mut().insert(user);
            next.call(req).await.map(ServiceResponse::map_into_left_body)
        }
        Err(err) => Ok(req.error_response(err).map_into_right_body()),
    }
}

/// Must be wrapped inside [`authenticate`].
pub async fn require_seller(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<EitherBody<impl MessageBody>>, Error> {
    let decision = authorize(req.extensions().get::<User>(), Role::Seller);
    match decision {
        Ok(()) => next.call(req).await.map(ServiceResponse::map_into_left_body),
        Err(err) => Ok(req.error_response(err).map_into_right_body()),
    }
}
