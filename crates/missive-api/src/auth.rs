use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info};
use uuid::Uuid;

use missive_db::{Database, format_timestamp};
use missive_guard::AdmissionPipeline;
use missive_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};
use missive_types::models::Role;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub admission: AdmissionPipeline,
    /// Honour `X-Forwarded-For` when identifying clients for rate limiting.
    pub trust_proxy: bool,
    /// Role given to newly registered accounts.
    pub default_role: Role,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Validate input
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(ApiError::BadRequest("username must be 3 to 32 characters"));
    }
    if req.password.len() < 8 {
        return Err(ApiError::BadRequest("password must be at least 8 characters"));
    }

    // Check if username is taken
    if state.db.get_user_by_username(&req.username)?.is_some() {
        return Err(ApiError::Conflict("username already taken"));
    }

    let password_hash = hash_password(&req.password)?;
    let user_id = Uuid::new_v4();

    state.db.create_user(
        &user_id.to_string(),
        &req.username,
        &password_hash,
        state.default_role.as_str(),
        &format_timestamp(chrono::Utc::now()),
    )?;

    let token = create_token(&state.jwt_secret, user_id, &req.username, state.default_role)
        .map_err(|e| {
            error!("Token encoding failed: {}", e);
            ApiError::Internal
        })?;

    info!("Registered {} ({}) as {}", req.username, user_id, state.default_role);

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .get_user_by_username(&req.username)?
        .ok_or(ApiError::InvalidCredentials)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password).map_err(|e| {
        error!("Stored hash for {} is unreadable: {}", user.username, e);
        ApiError::Internal
    })?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::InvalidCredentials)?;

    let user_id: Uuid = user.id.parse().map_err(|_| ApiError::Internal)?;
    let role: Role = user.role.parse().map_err(|e| {
        error!("User {} has {}", user.username, e);
        ApiError::Internal
    })?;

    let token = create_token(&state.jwt_secret, user_id, &user.username, role).map_err(|e| {
        error!("Token encoding failed: {}", e);
        ApiError::Internal
    })?;

    Ok(Json(LoginResponse {
        user_id,
        username: user.username,
        role,
        token,
    }))
}

/// Argon2id hash in PHC string form.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}

/// Signs a 30-day HS256 token for the given user.
pub fn create_token(secret: &str, user_id: Uuid, username: &str, role: Role) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        role,
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
