// rest/routes/auth.rs — registration, login, logout.

use axum::{extract::State, http::HeaderMap, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::query::ValidationErrors;
use crate::rest::auth::{self, bearer_token};
use crate::rest::error::ApiError;
use crate::AppContext;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 8;
const MAX_FIELD_LEN: usize = 255;

/// Loose structural email check — real verification is out of scope.
pub(crate) fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && domain.contains('.') && !email.contains(' ')
        }
        None => false,
    }
}

/// Validate a password + confirmation pair into `errors`.
pub(crate) fn check_password(
    errors: &mut ValidationErrors,
    password: &str,
    confirmation: Option<&str>,
) {
    if password.len() < MIN_PASSWORD_LEN {
        errors.add(
            "password",
            format!("must be at least {MIN_PASSWORD_LEN} characters"),
        );
    }
    if confirmation != Some(password) {
        errors.add("password", "confirmation does not match");
    }
}

// ─── Register ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub password_confirmation: Option<String>,
}

pub async fn register(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let mut errors = ValidationErrors::new();

    let name = body.name.as_deref().unwrap_or("").trim();
    if name.is_empty() {
        errors.add("name", "is required");
    } else if name.len() > MAX_FIELD_LEN {
        errors.add("name", format!("must not exceed {MAX_FIELD_LEN} characters"));
    }

    let email = body.email.as_deref().unwrap_or("").trim().to_lowercase();
    if email.is_empty() {
        errors.add("email", "is required");
    } else if !is_valid_email(&email) || email.len() > MAX_FIELD_LEN {
        errors.add("email", "must be a valid email address");
    } else if ctx.storage.email_in_use(&email, None).await? {
        errors.add("email", "is already in use");
    }

    match body.password.as_deref() {
        None => errors.add("password", "is required"),
        Some(password) => {
            check_password(&mut errors, password, body.password_confirmation.as_deref())
        }
    }

    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let password_hash = auth::hash_password(body.password.as_deref().unwrap_or_default())?;
    let user = ctx.storage.create_user(name, &email, &password_hash).await?;
    info!(user_id = %user.id, "user registered");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "User registered successfully.",
            "data": user.public_json(),
        })),
    ))
}

// ─── Login ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

pub async fn login(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut errors = ValidationErrors::new();
    if body.email.as_deref().unwrap_or("").is_empty() {
        errors.add("email", "is required");
    }
    if body.password.as_deref().unwrap_or("").is_empty() {
        errors.add("password", "is required");
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let email = body.email.as_deref().unwrap_or_default().trim().to_lowercase();
    let password = body.password.as_deref().unwrap_or_default();

    // Same response for unknown email and wrong password.
    let user = match ctx.storage.get_user_by_email(&email).await? {
        Some(user) if auth::verify_password(password, &user.password_hash) => user,
        _ => return Err(ApiError::Unauthorized),
    };

    let token = auth::generate_token();
    ctx.storage
        .create_token(&user.id, &auth::token_digest(&token))
        .await?;
    info!(user_id = %user.id, "login succeeded");

    Ok(Json(json!({
        "message": "Login successful.",
        "access_token": token,
        "token_type": "Bearer",
        "user": user.public_json(),
    })))
}

// ─── Logout ──────────────────────────────────────────────────────────────────

/// Reachable without the auth extractor so a missing token yields 400, not 401.
pub async fn logout(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let Some(token) = bearer_token(&headers) else {
        return Err(ApiError::BadRequest("No active token.".to_string()));
    };

    let deleted = ctx
        .storage
        .delete_token(&auth::token_digest(token))
        .await?;
    if !deleted {
        return Err(ApiError::BadRequest("No active token.".to_string()));
    }

    Ok(Json(json!({ "message": "Logged out successfully." })))
}
