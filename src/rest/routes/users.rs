// rest/routes/users.rs — profile read, partial update, account deletion.

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::query::ValidationErrors;
use crate::rest::auth::{self, AuthUser};
use crate::rest::error::ApiError;
use crate::rest::routes::auth::{check_password, is_valid_email};
use crate::AppContext;

pub async fn me(AuthUser(user): AuthUser) -> Json<Value> {
    Json(json!({ "data": user.public_json() }))
}

// ─── Update ──────────────────────────────────────────────────────────────────

/// Every field is optional; only provided fields are validated and written.
#[derive(Debug, Deserialize, Default)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub password_confirmation: Option<String>,
}

pub async fn update(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Json(body): Json<UpdateUserRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut errors = ValidationErrors::new();

    let name = body.name.as_deref().map(str::trim);
    if let Some(name) = name {
        if name.is_empty() {
            errors.add("name", "must not be empty");
        }
    }

    let email = body
        .email
        .as_deref()
        .map(|e| e.trim().to_lowercase());
    if let Some(email) = email.as_deref() {
        if !is_valid_email(email) {
            errors.add("email", "must be a valid email address");
        } else if ctx.storage.email_in_use(email, Some(&user.id)).await? {
            errors.add("email", "is already in use");
        }
    }

    if let Some(password) = body.password.as_deref() {
        check_password(&mut errors, password, body.password_confirmation.as_deref());
    }

    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let password_hash = match body.password.as_deref() {
        Some(password) => Some(auth::hash_password(password)?),
        None => None,
    };

    let updated = ctx
        .storage
        .update_user(&user.id, name, email.as_deref(), password_hash.as_deref())
        .await?;

    Ok(Json(json!({
        "message": "User updated successfully.",
        "data": updated.public_json(),
    })))
}

// ─── Delete ──────────────────────────────────────────────────────────────────

/// Removes the account and everything under it: tasks and their histories go
/// with the user via foreign-key cascade, and all issued tokens are revoked.
pub async fn destroy(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Value>, ApiError> {
    let revoked = ctx.storage.revoke_user_tokens(&user.id).await?;
    ctx.storage.delete_user(&user.id).await?;
    info!(user_id = %user.id, tokens_revoked = revoked, "user account deleted");

    Ok(Json(json!({ "message": "User deleted successfully." })))
}
