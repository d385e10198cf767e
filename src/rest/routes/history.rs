// rest/routes/history.rs — audit-trail listing for one task.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::query::{schema, validate_filters, ListParams, ListQuery};
use crate::rest::auth::AuthUser;
use crate::rest::error::ApiError;
use crate::storage::TaskHistoryRow;
use crate::AppContext;

/// List the history rows of one task the caller owns. The ownership check
/// happens on the parent task, so a foreign task id reads as absent.
pub async fn list(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<Value>, ApiError> {
    let task = ctx
        .storage
        .get_task_owned(&id, &user.id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let params = ListParams::from_pairs(&pairs);
    let filters =
        validate_filters(schema::task_histories(), &params).map_err(ApiError::Validation)?;

    let page = ListQuery::new(schema::task_histories())
        .fixed_eq("task_id", &task.id)
        .filters(&filters)
        .run_paged::<TaskHistoryRow>(&ctx.storage.pool(), &params)
        .await?;

    Ok(Json(json!({
        "total": page.total,
        "page": page.page,
        "per_page": page.per_page,
        "data": page.data,
    })))
}
