// rest/routes/tasks.rs — task CRUD, owner-scoped throughout.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::audit;
use crate::query::{schema, validate_filters, ListParams, ListQuery, ValidationErrors};
use crate::rest::auth::AuthUser;
use crate::rest::error::ApiError;
use crate::storage::{TaskHistoryRow, TaskRow, TaskStatus, UserRow};
use crate::AppContext;

const MAX_TITLE_LEN: usize = 255;

// ─── Payload validation ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
pub struct TaskRequest {
    pub title: Option<String>,
    /// Absent and explicit-null are distinct on update: an absent key keeps
    /// the stored value, `null` clears it.
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<String>>,
}

/// Wrap a present value (including `null`) in `Some`; `#[serde(default)]`
/// keeps absent keys as `None`.
fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// Validated task attributes, ready to persist.
#[derive(Debug)]
struct TaskAttrs {
    title: String,
    description: Option<String>,
    status: TaskStatus,
    due_date: Option<String>,
}

/// Validate a create/update payload, aggregating every failure.
///
/// `current` is the task being updated (None on create): attributes the
/// payload omits resolve to their stored values rather than being cleared.
fn validate_payload(
    body: &TaskRequest,
    current: Option<&TaskRow>,
) -> Result<TaskAttrs, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    let title = match body.title.as_deref() {
        Some(raw) => raw.trim().to_string(),
        None => current.map(|t| t.title.clone()).unwrap_or_default(),
    };
    if title.is_empty() {
        errors.add("title", "is required");
    } else if title.len() > MAX_TITLE_LEN {
        errors.add("title", format!("must not exceed {MAX_TITLE_LEN} characters"));
    }

    let fallback_status = current
        .and_then(|t| TaskStatus::parse(&t.status))
        .unwrap_or(TaskStatus::Pending);
    let status = match body.status.as_deref() {
        None => fallback_status,
        Some(raw) => match TaskStatus::parse(raw) {
            Some(status) => status,
            None => {
                errors.add(
                    "status",
                    format!("must be one of: {}", TaskStatus::accepted_values()),
                );
                fallback_status
            }
        },
    };

    let description = match &body.description {
        Some(explicit) => explicit
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string),
        None => current.and_then(|t| t.description.clone()),
    };

    let due_date = match &body.due_date {
        Some(explicit) => explicit
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string),
        None => current.and_then(|t| t.due_date.clone()),
    };
    if let Some(date) = due_date.as_deref() {
        if !crate::query::is_valid_date(date) {
            errors.add("due_date", "must be a valid date");
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(TaskAttrs {
        title,
        description,
        status,
        due_date,
    })
}

// ─── Eager loading ───────────────────────────────────────────────────────────

/// Render tasks as JSON, embedding the relations named in `with`.
///
/// Supported relation names: `histories` (audit rows, oldest first) and
/// `user` (the owner's public profile). Unknown names are ignored.
async fn embed_relations(
    ctx: &AppContext,
    owner: &UserRow,
    tasks: Vec<TaskRow>,
    with: &[String],
) -> Result<Vec<Value>, ApiError> {
    let want_histories = with.iter().any(|w| w == "histories");
    let want_user = with.iter().any(|w| w == "user");

    let mut histories_by_task: HashMap<String, Vec<TaskHistoryRow>> = HashMap::new();
    if want_histories {
        let ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
        for row in ctx.storage.histories_for_tasks(&ids).await? {
            histories_by_task
                .entry(row.task_id.clone())
                .or_default()
                .push(row);
        }
    }

    let owner_json = want_user.then(|| owner.public_json());

    let mut out = Vec::with_capacity(tasks.len());
    for task in tasks {
        let mut value = serde_json::to_value(&task)
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("serializing task: {e}")))?;
        if let Value::Object(map) = &mut value {
            if want_histories {
                let rows = histories_by_task.remove(&task.id).unwrap_or_default();
                map.insert(
                    "histories".to_string(),
                    serde_json::to_value(rows)
                        .map_err(|e| ApiError::Internal(anyhow::anyhow!("serializing histories: {e}")))?,
                );
            }
            if let Some(owner_json) = &owner_json {
                map.insert("user".to_string(), owner_json.clone());
            }
        }
        out.push(value);
    }
    Ok(out)
}

// ─── Handlers ────────────────────────────────────────────────────────────────

pub async fn list(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<Value>, ApiError> {
    let params = ListParams::from_pairs(&pairs);
    let filters = validate_filters(schema::tasks(), &params).map_err(ApiError::Validation)?;

    let page = ListQuery::new(schema::tasks())
        .scope_owner(&user.id)
        .filters(&filters)
        .run_paged::<TaskRow>(&ctx.storage.pool(), &params)
        .await?;
    debug!(user_id = %user.id, total = page.total, "listed tasks");

    let data = embed_relations(&ctx, &user, page.data, &params.with).await?;
    Ok(Json(json!({
        "total": page.total,
        "page": page.page,
        "per_page": page.per_page,
        "data": data,
    })))
}

pub async fn create(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Json(body): Json<TaskRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let attrs = validate_payload(&body, None)?;

    let task = ctx
        .storage
        .create_task(
            &user.id,
            &attrs.title,
            attrs.description.as_deref(),
            attrs.status,
            attrs.due_date.as_deref(),
        )
        .await?;

    audit::record_created(&ctx.storage, &ctx.webhooks, &task).await;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Task created successfully.", "data": task })),
    ))
}

pub async fn get(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let task = ctx
        .storage
        .get_task_owned(&id, &user.id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(json!({ "data": task })))
}

pub async fn update(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(body): Json<TaskRequest>,
) -> Result<Json<Value>, ApiError> {
    let before = ctx
        .storage
        .get_task_owned(&id, &user.id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let attrs = validate_payload(&body, Some(&before))?;

    let changes = audit::diff_task(
        &before,
        &attrs.title,
        attrs.description.as_deref(),
        attrs.status,
        attrs.due_date.as_deref(),
    );

    let task = ctx
        .storage
        .update_task(
            &before.id,
            &attrs.title,
            attrs.description.as_deref(),
            attrs.status,
            attrs.due_date.as_deref(),
        )
        .await?;

    let written = audit::record_updated(
        &ctx.storage,
        &ctx.webhooks,
        &task.id,
        Some(&user.id),
        &changes,
    )
    .await;
    debug!(task_id = %task.id, changes = written, "task updated");

    Ok(Json(json!({ "message": "Task updated successfully.", "data": task })))
}

pub async fn destroy(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let deleted = ctx.storage.delete_task_owned(&id, &user.id).await?;
    if !deleted {
        return Err(ApiError::NotFound);
    }
    Ok(StatusCode::NO_CONTENT)
}
