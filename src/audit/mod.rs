//! Change-audit pipeline for task mutations.
//!
//! Invoked explicitly by the task routes after the entity row is saved — an
//! observable post-commit hook rather than ORM magic, so ordering and failure
//! handling stay visible and testable.
//!
//! Creation emits a single record with `field_changed = "created"`; an update
//! emits one record per logically changed attribute (bookkeeping timestamps
//! excluded), with enum attributes recorded by their scalar value. Each
//! record enqueues exactly one webhook delivery.
//!
//! Audit writes are best-effort relative to the already-committed task
//! mutation: a failed write is logged at ERROR and the remaining fields are
//! still recorded, but the mutation's success response stands.

use std::sync::Arc;
use tracing::error;

use crate::storage::{Storage, TaskRow, TaskStatus};
use crate::webhook::WebhookDispatcher;

/// Sentinel field name for the creation record.
pub const FIELD_CREATED: &str = "created";

/// One logically changed attribute, captured as string snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: &'static str,
    pub old: Option<String>,
    pub new: String,
}

/// Diff a task's persisted state against the incoming attribute values.
///
/// Optional text attributes that are cleared snapshot to the empty string;
/// `updated_at`/`created_at` never participate.
pub fn diff_task(
    before: &TaskRow,
    title: &str,
    description: Option<&str>,
    status: TaskStatus,
    due_date: Option<&str>,
) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    if before.title != title {
        changes.push(FieldChange {
            field: "title",
            old: Some(before.title.clone()),
            new: title.to_string(),
        });
    }

    if before.description.as_deref() != description {
        changes.push(FieldChange {
            field: "description",
            old: before.description.clone(),
            new: description.unwrap_or_default().to_string(),
        });
    }

    if before.status != status.as_str() {
        changes.push(FieldChange {
            field: "status",
            old: Some(before.status.clone()),
            new: status.as_str().to_string(),
        });
    }

    if before.due_date.as_deref() != due_date {
        changes.push(FieldChange {
            field: "due_date",
            old: before.due_date.clone(),
            new: due_date.unwrap_or_default().to_string(),
        });
    }

    changes
}

/// Record the creation of `task`: one history row attributed to the owner,
/// old value null, new value the task's title. Enqueues one webhook.
pub async fn record_created(storage: &Storage, webhooks: &Arc<WebhookDispatcher>, task: &TaskRow) {
    match storage
        .insert_history(
            &task.id,
            Some(&task.user_id),
            FIELD_CREATED,
            None,
            &task.title,
        )
        .await
    {
        Ok(row) => webhooks.enqueue(&row),
        Err(e) => error!(
            task_id = %task.id,
            err = %e,
            "failed to write creation audit record"
        ),
    }
}

/// Record an update: one history row per changed field, attributed to the
/// acting user (None for system-driven updates). Each row enqueues one
/// webhook. Returns the number of rows successfully written.
pub async fn record_updated(
    storage: &Storage,
    webhooks: &Arc<WebhookDispatcher>,
    task_id: &str,
    acting_user: Option<&str>,
    changes: &[FieldChange],
) -> usize {
    let mut written = 0;
    for change in changes {
        match storage
            .insert_history(
                task_id,
                acting_user,
                change.field,
                change.old.as_deref(),
                &change.new,
            )
            .await
        {
            Ok(row) => {
                webhooks.enqueue(&row);
                written += 1;
            }
            Err(e) => error!(
                task_id = %task_id,
                field = change.field,
                err = %e,
                "failed to write update audit record"
            ),
        }
    }
    written
}

// ─── Tests ───────────────────────────────────────────────────────────────────
