use anyhow::{Context as _, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr};
use uuid::Uuid;

/// Default timeout for individual SQLite queries.
/// Prevents hung queries from blocking the server indefinitely.
const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Execute a future with the standard query timeout.
async fn with_timeout<T>(fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!(
            "database query timed out after {}s",
            QUERY_TIMEOUT.as_secs()
        )),
    }
}

// ─── TaskStatus ──────────────────────────────────────────────────────────────

/// Task lifecycle status. Stored in SQLite by its snake_case scalar value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Canceled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Canceled,
    ];

    /// Scalar value used in the database and in audit records.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<TaskStatus> {
        Self::ALL.iter().copied().find(|v| v.as_str() == s)
    }

    /// Comma-separated list of accepted values, for validation messages.
    pub fn accepted_values() -> String {
        Self::ALL
            .iter()
            .map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// ─── Rows ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: String,
    pub updated_at: String,
}

impl UserRow {
    /// JSON view safe to return to callers (password hash excluded).
    pub fn public_json(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "email": self.email,
            "created_at": self.created_at,
            "updated_at": self.updated_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TaskRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub due_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Audit row capturing one field-level change. Append-only — never updated
/// or deleted outside of task cascade.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TaskHistoryRow {
    pub id: String,
    pub task_id: String,
    pub user_id: Option<String>,
    pub field_changed: String,
    pub old_value: Option<String>,
    pub new_value: String,
    pub changed_at: String,
}

// ─── Storage ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        Self::new_with_slow_query(data_dir, 0).await
    }

    /// Create storage with slow-query logging enabled.
    ///
    /// `slow_query_ms` is the threshold in milliseconds — queries exceeding it
    /// are logged at WARN level. Set to 0 to disable slow-query logging.
    pub async fn new_with_slow_query(data_dir: &Path, slow_query_ms: u64) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("taskd.db");
        let mut opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .foreign_keys(true)
                .create_if_missing(true);

        if slow_query_ms > 0 {
            use sqlx::ConnectOptions as _;
            opts = opts.log_slow_statements(
                log::LevelFilter::Warn,
                std::time::Duration::from_millis(slow_query_ms),
            );
        }

        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Return a clone of the connection pool (cheap — Arc-backed).
    /// Used by the query engine to run dynamically built list queries.
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        sqlx::migrate!("src/storage/migrations")
            .run(pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }

    // ─── Users ──────────────────────────────────────────────────────────────

    pub async fn create_user(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<UserRow> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO users (id, name, email, password_hash, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(email)
        .bind(password_hash)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        self.get_user(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("user not found after insert"))
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<UserRow>> {
        Ok(sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        Ok(sqlx::query_as("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// True when `email` belongs to a user other than `exclude_id` (or to
    /// anyone when `exclude_id` is None). Drives the uniqueness validation.
    pub async fn email_in_use(&self, email: &str, exclude_id: Option<&str>) -> Result<bool> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM users WHERE email = ? AND id != COALESCE(?, '')")
                .bind(email)
                .bind(exclude_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0 > 0)
    }

    /// Partial update: only the provided fields are written.
    pub async fn update_user(
        &self,
        id: &str,
        name: Option<&str>,
        email: Option<&str>,
        password_hash: Option<&str>,
    ) -> Result<UserRow> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE users SET
                 name = COALESCE(?, name),
                 email = COALESCE(?, email),
                 password_hash = COALESCE(?, password_hash),
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(name)
        .bind(email)
        .bind(password_hash)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.get_user(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("user not found after update"))
    }

    /// Delete a user. Tokens, tasks and task histories cascade via foreign keys.
    pub async fn delete_user(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ─── Access tokens ──────────────────────────────────────────────────────

    /// Persist a new access token digest. Only the SHA-256 hex of the token
    /// is stored; the plaintext token exists solely in the login response.
    pub async fn create_token(&self, user_id: &str, token_hash: &str) -> Result<()> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO api_tokens (id, user_id, token_hash, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(token_hash)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Resolve a token digest to its owning user.
    pub async fn find_token_user(&self, token_hash: &str) -> Result<Option<UserRow>> {
        Ok(sqlx::query_as(
            "SELECT u.* FROM users u
             JOIN api_tokens t ON t.user_id = u.id
             WHERE t.token_hash = ?",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Delete one token by digest. Returns false when no such token existed.
    pub async fn delete_token(&self, token_hash: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM api_tokens WHERE token_hash = ?")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Revoke every token belonging to `user_id`.
    pub async fn revoke_user_tokens(&self, user_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM api_tokens WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ─── Tasks ──────────────────────────────────────────────────────────────

    pub async fn create_task(
        &self,
        user_id: &str,
        title: &str,
        description: Option<&str>,
        status: TaskStatus,
        due_date: Option<&str>,
    ) -> Result<TaskRow> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO tasks (id, user_id, title, description, status, due_date, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(title)
        .bind(description)
        .bind(status.as_str())
        .bind(due_date)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        self.get_task_owned(&id, user_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("task not found after insert"))
    }

    /// Fetch a task only when it belongs to `user_id`. Cross-tenant lookups
    /// come back None so the caller answers 404, never 403.
    pub async fn get_task_owned(&self, id: &str, user_id: &str) -> Result<Option<TaskRow>> {
        Ok(
            sqlx::query_as("SELECT * FROM tasks WHERE id = ? AND user_id = ?")
                .bind(id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn update_task(
        &self,
        id: &str,
        title: &str,
        description: Option<&str>,
        status: TaskStatus,
        due_date: Option<&str>,
    ) -> Result<TaskRow> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE tasks SET title = ?, description = ?, status = ?, due_date = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(title)
        .bind(description)
        .bind(status.as_str())
        .bind(due_date)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?)
    }

    /// Delete a task only when owned by `user_id`. Histories cascade.
    pub async fn delete_task_owned(&self, id: &str, user_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fetch histories for a set of task ids (eager loading for list pages).
    pub async fn histories_for_tasks(&self, task_ids: &[String]) -> Result<Vec<TaskHistoryRow>> {
        if task_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; task_ids.len()].join(", ");
        let sql = format!(
            "SELECT * FROM task_histories WHERE task_id IN ({placeholders}) ORDER BY changed_at ASC"
        );
        let mut query = sqlx::query_as(&sql);
        for id in task_ids {
            query = query.bind(id);
        }
        with_timeout(async { Ok(query.fetch_all(&self.pool).await?) }).await
    }

    // ─── Task histories ─────────────────────────────────────────────────────

    /// Append one immutable audit row.
    pub async fn insert_history(
        &self,
        task_id: &str,
        user_id: Option<&str>,
        field_changed: &str,
        old_value: Option<&str>,
        new_value: &str,
    ) -> Result<TaskHistoryRow> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO task_histories (id, task_id, user_id, field_changed, old_value, new_value, changed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(task_id)
        .bind(user_id)
        .bind(field_changed)
        .bind(old_value)
        .bind(new_value)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(sqlx::query_as("SELECT * FROM task_histories WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn count_histories_for_task(&self, task_id: &str) -> Result<u64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM task_histories WHERE task_id = ?")
            .bind(task_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 as u64)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
