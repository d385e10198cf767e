//! Scoped, parameterised list-query construction and execution.
//!
//! [`ListQuery`] collects WHERE conditions in scoping order (owner scope,
//! fixed filters, request filters), then runs a COUNT plus a page SELECT.
//! Column names are only ever taken from the schema allow-lists; every value
//! is bound.

use anyhow::Result;
use serde::Serialize;
use sqlx::{sqlite::SqliteRow, SqlitePool};

use super::params::ListParams;
use super::schema::FilterSchema;
use super::ValidFilter;

/// One page of results plus the total row count for the scope.
#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
    pub data: Vec<T>,
}

impl<T> Paginated<T> {
    /// Re-shape the page items while keeping the paging envelope.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            total: self.total,
            page: self.page,
            per_page: self.per_page,
            data: self.data.into_iter().map(f).collect(),
        }
    }
}

pub struct ListQuery {
    schema: &'static FilterSchema,
    conditions: Vec<String>,
    binds: Vec<String>,
}

impl ListQuery {
    pub fn new(schema: &'static FilterSchema) -> Self {
        Self {
            schema,
            conditions: Vec::new(),
            binds: Vec::new(),
        }
    }

    /// Restrict to the authenticated caller's rows. Applied before any other
    /// filter; request input cannot override it.
    pub fn scope_owner(mut self, user_id: &str) -> Self {
        self.conditions.push("user_id = ?".to_string());
        self.binds.push(user_id.to_string());
        self
    }

    /// Mandatory equality constraint injected by the calling route,
    /// e.g. all history rows for one task.
    pub fn fixed_eq(mut self, column: &'static str, value: &str) -> Self {
        self.conditions.push(format!("{column} = ?"));
        self.binds.push(value.to_string());
        self
    }

    /// Apply validated request filters.
    pub fn filters(mut self, filters: &[ValidFilter]) -> Self {
        for filter in filters {
            self.push_filter(filter);
        }
        self
    }

    fn push_filter(&mut self, filter: &ValidFilter) {
        let col = filter.column;
        match filter.operator.as_str() {
            "like" => {
                self.conditions.push(format!("{col} LIKE ?"));
                self.binds
                    .push(format!("%{}%", filter.value.as_deref().unwrap_or_default()));
            }
            "in" | "notin" => {
                let values: Vec<String> = filter
                    .value
                    .as_deref()
                    .unwrap_or_default()
                    .split(',')
                    .map(|v| v.trim().to_string())
                    .collect();
                let placeholders = vec!["?"; values.len()].join(", ");
                let keyword = if filter.operator == "in" {
                    "IN"
                } else {
                    "NOT IN"
                };
                self.conditions
                    .push(format!("{col} {keyword} ({placeholders})"));
                self.binds.extend(values);
            }
            "between" => {
                let value = filter.value.as_deref().unwrap_or_default();
                // Arity was validated upstream.
                let (low, high) = value.split_once(',').unwrap_or((value, value));
                self.conditions.push(format!("{col} BETWEEN ? AND ?"));
                self.binds.push(low.trim().to_string());
                self.binds.push(high.trim().to_string());
            }
            "null" => self.conditions.push(format!("{col} IS NULL")),
            "notnull" => self.conditions.push(format!("{col} IS NOT NULL")),
            "ornull" => {
                self.conditions.push(format!("({col} = ? OR {col} IS NULL)"));
                self.binds
                    .push(filter.value.clone().unwrap_or_default());
            }
            // Remaining operators passed the allow-list: =, >, <, >=, <=.
            op => {
                self.conditions.push(format!("{col} {op} ?"));
                self.binds
                    .push(filter.value.clone().unwrap_or_default());
            }
        }
    }

    fn where_sql(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    /// Sort clause: allow-listed fields only; anything else silently falls
    /// back to primary-key ascending.
    fn order_sql(&self, params: &ListParams) -> String {
        match params.sort_by.as_deref() {
            Some(field) if self.schema.is_sortable(field) => {
                format!("{field} {}", params.sort_order.as_sql())
            }
            _ => "id ASC".to_string(),
        }
    }

    /// Run the COUNT + page queries and assemble the result envelope.
    pub async fn run_paged<T>(self, pool: &SqlitePool, params: &ListParams) -> Result<Paginated<T>>
    where
        T: for<'r> sqlx::FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let where_sql = self.where_sql();
        let count_sql = format!("SELECT COUNT(*) FROM {}{}", self.schema.table, where_sql);
        let page_sql = format!(
            "SELECT * FROM {}{} ORDER BY {} LIMIT ? OFFSET ?",
            self.schema.table,
            where_sql,
            self.order_sql(params),
        );

        let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
        for bind in &self.binds {
            count_query = count_query.bind(bind);
        }
        let (total,) = count_query.fetch_one(pool).await?;

        let mut page_query = sqlx::query_as::<_, T>(&page_sql);
        for bind in &self.binds {
            page_query = page_query.bind(bind);
        }
        let data = page_query
            .bind(params.per_page as i64)
            .bind(params.offset())
            .fetch_all(pool)
            .await?;

        Ok(Paginated {
            total,
            page: params.page,
            per_page: params.per_page,
            data,
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
