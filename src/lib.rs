//! taskd — multi-tenant task tracking service.
//!
//! A small REST API for per-user task management with a field-level audit
//! trail. Every mutation of a task is diffed against its persisted state and
//! recorded as history rows, each of which is pushed to an optional webhook
//! endpoint. List endpoints share one filter/sort/paginate engine driven by
//! per-entity allow-list schemas.

pub mod audit;
pub mod config;
pub mod query;
pub mod rest;
pub mod storage;
pub mod webhook;

use std::sync::Arc;
use std::time::Instant;

use config::AppConfig;
use storage::Storage;
use webhook::WebhookDispatcher;

/// Shared state handed to every request handler.
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub storage: Arc<Storage>,
    pub webhooks: Arc<WebhookDispatcher>,
    pub started_at: Instant,
}

impl AppContext {
    pub fn new(
        config: Arc<AppConfig>,
        storage: Arc<Storage>,
        webhooks: Arc<WebhookDispatcher>,
    ) -> Self {
        Self {
            config,
            storage,
            webhooks,
            started_at: Instant::now(),
        }
    }
}
