//! HTTP surface: router assembly and server startup.

pub mod auth;
pub mod error;
pub mod routes;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::AppContext;

/// Assemble the full route table.
pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/v1/health", get(routes::health::health))
        .route("/v1/register", post(routes::auth::register))
        .route("/v1/login", post(routes::auth::login))
        .route("/v1/logout", post(routes::auth::logout))
        .route(
            "/v1/me",
            get(routes::users::me)
                .put(routes::users::update)
                .delete(routes::users::destroy),
        )
        .route(
            "/v1/tasks",
            get(routes::tasks::list).post(routes::tasks::create),
        )
        .route(
            "/v1/tasks/{id}",
            get(routes::tasks::get)
                .put(routes::tasks::update)
                .delete(routes::tasks::destroy),
        )
        .route("/v1/tasks/{id}/history", get(routes::history::list))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// Bind and serve until the process is stopped.
pub async fn serve(ctx: Arc<AppContext>) -> Result<()> {
    let addr = ctx.config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, build_router(ctx))
        .await
        .context("HTTP server exited")?;
    Ok(())
}
