use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use taskd::{config::AppConfig, rest, storage::Storage, webhook::WebhookDispatcher, AppContext};

#[derive(Parser)]
#[command(name = "taskd", about = "taskd — task tracking REST service", version)]
struct Args {
    /// Path to a TOML config file
    #[arg(long, env = "TASKD_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// HTTP listen port (overrides the config file)
    #[arg(long, env = "TASKD_PORT")]
    port: Option<u16>,

    /// Bind address (default: 127.0.0.1; use 0.0.0.0 for LAN access)
    #[arg(long, env = "TASKD_BIND")]
    bind_address: Option<String>,

    /// Data directory for the SQLite database
    #[arg(long, env = "TASKD_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TASKD_LOG")]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Init once — must happen before any tracing calls.
    let log_level = args.log.as_deref().unwrap_or("info").to_owned();
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .compact()
        .init();

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind_address {
        config.server.bind_address = bind;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    let config = Arc::new(config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.data_dir.display(),
        "starting taskd"
    );

    let storage = Arc::new(
        Storage::new_with_slow_query(
            &config.data_dir,
            config.observability.slow_query_threshold_ms,
        )
        .await?,
    );
    let webhooks = WebhookDispatcher::spawn(&config.webhook)?;

    let ctx = Arc::new(AppContext::new(config, storage, webhooks));
    rest::serve(ctx).await
}
