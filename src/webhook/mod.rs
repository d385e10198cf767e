//! Asynchronous webhook dispatch for task-mutation events.
//!
//! Every audit record produced by the change-audit pipeline enqueues one
//! delivery job here. A single worker task drains the queue out-of-band from
//! the HTTP request cycle, so webhook latency or failure never delays or
//! fails the originating API call.
//!
//! Delivery: HTTP POST of `{event, timestamp, data}` to the configured URL
//! with a bounded timeout. A failed delivery is re-enqueued exactly once
//! after a fixed delay, then abandoned with a WARN log. Receivers must treat
//! payloads as idempotent — a retry can deliver the same record twice.

use anyhow::Result;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::WebhookConfig;
use crate::storage::TaskHistoryRow;

/// Event name carried in every payload.
pub const EVENT_TASK_UPDATED: &str = "task_updated";

#[derive(Debug)]
struct WebhookJob {
    payload: Value,
    attempt: u32,
}

/// Delivery counters, exposed for tests and diagnostics.
#[derive(Debug, Default)]
pub struct WebhookStats {
    pub enqueued: AtomicU64,
    pub delivered: AtomicU64,
    pub retried: AtomicU64,
    pub abandoned: AtomicU64,
}

pub struct WebhookDispatcher {
    tx: mpsc::UnboundedSender<WebhookJob>,
    target_url: Option<String>,
    stats: Arc<WebhookStats>,
}

impl WebhookDispatcher {
    /// Create the dispatcher and spawn its worker task.
    ///
    /// When no target URL is configured the worker is not started and
    /// [`enqueue`](Self::enqueue) becomes a logged no-op.
    pub fn spawn(config: &WebhookConfig) -> Result<Arc<Self>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(WebhookStats::default());

        match &config.target_url {
            Some(url) => {
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(config.timeout_secs))
                    .build()?;
                info!(url = %url, "webhook dispatch enabled");
                tokio::spawn(run_worker(
                    rx,
                    client,
                    url.clone(),
                    tx.clone(),
                    Duration::from_secs(config.retry_delay_secs),
                    Arc::clone(&stats),
                ));
            }
            None => {
                info!("webhook target URL not configured — dispatch disabled");
                drop(rx);
            }
        }

        Ok(Arc::new(Self {
            tx,
            target_url: config.target_url.clone(),
            stats,
        }))
    }

    /// Schedule one delivery for an audit record. Fire-and-forget: the caller
    /// never waits on, or learns about, the delivery outcome.
    pub fn enqueue(&self, history: &TaskHistoryRow) {
        if self.target_url.is_none() {
            debug!(
                history_id = %history.id,
                "webhook target URL not set — skipping dispatch"
            );
            return;
        }

        let payload = json!({
            "event": EVENT_TASK_UPDATED,
            "timestamp": Utc::now().to_rfc3339(),
            "data": history,
        });
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        if self
            .tx
            .send(WebhookJob {
                payload,
                attempt: 0,
            })
            .is_err()
        {
            warn!(history_id = %history.id, "webhook worker gone — event dropped");
        }
    }

    pub fn stats(&self) -> &WebhookStats {
        &self.stats
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<WebhookJob>,
    client: reqwest::Client,
    url: String,
    tx: mpsc::UnboundedSender<WebhookJob>,
    retry_delay: Duration,
    stats: Arc<WebhookStats>,
) {
    while let Some(job) = rx.recv().await {
        match deliver(&client, &url, &job.payload).await {
            Ok(()) => {
                stats.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(attempt = job.attempt, "webhook delivered");
            }
            Err(e) if job.attempt == 0 => {
                stats.retried.fetch_add(1, Ordering::Relaxed);
                warn!(
                    err = %e,
                    delay_s = retry_delay.as_secs(),
                    "webhook delivery failed — scheduling one retry"
                );
                let tx = tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(retry_delay).await;
                    let _ = tx.send(WebhookJob {
                        payload: job.payload,
                        attempt: 1,
                    });
                });
            }
            Err(e) => {
                stats.abandoned.fetch_add(1, Ordering::Relaxed);
                warn!(err = %e, "webhook delivery failed after retry — abandoning");
            }
        }
    }
}

async fn deliver(client: &reqwest::Client, url: &str, payload: &Value) -> Result<()> {
    client
        .post(url)
        .json(payload)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn history_row() -> TaskHistoryRow {
        TaskHistoryRow {
            id: "h1".to_string(),
            task_id: "t1".to_string(),
            user_id: Some("u1".to_string()),
            field_changed: "status".to_string(),
            old_value: Some("pending".to_string()),
            new_value: "completed".to_string(),
            changed_at: Utc::now().to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn enqueue_without_url_is_a_noop() {
        let dispatcher = WebhookDispatcher::spawn(&WebhookConfig::default()).expect("spawn");
        dispatcher.enqueue(&history_row());
        assert_eq!(dispatcher.stats().enqueued.load(Ordering::Relaxed), 0);
        assert_eq!(dispatcher.stats().delivered.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn enqueue_with_url_counts_jobs() {
        let config = WebhookConfig {
            target_url: Some("http://127.0.0.1:1/unreachable".to_string()),
            timeout_secs: 1,
            retry_delay_secs: 1,
        };
        let dispatcher = WebhookDispatcher::spawn(&config).expect("spawn");
        dispatcher.enqueue(&history_row());
        assert_eq!(dispatcher.stats().enqueued.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn payload_shape() {
        let history = history_row();
        let payload = json!({
            "event": EVENT_TASK_UPDATED,
            "timestamp": Utc::now().to_rfc3339(),
            "data": &history,
        });
        assert_eq!(payload["event"], "task_updated");
        assert_eq!(payload["data"]["field_changed"], "status");
        assert_eq!(payload["data"]["old_value"], "pending");
    }
}
