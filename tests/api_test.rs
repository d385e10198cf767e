//! End-to-end tests for the REST API.
//! Spins up the full server on a random port and drives it with a real
//! HTTP client, covering auth, task CRUD, filtering, audit history, and
//! webhook delivery.

use std::sync::Arc;

use serde_json::{json, Value};
use taskd::{
    config::AppConfig, rest, storage::Storage, webhook::WebhookDispatcher, AppContext,
};
use tempfile::TempDir;

/// Find a free local port by binding to port 0.
fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Boot a full server on a random port; returns its base URL.
async fn spawn_server(dir: &TempDir, webhook_url: Option<String>) -> String {
    let port = find_free_port();
    let mut config = AppConfig::default();
    config.data_dir = dir.path().to_path_buf();
    config.server.port = port;
    config.webhook.target_url = webhook_url;
    config.webhook.timeout_secs = 2;
    config.webhook.retry_delay_secs = 1;
    let config = Arc::new(config);

    let storage = Arc::new(Storage::new(dir.path()).await.unwrap());
    let webhooks = WebhookDispatcher::spawn(&config.webhook).unwrap();
    let ctx = Arc::new(AppContext::new(config, storage, webhooks));

    tokio::spawn(async move {
        rest::serve(ctx).await.unwrap();
    });

    let base = format!("http://127.0.0.1:{port}");
    // Wait for the listener to come up.
    let client = reqwest::Client::new();
    for _ in 0..50 {
        if client.get(format!("{base}/v1/health")).send().await.is_ok() {
            return base;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("server did not start");
}

/// Register a user and log in; returns the access token.
async fn register_and_login(client: &reqwest::Client, base: &str, email: &str) -> String {
    let resp = client
        .post(format!("{base}/v1/register"))
        .json(&json!({
            "name": "Test User",
            "email": email,
            "password": "secret-password",
            "password_confirmation": "secret-password",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let resp = client
        .post(format!("{base}/v1/login"))
        .json(&json!({ "email": email, "password": "secret-password" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    body["access_token"].as_str().unwrap().to_string()
}

async fn create_task(
    client: &reqwest::Client,
    base: &str,
    token: &str,
    payload: Value,
) -> Value {
    let resp = client
        .post(format!("{base}/v1/tasks"))
        .bearer_auth(token)
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    body["data"].clone()
}

// ─── Auth ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn register_login_me_flow() {
    let dir = TempDir::new().unwrap();
    let base = spawn_server(&dir, None).await;
    let client = reqwest::Client::new();

    let token = register_and_login(&client, &base, "alice@example.com").await;

    let resp = client
        .get(format!("{base}/v1/me"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["email"], "alice@example.com");
    assert!(body["data"].get("password_hash").is_none());
}

#[tokio::test]
async fn register_validation_aggregates_all_failures() {
    let dir = TempDir::new().unwrap();
    let base = spawn_server(&dir, None).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/v1/register"))
        .json(&json!({ "email": "not-an-email", "password": "short" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Validation failed.");
    let errors = body["errors"].as_object().unwrap();
    assert!(errors.contains_key("name"));
    assert!(errors.contains_key("email"));
    assert!(errors.contains_key("password"));
}

#[tokio::test]
async fn duplicate_email_rejected() {
    let dir = TempDir::new().unwrap();
    let base = spawn_server(&dir, None).await;
    let client = reqwest::Client::new();

    register_and_login(&client, &base, "bob@example.com").await;

    let resp = client
        .post(format!("{base}/v1/register"))
        .json(&json!({
            "name": "Impostor",
            "email": "bob@example.com",
            "password": "another-password",
            "password_confirmation": "another-password",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);
    let body: Value = resp.json().await.unwrap();
    assert!(body["errors"]["email"][0]
        .as_str()
        .unwrap()
        .contains("already in use"));
}

#[tokio::test]
async fn wrong_password_and_missing_token_rejected() {
    let dir = TempDir::new().unwrap();
    let base = spawn_server(&dir, None).await;
    let client = reqwest::Client::new();

    register_and_login(&client, &base, "carol@example.com").await;

    let resp = client
        .post(format!("{base}/v1/login"))
        .json(&json!({ "email": "carol@example.com", "password": "wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(format!("{base}/v1/tasks"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(format!("{base}/v1/tasks"))
        .bearer_auth("0000000000000000000000000000000000000000000000000000000000000000")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn logout_invalidates_token() {
    let dir = TempDir::new().unwrap();
    let base = spawn_server(&dir, None).await;
    let client = reqwest::Client::new();

    // Logout without a token is a bad request, not unauthorized.
    let resp = client
        .post(format!("{base}/v1/logout"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let token = register_and_login(&client, &base, "dave@example.com").await;

    let resp = client
        .post(format!("{base}/v1/logout"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(format!("{base}/v1/me"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

// ─── Task CRUD + audit trail ─────────────────────────────────────────────────

#[tokio::test]
async fn task_creation_writes_created_history() {
    let dir = TempDir::new().unwrap();
    let base = spawn_server(&dir, None).await;
    let client = reqwest::Client::new();
    let token = register_and_login(&client, &base, "erin@example.com").await;

    let task = create_task(&client, &base, &token, json!({ "title": "Ship release" })).await;
    assert_eq!(task["status"], "pending");
    let id = task["id"].as_str().unwrap();

    let resp = client
        .get(format!("{base}/v1/tasks/{id}/history"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["total"], 1);
    assert_eq!(body["data"][0]["field_changed"], "created");
    assert_eq!(body["data"][0]["new_value"], "Ship release");
    assert_eq!(body["data"][0]["old_value"], Value::Null);
}

#[tokio::test]
async fn update_records_one_history_row_per_changed_field() {
    let dir = TempDir::new().unwrap();
    let base = spawn_server(&dir, None).await;
    let client = reqwest::Client::new();
    let token = register_and_login(&client, &base, "frank@example.com").await;

    let task = create_task(&client, &base, &token, json!({ "title": "Draft" })).await;
    let id = task["id"].as_str().unwrap();

    // Change title and status in one request: two rows plus the created row.
    let resp = client
        .put(format!("{base}/v1/tasks/{id}"))
        .bearer_auth(&token)
        .json(&json!({ "title": "Final", "status": "in_progress" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = client
        .get(format!("{base}/v1/tasks/{id}/history"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["total"], 3);

    let fields: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|h| h["field_changed"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"created"));
    assert!(fields.contains(&"title"));
    assert!(fields.contains(&"status"));

    let title_row = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|h| h["field_changed"] == "title")
        .unwrap();
    assert_eq!(title_row["old_value"], "Draft");
    assert_eq!(title_row["new_value"], "Final");
}

#[tokio::test]
async fn partial_update_keeps_omitted_attributes() {
    let dir = TempDir::new().unwrap();
    let base = spawn_server(&dir, None).await;
    let client = reqwest::Client::new();
    let token = register_and_login(&client, &base, "heidi@example.com").await;

    let task = create_task(
        &client,
        &base,
        &token,
        json!({
            "title": "Draft",
            "description": "First pass",
            "due_date": "2026-10-01",
        }),
    )
    .await;
    let id = task["id"].as_str().unwrap();

    // Only the title is sent: description and due_date must survive.
    let resp = client
        .put(format!("{base}/v1/tasks/{id}"))
        .bearer_auth(&token)
        .json(&json!({ "title": "Final" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["description"], "First pass");
    assert_eq!(body["data"]["due_date"], "2026-10-01");

    // One changed attribute, so exactly one row beyond the created one.
    let body: Value = client
        .get(format!("{base}/v1/tasks/{id}/history"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["total"], 2);

    // An explicit null still clears, and that clear is recorded.
    let resp = client
        .put(format!("{base}/v1/tasks/{id}"))
        .bearer_auth(&token)
        .json(&json!({ "description": null }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert!(body["data"]["description"].is_null());

    let body: Value = client
        .get(format!("{base}/v1/tasks/{id}/history"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["total"], 3);
}

#[tokio::test]
async fn noop_update_records_nothing() {
    let dir = TempDir::new().unwrap();
    let base = spawn_server(&dir, None).await;
    let client = reqwest::Client::new();
    let token = register_and_login(&client, &base, "grace@example.com").await;

    let task = create_task(
        &client,
        &base,
        &token,
        json!({ "title": "Stable", "status": "completed" }),
    )
    .await;
    let id = task["id"].as_str().unwrap();

    let resp = client
        .put(format!("{base}/v1/tasks/{id}"))
        .bearer_auth(&token)
        .json(&json!({ "title": "Stable", "status": "completed" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = client
        .get(format!("{base}/v1/tasks/{id}/history"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    // Only the creation row.
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn delete_returns_no_content_then_not_found() {
    let dir = TempDir::new().unwrap();
    let base = spawn_server(&dir, None).await;
    let client = reqwest::Client::new();
    let token = register_and_login(&client, &base, "heidi@example.com").await;

    let task = create_task(&client, &base, &token, json!({ "title": "Ephemeral" })).await;
    let id = task["id"].as_str().unwrap();

    let resp = client
        .delete(format!("{base}/v1/tasks/{id}"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let resp = client
        .get(format!("{base}/v1/tasks/{id}"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn invalid_task_payload_rejected_in_full() {
    let dir = TempDir::new().unwrap();
    let base = spawn_server(&dir, None).await;
    let client = reqwest::Client::new();
    let token = register_and_login(&client, &base, "ivan@example.com").await;

    let resp = client
        .post(format!("{base}/v1/tasks"))
        .bearer_auth(&token)
        .json(&json!({ "status": "done", "due_date": "tomorrow" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);
    let body: Value = resp.json().await.unwrap();
    let errors = body["errors"].as_object().unwrap();
    assert!(errors.contains_key("title"));
    assert!(errors.contains_key("status"));
    assert!(errors.contains_key("due_date"));
}

// ─── Tenant isolation ────────────────────────────────────────────────────────

#[tokio::test]
async fn other_tenants_tasks_read_as_absent() {
    let dir = TempDir::new().unwrap();
    let base = spawn_server(&dir, None).await;
    let client = reqwest::Client::new();

    let owner = register_and_login(&client, &base, "owner@example.com").await;
    let intruder = register_and_login(&client, &base, "intruder@example.com").await;

    let task = create_task(&client, &base, &owner, json!({ "title": "Private" })).await;
    let id = task["id"].as_str().unwrap();

    for resp in [
        client.get(format!("{base}/v1/tasks/{id}")),
        client
            .put(format!("{base}/v1/tasks/{id}"))
            .json(&json!({ "title": "Stolen" })),
        client.delete(format!("{base}/v1/tasks/{id}")),
        client.get(format!("{base}/v1/tasks/{id}/history")),
    ] {
        let resp = resp.bearer_auth(&intruder).send().await.unwrap();
        assert_eq!(resp.status(), 404);
    }

    // The owner's list is unaffected; the intruder's list is empty.
    let body: Value = client
        .get(format!("{base}/v1/tasks"))
        .bearer_auth(&intruder)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["total"], 0);
}

// ─── Filtering, sorting, pagination ──────────────────────────────────────────

#[tokio::test]
async fn list_filters_sorts_and_paginates() {
    let dir = TempDir::new().unwrap();
    let base = spawn_server(&dir, None).await;
    let client = reqwest::Client::new();
    let token = register_and_login(&client, &base, "judy@example.com").await;

    create_task(
        &client,
        &base,
        &token,
        json!({ "title": "Write report", "status": "pending", "due_date": "2026-09-01" }),
    )
    .await;
    create_task(
        &client,
        &base,
        &token,
        json!({ "title": "Review report", "status": "in_progress", "due_date": "2026-09-10" }),
    )
    .await;
    create_task(
        &client,
        &base,
        &token,
        json!({ "title": "Archive logs", "status": "completed", "due_date": "2026-10-01" }),
    )
    .await;

    // Enum equality.
    let body: Value = client
        .get(format!(
            "{base}/v1/tasks?filters[status][operator]==&filters[status][value]=in_progress"
        ))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["total"], 1);
    assert_eq!(body["data"][0]["title"], "Review report");

    // Substring match.
    let body: Value = client
        .get(format!(
            "{base}/v1/tasks?filters[title][operator]=like&filters[title][value]=report"
        ))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["total"], 2);

    // Date range, sorted descending.
    let body: Value = client
        .get(format!(
            "{base}/v1/tasks?filters[due_date][operator]=between&filters[due_date][value]=2026-09-01,2026-09-30&sort_by=due_date&sort_order=desc"
        ))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["total"], 2);
    assert_eq!(body["data"][0]["due_date"], "2026-09-10");

    // Pagination: page 2 of size 2 holds the remaining task.
    let body: Value = client
        .get(format!("{base}/v1/tasks?per_page=2&page=2&sort_by=title"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["total"], 3);
    assert_eq!(body["page"], 2);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    // per_page is clamped, not rejected.
    let body: Value = client
        .get(format!("{base}/v1/tasks?per_page=1000"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["per_page"], 500);

    // Unknown sort field is ignored, not an error.
    let resp = client
        .get(format!("{base}/v1/tasks?sort_by=password_hash"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn bad_filters_are_rejected_together() {
    let dir = TempDir::new().unwrap();
    let base = spawn_server(&dir, None).await;
    let client = reqwest::Client::new();
    let token = register_and_login(&client, &base, "kim@example.com").await;

    let resp = client
        .get(format!(
            "{base}/v1/tasks?filters[secret][operator]==&filters[secret][value]=x&filters[status][operator]=like&filters[status][value]=pend&filters[due_date][operator]=between&filters[due_date][value]=2026-01-01"
        ))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);
    let body: Value = resp.json().await.unwrap();
    let errors = body["errors"].as_object().unwrap();
    // Unknown field, disallowed operator, and bad arity all reported at once.
    assert!(errors.contains_key("secret"));
    assert!(errors.contains_key("status"));
    assert!(errors.contains_key("due_date"));
}

#[tokio::test]
async fn list_embeds_requested_relations() {
    let dir = TempDir::new().unwrap();
    let base = spawn_server(&dir, None).await;
    let client = reqwest::Client::new();
    let token = register_and_login(&client, &base, "liam@example.com").await;

    create_task(&client, &base, &token, json!({ "title": "With relations" })).await;

    let body: Value = client
        .get(format!("{base}/v1/tasks?with=histories,user"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let task = &body["data"][0];
    assert_eq!(task["histories"][0]["field_changed"], "created");
    assert_eq!(task["user"]["email"], "liam@example.com");
    assert!(task["user"].get("password_hash").is_none());
}

#[tokio::test]
async fn history_list_supports_filters() {
    let dir = TempDir::new().unwrap();
    let base = spawn_server(&dir, None).await;
    let client = reqwest::Client::new();
    let token = register_and_login(&client, &base, "mona@example.com").await;

    let task = create_task(&client, &base, &token, json!({ "title": "First" })).await;
    let id = task["id"].as_str().unwrap();
    client
        .put(format!("{base}/v1/tasks/{id}"))
        .bearer_auth(&token)
        .json(&json!({ "title": "Second" }))
        .send()
        .await
        .unwrap();

    let body: Value = client
        .get(format!(
            "{base}/v1/tasks/{id}/history?filters[field_changed][operator]=like&filters[field_changed][value]=title"
        ))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["total"], 1);
    assert_eq!(body["data"][0]["field_changed"], "title");
}

// ─── Account management ──────────────────────────────────────────────────────

#[tokio::test]
async fn profile_update_and_account_deletion() {
    let dir = TempDir::new().unwrap();
    let base = spawn_server(&dir, None).await;
    let client = reqwest::Client::new();
    let token = register_and_login(&client, &base, "nina@example.com").await;

    let resp = client
        .put(format!("{base}/v1/me"))
        .bearer_auth(&token)
        .json(&json!({ "name": "Renamed" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["name"], "Renamed");
    assert_eq!(body["data"]["email"], "nina@example.com");

    // Taking another user's email fails; keeping your own is fine.
    register_and_login(&client, &base, "taken@example.com").await;
    let resp = client
        .put(format!("{base}/v1/me"))
        .bearer_auth(&token)
        .json(&json!({ "email": "taken@example.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);
    let resp = client
        .put(format!("{base}/v1/me"))
        .bearer_auth(&token)
        .json(&json!({ "email": "nina@example.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Deletion revokes the token.
    let resp = client
        .delete(format!("{base}/v1/me"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let resp = client
        .get(format!("{base}/v1/me"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

// ─── Webhooks ────────────────────────────────────────────────────────────────

/// Start a capture server that records every JSON body POSTed to it.
async fn spawn_webhook_receiver() -> (String, Arc<tokio::sync::Mutex<Vec<Value>>>) {
    use axum::{extract::State, routing::post, Json, Router};

    let received: Arc<tokio::sync::Mutex<Vec<Value>>> = Arc::default();
    let state = received.clone();

    let app = Router::new().route(
        "/hook",
        post(
            |State(recv): State<Arc<tokio::sync::Mutex<Vec<Value>>>>, Json(body): Json<Value>| async move {
                recv.lock().await.push(body);
                "ok"
            },
        ),
    )
    .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/hook"), received)
}

#[tokio::test]
async fn history_records_are_delivered_to_the_webhook() {
    let (hook_url, received) = spawn_webhook_receiver().await;

    let dir = TempDir::new().unwrap();
    let base = spawn_server(&dir, Some(hook_url)).await;
    let client = reqwest::Client::new();
    let token = register_and_login(&client, &base, "oscar@example.com").await;

    let task = create_task(&client, &base, &token, json!({ "title": "Notify me" })).await;
    let id = task["id"].as_str().unwrap();
    client
        .put(format!("{base}/v1/tasks/{id}"))
        .bearer_auth(&token)
        .json(&json!({ "title": "Notified" }))
        .send()
        .await
        .unwrap();

    // One delivery for the creation row, one for the title change.
    let mut payloads = Vec::new();
    for _ in 0..100 {
        payloads = received.lock().await.clone();
        if payloads.len() >= 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    assert_eq!(payloads.len(), 2, "expected 2 webhook deliveries");

    for payload in &payloads {
        assert_eq!(payload["event"], "task_updated");
        assert!(payload["timestamp"].as_str().is_some());
        assert_eq!(payload["data"]["task_id"], *id);
    }
    assert_eq!(payloads[0]["data"]["field_changed"], "created");
    assert_eq!(payloads[1]["data"]["field_changed"], "title");
    assert_eq!(payloads[1]["data"]["old_value"], "Notify me");
    assert_eq!(payloads[1]["data"]["new_value"], "Notified");
}
