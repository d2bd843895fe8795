//! End-to-end tests of the HTTP surface: the router is served on an
//! ephemeral port with an in-memory storage backend and driven with reqwest.

mod fixtures;
mod helpers;

use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use fixtures::*;
use helpers::{spawn_app, MemoryStorage};

async fn get_json(client: &reqwest::Client, url: String) -> (StatusCode, Value) {
    let response = client.get(url).send().await.expect("request sent");
    let status = response.status();
    (status, response.json().await.unwrap_or(Value::Null))
}

async fn post_json(client: &reqwest::Client, url: String, body: Value) -> (StatusCode, Value) {
    let response = client.post(url).json(&body).send().await.expect("request sent");
    let status = response.status();
    (status, response.json().await.unwrap_or(Value::Null))
}

/// Poll notifications until `count` have arrived.
async fn wait_for_notifications(client: &reqwest::Client, base_url: &str, count: usize) -> Vec<Value> {
    let mut collected = Vec::new();
    for _ in 0..50 {
        let (status, body) = get_json(client, format!("{}/api/v1/notifications", base_url)).await;
        assert_eq!(status, StatusCode::OK);
        collected.extend(body.as_array().cloned().unwrap_or_default());
        if collected.len() >= count {
            return collected;
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("expected {} notifications, got {}", count, collected.len());
}

#[tokio::test]
async fn test_e2e_health_and_index() {
    let storage = Arc::new(MemoryStorage::new());
    let base_url = spawn_app(storage).await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(&client, format!("{}/health", base_url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["session"].is_null());

    let index = client.get(&base_url).send().await.unwrap();
    assert_eq!(index.status(), StatusCode::OK);
    assert!(index.text().await.unwrap().contains("Job Annotation Tool"));
}

#[tokio::test]
async fn test_e2e_requires_login() {
    let storage = Arc::new(MemoryStorage::new().with_file("file-1", "jobs.csv", UNLABELED_JOBS));
    let base_url = spawn_app(storage).await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(&client, format!("{}/api/v1/files", base_url)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Not logged in");

    let (status, _) = post_json(&client, format!("{}/api/v1/label", base_url), json!({ "value": 1 })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_e2e_annotation_flow() {
    let storage = Arc::new(MemoryStorage::new().with_file("file-1", "jobs.csv", UNLABELED_JOBS));
    let base_url = spawn_app(storage.clone()).await;
    let client = reqwest::Client::new();

    // Authenticate (preconfigured backend redirects straight back to the UI)
    let login = client.get(format!("{}/auth/login", base_url)).send().await.unwrap();
    assert_eq!(login.status(), StatusCode::OK);

    let (status, body) = get_json(&client, format!("{}/api/v1/files", base_url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["files"][0]["id"], "file-1");
    assert_eq!(body["files"][0]["name"], "jobs.csv");

    // Loading before selecting is a conflict
    let (status, body) = post_json(&client, format!("{}/api/v1/files/load", base_url), json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "No file selected");

    let (status, body) = post_json(
        &client,
        format!("{}/api/v1/files/select", base_url),
        json!({ "file": "file-1" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["selected"]["name"], "jobs.csv");

    let (status, body) = post_json(&client, format!("{}/api/v1/files/load", base_url), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["progress"]["labeled"], 0);
    assert_eq!(body["progress"]["total"], 3);
    assert_eq!(body["current"]["index"], 0);
    assert_eq!(body["current"]["title"], "Machine Learning Engineer");
    assert_eq!(body["complete"], false);

    // Out-of-range label values are rejected before touching the dataset
    let (status, body) = post_json(&client, format!("{}/api/v1/label", base_url), json!({ "value": 5 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    for (value, expected_next) in [(1, json!(1)), (0, json!(2)), (1, Value::Null)] {
        let (status, body) =
            post_json(&client, format!("{}/api/v1/label", base_url), json!({ "value": value })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["next"]["index"], expected_next, "after labeling with {value}");
    }

    let (status, body) = get_json(&client, format!("{}/api/v1/annotate", base_url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["complete"], true);
    assert!(body["current"].is_null());

    let (status, body) = post_json(&client, format!("{}/api/v1/label", base_url), json!({ "value": 1 })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "All jobs have been annotated");

    let notes = wait_for_notifications(&client, &base_url, 3).await;
    assert!(notes.iter().all(|n| n["message"] == "Progress saved!"));
    assert!(notes.iter().all(|n| n["notice"]["outcome"]["status"] == "success"));

    let remote = storage.contents_str("file-1");
    assert!(remote.starts_with("TITLE,COMPANY_NAME,JOB_DESCRIPTION,finalAnnotation\n"));
    assert!(remote.contains("Line Cook,Harbor Grill,Prepare meals during the evening shift,0\n"));

    let (status, body) = get_json(&client, format!("{}/api/v1/history", base_url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);
    assert_eq!(body[0]["label"], "ai");

    // Logout tears the session down
    let logout = client.post(format!("{}/auth/logout", base_url)).send().await.unwrap();
    assert_eq!(logout.status(), StatusCode::NO_CONTENT);
    assert!(storage.was_revoked());

    let (status, _) = get_json(&client, format!("{}/api/v1/annotate", base_url)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_e2e_errors_are_readable() {
    let storage = Arc::new(
        MemoryStorage::new()
            .with_file("file-1", "jobs.csv", UNLABELED_JOBS)
            .with_file("broken", "broken.csv", MALFORMED),
    );
    let base_url = spawn_app(storage.clone()).await;
    let client = reqwest::Client::new();
    client.get(format!("{}/auth/login", base_url)).send().await.unwrap();

    let (status, body) = post_json(
        &client,
        format!("{}/api/v1/files/select", base_url),
        json!({ "file": "" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    post_json(&client, format!("{}/api/v1/files/select", base_url), json!({ "file": "broken" })).await;
    let (status, body) = post_json(&client, format!("{}/api/v1/files/load", base_url), json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Failed to parse table"));

    post_json(&client, format!("{}/api/v1/files/select", base_url), json!({ "file": "nope" })).await;
    let (status, body) = post_json(&client, format!("{}/api/v1/files/load", base_url), json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "File not found: nope");
}

#[tokio::test]
async fn test_e2e_expired_credentials_end_session() {
    let storage = Arc::new(MemoryStorage::new().with_file("file-1", "jobs.csv", UNLABELED_JOBS));
    let base_url = spawn_app(storage.clone()).await;
    let client = reqwest::Client::new();
    client.get(format!("{}/auth/login", base_url)).send().await.unwrap();

    storage.expire_auth();
    let (status, body) = get_json(&client, format!("{}/api/v1/files", base_url)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap().contains("log in again"));

    let (_, health) = get_json(&client, format!("{}/health", base_url)).await;
    assert!(health["session"].is_null());
}

#[tokio::test]
async fn test_e2e_background_auth_expiry_ends_session() {
    let storage = Arc::new(MemoryStorage::new().with_file("file-1", "jobs.csv", UNLABELED_JOBS));
    let base_url = spawn_app(storage.clone()).await;
    let client = reqwest::Client::new();
    client.get(format!("{}/auth/login", base_url)).send().await.unwrap();
    post_json(&client, format!("{}/api/v1/files/select", base_url), json!({ "file": "file-1" })).await;
    let (status, _) = post_json(&client, format!("{}/api/v1/files/load", base_url), json!({})).await;
    assert_eq!(status, StatusCode::OK);

    // The label itself is local and succeeds; only its upload sees the expiry
    storage.expire_auth();
    let (status, _) = post_json(&client, format!("{}/api/v1/label", base_url), json!({ "value": 1 })).await;
    assert_eq!(status, StatusCode::OK);

    let notes = wait_for_notifications(&client, &base_url, 1).await;
    assert_eq!(notes[0]["notice"]["outcome"]["reason"]["kind"], "auth_expired");
    assert_eq!(notes[0]["message"], "Error saving progress: storage credentials expired");

    let (status, body) = get_json(&client, format!("{}/api/v1/annotate", base_url)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Not logged in");
}

#[tokio::test]
async fn test_e2e_slow_download_does_not_block_polling() {
    let storage = Arc::new(MemoryStorage::new().with_file("file-1", "jobs.csv", UNLABELED_JOBS));
    let base_url = spawn_app(storage.clone()).await;
    let client = reqwest::Client::new();
    client.get(format!("{}/auth/login", base_url)).send().await.unwrap();
    post_json(&client, format!("{}/api/v1/files/select", base_url), json!({ "file": "file-1" })).await;

    storage.delay_downloads([Duration::from_millis(800)]);
    let load = {
        let client = client.clone();
        let url = format!("{}/api/v1/files/load", base_url);
        tokio::spawn(async move { post_json(&client, url, json!({})).await })
    };
    sleep(Duration::from_millis(100)).await;

    // Both answer while the download is still in flight
    let (status, health) = tokio::time::timeout(
        Duration::from_millis(400),
        get_json(&client, format!("{}/health", base_url)),
    )
    .await
    .expect("health answers during a load");
    assert_eq!(status, StatusCode::OK);
    assert!(health["session"].is_object());

    let (status, notes) = tokio::time::timeout(
        Duration::from_millis(400),
        get_json(&client, format!("{}/api/v1/notifications", base_url)),
    )
    .await
    .expect("notifications answer during a load");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(notes, json!([]));

    let (status, body) = load.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["progress"]["total"], 3);
}
