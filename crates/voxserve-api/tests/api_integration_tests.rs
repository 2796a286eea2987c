//! Integration tests for the HTTP surface.
//!
//! Each test boots a router over an isolated SQLite catalog and drives it
//! with in-process requests: dataset lifecycle, visibility toggles,
//! shares, tags, user administration, and the traffic window.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use base64::Engine;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use voxserve_api::auth::Authenticator;
use voxserve_api::registry::ContextRegistry;
use voxserve_api::sampler::{ByteCounter, ServerStats, TrafficSampler};
use voxserve_api::service::CatalogService;
use voxserve_api::serving::FsContextFactory;
use voxserve_api::{router, AppState};
use voxserve_storage::CatalogStore;

struct TestServer {
    _temp: TempDir,
    app: Router,
    content_path: String,
}

/// Boot a router over a fresh catalog with three users (manager m1,
/// users u1/u2, password "secret") and one real content file.
fn test_server() -> TestServer {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(CatalogStore::open(temp.path().join("catalog.db")).unwrap());

    // Low bcrypt cost keeps the suite fast
    let hash = bcrypt::hash("secret", 4).unwrap();
    store.create_user("m1", "Manager", &hash, true).unwrap();
    store.create_user("u1", "Owner", &hash, false).unwrap();
    store.create_user("u2", "Reader", &hash, false).unwrap();

    let content_path = temp.path().join("stack.xml");
    std::fs::write(&content_path, b"<SpimData/>").unwrap();

    let registry = Arc::new(ContextRegistry::new(Arc::new(FsContextFactory)));
    let service = Arc::new(CatalogService::new(store.clone(), registry));
    let state = AppState {
        service,
        auth: Arc::new(Authenticator::new(store)),
        sampler: Arc::new(TrafficSampler::new()),
        counter: Arc::new(ByteCounter::default()),
        stats: Arc::new(ServerStats::default()),
    };

    TestServer {
        app: router(state),
        content_path: content_path.to_string_lossy().to_string(),
        _temp: temp,
    }
}

fn basic_auth(user: &str) -> String {
    let encoded =
        base64::engine::general_purpose::STANDARD.encode(format!("{}:secret", user));
    format!("Basic {}", encoded)
}

async fn request(
    app: &Router,
    method: &str,
    path: &str,
    body: Option<Value>,
    user: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");

    if let Some(user) = user {
        builder = builder.header(header::AUTHORIZATION, basic_auth(user));
    }

    let body = match body {
        Some(v) => Body::from(serde_json::to_string(&v).unwrap()),
        None => Body::empty(),
    };

    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()));
    (status, value)
}

async fn add_dataset(server: &TestServer, user: &str, name: &str, public: bool) -> i64 {
    let (status, body) = request(
        &server.app,
        "POST",
        "/private/user/datasets",
        Some(json!({
            "name": name,
            "description": "nightly acquisition",
            "file": server.content_path,
            "tags": "confocal, long term",
            "public": public,
        })),
        Some(user),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "add dataset failed: {}", body);
    body["id"].as_i64().unwrap()
}

#[tokio::test]
async fn empty_catalog_refuses_every_mutating_surface() {
    // No users at all: nothing can authenticate, so no mutation can run
    // until the bootstrap manager exists.
    let temp = TempDir::new().unwrap();
    let store = Arc::new(CatalogStore::open(temp.path().join("catalog.db")).unwrap());
    assert!(store.has_no_users().unwrap());

    let registry = Arc::new(ContextRegistry::new(Arc::new(FsContextFactory)));
    let service = Arc::new(CatalogService::new(store.clone(), registry));
    let app = router(AppState {
        service,
        auth: Arc::new(Authenticator::new(store)),
        sampler: Arc::new(TrafficSampler::new()),
        counter: Arc::new(ByteCounter::default()),
        stats: Arc::new(ServerStats::default()),
    });

    let (status, _) = request(
        &app,
        "POST",
        "/private/user/datasets",
        Some(json!({"name": "A", "file": "/data/a.xml"})),
        Some("anyone"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = request(&app, "POST", "/manager/users", None, Some("anyone")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_and_ready() {
    let server = test_server();

    let (status, body) = request(&server.app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("ok".to_string()));

    let (status, body) = request(&server.app, "GET", "/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn authentication_gates_private_and_manager_routes() {
    let server = test_server();

    let (status, _) = request(&server.app, "GET", "/private/user/datasets", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Valid user, wrong role
    let (status, _) = request(&server.app, "GET", "/manager/users", None, Some("u1")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = request(&server.app, "GET", "/manager/users", None, Some("m1")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn dataset_lifecycle_with_serving_context() {
    let server = test_server();
    let id = add_dataset(&server, "u1", "A", false).await;

    // Private dataset: public listing is empty, descriptor 404
    let (_, body) = request(&server.app, "GET", "/public/datasets", None, None).await;
    assert_eq!(body.as_array().unwrap().len(), 0);
    let (status, _) = request(
        &server.app,
        "GET",
        &format!("/public/dataset/id/{}", id),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The manager console sees the live context with its tags
    let (status, body) = request(&server.app, "GET", "/manager/datasets", None, Some("m1")).await;
    assert_eq!(status, StatusCode::OK);
    let entry = &body["data"][0];
    assert_eq!(entry["id"].as_i64().unwrap(), id);
    assert_eq!(entry["active"], Value::Bool(true));
    assert_eq!(entry["tags"], "confocal,long term");
    assert_eq!(
        entry["context_path"],
        format!("/private/dataset/id/{}/", id)
    );

    // The manager's private listing carries the owner
    let (_, body) = request(
        &server.app,
        "GET",
        "/manager/datasets/private",
        None,
        Some("m1"),
    )
    .await;
    assert_eq!(body[0]["owner"], "u1");

    // Toggle public: context moves to the public subtree
    let (status, body) = request(
        &server.app,
        "PUT",
        &format!("/private/user/datasets/{}/visibility", id),
        Some(json!({"public": true})),
        Some("u1"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["public"], Value::Bool(true));

    let (status, body) = request(
        &server.app,
        "GET",
        &format!("/public/dataset/id/{}", id),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["url"], format!("/public/dataset/id/{}", id));
    assert!(body["size_bytes"].as_u64().unwrap() > 0);

    // Toggle back: original-scheme path is restored, tags preserved
    let (status, body) = request(
        &server.app,
        "PUT",
        &format!("/private/user/datasets/{}/visibility", id),
        Some(json!({"public": false})),
        Some("u1"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tags"], json!(["confocal", "long term"]));
    let (status, _) = request(
        &server.app,
        "GET",
        &format!("/public/dataset/id/{}", id),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Remove: a non-owner is rejected and the dataset survives
    let (status, _) = request(
        &server.app,
        "DELETE",
        &format!("/private/user/datasets/{}", id),
        None,
        Some("u2"),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = request(
        &server.app,
        "DELETE",
        &format!("/private/user/datasets/{}", id),
        None,
        Some("u1"),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = request(&server.app, "GET", "/manager/datasets", None, Some("m1")).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn share_grants_open_private_datasets() {
    let server = test_server();
    let id = add_dataset(&server, "u1", "A", false).await;

    // u2 cannot read the private descriptor yet
    let (status, _) = request(
        &server.app,
        "GET",
        &format!("/private/dataset/id/{}", id),
        None,
        Some("u2"),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Self-share is rejected
    let (status, _) = request(
        &server.app,
        "POST",
        &format!("/private/user/datasets/{}/shares", id),
        Some(json!({"user_id": "u1"})),
        Some("u1"),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Read-only share for u2
    let (status, _) = request(
        &server.app,
        "POST",
        &format!("/private/user/datasets/{}/shares", id),
        Some(json!({"user_id": "u2", "can_read": true, "can_write": false})),
        Some("u1"),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = request(&server.app, "GET", "/private/user/datasets", None, Some("u2")).await;
    assert_eq!(body["shared"].as_array().unwrap().len(), 1);
    assert_eq!(body["shared"][0]["name"], "A");

    let (status, _) = request(
        &server.app,
        "GET",
        &format!("/private/dataset/id/{}", id),
        None,
        Some("u2"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Revoke removes it from u2's listing
    let (status, _) = request(
        &server.app,
        "DELETE",
        &format!("/private/user/datasets/{}/shares/u2", id),
        None,
        Some("u1"),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = request(&server.app, "GET", "/private/user/datasets", None, Some("u2")).await;
    assert_eq!(body["shared"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn tags_and_public_tag_listing() {
    let server = test_server();
    let id = add_dataset(&server, "u1", "A", true).await;

    // Duplicate tag stays a single association
    for _ in 0..2 {
        let (status, _) = request(
            &server.app,
            "POST",
            &format!("/private/user/datasets/{}/tags", id),
            Some(json!({"tag": "x"})),
            Some("u1"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    let (_, body) = request(&server.app, "GET", "/private/user/datasets", None, Some("u1")).await;
    let tags = body["owned"][0]["tags"].as_array().unwrap();
    assert_eq!(tags.iter().filter(|t| *t == "x").count(), 1);

    let (_, body) = request(&server.app, "GET", "/public/tag/x", None, None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    // Tag with a space round-trips through the path
    let (status, body) = request(
        &server.app,
        "DELETE",
        &format!("/private/user/datasets/{}/tags/long%20term", id),
        None,
        Some("u1"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["tags"]
        .as_array()
        .unwrap()
        .iter()
        .any(|t| t == "long term"));

    let (_, body) = request(&server.app, "GET", "/public/tag/nope", None, None).await;
    assert_eq!(body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn activation_toggle_keeps_context_registered() {
    let server = test_server();
    let id = add_dataset(&server, "u1", "A", true).await;

    let (status, _) = request(
        &server.app,
        "PUT",
        &format!("/manager/datasets/{}/active", id),
        Some(json!({"active": false})),
        Some("m1"),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Inactive: descriptor is gone but the console still lists it
    let (status, _) = request(
        &server.app,
        "GET",
        &format!("/public/dataset/id/{}", id),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, body) = request(&server.app, "GET", "/manager/datasets", None, Some("m1")).await;
    assert_eq!(body["data"][0]["active"], Value::Bool(false));

    let (status, _) = request(
        &server.app,
        "PUT",
        &format!("/manager/datasets/{}/active", id),
        Some(json!({"active": true})),
        Some("m1"),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = request(
        &server.app,
        "GET",
        &format!("/public/dataset/id/{}", id),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Unknown id
    let (status, _) = request(
        &server.app,
        "PUT",
        "/manager/datasets/999/active",
        Some(json!({"active": true})),
        Some("m1"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn manager_user_administration() {
    let server = test_server();

    let (status, _) = request(
        &server.app,
        "POST",
        "/manager/users",
        Some(json!({"id": "u3", "name": "Three", "password": "pw3", "manager": false})),
        Some("m1"),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, body) = request(&server.app, "GET", "/manager/users", None, Some("m1")).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 4);

    // Promote, rename, then verify
    let (status, _) = request(
        &server.app,
        "PATCH",
        "/manager/users/u3",
        Some(json!({"name": "Third", "manager": true})),
        Some("m1"),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, body) = request(&server.app, "GET", "/manager/users", None, Some("m1")).await;
    let u3 = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|u| u["id"] == "u3")
        .unwrap();
    assert_eq!(u3["name"], "Third");
    assert_eq!(u3["manager"], Value::Bool(true));

    // A manager cannot be removed
    let (status, _) = request(&server.app, "DELETE", "/manager/users/u3", None, Some("m1")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // A dataset owner cannot be removed while the dataset exists
    let id = add_dataset(&server, "u1", "A", false).await;
    let (status, _) = request(&server.app, "DELETE", "/manager/users/u1", None, Some("m1")).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = request(
        &server.app,
        "DELETE",
        &format!("/private/user/datasets/{}", id),
        None,
        Some("u1"),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = request(&server.app, "DELETE", "/manager/users/u1", None, Some("m1")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn password_change_keeps_old_credentials_out() {
    let server = test_server();

    let (status, _) = request(
        &server.app,
        "PUT",
        "/private/user/password",
        Some(json!({"password": "brand-new"})),
        Some("u1"),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // The old password no longer authenticates
    let (status, _) = request(&server.app, "GET", "/private/user/datasets", None, Some("u1")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn traffic_window_is_exact_length_zero_padded() {
    let server = test_server();

    let (status, body) = request(
        &server.app,
        "GET",
        "/manager/traffic?minutes=1",
        None,
        Some("m1"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let samples = body.as_array().unwrap();
    // 12 five-second samples per minute, zero-padded while empty
    assert_eq!(samples.len(), 12);
    assert!(samples.iter().all(|s| s == 0));
}

#[tokio::test]
async fn server_info_reports_catalog_stats() {
    let server = test_server();
    add_dataset(&server, "u1", "A", true).await;
    add_dataset(&server, "u1", "B", false).await;

    let (status, body) = request(&server.app, "GET", "/manager/info", None, Some("m1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dataset_count"].as_u64().unwrap(), 2);
    assert!(body["datasets_size_raw"].as_u64().unwrap() > 0);
    assert!(body["requests_total"].as_u64().unwrap() >= 1);
}
