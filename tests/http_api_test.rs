//! Integration tests for the HTTP routes.

use std::path::PathBuf;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use cms_feed::config::Config;
use cms_feed::db::{insert_comment, Comment, Database};
use cms_feed::web::{create_app, AppState};

const SECRET: &str = "test-secret";

fn test_config() -> Config {
    Config {
        database_path: PathBuf::from("unused.sqlite"),
        web_host: "127.0.0.1".to_string(),
        web_port: 0,
        jwt_secret: Some(SECRET.to_string()),
        default_page_size: 10,
        max_page_size: 100,
        max_tags_per_post: 33,
        transaction_item_limit: 100,
        batch_get_limit: 100,
        batch_write_limit: 25,
        backfill_page_size: 100,
    }
}

async fn setup() -> (Router, Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");
    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");
    let state = AppState::new(test_config(), db.clone()).expect("Failed to build state");
    (create_app(state), db, temp_dir)
}

fn token(user_id: &str, username: &str) -> String {
    let claims = json!({
        "sub": user_id,
        "username": username,
        "exp": chrono::Utc::now().timestamp() + 3600,
    });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()))
    };
    (status, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn with_json(method: &str, uri: &str, token: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn delete(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

async fn create_post(app: &Router, token: &str, title: &str, tags: &[&str]) -> Value {
    let (status, body) = send(
        app,
        with_json(
            "POST",
            "/posts",
            Some(token),
            &json!({ "title": title, "content": "body", "tags": tags }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body
}

#[tokio::test]
async fn test_health_check() {
    let (app, _db, _temp_dir) = setup().await;
    let response = app.oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_create_and_list_posts() {
    let (app, _db, _temp_dir) = setup().await;
    let alice = token("u-alice", "alice");

    let first = create_post(&app, &alice, "First", &["rust"]).await;
    let second = create_post(&app, &alice, "Second", &["rust", "web"]).await;
    assert_eq!(second["username"], "alice");
    assert_eq!(second["feedKey"], "GLOBAL");

    let (status, page) = send(&app, get("/posts")).await;
    assert_eq!(status, StatusCode::OK);
    let titles: Vec<&str> = page["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, ["Second", "First"]);
    assert_eq!(page["page"]["prevUntil"], second["createdAt"]);
    assert_eq!(page["page"]["nextSince"], first["createdAt"]);

    let (_, tagged) = send(&app, get("/posts?tag=web")).await;
    assert_eq!(tagged["items"].as_array().unwrap().len(), 1);

    let (_, by_author) = send(&app, get("/posts?author=alice&limit=1")).await;
    assert_eq!(by_author["items"][0]["title"], "Second");
}

#[tokio::test]
async fn test_invalid_feed_requests_are_bad_requests() {
    let (app, _db, _temp_dir) = setup().await;

    for uri in [
        "/posts?since=10&until=5",
        "/posts?tag=a&author=b",
        "/posts?day=2026-13-01",
        "/posts?limit=0",
        "/posts?limit=many",
        "/posts?since=yesterday",
    ] {
        let (status, body) = send(&app, get(uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert!(body["error"].is_string(), "{uri}");
    }
}

#[tokio::test]
async fn test_unknown_author_and_empty_page_shape() {
    let (app, _db, _temp_dir) = setup().await;
    let (status, body) = send(&app, get("/posts?author=nobody")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "items": [], "page": {} }));
}

#[tokio::test]
async fn test_writes_require_valid_token() {
    let (app, _db, _temp_dir) = setup().await;
    let body = json!({ "title": "t", "content": "c" });

    let (status, _) = send(&app, with_json("POST", "/posts", None, &body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, with_json("POST", "/posts", Some("not-a-jwt"), &body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_update_and_ownership() {
    let (app, _db, _temp_dir) = setup().await;
    let alice = token("u-alice", "alice");
    let bob = token("u-bob", "bob");
    let post = create_post(&app, &alice, "Draft", &["a", "b"]).await;
    let uri = format!("/posts/{}", post["postId"].as_str().unwrap());

    let (status, _) = send(&app, with_json("PUT", &uri, Some(&bob), &json!({ "title": "Mine" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, updated) = send(
        &app,
        with_json("PUT", &uri, Some(&alice), &json!({ "tags": ["b", "c"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["tags"], json!(["b", "c"]));
    assert_eq!(updated["title"], "Draft");

    let (_, by_a) = send(&app, get("/posts?tag=a")).await;
    assert!(by_a["items"].as_array().unwrap().is_empty());
    let (_, by_c) = send(&app, get("/posts?tag=c")).await;
    assert_eq!(by_c["items"][0]["postId"], post["postId"]);

    let (status, _) = send(&app, get("/posts/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_reports_removed_comments() {
    let (app, db, _temp_dir) = setup().await;
    let alice = token("u-alice", "alice");
    let post = create_post(&app, &alice, "Gone soon", &["x"]).await;
    let post_id = post["postId"].as_str().unwrap().to_string();

    for i in 0..2 {
        insert_comment(
            db.pool(),
            &Comment {
                comment_id: format!("c{i}"),
                post_id: post_id.clone(),
                user_id: "u-bob".to_string(),
                username: "bob".to_string(),
                content: "nice".to_string(),
                created_at: 1,
                parent_comment_id: None,
            },
        )
        .await
        .unwrap();
    }

    let (status, body) = send(&app, delete(&format!("/posts/{post_id}"), &alice)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deletedComments"], 2);

    let (status, _) = send(&app, get(&format!("/posts/{post_id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, page) = send(&app, get("/posts")).await;
    assert!(page["items"].as_array().unwrap().is_empty());
}
