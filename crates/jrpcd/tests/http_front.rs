//! End-to-end tests for the HTTP front and the full dispatch path.

use std::{sync::Arc, time::Duration};

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
};
use serde_json::{json, Value};
use tower::ServiceExt;

use jrpcd_core::{
    backend::parse_backends,
    cache::CacheStore,
    proxy::ProxyEngine,
    route::build_routes,
};

fn engine_for(url: &str, cache: CacheStore) -> Arc<ProxyEngine> {
    let backends = parse_backends(&[url.to_string()]).unwrap();
    let routes = build_routes(&[], &backends).unwrap();
    Arc::new(ProxyEngine::new(routes, cache).unwrap())
}

async fn body_string(body: Body) -> String {
    let bytes = to_bytes(body, usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn rejects_non_post_methods() {
    let app = jrpcd::http::app(engine_for("http://localhost:1", CacheStore::disabled()));

    let response = app
        .oneshot(Request::builder().method("GET").uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body_string(response.into_body()).await, "Invalid method");
}

#[tokio::test]
async fn rejects_missing_content_type() {
    let app = jrpcd::http::app(engine_for("http://localhost:1", CacheStore::disabled()));

    let response = app
        .oneshot(Request::builder().method("POST").uri("/").body(Body::from("{}")).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_string(response.into_body()).await, "Missing content type");
}

#[tokio::test]
async fn rejects_wrong_content_type() {
    let app = jrpcd::http::app(engine_for("http://localhost:1", CacheStore::disabled()));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body_string(response.into_body()).await, "Invalid content type");
}

#[tokio::test]
async fn accepts_json_with_charset_parameter() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/")
        .with_status(200)
        .with_body(r#"[{"id":1,"result":"0x1"}]"#)
        .create_async()
        .await;

    let app = jrpcd::http::app(engine_for(&server.url(), CacheStore::disabled()));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header(header::CONTENT_TYPE, "application/json; charset=utf-8")
                .body(Body::from(r#"{"id":1,"method":"eth_chainId","params":[]}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn any_path_is_served() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/")
        .with_status(200)
        .with_body(r#"[{"id":1,"result":"0x1"}]"#)
        .create_async()
        .await;

    let app = jrpcd::http::app(engine_for(&server.url(), CacheStore::disabled()));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/some/rpc/path")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"id":1,"method":"eth_chainId","params":[]}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn undecodable_body_is_a_bad_request() {
    let app = jrpcd::http::app(engine_for("http://localhost:1", CacheStore::disabled()));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("42"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_string(response.into_body()).await;
    assert!(body.starts_with("Failed to decode request:"), "unexpected body: {body}");
}

async fn spawn_app(engine: Arc<ProxyEngine>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, jrpcd::http::app(engine)).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn cold_then_warm_cycle_over_http() {
    let mut upstream = mockito::Server::new_async().await;
    let mock = upstream
        .mock("POST", "/")
        .expect(1)
        .with_status(200)
        .with_body(r#"[{"jsonrpc":"2.0","id":1,"result":"0x10"}]"#)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path()).unwrap();
    let base = spawn_app(engine_for(&upstream.url(), store.clone())).await;

    let client = reqwest::Client::new();
    let body = r#"{"jsonrpc":"2.0","id":1,"method":"eth_blockNumber","params":[]}"#;

    let response = client
        .post(&base)
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap().to_str().unwrap(),
        "application/json"
    );
    let first: Value = response.json().await.unwrap();
    assert_eq!(first, json!({"jsonrpc":"2.0","id":1,"result":"0x10"}));

    // Wait for the write-back before replaying the request.
    let mut stored = None;
    for _ in 0..200 {
        stored = store.get(b"eth_blocknumber([])");
        if stored.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let stored: Value = serde_json::from_slice(&stored.expect("write-back")).unwrap();
    assert_eq!(stored, json!({"jsonrpc":"2.0","result":"0x10"}));

    let second: Value = client
        .post(&base)
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second, json!({"jsonrpc":"2.0","id":1,"result":"0x10"}));

    mock.assert_async().await;
}

#[tokio::test]
async fn total_backend_failure_maps_to_500() {
    let mut upstream = mockito::Server::new_async().await;
    upstream.mock("POST", "/").with_status(500).create_async().await;

    let base = spawn_app(engine_for(&upstream.url(), CacheStore::disabled())).await;

    let response = reqwest::Client::new()
        .post(&base)
        .header("content-type", "application/json")
        .body(r#"{"id":1,"method":"eth_blockNumber","params":[]}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 500);
    assert_eq!(response.text().await.unwrap(), "Failed to forward request");
}
