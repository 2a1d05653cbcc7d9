use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use rpc_monitor::config::Config;
use rpc_monitor::monitor::MonitorService;
use rpc_monitor::{server, AppState};

struct App {
    _dir: tempfile::TempDir,
    cfg: Config,
    monitor: Arc<MonitorService>,
    router: Router,
}

fn app(capacity: usize) -> App {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = Config {
        queue_capacity: capacity,
        statistics_dir: dir.path().join("statistics"),
        charts_dir: dir.path().join("charts"),
        aggregate_initial_delay: Duration::from_secs(3600),
        ..Config::default()
    };
    let monitor = Arc::new(MonitorService::from_config(&cfg).expect("monitor"));
    let router = server::create_router(
        Arc::new(AppState {
            monitor: Arc::clone(&monitor),
        }),
        &cfg.charts_dir,
    );
    App {
        _dir: dir,
        cfg,
        monitor,
        router,
    }
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let res = router.clone().oneshot(req).await.expect("response");
    let status = res.status();
    let headers = res.headers().clone();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .expect("body");
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn post_text(uri: &str, body: &str) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "text/plain")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn record_json(success: i64) -> Value {
    serde_json::json!({
        "host": "10.0.0.9",
        "parameters": {
            "interface": "com.acme.Bar",
            "method": "foo",
            "provider": "10.0.0.1:20880",
            "success": success.to_string(),
        }
    })
}

#[tokio::test]
async fn test_post_single_record() {
    let app = app(16);
    let (status, headers, body) =
        send(&app.router, post_json("/api/statistics", record_json(1))).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["accepted"], 1);
    assert_eq!(body["dropped"], 0);
    assert!(headers.contains_key("x-response-time-us"));
    assert!(headers.contains_key("server-timing"));
    app.monitor.close();
}

#[tokio::test]
async fn test_post_after_close_is_unavailable() {
    let app = app(1);
    app.monitor.close();
    let (status, _, body) = send(
        &app.router,
        post_json("/api/statistics", serde_json::json!([record_json(1)])),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], 503);
}

#[tokio::test]
async fn test_post_url_lines() {
    let app = app(16);
    let lines = "count://10.0.0.9/com.acme.Bar?method=foo&provider=10.0.0.1:20880&success=3\n\
                 not a record\n\
                 \n\
                 count://10.0.0.1/com.acme.Bar?method=foo&consumer=10.0.0.9&success=3\n";
    let (status, _, body) = send(&app.router, post_text("/api/statistics/urls", lines)).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["accepted"], 2);
    assert_eq!(body["rejected"], 1);
    app.monitor.close();
}

#[tokio::test]
async fn test_only_garbage_lines_is_bad_request() {
    let app = app(16);
    let (status, _, body) =
        send(&app.router, post_text("/api/statistics/urls", "nope\nstill nope\n")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().expect("message").contains("2 line"));
    app.monitor.close();
}

#[tokio::test]
async fn test_lookup_returns_empty_list() {
    let app = app(16);
    let req = Request::get("/api/statistics/lookup?interface=com.acme.Bar&method=foo")
        .body(Body::empty())
        .expect("request");
    let (status, _, body) = send(&app.router, req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!([]));
    app.monitor.close();
}

#[tokio::test]
async fn test_queue_status() {
    let app = app(32);
    let req = Request::get("/api/queue").body(Body::empty()).expect("request");
    let (status, _, body) = send(&app.router, req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["capacity"], 32);
    assert_eq!(body["running"], true);
    assert_eq!(body["dropped"], 0);
    app.monitor.close();
}

#[tokio::test]
async fn test_charts_are_served() {
    let app = app(16);
    let dir = app.cfg.charts_dir.join("20240305/com.acme.Bar/foo");
    std::fs::create_dir_all(&dir).expect("mkdir");
    std::fs::write(dir.join("success.json"), r#"{"title":"max: 1"}"#).expect("write");

    let req = Request::get("/charts/20240305/com.acme.Bar/foo/success.json")
        .body(Body::empty())
        .expect("request");
    let (status, _, body) = send(&app.router, req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "max: 1");
    app.monitor.close();
}

#[tokio::test]
async fn test_record_without_method_is_rejected() {
    let app = app(16);
    let mut incomplete = record_json(1);
    incomplete["parameters"]
        .as_object_mut()
        .expect("object")
        .remove("method");
    let (status, _, body) = send(
        &app.router,
        post_json("/api/statistics", serde_json::json!([record_json(1), incomplete])),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["accepted"], 1);
    assert_eq!(body["rejected"], 1);
    app.monitor.close();
}
