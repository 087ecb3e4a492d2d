//! HTTP contract tests for the upload and analysis endpoints.

use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use swing_analysis_api::{
    build_router,
    config::Config,
    engine::{AnalysisEngine, AnalysisJob, FixtureEngine, SimulatedEngine},
    error::AnalysisError,
    initialize,
    lifecycle::Submission,
    models::AnalysisResults,
    spawn_workers, AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;

const BOUNDARY: &str = "swing-test-boundary";

struct FailingEngine;

#[async_trait]
impl AnalysisEngine for FailingEngine {
    fn name(&self) -> &str {
        "failing"
    }

    async fn analyze(&self, _job: &AnalysisJob) -> Result<AnalysisResults, AnalysisError> {
        Err(AnalysisError::AnalysisEngineFailure(
            "tracking model crashed".to_string(),
        ))
    }
}

fn test_config(dir: &Path) -> Config {
    let mut config = Config::local(dir.join("uploads"));
    config.public_base_url = "http://videos.test".to_string();
    config
}

async fn test_app(
    config: Config,
    engine: Arc<dyn AnalysisEngine>,
) -> (Router, AppState, mpsc::Receiver<Submission>) {
    let (state, queue_rx) = initialize(config, engine).await.unwrap();
    (build_router(state.clone()), state, queue_rx)
}

async fn running_app(config: Config, engine: Arc<dyn AnalysisEngine>) -> (Router, AppState) {
    let (app, state, queue_rx) = test_app(config, engine).await;
    spawn_workers(&state, queue_rx).await;
    (app, state)
}

fn multipart_body(fields: &[(&str, &str)], video: Option<(&str, &str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, mime, bytes)) = video {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"video\"; filename=\"{file_name}\"\r\nContent-Type: {mime}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/upload-video")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn get_analysis(app: &Router, id: &str) -> (StatusCode, Value) {
    send(
        app,
        Request::builder()
            .uri(format!("/api/analysis/{id}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await
}

async fn upload_mp4(app: &Router, size: usize) -> (StatusCode, Value) {
    let video = vec![7u8; size];
    let body = multipart_body(
        &[("userId", "u1"), ("shopId", "s1")],
        Some(("serve.mp4", "video/mp4", &video)),
    );
    send(app, upload_request(body)).await
}

async fn poll_until_terminal(app: &Router, id: &str) -> Value {
    let mut last = "pending".to_string();
    for _ in 0..300 {
        let (status, json) = get_analysis(app, id).await;
        assert_eq!(status, StatusCode::OK);
        let current = json["analysis"]["status"].as_str().unwrap().to_string();
        assert!(
            rank(&current) >= rank(&last),
            "status went backwards: {last} -> {current}"
        );
        if current == "completed" || current == "failed" {
            return json;
        }
        last = current;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("analysis {id} never reached a terminal status");
}

fn rank(status: &str) -> u8 {
    match status {
        "pending" => 0,
        "processing" => 1,
        "completed" | "failed" => 2,
        other => panic!("unexpected status {other}"),
    }
}

fn assert_scores_in_demo_range(results: &Value) {
    let scores = [
        &results["technique"]["overallScore"],
        &results["technique"]["detailedMetrics"]["backswing"],
        &results["technique"]["detailedMetrics"]["followThrough"],
        &results["technique"]["detailedMetrics"]["contactPoint"],
        &results["technique"]["detailedMetrics"]["racketPath"],
        &results["footwork"]["overallScore"],
        &results["footwork"]["detailedMetrics"]["movementEfficiency"],
        &results["footwork"]["detailedMetrics"]["recoverySpeed"],
        &results["footwork"]["detailedMetrics"]["courtCoverage"],
        &results["strategy"]["overallScore"],
    ];
    for score in scores {
        let score = score.as_u64().expect("numeric score");
        assert!((60..=100).contains(&score), "score {score} out of range");
    }
    assert!(!results["technique"]["feedback"].as_array().unwrap().is_empty());
    assert!(!results["footwork"]["feedback"].as_array().unwrap().is_empty());
    assert!(!results["strategy"]["feedback"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_route_reports_liveness() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _state, _rx) = test_app(
        test_config(dir.path()),
        Arc::new(FixtureEngine::new(Duration::ZERO)),
    )
    .await;

    let (status, json) = send(
        &app,
        Request::builder().uri("/api/test").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert!(json["message"].is_string());
}

#[tokio::test]
async fn upload_is_pending_then_completes_with_simulated_scores() {
    let dir = tempfile::tempdir().unwrap();
    let (app, state, queue_rx) = test_app(
        test_config(dir.path()),
        Arc::new(SimulatedEngine::new(Duration::from_millis(100))),
    )
    .await;

    let (status, json) = upload_mp4(&app, 5 * 1024 * 1024).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert!(json["message"].is_string());
    let video_id = json["videoId"].as_str().unwrap().to_string();

    let (status, json) = get_analysis(&app, &video_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["analysis"]["status"], "pending");
    assert!(json["analysis"].get("results").is_none());
    let video_url = json["analysis"]["videoUrl"].as_str().unwrap();
    assert!(video_url.starts_with("http://videos.test/uploads/"));
    assert!(video_url.ends_with("-serve.mp4"));

    spawn_workers(&state, queue_rx).await;
    let json = poll_until_terminal(&app, &video_id).await;
    assert_eq!(json["analysis"]["status"], "completed");
    assert_scores_in_demo_range(&json["analysis"]["results"]);

    let (_, again) = get_analysis(&app, &video_id).await;
    assert_eq!(again, json);
    assert_eq!(state.store.len().await, 1);
}

#[tokio::test]
async fn stored_artifact_is_served_at_video_url() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _state) = running_app(
        test_config(dir.path()),
        Arc::new(FixtureEngine::new(Duration::ZERO)),
    )
    .await;

    let (_, json) = upload_mp4(&app, 64).await;
    let video_id = json["videoId"].as_str().unwrap();
    let (_, json) = get_analysis(&app, video_id).await;
    let video_url = json["analysis"]["videoUrl"].as_str().unwrap();
    let path = video_url.trim_start_matches("http://videos.test");

    let response = app
        .clone()
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes.len(), 64);
}

#[tokio::test]
async fn fixture_engine_results_include_extension_fields() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _state) = running_app(
        test_config(dir.path()),
        Arc::new(FixtureEngine::new(Duration::ZERO)),
    )
    .await;

    let (_, json) = upload_mp4(&app, 128).await;
    let json = poll_until_terminal(&app, json["videoId"].as_str().unwrap()).await;
    let results = &json["analysis"]["results"];
    assert_eq!(results["technique"]["overallScore"], 85);
    assert!(results["technique"]["timeMarkers"].is_array());
    assert!(results["strategy"]["patterns"].is_array());
}

#[tokio::test]
async fn pdf_upload_is_rejected_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let upload_root = config.upload_root.clone();
    let (app, state, _rx) = test_app(config, Arc::new(FixtureEngine::new(Duration::ZERO))).await;

    let body = multipart_body(
        &[("userId", "u1"), ("shopId", "s1")],
        Some(("report.pdf", "application/pdf", b"%PDF-1.4")),
    );
    let (status, json) = send(&app, upload_request(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert!(json["error"]
        .as_str()
        .unwrap()
        .starts_with("Invalid file type"));
    assert!(state.store.is_empty().await);
    assert_eq!(std::fs::read_dir(&upload_root).unwrap().count(), 0);
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.max_upload_bytes = 1024;
    let upload_root = config.upload_root.clone();
    let (app, state, _rx) = test_app(config, Arc::new(FixtureEngine::new(Duration::ZERO))).await;

    let (status, json) = upload_mp4(&app, 4096).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert!(json["error"].as_str().unwrap().starts_with("File too large"));
    assert!(state.store.is_empty().await);
    assert_eq!(std::fs::read_dir(&upload_root).unwrap().count(), 0);
}

#[tokio::test]
async fn upload_without_owner_fields_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (app, state, _rx) = test_app(
        test_config(dir.path()),
        Arc::new(FixtureEngine::new(Duration::ZERO)),
    )
    .await;

    let body = multipart_body(
        &[("userId", "u1")],
        Some(("serve.mp4", "video/mp4", b"0000")),
    );
    let (status, json) = send(&app, upload_request(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);

    let body = multipart_body(&[("userId", "u1"), ("shopId", "s1")], None);
    let (status, json) = send(&app, upload_request(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "No video file uploaded");
    assert!(state.store.is_empty().await);
}

#[tokio::test]
async fn non_multipart_upload_gets_json_error() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _state, _rx) = test_app(
        test_config(dir.path()),
        Arc::new(FixtureEngine::new(Duration::ZERO)),
    )
    .await;

    let (status, json) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/api/upload-video")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn unknown_analysis_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _state, _rx) = test_app(
        test_config(dir.path()),
        Arc::new(FixtureEngine::new(Duration::ZERO)),
    )
    .await;

    let (status, json) = get_analysis(&app, "does-not-exist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "Analysis not found");
}

#[tokio::test]
async fn failed_analysis_reports_status_only() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _state) = running_app(test_config(dir.path()), Arc::new(FailingEngine)).await;

    let (status, json) = upload_mp4(&app, 256).await;
    assert_eq!(status, StatusCode::OK);
    let json = poll_until_terminal(&app, json["videoId"].as_str().unwrap()).await;
    assert_eq!(json["analysis"]["status"], "failed");
    assert!(json["analysis"].get("results").is_none());
    assert!(!json.to_string().contains("tracking model crashed"));
}

#[tokio::test]
async fn completed_analysis_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.database_path = Some(dir.path().join("db").join("analyses.db"));

    let video_id = {
        let (app, _state) = running_app(
            config.clone(),
            Arc::new(FixtureEngine::new(Duration::ZERO)),
        )
        .await;
        let (_, json) = upload_mp4(&app, 256).await;
        let video_id = json["videoId"].as_str().unwrap().to_string();
        poll_until_terminal(&app, &video_id).await;
        video_id
    };

    let (app, _state, _rx) = test_app(config, Arc::new(FailingEngine)).await;
    let (status, json) = get_analysis(&app, &video_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["analysis"]["status"], "completed");
    assert_eq!(json["analysis"]["results"]["footwork"]["overallScore"], 78);
}

#[tokio::test]
async fn uninstall_webhook_is_acknowledged() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _state, _rx) = test_app(
        test_config(dir.path()),
        Arc::new(FixtureEngine::new(Duration::ZERO)),
    )
    .await;

    let (status, json) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/webhooks/app_uninstalled")
            .header("X-Shopify-Shop-Domain", "demo.myshopify.com")
            .body(Body::from("{\"id\":1}"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, Value::Null);
}
