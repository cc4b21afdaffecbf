use std::error::Error;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use fundwatch_core::{Regions, Secret, Snapshot, SnapshotStats};
use fundwatchd::persist::Persistor;
use fundwatchd::pipeline::Trigger;
use fundwatchd::scheduler::{RunRequest, SharedState, run_queue};
use fundwatchd::server::{AppState, router};
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::{TempDir, tempdir};
use tokio::sync::mpsc;
use tower::ServiceExt;

struct Harness {
    app: Router,
    receiver: mpsc::Receiver<RunRequest>,
    persistor: Persistor,
    _temp: TempDir,
}

fn harness(api_key: Option<&str>, capacity: usize) -> Result<Harness, Box<dyn Error>> {
    let temp = tempdir()?;
    let persistor = Persistor::new(temp.path().join("congressData.json"));
    let (queue, receiver) = run_queue(capacity);
    let app = router(AppState {
        queue,
        scheduler: SharedState::default(),
        persistor: persistor.clone(),
        api_key: api_key.map(|key| Secret::new(key.to_owned())),
    });

    Ok(Harness {
        app,
        receiver,
        persistor,
        _temp: temp,
    })
}

fn trigger_request(uri: &str, header_key: Option<&str>) -> Result<Request<Body>, Box<dyn Error>> {
    let mut builder = Request::builder().method("POST").uri(uri);
    if let Some(key) = header_key {
        builder = builder.header("x-api-key", key);
    }
    Ok(builder.body(Body::empty())?)
}

fn get_request(uri: &str) -> Result<Request<Body>, Box<dyn Error>> {
    Ok(Request::builder().method("GET").uri(uri).body(Body::empty())?)
}

async fn send(app: &Router, request: Request<Body>) -> Result<(StatusCode, Value), Box<dyn Error>> {
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = response.into_body().collect().await?.to_bytes();
    Ok((status, serde_json::from_slice(&bytes)?))
}

#[tokio::test]
async fn trigger_rejects_missing_or_wrong_key() -> Result<(), Box<dyn Error>> {
    let mut harness = harness(Some("s3cret"), 4)?;

    let (status, body) = send(&harness.app, trigger_request("/update-data", None)?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");

    let (status, _) = send(&harness.app, trigger_request("/update-data", Some("guess"))?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &harness.app,
        trigger_request("/update-data?apiKey=guess", None)?,
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert!(harness.receiver.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn trigger_with_header_or_query_key_enqueues_manual_run() -> Result<(), Box<dyn Error>> {
    let mut harness = harness(Some("s3cret"), 4)?;

    let (status, body) =
        send(&harness.app, trigger_request("/update-data", Some("s3cret"))?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "started");
    assert!(body["timestamp"].is_string());
    assert_eq!(harness.receiver.try_recv()?.trigger, Trigger::Manual);

    let (status, _) = send(
        &harness.app,
        trigger_request("/api/update-data?apiKey=s3cret", None)?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(harness.receiver.try_recv()?.trigger, Trigger::Manual);
    Ok(())
}

#[tokio::test]
async fn trigger_without_configured_key_is_always_unauthorized() -> Result<(), Box<dyn Error>> {
    let harness = harness(None, 4)?;

    let (status, _) = send(&harness.app, trigger_request("/update-data", Some(""))?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&harness.app, trigger_request("/update-data", Some("any"))?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn full_queue_answers_too_many_requests() -> Result<(), Box<dyn Error>> {
    let harness = harness(Some("k"), 1)?;

    let (status, _) = send(&harness.app, trigger_request("/update-data", Some("k"))?).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&harness.app, trigger_request("/update-data", Some("k"))?).await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body["error"].is_string());
    Ok(())
}

#[tokio::test]
async fn status_is_not_found_before_first_snapshot() -> Result<(), Box<dyn Error>> {
    let harness = harness(Some("k"), 1)?;

    let (status, body) = send(&harness.app, get_request("/update-status")?).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
    assert_eq!(body["running"], false);
    assert!(body["lastRun"].is_null());
    Ok(())
}

#[tokio::test]
async fn status_reports_snapshot_summary_on_both_mounts() -> Result<(), Box<dyn Error>> {
    let harness = harness(Some("k"), 1)?;
    let stats = SnapshotStats {
        region_count: 50,
        record_count: 535,
        total_amount: 250_000_000,
    };
    harness.persistor.persist(&Snapshot::new(
        Utc::now(),
        "https://origin.invalid/congress",
        stats,
        Regions::new(),
    ))?;

    for uri in ["/update-status", "/api/update-status"] {
        let (status, body) = send(&harness.app, get_request(uri)?).await?;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert_eq!(body["totalStates"], 50);
        assert_eq!(body["totalCongresspeople"], 535);
        assert_eq!(body["totalMoney"], 250_000_000);
        assert_eq!(body["source"], "https://origin.invalid/congress");
        assert!(body["lastUpdated"].is_string());
    }
    Ok(())
}

#[tokio::test]
async fn health_is_open() -> Result<(), Box<dyn Error>> {
    let harness = harness(None, 1)?;
    let (status, body) = send(&harness.app, get_request("/api/health")?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    Ok(())
}
