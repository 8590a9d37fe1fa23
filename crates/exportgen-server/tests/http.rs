use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use clap::Parser;
use core::time::Duration;
use exportgen::MIB;
use futures::StreamExt;
use exportgen_server::server::{
    config::{CliArgs, ServerConfig},
    service::{router, state::AppState},
};
use serde_json::Value;
use std::io::{Cursor, Read};
use tokio::time::Instant;
use tower::ServiceExt;

fn state(extra: &[&str]) -> AppState {
    let mut argv = vec!["exportgen-server"];
    argv.extend_from_slice(extra);
    let config = ServerConfig::try_from(CliArgs::try_parse_from(argv).unwrap()).unwrap();
    AppState::new(config)
}

async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn index_describes_the_api() {
    let response = get(router(state(&[])), "/").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json(response).await;
    assert_eq!(body["service"], "exportgen");
    assert!(body["endpoints"]["download"].is_string());
    assert!(body["queryParameters"]["sizeMB"].is_string());
}

#[tokio::test]
async fn health_reports_defaults() {
    let app = router(state(&["--file-size-mb", "42", "--throttle-kbps", "512"]));
    let response = get(app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json(response).await;
    assert_eq!(body["status"], "UP");
    assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
    assert_eq!(body["config"]["defaultDelayMs"], 0);
    assert_eq!(body["config"]["defaultSizeMB"], 42);
    assert_eq!(body["config"]["defaultThrottleKBps"], 512);
}

#[tokio::test]
async fn rejects_zero_size() {
    let response = get(router(state(&[])), "/exports/test/download?sizeMB=0").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/json"
    );

    let body = json(response).await;
    assert_eq!(body["code"], "invalid_request");
    assert!(body["message"].as_str().unwrap().contains("Size"));
}

#[tokio::test]
async fn rejects_malformed_query() {
    for uri in [
        "/exports/test/download?sizeMB=abc",
        "/exports/test/download?delay=-5",
        "/exports/test/download?throttleKBps=1.5",
    ] {
        let response = get(router(state(&[])), uri).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(json(response).await["code"], "bad_request");
    }
}

#[tokio::test]
async fn rejects_values_above_limits() {
    let app = router(state(&[
        "--max-size-mb",
        "10",
        "--max-delay-ms",
        "1000",
        "--file-size-mb",
        "1",
    ]));
    let response = get(app.clone(), "/exports/test/download?sizeMB=11").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = get(app, "/exports/test/download?delay=1001").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rejects_unsafe_export_id() {
    let response = get(router(state(&[])), "/exports/a%20b/download?sizeMB=1").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await["code"], "invalid_request");
}

#[tokio::test]
async fn downloads_a_readable_archive() {
    let response = get(router(state(&[])), "/exports/report-7/download?sizeMB=2").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"export-report-7.zip\""
    );

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    let mut total = 0;
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).unwrap();
        let mut data = Vec::new();
        file.read_to_end(&mut data).unwrap();
        total += data.len() as u64;
    }
    assert_eq!(total, 2 * MIB);

    // Default entries are readable front to back, without the central
    // directory.
    let mut cursor = Cursor::new(&bytes[..]);
    let mut streamed = 0;
    let mut entries = 0;
    while let Some(mut file) = zip::read::read_zipfile_from_stream(&mut cursor).unwrap() {
        let mut data = Vec::new();
        file.read_to_end(&mut data).unwrap();
        streamed += data.len() as u64;
        entries += 1;
    }
    assert_eq!(entries, archive.len());
    assert_eq!(streamed, 2 * MIB);
}

#[tokio::test]
async fn deflate_level_compresses_the_archive() {
    let app = router(state(&["--compression-level", "1"]));
    let response = get(app, "/exports/small/download?sizeMB=1").await;
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!((bytes.len() as u64) < MIB);
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    assert_eq!(
        archive.by_index(0).unwrap().compression(),
        zip::CompressionMethod::Deflated
    );
}

#[tokio::test]
async fn client_disconnect_releases_the_stream() {
    let state = state(&[]);
    let response = get(router(state.clone()), "/exports/big/download?sizeMB=1024").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(state.streams_inflight(), 1);

    let mut body = response.into_body().into_data_stream();
    let mut received = 0;
    while received < 5 * MIB {
        received += body.next().await.unwrap().unwrap().len() as u64;
    }
    drop(body);

    tokio::time::timeout(Duration::from_secs(10), async {
        while state.streams_inflight() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("generation kept running after the client went away");
}

#[tokio::test(start_paused = true)]
async fn delay_holds_back_the_response() {
    let start = Instant::now();
    let response = get(
        router(state(&[])),
        "/exports/slow/download?delay=5000&sizeMB=1",
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(start.elapsed() >= Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn throttle_paces_the_body() {
    let response = get(
        router(state(&[])),
        "/exports/paced/download?sizeMB=1&throttleKBps=256",
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let start = Instant::now();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.len() as u64 > MIB);
    // 1 MiB at 256 KiB/s.
    assert!(start.elapsed() + Duration::from_millis(1) >= Duration::from_secs(4));
}

#[tokio::test]
async fn draining_refuses_downloads() {
    let state = state(&["--shutdown-timeout", "0"]);
    state.shutdown().await;

    let response = get(router(state.clone()), "/exports/test/download?sizeMB=1").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json(response).await["code"], "shutting_down");

    let response = get(router(state), "/health").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json(response).await["status"], "DRAINING");
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_startup_delay() {
    let state = state(&["--shutdown-timeout", "1"]);
    let app = router(state.clone());

    let request = tokio::spawn(async move {
        get(app, "/exports/test/download?delay=600000&sizeMB=1").await
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(state.streams_inflight(), 1);

    let start = Instant::now();
    state.shutdown().await;
    let response = request.await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(start.elapsed() < Duration::from_secs(600));
    assert_eq!(state.streams_inflight(), 0);
}
