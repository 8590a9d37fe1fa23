//! Route handlers.
//!
//! - `GET /exports/{export_id}/download` streams a generated ZIP archive.
//! - `GET /health` reports liveness and the request defaults.
//! - `GET /` describes the API.

use super::{
    error::{ApiError, ApiResult},
    state::AppState,
};
use crate::server::{
    streaming::coordinator::stream_export,
    telemetry::{increment_requests, increment_stream_errors, record_export_size},
};
use axum::{
    Json,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{SecondsFormat, Utc};
use exportgen::{ExportPlan, GenerationRequest, MIB, PipelineOptions};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Query parameters of the download route. Missing values fall back to the
/// server defaults.
#[derive(Debug, Default, Deserialize)]
pub struct DownloadParams {
    /// Startup delay in milliseconds.
    #[serde(rename = "delay")]
    pub delay_ms: Option<u64>,
    /// Archive size in MiB.
    #[serde(rename = "sizeMB")]
    pub size_mb: Option<u64>,
    /// Rate limit in KiB/s, `0` for unlimited.
    #[serde(rename = "throttleKBps")]
    pub throttle_kbps: Option<u64>,
}

/// Streams a synthetic export.
///
/// Validation happens before anything is sent, so bad parameters produce a
/// `400` with a JSON body. The startup delay is then waited out without
/// committing the response; once it is over the headers go out and the
/// archive streams until done, the client leaves, or the server shuts down.
#[tracing::instrument(skip_all, fields(export_id = %export_id))]
pub async fn download(
    State(state): State<AppState>,
    Path(export_id): Path<String>,
    query: Result<Query<DownloadParams>, QueryRejection>,
) -> ApiResult<Response> {
    if state.is_draining() {
        increment_stream_errors();
        return Err(ApiError::ShuttingDown);
    }

    let Query(params) = query.map_err(|e| {
        increment_stream_errors();
        ApiError::BadRequest(e.body_text())
    })?;

    let config = state.config();
    let request = GenerationRequest::from_units(
        export_id,
        params.size_mb.unwrap_or(config.default_size_mb),
        params.delay_ms.unwrap_or(config.default_delay_ms),
        params.throttle_kbps.unwrap_or(config.default_throttle_kbps),
        &config.limits,
    )
    .inspect_err(|e| {
        increment_stream_errors();
        tracing::warn!("Rejected download: {e}");
    })?;
    let plan = ExportPlan::new(request, config.files_per_gib);

    increment_requests();
    record_export_size(plan.total_size_bytes() as f64);
    log_request(&plan);

    let guard = state.track();

    let delay = plan.request().startup_delay();
    if !delay.is_zero() {
        tracing::info!("Waiting {}ms before starting response", delay.as_millis());
        tokio::select! {
            () = state.shutdown_token().cancelled() => {
                increment_stream_errors();
                return Err(ApiError::ShuttingDown);
            }
            () = tokio::time::sleep(delay) => {}
        }
    }

    let disposition = format!(
        "attachment; filename=\"{}\"",
        plan.request().archive_name()
    );
    let body = stream_export(
        plan,
        PipelineOptions {
            compression: config.compression,
        },
        config.stream_buffer_size,
        state.shutdown_token().clone(),
        guard,
    );

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_owned()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

fn log_request(plan: &ExportPlan) {
    let request = plan.request();
    let delay = request.startup_delay();
    let size = request.total_size_bytes();
    let rate = request.rate_limit_bytes_per_sec();

    tracing::info!(
        delay_ms = delay.as_millis() as u64,
        size_bytes = size,
        rate_bytes_per_sec = rate,
        files = plan.file_count(),
        "Download requested: delay {}ms ({:.2} minutes), size {}MB ({:.2}GB), throttle {}",
        delay.as_millis(),
        delay.as_secs_f64() / 60.0,
        size / MIB,
        size as f64 / (1024.0 * MIB as f64),
        if rate > 0 {
            format!("{} KB/s", rate / 1024)
        } else {
            "disabled".to_owned()
        }
    );

    if let Some(eta) = plan.estimated_transfer_time() {
        tracing::info!(
            "Estimated transfer time: {:.2} minutes",
            eta.as_secs_f64() / 60.0
        );
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub config: HealthConfig,
}

#[derive(Debug, Serialize)]
pub struct HealthConfig {
    #[serde(rename = "defaultDelayMs")]
    pub default_delay_ms: u64,
    #[serde(rename = "defaultSizeMB")]
    pub default_size_mb: u64,
    #[serde(rename = "defaultThrottleKBps")]
    pub default_throttle_kbps: u64,
}

/// `UP` with `200` while serving, `DRAINING` with `503` once shutdown began.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (code, status) = if state.is_draining() {
        (StatusCode::SERVICE_UNAVAILABLE, "DRAINING")
    } else {
        (StatusCode::OK, "UP")
    };

    let config = state.config();
    (
        code,
        Json(HealthResponse {
            status,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            config: HealthConfig {
                default_delay_ms: config.default_delay_ms,
                default_size_mb: config.default_size_mb,
                default_throttle_kbps: config.default_throttle_kbps,
            },
        }),
    )
}

pub async fn index() -> Json<Value> {
    Json(json!({
        "service": "exportgen",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "download": "GET /exports/{exportId}/download",
            "health": "GET /health"
        },
        "queryParameters": {
            "delay": "Initial delay in milliseconds (e.g., 120000 for 2 minutes)",
            "sizeMB": "File size in MB (e.g., 1024 for 1GB, 5120 for 5GB)",
            "throttleKBps": "Download speed limit in KB/s (e.g., 512)"
        },
        "examples": {
            "small": "/exports/test/download?delay=0&sizeMB=10",
            "medium": "/exports/test/download?delay=60000&sizeMB=100",
            "large": "/exports/test/download?delay=120000&sizeMB=1024",
            "huge": "/exports/test/download?delay=300000&sizeMB=5120&throttleKBps=512"
        }
    }))
}
