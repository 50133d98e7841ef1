//! HTTP handlers

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::BTreeMap;
use tracing::info;

use crate::core::manager::PreparedDownload;
use crate::core::models::{
    AppError, AppResult, DownloadRequest, ErrorResponse, FormatQuery, FormatsResponse, HealthReport,
    InfoResponse, ServiceBanner,
};
use crate::AppState;

pub const SERVICE_NAME: &str = "Universal Video Downloader API";

type JsonBody = Result<Json<DownloadRequest>, JsonRejection>;

pub async fn root() -> Json<ServiceBanner> {
    let endpoints = [
        ("/info", "POST - Get video information"),
        ("/download", "POST - Download video"),
        ("/download/format", "POST - Download a specific format (?format_id=)"),
        ("/formats", "POST - List available formats"),
        ("/health", "GET - Health check"),
    ]
    .into_iter()
    .map(|(path, desc)| (path.to_string(), desc.to_string()))
    .collect::<BTreeMap<_, _>>();

    Json(ServiceBanner {
        service: SERVICE_NAME.to_string(),
        status: "operational".to_string(),
        version: crate::VERSION.to_string(),
        endpoints,
    })
}

pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    let ytdlp_version = state
        .manager
        .tool_version()
        .await
        .unwrap_or_else(|| "not found".to_string());

    Json(HealthReport {
        status: "healthy".to_string(),
        ytdlp_version,
        service_version: crate::VERSION.to_string(),
        downloads: state.manager.statistics(),
    })
}

pub async fn info(State(state): State<AppState>, body: JsonBody) -> AppResult<Json<InfoResponse>> {
    let Json(request) = body?;
    info!("Getting video info for: {}", request.video_url);
    Ok(Json(state.manager.info(&request.video_url).await?))
}

pub async fn formats(
    State(state): State<AppState>,
    body: JsonBody,
) -> AppResult<Json<FormatsResponse>> {
    let Json(request) = body?;
    info!("Listing formats for: {}", request.video_url);
    Ok(Json(state.manager.formats(&request.video_url).await?))
}

pub async fn download(State(state): State<AppState>, body: JsonBody) -> AppResult<Response> {
    let Json(request) = body?;
    info!(
        "Download requested for {} (quality: {:?})",
        request.video_url, request.quality
    );
    let prepared = state
        .manager
        .download(&request.video_url, request.quality.as_deref())
        .await?;
    stream_response(prepared)
}

pub async fn download_format(
    State(state): State<AppState>,
    Query(query): Query<FormatQuery>,
    body: JsonBody,
) -> AppResult<Response> {
    let Json(request) = body?;
    let format_id = query
        .format_id
        .ok_or_else(|| AppError::InvalidRequest("format_id is required".to_string()))?;
    info!(
        "Download requested for {} (format: {})",
        request.video_url, format_id
    );
    let prepared = state
        .manager
        .download_format(&request.video_url, &format_id)
        .await?;
    stream_response(prepared)
}

/// Bytes left as-is in an RFC 5987 `ext-value`; everything else is percent-encoded
const RFC5987_ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// `Content-Disposition` value for a download. Non-ASCII names get an
/// ASCII `filename` plus an RFC 5987 `filename*` with the real name.
pub fn content_disposition(filename: &str) -> String {
    if filename.is_ascii() {
        return format!("attachment; filename=\"{}\"", filename);
    }

    let fallback: String = filename
        .chars()
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect();
    let encoded = utf8_percent_encode(filename, RFC5987_ATTR_CHAR);
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    )
}

fn stream_response(prepared: PreparedDownload) -> AppResult<Response> {
    let disposition = HeaderValue::from_str(&content_disposition(&prepared.filename))
        .map_err(|e| AppError::Download(format!("Invalid file name header: {}", e)))?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("video/mp4")),
            (header::CONTENT_DISPOSITION, disposition),
            (
                header::ACCESS_CONTROL_EXPOSE_HEADERS,
                HeaderValue::from_static("Content-Disposition"),
            ),
        ],
        Body::from_stream(prepared.stream),
    )
        .into_response())
}

/// Fallback for unknown routes
pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "Not found".to_string(),
            details: None,
            platform: None,
        }),
    )
}
