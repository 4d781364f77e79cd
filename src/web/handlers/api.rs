use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::error::ReportError;
use crate::pipeline::GeneratedReport;
use crate::web::state::AppState;

/// Longest natural-language request accepted, in characters.
pub const MAX_REQUEST_CHARS: usize = 2000;
/// SQL longer than this is cut short in the response header.
const MAX_SQL_HEADER_CHARS: usize = 4096;

pub const X_GENERATED_SQL: HeaderName = HeaderName::from_static("x-generated-sql");
pub const X_QUERY_PROVENANCE: HeaderName = HeaderName::from_static("x-query-provenance");
pub const X_TOTAL_COUNT: HeaderName = HeaderName::from_static("x-total-count");
pub const X_EXECUTION_TIME: HeaderName = HeaderName::from_static("x-execution-time");

// Report types

#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    pub request: String,
    #[serde(default)]
    pub model: Option<String>,
}

impl ReportRequest {
    fn validate(&self) -> Result<&str, ReportError> {
        let text = self.request.trim();
        if text.is_empty() {
            return Err(ReportError::BadRequest(
                "The report request must not be empty".to_string(),
            ));
        }
        if text.chars().count() > MAX_REQUEST_CHARS {
            return Err(ReportError::BadRequest(format!(
                "The report request must be at most {} characters",
                MAX_REQUEST_CHARS
            )));
        }
        Ok(text)
    }

    fn model(&self) -> Option<&str> {
        self.model.as_deref().map(str::trim).filter(|m| !m.is_empty())
    }
}

// Schema types

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub version: u64,
    pub analyzed_at: DateTime<Utc>,
    pub table_count: usize,
    pub warnings: Vec<String>,
}

// System status

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub ai_backend: String,
    pub ai_enabled: bool,
    pub default_model: String,
    pub schema_version: Option<u64>,
    pub table_count: Option<usize>,
}

// API Implementations

async fn run_pipeline(
    state: &AppState,
    payload: &ReportRequest,
) -> Result<GeneratedReport, ReportError> {
    let request = payload.validate()?;
    info!("Report requested: {}", request);

    state
        .pipeline
        .generate(request, payload.model())
        .await
        .inspect_err(|e| error!("Report generation failed: {}", e))
}

/// Header values must be visible ASCII on a single line.
fn header_safe(text: &str) -> HeaderValue {
    let flattened: String = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '?' })
        .take(MAX_SQL_HEADER_CHARS)
        .collect();

    HeaderValue::from_str(&flattened).unwrap_or_else(|_| HeaderValue::from_static(""))
}

// Report generation: the JRXML file as an attachment
pub async fn generate_report(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ReportRequest>,
) -> Result<Response, ReportError> {
    let report = run_pipeline(&state, &payload).await?;

    let disposition = header_safe(&format!("attachment; filename=\"{}\"", report.file_name));
    let headers = [
        (
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/xml; charset=utf-8"),
        ),
        (header::CONTENT_DISPOSITION, disposition),
        (X_GENERATED_SQL, header_safe(&report.sql)),
        (X_QUERY_PROVENANCE, header_safe(&report.provenance.to_string())),
        (X_TOTAL_COUNT, HeaderValue::from(report.row_count)),
        (
            X_EXECUTION_TIME,
            header_safe(&format!("{}ms", report.execution_ms)),
        ),
    ];

    Ok((StatusCode::OK, headers, report.jrxml).into_response())
}

// Report preview: the same pipeline, answered as JSON
pub async fn preview_report(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ReportRequest>,
) -> Result<Json<GeneratedReport>, ReportError> {
    let report = run_pipeline(&state, &payload).await?;
    Ok(Json(report))
}

// Schema
pub async fn get_schema(State(state): State<Arc<AppState>>) -> Result<Response, ReportError> {
    let snapshot = state
        .schema_manager
        .snapshot()
        .await
        .map_err(|e| state.sanitize(e))?;

    Ok(Json(&*snapshot).into_response())
}

pub async fn refresh_schema(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RefreshResponse>, ReportError> {
    let snapshot = state
        .schema_manager
        .refresh_cache()
        .await
        .map_err(|e| state.sanitize(e))?;

    Ok(Json(RefreshResponse {
        version: snapshot.version,
        analyzed_at: snapshot.analyzed_at,
        table_count: snapshot.schema.tables.len(),
        warnings: snapshot.schema.warnings.clone(),
    }))
}

// System status
pub async fn system_status(State(state): State<Arc<AppState>>) -> Json<SystemStatus> {
    let now = Utc::now();
    let uptime = now.signed_duration_since(state.startup_time).num_seconds();
    let snapshot = state.schema_manager.current().await;

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        ai_backend: state.llm_manager.backend().to_string(),
        ai_enabled: state.llm_manager.is_enabled(),
        default_model: state.llm_manager.default_model().to_string(),
        schema_version: snapshot.as_ref().map(|s| s.version),
        table_count: snapshot.as_ref().map(|s| s.schema.tables.len()),
    })
}
