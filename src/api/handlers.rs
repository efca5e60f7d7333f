use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::model::{Operation, Span, Trace, TraceId};
use crate::spanstore::{
    OperationQueryParameters, SpanReader, SpanReaderError, SpanWriter, SpanWriterError,
    TraceQueryParameters,
};

/// Lookback used when a trace search names no start time
const DEFAULT_LOOKBACK_HOURS: i64 = 1;

/// Application state shared across handlers
pub struct AppState {
    pub reader: SpanReader,
    pub writer: SpanWriter,
}

/// `{"data": [...], "total": n}` with errors for partially failed reads
#[derive(Serialize)]
pub struct Envelope<T> {
    pub data: Vec<T>,
    pub total: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorEntry>,
}

impl<T> Envelope<T> {
    fn new(data: Vec<T>) -> Self {
        Self {
            total: data.len(),
            data,
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorEntry {
    pub code: u16,
    pub msg: String,
}

#[derive(Serialize)]
pub struct TraceView {
    #[serde(rename = "traceID")]
    pub trace_id: String,
    pub spans: Vec<Span>,
}

impl From<Trace> for TraceView {
    fn from(trace: Trace) -> Self {
        Self {
            trace_id: trace.trace_id().map(|id| id.to_hex()).unwrap_or_default(),
            spans: trace.spans,
        }
    }
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Services
// ============================================================================

pub async fn get_services(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Envelope<String>>, ApiError> {
    let services = state.reader.get_services().await?;
    Ok(Json(Envelope::new(services)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationsQuery {
    pub span_kind: Option<String>,
}

pub async fn get_operations(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
    Query(query): Query<OperationsQuery>,
) -> Result<Json<Envelope<Operation>>, ApiError> {
    let params = OperationQueryParameters {
        service_name: service,
        span_kind: query.span_kind.filter(|k| !k.is_empty()),
    };
    let operations = state.reader.get_operations(&params).await?;
    Ok(Json(Envelope::new(operations)))
}

// ============================================================================
// Traces
// ============================================================================

pub async fn get_trace(
    State(state): State<Arc<AppState>>,
    Path(trace_id): Path<String>,
) -> Result<Json<Envelope<TraceView>>, ApiError> {
    let trace_id = TraceId::from_hex(&trace_id).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let trace = state.reader.get_trace(trace_id).await?;
    Ok(Json(Envelope::new(vec![trace.into()])))
}

/// Query string of a trace search. Times are microseconds since epoch,
/// durations use humantime syntax (`10ms`, `1s`).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracesQuery {
    pub service: Option<String>,
    pub operation: Option<String>,
    /// JSON object of tag key to value
    pub tags: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub min_duration: Option<String>,
    pub max_duration: Option<String>,
    pub limit: Option<String>,
}

impl TracesQuery {
    fn into_parameters(self, now: DateTime<Utc>) -> Result<TraceQueryParameters, ApiError> {
        let end = match self.end.as_deref() {
            Some(end) => parse_micros("end", end)?,
            None => now,
        };
        let start = match self.start.as_deref() {
            Some(start) => parse_micros("start", start)?,
            None => end - chrono::Duration::hours(DEFAULT_LOOKBACK_HOURS),
        };

        let tags: BTreeMap<String, String> = match self.tags.as_deref() {
            Some(raw) if !raw.is_empty() => serde_json::from_str(raw).map_err(|e| {
                ApiError::BadRequest(format!("malformed 'tags' parameter: {}", e))
            })?,
            _ => BTreeMap::new(),
        };

        let num_traces = match self.limit.as_deref() {
            Some(limit) => limit
                .parse()
                .map_err(|e| ApiError::BadRequest(format!("invalid 'limit' parameter: {}", e)))?,
            None => 0,
        };

        Ok(TraceQueryParameters {
            service_name: self.service.unwrap_or_default(),
            operation_name: self.operation.filter(|op| !op.is_empty()),
            tags,
            start_time_min: Some(start),
            start_time_max: Some(end),
            duration_min: parse_duration("minDuration", self.min_duration.as_deref())?,
            duration_max: parse_duration("maxDuration", self.max_duration.as_deref())?,
            num_traces,
        })
    }
}

fn parse_micros(name: &str, value: &str) -> Result<DateTime<Utc>, ApiError> {
    let micros = value
        .parse::<u64>()
        .map_err(|e| ApiError::BadRequest(format!("invalid '{}' parameter: {}", name, e)))?;
    i64::try_from(micros)
        .ok()
        .and_then(DateTime::from_timestamp_micros)
        .ok_or_else(|| {
            ApiError::BadRequest(format!("'{}' parameter {} is out of range", name, micros))
        })
}

fn parse_duration(name: &str, value: Option<&str>) -> Result<Option<Duration>, ApiError> {
    match value.filter(|v| !v.is_empty()) {
        Some(v) => humantime::parse_duration(v)
            .map(Some)
            .map_err(|e| ApiError::BadRequest(format!("invalid '{}' parameter: {}", name, e))),
        None => Ok(None),
    }
}

pub async fn find_traces(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TracesQuery>,
) -> Result<Json<Envelope<TraceView>>, ApiError> {
    let params = query.into_parameters(Utc::now())?;

    match state.reader.find_traces(&params).await {
        Ok(traces) => Ok(Json(Envelope::new(
            traces.into_iter().map(TraceView::from).collect(),
        ))),
        Err(SpanReaderError::MalformedDocument { source, partial }) => {
            let mut envelope = Envelope::new(partial.into_iter().map(TraceView::from).collect());
            envelope.errors.push(ErrorEntry {
                code: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                msg: source.to_string(),
            });
            Ok(Json(envelope))
        }
        Err(e) => Err(e.into()),
    }
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<SpanReaderError> for ApiError {
    fn from(err: SpanReaderError) -> Self {
        match err {
            SpanReaderError::Validation(e) => ApiError::BadRequest(e.to_string()),
            SpanReaderError::TraceNotFound => ApiError::NotFound("trace not found".to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<SpanWriterError> for ApiError {
    fn from(err: SpanWriterError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "errors": [{"code": status.as_u16(), "msg": message}]
        });

        (status, Json(body)).into_response()
    }
}
