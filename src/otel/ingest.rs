//! OTLP ingest handler

use axum::{extract::State, Json};
use std::sync::Arc;

use super::model::{ExportTraceServiceRequest, ExportTraceServiceResponse, PartialSuccess};
use super::translate::translate;
use crate::api::handlers::{ApiError, AppState};

/// Handle OTLP/HTTP trace export (JSON format)
///
/// Endpoint: POST /v1/traces
pub async fn handle_otlp_traces(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ExportTraceServiceRequest>,
) -> Result<Json<ExportTraceServiceResponse>, ApiError> {
    let translation = translate(payload);

    if !translation.spans.is_empty() {
        state.writer.write_spans(&translation.spans).await?;
    }

    if translation.rejected.is_empty() {
        return Ok(Json(ExportTraceServiceResponse::default()));
    }

    tracing::warn!(
        "OTLP ingest rejected {} of {} spans",
        translation.rejected.len(),
        translation.rejected.len() + translation.spans.len()
    );
    // OTLP reports partial failures with a 200
    Ok(Json(ExportTraceServiceResponse {
        partial_success: Some(PartialSuccess {
            rejected_spans: translation.rejected.len(),
            error_message: translation.rejected[0].to_string(),
        }),
    }))
}
