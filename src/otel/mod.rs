//! OpenTelemetry ingest
//!
//! Send traces via OTLP/HTTP:
//! ```bash
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:8080
//! OTEL_EXPORTER_OTLP_PROTOCOL=http/json
//! ```
//!
//! Or configure an OTel Collector to forward:
//! ```yaml
//! exporters:
//!   otlphttp:
//!     endpoint: http://spanseek:8080
//! ```
//!
//! Spans are translated into the domain model and written through the span
//! writer, so they are searchable like any other span.

mod ingest;
mod model;
mod translate;

pub use ingest::handle_otlp_traces;
pub use model::{ExportTraceServiceRequest, ExportTraceServiceResponse, SpanKind, SpanStatus};
pub use translate::{translate, TranslateError, Translation};
