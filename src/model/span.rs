//! Span, trace and process value types

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use super::ids::{SpanId, TraceId};
use super::value::KeyValue;

/// Relationship between two spans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpanRefType {
    ChildOf,
    FollowsFrom,
}

impl SpanRefType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanRefType::ChildOf => "CHILD_OF",
            SpanRefType::FollowsFrom => "FOLLOWS_FROM",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanRef {
    pub ref_type: SpanRefType,
    #[serde(rename = "traceID")]
    pub trace_id: TraceId,
    #[serde(rename = "spanID")]
    pub span_id: SpanId,
}

impl SpanRef {
    pub fn child_of(trace_id: TraceId, span_id: SpanId) -> Self {
        Self {
            ref_type: SpanRefType::ChildOf,
            trace_id,
            span_id,
        }
    }

    pub fn follows_from(trace_id: TraceId, span_id: SpanId) -> Self {
        Self {
            ref_type: SpanRefType::FollowsFrom,
            trace_id,
            span_id,
        }
    }
}

/// The process (service instance) that emitted a span
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    pub service_name: String,
    pub tags: Vec<KeyValue>,
}

impl Process {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            tags: Vec::new(),
        }
    }
}

/// A timestamped set of fields recorded during a span
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Log {
    /// Microseconds since epoch
    pub timestamp: u64,
    pub fields: Vec<KeyValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    #[serde(rename = "traceID")]
    pub trace_id: TraceId,
    #[serde(rename = "spanID")]
    pub span_id: SpanId,
    pub operation_name: String,
    pub references: Vec<SpanRef>,
    pub flags: u32,
    /// Microseconds since epoch
    pub start_time: u64,
    /// Microseconds
    pub duration: u64,
    pub tags: Vec<KeyValue>,
    pub logs: Vec<Log>,
    pub process: Process,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl Span {
    pub fn new(
        trace_id: TraceId,
        span_id: SpanId,
        operation_name: impl Into<String>,
        process: Process,
    ) -> Self {
        Self {
            trace_id,
            span_id,
            operation_name: operation_name.into(),
            references: Vec::new(),
            flags: 0,
            start_time: 0,
            duration: 0,
            tags: Vec::new(),
            logs: Vec::new(),
            process,
            warnings: Vec::new(),
        }
    }

    /// First CHILD_OF reference within the same trace
    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.references
            .iter()
            .find(|r| r.ref_type == SpanRefType::ChildOf && r.trace_id == self.trace_id)
            .map(|r| r.span_id)
    }

    pub fn start_datetime(&self) -> DateTime<Utc> {
        micros_to_datetime(self.start_time)
    }

    pub fn service_name(&self) -> &str {
        &self.process.service_name
    }
}

/// Spans sharing a trace id, in discovery order
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Trace {
    pub spans: Vec<Span>,
}

impl Trace {
    pub fn new(spans: Vec<Span>) -> Self {
        Self { spans }
    }

    pub fn trace_id(&self) -> Option<TraceId> {
        self.spans.first().map(|s| s.trace_id)
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

/// An operation name as recorded in the service index
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_kind: Option<String>,
}

pub fn datetime_to_micros(time: DateTime<Utc>) -> u64 {
    time.timestamp_micros().max(0) as u64
}

pub fn micros_to_datetime(micros: u64) -> DateTime<Utc> {
    let secs = (micros / 1_000_000) as i64;
    let nanos = (micros % 1_000_000) as u32 * 1_000;
    Utc.timestamp_opt(secs, nanos)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span_with_refs(refs: Vec<SpanRef>) -> Span {
        let mut span = Span::new(TraceId::new(0, 1), SpanId(2), "op", Process::new("svc"));
        span.references = refs;
        span
    }

    #[test]
    fn test_parent_span_id() {
        let trace = TraceId::new(0, 1);
        let span = span_with_refs(vec![
            SpanRef::follows_from(trace, SpanId(7)),
            SpanRef::child_of(TraceId::new(0, 9), SpanId(8)),
            SpanRef::child_of(trace, SpanId(3)),
        ]);
        assert_eq!(span.parent_span_id(), Some(SpanId(3)));

        let root = span_with_refs(vec![]);
        assert_eq!(root.parent_span_id(), None);
    }

    #[test]
    fn test_micros_round_trip() {
        let time = Utc.with_ymd_and_hms(2019, 10, 10, 5, 0, 0).unwrap();
        let micros = datetime_to_micros(time);
        assert_eq!(micros, 1_570_683_600_000_000);
        assert_eq!(micros_to_datetime(micros), time);
    }

    #[test]
    fn test_span_serializes_hex_ids() {
        let span = span_with_refs(vec![]);
        let json = serde_json::to_value(&span).unwrap();
        assert_eq!(json["traceID"], "0000000000000001");
        assert_eq!(json["spanID"], "0000000000000002");
        assert_eq!(json["process"]["serviceName"], "svc");
        assert!(json.get("warnings").is_none());
    }
}
