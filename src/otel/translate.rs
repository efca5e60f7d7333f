//! OTLP spans to domain spans

use serde_json::Value;

use super::model::{self, AnyValue, ExportTraceServiceRequest, SpanKind, SpanStatus};
use crate::model::{IdError, KeyValue, Log, Process, Span, SpanId, SpanRef, TagValue, TraceId};

const SERVICE_NAME_ATTRIBUTE: &str = "service.name";
const UNKNOWN_SERVICE: &str = "unknown_service";

/// Result of translating one export request. Spans that could not be
/// translated are reported in `rejected`, the rest are kept.
#[derive(Debug, Default)]
pub struct Translation {
    pub spans: Vec<Span>,
    pub rejected: Vec<TranslateError>,
}

pub fn translate(request: ExportTraceServiceRequest) -> Translation {
    let mut translation = Translation::default();

    for resource_spans in request.resource_spans {
        let attributes = resource_spans
            .resource
            .map(|r| r.attributes)
            .unwrap_or_default();
        let process = resource_process(&attributes);

        for scope_spans in resource_spans.scope_spans {
            let mut scope_tags = Vec::new();
            if let Some(scope) = &scope_spans.scope {
                if let Some(name) = scope.name.as_deref().filter(|n| !n.is_empty()) {
                    scope_tags.push(KeyValue::string("otel.scope.name", name));
                }
                if let Some(version) = scope.version.as_deref().filter(|v| !v.is_empty()) {
                    scope_tags.push(KeyValue::string("otel.scope.version", version));
                }
            }

            for span in scope_spans.spans {
                match translate_span(span, &process, &scope_tags) {
                    Ok(span) => translation.spans.push(span),
                    Err(e) => translation.rejected.push(e),
                }
            }
        }
    }

    translation
}

fn resource_process(attributes: &[model::KeyValue]) -> Process {
    let mut process = Process::new(UNKNOWN_SERVICE);
    for kv in attributes {
        if kv.key == SERVICE_NAME_ATTRIBUTE {
            if let Some(name) = kv.value.string_value.as_deref().filter(|n| !n.is_empty()) {
                process.service_name = name.to_string();
                continue;
            }
        }
        if let Some(value) = tag_value(&kv.value) {
            process.tags.push(KeyValue::new(kv.key.clone(), value));
        }
    }
    process
}

fn translate_span(
    span: model::Span,
    process: &Process,
    scope_tags: &[KeyValue],
) -> Result<Span, TranslateError> {
    let trace_id = parse_trace_id(&span.trace_id)?;
    let span_id = parse_span_id(&span.span_id)?;

    let start = span
        .start_time_unix_nano
        .as_i64()
        .ok_or_else(|| TranslateError::InvalidTimestamp(span.span_id.clone()))?;
    let end = span
        .end_time_unix_nano
        .as_i64()
        .ok_or_else(|| TranslateError::InvalidTimestamp(span.span_id.clone()))?;

    let mut out = Span::new(trace_id, span_id, span.name, process.clone());
    out.start_time = nanos_to_micros(start);
    out.duration = nanos_to_micros(end).saturating_sub(out.start_time);
    out.flags = span.flags.unwrap_or(0);

    if let Some(parent) = span.parent_span_id.as_deref().filter(|p| !p.is_empty()) {
        out.references
            .push(SpanRef::child_of(trace_id, parse_span_id(parent)?));
    }
    for link in &span.links {
        match (parse_trace_id(&link.trace_id), parse_span_id(&link.span_id)) {
            (Ok(linked_trace), Ok(linked_span)) => out
                .references
                .push(SpanRef::follows_from(linked_trace, linked_span)),
            _ => tracing::warn!("Dropping unparseable link on span {}", span.span_id),
        }
    }

    for kv in &span.attributes {
        if let Some(value) = tag_value(&kv.value) {
            out.tags.push(KeyValue::new(kv.key.clone(), value));
        }
    }
    if let Some(kind) = SpanKind::from_i32(span.kind.unwrap_or(0)).tag_value() {
        out.tags.push(KeyValue::string("span.kind", kind));
    }
    if let Some(status) = &span.status {
        let code = SpanStatus::from_i32(status.code.unwrap_or(0));
        if code != SpanStatus::Unset {
            out.tags.push(KeyValue::string("otel.status_code", code.as_str()));
        }
        if code == SpanStatus::Error {
            out.tags.push(KeyValue::bool("error", true));
        }
        if let Some(message) = status.message.as_deref().filter(|m| !m.is_empty()) {
            out.tags
                .push(KeyValue::string("otel.status_description", message));
        }
    }
    out.tags.extend(scope_tags.iter().cloned());

    out.logs = span
        .events
        .iter()
        .map(|event| {
            let mut fields = vec![KeyValue::string("event", event.name.clone())];
            fields.extend(event.attributes.iter().filter_map(|kv| {
                tag_value(&kv.value).map(|value| KeyValue::new(kv.key.clone(), value))
            }));
            Log {
                timestamp: event
                    .time_unix_nano
                    .as_ref()
                    .and_then(model::JsonInt::as_i64)
                    .map_or(out.start_time, nanos_to_micros),
                fields,
            }
        })
        .collect();

    Ok(out)
}

/// Arrays and key/value lists are kept as their JSON text
fn tag_value(value: &AnyValue) -> Option<TagValue> {
    if let Some(s) = &value.string_value {
        return Some(TagValue::String(s.clone()));
    }
    if let Some(i) = value.int_value.as_ref().and_then(model::JsonInt::as_i64) {
        return Some(TagValue::Int64(i));
    }
    if let Some(d) = value.double_value {
        return Some(TagValue::Float64(d));
    }
    if let Some(b) = value.bool_value {
        return Some(TagValue::Bool(b));
    }
    value
        .array_value
        .as_ref()
        .or(value.kvlist_value.as_ref())
        .map(|raw: &Value| TagValue::String(raw.to_string()))
}

fn nanos_to_micros(nanos: i64) -> u64 {
    (nanos.max(0) / 1_000) as u64
}

fn parse_trace_id(id: &str) -> Result<TraceId, TranslateError> {
    TraceId::from_hex(id).map_err(|source| TranslateError::InvalidTraceId {
        id: id.to_string(),
        source,
    })
}

fn parse_span_id(id: &str) -> Result<SpanId, TranslateError> {
    SpanId::from_hex(id).map_err(|source| TranslateError::InvalidSpanId {
        id: id.to_string(),
        source,
    })
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TranslateError {
    #[error("invalid trace id {id}: {source}")]
    InvalidTraceId {
        id: String,
        #[source]
        source: IdError,
    },

    #[error("invalid span id {id}: {source}")]
    InvalidSpanId {
        id: String,
        #[source]
        source: IdError,
    },

    #[error("invalid timestamp on span {0}")]
    InvalidTimestamp(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{find_tag, SpanRefType};

    fn request(json: &str) -> ExportTraceServiceRequest {
        serde_json::from_str(json).unwrap()
    }

    const EXPORT: &str = r#"{
        "resourceSpans": [{
            "resource": {
                "attributes": [
                    {"key": "service.name", "value": {"stringValue": "checkout"}},
                    {"key": "host.name", "value": {"stringValue": "web-1"}}
                ]
            },
            "scopeSpans": [{
                "scope": {"name": "my-lib", "version": "1.0"},
                "spans": [{
                    "traceId": "5b8aa5a2d2c872e8321cf37308d69df2",
                    "spanId": "051581bf3cb55c13",
                    "parentSpanId": "00000000000000aa",
                    "name": "GET /api/users",
                    "kind": 2,
                    "startTimeUnixNano": "1544712660000000000",
                    "endTimeUnixNano": "1544712661000000000",
                    "attributes": [
                        {"key": "http.status_code", "value": {"intValue": "500"}},
                        {"key": "retry", "value": {"boolValue": false}},
                        {"key": "ratio", "value": {"doubleValue": 0.5}},
                        {"key": "ids", "value": {"arrayValue": {"values": [{"intValue": "1"}]}}}
                    ],
                    "events": [{
                        "name": "exception",
                        "timeUnixNano": "1544712660500000000",
                        "attributes": [{"key": "exception.type", "value": {"stringValue": "Timeout"}}]
                    }],
                    "links": [{"traceId": "0af7651916cd43dd8448eb211c80319c", "spanId": "b7ad6b7169203331"}],
                    "status": {"code": 2, "message": "upstream timeout"}
                }]
            }]
        }]
    }"#;

    #[test]
    fn test_translate_span() {
        let translation = translate(request(EXPORT));
        assert!(translation.rejected.is_empty());
        assert_eq!(translation.spans.len(), 1);

        let span = &translation.spans[0];
        assert_eq!(span.trace_id.to_hex(), "5b8aa5a2d2c872e8321cf37308d69df2");
        assert_eq!(span.span_id.to_hex(), "051581bf3cb55c13");
        assert_eq!(span.operation_name, "GET /api/users");
        assert_eq!(span.start_time, 1_544_712_660_000_000);
        assert_eq!(span.duration, 1_000_000);

        assert_eq!(span.process.service_name, "checkout");
        assert_eq!(span.process.tags, vec![KeyValue::string("host.name", "web-1")]);

        assert_eq!(span.references.len(), 2);
        assert_eq!(span.references[0].ref_type, SpanRefType::ChildOf);
        assert_eq!(span.references[0].span_id, SpanId(0xaa));
        assert_eq!(span.references[1].ref_type, SpanRefType::FollowsFrom);
        assert_eq!(span.parent_span_id(), Some(SpanId(0xaa)));

        let tag = |key: &str| find_tag(&span.tags, key).map(|kv| kv.value.clone());
        assert_eq!(tag("http.status_code"), Some(TagValue::Int64(500)));
        assert_eq!(tag("retry"), Some(TagValue::Bool(false)));
        assert_eq!(tag("ratio"), Some(TagValue::Float64(0.5)));
        assert_eq!(
            tag("ids"),
            Some(TagValue::String(r#"{"values":[{"intValue":"1"}]}"#.to_string()))
        );
        assert_eq!(tag("span.kind"), Some(TagValue::String("server".to_string())));
        assert_eq!(tag("otel.status_code"), Some(TagValue::String("ERROR".to_string())));
        assert_eq!(tag("error"), Some(TagValue::Bool(true)));
        assert_eq!(
            tag("otel.status_description"),
            Some(TagValue::String("upstream timeout".to_string()))
        );
        assert_eq!(tag("otel.scope.name"), Some(TagValue::String("my-lib".to_string())));

        assert_eq!(span.logs.len(), 1);
        assert_eq!(span.logs[0].timestamp, 1_544_712_660_500_000);
        assert_eq!(span.logs[0].fields[0], KeyValue::string("event", "exception"));
        assert_eq!(span.logs[0].fields[1], KeyValue::string("exception.type", "Timeout"));
    }

    #[test]
    fn test_missing_service_name() {
        let translation = translate(request(
            r#"{"resourceSpans": [{"scopeSpans": [{"spans": [{
                "traceId": "01", "spanId": "02", "name": "op", "kind": 1,
                "startTimeUnixNano": 2000, "endTimeUnixNano": 5000
            }]}]}]}"#,
        ));

        let span = &translation.spans[0];
        assert_eq!(span.process.service_name, "unknown_service");
        assert!(span.tags.is_empty());
        assert!(span.references.is_empty());
        assert_eq!(span.start_time, 2);
        assert_eq!(span.duration, 3);
    }

    #[test]
    fn test_bad_spans_are_rejected() {
        let translation = translate(request(
            r#"{"resourceSpans": [{"scopeSpans": [{"spans": [
                {"traceId": "zz", "spanId": "02", "name": "a",
                 "startTimeUnixNano": "1", "endTimeUnixNano": "2"},
                {"traceId": "01", "spanId": "02", "name": "b",
                 "startTimeUnixNano": "later", "endTimeUnixNano": "2"},
                {"traceId": "01", "spanId": "03", "name": "c",
                 "startTimeUnixNano": "1000", "endTimeUnixNano": "2000"}
            ]}]}]}"#,
        ));

        assert_eq!(translation.spans.len(), 1);
        assert_eq!(translation.spans[0].operation_name, "c");
        assert_eq!(translation.rejected.len(), 2);
        assert!(matches!(
            translation.rejected[0],
            TranslateError::InvalidTraceId { .. }
        ));
        assert_eq!(
            translation.rejected[1],
            TranslateError::InvalidTimestamp("02".to_string())
        );
    }
}
