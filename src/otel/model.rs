//! OTLP/HTTP JSON trace export structures

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Span kind from OTel spec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpanKind {
    Unspecified,
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl SpanKind {
    /// Value of the `span.kind` tag, none for kinds that carry no meaning
    pub fn tag_value(&self) -> Option<&'static str> {
        match self {
            SpanKind::Server => Some("server"),
            SpanKind::Client => Some("client"),
            SpanKind::Producer => Some("producer"),
            SpanKind::Consumer => Some("consumer"),
            SpanKind::Internal | SpanKind::Unspecified => None,
        }
    }

    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => SpanKind::Internal,
            2 => SpanKind::Server,
            3 => SpanKind::Client,
            4 => SpanKind::Producer,
            5 => SpanKind::Consumer,
            _ => SpanKind::Unspecified,
        }
    }
}

/// Span status from OTel spec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpanStatus {
    Unset,
    Ok,
    Error,
}

impl SpanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanStatus::Unset => "UNSET",
            SpanStatus::Ok => "OK",
            SpanStatus::Error => "ERROR",
        }
    }

    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => SpanStatus::Ok,
            2 => SpanStatus::Error,
            _ => SpanStatus::Unset,
        }
    }
}

/// 64-bit integers arrive as strings from most exporters and as numbers
/// from some
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum JsonInt {
    Number(i64),
    Text(String),
}

impl JsonInt {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            JsonInt::Number(n) => Some(*n),
            JsonInt::Text(s) => s.parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportTraceServiceRequest {
    #[serde(default)]
    pub resource_spans: Vec<ResourceSpans>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpans {
    pub resource: Option<Resource>,
    #[serde(default)]
    pub scope_spans: Vec<ScopeSpans>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    #[serde(default)]
    pub attributes: Vec<KeyValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeSpans {
    pub scope: Option<InstrumentationScope>,
    #[serde(default)]
    pub spans: Vec<Span>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentationScope {
    pub name: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub kind: Option<i32>,
    pub start_time_unix_nano: JsonInt,
    pub end_time_unix_nano: JsonInt,
    #[serde(default)]
    pub attributes: Vec<KeyValue>,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub links: Vec<Link>,
    pub status: Option<Status>,
    pub flags: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyValue {
    pub key: String,
    #[serde(default)]
    pub value: AnyValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnyValue {
    pub string_value: Option<String>,
    pub int_value: Option<JsonInt>,
    pub double_value: Option<f64>,
    pub bool_value: Option<bool>,
    /// Kept raw, stored as its JSON text
    pub array_value: Option<Value>,
    pub kvlist_value: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default)]
    pub name: String,
    pub time_unix_nano: Option<JsonInt>,
    #[serde(default)]
    pub attributes: Vec<KeyValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub trace_id: String,
    pub span_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub code: Option<i32>,
    pub message: Option<String>,
}

/// OTLP partial success body, empty when every span was accepted
#[derive(Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportTraceServiceResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_success: Option<PartialSuccess>,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialSuccess {
    pub rejected_spans: usize,
    pub error_message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_kind_from_i32() {
        assert_eq!(SpanKind::from_i32(0), SpanKind::Unspecified);
        assert_eq!(SpanKind::from_i32(1), SpanKind::Internal);
        assert_eq!(SpanKind::from_i32(2), SpanKind::Server);
        assert_eq!(SpanKind::from_i32(3), SpanKind::Client);
        assert_eq!(SpanKind::from_i32(9), SpanKind::Unspecified);
    }

    #[test]
    fn test_span_kind_tag_value() {
        assert_eq!(SpanKind::Server.tag_value(), Some("server"));
        assert_eq!(SpanKind::Internal.tag_value(), None);
    }

    #[test]
    fn test_int_forms() {
        let text: JsonInt = serde_json::from_str(r#""1544712660000000000""#).unwrap();
        assert_eq!(text.as_i64(), Some(1_544_712_660_000_000_000));

        let number: JsonInt = serde_json::from_str("42").unwrap();
        assert_eq!(number.as_i64(), Some(42));

        let junk: JsonInt = serde_json::from_str(r#""soon""#).unwrap();
        assert_eq!(junk.as_i64(), None);
    }

    #[test]
    fn test_parse_request() {
        let json = r#"{
            "resourceSpans": [{
                "resource": {
                    "attributes": [{"key": "service.name", "value": {"stringValue": "test-service"}}]
                },
                "scopeSpans": [{
                    "scope": {"name": "my-lib", "version": "1.0"},
                    "spans": [{
                        "traceId": "5b8aa5a2d2c872e8321cf37308d69df2",
                        "spanId": "051581bf3cb55c13",
                        "name": "GET /api/users",
                        "kind": 2,
                        "startTimeUnixNano": "1544712660000000000",
                        "endTimeUnixNano": "1544712661000000000",
                        "status": {"code": 1}
                    }]
                }]
            }]
        }"#;

        let request: ExportTraceServiceRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.resource_spans.len(), 1);
        let rs = &request.resource_spans[0];
        assert_eq!(rs.resource.as_ref().unwrap().attributes[0].key, "service.name");
        let span = &rs.scope_spans[0].spans[0];
        assert_eq!(span.kind, Some(2));
        assert!(span.events.is_empty());
    }

    #[test]
    fn test_response_shape() {
        let ok = serde_json::to_value(ExportTraceServiceResponse::default()).unwrap();
        assert_eq!(ok, serde_json::json!({}));

        let partial = serde_json::to_value(ExportTraceServiceResponse {
            partial_success: Some(PartialSuccess {
                rejected_spans: 2,
                error_message: "bad".to_string(),
            }),
        })
        .unwrap();
        assert_eq!(
            partial,
            serde_json::json!({"partialSuccess": {"rejectedSpans": 2, "errorMessage": "bad"}})
        );
    }
}
