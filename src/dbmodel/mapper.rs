//! Conversion between domain spans and stored documents

use std::collections::HashSet;

use serde_json::Value;

use super::document::{self, ReferenceType, TagMap};
use super::tags::{float_value, DotReplacer, TagNormalizer};
use crate::model::{
    IdError, KeyValue, Log, Process, Span, SpanId, SpanRef, SpanRefType, TagValue, TraceId,
    ValueType,
};

/// Builds documents from domain spans
#[derive(Debug, Clone, Default)]
pub struct FromDomain {
    all_tags_as_fields: bool,
    tag_keys_as_fields: HashSet<String>,
    dots: DotReplacer,
}

impl FromDomain {
    pub fn new(all_tags_as_fields: bool, tag_keys_as_fields: &[String], dots: DotReplacer) -> Self {
        Self {
            all_tags_as_fields,
            tag_keys_as_fields: tag_keys_as_fields.iter().cloned().collect(),
            dots,
        }
    }

    pub fn to_document(&self, span: &Span) -> document::Span {
        let (tags, tag) = self.convert_tags(&span.tags);
        let (process_tags, process_tag) = self.convert_tags(&span.process.tags);

        document::Span {
            trace_id: span.trace_id.to_hex(),
            span_id: span.span_id.to_hex(),
            parent_span_id: span.parent_span_id().map(|id| id.to_hex()).unwrap_or_default(),
            flags: span.flags,
            operation_name: span.operation_name.clone(),
            references: span.references.iter().map(convert_reference).collect(),
            start_time: span.start_time,
            start_time_millis: span.start_time / 1000,
            duration: span.duration,
            tags,
            tag,
            logs: span
                .logs
                .iter()
                .map(|log| document::Log {
                    timestamp: log.timestamp,
                    fields: log.fields.iter().map(canonical_key_value).collect(),
                })
                .collect(),
            process: document::Process {
                service_name: span.process.service_name.clone(),
                tags: process_tags,
                tag: process_tag,
            },
        }
    }

    fn is_elevated(&self, key: &str) -> bool {
        self.all_tags_as_fields || self.tag_keys_as_fields.contains(key)
    }

    /// Split tags into the canonical array and the field map
    fn convert_tags(&self, tags: &[KeyValue]) -> (Vec<document::KeyValue>, Option<TagMap>) {
        let mut canonical = Vec::with_capacity(tags.len());
        let mut fields = TagMap::new();

        for kv in tags {
            if self.is_elevated(&kv.key) {
                fields.insert(self.dots.replace_dot(&kv.key), native_value(&kv.value));
            } else {
                canonical.push(canonical_key_value(kv));
            }
        }

        let fields = if fields.is_empty() { None } else { Some(fields) };
        (canonical, fields)
    }
}

fn convert_reference(reference: &SpanRef) -> document::Reference {
    document::Reference {
        ref_type: match reference.ref_type {
            SpanRefType::ChildOf => ReferenceType::ChildOf,
            SpanRefType::FollowsFrom => ReferenceType::FollowsFrom,
        },
        trace_id: reference.trace_id.to_hex(),
        span_id: reference.span_id.to_hex(),
    }
}

fn canonical_key_value(kv: &KeyValue) -> document::KeyValue {
    document::KeyValue::new(kv.key.clone(), kv.value_type(), Value::String(kv.value.to_string()))
}

fn native_value(value: &TagValue) -> Value {
    match value {
        TagValue::String(s) => Value::String(s.clone()),
        TagValue::Bool(b) => Value::Bool(*b),
        TagValue::Int64(i) => Value::from(*i),
        TagValue::Float64(f) => float_value(*f),
        TagValue::Binary(bytes) => Value::String(hex::encode(bytes)),
    }
}

/// Rebuilds domain spans from stored documents
#[derive(Debug, Clone, Default)]
pub struct ToDomain {
    normalizer: TagNormalizer,
}

impl ToDomain {
    pub fn new(dots: DotReplacer) -> Self {
        Self {
            normalizer: TagNormalizer::new(dots),
        }
    }

    /// Decode a raw `_source` object
    pub fn decode(&self, source: Value) -> Result<Span, DocumentError> {
        let doc: document::Span =
            serde_json::from_value(source).map_err(|e| DocumentError::Json(e.to_string()))?;
        self.from_document(doc)
    }

    pub fn from_document(&self, mut doc: document::Span) -> Result<Span, DocumentError> {
        let warnings = self.normalizer.merge_tags(&mut doc);

        let trace_id = TraceId::from_hex(&doc.trace_id)?;
        let span_id = SpanId::from_hex(&doc.span_id)?;

        let mut references = doc
            .references
            .iter()
            .map(|r| {
                let ref_type = match r.ref_type {
                    ReferenceType::ChildOf => SpanRefType::ChildOf,
                    ReferenceType::FollowsFrom => SpanRefType::FollowsFrom,
                };
                Ok(SpanRef {
                    ref_type,
                    trace_id: TraceId::from_hex(&r.trace_id)?,
                    span_id: SpanId::from_hex(&r.span_id)?,
                })
            })
            .collect::<Result<Vec<_>, DocumentError>>()?;

        // Older documents only carry parentSpanID
        if !doc.parent_span_id.is_empty() {
            let parent = SpanId::from_hex(&doc.parent_span_id)?;
            let known = references
                .iter()
                .any(|r| r.trace_id == trace_id && r.span_id == parent);
            if !parent.is_zero() && !known {
                references.insert(0, SpanRef::child_of(trace_id, parent));
            }
        }

        let logs = doc
            .logs
            .iter()
            .map(|log| {
                Ok(Log {
                    timestamp: log.timestamp,
                    fields: convert_key_values(&log.fields)?,
                })
            })
            .collect::<Result<Vec<_>, DocumentError>>()?;

        let process = Process {
            service_name: doc.process.service_name.clone(),
            tags: convert_key_values(&doc.process.tags)?,
        };

        Ok(Span {
            trace_id,
            span_id,
            operation_name: doc.operation_name,
            references,
            flags: doc.flags,
            start_time: doc.start_time,
            duration: doc.duration,
            tags: convert_key_values(&doc.tags)?,
            logs,
            process,
            warnings,
        })
    }
}

fn convert_key_values(tags: &[document::KeyValue]) -> Result<Vec<KeyValue>, DocumentError> {
    tags.iter().map(convert_key_value).collect()
}

fn convert_key_value(kv: &document::KeyValue) -> Result<KeyValue, DocumentError> {
    let invalid = |reason: String| DocumentError::InvalidTagValue {
        key: kv.key.clone(),
        value_type: kv.value_type,
        reason,
    };

    let value = match (kv.value_type, &kv.value) {
        (ValueType::String, Value::String(s)) => TagValue::String(s.clone()),
        (ValueType::String, other) => TagValue::String(other.to_string()),

        (ValueType::Bool, Value::Bool(b)) => TagValue::Bool(*b),
        (ValueType::Bool, Value::String(s)) => {
            TagValue::Bool(s.parse().map_err(|e: std::str::ParseBoolError| invalid(e.to_string()))?)
        }

        (ValueType::Int64, Value::Number(n)) => {
            TagValue::Int64(n.as_i64().ok_or_else(|| invalid(format!("{} is not an int64", n)))?)
        }
        (ValueType::Int64, Value::String(s)) => {
            TagValue::Int64(s.parse().map_err(|e: std::num::ParseIntError| invalid(e.to_string()))?)
        }

        (ValueType::Float64, Value::Number(n)) => {
            TagValue::Float64(n.as_f64().ok_or_else(|| invalid(format!("{} is not a float64", n)))?)
        }
        (ValueType::Float64, Value::String(s)) => TagValue::Float64(
            s.parse()
                .map_err(|e: std::num::ParseFloatError| invalid(e.to_string()))?,
        ),

        (ValueType::Binary, Value::String(s)) => {
            TagValue::Binary(hex::decode(s).map_err(|e| invalid(e.to_string()))?)
        }

        (_, other) => return Err(invalid(format!("unexpected value {}", other))),
    };

    Ok(KeyValue::new(kv.key.clone(), value))
}

/// Failure to turn a stored document into a span
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DocumentError {
    #[error("malformed span document: {0}")]
    Json(String),

    #[error("invalid id in span document: {0}")]
    InvalidId(#[from] IdError),

    #[error("invalid {value_type} value for tag '{key}': {reason}")]
    InvalidTagValue {
        key: String,
        value_type: ValueType,
        reason: String,
    },
}
