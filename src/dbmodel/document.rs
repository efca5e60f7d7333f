//! Stored document shapes
//!
//! Field names here are the on-disk contract with the search cluster and
//! must not change.

use serde::{Deserialize, Serialize};

use crate::model::ValueType;

pub const TRACE_ID_FIELD: &str = "traceID";
pub const SPAN_ID_FIELD: &str = "spanID";
pub const DURATION_FIELD: &str = "duration";
pub const START_TIME_FIELD: &str = "startTime";
pub const START_TIME_MILLIS_FIELD: &str = "startTimeMillis";
pub const SERVICE_NAME_FIELD: &str = "process.serviceName";
pub const OPERATION_NAME_FIELD: &str = "operationName";
pub const OBJECT_TAGS_FIELD: &str = "tag";
pub const OBJECT_PROCESS_TAGS_FIELD: &str = "process.tag";
pub const NESTED_TAGS_FIELD: &str = "tags";
pub const NESTED_PROCESS_TAGS_FIELD: &str = "process.tags";
pub const NESTED_LOG_FIELDS_FIELD: &str = "logs.fields";
pub const TAG_KEY_FIELD: &str = "key";
pub const TAG_VALUE_FIELD: &str = "value";

/// Service index fields
pub const SERVICE_DOC_SERVICE_FIELD: &str = "serviceName";
pub const SERVICE_DOC_OPERATION_FIELD: &str = "operationName";
pub const SERVICE_DOC_SPAN_KIND_FIELD: &str = "spanKind";

/// Raw tag map as found in `tag` / `process.tag`
pub type TagMap = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceType {
    #[serde(rename = "CHILD_OF")]
    ChildOf,
    #[serde(rename = "FOLLOWS_FROM")]
    FollowsFrom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub ref_type: ReferenceType,
    #[serde(rename = "traceID")]
    pub trace_id: String,
    #[serde(rename = "spanID")]
    pub span_id: String,
}

/// Canonical stored tag. `value` is normally a string, but native JSON
/// values are accepted on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    pub value: serde_json::Value,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value_type: ValueType, value: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            value_type,
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Log {
    pub timestamp: u64,
    #[serde(default)]
    pub fields: Vec<KeyValue>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    pub service_name: String,
    #[serde(default)]
    pub tags: Vec<KeyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<TagMap>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    #[serde(rename = "traceID")]
    pub trace_id: String,
    #[serde(rename = "spanID")]
    pub span_id: String,
    #[serde(rename = "parentSpanID", default, skip_serializing_if = "String::is_empty")]
    pub parent_span_id: String,
    #[serde(default)]
    pub flags: u32,
    #[serde(default)]
    pub operation_name: String,
    #[serde(default)]
    pub references: Vec<Reference>,
    pub start_time: u64,
    #[serde(default)]
    pub start_time_millis: u64,
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub tags: Vec<KeyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<TagMap>,
    #[serde(default)]
    pub logs: Vec<Log>,
    #[serde(default)]
    pub process: Process,
}

impl Span {
    /// True once both transient tag maps have been merged away
    pub fn tags_consolidated(&self) -> bool {
        self.tag.as_ref().map_or(true, |m| m.is_empty())
            && self.process.tag.as_ref().map_or(true, |m| m.is_empty())
    }
}

/// Document written to the service index, one per service/operation pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub service_name: String,
    pub operation_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub span_kind: String,
}
