use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Type discriminator stored next to every tag value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Bool,
    Int64,
    Float64,
    Binary,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Bool => "bool",
            ValueType::Int64 => "int64",
            ValueType::Float64 => "float64",
            ValueType::Binary => "binary",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed tag value. Every tag is resolved to exactly one of these variants.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    String(String),
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Binary(Vec<u8>),
}

impl TagValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            TagValue::String(_) => ValueType::String,
            TagValue::Bool(_) => ValueType::Bool,
            TagValue::Int64(_) => ValueType::Int64,
            TagValue::Float64(_) => ValueType::Float64,
            TagValue::Binary(_) => ValueType::Binary,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TagValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            TagValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TagValue::Float64(v) => Some(*v),
            _ => None,
        }
    }
}

/// String form used for storage and display. Floats use the shortest
/// representation that parses back to the same value, binary is lowercase hex.
impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::String(s) => f.write_str(s),
            TagValue::Bool(b) => write!(f, "{}", b),
            TagValue::Int64(v) => write!(f, "{}", v),
            TagValue::Float64(v) => write!(f, "{}", v),
            TagValue::Binary(bytes) => f.write_str(&hex::encode(bytes)),
        }
    }
}

/// A single key/value tag
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub key: String,
    pub value: TagValue,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: TagValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, TagValue::String(value.into()))
    }

    pub fn bool(key: impl Into<String>, value: bool) -> Self {
        Self::new(key, TagValue::Bool(value))
    }

    pub fn int64(key: impl Into<String>, value: i64) -> Self {
        Self::new(key, TagValue::Int64(value))
    }

    pub fn float64(key: impl Into<String>, value: f64) -> Self {
        Self::new(key, TagValue::Float64(value))
    }

    pub fn binary(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self::new(key, TagValue::Binary(value.into()))
    }

    pub fn value_type(&self) -> ValueType {
        self.value.value_type()
    }
}

/// API form: `{"key": .., "type": .., "value": ..}` with native JSON values
/// (binary as hex).
impl Serialize for KeyValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("KeyValue", 3)?;
        state.serialize_field("key", &self.key)?;
        state.serialize_field("type", &self.value_type())?;
        match &self.value {
            TagValue::String(s) => state.serialize_field("value", s)?,
            TagValue::Bool(b) => state.serialize_field("value", b)?,
            TagValue::Int64(v) => state.serialize_field("value", v)?,
            TagValue::Float64(v) => state.serialize_field("value", v)?,
            TagValue::Binary(bytes) => state.serialize_field("value", &hex::encode(bytes))?,
        }
        state.end()
    }
}

/// Find the first tag with the given key
pub fn find_tag<'a>(tags: &'a [KeyValue], key: &str) -> Option<&'a KeyValue> {
    tags.iter().find(|kv| kv.key == key)
}
