//! Tag normalization
//!
//! A stored span can carry its tags in three shapes at once:
//!
//! - the canonical `tags` array of `{key, type, value}` entries,
//! - a flattened `tag` object whose keys use a dot replacement character
//!   (search clusters restrict dots in field names),
//! - nested objects inside `tag`, produced when dotted keys were expanded
//!   by dynamic mapping.
//!
//! [`TagNormalizer::merge_tags`] folds the two map shapes into the canonical
//! array, for the span and for its process independently, and empties the
//! maps. Types are decided here once; nothing downstream sees raw JSON tags.

use serde_json::Value;

use super::document::{KeyValue, Span, TagMap};
use crate::model::ValueType;

/// Substitutes `.` in tag keys with a configurable replacement and back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DotReplacer {
    replacement: String,
}

impl DotReplacer {
    pub fn new(replacement: impl Into<String>) -> Self {
        Self {
            replacement: replacement.into(),
        }
    }

    pub fn replacement(&self) -> &str {
        &self.replacement
    }

    fn is_noop(&self) -> bool {
        self.replacement.is_empty() || self.replacement == "."
    }

    /// `a.b` -> `a@b`
    pub fn replace_dot(&self, key: &str) -> String {
        if self.is_noop() {
            return key.to_string();
        }
        key.replace('.', &self.replacement)
    }

    /// `a@b` -> `a.b`
    pub fn replace_dot_replacement(&self, key: &str) -> String {
        if self.is_noop() {
            return key.to_string();
        }
        key.replace(self.replacement.as_str(), ".")
    }
}

impl Default for DotReplacer {
    fn default() -> Self {
        Self::new("@")
    }
}

/// Tag value as found in a raw tag map, before a type is decided
#[derive(Debug, Clone, PartialEq)]
pub enum RawTagValue {
    Bool(bool),
    Int64(i64),
    Float64(f64),
    /// Number in its wire text form, type not yet known
    Number(String),
    String(String),
    /// Anything without a tag representation (arrays, null), kept as text
    Unsupported(String),
}

impl From<Value> for RawTagValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(b) => RawTagValue::Bool(b),
            Value::Number(n) => {
                if n.is_f64() {
                    RawTagValue::Float64(n.as_f64().unwrap_or(f64::NAN))
                } else if let Some(i) = n.as_i64() {
                    RawTagValue::Int64(i)
                } else {
                    RawTagValue::Number(n.to_string())
                }
            }
            Value::String(s) => RawTagValue::String(s),
            other => RawTagValue::Unsupported(other.to_string()),
        }
    }
}

/// Result of coercing one raw value
#[derive(Debug, Clone, PartialEq)]
pub struct CoercedTag {
    pub tag: KeyValue,
    /// Set when the value could not be represented and was stored as an
    /// explanatory string instead
    pub warning: Option<String>,
}

/// Decide the type of a raw map value.
///
/// Order: bool, int64, float64 (integral floats stay floats), wire numbers
/// (integer first, then float), string. A failed parse yields a string
/// tag `invalid tag type in <value>: <error>`.
pub fn coerce_tag_value(key: String, value: RawTagValue) -> CoercedTag {
    let ok = |key: String, value_type: ValueType, value: Value| CoercedTag {
        tag: KeyValue::new(key, value_type, value),
        warning: None,
    };

    match value {
        RawTagValue::Bool(b) => ok(key, ValueType::Bool, Value::Bool(b)),
        RawTagValue::Int64(i) => ok(key, ValueType::Int64, Value::from(i)),
        RawTagValue::Float64(f) => ok(key, ValueType::Float64, float_value(f)),
        RawTagValue::Number(text) => match text.parse::<i64>() {
            Ok(i) => ok(key, ValueType::Int64, Value::from(i)),
            Err(_) => match text.parse::<f64>() {
                Ok(f) => ok(key, ValueType::Float64, float_value(f)),
                Err(e) => invalid(key, format!("invalid tag type in {}: {}", text, e)),
            },
        },
        RawTagValue::String(s) => ok(key, ValueType::String, Value::String(s)),
        RawTagValue::Unsupported(text) => invalid(key, format!("invalid tag type in {}", text)),
    }
}

fn invalid(key: String, message: String) -> CoercedTag {
    let warning = format!("tag '{}': {}", key, message);
    CoercedTag {
        tag: KeyValue::new(key, ValueType::String, Value::String(message)),
        warning: Some(warning),
    }
}

/// JSON float, falling back to text for NaN and infinities
pub(crate) fn float_value(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(f.to_string()))
}

/// Merges transient tag maps into canonical tag arrays
#[derive(Debug, Clone, Default)]
pub struct TagNormalizer {
    dots: DotReplacer,
}

impl TagNormalizer {
    pub fn new(dots: DotReplacer) -> Self {
        Self { dots }
    }

    pub fn dot_replacer(&self) -> &DotReplacer {
        &self.dots
    }

    /// Consolidate span and process tags. Returns warnings for values that
    /// could not be typed. Calling it again on the same span is a no-op.
    pub fn merge_tags(&self, span: &mut Span) -> Vec<String> {
        let mut warnings = Vec::new();
        self.merge_into(&mut span.process.tags, span.process.tag.take(), &mut warnings);
        self.merge_into(&mut span.tags, span.tag.take(), &mut warnings);
        warnings
    }

    fn merge_into(
        &self,
        canonical: &mut Vec<KeyValue>,
        raw: Option<TagMap>,
        warnings: &mut Vec<String>,
    ) {
        let Some(raw) = raw else {
            return;
        };

        let mut flattened = Vec::with_capacity(raw.len());
        self.flatten(raw, "", &mut flattened);

        canonical.reserve(flattened.len());
        for (key, value) in flattened {
            if canonical.iter().any(|kv| kv.key == key) {
                tracing::debug!("Dropping duplicate tag '{}' from tag map", key);
                continue;
            }
            let coerced = coerce_tag_value(key, value);
            if let Some(warning) = coerced.warning {
                warnings.push(warning);
            }
            canonical.push(coerced.tag);
        }
    }

    /// Walk nested objects, restoring dots in every key segment
    fn flatten(&self, map: TagMap, prefix: &str, out: &mut Vec<(String, RawTagValue)>) {
        for (key, value) in map {
            let key = self.dots.replace_dot_replacement(&key);
            let full_key = if prefix.is_empty() {
                key
            } else {
                format!("{}.{}", prefix, key)
            };

            match value {
                Value::Object(nested) => self.flatten(nested, &full_key, out),
                other => out.push((full_key, RawTagValue::from(other))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbmodel::document::Process;
    use serde_json::json;

    fn testing_tags() -> Vec<KeyValue> {
        vec![KeyValue::new(
            "testing-key",
            ValueType::String,
            json!("testing-value"),
        )]
    }

    fn span_with_maps(map: TagMap) -> Span {
        Span {
            trace_id: "1".to_string(),
            span_id: "2".to_string(),
            parent_span_id: String::new(),
            flags: 0,
            operation_name: "op".to_string(),
            references: vec![],
            start_time: 0,
            start_time_millis: 0,
            duration: 0,
            tags: testing_tags(),
            tag: Some(map.clone()),
            logs: vec![],
            process: Process {
                service_name: "svc".to_string(),
                tags: testing_tags(),
                tag: Some(map),
            },
        }
    }

    fn as_map(value: Value) -> TagMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_merge_tag_maps() {
        let normalizer = TagNormalizer::new(DotReplacer::new(":"));
        let cases = vec![
            (json!({"bool:bool": true}), KeyValue::new("bool.bool", ValueType::Bool, json!(true))),
            (json!({"int.int": 1}), KeyValue::new("int.int", ValueType::Int64, json!(1))),
            (json!({"int:int": 2}), KeyValue::new("int.int", ValueType::Int64, json!(2))),
            (json!({"float": 1.1}), KeyValue::new("float", ValueType::Float64, json!(1.1))),
            (json!({"float": 123.0}), KeyValue::new("float", ValueType::Float64, json!(123.0))),
            (
                json!({"float:float": 123.0}),
                KeyValue::new("float.float", ValueType::Float64, json!(123.0)),
            ),
            (json!({"str": "foo"}), KeyValue::new("str", ValueType::String, json!("foo"))),
            (json!({"str:str": "foo"}), KeyValue::new("str.str", ValueType::String, json!("foo"))),
            (
                json!({"unsupported": [1, 2]}),
                KeyValue::new("unsupported", ValueType::String, json!("invalid tag type in [1,2]")),
            ),
        ];

        for (map, expected) in cases {
            let mut span = span_with_maps(as_map(map));
            normalizer.merge_tags(&mut span);

            let mut tags = testing_tags();
            tags.push(expected);
            assert!(span.tags_consolidated());
            assert!(span.tag.is_none());
            assert!(span.process.tag.is_none());
            assert_eq!(span.tags, tags);
            assert_eq!(span.process.tags, tags);
        }
    }

    #[test]
    fn test_integral_float_stays_float() {
        let coerced = coerce_tag_value("float".to_string(), RawTagValue::Float64(123.0));
        assert_eq!(coerced.tag.value_type, ValueType::Float64);
        assert_eq!(coerced.tag.value, json!(123.0));
        assert!(coerced.tag.value.is_f64());
    }

    #[test]
    fn test_wire_numbers() {
        let int = coerce_tag_value("n".to_string(), RawTagValue::Number("123".to_string()));
        assert_eq!(int.tag.value_type, ValueType::Int64);
        assert_eq!(int.tag.value, json!(123));

        let float = coerce_tag_value("n".to_string(), RawTagValue::Number("123.0".to_string()));
        assert_eq!(float.tag.value_type, ValueType::Float64);
        assert_eq!(float.tag.value, json!(123.0));

        let huge = coerce_tag_value(
            "n".to_string(),
            RawTagValue::Number("18446744073709551615".to_string()),
        );
        assert_eq!(huge.tag.value_type, ValueType::Float64);
    }

    #[test]
    fn test_json_numbers_pick_their_variant() {
        assert_eq!(RawTagValue::from(json!(123)), RawTagValue::Int64(123));
        assert_eq!(RawTagValue::from(json!(-7)), RawTagValue::Int64(-7));
        assert_eq!(RawTagValue::from(json!(1.5)), RawTagValue::Float64(1.5));
        assert_eq!(
            RawTagValue::from(json!(u64::MAX)),
            RawTagValue::Number("18446744073709551615".to_string())
        );

        let coerced = coerce_tag_value("n".to_string(), RawTagValue::from(json!(123)));
        assert_eq!(coerced.tag.value_type, ValueType::Int64);
        assert_eq!(coerced.tag.value, json!(123));
    }

    #[test]
    fn test_unparseable_number_becomes_explanatory_string() {
        let coerced = coerce_tag_value(
            "json_number.err".to_string(),
            RawTagValue::Number("foo".to_string()),
        );
        assert_eq!(coerced.tag.key, "json_number.err");
        assert_eq!(coerced.tag.value_type, ValueType::String);
        let message = coerced.tag.value.as_str().unwrap();
        assert!(message.starts_with("invalid tag type in foo: "));
        assert!(coerced.warning.is_some());
    }

    #[test]
    fn test_nested_objects_are_flattened() {
        let normalizer = TagNormalizer::new(DotReplacer::new("@"));
        let mut span = span_with_maps(as_map(json!({
            "http": {"method": "GET", "status@code": 200},
            "peer@service": "db"
        })));
        span.process.tag = None;

        normalizer.merge_tags(&mut span);

        let keys: Vec<&str> = span.tags.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["testing-key", "http.method", "http.status.code", "peer.service"]
        );
        assert_eq!(span.tags[2].value_type, ValueType::Int64);
        assert_eq!(span.process.tags, testing_tags());
    }

    #[test]
    fn test_duplicate_keys_are_dropped() {
        let normalizer = TagNormalizer::default();
        let mut span = span_with_maps(as_map(json!({"testing-key": "other"})));
        normalizer.merge_tags(&mut span);
        assert_eq!(span.tags, testing_tags());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let normalizer = TagNormalizer::new(DotReplacer::new(":"));
        let mut span = span_with_maps(as_map(json!({"a:b": true, "c": "d"})));

        normalizer.merge_tags(&mut span);
        let once = span.clone();
        let warnings = normalizer.merge_tags(&mut span);

        assert_eq!(span, once);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_invalid_values_produce_warnings() {
        let normalizer = TagNormalizer::default();
        let mut span = span_with_maps(as_map(json!({"bad": null})));
        let warnings = normalizer.merge_tags(&mut span);
        // one for the span map, one for the process map
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn test_dot_replacer() {
        let dots = DotReplacer::new("@");
        assert_eq!(dots.replace_dot("bat.foo"), "bat@foo");
        assert_eq!(dots.replace_dot_replacement("bat@foo"), "bat.foo");

        let noop = DotReplacer::new("");
        assert_eq!(noop.replace_dot("bat.foo"), "bat.foo");
        assert_eq!(noop.replace_dot_replacement("bat.foo"), "bat.foo");
    }
}
