//! Domain model for spans and traces
//!
//! These are immutable value objects built per request, either from stored
//! documents or from ingested wire spans.

mod ids;
mod span;
mod value;

pub use ids::{IdError, SpanId, TraceId};
pub use span::{
    datetime_to_micros, micros_to_datetime, Log, Operation, Process, Span, SpanRef, SpanRefType,
    Trace,
};
pub use value::{find_tag, KeyValue, TagValue, ValueType};
