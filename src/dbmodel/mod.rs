//! Stored document model
//!
//! Documents are what the search cluster holds. [`mapper`] converts them to
//! and from the domain model, [`tags`] reconciles the different tag shapes a
//! document may carry.

pub mod document;
pub mod mapper;
pub mod tags;

pub use document::{Service, Span as SpanDocument};
pub use mapper::{DocumentError, FromDomain, ToDomain};
pub use tags::{coerce_tag_value, CoercedTag, DotReplacer, RawTagValue, TagNormalizer};
