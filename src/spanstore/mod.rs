//! Span storage engine over a search cluster
//!
//! Writes go through [`SpanWriter`], reads through [`SpanReader`]. Index
//! names come from [`IndexResolver`] and query bodies from [`QueryBuilder`].

pub mod config;
pub mod dsl;
pub mod index;
pub mod multiread;
pub mod query;
pub mod reader;
pub mod writer;

pub use config::{ConfigError, IndexOptions, RolloverFrequency, StorageConfig};
pub use index::IndexResolver;
pub use multiread::PaginatedTraceReader;
pub use query::{OperationQueryParameters, QueryBuilder, TraceQueryParameters, ValidationError};
pub use reader::{SpanReader, SpanReaderError};
pub use writer::{SpanWriter, SpanWriterError};
