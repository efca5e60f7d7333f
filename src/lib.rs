//! spanseek: span storage and trace search over Elasticsearch
//!
//! Spans are stored as documents in time-partitioned indices, one per day or
//! hour, alongside a small service index that backs the service and
//! operation listings. Traces are found by aggregating matching span
//! documents on their trace id and then hydrated with paginated
//! multi-searches.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use spanseek::client::ElasticsearchClient;
//! use spanseek::spanstore::{SpanReader, StorageConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StorageConfig::from_env()?;
//! let client = Arc::new(ElasticsearchClient::from_config(&config)?);
//! let reader = SpanReader::new(client, &config);
//!
//! for service in reader.get_services().await? {
//!     println!("{}", service);
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod client;
pub mod dbmodel;
pub mod model;
pub mod otel;
pub mod spanstore;

// Re-export commonly used types
pub use model::{Span, Trace, TraceId};
pub use spanstore::{SpanReader, SpanReaderError, SpanWriter, StorageConfig};
