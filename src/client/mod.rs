//! Search cluster client
//!
//! [`SearchClient`] is the capability the span store consumes. The HTTP
//! implementation lives in [`http`]; tests use the scriptable fake in
//! `testing`.

mod http;
#[cfg(test)]
pub mod testing;

pub use http::ElasticsearchClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::spanstore::dsl::SearchSource;

/// One search against a set of indices
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub indices: Vec<String>,
    pub source: SearchSource,
    pub ignore_unavailable: bool,
}

impl SearchRequest {
    pub fn new(indices: Vec<String>, source: SearchSource) -> Self {
        Self {
            indices,
            source,
            ignore_unavailable: true,
        }
    }
}

/// One document for a bulk index request
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDocument {
    pub index: String,
    pub id: Option<String>,
    pub body: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub hits: SearchHits,
    #[serde(default)]
    pub aggregations: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    pub timed_out: bool,
    /// Per-request failure inside a multi-search
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl SearchResponse {
    pub fn total_hits(&self) -> u64 {
        self.hits.total.as_ref().map_or(0, TotalHits::value)
    }

    /// The embedded multi-search failure as a client error
    pub fn failure(&self) -> Option<ClientError> {
        self.error.as_ref().map(|error| ClientError::Status {
            status: self.status.unwrap_or(500),
            body: error.to_string(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchHits {
    #[serde(default)]
    pub total: Option<TotalHits>,
    #[serde(default)]
    pub hits: Vec<SearchHit>,
}

/// Newer clusters report `{"value": n, "relation": "eq"}`, older ones a bare
/// integer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TotalHits {
    Object {
        value: u64,
        #[serde(default)]
        relation: Option<String>,
    },
    Legacy(u64),
}

impl TotalHits {
    pub fn value(&self) -> u64 {
        match self {
            TotalHits::Object { value, .. } => *value,
            TotalHits::Legacy(value) => *value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(rename = "_index", default)]
    pub index: String,
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(rename = "_source", default)]
    pub source: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiSearchResponse {
    #[serde(default)]
    pub responses: Vec<SearchResponse>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub errors: bool,
    #[serde(default)]
    pub items: Vec<Value>,
}

impl BulkResponse {
    /// Number of items the cluster rejected
    pub fn failed_items(&self) -> usize {
        self.items
            .iter()
            .filter(|item| {
                item.as_object()
                    .and_then(|actions| actions.values().next())
                    .map_or(false, |result| result.get("error").is_some())
            })
            .count()
    }
}

#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, ClientError>;

    async fn multi_search(
        &self,
        requests: &[SearchRequest],
    ) -> Result<MultiSearchResponse, ClientError>;

    async fn bulk_index(&self, documents: &[IndexDocument]) -> Result<BulkResponse, ClientError>;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(String),

    #[error("cluster returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("index not found: {0}")]
    IndexNotFound(String),
}
