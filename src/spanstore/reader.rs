use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::config::StorageConfig;
use super::index::IndexResolver;
use super::multiread::PaginatedTraceReader;
use super::query::{
    validate_query, OperationQueryParameters, QueryBuilder, TraceQueryParameters, ValidationError,
    OPERATIONS_AGGREGATION, SERVICES_AGGREGATION, TRACE_IDS_AGGREGATION,
};
use crate::client::{ClientError, SearchClient, SearchRequest, SearchResponse};
use crate::dbmodel::{DocumentError, DotReplacer, ToDomain};
use crate::model::{Operation, Trace, TraceId};

/// Aliases already cover every live index, so the lookback is effectively unbounded
const ALIAS_MAX_SPAN_AGE: Duration = Duration::from_secs(50 * 365 * 24 * 3600);

/// Read side of the span store
pub struct SpanReader {
    client: Arc<dyn SearchClient>,
    resolver: IndexResolver,
    builder: QueryBuilder,
    traces: PaginatedTraceReader,
    max_doc_count: usize,
    max_span_age: Duration,
}

impl SpanReader {
    pub fn new(client: Arc<dyn SearchClient>, config: &StorageConfig) -> Self {
        let dots = DotReplacer::new(config.tag_dot_replacement.clone());
        let resolver = IndexResolver::new(config);
        let builder = QueryBuilder::new(dots.clone());
        let max_span_age = if config.use_read_write_aliases {
            ALIAS_MAX_SPAN_AGE
        } else {
            config.max_span_age
        };

        Self {
            traces: PaginatedTraceReader::new(
                client.clone(),
                resolver.clone(),
                builder.clone(),
                ToDomain::new(dots),
                config.max_doc_count,
                config.max_follow_up_waves,
            ),
            client,
            resolver,
            builder,
            max_doc_count: config.max_doc_count,
            max_span_age,
        }
    }

    /// Lookback window ending now
    fn recent_window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        self.bounded_window(DateTime::<Utc>::MIN_UTC, Utc::now())
    }

    /// `[start, end]` with `start` moved up to at most `max_span_age` before
    /// `end`, which keeps index enumeration proportional to the lookback
    fn bounded_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> (DateTime<Utc>, DateTime<Utc>) {
        let age = chrono::Duration::from_std(self.max_span_age)
            .unwrap_or_else(|_| chrono::Duration::days(50 * 365));
        let earliest = end
            .checked_sub_signed(age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        (start.max(earliest), end)
    }

    pub async fn get_trace(&self, trace_id: TraceId) -> Result<Trace, SpanReaderError> {
        self.get_traces(&[trace_id])
            .await?
            .into_iter()
            .next()
            .ok_or(SpanReaderError::TraceNotFound)
    }

    #[tracing::instrument(skip_all, fields(trace_count = trace_ids.len()))]
    pub async fn get_traces(&self, trace_ids: &[TraceId]) -> Result<Vec<Trace>, SpanReaderError> {
        let (start, end) = self.recent_window();
        self.traces.read_traces(trace_ids, start, end).await
    }

    /// Discover matching trace ids, then hydrate them
    #[tracing::instrument(skip_all, fields(service = %params.service_name))]
    pub async fn find_traces(
        &self,
        params: &TraceQueryParameters,
    ) -> Result<Vec<Trace>, SpanReaderError> {
        let trace_ids = self.find_trace_ids(params).await?;
        if trace_ids.is_empty() {
            return Ok(Vec::new());
        }

        // validated by find_trace_ids
        let (Some(start), Some(end)) = (params.start_time_min, params.start_time_max) else {
            return Err(ValidationError::StartAndEndTimeNotSet.into());
        };
        let (start, end) = self.bounded_window(start, end);
        self.traces.read_traces(&trace_ids, start, end).await
    }

    #[tracing::instrument(skip_all, fields(service = %params.service_name))]
    pub async fn find_trace_ids(
        &self,
        params: &TraceQueryParameters,
    ) -> Result<Vec<TraceId>, SpanReaderError> {
        if let Err(e) = validate_query(params) {
            tracing::warn!("Rejected trace query: {}", e);
            return Err(e.into());
        }

        let (Some(start), Some(end)) = (params.start_time_min, params.start_time_max) else {
            return Err(ValidationError::StartAndEndTimeNotSet.into());
        };

        let (index_start, index_end) = self.bounded_window(start, end);
        let request = SearchRequest::new(
            self.resolver.span_read_indices(index_start, index_end),
            self.builder.find_trace_ids_source(params),
        );
        let response = self.search(&request, "trace ids").await?;

        let keys = bucket_keys(&response, TRACE_IDS_AGGREGATION)?;
        let mut trace_ids = Vec::with_capacity(keys.len());
        for key in keys {
            match TraceId::from_hex(&key) {
                Ok(id) => trace_ids.push(id),
                Err(e) => tracing::warn!("Ignoring trace id bucket: {}", e),
            }
        }
        Ok(trace_ids)
    }

    #[tracing::instrument(skip_all)]
    pub async fn get_services(&self) -> Result<Vec<String>, SpanReaderError> {
        let (start, end) = self.recent_window();
        let request = SearchRequest::new(
            self.resolver.service_read_indices(start, end),
            self.builder.services_source(self.max_doc_count),
        );

        let response = self.search(&request, "services").await?;
        bucket_keys(&response, SERVICES_AGGREGATION)
    }

    #[tracing::instrument(skip_all, fields(service = %params.service_name))]
    pub async fn get_operations(
        &self,
        params: &OperationQueryParameters,
    ) -> Result<Vec<Operation>, SpanReaderError> {
        let (start, end) = self.recent_window();
        let request = SearchRequest::new(
            self.resolver.service_read_indices(start, end),
            self.builder.operations_source(params, self.max_doc_count),
        );

        let response = self.search(&request, "operations").await?;
        let names = bucket_keys(&response, OPERATIONS_AGGREGATION)?;
        Ok(names
            .into_iter()
            .map(|name| Operation {
                name,
                span_kind: params.span_kind.clone(),
            })
            .collect())
    }

    async fn search(
        &self,
        request: &SearchRequest,
        what: &'static str,
    ) -> Result<SearchResponse, SpanReaderError> {
        self.client.search(request).await.map_err(|e| {
            tracing::error!("Search {} failed: {}", what, e);
            SpanReaderError::SearchFailed { what, source: e }
        })
    }
}

/// String keys of a terms aggregation. An aggregation that is absent or not
/// shaped like one counts as missing.
fn bucket_keys(response: &SearchResponse, name: &str) -> Result<Vec<String>, SpanReaderError> {
    let buckets = response
        .aggregations
        .as_ref()
        .and_then(|aggs| aggs.get(name))
        .and_then(|agg| agg.get("buckets"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            tracing::error!("Response has no aggregation {}", name);
            SpanReaderError::AggregationMissing(name.to_string())
        })?;

    buckets
        .iter()
        .map(|bucket| {
            bucket
                .get("key")
                .and_then(Value::as_str)
                .map(String::from)
                .ok_or(SpanReaderError::NonStringAggregationKey)
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum SpanReaderError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("search {what} failed: {source}")]
    SearchFailed {
        what: &'static str,
        #[source]
        source: ClientError,
    },

    #[error("could not find aggregation of {0}")]
    AggregationMissing(String),

    #[error("non-string key found in aggregation")]
    NonStringAggregationKey,

    /// Some documents failed to decode. `partial` holds every trace that
    /// was read successfully.
    #[error("{source}")]
    MalformedDocument {
        #[source]
        source: DocumentError,
        partial: Vec<Trace>,
    },

    #[error("multi-search returned {actual} responses for {expected} queries")]
    ResponseCountMismatch { expected: usize, actual: usize },

    #[error("trace not found")]
    TraceNotFound,
}
