//! Batched trace hydration with follow-up reads
//!
//! Every trace id gets one query in a multi-search. A response is truncated
//! when the cluster reports more hits than were returned; those traces are
//! queried again in the next wave, continuing after the start time of the
//! last span read.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::index::IndexResolver;
use super::query::QueryBuilder;
use super::reader::SpanReaderError;
use crate::client::{SearchClient, SearchRequest};
use crate::dbmodel::{DocumentError, ToDomain};
use crate::model::{datetime_to_micros, Span, Trace, TraceId};

/// Slack around the requested window, spans may start slightly outside it
const WINDOW_PADDING_HOURS: i64 = 1;

pub struct PaginatedTraceReader {
    client: Arc<dyn SearchClient>,
    resolver: IndexResolver,
    builder: QueryBuilder,
    to_domain: ToDomain,
    max_doc_count: usize,
    max_follow_up_waves: usize,
}

struct TraceState {
    trace_id: TraceId,
    spans: Vec<Span>,
    fetched: u64,
}

impl PaginatedTraceReader {
    pub fn new(
        client: Arc<dyn SearchClient>,
        resolver: IndexResolver,
        builder: QueryBuilder,
        to_domain: ToDomain,
        max_doc_count: usize,
        max_follow_up_waves: usize,
    ) -> Self {
        Self {
            client,
            resolver,
            builder,
            to_domain,
            max_doc_count,
            max_follow_up_waves,
        }
    }

    /// Read full traces. Traces come back in the order of `trace_ids`; ids
    /// without spans are left out.
    ///
    /// A document that fails to decode does not stop the read. The first such
    /// failure is returned as [`SpanReaderError::MalformedDocument`] together
    /// with everything that did decode.
    #[tracing::instrument(skip_all, fields(trace_count = trace_ids.len()))]
    pub async fn read_traces(
        &self,
        trace_ids: &[TraceId],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Trace>, SpanReaderError> {
        if trace_ids.is_empty() {
            return Ok(Vec::new());
        }

        let padding = chrono::Duration::hours(WINDOW_PADDING_HOURS);
        let start = start
            .checked_sub_signed(padding)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let end = end
            .checked_add_signed(padding)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let indices = self.resolver.span_read_indices(start, end);
        let initial_cursor = datetime_to_micros(start);

        let mut states: Vec<TraceState> = Vec::with_capacity(trace_ids.len());
        for trace_id in trace_ids {
            if !states.iter().any(|s| s.trace_id == *trace_id) {
                states.push(TraceState {
                    trace_id: *trace_id,
                    spans: Vec::new(),
                    fetched: 0,
                });
            }
        }

        let mut pending: Vec<(usize, u64)> = (0..states.len()).map(|i| (i, initial_cursor)).collect();
        let mut decode_error: Option<DocumentError> = None;
        let mut follow_up_waves = 0;

        while !pending.is_empty() {
            let requests: Vec<SearchRequest> = pending
                .iter()
                .map(|&(i, cursor)| {
                    let source =
                        self.builder
                            .trace_page_source(&states[i].trace_id, cursor, self.max_doc_count);
                    SearchRequest::new(indices.clone(), source)
                })
                .collect();

            let response = self.client.multi_search(&requests).await.map_err(|e| {
                tracing::error!("Multi-search for {} traces failed: {}", requests.len(), e);
                SpanReaderError::SearchFailed {
                    what: "traces",
                    source: e,
                }
            })?;

            if response.responses.is_empty() {
                break;
            }
            if response.responses.len() != pending.len() {
                tracing::error!(
                    "Multi-search returned {} responses for {} trace queries",
                    response.responses.len(),
                    pending.len()
                );
                return Err(SpanReaderError::ResponseCountMismatch {
                    expected: pending.len(),
                    actual: response.responses.len(),
                });
            }

            let mut next = Vec::new();
            for (&(i, _), result) in pending.iter().zip(response.responses) {
                if let Some(e) = result.failure() {
                    tracing::error!("Search for trace {} failed: {}", states[i].trace_id, e);
                    return Err(SpanReaderError::SearchFailed {
                        what: "traces",
                        source: e,
                    });
                }

                let total = result.total_hits();
                let hits = result.hits.hits;
                if hits.is_empty() {
                    continue;
                }

                let state = &mut states[i];
                state.fetched += hits.len() as u64;

                let mut last_start = None;
                for hit in hits {
                    match self.to_domain.decode(hit.source) {
                        Ok(span) => {
                            last_start = Some(span.start_time);
                            state.spans.push(span);
                        }
                        Err(e) => {
                            tracing::warn!("Skipping malformed span document {}: {}", hit.id, e);
                            decode_error.get_or_insert(e);
                        }
                    }
                }

                if state.fetched < total {
                    match last_start {
                        Some(cursor) => next.push((i, cursor)),
                        None => tracing::warn!(
                            "Trace {} is truncated but no span in the page decoded, not following up",
                            state.trace_id
                        ),
                    }
                }
            }

            if !next.is_empty() && follow_up_waves >= self.max_follow_up_waves {
                tracing::warn!(
                    "Stopping after {} follow-up waves with {} traces still truncated",
                    follow_up_waves,
                    next.len()
                );
                break;
            }

            if !next.is_empty() {
                follow_up_waves += 1;
                tracing::debug!("Follow-up wave {} for {} traces", follow_up_waves, next.len());
            }
            pending = next;
        }

        let traces: Vec<Trace> = states
            .into_iter()
            .filter(|s| !s.spans.is_empty())
            .map(|s| Trace::new(s.spans))
            .collect();

        match decode_error {
            Some(source) => Err(SpanReaderError::MalformedDocument {
                source,
                partial: traces,
            }),
            None => Ok(traces),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::FakeSearchClient;
    use crate::client::{
        ClientError, MultiSearchResponse, SearchHit, SearchHits, SearchResponse, TotalHits,
    };
    use crate::model::SpanId;
    use crate::spanstore::StorageConfig;
    use chrono::TimeZone;
    use serde_json::{json, Value};

    fn date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 10, 10, 5, 0, 0).unwrap()
    }

    fn span_source(trace_id: &str, span_id: &str, start_time: u64) -> Value {
        json!({
            "traceID": trace_id,
            "spanID": span_id,
            "operationName": "op",
            "startTime": start_time,
            "duration": 1,
            "tags": [],
            "process": {"serviceName": "svc", "tags": []}
        })
    }

    fn response(sources: Vec<Value>, total: u64) -> SearchResponse {
        SearchResponse {
            hits: SearchHits {
                total: Some(TotalHits::Object {
                    value: total,
                    relation: Some("eq".to_string()),
                }),
                hits: sources
                    .into_iter()
                    .map(|source| SearchHit {
                        index: "jaeger-span-2019-10-10".to_string(),
                        id: String::new(),
                        source,
                    })
                    .collect(),
            },
            ..Default::default()
        }
    }

    fn reader(client: Arc<FakeSearchClient>, max_follow_up_waves: usize) -> PaginatedTraceReader {
        let config = StorageConfig::default();
        PaginatedTraceReader::new(
            client,
            IndexResolver::new(&config),
            QueryBuilder::default(),
            ToDomain::default(),
            config.max_doc_count,
            max_follow_up_waves,
        )
    }

    #[tokio::test]
    async fn test_empty_ids_skip_search() {
        let client = Arc::new(FakeSearchClient::new());
        let traces = reader(client.clone(), 5).read_traces(&[], date(), date()).await.unwrap();
        assert!(traces.is_empty());
        assert_eq!(client.multi_search_count(), 0);
    }

    #[tokio::test]
    async fn test_follow_up_query() {
        let start = datetime_to_micros(date());
        let client = Arc::new(FakeSearchClient::new());
        // trace 1 reports two hits but returns one, trace 2 is complete
        client.push_multi_search(Ok(MultiSearchResponse {
            responses: vec![
                response(vec![span_source("1", "1", start)], 2),
                response(vec![span_source("2", "1", start)], 1),
            ],
        }));
        client.push_multi_search(Ok(MultiSearchResponse {
            responses: vec![response(vec![span_source("1", "2", start + 10)], 2)],
        }));

        let ids = [TraceId::new(0, 1), TraceId::new(0, 2)];
        let traces = reader(client.clone(), 5)
            .read_traces(&ids, date(), date())
            .await
            .unwrap();

        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].spans.len(), 2);
        assert_eq!(traces[1].spans.len(), 1);

        let waves = client.multi_searches.lock();
        assert_eq!(waves.len(), 2);
        assert_eq!(waves[0].len(), 2);
        let padded = datetime_to_micros(date() - chrono::Duration::hours(1));
        assert_eq!(waves[0][0].source.search_after, vec![json!(padded)]);
        assert_eq!(waves[1].len(), 1);
        assert_eq!(waves[1][0].source.search_after, vec![json!(start)]);
        assert!(waves[1][0].source.track_total_hits);
        assert_eq!(
            waves[0][0].indices,
            vec!["jaeger-span-2019-10-10".to_string()]
        );
    }

    #[tokio::test]
    async fn test_truncated_trace_of_10040_spans() {
        let start = datetime_to_micros(date());
        let page: Vec<Value> = (0..10_000)
            .map(|i| span_source("1", &format!("{:x}", i + 1), start + i as u64))
            .collect();

        let client = Arc::new(FakeSearchClient::new());
        client.push_multi_search(Ok(MultiSearchResponse {
            responses: vec![response(page, 10_040)],
        }));
        let tail: Vec<Value> = (0..40)
            .map(|i| span_source("1", &format!("{:x}", 20_000 + i), start + 10_000 + i as u64))
            .collect();
        client.push_multi_search(Ok(MultiSearchResponse {
            responses: vec![response(tail, 10_040)],
        }));

        let traces = reader(client.clone(), 5)
            .read_traces(&[TraceId::new(0, 1)], date(), date())
            .await
            .unwrap();

        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].spans.len(), 10_040);

        let waves = client.multi_searches.lock();
        assert_eq!(waves.len(), 2);
        assert_eq!(waves[1][0].source.search_after, vec![json!(start + 9_999)]);
    }

    #[tokio::test]
    async fn test_follow_up_waves_are_bounded() {
        let start = datetime_to_micros(date());
        let client = Arc::new(FakeSearchClient::new());
        for i in 0..3 {
            client.push_multi_search(Ok(MultiSearchResponse {
                responses: vec![response(vec![span_source("1", "1", start + i)], 100)],
            }));
        }

        let traces = reader(client.clone(), 1)
            .read_traces(&[TraceId::new(0, 1)], date(), date())
            .await
            .unwrap();

        assert_eq!(client.multi_search_count(), 2);
        assert_eq!(traces[0].spans.len(), 2);
    }

    #[tokio::test]
    async fn test_zero_responses_end_the_read() {
        let client = Arc::new(FakeSearchClient::new());
        client.push_multi_search(Ok(MultiSearchResponse::default()));

        let traces = reader(client, 5)
            .read_traces(&[TraceId::new(0, 1)], date(), date())
            .await
            .unwrap();
        assert!(traces.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_document_keeps_the_rest() {
        let start = datetime_to_micros(date());
        let client = Arc::new(FakeSearchClient::new());
        client.push_multi_search(Ok(MultiSearchResponse {
            responses: vec![
                response(vec![json!({"traceID": 1}), span_source("1", "2", start)], 2),
                response(vec![span_source("2", "1", start)], 1),
            ],
        }));

        let err = reader(client, 5)
            .read_traces(&[TraceId::new(0, 1), TraceId::new(0, 2)], date(), date())
            .await
            .unwrap_err();

        match err {
            SpanReaderError::MalformedDocument { partial, .. } => {
                assert_eq!(partial.len(), 2);
                assert_eq!(partial[0].spans.len(), 1);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_responses_fail_the_read() {
        let start = datetime_to_micros(date());
        let client = Arc::new(FakeSearchClient::new());
        client.push_multi_search(Ok(MultiSearchResponse {
            responses: vec![response(vec![span_source("1", "1", start)], 1)],
        }));

        let err = reader(client, 5)
            .read_traces(&[TraceId::new(0, 1), TraceId::new(0, 2)], date(), date())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SpanReaderError::ResponseCountMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_undecodable_trace_id_is_reported_per_document() {
        let start = datetime_to_micros(date());
        let bad_id = format!("é{}", "a".repeat(15));
        let client = Arc::new(FakeSearchClient::new());
        client.push_multi_search(Ok(MultiSearchResponse {
            responses: vec![response(
                vec![span_source(&bad_id, "1", start), span_source("1", "2", start)],
                2,
            )],
        }));

        let err = reader(client, 5)
            .read_traces(&[TraceId::new(0, 1)], date(), date())
            .await
            .unwrap_err();
        match err {
            SpanReaderError::MalformedDocument { partial, .. } => {
                assert_eq!(partial.len(), 1);
                assert_eq!(partial[0].spans.len(), 1);
                assert_eq!(partial[0].spans[0].span_id, SpanId(2));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_window_at_the_end_of_time_is_saturated() {
        let client = Arc::new(FakeSearchClient::new());
        client.push_multi_search(Ok(MultiSearchResponse {
            responses: vec![SearchResponse::default()],
        }));
        let end = DateTime::<Utc>::MAX_UTC;

        let traces = reader(client.clone(), 5)
            .read_traces(&[TraceId::new(0, 1)], end - chrono::Duration::hours(2), end)
            .await
            .unwrap();
        assert!(traces.is_empty());
        assert_eq!(client.multi_search_count(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_aborts() {
        let client = Arc::new(FakeSearchClient::new());
        client.push_multi_search(Err(ClientError::Network("read error".to_string())));

        let err = reader(client, 5)
            .read_traces(&[TraceId::new(0, 1)], date(), date())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "search traces failed: network error: read error");
    }
}
