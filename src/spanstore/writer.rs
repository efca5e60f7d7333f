//! Span and service document writes
//!
//! Every span becomes one document in its dated span index. Each distinct
//! service/operation/kind seen in a batch also yields a service document so
//! the service and operation listings stay cheap aggregations. Service
//! documents already written recently are skipped.

use std::collections::HashSet;
use std::sync::Arc;

use moka::sync::Cache;

use super::config::StorageConfig;
use super::index::IndexResolver;
use crate::client::{ClientError, IndexDocument, SearchClient};
use crate::dbmodel::{DotReplacer, FromDomain, Service};
use crate::model::{find_tag, Span};

const SPAN_KIND_TAG: &str = "span.kind";
const SERVICE_CACHE_CAPACITY: u64 = 100_000;

/// Service document as stored in one particular index
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ServiceKey {
    index: String,
    service: Service,
}

pub struct SpanWriter {
    client: Arc<dyn SearchClient>,
    resolver: IndexResolver,
    from_domain: FromDomain,
    /// Service documents known to be stored
    written_services: Cache<ServiceKey, ()>,
}

impl SpanWriter {
    pub fn new(client: Arc<dyn SearchClient>, config: &StorageConfig) -> Self {
        Self {
            client,
            resolver: IndexResolver::new(config),
            from_domain: FromDomain::new(
                config.all_tags_as_fields,
                &config.tag_keys_as_fields,
                DotReplacer::new(config.tag_dot_replacement.clone()),
            ),
            written_services: Cache::builder()
                .max_capacity(SERVICE_CACHE_CAPACITY)
                .time_to_live(config.service_cache_ttl)
                .build(),
        }
    }

    /// Write all spans in one bulk request. Returns the number of spans
    /// written.
    #[tracing::instrument(skip_all, fields(span_count = spans.len()))]
    pub async fn write_spans(&self, spans: &[Span]) -> Result<usize, SpanWriterError> {
        if spans.is_empty() {
            return Ok(0);
        }

        let mut documents = Vec::with_capacity(spans.len() * 2);
        let mut new_services: Vec<ServiceKey> = Vec::new();
        let mut seen: HashSet<ServiceKey> = HashSet::new();

        for span in spans {
            let body = serde_json::to_value(self.from_domain.to_document(span))
                .map_err(|e| SpanWriterError::Serialization(e.to_string()))?;
            documents.push(IndexDocument {
                index: self.resolver.span_write_index(span.start_datetime()),
                id: None,
                body,
            });

            let key = ServiceKey {
                index: self.resolver.service_write_index(span.start_datetime()),
                service: service_of(span),
            };
            if self.written_services.contains_key(&key) || !seen.insert(key.clone()) {
                continue;
            }

            let body = serde_json::to_value(&key.service)
                .map_err(|e| SpanWriterError::Serialization(e.to_string()))?;
            documents.push(IndexDocument {
                index: key.index.clone(),
                id: Some(service_document_id(&key.service)),
                body,
            });
            new_services.push(key);
        }

        let response = self.client.bulk_index(&documents).await.map_err(|e| {
            tracing::error!("Bulk write of {} documents failed: {}", documents.len(), e);
            SpanWriterError::Client(e)
        })?;

        let failed = response.failed_items();
        if response.errors && failed > 0 {
            tracing::error!("Cluster rejected {} of {} documents", failed, documents.len());
            return Err(SpanWriterError::BulkRejected { failed });
        }

        for key in new_services {
            self.written_services.insert(key, ());
        }

        tracing::debug!("Wrote {} spans", spans.len());
        Ok(spans.len())
    }
}

fn service_of(span: &Span) -> Service {
    let span_kind = find_tag(&span.tags, SPAN_KIND_TAG)
        .and_then(|tag| tag.value.as_str())
        .unwrap_or_default()
        .to_string();

    Service {
        service_name: span.process.service_name.clone(),
        operation_name: span.operation_name.clone(),
        span_kind,
    }
}

/// Stable id so rewriting the same service document is idempotent
fn service_document_id(service: &Service) -> String {
    let key = format!(
        "{}|{}|{}",
        service.service_name, service.operation_name, service.span_kind
    );
    format!("{:016x}", fxhash::hash64(key.as_bytes()))
}

#[derive(Debug, thiserror::Error)]
pub enum SpanWriterError {
    #[error("bulk write failed: {0}")]
    Client(#[from] ClientError),

    #[error("cluster rejected {failed} documents")]
    BulkRejected { failed: usize },

    #[error("serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::FakeSearchClient;
    use crate::client::BulkResponse;
    use crate::model::{datetime_to_micros, KeyValue, Process, SpanId, TraceId};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn span(operation: &str, kind: Option<&str>) -> Span {
        let mut span = Span::new(
            TraceId::new(0, 1),
            SpanId(2),
            operation,
            Process::new("frontend"),
        );
        span.start_time = datetime_to_micros(Utc.with_ymd_and_hms(2019, 10, 10, 5, 0, 0).unwrap());
        span.duration = 10;
        if let Some(kind) = kind {
            span.tags.push(KeyValue::string(SPAN_KIND_TAG, kind));
        }
        span
    }

    fn writer(client: Arc<FakeSearchClient>, config: &StorageConfig) -> SpanWriter {
        SpanWriter::new(client, config)
    }

    #[tokio::test]
    async fn test_write_spans_and_services() {
        let client = Arc::new(FakeSearchClient::new());
        let w = writer(client.clone(), &StorageConfig::default());

        let spans = vec![
            span("GET /", Some("server")),
            span("GET /", Some("server")),
            span("SELECT", Some("client")),
        ];
        assert_eq!(w.write_spans(&spans).await.unwrap(), 3);

        let bulks = client.bulks.lock();
        assert_eq!(bulks.len(), 1);
        let docs = &bulks[0];
        assert_eq!(docs.len(), 5);

        let span_docs: Vec<_> = docs.iter().filter(|d| d.id.is_none()).collect();
        assert_eq!(span_docs.len(), 3);
        assert!(span_docs.iter().all(|d| d.index == "jaeger-span-2019-10-10"));
        assert_eq!(span_docs[0].body["operationName"], json!("GET /"));

        let service_docs: Vec<_> = docs.iter().filter(|d| d.id.is_some()).collect();
        assert_eq!(service_docs.len(), 2);
        assert_eq!(service_docs[0].index, "jaeger-service-2019-10-10");
        assert_eq!(
            service_docs[0].body,
            json!({"serviceName": "frontend", "operationName": "GET /", "spanKind": "server"})
        );
    }

    #[tokio::test]
    async fn test_services_are_cached_after_success() {
        let client = Arc::new(FakeSearchClient::new());
        let w = writer(client.clone(), &StorageConfig::default());

        w.write_spans(&[span("GET /", None)]).await.unwrap();
        w.write_spans(&[span("GET /", None)]).await.unwrap();

        let bulks = client.bulks.lock();
        assert_eq!(bulks[0].len(), 2);
        assert_eq!(bulks[1].len(), 1);
        assert_eq!(
            bulks[0][1].body,
            json!({"serviceName": "frontend", "operationName": "GET /"})
        );
    }

    #[tokio::test]
    async fn test_rejected_bulk_is_retried_with_services() {
        let client = Arc::new(FakeSearchClient::new());
        client.push_bulk(Ok(BulkResponse {
            errors: true,
            items: vec![
                json!({"index": {"status": 201}}),
                json!({"index": {"status": 429, "error": {"type": "es_rejected_execution_exception"}}}),
            ],
        }));
        let w = writer(client.clone(), &StorageConfig::default());

        let err = w.write_spans(&[span("GET /", None)]).await.unwrap_err();
        assert!(matches!(err, SpanWriterError::BulkRejected { failed: 1 }));

        w.write_spans(&[span("GET /", None)]).await.unwrap();
        assert_eq!(client.bulks.lock()[1].len(), 2);
    }

    #[tokio::test]
    async fn test_client_failure() {
        let client = Arc::new(FakeSearchClient::new());
        client.push_bulk(Err(ClientError::Network("connection refused".to_string())));
        let w = writer(client, &StorageConfig::default());

        let err = w.write_spans(&[span("GET /", None)]).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "bulk write failed: network error: connection refused"
        );
    }

    #[tokio::test]
    async fn test_alias_write_indices() {
        let client = Arc::new(FakeSearchClient::new());
        let config = StorageConfig {
            index_prefix: "prod".to_string(),
            use_read_write_aliases: true,
            ..StorageConfig::default()
        };
        writer(client.clone(), &config)
            .write_spans(&[span("GET /", None)])
            .await
            .unwrap();

        let bulks = client.bulks.lock();
        assert_eq!(bulks[0][0].index, "prod-jaeger-span-write");
        assert_eq!(bulks[0][1].index, "prod-jaeger-service-write");
    }

    #[tokio::test]
    async fn test_empty_batch_skips_bulk() {
        let client = Arc::new(FakeSearchClient::new());
        let written = writer(client.clone(), &StorageConfig::default())
            .write_spans(&[])
            .await
            .unwrap();
        assert_eq!(written, 0);
        assert!(client.bulks.lock().is_empty());
    }

    #[test]
    fn test_service_document_id_is_stable() {
        let a = service_of(&span("GET /", Some("server")));
        let b = service_of(&span("GET /", Some("client")));
        assert_eq!(service_document_id(&a), service_document_id(&a.clone()));
        assert_ne!(service_document_id(&a), service_document_id(&b));
        assert_eq!(service_document_id(&a).len(), 16);
    }
}
