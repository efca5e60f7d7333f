use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;

use super::{
    BulkResponse, ClientError, IndexDocument, MultiSearchResponse, SearchClient, SearchRequest,
    SearchResponse,
};
use crate::spanstore::StorageConfig;

const NDJSON: &str = "application/x-ndjson";

/// HTTP client for Elasticsearch/OpenSearch compatible clusters.
///
/// Requests are spread round-robin over the configured servers.
#[derive(Debug)]
pub struct ElasticsearchClient {
    http_client: reqwest::Client,
    servers: Vec<String>,
    next_server: AtomicUsize,
    credentials: Option<(String, String)>,
}

impl ElasticsearchClient {
    pub fn new(servers: Vec<String>, timeout: Duration) -> Result<Self, ClientError> {
        if servers.is_empty() {
            return Err(ClientError::Network("no server URLs configured".to_string()));
        }

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            servers: servers
                .into_iter()
                .map(|s| s.trim_end_matches('/').to_string())
                .collect(),
            next_server: AtomicUsize::new(0),
            credentials: None,
        })
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self, ClientError> {
        let mut client = Self::new(config.server_urls.clone(), config.request_timeout)?;
        if let Some(username) = &config.username {
            client = client.with_basic_auth(username.clone(), config.password.clone().unwrap_or_default());
        }
        Ok(client)
    }

    pub fn with_basic_auth(mut self, username: String, password: String) -> Self {
        self.credentials = Some((username, password));
        self
    }

    fn server(&self) -> &str {
        let i = self.next_server.fetch_add(1, Ordering::Relaxed) % self.servers.len();
        &self.servers[i]
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.server(), path);
        let builder = self.http_client.post(url);
        match &self.credentials {
            Some((user, pass)) => builder.basic_auth(user, Some(pass)),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, ClientError> {
        let response = request
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::NOT_FOUND && body.contains("index_not_found_exception") {
                return Err(ClientError::IndexNotFound(body));
            }
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::Deserialization(e.to_string()))
    }
}

fn ndjson(lines: &[serde_json::Value]) -> String {
    let mut body = String::new();
    for line in lines {
        body.push_str(&line.to_string());
        body.push('\n');
    }
    body
}

#[async_trait]
impl SearchClient for ElasticsearchClient {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, ClientError> {
        let path = if request.indices.is_empty() {
            "_search".to_string()
        } else {
            format!("{}/_search", request.indices.join(","))
        };

        tracing::debug!("Searching {} indices", request.indices.len());
        let builder = self
            .post(&path)
            .query(&[("ignore_unavailable", request.ignore_unavailable)])
            .json(&request.source);
        self.send(builder).await
    }

    async fn multi_search(
        &self,
        requests: &[SearchRequest],
    ) -> Result<MultiSearchResponse, ClientError> {
        let mut lines = Vec::with_capacity(requests.len() * 2);
        for request in requests {
            lines.push(json!({
                "index": request.indices,
                "ignore_unavailable": request.ignore_unavailable,
            }));
            lines.push(request.source.to_json());
        }

        tracing::debug!("Multi-search with {} requests", requests.len());
        let builder = self
            .post("_msearch")
            .header(reqwest::header::CONTENT_TYPE, NDJSON)
            .body(ndjson(&lines));
        self.send(builder).await
    }

    async fn bulk_index(&self, documents: &[IndexDocument]) -> Result<BulkResponse, ClientError> {
        let mut lines = Vec::with_capacity(documents.len() * 2);
        for doc in documents {
            let mut action = json!({ "_index": doc.index });
            if let Some(id) = &doc.id {
                action["_id"] = json!(id);
            }
            lines.push(json!({ "index": action }));
            lines.push(doc.body.clone());
        }

        tracing::debug!("Bulk indexing {} documents", documents.len());
        let builder = self
            .post("_bulk")
            .header(reqwest::header::CONTENT_TYPE, NDJSON)
            .body(ndjson(&lines));
        self.send(builder).await
    }
}
