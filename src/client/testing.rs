//! Scriptable in-memory client for tests

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    BulkResponse, ClientError, IndexDocument, MultiSearchResponse, SearchClient, SearchRequest,
    SearchResponse,
};

/// Replays queued responses in order and records every request.
/// An empty queue answers with an empty response.
#[derive(Default)]
pub struct FakeSearchClient {
    search_responses: Mutex<VecDeque<Result<SearchResponse, ClientError>>>,
    multi_search_responses: Mutex<VecDeque<Result<MultiSearchResponse, ClientError>>>,
    bulk_responses: Mutex<VecDeque<Result<BulkResponse, ClientError>>>,

    pub searches: Mutex<Vec<SearchRequest>>,
    pub multi_searches: Mutex<Vec<Vec<SearchRequest>>>,
    pub bulks: Mutex<Vec<Vec<IndexDocument>>>,
}

impl FakeSearchClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_search(&self, response: Result<SearchResponse, ClientError>) {
        self.search_responses.lock().push_back(response);
    }

    pub fn push_multi_search(&self, response: Result<MultiSearchResponse, ClientError>) {
        self.multi_search_responses.lock().push_back(response);
    }

    pub fn push_bulk(&self, response: Result<BulkResponse, ClientError>) {
        self.bulk_responses.lock().push_back(response);
    }

    pub fn search_count(&self) -> usize {
        self.searches.lock().len()
    }

    pub fn multi_search_count(&self) -> usize {
        self.multi_searches.lock().len()
    }
}

#[async_trait]
impl SearchClient for FakeSearchClient {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, ClientError> {
        self.searches.lock().push(request.clone());
        self.search_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(SearchResponse::default()))
    }

    async fn multi_search(
        &self,
        requests: &[SearchRequest],
    ) -> Result<MultiSearchResponse, ClientError> {
        self.multi_searches.lock().push(requests.to_vec());
        self.multi_search_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(MultiSearchResponse::default()))
    }

    async fn bulk_index(&self, documents: &[IndexDocument]) -> Result<BulkResponse, ClientError> {
        self.bulks.lock().push(documents.to_vec());
        self.bulk_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(BulkResponse::default()))
    }
}
