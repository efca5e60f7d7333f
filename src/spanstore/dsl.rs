//! Search request bodies
//!
//! A small typed subset of the search engine query DSL. Everything renders
//! through `to_json`, which is also what `Serialize` emits.

use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Bool(BoolQuery),
    Match { field: String, query: String },
    Term { field: String, value: Value },
    Regexp { field: String, value: String },
    Range(RangeQuery),
    Nested { path: String, query: Box<Query> },
}

impl Query {
    pub fn match_query(field: impl Into<String>, query: impl Into<String>) -> Self {
        Query::Match {
            field: field.into(),
            query: query.into(),
        }
    }

    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Query::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn regexp(field: impl Into<String>, value: impl Into<String>) -> Self {
        Query::Regexp {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn nested(path: impl Into<String>, query: Query) -> Self {
        Query::Nested {
            path: path.into(),
            query: Box::new(query),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Query::Bool(b) => json!({ "bool": b.to_json() }),
            Query::Match { field, query } => json!({ "match": { field.as_str(): { "query": query } } }),
            Query::Term { field, value } => json!({ "term": { field.as_str(): value } }),
            Query::Regexp { field, value } => {
                json!({ "regexp": { field.as_str(): { "value": value } } })
            }
            Query::Range(r) => json!({ "range": { r.field.as_str(): r.bounds_json() } }),
            Query::Nested { path, query } => {
                json!({ "nested": { "path": path, "query": query.to_json() } })
            }
        }
    }
}

impl From<BoolQuery> for Query {
    fn from(b: BoolQuery) -> Self {
        Query::Bool(b)
    }
}

impl From<RangeQuery> for Query {
    fn from(r: RangeQuery) -> Self {
        Query::Range(r)
    }
}

impl Serialize for Query {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Boolean composition. A clause list with one entry renders as a bare
/// object, several as an array.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolQuery {
    pub must: Vec<Query>,
    pub should: Vec<Query>,
}

impl BoolQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must(mut self, query: impl Into<Query>) -> Self {
        self.must.push(query.into());
        self
    }

    pub fn should(mut self, query: impl Into<Query>) -> Self {
        self.should.push(query.into());
        self
    }

    fn to_json(&self) -> Value {
        let mut body = Map::new();
        for (name, clauses) in [("must", &self.must), ("should", &self.should)] {
            match clauses.as_slice() {
                [] => {}
                [single] => {
                    body.insert(name.to_string(), single.to_json());
                }
                many => {
                    body.insert(
                        name.to_string(),
                        Value::Array(many.iter().map(Query::to_json).collect()),
                    );
                }
            }
        }
        Value::Object(body)
    }
}

/// Inclusive range on one field
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery {
    pub field: String,
    pub gte: Option<Value>,
    pub lte: Option<Value>,
}

impl RangeQuery {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            gte: None,
            lte: None,
        }
    }

    pub fn gte(mut self, value: impl Into<Value>) -> Self {
        self.gte = Some(value.into());
        self
    }

    pub fn lte(mut self, value: impl Into<Value>) -> Self {
        self.lte = Some(value.into());
        self
    }

    fn bounds_json(&self) -> Value {
        let mut bounds = Map::new();
        if let Some(gte) = &self.gte {
            bounds.insert("gte".to_string(), gte.clone());
        }
        if let Some(lte) = &self.lte {
            bounds.insert("lte".to_string(), lte.clone());
        }
        Value::Object(bounds)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    Terms(TermsAggregation),
    Max { field: String },
}

impl Aggregation {
    pub fn max(field: impl Into<String>) -> Self {
        Aggregation::Max {
            field: field.into(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Aggregation::Terms(terms) => terms.to_json(),
            Aggregation::Max { field } => json!({ "max": { "field": field } }),
        }
    }
}

impl From<TermsAggregation> for Aggregation {
    fn from(terms: TermsAggregation) -> Self {
        Aggregation::Terms(terms)
    }
}

/// Bucket per distinct field value. Fields are public so callers and tests
/// can inspect the bucket size directly.
#[derive(Debug, Clone, PartialEq)]
pub struct TermsAggregation {
    pub field: String,
    pub size: usize,
    pub order: Vec<(String, SortOrder)>,
    pub sub_aggregations: Vec<(String, Aggregation)>,
}

impl TermsAggregation {
    pub fn new(field: impl Into<String>, size: usize) -> Self {
        Self {
            field: field.into(),
            size,
            order: Vec::new(),
            sub_aggregations: Vec::new(),
        }
    }

    pub fn order(mut self, key: impl Into<String>, order: SortOrder) -> Self {
        self.order.push((key.into(), order));
        self
    }

    pub fn sub_aggregation(mut self, name: impl Into<String>, aggregation: Aggregation) -> Self {
        self.sub_aggregations.push((name.into(), aggregation));
        self
    }

    pub fn to_json(&self) -> Value {
        let mut terms = Map::new();
        terms.insert("field".to_string(), json!(self.field));
        terms.insert("size".to_string(), json!(self.size));
        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|(key, order)| json!({ key.as_str(): order.as_str() }))
                .collect();
            terms.insert("order".to_string(), Value::Array(order));
        }

        let mut body = Map::new();
        body.insert("terms".to_string(), Value::Object(terms));
        if !self.sub_aggregations.is_empty() {
            body.insert("aggregations".to_string(), aggregations_json(&self.sub_aggregations));
        }
        Value::Object(body)
    }
}

fn aggregations_json(aggregations: &[(String, Aggregation)]) -> Value {
    Value::Object(
        aggregations
            .iter()
            .map(|(name, agg)| (name.clone(), agg.to_json()))
            .collect(),
    )
}

/// Body of one `_search` request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchSource {
    pub query: Option<Query>,
    pub size: Option<usize>,
    pub sort: Vec<(String, SortOrder)>,
    pub search_after: Vec<Value>,
    pub track_total_hits: bool,
    pub aggregations: Vec<(String, Aggregation)>,
}

impl SearchSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, query: impl Into<Query>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((field.into(), order));
        self
    }

    pub fn search_after(mut self, value: impl Into<Value>) -> Self {
        self.search_after.push(value.into());
        self
    }

    pub fn track_total_hits(mut self, track: bool) -> Self {
        self.track_total_hits = track;
        self
    }

    pub fn aggregation(mut self, name: impl Into<String>, aggregation: impl Into<Aggregation>) -> Self {
        self.aggregations.push((name.into(), aggregation.into()));
        self
    }

    pub fn aggregation_named(&self, name: &str) -> Option<&Aggregation> {
        self.aggregations
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, agg)| agg)
    }

    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        if let Some(query) = &self.query {
            body.insert("query".to_string(), query.to_json());
        }
        if let Some(size) = self.size {
            body.insert("size".to_string(), json!(size));
        }
        if !self.sort.is_empty() {
            let sort = self
                .sort
                .iter()
                .map(|(field, order)| json!({ field.as_str(): { "order": order.as_str() } }))
                .collect();
            body.insert("sort".to_string(), Value::Array(sort));
        }
        if !self.search_after.is_empty() {
            body.insert("search_after".to_string(), Value::Array(self.search_after.clone()));
        }
        if self.track_total_hits {
            body.insert("track_total_hits".to_string(), Value::Bool(true));
        }
        if !self.aggregations.is_empty() {
            body.insert("aggregations".to_string(), aggregations_json(&self.aggregations));
        }
        Value::Object(body)
    }
}

impl Serialize for SearchSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_single_clause_is_object() {
        let query = BoolQuery::new().must(Query::match_query("a", "b"));
        assert_eq!(
            Query::from(query).to_json(),
            json!({"bool": {"must": {"match": {"a": {"query": "b"}}}}})
        );
    }

    #[test]
    fn test_bool_many_clauses_is_array() {
        let query = BoolQuery::new()
            .should(Query::term("a", "1"))
            .should(Query::regexp("b", "x.*"));
        assert_eq!(
            Query::from(query).to_json(),
            json!({"bool": {"should": [
                {"term": {"a": "1"}},
                {"regexp": {"b": {"value": "x.*"}}}
            ]}})
        );
    }

    #[test]
    fn test_range_and_nested() {
        let range = RangeQuery::new("duration").gte(1_000_000u64).lte(2_000_000u64);
        assert_eq!(
            Query::from(range).to_json(),
            json!({"range": {"duration": {"gte": 1_000_000, "lte": 2_000_000}}})
        );

        let nested = Query::nested("tags", Query::term("tags.key", "error"));
        assert_eq!(
            nested.to_json(),
            json!({"nested": {"path": "tags", "query": {"term": {"tags.key": "error"}}}})
        );
    }

    #[test]
    fn test_terms_aggregation() {
        let agg = TermsAggregation::new("traceID", 20)
            .order("startTime", SortOrder::Desc)
            .sub_aggregation("startTime", Aggregation::max("startTime"));
        assert_eq!(
            agg.to_json(),
            json!({
                "terms": {"field": "traceID", "size": 20, "order": [{"startTime": "desc"}]},
                "aggregations": {"startTime": {"max": {"field": "startTime"}}}
            })
        );
    }

    #[test]
    fn test_search_source() {
        let source = SearchSource::new()
            .query(BoolQuery::new().must(Query::term("traceID", "1")))
            .size(10_000)
            .sort("startTime", SortOrder::Asc)
            .search_after(42u64)
            .track_total_hits(true);
        assert_eq!(
            serde_json::to_value(&source).unwrap(),
            json!({
                "query": {"bool": {"must": {"term": {"traceID": "1"}}}},
                "size": 10000,
                "sort": [{"startTime": {"order": "asc"}}],
                "search_after": [42],
                "track_total_hits": true
            })
        );
    }
}
