//! Trace search parameters and the queries built from them

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::dsl::{Aggregation, BoolQuery, Query, RangeQuery, SearchSource, SortOrder, TermsAggregation};
use crate::dbmodel::document::{
    DURATION_FIELD, NESTED_LOG_FIELDS_FIELD, NESTED_PROCESS_TAGS_FIELD, NESTED_TAGS_FIELD,
    OBJECT_PROCESS_TAGS_FIELD, OBJECT_TAGS_FIELD, OPERATION_NAME_FIELD, SERVICE_DOC_OPERATION_FIELD,
    SERVICE_DOC_SERVICE_FIELD, SERVICE_DOC_SPAN_KIND_FIELD, SERVICE_NAME_FIELD,
    START_TIME_FIELD, START_TIME_MILLIS_FIELD, TAG_KEY_FIELD, TAG_VALUE_FIELD, TRACE_ID_FIELD,
};
use crate::dbmodel::DotReplacer;
use crate::model::{datetime_to_micros, TraceId};

pub const TRACE_IDS_AGGREGATION: &str = "traceIDs";
pub const SERVICES_AGGREGATION: &str = "distinct_services";
pub const OPERATIONS_AGGREGATION: &str = "distinct_operations";

pub const DEFAULT_NUM_TRACES: usize = 100;
const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(24 * 3600);

const OBJECT_TAG_FIELDS: [&str; 2] = [OBJECT_TAGS_FIELD, OBJECT_PROCESS_TAGS_FIELD];
const NESTED_TAG_FIELDS: [&str; 3] = [NESTED_TAGS_FIELD, NESTED_PROCESS_TAGS_FIELD, NESTED_LOG_FIELDS_FIELD];

const REGEX_METACHARACTERS: [char; 11] = ['.', '?', '+', '*', '|', '{', '}', '[', ']', '(', ')'];

/// Search for traces
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceQueryParameters {
    pub service_name: String,
    pub operation_name: Option<String>,
    /// Tag key to value pattern
    pub tags: BTreeMap<String, String>,
    pub start_time_min: Option<DateTime<Utc>>,
    pub start_time_max: Option<DateTime<Utc>>,
    pub duration_min: Option<Duration>,
    pub duration_max: Option<Duration>,
    /// Upper bound on discovered trace ids, 0 means the default
    pub num_traces: usize,
}

impl TraceQueryParameters {
    pub fn effective_num_traces(&self) -> usize {
        if self.num_traces == 0 {
            DEFAULT_NUM_TRACES
        } else {
            self.num_traces
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationQueryParameters {
    pub service_name: String,
    pub span_kind: Option<String>,
}

/// Check parameters before anything is sent to the cluster
pub fn validate_query(params: &TraceQueryParameters) -> Result<(), ValidationError> {
    if params.service_name.is_empty() {
        return Err(ValidationError::ServiceNameNotSet);
    }

    let (Some(min), Some(max)) = (params.start_time_min, params.start_time_max) else {
        return Err(ValidationError::StartAndEndTimeNotSet);
    };
    if min > max {
        return Err(ValidationError::StartTimeMinGreaterThanMax);
    }

    // a zero bound is unset
    let nonzero = |d: Option<Duration>| d.filter(|d| !d.is_zero());
    if let (Some(min), Some(max)) = (nonzero(params.duration_min), nonzero(params.duration_max)) {
        if min > max {
            return Err(ValidationError::DurationMinGreaterThanMax);
        }
    }

    Ok(())
}

/// How a tag filter value is matched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagPattern {
    /// Exact value, escapes already removed
    Literal(String),
    /// Raw regular expression
    Regex(String),
}

impl TagPattern {
    /// Any unescaped metacharacter makes the value a regex. Otherwise
    /// backslash escapes are dropped: `spo\*` matches the literal `spo*`.
    pub fn classify(value: &str) -> Self {
        let mut literal = String::with_capacity(value.len());
        let mut chars = value.chars();

        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some(escaped) => literal.push(escaped),
                    None => literal.push('\\'),
                },
                c if REGEX_METACHARACTERS.contains(&c) => return TagPattern::Regex(value.to_string()),
                c => literal.push(c),
            }
        }

        TagPattern::Literal(literal)
    }

    fn clause(&self, field: String) -> Query {
        match self {
            TagPattern::Literal(value) => Query::match_query(field, value.clone()),
            TagPattern::Regex(pattern) => Query::regexp(field, pattern.clone()),
        }
    }
}

/// Builds search bodies for trace discovery and service listing
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    dots: DotReplacer,
}

impl QueryBuilder {
    pub fn new(dots: DotReplacer) -> Self {
        Self { dots }
    }

    /// Most recent traces first, by their latest span start
    pub fn build_trace_id_aggregation(&self, num_traces: usize) -> TermsAggregation {
        TermsAggregation::new(TRACE_ID_FIELD, num_traces)
            .order(START_TIME_FIELD, SortOrder::Desc)
            .sub_aggregation(START_TIME_FIELD, Aggregation::max(START_TIME_FIELD))
    }

    /// `must` of duration, start time, service, operation and tag clauses, in
    /// that order. Optional clauses are left out when unset.
    pub fn build_find_trace_ids_query(&self, params: &TraceQueryParameters) -> BoolQuery {
        let mut query = BoolQuery::new();

        if params.duration_min.is_some() || params.duration_max.is_some() {
            query = query.must(self.build_duration_query(params.duration_min, params.duration_max));
        }

        if let (Some(min), Some(max)) = (params.start_time_min, params.start_time_max) {
            query = query.must(self.build_start_time_query(min, max));
        }

        query = query.must(self.build_service_name_query(&params.service_name));

        if let Some(operation) = params.operation_name.as_deref().filter(|op| !op.is_empty()) {
            query = query.must(self.build_operation_name_query(operation));
        }

        for (key, value) in &params.tags {
            query = query.must(self.build_tag_query(key, value));
        }

        query
    }

    pub fn build_duration_query(&self, min: Option<Duration>, max: Option<Duration>) -> Query {
        let min = min.unwrap_or_default();
        let max = max.filter(|d| !d.is_zero()).unwrap_or(DEFAULT_MAX_DURATION);
        RangeQuery::new(DURATION_FIELD)
            .gte(min.as_micros() as u64)
            .lte(max.as_micros() as u64)
            .into()
    }

    pub fn build_start_time_query(&self, min: DateTime<Utc>, max: DateTime<Utc>) -> Query {
        RangeQuery::new(START_TIME_MILLIS_FIELD)
            .gte(datetime_to_micros(min) / 1000)
            .lte(datetime_to_micros(max) / 1000)
            .into()
    }

    pub fn build_service_name_query(&self, service: &str) -> Query {
        Query::match_query(SERVICE_NAME_FIELD, service)
    }

    pub fn build_operation_name_query(&self, operation: &str) -> Query {
        Query::match_query(OPERATION_NAME_FIELD, operation)
    }

    /// Matches the tag wherever it may be stored: the object maps (with the
    /// dot-replaced key) or the nested span, process and log arrays.
    pub fn build_tag_query(&self, key: &str, value: &str) -> Query {
        let pattern = TagPattern::classify(value);
        let replaced_key = self.dots.replace_dot(key);
        let mut query = BoolQuery::new();

        for field in OBJECT_TAG_FIELDS {
            let clause = pattern.clause(format!("{}.{}", field, replaced_key));
            query = query.should(BoolQuery::new().must(clause));
        }

        for field in NESTED_TAG_FIELDS {
            let key_clause = Query::match_query(format!("{}.{}", field, TAG_KEY_FIELD), key);
            let value_clause = pattern.clause(format!("{}.{}", field, TAG_VALUE_FIELD));
            query = query.should(Query::nested(
                field,
                BoolQuery::new().must(key_clause).must(value_clause).into(),
            ));
        }

        query.into()
    }

    pub fn build_trace_by_id_query(&self, trace_id: &TraceId) -> Query {
        BoolQuery::new()
            .must(Query::term(TRACE_ID_FIELD, trace_id.to_hex()))
            .into()
    }

    /// Search body for trace id discovery. Hits are not needed, only buckets.
    pub fn find_trace_ids_source(&self, params: &TraceQueryParameters) -> SearchSource {
        SearchSource::new()
            .query(self.build_find_trace_ids_query(params))
            .size(0)
            .aggregation(
                TRACE_IDS_AGGREGATION,
                self.build_trace_id_aggregation(params.effective_num_traces()),
            )
    }

    /// One page of a trace's spans, ascending by start time after `cursor`
    pub fn trace_page_source(&self, trace_id: &TraceId, cursor: u64, max_doc_count: usize) -> SearchSource {
        SearchSource::new()
            .query(self.build_trace_by_id_query(trace_id))
            .size(max_doc_count)
            .sort(START_TIME_FIELD, SortOrder::Asc)
            .search_after(cursor)
            .track_total_hits(true)
    }

    pub fn services_source(&self, max_doc_count: usize) -> SearchSource {
        SearchSource::new().size(0).aggregation(
            SERVICES_AGGREGATION,
            TermsAggregation::new(SERVICE_DOC_SERVICE_FIELD, max_doc_count),
        )
    }

    pub fn operations_source(&self, params: &OperationQueryParameters, max_doc_count: usize) -> SearchSource {
        let mut query = BoolQuery::new().must(Query::term(
            SERVICE_DOC_SERVICE_FIELD,
            params.service_name.clone(),
        ));
        if let Some(kind) = params.span_kind.as_deref().filter(|k| !k.is_empty()) {
            query = query.must(Query::term(SERVICE_DOC_SPAN_KIND_FIELD, kind));
        }

        SearchSource::new().query(query).size(0).aggregation(
            OPERATIONS_AGGREGATION,
            TermsAggregation::new(SERVICE_DOC_OPERATION_FIELD, max_doc_count),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("service Name must be set")]
    ServiceNameNotSet,

    #[error("start and end time must be set")]
    StartAndEndTimeNotSet,

    #[error("start time minimum is above maximum")]
    StartTimeMinGreaterThanMax,

    #[error("duration minimum is above maximum")]
    DurationMinGreaterThanMax,
}
