//! Index naming
//!
//! Spans and services live in time-partitioned indices named
//! `<prefix>-jaeger-span-<date>` and `<prefix>-jaeger-service-<date>`. With
//! read/write aliases enabled, readers and writers use one stable alias per
//! family instead and the cluster decides which physical indices back it.

use std::fmt::Write;

use chrono::{DateTime, Utc};

use super::config::{IndexOptions, StorageConfig};

pub const SPAN_INDEX_BASE: &str = "jaeger-span-";
pub const SERVICE_INDEX_BASE: &str = "jaeger-service-";

const INDEX_PREFIX_SEPARATOR: &str = "-";
const DEFAULT_READ_ALIAS: &str = "read";
const DEFAULT_WRITE_ALIAS: &str = "write";

/// Normalized user index prefix, empty or ending in the separator
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexPrefix(String);

impl IndexPrefix {
    pub fn new(prefix: &str) -> Self {
        if prefix.is_empty() || prefix.ends_with(INDEX_PREFIX_SEPARATOR) {
            Self(prefix.to_string())
        } else {
            Self(format!("{}{}", prefix, INDEX_PREFIX_SEPARATOR))
        }
    }

    pub fn apply(&self, base: &str) -> String {
        format!("{}{}", self.0, base)
    }
}

/// `base` followed by `date` rendered with a strftime layout
pub fn index_with_date(base: &str, date_layout: &str, date: DateTime<Utc>) -> String {
    let mut name = String::with_capacity(base.len() + date_layout.len() + 8);
    name.push_str(base);
    // layouts are validated when the config is loaded
    let _ = write!(name, "{}", date.format(date_layout));
    name
}

/// Every bucket index covering `[start, end]`, newest first.
///
/// Walks back from `end` by `step`, skipping consecutive duplicates, and
/// always ends with the index of `start`.
pub fn time_range_indices(
    base: &str,
    date_layout: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    step: chrono::Duration,
) -> Vec<String> {
    let first = index_with_date(base, date_layout, start);
    let mut indices: Vec<String> = Vec::new();

    let mut cursor = end;
    let mut current = index_with_date(base, date_layout, cursor);
    while current != first && cursor > start {
        if indices.last() != Some(&current) {
            indices.push(current);
        }
        cursor = cursor - step;
        current = index_with_date(base, date_layout, cursor);
    }

    indices.push(first);
    indices
}

/// Resolves read and write index names for spans and services
#[derive(Debug, Clone)]
pub struct IndexResolver {
    span_base: String,
    service_base: String,
    span_index: IndexOptions,
    service_index: IndexOptions,
    use_aliases: bool,
    read_alias_suffix: String,
    write_alias_suffix: String,
    remote_read_clusters: Vec<String>,
}

impl IndexResolver {
    pub fn new(config: &StorageConfig) -> Self {
        let prefix = IndexPrefix::new(&config.index_prefix);
        Self {
            span_base: prefix.apply(SPAN_INDEX_BASE),
            service_base: prefix.apply(SERVICE_INDEX_BASE),
            span_index: config.span_index.clone(),
            service_index: config.service_index.clone(),
            use_aliases: config.use_read_write_aliases,
            read_alias_suffix: config.read_alias_suffix.clone(),
            write_alias_suffix: config.write_alias_suffix.clone(),
            remote_read_clusters: config.remote_read_clusters.clone(),
        }
    }

    pub fn uses_aliases(&self) -> bool {
        self.use_aliases
    }

    pub fn span_read_indices(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<String> {
        self.read_indices(&self.span_base, &self.span_index, start, end)
    }

    pub fn service_read_indices(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<String> {
        self.read_indices(&self.service_base, &self.service_index, start, end)
    }

    pub fn span_write_index(&self, date: DateTime<Utc>) -> String {
        self.write_index(&self.span_base, &self.span_index, date)
    }

    pub fn service_write_index(&self, date: DateTime<Utc>) -> String {
        self.write_index(&self.service_base, &self.service_index, date)
    }

    fn read_indices(
        &self,
        base: &str,
        options: &IndexOptions,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<String> {
        let local = if self.use_aliases {
            let suffix = if self.read_alias_suffix.is_empty() {
                DEFAULT_READ_ALIAS
            } else {
                self.read_alias_suffix.as_str()
            };
            vec![format!("{}{}", base, suffix)]
        } else {
            time_range_indices(
                base,
                &options.date_layout,
                start,
                end,
                options.rollover_frequency.step(),
            )
        };

        self.with_remote_clusters(local)
    }

    fn write_index(&self, base: &str, options: &IndexOptions, date: DateTime<Utc>) -> String {
        if self.use_aliases {
            let suffix = if self.write_alias_suffix.is_empty() {
                DEFAULT_WRITE_ALIAS
            } else {
                self.write_alias_suffix.as_str()
            };
            format!("{}{}", base, suffix)
        } else {
            index_with_date(base, &options.date_layout, date)
        }
    }

    /// Each local name followed by `<cluster>:<name>` for every remote cluster
    fn with_remote_clusters(&self, indices: Vec<String>) -> Vec<String> {
        if self.remote_read_clusters.is_empty() {
            return indices;
        }

        let mut all = Vec::with_capacity(indices.len() * (self.remote_read_clusters.len() + 1));
        for index in indices {
            let remote: Vec<String> = self
                .remote_read_clusters
                .iter()
                .map(|cluster| format!("{}:{}", cluster, index))
                .collect();
            all.push(index);
            all.extend(remote);
        }
        all
    }
}
