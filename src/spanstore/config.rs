use std::str::FromStr;
use std::time::Duration;

use chrono::format::{Item, StrftimeItems};

/// How often time-partitioned indices roll over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloverFrequency {
    Hour,
    Day,
}

impl RolloverFrequency {
    pub fn step(&self) -> chrono::Duration {
        match self {
            RolloverFrequency::Hour => chrono::Duration::hours(1),
            RolloverFrequency::Day => chrono::Duration::days(1),
        }
    }
}

impl FromStr for RolloverFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hour" | "hourly" => Ok(RolloverFrequency::Hour),
            "day" | "daily" => Ok(RolloverFrequency::Day),
            other => Err(format!("unknown rollover frequency '{}'", other)),
        }
    }
}

/// Naming of one family of time-partitioned indices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexOptions {
    /// strftime layout appended to the index base name
    pub date_layout: String,
    pub rollover_frequency: RolloverFrequency,
}

impl IndexOptions {
    pub fn daily() -> Self {
        Self {
            date_layout: "%Y-%m-%d".to_string(),
            rollover_frequency: RolloverFrequency::Day,
        }
    }

    pub fn hourly() -> Self {
        Self {
            date_layout: "%Y-%m-%d-%H".to_string(),
            rollover_frequency: RolloverFrequency::Hour,
        }
    }

    fn validate(&self, key: &str) -> Result<(), ConfigError> {
        if StrftimeItems::new(&self.date_layout).any(|item| matches!(item, Item::Error)) {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: self.date_layout.clone(),
                reason: "invalid strftime layout".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self::daily()
    }
}

/// Storage configuration, immutable once loaded
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub server_urls: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub request_timeout: Duration,

    pub index_prefix: String,
    pub span_index: IndexOptions,
    pub service_index: IndexOptions,
    pub use_read_write_aliases: bool,
    pub read_alias_suffix: String,
    pub write_alias_suffix: String,
    pub remote_read_clusters: Vec<String>,

    pub tag_dot_replacement: String,
    pub tag_keys_as_fields: Vec<String>,
    pub all_tags_as_fields: bool,

    pub max_doc_count: usize,
    pub max_span_age: Duration,
    pub max_follow_up_waves: usize,
    pub service_cache_ttl: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            server_urls: vec!["http://127.0.0.1:9200".to_string()],
            username: None,
            password: None,
            request_timeout: Duration::from_secs(10),
            index_prefix: String::new(),
            span_index: IndexOptions::daily(),
            service_index: IndexOptions::daily(),
            use_read_write_aliases: false,
            read_alias_suffix: String::new(),
            write_alias_suffix: String::new(),
            remote_read_clusters: Vec::new(),
            tag_dot_replacement: "@".to_string(),
            tag_keys_as_fields: Vec::new(),
            all_tags_as_fields: false,
            max_doc_count: 10_000,
            max_span_age: Duration::from_secs(72 * 3600),
            max_follow_up_waves: 5,
            service_cache_ttl: Duration::from_secs(12 * 3600),
        }
    }
}

impl StorageConfig {
    /// Load from environment variables
    /// SPANSEEK_ES_SERVER_URLS=http://es-1:9200,http://es-2:9200
    /// SPANSEEK_ES_INDEX_PREFIX=prod
    /// SPANSEEK_ES_USE_ALIASES=true
    /// SPANSEEK_ES_MAX_SPAN_AGE=72h
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key lookup. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup: &lookup };
        let defaults = Self::default();

        let config = Self {
            server_urls: env
                .list("SPANSEEK_ES_SERVER_URLS")
                .filter(|urls| !urls.is_empty())
                .unwrap_or(defaults.server_urls),
            username: env.get("SPANSEEK_ES_USERNAME"),
            password: env.get("SPANSEEK_ES_PASSWORD"),
            request_timeout: env
                .duration("SPANSEEK_ES_TIMEOUT")?
                .unwrap_or(defaults.request_timeout),

            index_prefix: env.get("SPANSEEK_ES_INDEX_PREFIX").unwrap_or_default(),
            span_index: IndexOptions {
                date_layout: env
                    .get("SPANSEEK_ES_SPAN_INDEX_DATE_LAYOUT")
                    .unwrap_or(defaults.span_index.date_layout),
                rollover_frequency: env
                    .parsed("SPANSEEK_ES_SPAN_INDEX_ROLLOVER")?
                    .unwrap_or(defaults.span_index.rollover_frequency),
            },
            service_index: IndexOptions {
                date_layout: env
                    .get("SPANSEEK_ES_SERVICE_INDEX_DATE_LAYOUT")
                    .unwrap_or(defaults.service_index.date_layout),
                rollover_frequency: env
                    .parsed("SPANSEEK_ES_SERVICE_INDEX_ROLLOVER")?
                    .unwrap_or(defaults.service_index.rollover_frequency),
            },
            use_read_write_aliases: env
                .flag("SPANSEEK_ES_USE_ALIASES")?
                .unwrap_or(defaults.use_read_write_aliases),
            read_alias_suffix: env.get("SPANSEEK_ES_READ_ALIAS_SUFFIX").unwrap_or_default(),
            write_alias_suffix: env.get("SPANSEEK_ES_WRITE_ALIAS_SUFFIX").unwrap_or_default(),
            remote_read_clusters: env
                .list("SPANSEEK_ES_REMOTE_READ_CLUSTERS")
                .unwrap_or_default(),

            tag_dot_replacement: env
                .get("SPANSEEK_ES_TAG_DOT_REPLACEMENT")
                .unwrap_or(defaults.tag_dot_replacement),
            tag_keys_as_fields: env.list("SPANSEEK_ES_TAGS_AS_FIELDS").unwrap_or_default(),
            all_tags_as_fields: env
                .flag("SPANSEEK_ES_ALL_TAGS_AS_FIELDS")?
                .unwrap_or(defaults.all_tags_as_fields),

            max_doc_count: env
                .parsed("SPANSEEK_ES_MAX_DOC_COUNT")?
                .unwrap_or(defaults.max_doc_count),
            max_span_age: env
                .duration("SPANSEEK_ES_MAX_SPAN_AGE")?
                .unwrap_or(defaults.max_span_age),
            max_follow_up_waves: env
                .parsed("SPANSEEK_ES_MAX_FOLLOW_UP_WAVES")?
                .unwrap_or(defaults.max_follow_up_waves),
            service_cache_ttl: env
                .duration("SPANSEEK_ES_SERVICE_CACHE_TTL")?
                .unwrap_or(defaults.service_cache_ttl),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_urls.is_empty() {
            return Err(ConfigError::NoServers);
        }
        if self.max_doc_count == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SPANSEEK_ES_MAX_DOC_COUNT".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        self.span_index.validate("SPANSEEK_ES_SPAN_INDEX_DATE_LAYOUT")?;
        self.service_index.validate("SPANSEEK_ES_SERVICE_INDEX_DATE_LAYOUT")?;
        Ok(())
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<'a, F: Fn(&str) -> Option<String>> Env<'a, F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn list(&self, key: &str) -> Option<Vec<String>> {
        self.get(key).map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
    }

    fn flag(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Some(true)),
                "false" | "0" | "no" => Ok(Some(false)),
                _ => Err(invalid(key, &v, "expected a boolean")),
            },
        }
    }

    fn duration(&self, key: &str) -> Result<Option<Duration>, ConfigError> {
        self.get(key)
            .map(|v| humantime::parse_duration(&v).map_err(|e| invalid(key, &v, &e.to_string())))
            .transpose()
    }

    fn parsed<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|v| v.parse::<T>().map_err(|e| invalid(key, &v, &e.to_string())))
            .transpose()
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("no search server URLs configured")]
    NoServers,
}
