//! spanseek server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - SPANSEEK_HOST: Bind address (default: 0.0.0.0)
//! - SPANSEEK_PORT: Port number (default: 8080)
//! - RUST_LOG: Log filter (default: spanseek=info,tower_http=info)
//!
//! Storage configuration:
//! - SPANSEEK_ES_SERVER_URLS: Comma-separated cluster URLs (default: http://127.0.0.1:9200)
//! - SPANSEEK_ES_USERNAME / SPANSEEK_ES_PASSWORD: Basic auth credentials
//! - SPANSEEK_ES_INDEX_PREFIX: Prefix for every index name
//! - SPANSEEK_ES_USE_ALIASES: Read and write through aliases instead of dated indices
//! - SPANSEEK_ES_MAX_SPAN_AGE: Lookback for service and trace reads (default: 72h)
//!
//! See `StorageConfig::from_env` for the full list.

use spanseek::api::{run_server, ServerConfig};
use spanseek::spanstore::StorageConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spanseek=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let host = std::env::var("SPANSEEK_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("SPANSEEK_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    let config = ServerConfig {
        host,
        port,
        storage: StorageConfig::from_env()?,
    };

    tracing::info!("spanseek configuration:");
    tracing::info!("  Host: {}:{}", config.host, config.port);
    tracing::info!("  Cluster: {}", config.storage.server_urls.join(", "));
    if config.storage.use_read_write_aliases {
        tracing::info!("  Index mode: read/write aliases");
    } else {
        tracing::info!(
            "  Index mode: dated (spans {}, services {})",
            config.storage.span_index.date_layout,
            config.storage.service_index.date_layout
        );
    }
    if !config.storage.index_prefix.is_empty() {
        tracing::info!("  Index prefix: {}", config.storage.index_prefix);
    }
    for cluster in &config.storage.remote_read_clusters {
        tracing::info!("  Remote read cluster: {}", cluster);
    }
    tracing::info!(
        "  Max span age: {}",
        humantime::format_duration(config.storage.max_span_age)
    );

    println!(
        r#"
  ___ _ __   __ _ _ __  ___  ___  ___| | __
 / __| '_ \ / _` | '_ \/ __|/ _ \/ _ \ |/ /
 \__ \ |_) | (_| | | | \__ \  __/  __/   <
 |___/ .__/ \__,_|_| |_|___/\___|\___|_|\_\
     |_|

 Span storage and trace search
 Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );

    run_server(config).await
}
