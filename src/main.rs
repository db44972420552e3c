use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use url::Url;

use media_cache_gateway::cache::{DiskStorage, StoreOptions, CACHE_DIR};
use media_cache_gateway::config::{
    GatewayConfig, DEFAULT_API_PREFIX, DEFAULT_CACHE_VERSION, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_MEDIA_PREFIX, DEFAULT_STORE_PREFIX,
};
use media_cache_gateway::proxy::{HttpFetcher, ProxyServer};
use media_cache_gateway::Gateway;

#[derive(Parser, Debug)]
#[command(name = "media-cache-gateway", about = "Caching gateway for BulutVizyon media")]
struct Cli {
    /// Address to accept connections on.
    #[arg(long, env = "GATEWAY_LISTEN", default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    /// Application origin requests are forwarded to.
    #[arg(long, env = "GATEWAY_ORIGIN", default_value = "http://127.0.0.1:5006")]
    origin: Url,

    /// Root directory of the persistent stores.
    #[arg(long, env = "GATEWAY_CACHE_DIR", default_value = CACHE_DIR)]
    cache_dir: PathBuf,

    #[arg(long, env = "GATEWAY_STORE_PREFIX", default_value = DEFAULT_STORE_PREFIX)]
    store_prefix: String,

    /// Changing this drops every previously cached entry on startup.
    #[arg(long, env = "GATEWAY_CACHE_VERSION", default_value = DEFAULT_CACHE_VERSION)]
    cache_version: String,

    /// Byte quota per store; unlimited when unset.
    #[arg(long, env = "GATEWAY_STORE_QUOTA")]
    store_quota: Option<u64>,

    #[arg(long, env = "GATEWAY_MAX_CONNECTIONS", default_value_t = DEFAULT_MAX_CONNECTIONS)]
    max_connections: usize,

    #[arg(long, env = "GATEWAY_MEDIA_PREFIX", default_value = DEFAULT_MEDIA_PREFIX)]
    media_prefix: String,

    #[arg(long, env = "GATEWAY_API_PREFIX", default_value = DEFAULT_API_PREFIX)]
    api_prefix: String,

    /// Replaces the default media extensions when given (repeatable).
    #[arg(long = "media-extension")]
    media_extensions: Vec<String>,

    /// URL warmed into the general store on install (repeatable).
    #[arg(long = "warm-url")]
    warm_urls: Vec<String>,

    /// Upstream connect timeout in seconds.
    #[arg(long, env = "GATEWAY_CONNECT_TIMEOUT")]
    connect_timeout: Option<u64>,
}

impl Cli {
    fn into_config(self) -> GatewayConfig {
        let mut config = GatewayConfig::new(self.origin);
        config.listen = self.listen;
        config.max_connections = self.max_connections;
        config.cache_dir = self.cache_dir;
        config.store_prefix = self.store_prefix;
        config.cache_version = self.cache_version;
        config.store = StoreOptions {
            max_bytes: self.store_quota,
            ..StoreOptions::default()
        };
        config.media_prefix = self.media_prefix;
        config.api_prefix = self.api_prefix;
        if !self.media_extensions.is_empty() {
            config.media_extensions = self.media_extensions;
        }
        config.warm_urls = self.warm_urls;
        config.connect_timeout = self.connect_timeout.map(Duration::from_secs);
        config
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Cli::parse().into_config();

    let storage = DiskStorage::new(&config.cache_dir, config.store.clone())
        .await
        .with_context(|| format!("failed to open cache directory {}", config.cache_dir.display()))?;
    let fetcher =
        HttpFetcher::new(config.connect_timeout).context("failed to build upstream client")?;
    let gateway = Arc::new(Gateway::new(&config, Arc::new(storage), Arc::new(fetcher)));

    gateway.install().await.context("install failed")?;
    gateway.activate().await.context("activation failed")?;

    let server = ProxyServer::new(config.listen, gateway, config.max_connections);
    server
        .run(shutdown_signal())
        .await
        .with_context(|| format!("failed to serve on {}", config.listen))?;

    Ok(())
}
