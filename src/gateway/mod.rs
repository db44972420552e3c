//! The media cache gateway.
//!
//! Every outgoing request is classified and then served by one of three
//! strategies: cache-first with an offline fallback for media, cache-first
//! without write-back for other static GETs, and straight passthrough for
//! API, HTML and non-GET traffic. A message channel lets the hosting page
//! warm the media store ahead of playback.

mod classify;
mod lifecycle;
mod precache;
mod strategy;

pub use classify::{accepts_html, Classifier, RequestClass};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use precache::{GatewayMessage, PrecacheReport, CACHE_URLS};

use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use tracing::{info, trace, warn};
use url::Url;

use crate::cache::{CacheKey, CacheStorage, ResponseSnapshot};
use crate::config::{GatewayConfig, StoreNames};
use crate::error::GatewayError;
use crate::proxy::Fetcher;

/// Reason phrase of the empty response served when media is neither cached
/// nor reachable.
pub const OFFLINE_FALLBACK_REASON: &str = "OK (Offline Fallback)";

#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl GatewayRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.method, &self.url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    OfflineFallback,
}

impl ResponseSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseSource::Network => "network",
            ResponseSource::Cache => "cache",
            ResponseSource::OfflineFallback => "offline-fallback",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub response: ResponseSnapshot,
    pub source: ResponseSource,
}

impl GatewayResponse {
    pub fn network(response: ResponseSnapshot) -> Self {
        Self {
            response,
            source: ResponseSource::Network,
        }
    }

    pub fn cached(response: ResponseSnapshot) -> Self {
        Self {
            response,
            source: ResponseSource::Cache,
        }
    }

    pub fn offline_fallback() -> Self {
        Self {
            response: ResponseSnapshot::new(StatusCode::OK, Bytes::new())
                .with_reason(OFFLINE_FALLBACK_REASON),
            source: ResponseSource::OfflineFallback,
        }
    }
}

pub struct Gateway {
    classifier: Classifier,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    lifecycle: Lifecycle,
    store_names: StoreNames,
    origin: Url,
    warm_urls: Vec<String>,
}

impl Gateway {
    pub fn new(
        config: &GatewayConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            classifier: config.classifier(),
            storage,
            fetcher,
            lifecycle: Lifecycle::new(),
            store_names: config.store_names(),
            origin: config.origin.clone(),
            warm_urls: config.warm_urls.clone(),
        }
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn store_names(&self) -> &StoreNames {
        &self.store_names
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    pub async fn state(&self) -> LifecycleState {
        self.lifecycle.state().await
    }

    pub fn controls_clients(&self) -> bool {
        self.lifecycle.controls_clients()
    }

    /// Warms the general store with the configured URLs, if any, and marks
    /// the gateway ready to take over immediately.
    pub async fn install(&self) -> Result<(), GatewayError> {
        self.lifecycle
            .transition("install", LifecycleState::Registered, LifecycleState::Installing)
            .await?;
        info!("installing media cache gateway");

        if !self.warm_urls.is_empty() {
            let report = self
                .precache_into(&self.store_names.general, &self.warm_urls)
                .await;
            info!(
                stored = report.stored,
                already_cached = report.already_cached,
                failed = report.failed,
                "warmed general store"
            );
        }

        self.lifecycle.skip_waiting();
        self.lifecycle
            .transition("install", LifecycleState::Installing, LifecycleState::Installed)
            .await?;
        Ok(())
    }

    /// Drops every store not owned by this version, then claims all clients.
    pub async fn activate(&self) -> Result<(), GatewayError> {
        self.lifecycle
            .transition("activate", LifecycleState::Installed, LifecycleState::Activating)
            .await?;
        info!("activating media cache gateway");

        let deleted = self.purge_stale_stores().await;

        self.lifecycle.claim_clients();
        self.lifecycle
            .transition("activate", LifecycleState::Activating, LifecycleState::Active)
            .await?;
        info!(
            general = %self.store_names.general,
            media = %self.store_names.media,
            deleted,
            "media cache gateway active"
        );
        Ok(())
    }

    /// Returns how many stores were deleted. Failures are logged and skipped.
    async fn purge_stale_stores(&self) -> usize {
        let names = match self.storage.keys().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "failed to list cache stores");
                return 0;
            }
        };

        let stale = names
            .into_iter()
            .filter(|name| !self.store_names.contains(name));
        let results = join_all(stale.map(|name| async move {
            let result = self.storage.delete(&name).await;
            (name, result)
        }))
        .await;

        let mut deleted = 0;
        for (name, result) in results {
            match result {
                Ok(_) => {
                    info!(store = %name, "deleted old cache store");
                    deleted += 1;
                }
                Err(e) => warn!(store = %name, error = %e, "failed to delete old cache store"),
            }
        }
        deleted
    }

    /// Serves one fetch signal. Only passthrough traffic can fail; media
    /// requests always produce a response.
    pub async fn handle_fetch(
        &self,
        request: GatewayRequest,
    ) -> Result<GatewayResponse, GatewayError> {
        if !self.lifecycle.controls_clients() {
            return Ok(self.network_only(&request).await?);
        }

        let class = self
            .classifier
            .classify(&request.method, &request.url, &request.headers);
        trace!(class = class.as_str(), method = %request.method, url = %request.url, "classified request");

        match class {
            RequestClass::Media => Ok(self.serve_media(&request).await),
            RequestClass::Static => Ok(self.serve_static(&request).await?),
            RequestClass::Api | RequestClass::Html | RequestClass::Bypass => {
                Ok(self.network_only(&request).await?)
            }
        }
    }
}
