use std::sync::Arc;

use tracing::{debug, error, info, warn};
use url::Url;

use super::{Gateway, GatewayRequest, GatewayResponse};
use crate::cache::{CacheKey, CacheStore, ResponseSnapshot};
use crate::error::FetchError;

fn is_http_scheme(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

/// A failed lookup counts as a miss.
async fn lookup(store: Option<&Arc<dyn CacheStore>>, key: &CacheKey) -> Option<ResponseSnapshot> {
    let store = store?;
    match store.get(key).await {
        Ok(hit) => hit,
        Err(e) => {
            warn!(store = store.name(), key = %key, error = %e, "cache lookup failed");
            None
        }
    }
}

impl Gateway {
    /// Cache-first against the media store. Concurrent misses for the same
    /// key each go to the network; the last write wins.
    pub(super) async fn serve_media(&self, request: &GatewayRequest) -> GatewayResponse {
        let key = request.cache_key();
        let store = match self.storage.open(&self.store_names.media).await {
            Ok(store) => Some(store),
            Err(e) => {
                warn!(store = %self.store_names.media, error = %e, "failed to open media store");
                None
            }
        };

        if let Some(hit) = lookup(store.as_ref(), &key).await {
            debug!(url = %request.url, "serving from media cache");
            return GatewayResponse::cached(hit);
        }

        debug!(url = %request.url, "fetching media from network");
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.status.is_success() {
                    if !is_http_scheme(&request.url) {
                        debug!(url = %request.url, "skipping cache for non-http(s) request");
                    } else if let Some(store) = &store {
                        match store.put(key, response.clone()).await {
                            Ok(()) => info!(url = %request.url, bytes = response.size(), "cached media response"),
                            Err(e) => error!(url = %request.url, error = %e, "failed to store media response"),
                        }
                    }
                }
                GatewayResponse::network(response)
            }
            Err(err) => {
                warn!(url = %request.url, error = %err, "media fetch failed, checking cache again");
                if let Some(hit) = lookup(store.as_ref(), &key).await {
                    info!(url = %request.url, "serving from media cache after network failure");
                    return GatewayResponse::cached(hit);
                }
                error!(url = %request.url, "media not cached and network failed, returning empty response");
                GatewayResponse::offline_fallback()
            }
        }
    }

    /// Cache-first across every store; a miss goes to the network and is
    /// not written back.
    pub(super) async fn serve_static(
        &self,
        request: &GatewayRequest,
    ) -> Result<GatewayResponse, FetchError> {
        let key = request.cache_key();
        match self.storage.match_any(&key).await {
            Ok(Some(hit)) => {
                debug!(url = %request.url, "serving from cache");
                return Ok(GatewayResponse::cached(hit));
            }
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "cache lookup failed"),
        }
        self.network_only(request).await
    }

    pub(super) async fn network_only(
        &self,
        request: &GatewayRequest,
    ) -> Result<GatewayResponse, FetchError> {
        self.fetcher.fetch(request).await.map(GatewayResponse::network)
    }
}
