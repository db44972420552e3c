use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use super::{Gateway, GatewayRequest};
use crate::cache::{CacheKey, CacheStore};

/// The only message type the gateway acts on.
pub const CACHE_URLS: &str = "CACHE_URLS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayMessage {
    /// Warm the media store with these URLs, relative ones resolved against
    /// the origin.
    CacheUrls(Vec<String>),
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    payload: serde_json::Value,
}

impl GatewayMessage {
    /// Anything that is not a well-formed `CACHE_URLS` message yields `None`.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let raw: RawMessage = match serde_json::from_slice(data) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(error = %e, "ignoring malformed message");
                return None;
            }
        };

        match raw.kind.as_deref() {
            Some(CACHE_URLS) => match serde_json::from_value::<Vec<String>>(raw.payload) {
                Ok(urls) => Some(GatewayMessage::CacheUrls(urls)),
                Err(e) => {
                    debug!(error = %e, "ignoring CACHE_URLS message with invalid payload");
                    None
                }
            },
            other => {
                debug!(kind = ?other, "ignoring unrecognized message");
                None
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PrecacheReport {
    pub stored: usize,
    pub already_cached: usize,
    pub failed: usize,
}

impl PrecacheReport {
    pub fn total(&self) -> usize {
        self.stored + self.already_cached + self.failed
    }
}

enum UrlOutcome {
    Stored,
    AlreadyCached,
    Failed,
}

impl Gateway {
    /// Handles one message signal. Returns `None` when the message was
    /// ignored.
    pub async fn handle_message(&self, data: &[u8]) -> Option<PrecacheReport> {
        match GatewayMessage::parse(data)? {
            GatewayMessage::CacheUrls(urls) => {
                info!(count = urls.len(), "received URLs to pre-cache");
                let report = self.precache(&urls).await;
                info!(
                    stored = report.stored,
                    already_cached = report.already_cached,
                    failed = report.failed,
                    "pre-caching completed"
                );
                Some(report)
            }
        }
    }

    /// Best effort: every URL is handled independently and a failure never
    /// stops the rest of the batch.
    pub async fn precache(&self, urls: &[String]) -> PrecacheReport {
        self.precache_into(&self.store_names.media, urls).await
    }

    pub(super) async fn precache_into(&self, store_name: &str, urls: &[String]) -> PrecacheReport {
        let store = match self.storage.open(store_name).await {
            Ok(store) => store,
            Err(e) => {
                error!(store = store_name, error = %e, "failed to open store for pre-caching");
                return PrecacheReport {
                    failed: urls.len(),
                    ..PrecacheReport::default()
                };
            }
        };

        let outcomes = join_all(urls.iter().map(|raw| self.precache_url(store.as_ref(), raw))).await;

        let mut report = PrecacheReport::default();
        for outcome in outcomes {
            match outcome {
                UrlOutcome::Stored => report.stored += 1,
                UrlOutcome::AlreadyCached => report.already_cached += 1,
                UrlOutcome::Failed => report.failed += 1,
            }
        }
        report
    }

    async fn precache_url(&self, store: &dyn CacheStore, raw: &str) -> UrlOutcome {
        let url = match self.origin.join(raw) {
            Ok(url) => url,
            Err(e) => {
                warn!(url = raw, error = %e, "invalid pre-cache URL");
                return UrlOutcome::Failed;
            }
        };

        let key = CacheKey::get(&url);
        match store.get(&key).await {
            Ok(Some(_)) => {
                debug!(url = %url, "URL already cached, skipping pre-cache");
                return UrlOutcome::AlreadyCached;
            }
            Ok(None) => {}
            Err(e) => warn!(url = %url, error = %e, "cache lookup failed"),
        }

        debug!(url = %url, "pre-caching URL");
        match self.fetcher.fetch(&GatewayRequest::get(url.clone())).await {
            Ok(response) if response.status.is_success() => match store.put(key, response).await {
                Ok(()) => UrlOutcome::Stored,
                Err(e) => {
                    error!(url = %url, error = %e, "failed to store pre-cached response");
                    UrlOutcome::Failed
                }
            },
            Ok(response) => {
                warn!(url = %url, status = %response.status, "pre-cache fetch failed");
                UrlOutcome::Failed
            }
            Err(e) => {
                error!(url = %url, error = %e, "pre-cache fetch error");
                UrlOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cache_urls() {
        let msg = br#"{"type":"CACHE_URLS","payload":["/media/a.jpg","/media/b.jpg"]}"#;
        assert_eq!(
            GatewayMessage::parse(msg),
            Some(GatewayMessage::CacheUrls(vec![
                "/media/a.jpg".to_string(),
                "/media/b.jpg".to_string()
            ]))
        );
    }

    #[test]
    fn test_unrecognized_messages_are_ignored() {
        assert_eq!(GatewayMessage::parse(br#"{"type":"SKIP_WAITING"}"#), None);
        assert_eq!(GatewayMessage::parse(br#"{"payload":["/a.jpg"]}"#), None);
        assert_eq!(GatewayMessage::parse(br#"{"type":"CACHE_URLS","payload":"/a.jpg"}"#), None);
        assert_eq!(GatewayMessage::parse(b"null"), None);
        assert_eq!(GatewayMessage::parse(b"not json"), None);
    }

    #[test]
    fn test_report_total() {
        let report = PrecacheReport {
            stored: 2,
            already_cached: 1,
            failed: 1,
        };
        assert_eq!(report.total(), 4);
    }
}
