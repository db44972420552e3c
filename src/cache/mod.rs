mod disk_cache;
mod memory_cache;

pub use disk_cache::*;
pub use memory_cache::*;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;
use url::Url;

use crate::error::{CacheError, CacheResult};

pub const MAX_MEMORY_CACHE_SIZE: usize = 100 * 1024 * 1024; // 100MB
pub const MAX_HOT_ENTRY_SIZE: usize = 16 * 1024 * 1024;
pub const HOT_TIER_CAPACITY: usize = 256;
pub const CACHE_DIR: &str = "media_cache";

/// Normalized request identity: method plus absolute URL without fragment.
/// Request headers never take part in matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    method: String,
    url: String,
}

impl CacheKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_str().to_string(),
            url: url.into(),
        }
    }

    /// Key for a plain `GET` of `url`.
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Hex SHA-256 of the key, used to name persisted entries.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.method.as_bytes());
        hasher.update(b" ");
        hasher.update(self.url.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A complete response: what the network returned or what a store holds.
#[derive(Debug, Clone)]
pub struct ResponseSnapshot {
    pub status: StatusCode,
    /// Reason phrase when it differs from the canonical one for `status`.
    pub reason: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ResponseSnapshot {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            reason: None,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn size(&self) -> usize {
        self.body.len()
    }
}

/// Rejects anything that is not a complete successful response.
pub(crate) fn ensure_storable(key: &CacheKey, response: &ResponseSnapshot) -> CacheResult<()> {
    if !response.status.is_success() || response.status == StatusCode::PARTIAL_CONTENT {
        return Err(CacheError::Unstorable {
            key: key.to_string(),
            status: response.status,
        });
    }
    Ok(())
}

/// Store names double as directory names, so keep them to a safe alphabet.
pub(crate) fn validate_store_name(name: &str) -> CacheResult<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidStoreName(name.to_string()))
    }
}

/// Sizing for every store a storage opens.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Byte quota for the bodies held by one store. `None` means unlimited.
    pub max_bytes: Option<u64>,
    /// Maximum number of entries kept in a disk store's memory tier.
    pub hot_capacity: usize,
    /// Total byte budget of a disk store's memory tier.
    pub hot_max_bytes: usize,
    /// Entries larger than this stay on disk only.
    pub hot_entry_limit: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_bytes: None,
            hot_capacity: HOT_TIER_CAPACITY,
            hot_max_bytes: MAX_MEMORY_CACHE_SIZE,
            hot_entry_limit: MAX_HOT_ENTRY_SIZE,
        }
    }
}

/// One named key→response mapping.
#[async_trait]
pub trait CacheStore: Send + Sync {
    fn name(&self) -> &str;

    /// Returns `None` on a miss.
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<ResponseSnapshot>>;

    /// Inserts or overwrites the entry for `key`.
    async fn put(&self, key: CacheKey, response: ResponseSnapshot) -> CacheResult<()>;

    /// Returns whether an entry was removed.
    async fn delete(&self, key: &CacheKey) -> CacheResult<bool>;

    async fn keys(&self) -> CacheResult<Vec<CacheKey>>;
}

/// The set of named stores. Stores are created lazily on first open.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    async fn open(&self, name: &str) -> CacheResult<Arc<dyn CacheStore>>;

    /// Names of every existing store, in a stable order.
    async fn keys(&self) -> CacheResult<Vec<String>>;

    /// Deletes the store and all its entries. Returns whether it existed.
    async fn delete(&self, name: &str) -> CacheResult<bool>;

    async fn has(&self, name: &str) -> CacheResult<bool> {
        Ok(self.keys().await?.iter().any(|n| n == name))
    }

    /// Looks `key` up in every store, returning the first hit.
    async fn match_any(&self, key: &CacheKey) -> CacheResult<Option<ResponseSnapshot>> {
        for name in self.keys().await? {
            let store = self.open(&name).await?;
            match store.get(key).await {
                Ok(Some(hit)) => return Ok(Some(hit)),
                Ok(None) => {}
                Err(e) => warn!(store = %name, key = %key, error = %e, "cache lookup failed"),
            }
        }
        Ok(None)
    }
}
