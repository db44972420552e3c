use super::{
    ensure_storable, validate_store_name, CacheKey, CacheStorage, CacheStore, ResponseSnapshot,
};
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use lru::LruCache;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::trace;

/// What a [`MemoryStore`] does when a put would exceed its byte budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overflow {
    /// Fail the put with [`CacheError::QuotaExceeded`].
    Reject,
    /// Drop least recently used entries until the new one fits.
    Evict,
}

struct MemoryInner {
    store: LruCache<CacheKey, ResponseSnapshot>,
    current_memory_size: usize,
}

pub struct MemoryStore {
    name: String,
    inner: Mutex<MemoryInner>,
    max_bytes: usize,
    overflow: Overflow,
}

impl MemoryStore {
    /// A standalone store holding entries until they are deleted. Puts past
    /// `max_bytes` are rejected.
    pub fn new(name: impl Into<String>, max_bytes: Option<u64>) -> Self {
        let max_bytes = max_bytes
            .map(|b| usize::try_from(b).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        Self {
            name: name.into(),
            inner: Mutex::new(MemoryInner {
                store: LruCache::unbounded(),
                current_memory_size: 0,
            }),
            max_bytes,
            overflow: Overflow::Reject,
        }
    }

    /// A bounded LRU front for a slower store. Entries are evicted freely.
    pub fn hot_tier(name: impl Into<String>, capacity: usize, max_bytes: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            name: name.into(),
            inner: Mutex::new(MemoryInner {
                store: LruCache::new(capacity),
                current_memory_size: 0,
            }),
            max_bytes,
            overflow: Overflow::Evict,
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.store.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Sum of the body sizes currently held.
    pub async fn current_size(&self) -> usize {
        self.inner.lock().await.current_memory_size
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &CacheKey) -> CacheResult<Option<ResponseSnapshot>> {
        Ok(self.inner.lock().await.store.get(key).cloned())
    }

    async fn put(&self, key: CacheKey, response: ResponseSnapshot) -> CacheResult<()> {
        ensure_storable(&key, &response)?;
        let size = response.size();

        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let previous = inner.store.peek(&key).map(ResponseSnapshot::size).unwrap_or(0);
        match self.overflow {
            Overflow::Reject => {
                let required = inner.current_memory_size - previous + size;
                if required > self.max_bytes {
                    return Err(CacheError::QuotaExceeded {
                        store: self.name.clone(),
                        required: required as u64,
                        limit: self.max_bytes as u64,
                    });
                }
            }
            Overflow::Evict if size > self.max_bytes => {
                // Never fits; make sure no stale copy is served either.
                if let Some(old) = inner.store.pop(&key) {
                    inner.current_memory_size = inner.current_memory_size.saturating_sub(old.size());
                }
                return Ok(());
            }
            Overflow::Evict => {}
        }

        if let Some(old) = inner.store.pop(&key) {
            inner.current_memory_size = inner.current_memory_size.saturating_sub(old.size());
        }
        inner.current_memory_size = inner.current_memory_size.saturating_add(size);

        while inner.current_memory_size > self.max_bytes {
            if let Some((evicted_key, evicted)) = inner.store.pop_lru() {
                trace!(store = %self.name, key = %evicted_key, "evicted from memory");
                inner.current_memory_size = inner.current_memory_size.saturating_sub(evicted.size());
            } else {
                break;
            }
        }

        if let Some((evicted_key, evicted)) = inner.store.push(key, response) {
            trace!(store = %self.name, key = %evicted_key, "evicted from memory");
            inner.current_memory_size = inner.current_memory_size.saturating_sub(evicted.size());
        }
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> CacheResult<bool> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        match inner.store.pop(key) {
            Some(old) => {
                inner.current_memory_size = inner.current_memory_size.saturating_sub(old.size());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self) -> CacheResult<Vec<CacheKey>> {
        let inner = self.inner.lock().await;
        Ok(inner.store.iter().rev().map(|(k, _)| k.clone()).collect())
    }
}

/// Process-local storage. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStorage {
    stores: Mutex<BTreeMap<String, Arc<MemoryStore>>>,
    max_bytes: Option<u64>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every store opened from this storage gets the given byte quota.
    pub fn with_quota(max_bytes: u64) -> Self {
        Self {
            stores: Mutex::new(BTreeMap::new()),
            max_bytes: Some(max_bytes),
        }
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> CacheResult<Arc<dyn CacheStore>> {
        validate_store_name(name)?;
        let mut stores = self.stores.lock().await;
        let store: Arc<dyn CacheStore> = stores
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryStore::new(name, self.max_bytes)))
            .clone();
        Ok(store)
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        Ok(self.stores.lock().await.keys().cloned().collect())
    }

    async fn delete(&self, name: &str) -> CacheResult<bool> {
        Ok(self.stores.lock().await.remove(name).is_some())
    }
}
