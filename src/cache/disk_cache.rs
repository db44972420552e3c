use super::{
    ensure_storable, validate_store_name, CacheKey, CacheStorage, CacheStore, MemoryStore,
    ResponseSnapshot, StoreOptions,
};
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

const ENTRY_EXTENSION: &str = "entry";
const TMP_EXTENSION: &str = "tmp";
/// Present in every directory created by [`DiskStore::open`]. Directories
/// without it are never listed or deleted as stores.
const STORE_MARKER: &str = ".gateway-store";

/// First line of every entry file. The raw body follows the newline.
#[derive(Serialize, Deserialize)]
struct EntryHeader {
    key: CacheKey,
    status: u16,
    reason: Option<String>,
    headers: Vec<(String, Vec<u8>)>,
    body_len: u64,
    stored_at: DateTime<Utc>,
}

fn encode_entry(key: &CacheKey, response: &ResponseSnapshot) -> CacheResult<Vec<u8>> {
    let header = EntryHeader {
        key: key.clone(),
        status: response.status.as_u16(),
        reason: response.reason.clone(),
        headers: response
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect(),
        body_len: response.body.len() as u64,
        stored_at: Utc::now(),
    };

    let mut buf = serde_json::to_vec(&header)?;
    buf.reserve(response.body.len() + 1);
    buf.push(b'\n');
    buf.extend_from_slice(&response.body);
    Ok(buf)
}

fn decode_entry(raw: Bytes, path: &Path) -> CacheResult<(CacheKey, ResponseSnapshot)> {
    let corrupt = || CacheError::Corrupt(path.display().to_string());

    let split = raw.iter().position(|b| *b == b'\n').ok_or_else(corrupt)?;
    let header: EntryHeader = serde_json::from_slice(&raw[..split])?;
    let body = raw.slice(split + 1..);
    if body.len() as u64 != header.body_len {
        return Err(corrupt());
    }

    let status = StatusCode::from_u16(header.status).map_err(|_| corrupt())?;
    let mut headers = HeaderMap::with_capacity(header.headers.len());
    for (name, value) in header.headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| corrupt())?;
        let value = HeaderValue::from_bytes(&value).map_err(|_| corrupt())?;
        headers.append(name, value);
    }

    Ok((
        header.key,
        ResponseSnapshot {
            status,
            reason: header.reason,
            headers,
            body,
        },
    ))
}

async fn read_header(path: &Path) -> CacheResult<EntryHeader> {
    let file = fs::File::open(path).await?;
    let mut reader = BufReader::new(file);
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line).await?;
    if line.pop() != Some(b'\n') {
        return Err(CacheError::Corrupt(path.display().to_string()));
    }
    Ok(serde_json::from_slice(&line)?)
}

struct IndexEntry {
    size: u64,
    /// Bumped on every write, so a reader can tell whether the entry it
    /// read is still current.
    generation: u64,
}

#[derive(Default)]
struct DiskIndex {
    entries: HashMap<String, IndexEntry>,
    total: u64,
    next_generation: u64,
}

impl DiskIndex {
    fn size(&self, digest: &str) -> u64 {
        self.entries.get(digest).map_or(0, |e| e.size)
    }

    fn generation(&self, digest: &str) -> Option<u64> {
        self.entries.get(digest).map(|e| e.generation)
    }

    fn insert(&mut self, digest: String, size: u64) {
        self.next_generation += 1;
        let entry = IndexEntry {
            size,
            generation: self.next_generation,
        };
        if let Some(previous) = self.entries.insert(digest, entry) {
            self.total = self.total.saturating_sub(previous.size);
        }
        self.total += size;
    }

    fn remove(&mut self, digest: &str) {
        if let Some(entry) = self.entries.remove(digest) {
            self.total = self.total.saturating_sub(entry.size);
        }
    }
}

/// Rebuilds the size index from the entry files and removes leftovers of
/// interrupted writes.
async fn scan(cache_dir: &Path) -> CacheResult<DiskIndex> {
    let mut index = DiskIndex::default();
    let mut entries = fs::read_dir(cache_dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        match path.extension().and_then(|e| e.to_str()) {
            Some(TMP_EXTENSION) => {
                if let Err(e) = fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "failed to remove stale temp file");
                }
            }
            Some(ENTRY_EXTENSION) => {
                let Some(digest) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                match read_header(&path).await {
                    Ok(header) => index.insert(digest.to_string(), header.body_len),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unreadable cache entry")
                    }
                }
            }
            _ => {}
        }
    }

    Ok(index)
}

/// A store persisted as one directory of entry files, fronted by a bounded
/// in-memory LRU tier.
pub struct DiskStore {
    name: String,
    cache_dir: PathBuf,
    hot: MemoryStore,
    hot_entry_limit: usize,
    max_bytes: Option<u64>,
    index: Mutex<DiskIndex>,
    write_seq: AtomicU64,
}

impl DiskStore {
    pub async fn open(
        name: &str,
        cache_dir: impl Into<PathBuf>,
        options: &StoreOptions,
    ) -> CacheResult<Self> {
        validate_store_name(name)?;
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir).await?;
        let marker = cache_dir.join(STORE_MARKER);
        if !fs::try_exists(&marker).await? {
            fs::write(&marker, name).await?;
        }

        let index = scan(&cache_dir).await?;
        debug!(
            store = name,
            entries = index.entries.len(),
            bytes = index.total,
            "opened disk store"
        );

        Ok(Self {
            name: name.to_string(),
            hot: MemoryStore::hot_tier(name, options.hot_capacity, options.hot_max_bytes),
            hot_entry_limit: options.hot_entry_limit,
            max_bytes: options.max_bytes,
            cache_dir,
            index: Mutex::new(index),
            write_seq: AtomicU64::new(0),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Sum of the body sizes persisted by this store.
    pub async fn used_bytes(&self) -> u64 {
        self.index.lock().await.total
    }

    fn get_cache_path(&self, digest: &str) -> PathBuf {
        self.cache_dir.join(format!("{digest}.{ENTRY_EXTENSION}"))
    }

    /// Writes next to the target and renames over it, so readers only ever
    /// see a whole entry.
    async fn write_atomic(&self, digest: &str, data: &[u8]) -> io::Result<()> {
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = self.cache_dir.join(format!(".{digest}.{seq}.{TMP_EXTENSION}"));

        fs::write(&tmp, data).await?;
        if let Err(e) = fs::rename(&tmp, self.get_cache_path(digest)).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }

    /// Promotes an entry read from disk unless a write or delete for the
    /// same digest landed since `generation` was observed.
    async fn promote_if_current(
        &self,
        digest: &str,
        key: &CacheKey,
        response: &ResponseSnapshot,
        generation: Option<u64>,
    ) {
        let index = self.index.lock().await;
        if index.generation(digest) == generation {
            self.promote(key, response).await;
        } else {
            trace!(store = %self.name, key = %key, "entry changed while reading, not promoting");
        }
    }

    async fn promote(&self, key: &CacheKey, response: &ResponseSnapshot) {
        let result = if response.size() <= self.hot_entry_limit {
            self.hot.put(key.clone(), response.clone()).await
        } else {
            self.hot.delete(key).await.map(|_| ())
        };
        if let Err(e) = result {
            trace!(store = %self.name, key = %key, error = %e, "memory tier skipped entry");
        }
    }
}

#[async_trait]
impl CacheStore for DiskStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &CacheKey) -> CacheResult<Option<ResponseSnapshot>> {
        if let Some(hit) = self.hot.get(key).await? {
            return Ok(Some(hit));
        }

        let digest = key.digest();
        let generation = self.index.lock().await.generation(&digest);

        let path = self.get_cache_path(&digest);
        let raw = match fs::read(&path).await {
            Ok(data) => Bytes::from(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let (stored_key, response) = decode_entry(raw, &path)?;
        if &stored_key != key {
            return Err(CacheError::Corrupt(path.display().to_string()));
        }

        self.promote_if_current(&digest, key, &response, generation).await;
        Ok(Some(response))
    }

    async fn put(&self, key: CacheKey, response: ResponseSnapshot) -> CacheResult<()> {
        ensure_storable(&key, &response)?;

        let digest = key.digest();
        let data = encode_entry(&key, &response)?;
        let size = response.size() as u64;

        let mut index = self.index.lock().await;
        let required = index.total - index.size(&digest) + size;
        if let Some(limit) = self.max_bytes {
            if required > limit {
                return Err(CacheError::QuotaExceeded {
                    store: self.name.clone(),
                    required,
                    limit,
                });
            }
        }

        self.write_atomic(&digest, &data).await?;
        index.insert(digest, size);
        self.promote(&key, &response).await;
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> CacheResult<bool> {
        let digest = key.digest();
        let mut index = self.index.lock().await;
        self.hot.delete(key).await?;

        match fs::remove_file(self.get_cache_path(&digest)).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        index.remove(&digest);
        Ok(true)
    }

    async fn keys(&self) -> CacheResult<Vec<CacheKey>> {
        let digests: Vec<String> = self.index.lock().await.entries.keys().cloned().collect();

        let mut keys = Vec::with_capacity(digests.len());
        for digest in digests {
            let path = self.get_cache_path(&digest);
            match read_header(&path).await {
                Ok(header) => keys.push(header.key),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable cache entry"),
            }
        }
        Ok(keys)
    }
}

/// Storage rooted at one directory; each marked subdirectory is a named
/// store. Anything else under the root is left alone.
pub struct DiskStorage {
    root: PathBuf,
    options: StoreOptions,
    stores: Mutex<HashMap<String, Arc<DiskStore>>>,
}

impl DiskStorage {
    pub async fn new(root: impl Into<PathBuf>, options: StoreOptions) -> CacheResult<Self> {
        let root = root.into();
        if !root.exists() {
            fs::create_dir_all(&root).await?;
        }
        Ok(Self {
            root,
            options,
            stores: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> CacheResult<Arc<dyn CacheStore>> {
        validate_store_name(name)?;
        let mut stores = self.stores.lock().await;
        if let Some(store) = stores.get(name) {
            let store: Arc<dyn CacheStore> = store.clone();
            return Ok(store);
        }

        let store = Arc::new(DiskStore::open(name, self.root.join(name), &self.options).await?);
        stores.insert(name.to_string(), store.clone());
        let store: Arc<dyn CacheStore> = store;
        Ok(store)
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if !fs::try_exists(entry.path().join(STORE_MARKER)).await? {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_store_name(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> CacheResult<bool> {
        validate_store_name(name)?;
        let dir = self.root.join(name);
        let mut stores = self.stores.lock().await;
        if !fs::try_exists(dir.join(STORE_MARKER)).await? {
            if dir.exists() {
                warn!(path = %dir.display(), "refusing to delete unmarked directory");
            }
            return Ok(false);
        }
        stores.remove(name);

        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
