//! Ephemeral tier: decoded evidence held in process memory under a strict
//! total-size budget, read-through over the persistent store and the network
//! fetcher. Entries are evicted oldest-insertion-first (hits do not refresh
//! eviction priority) and go stale after a TTL, detected lazily on the next
//! read. Memory-tier bookkeeping never straddles an await, so no lock is
//! needed around the table within one operation.

mod handle;

pub use handle::{HandleRegistry, InProcessRegistry, MediaHandle};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::fetch::MediaFetcher;
use crate::media::{CacheKey, IncidentDescriptor, MediaType};
use crate::store::{CollectionStats, PersistentStore};

/// Soft byte budget for the session tier (1 GiB).
pub const DEFAULT_CAPACITY: usize = 1024 * 1024 * 1024;
/// Entries older than this are treated as misses on the next read.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);
/// Network fetches in a batch run in windows of this many concurrent requests.
pub const BATCH_WINDOW: usize = 5;

/// One long-lived owner wrapping the cache for shared callers.
pub type SharedSessionCache = Arc<RwLock<SessionCache>>;

struct SessionEntry {
    data: Bytes,
    handle: MediaHandle,
    size: usize,
    created_at: SystemTime,
}

/// Counts and byte totals per media type and in aggregate, mirroring the
/// persistent tier's stats shape, plus budget utilization.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStats {
    pub videos: CollectionStats,
    pub images: CollectionStats,
    pub total: CollectionStats,
    /// Total bytes over capacity; the budget is soft, so this can exceed 1.0.
    pub utilization: f64,
}

pub struct SessionCache {
    entries: HashMap<CacheKey, SessionEntry>,
    insertion_order: VecDeque<CacheKey>,
    current_size: usize,
    capacity: usize,
    ttl: Duration,
    store: PersistentStore,
    fetcher: Arc<dyn MediaFetcher>,
    registry: Box<dyn HandleRegistry>,
}

impl SessionCache {
    pub fn new(
        store: PersistentStore,
        fetcher: Arc<dyn MediaFetcher>,
        capacity: usize,
        ttl: Duration,
    ) -> Self {
        Self {
            entries: HashMap::new(),
            insertion_order: VecDeque::new(),
            current_size: 0,
            capacity,
            ttl,
            store,
            fetcher,
            registry: Box::new(InProcessRegistry::default()),
        }
    }

    pub fn with_defaults(store: PersistentStore, fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self::new(store, fetcher, DEFAULT_CAPACITY, DEFAULT_TTL)
    }

    /// Substitutes the handle mechanism, e.g. a host renderer's resource
    /// table.
    pub fn with_registry(mut self, registry: Box<dyn HandleRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub async fn get_video(&mut self, incident_id: &str, path: &str) -> Result<MediaHandle> {
        self.get(MediaType::Video, incident_id, path).await
    }

    pub async fn get_image(&mut self, incident_id: &str, path: &str) -> Result<MediaHandle> {
        self.get(MediaType::Image, incident_id, path).await
    }

    /// Read-through retrieval: session tier, then persistent store, then the
    /// network. A network hit is written to the store before the session
    /// tier, so a crash after fetch never loses the bytes. A fetch failure
    /// propagates and leaves no partial entry behind.
    pub async fn get(
        &mut self,
        media_type: MediaType,
        incident_id: &str,
        path: &str,
    ) -> Result<MediaHandle> {
        let key = CacheKey::new(media_type, incident_id, path);
        if let Some(handle) = self.fresh_handle(&key) {
            debug!(incident_id, path, "session cache hit");
            return Ok(handle);
        }

        if let Some(data) = self.store.get(media_type, incident_id, path).await? {
            debug!(incident_id, path, "persistent store hit");
            return Ok(self.insert_entry(key, data));
        }

        debug!(incident_id, path, "cache miss, fetching");
        let data = self.fetcher.fetch(media_type, incident_id, path).await?;
        self.promote(media_type, incident_id, path, data).await
    }

    /// Batched image retrieval. Store hits are promoted first in one batched
    /// lookup; the remainder is fetched in windows of [`BATCH_WINDOW`]
    /// concurrent requests, each window fully settled before the next
    /// starts. Per-item fetch failures are logged and excluded from the
    /// result, never surfaced; only a storage-medium failure errors.
    pub async fn get_images_batch(
        &mut self,
        incident_id: &str,
        paths: &[String],
    ) -> Result<HashMap<String, MediaHandle>> {
        let mut resolved = HashMap::new();
        let mut missing = Vec::new();
        for path in paths {
            let key = CacheKey::new(MediaType::Image, incident_id, path);
            match self.fresh_handle(&key) {
                Some(handle) => {
                    resolved.insert(path.clone(), handle);
                }
                None => missing.push(path.clone()),
            }
        }

        let stored = self
            .store
            .get_batch(MediaType::Image, incident_id, &missing)
            .await?;
        missing.retain(|path| !stored.contains_key(path));
        for (path, data) in stored {
            let key = CacheKey::new(MediaType::Image, incident_id, &path);
            let handle = self.insert_entry(key, data);
            resolved.insert(path, handle);
        }

        for window in missing.chunks(BATCH_WINDOW) {
            let fetches = window.iter().map(|path| {
                let fetcher = Arc::clone(&self.fetcher);
                let incident_id = incident_id.to_string();
                let path = path.clone();
                async move {
                    let result = fetcher.fetch_image(&incident_id, &path).await;
                    (path, result)
                }
            });
            for (path, result) in join_all(fetches).await {
                match result {
                    Ok(data) => {
                        let handle = self
                            .promote(MediaType::Image, incident_id, &path, data)
                            .await?;
                        resolved.insert(path, handle);
                    }
                    Err(err) => {
                        warn!(incident_id, %path, %err, "image fetch failed, skipping")
                    }
                }
            }
        }
        Ok(resolved)
    }

    /// Best-effort warmup of an incident's primary video and every image
    /// referenced by its detected events. Tier lookups run first; the
    /// remaining network fetches for the video and the image windows are
    /// issued concurrently and all waited on, whatever their outcome.
    /// Failures are logged, never returned; the caller does not learn which
    /// items, if any, failed.
    pub async fn preload_incident_media(
        &mut self,
        incident_id: &str,
        descriptor: &IncidentDescriptor,
    ) {
        let mut video_missing = None;
        if let Some(path) = &descriptor.primary_video {
            let key = CacheKey::new(MediaType::Video, incident_id, path);
            if self.fresh_handle(&key).is_none() {
                match self.store.get(MediaType::Video, incident_id, path).await {
                    Ok(Some(data)) => {
                        self.insert_entry(key, data);
                    }
                    Ok(None) => video_missing = Some(path.clone()),
                    Err(err) => {
                        warn!(incident_id, %path, %err, "video preload store lookup failed");
                        video_missing = Some(path.clone());
                    }
                }
            }
        }

        let mut missing = Vec::new();
        for path in descriptor.referenced_image_paths() {
            let key = CacheKey::new(MediaType::Image, incident_id, &path);
            if self.fresh_handle(&key).is_none() {
                missing.push(path);
            }
        }
        match self
            .store
            .get_batch(MediaType::Image, incident_id, &missing)
            .await
        {
            Ok(stored) => {
                missing.retain(|path| !stored.contains_key(path));
                for (path, data) in stored {
                    let key = CacheKey::new(MediaType::Image, incident_id, &path);
                    self.insert_entry(key, data);
                }
            }
            Err(err) => warn!(incident_id, %err, "image preload store lookup failed"),
        }

        let fetcher = &self.fetcher;
        let video_fetch = async {
            if let Some(path) = &video_missing {
                Some((path.clone(), fetcher.fetch_video(incident_id, path).await))
            } else {
                None
            }
        };
        let image_fetch = async {
            let mut results = Vec::new();
            for window in missing.chunks(BATCH_WINDOW) {
                let fetches = window.iter().map(|path| async move {
                    (path.clone(), fetcher.fetch_image(incident_id, path).await)
                });
                results.extend(join_all(fetches).await);
            }
            results
        };
        let (video_result, image_results) = futures::join!(video_fetch, image_fetch);

        if let Some((path, result)) = video_result {
            match result {
                Ok(data) => {
                    if let Err(err) = self
                        .promote(MediaType::Video, incident_id, &path, data)
                        .await
                    {
                        warn!(incident_id, %path, %err, "video preload write-back failed");
                    }
                }
                Err(err) => warn!(incident_id, %path, %err, "video preload fetch failed"),
            }
        }
        for (path, result) in image_results {
            match result {
                Ok(data) => {
                    if let Err(err) = self
                        .promote(MediaType::Image, incident_id, &path, data)
                        .await
                    {
                        warn!(incident_id, %path, %err, "image preload write-back failed");
                    }
                }
                Err(err) => warn!(incident_id, %path, %err, "image preload fetch failed"),
            }
        }
    }

    /// Revokes every live handle and empties the session tier. The
    /// persistent store is untouched.
    pub fn clear_all(&mut self) {
        for (_, entry) in self.entries.drain() {
            self.registry.revoke(&entry.handle);
        }
        self.insertion_order.clear();
        self.current_size = 0;
        info!("session cache cleared");
    }

    pub fn clear_by_type(&mut self, media_type: MediaType) {
        let keys: Vec<CacheKey> = self
            .entries
            .keys()
            .filter(|key| key.media_type == media_type)
            .cloned()
            .collect();
        for key in &keys {
            self.evict_key(key);
        }
        info!(collection = media_type.collection(), "session cache cleared by type");
    }

    pub fn stats(&self) -> SessionStats {
        let mut videos = CollectionStats::default();
        let mut images = CollectionStats::default();
        for (key, entry) in &self.entries {
            let bucket = match key.media_type {
                MediaType::Video => &mut videos,
                MediaType::Image => &mut images,
            };
            bucket.count += 1;
            bucket.total_bytes += entry.size as u64;
        }
        SessionStats {
            videos,
            images,
            total: CollectionStats {
                count: videos.count + images.count,
                total_bytes: videos.total_bytes + images.total_bytes,
            },
            utilization: if self.capacity == 0 {
                0.0
            } else {
                self.current_size as f64 / self.capacity as f64
            },
        }
    }

    /// Whether a previously returned handle is still valid to render.
    pub fn handle_is_live(&self, handle: &MediaHandle) -> bool {
        self.registry.is_live(handle)
    }

    /// The cached bytes behind a live handle, if any.
    pub fn bytes_for(&self, handle: &MediaHandle) -> Option<Bytes> {
        self.entries
            .values()
            .find(|entry| entry.handle == *handle)
            .map(|entry| entry.data.clone())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn current_size(&self) -> usize {
        self.current_size
    }

    /// Writes fetched bytes to the persistent store, then installs them in
    /// the session tier (durability first).
    async fn promote(
        &mut self,
        media_type: MediaType,
        incident_id: &str,
        path: &str,
        data: Bytes,
    ) -> Result<MediaHandle> {
        self.store.put(media_type, incident_id, path, &data).await?;
        let key = CacheKey::new(media_type, incident_id, path);
        Ok(self.insert_entry(key, data))
    }

    /// Live handle for `key`, evicting the entry first if it has outlived
    /// the TTL.
    fn fresh_handle(&mut self, key: &CacheKey) -> Option<MediaHandle> {
        let created_at = self.entries.get(key)?.created_at;
        let stale = created_at
            .elapsed()
            .map(|age| age > self.ttl)
            .unwrap_or(false);
        if stale {
            debug!(?key, "stale session entry, evicting");
            self.evict_key(key);
            return None;
        }
        self.entries.get(key).map(|entry| entry.handle.clone())
    }

    /// Installs `data` under `key`, replacing any existing entry for the key
    /// and evicting oldest-insertion-first until the new total fits the
    /// budget. An object larger than the whole budget still inserts once the
    /// table is drained.
    fn insert_entry(&mut self, key: CacheKey, data: Bytes) -> MediaHandle {
        self.evict_key(&key);
        let size = data.len();
        while self.current_size + size > self.capacity {
            if !self.evict_oldest() {
                break;
            }
        }
        let handle = self.registry.create(&data);
        self.current_size += size;
        self.insertion_order.push_back(key.clone());
        self.entries.insert(
            key,
            SessionEntry {
                data,
                handle: handle.clone(),
                size,
                created_at: SystemTime::now(),
            },
        );
        handle
    }

    fn evict_key(&mut self, key: &CacheKey) {
        if let Some(entry) = self.entries.remove(key) {
            self.registry.revoke(&entry.handle);
            self.current_size = self.current_size.saturating_sub(entry.size);
            self.insertion_order.retain(|k| k != key);
        }
    }

    fn evict_oldest(&mut self) -> bool {
        let Some(key) = self.insertion_order.pop_front() else {
            return false;
        };
        if let Some(entry) = self.entries.remove(&key) {
            self.registry.revoke(&entry.handle);
            self.current_size = self.current_size.saturating_sub(entry.size);
            debug!(?key, size = entry.size, "evicted oldest session entry");
        }
        true
    }
}
