//! Durable tier: restart-surviving storage of evidence blobs, partitioned
//! into one collection per media type. Records are addressed by a SHA-256
//! digest of the incident id and path, with a JSON sidecar carrying the
//! fields the retention sweep and stats need. Not size-bounded; bounded only
//! by the retention window and explicit clears.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info};

use crate::media::MediaType;

/// Records older than this are dropped on read and by the maintenance sweep.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const COLLECTIONS: [MediaType; 2] = [MediaType::Video, MediaType::Image];

#[derive(Debug, Serialize, Deserialize)]
struct RecordMeta {
    incident_id: String,
    path: String,
    size_bytes: u64,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub count: usize,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub videos: CollectionStats,
    pub images: CollectionStats,
    pub total: CollectionStats,
}

pub struct PersistentStore {
    root: PathBuf,
    retention: Duration,
}

impl PersistentStore {
    /// Opens the store rooted at `root`, creating both collection
    /// directories. An unusable medium fails here, on first use.
    pub async fn new(root: impl Into<PathBuf>, retention: Duration) -> io::Result<Self> {
        let root = root.into();
        for media_type in COLLECTIONS {
            fs::create_dir_all(root.join(media_type.collection())).await?;
        }
        Ok(Self { root, retention })
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    fn blob_path(&self, media_type: MediaType, incident_id: &str, path: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(incident_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(path.as_bytes());
        let hash = hex::encode(hasher.finalize());
        self.root
            .join(media_type.collection())
            .join(format!("{hash}.bin"))
    }

    /// Returns stored bytes if present and younger than the retention
    /// window. An over-age record is deleted as a side effect and reported
    /// absent (lazy expiry; there is no background timer).
    pub async fn get(
        &self,
        media_type: MediaType,
        incident_id: &str,
        path: &str,
    ) -> io::Result<Option<Bytes>> {
        let blob_path = self.blob_path(media_type, incident_id, path);
        let meta_path = blob_path.with_extension("meta");

        let raw = match fs::read(&meta_path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        let meta: RecordMeta = match serde_json::from_slice(&raw) {
            Ok(meta) => meta,
            Err(_) => {
                // Unreadable sidecar: the record is unrecoverable, drop it.
                remove_record(&blob_path, &meta_path).await;
                return Ok(None);
            }
        };
        if record_age(&meta) > self.retention {
            debug!(incident_id, path, "expired persistent record, removing");
            remove_record(&blob_path, &meta_path).await;
            return Ok(None);
        }

        match fs::read(&blob_path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                // Orphaned sidecar; stop counting a record we cannot serve.
                remove_record(&blob_path, &meta_path).await;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Upserts a record, always refreshing its timestamp. Idempotent under
    /// retry.
    pub async fn put(
        &self,
        media_type: MediaType,
        incident_id: &str,
        path: &str,
        data: &Bytes,
    ) -> io::Result<()> {
        let blob_path = self.blob_path(media_type, incident_id, path);
        let meta = RecordMeta {
            incident_id: incident_id.to_string(),
            path: path.to_string(),
            size_bytes: data.len() as u64,
            created_at: Utc::now(),
        };
        fs::write(&blob_path, data).await?;
        let encoded = serde_json::to_vec(&meta).map_err(io::Error::other)?;
        fs::write(blob_path.with_extension("meta"), encoded).await?;
        Ok(())
    }

    /// Batched lookup with per-item lazy expiry. A miss on one path never
    /// aborts the others; only a medium failure errors.
    pub async fn get_batch(
        &self,
        media_type: MediaType,
        incident_id: &str,
        paths: &[String],
    ) -> io::Result<HashMap<String, Bytes>> {
        let mut found = HashMap::new();
        for path in paths {
            if let Some(data) = self.get(media_type, incident_id, path).await? {
                found.insert(path.clone(), data);
            }
        }
        Ok(found)
    }

    /// Sweeps both collections, removing every record older than `window`.
    /// Returns the number of records removed; an empty store is not an error.
    pub async fn delete_older_than(&self, window: Duration) -> io::Result<usize> {
        let mut removed = 0;
        for media_type in COLLECTIONS {
            let dir = self.root.join(media_type.collection());
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err),
            };
            while let Some(entry) = entries.next_entry().await? {
                let meta_path = entry.path();
                if meta_path.extension().and_then(|ext| ext.to_str()) != Some("meta") {
                    continue;
                }
                let Ok(raw) = fs::read(&meta_path).await else {
                    continue;
                };
                let expired = serde_json::from_slice::<RecordMeta>(&raw)
                    .map(|meta| record_age(&meta) > window)
                    .unwrap_or(true);
                if expired {
                    remove_record(&meta_path.with_extension("bin"), &meta_path).await;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            info!(removed, "retention sweep removed expired records");
        }
        Ok(removed)
    }

    /// Unconditionally empties both collections.
    pub async fn clear_all(&self) -> io::Result<()> {
        for media_type in COLLECTIONS {
            let dir = self.root.join(media_type.collection());
            match fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
            fs::create_dir_all(&dir).await?;
        }
        info!("persistent store cleared");
        Ok(())
    }

    pub async fn stats(&self) -> io::Result<StoreStats> {
        let videos = self.collection_stats(MediaType::Video).await?;
        let images = self.collection_stats(MediaType::Image).await?;
        Ok(StoreStats {
            videos,
            images,
            total: CollectionStats {
                count: videos.count + images.count,
                total_bytes: videos.total_bytes + images.total_bytes,
            },
        })
    }

    async fn collection_stats(&self, media_type: MediaType) -> io::Result<CollectionStats> {
        let dir = self.root.join(media_type.collection());
        let mut stats = CollectionStats::default();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(stats),
            Err(err) => return Err(err),
        };
        while let Some(entry) = entries.next_entry().await? {
            let meta_path = entry.path();
            if meta_path.extension().and_then(|ext| ext.to_str()) != Some("meta") {
                continue;
            }
            let Ok(raw) = fs::read(&meta_path).await else {
                continue;
            };
            if let Ok(meta) = serde_json::from_slice::<RecordMeta>(&raw) {
                stats.count += 1;
                stats.total_bytes += meta.size_bytes;
            }
        }
        Ok(stats)
    }
}

fn record_age(meta: &RecordMeta) -> Duration {
    // A future timestamp (clock skew) reads as zero age.
    Utc::now()
        .signed_duration_since(meta.created_at)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

async fn remove_record(blob_path: &Path, meta_path: &Path) {
    let _ = fs::remove_file(blob_path).await;
    let _ = fs::remove_file(meta_path).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn payload(len: usize) -> Bytes {
        Bytes::from(vec![7u8; len])
    }

    #[tokio::test]
    async fn put_get_roundtrip() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::new(dir.path(), DEFAULT_RETENTION)
            .await
            .unwrap();
        store
            .put(MediaType::Video, "inc-1", "clips/a.mp4", &payload(64))
            .await
            .unwrap();

        let got = store
            .get(MediaType::Video, "inc-1", "clips/a.mp4")
            .await
            .unwrap();
        assert_eq!(got, Some(payload(64)));
    }

    #[tokio::test]
    async fn media_types_do_not_collide() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::new(dir.path(), DEFAULT_RETENTION)
            .await
            .unwrap();
        store
            .put(MediaType::Video, "inc-1", "capture", &payload(10))
            .await
            .unwrap();

        let got = store.get(MediaType::Image, "inc-1", "capture").await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn expired_record_is_removed_on_read() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::new(dir.path(), Duration::from_millis(20))
            .await
            .unwrap();
        store
            .put(MediaType::Image, "inc-1", "scene.jpg", &payload(10))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        let got = store
            .get(MediaType::Image, "inc-1", "scene.jpg")
            .await
            .unwrap();
        assert!(got.is_none());

        // Removed physically, not just reported absent.
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total.count, 0);
    }

    #[tokio::test]
    async fn orphaned_sidecar_is_dropped_on_read() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::new(dir.path(), DEFAULT_RETENTION)
            .await
            .unwrap();
        store
            .put(MediaType::Video, "inc-1", "clip.mp4", &payload(16))
            .await
            .unwrap();

        let blob_path = store.blob_path(MediaType::Video, "inc-1", "clip.mp4");
        fs::remove_file(&blob_path).await.unwrap();

        let got = store
            .get(MediaType::Video, "inc-1", "clip.mp4")
            .await
            .unwrap();
        assert!(got.is_none());

        // The sidecar went with it, so stats no longer count the record.
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total.count, 0);
    }

    #[tokio::test]
    async fn batch_skips_missing_paths() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::new(dir.path(), DEFAULT_RETENTION)
            .await
            .unwrap();
        store
            .put(MediaType::Image, "inc-1", "frames/1.jpg", &payload(5))
            .await
            .unwrap();
        store
            .put(MediaType::Image, "inc-1", "frames/3.jpg", &payload(5))
            .await
            .unwrap();

        let paths: Vec<String> = ["frames/1.jpg", "frames/2.jpg", "frames/3.jpg"]
            .iter()
            .map(|p| p.to_string())
            .collect();
        let found = store
            .get_batch(MediaType::Image, "inc-1", &paths)
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.contains_key("frames/1.jpg"));
        assert!(found.contains_key("frames/3.jpg"));
    }

    #[tokio::test]
    async fn sweep_removes_old_records_from_both_collections() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::new(dir.path(), DEFAULT_RETENTION)
            .await
            .unwrap();
        store
            .put(MediaType::Video, "inc-1", "clip.mp4", &payload(8))
            .await
            .unwrap();
        store
            .put(MediaType::Image, "inc-1", "scene.jpg", &payload(8))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        let removed = store
            .delete_older_than(Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total.count, 0);

        // Sweeping an empty store is fine.
        assert_eq!(
            store
                .delete_older_than(Duration::from_millis(10))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn clear_all_empties_both_collections() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::new(dir.path(), DEFAULT_RETENTION)
            .await
            .unwrap();
        store
            .put(MediaType::Video, "inc-1", "clip.mp4", &payload(8))
            .await
            .unwrap();
        store
            .put(MediaType::Image, "inc-2", "scene.jpg", &payload(8))
            .await
            .unwrap();

        store.clear_all().await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.videos, CollectionStats::default());
        assert_eq!(stats.images, CollectionStats::default());
    }

    #[tokio::test]
    async fn stats_count_per_type() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::new(dir.path(), DEFAULT_RETENTION)
            .await
            .unwrap();
        store
            .put(MediaType::Video, "inc-1", "a.mp4", &payload(100))
            .await
            .unwrap();
        store
            .put(MediaType::Video, "inc-1", "b.mp4", &payload(40))
            .await
            .unwrap();
        store
            .put(MediaType::Image, "inc-1", "c.jpg", &payload(25))
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.videos.count, 2);
        assert_eq!(stats.videos.total_bytes, 140);
        assert_eq!(stats.images.count, 1);
        assert_eq!(stats.images.total_bytes, 25);
        assert_eq!(stats.total.count, 3);
        assert_eq!(stats.total.total_bytes, 165);
    }

    #[tokio::test]
    async fn put_overwrites_instead_of_duplicating() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::new(dir.path(), DEFAULT_RETENTION)
            .await
            .unwrap();
        store
            .put(MediaType::Video, "inc-1", "clip.mp4", &payload(100))
            .await
            .unwrap();
        store
            .put(MediaType::Video, "inc-1", "clip.mp4", &payload(30))
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.videos.count, 1);
        assert_eq!(stats.videos.total_bytes, 30);
        let got = store
            .get(MediaType::Video, "inc-1", "clip.mp4")
            .await
            .unwrap();
        assert_eq!(got, Some(payload(30)));
    }
}
