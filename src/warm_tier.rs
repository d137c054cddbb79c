//! Warm tier: bounded persistent chunk store with a recency index
//!
//! The tier keeps its size accounting and LRU order in memory and delegates
//! byte storage to a [`WarmStore`]. Store failures never escape the tier:
//! they are logged, counted, and treated as a miss (reads) or a no-op
//! (writes and deletes). The hot tier and the cold fallback cover the gap.

use crate::error::{ChunkCacheError, Result};
use crate::models::ChunkId;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Persistent byte store behind the warm tier
#[async_trait]
pub trait WarmStore: Send + Sync {
    /// Read the bytes stored under `key`, `None` if absent
    async fn read(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store `data` under `key`, replacing any previous value
    async fn write(&self, key: &str, data: &Bytes) -> Result<()>;

    /// Delete `key`; deleting a missing key is not an error
    async fn delete(&self, key: &str) -> Result<()>;
}

const RECORD_VERSION: u32 = 1;

/// Header written in front of every warm record on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WarmRecordHeader {
    version: u32,
    key: String,
    len: u64,
    checksum: u32,
}

fn encode_record(key: &str, data: &[u8]) -> Result<Vec<u8>> {
    let header = WarmRecordHeader {
        version: RECORD_VERSION,
        key: key.to_string(),
        len: data.len() as u64,
        checksum: crc32fast::hash(data),
    };
    let header_bytes = bincode::serialize(&header).map_err(ChunkCacheError::store)?;

    let mut record = Vec::with_capacity(4 + header_bytes.len() + data.len());
    record.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    record.extend_from_slice(&header_bytes);
    record.extend_from_slice(data);
    Ok(record)
}

fn decode_record(key: &str, raw: &[u8]) -> Result<Bytes> {
    let Some(len_bytes) = raw.get(..4) else {
        return Err(ChunkCacheError::StoreError(format!("Truncated record for {}", key)));
    };
    let mut prefix = [0u8; 4];
    prefix.copy_from_slice(len_bytes);
    let header_len = u32::from_le_bytes(prefix) as usize;

    let Some(header_bytes) = raw.get(4..4 + header_len) else {
        return Err(ChunkCacheError::StoreError(format!("Truncated header for {}", key)));
    };
    let header: WarmRecordHeader =
        bincode::deserialize(header_bytes).map_err(ChunkCacheError::store)?;

    if header.version != RECORD_VERSION {
        return Err(ChunkCacheError::StoreError(format!(
            "Unsupported record version {} for {}",
            header.version, key
        )));
    }
    if header.key != key {
        return Err(ChunkCacheError::StoreError(format!(
            "Record key mismatch: expected {}, found {}",
            key, header.key
        )));
    }

    let data = &raw[4 + header_len..];
    if data.len() as u64 != header.len {
        return Err(ChunkCacheError::StoreError(format!(
            "Record length mismatch for {}: expected {}, found {}",
            key,
            header.len,
            data.len()
        )));
    }
    if crc32fast::hash(data) != header.checksum {
        return Err(ChunkCacheError::StoreError(format!("Checksum mismatch for {}", key)));
    }

    Ok(Bytes::copy_from_slice(data))
}

/// Filesystem-backed warm store
///
/// Records live at `<base>/<xx>/<yy>/<sanitized key>`, where `xx/yy` come
/// from an xxh3 hash of the key.
pub struct FileWarmStore {
    base_path: PathBuf,
}

impl FileWarmStore {
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ChunkCacheError::StoreError(format!(
                "Failed to create warm tier directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        info!("Warm tier directory: {}", base_path.display());
        Ok(FileWarmStore { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// File path for a key
    pub fn path_for(&self, key: &str) -> PathBuf {
        let hash = xxhash_rust::xxh3::xxh3_64(key.as_bytes());
        let dir1 = format!("{:02x}", (hash >> 8) & 0xFF);
        let dir2 = format!("{:02x}", hash & 0xFF);

        let filename: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();

        self.base_path.join(dir1).join(dir2).join(filename)
    }
}

#[async_trait]
impl WarmStore for FileWarmStore {
    async fn read(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.path_for(key);
        match fs::read(&path).await {
            Ok(raw) => decode_record(key, &raw).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ChunkCacheError::StoreError(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn write(&self, key: &str, data: &Bytes) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                ChunkCacheError::StoreError(format!("Failed to create warm directory: {}", e))
            })?;
        }

        let record = encode_record(key, data)?;
        let mut file = fs::File::create(&path).await.map_err(|e| {
            ChunkCacheError::StoreError(format!("Failed to create warm file: {}", e))
        })?;
        file.write_all(&record).await.map_err(|e| {
            ChunkCacheError::StoreError(format!("Failed to write warm file: {}", e))
        })?;
        file.sync_all().await.map_err(|e| {
            ChunkCacheError::StoreError(format!("Failed to sync warm file: {}", e))
        })?;

        debug!("Wrote warm record {} ({} bytes)", key, data.len());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ChunkCacheError::StoreError(format!(
                "Failed to delete {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// Map-backed warm store for memory-only deployments and tests
#[derive(Default)]
pub struct MemoryWarmStore {
    entries: Mutex<HashMap<String, Bytes>>,
}

impl MemoryWarmStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl WarmStore for MemoryWarmStore {
    async fn read(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn write(&self, key: &str, data: &Bytes) -> Result<()> {
        self.entries.lock().insert(key.to_string(), data.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

struct WarmEntry {
    size: usize,
    last_access: u64,
}

#[derive(Default)]
struct WarmIndex {
    entries: HashMap<ChunkId, WarmEntry>,
    // last_access -> id, oldest first
    recency: BTreeMap<u64, ChunkId>,
    current_size: usize,
    clock: u64,
}

impl WarmIndex {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn insert(&mut self, id: ChunkId, size: usize) {
        self.remove(&id);
        let now = self.tick();
        self.recency.insert(now, id.clone());
        self.entries.insert(
            id,
            WarmEntry {
                size,
                last_access: now,
            },
        );
        self.current_size += size;
    }

    fn touch(&mut self, id: &ChunkId) {
        let now = self.tick();
        if let Some(entry) = self.entries.get_mut(id) {
            self.recency.remove(&entry.last_access);
            entry.last_access = now;
            self.recency.insert(now, id.clone());
        }
    }

    fn remove(&mut self, id: &ChunkId) -> Option<usize> {
        let entry = self.entries.remove(id)?;
        self.recency.remove(&entry.last_access);
        self.current_size = self.current_size.saturating_sub(entry.size);
        Some(entry.size)
    }
}

/// Bounded warm tier over a [`WarmStore`]
pub struct WarmTier {
    store: Arc<dyn WarmStore>,
    index: Mutex<WarmIndex>,
    max_size: usize,
    eviction_batch: usize,
    store_errors: AtomicU64,
}

impl WarmTier {
    pub fn new(store: Arc<dyn WarmStore>, max_size: usize, eviction_batch: usize) -> Self {
        WarmTier {
            store,
            index: Mutex::new(WarmIndex::default()),
            max_size,
            eviction_batch: eviction_batch.max(1),
            store_errors: AtomicU64::new(0),
        }
    }

    fn record_store_error(&self, op: &str, id: &ChunkId, err: &ChunkCacheError) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
        warn!("Warm tier {} failed for {}: {}", op, id, err);
    }

    /// Read a chunk, refreshing its recency on hit
    pub async fn get(&self, id: &ChunkId) -> Option<Bytes> {
        if !self.has(id) {
            return None;
        }

        match self.store.read(&id.to_string()).await {
            Ok(Some(data)) => {
                self.index.lock().touch(id);
                debug!("Warm tier hit: {}", id);
                Some(data)
            }
            Ok(None) => {
                // Indexed but gone from the store
                self.index.lock().remove(id);
                debug!("Warm tier record missing for indexed chunk {}", id);
                None
            }
            Err(e) => {
                self.record_store_error("read", id, &e);
                None
            }
        }
    }

    /// Store a chunk; returns false when the store rejected the write
    pub async fn set(&self, id: &ChunkId, data: Bytes) -> bool {
        match self.store.write(&id.to_string(), &data).await {
            Ok(()) => {
                self.index.lock().insert(id.clone(), data.len());
                true
            }
            Err(e) => {
                self.record_store_error("write", id, &e);
                false
            }
        }
    }

    /// Drop a chunk, returning the bytes freed from the tier budget
    pub async fn remove(&self, id: &ChunkId) -> usize {
        let freed = self.index.lock().remove(id).unwrap_or(0);
        if let Err(e) = self.store.delete(&id.to_string()).await {
            self.record_store_error("delete", id, &e);
        }
        freed
    }

    pub fn has(&self, id: &ChunkId) -> bool {
        self.index.lock().entries.contains_key(id)
    }

    pub fn should_evict(&self) -> bool {
        self.index.lock().current_size > self.max_size
    }

    pub fn current_size(&self) -> usize {
        self.index.lock().current_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.index.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.lock().entries.is_empty()
    }

    /// Store failures absorbed so far
    pub fn store_errors(&self) -> u64 {
        self.store_errors.load(Ordering::Relaxed)
    }

    /// The `count` least recently accessed chunks
    pub fn select_eviction_candidates(&self, count: usize) -> Vec<ChunkId> {
        self.index
            .lock()
            .recency
            .values()
            .take(count)
            .cloned()
            .collect()
    }

    /// Evict LRU chunks until at least `target_bytes` are freed
    ///
    /// Returns the bytes actually freed, which is less than the target when
    /// the tier runs out of entries.
    pub async fn evict_to_size(&self, target_bytes: usize) -> usize {
        let mut freed = 0;

        while freed < target_bytes {
            let candidates = self.select_eviction_candidates(self.eviction_batch);
            if candidates.is_empty() {
                break;
            }

            for id in candidates {
                freed += self.remove(&id).await;
                debug!("Discarded from warm tier: {}", id);
                if freed >= target_bytes {
                    break;
                }
            }
        }

        freed
    }

    /// Remove every indexed chunk from the tier and its store
    pub async fn clear(&self) {
        let ids: Vec<ChunkId> = {
            let mut index = self.index.lock();
            let ids = index.entries.keys().cloned().collect();
            *index = WarmIndex::default();
            ids
        };

        for id in ids {
            if let Err(e) = self.store.delete(&id.to_string()).await {
                self.record_store_error("delete", &id, &e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(chunk: usize) -> ChunkId {
        ChunkId::new("s", 0, chunk)
    }

    fn memory_tier(max_size: usize) -> WarmTier {
        WarmTier::new(Arc::new(MemoryWarmStore::new()), max_size, 20)
    }

    #[test]
    fn test_record_round_trip_and_corruption() {
        let record = encode_record("s:0:1", b"audio").unwrap();
        assert_eq!(&decode_record("s:0:1", &record).unwrap()[..], b"audio");

        assert!(decode_record("s:0:2", &record).is_err());

        let mut corrupted = record.clone();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xFF;
        assert!(decode_record("s:0:1", &corrupted).is_err());

        assert!(decode_record("s:0:1", &record[..2]).is_err());
    }

    #[tokio::test]
    async fn test_get_updates_recency() {
        let tier = memory_tier(1000);
        tier.set(&id(0), Bytes::from_static(b"zero")).await;
        tier.set(&id(1), Bytes::from_static(b"one")).await;
        tier.set(&id(2), Bytes::from_static(b"two")).await;

        assert_eq!(tier.get(&id(0)).await, Some(Bytes::from_static(b"zero")));
        assert_eq!(tier.select_eviction_candidates(2), vec![id(1), id(2)]);
        assert_eq!(tier.current_size(), 10);
    }

    #[tokio::test]
    async fn test_replace_adjusts_size() {
        let tier = memory_tier(1000);
        tier.set(&id(0), Bytes::from(vec![0u8; 100])).await;
        tier.set(&id(0), Bytes::from(vec![0u8; 40])).await;
        assert_eq!(tier.current_size(), 40);
        assert_eq!(tier.len(), 1);
    }

    #[tokio::test]
    async fn test_evict_to_size() {
        let tier = memory_tier(100);
        for i in 0..5 {
            tier.set(&id(i), Bytes::from(vec![0u8; 30])).await;
        }
        assert!(tier.should_evict());

        let freed = tier.evict_to_size(50).await;
        assert_eq!(freed, 60);
        assert_eq!(tier.len(), 3);
        assert!(!tier.has(&id(0)));
        assert!(!tier.has(&id(1)));
        assert!(!tier.should_evict());

        // Asking for more than exists frees what is there
        assert_eq!(tier.evict_to_size(10_000).await, 90);
        assert!(tier.is_empty());
    }

    #[tokio::test]
    async fn test_miss_for_unindexed_key() {
        let store = Arc::new(MemoryWarmStore::new());
        store.write("s:0:9", &Bytes::from_static(b"x")).await.unwrap();
        let tier = WarmTier::new(store, 100, 20);
        assert!(tier.get(&id(9)).await.is_none());
    }

    #[tokio::test]
    async fn test_clear_deletes_store_records() {
        let store = Arc::new(MemoryWarmStore::new());
        let tier = WarmTier::new(store.clone(), 100, 20);
        tier.set(&id(0), Bytes::from_static(b"a")).await;
        tier.set(&id(1), Bytes::from_static(b"b")).await;

        tier.clear().await;
        assert!(tier.is_empty());
        assert_eq!(tier.current_size(), 0);
        assert!(store.is_empty());
    }
}
