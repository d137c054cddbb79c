//! Hot tier: bounded in-memory chunk store
//!
//! Entries are raw audio bytes keyed by [`ChunkId`]. The tier never evicts on
//! its own; the registry asks for eviction candidates and decides where the
//! bytes go. Candidate selection protects a sliding window around the
//! playing chunk so that just-played or soon-to-play audio survives user
//! seeking, then falls back to LRU among everything else.

use crate::models::ChunkId;
use bytes::Bytes;
use std::collections::HashMap;
use tracing::debug;

/// Protection window around the playing chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindow {
    /// Chunks protected before the current one, same paragraph
    pub before: usize,
    /// Chunks protected after the current one, same paragraph
    pub ahead: usize,
    /// Other paragraphs protected within this distance of the current one
    pub paragraph_radius: usize,
}

impl Default for SlidingWindow {
    fn default() -> Self {
        SlidingWindow {
            before: 15,
            ahead: 25,
            paragraph_radius: 2,
        }
    }
}

impl SlidingWindow {
    /// No protection beyond the current chunk itself
    pub fn none() -> Self {
        SlidingWindow {
            before: 0,
            ahead: 0,
            paragraph_radius: 0,
        }
    }

    /// Whether `candidate` is protected while `current` is playing
    pub fn protects(&self, current: &ChunkId, candidate: &ChunkId) -> bool {
        if candidate.paragraph == current.paragraph {
            let low = current.chunk.saturating_sub(self.before);
            let high = current.chunk.saturating_add(self.ahead);
            (low..=high).contains(&candidate.chunk)
        } else {
            candidate.paragraph.abs_diff(current.paragraph) <= self.paragraph_radius
        }
    }
}

struct HotEntry {
    data: Bytes,
    last_access: u64,
}

/// Bounded in-memory store of chunk bytes
pub struct HotTier {
    entries: HashMap<ChunkId, HotEntry>,
    current_size: usize,
    max_size: usize,
    window: SlidingWindow,
    // Logical clock; strictly increasing so LRU order has no ties
    clock: u64,
}

impl HotTier {
    pub fn new(max_size: usize, window: SlidingWindow) -> Self {
        HotTier {
            entries: HashMap::new(),
            current_size: 0,
            max_size,
            window,
            clock: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Insert or replace the bytes for `id`
    pub fn set(&mut self, id: ChunkId, data: Bytes) {
        let size = data.len();
        let last_access = self.tick();

        if let Some(old) = self.entries.insert(id, HotEntry { data, last_access }) {
            self.current_size = self.current_size.saturating_sub(old.data.len());
        }
        self.current_size += size;
    }

    /// Read the bytes for `id`, refreshing its recency
    pub fn get(&mut self, id: &ChunkId) -> Option<Bytes> {
        let now = self.tick();
        let entry = self.entries.get_mut(id)?;
        entry.last_access = now;
        Some(entry.data.clone())
    }

    pub fn has(&self, id: &ChunkId) -> bool {
        self.entries.contains_key(id)
    }

    /// Remove `id`, returning its bytes
    pub fn remove(&mut self, id: &ChunkId) -> Option<Bytes> {
        let entry = self.entries.remove(id)?;
        self.current_size = self.current_size.saturating_sub(entry.data.len());
        Some(entry.data)
    }

    /// Pure predicate: the tier is over budget
    pub fn should_evict(&self) -> bool {
        self.current_size > self.max_size
    }

    pub fn current_size(&self) -> usize {
        self.current_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn window(&self) -> SlidingWindow {
        self.window
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.current_size = 0;
    }

    /// Pick up to `count` entries to evict, oldest access first
    ///
    /// With a current chunk, entries protected by the sliding window are
    /// never returned. Without one, this is plain LRU over all entries.
    pub fn select_eviction_candidates(
        &self,
        current: Option<&ChunkId>,
        count: usize,
    ) -> Vec<ChunkId> {
        let mut unprotected: Vec<(&ChunkId, u64)> = self
            .entries
            .iter()
            .filter(|(id, _)| match current {
                Some(current) => !self.window.protects(current, id),
                None => true,
            })
            .map(|(id, entry)| (id, entry.last_access))
            .collect();

        unprotected.sort_by_key(|(_, last_access)| *last_access);

        let candidates: Vec<ChunkId> = unprotected
            .into_iter()
            .take(count)
            .map(|(id, _)| id.clone())
            .collect();

        debug!(
            "Hot tier eviction candidates: {} of {} entries ({} / {} bytes)",
            candidates.len(),
            self.entries.len(),
            self.current_size,
            self.max_size
        );

        candidates
    }
}
