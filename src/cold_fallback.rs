//! Cold fallback: paragraph-granularity audio cache
//!
//! When a chunk is missing from both the hot and warm tiers, the registry asks
//! the fallback for the whole paragraph (keyed by normalized text, voice and
//! speed) and extracts the chunk at the wanted index.

use crate::models::ParagraphAudio;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// Source of whole-paragraph audio used to rebuild evicted chunks
#[async_trait]
pub trait ColdFallback: Send + Sync {
    /// Full paragraph audio for `(text, voice_id, speed)`, if cached
    async fn lookup(&self, text: &str, voice_id: &str, speed: f32) -> Option<ParagraphAudio>;
}

/// Normalize paragraph text for use as a cache key
pub fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Cache key for one synthesized paragraph
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParagraphKey {
    pub text: String,
    pub voice_id: String,
    /// Speed in hundredths, so that 1.0 and 1.0000001 share a key
    pub speed_centis: i64,
}

impl ParagraphKey {
    pub fn new(text: &str, voice_id: &str, speed: f32) -> Self {
        ParagraphKey {
            text: normalize_text(text),
            voice_id: voice_id.to_string(),
            speed_centis: (f64::from(speed) * 100.0).round() as i64,
        }
    }
}

struct ParagraphEntry {
    audio: ParagraphAudio,
    last_access: u64,
}

struct ParagraphCacheState {
    entries: HashMap<ParagraphKey, ParagraphEntry>,
    clock: u64,
}

/// In-memory paragraph cache bounded by paragraph count, LRU eviction
pub struct ParagraphCache {
    state: Mutex<ParagraphCacheState>,
    max_paragraphs: usize,
}

impl ParagraphCache {
    pub fn new(max_paragraphs: usize) -> Self {
        ParagraphCache {
            state: Mutex::new(ParagraphCacheState {
                entries: HashMap::new(),
                clock: 0,
            }),
            max_paragraphs: max_paragraphs.max(1),
        }
    }

    /// Cache a synthesized paragraph, evicting the least recently used one if full
    pub fn store(&self, text: &str, voice_id: &str, speed: f32, audio: ParagraphAudio) {
        let key = ParagraphKey::new(text, voice_id, speed);
        let mut state = self.state.lock();
        state.clock += 1;
        let now = state.clock;

        if !state.entries.contains_key(&key) && state.entries.len() >= self.max_paragraphs {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                state.entries.remove(&oldest);
                debug!("Evicted paragraph from cold cache: {:?}", oldest.text);
            }
        }

        state.entries.insert(
            key,
            ParagraphEntry {
                audio,
                last_access: now,
            },
        );
    }

    pub fn remove(&self, text: &str, voice_id: &str, speed: f32) -> bool {
        let key = ParagraphKey::new(text, voice_id, speed);
        self.state.lock().entries.remove(&key).is_some()
    }

    pub fn contains(&self, text: &str, voice_id: &str, speed: f32) -> bool {
        let key = ParagraphKey::new(text, voice_id, speed);
        self.state.lock().entries.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }
}

#[async_trait]
impl ColdFallback for ParagraphCache {
    async fn lookup(&self, text: &str, voice_id: &str, speed: f32) -> Option<ParagraphAudio> {
        let key = ParagraphKey::new(text, voice_id, speed);
        let mut state = self.state.lock();
        state.clock += 1;
        let now = state.clock;

        let entry = state.entries.get_mut(&key)?;
        entry.last_access = now;
        Some(entry.audio.clone())
    }
}
