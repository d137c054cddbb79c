//! Core data models for the chunk cache

use crate::error::{ChunkCacheError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

/// Maximum number of characters of paragraph text kept on chunk metadata
pub const PARAGRAPH_TEXT_PREVIEW_CHARS: usize = 50;

/// Identifies one audio chunk within one playback session
///
/// The canonical string form is `"<session>:<paragraph>:<chunk>"`, which is
/// also the key used by the warm tier store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId {
    /// Session the chunk was registered in
    pub session: String,
    /// Paragraph index in registration order
    pub paragraph: usize,
    /// Chunk index within the paragraph
    pub chunk: usize,
}

impl ChunkId {
    /// Create a new ChunkId
    pub fn new(session: impl Into<String>, paragraph: usize, chunk: usize) -> Self {
        ChunkId {
            session: session.into(),
            paragraph,
            chunk,
        }
    }

    /// Parse a ChunkId from its canonical string form
    ///
    /// # Returns
    /// * `Ok(ChunkId)` if the input splits into exactly three ':'-separated
    ///   fields and the last two are unsigned integers
    /// * `Err(ChunkCacheError::InvalidChunkId)` otherwise
    pub fn from_string(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();

        if parts.len() != 3 {
            return Err(ChunkCacheError::InvalidChunkId(format!(
                "expected 'session:paragraph:chunk', got: {}",
                s
            )));
        }

        let paragraph = parts[1].parse::<usize>().map_err(|e| {
            ChunkCacheError::InvalidChunkId(format!("invalid paragraph index in '{}': {}", s, e))
        })?;

        let chunk = parts[2].parse::<usize>().map_err(|e| {
            ChunkCacheError::InvalidChunkId(format!("invalid chunk index in '{}': {}", s, e))
        })?;

        Ok(ChunkId::new(parts[0], paragraph, chunk))
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.session, self.paragraph, self.chunk)
    }
}

impl FromStr for ChunkId {
    type Err = ChunkCacheError;

    fn from_str(s: &str) -> Result<Self> {
        ChunkId::from_string(s)
    }
}

/// Tier that satisfied the most recent successful read of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageLocation {
    Hot,
    Warm,
    Cold,
    /// Bytes are being reconstructed from the cold fallback into the hot tier
    ColdToHot,
}

impl StorageLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageLocation::Hot => "hot",
            StorageLocation::Warm => "warm",
            StorageLocation::Cold => "cold",
            StorageLocation::ColdToHot => "cold->hot",
        }
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timing of one spoken phrase, relative to the start of its chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhraseTiming {
    /// Text the synthesizer spoke
    pub text: String,
    /// Text before normalization, when it differs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
    pub start_ms: f64,
    pub duration_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_offset_start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_offset_end: Option<usize>,
}

impl PhraseTiming {
    pub fn new(text: impl Into<String>, start_ms: f64, duration_ms: f64) -> Self {
        PhraseTiming {
            text: text.into(),
            original_text: None,
            start_ms,
            duration_ms,
            char_offset_start: None,
            char_offset_end: None,
        }
    }
}

/// Chunk metadata as carried by a JSON part of the response stream
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WireChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub chunk_index: usize,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
    /// Duration reported by the producer; 0 when absent
    #[serde(default)]
    pub duration_ms: f64,
    pub start_offset_ms: f64,
    #[serde(default)]
    pub phrases: Vec<PhraseTiming>,
}

impl WireChunkMetadata {
    pub fn new(chunk_index: usize, start_offset_ms: f64) -> Self {
        WireChunkMetadata {
            chunk_index,
            start_offset_ms,
            ..Default::default()
        }
    }
}

/// A phrase placed on the session-wide timeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimedPhrase {
    pub text: String,
    pub start_ms: f64,
    pub end_ms: f64,
}

/// A paragraph's audio split into chunks, with the matching wire metadata
///
/// Used both as registration input and as the cold fallback's answer.
#[derive(Debug, Clone, Default)]
pub struct ParagraphAudio {
    pub audio_chunks: Vec<Bytes>,
    pub chunk_metadata: Vec<WireChunkMetadata>,
}

impl ParagraphAudio {
    pub fn new(audio_chunks: Vec<Bytes>, chunk_metadata: Vec<WireChunkMetadata>) -> Self {
        ParagraphAudio {
            audio_chunks,
            chunk_metadata,
        }
    }

    pub fn len(&self) -> usize {
        self.audio_chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.audio_chunks.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.audio_chunks.iter().map(|c| c.len()).sum()
    }

    /// Shift every chunk's start offset by `offset_ms`
    ///
    /// Synthesis responses carry offsets relative to the paragraph; the
    /// registry's timeline is session-wide.
    pub fn rebased(mut self, offset_ms: f64) -> Self {
        for meta in &mut self.chunk_metadata {
            meta.start_offset_ms += offset_ms;
        }
        self
    }
}

/// Result of a time lookup: the chunk and the offset inside it
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPosition {
    pub chunk_id: ChunkId,
    pub local_offset_ms: f64,
}

/// Registry-owned record of one chunk's timing, size and access statistics
#[derive(Debug, Clone)]
pub struct ChunkMetadata {
    pub chunk_id: ChunkId,
    pub start_offset_ms: f64,
    duration_ms: f64,
    pub paragraph_index: usize,
    /// First characters of the paragraph, for diagnostics only
    pub paragraph_text: String,
    pub storage_location: StorageLocation,
    pub size_bytes: usize,
    pub phrases: Vec<PhraseTiming>,
    pub last_access: Option<SystemTime>,
    pub access_count: u64,
}

impl ChunkMetadata {
    /// Create metadata for a freshly registered chunk (duration unknown, hot)
    pub fn new(
        chunk_id: ChunkId,
        wire: &WireChunkMetadata,
        paragraph_text: &str,
        size_bytes: usize,
    ) -> Self {
        ChunkMetadata {
            paragraph_index: chunk_id.paragraph,
            chunk_id,
            start_offset_ms: wire.start_offset_ms,
            duration_ms: 0.0,
            paragraph_text: paragraph_text
                .chars()
                .take(PARAGRAPH_TEXT_PREVIEW_CHARS)
                .collect(),
            storage_location: StorageLocation::Hot,
            size_bytes,
            phrases: wire.phrases.clone(),
            last_access: None,
            access_count: 0,
        }
    }

    /// Duration in milliseconds; 0 means "not known yet"
    pub fn duration_ms(&self) -> f64 {
        self.duration_ms
    }

    pub fn has_known_duration(&self) -> bool {
        self.duration_ms > 0.0
    }

    pub fn end_offset_ms(&self) -> f64 {
        self.start_offset_ms + self.duration_ms
    }

    /// Whether `absolute_ms` falls in `[start, end)`; false while duration is unknown
    pub fn contains_time(&self, absolute_ms: f64) -> bool {
        self.has_known_duration()
            && absolute_ms >= self.start_offset_ms
            && absolute_ms < self.end_offset_ms()
    }

    pub(crate) fn set_duration(&mut self, duration_ms: f64) {
        self.duration_ms = duration_ms;
    }

    pub(crate) fn record_access(&mut self) {
        self.last_access = Some(SystemTime::now());
        self.access_count += 1;
    }
}
