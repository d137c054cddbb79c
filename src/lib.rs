//! TTS Chunk Cache
//!
//! A tiered cache and playback registry for streamed text-to-speech audio.
//! Synthesis responses arrive as multipart streams of JSON chunk metadata and
//! self-contained WAV chunks; the registry keeps the chunks near the playback
//! position in memory, spills older ones to a persistent warm tier, and
//! rebuilds discarded chunks from a paragraph-level cold fallback.
//!
//! # Overview
//!
//! - [`StreamParser`]: incremental multipart parser, fed with arbitrary
//!   network fragments
//! - [`HotTier`]: in-memory byte store with LRU eviction and sliding-window
//!   protection around the playing chunk
//! - [`WarmTier`]: bounded persistent tier over a [`WarmStore`]
//! - [`ColdFallback`]: whole-paragraph lookup used to rebuild evicted chunks
//! - [`AudioRegistry`]: session-scoped index that ties the tiers together
//! - [`AudioPlayer`]: drives a [`PlaybackSink`] through the registry
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tts_chunk_cache::{AudioRegistry, CacheConfig, ParagraphCache};
//!
//! # async fn run() -> tts_chunk_cache::Result<()> {
//! let config = CacheConfig::in_memory(8 * 1024 * 1024, 32 * 1024 * 1024);
//! let cold = Arc::new(ParagraphCache::new(config.cold_max_paragraphs));
//! let registry = AudioRegistry::new(config, Some(cold)).await?;
//!
//! println!("Session: {}", registry.session_id());
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! ```yaml
//! hot_max_bytes: 52428800      # 50MB in memory
//! warm_max_bytes: 209715200    # 200MB on disk
//! warm_backend: "file"
//! warm_dir: "/var/cache/tts-chunks"
//! window_before: 15
//! window_ahead: 25
//! boundary: "tts_chunk_boundary"
//! ```
//!
//! See [`CacheConfig`] for every option.

pub mod audio;
pub mod cold_fallback;
pub mod config;
pub mod error;
pub mod hot_tier;
pub mod metrics;
pub mod models;
pub mod player;
pub mod prometheus_metrics;
pub mod registry;
pub mod stream_parser;
pub mod warm_tier;
pub mod wire;

// Re-export commonly used types
pub use cold_fallback::{ColdFallback, ParagraphCache};
pub use config::CacheConfig;
pub use error::{ChunkCacheError, Result};
pub use hot_tier::{HotTier, SlidingWindow};
pub use metrics::{MetricsSnapshot, RegistryMetrics};
pub use models::{
    ChunkId, ChunkMetadata, ChunkPosition, ParagraphAudio, PhraseTiming, StorageLocation,
    TimedPhrase, WireChunkMetadata,
};
pub use player::{AudioPlayer, PlaybackProgress, PlaybackSink, PlayerState};
pub use prometheus_metrics::TierPrometheusMetrics;
pub use registry::{AudioRegistry, RegistryStats, TierReport};
pub use stream_parser::{parse_stream, parse_stream_with, StreamParser, StreamPart};
pub use warm_tier::{FileWarmStore, MemoryWarmStore, WarmStore, WarmTier};
