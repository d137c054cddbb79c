//! Error types for the TTS chunk cache

use thiserror::Error;

/// Result type alias for chunk cache operations
pub type Result<T> = std::result::Result<T, ChunkCacheError>;

/// Error types that can occur in the chunk cache, stream parser and player
#[derive(Error, Debug, Clone)]
pub enum ChunkCacheError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid chunk id: {0}")]
    InvalidChunkId(String),

    #[error("Chunk not registered: {0}")]
    UnregisteredChunk(String),

    #[error("Chunk unavailable: {0}")]
    ChunkUnavailable(String),

    #[error("Warm store error: {0}")]
    StoreError(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Stream read cancelled")]
    Cancelled,

    #[error("Playback error: {0}")]
    PlaybackError(String),

    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for ChunkCacheError {
    fn from(err: std::io::Error) -> Self {
        ChunkCacheError::IoError(err.to_string())
    }
}

impl ChunkCacheError {
    /// Determine if the player should skip past the failing chunk
    ///
    /// Returns true for errors confined to a single chunk:
    /// - the chunk could not be found in any tier (or reconstructed)
    /// - the playback surface rejected or failed the chunk
    ///
    /// Everything else (configuration, unregistered ids, cancellation)
    /// ends the current playback attempt instead.
    pub fn is_skippable(&self) -> bool {
        match self {
            ChunkCacheError::ChunkUnavailable(_) => true,
            ChunkCacheError::PlaybackError(_) => true,

            ChunkCacheError::ConfigError(_) => false,
            ChunkCacheError::InvalidChunkId(_) => false,
            ChunkCacheError::UnregisteredChunk(_) => false,
            ChunkCacheError::StoreError(_) => false,
            ChunkCacheError::StreamError(_) => false,
            ChunkCacheError::Cancelled => false,
            ChunkCacheError::IoError(_) => false,
        }
    }

    /// Whether this error is allowed to cross the registry/player boundary
    ///
    /// Store and I/O failures are absorbed at the tier boundary; only
    /// unregistered ids and exhausted tier lookups reach the player.
    pub fn surfaces_to_player(&self) -> bool {
        matches!(
            self,
            ChunkCacheError::UnregisteredChunk(_) | ChunkCacheError::ChunkUnavailable(_)
        )
    }

    /// Create a StoreError from anything displayable
    pub fn store(err: impl std::fmt::Display) -> Self {
        ChunkCacheError::StoreError(err.to_string())
    }
}
