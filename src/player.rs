//! Audio player driving chunk playback through the registry
//!
//! The player never owns chunk bytes beyond handing them to the sink: the
//! current chunk is tracked by id and re-resolved through the registry.
//! Hosts report completion with [`AudioPlayer::on_chunk_ended`] and failures
//! with [`AudioPlayer::on_playback_error`]; both advance to the next chunk so
//! a single bad chunk is skipped instead of halting the session.

use crate::audio::wav_duration_ms;
use crate::error::{ChunkCacheError, Result};
use crate::models::ChunkId;
use crate::registry::{AudioRegistry, TierReport};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Output surface for decoded chunk audio
#[async_trait]
pub trait PlaybackSink: Send {
    /// Prepare `audio` for playback starting at `offset_ms` into the chunk
    async fn load(&mut self, audio: Bytes, offset_ms: f64) -> Result<()>;

    fn play(&mut self) -> Result<()>;

    fn pause(&mut self);

    fn resume(&mut self) -> Result<()>;

    /// Tear down the current handle, if any
    fn stop(&mut self);

    /// Seek within the loaded chunk
    fn seek(&mut self, local_ms: f64) -> Result<()>;

    /// Playback position within the loaded chunk
    fn position_ms(&self) -> f64;

    /// Duration of the loaded chunk, if the sink knows it
    fn duration_ms(&self) -> Option<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Loading,
    Playing,
    Paused,
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlayerState::Idle => "idle",
            PlayerState::Loading => "loading",
            PlayerState::Playing => "playing",
            PlayerState::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// Snapshot of the session-wide playback position
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackProgress {
    pub chunk_id: Option<ChunkId>,
    pub position_ms: f64,
    pub total_ms: f64,
    pub state: PlayerState,
}

pub struct AudioPlayer {
    registry: Arc<AudioRegistry>,
    sink: Box<dyn PlaybackSink>,
    state: PlayerState,
    current: Option<ChunkId>,
    continuous: bool,
    skipped_chunks: u64,
    tier_sweep: Option<JoinHandle<TierReport>>,
}

impl AudioPlayer {
    pub fn new(registry: Arc<AudioRegistry>, sink: Box<dyn PlaybackSink>) -> Self {
        AudioPlayer {
            registry,
            sink,
            state: PlayerState::Idle,
            current: None,
            continuous: true,
            skipped_chunks: 0,
            tier_sweep: None,
        }
    }

    /// When false, playback stops at the end of each paragraph
    pub fn set_continuous(&mut self, continuous: bool) {
        self.continuous = continuous;
    }

    pub fn is_continuous(&self) -> bool {
        self.continuous
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn current_chunk(&self) -> Option<&ChunkId> {
        self.current.as_ref()
    }

    /// Chunks skipped because they could not be fetched or played
    pub fn skipped_chunks(&self) -> u64 {
        self.skipped_chunks
    }

    pub fn registry(&self) -> &Arc<AudioRegistry> {
        &self.registry
    }

    /// Start playing `id` at `start_offset_ms` into the chunk
    ///
    /// A chunk that cannot be fetched or loaded is skipped and the following
    /// chunk is tried. If nothing after it is playable the session finishes
    /// and the player returns to idle.
    pub async fn play_chunk(&mut self, id: &ChunkId, start_offset_ms: f64) -> Result<()> {
        let mut target = id.clone();
        let mut offset = start_offset_ms.max(0.0);

        loop {
            self.state = PlayerState::Loading;
            self.sink.stop();

            match self.start_chunk(&target, offset).await {
                Ok(()) => {
                    self.state = PlayerState::Playing;
                    self.current = Some(target.clone());
                    self.spawn_tier_sweep(&target);
                    debug!("Playing {} from {:.0}ms", target, offset);
                    return Ok(());
                }
                Err(e) if e.is_skippable() => {
                    self.skipped_chunks += 1;
                    warn!("Skipping chunk {}: {}", target, e);

                    match self.next_chunk_after(&target) {
                        Ok(Some(next)) => {
                            target = next;
                            offset = 0.0;
                        }
                        Ok(None) => {
                            self.finish();
                            return Ok(());
                        }
                        Err(e) => {
                            self.finish();
                            return Err(e);
                        }
                    }
                }
                Err(e) => {
                    self.finish();
                    return Err(e);
                }
            }
        }
    }

    async fn start_chunk(&mut self, id: &ChunkId, offset_ms: f64) -> Result<()> {
        let data = self.registry.get_chunk(id).await?;
        let metadata = self
            .registry
            .get_metadata(id)
            .ok_or_else(|| ChunkCacheError::UnregisteredChunk(id.to_string()))?;

        self.sink.load(data.clone(), offset_ms).await?;

        if !metadata.has_known_duration() {
            let discovered = self
                .sink
                .duration_ms()
                .filter(|d| d.is_finite() && *d > 0.0)
                .or_else(|| wav_duration_ms(&data));
            match discovered {
                Some(duration) => self.registry.update_chunk_duration(id, duration)?,
                None => debug!("Could not determine duration of {}", id),
            }
        }

        self.sink.play()
    }

    fn spawn_tier_sweep(&mut self, current: &ChunkId) {
        let registry = Arc::clone(&self.registry);
        let current = current.clone();

        self.tier_sweep = Some(tokio::spawn(async move {
            let report = registry.manage_tiers(Some(&current)).await;
            debug!("Tier sweep after {}: {:?}", current, report);
            report
        }));
    }

    /// Wait for the most recently spawned tier sweep
    pub async fn wait_for_tier_sweep(&mut self) -> Option<TierReport> {
        let handle = self.tier_sweep.take()?;
        match handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                debug!("Tier sweep task failed: {}", e);
                None
            }
        }
    }

    fn next_chunk_after(&self, id: &ChunkId) -> Result<Option<ChunkId>> {
        let next = self.registry.get_next_chunks(id, 1)?.into_iter().next();
        Ok(next.filter(|n| self.continuous || n.paragraph == id.paragraph))
    }

    async fn advance(&mut self) -> Result<()> {
        let Some(current) = self.current.clone() else {
            return Ok(());
        };

        match self.next_chunk_after(&current)? {
            Some(next) => self.play_chunk(&next, 0.0).await,
            None => {
                self.finish();
                Ok(())
            }
        }
    }

    /// The sink finished the current chunk
    pub async fn on_chunk_ended(&mut self) -> Result<()> {
        self.advance().await
    }

    /// The sink failed while playing the current chunk
    pub async fn on_playback_error(&mut self, error: ChunkCacheError) -> Result<()> {
        self.skipped_chunks += 1;
        match &self.current {
            Some(current) => warn!("Playback of {} failed: {}", current, error),
            None => warn!("Playback failed with no current chunk: {}", error),
        }
        self.advance().await
    }

    fn finish(&mut self) {
        self.sink.stop();
        if self.current.take().is_some() || self.state != PlayerState::Idle {
            info!("Playback finished");
        }
        self.state = PlayerState::Idle;
    }

    pub fn pause(&mut self) {
        if self.state == PlayerState::Playing {
            self.sink.pause();
            self.state = PlayerState::Paused;
        }
    }

    pub fn resume(&mut self) -> Result<()> {
        if self.state == PlayerState::Paused {
            self.sink.resume()?;
            self.state = PlayerState::Playing;
        }
        Ok(())
    }

    pub fn stop(&mut self) {
        self.finish();
    }

    /// Absolute session position of the current playback
    pub fn current_position_ms(&self) -> f64 {
        self.current
            .as_ref()
            .and_then(|id| self.registry.get_metadata(id))
            .map(|m| m.start_offset_ms + self.sink.position_ms())
            .unwrap_or(0.0)
    }

    /// Seek to an absolute session time
    ///
    /// Returns `Ok(false)` when no chunk covers the time yet.
    pub async fn seek_to_time(&mut self, absolute_ms: f64) -> Result<bool> {
        let Some(position) = self.registry.find_chunk_at_time(absolute_ms) else {
            debug!("Seek to {:.0}ms did not resolve to a chunk", absolute_ms);
            return Ok(false);
        };

        let active = matches!(self.state, PlayerState::Playing | PlayerState::Paused);
        if active && self.current.as_ref() == Some(&position.chunk_id) {
            self.sink.seek(position.local_offset_ms)?;
        } else {
            self.play_chunk(&position.chunk_id, position.local_offset_ms)
                .await?;
        }

        Ok(true)
    }

    /// Seek relative to the current position
    ///
    /// Backward seeks stop at the start of the session. A forward seek that
    /// reaches the end of the session finishes playback, as if the last
    /// chunk had ended, and returns `Ok(true)`.
    pub async fn seek(&mut self, delta_seconds: f64) -> Result<bool> {
        let total = self.registry.total_duration_ms().max(0.0);
        let target = (self.current_position_ms() + delta_seconds * 1000.0).max(0.0);

        if delta_seconds > 0.0 && total > 0.0 && target >= total {
            debug!(
                "Seek to {:.0}ms is past the end of the session ({:.0}ms)",
                target, total
            );
            self.finish();
            return Ok(true);
        }

        self.seek_to_time(target.min(total)).await
    }

    pub fn progress(&self) -> PlaybackProgress {
        PlaybackProgress {
            chunk_id: self.current.clone(),
            position_ms: self.current_position_ms(),
            total_ms: self.registry.total_duration_ms(),
            state: self.state,
        }
    }
}
