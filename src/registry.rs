//! Audio registry: session-scoped index over the hot, warm and cold tiers
//!
//! The registry owns every [`ChunkMetadata`] and both byte tiers. Reads go
//! hot -> warm -> cold; a warm or cold hit is promoted back into the hot
//! tier. Tier movements (promotion on a miss, the eviction sweep in
//! [`AudioRegistry::manage_tiers`], registration and `clear`) are serialized
//! by an async tier guard. A promotion or demotion that is still fetching
//! bytes can therefore never land after the chunk id was re-registered.
//! Hot hits skip the guard.

use crate::cold_fallback::ColdFallback;
use crate::config::CacheConfig;
use crate::error::{ChunkCacheError, Result};
use crate::hot_tier::HotTier;
use crate::metrics::{MetricsSnapshot, RegistryMetrics};
use crate::models::{
    ChunkId, ChunkMetadata, ChunkPosition, ParagraphAudio, StorageLocation, WireChunkMetadata,
};
use crate::prometheus_metrics::TierPrometheusMetrics;
use crate::stream_parser::{paragraph_audio_from_parts, StreamPart};
use crate::warm_tier::{FileWarmStore, MemoryWarmStore, WarmStore, WarmTier};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

fn new_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// What one eviction sweep moved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierReport {
    /// Chunks moved from the hot tier into the warm tier
    pub demoted_to_warm: usize,
    /// Chunks removed from the hot tier without a warm copy
    pub dropped_from_hot: usize,
    /// Chunks discarded from the warm tier
    pub discarded_from_warm: usize,
    pub hot_bytes_freed: usize,
    pub warm_bytes_freed: usize,
}

impl TierReport {
    pub fn is_empty(&self) -> bool {
        self.demoted_to_warm == 0 && self.dropped_from_hot == 0 && self.discarded_from_warm == 0
    }
}

/// Registry statistics
#[derive(Debug, Clone)]
pub struct RegistryStats {
    pub session: String,
    pub paragraphs: usize,
    pub chunks: usize,
    pub hot_entries: usize,
    pub hot_bytes: usize,
    pub warm_entries: usize,
    pub warm_bytes: usize,
    pub total_duration_ms: f64,
}

/// What the registry remembers about a paragraph to rebuild its chunks
struct ParagraphEntry {
    chunk_ids: Vec<ChunkId>,
    text: String,
    voice_id: String,
    speed: f32,
}

struct RegistryState {
    session: String,
    chunks: HashMap<ChunkId, ChunkMetadata>,
    paragraphs: HashMap<usize, ParagraphEntry>,
    // Paragraph indices in registration order
    order: Vec<usize>,
    total_duration_ms: f64,
}

impl RegistryState {
    fn new() -> Self {
        RegistryState {
            session: new_session_id(),
            chunks: HashMap::new(),
            paragraphs: HashMap::new(),
            order: Vec::new(),
            total_duration_ms: 0.0,
        }
    }

    fn ordered_chunk_ids(&self) -> impl Iterator<Item = &ChunkId> {
        let paragraphs = &self.paragraphs;
        self.order
            .iter()
            .filter_map(move |p| paragraphs.get(p))
            .flat_map(|p| p.chunk_ids.iter())
    }
}

/// Session-scoped audio chunk registry
pub struct AudioRegistry {
    config: CacheConfig,
    state: RwLock<RegistryState>,
    hot: Mutex<HotTier>,
    warm: Option<WarmTier>,
    cold: Option<Arc<dyn ColdFallback>>,
    tier_guard: tokio::sync::Mutex<()>,
    metrics: RegistryMetrics,
    prometheus: Option<TierPrometheusMetrics>,
}

impl AudioRegistry {
    /// Create a registry, building the warm store described by `config`
    ///
    /// If the warm tier directory cannot be created the registry runs with
    /// the hot tier and cold fallback only.
    pub async fn new(config: CacheConfig, cold: Option<Arc<dyn ColdFallback>>) -> Result<Self> {
        config.validate()?;

        let warm: Option<Arc<dyn WarmStore>> = if !config.enable_warm_tier {
            None
        } else if config.warm_backend == "memory" {
            Some(Arc::new(MemoryWarmStore::new()))
        } else {
            match FileWarmStore::new(&config.warm_dir).await {
                Ok(store) => Some(Arc::new(store)),
                Err(e) => {
                    warn!("Warm tier disabled: {}", e);
                    None
                }
            }
        };

        Self::with_stores(config, warm, cold)
    }

    /// Create a registry over explicitly provided stores
    pub fn with_stores(
        config: CacheConfig,
        warm: Option<Arc<dyn WarmStore>>,
        cold: Option<Arc<dyn ColdFallback>>,
    ) -> Result<Self> {
        config.validate()?;

        let hot = HotTier::new(config.hot_max_bytes, config.sliding_window());
        let warm = warm.map(|store| {
            WarmTier::new(store, config.warm_max_bytes, config.warm_eviction_batch)
        });
        let state = RegistryState::new();

        info!(
            "Audio registry created: session={}, hot={}KB, warm={}, cold fallback={}",
            state.session,
            config.hot_max_bytes / 1024,
            warm.as_ref()
                .map(|w| format!("{}KB", w.max_size() / 1024))
                .unwrap_or_else(|| "disabled".to_string()),
            cold.is_some()
        );

        Ok(AudioRegistry {
            config,
            state: RwLock::new(state),
            hot: Mutex::new(hot),
            warm,
            cold,
            tier_guard: tokio::sync::Mutex::new(()),
            metrics: RegistryMetrics::new(),
            prometheus: None,
        })
    }

    /// Attach Prometheus tier metrics
    pub fn with_prometheus(mut self, metrics: TierPrometheusMetrics) -> Self {
        self.prometheus = Some(metrics);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn session_id(&self) -> String {
        self.state.read().session.clone()
    }

    pub fn total_duration_ms(&self) -> f64 {
        self.state.read().total_duration_ms
    }

    pub fn paragraph_count(&self) -> usize {
        self.state.read().order.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.state.read().chunks.len()
    }

    /// Chunk ids of a registered paragraph, in chunk order
    pub fn paragraph_chunks(&self, paragraph_index: usize) -> Vec<ChunkId> {
        self.state
            .read()
            .paragraphs
            .get(&paragraph_index)
            .map(|p| p.chunk_ids.clone())
            .unwrap_or_default()
    }

    /// Whether the chunk's bytes are currently in the hot tier
    pub fn is_hot(&self, id: &ChunkId) -> bool {
        self.hot.lock().has(id)
    }

    /// Whether the chunk's bytes are currently in the warm tier
    pub fn is_warm(&self, id: &ChunkId) -> bool {
        self.warm.as_ref().is_some_and(|w| w.has(id))
    }

    /// Register a synthesized paragraph as a set of chunks
    ///
    /// Every chunk gets fresh metadata (duration unknown) and its bytes go to
    /// the hot tier. Re-registering a paragraph index replaces the old chunks;
    /// it waits for any in-flight promotion or sweep to finish first, since
    /// the new chunks reuse the old ids.
    /// Start offsets are taken verbatim from the wire metadata; callers that
    /// receive paragraph-relative offsets should rebase them first
    /// (see [`ParagraphAudio::rebased`]).
    pub async fn register_paragraph(
        &self,
        paragraph_index: usize,
        text: &str,
        audio: ParagraphAudio,
        voice_id: &str,
        speed: f32,
    ) -> Result<Vec<ChunkId>> {
        let _tier_guard = self.tier_guard.lock().await;

        let ParagraphAudio {
            audio_chunks,
            chunk_metadata,
        } = audio;

        if audio_chunks.len() != chunk_metadata.len() {
            debug!(
                "Paragraph {} has {} audio chunks but {} metadata entries",
                paragraph_index,
                audio_chunks.len(),
                chunk_metadata.len()
            );
        }

        let chunk_count = audio_chunks.len().max(1);
        let chars_per_chunk = text.chars().count() as f64 / chunk_count as f64;

        let (chunk_ids, replaced) = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let session = state.session.clone();

            let replaced = match state.paragraphs.remove(&paragraph_index) {
                Some(old) => {
                    for id in &old.chunk_ids {
                        state.chunks.remove(id);
                    }
                    old.chunk_ids
                }
                None => {
                    state.order.push(paragraph_index);
                    Vec::new()
                }
            };

            let mut chunk_ids = Vec::with_capacity(audio_chunks.len());
            let mut provisional_end = state.total_duration_ms;
            let mut previous_start = 0.0;
            let mut hot = self.hot.lock();

            for id in &replaced {
                hot.remove(id);
            }

            for (index, bytes) in audio_chunks.into_iter().enumerate() {
                let wire = chunk_metadata
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| WireChunkMetadata::new(index, previous_start));
                previous_start = wire.start_offset_ms;

                let estimate = if wire.duration_ms > 0.0 {
                    wire.duration_ms
                } else if !wire.text.is_empty() {
                    wire.text.chars().count() as f64 * self.config.estimated_ms_per_char
                } else {
                    chars_per_chunk * self.config.estimated_ms_per_char
                };
                provisional_end = provisional_end.max(wire.start_offset_ms + estimate);

                let id = ChunkId::new(session.clone(), paragraph_index, index);
                let metadata = ChunkMetadata::new(id.clone(), &wire, text, bytes.len());
                state.chunks.insert(id.clone(), metadata);
                hot.set(id.clone(), bytes);
                chunk_ids.push(id);
            }

            state.paragraphs.insert(
                paragraph_index,
                ParagraphEntry {
                    chunk_ids: chunk_ids.clone(),
                    text: text.to_string(),
                    voice_id: voice_id.to_string(),
                    speed,
                },
            );
            state.total_duration_ms = provisional_end;

            (chunk_ids, replaced)
        };

        if let Some(warm) = &self.warm {
            for id in &replaced {
                warm.remove(id).await;
            }
        }

        info!(
            "Registered paragraph {} with {} chunks{}",
            paragraph_index,
            chunk_ids.len(),
            if replaced.is_empty() { "" } else { " (replaced)" }
        );

        Ok(chunk_ids)
    }

    /// Register the parts of one parsed response stream as a paragraph
    pub async fn register_parsed_stream(
        &self,
        paragraph_index: usize,
        text: &str,
        parts: Vec<StreamPart>,
        voice_id: &str,
        speed: f32,
    ) -> Result<Vec<ChunkId>> {
        let audio = paragraph_audio_from_parts(parts);
        self.register_paragraph(paragraph_index, text, audio, voice_id, speed)
            .await
    }

    /// Metadata for a registered chunk; no side effects
    pub fn get_metadata(&self, id: &ChunkId) -> Option<ChunkMetadata> {
        self.state.read().chunks.get(id).cloned()
    }

    /// Fetch a chunk's bytes through hot -> warm -> cold
    ///
    /// # Errors
    /// * [`ChunkCacheError::UnregisteredChunk`] if `id` was never registered
    /// * [`ChunkCacheError::ChunkUnavailable`] if no tier could produce it
    pub async fn get_chunk(&self, id: &ChunkId) -> Result<Bytes> {
        let started = Instant::now();

        let context = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let metadata = state
                .chunks
                .get_mut(id)
                .ok_or_else(|| ChunkCacheError::UnregisteredChunk(id.to_string()))?;
            metadata.record_access();
            state
                .paragraphs
                .get(&id.paragraph)
                .map(|p| (p.text.clone(), p.voice_id.clone(), p.speed))
        };

        let hot_hit = self.hot.lock().get(id);
        if let Some(data) = hot_hit {
            self.finish_read(id, StorageLocation::Hot, &data, started);
            return Ok(data);
        }

        let _tier_guard = self.tier_guard.lock().await;

        // Another caller may have promoted it while we waited
        let hot_hit = self.hot.lock().get(id);
        if let Some(data) = hot_hit {
            self.finish_read(id, StorageLocation::Hot, &data, started);
            return Ok(data);
        }

        if let Some(warm) = &self.warm {
            if let Some(data) = warm.get(id).await {
                self.promote(id, data.clone());
                self.finish_read(id, StorageLocation::Warm, &data, started);
                return Ok(data);
            }
        }

        if let Some(data) = self.reconstruct_from_cold(id, context).await {
            self.promote(id, data.clone());
            self.finish_read(id, StorageLocation::Cold, &data, started);
            return Ok(data);
        }

        self.metrics.record_miss();
        if let Some(prometheus) = &self.prometheus {
            prometheus.record_lookup("miss", started.elapsed());
        }
        debug!("Chunk unavailable in every tier: {}", id);
        Err(ChunkCacheError::ChunkUnavailable(id.to_string()))
    }

    async fn reconstruct_from_cold(
        &self,
        id: &ChunkId,
        context: Option<(String, String, f32)>,
    ) -> Option<Bytes> {
        let cold = self.cold.as_ref()?;
        let (text, voice_id, speed) = context?;

        let previous = self.set_location(id, StorageLocation::ColdToHot);
        let data = cold
            .lookup(&text, &voice_id, speed)
            .await
            .and_then(|paragraph| paragraph.audio_chunks.get(id.chunk).cloned());

        match &data {
            Some(bytes) => debug!("Rebuilt {} from cold fallback ({} bytes)", id, bytes.len()),
            None => {
                if let Some(previous) = previous {
                    self.set_location(id, previous);
                }
                debug!("Cold fallback has no audio for {}", id);
            }
        }

        data
    }

    fn set_location(&self, id: &ChunkId, location: StorageLocation) -> Option<StorageLocation> {
        let mut state = self.state.write();
        let metadata = state.chunks.get_mut(id)?;
        Some(std::mem::replace(&mut metadata.storage_location, location))
    }

    fn promote(&self, id: &ChunkId, data: Bytes) {
        // Skip chunks that were dropped (e.g. by clear) while we were fetching
        if !self.state.read().chunks.contains_key(id) {
            return;
        }
        self.hot.lock().set(id.clone(), data);
        self.metrics.record_promotion();
        debug!("Promoted to hot tier: {}", id);
    }

    fn finish_read(&self, id: &ChunkId, location: StorageLocation, data: &Bytes, started: Instant) {
        if let Some(metadata) = self.state.write().chunks.get_mut(id) {
            metadata.storage_location = location;
            metadata.size_bytes = data.len();
        }
        self.metrics.record_hit(location, data.len());
        if let Some(prometheus) = &self.prometheus {
            prometheus.record_lookup(location.as_str(), started.elapsed());
        }
        debug!("Chunk {} served from {} tier", id, location);
    }

    /// Resolve an absolute session time to a chunk and local offset
    ///
    /// The time is clamped to `[0, total_duration_ms]`. Only chunks with a
    /// known duration can match, except that time 0 resolves to the first
    /// chunk even before any duration is known.
    pub fn find_chunk_at_time(&self, absolute_ms: f64) -> Option<ChunkPosition> {
        let state = self.state.read();
        let requested = if absolute_ms.is_nan() { 0.0 } else { absolute_ms };
        let clamped = requested.clamp(0.0, state.total_duration_ms.max(0.0));

        for id in state.ordered_chunk_ids() {
            if let Some(metadata) = state.chunks.get(id) {
                if metadata.contains_time(clamped) {
                    return Some(ChunkPosition {
                        chunk_id: id.clone(),
                        local_offset_ms: clamped - metadata.start_offset_ms,
                    });
                }
            }
        }

        if clamped == 0.0 {
            return state.ordered_chunk_ids().next().map(|id| ChunkPosition {
                chunk_id: id.clone(),
                local_offset_ms: 0.0,
            });
        }

        None
    }

    /// Up to `count` chunks following `from`, crossing paragraph boundaries
    pub fn get_next_chunks(&self, from: &ChunkId, count: usize) -> Result<Vec<ChunkId>> {
        let state = self.state.read();
        if !state.chunks.contains_key(from) {
            return Err(ChunkCacheError::UnregisteredChunk(from.to_string()));
        }

        let mut next = Vec::with_capacity(count);

        if let Some(paragraph) = state.paragraphs.get(&from.paragraph) {
            next.extend(
                paragraph
                    .chunk_ids
                    .iter()
                    .filter(|id| id.chunk > from.chunk)
                    .take(count)
                    .cloned(),
            );
        }

        let position = state.order.iter().position(|p| *p == from.paragraph);
        if let Some(position) = position {
            for paragraph_index in &state.order[position + 1..] {
                if next.len() >= count {
                    break;
                }
                if let Some(paragraph) = state.paragraphs.get(paragraph_index) {
                    let remaining = count - next.len();
                    next.extend(paragraph.chunk_ids.iter().take(remaining).cloned());
                }
            }
        }

        Ok(next)
    }

    /// Record a chunk's true duration and recompute the session total
    ///
    /// The total becomes the largest end offset among chunks with a known
    /// duration, since durations resolve out of order during playback.
    pub fn update_chunk_duration(&self, id: &ChunkId, duration_ms: f64) -> Result<()> {
        let mut state = self.state.write();

        let metadata = state
            .chunks
            .get_mut(id)
            .ok_or_else(|| ChunkCacheError::UnregisteredChunk(id.to_string()))?;

        if !duration_ms.is_finite() || duration_ms <= 0.0 {
            warn!("Ignoring invalid duration {} for {}", duration_ms, id);
            return Ok(());
        }
        metadata.set_duration(duration_ms);

        state.total_duration_ms = state
            .chunks
            .values()
            .filter(|m| m.has_known_duration())
            .map(|m| m.end_offset_ms())
            .fold(0.0, f64::max);

        debug!(
            "Duration of {} set to {:.0}ms, total now {:.0}ms",
            id, duration_ms, state.total_duration_ms
        );
        Ok(())
    }

    /// Run the eviction sweep relative to the playing chunk
    ///
    /// Hot tier candidates (outside the sliding window) move to the warm
    /// tier until the hot tier is within budget; then the warm tier discards
    /// its least recently used chunks until it is within budget. Discarded
    /// chunks can only come back through the cold fallback.
    pub async fn manage_tiers(&self, current: Option<&ChunkId>) -> TierReport {
        let _tier_guard = self.tier_guard.lock().await;
        let mut report = TierReport::default();

        loop {
            let victims: Vec<(ChunkId, Bytes)> = {
                let mut hot = self.hot.lock();
                if !hot.should_evict() {
                    break;
                }
                let candidates =
                    hot.select_eviction_candidates(current, self.config.hot_eviction_batch);
                if candidates.is_empty() {
                    debug!("Hot tier over budget but every entry is protected");
                    break;
                }

                let mut victims = Vec::with_capacity(candidates.len());
                for id in candidates {
                    if !hot.should_evict() {
                        break;
                    }
                    if let Some(data) = hot.remove(&id) {
                        victims.push((id, data));
                    }
                }
                victims
            };

            for (id, data) in victims {
                report.hot_bytes_freed += data.len();
                let demoted = match &self.warm {
                    Some(warm) => warm.set(&id, data).await,
                    None => false,
                };
                if demoted {
                    report.demoted_to_warm += 1;
                    debug!("Demoted to warm tier: {}", id);
                } else {
                    report.dropped_from_hot += 1;
                    debug!("Dropped from hot tier: {}", id);
                }
            }
        }

        if let Some(warm) = &self.warm {
            if warm.should_evict() {
                let excess = warm.current_size().saturating_sub(warm.max_size());
                let before = warm.len();
                report.warm_bytes_freed = warm.evict_to_size(excess).await;
                report.discarded_from_warm = before.saturating_sub(warm.len());
            }
            self.metrics.set_warm_store_errors(warm.store_errors());
        }

        let hot_evictions = (report.demoted_to_warm + report.dropped_from_hot) as u64;
        self.metrics.record_hot_demotions(hot_evictions);
        self.metrics
            .record_warm_discards(report.discarded_from_warm as u64);
        if let Some(prometheus) = &self.prometheus {
            prometheus.record_evictions("hot", hot_evictions);
            prometheus.record_evictions("warm", report.discarded_from_warm as u64);
        }

        if !report.is_empty() {
            info!(
                "Tier sweep: {} demoted, {} dropped from hot, {} discarded from warm",
                report.demoted_to_warm, report.dropped_from_hot, report.discarded_from_warm
            );
        }

        report
    }

    /// Drop every chunk and start a new session
    pub async fn clear(&self) {
        let _tier_guard = self.tier_guard.lock().await;

        let previous = {
            let mut state = self.state.write();
            std::mem::replace(&mut *state, RegistryState::new())
        };
        self.hot.lock().clear();
        if let Some(warm) = &self.warm {
            warm.clear().await;
        }

        info!(
            "Registry cleared: session {} -> {} ({} chunks dropped)",
            previous.session,
            self.session_id(),
            previous.chunks.len()
        );
    }

    pub fn stats(&self) -> RegistryStats {
        let (session, paragraphs, chunks, total_duration_ms) = {
            let state = self.state.read();
            (
                state.session.clone(),
                state.order.len(),
                state.chunks.len(),
                state.total_duration_ms,
            )
        };
        let (hot_entries, hot_bytes) = {
            let hot = self.hot.lock();
            (hot.len(), hot.current_size())
        };

        RegistryStats {
            session,
            paragraphs,
            chunks,
            hot_entries,
            hot_bytes,
            warm_entries: self.warm.as_ref().map(|w| w.len()).unwrap_or(0),
            warm_bytes: self.warm.as_ref().map(|w| w.current_size()).unwrap_or(0),
            total_duration_ms,
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.get_stats()
    }
}
