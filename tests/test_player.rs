//! Integration tests for AudioPlayer driving a recording sink

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tts_chunk_cache::audio::encode_silence_wav;
use tts_chunk_cache::{
    AudioPlayer, AudioRegistry, CacheConfig, ChunkCacheError, ChunkId, MemoryWarmStore,
    ParagraphAudio, PlaybackSink, PlayerState, WarmStore, WireChunkMetadata,
};

const VOICE: &str = "af_heart";

#[derive(Default)]
struct SinkLog {
    events: Vec<String>,
    position_ms: f64,
}

/// Sink that records every call; optionally rejects one payload
struct RecordingSink {
    log: Arc<Mutex<SinkLog>>,
    reject: Option<Bytes>,
}

impl RecordingSink {
    fn new() -> (Self, Arc<Mutex<SinkLog>>) {
        let log = Arc::new(Mutex::new(SinkLog::default()));
        (
            RecordingSink {
                log: log.clone(),
                reject: None,
            },
            log,
        )
    }
}

#[async_trait]
impl PlaybackSink for RecordingSink {
    async fn load(&mut self, audio: Bytes, offset_ms: f64) -> tts_chunk_cache::Result<()> {
        if self.reject.as_ref() == Some(&audio) {
            return Err(ChunkCacheError::PlaybackError("decode failed".to_string()));
        }
        let mut log = self.log.lock();
        log.events.push(format!("load@{}", offset_ms));
        log.position_ms = offset_ms;
        Ok(())
    }

    fn play(&mut self) -> tts_chunk_cache::Result<()> {
        self.log.lock().events.push("play".to_string());
        Ok(())
    }

    fn pause(&mut self) {
        self.log.lock().events.push("pause".to_string());
    }

    fn resume(&mut self) -> tts_chunk_cache::Result<()> {
        self.log.lock().events.push("resume".to_string());
        Ok(())
    }

    fn stop(&mut self) {
        self.log.lock().position_ms = 0.0;
    }

    fn seek(&mut self, local_ms: f64) -> tts_chunk_cache::Result<()> {
        let mut log = self.log.lock();
        log.events.push(format!("seek@{}", local_ms));
        log.position_ms = local_ms;
        Ok(())
    }

    fn position_ms(&self) -> f64 {
        self.log.lock().position_ms
    }

    fn duration_ms(&self) -> Option<f64> {
        None
    }
}

fn wav(duration_ms: u32) -> Bytes {
    encode_silence_wav(duration_ms, 8_000).unwrap()
}

/// Paragraph 0: 400ms + 500ms, paragraph 1: 600ms
async fn session(config: CacheConfig) -> (Arc<AudioRegistry>, Vec<ChunkId>) {
    let warm: Arc<dyn WarmStore> = Arc::new(MemoryWarmStore::new());
    let registry = Arc::new(AudioRegistry::with_stores(config, Some(warm), None).unwrap());

    let mut ids = registry
        .register_paragraph(
            0,
            "First paragraph.",
            ParagraphAudio::new(
                vec![wav(400), wav(500)],
                vec![WireChunkMetadata::new(0, 0.0), WireChunkMetadata::new(1, 400.0)],
            ),
            VOICE,
            1.0,
        )
        .await
        .unwrap();
    ids.extend(
        registry
            .register_paragraph(
                1,
                "Second paragraph.",
                ParagraphAudio::new(vec![wav(600)], vec![WireChunkMetadata::new(0, 900.0)]),
                VOICE,
                1.0,
            )
            .await
            .unwrap(),
    );

    (registry, ids)
}

fn roomy() -> CacheConfig {
    CacheConfig::in_memory(10 * 1024 * 1024, 10 * 1024 * 1024)
}

#[tokio::test]
async fn test_play_chunk_discovers_duration() {
    let (registry, ids) = session(roomy()).await;
    let (sink, log) = RecordingSink::new();
    let mut player = AudioPlayer::new(registry.clone(), Box::new(sink));

    assert_eq!(player.state(), PlayerState::Idle);
    player.play_chunk(&ids[0], 0.0).await.unwrap();

    assert_eq!(player.state(), PlayerState::Playing);
    assert_eq!(player.current_chunk(), Some(&ids[0]));
    assert_eq!(log.lock().events, vec!["load@0", "play"]);

    let meta = registry.get_metadata(&ids[0]).unwrap();
    assert_eq!(meta.duration_ms(), 400.0);
    assert_eq!(registry.total_duration_ms(), 400.0);

    let report = player.wait_for_tier_sweep().await.unwrap();
    assert!(report.is_empty());
}

#[tokio::test]
async fn test_continuous_playback_crosses_paragraphs() {
    let (registry, ids) = session(roomy()).await;
    let (sink, _log) = RecordingSink::new();
    let mut player = AudioPlayer::new(registry.clone(), Box::new(sink));

    player.play_chunk(&ids[0], 0.0).await.unwrap();
    player.on_chunk_ended().await.unwrap();
    assert_eq!(player.current_chunk(), Some(&ids[1]));

    player.on_chunk_ended().await.unwrap();
    assert_eq!(player.current_chunk(), Some(&ids[2]));
    assert_eq!(player.state(), PlayerState::Playing);

    player.on_chunk_ended().await.unwrap();
    assert_eq!(player.state(), PlayerState::Idle);
    assert!(player.current_chunk().is_none());

    // Every chunk has been played once, so the total is now exact
    assert_eq!(registry.total_duration_ms(), 1500.0);
}

#[tokio::test]
async fn test_non_continuous_stops_at_paragraph_end() {
    let (registry, ids) = session(roomy()).await;
    let (sink, _log) = RecordingSink::new();
    let mut player = AudioPlayer::new(registry, Box::new(sink));
    player.set_continuous(false);

    player.play_chunk(&ids[0], 0.0).await.unwrap();
    player.on_chunk_ended().await.unwrap();
    assert_eq!(player.current_chunk(), Some(&ids[1]));

    player.on_chunk_ended().await.unwrap();
    assert_eq!(player.state(), PlayerState::Idle);
}

#[tokio::test]
async fn test_unavailable_chunk_is_skipped() {
    let total_size = wav(400).len() + wav(500).len() + wav(600).len();
    let config = CacheConfig {
        enable_warm_tier: false,
        window_before: 0,
        window_ahead: 0,
        paragraph_protection: 0,
        ..CacheConfig::in_memory(total_size - wav(400).len(), 0)
    };
    let registry = Arc::new(AudioRegistry::with_stores(config, None, None).unwrap());
    let ids = registry
        .register_paragraph(
            0,
            "Only paragraph.",
            ParagraphAudio::new(
                vec![wav(400), wav(500), wav(600)],
                vec![
                    WireChunkMetadata::new(0, 0.0),
                    WireChunkMetadata::new(1, 400.0),
                    WireChunkMetadata::new(2, 900.0),
                ],
            ),
            VOICE,
            1.0,
        )
        .await
        .unwrap();

    // Drop the first chunk with nowhere to go
    let report = registry.manage_tiers(Some(&ids[2])).await;
    assert_eq!(report.dropped_from_hot, 1);

    let (sink, _log) = RecordingSink::new();
    let mut player = AudioPlayer::new(registry, Box::new(sink));
    player.play_chunk(&ids[0], 0.0).await.unwrap();

    assert_eq!(player.skipped_chunks(), 1);
    assert_eq!(player.current_chunk(), Some(&ids[1]));
    assert_eq!(player.state(), PlayerState::Playing);
}

#[tokio::test]
async fn test_rejected_load_skips_to_next_chunk() {
    let (registry, ids) = session(roomy()).await;
    let (mut sink, _log) = RecordingSink::new();
    sink.reject = Some(wav(500));
    let mut player = AudioPlayer::new(registry, Box::new(sink));

    player.play_chunk(&ids[0], 0.0).await.unwrap();
    player.on_chunk_ended().await.unwrap();

    assert_eq!(player.current_chunk(), Some(&ids[2]));
    assert_eq!(player.skipped_chunks(), 1);
}

#[tokio::test]
async fn test_last_chunk_failing_finishes_session() {
    let (registry, ids) = session(roomy()).await;
    let (mut sink, _log) = RecordingSink::new();
    sink.reject = Some(wav(600));
    let mut player = AudioPlayer::new(registry, Box::new(sink));

    player.play_chunk(&ids[2], 0.0).await.unwrap();
    assert_eq!(player.state(), PlayerState::Idle);
    assert!(player.current_chunk().is_none());
}

#[tokio::test]
async fn test_playback_error_advances() {
    let (registry, ids) = session(roomy()).await;
    let (sink, _log) = RecordingSink::new();
    let mut player = AudioPlayer::new(registry, Box::new(sink));

    player.play_chunk(&ids[1], 0.0).await.unwrap();
    player
        .on_playback_error(ChunkCacheError::PlaybackError("device lost".to_string()))
        .await
        .unwrap();

    assert_eq!(player.current_chunk(), Some(&ids[2]));
    assert_eq!(player.skipped_chunks(), 1);
}

#[tokio::test]
async fn test_unregistered_chunk_is_an_error() {
    let (registry, _ids) = session(roomy()).await;
    let (sink, _log) = RecordingSink::new();
    let mut player = AudioPlayer::new(registry, Box::new(sink));

    let result = player.play_chunk(&ChunkId::new("stale", 0, 0), 0.0).await;
    assert!(matches!(result, Err(ChunkCacheError::UnregisteredChunk(_))));
    assert_eq!(player.state(), PlayerState::Idle);
}

#[tokio::test]
async fn test_pause_and_resume() {
    let (registry, ids) = session(roomy()).await;
    let (sink, log) = RecordingSink::new();
    let mut player = AudioPlayer::new(registry, Box::new(sink));

    // Nothing to pause yet
    player.pause();
    assert_eq!(player.state(), PlayerState::Idle);

    player.play_chunk(&ids[0], 0.0).await.unwrap();
    player.pause();
    assert_eq!(player.state(), PlayerState::Paused);
    player.resume().unwrap();
    assert_eq!(player.state(), PlayerState::Playing);

    assert_eq!(log.lock().events, vec!["load@0", "play", "pause", "resume"]);

    player.stop();
    assert_eq!(player.state(), PlayerState::Idle);
    assert!(player.current_chunk().is_none());
}

#[tokio::test]
async fn test_seek_to_time() {
    let (registry, ids) = session(roomy()).await;
    for (id, duration) in ids.iter().zip([400.0, 500.0, 600.0]) {
        registry.update_chunk_duration(id, duration).unwrap();
    }
    let (sink, log) = RecordingSink::new();
    let mut player = AudioPlayer::new(registry, Box::new(sink));
    player.play_chunk(&ids[0], 0.0).await.unwrap();

    // Same chunk: seek inside the loaded audio
    assert!(player.seek_to_time(100.0).await.unwrap());
    assert_eq!(player.current_chunk(), Some(&ids[0]));
    assert_eq!(log.lock().events.last().unwrap(), "seek@100");

    // Other chunk: load it at the local offset
    assert!(player.seek_to_time(1000.0).await.unwrap());
    assert_eq!(player.current_chunk(), Some(&ids[2]));
    let events = log.lock().events.clone();
    assert_eq!(events[events.len() - 2], "load@100");
    assert_eq!(player.progress().position_ms, 1000.0);
}

#[tokio::test]
async fn test_relative_seek_clamps() {
    let (registry, ids) = session(roomy()).await;
    for (id, duration) in ids.iter().zip([400.0, 500.0, 600.0]) {
        registry.update_chunk_duration(id, duration).unwrap();
    }
    let (sink, _log) = RecordingSink::new();
    let mut player = AudioPlayer::new(registry, Box::new(sink));
    player.play_chunk(&ids[2], 100.0).await.unwrap();
    assert_eq!(player.current_position_ms(), 1000.0);

    assert!(player.seek(-0.5).await.unwrap());
    assert_eq!(player.current_chunk(), Some(&ids[1]));
    assert_eq!(player.current_position_ms(), 500.0);

    assert!(player.seek(-10.0).await.unwrap());
    assert_eq!(player.current_chunk(), Some(&ids[0]));
    assert_eq!(player.current_position_ms(), 0.0);

    // Seeking past the end finishes the session
    assert!(player.seek(100.0).await.unwrap());
    assert_eq!(player.current_chunk(), None);
    assert_eq!(player.state(), PlayerState::Idle);
}

#[tokio::test]
async fn test_seek_to_exact_end_finishes() {
    let (registry, ids) = session(roomy()).await;
    for (id, duration) in ids.iter().zip([400.0, 500.0, 600.0]) {
        registry.update_chunk_duration(id, duration).unwrap();
    }
    let (sink, _log) = RecordingSink::new();
    let mut player = AudioPlayer::new(registry, Box::new(sink));
    player.play_chunk(&ids[2], 100.0).await.unwrap();

    // 1000ms + 500ms lands exactly on the session end
    assert!(player.seek(0.5).await.unwrap());
    assert_eq!(player.state(), PlayerState::Idle);
    assert_eq!(player.current_chunk(), None);
    assert_eq!(player.progress().position_ms, 0.0);

    // A forward seek that stays inside the session still resolves
    player.play_chunk(&ids[0], 0.0).await.unwrap();
    assert!(player.seek(0.45).await.unwrap());
    assert_eq!(player.current_chunk(), Some(&ids[1]));
}

#[tokio::test]
async fn test_progress_snapshot() {
    let (registry, ids) = session(roomy()).await;
    let (sink, _log) = RecordingSink::new();
    let mut player = AudioPlayer::new(registry, Box::new(sink));

    let idle = player.progress();
    assert_eq!(idle.chunk_id, None);
    assert_eq!(idle.position_ms, 0.0);
    assert_eq!(idle.state, PlayerState::Idle);

    player.play_chunk(&ids[1], 0.0).await.unwrap();
    let progress = player.progress();
    assert_eq!(progress.chunk_id, Some(ids[1].clone()));
    assert_eq!(progress.position_ms, 400.0);
    assert_eq!(progress.total_ms, 900.0);
    assert_eq!(progress.state, PlayerState::Playing);
}

#[tokio::test]
async fn test_tier_sweep_runs_after_chunk_starts() {
    let config = CacheConfig {
        window_before: 0,
        window_ahead: 0,
        paragraph_protection: 0,
        ..CacheConfig::in_memory(wav(600).len(), 10 * 1024 * 1024)
    };
    let (registry, ids) = session(config).await;
    let (sink, _log) = RecordingSink::new();
    let mut player = AudioPlayer::new(registry.clone(), Box::new(sink));

    player.play_chunk(&ids[2], 0.0).await.unwrap();
    let report = player.wait_for_tier_sweep().await.unwrap();

    assert_eq!(report.demoted_to_warm, 2);
    assert!(registry.is_hot(&ids[2]));
    assert!(registry.is_warm(&ids[0]));
    assert!(registry.is_warm(&ids[1]));

    // Going back pulls the chunk up from the warm tier
    player.play_chunk(&ids[0], 0.0).await.unwrap();
    assert_eq!(registry.metrics().warm_hits, 1);
}
