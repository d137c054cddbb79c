//! Stream replay demo
//!
//! Feeds synthesis response streams through the parser in small fragments,
//! registers them, and plays the session through a logging sink while the
//! tiers shuffle chunks around.
//!
//! # Usage
//! ```bash
//! # Synthetic three-paragraph session
//! tts-chunk-cache
//!
//! # Replay a captured multipart response as paragraph 0
//! tts-chunk-cache capture.bin
//!
//! # With a custom configuration
//! tts-chunk-cache capture.bin tts_chunk_cache.yaml
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::env;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tts_chunk_cache::audio::{encode_silence_wav, wav_duration_ms};
use tts_chunk_cache::stream_parser::{build_phrase_timeline, paragraph_audio_from_parts};
use tts_chunk_cache::wire::encode_stream;
use tts_chunk_cache::{
    parse_stream, AudioPlayer, AudioRegistry, CacheConfig, ParagraphAudio, ParagraphCache,
    PhraseTiming, PlaybackSink, PlayerState, StreamPart, WireChunkMetadata,
};

const FRAGMENT_SIZE: usize = 733;
const SAMPLE_RATE: u32 = 24_000;
const VOICE: &str = "af_heart";

const PARAGRAPHS: &[&str] = &[
    "The quick brown fox jumps over the lazy dog. It was not amused.",
    "Streaming speech arrives in chunks, each one a complete WAV file.",
    "Older chunks spill to disk, and the oldest are rebuilt on demand.",
];

/// Sink that pretends to play and logs what it was asked to do
#[derive(Default)]
struct LoggingSink {
    loaded: Option<(usize, f64)>,
    position_ms: f64,
}

#[async_trait]
impl PlaybackSink for LoggingSink {
    async fn load(&mut self, audio: Bytes, offset_ms: f64) -> tts_chunk_cache::Result<()> {
        let duration = wav_duration_ms(&audio).unwrap_or(0.0);
        info!(
            "sink: load {} bytes ({:.0}ms) at {:.0}ms",
            audio.len(),
            duration,
            offset_ms
        );
        self.loaded = Some((audio.len(), duration));
        self.position_ms = offset_ms;
        Ok(())
    }

    fn play(&mut self) -> tts_chunk_cache::Result<()> {
        info!("sink: play");
        Ok(())
    }

    fn pause(&mut self) {
        info!("sink: pause");
    }

    fn resume(&mut self) -> tts_chunk_cache::Result<()> {
        info!("sink: resume");
        Ok(())
    }

    fn stop(&mut self) {
        self.loaded = None;
        self.position_ms = 0.0;
    }

    fn seek(&mut self, local_ms: f64) -> tts_chunk_cache::Result<()> {
        info!("sink: seek to {:.0}ms", local_ms);
        self.position_ms = local_ms;
        Ok(())
    }

    fn position_ms(&self) -> f64 {
        self.position_ms
    }

    fn duration_ms(&self) -> Option<f64> {
        self.loaded.map(|(_, duration)| duration).filter(|d| *d > 0.0)
    }
}

/// Build a synthetic response stream: one chunk per sentence-ish slice
fn synthesize_paragraph(boundary: &str, text: &str) -> Result<Bytes> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut chunks = Vec::new();
    let mut start_ms = 0.0;

    for (index, slice) in words.chunks(3).enumerate() {
        let chunk_text = slice.join(" ");
        let duration_ms = 180 * chunk_text.len() as u32 / 3;
        let audio = encode_silence_wav(duration_ms, SAMPLE_RATE)?;

        let mut metadata = WireChunkMetadata::new(index, start_ms);
        metadata.phrases = vec![PhraseTiming::new(
            chunk_text.clone(),
            0.0,
            f64::from(duration_ms),
        )];
        metadata.text = chunk_text;
        chunks.push((metadata, audio));
        start_ms += f64::from(duration_ms);
    }

    Ok(encode_stream(boundary, &chunks)?)
}

/// Parse a response stream delivered in small network-sized fragments
async fn parse_fragmented(data: Bytes, boundary: &str) -> Result<Vec<StreamPart>> {
    let fragments: Vec<std::result::Result<Bytes, std::io::Error>> = data
        .chunks(FRAGMENT_SIZE)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    let cancel = CancellationToken::new();

    let parts = parse_stream(futures::stream::iter(fragments), boundary, &cancel)
        .await
        .context("failed to parse response stream")?;
    Ok(parts)
}

fn paragraph_span_ms(audio: &ParagraphAudio) -> f64 {
    audio
        .audio_chunks
        .iter()
        .map(|chunk| wav_duration_ms(chunk).unwrap_or(0.0))
        .sum()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_line_number(true)
        .init();

    let capture_path = env::args().nth(1);
    let warm_dir = tempfile::tempdir().context("failed to create warm tier directory")?;

    let mut config = match env::args().nth(2) {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            CacheConfig::from_file(&path)?
        }
        None => CacheConfig {
            // Small hot tier so the replay exercises demotion
            hot_max_bytes: 96 * 1024,
            warm_max_bytes: 192 * 1024,
            window_before: 1,
            window_ahead: 2,
            paragraph_protection: 0,
            ..Default::default()
        },
    };
    if config.warm_backend == "file" {
        config.warm_dir = warm_dir.path().to_string_lossy().into_owned();
    }
    info!("  - Hot tier: {} KB", config.hot_max_bytes / 1024);
    info!("  - Warm tier: {} KB ({})", config.warm_max_bytes / 1024, config.warm_backend);
    info!("  - Boundary: {}", config.boundary);

    let cold = Arc::new(ParagraphCache::new(config.cold_max_paragraphs));
    let boundary = config.boundary.clone();
    let registry = Arc::new(AudioRegistry::new(config, Some(cold.clone())).await?);

    let sources: Vec<(String, Bytes)> = match &capture_path {
        Some(path) => {
            let data = tokio::fs::read(path)
                .await
                .with_context(|| format!("failed to read capture {}", path))?;
            vec![(String::new(), Bytes::from(data))]
        }
        None => PARAGRAPHS
            .iter()
            .map(|text| Ok((text.to_string(), synthesize_paragraph(&boundary, text)?)))
            .collect::<Result<_>>()?,
    };

    let mut session_offset_ms = 0.0;
    for (paragraph_index, (text, data)) in sources.into_iter().enumerate() {
        let parts = parse_fragmented(data, &boundary).await?;
        let metadata: Vec<WireChunkMetadata> =
            parts.iter().filter_map(|p| p.as_metadata().cloned()).collect();
        for phrase in build_phrase_timeline(&metadata) {
            info!("  phrase {:>6.0}..{:<6.0} {}", phrase.start_ms, phrase.end_ms, phrase.text);
        }

        let text = if text.is_empty() {
            metadata
                .iter()
                .map(|m| m.text.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        } else {
            text
        };

        let audio = paragraph_audio_from_parts(parts);
        let span_ms = paragraph_span_ms(&audio);
        cold.store(&text, VOICE, 1.0, audio.clone());

        registry
            .register_paragraph(
                paragraph_index,
                &text,
                audio.rebased(session_offset_ms),
                VOICE,
                1.0,
            )
            .await?;
        session_offset_ms += span_ms;
    }

    let Some(first) = registry.find_chunk_at_time(0.0) else {
        warn!("Nothing to play");
        return Ok(());
    };

    let mut player = AudioPlayer::new(registry.clone(), Box::new(LoggingSink::default()));
    player.play_chunk(&first.chunk_id, 0.0).await?;

    while player.state() == PlayerState::Playing {
        if let Some(report) = player.wait_for_tier_sweep().await {
            if !report.is_empty() {
                info!("  tier sweep: {:?}", report);
            }
        }
        let progress = player.progress();
        info!(
            "  at {:.0}ms / {:.0}ms ({})",
            progress.position_ms, progress.total_ms, progress.state
        );
        player.on_chunk_ended().await?;
    }

    // Jump back to the start: early chunks now come from the warm tier
    if player.seek_to_time(0.0).await? {
        player.stop();
    }

    let stats = registry.stats();
    let metrics = registry.metrics();
    info!("Session {} finished", stats.session);
    info!("  - Paragraphs: {}, chunks: {}", stats.paragraphs, stats.chunks);
    info!("  - Total duration: {:.0}ms", stats.total_duration_ms);
    info!("  - Hot: {} entries / {} KB", stats.hot_entries, stats.hot_bytes / 1024);
    info!("  - Warm: {} entries / {} KB", stats.warm_entries, stats.warm_bytes / 1024);
    info!(
        "  - Hits: hot={} warm={} cold={} misses={} (hot rate {:.1}%)",
        metrics.hot_hits,
        metrics.warm_hits,
        metrics.cold_hits,
        metrics.misses,
        metrics.hot_hit_rate() * 100.0
    );
    info!(
        "  - Demotions: {}, discards: {}, promotions: {}",
        metrics.hot_demotions, metrics.warm_discards, metrics.promotions
    );

    Ok(())
}
