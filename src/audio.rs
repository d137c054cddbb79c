//! WAV helpers for chunk payloads

use crate::error::{ChunkCacheError, Result};
use bytes::Bytes;
use std::io::Cursor;

/// Duration of a WAV chunk in milliseconds, read from its header
///
/// Returns `None` when the bytes are not a WAV container hound can read.
pub fn wav_duration_ms(data: &[u8]) -> Option<f64> {
    let reader = hound::WavReader::new(Cursor::new(data)).ok()?;
    let sample_rate = reader.spec().sample_rate;
    if sample_rate == 0 {
        return None;
    }

    // duration() counts frames, i.e. samples per channel
    Some(f64::from(reader.duration()) * 1000.0 / f64::from(sample_rate))
}

/// Encode `duration_ms` of 16-bit mono silence as a WAV chunk
pub fn encode_silence_wav(duration_ms: u32, sample_rate: u32) -> Result<Bytes> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let frames = u64::from(duration_ms) * u64::from(sample_rate) / 1000;

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| ChunkCacheError::StreamError(format!("WAV encode failed: {}", e)))?;
        for _ in 0..frames {
            writer
                .write_sample(0i16)
                .map_err(|e| ChunkCacheError::StreamError(format!("WAV encode failed: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| ChunkCacheError::StreamError(format!("WAV encode failed: {}", e)))?;
    }

    Ok(Bytes::from(cursor.into_inner()))
}
