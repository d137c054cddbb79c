//! Multipart wire format of the synthesis response stream
//!
//! Each part is framed as:
//!
//! ```text
//! \r\n--{boundary}\r\n
//! Content-Type: application/json\r\n
//! \r\n
//! {"chunk_index":0,"start_offset_ms":0.0,"phrases":[...]}\r\n
//! ```
//!
//! Audio parts use `Content-Type: audio/wav` and also carry a
//! `Content-Length` header. The stream ends with `\r\n--{boundary}--\r\n`.

use crate::error::{ChunkCacheError, Result};
use crate::models::WireChunkMetadata;
use bytes::{BufMut, Bytes, BytesMut};

/// Boundary token used by the synthesis service
pub const DEFAULT_BOUNDARY: &str = "tts_chunk_boundary";

/// Content type of metadata parts
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Content type of audio parts
pub const CONTENT_TYPE_WAV: &str = "audio/wav";

/// Separator between part headers and body
pub const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";

/// Build the `--{boundary}` marker that opens every part
pub fn boundary_marker(boundary: &str) -> Vec<u8> {
    format!("--{}", boundary).into_bytes()
}

fn part_start(boundary: &str) -> String {
    format!("\r\n--{}\r\n", boundary)
}

/// Encode a metadata part
pub fn encode_metadata_part(boundary: &str, metadata: &WireChunkMetadata) -> Result<Bytes> {
    let json = serde_json::to_string(metadata).map_err(|e| {
        ChunkCacheError::StreamError(format!("Failed to encode chunk metadata: {}", e))
    })?;

    let part = format!(
        "{}Content-Type: {}\r\n\r\n{}\r\n",
        part_start(boundary),
        CONTENT_TYPE_JSON,
        json
    );

    Ok(Bytes::from(part))
}

/// Encode an audio part carrying one self-contained audio container
pub fn encode_audio_part(boundary: &str, audio: &[u8]) -> Bytes {
    let header = format!(
        "{}Content-Type: {}\r\nContent-Length: {}\r\n\r\n",
        part_start(boundary),
        CONTENT_TYPE_WAV,
        audio.len()
    );

    let mut part = BytesMut::with_capacity(header.len() + audio.len());
    part.put_slice(header.as_bytes());
    part.put_slice(audio);
    part.freeze()
}

/// Encode the terminal boundary
pub fn encode_closing_boundary(boundary: &str) -> Bytes {
    Bytes::from(format!("\r\n--{}--\r\n", boundary))
}

/// Encode a whole stream of (metadata, audio) pairs
pub fn encode_stream(boundary: &str, chunks: &[(WireChunkMetadata, Bytes)]) -> Result<Bytes> {
    let mut out = BytesMut::new();
    for (metadata, audio) in chunks {
        out.put(encode_metadata_part(boundary, metadata)?);
        out.put(encode_audio_part(boundary, audio));
    }
    out.put(encode_closing_boundary(boundary));
    Ok(out.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PhraseTiming;

    #[test]
    fn test_encode_metadata_part() {
        let mut metadata = WireChunkMetadata::new(0, 0.0);
        metadata.text = "Hello world".to_string();
        metadata.phrases = vec![PhraseTiming::new("Hello world", 0.0, 850.0)];

        let part = encode_metadata_part(DEFAULT_BOUNDARY, &metadata).unwrap();
        let part_str = String::from_utf8_lossy(&part);

        assert!(part_str.starts_with("\r\n--tts_chunk_boundary\r\n"));
        assert!(part_str.contains("Content-Type: application/json"));
        assert!(part_str.contains("\"chunk_index\":0"));
        assert!(part_str.contains("\"phrases\""));
    }

    #[test]
    fn test_encode_audio_part() {
        let audio = vec![1, 2, 3, 4, 5];
        let part = encode_audio_part(DEFAULT_BOUNDARY, &audio);
        let part_str = String::from_utf8_lossy(&part);

        assert!(part_str.contains("Content-Type: audio/wav"));
        assert!(part_str.contains("Content-Length: 5"));
        assert!(part.ends_with(&audio));
    }

    #[test]
    fn test_encode_closing_boundary() {
        assert_eq!(&encode_closing_boundary("b")[..], b"\r\n--b--\r\n");
    }
}
