//! Incremental parser for the multipart synthesis response stream
//!
//! The parser is a byte-oriented state machine: fragments are appended to an
//! accumulating buffer and complete parts are extracted one at a time. A
//! boundary, header block or body that is split across fragments is never an
//! error; extraction simply waits for more data.
//!
//! Malformed JSON metadata parts are dropped and parsing continues. This
//! mirrors the behaviour of the existing client and is kept as observable
//! behaviour, but it hides producer bugs; `dropped_parts()` exposes the count
//! so callers can surface it.

use crate::error::{ChunkCacheError, Result};
use crate::models::{ParagraphAudio, TimedPhrase, WireChunkMetadata};
use crate::wire::{boundary_marker, CONTENT_TYPE_JSON, HEADER_SEPARATOR};
use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One decoded part of the response stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamPart {
    Metadata(WireChunkMetadata),
    Audio(Bytes),
    Unknown { content_type: String, body: Bytes },
}

impl StreamPart {
    pub fn as_metadata(&self) -> Option<&WireChunkMetadata> {
        match self {
            StreamPart::Metadata(m) => Some(m),
            _ => None,
        }
    }
}

/// Outcome of one extraction attempt
enum Extract {
    /// A part was consumed; `None` when it was dropped
    Part(Option<StreamPart>),
    NeedMore,
    End,
}

#[derive(Default)]
struct PartHeaders {
    content_type: String,
    content_length: Option<usize>,
}

fn parse_headers(raw: &[u8]) -> PartHeaders {
    let text = String::from_utf8_lossy(raw);
    let mut headers = PartHeaders::default();

    for line in text.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name.eq_ignore_ascii_case("content-type") {
            headers.content_type = value.trim().to_string();
        } else if name.eq_ignore_ascii_case("content-length") {
            headers.content_length = value.trim().parse().ok();
        }
    }

    headers
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Search `haystack` from `from` onwards, returning an absolute offset
fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    let from = from.min(haystack.len());
    find(&haystack[from..], needle).map(|pos| from + pos)
}

/// Incremental multipart parser
pub struct StreamParser {
    marker: Vec<u8>,
    buffer: BytesMut,
    finished: bool,
    dropped_parts: u64,
    // Resume points for marker searches that ran out of data; reset whenever
    // the buffer is advanced
    marker_scan: usize,
    body_scan: usize,
}

impl StreamParser {
    /// Create a parser for the given boundary token (without the leading `--`)
    pub fn new(boundary: &str) -> Self {
        StreamParser {
            marker: boundary_marker(boundary),
            buffer: BytesMut::new(),
            finished: false,
            dropped_parts: 0,
            marker_scan: 0,
            body_scan: 0,
        }
    }

    /// Whether the closing boundary was seen or the source was exhausted
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of parts dropped because their JSON did not parse or their
    /// headers were unusable
    pub fn dropped_parts(&self) -> u64 {
        self.dropped_parts
    }

    /// Bytes buffered but not yet consumed
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Append a fragment and return every part it completes
    pub fn push(&mut self, fragment: &[u8]) -> Vec<StreamPart> {
        if self.finished {
            debug!("Ignoring {} bytes after end of stream", fragment.len());
            return Vec::new();
        }

        self.buffer.extend_from_slice(fragment);

        let mut parts = Vec::new();
        loop {
            match self.try_extract() {
                Extract::Part(Some(part)) => parts.push(part),
                Extract::Part(None) => continue,
                Extract::NeedMore => break,
                Extract::End => {
                    debug!("Closing boundary reached");
                    self.finished = true;
                    self.clear_buffer();
                    break;
                }
            }
        }
        parts
    }

    /// Mark the source as exhausted; any incomplete tail is discarded
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        if !self.buffer.is_empty() {
            warn!(
                "Stream ended without closing boundary, discarding {} buffered bytes",
                self.buffer.len()
            );
            self.clear_buffer();
        }
        self.finished = true;
    }

    fn clear_buffer(&mut self) {
        self.buffer.clear();
        self.marker_scan = 0;
        self.body_scan = 0;
    }

    fn consume(&mut self, len: usize) {
        self.buffer.advance(len);
        self.marker_scan = 0;
        self.body_scan = 0;
    }

    /// Offset from which a marker search that found nothing may resume
    fn resume_point(&self, floor: usize) -> usize {
        self.buffer
            .len()
            .saturating_sub(self.marker.len().saturating_sub(1))
            .max(floor)
    }

    fn try_extract(&mut self) -> Extract {
        let Some(start) = find_from(&self.buffer, &self.marker, self.marker_scan) else {
            self.marker_scan = self.resume_point(0);
            return Extract::NeedMore;
        };

        // Two bytes after the marker decide between a part and the terminator
        let after = start + self.marker.len();
        if self.buffer.len() < after + 2 {
            return Extract::NeedMore;
        }
        if &self.buffer[after..after + 2] == b"--" {
            return Extract::End;
        }

        let Some(sep) = find(&self.buffer[after..], HEADER_SEPARATOR) else {
            return Extract::NeedMore;
        };
        let header_end = after + sep;
        let body_start = header_end + HEADER_SEPARATOR.len();
        let headers = parse_headers(&self.buffer[after..header_end]);

        let (body_end, consumed) = match headers.content_length {
            Some(len) => {
                let Some(body_end) = body_start.checked_add(len) else {
                    self.dropped_parts += 1;
                    warn!(
                        "Dropping part with unusable Content-Length {} ('{}')",
                        len, headers.content_type
                    );
                    self.consume(body_start);
                    return Extract::Part(None);
                };
                if self.buffer.len() < body_end {
                    return Extract::NeedMore;
                }
                (body_end, body_end)
            }
            None => {
                let from = self.body_scan.max(body_start);
                let Some(next_marker) = find_from(&self.buffer, &self.marker, from) else {
                    self.body_scan = self.resume_point(body_start);
                    return Extract::NeedMore;
                };
                let mut end = next_marker;
                if end >= body_start + 2 && &self.buffer[end - 2..end] == b"\r\n" {
                    end -= 2;
                }
                (end, next_marker)
            }
        };

        let body = Bytes::copy_from_slice(&self.buffer[body_start..body_end]);
        self.consume(consumed);

        Extract::Part(self.dispatch(headers.content_type, body))
    }

    fn dispatch(&mut self, content_type: String, body: Bytes) -> Option<StreamPart> {
        let lowered = content_type.to_ascii_lowercase();

        if lowered.starts_with(CONTENT_TYPE_JSON) {
            match serde_json::from_slice::<WireChunkMetadata>(&body) {
                Ok(metadata) => {
                    debug!(
                        "Parsed metadata part: chunk {} at {}ms ({} phrases)",
                        metadata.chunk_index,
                        metadata.start_offset_ms,
                        metadata.phrases.len()
                    );
                    Some(StreamPart::Metadata(metadata))
                }
                Err(e) => {
                    self.dropped_parts += 1;
                    warn!("Dropping malformed metadata part ({} bytes): {}", body.len(), e);
                    None
                }
            }
        } else if lowered.starts_with("audio/") {
            debug!("Parsed audio part ({} bytes)", body.len());
            Some(StreamPart::Audio(body))
        } else {
            debug!("Parsed part with unknown content type '{}'", content_type);
            Some(StreamPart::Unknown { content_type, body })
        }
    }
}

/// Drive a byte stream through the parser, handing each part to `on_part`
///
/// Returns the number of dropped metadata parts. Cancelling `cancel` aborts
/// the read loop with [`ChunkCacheError::Cancelled`]; a source error becomes
/// [`ChunkCacheError::StreamError`].
pub async fn parse_stream_with<S, E, F>(
    mut source: S,
    boundary: &str,
    cancel: &CancellationToken,
    mut on_part: F,
) -> Result<u64>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
    F: FnMut(StreamPart),
{
    let mut parser = StreamParser::new(boundary);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Stream read cancelled with {} bytes buffered", parser.buffered_len());
                return Err(ChunkCacheError::Cancelled);
            }
            next = source.next() => next,
        };

        match next {
            Some(Ok(fragment)) => {
                for part in parser.push(&fragment) {
                    on_part(part);
                }
                if parser.is_finished() {
                    break;
                }
            }
            Some(Err(e)) => {
                return Err(ChunkCacheError::StreamError(e.to_string()));
            }
            None => {
                parser.finish();
                break;
            }
        }
    }

    Ok(parser.dropped_parts())
}

/// Collect every part of a byte stream
pub async fn parse_stream<S, E>(
    source: S,
    boundary: &str,
    cancel: &CancellationToken,
) -> Result<Vec<StreamPart>>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut parts = Vec::new();
    parse_stream_with(source, boundary, cancel, |part| parts.push(part)).await?;
    Ok(parts)
}

/// Flatten per-chunk phrase lists onto the absolute timeline
///
/// Each phrase starts at `start_offset_ms + start_ms` and ends
/// `duration_ms` later. Output follows input order.
pub fn build_phrase_timeline(metadata_parts: &[WireChunkMetadata]) -> Vec<TimedPhrase> {
    metadata_parts
        .iter()
        .filter(|m| !m.phrases.is_empty())
        .flat_map(|m| {
            m.phrases.iter().map(move |p| {
                let start_ms = m.start_offset_ms + p.start_ms;
                TimedPhrase {
                    text: p.text.clone(),
                    start_ms,
                    end_ms: start_ms + p.duration_ms,
                }
            })
        })
        .collect()
}

/// Pair each metadata part with the audio part that follows it
pub fn paragraph_audio_from_parts(parts: Vec<StreamPart>) -> ParagraphAudio {
    let mut paragraph = ParagraphAudio::default();
    let mut pending: Option<WireChunkMetadata> = None;

    for part in parts {
        match part {
            StreamPart::Metadata(metadata) => {
                if let Some(orphan) = pending.replace(metadata) {
                    debug!("Metadata for chunk {} had no audio part", orphan.chunk_index);
                }
            }
            StreamPart::Audio(audio) => {
                let metadata = pending.take().unwrap_or_else(|| {
                    let start = paragraph
                        .chunk_metadata
                        .last()
                        .map(|m| m.start_offset_ms + m.duration_ms)
                        .unwrap_or(0.0);
                    WireChunkMetadata::new(paragraph.audio_chunks.len(), start)
                });
                paragraph.audio_chunks.push(audio);
                paragraph.chunk_metadata.push(metadata);
            }
            StreamPart::Unknown { content_type, .. } => {
                debug!("Skipping part with content type '{}'", content_type);
            }
        }
    }

    if let Some(orphan) = pending {
        debug!("Metadata for chunk {} had no audio part", orphan.chunk_index);
    }

    paragraph
}
