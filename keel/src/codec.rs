//! Compression codec for event fields and archive blobs.
//!
//! Encoded form is a 2-byte magic header identifying the algorithm and
//! format version, followed by a raw deflate stream of the UTF-8 JSON
//! encoding. The uncompressed form is the raw JSON bytes; readers
//! distinguish the two by probing the header. JSON text always begins
//! with one of `{ [ " - t f n` or a digit, so a valid document can
//! never collide with the magic.

use crate::config::CompressionConfig;
use crate::error::CodecError;
use crate::event::Event;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Magic header: `0xEC` (event codec) followed by the format version.
/// Version 1 is raw deflate.
pub const MAGIC: [u8; 2] = [0xEC, 0x01];

/// Whether a stored blob carries the compression framing.
pub fn is_compressed(bytes: &[u8]) -> bool {
    bytes.len() >= MAGIC.len() && bytes[..MAGIC.len()] == MAGIC
}

/// Deflate `raw` at `level` and frame it with the magic header.
pub fn compress(raw: &[u8], level: u32) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(MAGIC.len() + raw.len() / 2);
    out.extend_from_slice(&MAGIC);
    let mut encoder = DeflateEncoder::new(out, Compression::new(level.min(9)));
    encoder
        .write_all(raw)
        .and_then(|_| encoder.finish())
        .map_err(|e| CodecError::Deflate(e.to_string()))
}

/// Undo [`compress`]. Fails if the header is missing or the stream is
/// corrupt.
pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    if !is_compressed(bytes) {
        return Err(CodecError::MissingHeader);
    }
    let mut raw = Vec::new();
    DeflateDecoder::new(&bytes[MAGIC.len()..])
        .read_to_end(&mut raw)
        .map_err(|e| CodecError::Deflate(e.to_string()))?;
    Ok(raw)
}

/// Encode a JSON value for storage under `config`: compressed when
/// enabled and at least `threshold` bytes, raw JSON otherwise.
pub fn encode_value(
    value: &serde_json::Value,
    config: &CompressionConfig,
) -> Result<Vec<u8>, CodecError> {
    let raw = serde_json::to_vec(value).map_err(|e| CodecError::Json(e.to_string()))?;
    if !config.enabled || raw.len() < config.threshold {
        return Ok(raw);
    }
    compress(&raw, config.level)
}

/// Decode a stored field back to its JSON value, probing the header to
/// decide whether to inflate first.
pub fn decode_value(bytes: &[u8]) -> Result<serde_json::Value, CodecError> {
    let raw;
    let json = if is_compressed(bytes) {
        raw = decompress(bytes)?;
        raw.as_slice()
    } else {
        bytes
    };
    serde_json::from_slice(json).map_err(|e| CodecError::Json(e.to_string()))
}

/// Encode an arbitrary byte string (the archive blob path): same
/// framing and threshold rules as [`encode_value`], but the raw form
/// is the input itself.
pub fn encode_bytes(raw: &[u8], config: &CompressionConfig) -> Result<Vec<u8>, CodecError> {
    if !config.enabled || raw.len() < config.threshold {
        return Ok(raw.to_vec());
    }
    compress(raw, config.level)
}

/// Undo [`encode_bytes`].
pub fn decode_bytes(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    if is_compressed(bytes) {
        decompress(bytes)
    } else {
        Ok(bytes.to_vec())
    }
}

/// Canonical byte encoding of an ordered event sequence: the JSON
/// array of the events. This is the form archive blobs frame.
pub fn canonical_events(events: &[Event]) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(events).map_err(|e| CodecError::Json(e.to_string()))
}

/// Encode an event sequence for an archive blob.
pub fn encode_events(
    events: &[Event],
    config: &CompressionConfig,
) -> Result<Vec<u8>, CodecError> {
    let raw = canonical_events(events)?;
    encode_bytes(&raw, config)
}

/// Decode an archive blob back to its event sequence.
pub fn decode_events(bytes: &[u8]) -> Result<Vec<Event>, CodecError> {
    let raw = decode_bytes(bytes)?;
    serde_json::from_slice(&raw).map_err(|e| CodecError::Json(e.to_string()))
}
