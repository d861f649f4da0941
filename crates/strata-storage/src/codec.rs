//! Chunk compression codec.
//!
//! A chunk is serialized to SCNK bytes, compressed, and framed with an 8-byte
//! little-endian header: `[u32 original_size][u32 compressed_size]`. Decoding
//! reads exactly `compressed_size` bytes after the header and checks the
//! inflated length against `original_size` before deserializing.
//!
//! Frames declaring more than [`MAX_CHUNK_BYTES`] serialized bytes are
//! rejected before anything is inflated, and chunks that would serialize
//! past it are refused on the way in.

use std::io::{Read, Write};

use crate::chunk::Chunk;

/// Length of the codec frame header.
pub const HEADER_LEN: usize = 8;

/// Largest serialized chunk the codec writes or accepts.
pub const MAX_CHUNK_BYTES: usize = 64 * 1024 * 1024;

/// Upper bound on the deflate ratio used to size the inflate buffer.
const MAX_RATIO: usize = 64;

/// Compression level used when none is given.
pub const DEFAULT_LEVEL: u32 = 6;

/// Compression scheme. The discriminant is the region file's type byte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Stored as-is.
    None = 0,
    /// Gzip (RFC 1952).
    Gzip = 1,
    /// Zlib (RFC 1950).
    #[default]
    Zlib = 2,
}

impl Compression {
    /// Region file type byte.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Parses a region file type byte.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::None),
            1 => Some(Self::Gzip),
            2 => Some(Self::Zlib),
            _ => None,
        }
    }
}

impl From<strata_config::CompressionSetting> for Compression {
    fn from(setting: strata_config::CompressionSetting) -> Self {
        match setting {
            strata_config::CompressionSetting::None => Self::None,
            strata_config::CompressionSetting::Gzip => Self::Gzip,
            strata_config::CompressionSetting::Zlib => Self::Zlib,
        }
    }
}

/// Stage of the codec pipeline that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionPhase {
    /// Turning the chunk into bytes.
    Serialize,
    /// Deflating the serialized bytes.
    Compress,
    /// Reading the frame or inflating it.
    Decompress,
    /// Turning inflated bytes back into a chunk.
    Deserialize,
}

impl std::fmt::Display for CompressionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Serialize => "serialize",
            Self::Compress => "compress",
            Self::Decompress => "decompress",
            Self::Deserialize => "deserialize",
        })
    }
}

/// A codec failure and the phase it occurred in.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{phase} failed: {message}")]
pub struct CompressionError {
    /// Failing phase.
    pub phase: CompressionPhase,
    /// Human-readable cause.
    pub message: String,
}

impl CompressionError {
    /// Creates an error for `phase`.
    pub fn new(phase: CompressionPhase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
        }
    }
}

/// Serializes and compresses `chunk` at the default level.
pub fn compress(chunk: &Chunk, compression: Compression) -> Result<Vec<u8>, CompressionError> {
    compress_with_level(chunk, compression, DEFAULT_LEVEL)
}

/// Serializes and compresses `chunk` at `level` (0..=9).
pub fn compress_with_level(
    chunk: &Chunk,
    compression: Compression,
    level: u32,
) -> Result<Vec<u8>, CompressionError> {
    let serialized = chunk
        .serialize()
        .map_err(|e| CompressionError::new(CompressionPhase::Serialize, e.to_string()))?;
    if serialized.len() > MAX_CHUNK_BYTES {
        return Err(CompressionError::new(
            CompressionPhase::Serialize,
            format!(
                "serialized chunk of {} bytes exceeds the {MAX_CHUNK_BYTES}-byte limit",
                serialized.len()
            ),
        ));
    }
    let original_size = u32::try_from(serialized.len()).map_err(|_| {
        CompressionError::new(
            CompressionPhase::Serialize,
            format!("serialized chunk of {} bytes exceeds u32", serialized.len()),
        )
    })?;

    let compressed = deflate(&serialized, compression, level.min(9))
        .map_err(|e| CompressionError::new(CompressionPhase::Compress, e.to_string()))?;
    let compressed_size = u32::try_from(compressed.len()).map_err(|_| {
        CompressionError::new(CompressionPhase::Compress, "compressed size exceeds u32")
    })?;

    let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
    out.extend_from_slice(&original_size.to_le_bytes());
    out.extend_from_slice(&compressed_size.to_le_bytes());
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Decodes a frame produced by [`compress`].
pub fn decompress(data: &[u8], compression: Compression) -> Result<Chunk, CompressionError> {
    let failed = |message: String| CompressionError::new(CompressionPhase::Decompress, message);

    if data.len() < HEADER_LEN {
        return Err(failed(format!(
            "frame of {} bytes is shorter than the {HEADER_LEN}-byte header",
            data.len()
        )));
    }
    let original_size = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let compressed_size = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
    if original_size > MAX_CHUNK_BYTES {
        return Err(failed(format!(
            "header declares {original_size} bytes, limit is {MAX_CHUNK_BYTES}"
        )));
    }
    let body = data
        .get(HEADER_LEN..HEADER_LEN + compressed_size)
        .ok_or_else(|| {
            failed(format!(
                "header declares {compressed_size} compressed bytes, frame holds {}",
                data.len() - HEADER_LEN
            ))
        })?;

    let inflated = inflate(body, compression, original_size).map_err(|e| failed(e.to_string()))?;
    if inflated.len() != original_size {
        return Err(failed(format!(
            "inflated {} bytes, header declares {original_size}",
            inflated.len()
        )));
    }

    Chunk::deserialize(&inflated)
        .map_err(|e| CompressionError::new(CompressionPhase::Deserialize, e.to_string()))
}

fn deflate(data: &[u8], compression: Compression, level: u32) -> std::io::Result<Vec<u8>> {
    let level = flate2::Compression::new(level);
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Gzip => {
            let mut encoder = flate2::write::GzEncoder::new(Vec::new(), level);
            encoder.write_all(data)?;
            encoder.finish()
        }
        Compression::Zlib => {
            let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), level);
            encoder.write_all(data)?;
            encoder.finish()
        }
    }
}

/// Inflates at most `expected + 1` bytes so an oversized stream is detected
/// without inflating all of it. `expected` comes from the frame and only
/// sizes the buffer up to a plausible ratio of `data`.
fn inflate(data: &[u8], compression: Compression, expected: usize) -> std::io::Result<Vec<u8>> {
    let limit = expected as u64 + 1;
    let capacity = expected
        .min(data.len().saturating_mul(MAX_RATIO))
        .min(MAX_CHUNK_BYTES);
    let mut out = Vec::with_capacity(capacity);
    match compression {
        Compression::None => out.extend_from_slice(data),
        Compression::Gzip => {
            flate2::read::GzDecoder::new(data)
                .take(limit)
                .read_to_end(&mut out)?;
        }
        Compression::Zlib => {
            flate2::read::ZlibDecoder::new(data)
                .take(limit)
                .read_to_end(&mut out)?;
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockStateId;
    use crate::chunk::ChunkPos;

    fn chunk_with_distinct_ids(count: u32) -> Chunk {
        let mut chunk = Chunk::new(ChunkPos::new(3, 4));
        for i in 0..count as usize {
            chunk
                .set_block(i % 16, i / 256, (i / 16) % 16, BlockStateId(i as u32 + 1))
                .unwrap();
        }
        chunk
    }

    #[test]
    fn test_roundtrip_every_scheme() {
        for compression in [Compression::None, Compression::Gzip, Compression::Zlib] {
            let chunk = chunk_with_distinct_ids(300);
            let frame = compress(&chunk, compression).unwrap();
            assert_eq!(decompress(&frame, compression).unwrap(), chunk, "{compression:?}");
        }
    }

    #[test]
    fn test_header_layout() {
        let chunk = chunk_with_distinct_ids(2);
        let frame = compress(&chunk, Compression::None).unwrap();
        let original = u32::from_le_bytes(frame[0..4].try_into().unwrap()) as usize;
        let compressed = u32::from_le_bytes(frame[4..8].try_into().unwrap()) as usize;
        assert_eq!(original, chunk.serialize().unwrap().len());
        assert_eq!(compressed, original);
        assert_eq!(frame.len(), HEADER_LEN + compressed);
    }

    #[test]
    fn test_zlib_shrinks_uniform_chunk() {
        let chunk = Chunk::new(ChunkPos::default());
        let frame = compress(&chunk, Compression::Zlib).unwrap();
        assert!(frame.len() < chunk.serialize().unwrap().len() / 4);
    }

    #[test]
    fn test_short_frame_fails_in_decompress_phase() {
        let err = decompress(&[1, 2, 3], Compression::Zlib).unwrap_err();
        assert_eq!(err.phase, CompressionPhase::Decompress);

        let chunk = chunk_with_distinct_ids(1);
        let frame = compress(&chunk, Compression::Zlib).unwrap();
        let err = decompress(&frame[..frame.len() - 1], Compression::Zlib).unwrap_err();
        assert_eq!(err.phase, CompressionPhase::Decompress);
    }

    #[test]
    fn test_size_mismatch_is_detected() {
        let chunk = chunk_with_distinct_ids(1);
        let mut frame = compress(&chunk, Compression::Zlib).unwrap();
        let lie = (chunk.serialize().unwrap().len() as u32 - 1).to_le_bytes();
        frame[0..4].copy_from_slice(&lie);
        let err = decompress(&frame, Compression::Zlib).unwrap_err();
        assert_eq!(err.phase, CompressionPhase::Decompress);
    }

    #[test]
    fn test_garbage_payload_fails_in_deserialize_phase() {
        let body = b"not a chunk";
        let mut frame = Vec::new();
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(body);
        let err = decompress(&frame, Compression::None).unwrap_err();
        assert_eq!(err.phase, CompressionPhase::Deserialize);
    }

    #[test]
    fn test_oversized_declared_length_is_rejected() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&u32::MAX.to_le_bytes());
        frame.extend_from_slice(&4u32.to_le_bytes());
        frame.extend_from_slice(&[0x78, 0x9C, 0x03, 0x00]);
        for compression in [Compression::None, Compression::Gzip, Compression::Zlib] {
            let err = decompress(&frame, compression).unwrap_err();
            assert_eq!(err.phase, CompressionPhase::Decompress);
            assert!(err.message.contains("limit"), "{err}");
        }
    }

    #[test]
    fn test_inflate_buffer_is_capped_by_body_length() {
        let body = b"abc";
        let out = inflate(body, Compression::None, MAX_CHUNK_BYTES).unwrap();
        assert_eq!(out, body);
        assert!(out.capacity() <= body.len() * MAX_RATIO);
    }

    #[test]
    fn test_unencodable_chunk_fails_in_serialize_phase() {
        let mut chunk = Chunk::new(ChunkPos::default());
        chunk.put_block_entity(crate::chunk::BlockEntity {
            id: "y".repeat(70_000),
            x: 0,
            y: 0,
            z: 0,
            data: Vec::new(),
        });
        let err = compress(&chunk, Compression::Zlib).unwrap_err();
        assert_eq!(err.phase, CompressionPhase::Serialize);
    }

    #[test]
    fn test_tags() {
        assert_eq!(Compression::Gzip.tag(), 1);
        assert_eq!(Compression::from_tag(2), Some(Compression::Zlib));
        assert_eq!(Compression::from_tag(3), None);
    }
}
