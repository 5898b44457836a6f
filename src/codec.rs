//! Compression registry: integer wire tags + per-block descriptors.
//!
//! # Identity rules
//! Every block travels and is stored together with a compression descriptor
//! `(kind, uncompressed length)`.  The kind is a small integer that appears
//! in the `cmptype` JSON field and in the `.meta` sidecar next to each stored
//! payload.  Tags are frozen:
//!
//! | tag | kind | backing |
//! |-----|------|---------|
//! | 0   | none | payload stored verbatim |
//! | 1   | zlib | RFC 1950 stream |
//! | 2   | zstd | Zstandard frame |
//!
//! A tag is NEVER reused.  Readers MUST reject unknown tags — there is no
//! fallback decode path.
//!
//! The server itself never compresses: payloads are persisted exactly as
//! transmitted and the descriptor is carried alongside.  Decompression runs
//! when a client asks for inflated data and when integrity is audited.

use std::io::{Read, Write};
use thiserror::Error;

/// How a block payload was encoded by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CompressionKind {
    None = 0,
    Zlib = 1,
    Zstd = 2,
}

impl CompressionKind {
    /// Resolve a wire tag.  Returns `None` for tags this build does not know.
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(CompressionKind::None),
            1 => Some(CompressionKind::Zlib),
            2 => Some(CompressionKind::Zstd),
            _ => None,
        }
    }

    /// The frozen integer written to `cmptype` fields and `.meta` sidecars.
    #[inline]
    pub fn tag(self) -> u32 {
        self as u32
    }

    /// Human-readable name (for diagnostics only — never parsed).
    pub fn name(self) -> &'static str {
        match self {
            CompressionKind::None => "none",
            CompressionKind::Zlib => "zlib",
            CompressionKind::Zstd => "zstd",
        }
    }
}

/// Per-block compression descriptor: what the payload bytes are and how many
/// bytes they inflate to.  For `kind == None` the two lengths coincide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub kind: CompressionKind,
    pub uncmplen: u64,
}

impl Descriptor {
    pub fn uncompressed(len: u64) -> Self {
        Self {
            kind: CompressionKind::None,
            uncmplen: len,
        }
    }

    /// Check the §3 invariant: an uncompressed payload is exactly as long as
    /// its declared inflated length.
    pub fn validate(&self, payload_len: usize) -> Result<(), CodecError> {
        if self.kind == CompressionKind::None && self.uncmplen != payload_len as u64 {
            return Err(CodecError::LengthMismatch {
                declared: self.uncmplen,
                actual: payload_len as u64,
            });
        }
        Ok(())
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("compression error: {0}")]
    Compression(String),
    #[error("decompression error: {0}")]
    Decompression(String),
    /// Emitted for a `cmptype` tag this build does not carry.  Decoding MUST
    /// NOT continue.
    #[error("unknown compression tag {tag}")]
    UnknownKind { tag: u32 },
    #[error("uncompressed payload declares {declared} bytes but carries {actual}")]
    LengthMismatch { declared: u64, actual: u64 },
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn kind(&self) -> CompressionKind;
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError>;
    fn decompress(&self, data: &[u8], size_hint: usize) -> Result<Vec<u8>, CodecError>;
}

// ── Built-in codec implementations ──────────────────────────────────────────

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn kind(&self) -> CompressionKind {
        CompressionKind::None
    }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> {
        Ok(data.to_vec())
    }
    fn decompress(&self, data: &[u8], _: usize) -> Result<Vec<u8>, CodecError> {
        Ok(data.to_vec())
    }
}

pub struct ZlibCodec;
impl Codec for ZlibCodec {
    fn kind(&self) -> CompressionKind {
        CompressionKind::Zlib
    }
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
        let level = flate2::Compression::new(level.clamp(0, 9) as u32);
        let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), level);
        enc.write_all(data)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        enc.finish()
            .map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8], size_hint: usize) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(size_hint);
        flate2::read::ZlibDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

pub struct ZstdCodec;
impl Codec for ZstdCodec {
    fn kind(&self) -> CompressionKind {
        CompressionKind::Zstd
    }
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
        zstd::encode_all(data, level).map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8], _: usize) -> Result<Vec<u8>, CodecError> {
        zstd::decode_all(data).map_err(|e| CodecError::Decompression(e.to_string()))
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Resolve a kind to its codec.
pub fn get_codec(kind: CompressionKind) -> Box<dyn Codec> {
    match kind {
        CompressionKind::None => Box::new(NoneCodec),
        CompressionKind::Zlib => Box::new(ZlibCodec),
        CompressionKind::Zstd => Box::new(ZstdCodec),
    }
}

/// Inflate a stored payload back to the client's original bytes.
///
/// `descriptor.uncmplen` sizes the output buffer exactly; the caller may
/// additionally verify that the result hashes back to the block's digest.
pub fn inflate(descriptor: &Descriptor, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    descriptor.validate(payload.len())?;
    get_codec(descriptor.kind).decompress(payload, descriptor.uncmplen as usize)
}
