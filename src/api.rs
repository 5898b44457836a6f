//! JSON wire types — the bodies of every request and response.
//!
//! These structs mirror the protocol exactly and stay separate from the
//! domain types; conversions validate on the way in (anything that fails
//! here is a 400) and encode on the way out.  Digests travel in base64 in
//! every body; the hex form appears only in `/Data/<hex>.json` URLs.

use crate::codec::{CompressionKind, Descriptor};
use crate::digest::Digest;
use crate::meta::FileVersionRecord;
use crate::store::BlockRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Release date reported by the version endpoints.
pub const RELEASE_DATE: &str = "2026-05-12";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("field `data` is not valid base64")]
    BadPayload,
    #[error("unknown cmptype {0}")]
    UnknownCmptype(u32),
    #[error("{0}")]
    BadDescriptor(#[from] crate::codec::CodecError),
}

// ── Blocks ───────────────────────────────────────────────────────────────────

/// One block on the wire: `/Data.json` bodies, `/Data/<hex>.json` responses
/// and the elements of `data_array`.
///
/// `size` is the uncompressed byte count of the block; `uncmplen` is the
/// stored descriptor value and defaults to `size` when a client omits it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockJson {
    pub hash: Digest,
    pub data: String,
    pub size: u64,
    pub cmptype: u32,
    #[serde(default)]
    pub uncmplen: Option<u64>,
}

impl BlockJson {
    pub fn into_record(self) -> Result<BlockRecord, ApiError> {
        let payload = base64::decode(&self.data).map_err(|_| ApiError::BadPayload)?;
        let kind = CompressionKind::from_tag(self.cmptype)
            .ok_or(ApiError::UnknownCmptype(self.cmptype))?;
        let descriptor = Descriptor {
            kind,
            uncmplen: self.uncmplen.unwrap_or(self.size),
        };
        descriptor.validate(payload.len())?;
        Ok(BlockRecord {
            digest: self.hash,
            payload,
            descriptor,
        })
    }

    pub fn from_record(record: &BlockRecord) -> Self {
        Self {
            hash: record.digest,
            data: base64::encode(&record.payload),
            size: record.descriptor.uncmplen,
            cmptype: record.descriptor.kind.tag(),
            uncmplen: Some(record.descriptor.uncmplen),
        }
    }
}

/// `/Data_Array.json` body.
#[derive(Debug, Deserialize)]
pub struct DataArrayJson {
    pub data_array: Vec<BlockJson>,
}

/// `/Hash_Array.json` bodies and needed-blocks responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct HashListJson {
    pub hash_list: Vec<Digest>,
}

/// `/Data/Hash_Array.json` GET response: the requested payloads inflated and
/// concatenated in request order.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConcatDataJson {
    pub data: String,
    pub size: u64,
}

// ── Metadata ─────────────────────────────────────────────────────────────────

/// `/Meta.json` body: which host, and the file-version it finished hashing.
#[derive(Debug, Serialize, Deserialize)]
pub struct MetaMessage {
    pub hostname: String,
    pub meta: FileVersionRecord,
}

/// `/File/List.json` response.
#[derive(Debug, Serialize, Deserialize)]
pub struct FileListJson {
    pub file_list: Vec<FileVersionRecord>,
}

// ── Version & errors ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionJson {
    pub name: String,
    pub date: String,
    pub version: String,
    pub authors: String,
    pub license: String,
}

impl VersionJson {
    pub fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_owned(),
            date: RELEASE_DATE.to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            authors: env!("CARGO_PKG_AUTHORS").to_owned(),
            license: env!("CARGO_PKG_LICENSE").to_owned(),
        }
    }

    /// Plain-text banner for `/Version`.
    pub fn banner(&self) -> String {
        format!(
            "{} {}, {} — {}\n",
            self.name, self.version, self.date, self.license
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorJson {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
}

impl ErrorJson {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }
}
