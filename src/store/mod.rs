//! Storage backends.
//!
//! The server core talks to persistence through the [`Backend`] capability:
//! `{store_metadata, store_block, has_block, get_block, needed, list_files}`.
//! [`FileStore`] is the production realisation (fan-out directory tree plus
//! per-host append-only logs); [`MemoryStore`] backs fast deterministic
//! tests.  Swapping in a database-backed realisation means implementing this
//! one trait.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::codec::Descriptor;
use crate::digest::Digest;
use crate::meta::{FileVersionRecord, ListFilter};
use std::collections::HashSet;
use std::io;
use thiserror::Error;

// ── Block record ─────────────────────────────────────────────────────────────

/// An immutable `(digest, payload, descriptor)` triple.  The payload bytes
/// are whatever was transmitted; if the kind is not NONE they are the
/// compressed form and `descriptor.uncmplen` sizes the inflated output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub digest: Digest,
    pub payload: Vec<u8>,
    pub descriptor: Descriptor,
}

impl BlockRecord {
    /// Hash-addressed integrity: the digest of the uncompressed bytes must
    /// equal the block's identity.
    pub fn verify(&self) -> Result<(), StoreError> {
        let plain = crate::codec::inflate(&self.descriptor, &self.payload)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        if Digest::of(&plain) != self.digest {
            return Err(StoreError::Corrupt(format!(
                "payload does not hash to {}",
                self.digest
            )));
        }
        Ok(())
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("block {0} not found")]
    NotFound(Digest),
    #[error("read failed: {0}")]
    IoRead(#[source] io::Error),
    #[error("write failed: {0}")]
    IoWrite(#[source] io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("corrupt store entry: {0}")]
    Corrupt(String),
}

// ── Backend capability ───────────────────────────────────────────────────────

pub trait Backend: Send + Sync {
    /// Append one file-version record to `host`'s log.  Callers for the same
    /// host are expected to be serialised (the metadata writer guarantees
    /// this in the server).
    fn store_metadata(&self, host: &str, record: &FileVersionRecord) -> Result<(), StoreError>;

    /// Persist a block.  Idempotent per digest; the second writer may race
    /// the first and last-write-wins byte-identically.
    fn store_block(&self, block: &BlockRecord) -> Result<(), StoreError>;

    /// Existence check.  Backend errors read as "not present": a false
    /// negative only costs the client a redundant re-send.
    fn has_block(&self, digest: &Digest) -> bool;

    fn get_block(&self, digest: &Digest) -> Result<BlockRecord, StoreError>;

    /// Scan `host`'s log and return the records `filter` accepts, sorted by
    /// `(name, mtime)`.  An unknown host yields an empty list.
    fn list_files(&self, host: &str, filter: &ListFilter)
        -> Result<Vec<FileVersionRecord>, StoreError>;

    /// The subset of `digests` this store does not yet hold: order-stable,
    /// de-duplicated against what this call has already emitted.
    fn needed(&self, digests: &[Digest]) -> Vec<Digest> {
        let mut emitted = HashSet::new();
        let mut out = Vec::new();
        for digest in digests {
            if !self.has_block(digest) && emitted.insert(*digest) {
                out.push(*digest);
            }
        }
        out
    }
}
