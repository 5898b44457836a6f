//! # stashd — content-addressed backup server
//!
//! Storage and ingestion engine for a continuous-data-protection fleet.
//! Clients slice files into blocks, digest each block with BLAKE3, and POST
//! per-file metadata plus block payloads; the server answers "which of these
//! do you still need from me?" and serves everything back for restore.
//!
//! Core guarantees:
//! - Blocks are write-once and globally deduplicated: a digest seen once
//!   from any host is stored once, under a path derived from the digest
//!   itself — the filesystem directory is the index
//! - Per-host metadata logs are append-only; records are self-contained and
//!   framed so that arbitrary path bytes can never tear a line
//! - Uploads are acknowledged at enqueue time; durable writes happen on two
//!   writer threads that drain on shutdown and never die on I/O failure
//! - A lost block is always recoverable by protocol: the next needed-blocks
//!   query reports it missing and the client re-sends

pub mod api;
pub mod codec;
pub mod config;
pub mod digest;
pub mod ingest;
pub mod meta;
pub mod server;
pub mod stats;
pub mod store;

// Flat re-exports for the most common types.
pub use codec::{CompressionKind, Descriptor};
pub use digest::Digest;
pub use ingest::{Dispatcher, WriterHandles};
pub use meta::{FileVersionRecord, ListFilter};
pub use server::ServerContext;
pub use stats::ServerStats;
pub use store::{Backend, BlockRecord, FileStore, MemoryStore, StoreError};
