//! Process-wide statistics counters, served at `/Stats.json`.
//!
//! Counters are monotonic `AtomicU64`s bumped from request handlers and the
//! writer threads.  A write failure is visible here and in the log — never
//! to the client whose request was already acknowledged at enqueue time.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ServerStats {
    // Per-method request counters.
    get_requests: AtomicU64,
    post_requests: AtomicU64,
    unknown_requests: AtomicU64,

    // Per-endpoint breakdowns.
    get_version: AtomicU64,
    get_stats: AtomicU64,
    get_file_list: AtomicU64,
    get_data: AtomicU64,
    get_hash_array: AtomicU64,
    post_meta: AtomicU64,
    post_hash_array: AtomicU64,
    post_data: AtomicU64,
    post_data_array: AtomicU64,

    // Storage volume.
    blocks_stored: AtomicU64,
    bytes_stored: AtomicU64,
    bytes_deduplicated: AtomicU64,
    meta_records: AtomicU64,
    meta_bytes: AtomicU64,
    write_failures: AtomicU64,
}

/// Endpoint label used by the request adapter when bumping breakdowns.
#[derive(Debug, Clone, Copy)]
pub enum Endpoint {
    Version,
    Stats,
    FileList,
    Data,
    HashArray,
    Meta,
    DataArray,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count_get(&self, endpoint: Endpoint) {
        self.get_requests.fetch_add(1, Ordering::Relaxed);
        let counter = match endpoint {
            Endpoint::Version => &self.get_version,
            Endpoint::Stats => &self.get_stats,
            Endpoint::FileList => &self.get_file_list,
            Endpoint::Data => &self.get_data,
            Endpoint::HashArray => &self.get_hash_array,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_post(&self, endpoint: Endpoint) {
        self.post_requests.fetch_add(1, Ordering::Relaxed);
        let counter = match endpoint {
            Endpoint::Meta => &self.post_meta,
            Endpoint::HashArray => &self.post_hash_array,
            Endpoint::Data => &self.post_data,
            Endpoint::DataArray => &self.post_data_array,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_unknown(&self) {
        self.unknown_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_block_stored(&self, payload_len: u64) {
        self.blocks_stored.fetch_add(1, Ordering::Relaxed);
        self.bytes_stored.fetch_add(payload_len, Ordering::Relaxed);
    }

    pub fn record_block_deduplicated(&self, payload_len: u64) {
        self.bytes_deduplicated.fetch_add(payload_len, Ordering::Relaxed);
    }

    pub fn record_meta_stored(&self, line_len: u64) {
        self.meta_records.fetch_add(1, Ordering::Relaxed);
        self.meta_bytes.fetch_add(line_len, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            requests: RequestCounters {
                get: load(&self.get_requests),
                post: load(&self.post_requests),
                unknown: load(&self.unknown_requests),
                get_breakdown: GetBreakdown {
                    version: load(&self.get_version),
                    stats: load(&self.get_stats),
                    file_list: load(&self.get_file_list),
                    data: load(&self.get_data),
                    hash_array: load(&self.get_hash_array),
                },
                post_breakdown: PostBreakdown {
                    meta: load(&self.post_meta),
                    hash_array: load(&self.post_hash_array),
                    data: load(&self.post_data),
                    data_array: load(&self.post_data_array),
                },
            },
            blocks_stored: load(&self.blocks_stored),
            bytes_stored: load(&self.bytes_stored),
            bytes_deduplicated: load(&self.bytes_deduplicated),
            file_count: load(&self.meta_records),
            meta_bytes: load(&self.meta_bytes),
            write_failures: load(&self.write_failures),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsSnapshot {
    pub requests: RequestCounters,
    pub blocks_stored: u64,
    pub bytes_stored: u64,
    pub bytes_deduplicated: u64,
    pub file_count: u64,
    pub meta_bytes: u64,
    pub write_failures: u64,
}

#[derive(Debug, Serialize)]
pub struct RequestCounters {
    pub get: u64,
    pub post: u64,
    pub unknown: u64,
    pub get_breakdown: GetBreakdown,
    pub post_breakdown: PostBreakdown,
}

#[derive(Debug, Serialize)]
pub struct GetBreakdown {
    pub version: u64,
    pub stats: u64,
    pub file_list: u64,
    pub data: u64,
    pub hash_array: u64,
}

#[derive(Debug, Serialize)]
pub struct PostBreakdown {
    pub meta: u64,
    pub hash_array: u64,
    pub data: u64,
    pub data_array: u64,
}
