//! In-memory backend — fast, deterministic test double.

use super::{Backend, BlockRecord, StoreError};
use crate::codec::Descriptor;
use crate::digest::Digest;
use crate::meta::{self, FileVersionRecord, ListFilter};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A thread-safe map-backed store with the same observable semantics as
/// [`super::FileStore`], minus durability.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    blocks: Arc<RwLock<HashMap<Digest, (Descriptor, Vec<u8>)>>>,
    logs: Arc<RwLock<HashMap<String, Vec<FileVersionRecord>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blocks held.
    pub fn block_count(&self) -> usize {
        self.blocks.read().len()
    }

    /// Number of records appended for `host`.
    pub fn record_count(&self, host: &str) -> usize {
        self.logs.read().get(host).map_or(0, Vec::len)
    }
}

fn reduced_copy(rec: &FileVersionRecord) -> FileVersionRecord {
    FileVersionRecord {
        filetype: rec.filetype,
        inode: 0,
        mode: 0,
        atime: 0,
        ctime: 0,
        mtime: rec.mtime,
        size: rec.size,
        owner: String::new(),
        group: String::new(),
        uid: 0,
        gid: 0,
        name: rec.name.clone(),
        link: Vec::new(),
        hash_list: Vec::new(),
    }
}

impl Backend for MemoryStore {
    fn store_metadata(&self, host: &str, record: &FileVersionRecord) -> Result<(), StoreError> {
        self.logs
            .write()
            .entry(host.to_owned())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn store_block(&self, block: &BlockRecord) -> Result<(), StoreError> {
        self.blocks
            .write()
            .insert(block.digest, (block.descriptor, block.payload.clone()));
        Ok(())
    }

    fn has_block(&self, digest: &Digest) -> bool {
        self.blocks.read().contains_key(digest)
    }

    fn get_block(&self, digest: &Digest) -> Result<BlockRecord, StoreError> {
        let guard = self.blocks.read();
        let (descriptor, payload) = guard
            .get(digest)
            .ok_or(StoreError::NotFound(*digest))?;
        Ok(BlockRecord {
            digest: *digest,
            payload: payload.clone(),
            descriptor: *descriptor,
        })
    }

    fn list_files(
        &self,
        host: &str,
        filter: &ListFilter,
    ) -> Result<Vec<FileVersionRecord>, StoreError> {
        let guard = self.logs.read();
        let mut records: Vec<FileVersionRecord> = guard
            .get(host)
            .map(|log| log.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default();
        if filter.reduced {
            records = records.iter().map(reduced_copy).collect();
        }
        meta::sort_records(&mut records);
        if filter.latest_only {
            records = meta::latest_per_path(records);
        }
        Ok(records)
    }
}
