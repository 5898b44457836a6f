//! The file backend: digest-addressed payload files plus per-host logs.
//!
//! # On-disk layout
//!
//! ```text
//! <prefix>/
//!   data/
//!     .done                     fan-out tree fully pre-created
//!     <hh>/<hh>/…/<rest>        payload file (first L digest bytes → L dirs)
//!     <hh>/<hh>/…/<rest>.meta   sidecar: [meta] cmptype=… uncmplen=…
//!   meta/
//!     <hostname>                append-only file-version log
//! ```
//!
//! The fan-out level L ∈ {2,3,4,5} fixes how many two-hex-character directory
//! levels sit between `data/` and the payload; the payload file name is the
//! remaining `64 − 2L` hex characters.  The filesystem directory IS the
//! index: no database, no lookup structure, nothing to rebuild.
//!
//! All 256^L leaf directories are created up front on first init, then the
//! `.done` marker pins that work; every later put is a pure two-file write.
//! The sidecar goes first so a reader that finds a payload always finds its
//! descriptor.
//!
//! Compression metadata lives in the sidecar rather than in the payload name
//! so the payload file's raw bytes hash back to its name under BLAKE3.

use super::{Backend, BlockRecord, StoreError};
use crate::codec::{CompressionKind, Descriptor};
use crate::digest::Digest;
use crate::meta::{self, FileVersionRecord, ListFilter};
use log::{debug, info};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Valid fan-out range.  L=2 costs ~256 MB of empty inodes on a typical
/// filesystem; L=5 would cost terabytes.
pub const MIN_DIR_LEVEL: usize = 2;
pub const MAX_DIR_LEVEL: usize = 5;

const DONE_MARKER: &str = ".done";

pub struct FileStore {
    data_dir: PathBuf,
    meta_dir: PathBuf,
    level: usize,
}

impl FileStore {
    /// Open (and on first use, build) the store rooted at `prefix`.
    ///
    /// Refuses a fan-out level outside `2..=5` and any prefix that cannot be
    /// created; both abort startup.
    pub fn init(prefix: &Path, level: usize) -> Result<Self, StoreError> {
        if !(MIN_DIR_LEVEL..=MAX_DIR_LEVEL).contains(&level) {
            return Err(StoreError::Config(format!(
                "dir-level {level} out of range {MIN_DIR_LEVEL}..={MAX_DIR_LEVEL}"
            )));
        }

        let data_dir = prefix.join("data");
        let meta_dir = prefix.join("meta");
        fs::create_dir_all(&data_dir).map_err(StoreError::IoWrite)?;
        fs::create_dir_all(&meta_dir).map_err(StoreError::IoWrite)?;

        let marker = data_dir.join(DONE_MARKER);
        if !marker.exists() {
            info!(
                "pre-creating {} block directories under {} (level {level})",
                256usize.pow(level as u32),
                data_dir.display()
            );
            precreate_fanout(&data_dir, level).map_err(StoreError::IoWrite)?;
            File::create(&marker).map_err(StoreError::IoWrite)?;
            info!("fan-out tree complete");
        }

        Ok(Self {
            data_dir,
            meta_dir,
            level,
        })
    }

    #[inline]
    pub fn level(&self) -> usize {
        self.level
    }

    /// `(payload path, sidecar path)` for a digest.
    fn block_paths(&self, digest: &Digest) -> (PathBuf, PathBuf) {
        let hex = digest.to_hex();
        let mut dir = self.data_dir.clone();
        for i in 0..self.level {
            dir.push(&hex[2 * i..2 * i + 2]);
        }
        let rest = &hex[2 * self.level..];
        (dir.join(rest), dir.join(format!("{rest}.meta")))
    }

    fn host_log(&self, host: &str) -> PathBuf {
        self.meta_dir.join(host)
    }
}

/// Create every two-hex-character directory down to `depth` levels.
fn precreate_fanout(dir: &Path, depth: usize) -> io::Result<()> {
    if depth == 0 {
        return Ok(());
    }
    for byte in 0u16..=255 {
        let sub = dir.join(format!("{byte:02x}"));
        match fs::create_dir(&sub) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
        precreate_fanout(&sub, depth - 1)?;
    }
    Ok(())
}

fn encode_sidecar(descriptor: &Descriptor) -> String {
    format!(
        "[meta]\ncmptype={}\nuncmplen={}\n",
        descriptor.kind.tag(),
        descriptor.uncmplen
    )
}

fn parse_sidecar(text: &str) -> Option<Descriptor> {
    let mut cmptype = None;
    let mut uncmplen = None;
    for line in text.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("cmptype=") {
            cmptype = value.trim().parse::<u32>().ok();
        } else if let Some(value) = line.strip_prefix("uncmplen=") {
            uncmplen = value.trim().parse::<u64>().ok();
        }
    }
    Some(Descriptor {
        kind: CompressionKind::from_tag(cmptype?)?,
        uncmplen: uncmplen?,
    })
}

impl Backend for FileStore {
    fn store_metadata(&self, host: &str, record: &FileVersionRecord) -> Result<(), StoreError> {
        let mut line = record.encode_line();
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.host_log(host))
            .map_err(StoreError::IoWrite)?;
        // One write call for the whole record; the trailing byte is the
        // newline scans rely on.
        file.write_all(line.as_bytes()).map_err(StoreError::IoWrite)?;
        file.flush().map_err(StoreError::IoWrite)?;
        Ok(())
    }

    fn store_block(&self, block: &BlockRecord) -> Result<(), StoreError> {
        let (payload_path, sidecar_path) = self.block_paths(&block.digest);
        // Descriptor first: a payload never exists without its sidecar.
        fs::write(&sidecar_path, encode_sidecar(&block.descriptor))
            .map_err(StoreError::IoWrite)?;
        // Full overwrite.  Two racing writers for one digest produce the
        // same bytes, so last-write-wins is byte-identical.
        fs::write(&payload_path, &block.payload).map_err(StoreError::IoWrite)?;
        debug!("stored block {} ({} B)", block.digest, block.payload.len());
        Ok(())
    }

    fn has_block(&self, digest: &Digest) -> bool {
        // is_file() folds filesystem errors into "not present" — a false
        // negative only triggers a re-send.
        self.block_paths(digest).0.is_file()
    }

    fn get_block(&self, digest: &Digest) -> Result<BlockRecord, StoreError> {
        let (payload_path, sidecar_path) = self.block_paths(digest);
        let payload = match fs::read(&payload_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(*digest))
            }
            Err(e) => return Err(StoreError::IoRead(e)),
        };
        let sidecar = fs::read_to_string(&sidecar_path).map_err(StoreError::IoRead)?;
        let descriptor = parse_sidecar(&sidecar).ok_or_else(|| {
            StoreError::Corrupt(format!("unreadable sidecar for {digest}"))
        })?;
        Ok(BlockRecord {
            digest: *digest,
            payload,
            descriptor,
        })
    }

    fn list_files(
        &self,
        host: &str,
        filter: &ListFilter,
    ) -> Result<Vec<FileVersionRecord>, StoreError> {
        let file = match File::open(self.host_log(host)) {
            Ok(f) => f,
            // A host that never backed anything up has no log — empty list.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::IoRead(e)),
        };
        let mut records = meta::scan_records(file, filter).map_err(StoreError::IoRead)?;
        meta::sort_records(&mut records);
        if filter.latest_only {
            records = meta::latest_per_path(records);
        }
        Ok(records)
    }
}
