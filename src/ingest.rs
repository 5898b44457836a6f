//! Ingestion pipeline: two unbounded queues, one writer thread each.
//!
//! The request adapter must answer at network speed while durable writes run
//! at disk speed; these queues are the decoupling.  [`Dispatcher::submit_metadata`]
//! and [`Dispatcher::submit_block`] enqueue and return immediately — the
//! protocol-level acknowledgement happens before the write.  Losing an
//! acknowledgement for a stored block would be worse than losing a block
//! that the next needed-blocks query re-requests, so the fire-and-forget is
//! asymmetric in the safe direction.
//!
//! Each queue has exactly one consumer thread, which also serialises all
//! appends per host log and all block-store writes.  Writer threads never
//! die: a failed write is logged and counted, then the loop continues.
//!
//! Shutdown is a cooperative drain: dropping every [`Dispatcher`] clone
//! disconnects the channels; each writer finishes what is queued and exits;
//! [`WriterHandles::join`] then reaps both threads.

use crate::meta::FileVersionRecord;
use crate::stats::ServerStats;
use crate::store::{Backend, BlockRecord};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// One unit of metadata work: a record bound for one host's log.
pub struct MetaJob {
    pub host: String,
    pub record: FileVersionRecord,
}

/// Submission side of the two queues.  Cheap to clone; dropping the last
/// clone starts the drain.
#[derive(Clone)]
pub struct Dispatcher {
    meta_tx: Sender<MetaJob>,
    block_tx: Sender<BlockRecord>,
}

impl Dispatcher {
    /// Enqueue a file-version record.  Ownership transfers to the queue.
    pub fn submit_metadata(&self, host: String, record: FileVersionRecord) {
        if self.meta_tx.send(MetaJob { host, record }).is_err() {
            warn!("metadata queue is shut down; record dropped");
        }
    }

    /// Enqueue a block.  Ownership transfers to the queue.
    pub fn submit_block(&self, block: BlockRecord) {
        if self.block_tx.send(block).is_err() {
            warn!("block queue is shut down; block dropped");
        }
    }
}

/// Join handles for the two writer threads.
pub struct WriterHandles {
    meta: JoinHandle<()>,
    block: JoinHandle<()>,
}

impl WriterHandles {
    /// Block until both writers have drained their queues and exited.
    pub fn join(self) {
        if self.meta.join().is_err() {
            error!("metadata writer panicked");
        }
        if self.block.join().is_err() {
            error!("block writer panicked");
        }
    }
}

/// Spawn the two writer threads against `backend`.
pub fn spawn(backend: Arc<dyn Backend>, stats: Arc<ServerStats>) -> (Dispatcher, WriterHandles) {
    let (meta_tx, meta_rx) = unbounded();
    let (block_tx, block_rx) = unbounded();

    let meta = {
        let backend = backend.clone();
        let stats = stats.clone();
        thread::Builder::new()
            .name("meta-writer".into())
            .spawn(move || meta_writer_loop(meta_rx, backend, stats))
            .expect("spawning metadata writer")
    };
    let block = thread::Builder::new()
        .name("block-writer".into())
        .spawn(move || block_writer_loop(block_rx, backend, stats))
        .expect("spawning block writer");

    (
        Dispatcher { meta_tx, block_tx },
        WriterHandles { meta, block },
    )
}

fn meta_writer_loop(rx: Receiver<MetaJob>, backend: Arc<dyn Backend>, stats: Arc<ServerStats>) {
    while let Ok(job) = rx.recv() {
        let line_len = job.record.encode_line().len() as u64 + 1;
        match backend.store_metadata(&job.host, &job.record) {
            Ok(()) => stats.record_meta_stored(line_len),
            // The record is lost; the client's next sync re-reports the file.
            Err(e) => {
                error!("metadata append for host {} failed: {e}", job.host);
                stats.record_write_failure();
            }
        }
    }
    debug!("metadata writer drained, exiting");
}

fn block_writer_loop(rx: Receiver<BlockRecord>, backend: Arc<dyn Backend>, stats: Arc<ServerStats>) {
    while let Ok(block) = rx.recv() {
        let payload_len = block.payload.len() as u64;
        if backend.has_block(&block.digest) {
            // Global dedup: first sight wins, any host's copy serves all.
            debug!("block {} already stored, skipping", block.digest);
            stats.record_block_deduplicated(payload_len);
            continue;
        }
        match backend.store_block(&block) {
            Ok(()) => stats.record_block_stored(payload_len),
            // Lost block: the next needed-blocks round trip re-requests it.
            Err(e) => {
                error!("block write for {} failed: {e}", block.digest);
                stats.record_write_failure();
            }
        }
    }
    debug!("block writer drained, exiting");
}
