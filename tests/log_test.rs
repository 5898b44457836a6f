//! Property tests for the metadata-log encoding: whatever bytes a client
//! puts in a path, appending then scanning yields exactly the records that
//! were appended, in order.

use proptest::prelude::*;
use stashd::meta::{scan_records, FileVersionRecord, ListFilter};
use stashd::store::{Backend, MemoryStore};
use stashd::Digest;

fn record_strategy() -> impl Strategy<Value = FileVersionRecord> {
    (
        (
            0u32..8,
            any::<u64>(),
            any::<u32>(),
            any::<u64>(),
            any::<u64>(),
            0u64..4_000_000_000,
            any::<u64>(),
        ),
        (
            "[a-z]{0,12}",
            "[a-z]{0,12}",
            any::<u32>(),
            any::<u32>(),
            proptest::collection::vec(any::<u8>(), 0..64),
            proptest::collection::vec(any::<u8>(), 0..32),
            proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..16), 0..4),
        ),
    )
        .prop_map(
            |(
                (filetype, inode, mode, atime, ctime, mtime, size),
                (owner, group, uid, gid, name, link, blocks),
            )| {
                FileVersionRecord {
                    filetype,
                    inode,
                    mode,
                    atime,
                    ctime,
                    mtime,
                    size,
                    owner,
                    group,
                    uid,
                    gid,
                    name,
                    link,
                    hash_list: blocks.iter().map(|b| Digest::of(b)).collect(),
                }
            },
        )
}

proptest! {
    /// Scan correctness: append r1…rn, scan with an accept-all filter, get
    /// r1…rn back — no matter what bytes are in `name` and `link`.
    #[test]
    fn scan_yields_appended_records_in_order(
        records in proptest::collection::vec(record_strategy(), 0..24)
    ) {
        let mut log = Vec::new();
        for rec in &records {
            log.extend_from_slice(rec.encode_line().as_bytes());
            log.push(b'\n');
        }
        let scanned = scan_records(&log[..], &ListFilter::default()).unwrap();
        prop_assert_eq!(scanned, records);
    }

    /// Needed-blocks guarantees: output is a subsequence of the input with
    /// duplicates removed, and the query is idempotent.
    #[test]
    fn needed_is_a_deduplicated_subsequence(
        stored in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..8), 0..8),
        asked in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..8), 0..32),
    ) {
        use stashd::codec::Descriptor;
        use stashd::store::BlockRecord;

        let store = MemoryStore::new();
        for data in &stored {
            store.store_block(&BlockRecord {
                digest: Digest::of(data),
                descriptor: Descriptor::uncompressed(data.len() as u64),
                payload: data.clone(),
            }).unwrap();
        }

        let asked: Vec<Digest> = asked.iter().map(|d| Digest::of(d)).collect();
        let needed = store.needed(&asked);

        prop_assert!(needed.len() <= asked.len());
        // No duplicates.
        let mut seen = std::collections::HashSet::new();
        for d in &needed {
            prop_assert!(seen.insert(*d));
            // Every emitted digest was asked for and is absent.
            prop_assert!(asked.contains(d));
            prop_assert!(!store.has_block(d));
        }
        // Order stability: needed is a subsequence of asked.
        let mut it = asked.iter();
        for d in &needed {
            prop_assert!(it.any(|a| a == d));
        }
        // Idempotence.
        prop_assert_eq!(store.needed(&needed), needed);
    }
}
