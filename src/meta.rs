//! File-version records and the per-host metadata log encoding.
//!
//! # Line format
//!
//! One record per line, fields comma-separated in this order:
//!
//! ```text
//! filetype, inode, mode, atime, ctime, mtime, size,
//! "owner", "group", uid, gid, "b64(name)", "b64(link)", "b64(digest)"…
//! ```
//!
//! Textual fields are quoted with `"`.  `name` and `link` are base64-encoded
//! so no field can smuggle an unescaped comma, quote, or newline — a file
//! name is arbitrary bytes and gets no say in the framing.  The digest
//! sequence is the final field group: zero or more quoted base64 digests.
//! `owner` and `group` are system account names and must not contain quotes.
//!
//! # Framing
//!
//! A logical line ends at a newline that is outside any quoted field AND
//! that occurs after at least [`MIN_RECORD_COMMAS`] top-level commas on the
//! current line.  This is what lets a record be reassembled unambiguously
//! from fixed-size byte chunks: every record carries at least 12 top-level
//! commas, and the only bytes that could fake a terminator are shielded by
//! base64.
//!
//! Appends for one host are serialised by the metadata writer; because the
//! last byte written is always `\n`, a concurrent scan sees a prefix of the
//! log that ends on a record boundary.

use crate::digest::Digest;
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{self, Read};
use thiserror::Error;

/// Minimum number of top-level commas before a newline may end a record.
pub const MIN_RECORD_COMMAS: usize = 12;

/// Scan buffer size for log reads.
pub const SCAN_CHUNK_SIZE: usize = 1024 * 1024;

/// Fixed fields preceding the digest sequence.
const FIXED_FIELDS: usize = 13;

// ── Record ───────────────────────────────────────────────────────────────────

/// One snapshot of one file's attributes plus the ordered digests of its
/// contents.  Self-contained: decoding a record requires nothing else from
/// the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersionRecord {
    /// Integer tag: regular / directory / symlink / …
    pub filetype: u32,
    pub inode: u64,
    pub mode: u32,
    pub atime: u64,
    pub ctime: u64,
    pub mtime: u64,
    pub size: u64,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub uid: u32,
    #[serde(default)]
    pub gid: u32,
    /// Raw path bytes; base64 on the wire and in the log.
    #[serde(with = "b64_bytes")]
    pub name: Vec<u8>,
    /// Symlink target; empty for non-symlinks.
    #[serde(with = "b64_bytes", default)]
    pub link: Vec<u8>,
    #[serde(default)]
    pub hash_list: Vec<Digest>,
}

/// Serde shim: arbitrary bytes as a base64 JSON string.
mod b64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::decode(s.trim()).map_err(serde::de::Error::custom)
    }
}

#[derive(Error, Debug)]
pub enum MetaError {
    #[error("record has {got} fields, expected at least {FIXED_FIELDS}")]
    FieldCount { got: usize },
    #[error("field {index} is not a valid number")]
    Number { index: usize },
    #[error("field {index} is not valid base64")]
    Base64 { index: usize },
    #[error("digest field does not decode: {0}")]
    Digest(#[from] crate::digest::DigestError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Encoding ─────────────────────────────────────────────────────────────────

impl FileVersionRecord {
    /// Encode one log line (without the terminating newline).
    pub fn encode_line(&self) -> String {
        let mut line = format!(
            "{}, {}, {}, {}, {}, {}, {}, \"{}\", \"{}\", {}, {}, \"{}\", \"{}\"",
            self.filetype,
            self.inode,
            self.mode,
            self.atime,
            self.ctime,
            self.mtime,
            self.size,
            self.owner,
            self.group,
            self.uid,
            self.gid,
            base64::encode(&self.name),
            base64::encode(&self.link),
        );
        for digest in &self.hash_list {
            line.push_str(", \"");
            line.push_str(&digest.to_base64());
            line.push('"');
        }
        line
    }

    /// Decode a full log line.
    pub fn decode_line(line: &[u8]) -> Result<Self, MetaError> {
        let fields = split_fields(line);
        if fields.len() < FIXED_FIELDS {
            return Err(MetaError::FieldCount { got: fields.len() });
        }

        let mut hash_list = Vec::new();
        for field in &fields[FIXED_FIELDS..] {
            let text = unquoted_str(field);
            if text.is_empty() {
                continue;
            }
            hash_list.push(Digest::from_base64(text)?);
        }

        Ok(Self {
            filetype: parse_num(&fields, 0)?,
            inode: parse_num(&fields, 1)?,
            mode: parse_num(&fields, 2)?,
            atime: parse_num(&fields, 3)?,
            ctime: parse_num(&fields, 4)?,
            mtime: parse_num(&fields, 5)?,
            size: parse_num(&fields, 6)?,
            owner: unquoted_str(fields[7]).to_owned(),
            group: unquoted_str(fields[8]).to_owned(),
            uid: parse_num(&fields, 9)?,
            gid: parse_num(&fields, 10)?,
            name: parse_b64(&fields, 11)?,
            link: parse_b64(&fields, 12)?,
            hash_list,
        })
    }

    /// Decode only `(filetype, mtime, size, name)` — the list-only fast path.
    pub fn decode_line_reduced(line: &[u8]) -> Result<Self, MetaError> {
        let fields = split_fields(line);
        if fields.len() < FIXED_FIELDS {
            return Err(MetaError::FieldCount { got: fields.len() });
        }
        Ok(Self {
            filetype: parse_num(&fields, 0)?,
            inode: 0,
            mode: 0,
            atime: 0,
            ctime: 0,
            mtime: parse_num(&fields, 5)?,
            size: parse_num(&fields, 6)?,
            owner: String::new(),
            group: String::new(),
            uid: 0,
            gid: 0,
            name: parse_b64(&fields, 11)?,
            link: Vec::new(),
            hash_list: Vec::new(),
        })
    }
}

/// Split a line at top-level commas, leaving quoted fields intact.
fn split_fields(line: &[u8]) -> Vec<&[u8]> {
    let mut fields = Vec::with_capacity(FIXED_FIELDS + 4);
    let mut in_quotes = false;
    let mut start = 0usize;
    for (i, &b) in line.iter().enumerate() {
        match b {
            b'"' => in_quotes = !in_quotes,
            b',' if !in_quotes => {
                fields.push(&line[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(&line[start..]);
    fields
}

/// Trim whitespace and surrounding quotes; lossy UTF-8 is fine because every
/// arbitrary-byte field is base64 underneath.
fn unquoted_str(field: &[u8]) -> &str {
    let s = std::str::from_utf8(field).unwrap_or("");
    s.trim().trim_matches('"')
}

fn parse_num<T: std::str::FromStr>(fields: &[&[u8]], index: usize) -> Result<T, MetaError> {
    unquoted_str(fields[index])
        .parse()
        .map_err(|_| MetaError::Number { index })
}

fn parse_b64(fields: &[&[u8]], index: usize) -> Result<Vec<u8>, MetaError> {
    base64::decode(unquoted_str(fields[index])).map_err(|_| MetaError::Base64 { index })
}

// ── Scanner ──────────────────────────────────────────────────────────────────

/// Reassembles logical lines from fixed-size chunks of a log stream.
///
/// Incomplete trailing bytes (no terminating newline yet) are dropped, so a
/// scan racing an append never yields a torn record.
pub struct LineScanner<R: Read> {
    reader: R,
    carry: Vec<u8>,
    pos: usize,
    start: usize,
    commas: usize,
    in_quotes: bool,
    eof: bool,
}

impl<R: Read> LineScanner<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            carry: Vec::with_capacity(SCAN_CHUNK_SIZE),
            pos: 0,
            start: 0,
            commas: 0,
            in_quotes: false,
            eof: false,
        }
    }

    /// Next logical line, without its newline.  `Ok(None)` at end of stream.
    pub fn next_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            while self.pos < self.carry.len() {
                let b = self.carry[self.pos];
                self.pos += 1;
                match b {
                    b'"' => self.in_quotes = !self.in_quotes,
                    b',' if !self.in_quotes => self.commas += 1,
                    b'\n' if !self.in_quotes && self.commas >= MIN_RECORD_COMMAS => {
                        let line = self.carry[self.start..self.pos - 1].to_vec();
                        self.start = self.pos;
                        self.commas = 0;
                        return Ok(Some(line));
                    }
                    _ => {}
                }
            }
            if self.eof {
                return Ok(None);
            }
            // Drop the consumed prefix, then refill.
            if self.start > 0 {
                self.carry.drain(..self.start);
                self.pos -= self.start;
                self.start = 0;
            }
            let mut chunk = vec![0u8; SCAN_CHUNK_SIZE];
            let n = self.reader.read(&mut chunk)?;
            if n == 0 {
                self.eof = true;
            } else {
                self.carry.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

/// Scan a whole log stream, decode each record, and keep the ones `filter`
/// accepts.  Lines that fail to decode are logged and skipped; the log is
/// append-only and one bad line must not hide the rest.
pub fn scan_records<R: Read>(
    reader: R,
    filter: &ListFilter,
) -> io::Result<Vec<FileVersionRecord>> {
    let mut scanner = LineScanner::new(reader);
    let mut records = Vec::new();
    while let Some(line) = scanner.next_line()? {
        let decoded = if filter.reduced {
            FileVersionRecord::decode_line_reduced(&line)
        } else {
            FileVersionRecord::decode_line(&line)
        };
        match decoded {
            Ok(rec) => {
                if filter.matches(&rec) {
                    records.push(rec);
                }
            }
            Err(e) => warn!("skipping undecodable log line: {e}"),
        }
    }
    Ok(records)
}

// ── Filter ───────────────────────────────────────────────────────────────────

/// Predicates applied during a metadata-log scan.
#[derive(Default)]
pub struct ListFilter {
    /// Case-insensitive match on the decoded `name` bytes.
    pub name_regex: Option<regex::bytes::Regex>,
    /// Calendar prefix match against the mtime rendered as
    /// `YYYY-MM-DD HH:MM:SS` (UTC).
    pub date: Option<String>,
    /// Inclusive epoch-second bounds on mtime.
    pub after: Option<i64>,
    pub before: Option<i64>,
    /// Collapse to the newest record per path after the scan.
    pub latest_only: bool,
    /// Decode only `(filetype, mtime, size, name)`.
    pub reduced: bool,
}

impl ListFilter {
    /// Compile a case-insensitive filename regex.
    pub fn with_name_pattern(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.name_regex = Some(
            regex::bytes::RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()?,
        );
        Ok(self)
    }

    pub fn matches(&self, rec: &FileVersionRecord) -> bool {
        if let Some(re) = &self.name_regex {
            if !re.is_match(&rec.name) {
                return false;
            }
        }
        if let Some(date) = &self.date {
            match format_mtime(rec.mtime) {
                Some(rendered) if rendered.starts_with(date.as_str()) => {}
                _ => return false,
            }
        }
        if let Some(after) = self.after {
            if (rec.mtime as i64) < after {
                return false;
            }
        }
        if let Some(before) = self.before {
            if (rec.mtime as i64) > before {
                return false;
            }
        }
        true
    }
}

/// Render an mtime as UTC `YYYY-MM-DD HH:MM:SS`.
pub fn format_mtime(mtime: u64) -> Option<String> {
    Utc.timestamp_opt(mtime as i64, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Parse an `afterdate`/`beforedate` argument: `YYYY-MM-DD` or
/// `YYYY-MM-DD HH:MM:SS`.  A bare date resolves to the start of the day for
/// a lower bound and the end of the day for an upper bound.
pub fn parse_time_bound(s: &str, end_of_day: bool) -> Option<i64> {
    let s = s.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc().timestamp());
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    let time = if end_of_day {
        date.and_hms_opt(23, 59, 59)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|dt| dt.and_utc().timestamp())
}

/// Stable result order: `(name, mtime)` ascending.
pub fn sort_records(records: &mut [FileVersionRecord]) {
    records.sort_by(|a, b| a.name.cmp(&b.name).then(a.mtime.cmp(&b.mtime)));
}

/// Keep only the newest record per path, preserving the sort order.
pub fn latest_per_path(records: Vec<FileVersionRecord>) -> Vec<FileVersionRecord> {
    let mut newest: HashMap<Vec<u8>, FileVersionRecord> = HashMap::new();
    for rec in records {
        match newest.get(&rec.name) {
            Some(current) if current.mtime >= rec.mtime => {}
            _ => {
                newest.insert(rec.name.clone(), rec);
            }
        }
    }
    let mut out: Vec<_> = newest.into_values().collect();
    sort_records(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &[u8], mtime: u64) -> FileVersionRecord {
        FileVersionRecord {
            filetype: 1,
            inode: 42,
            mode: 0o644,
            atime: mtime,
            ctime: mtime,
            mtime,
            size: 123,
            owner: "backup".into(),
            group: "backup".into(),
            uid: 1000,
            gid: 1000,
            name: name.to_vec(),
            link: Vec::new(),
            hash_list: vec![Digest::of(name), Digest::of(b"second block")],
        }
    }

    #[test]
    fn line_roundtrip() {
        let rec = record(b"/var/log/syslog", 1700000000);
        let line = rec.encode_line();
        let back = FileVersionRecord::decode_line(line.as_bytes()).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn line_roundtrip_hostile_name() {
        // Commas, quotes, and newlines in the path must not break framing.
        let rec = record(b"/tmp/a,b\"c\nd.log", 1700000000);
        let line = rec.encode_line();
        assert!(!line.contains('\n'));
        let back = FileVersionRecord::decode_line(line.as_bytes()).unwrap();
        assert_eq!(back.name, rec.name);
    }

    #[test]
    fn empty_hash_list_still_frames() {
        let mut rec = record(b"/empty.txt", 5);
        rec.hash_list.clear();
        let line = rec.encode_line();
        let commas = line.matches(',').count();
        assert!(commas >= MIN_RECORD_COMMAS);
        let back = FileVersionRecord::decode_line(line.as_bytes()).unwrap();
        assert!(back.hash_list.is_empty());
    }

    #[test]
    fn scanner_reassembles_across_chunks() {
        let mut log = Vec::new();
        let recs: Vec<_> = (0u64..50)
            .map(|i| record(format!("/data/file{i}").as_bytes(), i))
            .collect();
        for rec in &recs {
            log.extend_from_slice(rec.encode_line().as_bytes());
            log.push(b'\n');
        }
        // A 7-byte reader forces every line across many refills.
        struct Dribble<'a>(&'a [u8]);
        impl Read for Dribble<'_> {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                let n = self.0.len().min(buf.len()).min(7);
                buf[..n].copy_from_slice(&self.0[..n]);
                self.0 = &self.0[n..];
                Ok(n)
            }
        }
        let got = scan_records(Dribble(&log), &ListFilter::default()).unwrap();
        assert_eq!(got, recs);
    }

    #[test]
    fn scanner_ignores_torn_tail() {
        let rec = record(b"/a", 1);
        let mut log = rec.encode_line().into_bytes();
        log.push(b'\n');
        log.extend_from_slice(b"1, 2, 3, partial");
        let got = scan_records(&log[..], &ListFilter::default()).unwrap();
        assert_eq!(got.len(), 1);
    }

    #[test]
    fn regex_filter_is_case_insensitive() {
        let filter = ListFilter::default().with_name_pattern(r"\.LOG$").unwrap();
        assert!(filter.matches(&record(b"/a/x.log", 1)));
        assert!(!filter.matches(&record(b"/a/y.txt", 1)));
    }

    #[test]
    fn date_prefix_filter() {
        // 2023-11-14 22:13:20 UTC
        let rec = record(b"/a", 1700000000);
        let mut filter = ListFilter::default();
        filter.date = Some("2023-11-14".into());
        assert!(filter.matches(&rec));
        filter.date = Some("2023-11-15".into());
        assert!(!filter.matches(&rec));
    }

    #[test]
    fn time_bounds_are_inclusive() {
        let rec = record(b"/a", 1700000000);
        let mut filter = ListFilter::default();
        filter.after = Some(1700000000);
        filter.before = Some(1700000000);
        assert!(filter.matches(&rec));
        filter.after = Some(1700000001);
        assert!(!filter.matches(&rec));
    }

    #[test]
    fn bare_date_bounds() {
        let lo = parse_time_bound("2023-11-14", false).unwrap();
        let hi = parse_time_bound("2023-11-14", true).unwrap();
        assert_eq!(hi - lo, 86399);
        assert!(parse_time_bound("not a date", false).is_none());
    }

    #[test]
    fn latest_only_keeps_newest_per_path() {
        let records = vec![record(b"/a", 1), record(b"/a", 3), record(b"/a", 2), record(b"/b", 1)];
        let got = latest_per_path(records);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].name, b"/a");
        assert_eq!(got[0].mtime, 3);
    }

    #[test]
    fn reduced_decode_skips_heavy_fields() {
        let rec = record(b"/var/data.bin", 99);
        let line = rec.encode_line();
        let reduced = FileVersionRecord::decode_line_reduced(line.as_bytes()).unwrap();
        assert_eq!(reduced.name, rec.name);
        assert_eq!(reduced.mtime, 99);
        assert_eq!(reduced.size, rec.size);
        assert!(reduced.hash_list.is_empty());
        assert!(reduced.owner.is_empty());
    }
}
