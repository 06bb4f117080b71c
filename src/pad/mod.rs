//! Pad addressing: identifiers and consumed-range bookkeeping.
//!
//! A pad is an immutable, read-only byte source of known length,
//! addressable by absolute offset. This module owns the data that
//! describes *which* stretches of a pad have been consumed, and the
//! two ways of fingerprinting a pad (current and legacy) used to key
//! those records. The persistent store built on top of this is
//! [`store::PadRecordsStore`].

pub mod store;

use std::io::{Read, Seek, SeekFrom};

use digest::Digest;
use sha1::Sha1;
use sha2::Sha256;

use crate::{Error, Result};

/// Number of bytes at the front of every pad reserved for the
/// identifier stretch. `next_offset` never returns a value smaller
/// than this, even for a freshly-registered pad.
pub const ID_SOURCE_LENGTH: u64 = 32;

/// Number of leading bytes hashed to produce the legacy (v1) pad
/// identifier.
const LEGACY_ID_SOURCE_LENGTH: u64 = 1024;

/// A single consumed byte range of a pad: `[offset, offset + length)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct UsedRange {
    /// Absolute offset into the pad where this range begins.
    pub offset: u64,
    /// Number of bytes consumed starting at `offset`.
    pub length: u64,
}

impl UsedRange {
    /// Creates a new used range.
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// The offset one past the end of this range.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Computes the current (format-2) pad identifier: the lowercase hex
/// SHA-256 digest of the first [`ID_SOURCE_LENGTH`] bytes of the pad.
///
/// Leaves the reader's position unchanged.
pub fn current_identifier<R: Read + Seek>(pad: &mut R) -> Result<String> {
    hash_prefix_hex::<Sha256, _>(pad, ID_SOURCE_LENGTH)
}

/// Computes the legacy (format-1) pad identifier: the lowercase hex
/// SHA-1 digest of the first 1024 bytes of the pad.
///
/// Leaves the reader's position unchanged.
pub fn legacy_identifier<R: Read + Seek>(pad: &mut R) -> Result<String> {
    hash_prefix_hex::<Sha1, _>(pad, LEGACY_ID_SOURCE_LENGTH)
}

fn hash_prefix_hex<D, R>(pad: &mut R, len: u64) -> Result<String>
where
    D: Digest,
    R: Read + Seek,
{
    let saved = pad.stream_position()?;
    pad.seek(SeekFrom::Start(0))?;
    let mut remaining = len;
    let mut hasher = D::new();
    let mut buf = [0u8; 4096];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = pad.read(&mut buf[..want])?;
        if n == 0 {
            pad.seek(SeekFrom::Start(saved))?;
            return Err(Error::PadTooShort(format!(
                "pad shorter than the {len}-byte identifier stretch"
            )));
        }
        hasher.update(&buf[..n]);
        remaining -= n as u64;
    }
    pad.seek(SeekFrom::Start(saved))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Consolidates a list of used ranges, merging any that overlap or
/// touch, and returns the shortest equivalent sorted list.
///
/// If `allow_overlap` is `false`, a true overlap (a successor range
/// that begins strictly inside its predecessor) is a
/// [`Error::Configuration`] error; ranges that merely touch
/// (`successor.offset == predecessor.end()`) always merge without
/// error. If `allow_overlap` is `true`, any overlap is tolerated and
/// merged.
pub fn consolidate(ranges: &[UsedRange], allow_overlap: bool) -> Result<Vec<UsedRange>> {
    let mut sorted: Vec<UsedRange> = ranges.to_vec();
    sorted.sort_by_key(|r| r.offset);

    let mut out: Vec<UsedRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match out.last_mut() {
            Some(last) if range.offset <= last.end() => {
                if range.offset < last.end() && !allow_overlap {
                    return Err(Error::Configuration(format!(
                        "pad's used ranges are incoherent: {range:?} overlaps {last:?}"
                    )));
                }
                if range.end() > last.end() {
                    last.length = range.end() - last.offset;
                }
            }
            _ => out.push(range),
        }
    }
    Ok(out)
}

/// Returns the next offset available for use, given a pad's
/// consolidated used ranges.
///
/// Only the *last* range is consulted; gaps between earlier ranges
/// are never reclaimed. This is a deliberate simplicity-over-density
/// tradeoff carried over from the original implementation (see
/// SPEC_FULL.md's Open Questions).
pub fn next_offset(consolidated: &[UsedRange]) -> u64 {
    consolidated
        .last()
        .map(|r| r.end())
        .filter(|&end| end >= ID_SOURCE_LENGTH)
        .unwrap_or(ID_SOURCE_LENGTH)
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let bytes = bytes.as_ref();
        let mut s = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            write!(&mut s, "{b:02x}").expect("writing to a String never fails");
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;
    use std::io::Cursor;

    #[test]
    fn identifier_matches_known_vector() {
        // sha256("A" * 32) and sha1("A" * 1024), computed out of band.
        let pad = vec![b'A'; 2048];
        let mut cur = Cursor::new(pad);
        let id = current_identifier(&mut cur).unwrap();
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        let legacy = legacy_identifier(&mut cur).unwrap();
        assert_eq!(legacy.len(), 40);
    }

    #[test]
    fn identifier_leaves_position_unchanged() {
        let pad = vec![7u8; 4096];
        let mut cur = Cursor::new(pad);
        cur.seek(SeekFrom::Start(100)).unwrap();
        current_identifier(&mut cur).unwrap();
        assert_eq!(cur.stream_position().unwrap(), 100);
    }

    #[test]
    fn identifier_rejects_short_pad() {
        let pad = vec![1u8; 10];
        let mut cur = Cursor::new(pad);
        assert!(current_identifier(&mut cur).is_err());
    }

    #[test]
    fn consolidate_merges_touching_and_overlapping() {
        let ranges = [
            UsedRange::new(0, 10),
            UsedRange::new(10, 20),
            UsedRange::new(20, 25),
        ];
        let got = consolidate(&ranges, false).unwrap();
        assert_eq!(got, vec![UsedRange::new(0, 25)]);
    }

    #[test]
    fn consolidate_rejects_overlap_unless_allowed() {
        let ranges = [UsedRange::new(0, 10), UsedRange::new(5, 10)];
        assert!(consolidate(&ranges, false).is_err());
        let got = consolidate(&ranges, true).unwrap();
        assert_eq!(got, vec![UsedRange::new(0, 15)]);
    }

    #[test]
    fn consolidate_keeps_disjoint_ranges_separate() {
        let ranges = [UsedRange::new(0, 10), UsedRange::new(50, 10)];
        let got = consolidate(&ranges, false).unwrap();
        assert_eq!(got, ranges.to_vec());
    }

    #[test]
    fn next_offset_floor_is_id_source_length() {
        assert_eq!(next_offset(&[]), ID_SOURCE_LENGTH);
        assert_eq!(next_offset(&[UsedRange::new(0, 5)]), ID_SOURCE_LENGTH);
        assert_eq!(next_offset(&[UsedRange::new(0, 40)]), 40);
    }

    fn to_ranges(raw: Vec<(u64, u8)>) -> Vec<UsedRange> {
        raw.into_iter()
            .map(|(o, l)| UsedRange::new(o % 1000, l as u64 + 1))
            .collect()
    }

    quickcheck! {
        fn consolidation_is_idempotent(raw: Vec<(u64, u8)>) -> bool {
            let ranges = to_ranges(raw);
            let once = match consolidate(&ranges, true) {
                Ok(r) => r,
                Err(_) => return true,
            };
            let twice = consolidate(&once, true).unwrap();
            once == twice
        }

        fn consolidation_preserves_cover(raw: Vec<(u64, u8)>) -> bool {
            let ranges = to_ranges(raw);
            let consolidated = match consolidate(&ranges, true) {
                Ok(r) => r,
                Err(_) => return true,
            };
            let mut before: Vec<u64> = ranges
                .iter()
                .flat_map(|r| r.offset..r.end())
                .collect();
            let mut after: Vec<u64> = consolidated
                .iter()
                .flat_map(|r| r.offset..r.end())
                .collect();
            before.sort_unstable();
            before.dedup();
            after.sort_unstable();
            after.dedup();
            before == after
        }
    }
}
