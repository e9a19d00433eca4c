//! Binary layout for the segment header and index records (§4.1, §6.1).
//!
//! All integers are big-endian on the wire, per §9 ("Big-endian on wire").
//!
//! Note on record size: the spec's prose rounds the index record to "24
//! bytes" in several places, but explicitly types every field as
//! `raft_index:u64, raft_term:u64, data_offset:u32, length:u32, crc32:u32`,
//! which sums to 28 bytes. The field widths are the more specific and more
//! load-bearing statement (both counters are called out as 64-bit elsewhere
//! in the spec), so [`INDEX_RECORD_SIZE`] is 28 here; the "24" figure is
//! treated as a rounding slip in the prose, not a format requirement.

use crate::SegmentError;

/// Segment format version this crate reads and writes.
pub const CURRENT_VERSION: u16 = 1;

/// Size in bytes of the segment header.
pub const HEADER_SIZE: usize = 4;

/// Size in bytes of a single index record: 2×u64 + 3×u32.
pub const INDEX_RECORD_SIZE: usize = 28;

/// The 4-byte segment header: format version and declared capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u16,
    pub capacity: u16,
}

impl Header {
    /// Creates a header at [`CURRENT_VERSION`] with the given capacity.
    pub fn new(capacity: u16) -> Self {
        Self {
            version: CURRENT_VERSION,
            capacity,
        }
    }

    /// Encodes the header as 4 big-endian bytes.
    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.version.to_be_bytes());
        buf[2..4].copy_from_slice(&self.capacity.to_be_bytes());
        buf
    }

    /// Decodes a header from exactly 4 bytes.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::InvalidVersion`] if the decoded version is
    /// not [`CURRENT_VERSION`].
    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Result<Self, SegmentError> {
        let version = u16::from_be_bytes([buf[0], buf[1]]);
        let capacity = u16::from_be_bytes([buf[2], buf[3]]);
        if version != CURRENT_VERSION {
            return Err(SegmentError::InvalidVersion { found: version });
        }
        Ok(Self { version, capacity })
    }
}

/// A single fixed-width index record (§3 "Index record").
///
/// Positional within the index table: the i-th record (0-based) corresponds
/// to the i-th appended entry, not to `raft_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRecord {
    pub raft_index: u64,
    pub raft_term: u64,
    pub data_offset: u32,
    pub length: u32,
    pub crc32: u32,
}

impl IndexRecord {
    /// Encodes the record as [`INDEX_RECORD_SIZE`] big-endian bytes.
    pub fn to_bytes(self) -> [u8; INDEX_RECORD_SIZE] {
        let mut buf = [0u8; INDEX_RECORD_SIZE];
        buf[0..8].copy_from_slice(&self.raft_index.to_be_bytes());
        buf[8..16].copy_from_slice(&self.raft_term.to_be_bytes());
        buf[16..20].copy_from_slice(&self.data_offset.to_be_bytes());
        buf[20..24].copy_from_slice(&self.length.to_be_bytes());
        buf[24..28].copy_from_slice(&self.crc32.to_be_bytes());
        buf
    }

    /// Decodes an index record from exactly [`INDEX_RECORD_SIZE`] bytes.
    ///
    /// Does not itself distinguish the all-zero sentinel — callers scanning
    /// the index table check [`is_unwritten_slot`] first.
    pub fn from_bytes(buf: &[u8; INDEX_RECORD_SIZE]) -> Self {
        Self {
            raft_index: u64::from_be_bytes(buf[0..8].try_into().expect("8 bytes")),
            raft_term: u64::from_be_bytes(buf[8..16].try_into().expect("8 bytes")),
            data_offset: u32::from_be_bytes(buf[16..20].try_into().expect("4 bytes")),
            length: u32::from_be_bytes(buf[20..24].try_into().expect("4 bytes")),
            crc32: u32::from_be_bytes(buf[24..28].try_into().expect("4 bytes")),
        }
    }
}

/// Returns true if `buf` is the all-zero sentinel marking an unwritten slot
/// (§4.1 "Sentinel for unwritten slots").
pub fn is_unwritten_slot(buf: &[u8; INDEX_RECORD_SIZE]) -> bool {
    buf.iter().all(|&b| b == 0)
}
