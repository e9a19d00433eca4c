//! Error taxonomy for segment operations (§7).

use thiserror::Error;

/// Errors produced by [`crate::Segment`] operations.
///
/// [`SegmentError::Full`] is the only expected, recoverable error: a caller
/// rolling segments in a write-ahead log treats it as a normal control-flow
/// signal, not a fault. Every other variant is fatal to the segment that
/// produced it — the caller must discard the [`crate::Segment`] state.
#[derive(Debug, Error)]
pub enum SegmentError {
    /// `append` was called with no index slots remaining (§3 invariant 3).
    #[error("segment is full")]
    Full,

    /// The segment header's version field did not equal the supported
    /// version (currently 1).
    #[error("unsupported segment version: {found}")]
    InvalidVersion {
        /// The version byte actually found in the header.
        found: u16,
    },

    /// Underlying filesystem operation failed.
    #[error("segment I/O error")]
    Io(#[from] std::io::Error),

    /// CRC32 recomputed over a payload did not match the stored checksum.
    #[error("checksum mismatch for raft index {raft_index}")]
    ChecksumMismatch {
        /// The raft index whose payload failed validation.
        raft_index: u64,
    },

    /// Payload length does not fit in the on-disk 32-bit length field.
    #[error("payload of {len} bytes does not fit in a u32 length field")]
    PayloadTooLarge {
        /// The rejected payload's length in bytes.
        len: usize,
    },

    /// The segment's cumulative data offset does not fit in the on-disk
    /// 32-bit `data_offset` field.
    #[error("segment data offset {offset} does not fit in a u32 field")]
    DataOffsetOverflow {
        /// The data offset the next append would have to record.
        offset: u64,
    },

    /// `append` was called on a segment opened in `read` mode.
    #[error("segment was not opened in append mode")]
    NotAppendMode,

    /// `read` was called on a segment opened in `append` mode.
    #[error("segment was not opened in read mode")]
    NotReadMode,
}
