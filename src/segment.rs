//! File lifecycle, append engine, and recovery for a single segment file
//! (§4.2, §4.3, §4.4, §4.5).

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::codec::{self, Header, IndexRecord};
use crate::crc32;
use crate::error::SegmentError;
use crate::options::{SegmentMode, SegmentOptions};

#[cfg(unix)]
fn write_at(file: &File, offset: u64, buf: &[u8]) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(not(unix))]
fn write_at(file: &File, offset: u64, buf: &[u8]) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut written = 0usize;
    while written < buf.len() {
        written += file.seek_write(&buf[written..], offset + written as u64)?;
    }
    Ok(())
}

#[cfg(unix)]
fn read_at(file: &File, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(not(unix))]
fn read_at(file: &File, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut read = 0usize;
    while read < buf.len() {
        let n = file.seek_read(&mut buf[read..], offset + read as u64)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "unexpected EOF"));
        }
        read += n;
    }
    Ok(())
}

/// A recovered index entry: everything `read` needs to serve a lookup
/// without re-decoding the on-disk record.
#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    raft_term: u64,
    offset: u64,
    length: u32,
    crc32: u32,
}

/// Scans the on-disk index table of an existing file (§4.3).
///
/// Returns the number of occupied slots, the data offset one past the last
/// recovered payload, and the raft-index-keyed map of recovered entries.
fn recover_index(
    file: &File,
    capacity: u32,
    data_start: u64,
) -> io::Result<(u32, u64, HashMap<u64, IndexEntry>)> {
    let file_len = file.metadata()?.len();
    if file_len <= codec::HEADER_SIZE as u64 {
        return Ok((0, data_start, HashMap::new()));
    }

    let index_region_len = u64::from(capacity) * codec::INDEX_RECORD_SIZE as u64;
    let available = (file_len - codec::HEADER_SIZE as u64).min(index_region_len);
    let mut buf = vec![0u8; available as usize];
    read_at(file, codec::HEADER_SIZE as u64, &mut buf)?;

    tracing::debug!(capacity, available, "scanning index table for recovery");

    let mut map = HashMap::new();
    let mut last_index: u64 = 0;
    let mut num_records: u32 = 0;
    let mut next_data_offset = data_start;

    for chunk in buf.chunks_exact(codec::INDEX_RECORD_SIZE) {
        let block: [u8; codec::INDEX_RECORD_SIZE] =
            chunk.try_into().expect("chunks_exact yields INDEX_RECORD_SIZE bytes");
        if codec::is_unwritten_slot(&block) {
            break;
        }

        let record = IndexRecord::from_bytes(&block);
        if record.raft_index < last_index {
            tracing::warn!(
                rewind_to = record.raft_index,
                previous = last_index,
                "detected rewind during recovery"
            );
            map.retain(|&k, _| k <= record.raft_index);
        }

        map.insert(
            record.raft_index,
            IndexEntry {
                raft_term: record.raft_term,
                offset: u64::from(record.data_offset),
                length: record.length,
                crc32: record.crc32,
            },
        );
        last_index = record.raft_index;
        next_data_offset = u64::from(record.data_offset) + u64::from(record.length);
        num_records += 1;
    }

    Ok((num_records, next_data_offset, map))
}

/// Rejects payloads whose length does not fit in the on-disk 32-bit length
/// field (§9 Open Question 2), before any write touches the file.
fn checked_payload_length(len: usize) -> Result<u32, SegmentError> {
    u32::try_from(len).map_err(|_| SegmentError::PayloadTooLarge { len })
}

/// An append-only log segment: a single file holding a bounded, indexed
/// range of entries (§2, §3).
#[derive(Debug)]
pub struct Segment {
    file: File,
    filename: PathBuf,
    mode: SegmentMode,
    capacity: u32,
    data_start: u64,
    index_offset: u64,
    data_offset: u64,
    num_records: u32,
    index: HashMap<u64, IndexEntry>,
}

impl Segment {
    /// Opens an existing segment or creates a new one (§4.2).
    ///
    /// `options.max_count` is only honored when the file does not already
    /// exist; an existing file's capacity is read from its header.
    pub fn open(path: impl AsRef<Path>, options: SegmentOptions) -> Result<Self, SegmentError> {
        let filename = path.as_ref().to_path_buf();
        let file = match options.mode {
            SegmentMode::Append => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(&filename)?,
            SegmentMode::Read => OpenOptions::new().read(true).open(&filename)?,
        };

        let file_len = file.metadata()?.len();
        let fresh = file_len == 0;

        let header = if fresh {
            if options.mode == SegmentMode::Read {
                return Err(SegmentError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "segment file has no header",
                )));
            }
            let capacity = u16::try_from(options.max_count).unwrap_or(u16::MAX);
            let header = Header::new(capacity);
            write_at(&file, 0, &header.to_bytes())?;
            tracing::info!(filename = %filename.display(), capacity, "created new segment");
            header
        } else {
            let mut header_buf = [0u8; codec::HEADER_SIZE];
            read_at(&file, 0, &mut header_buf)?;
            Header::from_bytes(&header_buf)?
        };

        let capacity = u32::from(header.capacity);
        let data_start =
            codec::HEADER_SIZE as u64 + u64::from(capacity) * codec::INDEX_RECORD_SIZE as u64;

        let (num_records, next_data_offset, map) = if fresh {
            (0, data_start, HashMap::new())
        } else {
            recover_index(&file, capacity, data_start)?
        };

        let index_offset =
            codec::HEADER_SIZE as u64 + u64::from(num_records) * codec::INDEX_RECORD_SIZE as u64;
        let index = if options.mode == SegmentMode::Read {
            map
        } else {
            HashMap::new()
        };

        Ok(Self {
            file,
            filename,
            mode: options.mode,
            capacity,
            data_start,
            index_offset,
            data_offset: next_data_offset,
            num_records,
            index,
        })
    }

    /// Appends an entry (§4.4).
    ///
    /// Returns [`SegmentError::Full`] without touching the file if no index
    /// slots remain.
    pub fn append(&mut self, raft_index: u64, raft_term: u64, payload: &[u8]) -> Result<(), SegmentError> {
        if self.mode != SegmentMode::Append {
            return Err(SegmentError::NotAppendMode);
        }
        if self.is_full() {
            return Err(SegmentError::Full);
        }

        let length = checked_payload_length(payload.len())?;
        let data_offset = u32::try_from(self.data_offset)
            .map_err(|_| SegmentError::DataOffsetOverflow { offset: self.data_offset })?;

        let record = IndexRecord {
            raft_index,
            raft_term,
            data_offset,
            length,
            crc32: crc32::crc32(payload),
        };

        write_at(&self.file, self.data_offset, payload)?;
        write_at(&self.file, self.index_offset, &record.to_bytes())?;

        self.data_offset += u64::from(length);
        self.index_offset += codec::INDEX_RECORD_SIZE as u64;
        self.num_records += 1;

        Ok(())
    }

    /// Random-access read by raft index (§4.5).
    ///
    /// Indices in `[start_index, start_index + count)` absent from the
    /// recovered map are silently skipped.
    pub fn read(&self, start_index: u64, count: u64) -> Result<Vec<(u64, u64, Bytes)>, SegmentError> {
        if self.mode != SegmentMode::Read {
            return Err(SegmentError::NotReadMode);
        }

        let mut results = Vec::new();
        for raft_index in start_index..start_index.saturating_add(count) {
            let Some(entry) = self.index.get(&raft_index) else {
                continue;
            };
            let mut buf = vec![0u8; entry.length as usize];
            read_at(&self.file, entry.offset, &mut buf)?;
            let computed = crc32::crc32(&buf);
            if computed != entry.crc32 {
                return Err(SegmentError::ChecksumMismatch { raft_index });
            }
            results.push((raft_index, entry.raft_term, Bytes::from(buf)));
        }
        Ok(results)
    }

    /// Forces buffered writes and metadata to durable storage. The only
    /// durability primitive this type offers; `append` never implies it.
    pub fn sync(&self) -> Result<(), SegmentError> {
        self.file.sync_all().map_err(|error| {
            tracing::error!(filename = %self.filename.display(), %error, "segment sync failed");
            SegmentError::Io(error)
        })
    }

    /// Releases the file handle. Single-shot; not required to be callable
    /// twice.
    pub fn close(self) -> Result<(), SegmentError> {
        tracing::info!(filename = %self.filename.display(), "closing segment");
        Ok(())
    }

    #[must_use]
    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// The capacity this segment was created with (frozen at creation).
    #[must_use]
    pub fn max_count(&self) -> u32 {
        self.capacity
    }

    /// Alias for [`Segment::max_count`].
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[must_use]
    pub fn mode(&self) -> SegmentMode {
        self.mode
    }

    /// Number of occupied index slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.num_records as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_records == 0
    }

    /// True iff every index slot is occupied (§3 invariant 3).
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.index_offset == self.data_start
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SegmentError;
    use tempfile::tempdir;

    fn segment_path(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        dir.path().join(name)
    }

    #[test]
    fn capacity_bound_rejects_after_full() {
        let dir = tempdir().unwrap();
        let path = segment_path(&dir, "s.seg");
        let mut seg = Segment::open(&path, SegmentOptions::new().with_max_count(2)).unwrap();

        seg.append(1, 1, b"a").unwrap();
        seg.append(2, 1, b"b").unwrap();
        let data_offset_before = seg.data_offset;
        let err = seg.append(3, 1, b"c").unwrap_err();
        assert!(matches!(err, SegmentError::Full));
        assert_eq!(seg.data_offset, data_offset_before);
    }

    #[test]
    fn append_then_read_round_trip() {
        let dir = tempdir().unwrap();
        let path = segment_path(&dir, "s.seg");
        let mut seg = Segment::open(&path, SegmentOptions::new().with_max_count(4)).unwrap();
        seg.append(10, 1, b"abc").unwrap();
        seg.sync().unwrap();
        seg.close().unwrap();

        let reader = Segment::open(&path, SegmentOptions::new().with_mode(SegmentMode::Read)).unwrap();
        let got = reader.read(10, 1).unwrap();
        assert_eq!(got, vec![(10, 1, Bytes::from_static(b"abc"))]);
    }

    #[test]
    fn rewind_discards_higher_slots() {
        let dir = tempdir().unwrap();
        let path = segment_path(&dir, "s.seg");
        let mut seg = Segment::open(&path, SegmentOptions::new().with_max_count(8)).unwrap();
        seg.append(5, 1, b"x").unwrap();
        seg.append(6, 1, b"y").unwrap();
        seg.append(7, 1, b"z").unwrap();
        seg.append(4, 2, b"w").unwrap();
        seg.close().unwrap();

        let reader = Segment::open(&path, SegmentOptions::new().with_mode(SegmentMode::Read)).unwrap();
        assert_eq!(reader.len(), 4);
        assert_eq!(reader.read(4, 1).unwrap(), vec![(4, 2, Bytes::from_static(b"w"))]);
        assert_eq!(reader.read(5, 1).unwrap(), vec![(5, 1, Bytes::from_static(b"x"))]);
        assert_eq!(reader.read(6, 1).unwrap(), vec![]);
        assert_eq!(reader.read(7, 1).unwrap(), vec![]);
    }

    #[test]
    fn checksum_mismatch_is_detected() {
        use std::io::{Seek, SeekFrom, Write};

        let dir = tempdir().unwrap();
        let path = segment_path(&dir, "s.seg");
        let mut seg = Segment::open(&path, SegmentOptions::new().with_max_count(2)).unwrap();
        seg.append(1, 1, b"abc").unwrap();
        seg.close().unwrap();

        {
            let mut file = OpenOptions::new().write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(seg_data_start(&path))).unwrap();
            file.write_all(b"X").unwrap();
        }

        let reader = Segment::open(&path, SegmentOptions::new().with_mode(SegmentMode::Read)).unwrap();
        let err = reader.read(1, 1).unwrap_err();
        assert!(matches!(err, SegmentError::ChecksumMismatch { raft_index: 1 }));
    }

    fn seg_data_start(path: &Path) -> u64 {
        let mut header_buf = [0u8; codec::HEADER_SIZE];
        let file = File::open(path).unwrap();
        read_at(&file, 0, &mut header_buf).unwrap();
        let header = Header::from_bytes(&header_buf).unwrap();
        codec::HEADER_SIZE as u64 + u64::from(header.capacity) * codec::INDEX_RECORD_SIZE as u64
    }

    #[test]
    fn version_mismatch_is_fatal() {
        use std::io::Write;

        let dir = tempdir().unwrap();
        let path = segment_path(&dir, "s.seg");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .open(&path)
                .unwrap();
            file.write_all(&[0x00, 0x02, 0x00, 0x10]).unwrap();
        }

        let err = Segment::open(&path, SegmentOptions::default()).unwrap_err();
        assert!(matches!(err, SegmentError::InvalidVersion { found: 2 }));
    }

    #[test]
    fn header_bytes_never_change_after_creation() {
        let dir = tempdir().unwrap();
        let path = segment_path(&dir, "s.seg");
        let mut seg = Segment::open(&path, SegmentOptions::new().with_max_count(4)).unwrap();
        seg.append(1, 1, b"a").unwrap();
        seg.close().unwrap();

        let mut header_buf = [0u8; codec::HEADER_SIZE];
        let file = File::open(&path).unwrap();
        read_at(&file, 0, &mut header_buf).unwrap();
        assert_eq!(header_buf, [0x00, 0x01, 0x00, 0x04]);
    }

    #[test]
    fn checked_payload_length_rejects_oversized() {
        assert_eq!(checked_payload_length(0).unwrap(), 0);
        assert_eq!(checked_payload_length(u32::MAX as usize).unwrap(), u32::MAX);
        let err = checked_payload_length(u32::MAX as usize + 1).unwrap_err();
        assert!(matches!(err, SegmentError::PayloadTooLarge { len } if len == u32::MAX as usize + 1));
    }

    #[test]
    fn append_reports_data_offset_overflow_instead_of_panicking() {
        let dir = tempdir().unwrap();
        let path = segment_path(&dir, "s.seg");
        let mut seg = Segment::open(&path, SegmentOptions::new().with_max_count(4)).unwrap();
        // Simulate a segment whose cumulative payload bytes already exceed
        // what the on-disk u32 data_offset field can represent, without
        // actually writing 4 GiB of payload.
        seg.data_offset = u64::from(u32::MAX) + 1;

        let err = seg.append(1, 1, b"x").unwrap_err();
        assert!(matches!(
            err,
            SegmentError::DataOffsetOverflow { offset } if offset == u64::from(u32::MAX) + 1
        ));
    }
}
