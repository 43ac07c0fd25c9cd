//! Blob Engine
//!
//! Append-only record store backing the blob adapter.
//!
//! ## Responsibilities
//! - Append records as disk-control + data into segment files
//! - Rotate segments by size and record count
//! - Rebuild the in-memory key index by scanning segments on open
//! - Mark removals in place; reclaim space via defrag compaction
//! - Serve zero-copy lookups as write controls (fd + offsets)
//!
//! ## Concurrency
//! All state sits behind a single RwLock: lookups and range scans take the
//! read side, mutations the write side. Write controls carry shared file
//! handles, so replies keep reading a segment even after defrag has renamed
//! or unlinked it.

mod disk;
mod segment;

pub use disk::{ctlflags, DiskControl, CTL_CSUM_OFFSET, CTL_FLAGS_OFFSET, CTL_LEN};
pub use segment::Segment;

use std::collections::BTreeMap;
use std::fs::File;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::BackendConfig;
use crate::error::{BlobError, Result};
use crate::protocol::{dump_key, Key};

/// Defrag has never run
pub const DEFRAG_IDLE: i32 = 0;
/// Defrag is running
pub const DEFRAG_IN_PROGRESS: i32 = 1;
/// The last defrag run finished
pub const DEFRAG_COMPLETED: i32 = 2;

/// One write vector: `data` placed at `offset` within the record
#[derive(Debug, Clone, Copy)]
pub struct IoVec<'a> {
    pub offset: u64,
    pub data: &'a [u8],
}

/// Checksum behaviour for lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFlavour {
    /// Verify the stored checksum before returning
    Csum,
    /// Skip verification
    NoCsum,
}

/// Descriptor for serving a record without copying it
///
/// The engine owns the file handle; holders read through the shared handle
/// and must not close the descriptor.
#[derive(Debug, Clone)]
pub struct WriteControl {
    /// Raw descriptor of the segment holding the record
    pub data_fd: RawFd,

    /// Shared handle behind `data_fd`
    pub handle: Arc<File>,

    /// Offset of the record's disk control within the segment
    pub ctl_data_offset: u64,

    /// Offset of the record data (extension header included, if any)
    pub data_offset: u64,

    /// Recorded data size
    pub size: u64,

    /// Recorded data size (alias kept for read-path arithmetic)
    pub total_data_size: u64,

    /// Record flags (`ctlflags`)
    pub flags: u64,
}

/// State of one range scan
#[derive(Debug, Clone)]
pub struct RangeScan {
    pub start: Key,
    pub end: Key,
    pub requested_offset: u64,
    pub requested_size: u64,
    pub requested_limit_start: u64,
    pub requested_limit_num: u64,

    /// Hits accepted so far; incremented by the caller's callback
    pub current_pos: u64,
}

impl RangeScan {
    /// Unlimited scan over `[start, end]`
    pub fn new(start: Key, end: Key, requested_offset: u64, requested_size: u64) -> Self {
        Self {
            start,
            end,
            requested_offset,
            requested_size,
            requested_limit_start: 0,
            requested_limit_num: u64::MAX,
            current_pos: 0,
        }
    }
}

/// One hit produced by a range scan
///
/// A flat copy: nothing here borrows engine memory, so collected hits stay
/// valid after the scan returns.
#[derive(Debug, Clone)]
pub struct RangeHit {
    pub record_key: Key,
    pub record_fd: RawFd,
    pub handle: Arc<File>,

    /// Offset of the record data within the descriptor
    pub record_offset: u64,

    /// Recorded data size
    pub record_size: u64,

    pub requested_offset: u64,
    pub requested_size: u64,
}

#[derive(Debug, Clone)]
struct RecordMeta {
    segment: usize,
    ctl_offset: u64,
    data_size: u64,
    disk_size: u64,
    flags: u64,
}

struct EngineInner {
    segments: Vec<Segment>,
    index: BTreeMap<Key, RecordMeta>,
    removed: u64,
}

/// Append-only blob engine
pub struct BlobEngine {
    config: BackendConfig,
    inner: RwLock<EngineInner>,
    defrag_state: AtomicI32,
}

impl BlobEngine {
    /// Open the engine, creating or scanning segment files under the
    /// configured data path
    pub fn open(config: &BackendConfig) -> Result<Self> {
        if let Some(parent) = config.data.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut inner = EngineInner {
            segments: Vec::new(),
            index: BTreeMap::new(),
            removed: 0,
        };

        // Discover existing segments in ordinal order
        let mut ordinal = 0u32;
        while Segment::path_for(&config.data, ordinal).exists() {
            let mut segment = Segment::open(&config.data, ordinal)?;
            scan_segment(&mut segment, inner.segments.len(), &mut inner)?;
            inner.segments.push(segment);
            ordinal += 1;
        }

        if inner.segments.is_empty() {
            inner.segments.push(Segment::create(&config.data, 0)?);
        }

        tracing::info!(
            segments = inner.segments.len(),
            records = inner.index.len(),
            removed = inner.removed,
            "blob engine opened"
        );

        Ok(Self {
            config: config.clone(),
            inner: RwLock::new(inner),
            defrag_state: AtomicI32::new(DEFRAG_IDLE),
        })
    }

    // =========================================================================
    // Write path
    // =========================================================================

    /// Reserve `size` bytes for `key` without committing data
    pub fn write_prepare(&self, key: &Key, size: u64, flags: u64) -> Result<()> {
        let mut inner = self.inner.write();

        retire_previous(&mut inner, key)?;

        let needed = CTL_LEN as u64 + size;
        let seg_idx = writable_segment(&self.config, &mut inner, needed)?;
        let segment = &mut inner.segments[seg_idx];
        let ctl_offset = segment.reserve(needed);

        let ctl = DiskControl {
            key: *key,
            flags: (flags & ctlflags::PERSIST_MASK) | ctlflags::UNCOMMITTED,
            data_size: size,
            disk_size: size,
            checksum: 0,
        };
        segment.write_at(&ctl.to_bytes(), ctl_offset)?;
        zero_fill(segment, ctl_offset + CTL_LEN as u64, size)?;
        if self.config.sync == 0 {
            segment.sync()?;
        }

        inner.index.insert(
            *key,
            RecordMeta {
                segment: seg_idx,
                ctl_offset,
                data_size: size,
                disk_size: size,
                flags: ctl.flags,
            },
        );

        Ok(())
    }

    /// Verifying vectored write: appends a new record, reads it back and
    /// compares checksums
    pub fn writev(&self, key: &Key, iovs: &[IoVec<'_>], flags: u64) -> Result<WriteControl> {
        let mut inner = self.inner.write();

        let data = assemble_record(&inner, key, iovs, flags)?;
        let checksum = if flags & ctlflags::NOCSUM == 0 {
            crc32(&data)
        } else {
            0
        };

        retire_previous(&mut inner, key)?;

        let needed = CTL_LEN as u64 + data.len() as u64;
        let seg_idx = writable_segment(&self.config, &mut inner, needed)?;
        let segment = &mut inner.segments[seg_idx];
        let ctl_offset = segment.reserve(needed);
        let data_offset = ctl_offset + CTL_LEN as u64;

        let ctl = DiskControl {
            key: *key,
            flags: flags & ctlflags::PERSIST_MASK,
            data_size: data.len() as u64,
            disk_size: data.len() as u64,
            checksum,
        };
        segment.write_at(&ctl.to_bytes(), ctl_offset)?;
        segment.write_at(&data, data_offset)?;
        if self.config.sync == 0 {
            segment.sync()?;
        }

        // Read-back verification
        if flags & ctlflags::NOCSUM == 0 {
            let mut back = vec![0u8; data.len()];
            segment.read_at(&mut back, data_offset)?;
            if crc32(&back) != checksum {
                return Err(BlobError::Corrupt(format!(
                    "{}: write verification failed",
                    dump_key(key)
                )));
            }
        }

        let control = WriteControl {
            data_fd: segment.file.as_raw_fd(),
            handle: Arc::clone(&segment.file),
            ctl_data_offset: ctl_offset,
            data_offset,
            size: ctl.data_size,
            total_data_size: ctl.data_size,
            flags: ctl.flags,
        };

        inner.index.insert(
            *key,
            RecordMeta {
                segment: seg_idx,
                ctl_offset,
                data_size: ctl.data_size,
                disk_size: ctl.disk_size,
                flags: ctl.flags,
            },
        );

        Ok(control)
    }

    /// Plain vectored write into an existing record; no read-back
    pub fn plain_writev(&self, key: &Key, iovs: &[IoVec<'_>], _flags: u64) -> Result<()> {
        let mut inner = self.inner.write();

        let meta = inner.index.get(key).cloned().ok_or(BlobError::NotFound)?;
        for iov in iovs {
            let end = iov.offset + iov.data.len() as u64;
            if end > meta.disk_size {
                return Err(BlobError::OutOfRange(format!(
                    "{}: plain write end {} exceeds reservation {}",
                    dump_key(key),
                    end,
                    meta.disk_size
                )));
            }
        }

        let segment = &inner.segments[meta.segment];
        let data_offset = meta.ctl_offset + CTL_LEN as u64;
        for iov in iovs {
            segment.write_at(iov.data, data_offset + iov.offset)?;
        }

        // Committed records keep a live checksum; reservations get theirs
        // at commit
        if meta.flags & (ctlflags::UNCOMMITTED | ctlflags::NOCSUM) == 0 {
            let mut data = vec![0u8; meta.data_size as usize];
            segment.read_at(&mut data, data_offset)?;
            segment.write_at(&crc32(&data).to_le_bytes(), meta.ctl_offset + CTL_CSUM_OFFSET)?;
        }

        if self.config.sync == 0 {
            segment.sync()?;
        }

        Ok(())
    }

    /// Finalize a reservation at `size` committed bytes
    pub fn write_commit(&self, key: &Key, size: u64, flags: u64) -> Result<()> {
        let mut inner = self.inner.write();

        let meta = inner.index.get(key).cloned().ok_or(BlobError::NotFound)?;
        if size > meta.disk_size {
            return Err(BlobError::OutOfRange(format!(
                "{}: commit size {} exceeds reservation {}",
                dump_key(key),
                size,
                meta.disk_size
            )));
        }

        let segment = &inner.segments[meta.segment];
        let data_offset = meta.ctl_offset + CTL_LEN as u64;

        let final_flags =
            (meta.flags | (flags & ctlflags::PERSIST_MASK)) & !ctlflags::UNCOMMITTED;
        let checksum = if final_flags & ctlflags::NOCSUM == 0 {
            let mut data = vec![0u8; size as usize];
            segment.read_at(&mut data, data_offset)?;
            crc32(&data)
        } else {
            0
        };

        let ctl = DiskControl {
            key: *key,
            flags: final_flags,
            data_size: size,
            disk_size: meta.disk_size,
            checksum,
        };
        segment.write_at(&ctl.to_bytes(), meta.ctl_offset)?;
        if self.config.sync == 0 {
            segment.sync()?;
        }

        inner.index.insert(
            *key,
            RecordMeta {
                data_size: size,
                flags: final_flags,
                ..meta
            },
        );

        Ok(())
    }

    // =========================================================================
    // Read path
    // =========================================================================

    /// Look up `key` and return a descriptor for serving it
    pub fn lookup(&self, key: &Key, flavour: ReadFlavour) -> Result<WriteControl> {
        let inner = self.inner.read();

        let meta = inner.index.get(key).ok_or(BlobError::NotFound)?;
        let segment = &inner.segments[meta.segment];
        let data_offset = meta.ctl_offset + CTL_LEN as u64;

        if flavour == ReadFlavour::Csum
            && meta.flags & (ctlflags::NOCSUM | ctlflags::UNCOMMITTED) == 0
        {
            let mut ctl_bytes = [0u8; CTL_LEN];
            segment.read_at(&mut ctl_bytes, meta.ctl_offset)?;
            let ctl = DiskControl::from_bytes(&ctl_bytes)?;

            let mut data = vec![0u8; meta.data_size as usize];
            segment.read_at(&mut data, data_offset)?;
            if crc32(&data) != ctl.checksum {
                return Err(BlobError::Corrupt(format!(
                    "{}: checksum mismatch",
                    dump_key(key)
                )));
            }
        }

        Ok(WriteControl {
            data_fd: segment.file.as_raw_fd(),
            handle: Arc::clone(&segment.file),
            ctl_data_offset: meta.ctl_offset,
            data_offset,
            size: meta.data_size,
            total_data_size: meta.data_size,
            flags: meta.flags,
        })
    }

    /// Remove `key`: drop the index entry and flip the removal bit in place
    pub fn remove(&self, key: &Key) -> Result<()> {
        let mut inner = self.inner.write();

        let meta = inner.index.remove(key).ok_or(BlobError::NotFound)?;
        let segment = &inner.segments[meta.segment];
        let flags = (meta.flags | ctlflags::REMOVED) & ctlflags::PERSIST_MASK;
        segment.write_at(
            &flags.to_le_bytes(),
            meta.ctl_offset + CTL_FLAGS_OFFSET,
        )?;
        if self.config.sync == 0 {
            segment.sync()?;
        }

        inner.removed += 1;
        Ok(())
    }

    /// Scan keys in `[scan.start, scan.end]`, invoking `callback` for each
    /// live record
    pub fn read_range<F>(&self, scan: &mut RangeScan, mut callback: F) -> Result<()>
    where
        F: FnMut(&mut RangeScan, RangeHit) -> Result<()>,
    {
        if scan.start > scan.end {
            return Ok(());
        }

        let inner = self.inner.read();

        let mut offered = 0u64;
        let mut emitted = 0u64;
        for (key, meta) in inner.index.range(scan.start..=scan.end) {
            if offered < scan.requested_limit_start {
                offered += 1;
                continue;
            }
            if emitted >= scan.requested_limit_num {
                break;
            }
            offered += 1;
            emitted += 1;

            let segment = &inner.segments[meta.segment];
            let hit = RangeHit {
                record_key: *key,
                record_fd: segment.file.as_raw_fd(),
                handle: Arc::clone(&segment.file),
                record_offset: meta.ctl_offset + CTL_LEN as u64,
                record_size: meta.data_size,
                requested_offset: scan.requested_offset,
                requested_size: scan.requested_size,
            };
            callback(scan, hit)?;
        }

        Ok(())
    }

    /// Read-only iteration over all live records, in segment order
    pub fn iterate<F>(&self, mut callback: F) -> Result<()>
    where
        F: FnMut(&Key, u64, &[u8]) -> Result<()>,
    {
        let inner = self.inner.read();

        let mut by_segment: Vec<Vec<(&Key, &RecordMeta)>> =
            (0..inner.segments.len()).map(|_| Vec::new()).collect();
        for (key, meta) in &inner.index {
            by_segment[meta.segment].push((key, meta));
        }

        for records in &mut by_segment {
            records.sort_by_key(|&(_, meta)| meta.ctl_offset);
            for &(key, meta) in records.iter() {
                let segment = &inner.segments[meta.segment];
                let mut data = vec![0u8; meta.data_size as usize];
                segment.read_at(&mut data, meta.ctl_offset + CTL_LEN as u64)?;
                callback(key, meta.flags, &data)?;
            }
        }

        Ok(())
    }

    // =========================================================================
    // Defrag
    // =========================================================================

    /// Start a defrag run; returns 0 on success or a negated errno
    pub fn start_defrag(&self) -> i32 {
        if self.defrag_state.swap(DEFRAG_IN_PROGRESS, Ordering::SeqCst) == DEFRAG_IN_PROGRESS {
            return -libc::EALREADY;
        }

        match self.compact() {
            Ok(()) => {
                self.defrag_state.store(DEFRAG_COMPLETED, Ordering::SeqCst);
                0
            }
            Err(e) => {
                tracing::error!(error = %e, "defrag failed");
                self.defrag_state.store(DEFRAG_IDLE, Ordering::SeqCst);
                e.to_errno()
            }
        }
    }

    /// Current defrag state
    pub fn defrag_status(&self) -> i32 {
        self.defrag_state.load(Ordering::SeqCst)
    }

    /// Rewrite live records into fresh segments and drop the old files
    fn compact(&self) -> Result<()> {
        let mut inner = self.inner.write();

        let old_paths: Vec<_> = inner.segments.iter().map(|s| s.path.clone()).collect();

        // Copy live records into temporary segments, preserving segment order
        let mut by_segment: Vec<Vec<(Key, RecordMeta)>> =
            (0..inner.segments.len()).map(|_| Vec::new()).collect();
        for (key, meta) in &inner.index {
            by_segment[meta.segment].push((*key, meta.clone()));
        }

        let tmp_base = {
            let mut name = self.config.data.as_os_str().to_os_string();
            name.push(".defrag");
            std::path::PathBuf::from(name)
        };

        let mut new_segments = vec![Segment::create(&tmp_base, 0)?];
        let mut new_index = BTreeMap::new();

        for records in &mut by_segment {
            records.sort_by_key(|(_, meta)| meta.ctl_offset);
            for (key, meta) in records.iter() {
                let old_segment = &inner.segments[meta.segment];
                let total = CTL_LEN as u64 + meta.disk_size;
                let mut buf = vec![0u8; total as usize];
                old_segment.read_at(&mut buf, meta.ctl_offset)?;

                let seg_idx = rotate_for(&self.config, &mut new_segments, &tmp_base, total)?;
                let segment = &mut new_segments[seg_idx];
                let ctl_offset = segment.reserve(total);
                segment.write_at(&buf, ctl_offset)?;

                new_index.insert(
                    *key,
                    RecordMeta {
                        segment: seg_idx,
                        ctl_offset,
                        ..meta.clone()
                    },
                );
            }
        }

        // Publish: sync, rename over the live names, drop leftovers
        for segment in &mut new_segments {
            segment.sync()?;
            let final_path = Segment::path_for(&self.config.data, segment.ordinal);
            std::fs::rename(&segment.path, &final_path)?;
            segment.path = final_path;
        }
        for old in old_paths.iter().skip(new_segments.len()) {
            std::fs::remove_file(old)?;
        }

        let reclaimed = inner.removed;
        inner.segments = new_segments;
        inner.index = new_index;
        inner.removed = 0;

        tracing::info!(
            reclaimed,
            segments = inner.segments.len(),
            records = inner.index.len(),
            "defrag completed"
        );

        Ok(())
    }

    // =========================================================================
    // Stats & lifecycle
    // =========================================================================

    /// Number of live records
    pub fn total_records(&self) -> u64 {
        self.inner.read().index.len() as u64
    }

    /// Number of removed records awaiting defrag
    pub fn removed_records(&self) -> u64 {
        self.inner.read().removed
    }

    /// Fsync all segments (called on backend cleanup)
    pub fn sync_all(&self) -> Result<()> {
        let inner = self.inner.read();
        for segment in &inner.segments {
            segment.sync()?;
        }
        Ok(())
    }
}

// =============================================================================
// Private Helpers
// =============================================================================

fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Zero a freshly reserved region in bounded chunks
fn zero_fill(segment: &Segment, offset: u64, len: u64) -> Result<()> {
    const CHUNK: u64 = 64 * 1024;
    let zeros = vec![0u8; CHUNK as usize];

    let mut written = 0u64;
    while written < len {
        let step = (len - written).min(CHUNK);
        segment.write_at(&zeros[..step as usize], offset + written)?;
        written += step;
    }
    Ok(())
}

/// Mark the previous record for `key` removed, if any
fn retire_previous(inner: &mut EngineInner, key: &Key) -> Result<()> {
    if let Some(old) = inner.index.remove(key) {
        let segment = &inner.segments[old.segment];
        let flags = (old.flags | ctlflags::REMOVED) & ctlflags::PERSIST_MASK;
        segment.write_at(&flags.to_le_bytes(), old.ctl_offset + CTL_FLAGS_OFFSET)?;
        inner.removed += 1;
    }
    Ok(())
}

/// Pick (or rotate to) the segment that takes the next `needed` bytes
fn writable_segment(
    config: &BackendConfig,
    inner: &mut EngineInner,
    needed: u64,
) -> Result<usize> {
    if config.blob_size_limit > 0 {
        let total: u64 = inner.segments.iter().map(|s| s.size).sum();
        if total + needed > config.blob_size_limit {
            return Err(BlobError::Engine(format!(
                "blob size limit {} reached",
                config.blob_size_limit
            )));
        }
    }

    let last = inner.segments.last().expect("at least one segment");
    let full = (last.size > 0 && last.size + needed > config.blob_size)
        || last.records >= config.records_in_blob;
    if full {
        last.sync()?;
        let ordinal = last.ordinal + 1;
        inner
            .segments
            .push(Segment::create(&config.data, ordinal)?);
    }

    Ok(inner.segments.len() - 1)
}

/// Rotation helper for defrag's temporary segment chain
fn rotate_for(
    config: &BackendConfig,
    segments: &mut Vec<Segment>,
    base: &Path,
    needed: u64,
) -> Result<usize> {
    let last = segments.last().expect("at least one segment");
    let full = (last.size > 0 && last.size + needed > config.blob_size)
        || last.records >= config.records_in_blob;
    if full {
        let ordinal = last.ordinal + 1;
        segments.push(Segment::create(base, ordinal)?);
    }
    Ok(segments.len() - 1)
}

/// Assemble the full record image for a vectored write
///
/// For appends the previous payload seeds the buffer: header vectors
/// refresh offset 0, data vectors land past the old tail.
fn assemble_record(
    inner: &EngineInner,
    key: &Key,
    iovs: &[IoVec<'_>],
    flags: u64,
) -> Result<Vec<u8>> {
    use crate::record::EHDR_LEN;

    let old = if flags & ctlflags::APPEND != 0 {
        inner.index.get(key)
    } else {
        None
    };

    let mut data = match old {
        Some(meta) => {
            let segment = &inner.segments[meta.segment];
            let mut buf = vec![0u8; meta.data_size as usize];
            segment.read_at(&mut buf, meta.ctl_offset + CTL_LEN as u64)?;
            buf
        }
        None => Vec::new(),
    };
    let old_len = data.len() as u64;

    let place = |offset: u64| -> u64 {
        if old_len == 0 || offset < EHDR_LEN as u64 {
            offset
        } else {
            old_len + (offset - EHDR_LEN as u64)
        }
    };

    let mut required = data.len() as u64;
    for iov in iovs {
        required = required.max(place(iov.offset) + iov.data.len() as u64);
    }
    data.resize(required as usize, 0);

    for iov in iovs {
        let at = place(iov.offset) as usize;
        data[at..at + iov.data.len()].copy_from_slice(iov.data);
    }

    Ok(data)
}

/// Rebuild index state from one segment's records
fn scan_segment(
    segment: &mut Segment,
    segment_idx: usize,
    inner: &mut EngineInner,
) -> Result<()> {
    let file_size = segment.size;
    let mut pos = 0u64;
    let mut records = 0u64;

    while pos + CTL_LEN as u64 <= file_size {
        let mut ctl_bytes = [0u8; CTL_LEN];
        segment.read_at(&mut ctl_bytes, pos)?;
        let ctl = match DiskControl::from_bytes(&ctl_bytes) {
            Ok(ctl) => ctl,
            Err(e) => {
                tracing::warn!(
                    segment = segment.ordinal,
                    offset = pos,
                    error = %e,
                    "truncating segment at damaged control"
                );
                break;
            }
        };

        if pos + CTL_LEN as u64 + ctl.disk_size > file_size {
            tracing::warn!(
                segment = segment.ordinal,
                offset = pos,
                "truncating segment at partial record"
            );
            break;
        }

        records += 1;
        if ctl.flags & ctlflags::REMOVED != 0 {
            inner.removed += 1;
        } else {
            let previous = inner.index.insert(
                ctl.key,
                RecordMeta {
                    segment: segment_idx,
                    ctl_offset: pos,
                    data_size: ctl.data_size,
                    disk_size: ctl.disk_size,
                    flags: ctl.flags,
                },
            );
            if previous.is_some() {
                inner.removed += 1;
            }
        }

        pos += CTL_LEN as u64 + ctl.disk_size;
    }

    segment.size = pos;
    segment.records = records;
    Ok(())
}
