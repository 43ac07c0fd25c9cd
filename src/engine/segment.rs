//! Segment files
//!
//! A segment is one append-only data file, named `<data-path>.N`. The engine
//! appends records to the newest segment and rotates to a fresh one when the
//! configured size or record-count limit is reached. Positioned I/O keeps
//! the shared file handle free of seek state.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;

/// One append-only data file
#[derive(Debug)]
pub struct Segment {
    /// Segment ordinal within the engine
    pub ordinal: u32,

    /// Segment file path
    pub path: PathBuf,

    /// Shared handle; write controls hand out clones of this
    pub file: Arc<File>,

    /// Current append position
    pub size: u64,

    /// Records appended to this segment
    pub records: u64,
}

impl Segment {
    /// Path of segment `ordinal` for a given data base path
    pub fn path_for(base: &Path, ordinal: u32) -> PathBuf {
        let mut name = base.as_os_str().to_os_string();
        name.push(format!(".{}", ordinal));
        PathBuf::from(name)
    }

    /// Create a fresh, empty segment file
    pub fn create(base: &Path, ordinal: u32) -> Result<Self> {
        let path = Self::path_for(base, ordinal);
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)?;

        Ok(Self {
            ordinal,
            path,
            file: Arc::new(file),
            size: 0,
            records: 0,
        })
    }

    /// Open an existing segment file; `size`/`records` are filled by the
    /// engine's recovery scan
    pub fn open(base: &Path, ordinal: u32) -> Result<Self> {
        let path = Self::path_for(base, ordinal);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            ordinal,
            path,
            file: Arc::new(file),
            size,
            records: 0,
        })
    }

    /// Reserve `len` bytes at the tail; returns the region's start offset
    pub fn reserve(&mut self, len: u64) -> u64 {
        let offset = self.size;
        self.size += len;
        self.records += 1;
        offset
    }

    /// Write `data` at an absolute offset within the segment
    pub fn write_at(&self, data: &[u8], offset: u64) -> Result<()> {
        self.file.write_all_at(data, offset)?;
        Ok(())
    }

    /// Read exactly `buf.len()` bytes at an absolute offset
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    /// Fsync the segment file
    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}
