//! Reply seam toward the network transport
//!
//! The backend never writes sockets itself: command handlers hand the
//! transport either inline metadata or zero-copy references into
//! engine-owned descriptors (`fd + offset + length`), and the transport does
//! the sending. Tests plug in an in-memory sink.

use std::fs::File;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use crate::error::Result;
use crate::protocol::{Cmd, IoAttr};

/// Reply hints
pub mod replyflags {
    /// Drop page-cache pages for the served range once the send completes
    pub const CACHE_FORGET: u32 = 1 << 0;
}

/// A borrowed view into an engine-owned descriptor
///
/// The engine keeps ownership of the descriptor; `handle` pins it open for
/// the duration of the send. Holders must not close `fd`.
#[derive(Debug, Clone)]
pub struct FdRegion {
    pub fd: RawFd,
    pub handle: Arc<File>,
    pub offset: u64,
    pub size: u64,
}

/// Payload of a file-info reply
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub fd: RawFd,
    pub handle: Arc<File>,

    /// Offset of the first user payload byte within the descriptor
    pub offset: u64,

    /// Size reported to the client
    pub size: u64,

    /// Record timestamp
    pub tsec: u64,
    pub tnsec: u64,
}

/// Filesystem and record counters exposed by the stats bridge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStat {
    /// Filesystem size of the data directory, bytes
    pub fs_total: u64,

    /// Filesystem space still available, bytes
    pub fs_free: u64,

    /// Live records in the engine
    pub total_records: u64,

    /// Removed records awaiting defrag
    pub removed_records: u64,
}

/// Where command results are delivered
pub trait ReplySink {
    /// Send a read reply: the attribute describes the slice, `region` the
    /// bytes (absent for range terminators), `hints` carries `replyflags`
    fn send_read_data(
        &mut self,
        cmd: &mut Cmd,
        io: &IoAttr,
        region: Option<FdRegion>,
        hints: u32,
    ) -> Result<()>;

    /// Send a file-info reply
    fn send_file_info(&mut self, cmd: &mut Cmd, info: &FileInfo) -> Result<()>;

    /// Send a storage-stat reply
    fn send_stat(&mut self, cmd: &mut Cmd, stat: &StorageStat) -> Result<()>;
}

/// Checksum-of-descriptor routine provided by the node
///
/// The algorithm is the node's choice; the backend only selects the range.
pub trait FdChecksum {
    fn checksum_fd(&self, region: &FdRegion, out: &mut [u8]) -> Result<()>;
}
