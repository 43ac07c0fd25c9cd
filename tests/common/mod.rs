//! Shared test helpers
//!
//! An in-memory reply sink that materializes zero-copy regions, plus
//! builders for command envelopes and attribute payloads.

#![allow(dead_code)]

use std::os::unix::fs::FileExt;
use std::os::unix::io::RawFd;
use std::path::Path;

use tempfile::TempDir;

use blobkv_backend::protocol::{Cmd, CommandCode, IoAttr, Key, ID_LEN};
use blobkv_backend::reply::{FdChecksum, FdRegion, FileInfo, ReplySink, StorageStat};
use blobkv_backend::{BackendConfig, BlobBackend, Result};

/// Classifier threshold base used by tests: MSE above 1_000_000 is random
pub const VM_TOTAL_SQ: i64 = 16_000_000;

// =============================================================================
// Fixtures
// =============================================================================

/// Key with `n` as its first byte, zeros elsewhere
pub fn key_n(n: u8) -> Key {
    let mut key = [0u8; ID_LEN];
    key[0] = n;
    key
}

/// Config pointing at `<dir>/data`
pub fn test_config(dir: &Path) -> BackendConfig {
    let mut config = BackendConfig::default();
    config.data = dir.join("data");
    config
}

/// Fresh backend in a temp directory, with a pinned classifier threshold
pub fn setup_backend() -> (TempDir, BlobBackend) {
    let dir = TempDir::new().unwrap();
    let backend = BlobBackend::init_with_vm_total_sq(test_config(dir.path()), VM_TOTAL_SQ)
        .unwrap();
    (dir, backend)
}

// =============================================================================
// Command Builders
// =============================================================================

/// WRITE command data: attribute followed by payload bytes
pub fn write_data(io: &IoAttr, payload: &[u8]) -> Vec<u8> {
    let mut data = io.to_bytes().to_vec();
    data.extend_from_slice(payload);
    data
}

/// Attribute-only command data (READ, ranges)
pub fn io_data(io: &IoAttr) -> Vec<u8> {
    io.to_bytes().to_vec()
}

/// Write `payload` under `key` through the command path; panics on failure
pub fn put(backend: &BlobBackend, sink: &mut CapturingSink, key: Key, payload: &[u8]) {
    let mut io = IoAttr::for_key(key);
    io.size = payload.len() as u64;
    let mut cmd = Cmd::new(CommandCode::Write, key);
    let status = backend.handle_command(sink, &mut cmd, &write_data(&io, payload));
    assert_eq!(status, 0, "write of key {:02x} failed: {}", key[0], status);
}

/// Read `key` through the command path; returns the command status
pub fn get(backend: &BlobBackend, sink: &mut CapturingSink, key: Key) -> i32 {
    let io = IoAttr::for_key(key);
    let mut cmd = Cmd::new(CommandCode::Read, key);
    backend.handle_command(sink, &mut cmd, &io_data(&io))
}

// =============================================================================
// Capturing Sink
// =============================================================================

/// One captured reply
#[derive(Debug)]
pub enum Reply {
    ReadData {
        id: Key,
        offset: u64,
        size: u64,
        num: u64,
        total_size: u64,
        tsec: u64,
        tnsec: u64,
        user_flags: u64,
        /// Region bytes, materialized at send time; None for terminators
        data: Option<Vec<u8>>,
        hints: u32,
    },
    FileInfo {
        fd: RawFd,
        offset: u64,
        size: u64,
        tsec: u64,
        tnsec: u64,
    },
    Stat(StorageStat),
}

/// Sink that records replies and copies out referenced regions
#[derive(Debug, Default)]
pub struct CapturingSink {
    pub replies: Vec<Reply>,
}

impl CapturingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The payload bytes of the last data-bearing read reply
    pub fn last_read_payload(&self) -> &[u8] {
        for reply in self.replies.iter().rev() {
            if let Reply::ReadData {
                data: Some(data), ..
            } = reply
            {
                return data;
            }
        }
        panic!("no data-bearing read reply captured");
    }

    /// All read replies, in send order
    pub fn read_replies(&self) -> Vec<&Reply> {
        self.replies
            .iter()
            .filter(|r| matches!(r, Reply::ReadData { .. }))
            .collect()
    }
}

impl ReplySink for CapturingSink {
    fn send_read_data(
        &mut self,
        _cmd: &mut Cmd,
        io: &IoAttr,
        region: Option<FdRegion>,
        hints: u32,
    ) -> Result<()> {
        let data = match &region {
            Some(region) => {
                let mut buf = vec![0u8; region.size as usize];
                region.handle.read_exact_at(&mut buf, region.offset)?;
                Some(buf)
            }
            None => None,
        };

        self.replies.push(Reply::ReadData {
            id: io.id,
            offset: io.offset,
            size: io.size,
            num: io.num,
            total_size: io.total_size,
            tsec: io.tsec,
            tnsec: io.tnsec,
            user_flags: io.user_flags,
            data,
            hints,
        });
        Ok(())
    }

    fn send_file_info(&mut self, _cmd: &mut Cmd, info: &FileInfo) -> Result<()> {
        self.replies.push(Reply::FileInfo {
            fd: info.fd,
            offset: info.offset,
            size: info.size,
            tsec: info.tsec,
            tnsec: info.tnsec,
        });
        Ok(())
    }

    fn send_stat(&mut self, _cmd: &mut Cmd, stat: &StorageStat) -> Result<()> {
        self.replies.push(Reply::Stat(stat.clone()));
        Ok(())
    }
}

// =============================================================================
// Checksum Helper
// =============================================================================

/// CRC32-over-region checksummer, standing in for the node's routine
pub struct Crc32Checksum;

impl FdChecksum for Crc32Checksum {
    fn checksum_fd(&self, region: &FdRegion, out: &mut [u8]) -> Result<()> {
        let mut buf = vec![0u8; region.size as usize];
        region.handle.read_exact_at(&mut buf, region.offset)?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&buf);
        let crc = hasher.finalize().to_le_bytes();

        out.fill(0);
        let n = out.len().min(crc.len());
        out[..n].copy_from_slice(&crc[..n]);
        Ok(())
    }
}
