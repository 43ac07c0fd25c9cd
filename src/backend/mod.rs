//! Blob Backend
//!
//! Translates key-addressed commands into engine operations and reply
//! descriptors.
//!
//! ## Responsibilities
//! - Adapt command-level flags and envelopes to engine primitives
//! - Multiplex the extension header into every written record
//! - Serve reads as zero-copy fd references, with a page-cache hint from
//!   the access classifier
//! - Collect and replay range queries
//! - Report filesystem and record statistics
//!
//! ## Data Flow
//! ```text
//! transport ──► dispatcher ──► adapter / range engine ──► record codec
//!                                                      ──► blob engine ──► segment files
//!          ◄───────── replies (inline or fd + offset + length) ──────────┘
//! ```

mod adapter;
mod dispatch;
mod range;
mod registry;
mod stats;

pub use registry::BackendRegistry;

use crate::access::AccessTracker;
use crate::config::BackendConfig;
use crate::engine::BlobEngine;
use crate::error::Result;
use crate::protocol::{Cmd, Key};
use crate::record::{ExtHeader, ExtList, EHDR_LEN};
use crate::reply::{FdChecksum, ReplySink, StorageStat};

/// The callback surface a registered backend exposes to the node
///
/// One method per registry callback: command handling, checksumming,
/// iteration, storage stats and cleanup.
pub trait StorageBackend: Send + Sync {
    /// Execute one command; returns `0`, a positive status (defrag) or a
    /// negated errno
    fn command(&self, sink: &mut dyn ReplySink, cmd: &mut Cmd, data: &[u8]) -> i32;

    /// Fill `out` with the checksum of the record's user payload
    fn checksum(&self, csummer: &dyn FdChecksum, id: &Key, out: &mut [u8]) -> Result<()>;

    /// Read-only iteration over all records, extension headers extracted
    fn iterate(
        &self,
        callback: &mut dyn FnMut(&Key, &[u8], &ExtList) -> Result<()>,
    ) -> Result<()>;

    /// Filesystem and record counters
    fn storage_stat(&self) -> Result<StorageStat>;

    /// Flush and release resources
    fn cleanup(&self) -> Result<()>;
}

/// Per-node blob storage backend
pub struct BlobBackend {
    config: BackendConfig,
    engine: BlobEngine,
    access: AccessTracker,
}

impl BlobBackend {
    /// Initialize the backend: validate config, open the engine, take the
    /// initial filesystem stat and size the classifier threshold from
    /// total system memory
    pub fn init(config: BackendConfig) -> Result<Self> {
        let vm_total_sq = stats::vm_total_sq();
        Self::init_with_vm_total_sq(config, vm_total_sq)
    }

    /// Initialize with an explicit classifier threshold base (tests pin
    /// this for determinism)
    pub fn init_with_vm_total_sq(config: BackendConfig, vm_total_sq: i64) -> Result<Self> {
        config.validate()?;

        let engine = BlobEngine::open(&config)?;
        let (fs_total, fs_free) = stats::fs_stat_with_fallback(&config.data)?;

        tracing::info!(
            data = %config.data.display(),
            fs_total,
            fs_free,
            vm_total_sq,
            "blob backend initialized"
        );

        Ok(Self {
            config,
            engine,
            access: AccessTracker::new(vm_total_sq),
        })
    }

    /// The backing engine (exposed for recovery tooling and tests)
    pub fn engine(&self) -> &BlobEngine {
        &self.engine
    }

    /// Flush all segments and log the shutdown
    pub fn cleanup(&self) -> Result<()> {
        self.engine.sync_all()?;
        tracing::info!(data = %self.config.data.display(), "blob backend closed");
        Ok(())
    }

    /// Read-only iteration over all records for recovery and replication
    ///
    /// The pre-callback extracts the extension header when present, so the
    /// caller sees `{key, user payload, extension list}`.
    pub fn iterate<F>(&self, mut callback: F) -> Result<()>
    where
        F: FnMut(&Key, &[u8], &ExtList) -> Result<()>,
    {
        use crate::engine::ctlflags;
        use crate::error::BlobError;
        use crate::protocol::dump_key;

        self.engine.iterate(|key, flags, data| {
            let mut payload = data;
            let mut elist = ExtList::default();

            if flags & ctlflags::HAS_EXTHDR != 0 {
                if data.len() < EHDR_LEN {
                    return Err(BlobError::Corrupt(format!(
                        "{}: record shorter than extension header",
                        dump_key(key)
                    )));
                }
                let header = ExtHeader::from_bytes(data[..EHDR_LEN].try_into().unwrap())?;
                elist = header.to_list();
                payload = &data[EHDR_LEN..];
            }

            callback(key, payload, &elist)
        })
    }
}

impl StorageBackend for BlobBackend {
    fn command(&self, sink: &mut dyn ReplySink, cmd: &mut Cmd, data: &[u8]) -> i32 {
        self.handle_command(sink, cmd, data)
    }

    fn checksum(&self, csummer: &dyn FdChecksum, id: &Key, out: &mut [u8]) -> Result<()> {
        BlobBackend::checksum(self, csummer, id, out)
    }

    fn iterate(
        &self,
        callback: &mut dyn FnMut(&Key, &[u8], &ExtList) -> Result<()>,
    ) -> Result<()> {
        BlobBackend::iterate(self, callback)
    }

    fn storage_stat(&self) -> Result<StorageStat> {
        BlobBackend::storage_stat(self)
    }

    fn cleanup(&self) -> Result<()> {
        BlobBackend::cleanup(self)
    }
}
