//! Stats bridge
//!
//! Filesystem usage of the data directory plus the engine's record
//! counters. The monitoring layer polls [`BlobBackend::storage_stat`] and
//! renders the numbers; nothing here formats output.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::error::{BlobError, Result};
use crate::reply::StorageStat;

use super::BlobBackend;

impl BlobBackend {
    /// Filesystem used/free of the data directory plus engine record
    /// counters
    pub fn storage_stat(&self) -> Result<StorageStat> {
        let (fs_total, fs_free) = fs_stat_with_fallback(&self.config.data)?;

        Ok(StorageStat {
            fs_total,
            fs_free,
            total_records: self.engine.total_records(),
            removed_records: self.engine.removed_records(),
        })
    }
}

/// `(total, available)` bytes of the filesystem holding `path`
///
/// The data path is a file-name base that may not itself exist; on failure
/// the parent directory is tried.
pub(crate) fn fs_stat_with_fallback(path: &Path) -> Result<(u64, u64)> {
    match fs_stat(path) {
        Ok(stat) => Ok(stat),
        Err(e) => match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => fs_stat(parent),
            None => Err(e),
        },
    }
}

/// `(total, available)` bytes of the filesystem holding `path`, no fallback
pub(crate) fn fs_stat(path: &Path) -> Result<(u64, u64)> {
    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| BlobError::InvalidConfig(format!("bad path: {}", path.display())))?;

    let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(cpath.as_ptr(), &mut st) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    let frsize = st.f_frsize as u64;
    Ok((st.f_blocks as u64 * frsize, st.f_bavail as u64 * frsize))
}

/// `(total system memory in MiB)^2 * 1 MiB`, the classifier's threshold base
pub(crate) fn vm_total_sq() -> i64 {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();

    let mib = (sys.total_memory() / (1024 * 1024)) as i64;
    mib.saturating_mul(mib).saturating_mul(1024 * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fs_stat_on_existing_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let (total, free) = fs_stat_with_fallback(dir.path()).unwrap();
        assert!(total > 0);
        assert!(free <= total);
    }

    #[test]
    fn test_fs_stat_falls_back_to_parent() {
        let dir = tempfile::TempDir::new().unwrap();
        // The data base itself does not exist; the parent does
        let base = dir.path().join("data");
        let (total, _free) = fs_stat_with_fallback(&base).unwrap();
        assert!(total > 0);
    }

    #[test]
    fn test_vm_total_sq_positive() {
        assert!(vm_total_sq() > 0);
    }
}
