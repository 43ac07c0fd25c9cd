//! On-disk record control struct
//!
//! Every record in a segment file is a disk control followed by
//! `disk_size` bytes of record data:
//!
//! ```text
//! ┌──────────┬───────────┬──────────────┬──────────────┬────────┬────────┐
//! │ key (64) │ flags (8) │ data_size(8) │ disk_size(8) │ crc(4) │ pad(4) │
//! └──────────┴───────────┴──────────────┴──────────────┴────────┴────────┘
//! ```
//!
//! `data_size` is the committed record size and `disk_size` the reserved
//! region; prepare reserves exactly what commit finalizes. Removal flips
//! the `REMOVED` bit in place; the data stays until defrag reclaims it.

use crate::error::{BlobError, Result};
use crate::protocol::{Key, ID_LEN};

/// Serialized disk control length
pub const CTL_LEN: usize = ID_LEN + 8 + 8 + 8 + 4 + 4;

/// Per-record engine flags
pub mod ctlflags {
    /// First `EHDR_LEN` bytes of record data are the extension header
    pub const HAS_EXTHDR: u64 = 1 << 0;

    /// Record has been removed; data awaits defrag
    pub const REMOVED: u64 = 1 << 1;

    /// Record was written without a checksum
    pub const NOCSUM: u64 = 1 << 2;

    /// Record is reserved but not yet committed
    pub const UNCOMMITTED: u64 = 1 << 3;

    /// Write-mode bit: append to the existing record (never persisted)
    pub const APPEND: u64 = 1 << 4;

    /// Flags that survive to disk
    pub const PERSIST_MASK: u64 = HAS_EXTHDR | REMOVED | NOCSUM | UNCOMMITTED;
}

/// Offset of the flags field within a serialized control (for in-place
/// removal marking)
pub const CTL_FLAGS_OFFSET: u64 = ID_LEN as u64;

/// Offset of the checksum field within a serialized control
pub const CTL_CSUM_OFFSET: u64 = ID_LEN as u64 + 24;

/// On-disk record control
#[derive(Debug, Clone)]
pub struct DiskControl {
    pub key: Key,
    pub flags: u64,
    pub data_size: u64,
    pub disk_size: u64,
    pub checksum: u32,
}

impl DiskControl {
    /// Encode to the on-disk byte layout
    pub fn to_bytes(&self) -> [u8; CTL_LEN] {
        let mut out = [0u8; CTL_LEN];
        out[0..ID_LEN].copy_from_slice(&self.key);
        out[64..72].copy_from_slice(&(self.flags & ctlflags::PERSIST_MASK).to_le_bytes());
        out[72..80].copy_from_slice(&self.data_size.to_le_bytes());
        out[80..88].copy_from_slice(&self.disk_size.to_le_bytes());
        out[88..92].copy_from_slice(&self.checksum.to_le_bytes());
        out
    }

    /// Decode from the on-disk byte layout
    pub fn from_bytes(data: &[u8; CTL_LEN]) -> Result<Self> {
        let ctl = Self {
            key: data[0..ID_LEN].try_into().unwrap(),
            flags: u64::from_le_bytes(data[64..72].try_into().unwrap()),
            data_size: u64::from_le_bytes(data[72..80].try_into().unwrap()),
            disk_size: u64::from_le_bytes(data[80..88].try_into().unwrap()),
            checksum: u32::from_le_bytes(data[88..92].try_into().unwrap()),
        };

        if ctl.data_size > ctl.disk_size {
            return Err(BlobError::Corrupt(format!(
                "disk control: data size {} exceeds disk size {}",
                ctl.data_size, ctl.disk_size
            )));
        }
        if ctl.flags & !ctlflags::PERSIST_MASK != 0 {
            return Err(BlobError::Corrupt(format!(
                "disk control: unknown flag bits 0x{:x}",
                ctl.flags & !ctlflags::PERSIST_MASK
            )));
        }

        Ok(ctl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_control_round_trip() {
        let ctl = DiskControl {
            key: [0x42; ID_LEN],
            flags: ctlflags::HAS_EXTHDR | ctlflags::NOCSUM,
            data_size: 100,
            disk_size: 100,
            checksum: 0xdeadbeef,
        };
        let decoded = DiskControl::from_bytes(&ctl.to_bytes()).unwrap();
        assert_eq!(decoded.key, ctl.key);
        assert_eq!(decoded.flags, ctl.flags);
        assert_eq!(decoded.data_size, 100);
        assert_eq!(decoded.checksum, 0xdeadbeef);
    }

    #[test]
    fn test_append_bit_not_persisted() {
        let ctl = DiskControl {
            key: [0u8; ID_LEN],
            flags: ctlflags::HAS_EXTHDR | ctlflags::APPEND,
            data_size: 0,
            disk_size: 0,
            checksum: 0,
        };
        let decoded = DiskControl::from_bytes(&ctl.to_bytes()).unwrap();
        assert_eq!(decoded.flags, ctlflags::HAS_EXTHDR);
    }

    #[test]
    fn test_oversized_data_size_is_corrupt() {
        let mut bytes = DiskControl {
            key: [0u8; ID_LEN],
            flags: 0,
            data_size: 0,
            disk_size: 0,
            checksum: 0,
        }
        .to_bytes();
        bytes[72..80].copy_from_slice(&10u64.to_le_bytes()); // data_size
        bytes[80..88].copy_from_slice(&5u64.to_le_bytes()); // disk_size
        assert!(matches!(
            DiskControl::from_bytes(&bytes),
            Err(BlobError::Corrupt(_))
        ));
    }
}
