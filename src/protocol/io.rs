//! I/O attribute and defrag control
//!
//! Per-command envelopes that ride after the command header on the wire.
//! Layouts are fixed and little-endian; see the module docs in
//! `protocol/mod.rs` for the byte diagrams.

use crate::error::{BlobError, Result};
use crate::protocol::{Key, ID_LEN};

/// Serialized length of an I/O attribute
pub const IO_ATTR_LEN: usize = 2 * ID_LEN + 9 * 8;

/// Serialized length of a defrag control
pub const DEFRAG_CTL_LEN: usize = 24;

/// Per-I/O flags
pub mod ioflags {
    /// Append payload to the existing record instead of overwriting
    pub const APPEND: u64 = 1 << 0;

    /// Client asked for transparent compression (not supported)
    pub const COMPRESS: u64 = 1 << 1;

    /// Reserve space for the record before writing
    pub const PREPARE: u64 = 1 << 2;

    /// Finalize a previously prepared record
    pub const COMMIT: u64 = 1 << 3;

    /// Write without read-back verification
    pub const PLAIN_WRITE: u64 = 1 << 4;

    /// Skip checksum verification on reads and lookups
    pub const NOCSUM: u64 = 1 << 5;

    /// Range read counts hits without sending record data
    pub const NODATA: u64 = 1 << 6;

    /// Suppress the file-info reply after a write
    pub const WRITE_NO_FILE_INFO: u64 = 1 << 7;
}

/// Defrag control flags
pub mod defragflags {
    /// Query defrag status instead of starting a run
    pub const STATUS: u64 = 1 << 0;
}

/// Per-command I/O attribute
///
/// `offset`/`size` address the logical user payload (after the extension
/// header). `num` is a full record size hint on writes and a result limit on
/// range reads. `parent` is the upper bound key for ranges.
#[derive(Debug, Clone)]
pub struct IoAttr {
    /// Upper bound key for range commands
    pub parent: Key,

    /// Key the I/O addresses
    pub id: Key,

    /// First collected hit to replay (range reads)
    pub start: u64,

    /// Record size hint (writes) or result limit (range reads)
    pub num: u64,

    /// Record timestamp, seconds part
    pub tsec: u64,

    /// Record timestamp, nanoseconds part
    pub tnsec: u64,

    /// User flags stored with the record
    pub user_flags: u64,

    /// Full record size, filled by the read path
    pub total_size: u64,

    /// I/O flags (`ioflags`)
    pub flags: u64,

    /// Offset into the user payload
    pub offset: u64,

    /// Size of the user payload slice (0 = to end of record)
    pub size: u64,
}

impl IoAttr {
    /// An all-zero attribute addressing `id`
    pub fn for_key(id: Key) -> Self {
        Self {
            parent: [0u8; ID_LEN],
            id,
            start: 0,
            num: 0,
            tsec: 0,
            tnsec: 0,
            user_flags: 0,
            total_size: 0,
            flags: 0,
            offset: 0,
            size: 0,
        }
    }

    /// Decode from wire bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < IO_ATTR_LEN {
            return Err(BlobError::Protocol(format!(
                "short io attr: expected {} bytes, got {}",
                IO_ATTR_LEN,
                data.len()
            )));
        }

        let mut parent = [0u8; ID_LEN];
        parent.copy_from_slice(&data[0..ID_LEN]);
        let mut id = [0u8; ID_LEN];
        id.copy_from_slice(&data[ID_LEN..2 * ID_LEN]);

        let mut fields = [0u64; 9];
        for (i, field) in fields.iter_mut().enumerate() {
            let at = 2 * ID_LEN + i * 8;
            *field = u64::from_le_bytes(data[at..at + 8].try_into().unwrap());
        }

        Ok(Self {
            parent,
            id,
            start: fields[0],
            num: fields[1],
            tsec: fields[2],
            tnsec: fields[3],
            user_flags: fields[4],
            total_size: fields[5],
            flags: fields[6],
            offset: fields[7],
            size: fields[8],
        })
    }

    /// Encode to wire bytes
    pub fn to_bytes(&self) -> [u8; IO_ATTR_LEN] {
        let mut out = [0u8; IO_ATTR_LEN];
        out[0..ID_LEN].copy_from_slice(&self.parent);
        out[ID_LEN..2 * ID_LEN].copy_from_slice(&self.id);

        let fields = [
            self.start,
            self.num,
            self.tsec,
            self.tnsec,
            self.user_flags,
            self.total_size,
            self.flags,
            self.offset,
            self.size,
        ];
        for (i, field) in fields.iter().enumerate() {
            let at = 2 * ID_LEN + i * 8;
            out[at..at + 8].copy_from_slice(&field.to_le_bytes());
        }

        out
    }
}

/// Defrag control envelope
#[derive(Debug, Clone, Default)]
pub struct DefragCtl {
    /// Defrag flags (`defragflags`)
    pub flags: u64,

    /// Defrag state, filled by the handler
    pub status: i32,
}

impl DefragCtl {
    /// Decode from wire bytes; the payload must be exactly sized
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != DEFRAG_CTL_LEN {
            return Err(BlobError::Protocol(format!(
                "invalid defrag ctl: size {}, must be {}",
                data.len(),
                DEFRAG_CTL_LEN
            )));
        }

        Ok(Self {
            flags: u64::from_le_bytes(data[0..8].try_into().unwrap()),
            status: i32::from_le_bytes(data[8..12].try_into().unwrap()),
        })
    }

    /// Encode to wire bytes
    pub fn to_bytes(&self) -> [u8; DEFRAG_CTL_LEN] {
        let mut out = [0u8; DEFRAG_CTL_LEN];
        out[0..8].copy_from_slice(&self.flags.to_le_bytes());
        out[8..12].copy_from_slice(&self.status.to_le_bytes());
        out
    }
}

/// Byte-swap multibyte fields when host endianness differs from the wire
#[inline]
pub fn convert_io_attr(io: &mut IoAttr) {
    #[cfg(target_endian = "big")]
    {
        io.start = io.start.swap_bytes();
        io.num = io.num.swap_bytes();
        io.tsec = io.tsec.swap_bytes();
        io.tnsec = io.tnsec.swap_bytes();
        io.user_flags = io.user_flags.swap_bytes();
        io.total_size = io.total_size.swap_bytes();
        io.flags = io.flags.swap_bytes();
        io.offset = io.offset.swap_bytes();
        io.size = io.size.swap_bytes();
    }
    #[cfg(target_endian = "little")]
    {
        let _ = io;
    }
}

/// Byte-swap multibyte fields when host endianness differs from the wire
#[inline]
pub fn convert_defrag_ctl(ctl: &mut DefragCtl) {
    #[cfg(target_endian = "big")]
    {
        ctl.flags = ctl.flags.swap_bytes();
        ctl.status = ctl.status.swap_bytes();
    }
    #[cfg(target_endian = "little")]
    {
        let _ = ctl;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_attr_round_trip() {
        let mut io = IoAttr::for_key([7u8; ID_LEN]);
        io.parent = [9u8; ID_LEN];
        io.start = 3;
        io.num = 10;
        io.tsec = 1_700_000_000;
        io.tnsec = 999;
        io.user_flags = 0xdead;
        io.total_size = 4096;
        io.flags = ioflags::APPEND | ioflags::NOCSUM;
        io.offset = 128;
        io.size = 512;

        let decoded = IoAttr::from_bytes(&io.to_bytes()).unwrap();
        assert_eq!(decoded.parent, io.parent);
        assert_eq!(decoded.id, io.id);
        assert_eq!(decoded.num, 10);
        assert_eq!(decoded.flags, ioflags::APPEND | ioflags::NOCSUM);
        assert_eq!(decoded.offset, 128);
        assert_eq!(decoded.size, 512);
    }

    #[test]
    fn test_io_attr_short_buffer() {
        let err = IoAttr::from_bytes(&[0u8; IO_ATTR_LEN - 1]).unwrap_err();
        assert!(matches!(err, BlobError::Protocol(_)));
    }

    #[test]
    fn test_defrag_ctl_exact_size_required() {
        assert!(DefragCtl::from_bytes(&[0u8; DEFRAG_CTL_LEN]).is_ok());
        assert!(DefragCtl::from_bytes(&[0u8; DEFRAG_CTL_LEN - 1]).is_err());
        assert!(DefragCtl::from_bytes(&[0u8; DEFRAG_CTL_LEN + 1]).is_err());
    }
}
