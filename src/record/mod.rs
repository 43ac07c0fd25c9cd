//! Record codec
//!
//! Every record written by this backend carries a fixed-size extension
//! header at offset 0 of its payload, multiplexed with the user data via the
//! engine's `HAS_EXTHDR` record flag. The header stores the record timestamp
//! and user flags so reads reply with the stored metadata rather than the
//! client-supplied values.
//!
//! ## On-disk header layout (little-endian, 48 bytes)
//! ```text
//! ┌───────────┬─────────┬────────────┬──────────┬───────────┬───────────┬───────────────┐
//! │version (1)│ pad (3) │ext_size (4)│ tsec (8) │ tnsec (8) │ flags (8) │ reserved (16) │
//! └───────────┴─────────┴────────────┴──────────┴───────────┴───────────┴───────────────┘
//! ```
//!
//! The layout is frozen for on-disk compatibility. Reserved bytes, padding
//! and `ext_size` pass through decode → encode verbatim so records written
//! by newer software survive a round trip here.

use std::fs::File;
use std::os::unix::fs::FileExt;

use crate::error::{BlobError, Result};
use crate::protocol::IoAttr;

/// Serialized extension header length
pub const EHDR_LEN: usize = 48;

/// Current extension header version
pub const EHDR_VERSION: u8 = 1;

/// Runtime form of a record's extension metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtList {
    /// Record timestamp, seconds part
    pub tsec: u64,

    /// Record timestamp, nanoseconds part
    pub tnsec: u64,

    /// User flags stored with the record
    pub flags: u64,
}

impl ExtList {
    /// Project the user-visible fields of an I/O attribute into an
    /// extension list (the write path's view of the client metadata)
    pub fn from_io(io: &IoAttr) -> Self {
        Self {
            tsec: io.tsec,
            tnsec: io.tnsec,
            flags: io.user_flags,
        }
    }

    /// Install the stored metadata into an I/O envelope so reply builders
    /// see the record's values, not the client-supplied ones
    pub fn apply_to_io(&self, io: &mut IoAttr) {
        io.tsec = self.tsec;
        io.tnsec = self.tnsec;
        io.user_flags = self.flags;
    }

    /// Pack into the fixed on-disk header form
    pub fn to_header(&self) -> ExtHeader {
        ExtHeader {
            version: EHDR_VERSION,
            pad: [0u8; 3],
            ext_size: 0,
            tsec: self.tsec,
            tnsec: self.tnsec,
            flags: self.flags,
            reserved: [0u8; 16],
        }
    }
}

/// Fixed-size on-disk extension header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtHeader {
    /// Header version
    pub version: u8,

    /// Alignment padding, preserved verbatim
    pub pad: [u8; 3],

    /// Total size of trailing extensions, preserved verbatim
    pub ext_size: u32,

    /// Record timestamp, seconds part
    pub tsec: u64,

    /// Record timestamp, nanoseconds part
    pub tnsec: u64,

    /// User flags stored with the record
    pub flags: u64,

    /// Reserved bytes, preserved verbatim
    pub reserved: [u8; 16],
}

impl ExtHeader {
    /// Unpack into the runtime form
    pub fn to_list(&self) -> ExtList {
        ExtList {
            tsec: self.tsec,
            tnsec: self.tnsec,
            flags: self.flags,
        }
    }

    /// Encode to the on-disk byte layout
    pub fn to_bytes(&self) -> [u8; EHDR_LEN] {
        let mut out = [0u8; EHDR_LEN];
        out[0] = self.version;
        out[1..4].copy_from_slice(&self.pad);
        out[4..8].copy_from_slice(&self.ext_size.to_le_bytes());
        out[8..16].copy_from_slice(&self.tsec.to_le_bytes());
        out[16..24].copy_from_slice(&self.tnsec.to_le_bytes());
        out[24..32].copy_from_slice(&self.flags.to_le_bytes());
        out[32..48].copy_from_slice(&self.reserved);
        out
    }

    /// Decode from the on-disk byte layout
    ///
    /// Fails with `Corrupt` if structural fields are out of range.
    pub fn from_bytes(data: &[u8; EHDR_LEN]) -> Result<Self> {
        let header = Self {
            version: data[0],
            pad: data[1..4].try_into().unwrap(),
            ext_size: u32::from_le_bytes(data[4..8].try_into().unwrap()),
            tsec: u64::from_le_bytes(data[8..16].try_into().unwrap()),
            tnsec: u64::from_le_bytes(data[16..24].try_into().unwrap()),
            flags: u64::from_le_bytes(data[24..32].try_into().unwrap()),
            reserved: data[32..48].try_into().unwrap(),
        };

        // Version 0 is a zeroed header region (prepared, never written)
        if header.version > EHDR_VERSION {
            return Err(BlobError::Corrupt(format!(
                "extension header version {} not supported",
                header.version
            )));
        }
        if header.tnsec >= 1_000_000_000 {
            return Err(BlobError::Corrupt(format!(
                "extension header nanoseconds out of range: {}",
                header.tnsec
            )));
        }

        Ok(header)
    }

    /// Read exactly `EHDR_LEN` bytes at `offset` of an engine descriptor and
    /// decode them
    ///
    /// Short reads surface as `Io`; structural damage as `Corrupt`.
    pub fn read_at(file: &File, offset: u64) -> Result<Self> {
        let mut buf = [0u8; EHDR_LEN];
        file.read_exact_at(&mut buf, offset)?;
        Self::from_bytes(&buf)
    }
}
