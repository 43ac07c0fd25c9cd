//! Command definitions
//!
//! The command envelope delivered by the transport dispatcher.

/// Fixed key width in bytes
pub const ID_LEN: usize = 64;

/// Fixed-width opaque record key; ordering is lexicographic on bytes
pub type Key = [u8; ID_LEN];

/// Command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CommandCode {
    Lookup = 0x01,
    Write = 0x02,
    Read = 0x03,
    ReadRange = 0x04,
    DelRange = 0x05,
    Stat = 0x06,
    Del = 0x07,
    Defrag = 0x08,
}

impl CommandCode {
    /// Decode a raw command code; unknown codes are left to the dispatcher
    /// to reject with `UNSUPPORTED`
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0x01 => Some(CommandCode::Lookup),
            0x02 => Some(CommandCode::Write),
            0x03 => Some(CommandCode::Read),
            0x04 => Some(CommandCode::ReadRange),
            0x05 => Some(CommandCode::DelRange),
            0x06 => Some(CommandCode::Stat),
            0x07 => Some(CommandCode::Del),
            0x08 => Some(CommandCode::Defrag),
            _ => None,
        }
    }
}

/// Command-level flags
pub mod cmdflags {
    /// The transport owes the client an acknowledgement for this command
    pub const NEED_ACK: u64 = 1 << 0;

    /// Range results must be sorted by key before replay
    pub const SORT: u64 = 1 << 1;
}

/// A command envelope
///
/// Handlers mutate `flags` (ack suppression on streamed reads, forced ack on
/// info-less writes); the transport reads the final value when framing the
/// reply.
#[derive(Debug, Clone)]
pub struct Cmd {
    /// Key the command addresses
    pub id: Key,

    /// Raw command code
    pub code: u32,

    /// Command flags (`cmdflags`)
    pub flags: u64,
}

impl Cmd {
    /// Create an envelope with `NEED_ACK` raised, as the transport does
    pub fn new(code: CommandCode, id: Key) -> Self {
        Self {
            id,
            code: code as u32,
            flags: cmdflags::NEED_ACK,
        }
    }
}

/// Short hex dump of a key for log lines (first 6 bytes)
pub fn dump_key(key: &Key) -> String {
    key[..6].iter().map(|b| format!("{:02x}", b)).collect()
}
