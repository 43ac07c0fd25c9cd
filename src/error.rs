//! Error types for the blob backend
//!
//! Provides a unified error type for all operations, plus the mapping to
//! the negated-errno convention the command reply header carries.

use thiserror::Error;

/// Result type alias using BlobError
pub type Result<T> = std::result::Result<T, BlobError>;

/// Unified error type for blob backend operations
#[derive(Debug, Error)]
pub enum BlobError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Record Errors
    // -------------------------------------------------------------------------
    #[error("Key not found")]
    NotFound,

    #[error("Offset past end of record: {0}")]
    OutOfRange(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    // -------------------------------------------------------------------------
    // Command Errors
    // -------------------------------------------------------------------------
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Resource Errors
    // -------------------------------------------------------------------------
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    // -------------------------------------------------------------------------
    // Engine Errors
    // -------------------------------------------------------------------------
    #[error("Engine error: {0}")]
    Engine(String),
}

impl BlobError {
    /// Negated POSIX errno for the command reply header.
    ///
    /// The transport copies this into the reply; `0` is never produced here
    /// (successful handlers return `Ok`).
    pub fn to_errno(&self) -> i32 {
        match self {
            BlobError::Io(e) => -e.raw_os_error().unwrap_or(libc::EIO),
            BlobError::NotFound => -libc::ENOENT,
            BlobError::OutOfRange(_) => -libc::E2BIG,
            BlobError::Corrupt(_) => -libc::EILSEQ,
            BlobError::Unsupported(_) => -libc::ENOTSUP,
            BlobError::Protocol(_) => -libc::EPROTO,
            BlobError::OutOfMemory(_) => -libc::ENOMEM,
            BlobError::InvalidConfig(_) => -libc::EINVAL,
            BlobError::Engine(_) => -libc::EIO,
        }
    }
}
