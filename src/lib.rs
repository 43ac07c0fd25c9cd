//! # BlobKV Backend
//!
//! Per-node blob storage backend for the BlobKV distributed key-value
//! store:
//! - Append-only blob engine with segment files and in-place removal
//! - Extension header multiplexed into every record (timestamp + flags)
//! - Zero-copy read replies (fd + offset + length) toward the transport
//! - Sequential-vs-random read classifier driving a page-cache-drop hint
//! - Range collection engine with optional sort and deletion semantics
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Network Transport                         │
//! │             (decodes commands, sends replies)                │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                  Command Dispatcher                          │
//! └──────────┬──────────────────────────────┬───────────────────┘
//!            │                              │
//!            ▼                              ▼
//!     ┌─────────────┐               ┌──────────────┐
//!     │   Adapter   │               │ Range Engine │
//!     │ (codec +    │               │ (collect +   │
//!     │ classifier) │               │   apply)     │
//!     └──────┬──────┘               └──────┬───────┘
//!            │                             │
//!            ▼                             ▼
//!     ┌─────────────────────────────────────────┐
//!     │               Blob Engine                │
//!     │          (segment files + index)         │
//!     └─────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod record;
pub mod engine;
pub mod access;
pub mod reply;
pub mod backend;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{BlobError, Result};
pub use config::BackendConfig;
pub use backend::{BackendRegistry, BlobBackend, StorageBackend};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of the backend crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
