//! Protocol Module
//!
//! Command-side types shared with the network transport. The transport
//! decodes the outer framing and hands the backend a command envelope plus
//! the raw attribute bytes; everything here is the backend's view of that
//! contract.
//!
//! ## I/O attribute wire format (little-endian, 200 bytes)
//! ```text
//! ┌────────────┬────────────┬───────┬──────┬──────┬──────┬──────────┬──────────┬───────┬────────┬──────┐
//! │ parent(64) │   id(64)   │start 8│num 8 │tsec 8│tnsec8│u_flags 8 │total_sz 8│flags 8│offset 8│size 8│
//! └────────────┴────────────┴───────┴──────┴──────┴──────┴──────────┴──────────┴───────┴────────┴──────┘
//! ```
//!
//! ## Defrag control wire format (little-endian, 24 bytes)
//! ```text
//! ┌─────────┬───────────┬──────────┐
//! │flags (8)│status (4) │ pad (12) │
//! └─────────┴───────────┴──────────┘
//! ```
//!
//! Multibyte integers are converted at the boundary via [`convert_io_attr`]
//! and [`convert_defrag_ctl`] (byte-swap on big-endian hosts).

mod command;
mod io;

pub use command::{cmdflags, dump_key, Cmd, CommandCode, Key, ID_LEN};
pub use io::{
    convert_defrag_ctl, convert_io_attr, defragflags, ioflags, DefragCtl, IoAttr,
    DEFRAG_CTL_LEN, IO_ATTR_LEN,
};
