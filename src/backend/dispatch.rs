//! Command dispatcher
//!
//! Table-driven mapping of command codes onto adapter operations. Handlers
//! return `Ok(status)` (0, or the defrag state) or an error; the public
//! entry point folds both into the negated-errno integer the reply header
//! carries.

use std::path::Path;

use crate::error::{BlobError, Result};
use crate::protocol::{
    convert_defrag_ctl, defragflags, Cmd, CommandCode, DefragCtl,
};
use crate::reply::{ReplySink, StorageStat};

use super::{stats, BlobBackend};

impl BlobBackend {
    /// Execute one command, folding the outcome into the reply status
    /// integer: `0` on success, the defrag state for DEFRAG, a negated
    /// errno on failure
    pub fn handle_command(
        &self,
        sink: &mut dyn ReplySink,
        cmd: &mut Cmd,
        data: &[u8],
    ) -> i32 {
        match self.command(sink, cmd, data) {
            Ok(status) => status,
            Err(e) => e.to_errno(),
        }
    }

    fn command(&self, sink: &mut dyn ReplySink, cmd: &mut Cmd, data: &[u8]) -> Result<i32> {
        let code = CommandCode::from_u32(cmd.code).ok_or_else(|| {
            BlobError::Unsupported(format!("command code {:#x}", cmd.code))
        })?;

        match code {
            CommandCode::Lookup => self.file_info(sink, cmd).map(|_| 0),
            CommandCode::Write => self.write(sink, cmd, data).map(|_| 0),
            CommandCode::Read => self.read(sink, cmd, data, true).map(|_| 0),
            CommandCode::ReadRange | CommandCode::DelRange => {
                self.read_range(sink, cmd, data, code).map(|_| 0)
            }
            CommandCode::Stat => self.stat(sink, cmd).map(|_| 0),
            CommandCode::Del => self.del(cmd).map(|_| 0),
            CommandCode::Defrag => self.defrag(cmd, data),
        }
    }

    /// STAT: filesystem usage of the directory holding the data files,
    /// plus the engine's record counters
    fn stat(&self, sink: &mut dyn ReplySink, cmd: &mut Cmd) -> Result<()> {
        let parent = self
            .config
            .data
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let (fs_total, fs_free) = stats::fs_stat(parent)?;
        let stat = StorageStat {
            fs_total,
            fs_free,
            total_records: self.engine.total_records(),
            removed_records: self.engine.removed_records(),
        };
        sink.send_stat(cmd, &stat)
    }

    /// DEFRAG: status query or compaction start, selected by the control's
    /// STATUS flag; the resulting state is the command's status
    fn defrag(&self, _cmd: &Cmd, data: &[u8]) -> Result<i32> {
        let mut ctl = DefragCtl::from_bytes(data).map_err(|e| {
            tracing::error!(size = data.len(), error = %e, "defrag: invalid control");
            e
        })?;
        convert_defrag_ctl(&mut ctl);

        ctl.status = if ctl.flags & defragflags::STATUS != 0 {
            self.engine.defrag_status()
        } else {
            self.engine.start_defrag()
        };

        tracing::info!(flags = ctl.flags, status = ctl.status, "defrag request");

        Ok(ctl.status)
    }
}
