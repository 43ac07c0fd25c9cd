//! Blob adapter
//!
//! Wraps the engine's write/read primitives with the record codec,
//! translates command-level flags into engine flags, and produces reply
//! descriptors.

use crate::engine::{ctlflags, IoVec, ReadFlavour, WriteControl, CTL_LEN};
use crate::error::{BlobError, Result};
use crate::protocol::{
    cmdflags, convert_io_attr, dump_key, ioflags, Cmd, IoAttr, Key, IO_ATTR_LEN,
};
use crate::record::{ExtHeader, ExtList, EHDR_LEN};
use crate::reply::{replyflags, FdChecksum, FdRegion, FileInfo, ReplySink};

use super::BlobBackend;

impl BlobBackend {
    // =========================================================================
    // Write
    // =========================================================================

    /// Handle a WRITE command: two-vector write of extension header plus
    /// payload, then a file-info reply (unless suppressed)
    pub(crate) fn write(
        &self,
        sink: &mut dyn ReplySink,
        cmd: &mut Cmd,
        data: &[u8],
    ) -> Result<()> {
        let mut io = IoAttr::from_bytes(data)?;
        convert_io_attr(&mut io);
        let payload = &data[IO_ATTR_LEN..];

        tracing::debug!(
            key = %dump_key(&io.id),
            offset = io.offset,
            size = io.size,
            ioflags = io.flags,
            "write: start"
        );

        if io.flags & ioflags::COMPRESS != 0 {
            return Err(BlobError::Unsupported(
                "compressed writes are not supported".to_string(),
            ));
        }

        let elist = ExtList::from_io(&io);
        let header = elist.to_header().to_bytes();

        let mut engine_flags = ctlflags::HAS_EXTHDR;
        if io.flags & ioflags::APPEND != 0 {
            engine_flags |= ctlflags::APPEND;
        }
        if io.flags & ioflags::NOCSUM != 0 {
            engine_flags |= ctlflags::NOCSUM;
        }

        let key = io.id;
        let mut control: Option<WriteControl> = None;

        if io.flags & ioflags::PREPARE != 0 {
            let reserve = io.num + EHDR_LEN as u64;
            if let Err(e) = self.engine.write_prepare(&key, reserve, engine_flags) {
                tracing::error!(key = %dump_key(&key), size = reserve, error = %e, "write: prepare failed");
                return Err(e);
            }
        }

        if io.size > 0 {
            if (payload.len() as u64) < io.size {
                return Err(BlobError::Protocol(format!(
                    "write payload truncated: have {} bytes, io requires {}",
                    payload.len(),
                    io.size
                )));
            }
            let payload = &payload[..io.size as usize];

            let iov = [
                IoVec {
                    offset: 0,
                    data: &header,
                },
                IoVec {
                    offset: EHDR_LEN as u64 + io.offset,
                    data: payload,
                },
            ];

            let result = if io.flags & ioflags::PLAIN_WRITE != 0 {
                self.engine.plain_writev(&key, &iov, engine_flags)
            } else {
                self.engine
                    .writev(&key, &iov, engine_flags)
                    .map(|wc| control = Some(wc))
            };
            if let Err(e) = result {
                tracing::error!(key = %dump_key(&key), error = %e, "write: failed");
                return Err(e);
            }
        }

        if io.flags & ioflags::COMMIT != 0 && io.flags & ioflags::PLAIN_WRITE != 0 {
            let commit_size = io.num + EHDR_LEN as u64;
            if let Err(e) = self.engine.write_commit(&key, commit_size, engine_flags) {
                tracing::error!(key = %dump_key(&key), size = commit_size, error = %e, "write: commit failed");
                return Err(e);
            }
        }

        // Prepare-only, plain and zero-size writes produced no control yet
        let control = match control {
            Some(control) => control,
            None => self.engine.lookup(&key, ReadFlavour::NoCsum).map_err(|e| {
                tracing::error!(key = %dump_key(&key), error = %e, "write: post-write lookup failed");
                e
            })?,
        };

        if io.flags & ioflags::WRITE_NO_FILE_INFO != 0 {
            cmd.flags |= cmdflags::NEED_ACK;
            return Ok(());
        }

        let mut fd_offset = control.ctl_data_offset + CTL_LEN as u64;
        if control.flags & ctlflags::HAS_EXTHDR != 0 {
            fd_offset += EHDR_LEN as u64;
        }

        let info = FileInfo {
            fd: control.data_fd,
            handle: control.handle.clone(),
            offset: fd_offset,
            size: control.size,
            tsec: elist.tsec,
            tnsec: elist.tnsec,
        };
        sink.send_file_info(cmd, &info)?;

        tracing::info!(
            key = %dump_key(&key),
            fd = control.data_fd,
            fd_offset,
            size = control.size,
            "write: complete"
        );
        Ok(())
    }

    // =========================================================================
    // Read
    // =========================================================================

    /// Handle a READ command: zero-copy reply referencing the record's user
    /// payload
    pub(crate) fn read(
        &self,
        sink: &mut dyn ReplySink,
        cmd: &mut Cmd,
        data: &[u8],
        last: bool,
    ) -> Result<()> {
        let mut io = IoAttr::from_bytes(data)?;
        convert_io_attr(&mut io);
        let key = io.id;

        let flavour = if io.flags & ioflags::NOCSUM != 0 {
            ReadFlavour::NoCsum
        } else {
            ReadFlavour::Csum
        };

        let control = self.engine.lookup(&key, flavour).map_err(|e| {
            tracing::error!(key = %dump_key(&key), error = %e, "read: lookup failed");
            e
        })?;

        let mut offset = control.data_offset;
        let mut size = control.total_data_size;

        if control.flags & ctlflags::HAS_EXTHDR != 0 {
            if size < EHDR_LEN as u64 {
                return Err(BlobError::Corrupt(format!(
                    "{}: record shorter than extension header",
                    dump_key(&key)
                )));
            }
            let header = ExtHeader::read_at(&control.handle, offset)?;
            header.to_list().apply_to_io(&mut io);
            size -= EHDR_LEN as u64;
            offset += EHDR_LEN as u64;
        }

        io.total_size = size;

        if io.offset > 0 {
            if io.offset >= size {
                return Err(BlobError::OutOfRange(format!(
                    "{}: read offset {} past record size {}",
                    dump_key(&key),
                    io.offset,
                    size
                )));
            }
            offset += io.offset;
            size -= io.offset;
        }

        if io.size != 0 && size > io.size {
            size = io.size;
        } else {
            io.size = size;
        }

        // The data reply is the answer; no separate ack is owed
        if size > 0 && last {
            cmd.flags &= !cmdflags::NEED_ACK;
        }

        self.access.record(control.data_fd, offset);
        let hints = if self.access.is_random() {
            replyflags::CACHE_FORGET
        } else {
            0
        };

        let region = FdRegion {
            fd: control.data_fd,
            handle: control.handle.clone(),
            offset,
            size,
        };
        sink.send_read_data(cmd, &io, Some(region), hints)
    }

    // =========================================================================
    // Lookup / file-info
    // =========================================================================

    /// Handle a LOOKUP command: file-info reply for the record's user
    /// payload
    pub(crate) fn file_info(&self, sink: &mut dyn ReplySink, cmd: &mut Cmd) -> Result<()> {
        let key = cmd.id;

        let control = self.engine.lookup(&key, ReadFlavour::NoCsum).map_err(|e| {
            tracing::error!(key = %dump_key(&key), error = %e, "lookup: failed");
            e
        })?;

        let mut offset = control.data_offset;
        let mut size = control.total_data_size;
        let mut elist = ExtList::default();

        if control.flags & ctlflags::HAS_EXTHDR != 0 {
            if size < EHDR_LEN as u64 {
                return Err(BlobError::OutOfRange(format!(
                    "{}: record shorter than extension header",
                    dump_key(&key)
                )));
            }
            let header = ExtHeader::read_at(&control.handle, offset)?;
            elist = header.to_list();
            size -= EHDR_LEN as u64;
            offset += EHDR_LEN as u64;
        }

        if size == 0 {
            tracing::info!(key = %dump_key(&key), "lookup: zero size record");
            return Err(BlobError::NotFound);
        }

        let info = FileInfo {
            fd: control.data_fd,
            handle: control.handle.clone(),
            offset,
            size,
            tsec: elist.tsec,
            tnsec: elist.tnsec,
        };
        sink.send_file_info(cmd, &info)
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Handle a DEL command: engine removal, error propagated verbatim
    pub(crate) fn del(&self, cmd: &Cmd) -> Result<()> {
        match self.engine.remove(&cmd.id) {
            Ok(()) => {
                tracing::info!(key = %dump_key(&cmd.id), "del: removed");
                Ok(())
            }
            Err(e) => {
                tracing::error!(key = %dump_key(&cmd.id), error = %e, "del: failed");
                Err(e)
            }
        }
    }

    // =========================================================================
    // Checksum
    // =========================================================================

    /// Checksum of the record's user payload, delegated to the node's
    /// checksum-of-descriptor routine
    pub fn checksum(
        &self,
        csummer: &dyn FdChecksum,
        id: &Key,
        out: &mut [u8],
    ) -> Result<()> {
        let mut control = self.engine.lookup(id, ReadFlavour::NoCsum).map_err(|e| {
            tracing::error!(key = %dump_key(id), error = %e, "checksum: lookup failed");
            e
        })?;

        if control.flags & ctlflags::HAS_EXTHDR != 0 {
            if control.total_data_size < EHDR_LEN as u64 {
                return Err(BlobError::InvalidConfig(format!(
                    "{}: record shorter than extension header",
                    dump_key(id)
                )));
            }
            control.data_offset += EHDR_LEN as u64;
            control.total_data_size -= EHDR_LEN as u64;
        }

        if control.total_data_size == 0 {
            out.fill(0);
            return Ok(());
        }

        let region = FdRegion {
            fd: control.data_fd,
            handle: control.handle.clone(),
            offset: control.data_offset,
            size: control.total_data_size,
        };
        csummer.checksum_fd(&region, out)
    }
}
