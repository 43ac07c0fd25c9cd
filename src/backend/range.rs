//! Range engine
//!
//! Two-phase range execution: a collect pass copies every hit in
//! `[start, end]` into a flat buffer, then an apply pass replays each hit as
//! a read reply (READ_RANGE) or a removal (DEL_RANGE). Collecting first
//! keeps no engine borrows alive across the replies and gives the optional
//! sort something to sort.

use crate::engine::{ctlflags, RangeHit, RangeScan, ReadFlavour};
use crate::error::{BlobError, Result};
use crate::protocol::{
    cmdflags, convert_io_attr, dump_key, ioflags, Cmd, CommandCode, IoAttr,
};
use crate::record::{ExtHeader, EHDR_LEN};
use crate::reply::{FdRegion, ReplySink};

use super::BlobBackend;

/// Initial collection buffer capacity; doubles on growth
const COLLECT_INITIAL: usize = 1000;

impl BlobBackend {
    /// Handle READ_RANGE / DEL_RANGE
    pub(crate) fn read_range(
        &self,
        sink: &mut dyn ReplySink,
        cmd: &mut Cmd,
        data: &[u8],
        code: CommandCode,
    ) -> Result<()> {
        let mut io = IoAttr::from_bytes(data)?;
        convert_io_attr(&mut io);

        let mut scan = RangeScan::new(io.id, io.parent, io.offset, io.size);
        let mut hits: Vec<RangeHit> = Vec::new();

        // Collect pass: flat copies only, no replies yet
        let collect = |scan: &mut RangeScan, hit: RangeHit| -> Result<()> {
            tracing::debug!(
                key = %dump_key(&hit.record_key),
                pos = scan.current_pos,
                record_size = hit.record_size,
                requested_offset = hit.requested_offset,
                "range: hit"
            );

            if hit.requested_offset > hit.record_size {
                return Ok(());
            }

            if hits.len() == hits.capacity() {
                let grown = if hits.capacity() == 0 {
                    COLLECT_INITIAL
                } else {
                    hits.capacity() * 2
                };
                hits.try_reserve_exact(grown - hits.len()).map_err(|_| {
                    BlobError::OutOfMemory(format!(
                        "range collection buffer: {} entries",
                        grown
                    ))
                })?;
            }

            hits.push(hit);
            scan.current_pos += 1;
            Ok(())
        };

        if let Err(e) = self.engine.read_range(&mut scan, collect) {
            tracing::error!(
                start = %dump_key(&io.id),
                end = %dump_key(&io.parent),
                error = %e,
                "range: scan failed"
            );
            return Err(e);
        }

        // Apply pass
        if code == CommandCode::ReadRange && cmd.flags & cmdflags::SORT != 0 {
            tracing::debug!("range: sorting keys before sending");
            hits.sort_by(|a, b| a.record_key.cmp(&b.record_key));
        }

        let start_from = if code == CommandCode::ReadRange {
            io.start
        } else {
            0
        };

        for (i, hit) in hits.iter().enumerate().skip(start_from as usize) {
            match code {
                CommandCode::ReadRange => {
                    if io.num > 0 && i as u64 >= io.num + start_from {
                        break;
                    }
                    self.range_read_hit(sink, cmd, &io, hit).map_err(|e| {
                        tracing::debug!(key = %dump_key(&hit.record_key), error = %e, "range: read failed");
                        e
                    })?;
                }
                _ => {
                    self.range_del_hit(hit).map_err(|e| {
                        tracing::debug!(key = %dump_key(&hit.record_key), error = %e, "range: del failed");
                        e
                    })?;
                }
            }
        }

        // Terminator: tells the client how many hits the scan produced
        if scan.current_pos > 0 {
            let mut terminator = io.clone();
            terminator.num = scan.current_pos.saturating_sub(start_from);
            terminator.offset = 0;
            terminator.size = 0;
            sink.send_read_data(cmd, &terminator, None, 0)?;
        }

        Ok(())
    }

    /// Replay one collected hit as a read reply
    fn range_read_hit(
        &self,
        sink: &mut dyn ReplySink,
        cmd: &mut Cmd,
        io: &IoAttr,
        hit: &RangeHit,
    ) -> Result<()> {
        if hit.requested_offset > hit.record_size {
            return Ok(());
        }

        if io.flags & ioflags::NODATA != 0 {
            return Ok(());
        }

        let mut hit_io = IoAttr::for_key(hit.record_key);
        hit_io.parent = io.parent;
        hit_io.offset = hit.requested_offset;
        hit_io.size = hit.record_size - hit.requested_offset;

        // Re-lookup for the record flags; the collected copy has only
        // location and size
        let control = self
            .engine
            .lookup(&hit.record_key, ReadFlavour::NoCsum)?;

        if control.flags & ctlflags::HAS_EXTHDR != 0 {
            let header = ExtHeader::read_at(&hit.handle, hit.record_offset)?;
            header.to_list().apply_to_io(&mut hit_io);

            hit_io.offset += EHDR_LEN as u64;
            hit_io.size = hit_io.size.checked_sub(EHDR_LEN as u64).ok_or_else(|| {
                BlobError::OutOfRange(format!(
                    "{}: range offset {} past record payload",
                    dump_key(&hit.record_key),
                    hit.requested_offset
                ))
            })?;
        }

        let region = FdRegion {
            fd: hit.record_fd,
            handle: hit.handle.clone(),
            offset: hit.record_offset + hit_io.offset,
            size: hit_io.size,
        };
        sink.send_read_data(cmd, &hit_io, Some(region), 0)
    }

    /// Replay one collected hit as a removal
    fn range_del_hit(&self, hit: &RangeHit) -> Result<()> {
        tracing::debug!(key = %dump_key(&hit.record_key), "range: del");
        self.engine.remove(&hit.record_key)
    }
}
