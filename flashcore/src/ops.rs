// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Partition operations: read, write (raw or sparse), erase and
//! format against resolved partition records, vendor differences hidden
//! behind [`FlashIo`].
//!
//! Range checks happen here, before anything reaches the wire. Progress
//! pairs are monotonically non-decreasing with a final
//! `current == total` on success.

use crate::error::{Result, StorageError};
use crate::event::{CancelToken, Events};
use crate::proto::firehose::Firehose;
use crate::proto::sprd::SprdBoot;
use crate::proto::xflash::{PartType, Xflash};
use crate::sparse::{self, SparseEvent, SparseReader};
use crate::storage::partition::{PartitionRecord, PartitionTable, Slot};
use crate::superdef::SuperDef;

/// Default streaming chunk.
pub const CHUNK_SIZE: usize = 0x100000;

/// Vendor-neutral flash I/O against one resolved partition.
pub trait FlashIo {
    fn sector_size(&self) -> u32;

    /// Whether DONT_CARE ranges may be skipped (pre-erased target)
    /// instead of zero-filled.
    fn skip_dont_care(&self) -> bool;

    /// Open a write covering `total_len` bytes of the partition.
    fn begin_write(&mut self, rec: &PartitionRecord, total_len: u64) -> Result<()>;

    /// Write `data` at byte `offset` inside the partition. Offsets are
    /// strictly non-decreasing across one write.
    fn write_chunk(&mut self, rec: &PartitionRecord, offset: u64, data: &[u8]) -> Result<()>;

    /// Jump over a range (only called when `skip_dont_care`).
    fn skip_to(&mut self, rec: &PartitionRecord, offset: u64) -> Result<()>;

    fn end_write(&mut self) -> Result<()>;

    /// Stream the partition's bytes to `on_chunk` in order.
    fn read(
        &mut self,
        rec: &PartitionRecord,
        cancel: &CancelToken,
        on_chunk: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<()>;

    fn erase(&mut self, rec: &PartitionRecord) -> Result<()>;

    /// Region-wide erase plus trim where the protocol supports it.
    fn format(&mut self, rec: &PartitionRecord) -> Result<()>;
}

/// Resolve the records an operation targets, honoring the A/B tie-break.
fn resolve<'t>(
    table: &'t PartitionTable,
    name: &str,
    slot: Option<Slot>,
) -> Result<Vec<&'t PartitionRecord>> {
    match slot {
        Some(Slot::Both) => {
            let a = table.find(name, Some(Slot::A))?;
            let b = table.find(name, Some(Slot::B))?;
            if std::ptr::eq(a, b) {
                // Not actually slotted; a bare name matched both lookups.
                Ok(vec![a])
            } else {
                Ok(vec![a, b])
            }
        }
        other => Ok(vec![table.find(name, other)?]),
    }
}

/// Read a partition into `sink`, 1-MiB pieces, cancellable.
pub fn read_partition(
    io: &mut dyn FlashIo,
    table: &PartitionTable,
    name: &str,
    slot: Option<Slot>,
    sink: &mut dyn std::io::Write,
    events: &Events,
    cancel: &CancelToken,
) -> Result<u64> {
    if slot == Some(Slot::Both) {
        return Err(StorageError::AmbiguousName(name.to_string()).into());
    }
    let rec = table.find(name, slot)?;
    let total = rec.size();
    let mut done: u64 = 0;
    io.read(rec, cancel, &mut |chunk| {
        cancel.check(done)?;
        sink.write_all(chunk)
            .map_err(crate::error::TransportError::Io)?;
        done += chunk.len() as u64;
        events.progress(done, total);
        Ok(())
    })?;
    if done != total {
        return Err(StorageError::SizeMismatch {
            expected: total,
            actual: done,
        }
        .into());
    }
    Ok(done)
}

/// Write raw bytes to a partition (both slots when asked; the whole
/// operation fails if either side fails).
pub fn write_partition(
    io: &mut dyn FlashIo,
    table: &PartitionTable,
    name: &str,
    slot: Option<Slot>,
    data: &[u8],
    events: &Events,
    cancel: &CancelToken,
) -> Result<()> {
    if sparse::is_sparse(data) {
        return write_partition_sparse(io, table, name, slot, data, events, cancel);
    }
    for rec in resolve(table, name, slot)? {
        check_fits(rec, data.len() as u64)?;
        events.info(format!("writing {} ({} bytes)", rec.name, data.len()));
        write_raw(io, rec, data, events, cancel)?;
    }
    Ok(())
}

fn write_raw(
    io: &mut dyn FlashIo,
    rec: &PartitionRecord,
    data: &[u8],
    events: &Events,
    cancel: &CancelToken,
) -> Result<()> {
    let total = data.len() as u64;
    io.begin_write(rec, total)?;
    let mut done: u64 = 0;
    for chunk in data.chunks(CHUNK_SIZE) {
        cancel.check(done)?;
        io.write_chunk(rec, done, chunk)?;
        done += chunk.len() as u64;
        events.progress(done, total);
    }
    io.end_write()?;
    if total == 0 {
        events.progress(0, 0);
    }
    Ok(())
}

/// Stream a sparse image to a partition through the streaming decoder: one
/// underlying write per RAW/FILL chunk, DONT_CARE skipped or zero-filled
/// per the protocol's flag.
pub fn write_partition_sparse(
    io: &mut dyn FlashIo,
    table: &PartitionTable,
    name: &str,
    slot: Option<Slot>,
    sparse_data: &[u8],
    events: &Events,
    cancel: &CancelToken,
) -> Result<()> {
    for rec in resolve(table, name, slot)? {
        let mut reader = SparseReader::new(sparse_data)?;
        let total = reader.header().expanded_len();
        check_fits(rec, total)?;
        events.info(format!("writing {} (sparse, {} bytes expanded)", rec.name, total));

        io.begin_write(rec, total)?;
        let mut last: u64 = 0;
        while let Some(event) = reader.next_event()? {
            cancel.check(last)?;
            match event {
                SparseEvent::Write { offset, data } => {
                    fill_gap(io, rec, last, offset)?;
                    io.write_chunk(rec, offset, &data)?;
                    last = offset + data.len() as u64;
                }
                SparseEvent::SkipTo { offset } => {
                    if io.skip_dont_care() {
                        io.skip_to(rec, offset)?;
                    } else {
                        fill_gap(io, rec, last, offset)?;
                    }
                    last = offset;
                }
            }
            events.progress(last, total);
        }
        io.end_write()?;
        events.progress(total, total);
    }
    Ok(())
}

/// Zero-fill [from, to) for targets that cannot skip.
fn fill_gap(io: &mut dyn FlashIo, rec: &PartitionRecord, from: u64, to: u64) -> Result<()> {
    if from >= to || io.skip_dont_care() {
        return Ok(());
    }
    let zeros = vec![0u8; CHUNK_SIZE.min((to - from) as usize)];
    let mut at = from;
    while at < to {
        let take = ((to - at) as usize).min(zeros.len());
        io.write_chunk(rec, at, &zeros[..take])?;
        at += take as u64;
    }
    Ok(())
}

pub fn erase_partition(
    io: &mut dyn FlashIo,
    table: &PartitionTable,
    name: &str,
    slot: Option<Slot>,
    events: &Events,
) -> Result<()> {
    for rec in resolve(table, name, slot)? {
        events.info(format!("erasing {}", rec.name));
        io.erase(rec)?;
    }
    Ok(())
}

pub fn format_partition(
    io: &mut dyn FlashIo,
    table: &PartitionTable,
    name: &str,
    slot: Option<Slot>,
    events: &Events,
) -> Result<()> {
    for rec in resolve(table, name, slot)? {
        events.info(format!("formatting {}", rec.name));
        io.format(rec)?;
    }
    Ok(())
}

fn check_fits(rec: &PartitionRecord, len: u64) -> Result<()> {
    if len > rec.size() {
        return Err(StorageError::OutOfRange {
            offset: 0,
            len,
            limit: rec.size(),
        }
        .into());
    }
    Ok(())
}

/// Per-child outcome of a super flash.
#[derive(Debug)]
pub struct SuperChildStatus {
    pub name: String,
    pub result: Result<()>,
}

/// Flash a super definition: every child, then the super-meta blob last.
///
/// Missing device partitions fail the whole plan before any byte moves;
/// a child's write failure is recorded and does not roll back earlier
/// successes.
pub fn flash_super(
    io: &mut dyn FlashIo,
    table: &PartitionTable,
    def: &SuperDef,
    payload: &mut dyn FnMut(&str) -> Result<Vec<u8>>,
    events: &Events,
    cancel: &CancelToken,
) -> Result<Vec<SuperChildStatus>> {
    // Fail fast: every child must exist on the device before we write.
    for child in &def.partitions {
        let slot = child.slot()?;
        resolve(table, &child.name, slot)?;
    }

    let mut statuses = Vec::with_capacity(def.partitions.len() + 1);
    for child in &def.partitions {
        let slot = child.slot()?;
        let result = payload(&child.path).and_then(|data| {
            write_partition(io, table, &child.name, slot, &data, events, cancel)
        });
        if let Err(e) = &result {
            events.warn(format!("super child {} failed: {e}", child.name));
        }
        statuses.push(SuperChildStatus {
            name: child.name.clone(),
            result,
        });
    }

    // The meta blob goes last so a half-written set is never activated.
    let meta_result = payload(&def.meta_path)
        .and_then(|data| write_partition(io, table, "super", None, &data, events, cancel));
    statuses.push(SuperChildStatus {
        name: "super(meta)".to_string(),
        result: meta_result,
    });
    Ok(statuses)
}

// ---------------------------------------------------------------------------
// Vendor adapters.

/// Firehose-backed I/O (Qualcomm).
pub struct FirehoseIo<'a, 'b> {
    pub fh: &'a mut Firehose<'b>,
    pub cancel: CancelToken,
}

impl FlashIo for FirehoseIo<'_, '_> {
    fn sector_size(&self) -> u32 {
        self.fh.sector_size()
    }

    fn skip_dont_care(&self) -> bool {
        true
    }

    fn begin_write(&mut self, _rec: &PartitionRecord, _total_len: u64) -> Result<()> {
        Ok(())
    }

    fn write_chunk(&mut self, rec: &PartitionRecord, offset: u64, data: &[u8]) -> Result<()> {
        let ss = self.sector_size() as u64;
        debug_assert_eq!(offset % ss, 0);
        let start = rec.start_sector + offset / ss;
        self.fh
            .program_all(rec.lun, start, data, &self.cancel, &mut |_| {})
    }

    fn skip_to(&mut self, _rec: &PartitionRecord, _offset: u64) -> Result<()> {
        Ok(())
    }

    fn end_write(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(
        &mut self,
        rec: &PartitionRecord,
        _cancel: &CancelToken,
        on_chunk: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<()> {
        let promised = self.fh.start_read(rec.lun, rec.start_sector, rec.sector_count)?;
        let mut left = promised;
        while left > 0 {
            let take = (left as usize).min(self.fh.max_payload());
            let chunk = self.fh.read_raw(take)?;
            left -= chunk.len() as u64;
            on_chunk(&chunk)?;
        }
        self.fh.finish_read()
    }

    fn erase(&mut self, rec: &PartitionRecord) -> Result<()> {
        self.fh.erase(rec.lun, rec.start_sector, rec.sector_count)
    }

    fn format(&mut self, rec: &PartitionRecord) -> Result<()> {
        self.fh.erase(rec.lun, rec.start_sector, rec.sector_count)
    }
}

/// XFlash-DA-backed I/O (MTK).
pub struct XflashIo<'a, 'b> {
    pub da: &'a mut Xflash<'b>,
    pub part: PartType,
    pub cancel: CancelToken,
}

impl FlashIo for XflashIo<'_, '_> {
    fn sector_size(&self) -> u32 {
        512
    }

    fn skip_dont_care(&self) -> bool {
        true
    }

    fn begin_write(&mut self, _rec: &PartitionRecord, _total_len: u64) -> Result<()> {
        Ok(())
    }

    fn write_chunk(&mut self, rec: &PartitionRecord, offset: u64, data: &[u8]) -> Result<()> {
        self.da.write_flash(
            self.part,
            rec.start_offset() + offset,
            data,
            &self.cancel,
            &mut |_| {},
        )
    }

    fn skip_to(&mut self, _rec: &PartitionRecord, _offset: u64) -> Result<()> {
        Ok(())
    }

    fn end_write(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(
        &mut self,
        rec: &PartitionRecord,
        cancel: &CancelToken,
        on_chunk: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<()> {
        self.da
            .read_flash(self.part, rec.start_offset(), rec.size(), cancel, on_chunk)
    }

    fn erase(&mut self, rec: &PartitionRecord) -> Result<()> {
        self.da.format_flash(self.part, rec.start_offset(), rec.size())
    }

    fn format(&mut self, rec: &PartitionRecord) -> Result<()> {
        self.da.format_flash(self.part, rec.start_offset(), rec.size())?;
        self.da.reinit_device_info()
    }
}

/// FDL2-backed I/O (Unisoc). Name-addressed and strictly sequential, so
/// DONT_CARE ranges are always expanded.
pub struct SprdIo<'a, 'b> {
    pub bsl: &'a mut SprdBoot<'b>,
}

impl FlashIo for SprdIo<'_, '_> {
    fn sector_size(&self) -> u32 {
        512
    }

    fn skip_dont_care(&self) -> bool {
        false
    }

    fn begin_write(&mut self, rec: &PartitionRecord, total_len: u64) -> Result<()> {
        self.bsl.begin_partition_write(&rec.name, total_len)
    }

    fn write_chunk(&mut self, _rec: &PartitionRecord, _offset: u64, data: &[u8]) -> Result<()> {
        self.bsl.midst_data(data)
    }

    fn skip_to(&mut self, _rec: &PartitionRecord, _offset: u64) -> Result<()> {
        Err(StorageError::UnsupportedLayout("FDL2 cannot skip ranges").into())
    }

    fn end_write(&mut self) -> Result<()> {
        self.bsl.end_partition_write()
    }

    fn read(
        &mut self,
        rec: &PartitionRecord,
        cancel: &CancelToken,
        on_chunk: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<()> {
        self.bsl.read_partition(&rec.name, rec.size(), cancel, on_chunk)
    }

    fn erase(&mut self, rec: &PartitionRecord) -> Result<()> {
        self.bsl.erase_partition(&rec.name)
    }

    fn format(&mut self, rec: &PartitionRecord) -> Result<()> {
        self.bsl.erase_partition(&rec.name)
    }
}
