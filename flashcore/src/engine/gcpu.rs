// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! GCPU: the graphics crypto engine.
//!
//! Its AES-CBC microcode runs with a host-chosen (here all-zero) key and
//! ignores the memory blacklist. Decrypting 16 bytes from an arbitrary
//! address yields `AES_dec(zero_key, mem[addr])`, which the host inverts
//! with a software AES encryption to recover the original bytes. Running
//! the same decrypt with an arbitrary destination is the write gadget the
//! Amonet bridge uses.

use std::time::Duration;

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Block};

use crate::engine::{poll_set, MemAccess};
use crate::error::Result;

// Register offsets from the per-chip base.
const REG_CTL: u32 = 0x000;
const REG_MSC: u32 = 0x004;
const REG_PC: u32 = 0x400;
const REG_INT_CLR: u32 = 0x408;
const REG_DONE: u32 = 0x40C;

// Shared-memory slots.
const MEM_CMD: u32 = 0x800; // cmd, src, dst, length
const MEM_KEY: u32 = 0x810; // 8 words
const MEM_IV: u32 = 0x830; // 4 words
const MEM_SLOT: u32 = 0x840; // 4 words in/out

/// AES-CBC decrypt microprogram entry.
const CMD_D_CBC: u32 = 0x12;

const DONE_TIMEOUT: Duration = Duration::from_secs(1);

pub const BLOCK: usize = 16;

/// GCPU driver over a word-access seam.
pub struct Gcpu<'m> {
    base: u32,
    mem: &'m mut dyn MemAccess,
}

impl<'m> Gcpu<'m> {
    pub fn new(mem: &'m mut dyn MemAccess, base: u32) -> Self {
        Gcpu { base, mem }
    }

    /// Reset the engine and zero the key and IV slots.
    pub fn init(&mut self) -> Result<()> {
        self.mem.write32(self.base + REG_CTL, 0)?;
        self.mem.write32(self.base + REG_MSC, 0)?;
        self.mem.write32(self.base + REG_CTL, 1)?;
        for w in 0..8 {
            self.mem.write32(self.base + MEM_KEY + w * 4, 0)?;
        }
        for w in 0..4 {
            self.mem.write32(self.base + MEM_IV + w * 4, 0)?;
        }
        Ok(())
    }

    /// Run one D_CBC: decrypt `blocks` AES blocks from `src` into `dst`.
    ///
    /// `dst` may be the engine's own slot (for reads) or any physical
    /// address (the write gadget).
    pub fn run_d_cbc(&mut self, src: u32, dst: u32, blocks: u32) -> Result<()> {
        self.mem.write32(self.base + MEM_CMD, CMD_D_CBC)?;
        self.mem.write32(self.base + MEM_CMD + 4, src)?;
        self.mem.write32(self.base + MEM_CMD + 8, dst)?;
        self.mem.write32(self.base + MEM_CMD + 12, blocks)?;
        self.mem.write32(self.base + REG_INT_CLR, 1)?;
        self.mem.write32(self.base + REG_PC, CMD_D_CBC)?;
        poll_set(self.mem, self.base + REG_DONE, 1, DONE_TIMEOUT, "gcpu d_cbc")
    }

    /// Read one 16-byte block of arbitrary memory.
    pub fn read_block(&mut self, addr: u32) -> Result<[u8; BLOCK]> {
        self.run_d_cbc(addr, self.base + MEM_SLOT, 1)?;
        let mut plain = [0u8; BLOCK];
        for w in 0..4u32 {
            let word = self.mem.read32(self.base + MEM_SLOT + w * 4)?;
            plain[w as usize * 4..w as usize * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        // Engine produced AES_dec(0, mem); invert it.
        let mut block = Block::clone_from_slice(&plain);
        zero_key_cipher().encrypt_block(&mut block);
        let mut out = [0u8; BLOCK];
        out.copy_from_slice(&block);
        Ok(out)
    }

    pub fn read_mem(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        let mut done = 0;
        while done < len {
            let block = self.read_block(addr + done as u32)?;
            let take = (len - done).min(BLOCK);
            out.extend_from_slice(&block[..take]);
            done += take;
        }
        Ok(out)
    }

    /// Write one 16-byte block to `addr`, staging the pre-image at
    /// `staging` (any address the plain `write32` may touch).
    pub fn write_block(&mut self, addr: u32, data: &[u8; BLOCK], staging: u32) -> Result<()> {
        // The engine will decrypt the staged block; stage its encryption.
        let mut block = Block::clone_from_slice(data);
        zero_key_cipher().encrypt_block(&mut block);
        for w in 0..4 {
            let word = u32::from_le_bytes(block[w * 4..w * 4 + 4].try_into().unwrap());
            self.mem.write32(staging + (w as u32) * 4, word)?;
        }
        self.run_d_cbc(staging, addr, 1)
    }
}

fn zero_key_cipher() -> Aes128 {
    Aes128::new(&Block::default())
}

/// The transform the engine applies to memory during a read, software
/// edition (used by tests and by bridges that pre-compute expected
/// values).
pub fn decrypt_transform(block: &[u8; BLOCK]) -> [u8; BLOCK] {
    let mut b = Block::clone_from_slice(block);
    zero_key_cipher().decrypt_block(&mut b);
    let mut out = [0u8; BLOCK];
    out.copy_from_slice(&b);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testmem::MockMem;

    const BASE: u32 = 0x1021_6000;

    #[test]
    fn read_block_inverts_the_engine_transform() {
        let memory_bytes: [u8; BLOCK] = *b"secret brom data";
        // What the engine would leave in the slot.
        let engine_out = decrypt_transform(&memory_bytes);

        let mut mem = MockMem::new();
        mem.preset(BASE + REG_DONE, 1);
        for w in 0..4 {
            let word = u32::from_le_bytes(engine_out[w * 4..w * 4 + 4].try_into().unwrap());
            mem.preset(BASE + MEM_SLOT + (w as u32) * 4, word);
        }

        let mut gcpu = Gcpu::new(&mut mem, BASE);
        assert_eq!(gcpu.read_block(0x0010_0000).unwrap(), memory_bytes);
        // The command block addressed the right source.
        assert_eq!(mem.written_to(BASE + MEM_CMD + 4), vec![0x0010_0000]);
        assert_eq!(mem.written_to(BASE + MEM_CMD + 8), vec![BASE + MEM_SLOT]);
    }

    #[test]
    fn write_block_stages_the_preimage() {
        let payload: [u8; BLOCK] = *b"patched da check";
        let staging = 0x0010_0A00;
        let mut mem = MockMem::new();
        mem.preset(BASE + REG_DONE, 1);
        let mut gcpu = Gcpu::new(&mut mem, BASE);
        gcpu.write_block(0x0020_0000, &payload, staging).unwrap();

        // The staged words decrypt back to the payload.
        let mut staged = [0u8; BLOCK];
        for w in 0..4u32 {
            let word = mem.get(staging + w * 4);
            staged[w as usize * 4..w as usize * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        assert_eq!(decrypt_transform(&staged), payload);
        assert_eq!(mem.written_to(BASE + MEM_CMD + 8), vec![0x0020_0000]);
    }

    #[test]
    fn init_zeroes_key_and_iv_slots() {
        let mut mem = MockMem::new();
        Gcpu::new(&mut mem, BASE).init().unwrap();
        for w in 0..8 {
            assert_eq!(mem.get(BASE + MEM_KEY + w * 4), 0);
        }
        for w in 0..4 {
            assert_eq!(mem.get(BASE + MEM_IV + w * 4), 0);
        }
    }
}
