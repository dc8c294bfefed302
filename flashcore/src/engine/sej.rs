// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! SEJ: the security engine exposing AES-128-CBC with hardware keys,
//! including the device root key. Used for RPMB and MTEE key derivation
//! and by the Carbonara bridge to forge DA digests.
//!
//! The ACON bit layout shifted between chip generations; both published
//! layouts are carried here as-is and selected per chip.

use std::time::Duration;

use crate::engine::{poll_set, MemAccess};
use crate::error::Result;

// Register offsets from the per-chip base.
const REG_CON: u32 = 0x00;
const REG_ACON: u32 = 0x04;
const REG_ACON2: u32 = 0x08;
const REG_ACONK: u32 = 0x0C;
const REG_ASRC: u32 = 0x10; // 4 words
const REG_AKEY: u32 = 0x20; // 8 words
const REG_ACFG: u32 = 0x40; // 4 words (IV)
const REG_AOUT: u32 = 0x50; // 4 words

// ACON fields.
const ACON_DEC: u32 = 0x0000_0000;
const ACON_CBC: u32 = 0x0000_0002;
const ACON_AES_128: u32 = 0x0000_0000;
/// Encrypt bit, original layout.
const ACON_ENC_LEGACY: u32 = 0x0000_0001;
/// Encrypt bit, post-2018 layout.
const ACON_ENC_MODERN: u32 = 0x0000_0010;

// ACON2 fields.
const ACON2_CLR: u32 = 0x0000_0001;
const ACON2_START: u32 = 0x0000_0004;
const ACON2_RDY: u32 = 0x0000_8000;

// ACONK fields.
/// Take the key from the hardware key slot instead of AKEY.
const ACONK_BK2C: u32 = 0x0000_0010;
/// Route the result back into the key register (wrap mode).
const ACONK_R2K: u32 = 0x0000_0100;

const READY_TIMEOUT: Duration = Duration::from_secs(1);

pub const BLOCK: usize = 16;

/// Fixed derivation message for the RPMB key.
const RPMB_DERIVE_MSG: [u8; 32] = *b"RPMB KEYSEJ AES Hardware Derive ";

/// ACON generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SejFlavor {
    Legacy,
    Modern,
}

/// Key source for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    /// Caller-supplied software key.
    SwKey([u8; BLOCK]),
    /// The fused hardware key.
    HwKey,
    /// Hardware key with result wrapped back into the key slot.
    HwWrapKey,
}

/// SEJ driver over a word-access seam.
pub struct Sej<'m> {
    base: u32,
    flavor: SejFlavor,
    mem: &'m mut dyn MemAccess,
}

impl<'m> Sej<'m> {
    pub fn new(mem: &'m mut dyn MemAccess, base: u32, flavor: SejFlavor) -> Self {
        Sej { base, flavor, mem }
    }

    fn acon_enc(&self) -> u32 {
        match self.flavor {
            SejFlavor::Legacy => ACON_ENC_LEGACY,
            SejFlavor::Modern => ACON_ENC_MODERN,
        }
    }

    /// Program key source, direction and IV.
    pub fn init(&mut self, mode: KeyMode, encrypt: bool, iv: &[u8; BLOCK]) -> Result<()> {
        self.mem.write32(self.base + REG_CON, 0)?;
        self.mem.write32(self.base + REG_ACON2, ACON2_CLR)?;

        let dir = if encrypt { self.acon_enc() } else { ACON_DEC };
        self.mem
            .write32(self.base + REG_ACON, dir | ACON_CBC | ACON_AES_128)?;

        match mode {
            KeyMode::SwKey(key) => {
                self.mem.write32(self.base + REG_ACONK, 0)?;
                for w in 0..4 {
                    let word = u32::from_le_bytes(key[w * 4..w * 4 + 4].try_into().unwrap());
                    self.mem.write32(self.base + REG_AKEY + (w as u32) * 4, word)?;
                }
                for w in 4..8u32 {
                    self.mem.write32(self.base + REG_AKEY + w * 4, 0)?;
                }
            }
            KeyMode::HwKey => self.mem.write32(self.base + REG_ACONK, ACONK_BK2C)?,
            KeyMode::HwWrapKey => self
                .mem
                .write32(self.base + REG_ACONK, ACONK_BK2C | ACONK_R2K)?,
        }

        for w in 0..4 {
            let word = u32::from_le_bytes(iv[w * 4..w * 4 + 4].try_into().unwrap());
            self.mem.write32(self.base + REG_ACFG + (w as u32) * 4, word)?;
        }
        Ok(())
    }

    /// Push one block through the engine.
    pub fn process_block(&mut self, input: &[u8; BLOCK]) -> Result<[u8; BLOCK]> {
        for w in 0..4 {
            let word = u32::from_le_bytes(input[w * 4..w * 4 + 4].try_into().unwrap());
            self.mem.write32(self.base + REG_ASRC + (w as u32) * 4, word)?;
        }
        self.mem.write32(self.base + REG_ACON2, ACON2_START)?;
        poll_set(self.mem, self.base + REG_ACON2, ACON2_RDY, READY_TIMEOUT, "sej block")?;

        let mut out = [0u8; BLOCK];
        for w in 0..4u32 {
            let word = self.mem.read32(self.base + REG_AOUT + w * 4)?;
            out[w as usize * 4..w as usize * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        Ok(out)
    }

    /// CBC over a whole buffer (length must be a multiple of the block).
    pub fn process(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        debug_assert_eq!(data.len() % BLOCK, 0);
        let mut out = Vec::with_capacity(data.len());
        for chunk in data.chunks_exact(BLOCK) {
            let block: [u8; BLOCK] = chunk.try_into().unwrap();
            out.extend_from_slice(&self.process_block(&block)?);
        }
        Ok(out)
    }

    /// Derive the RPMB authentication key from the hardware root key.
    pub fn derive_rpmb_key(&mut self) -> Result<[u8; 32]> {
        self.init(KeyMode::HwKey, true, &[0u8; BLOCK])?;
        let wrapped = self.process(&RPMB_DERIVE_MSG)?;
        let mut key = [0u8; 32];
        key.copy_from_slice(&wrapped);
        Ok(key)
    }

    /// Encrypt an arbitrary derivation label with the hardware key.
    pub fn derive(&mut self, label: &[u8]) -> Result<Vec<u8>> {
        debug_assert_eq!(label.len() % BLOCK, 0);
        self.init(KeyMode::HwKey, true, &[0u8; BLOCK])?;
        self.process(label)
    }
}
