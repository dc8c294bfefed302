// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! DXCC: the Discretix/Arm CryptoCell. Descriptor-queue driven; every
//! operation is a 6-word descriptor pushed at the queue window. Key
//! derivation is NIST SP 800-108 counter mode realized as AES-CMAC
//! iterations with the platform key.

use std::time::Duration;

use cmac::{Cmac, Mac};

use crate::engine::{poll_set, MemAccess};
use crate::error::Result;

// Register offsets from the per-chip base.
/// Descriptor queue window: six consecutive words.
const REG_QUEUE_WORD0: u32 = 0xE80;
/// Free-slot count of the queue.
const REG_QUEUE_CONTENT: u32 = 0xE1C;
/// Host interrupt register; bit 2 is AXIM completion.
const REG_HOST_IRR: u32 = 0xA00;
const IRR_AXIM_DONE: u32 = 1 << 2;

/// OTP window: word-indexed from the base.
const OTP_WINDOW: u32 = 0x2000;
/// Lifecycle-state OTP word.
const OTP_LIFECYCLE: u32 = 0x2A9;
/// First of eight public-key-hash OTP words.
const OTP_PK_HASH: u32 = 0x2AA;

// Descriptor word 4 operation flags.
const OP_AES_CMAC: u32 = 0x0000_0104;
/// Key select: platform (HUK-derived) key.
const KEY_PLATFORM: u32 = 0x0000_0002;
/// Go bit for word 5.
const DESC_GO: u32 = 0x8000_0000;

const QUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// DXCC driver over a word-access seam.
pub struct Dxcc<'m> {
    base: u32,
    /// DRAM/SRAM area used for descriptor inputs and outputs.
    scratch: u32,
    mem: &'m mut dyn MemAccess,
}

impl<'m> Dxcc<'m> {
    pub fn new(mem: &'m mut dyn MemAccess, base: u32, scratch: u32) -> Self {
        Dxcc { base, scratch, mem }
    }

    pub fn read_otp(&mut self, word: u32) -> Result<u32> {
        self.mem.read32(self.base + OTP_WINDOW + word * 4)
    }

    /// Device lifecycle state (0 = CM, 1 = DM, 5 = secure, 7 = RMA).
    pub fn lifecycle_state(&mut self) -> Result<u32> {
        self.read_otp(OTP_LIFECYCLE)
    }

    /// The fused public-key hash, as the 32 OTP bytes.
    pub fn pk_hash(&mut self) -> Result<[u8; 32]> {
        let mut out = [0u8; 32];
        for w in 0..8u32 {
            let word = self.read_otp(OTP_PK_HASH + w)?;
            out[w as usize * 4..w as usize * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        Ok(out)
    }

    /// Push one 6-word descriptor and wait for AXIM completion.
    pub fn enqueue(&mut self, descriptor: [u32; 6]) -> Result<()> {
        // Wait for a free queue slot.
        poll_set(
            self.mem,
            self.base + REG_QUEUE_CONTENT,
            0xFFFF_FFFF,
            QUEUE_TIMEOUT,
            "dxcc queue slot",
        )?;
        for (i, word) in descriptor.iter().enumerate() {
            self.mem
                .write32(self.base + REG_QUEUE_WORD0 + (i as u32) * 4, *word)?;
        }
        poll_set(
            self.mem,
            self.base + REG_HOST_IRR,
            IRR_AXIM_DONE,
            QUEUE_TIMEOUT,
            "dxcc axim done",
        )?;
        self.mem.write32(self.base + REG_HOST_IRR, IRR_AXIM_DONE)?;
        Ok(())
    }

    /// Derive `out_len` bytes from the platform key on-device.
    ///
    /// One CMAC descriptor per 16-byte counter block; the iteration
    /// message is staged in scratch and the tag read back from it.
    pub fn derive_key(&mut self, label: &[u8], salt: &[u8], out_len: usize) -> Result<Vec<u8>> {
        let iterations = out_len.div_ceil(16);
        let out_addr = self.scratch;
        let msg_addr = self.scratch + 16;

        let mut out = Vec::with_capacity(out_len);
        for i in 1..=iterations {
            let message = kdf_message(i as u8, label, salt, (out_len * 8) as u32);
            for (w, chunk) in message.chunks(4).enumerate() {
                let mut word = [0u8; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                self.mem
                    .write32(msg_addr + (w as u32) * 4, u32::from_le_bytes(word))?;
            }
            self.enqueue([
                msg_addr,
                message.len() as u32,
                out_addr,
                16,
                OP_AES_CMAC | KEY_PLATFORM,
                DESC_GO,
            ])?;
            for w in 0..4u32 {
                let word = self.mem.read32(out_addr + w * 4)?;
                out.extend_from_slice(&word.to_le_bytes());
            }
        }
        out.truncate(out_len);
        Ok(out)
    }
}

/// SP 800-108 counter-mode iteration message:
/// `counter || label || 0x00 || salt || bitlen`.
fn kdf_message(counter: u8, label: &[u8], salt: &[u8], bit_len: u32) -> Vec<u8> {
    let mut msg = Vec::with_capacity(1 + label.len() + 1 + salt.len() + 4);
    msg.push(counter);
    msg.extend_from_slice(label);
    msg.push(0x00);
    msg.extend_from_slice(salt);
    msg.extend_from_slice(&bit_len.to_be_bytes());
    msg
}

/// Software edition of the same derivation, for a known key (tests,
/// pre-computed Carbonara digests).
pub fn sp800_108_cmac(key: &[u8; 16], label: &[u8], salt: &[u8], out_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(out_len);
    let mut counter = 1u8;
    while out.len() < out_len {
        let mut mac = Cmac::<aes::Aes128>::new_from_slice(key).expect("16-byte key");
        mac.update(&kdf_message(counter, label, salt, (out_len * 8) as u32));
        out.extend_from_slice(&mac.finalize().into_bytes());
        counter += 1;
    }
    out.truncate(out_len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testmem::MockMem;

    const BASE: u32 = 0x1021_0000;
    const SCRATCH: u32 = 0x0010_2460;

    fn ready_mem() -> MockMem {
        let mut mem = MockMem::new();
        mem.preset(BASE + REG_QUEUE_CONTENT, 4);
        mem.preset(BASE + REG_HOST_IRR, IRR_AXIM_DONE);
        mem
    }

    #[test]
    fn otp_reads_are_word_indexed() {
        let mut mem = MockMem::new();
        mem.preset(BASE + OTP_WINDOW + OTP_LIFECYCLE * 4, 5);
        let mut dxcc = Dxcc::new(&mut mem, BASE, SCRATCH);
        assert_eq!(dxcc.lifecycle_state().unwrap(), 5);
    }

    #[test]
    fn pk_hash_spans_eight_words() {
        let mut mem = MockMem::new();
        for w in 0..8u32 {
            mem.preset(BASE + OTP_WINDOW + (OTP_PK_HASH + w) * 4, 0x0101_0101 * (w + 1));
        }
        let hash = Dxcc::new(&mut mem, BASE, SCRATCH).pk_hash().unwrap();
        assert_eq!(hash[0], 0x01);
        assert_eq!(hash[31], 0x08);
    }

    #[test]
    fn enqueue_writes_six_words_and_acks() {
        let mut mem = ready_mem();
        let desc = [1, 2, 3, 4, 5, DESC_GO];
        Dxcc::new(&mut mem, BASE, SCRATCH).enqueue(desc).unwrap();
        for (i, w) in desc.iter().enumerate() {
            assert_eq!(mem.get(BASE + REG_QUEUE_WORD0 + (i as u32) * 4), *w);
        }
        // Completion was acknowledged.
        assert_eq!(mem.written_to(BASE + REG_HOST_IRR), vec![IRR_AXIM_DONE]);
    }

    #[test]
    fn derive_key_runs_one_descriptor_per_block() {
        let mut mem = ready_mem();
        let mut dxcc = Dxcc::new(&mut mem, BASE, SCRATCH);
        let key = dxcc.derive_key(b"RPMBKEY", b"", 32).unwrap();
        assert_eq!(key.len(), 32);
        // Two CMAC descriptors went through the queue.
        assert_eq!(mem.written_to(BASE + REG_QUEUE_WORD0 + 20).len(), 2);
    }

    #[test]
    fn software_kdf_is_deterministic_and_counter_separated() {
        let key = [0x5Au8; 16];
        let a = sp800_108_cmac(&key, b"LABEL", b"salt", 32);
        let b = sp800_108_cmac(&key, b"LABEL", b"salt", 32);
        assert_eq!(a, b);
        // The two 16-byte halves come from different counters.
        assert_ne!(a[..16], a[16..]);
        assert_ne!(
            sp800_108_cmac(&key, b"LABEL", b"salt", 16),
            sp800_108_cmac(&key, b"OTHER", b"salt", 16)
        );
    }
}
