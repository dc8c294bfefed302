// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Register-level drivers for the MTK crypto/DMA engines.
//!
//! Each driver runs over a [`MemAccess`] seam: the limited word-sized
//! read/write primitive the Preloader protocol already provides. The
//! drivers compose it into stronger primitives (arbitrary memory access,
//! hardware-key AES) that the exploit bridges build on.

pub mod cqdma;
pub mod dxcc;
pub mod gcpu;
pub mod sej;

use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::proto::preloader::Preloader;

/// Word-sized access to device physical memory.
pub trait MemAccess {
    fn read32(&mut self, addr: u32) -> Result<u32>;
    fn write32(&mut self, addr: u32, value: u32) -> Result<()>;
}

impl MemAccess for Preloader<'_> {
    fn read32(&mut self, addr: u32) -> Result<u32> {
        Preloader::read32(self, addr)
    }

    fn write32(&mut self, addr: u32, value: u32) -> Result<()> {
        Preloader::write32(self, addr, value)
    }
}

/// Poll `addr` until `(value & mask) != 0`, with a deadline.
pub(crate) fn poll_set(
    mem: &mut dyn MemAccess,
    addr: u32,
    mask: u32,
    timeout: Duration,
    stage: &'static str,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if mem.read32(addr)? & mask != 0 {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(Error::Deadline { stage });
        }
    }
}
