// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Exploit bridges: compose a protocol client's limited write
//! primitive with a hardware engine's stronger one to reach an
//! unauthenticated code-execution path.
//!
//! Every bridge has the same two-call contract: `prepare` escalates,
//! `run_payload` delivers stage 1 through the opened hole. The session
//! refuses partition operations until an in-flight bridge completes, and
//! forbids nesting bridges on one session (the chip scratch region is
//! exclusive).

pub mod amonet;
pub mod carbonara;
pub mod hashimoto;
pub mod kamakiri;
pub mod rsa_replay;

use crate::chipdb::ChipConfig;
use crate::error::{ExploitError, Result};
use crate::event::Events;
use crate::transport::Transport;

pub use amonet::Amonet;
pub use carbonara::Carbonara;
pub use hashimoto::Hashimoto;
pub use kamakiri::Kamakiri;
pub use rsa_replay::RsaReplay;

/// Outcome of a delivered payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadResult {
    pub bytes: usize,
    /// Whether execution was handed to the payload.
    pub jumped: bool,
}

/// What a bridge gets to work with.
pub struct ExploitCtx<'a> {
    pub transport: &'a mut dyn Transport,
    /// Identified MTK chip, when the session has one. The BROM-side
    /// bridges require it; the SPRD replay identifies the target over
    /// the wire instead.
    pub chip: Option<&'static ChipConfig>,
    pub events: &'a Events,
}

impl ExploitCtx<'_> {
    /// The identified chip, for bridges that cannot run without one.
    pub fn chip(&self) -> Result<&'static ChipConfig> {
        self.chip
            .ok_or_else(|| ExploitError::UnsupportedChip("no chip identified".into()).into())
    }
}

/// The two-call bridge contract.
pub trait ExploitBridge {
    fn name(&self) -> &'static str;

    /// Escalate to a write-privileged context. Must be called once,
    /// before `run_payload`.
    fn prepare(&mut self, ctx: &mut ExploitCtx<'_>) -> Result<()>;

    /// Deliver and start an unsigned stage-1 payload.
    fn run_payload(&mut self, ctx: &mut ExploitCtx<'_>, payload: &[u8]) -> Result<PayloadResult>;
}
