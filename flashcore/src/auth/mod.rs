// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Authentication strategies.
//!
//! All variants share one interface and run over the already-established
//! Firehose link. A strategy returning `Ok(false)` means it does not
//! apply (or ran out of its bounded attempts) and the next one in the
//! chain is tried; hard protocol failures abort the chain.

pub mod nothing;
pub mod oneplus;
pub mod standard;
pub mod vip;
pub mod xiaomi;

use crate::error::{AuthError, Result};
use crate::event::Events;
use crate::proto::firehose::Firehose;

pub use nothing::NothingAuth;
pub use oneplus::OnePlusAuth;
pub use standard::StandardAuth;
pub use vip::VipAuth;
pub use xiaomi::XiaomiAuth;

/// Caller-supplied authentication material. Everything is optional;
/// strategies that need something missing simply do not apply.
#[derive(Debug, Clone, Default)]
pub struct AuthArtifacts {
    /// VIP digest file (256 bytes).
    pub digest: Option<Vec<u8>>,
    /// VIP signature file paired with the digest.
    pub signature: Option<Vec<u8>>,
    /// Manually supplied signature (hex) for the Xiaomi challenge path.
    pub manual_signature: Option<String>,
    /// OnePlus project id, when known.
    pub project_id: Option<u32>,
    /// Device serial (hex) for the Nothing-phone token derivation.
    pub serial: Option<String>,
}

/// One authentication playbook.
pub trait AuthStrategy {
    fn name(&self) -> &'static str;

    /// `Ok(true)` once the device granted write privilege, `Ok(false)`
    /// when the strategy does not apply or all its attempts failed.
    fn authenticate(
        &mut self,
        fh: &mut Firehose<'_>,
        artifacts: &AuthArtifacts,
        events: &Events,
    ) -> Result<bool>;
}

/// Run a strategy chain; the first success wins.
pub fn authenticate_any(
    fh: &mut Firehose<'_>,
    strategies: &mut [Box<dyn AuthStrategy>],
    artifacts: &AuthArtifacts,
    events: &Events,
) -> Result<&'static str> {
    if strategies.is_empty() {
        return Err(AuthError::NoStrategyApplies.into());
    }
    for strategy in strategies.iter_mut() {
        events.debug(format!("trying auth strategy {}", strategy.name()));
        if strategy.authenticate(fh, artifacts, events)? {
            events.info(format!("authenticated via {}", strategy.name()));
            return Ok(strategy.name());
        }
    }
    Err(AuthError::AllAttemptsFailed.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::ScriptedTransport;

    struct Fails;
    impl AuthStrategy for Fails {
        fn name(&self) -> &'static str {
            "fails"
        }
        fn authenticate(
            &mut self,
            _: &mut Firehose<'_>,
            _: &AuthArtifacts,
            _: &Events,
        ) -> Result<bool> {
            Ok(false)
        }
    }

    #[test]
    fn chain_falls_through_to_success() {
        let mut t = ScriptedTransport::new(vec![]);
        let mut fh = Firehose::new(&mut t);
        let mut chain: Vec<Box<dyn AuthStrategy>> =
            vec![Box::new(Fails), Box::new(StandardAuth)];
        let winner = authenticate_any(
            &mut fh,
            &mut chain,
            &AuthArtifacts::default(),
            &Events::default(),
        )
        .unwrap();
        assert_eq!(winner, "standard");
    }

    #[test]
    fn exhausted_chain_is_all_attempts_failed() {
        let mut t = ScriptedTransport::new(vec![]);
        let mut fh = Firehose::new(&mut t);
        let mut chain: Vec<Box<dyn AuthStrategy>> = vec![Box::new(Fails), Box::new(Fails)];
        let err = authenticate_any(
            &mut fh,
            &mut chain,
            &AuthArtifacts::default(),
            &Events::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Auth(AuthError::AllAttemptsFailed)
        ));
    }
}
