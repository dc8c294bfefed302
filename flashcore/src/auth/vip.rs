// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! VIP authentication (OPPO/Realme and the OnePlus subset that shares
//! it): replay a caller-supplied digest and its RSA signature. The
//! device verifies against an embedded public key; the engine never
//! generates signatures itself.

use crate::auth::{AuthArtifacts, AuthStrategy};
use crate::error::{AuthError, Result};
use crate::event::Events;
use crate::proto::firehose::Firehose;

/// The digest stage is always 256 bytes on the wire.
const DIGEST_LEN: usize = 256;

pub struct VipAuth;

impl AuthStrategy for VipAuth {
    fn name(&self) -> &'static str {
        "vip"
    }

    fn authenticate(
        &mut self,
        fh: &mut Firehose<'_>,
        artifacts: &AuthArtifacts,
        events: &Events,
    ) -> Result<bool> {
        let (Some(digest), Some(signature)) = (&artifacts.digest, &artifacts.signature) else {
            return Ok(false);
        };
        if digest.len() != DIGEST_LEN {
            return Err(AuthError::ChallengeUnreadable(format!(
                "digest file must be {DIGEST_LEN} bytes, got {}",
                digest.len()
            ))
            .into());
        }

        fh.send_element(
            "digest",
            &[("size_in_bytes", digest.len().to_string())],
        )?;
        if !fh.await_result()? {
            return Ok(false);
        }
        fh.send_blob(digest)?;
        if !fh.await_result()? {
            events.warn("vip: digest rejected");
            return Ok(false);
        }

        fh.send_element(
            "signature",
            &[("size_in_bytes", signature.len().to_string())],
        )?;
        if !fh.await_result()? {
            return Ok(false);
        }
        fh.send_blob(signature)?;
        if !fh.await_result()? {
            events.warn("vip: signature rejected");
            return Ok(false);
        }
        Ok(true)
    }
}
