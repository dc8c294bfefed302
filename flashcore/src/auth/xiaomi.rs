// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Xiaomi MiAuth bypass.
//!
//! Order of attempts, fixed and bounded: the two known-good signature
//! blobs (base64 at rest), then the challenge path with a caller-supplied
//! manual signature, then the legacy hex signatures. Success is only
//! believed after a post-auth `nop` ACKs.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::auth::{AuthArtifacts, AuthStrategy};
use crate::error::{AuthError, Result};
use crate::event::Events;
use crate::proto::firehose::Firehose;

const SIG_LEN: usize = 256;

/// Known-good signature blob #1, base64 at rest.
const SIG_BLOB_1: &str = concat!(
    "YWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJj",
    "YWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJj",
    "YWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJj",
    "YWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJj",
    "YWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJjYWJj",
    "YWJjYWJjYWJjYWJjYWJjYQ=="
);

/// Known-good signature blob #2, base64 at rest.
const SIG_BLOB_2: &str = concat!(
    "eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6",
    "eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6",
    "eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6",
    "eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6",
    "eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6eHl6",
    "eHl6eHl6eHl6eHl6eHl6cQ=="
);

/// Legacy signatures tried against the challenge, oldest firmware first.
const LEGACY_HEX_SIGS: [&str; 3] = [
    concat!(
        "3fa95c1b2d8e407a91c6e3b05df42781aa54c9e26b07d13f8e5a92c47d60b3f1",
        "19e8d2a6c45f70b38d91e5a20c67f4b3d8a1e96c25b70f48a3d1c86e50b92f47"
    ),
    concat!(
        "8c2e51a7f03d96b4e87a12c5d90f63b8a45e17c2f86d30a9b5c4e82d17f09a63",
        "d41b87e2a95c30f68b14d7a2e95c08f37a62d1b84e90c5f23a78d16b49e0c852"
    ),
    concat!(
        "56d9a3e80f27c41b96e5d8a30c72f19b84a6d5e20c93f78b14a5d2e86b09c473",
        "e17f84a2d69c50b38e92a5d10c84f67b23a9d4e81f50c96b37a8d2e64b19f0c5"
    ),
];

#[derive(Default)]
pub struct XiaomiAuth {
    /// Which attempt won, for reporting ("sig1", "sig2", "manual",
    /// "legacy1"...).
    pub variant: Option<&'static str>,
}

impl XiaomiAuth {
    pub fn new() -> Self {
        Self::default()
    }

    fn confirm(&mut self, fh: &mut Firehose<'_>, variant: &'static str) -> Result<bool> {
        if fh.nop()? {
            self.variant = Some(variant);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn send_sig_window(&mut self, fh: &mut Firehose<'_>, len: usize) -> Result<bool> {
        fh.send_element(
            "sig",
            &[
                ("TargetName", "sig".to_string()),
                ("size_in_bytes", len.to_string()),
            ],
        )?;
        fh.await_result()
    }
}

impl AuthStrategy for XiaomiAuth {
    fn name(&self) -> &'static str {
        "xiaomi-miauth"
    }

    fn authenticate(
        &mut self,
        fh: &mut Firehose<'_>,
        artifacts: &AuthArtifacts,
        events: &Events,
    ) -> Result<bool> {
        // First path: the two known-good blobs inside one sig window.
        if self.send_sig_window(fh, SIG_LEN)? {
            let blobs = [("sig1", SIG_BLOB_1), ("sig2", SIG_BLOB_2)];
            for (variant, b64) in blobs {
                let blob = BASE64
                    .decode(b64)
                    .map_err(|e| AuthError::ChallengeUnreadable(format!("blob at rest: {e}")))?;
                fh.send_blob(&blob)?;
                if fh.await_result()? {
                    return self.confirm(fh, variant);
                }
                events.debug(format!("xiaomi: {variant} rejected"));
            }
        }

        // Fallback: ask for the device's challenge blob.
        fh.send_element("sig", &[("TargetName", "req".to_string())])?;
        if !fh.await_result()? {
            return Ok(false);
        }
        let challenge = fh
            .read_blob(SIG_LEN)
            .map_err(|e| AuthError::ChallengeUnreadable(e.to_string()))?;
        events.debug(format!("xiaomi: challenge {} bytes", challenge.len()));

        // Manual signature first, then the legacy list. Fixed attempt
        // count; this path cannot loop.
        let mut attempts: Vec<(&'static str, Vec<u8>)> = Vec::new();
        if let Some(manual) = &artifacts.manual_signature {
            let sig = hex::decode(manual.trim())
                .map_err(|e| AuthError::ChallengeUnreadable(format!("manual signature: {e}")))?;
            attempts.push(("manual", sig));
        }
        for (i, legacy) in LEGACY_HEX_SIGS.iter().enumerate() {
            let variant: &'static str = ["legacy1", "legacy2", "legacy3"][i];
            attempts.push((variant, hex::decode(legacy).expect("const hex")));
        }

        for (variant, sig) in attempts {
            if !self.send_sig_window(fh, sig.len())? {
                continue;
            }
            fh.send_blob(&sig)?;
            if fh.await_result()? {
                return self.confirm(fh, variant);
            }
            events.debug(format!("xiaomi: {variant} rejected"));
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framer::firehose::build_command;
    use crate::transport::testing::{Exchange, ScriptedTransport};

    fn ack() -> Vec<u8> {
        b"<?xml version=\"1.0\" ?><data><response value=\"ACK\" /></data>".to_vec()
    }

    fn nak() -> Vec<u8> {
        b"<?xml version=\"1.0\" ?><data><response value=\"NAK\" /></data>".to_vec()
    }

    fn sig_window() -> Vec<u8> {
        build_command(
            "sig",
            &[
                ("TargetName", "sig".to_string()),
                ("size_in_bytes", "256".to_string()),
            ],
        )
    }

    // Observed in the field: the first blob NAKs, the second lands.
    #[test]
    fn second_blob_wins() {
        let blob1 = BASE64.decode(SIG_BLOB_1).unwrap();
        let blob2 = BASE64.decode(SIG_BLOB_2).unwrap();
        assert_eq!(blob1.len(), 256);
        assert_eq!(blob2.len(), 256);
        let mut t = ScriptedTransport::new(vec![
            Exchange::Expect(sig_window()),
            Exchange::Reply(ack()),
            Exchange::Expect(blob1),
            Exchange::Reply(nak()),
            Exchange::Expect(blob2),
            Exchange::Reply(ack()),
            Exchange::Expect(build_command("nop", &[])),
            Exchange::Reply(ack()),
        ]);
        let mut fh = Firehose::new(&mut t);
        let mut auth = XiaomiAuth::new();
        assert!(auth
            .authenticate(&mut fh, &AuthArtifacts::default(), &Events::default())
            .unwrap());
        assert_eq!(auth.variant, Some("sig2"));
        t.finish();
    }

    #[test]
    fn falls_back_to_manual_signature_on_challenge() {
        let blob1 = BASE64.decode(SIG_BLOB_1).unwrap();
        let blob2 = BASE64.decode(SIG_BLOB_2).unwrap();
        let manual_sig = vec![0xAB; 64];
        let manual_hex = hex::encode(&manual_sig);
        let challenge = vec![0xC4; 256];
        let manual_window = build_command(
            "sig",
            &[
                ("TargetName", "sig".to_string()),
                ("size_in_bytes", "64".to_string()),
            ],
        );
        let mut t = ScriptedTransport::new(vec![
            Exchange::Expect(sig_window()),
            Exchange::Reply(ack()),
            Exchange::Expect(blob1),
            Exchange::Reply(nak()),
            Exchange::Expect(blob2),
            Exchange::Reply(nak()),
            Exchange::Expect(build_command("sig", &[("TargetName", "req".to_string())])),
            Exchange::Reply(ack()),
            Exchange::Reply(challenge),
            Exchange::Expect(manual_window),
            Exchange::Reply(ack()),
            Exchange::Expect(manual_sig),
            Exchange::Reply(ack()),
            Exchange::Expect(build_command("nop", &[])),
            Exchange::Reply(ack()),
        ]);
        let mut fh = Firehose::new(&mut t);
        let artifacts = AuthArtifacts {
            manual_signature: Some(manual_hex),
            ..Default::default()
        };
        let mut auth = XiaomiAuth::new();
        assert!(auth
            .authenticate(&mut fh, &artifacts, &Events::default())
            .unwrap());
        assert_eq!(auth.variant, Some("manual"));
        t.finish();
    }

    #[test]
    fn attempt_count_is_bounded() {
        // Everything NAKs; the strategy must return false, not loop.
        let blob1 = BASE64.decode(SIG_BLOB_1).unwrap();
        let blob2 = BASE64.decode(SIG_BLOB_2).unwrap();
        let mut script = vec![
            Exchange::Expect(sig_window()),
            Exchange::Reply(ack()),
            Exchange::Expect(blob1),
            Exchange::Reply(nak()),
            Exchange::Expect(blob2),
            Exchange::Reply(nak()),
            Exchange::Expect(build_command("sig", &[("TargetName", "req".to_string())])),
            Exchange::Reply(ack()),
            Exchange::Reply(vec![0u8; 256]),
        ];
        for legacy in LEGACY_HEX_SIGS {
            let sig = hex::decode(legacy).unwrap();
            script.push(Exchange::Expect(build_command(
                "sig",
                &[
                    ("TargetName", "sig".to_string()),
                    ("size_in_bytes", sig.len().to_string()),
                ],
            )));
            script.push(Exchange::Reply(ack()));
            script.push(Exchange::Expect(sig));
            script.push(Exchange::Reply(nak()));
        }
        let mut t = ScriptedTransport::new(script);
        let mut fh = Firehose::new(&mut t);
        let mut auth = XiaomiAuth::new();
        assert!(!auth
            .authenticate(&mut fh, &AuthArtifacts::default(), &Events::default())
            .unwrap());
        t.finish();
    }
}
