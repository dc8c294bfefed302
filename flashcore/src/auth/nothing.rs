// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Nothing-phone authentication: a feature probe followed by a project
//! verification whose second token is a SHA-256 over token1, project id,
//! serial and a fixed per-project verification constant.

use sha2::{Digest, Sha256};

use crate::auth::{AuthArtifacts, AuthStrategy};
use crate::error::Result;
use crate::event::Events;
use crate::proto::firehose::Firehose;

/// Fixed verification constant shared by all known project ids.
const HASH_VERIFY: &str = "d5f1682ac92d3c8e07b46a95e12d08f3a67c41b9d82e50f7a34c96d1b08e5f42";

/// Device codes known to use [`HASH_VERIFY`].
const PROJECT_IDS: [u32; 3] = [20111, 22111, 23111];

#[derive(Default)]
pub struct NothingAuth;

impl NothingAuth {
    pub fn new() -> Self {
        Self::default()
    }
}

/// token2 = SHA256(token1 || projId || serial_hex || hashverify), hex.
pub fn project_token(token1: &str, project_id: u32, serial_hex: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token1.as_bytes());
    hasher.update(project_id.to_string().as_bytes());
    hasher.update(serial_hex.as_bytes());
    hasher.update(HASH_VERIFY.as_bytes());
    hex::encode(hasher.finalize())
}

impl AuthStrategy for NothingAuth {
    fn name(&self) -> &'static str {
        "nothing"
    }

    fn authenticate(
        &mut self,
        fh: &mut Firehose<'_>,
        artifacts: &AuthArtifacts,
        events: &Events,
    ) -> Result<bool> {
        let Some(serial) = &artifacts.serial else {
            return Ok(false);
        };

        fh.send_element("checkntfeature", &[])?;
        if !fh.await_result()? {
            // Not a Nothing programmer.
            return Ok(false);
        }

        // token1 only needs to be fresh per session; derive it from the
        // serial so the exchange is reproducible.
        let token1 = hex::encode(&Sha256::digest(serial.as_bytes())[..16]);

        for project_id in PROJECT_IDS {
            let token2 = project_token(&token1, project_id, serial);
            fh.send_element(
                "ntprojectverify",
                &[
                    ("token1", token1.clone()),
                    ("token2", token2),
                    ("token3", project_id.to_string()),
                ],
            )?;
            if fh.await_result()? {
                events.info(format!("nothing: project {project_id} verified"));
                return Ok(true);
            }
            events.debug(format!("nothing: project {project_id} rejected"));
        }
        Ok(false)
    }
}
