// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! OnePlus authentication: the Demacia/SetProjModel handshake (V1/V2)
//! and the timestamp-keyed SetSwProjModel variant (V3). The engine only
//! replays the documented key schedule; project ids are taken from the
//! caller, read from the device, or walked through the known
//! alternatives.

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockEncryptMut, KeyIvInit};
use aes::Aes256;

use crate::auth::{AuthArtifacts, AuthStrategy};
use crate::error::{AuthError, Result};
use crate::event::Events;
use crate::proto::firehose::Firehose;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;

/// V3 key head.
const V3_KEY_PREFIX: [u8; 8] = [0x46, 0xA5, 0x97, 0x30, 0xBB, 0x0D, 0x41, 0xE8];
/// V1/V2 key head and tail around the random PK.
const V1_KEY_PREFIX: [u8; 8] = [0x21, 0x68, 0xD4, 0x0F, 0x9A, 0x33, 0x7C, 0x51];
const V1_KEY_SUFFIX: [u8; 8] = [0x8E, 0x12, 0xC0, 0x75, 0x4B, 0xAE, 0x69, 0xD3];

/// Project ids walked when the device will not name its own.
const PROJECT_ALTERNATIVES: [u32; 5] = [20886, 20885, 20888, 20880, 20881];

const V1_BLOB_LEN: usize = 256;
const V3_BLOB_LEN: usize = 512;

/// Which handshake generation to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnePlusFlow {
    /// `demacia` + `setprojmodel`.
    V1,
    /// `setswprojmodel` keyed with the device timestamp.
    V3,
}

pub struct OnePlusAuth {
    flow: OnePlusFlow,
    /// 16 ASCII bytes mixed into both key schedules.
    random_pk: [u8; 16],
}

impl OnePlusAuth {
    pub fn new(flow: OnePlusFlow) -> Self {
        OnePlusAuth {
            flow,
            random_pk: *b"abcdefghijklmnop",
        }
    }

    pub fn with_random_pk(mut self, pk: [u8; 16]) -> Self {
        self.random_pk = pk;
        self
    }

    /// V3 key: prefix || random_pk || BE64(timestamp)[0..8].
    fn v3_key(&self, device_timestamp: u64) -> [u8; 32] {
        let mut key = [0u8; 32];
        key[..8].copy_from_slice(&V3_KEY_PREFIX);
        key[8..24].copy_from_slice(&self.random_pk);
        key[24..].copy_from_slice(&device_timestamp.to_be_bytes());
        key
    }

    /// V1/V2 key: prefix || random_pk || suffix.
    fn v1_key(&self) -> [u8; 32] {
        let mut key = [0u8; 32];
        key[..8].copy_from_slice(&V1_KEY_PREFIX);
        key[8..24].copy_from_slice(&self.random_pk);
        key[24..].copy_from_slice(&V1_KEY_SUFFIX);
        key
    }

    fn encrypt_blob(&self, key: &[u8; 32], blob: &[u8]) -> Result<Vec<u8>> {
        let enc = Aes256CbcEnc::new_from_slices(key, &[0u8; 16])
            .map_err(|e| AuthError::ChallengeUnreadable(format!("key schedule: {e}")))?;
        Ok(enc.encrypt_padded_vec_mut::<NoPadding>(blob))
    }

    fn project_ids(&self, artifacts: &AuthArtifacts) -> Vec<u32> {
        match artifacts.project_id {
            Some(id) => {
                let mut ids = vec![id];
                ids.extend(PROJECT_ALTERNATIVES.iter().filter(|&&p| p != id));
                ids
            }
            None => PROJECT_ALTERNATIVES.to_vec(),
        }
    }

    fn read_project_id(&self, fh: &mut Firehose<'_>) -> Result<Option<u32>> {
        fh.send_element("getprjversion", &[])?;
        let el = fh.await_response()?;
        Ok(el.attr("prjversion").and_then(|v| v.parse().ok()))
    }

    fn run_v3(
        &mut self,
        fh: &mut Firehose<'_>,
        artifacts: &AuthArtifacts,
        events: &Events,
    ) -> Result<bool> {
        fh.send_element("getdevicetimestamp", &[])?;
        let el = fh.await_response()?;
        let Some(timestamp) = el.attr("device_timestamp").and_then(|v| v.parse::<u64>().ok())
        else {
            return Err(AuthError::ChallengeUnreadable("no device timestamp".into()).into());
        };
        let key = self.v3_key(timestamp);

        // Preferred id: the caller's, else whatever the device will
        // name; the known alternatives follow either way.
        let mut ids: Vec<u32> = Vec::new();
        match artifacts.project_id {
            Some(id) => ids.push(id),
            None => {
                if let Some(id) = self.read_project_id(fh)? {
                    ids.push(id);
                }
            }
        }
        let known: Vec<u32> = PROJECT_ALTERNATIVES
            .iter()
            .copied()
            .filter(|p| !ids.contains(p))
            .collect();
        ids.extend(known);

        let pk = String::from_utf8_lossy(&self.random_pk).into_owned();
        for project_id in ids {
            let mut blob = format!("{project_id},{pk},{timestamp}").into_bytes();
            blob.resize(V3_BLOB_LEN, 0);
            let token = hex::encode(self.encrypt_blob(&key, &blob)?);
            fh.send_element(
                "setswprojmodel",
                &[
                    ("project", project_id.to_string()),
                    ("pk", pk.clone()),
                    ("token", token),
                ],
            )?;
            let reply = fh.await_response()?;
            if reply.attr("model_check") == Some("0")
                && reply.attr("auth_token_verify") == Some("0")
            {
                events.info(format!("oneplus: project {project_id} accepted"));
                return Ok(true);
            }
            events.debug(format!("oneplus: project {project_id} rejected"));
        }
        Ok(false)
    }

    fn run_v1(
        &mut self,
        fh: &mut Firehose<'_>,
        artifacts: &AuthArtifacts,
        events: &Events,
    ) -> Result<bool> {
        let key = self.v1_key();
        let pk = String::from_utf8_lossy(&self.random_pk).into_owned();

        let mut blob = pk.clone().into_bytes();
        blob.resize(V1_BLOB_LEN, 0);
        let token = hex::encode(self.encrypt_blob(&key, &blob)?);
        fh.send_element("demacia", &[("token", token)])?;
        if !fh.await_result()? {
            return Ok(false);
        }

        for project_id in self.project_ids(artifacts) {
            let mut blob = format!("{project_id},{pk}").into_bytes();
            blob.resize(V1_BLOB_LEN, 0);
            let token = hex::encode(self.encrypt_blob(&key, &blob)?);
            fh.send_element(
                "setprojmodel",
                &[
                    ("project", project_id.to_string()),
                    ("pk", pk.clone()),
                    ("token", token),
                ],
            )?;
            let reply = fh.await_response()?;
            if reply.attr("model_check") == Some("0")
                && reply.attr("auth_token_verify") == Some("0")
            {
                events.info(format!("oneplus: project {project_id} accepted"));
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl AuthStrategy for OnePlusAuth {
    fn name(&self) -> &'static str {
        match self.flow {
            OnePlusFlow::V1 => "oneplus-demacia",
            OnePlusFlow::V3 => "oneplus-swprojmodel",
        }
    }

    fn authenticate(
        &mut self,
        fh: &mut Firehose<'_>,
        artifacts: &AuthArtifacts,
        events: &Events,
    ) -> Result<bool> {
        match self.flow {
            OnePlusFlow::V1 => self.run_v1(fh, artifacts, events),
            OnePlusFlow::V3 => self.run_v3(fh, artifacts, events),
        }
    }
}
