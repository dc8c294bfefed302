// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! SPRD Diag protocol: HDLC with a little-endian CRC trailer, one command
//! byte plus payload per frame. Runs against a booted modem, not the
//! BootROM.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{ProtocolError, Result};
use crate::framer::hdlc::{CrcEndian, HdlcCodec};
use crate::proto::{FRAME_TIMEOUT, OP_RETRIES};
use crate::transport::Transport;

const CMD_NV_READ: u8 = 0x26;
const CMD_NV_WRITE: u8 = 0x27;
const CMD_MODE_CHANGE: u8 = 0x29;
const CMD_AT: u8 = 0x3E;
const CMD_SPC: u8 = 0x41;
const CMD_CHALLENGE: u8 = 0x52;

/// `CMD_MODE_CHANGE` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DiagMode {
    Offline = 0,
    Reset = 1,
    PowerOff = 2,
}

/// Diag client.
pub struct Diag<'a> {
    transport: &'a mut dyn Transport,
}

impl<'a> Diag<'a> {
    pub fn new(transport: &'a mut dyn Transport) -> Self {
        Diag { transport }
    }

    fn codec(&self) -> HdlcCodec {
        HdlcCodec::new(CrcEndian::Little)
    }

    fn exchange(&mut self, cmd: u8, payload: &[u8]) -> Result<Vec<u8>> {
        let mut attempt = 0;
        loop {
            match self.try_exchange(cmd, payload) {
                Err(e) if e.is_retryable() && attempt < OP_RETRIES => {
                    attempt += 1;
                    log::debug!("diag exchange retry {attempt}: {e}");
                    self.transport.drain_input()?;
                }
                other => return other,
            }
        }
    }

    fn try_exchange(&mut self, cmd: u8, payload: &[u8]) -> Result<Vec<u8>> {
        let mut frame = Vec::with_capacity(1 + payload.len());
        frame.push(cmd);
        frame.extend_from_slice(payload);
        self.transport.write_all(&self.codec().encode(&frame))?;
        self.transport.flush()?;

        let mut decoder = self.codec().decoder();
        let mut byte = [0u8; 1];
        let reply = loop {
            self.transport.read_some(&mut byte, FRAME_TIMEOUT)?;
            if let Some(payload) = decoder.push(byte[0])? {
                break payload;
            }
        };
        if reply.first() != Some(&cmd) {
            return Err(ProtocolError::UnexpectedState("diag reply command mismatch").into());
        }
        Ok(reply[1..].to_vec())
    }

    /// Read an NV item by 16-bit id.
    pub fn nv_read(&mut self, nv_id: u16) -> Result<Vec<u8>> {
        let reply = self.exchange(CMD_NV_READ, &nv_id.to_le_bytes())?;
        match reply.split_first() {
            Some((0, data)) => Ok(data.to_vec()),
            Some((&status, _)) => Err(ProtocolError::Nak {
                code: status as u32,
                msg: format!("NV {nv_id:#06x} read failed"),
            }
            .into()),
            None => Err(ProtocolError::UnexpectedState("empty NV reply").into()),
        }
    }

    /// Write an NV item by 16-bit id.
    pub fn nv_write(&mut self, nv_id: u16, data: &[u8]) -> Result<()> {
        let mut payload = nv_id.to_le_bytes().to_vec();
        payload.extend_from_slice(data);
        let reply = self.exchange(CMD_NV_WRITE, &payload)?;
        match reply.first() {
            Some(0) => Ok(()),
            Some(&status) => Err(ProtocolError::Nak {
                code: status as u32,
                msg: format!("NV {nv_id:#06x} write failed"),
            }
            .into()),
            None => Err(ProtocolError::UnexpectedState("empty NV reply").into()),
        }
    }

    /// Pass an AT command through to the modem, returning its raw reply.
    pub fn at_passthrough(&mut self, command: &str) -> Result<String> {
        let reply = self.exchange(CMD_AT, command.as_bytes())?;
        Ok(String::from_utf8_lossy(&reply).into_owned())
    }

    pub fn mode_change(&mut self, mode: DiagMode) -> Result<()> {
        self.exchange(CMD_MODE_CHANGE, &[mode as u8])?;
        Ok(())
    }

    pub fn reset(&mut self) -> Result<()> {
        self.mode_change(DiagMode::Reset)
    }

    pub fn power_off(&mut self) -> Result<()> {
        self.mode_change(DiagMode::PowerOff)
    }

    /// Six-digit service-programming-code unlock.
    pub fn spc_unlock(&mut self, code: &[u8; 6]) -> Result<bool> {
        let reply = self.exchange(CMD_SPC, code)?;
        Ok(reply.first() == Some(&1))
    }

    /// Challenge the device to prove it holds the shared secret.
    pub fn challenge(&mut self, secret: &[u8], nonce: u64) -> Result<bool> {
        let reply = self.exchange(CMD_CHALLENGE, &nonce.to_be_bytes())?;
        Ok(verify_challenge(secret, nonce, &reply))
    }
}

/// HMAC-SHA256 over the big-endian nonce, keyed with the device secret.
pub fn verify_challenge(secret: &[u8], nonce: u64, response: &[u8]) -> bool {
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret) else {
        return false;
    };
    mac.update(&nonce.to_be_bytes());
    mac.verify_slice(response).is_ok()
}
