// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sahara TLV framing: `command:u32_le | length:u32_le | body[length-8]`.

use crate::error::FrameError;

pub const CMD_HELLO: u32 = 0x01;
pub const CMD_HELLO_RESP: u32 = 0x02;
pub const CMD_READ_DATA: u32 = 0x03;
pub const CMD_END_TRANSFER: u32 = 0x04;
pub const CMD_DONE: u32 = 0x05;
pub const CMD_DONE_RESP: u32 = 0x06;
pub const CMD_READ_DATA_64: u32 = 0x12;

/// Raw Sahara packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaharaPacket {
    pub command: u32,
    pub body: Vec<u8>,
}

impl SaharaPacket {
    pub fn new(command: u32, body: impl Into<Vec<u8>>) -> Self {
        SaharaPacket {
            command,
            body: body.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.body.len());
        out.extend_from_slice(&self.command.to_le_bytes());
        out.extend_from_slice(&((self.body.len() + 8) as u32).to_le_bytes());
        out.extend_from_slice(&self.body);
        out
    }

    /// Parse one packet from the front of `bytes`; returns the packet and
    /// how many bytes it consumed.
    pub fn parse(bytes: &[u8]) -> Result<(SaharaPacket, usize), FrameError> {
        if bytes.len() < 8 {
            return Err(FrameError::Truncated {
                need: 8,
                have: bytes.len(),
            });
        }
        let command = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let length = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
        if length < 8 {
            return Err(FrameError::Truncated {
                need: 8,
                have: length,
            });
        }
        if bytes.len() < length {
            return Err(FrameError::Truncated {
                need: length,
                have: bytes.len(),
            });
        }
        Ok((
            SaharaPacket {
                command,
                body: bytes[8..length].to_vec(),
            },
            length,
        ))
    }

    pub fn body_u32(&self, index: usize) -> Result<u32, FrameError> {
        let start = index * 4;
        let end = start + 4;
        if self.body.len() < end {
            return Err(FrameError::Truncated {
                need: end,
                have: self.body.len(),
            });
        }
        Ok(u32::from_le_bytes(self.body[start..end].try_into().unwrap()))
    }

    pub fn body_u64(&self, index: usize) -> Result<u64, FrameError> {
        let start = index * 8;
        let end = start + 8;
        if self.body.len() < end {
            return Err(FrameError::Truncated {
                need: end,
                have: self.body.len(),
            });
        }
        Ok(u64::from_le_bytes(self.body[start..end].try_into().unwrap()))
    }
}

/// `HELLO` body as sent by the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hello {
    pub version: u32,
    pub version_min: u32,
    pub max_cmd_len: u32,
    pub mode: u32,
}

impl Hello {
    pub fn parse(pkt: &SaharaPacket) -> Result<Hello, FrameError> {
        Ok(Hello {
            version: pkt.body_u32(0)?,
            version_min: pkt.body_u32(1)?,
            max_cmd_len: pkt.body_u32(2)?,
            mode: pkt.body_u32(3)?,
        })
    }
}

/// Build a `HELLO_RESP` packet answering `hello` with the chosen mode.
pub fn hello_resp(hello: &Hello, mode: u32) -> SaharaPacket {
    let mut body = Vec::with_capacity(0x28);
    body.extend_from_slice(&hello.version.to_le_bytes());
    body.extend_from_slice(&hello.version_min.to_le_bytes());
    body.extend_from_slice(&0u32.to_le_bytes()); // status: success
    body.extend_from_slice(&mode.to_le_bytes());
    body.extend_from_slice(&[0u8; 24]); // reserved
    SaharaPacket::new(CMD_HELLO_RESP, body)
}

/// A `READ_DATA` / `READ_DATA_64` request normalized to 64-bit fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadData {
    pub image_id: u64,
    pub offset: u64,
    pub length: u64,
}

impl ReadData {
    pub fn parse(pkt: &SaharaPacket) -> Result<ReadData, FrameError> {
        match pkt.command {
            CMD_READ_DATA => Ok(ReadData {
                image_id: pkt.body_u32(0)? as u64,
                offset: pkt.body_u32(1)? as u64,
                length: pkt.body_u32(2)? as u64,
            }),
            _ => Ok(ReadData {
                image_id: pkt.body_u64(0)?,
                offset: pkt.body_u64(1)?,
                length: pkt.body_u64(2)?,
            }),
        }
    }
}
