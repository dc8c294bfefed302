// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! SPRD BootROM/FDL framing: an HDLC frame whose payload is
//! `type:u16_be | length:u16_be | data[length]`.

use crate::error::FrameError;
use crate::framer::hdlc::{CrcEndian, HdlcCodec};

// Host -> device commands.
pub const BSL_CMD_CONNECT: u16 = 0x0000;
pub const BSL_CMD_START_DATA: u16 = 0x0001;
pub const BSL_CMD_MIDST_DATA: u16 = 0x0002;
pub const BSL_CMD_END_DATA: u16 = 0x0003;
pub const BSL_CMD_EXEC_DATA: u16 = 0x0004;
pub const BSL_CMD_RESET: u16 = 0x0005;
pub const BSL_CMD_CHANGE_BAUD: u16 = 0x0009;
pub const BSL_CMD_ERASE_FLASH: u16 = 0x000A;
pub const BSL_CMD_REPARTITION: u16 = 0x000B;
pub const BSL_CMD_READ_START: u16 = 0x0010;
pub const BSL_CMD_READ_MIDST: u16 = 0x0011;
pub const BSL_CMD_READ_END: u16 = 0x0012;

// Device -> host replies.
pub const BSL_REP_ACK: u16 = 0x0080;
pub const BSL_REP_VER: u16 = 0x0081;
pub const BSL_REP_READ_FLASH: u16 = 0x0093;

/// Error replies occupy 0x82..=0x9F (0x93 carries read data instead).
pub fn rep_is_error(rep: u16) -> bool {
    (0x0082..=0x009F).contains(&rep) && rep != BSL_REP_READ_FLASH
}

/// One SPRD frame: a BSL type plus its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SprdFrame {
    pub ftype: u16,
    pub data: Vec<u8>,
}

impl SprdFrame {
    pub fn new(ftype: u16, data: impl Into<Vec<u8>>) -> Self {
        SprdFrame {
            ftype,
            data: data.into(),
        }
    }

    /// Encode to wire bytes (HDLC, big-endian CRC trailer).
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(4 + self.data.len());
        payload.extend_from_slice(&self.ftype.to_be_bytes());
        payload.extend_from_slice(&(self.data.len() as u16).to_be_bytes());
        payload.extend_from_slice(&self.data);
        codec().encode(&payload)
    }

    /// Parse an unescaped, CRC-validated HDLC payload.
    pub fn parse(payload: &[u8]) -> Result<SprdFrame, FrameError> {
        if payload.len() < 4 {
            return Err(FrameError::Truncated {
                need: 4,
                have: payload.len(),
            });
        }
        let ftype = u16::from_be_bytes([payload[0], payload[1]]);
        let length = u16::from_be_bytes([payload[2], payload[3]]) as usize;
        if payload.len() < 4 + length {
            return Err(FrameError::Truncated {
                need: 4 + length,
                have: payload.len(),
            });
        }
        Ok(SprdFrame {
            ftype,
            data: payload[4..4 + length].to_vec(),
        })
    }
}

/// The HDLC flavor used by the BootROM and both FDL stages.
pub fn codec() -> HdlcCodec {
    HdlcCodec::new(CrcEndian::Big)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrip() {
        let frame = SprdFrame::new(BSL_CMD_START_DATA, vec![0xDE, 0xAD, 0x7E, 0x7D]);
        let wire = frame.encode();
        let payloads = codec().decode(&wire).unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(SprdFrame::parse(&payloads[0]).unwrap(), frame);
    }

    #[test]
    fn header_is_big_endian() {
        let frame = SprdFrame::new(0x0102, vec![0xAA; 3]);
        let payloads = codec().decode(&frame.encode()).unwrap();
        assert_eq!(&payloads[0][..4], &[0x01, 0x02, 0x00, 0x03]);
    }

    #[test]
    fn error_reply_range() {
        assert!(!rep_is_error(BSL_REP_ACK));
        assert!(!rep_is_error(BSL_REP_VER));
        assert!(!rep_is_error(BSL_REP_READ_FLASH));
        assert!(rep_is_error(0x0082));
        assert!(rep_is_error(0x009F));
        assert!(!rep_is_error(0x00A0));
    }

    #[test]
    fn short_payload_is_truncated() {
        assert!(matches!(
            SprdFrame::parse(&[0x00, 0x80]),
            Err(FrameError::Truncated { .. })
        ));
        // Declared length exceeding the buffer is also truncation.
        assert!(matches!(
            SprdFrame::parse(&[0x00, 0x80, 0x00, 0x04, 0x01]),
            Err(FrameError::Truncated { need: 8, have: 5 })
        ));
    }
}
