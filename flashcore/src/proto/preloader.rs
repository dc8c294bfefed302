// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! MTK BROM / Preloader protocol (stage 1).
//!
//! Entered immediately after the serial port opens. All parameters are
//! big-endian and echo-verified; a status word follows most exchanges,
//! where zero means success.

use std::time::{Duration, Instant};

use bitflags::bitflags;

use crate::checksum::word_sum16;
use crate::error::{Error, FrameError, ProtocolError, Result, TransportError};
use crate::framer::echo::{EchoError, EchoLink};
use crate::proto::{FRAME_TIMEOUT, HANDSHAKE_DEADLINE};
use crate::transport::Transport;

const CMD_GET_HW_SW_VER: u8 = 0xFC;
const CMD_GET_HW_CODE: u8 = 0xFD;
const CMD_GET_TARGET_CONFIG: u8 = 0xD8;
const CMD_READ32: u8 = 0xD1;
const CMD_WRITE32: u8 = 0xD4;
const CMD_JUMP_DA: u8 = 0xD5;
const CMD_SEND_DA: u8 = 0xD7;
const CMD_GET_MEID: u8 = 0xE1;
const CMD_GET_SOC_ID: u8 = 0xE7;

/// Handshake: host writes these, device answers the bitwise complement.
const HANDSHAKE_TX: [u8; 4] = [0xA0, 0x0A, 0x50, 0x05];

/// Per-byte handshake window.
const HANDSHAKE_BYTE_TIMEOUT: Duration = Duration::from_millis(200);

/// Chunk size for the DA payload phase.
const SEND_DA_CHUNK: usize = 0x1000;

bitflags! {
    /// Security configuration reported by `get_target_config`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TargetConfig: u32 {
        /// Secure Boot Control fuse blown.
        const SBC = 1 << 0;
        /// Serial Link Authorization required.
        const SLA = 1 << 1;
        /// Download Agent Authorization required.
        const DAA = 1 << 2;
    }
}

impl TargetConfig {
    pub fn secure_boot(&self) -> bool {
        self.contains(TargetConfig::SBC)
    }
}

/// Identity reported by the BROM/Preloader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MtkDeviceInfo {
    pub hw_code: u16,
    pub hw_sub: u16,
    pub hw_ver: u16,
    pub sw_ver: u16,
    pub target_config: TargetConfig,
    pub meid: Vec<u8>,
    pub soc_id: Vec<u8>,
}

/// BROM/Preloader client.
pub struct Preloader<'a> {
    transport: &'a mut dyn Transport,
}

impl<'a> Preloader<'a> {
    pub fn new(transport: &'a mut dyn Transport) -> Self {
        Preloader { transport }
    }

    fn link(&mut self) -> EchoLink<'_> {
        EchoLink::new(self.transport, FRAME_TIMEOUT)
    }

    /// Run the start-byte handshake.
    ///
    /// The first byte is retried until the BROM wakes up or the handshake
    /// deadline passes; the remaining three are strict.
    pub fn handshake(&mut self) -> Result<()> {
        let deadline = Instant::now() + HANDSHAKE_DEADLINE;
        loop {
            self.transport.drain_input()?;
            self.transport.write_all(&HANDSHAKE_TX[..1])?;
            self.transport.flush()?;
            match self.transport.read_byte(HANDSHAKE_BYTE_TIMEOUT) {
                Ok(b) if b == !HANDSHAKE_TX[0] => break,
                Ok(_) | Err(TransportError::Timeout) => {
                    if Instant::now() >= deadline {
                        return Err(Error::Deadline { stage: "handshake" });
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        for (i, &tx) in HANDSHAKE_TX.iter().enumerate().skip(1) {
            self.transport.write_all(&[tx])?;
            self.transport.flush()?;
            let rx = self.transport.read_byte(HANDSHAKE_BYTE_TIMEOUT)?;
            if rx != !tx {
                return Err(FrameError::EchoMismatch {
                    offset: i,
                    wrote: !tx,
                    read: rx,
                }
                .into());
            }
        }
        log::debug!("BROM handshake complete");
        Ok(())
    }

    pub fn get_hw_code(&mut self) -> Result<u16> {
        let mut link = self.link();
        link.echo_u8(CMD_GET_HW_CODE).map_err(Error::from)?;
        let hw_code = link.read_u16().map_err(Error::from)?;
        expect_status(link.read_u16().map_err(Error::from)?)?;
        Ok(hw_code)
    }

    /// Sub-code, hardware version, software version.
    pub fn get_hw_sw_ver(&mut self) -> Result<(u16, u16, u16)> {
        let mut link = self.link();
        link.echo_u8(CMD_GET_HW_SW_VER).map_err(Error::from)?;
        let hw_sub = link.read_u16().map_err(Error::from)?;
        let hw_ver = link.read_u16().map_err(Error::from)?;
        let sw_ver = link.read_u16().map_err(Error::from)?;
        expect_status(link.read_u16().map_err(Error::from)?)?;
        Ok((hw_sub, hw_ver, sw_ver))
    }

    pub fn get_target_config(&mut self) -> Result<TargetConfig> {
        let mut link = self.link();
        link.echo_u8(CMD_GET_TARGET_CONFIG).map_err(Error::from)?;
        let raw = link.read_u32().map_err(Error::from)?;
        expect_status(link.read_u16().map_err(Error::from)?)?;
        Ok(TargetConfig::from_bits_truncate(raw))
    }

    /// ME id, when the chip exposes one.
    pub fn get_meid(&mut self) -> Result<Option<Vec<u8>>> {
        self.read_id(CMD_GET_MEID)
    }

    /// SoC id (serial-number hash), when the chip exposes one.
    pub fn get_soc_id(&mut self) -> Result<Option<Vec<u8>>> {
        self.read_id(CMD_GET_SOC_ID)
    }

    fn read_id(&mut self, cmd: u8) -> Result<Option<Vec<u8>>> {
        let mut link = self.link();
        match link.echo_u8(cmd) {
            Ok(()) => {}
            // Old BROMs do not know the command and stay silent.
            Err(EchoError::Transport(TransportError::Timeout)) => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = link.read_u32().map_err(Error::from)? as usize;
        let id = link.read_bytes(len).map_err(Error::from)?;
        match link.read_u16().map_err(Error::from)? {
            0 => Ok(Some(id)),
            _ => Ok(None),
        }
    }

    pub fn read32(&mut self, addr: u32) -> Result<u32> {
        Ok(self.read32_multi(addr, 1)?[0])
    }

    pub fn read32_multi(&mut self, addr: u32, dwords: u32) -> Result<Vec<u32>> {
        let mut link = self.link();
        link.echo_u8(CMD_READ32).map_err(Error::from)?;
        link.echo_u32(addr).map_err(Error::from)?;
        link.echo_u32(dwords).map_err(Error::from)?;
        expect_status(link.read_u16().map_err(Error::from)?)?;
        let mut values = Vec::with_capacity(dwords as usize);
        for _ in 0..dwords {
            values.push(link.read_u32().map_err(Error::from)?);
        }
        expect_status(link.read_u16().map_err(Error::from)?)?;
        Ok(values)
    }

    pub fn write32(&mut self, addr: u32, value: u32) -> Result<()> {
        self.write32_multi(addr, &[value])
    }

    pub fn write32_multi(&mut self, addr: u32, values: &[u32]) -> Result<()> {
        let mut link = self.link();
        link.echo_u8(CMD_WRITE32).map_err(Error::from)?;
        link.echo_u32(addr).map_err(Error::from)?;
        link.echo_u32(values.len() as u32).map_err(Error::from)?;
        expect_status(link.read_u16().map_err(Error::from)?)?;
        for &v in values {
            link.echo_u32(v).map_err(Error::from)?;
        }
        expect_status(link.read_u16().map_err(Error::from)?)?;
        Ok(())
    }

    /// Upload a Download Agent image to `addr`.
    ///
    /// The BROM acknowledges the range first, then the payload streams
    /// without echo and is confirmed by a ones-complement word checksum.
    pub fn send_da(&mut self, addr: u32, sig_len: u32, data: &[u8]) -> Result<()> {
        let expected = word_sum16(data);
        let mut link = self.link();
        link.echo_u8(CMD_SEND_DA).map_err(Error::from)?;
        link.echo_u32(addr).map_err(Error::from)?;
        link.echo_u32(data.len() as u32).map_err(Error::from)?;
        link.echo_u32(sig_len).map_err(Error::from)?;
        expect_status(link.read_u16().map_err(Error::from)?)?;
        for chunk in data.chunks(SEND_DA_CHUNK) {
            link.write_raw(chunk).map_err(Error::from)?;
        }
        let received = link.read_u16().map_err(Error::from)?;
        if received != expected {
            return Err(FrameError::BadCrc {
                computed: expected,
                received,
            }
            .into());
        }
        match link.read_u16().map_err(Error::from)? {
            0 => Ok(()),
            code => {
                log::warn!("send_da rejected with status {code:#06x}");
                Err(ProtocolError::SignatureRejected.into())
            }
        }
    }

    /// Jump to a previously uploaded DA.
    pub fn jump_da(&mut self, addr: u32) -> Result<()> {
        let mut link = self.link();
        link.echo_u8(CMD_JUMP_DA).map_err(Error::from)?;
        link.echo_u32(addr).map_err(Error::from)?;
        expect_status(link.read_u16().map_err(Error::from)?)?;
        Ok(())
    }

    /// Read the whole identity block in one go.
    pub fn read_device_info(&mut self) -> Result<MtkDeviceInfo> {
        let hw_code = self.get_hw_code()?;
        let (hw_sub, hw_ver, sw_ver) = self.get_hw_sw_ver()?;
        let target_config = self.get_target_config()?;
        let meid = self.get_meid()?.unwrap_or_default();
        let soc_id = self.get_soc_id()?.unwrap_or_default();
        Ok(MtkDeviceInfo {
            hw_code,
            hw_sub,
            hw_ver,
            sw_ver,
            target_config,
            meid,
            soc_id,
        })
    }
}

fn expect_status(status: u16) -> Result<()> {
    if status == 0 {
        Ok(())
    } else {
        Err(ProtocolError::ProtocolAbort(status as u32).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{Exchange, ScriptedTransport};

    #[test]
    fn handshake_reads_complements() {
        let mut t = ScriptedTransport::new(vec![
            Exchange::Expect(vec![0xA0]),
            Exchange::Reply(vec![0x5F]),
            Exchange::Expect(vec![0x0A]),
            Exchange::Reply(vec![0xF5]),
            Exchange::Expect(vec![0x50]),
            Exchange::Reply(vec![0xAF]),
            Exchange::Expect(vec![0x05]),
            Exchange::Reply(vec![0xFA]),
        ]);
        Preloader::new(&mut t).handshake().unwrap();
        t.finish();
    }

    #[test]
    fn handshake_mismatch_is_echo_error() {
        let mut t = ScriptedTransport::new(vec![
            Exchange::Expect(vec![0xA0]),
            Exchange::Reply(vec![0x5F]),
            Exchange::Expect(vec![0x0A]),
            Exchange::Reply(vec![0x00]),
        ]);
        match Preloader::new(&mut t).handshake() {
            Err(Error::Frame(FrameError::EchoMismatch { offset: 1, .. })) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn hw_code_exchange() {
        let mut t = ScriptedTransport::new(vec![
            Exchange::Expect(vec![0xFD]),
            Exchange::Reply(vec![0xFD]),
            Exchange::Reply(vec![0x07, 0x17, 0x00, 0x00]),
        ]);
        assert_eq!(Preloader::new(&mut t).get_hw_code().unwrap(), 0x0717);
        t.finish();
    }

    #[test]
    fn send_da_verifies_checksum() {
        let data = vec![0x11, 0x22, 0x33, 0x44];
        let sum = word_sum16(&data);
        let mut script = vec![
            Exchange::Expect(vec![0xD7]),
            Exchange::Reply(vec![0xD7]),
            Exchange::Expect(0x0020_0000u32.to_be_bytes().to_vec()),
            Exchange::Reply(0x0020_0000u32.to_be_bytes().to_vec()),
            Exchange::Expect(4u32.to_be_bytes().to_vec()),
            Exchange::Reply(4u32.to_be_bytes().to_vec()),
            Exchange::Expect(0u32.to_be_bytes().to_vec()),
            Exchange::Reply(0u32.to_be_bytes().to_vec()),
            Exchange::Reply(vec![0x00, 0x00]),
        ];
        script.push(Exchange::Expect(data.clone()));
        script.push(Exchange::Reply(sum.to_be_bytes().to_vec()));
        script.push(Exchange::Reply(vec![0x00, 0x00]));
        let mut t = ScriptedTransport::new(script);
        Preloader::new(&mut t)
            .send_da(0x0020_0000, 0, &data)
            .unwrap();
        t.finish();
    }

    #[test]
    fn nonzero_status_aborts() {
        let mut t = ScriptedTransport::new(vec![
            Exchange::Expect(vec![0xD5]),
            Exchange::Reply(vec![0xD5]),
            Exchange::Expect(0x1000u32.to_be_bytes().to_vec()),
            Exchange::Reply(0x1000u32.to_be_bytes().to_vec()),
            Exchange::Reply(vec![0x1D, 0x0C]),
        ]);
        match Preloader::new(&mut t).jump_da(0x1000) {
            Err(Error::Protocol(ProtocolError::ProtocolAbort(0x1D0C))) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }
}
