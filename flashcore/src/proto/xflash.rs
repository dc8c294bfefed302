// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! XFlash Download-Agent protocol (MTK stage 2).
//!
//! Framed as length-prefixed blocks (`len:u32_le | data`); the device
//! answers each block with an ACK byte. With a checksum level above zero,
//! data blocks carry an XMODEM CRC16 trailer.

use crate::checksum::CRC16_XMODEM;
use crate::error::{Error, FrameError, ProtocolError, Result};
use crate::event::CancelToken;
use crate::proto::{FORMAT_TIMEOUT, FRAME_TIMEOUT};
use crate::transport::Transport;

const ACK: u8 = 0x5A;
const NAK: u8 = 0xA5;

const SYNC_MAGIC: &[u8] = b"SYNC";

const CMD_GET_CONNECTION_AGENT: u32 = 0x0001_0001;
const CMD_SEND_EMI: u32 = 0x0001_0002;
const CMD_BOOT_TO: u32 = 0x0001_0003;
const CMD_SET_RESET_KEY: u32 = 0x0001_0004;
const CMD_SET_CHECKSUM_LEVEL: u32 = 0x0001_0005;
const CMD_GET_SLA_STATUS: u32 = 0x0001_0006;
const CMD_REINIT_DEV_INFO: u32 = 0x0001_0007;
const CMD_GET_DEV_INFO: u32 = 0x0001_0008;
const CMD_GET_PACKET_LENGTH: u32 = 0x0001_0009;
const CMD_READ_FLASH: u32 = 0x0001_000A;
const CMD_WRITE_FLASH: u32 = 0x0001_000B;
const CMD_FORMAT_FLASH: u32 = 0x0001_000C;
const CMD_SHUTDOWN: u32 = 0x0001_000D;

/// Default data-phase packet length until `get_packet_length` negotiates.
const DEFAULT_PACKET_LEN: usize = 0x1000;

/// Storage region addressed by flash operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PartType {
    User = 0,
    Boot1 = 1,
    Boot2 = 2,
    Rpmb = 3,
    Gp1 = 4,
}

/// How `shutdown` leaves the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ShutdownMode {
    PowerOff = 0,
    Reboot = 1,
    /// Reboot back into the BROM download mode.
    BootRom = 2,
}

/// Where the DA found itself running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionAgent {
    Brom,
    Preloader,
}

/// Storage geometry reported by `get_dev_info`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XflashDevInfo {
    /// 1 = eMMC, 2 = UFS, 3 = NAND.
    pub storage_type: u32,
    pub block_size: u32,
    pub user_size: u64,
    pub boot1_size: u64,
    pub boot2_size: u64,
    pub rpmb_size: u64,
}

impl XflashDevInfo {
    pub fn region_size(&self, part: PartType) -> u64 {
        match part {
            PartType::User | PartType::Gp1 => self.user_size,
            PartType::Boot1 => self.boot1_size,
            PartType::Boot2 => self.boot2_size,
            PartType::Rpmb => self.rpmb_size,
        }
    }
}

/// XFlash DA client.
pub struct Xflash<'a> {
    transport: &'a mut dyn Transport,
    packet_len: usize,
    checksum_level: u8,
}

impl<'a> Xflash<'a> {
    pub fn new(transport: &'a mut dyn Transport) -> Self {
        Xflash {
            transport,
            packet_len: DEFAULT_PACKET_LEN,
            checksum_level: 0,
        }
    }

    fn send_block(&mut self, data: &[u8]) -> Result<()> {
        let mut out = Vec::with_capacity(4 + data.len());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
        self.transport.write_all(&out)?;
        self.transport.flush()?;
        Ok(())
    }

    fn recv_block(&mut self) -> Result<Vec<u8>> {
        let hdr = self.transport.read_exact_timeout(4, FRAME_TIMEOUT)?;
        let len = u32::from_le_bytes(hdr.try_into().unwrap()) as usize;
        Ok(self.transport.read_exact_timeout(len, FRAME_TIMEOUT)?)
    }

    fn read_ack(&mut self) -> Result<()> {
        match self.transport.read_byte(FRAME_TIMEOUT)? {
            ACK => Ok(()),
            NAK => {
                let code = self.transport.read_exact_timeout(4, FRAME_TIMEOUT)?;
                Err(ProtocolError::Nak {
                    code: u32::from_le_bytes(code.try_into().unwrap()),
                    msg: "download agent rejected the request".into(),
                }
                .into())
            }
            b => Err(ProtocolError::ProtocolAbort(b as u32).into()),
        }
    }

    fn command(&mut self, cmd: u32) -> Result<()> {
        self.send_block(&cmd.to_le_bytes())?;
        self.read_ack()
    }

    /// Wait for the freshly jumped-to DA to announce itself.
    pub fn wait_sync(&mut self) -> Result<()> {
        let block = self.recv_block()?;
        if block != SYNC_MAGIC {
            return Err(ProtocolError::UnexpectedState("xflash sync").into());
        }
        self.transport.write_all(&[ACK])?;
        self.transport.flush()?;
        Ok(())
    }

    /// "brom" when the DA booted straight from the BootROM (DRAM is still
    /// uninitialized), "preloader" otherwise.
    pub fn get_connection_agent(&mut self) -> Result<ConnectionAgent> {
        self.command(CMD_GET_CONNECTION_AGENT)?;
        let agent = self.recv_block()?;
        match agent.as_slice() {
            b"brom" => Ok(ConnectionAgent::Brom),
            b"preloader" => Ok(ConnectionAgent::Preloader),
            other => Err(ProtocolError::Unsupported(format!(
                "connection agent {:?}",
                String::from_utf8_lossy(other)
            ))
            .into()),
        }
    }

    /// Push the EMI (DRAM controller) settings extracted from a preloader.
    pub fn send_emi(&mut self, emi: &[u8]) -> Result<()> {
        self.command(CMD_SEND_EMI)?;
        self.send_block(&(emi.len() as u32).to_le_bytes())?;
        self.read_ack()?;
        self.write_data_phase(emi, &CancelToken::new(), &mut |_| {})?;
        self.read_ack()
    }

    /// Upload the stage-2 image to `addr` and jump to it.
    pub fn boot_to(&mut self, addr: u64, stage2: &[u8]) -> Result<()> {
        self.command(CMD_BOOT_TO)?;
        let mut params = Vec::with_capacity(16);
        params.extend_from_slice(&addr.to_le_bytes());
        params.extend_from_slice(&(stage2.len() as u64).to_le_bytes());
        self.send_block(&params)?;
        self.read_ack()?;
        self.write_data_phase(stage2, &CancelToken::new(), &mut |_| {})?;
        self.read_ack()
    }

    pub fn set_reset_key(&mut self, key: u8) -> Result<()> {
        self.command(CMD_SET_RESET_KEY)?;
        self.send_block(&[key])?;
        self.read_ack()
    }

    pub fn set_checksum_level(&mut self, level: u8) -> Result<()> {
        self.command(CMD_SET_CHECKSUM_LEVEL)?;
        self.send_block(&[level])?;
        self.read_ack()?;
        self.checksum_level = level;
        Ok(())
    }

    pub fn checksum_level(&self) -> u8 {
        self.checksum_level
    }

    pub fn get_sla_status(&mut self) -> Result<bool> {
        self.command(CMD_GET_SLA_STATUS)?;
        let status = self.recv_block()?;
        if status.len() != 4 {
            return Err(FrameError::Truncated {
                need: 4,
                have: status.len(),
            }
            .into());
        }
        Ok(u32::from_le_bytes(status.try_into().unwrap()) != 0)
    }

    /// Re-probe storage after an operation that changes it (e.g. format).
    pub fn reinit_device_info(&mut self) -> Result<()> {
        self.command(CMD_REINIT_DEV_INFO)
    }

    pub fn get_dev_info(&mut self) -> Result<XflashDevInfo> {
        self.command(CMD_GET_DEV_INFO)?;
        let block = self.recv_block()?;
        if block.len() < 40 {
            return Err(FrameError::Truncated {
                need: 40,
                have: block.len(),
            }
            .into());
        }
        let u32_at = |i: usize| u32::from_le_bytes(block[i..i + 4].try_into().unwrap());
        let u64_at = |i: usize| u64::from_le_bytes(block[i..i + 8].try_into().unwrap());
        Ok(XflashDevInfo {
            storage_type: u32_at(0),
            block_size: u32_at(4),
            user_size: u64_at(8),
            boot1_size: u64_at(16),
            boot2_size: u64_at(24),
            rpmb_size: u64_at(32),
        })
    }

    /// Negotiate the data-phase packet length.
    pub fn get_packet_length(&mut self) -> Result<usize> {
        self.command(CMD_GET_PACKET_LENGTH)?;
        let block = self.recv_block()?;
        if block.len() != 4 {
            return Err(FrameError::Truncated {
                need: 4,
                have: block.len(),
            }
            .into());
        }
        let len = u32::from_le_bytes(block.try_into().unwrap()) as usize;
        if len > 0 {
            self.packet_len = len;
        }
        Ok(self.packet_len)
    }

    /// Read `len` bytes starting at `offset`, delivering device-sized
    /// chunks to `on_chunk` in order.
    pub fn read_flash(
        &mut self,
        part: PartType,
        offset: u64,
        len: u64,
        cancel: &CancelToken,
        on_chunk: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<()> {
        self.command(CMD_READ_FLASH)?;
        self.send_block(&range_params(part, offset, len))?;
        self.read_ack()?;

        let mut received: u64 = 0;
        while received < len {
            cancel.check(received)?;
            let block = self.recv_block()?;
            let payload = self.strip_checksum(block)?;
            received += payload.len() as u64;
            if received > len {
                return Err(ProtocolError::Unsupported(format!(
                    "device over-delivered read data ({received} > {len})"
                ))
                .into());
            }
            self.transport.write_all(&[ACK])?;
            on_chunk(&payload)?;
        }
        Ok(())
    }

    /// Write `data` starting at `offset`.
    pub fn write_flash(
        &mut self,
        part: PartType,
        offset: u64,
        data: &[u8],
        cancel: &CancelToken,
        progress: &mut dyn FnMut(u64),
    ) -> Result<()> {
        self.command(CMD_WRITE_FLASH)?;
        self.send_block(&range_params(part, offset, data.len() as u64))?;
        self.read_ack()?;
        self.write_data_phase(data, cancel, progress)?;
        self.read_ack()
    }

    /// Erase/trim `len` bytes starting at `offset`.
    pub fn format_flash(&mut self, part: PartType, offset: u64, len: u64) -> Result<()> {
        self.command(CMD_FORMAT_FLASH)?;
        self.send_block(&range_params(part, offset, len))?;
        self.read_ack()?;
        // Formats can run minutes on big regions.
        match self.transport.read_byte(FORMAT_TIMEOUT) {
            Ok(ACK) => Ok(()),
            Ok(NAK) => {
                let code = self.transport.read_exact_timeout(4, FRAME_TIMEOUT)?;
                Err(ProtocolError::Nak {
                    code: u32::from_le_bytes(code.try_into().unwrap()),
                    msg: "format rejected".into(),
                }
                .into())
            }
            Ok(b) => Err(ProtocolError::ProtocolAbort(b as u32).into()),
            Err(crate::error::TransportError::Timeout) => {
                Err(Error::Deadline { stage: "format" })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn shutdown(&mut self, mode: ShutdownMode) -> Result<()> {
        self.command(CMD_SHUTDOWN)?;
        self.send_block(&(mode as u32).to_le_bytes())?;
        self.read_ack()
    }

    pub fn reboot(&mut self) -> Result<()> {
        self.shutdown(ShutdownMode::Reboot)
    }

    fn write_data_phase(
        &mut self,
        data: &[u8],
        cancel: &CancelToken,
        progress: &mut dyn FnMut(u64),
    ) -> Result<()> {
        let mut sent: u64 = 0;
        for chunk in data.chunks(self.packet_len) {
            if let Err(e) = cancel.check(sent) {
                // No rollback primitive: stop sending, drain the pending
                // ACK, report the offset reached.
                let _ = self.transport.read_byte(FRAME_TIMEOUT);
                return Err(e);
            }
            if self.checksum_level > 0 {
                let mut block = Vec::with_capacity(chunk.len() + 2);
                block.extend_from_slice(chunk);
                block.extend_from_slice(&CRC16_XMODEM.checksum(chunk).to_le_bytes());
                self.send_block(&block)?;
            } else {
                self.send_block(chunk)?;
            }
            self.read_ack()?;
            sent += chunk.len() as u64;
            progress(sent);
        }
        Ok(())
    }

    fn strip_checksum(&self, mut block: Vec<u8>) -> Result<Vec<u8>> {
        if self.checksum_level == 0 {
            return Ok(block);
        }
        if block.len() < 2 {
            return Err(FrameError::Truncated {
                need: 2,
                have: block.len(),
            }
            .into());
        }
        let hi = block.pop().unwrap();
        let lo = block.pop().unwrap();
        let received = u16::from_le_bytes([lo, hi]);
        let computed = CRC16_XMODEM.checksum(&block);
        if computed != received {
            return Err(FrameError::BadCrc { computed, received }.into());
        }
        Ok(block)
    }
}

fn range_params(part: PartType, offset: u64, len: u64) -> Vec<u8> {
    let mut params = Vec::with_capacity(20);
    params.extend_from_slice(&(part as u32).to_le_bytes());
    params.extend_from_slice(&offset.to_le_bytes());
    params.extend_from_slice(&len.to_le_bytes());
    params
}
