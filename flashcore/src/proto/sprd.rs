// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Unisoc/Spreadtrum BootROM and FDL protocol.
//!
//! The same BSL framing (HDLC with big-endian CRC, `type|len|data` header)
//! runs at three capability levels: the mask-ROM BootROM, FDL1 in SRAM and
//! FDL2 in DRAM. Loader transfer is `START_DATA -> MIDST_DATA* -> END_DATA
//! -> EXEC_DATA`; after FDL2, partition operations become available.

use std::time::Duration;

use crate::error::{Error, ProtocolError, Result, TransportError};
use crate::event::CancelToken;
use crate::framer::sprd::{
    codec, rep_is_error, SprdFrame, BSL_CMD_CHANGE_BAUD, BSL_CMD_CONNECT, BSL_CMD_END_DATA,
    BSL_CMD_ERASE_FLASH, BSL_CMD_EXEC_DATA, BSL_CMD_MIDST_DATA, BSL_CMD_READ_END,
    BSL_CMD_READ_MIDST, BSL_CMD_READ_START, BSL_CMD_REPARTITION, BSL_CMD_RESET,
    BSL_CMD_START_DATA, BSL_REP_ACK, BSL_REP_READ_FLASH, BSL_REP_VER,
};
use crate::proto::{ERASE_TIMEOUT, FORMAT_TIMEOUT, FRAME_TIMEOUT, HANDSHAKE_DEADLINE, OP_RETRIES};
use crate::transport::Transport;

/// Loader/data chunk size for `MIDST_DATA`.
pub const MIDST_CHUNK: usize = 0x840;

/// Partition names travel as UTF-16LE in a fixed 72-byte field.
const NAME_FIELD: usize = 72;

/// Identity reported by the BootROM / FDL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SprdDeviceInfo {
    pub boot_ver: String,
    pub chip_name: String,
}

/// BSL client for BootROM, FDL1 and FDL2 alike.
pub struct SprdBoot<'a> {
    transport: &'a mut dyn Transport,
}

impl<'a> SprdBoot<'a> {
    pub fn new(transport: &'a mut dyn Transport) -> Self {
        SprdBoot { transport }
    }

    fn send(&mut self, frame: &SprdFrame) -> Result<()> {
        self.transport.write_all(&frame.encode())?;
        self.transport.flush()?;
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<SprdFrame> {
        let mut decoder = codec().decoder();
        let mut byte = [0u8; 1];
        loop {
            self.transport.read_some(&mut byte, timeout)?;
            if let Some(payload) = decoder.push(byte[0])? {
                return Ok(SprdFrame::parse(&payload)?);
            }
        }
    }

    /// Round trip expecting a plain ACK. Timeouts and framing errors are
    /// retried (bounded); everything else surfaces at once.
    fn exchange_ack(&mut self, frame: &SprdFrame, timeout: Duration) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.try_exchange_ack(frame, timeout) {
                Err(e) if e.is_retryable() && attempt < OP_RETRIES => {
                    attempt += 1;
                    log::debug!("BSL exchange retry {attempt}: {e}");
                    self.transport.drain_input()?;
                }
                other => return other,
            }
        }
    }

    fn try_exchange_ack(&mut self, frame: &SprdFrame, timeout: Duration) -> Result<()> {
        self.send(frame)?;
        let reply = self.recv(timeout)?;
        match reply.ftype {
            BSL_REP_ACK => Ok(()),
            t if rep_is_error(t) => Err(ProtocolError::ProtocolAbort(t as u32).into()),
            _ => Err(ProtocolError::UnexpectedState("awaiting BSL ACK").into()),
        }
    }

    /// Handshake with the BootROM (or a freshly started FDL stage): the
    /// version reply carries the boot string.
    pub fn connect(&mut self) -> Result<String> {
        self.send(&SprdFrame::new(BSL_CMD_CONNECT, Vec::new()))?;
        let reply = self.recv(HANDSHAKE_DEADLINE)?;
        match reply.ftype {
            BSL_REP_VER => {
                let end = reply
                    .data
                    .iter()
                    .position(|&b| b == 0)
                    .unwrap_or(reply.data.len());
                Ok(String::from_utf8_lossy(&reply.data[..end]).into_owned())
            }
            t if rep_is_error(t) => Err(ProtocolError::ProtocolAbort(t as u32).into()),
            _ => Err(ProtocolError::UnexpectedState("awaiting BSL_REP_VER").into()),
        }
    }

    /// Stage a data blob at `addr` without executing it.
    pub fn send_data(
        &mut self,
        addr: u32,
        data: &[u8],
        cancel: &CancelToken,
        progress: &mut dyn FnMut(u64),
    ) -> Result<()> {
        let mut start = Vec::with_capacity(8);
        start.extend_from_slice(&addr.to_be_bytes());
        start.extend_from_slice(&(data.len() as u32).to_be_bytes());
        self.exchange_ack(&SprdFrame::new(BSL_CMD_START_DATA, start), FRAME_TIMEOUT)?;

        let mut sent = 0u64;
        for chunk in data.chunks(MIDST_CHUNK) {
            cancel.check(sent)?;
            self.exchange_ack(&SprdFrame::new(BSL_CMD_MIDST_DATA, chunk), FRAME_TIMEOUT)?;
            sent += chunk.len() as u64;
            progress(sent);
        }

        self.exchange_ack(&SprdFrame::new(BSL_CMD_END_DATA, Vec::new()), FRAME_TIMEOUT)
    }

    /// Upload a loader image to `addr` and execute it.
    pub fn send_and_exec_loader(
        &mut self,
        addr: u32,
        image: &[u8],
        cancel: &CancelToken,
        progress: &mut dyn FnMut(u64),
    ) -> Result<()> {
        self.send_data(addr, image, cancel, progress)?;
        self.exchange_ack(
            &SprdFrame::new(BSL_CMD_EXEC_DATA, addr.to_be_bytes().to_vec()),
            FRAME_TIMEOUT,
        )
    }

    /// Switch the line to a higher baud rate (FDL1 onwards).
    pub fn change_baud(&mut self, baud: u32) -> Result<()> {
        self.exchange_ack(
            &SprdFrame::new(BSL_CMD_CHANGE_BAUD, baud.to_be_bytes().to_vec()),
            FRAME_TIMEOUT,
        )
    }

    /// FDL2: open a named-partition write of `total_len` bytes.
    pub fn begin_partition_write(&mut self, name: &str, total_len: u64) -> Result<()> {
        let mut start = name_field(name);
        start.extend_from_slice(&total_len.to_be_bytes());
        self.exchange_ack(&SprdFrame::new(BSL_CMD_START_DATA, start), FRAME_TIMEOUT)
    }

    /// FDL2: push one data piece of an open partition write.
    pub fn midst_data(&mut self, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(MIDST_CHUNK) {
            self.exchange_ack(&SprdFrame::new(BSL_CMD_MIDST_DATA, chunk), FRAME_TIMEOUT)?;
        }
        Ok(())
    }

    /// FDL2: close an open partition write.
    pub fn end_partition_write(&mut self) -> Result<()> {
        self.exchange_ack(&SprdFrame::new(BSL_CMD_END_DATA, Vec::new()), ERASE_TIMEOUT)
    }

    /// FDL2: stream a whole partition to the device.
    pub fn write_partition(
        &mut self,
        name: &str,
        data: &[u8],
        cancel: &CancelToken,
        progress: &mut dyn FnMut(u64),
    ) -> Result<()> {
        self.begin_partition_write(name, data.len() as u64)?;
        let mut sent = 0u64;
        for chunk in data.chunks(MIDST_CHUNK) {
            if let Err(e) = cancel.check(sent) {
                // Drain whatever ACK is in flight, then stop cleanly.
                let _ = self.recv(FRAME_TIMEOUT);
                return Err(e);
            }
            self.midst_data(chunk)?;
            sent += chunk.len() as u64;
            progress(sent);
        }
        self.end_partition_write()
    }

    /// FDL2: read `size` bytes of a partition in `chunk`-sized pieces.
    pub fn read_partition(
        &mut self,
        name: &str,
        size: u64,
        cancel: &CancelToken,
        on_chunk: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<()> {
        let mut start = name_field(name);
        start.extend_from_slice(&size.to_be_bytes());
        self.exchange_ack(&SprdFrame::new(BSL_CMD_READ_START, start), FRAME_TIMEOUT)?;

        let mut offset = 0u64;
        while offset < size {
            cancel.check(offset)?;
            let want = (size - offset).min(MIDST_CHUNK as u64) as u32;
            let mut midst = Vec::with_capacity(12);
            midst.extend_from_slice(&want.to_be_bytes());
            midst.extend_from_slice(&offset.to_be_bytes());
            self.send(&SprdFrame::new(BSL_CMD_READ_MIDST, midst))?;
            let reply = self.recv(FRAME_TIMEOUT)?;
            match reply.ftype {
                BSL_REP_READ_FLASH => {
                    offset += reply.data.len() as u64;
                    if reply.data.is_empty() || offset > size {
                        return Err(
                            ProtocolError::UnexpectedState("bad read chunk length").into()
                        );
                    }
                    on_chunk(&reply.data)?;
                }
                t if rep_is_error(t) => {
                    return Err(ProtocolError::ProtocolAbort(t as u32).into())
                }
                _ => return Err(ProtocolError::UnexpectedState("awaiting read data").into()),
            }
        }
        self.exchange_ack(&SprdFrame::new(BSL_CMD_READ_END, Vec::new()), FRAME_TIMEOUT)
    }

    /// FDL2: erase a named partition.
    pub fn erase_partition(&mut self, name: &str) -> Result<()> {
        self.exchange_ack(
            &SprdFrame::new(BSL_CMD_ERASE_FLASH, name_field(name)),
            ERASE_TIMEOUT,
        )
    }

    /// FDL2: rewrite the whole partition table (the format-flash
    /// primitive on this stack).
    pub fn repartition(&mut self, table: &[u8]) -> Result<()> {
        self.exchange_ack(&SprdFrame::new(BSL_CMD_REPARTITION, table), FORMAT_TIMEOUT)
    }

    /// Reset the device. Best-effort: a target that reboots before the ACK
    /// makes it out is not an error.
    pub fn reset(&mut self) -> Result<()> {
        match self.exchange_ack(&SprdFrame::new(BSL_CMD_RESET, Vec::new()), FRAME_TIMEOUT) {
            Ok(()) => Ok(()),
            Err(Error::Transport(TransportError::Timeout)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// UTF-16LE name, zero-padded to the fixed field width.
fn name_field(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(NAME_FIELD);
    for unit in name.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.truncate(NAME_FIELD - 2);
    out.resize(NAME_FIELD, 0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{Exchange, ScriptedTransport};

    fn ack() -> Vec<u8> {
        SprdFrame::new(BSL_REP_ACK, Vec::new()).encode()
    }

    #[test]
    fn connect_reads_boot_version() {
        let mut t = ScriptedTransport::new(vec![
            Exchange::Expect(SprdFrame::new(BSL_CMD_CONNECT, Vec::new()).encode()),
            Exchange::Reply(SprdFrame::new(BSL_REP_VER, b"SPRD3\0".to_vec()).encode()),
        ]);
        assert_eq!(SprdBoot::new(&mut t).connect().unwrap(), "SPRD3");
        t.finish();
    }

    #[test]
    fn loader_staging_sequence() {
        let image = vec![0x42u8; MIDST_CHUNK + 16];
        let mut start = 0x5000_0000u32.to_be_bytes().to_vec();
        start.extend_from_slice(&(image.len() as u32).to_be_bytes());
        let mut t = ScriptedTransport::new(vec![
            Exchange::Expect(SprdFrame::new(BSL_CMD_START_DATA, start).encode()),
            Exchange::Reply(ack()),
            Exchange::Expect(
                SprdFrame::new(BSL_CMD_MIDST_DATA, image[..MIDST_CHUNK].to_vec()).encode(),
            ),
            Exchange::Reply(ack()),
            Exchange::Expect(
                SprdFrame::new(BSL_CMD_MIDST_DATA, image[MIDST_CHUNK..].to_vec()).encode(),
            ),
            Exchange::Reply(ack()),
            Exchange::Expect(SprdFrame::new(BSL_CMD_END_DATA, Vec::new()).encode()),
            Exchange::Reply(ack()),
            Exchange::Expect(
                SprdFrame::new(BSL_CMD_EXEC_DATA, 0x5000_0000u32.to_be_bytes().to_vec()).encode(),
            ),
            Exchange::Reply(ack()),
        ]);
        let mut progress = Vec::new();
        SprdBoot::new(&mut t)
            .send_and_exec_loader(0x5000_0000, &image, &CancelToken::new(), &mut |n| {
                progress.push(n)
            })
            .unwrap();
        assert_eq!(progress, vec![MIDST_CHUNK as u64, image.len() as u64]);
        t.finish();
    }

    #[test]
    fn error_reply_becomes_abort() {
        let mut t = ScriptedTransport::new(vec![
            Exchange::Expect(SprdFrame::new(BSL_CMD_CONNECT, Vec::new()).encode()),
            Exchange::Reply(SprdFrame::new(0x0089, Vec::new()).encode()),
        ]);
        match SprdBoot::new(&mut t).connect() {
            Err(Error::Protocol(ProtocolError::ProtocolAbort(0x89))) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn read_partition_chunks() {
        let mut start = name_field("boot");
        start.extend_from_slice(&8u64.to_be_bytes());
        let mut midst = 8u32.to_be_bytes().to_vec();
        midst.extend_from_slice(&0u64.to_be_bytes());
        let mut t = ScriptedTransport::new(vec![
            Exchange::Expect(SprdFrame::new(BSL_CMD_READ_START, start).encode()),
            Exchange::Reply(ack()),
            Exchange::Expect(SprdFrame::new(BSL_CMD_READ_MIDST, midst).encode()),
            Exchange::Reply(SprdFrame::new(BSL_REP_READ_FLASH, vec![9u8; 8]).encode()),
            Exchange::Expect(SprdFrame::new(BSL_CMD_READ_END, Vec::new()).encode()),
            Exchange::Reply(ack()),
        ]);
        let mut got = Vec::new();
        SprdBoot::new(&mut t)
            .read_partition("boot", 8, &CancelToken::new(), &mut |c| {
                got.extend_from_slice(c);
                Ok(())
            })
            .unwrap();
        assert_eq!(got, vec![9u8; 8]);
        t.finish();
    }

    #[test]
    fn garbled_ack_is_retried() {
        let erase = SprdFrame::new(BSL_CMD_ERASE_FLASH, name_field("cache")).encode();
        let mut garbled = ack();
        garbled[1] ^= 0x01; // corrupt the reply type, CRC now fails
        let mut t = ScriptedTransport::new(vec![
            Exchange::Expect(erase.clone()),
            Exchange::Reply(garbled),
            Exchange::Expect(erase),
            Exchange::Reply(ack()),
        ]);
        SprdBoot::new(&mut t).erase_partition("cache").unwrap();
        t.finish();
    }

    #[test]
    fn name_field_is_utf16_padded() {
        let f = name_field("boot");
        assert_eq!(f.len(), NAME_FIELD);
        assert_eq!(&f[..8], &[b'b', 0, b'o', 0, b'o', 0, b't', 0]);
        assert!(f[8..].iter().all(|&b| b == 0));
    }
}
