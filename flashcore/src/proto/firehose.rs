// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Firehose protocol (Qualcomm stage 2): XML request/response over bulk.
//!
//! Interleaved `<log>` elements are buffered for observability; they never
//! satisfy a response wait. A NAK on a rawmode read still consumes the
//! promised byte stream before the error surfaces, otherwise the device
//! and host disagree about framing forever after.

use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::error::{Error, ProtocolError, Result, TransportError};
use crate::event::CancelToken;
use crate::framer::firehose::{build_command, scan_elements, XmlElement};
use crate::proto::{ERASE_TIMEOUT, FRAME_TIMEOUT, HANDSHAKE_DEADLINE};
use crate::transport::Transport;

/// Storage medium named in `<configure>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryName {
    Emmc,
    Ufs,
    Nand,
    Nor,
}

impl MemoryName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryName::Emmc => "eMMC",
            MemoryName::Ufs => "UFS",
            MemoryName::Nand => "NAND",
            MemoryName::Nor => "NOR",
        }
    }
}

/// `<power>` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Reset,
    Off,
    /// Reset back into emergency download mode.
    Edl,
}

impl PowerAction {
    fn as_str(&self) -> &'static str {
        match self {
            PowerAction::Reset => "reset",
            PowerAction::Off => "off",
            PowerAction::Edl => "edl",
        }
    }
}

/// Subset of the `storage_info` JSON the programmer logs after
/// `<getstorageinfo>`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct StorageInfo {
    #[serde(default)]
    pub total_blocks: u64,
    #[serde(default)]
    pub block_size: u32,
    #[serde(default)]
    pub mem_type: String,
    #[serde(default)]
    pub prod_name: String,
}

/// Firehose client. Created right after Sahara hands over.
pub struct Firehose<'a> {
    transport: &'a mut dyn Transport,
    buffer: String,
    logs: Vec<String>,
    max_payload: usize,
    sector_size: u32,
}

/// Fallback payload size until `<configure>` negotiates one.
const DEFAULT_MAX_PAYLOAD: usize = 0x100000;

impl<'a> Firehose<'a> {
    pub fn new(transport: &'a mut dyn Transport) -> Self {
        Firehose {
            transport,
            buffer: String::new(),
            logs: Vec::new(),
            max_payload: DEFAULT_MAX_PAYLOAD,
            sector_size: 512,
        }
    }

    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    pub fn set_sector_size(&mut self, sector_size: u32) {
        self.sector_size = sector_size;
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Restore a previously negotiated payload size (the session
    /// reconstructs clients per operation).
    pub fn set_max_payload(&mut self, max_payload: usize) {
        self.max_payload = max_payload;
    }

    /// Drain the buffered `<log>` lines collected so far.
    pub fn take_logs(&mut self) -> Vec<String> {
        std::mem::take(&mut self.logs)
    }

    fn send(&mut self, name: &str, attrs: &[(&str, String)]) -> Result<()> {
        let doc = build_command(name, attrs);
        log::trace!("firehose tx: {}", String::from_utf8_lossy(&doc).trim_end_matches('\0'));
        self.transport.write_all(&doc)?;
        self.transport.flush()?;
        Ok(())
    }

    /// Wait for the next `<response>`, buffering logs, within `deadline`.
    fn read_response(&mut self, deadline: Duration, stage: &'static str) -> Result<XmlElement> {
        let until = Instant::now() + deadline;
        loop {
            // Scan everything up to the last complete tag.
            if let Some(cut) = self.buffer.rfind('>') {
                let head: String = self.buffer.drain(..=cut).collect();
                if let Ok(elements) = scan_elements(&head) {
                    let mut response = None;
                    for el in elements {
                        match el.name.as_str() {
                            "log" => {
                                let line = el.attr("value").unwrap_or_default().to_string();
                                log::debug!("firehose: {line}");
                                self.logs.push(line);
                            }
                            "response" => {
                                response = Some(el);
                                break;
                            }
                            other => {
                                log::debug!("firehose: ignoring <{other}>");
                            }
                        }
                    }
                    if let Some(el) = response {
                        return Ok(el);
                    }
                } else {
                    // Incomplete tag split across reads; put it back.
                    self.buffer.insert_str(0, &head);
                }
            }
            let remaining = until
                .checked_duration_since(Instant::now())
                .ok_or(Error::Deadline { stage })?;
            let mut raw = [0u8; 4096];
            match self
                .transport
                .read_some(&mut raw, remaining.min(FRAME_TIMEOUT))
            {
                Ok(n) => self
                    .buffer
                    .push_str(&String::from_utf8_lossy(&raw[..n]).replace('\0', "")),
                Err(TransportError::Timeout) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Expect an ACK; returns the element so callers can inspect attrs.
    fn expect_ack(&mut self, deadline: Duration, stage: &'static str) -> Result<XmlElement> {
        let el = self.read_response(deadline, stage)?;
        match el.attr("value") {
            Some("ACK") => Ok(el),
            _ => Err(self.nak_error()),
        }
    }

    fn nak_error(&self) -> Error {
        let msg = self
            .logs
            .last()
            .cloned()
            .unwrap_or_else(|| "no detail logged".into());
        ProtocolError::Nak { code: 0, msg }.into()
    }

    /// Negotiate transfer parameters. On a NAK that advertises the
    /// device's own maximum, retry once with that value.
    pub fn configure(&mut self, memory: MemoryName, requested_payload: usize) -> Result<usize> {
        let accepted = self.try_configure(memory, requested_payload)?;
        self.max_payload = accepted;
        Ok(accepted)
    }

    fn try_configure(&mut self, memory: MemoryName, payload: usize) -> Result<usize> {
        self.send(
            "configure",
            &[
                ("MemoryName", memory.as_str().to_string()),
                ("Verbose", "0".to_string()),
                ("AlwaysValidate", "0".to_string()),
                ("MaxPayloadSizeToTargetInBytes", payload.to_string()),
                ("ZlpAwareHost", "1".to_string()),
                ("SkipStorageInit", "0".to_string()),
                ("SkipWrite", "0".to_string()),
            ],
        )?;
        let el = self.read_response(HANDSHAKE_DEADLINE, "configure")?;
        if el.attr("value") == Some("ACK") {
            let accepted = el
                .attr("MaxPayloadSizeToTargetInBytes")
                .and_then(|v| v.parse().ok())
                .unwrap_or(payload);
            return Ok(accepted);
        }
        // The device NAKs and tells us what it can actually take.
        if let Some(theirs) = el
            .attr("MaxPayloadSizeToTargetInBytes")
            .and_then(|v| v.parse::<usize>().ok())
        {
            if theirs != payload {
                log::info!("configure: retrying with device max {theirs}");
                return self.try_configure(memory, theirs);
            }
        }
        Err(self.nak_error())
    }

    /// Open a rawmode write covering `num_sectors` at `start_sector`.
    pub fn start_program(&mut self, lun: u8, start_sector: u64, num_sectors: u64) -> Result<()> {
        self.send(
            "program",
            &[
                ("SECTOR_SIZE_IN_BYTES", self.sector_size.to_string()),
                ("num_partition_sectors", num_sectors.to_string()),
                ("physical_partition_number", lun.to_string()),
                ("start_sector", start_sector.to_string()),
            ],
        )?;
        let el = self.expect_ack(FRAME_TIMEOUT, "program")?;
        if el.attr("rawmode") != Some("true") {
            return Err(ProtocolError::UnexpectedState("program without rawmode").into());
        }
        Ok(())
    }

    /// Stream raw sectors inside an open program window.
    pub fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        self.transport.write_all(data)?;
        Ok(())
    }

    /// Close the program window and collect the final ACK.
    pub fn finish_program(&mut self) -> Result<()> {
        self.transport.flush()?;
        self.expect_ack(ERASE_TIMEOUT, "program finish")?;
        Ok(())
    }

    /// One-shot write of a full buffer (pads the tail sector with zeros).
    pub fn program_all(
        &mut self,
        lun: u8,
        start_sector: u64,
        data: &[u8],
        cancel: &CancelToken,
        progress: &mut dyn FnMut(u64),
    ) -> Result<()> {
        let sector = self.sector_size as usize;
        let num_sectors = data.len().div_ceil(sector) as u64;
        self.start_program(lun, start_sector, num_sectors)?;
        let padded_len = num_sectors as usize * sector;
        let mut sent = 0usize;
        while sent < padded_len {
            cancel.check(sent as u64)?;
            let end = (sent + self.max_payload).min(padded_len);
            if end <= data.len() {
                self.send_raw(&data[sent..end])?;
            } else {
                let mut tail = data[sent.min(data.len())..].to_vec();
                tail.resize(end - sent, 0);
                self.send_raw(&tail)?;
            }
            sent = end;
            progress(sent.min(data.len()) as u64);
        }
        self.finish_program()
    }

    /// Open a rawmode read; the device will stream exactly
    /// `num_sectors * sector_size` bytes.
    pub fn start_read(&mut self, lun: u8, start_sector: u64, num_sectors: u64) -> Result<u64> {
        self.send(
            "read",
            &[
                ("SECTOR_SIZE_IN_BYTES", self.sector_size.to_string()),
                ("num_partition_sectors", num_sectors.to_string()),
                ("physical_partition_number", lun.to_string()),
                ("start_sector", start_sector.to_string()),
            ],
        )?;
        let el = self.read_response(FRAME_TIMEOUT, "read")?;
        let promised = num_sectors * self.sector_size as u64;
        if el.attr("value") != Some("ACK") {
            if el.attr("rawmode") == Some("true") {
                // Contract: drain the promised stream, then fail.
                self.drain_raw(promised)?;
            }
            return Err(self.nak_error());
        }
        Ok(promised)
    }

    /// Read part of an open raw stream.
    pub fn read_raw(&mut self, len: usize) -> Result<Vec<u8>> {
        Ok(self.transport.read_exact_timeout(len, ERASE_TIMEOUT)?)
    }

    /// Collect the closing response of a read.
    pub fn finish_read(&mut self) -> Result<()> {
        self.expect_ack(FRAME_TIMEOUT, "read finish")?;
        Ok(())
    }

    fn drain_raw(&mut self, mut remaining: u64) -> Result<()> {
        let mut sink = [0u8; 4096];
        while remaining > 0 {
            let want = sink.len().min(remaining as usize);
            let got = self.transport.read_some(&mut sink[..want], FRAME_TIMEOUT)?;
            remaining -= got as u64;
        }
        Ok(())
    }

    pub fn erase(&mut self, lun: u8, start_sector: u64, num_sectors: u64) -> Result<()> {
        self.send(
            "erase",
            &[
                ("SECTOR_SIZE_IN_BYTES", self.sector_size.to_string()),
                ("num_partition_sectors", num_sectors.to_string()),
                ("physical_partition_number", lun.to_string()),
                ("start_sector", start_sector.to_string()),
            ],
        )?;
        self.expect_ack(ERASE_TIMEOUT, "erase")?;
        Ok(())
    }

    pub fn get_storage_info(&mut self, lun: u8) -> Result<Option<StorageInfo>> {
        self.send(
            "getstorageinfo",
            &[("physical_partition_number", lun.to_string())],
        )?;
        self.expect_ack(FRAME_TIMEOUT, "getstorageinfo")?;
        // Programmers report the details as a JSON payload in a log line.
        for line in self.logs.iter().rev() {
            if let Some(start) = line.find("{\"storage_info\"") {
                #[derive(Deserialize)]
                struct Wrapper {
                    storage_info: StorageInfo,
                }
                if let Ok(w) = serde_json::from_str::<Wrapper>(&line[start..]) {
                    return Ok(Some(w.storage_info));
                }
            }
        }
        Ok(None)
    }

    pub fn power(&mut self, action: PowerAction) -> Result<()> {
        self.send(
            "power",
            &[
                ("value", action.as_str().to_string()),
                ("DelayInSeconds", "1".to_string()),
            ],
        )?;
        self.expect_ack(FRAME_TIMEOUT, "power")?;
        Ok(())
    }

    pub fn nop(&mut self) -> Result<bool> {
        self.send("nop", &[])?;
        let el = self.read_response(FRAME_TIMEOUT, "nop")?;
        Ok(el.attr("value") == Some("ACK"))
    }

    /// Send a raw auth XML element (used by the auth strategies).
    pub fn send_element(&mut self, name: &str, attrs: &[(&str, String)]) -> Result<()> {
        self.send(name, attrs)
    }

    /// Await an ACK/NAK for an auth element without mapping NAK to error.
    pub fn await_result(&mut self) -> Result<bool> {
        let el = self.read_response(FRAME_TIMEOUT, "auth")?;
        Ok(el.attr("value") == Some("ACK"))
    }

    /// Write a raw binary blob (auth data stages).
    pub fn send_blob(&mut self, blob: &[u8]) -> Result<()> {
        self.transport.write_all(blob)?;
        self.transport.flush()?;
        Ok(())
    }

    /// Read a raw binary blob the device pushes outside XML framing
    /// (auth challenges).
    pub fn read_blob(&mut self, len: usize) -> Result<Vec<u8>> {
        Ok(self.transport.read_exact_timeout(len, FRAME_TIMEOUT)?)
    }

    /// Await a response and hand back an attribute map (auth challenges).
    pub fn await_response(&mut self) -> Result<XmlElement> {
        self.read_response(FRAME_TIMEOUT, "auth")
    }
}
