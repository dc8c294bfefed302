// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sahara protocol (Qualcomm stage 1).
//!
//! The target drives: it sends `HELLO`, then pulls slices of the Firehose
//! programmer with `READ_DATA`/`READ_DATA_64` until `END_TRANSFER`. The
//! host is a slice server. Image id 13 (the EDL programmer) is the only
//! id we agree to serve.

use crate::error::{Error, ProtocolError, Result};
use crate::event::{CancelToken, Events};
use crate::framer::sahara::{
    hello_resp, Hello, ReadData, SaharaPacket, CMD_DONE, CMD_DONE_RESP, CMD_END_TRANSFER,
    CMD_HELLO, CMD_READ_DATA, CMD_READ_DATA_64,
};
use crate::proto::{FRAME_TIMEOUT, HANDSHAKE_DEADLINE};
use crate::transport::Transport;

/// The only mode we ever select: image transfer pending.
pub const MODE_IMAGE_TX_PENDING: u32 = 1;

/// Sahara protocol version we speak.
pub const PROTOCOL_VERSION: u32 = 2;

/// The EDL programmer image id.
pub const IMAGE_ID_EDL: u64 = 13;

/// Identity collected on the way into Firehose.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QcDeviceInfo {
    pub chip_serial: u64,
    pub pk_hash: Vec<u8>,
    pub hw_id: u64,
    pub msm_id: u32,
}

/// Outcome of a completed programmer upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadSummary {
    pub bytes_served: u64,
    pub requests: u32,
}

fn read_packet(transport: &mut dyn Transport) -> Result<SaharaPacket> {
    let header = transport.read_exact_timeout(8, HANDSHAKE_DEADLINE)?;
    let length = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize;
    if length < 8 {
        return Err(ProtocolError::Unsupported(format!("sahara length {length}")).into());
    }
    let mut raw = header;
    raw.extend(transport.read_exact_timeout(length - 8, FRAME_TIMEOUT)?);
    let (pkt, _) = SaharaPacket::parse(&raw)?;
    Ok(pkt)
}

fn send_packet(transport: &mut dyn Transport, pkt: &SaharaPacket) -> Result<()> {
    transport.write_all(&pkt.encode())?;
    transport.flush()?;
    Ok(())
}

/// Serve the programmer to the target until it jumps into Firehose.
pub fn serve_programmer(
    transport: &mut dyn Transport,
    programmer: &[u8],
    events: &Events,
    cancel: &CancelToken,
) -> Result<UploadSummary> {
    let mut served: u64 = 0;
    let mut requests: u32 = 0;
    let mut greeted = false;

    loop {
        cancel.check(served)?;
        let pkt = read_packet(transport)?;
        match pkt.command {
            CMD_HELLO => {
                let hello = Hello::parse(&pkt)?;
                events.debug(format!(
                    "sahara hello: version {} mode {}",
                    hello.version, hello.mode
                ));
                let mut reply = hello;
                reply.version = PROTOCOL_VERSION;
                send_packet(transport, &hello_resp(&reply, MODE_IMAGE_TX_PENDING))?;
                greeted = true;
            }
            CMD_READ_DATA | CMD_READ_DATA_64 if greeted => {
                let req = ReadData::parse(&pkt)?;
                if req.image_id != IMAGE_ID_EDL {
                    return Err(ProtocolError::ProtocolAbort(req.image_id as u32).into());
                }
                let slice = programmer_slice(programmer, req.offset, req.length)?;
                transport.write_all(&slice)?;
                transport.flush()?;
                served += slice.len() as u64;
                requests += 1;
                events.progress(served.min(programmer.len() as u64), programmer.len() as u64);
            }
            CMD_END_TRANSFER if greeted => {
                let status = pkt.body_u32(1)?;
                if status != 0 {
                    return Err(ProtocolError::ProtocolAbort(status).into());
                }
                send_packet(transport, &SaharaPacket::new(CMD_DONE, Vec::new()))?;
                let done = read_packet(transport)?;
                if done.command != CMD_DONE_RESP {
                    return Err(ProtocolError::UnexpectedState("awaiting DONE_RESP").into());
                }
                events.info(format!(
                    "programmer accepted: {served} bytes in {requests} reads"
                ));
                return Ok(UploadSummary {
                    bytes_served: served,
                    requests,
                });
            }
            _ => {
                return Err(Error::from(ProtocolError::UnexpectedState(
                    "sahara command out of order",
                )))
            }
        }
    }
}

/// Slice the programmer, zero-padding reads past the end of the image
/// (targets round the final request up to their block size).
fn programmer_slice(programmer: &[u8], offset: u64, length: u64) -> Result<Vec<u8>> {
    let offset = offset as usize;
    let length = length as usize;
    if offset >= programmer.len() {
        return Err(ProtocolError::Unsupported(format!(
            "read past programmer end: offset {offset:#x}"
        ))
        .into());
    }
    let end = (offset + length).min(programmer.len());
    let mut slice = programmer[offset..end].to_vec();
    slice.resize(length, 0);
    Ok(slice)
}
