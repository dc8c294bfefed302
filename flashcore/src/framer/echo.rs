// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! MTK BROM/Preloader echo discipline.
//!
//! Every command byte and parameter word written to the BROM is echoed
//! back; a mismatch means the link is out of sync and the exchange must be
//! abandoned. Parameters travel big-endian.

use std::time::Duration;

use crate::error::{FrameError, TransportError};
use crate::transport::Transport;

/// Echo-verified register access over a transport.
pub struct EchoLink<'a> {
    transport: &'a mut dyn Transport,
    timeout: Duration,
}

impl<'a> EchoLink<'a> {
    pub fn new(transport: &'a mut dyn Transport, timeout: Duration) -> Self {
        EchoLink { transport, timeout }
    }

    /// Write `bytes` and verify the device echoes them back unchanged.
    pub fn echo(&mut self, bytes: &[u8]) -> Result<(), EchoError> {
        self.transport.write_all(bytes)?;
        self.transport.flush()?;
        let echoed = self.transport.read_exact_timeout(bytes.len(), self.timeout)?;
        for (offset, (&wrote, &read)) in bytes.iter().zip(echoed.iter()).enumerate() {
            if wrote != read {
                return Err(FrameError::EchoMismatch {
                    offset,
                    wrote,
                    read,
                }
                .into());
            }
        }
        Ok(())
    }

    pub fn echo_u8(&mut self, value: u8) -> Result<(), EchoError> {
        self.echo(&[value])
    }

    pub fn echo_u16(&mut self, value: u16) -> Result<(), EchoError> {
        self.echo(&value.to_be_bytes())
    }

    pub fn echo_u32(&mut self, value: u32) -> Result<(), EchoError> {
        self.echo(&value.to_be_bytes())
    }

    /// Write raw data without expecting an echo (bulk payload phase).
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), EchoError> {
        self.transport.write_all(bytes)?;
        self.transport.flush()?;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, EchoError> {
        Ok(self.transport.read_byte(self.timeout)?)
    }

    pub fn read_u16(&mut self) -> Result<u16, EchoError> {
        let b = self.transport.read_exact_timeout(2, self.timeout)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, EchoError> {
        let b = self.transport.read_exact_timeout(4, self.timeout)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, EchoError> {
        Ok(self.transport.read_exact_timeout(n, self.timeout)?)
    }
}

/// Transport or echo failure during an exchange.
#[derive(Debug, thiserror::Error)]
pub enum EchoError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl From<EchoError> for crate::error::Error {
    fn from(e: EchoError) -> Self {
        match e {
            EchoError::Transport(t) => t.into(),
            EchoError::Frame(f) => f.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{Exchange, ScriptedTransport};

    #[test]
    fn matching_echo_passes() {
        let mut t = ScriptedTransport::new(vec![
            Exchange::Expect(vec![0xD1, 0x00, 0x00, 0x10, 0x00]),
            Exchange::Reply(vec![0xD1, 0x00, 0x00, 0x10, 0x00]),
        ]);
        let mut link = EchoLink::new(&mut t, Duration::from_millis(200));
        link.echo_u8(0xD1).unwrap();
        link.echo_u32(0x1000).unwrap();
        t.finish();
    }

    #[test]
    fn mismatch_reports_offset() {
        let mut t = ScriptedTransport::new(vec![
            Exchange::Expect(vec![0x00, 0x00, 0x10, 0x00]),
            Exchange::Reply(vec![0x00, 0x00, 0x11, 0x00]),
        ]);
        let mut link = EchoLink::new(&mut t, Duration::from_millis(200));
        match link.echo_u32(0x1000) {
            Err(EchoError::Frame(FrameError::EchoMismatch {
                offset: 2,
                wrote: 0x10,
                read: 0x11,
            })) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }
}
