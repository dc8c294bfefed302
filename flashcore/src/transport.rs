// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Byte-level full-duplex channel.
//!
//! The engine consumes an already-opened transport; it never enumerates
//! devices and never reconfigures line parameters mid-session. A read
//! timeout is non-fatal (protocols may retry or treat it as a probe
//! failure); `Disconnected` poisons the session.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use crate::error::TransportError;

/// Full-duplex byte channel with per-call read timeouts.
pub trait Transport: Send {
    /// Read up to `buf.len()` bytes, waiting at most `timeout`.
    fn read_some(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError>;

    fn flush(&mut self) -> Result<(), TransportError>;

    /// Discard any unread input.
    fn drain_input(&mut self) -> Result<(), TransportError>;

    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// USB control-endpoint seam. Plain serial backends have none; the
    /// Kamakiri bridge requires one.
    fn usb_control(&mut self) -> Option<&mut dyn UsbControl> {
        None
    }

    /// Read exactly `n` bytes within `timeout` (an overall deadline, not
    /// per-chunk).
    fn read_exact_timeout(
        &mut self,
        n: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut out = vec![0u8; n];
        let mut have = 0;
        while have < n {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(TransportError::Timeout)?;
            have += self.read_some(&mut out[have..], remaining)?;
        }
        Ok(out)
    }

    fn read_byte(&mut self, timeout: Duration) -> Result<u8, TransportError> {
        Ok(self.read_exact_timeout(1, timeout)?[0])
    }

    /// Read until `terminator` (inclusive) or `max` bytes, whichever first.
    fn read_until(
        &mut self,
        terminator: u8,
        max: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut out = Vec::new();
        let mut byte = [0u8; 1];
        while out.len() < max {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(TransportError::Timeout)?;
            if self.read_some(&mut byte, remaining)? == 1 {
                out.push(byte[0]);
                if byte[0] == terminator {
                    break;
                }
            }
        }
        Ok(out)
    }
}

/// USB control transfers, for backends that are really USB bulk endpoints.
pub trait UsbControl {
    /// Issue a control transfer; returns the IN data stage (empty for OUT).
    fn control_transfer(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<Vec<u8>, TransportError>;
}

/// Serial-port transport over the `serialport` crate.
///
/// Line parameters are fixed at open: 8N1, no flow control, the given baud
/// rate.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    pub fn open(path: &str, baud: u32) -> Result<Self, TransportError> {
        let port = serialport::new(path, baud)
            .timeout(Duration::from_millis(500))
            .open()
            .map_err(map_serial_err)?;
        Ok(SerialTransport { port })
    }

    /// Wrap a port the caller already opened and configured.
    pub fn from_port(port: Box<dyn serialport::SerialPort>) -> Self {
        SerialTransport { port }
    }
}

impl Transport for SerialTransport {
    fn read_some(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        self.port.set_timeout(timeout).map_err(map_serial_err)?;
        match self.port.read(buf) {
            Ok(0) => Err(TransportError::Disconnected),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Err(TransportError::Timeout),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                Err(TransportError::Disconnected)
            }
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        match self.port.write_all(data) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                Err(TransportError::Disconnected)
            }
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        self.port.flush().map_err(TransportError::Io)
    }

    fn drain_input(&mut self) -> Result<(), TransportError> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(map_serial_err)
    }
}

fn map_serial_err(e: serialport::Error) -> TransportError {
    match e.kind() {
        serialport::ErrorKind::NoDevice => TransportError::Disconnected,
        _ => TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            e.to_string(),
        )),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transport for protocol tests: a sequence of expected writes
    //! and canned replies, compared byte-exact.

    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug)]
    pub(crate) enum Exchange {
        /// The engine must write exactly these bytes next.
        Expect(Vec<u8>),
        /// These bytes become readable once every prior `Expect` matched.
        /// Each `Reply` is one transfer: a single read never crosses into
        /// the next one, mirroring USB/serial delivery boundaries.
        Reply(Vec<u8>),
    }

    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        script: VecDeque<Exchange>,
        readable: VecDeque<VecDeque<u8>>,
        written: Vec<u8>,
        pub(crate) control_log: Vec<(u8, u8, u16, u16, Vec<u8>)>,
        pub(crate) with_control: bool,
    }

    impl ScriptedTransport {
        pub(crate) fn new(script: Vec<Exchange>) -> Self {
            let mut t = ScriptedTransport {
                script: script.into(),
                ..Default::default()
            };
            t.pump();
            t
        }

        /// Assert the whole script was consumed.
        pub(crate) fn finish(&mut self) {
            assert!(
                self.script.is_empty(),
                "script not exhausted: {:?}",
                self.script
            );
            assert!(
                self.written.is_empty(),
                "unexpected trailing write: {:02x?}",
                self.written
            );
        }

        /// Match buffered writes against the script and release replies.
        fn pump(&mut self) {
            loop {
                match self.script.front() {
                    Some(Exchange::Reply(_)) => {
                        let Some(Exchange::Reply(data)) = self.script.pop_front() else {
                            unreachable!()
                        };
                        self.readable.push_back(data.into());
                    }
                    Some(Exchange::Expect(expected)) => {
                        if self.written.len() < expected.len() {
                            break;
                        }
                        let (head, tail) = self.written.split_at(expected.len());
                        assert_eq!(
                            head,
                            expected.as_slice(),
                            "write mismatch: wrote {head:02x?}, expected {expected:02x?}"
                        );
                        self.written = tail.to_vec();
                        self.script.pop_front();
                    }
                    None => break,
                }
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn read_some(
            &mut self,
            buf: &mut [u8],
            _timeout: Duration,
        ) -> Result<usize, TransportError> {
            while let Some(front) = self.readable.front() {
                if front.is_empty() {
                    self.readable.pop_front();
                    continue;
                }
                break;
            }
            let Some(chunk) = self.readable.front_mut() else {
                return Err(TransportError::Timeout);
            };
            let n = buf.len().min(chunk.len());
            for b in buf.iter_mut().take(n) {
                *b = chunk.pop_front().unwrap();
            }
            Ok(n)
        }

        fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
            self.written.extend_from_slice(data);
            self.pump();
            Ok(())
        }

        fn flush(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn drain_input(&mut self) -> Result<(), TransportError> {
            self.readable.clear();
            Ok(())
        }

        fn usb_control(&mut self) -> Option<&mut dyn UsbControl> {
            if self.with_control {
                Some(self)
            } else {
                None
            }
        }
    }

    impl UsbControl for ScriptedTransport {
        fn control_transfer(
            &mut self,
            request_type: u8,
            request: u8,
            value: u16,
            index: u16,
            data: &[u8],
        ) -> Result<Vec<u8>, TransportError> {
            self.control_log
                .push((request_type, request, value, index, data.to_vec()));
            Ok(Vec::new())
        }
    }

    #[test]
    fn scripted_transport_matches_and_replies() {
        let mut t = ScriptedTransport::new(vec![
            Exchange::Expect(vec![0xA0]),
            Exchange::Reply(vec![0x5F]),
            Exchange::Expect(vec![0x0A]),
            Exchange::Reply(vec![0xF5]),
        ]);
        t.write_all(&[0xA0]).unwrap();
        assert_eq!(t.read_byte(Duration::from_millis(10)).unwrap(), 0x5F);
        t.write_all(&[0x0A]).unwrap();
        assert_eq!(t.read_byte(Duration::from_millis(10)).unwrap(), 0xF5);
        t.finish();
    }
}
