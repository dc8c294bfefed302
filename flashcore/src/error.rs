// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Error taxonomy for the engine.
//!
//! Transport and frame errors may be retried by the protocol layer (at most
//! twice per operation) before they surface; once surfaced they terminate the
//! session. Protocol NAKs are never retried. Storage errors are checked at
//! operation entry and never reach the wire.

use thiserror::Error;

use crate::pipeline::UploadStep;

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error. Every engine operation returns this.
#[derive(Debug, Error)]
pub enum Error {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("framing: {0}")]
    Frame(#[from] FrameError),

    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("authentication: {0}")]
    Auth(#[from] AuthError),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("exploit: {0}")]
    Exploit(#[from] ExploitError),

    /// Loader upload failed; `step` names the pipeline stage that failed.
    #[error("loader upload failed during {step}: {source}")]
    Upload {
        step: UploadStep,
        #[source]
        source: Box<Error>,
    },

    /// Per-operation deadline expired. The session must be disconnected
    /// before reuse.
    #[error("deadline exceeded during {stage}")]
    Deadline { stage: &'static str },

    /// Operation cancelled; carries the byte offset reached.
    #[error("cancelled at byte {0}")]
    Cancelled(u64),
}

impl Error {
    /// Wrap a pipeline failure with the step it happened in.
    pub(crate) fn during(self, step: UploadStep) -> Error {
        match self {
            // Keep the innermost step; re-wrapping would lose it.
            e @ Error::Upload { .. } => e,
            e => Error::Upload {
                step,
                source: Box::new(e),
            },
        }
    }

    /// True when retrying the surrounding operation can possibly help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport(TransportError::Timeout) | Error::Frame(_)
        )
    }
}

/// Physical-layer failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The device went away. Fatal for the session.
    #[error("device disconnected")]
    Disconnected,

    /// A read deadline expired. Protocols may retry or treat this as a
    /// probe failure.
    #[error("read timed out")]
    Timeout,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend has no USB control endpoint (plain serial).
    #[error("transport has no USB control channel")]
    NoControlChannel,
}

/// Framing-layer failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("bad CRC: computed {computed:#06x}, received {received:#06x}")]
    BadCrc { computed: u16, received: u16 },

    #[error("frame exceeds {max} bytes")]
    Overflow { max: usize },

    #[error("unexpected flag byte inside frame")]
    UnexpectedFlag,

    /// The device echo did not match what was written (MTK BROM discipline).
    #[error("echo mismatch at byte {offset}: wrote {wrote:#04x}, read {read:#04x}")]
    EchoMismatch { offset: usize, wrote: u8, read: u8 },

    #[error("truncated frame: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
}

/// State-machine failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unexpected state: {0}")]
    UnexpectedState(&'static str),

    /// The peer rejected the request.
    #[error("device NAK ({code:#x}): {msg}")]
    Nak { code: u32, msg: String },

    /// The peer aborted the exchange with a vendor status code.
    #[error("protocol abort, vendor status {0:#x}")]
    ProtocolAbort(u32),

    #[error("device rejected the loader signature")]
    SignatureRejected,

    #[error("unsupported response: {0}")]
    Unsupported(String),
}

/// Authentication failures.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no authentication strategy applies to this device")]
    NoStrategyApplies,

    #[error("all authentication attempts failed")]
    AllAttemptsFailed,

    /// The device challenge could not be parsed.
    #[error("challenge unreadable: {0}")]
    ChallengeUnreadable(String),
}

/// Partition/layout failures. Checked before anything hits the wire.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("partition not found: {0}")]
    PartitionNotFound(String),

    /// Multiple partitions share the name (A/B layout) and no slot was given.
    #[error("partition name is ambiguous, specify a slot: {0}")]
    AmbiguousName(String),

    #[error("range out of bounds: offset {offset:#x} + len {len:#x} exceeds {limit:#x}")]
    OutOfRange { offset: u64, len: u64, limit: u64 },

    #[error("size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("unsupported on-device layout: {0}")]
    UnsupportedLayout(&'static str),

    #[error("malformed {layout}: {reason}")]
    Malformed {
        layout: &'static str,
        reason: String,
    },
}

/// Exploit-bridge failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExploitError {
    #[error("chip not supported by this exploit: {0}")]
    UnsupportedChip(String),

    /// The memory blacklist is still armed; the bridge refused to write.
    #[error("security blacklist still active")]
    BlacklistActive,

    #[error("device rejected the payload")]
    PayloadRejected,

    /// A bridge already holds the chip's scratch region for this session.
    #[error("an exploit bridge is already active on this session")]
    AlreadyActive,
}
