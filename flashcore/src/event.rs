// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Structured events, progress reporting and cancellation.
//!
//! Events flow through a caller-supplied hook; the engine never talks to a
//! UI. Everything emitted here is also mirrored to the `log` facade so a
//! plain `FLASHCORE_LOG=debug` run is useful without wiring a hook.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::session::SessionState;

/// Event emitted by the engine during an operation.
#[derive(Debug, Clone)]
pub enum Event {
    Log(log::Level, String),
    /// Monotonically non-decreasing; the final call of a successful
    /// operation carries `current == total`.
    Progress { current: u64, total: u64 },
    StateChanged(SessionState),
    Completed(String),
    Failed(String),
}

/// Callback receiving [`Event`]s.
pub type EventHook = Arc<dyn Fn(Event) + Send + Sync>;

/// Event emitter owned by a session.
#[derive(Clone, Default)]
pub struct Events {
    hook: Option<EventHook>,
}

impl Events {
    pub fn new(hook: Option<EventHook>) -> Self {
        Events { hook }
    }

    pub fn emit(&self, event: Event) {
        if let Event::Log(level, msg) = &event {
            log::log!(*level, "{msg}");
        }
        if let Some(hook) = &self.hook {
            hook(event);
        }
    }

    pub fn info(&self, msg: impl Into<String>) {
        self.emit(Event::Log(log::Level::Info, msg.into()));
    }

    pub fn warn(&self, msg: impl Into<String>) {
        self.emit(Event::Log(log::Level::Warn, msg.into()));
    }

    pub fn debug(&self, msg: impl Into<String>) {
        self.emit(Event::Log(log::Level::Debug, msg.into()));
    }

    pub fn progress(&self, current: u64, total: u64) {
        self.emit(Event::Progress { current, total });
    }

    pub fn state_changed(&self, state: SessionState) {
        log::debug!("session state -> {state:?}");
        self.emit(Event::StateChanged(state));
    }
}

impl std::fmt::Debug for Events {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Events")
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

/// Cheaply clonable cancellation flag.
///
/// Long operations check it at every chunk boundary and protocol round
/// trip. There is no rollback: cancelling a write stops sending, drains the
/// pending ACK and reports the byte offset reached.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Checkpoint: fail with [`Error::Cancelled`] when the token is set.
    pub fn check(&self, at_byte: u64) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled(at_byte))
        } else {
            Ok(())
        }
    }
}
