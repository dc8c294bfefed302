// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Vendor protocol engine for flashing and recovering Android devices.
//!
//! Three SoC families are spoken natively: Qualcomm (Sahara + Firehose at
//! USB PID 9008), MediaTek (BROM/Preloader + two-stage Download Agent)
//! and Unisoc/Spreadtrum (BootROM + FDL1/FDL2 + PAC firmware). The crate
//! is the core only: it consumes an already-opened transport, loader
//! binaries and payload bytes, and emits protocol-exact frames plus
//! structured events. No UI, no USB enumeration, no HTTP.
//!
//! The layers, leaf first: [`transport`] moves bytes, [`framer`] turns
//! them into frames, [`proto`] drives the vendor state machines,
//! [`pipeline`] uploads the two loader stages, [`storage`] and [`sparse`]
//! address and stream partition data, [`engine`] and [`exploit`] reach
//! write-privileged contexts on locked chips, [`auth`] plays the OEM
//! challenge-response games, [`ops`] does the actual partition work and
//! [`session`] owns the whole lifecycle.

pub mod auth;
pub mod checksum;
pub mod chipdb;
pub mod engine;
pub mod error;
pub mod event;
pub mod exploit;
pub mod framer;
pub mod ops;
pub mod pipeline;
pub mod proto;
pub mod session;
pub mod sparse;
pub mod storage;
pub mod superdef;
pub mod transport;

pub use error::{Error, Result};
pub use event::{CancelToken, Event, EventHook, Events};
pub use session::{DeviceInfo, Session, SessionState, Vendor};
pub use storage::partition::{PartitionRecord, PartitionTable, Slot};
pub use transport::{SerialTransport, Transport};
