// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Stateless transducers between byte streams and frames.
//!
//! A frame failing validation is never delivered upward; the framer reports
//! a [`FrameError`](crate::error::FrameError) instead.

pub mod echo;
pub mod firehose;
pub mod hdlc;
pub mod sahara;
pub mod sprd;
