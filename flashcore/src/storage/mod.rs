// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Storage addressing: four on-device layouts reduced to uniform
//! partition records.

pub mod gpt;
pub mod lp;
pub mod pac;
pub mod partition;
pub mod pmt;
