// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Standard (no-op) authentication: most retail programmers are already
//! write-privileged once Firehose is up.

use crate::auth::{AuthArtifacts, AuthStrategy};
use crate::error::Result;
use crate::event::Events;
use crate::proto::firehose::Firehose;

pub struct StandardAuth;

impl AuthStrategy for StandardAuth {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn authenticate(
        &mut self,
        _fh: &mut Firehose<'_>,
        _artifacts: &AuthArtifacts,
        _events: &Events,
    ) -> Result<bool> {
        Ok(true)
    }
}
