// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! One-shot transfer sessions.
//!
//! A session owns its channel for the whole transfer and drives one of the
//! two state machines to completion.

use crate::channel::Channel;
use crate::receiver::{ReceiverError, ReceiverFsm};
use crate::sender::{SenderError, SenderFsm};
use crate::source::PayloadSource;

pub struct Session {
    chan: Box<dyn Channel>,
}

impl Session {
    pub fn new(chan: Box<dyn Channel>) -> Self {
        Session { chan }
    }

    /// Streams `source` to the peer, blocking until the transfer ends
    pub fn send(self, source: Box<dyn PayloadSource>) -> Result<(), SenderError> {
        let mut fsm = SenderFsm::new(self.chan, source);
        loop {
            match fsm.step() {
                Ok(next) => fsm = next,
                Err(SenderError::TransferComplete) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Collects a payload from the peer, blocking until the transfer ends.
    /// The buffer is delivered as sent, padding included.
    pub fn receive(self) -> Result<Vec<u8>, ReceiverError> {
        let mut fsm = ReceiverFsm::new(self.chan);
        loop {
            match fsm.step() {
                Ok(next) => fsm = next,
                Err(ReceiverError::TransferComplete(data)) => return Ok(data),
                Err(e) => return Err(e),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
