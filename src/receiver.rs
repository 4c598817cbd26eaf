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

use std::marker::PhantomData;
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;

use crate::channel::Channel;
use crate::packet;
use crate::protocol::*;

// ============================================================================
// Error Types
// ============================================================================

/// Terminal outcomes of the receive loop. Like every fatal condition,
/// completion travels through the step function's error channel so the
/// driving loop stays a two-armed match.
#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer cancelled by peer")]
    Cancelled,

    #[error("no sender activity during negotiation")]
    NegotiationFailed,

    #[error("error limit reached")]
    RetriesExhausted,

    #[error("sender out of sync: expected block {expected}, got {got}")]
    OutOfSync { expected: u8, got: u8 },

    #[error("transfer complete")]
    TransferComplete(Vec<u8>),
}

// ============================================================================
// States
// ============================================================================

pub struct Negotiate;
pub struct AwaitStart;
pub struct ReceiveBlock;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct ReceiverFsm<State> {
    state: PhantomData<State>,
    chan: Box<dyn Channel>,
    mode: Mode,
    greeting: u8,
    rounds: u32,
    block_size: usize,
    expected_seq: u8,
    data: Vec<u8>,
    errors: u32,
}

// ============================================================================
// Trait
// ============================================================================

pub trait ReceiverState: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError>;
}

// ============================================================================
// Helpers shared by all states
// ============================================================================

impl<S> ReceiverFsm<S> {
    fn transition<T>(self) -> Box<ReceiverFsm<T>> {
        Box::new(ReceiverFsm {
            state: PhantomData,
            chan: self.chan,
            mode: self.mode,
            greeting: self.greeting,
            rounds: self.rounds,
            block_size: self.block_size,
            expected_seq: self.expected_seq,
            data: self.data,
            errors: self.errors,
        })
    }

    fn send_byte(&mut self, byte: u8) -> std::io::Result<()> {
        self.chan.write_all(&[byte])?;
        self.chan.flush()
    }

    /// Reads one byte, turning a transport failure into a cancelled session
    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>, ReceiverError> {
        match self.chan.read_byte(timeout) {
            Ok(byte) => Ok(byte),
            Err(e) => Err(self.cancel(ReceiverError::Io(e))),
        }
    }

    /// Puts the triple CAN on the wire that forces the peer to give up
    fn cancel(&mut self, why: ReceiverError) -> ReceiverError {
        if let Err(e) = self
            .chan
            .write_all(&[CAN, CAN, CAN])
            .and_then(|()| self.chan.flush())
        {
            warn!("could not put cancel on the wire: {}", e);
        }
        why
    }

    /// A CAN was read; a second one inside the confirmation window makes it
    /// real, anything else was line noise
    fn cancel_confirmed(&mut self) -> Result<bool, ReceiverError> {
        Ok(self.read_byte(CAN_CONFIRM_TIMEOUT)? == Some(CAN))
    }

    fn bump_errors(&mut self) -> Result<(), ReceiverError> {
        self.errors += 1;
        if self.errors >= MAX_ERRORS {
            Err(self.cancel(ReceiverError::RetriesExhausted))
        } else {
            Ok(())
        }
    }

    fn complete(mut self) -> ReceiverError {
        match self.send_byte(ACK) {
            Ok(()) => {
                info!("transfer complete, {} bytes", self.data.len());
                ReceiverError::TransferComplete(self.data)
            }
            Err(e) => ReceiverError::Io(e),
        }
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl ReceiverState for ReceiverFsm<Negotiate> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;

        if fsm.rounds >= GREETING_ROUNDS {
            if fsm.greeting == CRC_REQ {
                info!("no answer to the CRC greeting, falling back to checksum mode");
                fsm.greeting = NAK;
                fsm.mode = Mode::Checksum;
                fsm.rounds = 0;
            } else {
                return Err(fsm.cancel(ReceiverError::NegotiationFailed));
            }
        }
        fsm.rounds += 1;

        fsm.send_byte(fsm.greeting)?;
        debug!("sent greeting 0x{:02X}", fsm.greeting);

        match fsm.read_byte(GREETING_TIMEOUT)? {
            Some(SOH) => {
                info!(
                    "sender started with a 128-byte block ({:?} mode)",
                    fsm.mode
                );
                fsm.block_size = SHORT_BLOCK;
                let next = fsm.transition::<ReceiveBlock>();
                Ok(next as Box<dyn ReceiverState>)
            }
            Some(STX) => {
                // A 1024-byte block always carries a CRC trailer
                info!("sender started with a 1024-byte block (Crc mode)");
                fsm.mode = Mode::Crc;
                fsm.block_size = LONG_BLOCK;
                let next = fsm.transition::<ReceiveBlock>();
                Ok(next as Box<dyn ReceiverState>)
            }
            Some(EOT) => Err(fsm.complete()),
            Some(CAN) => {
                if fsm.cancel_confirmed()? {
                    debug!("peer cancelled during negotiation");
                    fsm.send_byte(ACK)?;
                    Err(ReceiverError::Cancelled)
                } else {
                    debug!("lone CAN during negotiation, ignoring");
                    Ok(Box::new(fsm) as Box<dyn ReceiverState>)
                }
            }
            _ => Ok(Box::new(fsm) as Box<dyn ReceiverState>),
        }
    }
}

impl ReceiverState for ReceiverFsm<AwaitStart> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;

        match fsm.read_byte(BYTE_TIMEOUT)? {
            Some(SOH) => {
                fsm.block_size = SHORT_BLOCK;
                let next = fsm.transition::<ReceiveBlock>();
                Ok(next as Box<dyn ReceiverState>)
            }
            Some(STX) => {
                fsm.block_size = LONG_BLOCK;
                let next = fsm.transition::<ReceiveBlock>();
                Ok(next as Box<dyn ReceiverState>)
            }
            Some(EOT) => Err(fsm.complete()),
            Some(CAN) => {
                if fsm.cancel_confirmed()? {
                    debug!("peer cancelled mid-transfer");
                    fsm.send_byte(ACK)?;
                    Err(ReceiverError::Cancelled)
                } else {
                    debug!("lone CAN between blocks, ignoring");
                    Ok(Box::new(fsm) as Box<dyn ReceiverState>)
                }
            }
            Some(byte) => {
                debug!("stray byte 0x{:02X} between blocks", byte);
                fsm.bump_errors()?;
                Ok(Box::new(fsm) as Box<dyn ReceiverState>)
            }
            None => {
                fsm.send_byte(NAK)?;
                fsm.bump_errors()?;
                Ok(Box::new(fsm) as Box<dyn ReceiverState>)
            }
        }
    }
}

impl ReceiverState for ReceiverFsm<ReceiveBlock> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;

        // The start byte is already consumed; the rest of the frame is
        // sequence pair, payload and trailer.
        let wanted = 2 + fsm.block_size + fsm.mode.trailer_len();
        let mut raw = Vec::with_capacity(wanted);
        while raw.len() < wanted {
            match fsm.read_byte(BYTE_TIMEOUT)? {
                Some(byte) => raw.push(byte),
                None => {
                    debug!("block timed out after {} of {} bytes", raw.len(), wanted);
                    fsm.send_byte(NAK)?;
                    fsm.bump_errors()?;
                    let next = fsm.transition::<AwaitStart>();
                    return Ok(next as Box<dyn ReceiverState>);
                }
            }
        }

        match packet::decode(fsm.mode, fsm.block_size, &raw) {
            Ok(frame) if frame.seq == fsm.expected_seq => {
                debug!("accepted block {} ({} bytes)", frame.seq, frame.payload.len());
                fsm.data.extend_from_slice(&frame.payload);
                fsm.expected_seq = fsm.expected_seq.wrapping_add(1);
                fsm.errors = 0;
                fsm.send_byte(ACK)?;
                let next = fsm.transition::<AwaitStart>();
                Ok(next as Box<dyn ReceiverState>)
            }
            Ok(frame) if frame.seq == fsm.expected_seq.wrapping_sub(1) => {
                // Retransmission of the block we already hold; acknowledge it
                // again without appending.
                debug!("duplicate of block {}, acknowledging", frame.seq);
                fsm.send_byte(ACK)?;
                let next = fsm.transition::<AwaitStart>();
                Ok(next as Box<dyn ReceiverState>)
            }
            Ok(frame) => {
                let expected = fsm.expected_seq;
                Err(fsm.cancel(ReceiverError::OutOfSync {
                    expected,
                    got: frame.seq,
                }))
            }
            Err(e) => {
                debug!("bad block: {}", e);
                fsm.send_byte(NAK)?;
                fsm.bump_errors()?;
                let next = fsm.transition::<AwaitStart>();
                Ok(next as Box<dyn ReceiverState>)
            }
        }
    }
}

// ============================================================================
// Constructor
// ============================================================================

impl ReceiverFsm<Negotiate> {
    pub fn new(chan: Box<dyn Channel>) -> Box<dyn ReceiverState> {
        Box::new(ReceiverFsm {
            state: PhantomData::<Negotiate>,
            chan,
            mode: Mode::Crc,
            greeting: CRC_REQ,
            rounds: 0,
            block_size: 0,
            expected_seq: 1,
            data: Vec::new(),
            errors: 0,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
