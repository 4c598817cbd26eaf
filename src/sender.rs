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
use crate::source::PayloadSource;

// ============================================================================
// Error Types
// ============================================================================

/// Terminal outcomes of the send loop, routed through the step function's
/// error channel.
#[derive(Debug, Error)]
pub enum SenderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer cancelled by peer")]
    Cancelled,

    #[error("receiver never initiated the transfer")]
    NegotiationFailed,

    #[error("error limit reached")]
    RetriesExhausted,

    #[error("transfer complete")]
    TransferComplete,
}

// ============================================================================
// States
// ============================================================================

pub struct AwaitPreference;
pub struct BuildBlock;
pub struct SendBlock;
pub struct Terminate;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct SenderFsm<State> {
    state: PhantomData<State>,
    chan: Box<dyn Channel>,
    source: Box<dyn PayloadSource>,
    mode: Mode,
    seq: u8,
    rounds: u32,
    frame: Vec<u8>,
    errors: u32,
}

// ============================================================================
// Trait
// ============================================================================

pub trait SenderState: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError>;
}

// ============================================================================
// Helpers shared by all states
// ============================================================================

impl<S> SenderFsm<S> {
    fn transition<T>(self) -> Box<SenderFsm<T>> {
        Box::new(SenderFsm {
            state: PhantomData,
            chan: self.chan,
            source: self.source,
            mode: self.mode,
            seq: self.seq,
            rounds: self.rounds,
            frame: self.frame,
            errors: self.errors,
        })
    }

    fn send_byte(&mut self, byte: u8) -> std::io::Result<()> {
        self.chan.write_all(&[byte])?;
        self.chan.flush()
    }

    /// Reads one byte, turning a transport failure into a cancelled session
    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>, SenderError> {
        match self.chan.read_byte(timeout) {
            Ok(byte) => Ok(byte),
            Err(e) => Err(self.cancel(SenderError::Io(e))),
        }
    }

    /// Puts the triple CAN on the wire that forces the peer to give up
    fn cancel(&mut self, why: SenderError) -> SenderError {
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
    fn cancel_confirmed(&mut self) -> Result<bool, SenderError> {
        Ok(self.read_byte(CAN_CONFIRM_TIMEOUT)? == Some(CAN))
    }

    fn bump_errors(&mut self) -> Result<(), SenderError> {
        self.errors += 1;
        if self.errors >= MAX_ERRORS {
            Err(self.cancel(SenderError::RetriesExhausted))
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl SenderState for SenderFsm<AwaitPreference> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        if fsm.rounds >= PREFERENCE_ROUNDS {
            return Err(fsm.cancel(SenderError::NegotiationFailed));
        }
        fsm.rounds += 1;

        match fsm.read_byte(PREFERENCE_TIMEOUT)? {
            Some(CRC_REQ) => {
                info!("receiver requested CRC mode");
                fsm.mode = Mode::Crc;
                fsm.rounds = 0;
                let next = fsm.transition::<BuildBlock>();
                Ok(next as Box<dyn SenderState>)
            }
            Some(NAK) => {
                info!("receiver requested checksum mode");
                fsm.mode = Mode::Checksum;
                fsm.rounds = 0;
                let next = fsm.transition::<BuildBlock>();
                Ok(next as Box<dyn SenderState>)
            }
            Some(CAN) => {
                if fsm.cancel_confirmed()? {
                    debug!("peer cancelled before the transfer started");
                    fsm.send_byte(ACK)?;
                    Err(SenderError::Cancelled)
                } else {
                    debug!("lone CAN while awaiting preference, ignoring");
                    Ok(Box::new(fsm) as Box<dyn SenderState>)
                }
            }
            _ => Ok(Box::new(fsm) as Box<dyn SenderState>),
        }
    }
}

impl SenderState for SenderFsm<BuildBlock> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        let remaining = fsm.source.remaining();
        if remaining == 0 {
            let next = fsm.transition::<Terminate>();
            return Ok(next as Box<dyn SenderState>);
        }

        // 1024-byte blocks are an extension of CRC mode; a short tail drops
        // back to 128 bytes to save bandwidth.
        let block_size = if fsm.mode == Mode::Crc && remaining >= LONG_BLOCK as u64 {
            LONG_BLOCK
        } else {
            SHORT_BLOCK
        };

        let mut block = vec![SUB; block_size];
        let mut filled = 0;
        while filled < block_size {
            let n = fsm.source.read(&mut block[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        debug!("built block {} with {} payload bytes", fsm.seq, filled);
        fsm.frame = packet::encode(fsm.mode, fsm.seq, &block);
        fsm.errors = 0;
        let next = fsm.transition::<SendBlock>();
        Ok(next as Box<dyn SenderState>)
    }
}

impl SenderState for SenderFsm<SendBlock> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        fsm.chan.write_all(&fsm.frame)?;
        fsm.chan.flush()?;
        debug!("sent block {} ({} bytes on the wire)", fsm.seq, fsm.frame.len());

        match fsm.read_byte(REPLY_TIMEOUT)? {
            Some(ACK) => {
                fsm.seq = fsm.seq.wrapping_add(1);
                let next = fsm.transition::<BuildBlock>();
                Ok(next as Box<dyn SenderState>)
            }
            Some(CAN) => {
                if fsm.cancel_confirmed()? {
                    debug!("peer cancelled mid-transfer");
                    fsm.send_byte(ACK)?;
                    Err(SenderError::Cancelled)
                } else {
                    debug!("lone CAN instead of a verdict, retransmitting");
                    fsm.bump_errors()?;
                    Ok(Box::new(fsm) as Box<dyn SenderState>)
                }
            }
            reply => {
                // NAK, noise or silence all mean the block did not get through
                debug!("block {} not acknowledged ({:?})", fsm.seq, reply);
                fsm.bump_errors()?;
                Ok(Box::new(fsm) as Box<dyn SenderState>)
            }
        }
    }
}

impl SenderState for SenderFsm<Terminate> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        if fsm.rounds >= EOT_ROUNDS {
            return Err(SenderError::RetriesExhausted);
        }
        fsm.rounds += 1;

        fsm.send_byte(EOT)?;
        debug!("sent EOT");

        match fsm.read_byte(EOT_TIMEOUT)? {
            Some(ACK) => {
                info!("transfer complete");
                Err(SenderError::TransferComplete)
            }
            _ => Ok(Box::new(fsm) as Box<dyn SenderState>),
        }
    }
}

// ============================================================================
// Constructor
// ============================================================================

impl SenderFsm<AwaitPreference> {
    pub fn new(chan: Box<dyn Channel>, source: Box<dyn PayloadSource>) -> Box<dyn SenderState> {
        Box::new(SenderFsm {
            state: PhantomData::<AwaitPreference>,
            chan,
            source,
            mode: Mode::Checksum,
            seq: 1,
            rounds: 0,
            frame: Vec::new(),
            errors: 0,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockChannel;
    use crate::packet::encode;
    use crate::source::MemorySource;

    fn run_sender(mut fsm: Box<dyn SenderState>) -> Result<(), SenderError> {
        loop {
            match fsm.step() {
                Ok(next) => fsm = next,
                Err(SenderError::TransferComplete) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn padded(data: &[u8], len: usize) -> Vec<u8> {
        let mut block = data.to_vec();
        block.resize(len, SUB);
        block
    }

    #[test]
    fn test_sender_crc_1k_happy_path() {
        let payload = vec![0xAA; 2 * LONG_BLOCK];

        let responses = vec![Some(CRC_REQ), Some(ACK), Some(ACK), Some(ACK)];

        let mut expected_writes = Vec::new();
        expected_writes.extend(encode(Mode::Crc, 1, &[0xAA; LONG_BLOCK]));
        expected_writes.extend(encode(Mode::Crc, 2, &[0xAA; LONG_BLOCK]));
        expected_writes.push(EOT);

        let chan = Box::new(MockChannel::new(responses, expected_writes));
        let source = Box::new(MemorySource::new(payload));

        run_sender(SenderFsm::new(chan, source)).expect("transfer should succeed");
    }

    #[test]
    fn test_sender_checksum_mode() {
        let responses = vec![Some(NAK), Some(ACK), Some(ACK)];

        let mut expected_writes = Vec::new();
        expected_writes.extend(encode(Mode::Checksum, 1, &padded(b"HELLO", SHORT_BLOCK)));
        expected_writes.push(EOT);

        let chan = Box::new(MockChannel::new(responses, expected_writes));
        let source = Box::new(MemorySource::new(b"HELLO".to_vec()));

        run_sender(SenderFsm::new(chan, source)).expect("transfer should succeed");
    }

    #[test]
    fn test_sender_exact_1k_has_no_tail_block() {
        let responses = vec![Some(CRC_REQ), Some(ACK), Some(ACK)];

        let mut expected_writes = Vec::new();
        expected_writes.extend(encode(Mode::Crc, 1, &[0x42; LONG_BLOCK]));
        expected_writes.push(EOT);

        let chan = Box::new(MockChannel::new(responses, expected_writes));
        let source = Box::new(MemorySource::new(vec![0x42; LONG_BLOCK]));

        run_sender(SenderFsm::new(chan, source)).expect("transfer should succeed");
    }

    #[test]
    fn test_sender_1k_plus_one_drops_to_short_tail() {
        let mut payload = vec![0x42; LONG_BLOCK];
        payload.push(0x99);

        let responses = vec![Some(CRC_REQ), Some(ACK), Some(ACK), Some(ACK)];

        let mut tail = vec![0x99];
        tail.resize(SHORT_BLOCK, SUB);

        let mut expected_writes = Vec::new();
        expected_writes.extend(encode(Mode::Crc, 1, &[0x42; LONG_BLOCK]));
        expected_writes.extend(encode(Mode::Crc, 2, &tail));
        expected_writes.push(EOT);

        let chan = Box::new(MockChannel::new(responses, expected_writes));
        let source = Box::new(MemorySource::new(payload));

        run_sender(SenderFsm::new(chan, source)).expect("transfer should succeed");
    }

    #[test]
    fn test_sender_checksum_stays_after_late_crc_request() {
        // Once checksum mode is negotiated a later 'C' is just a garbled
        // verdict, not a renegotiation.
        let responses = vec![Some(NAK), Some(CRC_REQ), Some(ACK), Some(ACK)];

        let frame = encode(Mode::Checksum, 1, &padded(b"fixed", SHORT_BLOCK));
        let mut expected_writes = Vec::new();
        expected_writes.extend(&frame);
        expected_writes.extend(&frame);
        expected_writes.push(EOT);

        let chan = Box::new(MockChannel::new(responses, expected_writes));
        let source = Box::new(MemorySource::new(b"fixed".to_vec()));

        run_sender(SenderFsm::new(chan, source)).expect("transfer should succeed");
    }

    #[test]
    fn test_sender_survives_24_naks() {
        let frame = encode(Mode::Crc, 1, &padded(b"retry", SHORT_BLOCK));

        let mut responses = vec![Some(CRC_REQ)];
        responses.extend(std::iter::repeat(Some(NAK)).take(24));
        responses.push(Some(ACK));
        responses.push(Some(ACK));

        let mut expected_writes = Vec::new();
        for _ in 0..25 {
            expected_writes.extend(&frame);
        }
        expected_writes.push(EOT);

        let chan = Box::new(MockChannel::new(responses, expected_writes));
        let source = Box::new(MemorySource::new(b"retry".to_vec()));

        run_sender(SenderFsm::new(chan, source)).expect("transfer should succeed");
    }

    #[test]
    fn test_sender_gives_up_after_25_naks() {
        let frame = encode(Mode::Crc, 1, &padded(b"retry", SHORT_BLOCK));

        let mut responses = vec![Some(CRC_REQ)];
        responses.extend(std::iter::repeat(Some(NAK)).take(25));

        let mut expected_writes = Vec::new();
        for _ in 0..25 {
            expected_writes.extend(&frame);
        }
        expected_writes.extend_from_slice(&[CAN, CAN, CAN]);

        let chan = Box::new(MockChannel::new(responses, expected_writes));
        let source = Box::new(MemorySource::new(b"retry".to_vec()));

        let result = run_sender(SenderFsm::new(chan, source));
        assert!(matches!(result, Err(SenderError::RetriesExhausted)));
    }

    #[test]
    fn test_sender_peer_cancel_mid_transfer() {
        let frame = encode(Mode::Crc, 1, &padded(b"stop", SHORT_BLOCK));

        let responses = vec![Some(CRC_REQ), Some(CAN), Some(CAN)];

        let mut expected_writes = Vec::new();
        expected_writes.extend(&frame);
        expected_writes.push(ACK);

        let chan = Box::new(MockChannel::new(responses, expected_writes));
        let source = Box::new(MemorySource::new(b"stop".to_vec()));

        let result = run_sender(SenderFsm::new(chan, source));
        assert!(matches!(result, Err(SenderError::Cancelled)));
    }

    #[test]
    fn test_sender_lone_can_retransmits() {
        let frame = encode(Mode::Crc, 1, &padded(b"noise", SHORT_BLOCK));

        let responses = vec![Some(CRC_REQ), Some(CAN), None, Some(ACK), Some(ACK)];

        let mut expected_writes = Vec::new();
        expected_writes.extend(&frame);
        expected_writes.extend(&frame);
        expected_writes.push(EOT);

        let chan = Box::new(MockChannel::new(responses, expected_writes));
        let source = Box::new(MemorySource::new(b"noise".to_vec()));

        run_sender(SenderFsm::new(chan, source)).expect("transfer should succeed");
    }

    #[test]
    fn test_sender_empty_payload_goes_straight_to_eot() {
        let responses = vec![Some(CRC_REQ), Some(ACK)];
        let expected_writes = vec![EOT];

        let chan = Box::new(MockChannel::new(responses, expected_writes));
        let source = Box::new(MemorySource::new(Vec::new()));

        run_sender(SenderFsm::new(chan, source)).expect("transfer should succeed");
    }

    #[test]
    fn test_sender_negotiation_ignores_garbage() {
        let responses = vec![Some(0x55), Some(CRC_REQ), Some(ACK), Some(ACK)];

        let mut expected_writes = Vec::new();
        expected_writes.extend(encode(Mode::Crc, 1, &padded(b"go", SHORT_BLOCK)));
        expected_writes.push(EOT);

        let chan = Box::new(MockChannel::new(responses, expected_writes));
        let source = Box::new(MemorySource::new(b"go".to_vec()));

        run_sender(SenderFsm::new(chan, source)).expect("transfer should succeed");
    }

    #[test]
    fn test_sender_negotiation_failure() {
        let responses = vec![None; PREFERENCE_ROUNDS as usize];
        let expected_writes = vec![CAN, CAN, CAN];

        let chan = Box::new(MockChannel::new(responses, expected_writes));
        let source = Box::new(MemorySource::new(b"never sent".to_vec()));

        let result = run_sender(SenderFsm::new(chan, source));
        assert!(matches!(result, Err(SenderError::NegotiationFailed)));
    }

    #[test]
    fn test_sender_eot_retry() {
        let responses = vec![Some(CRC_REQ), Some(ACK), None, Some(ACK)];

        let mut expected_writes = Vec::new();
        expected_writes.extend(encode(Mode::Crc, 1, &padded(b"tail", SHORT_BLOCK)));
        expected_writes.push(EOT);
        expected_writes.push(EOT);

        let chan = Box::new(MockChannel::new(responses, expected_writes));
        let source = Box::new(MemorySource::new(b"tail".to_vec()));

        run_sender(SenderFsm::new(chan, source)).expect("transfer should succeed");
    }

    #[test]
    fn test_sender_eot_exhaustion() {
        let mut responses = vec![Some(CRC_REQ), Some(ACK)];
        responses.extend(std::iter::repeat(None).take(EOT_ROUNDS as usize));

        let mut expected_writes = Vec::new();
        expected_writes.extend(encode(Mode::Crc, 1, &padded(b"lost", SHORT_BLOCK)));
        expected_writes.extend(std::iter::repeat(EOT).take(EOT_ROUNDS as usize));

        let chan = Box::new(MockChannel::new(responses, expected_writes));
        let source = Box::new(MemorySource::new(b"lost".to_vec()));

        let result = run_sender(SenderFsm::new(chan, source));
        assert!(matches!(result, Err(SenderError::RetriesExhausted)));
    }
}
