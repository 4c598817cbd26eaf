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

//! Framing and deframing of data blocks.
//!
//! On the wire a block is `start, seq, !seq, payload, trailer` where the
//! start byte fixes the payload length (SOH = 128, STX = 1024) and the
//! session mode fixes the trailer (one checksum byte or two CRC bytes,
//! high then low).

use thiserror::Error;

use crate::integrity::{checksum, crc16};
use crate::protocol::{Mode, LONG_BLOCK, SHORT_BLOCK, SOH, STX};

/// A deframed, validated data block
#[derive(Debug, PartialEq, Eq)]
pub struct Frame {
    pub seq: u8,
    pub payload: Vec<u8>,
}

/// Reasons a received frame fails validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("short frame: {0} bytes")]
    Truncated(usize),

    #[error("sequence complement mismatch: seq {seq:#04x}, complement {complement:#04x}")]
    Complement { seq: u8, complement: u8 },

    #[error("integrity check failed")]
    Integrity,
}

/// Frames one payload block for the wire. The start byte is chosen by the
/// block length, the trailer by the session mode.
pub fn encode(mode: Mode, seq: u8, block: &[u8]) -> Vec<u8> {
    debug_assert!(block.len() == SHORT_BLOCK || block.len() == LONG_BLOCK);

    let mut wire = Vec::with_capacity(3 + block.len() + mode.trailer_len());
    wire.push(if block.len() == LONG_BLOCK { STX } else { SOH });
    wire.push(seq);
    wire.push(!seq);
    wire.extend_from_slice(block);
    match mode {
        Mode::Checksum => wire.push(checksum(block)),
        Mode::Crc => wire.extend_from_slice(&crc16(block).to_be_bytes()),
    }
    wire
}

/// Validates the bytes that follow a start byte: sequence pair, payload and
/// trailer. `raw` must hold exactly `2 + block_size + trailer` bytes.
pub fn decode(mode: Mode, block_size: usize, raw: &[u8]) -> Result<Frame, FrameError> {
    if raw.len() != 2 + block_size + mode.trailer_len() {
        return Err(FrameError::Truncated(raw.len()));
    }

    let seq = raw[0];
    let complement = raw[1];
    if complement != !seq {
        return Err(FrameError::Complement { seq, complement });
    }

    let payload = &raw[2..2 + block_size];
    let trailer = &raw[2 + block_size..];
    let good = match mode {
        Mode::Checksum => trailer[0] == checksum(payload),
        Mode::Crc => {
            let crc = crc16(payload).to_be_bytes();
            trailer[0] == crc[0] && trailer[1] == crc[1]
        }
    };
    if !good {
        return Err(FrameError::Integrity);
    }

    Ok(Frame {
        seq,
        payload: payload.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SUB;

    #[test]
    fn test_encode_checksum_layout() {
        let mut block = b"HELLO".to_vec();
        block.resize(SHORT_BLOCK, SUB);

        let wire = encode(Mode::Checksum, 1, &block);
        assert_eq!(wire.len(), 3 + 128 + 1);
        assert_eq!(wire[0], SOH);
        assert_eq!(wire[1], 0x01);
        assert_eq!(wire[2], 0xFE);
        assert_eq!(&wire[3..8], b"HELLO");
        assert_eq!(wire[130], SUB);
        assert_eq!(wire[131], checksum(&block));
    }

    #[test]
    fn test_encode_crc_layout() {
        let block = [0xAA; LONG_BLOCK];

        let wire = encode(Mode::Crc, 3, &block);
        assert_eq!(wire.len(), 3 + 1024 + 2);
        assert_eq!(wire[0], STX);
        assert_eq!(wire[1], 0x03);
        assert_eq!(wire[2], 0xFC);
        let crc = crc16(&block);
        assert_eq!(wire[1027], (crc >> 8) as u8);
        assert_eq!(wire[1028], (crc & 0xFF) as u8);
    }

    #[test]
    fn test_decode_roundtrip() {
        let block = [0x42; SHORT_BLOCK];
        let wire = encode(Mode::Crc, 7, &block);

        let frame = decode(Mode::Crc, SHORT_BLOCK, &wire[1..]).expect("valid frame");
        assert_eq!(frame.seq, 7);
        assert_eq!(frame.payload, block);
    }

    #[test]
    fn test_decode_rejects_bad_complement() {
        let block = [0; SHORT_BLOCK];
        let mut wire = encode(Mode::Crc, 2, &block);
        wire[2] = 0x00;

        assert_eq!(
            decode(Mode::Crc, SHORT_BLOCK, &wire[1..]),
            Err(FrameError::Complement {
                seq: 2,
                complement: 0
            })
        );
    }

    #[test]
    fn test_decode_rejects_corrupt_payload() {
        let block = [0x11; SHORT_BLOCK];
        let mut wire = encode(Mode::Crc, 1, &block);
        wire[40] ^= 0x80;

        assert_eq!(
            decode(Mode::Crc, SHORT_BLOCK, &wire[1..]),
            Err(FrameError::Integrity)
        );
    }

    #[test]
    fn test_decode_rejects_corrupt_checksum() {
        let block = [0x11; SHORT_BLOCK];
        let mut wire = encode(Mode::Checksum, 1, &block);
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;

        assert_eq!(
            decode(Mode::Checksum, SHORT_BLOCK, &wire[1..]),
            Err(FrameError::Integrity)
        );
    }

    #[test]
    fn test_decode_rejects_short_frame() {
        assert_eq!(
            decode(Mode::Crc, SHORT_BLOCK, &[0x01, 0xFE]),
            Err(FrameError::Truncated(2))
        );
    }
}
