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

//! XMODEM protocol constants

use std::time::Duration;

/// Start of header - begins a 128-byte data block
pub const SOH: u8 = 0x01;

/// Start of text - begins a 1024-byte data block (XMODEM-1K)
pub const STX: u8 = 0x02;

/// End of transmission - sender signals the payload is finished
pub const EOT: u8 = 0x04;

/// Acknowledge - block accepted
pub const ACK: u8 = 0x06;

/// Negative acknowledge - block rejected, retransmit; also the receiver's
/// checksum-mode greeting
pub const NAK: u8 = 0x15;

/// Cancel - two in a row abort the session
pub const CAN: u8 = 0x18;

/// Padding byte filling out a short final block
pub const SUB: u8 = 0x1A;

/// Letter 'C' - the receiver's CRC-mode greeting
pub const CRC_REQ: u8 = 0x43;

/// Payload bytes in a SOH block
pub const SHORT_BLOCK: usize = 128;

/// Payload bytes in a STX block
pub const LONG_BLOCK: usize = 1024;

/// Errors tolerated on one block before the transfer is cancelled
pub const MAX_ERRORS: u32 = 25;

/// Greeting rounds the receiver spends on each integrity preference
pub const GREETING_ROUNDS: u32 = 10;

/// Receiver wait for an answer to its greeting
pub const GREETING_TIMEOUT: Duration = Duration::from_secs(10);

/// Receiver wait for each byte inside a block
pub const BYTE_TIMEOUT: Duration = Duration::from_secs(2);

/// Rounds the sender spends waiting for the receiver's greeting
pub const PREFERENCE_ROUNDS: u32 = 16;

/// Sender wait per greeting round
pub const PREFERENCE_TIMEOUT: Duration = Duration::from_secs(3);

/// Sender wait for the receiver's verdict on a transmitted block
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Sender wait for the EOT acknowledgement, per attempt
pub const EOT_TIMEOUT: Duration = Duration::from_secs(2);

/// Attempts at the closing EOT handshake
pub const EOT_ROUNDS: u32 = 10;

/// Window in which a second CAN confirms a cancel
pub const CAN_CONFIRM_TIMEOUT: Duration = Duration::from_secs(1);

/// Integrity algorithm negotiated for a session. Decided by the receiver's
/// greeting and fixed for the session's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Classic XMODEM, 8-bit additive checksum
    Checksum,
    /// XMODEM-CRC / XMODEM-1K, 16-bit CRC
    Crc,
}

impl Mode {
    /// Trailer bytes following the payload in this mode
    pub fn trailer_len(self) -> usize {
        match self {
            Mode::Checksum => 1,
            Mode::Crc => 2,
        }
    }
}

/// Strips the trailing SUB padding from an assembled payload.
///
/// The protocol itself delivers whole blocks; trimming is a convention for
/// consumers that know their payload cannot end in a literal 0x1A.
pub fn trim_padding(data: &[u8]) -> &[u8] {
    let end = data
        .iter()
        .rposition(|&b| b != SUB)
        .map_or(0, |last| last + 1);
    &data[..end]
}
