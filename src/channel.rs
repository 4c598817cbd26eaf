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

use std::io;
use std::time::{Duration, Instant};

use serialport::{DataBits, Parity, StopBits};

// ============================================================================
// Channel Trait
// ============================================================================

/// Byte-oriented channel consumed by the protocol engine.
///
/// `read_byte` returns `Ok(None)` once the deadline expires with no data;
/// any other failure is fatal to the session.
pub trait Channel: Send {
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>>;

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;
}

// ============================================================================
// Serial Channel Implementation
// ============================================================================

/// Serial line channel that wraps the serialport crate
pub struct SerialChannel {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialChannel {
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        data_bits: DataBits,
        parity: Parity,
        stop_bits: StopBits,
    ) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(SerialChannel { port })
    }
}

impl Channel for SerialChannel {
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        // The deadline is measured from here; short reads inside the window
        // are retried rather than reported as timeout.
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 1];
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Ok(None);
            }
            self.port
                .set_timeout(left)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            match self.port.read(&mut buf) {
                Ok(0) => continue,
                Ok(_) => return Ok(Some(buf[0])),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.port.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

// ============================================================================
// Mock Channel for Testing
// ============================================================================

#[cfg(test)]
pub struct MockChannel {
    // Byte to return on each read (None = timeout)
    responses: Vec<Option<u8>>,
    read_pos: usize,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
}

#[cfg(test)]
impl MockChannel {
    pub fn new(responses: Vec<Option<u8>>, expected_writes: Vec<u8>) -> Self {
        MockChannel {
            responses,
            read_pos: 0,
            write_log: Vec::new(),
            expected_writes,
        }
    }
}

#[cfg(test)]
impl Channel for MockChannel {
    fn read_byte(&mut self, _timeout: Duration) -> io::Result<Option<u8>> {
        // Out of responses = timeout
        if self.read_pos >= self.responses.len() {
            return Ok(None);
        }
        let byte = self.responses[self.read_pos];
        self.read_pos += 1;
        Ok(byte)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.write_log.extend_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
impl Drop for MockChannel {
    fn drop(&mut self) {
        assert_eq!(
            self.read_pos,
            self.responses.len(),
            "MockChannel dropped with {} unconsumed responses (read {} of {})",
            self.responses.len() - self.read_pos,
            self.read_pos,
            self.responses.len()
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockChannel write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );
    }
}
