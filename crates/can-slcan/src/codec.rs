//! SLCAN Line Codec
//!
//! Maps between [`CanFrame`] and the SLCAN ASCII line format used by
//! CAN-to-USB adapters:
//!
//! ```text
//! t<ID:3hex><DLC:1hex><DATA:2hex*DLC>\r
//! ```
//!
//! Only standard (11-bit) data frames are handled. Decoding never fails
//! loudly: anything that is not a well-formed `t` line yields `None`.

use crate::frame::{CanFrame, MAX_DATA_LEN};
use std::time::Instant;

/// Line terminator used by SLCAN
pub const TERMINATOR: char = '\r';

/// Bus control commands sent during adapter initialization
pub mod command {
    /// Close the CAN channel (enter configuration mode)
    pub const CLOSE: &str = "C\r";
    /// Select 500 kbit/s bitrate
    pub const BITRATE_500K: &str = "S5\r";
    /// Open the CAN channel
    pub const OPEN: &str = "O\r";
}

/// Offset of the first payload character in a `t` line
const DATA_OFFSET: usize = 5;

/// Longest line kept while waiting for a terminator
const DEFAULT_MAX_LINE: usize = 64;

/// SLCAN codec
pub struct SlcanCodec;

impl SlcanCodec {
    /// Encode a frame to its SLCAN line, including the trailing `\r`.
    ///
    /// `CanFrame` cannot hold an id above 0x7FF or more than 8 bytes, so
    /// every frame has a valid encoding.
    pub fn encode(frame: &CanFrame) -> String {
        let mut line = String::with_capacity(DATA_OFFSET + frame.dlc() * 2 + 1);
        line.push('t');
        line.push_str(&format!("{:03X}", frame.id()));
        line.push_str(&format!("{:X}", frame.dlc()));
        for byte in frame.data() {
            line.push_str(&format!("{:02X}", byte));
        }
        line.push(TERMINATOR);
        line
    }

    /// Decode a received line, stamping the frame with the current instant
    pub fn decode(line: &str) -> Option<CanFrame> {
        Self::decode_at(line, Instant::now())
    }

    /// Decode a received line with an explicit receive instant
    pub fn decode_at(line: &str, received: Instant) -> Option<CanFrame> {
        let line = line.trim();
        let bytes = line.as_bytes();

        if bytes.len() < DATA_OFFSET || bytes[0] != b't' {
            return None;
        }

        let mut id = 0u32;
        for &c in &bytes[1..4] {
            id = (id << 4) | hex_value(c)? as u32;
        }

        let len = hex_value(bytes[4])? as usize;
        if len > MAX_DATA_LEN || bytes.len() < DATA_OFFSET + len * 2 {
            return None;
        }

        let mut data = Vec::with_capacity(len);
        for i in 0..len {
            let at = DATA_OFFSET + i * 2;
            let hi = hex_value(bytes[at])?;
            let lo = hex_value(bytes[at + 1])?;
            data.push((hi << 4) | lo);
        }

        CanFrame::with_timestamp(id, &data, received).ok()
    }
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

/// Splits a raw serial byte stream into lines.
///
/// Lines end at `\r` or `\n`; empty lines are skipped. An incomplete tail is
/// kept until more bytes arrive. A run of bytes longer than the line limit
/// without any terminator is discarded.
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    max_line: usize,
    discarded: u64,
}

impl LineBuffer {
    /// Buffer with the default line limit
    pub fn new() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE)
    }

    /// Buffer discarding unterminated runs longer than `max_line` bytes
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: Vec::with_capacity(max_line),
            max_line,
            discarded: 0,
        }
    }

    /// Feed bytes read from the port, returning every line they complete
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &b in bytes {
            match b {
                b'\r' | b'\n' => {
                    if !self.pending.is_empty() {
                        lines.push(String::from_utf8_lossy(&self.pending).into_owned());
                        self.pending.clear();
                    }
                }
                _ => {
                    if self.pending.len() >= self.max_line {
                        self.discarded += self.pending.len() as u64;
                        self.pending.clear();
                    }
                    self.pending.push(b);
                }
            }
        }

        lines
    }

    /// Bytes currently waiting for a terminator
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Total bytes dropped because a line grew past the limit
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Drop the incomplete tail
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}
