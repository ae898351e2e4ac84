//! CAN Frame Model

use crate::error::TransportError;
use std::fmt;
use std::time::Instant;

/// Highest identifier representable in a standard (11-bit) frame
pub const MAX_STANDARD_ID: u32 = 0x7FF;

/// Maximum payload of a classic CAN frame
pub const MAX_DATA_LEN: usize = 8;

/// A standard CAN frame with its receive (or creation) instant.
///
/// Frames are immutable once built. Two frames compare equal when their
/// id and payload match; the timestamp is not part of the identity.
#[derive(Debug, Clone)]
pub struct CanFrame {
    id: u32,
    data: Vec<u8>,
    timestamp: Instant,
}

impl CanFrame {
    /// Create a frame stamped with the current instant
    pub fn new(id: u32, data: &[u8]) -> Result<Self, TransportError> {
        Self::with_timestamp(id, data, Instant::now())
    }

    /// Create a frame with an explicit timestamp
    pub fn with_timestamp(id: u32, data: &[u8], timestamp: Instant) -> Result<Self, TransportError> {
        if id > MAX_STANDARD_ID {
            return Err(TransportError::InvalidId(id));
        }
        if data.len() > MAX_DATA_LEN {
            return Err(TransportError::PayloadTooLong(data.len()));
        }

        Ok(Self {
            id,
            data: data.to_vec(),
            timestamp,
        })
    }

    /// CAN identifier
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Payload bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Data length code
    pub fn dlc(&self) -> usize {
        self.data.len()
    }

    /// When the frame was received (or built)
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }
}

impl PartialEq for CanFrame {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.data == other.data
    }
}

impl Eq for CanFrame {}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03X} [{}]", self.id, self.data.len())?;
        for byte in &self.data {
            write!(f, " {:02X}", byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_extended_id() {
        assert!(matches!(
            CanFrame::new(0x800, &[]),
            Err(TransportError::InvalidId(0x800))
        ));
    }

    #[test]
    fn test_rejects_long_payload() {
        assert!(matches!(
            CanFrame::new(0x123, &[0; 9]),
            Err(TransportError::PayloadTooLong(9))
        ));
    }

    #[test]
    fn test_equality_ignores_timestamp() {
        let a = CanFrame::new(0x7E8, &[0x03, 0x41, 0x0D, 0x32]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = CanFrame::new(0x7E8, &[0x03, 0x41, 0x0D, 0x32]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.timestamp(), b.timestamp());
    }

    #[test]
    fn test_display() {
        let frame = CanFrame::new(0x7DF, &[0x02, 0x01, 0x0C]).unwrap();
        assert_eq!(frame.to_string(), "7DF [3] 02 01 0C");
    }
}
