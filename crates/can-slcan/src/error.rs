//! Transport Error Types

use thiserror::Error;

/// Errors raised by the frame model and the serial transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// CAN identifier does not fit in 11 bits
    #[error("CAN id {0:#X} exceeds the standard 11-bit range")]
    InvalidId(u32),

    /// Payload longer than a classic CAN frame allows
    #[error("CAN payload of {0} bytes exceeds the 8-byte maximum")]
    PayloadTooLong(usize),

    /// Serial port could not be opened or configured
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// Write did not complete within the configured window
    #[error("Write to serial port timed out after {0}ms")]
    WriteTimeout(u64),

    /// Connection was closed while an operation was in flight
    #[error("Connection closed")]
    ConnectionClosed,

    /// I/O failure on an open port
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_serial::Error> for TransportError {
    fn from(err: tokio_serial::Error) -> Self {
        TransportError::SerialError(err.to_string())
    }
}
