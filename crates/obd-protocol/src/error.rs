//! OBD-II Error Types

use can_slcan::TransportError;
use thiserror::Error;

/// Errors that can occur during OBD-II communication
///
/// A request that simply goes unanswered is not an error; it resolves to
/// [`RequestOutcome::TimedOut`](crate::RequestOutcome::TimedOut).
#[derive(Debug, Error)]
pub enum ObdError {
    /// Transport failed while sending
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// No open connection to send the request on
    #[error("Hardware connection is not established")]
    NotConnected,

    /// Connection was closed while waiting for a response
    #[error("Connection closed while waiting for a response")]
    ConnectionClosed,

    /// Request payload is malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Response could not be interpreted
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Parameter formula could not be evaluated
    #[error("Invalid formula: {0}")]
    InvalidFormula(String),
}
