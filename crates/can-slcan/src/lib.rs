//! SLCAN Transport
//!
//! This crate talks to serial CAN-to-USB adapters speaking the SLCAN line
//! protocol. It covers the frame model, the line codec, adapter discovery,
//! the serial transport with its background reader, and the connection
//! manager that ties discovery and connection together.

mod codec;
mod connection;
mod discovery;
mod error;
mod frame;
mod manager;
pub mod mock;
mod serial;

pub use codec::{command, LineBuffer, SlcanCodec};
pub use connection::{FrameDispatcher, FrameListener, FramePredicate, HardwareConnection, ListenerId};
pub use discovery::{auto_connect, candidate_ports, filter_candidates, probe, AdapterProbe, OpenProbe, Platform};
pub use error::TransportError;
pub use frame::{CanFrame, MAX_DATA_LEN, MAX_STANDARD_ID};
pub use manager::{ConnectionManager, ConnectionState};
pub use serial::{SerialConfig, SerialTransport, TransportState, DEFAULT_BAUD_RATE};
