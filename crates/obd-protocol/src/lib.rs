//! OBD-II Protocol Implementation
//!
//! This crate speaks OBD-II over 11-bit CAN through any
//! [`HardwareConnection`](can_slcan::HardwareConnection): it builds
//! functional requests, correlates them with ECU responses, decodes the
//! supported-PID bitmap and evaluates parameter formulas.

mod client;
mod error;
mod formula;
mod parameter;
mod pid;
mod protocol;

pub use client::{ObdClient, RequestOutcome, DEFAULT_TIMEOUT_MS};
pub use error::ObdError;
pub use formula::evaluate;
pub use parameter::{ParameterDefinition, DEFAULT_FORMULA, SCAN_DESCRIPTION};
pub use pid::{parse_supported_pids, Pid};
pub use protocol::{
    is_response_to, request_frame, response_predicate, scan_request_frame, supported_pids_request, vin_request,
    ServiceMode, PADDING, POSITIVE_RESPONSE_OFFSET, REQUEST_ID, RESPONSE_ID_END, RESPONSE_ID_START,
};
