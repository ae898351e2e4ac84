//! OBD-II Service Definitions
//!
//! Addressing, service modes and request/response framing for OBD-II over
//! 11-bit CAN (ISO 15765-4).

use can_slcan::{CanFrame, TransportError};
use serde::{Deserialize, Serialize};

/// Functional (broadcast) request id
pub const REQUEST_ID: u32 = 0x7DF;
/// First ECU response id
pub const RESPONSE_ID_START: u32 = 0x7E8;
/// Last ECU response id
pub const RESPONSE_ID_END: u32 = 0x7EF;
/// Offset added to the service id in a positive response
pub const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;
/// Filler byte for unused request payload positions
pub const PADDING: u8 = 0x55;

/// OBD-II service identifiers (modes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ServiceMode {
    /// Show current data
    CurrentData = 0x01,
    /// Show freeze frame data
    FreezeFrame = 0x02,
    /// Show stored DTCs
    ShowDtc = 0x03,
    /// Clear DTCs and stored values
    ClearDtc = 0x04,
    /// Oxygen sensor monitoring test results (non-CAN only)
    TestResultO2 = 0x05,
    /// Other component/system monitoring test results
    TestResultOther = 0x06,
    /// Show pending DTCs
    ShowPendingDtc = 0x07,
    /// Request vehicle information
    VehicleInfo = 0x09,
    /// Permanent DTCs
    PermanentDtc = 0x0A,
}

impl ServiceMode {
    pub fn as_byte(&self) -> u8 {
        *self as u8
    }

    /// Service for a raw SID byte
    pub fn from_byte(sid: u8) -> Option<Self> {
        match sid {
            0x01 => Some(Self::CurrentData),
            0x02 => Some(Self::FreezeFrame),
            0x03 => Some(Self::ShowDtc),
            0x04 => Some(Self::ClearDtc),
            0x05 => Some(Self::TestResultO2),
            0x06 => Some(Self::TestResultOther),
            0x07 => Some(Self::ShowPendingDtc),
            0x09 => Some(Self::VehicleInfo),
            0x0A => Some(Self::PermanentDtc),
            _ => None,
        }
    }
}

impl Default for ServiceMode {
    fn default() -> Self {
        ServiceMode::CurrentData
    }
}

impl From<ServiceMode> for u8 {
    fn from(mode: ServiceMode) -> Self {
        mode.as_byte()
    }
}

/// Single-frame request `[0x02, SID, PID, 0x55 x5]` to the functional id
pub fn request_frame(sid: u8, pid: u8) -> Result<CanFrame, TransportError> {
    CanFrame::new(REQUEST_ID, &[0x02, sid, pid, PADDING, PADDING, PADDING, PADDING, PADDING])
}

/// Scan probe `[0x02, SID, PID, 0 x5]` to the functional id
pub fn scan_request_frame(sid: u8, pid: u8) -> Result<CanFrame, TransportError> {
    CanFrame::new(REQUEST_ID, &[0x02, sid, pid, 0x00, 0x00, 0x00, 0x00, 0x00])
}

/// Supported PIDs 01-20 (mode 01, PID 00)
pub fn supported_pids_request() -> Result<CanFrame, TransportError> {
    request_frame(ServiceMode::CurrentData.as_byte(), 0x00)
}

/// Vehicle identification number (mode 09, PID 02)
pub fn vin_request() -> Result<CanFrame, TransportError> {
    request_frame(ServiceMode::VehicleInfo.as_byte(), 0x02)
}

/// Whether `frame` is a positive response to the request `(sid, pid)`.
///
/// The expected response SID is computed as `sid + 0x40` without masking to
/// a byte, so requests with SID >= 0xC0 can never match.
pub fn is_response_to(frame: &CanFrame, sid: u8, pid: u8) -> bool {
    let data = frame.data();
    (RESPONSE_ID_START..=RESPONSE_ID_END).contains(&frame.id())
        && data.len() >= 3
        && data[1] as u16 == sid as u16 + POSITIVE_RESPONSE_OFFSET as u16
        && data[2] == pid
}

/// Predicate matching responses to `request`, built from its SID/PID bytes
pub fn response_predicate(request: &CanFrame) -> Option<impl Fn(&CanFrame) -> bool + Send + Sync + 'static> {
    let data = request.data();
    if data.len() < 3 {
        return None;
    }
    let (sid, pid) = (data[1], data[2]);
    Some(move |frame: &CanFrame| is_response_to(frame, sid, pid))
}
