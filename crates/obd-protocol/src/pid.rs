//! OBD-II PID Definitions and Supported-PID Bitmaps
//!
//! Defines well-known mode 01 Parameter IDs and decodes the "supported PIDs"
//! bitmap responses.

use serde::{Deserialize, Serialize};

/// Well-known mode 01 PIDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Pid {
    /// Calculated engine load (0x04)
    EngineLoad = 0x04,
    /// Engine coolant temperature (0x05)
    CoolantTemp = 0x05,
    /// Short-term fuel trim bank 1 (0x06)
    ShortFuelTrim = 0x06,
    /// Long-term fuel trim bank 1 (0x07)
    LongFuelTrim = 0x07,
    /// Intake manifold absolute pressure (0x0B)
    IntakeManifoldPressure = 0x0B,
    /// Engine RPM (0x0C)
    Rpm = 0x0C,
    /// Vehicle speed (0x0D)
    Speed = 0x0D,
    /// Mass air flow rate (0x10)
    Maf = 0x10,
    /// Throttle position (0x11)
    ThrottlePosition = 0x11,
    /// Oxygen sensor voltage bank 1, sensor 1 (0x14)
    O2Voltage = 0x14,
}

impl Pid {
    pub const ALL: [Pid; 10] = [
        Pid::EngineLoad,
        Pid::CoolantTemp,
        Pid::ShortFuelTrim,
        Pid::LongFuelTrim,
        Pid::IntakeManifoldPressure,
        Pid::Rpm,
        Pid::Speed,
        Pid::Maf,
        Pid::ThrottlePosition,
        Pid::O2Voltage,
    ];

    /// Get the PID hex value
    pub fn as_hex(&self) -> u8 {
        *self as u8
    }

    /// Well-known PID for a raw PID byte
    pub fn from_hex(pid: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.as_hex() == pid)
    }

    /// Get the number of response bytes for this PID
    pub fn response_bytes(&self) -> usize {
        match self {
            Pid::Rpm | Pid::Maf | Pid::O2Voltage => 2,
            _ => 1,
        }
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Pid::EngineLoad => "Calculated engine load",
            Pid::CoolantTemp => "Engine coolant temperature",
            Pid::ShortFuelTrim => "Short term fuel trim (bank 1)",
            Pid::LongFuelTrim => "Long term fuel trim (bank 1)",
            Pid::IntakeManifoldPressure => "Intake manifold absolute pressure",
            Pid::Rpm => "Engine speed",
            Pid::Speed => "Vehicle speed",
            Pid::Maf => "Mass air flow rate",
            Pid::ThrottlePosition => "Throttle position",
            Pid::O2Voltage => "Oxygen sensor 1 voltage",
        }
    }

    /// Formula over the response bytes A, B, ...
    pub fn formula(&self) -> &'static str {
        match self {
            Pid::EngineLoad | Pid::ThrottlePosition => "A/2.55",
            Pid::CoolantTemp => "A-40",
            Pid::ShortFuelTrim | Pid::LongFuelTrim => "(A-128)*100/128",
            Pid::IntakeManifoldPressure | Pid::Speed => "A",
            Pid::Rpm => "(A*256+B)/4",
            Pid::Maf => "(A*256+B)/100",
            Pid::O2Voltage => "A/200",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Pid::EngineLoad | Pid::ThrottlePosition | Pid::ShortFuelTrim | Pid::LongFuelTrim => "%",
            Pid::CoolantTemp => "°C",
            Pid::IntakeManifoldPressure => "kPa",
            Pid::Rpm => "rpm",
            Pid::Speed => "km/h",
            Pid::Maf => "g/s",
            Pid::O2Voltage => "V",
        }
    }
}

/// Decode a supported-PIDs response `[len, 0x41, base, A, B, C, D, ...]`.
///
/// The MSB of A stands for PID `base + 1`, the LSB of D for `base + 32`.
/// Responses shorter than 7 bytes yield an empty list.
pub fn parse_supported_pids(data: &[u8]) -> Vec<u8> {
    if data.len() < 7 {
        return Vec::new();
    }

    let base = data[2] as u16;
    let mut pids = Vec::new();

    for (byte_index, mask) in data[3..7].iter().enumerate() {
        for bit_index in 0..8 {
            if mask & (0x80 >> bit_index) != 0 {
                let pid = base + (byte_index * 8 + bit_index) as u16 + 1;
                if pid <= u8::MAX as u16 {
                    pids.push(pid as u8);
                }
            }
        }
    }

    pids
}
