//! Parameter definitions
//!
//! A [`ParameterDefinition`] describes how to request and decode one
//! (service, PID) pair for a given vehicle.

use crate::error::ObdError;
use crate::formula;
use crate::pid::Pid;
use crate::protocol::ServiceMode;
use serde::{Deserialize, Serialize};

/// Formula used for parameters nobody has described yet
pub const DEFAULT_FORMULA: &str = "A";

/// Description attached to parameters found by the brute-force scan
pub const SCAN_DESCRIPTION: &str = "Auto-detected via brute-force scan";

/// How to request and decode a single ECU parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    /// `"SID-PID"` in uppercase hex, e.g. `"01-0C"`
    pub key: String,
    pub name: String,
    pub vehicle_id: String,
    pub service_id: u8,
    pub parameter_id: u8,
    /// Data bytes following the PID in a response
    pub bytes_returned: usize,
    pub formula: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub description: String,
}

impl ParameterDefinition {
    /// Registry key for a (service, PID) pair
    pub fn key(service_id: u8, parameter_id: u8) -> String {
        format!("{:02X}-{:02X}", service_id, parameter_id)
    }

    /// Placeholder for a PID seen on the bus but not described anywhere
    pub fn unknown(service_id: u8, parameter_id: u8, bytes_returned: usize, vehicle_id: &str) -> Self {
        Self {
            key: Self::key(service_id, parameter_id),
            name: format!("Unknown PID {:02X} (SID:{:02X})", parameter_id, service_id),
            vehicle_id: vehicle_id.to_string(),
            service_id,
            parameter_id,
            bytes_returned,
            formula: DEFAULT_FORMULA.to_string(),
            unit: String::new(),
            description: String::new(),
        }
    }

    /// Definition of a well-known mode 01 PID
    pub fn well_known(pid: Pid, vehicle_id: &str) -> Self {
        let service_id = ServiceMode::CurrentData.as_byte();
        Self {
            key: Self::key(service_id, pid.as_hex()),
            name: pid.name().to_string(),
            vehicle_id: vehicle_id.to_string(),
            service_id,
            parameter_id: pid.as_hex(),
            bytes_returned: pid.response_bytes(),
            formula: pid.formula().to_string(),
            unit: pid.unit().to_string(),
            description: String::new(),
        }
    }

    /// Decode the data bytes following the PID.
    ///
    /// An empty formula falls back to [`DEFAULT_FORMULA`].
    pub fn calculate(&self, data: &[u8]) -> Result<f64, ObdError> {
        if data.len() < self.bytes_returned {
            return Err(ObdError::InvalidResponse(format!(
                "{} expects {} bytes, got {}",
                self.key,
                self.bytes_returned,
                data.len()
            )));
        }

        let formula = if self.formula.trim().is_empty() {
            DEFAULT_FORMULA
        } else {
            self.formula.as_str()
        };
        formula::evaluate(formula, data)
    }

    /// Decode a full response frame payload `[len, SID+0x40, PID, data...]`
    pub fn calculate_response(&self, payload: &[u8]) -> Result<f64, ObdError> {
        if payload.len() < 3 {
            return Err(ObdError::InvalidResponse(format!("response too short: {} bytes", payload.len())));
        }
        let end = (payload[0] as usize + 1).clamp(3, payload.len());
        self.calculate(&payload[3..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        assert_eq!(ParameterDefinition::key(0x01, 0x0C), "01-0C");
        assert_eq!(ParameterDefinition::key(0x22, 0xAB), "22-AB");
    }

    #[test]
    fn test_unknown_definition() {
        let def = ParameterDefinition::unknown(0x01, 0x5C, 1, "VIN1");
        assert_eq!(def.key, "01-5C");
        assert_eq!(def.name, "Unknown PID 5C (SID:01)");
        assert_eq!(def.formula, "A");
        assert_eq!(def.vehicle_id, "VIN1");
    }

    #[test]
    fn test_rpm_calculation() {
        let rpm = ParameterDefinition::well_known(Pid::Rpm, "VIN1");
        assert_eq!(rpm.key, "01-0C");
        assert_eq!(rpm.calculate(&[0x1A, 0x2B]).unwrap(), 1674.75);
        // Full frame: [len, 0x41, 0x0C, A, B, padding]
        assert_eq!(rpm.calculate_response(&[0x04, 0x41, 0x0C, 0x1A, 0x2B, 0x55]).unwrap(), 1674.75);
    }

    #[test]
    fn test_coolant_and_load() {
        let coolant = ParameterDefinition::well_known(Pid::CoolantTemp, "VIN1");
        assert_eq!(coolant.calculate(&[0x7B]).unwrap(), 83.0);

        let load = ParameterDefinition::well_known(Pid::EngineLoad, "VIN1");
        assert!((load.calculate(&[0xFF]).unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_default_and_short_data() {
        let mut def = ParameterDefinition::unknown(0x01, 0x42, 1, "VIN1");
        def.formula.clear();
        assert_eq!(def.calculate(&[0x2A]).unwrap(), 42.0);

        def.bytes_returned = 2;
        assert!(def.calculate(&[0x2A]).is_err());
    }

    #[test]
    fn test_serde_defaults() {
        let json = r#"{"key":"01-0D","name":"Speed","vehicle_id":"V","service_id":1,
            "parameter_id":13,"bytes_returned":1,"formula":"A"}"#;
        let def: ParameterDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.unit, "");
        assert_eq!(def.calculate(&[88]).unwrap(), 88.0);
    }
}
