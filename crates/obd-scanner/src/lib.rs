//! OBD-II PID Discovery
//!
//! Finds the parameters an ECU answers for, either by asking for its
//! supported-PID bitmap ([`EcuDataService`]) or by probing every PID of a
//! service ([`BruteForceScanner`]), and keeps what was found in a
//! [`PidRegistry`].

mod registry;
mod scanner;
mod service;

pub use registry::PidRegistry;
pub use scanner::{BruteForceScanner, ScanConfig, ScanResult, ScanSummary};
pub use service::{EcuDataService, InitReport, ServiceError};
