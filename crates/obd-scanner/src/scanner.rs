//! Brute-Force PID Scanner
//!
//! Probes every PID (0x00..=0xFF) of each configured service and records the
//! ones the ECU answers. Probes are strictly sequential and paced so the bus
//! is never flooded.

use crate::registry::PidRegistry;
use can_slcan::CanFrame;
use metrics::counter;
use obd_protocol::{is_response_to, scan_request_frame, ObdClient, ObdError, RequestOutcome, ServiceMode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use storage::DEFAULT_VIN;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Bytes in a response ahead of the data: length, SID+0x40, PID
const RESPONSE_HEADER_LEN: usize = 3;

/// Configuration for the brute-force scanner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Services to scan, in order
    pub service_ids: Vec<u8>,
    /// How long to wait for each probe's answer
    pub request_timeout_ms: u64,
    /// Delay after every probe
    pub pacing_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            service_ids: vec![ServiceMode::CurrentData.as_byte()],
            request_timeout_ms: 100,
            pacing_ms: 15,
        }
    }
}

impl ScanConfig {
    /// Per-probe response window
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

/// A probe the ECU answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub service_id: u8,
    pub parameter_id: u8,
    /// Full response payload, header included
    pub raw_data: Vec<u8>,
    pub supported: bool,
}

impl ScanResult {
    fn from_response(service_id: u8, parameter_id: u8, frame: &CanFrame) -> Self {
        Self {
            service_id,
            parameter_id,
            raw_data: frame.data().to_vec(),
            supported: true,
        }
    }

    /// Data bytes after the response header
    pub fn data_length(&self) -> usize {
        self.raw_data.len().saturating_sub(RESPONSE_HEADER_LEN)
    }
}

/// Totals for one scan run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Probes sent
    pub probed: usize,
    /// Probes answered
    pub found: usize,
    /// Whether the scan stopped early on cancellation
    pub cancelled: bool,
}

/// Sequential brute-force scanner
pub struct BruteForceScanner {
    client: ObdClient,
    registry: Arc<PidRegistry>,
    config: ScanConfig,
    vehicle_id: String,
}

impl BruteForceScanner {
    /// Scanner registering hits in `registry`
    pub fn new(client: ObdClient, registry: Arc<PidRegistry>, config: ScanConfig) -> Self {
        Self {
            client,
            registry,
            config,
            vehicle_id: DEFAULT_VIN.to_string(),
        }
    }

    /// Vehicle the discovered PIDs are attributed to
    pub fn with_vehicle_id(mut self, vehicle_id: impl Into<String>) -> Self {
        self.vehicle_id = vehicle_id.into();
        self
    }

    /// Active scan settings
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Scan every configured service.
    ///
    /// Each hit is registered and then passed to `on_found`. Connection loss
    /// aborts the scan with an error; cancellation stops it between probes
    /// and is reported in the summary.
    pub async fn scan<F>(&self, mut on_found: F, cancel: &CancellationToken) -> Result<ScanSummary, ObdError>
    where
        F: FnMut(&ScanResult),
    {
        let mut summary = ScanSummary::default();

        'services: for &sid in &self.config.service_ids {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            info!("Brute-force scanning SID {:02X}", sid);

            for pid in 0..=u8::MAX {
                if cancel.is_cancelled() {
                    summary.cancelled = true;
                    break 'services;
                }

                summary.probed += 1;
                match self.probe(sid, pid, cancel).await? {
                    RequestOutcome::Matched(frame) => {
                        let result = ScanResult::from_response(sid, pid, &frame);
                        summary.found += 1;
                        counter!("obd_scan_pids_found_total").increment(1);
                        info!("Found SID {:02X} PID {:02X} ({} data bytes)", sid, pid, result.data_length());

                        self.registry.register(sid, pid, result.data_length(), &self.vehicle_id);
                        on_found(&result);
                    }
                    RequestOutcome::TimedOut => {}
                    RequestOutcome::Cancelled => {
                        summary.cancelled = true;
                        break 'services;
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(self.config.pacing()) => {}
                    _ = cancel.cancelled() => {
                        summary.cancelled = true;
                        break 'services;
                    }
                }
            }
        }

        info!(
            "Scan finished: {} probed, {} found{}",
            summary.probed,
            summary.found,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        Ok(summary)
    }

    async fn probe(&self, sid: u8, pid: u8, cancel: &CancellationToken) -> Result<RequestOutcome, ObdError> {
        let request = scan_request_frame(sid, pid)?;
        debug!("Probing SID {:02X} PID {:02X}", sid, pid);
        self.client
            .request_once(
                &request,
                move |frame| is_response_to(frame, sid, pid),
                self.config.request_timeout(),
                cancel,
            )
            .await
    }
}
