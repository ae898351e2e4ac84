//! Adapter Port Discovery
//!
//! Enumerates serial ports, narrows them to the names an adapter can show
//! up under on the current OS, and probes each candidate in turn.

use crate::connection::HardwareConnection;
use crate::serial::{open_port, DEFAULT_BAUD_RATE};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Timeout used when probing a candidate port
const PROBE_TIMEOUT_MS: u64 = 500;

/// Host operating system family, as far as port naming is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
    Unknown,
}

impl Platform {
    /// Platform this binary was built for
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Unknown
        }
    }

    /// Whether a port name looks like a USB serial adapter on this platform
    pub fn accepts(&self, port: &str) -> bool {
        match self {
            Platform::Windows => port.starts_with("COM"),
            // USB adapters appear as a dial-in `/dev/tty.usb*` and a call-out
            // `/dev/cu.usb*` node. A `/dev/tty.cu*` name is not accepted.
            Platform::MacOs => port.starts_with("/dev/tty.usb") || port.starts_with("/dev/cu.usb"),
            Platform::Linux => port.starts_with("/dev/ttyUSB") || port.starts_with("/dev/ttyACM"),
            Platform::Unknown => true,
        }
    }
}

/// Keep the ports that match the platform's naming, in enumeration order
pub fn filter_candidates<I>(platform: Platform, ports: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    ports.into_iter().filter(|p| platform.accepts(p)).collect()
}

/// Candidate adapter ports visible to the OS right now
pub fn candidate_ports() -> Vec<String> {
    let ports = match tokio_serial::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name),
        Err(e) => {
            warn!("Failed to enumerate serial ports: {}", e);
            return Vec::new();
        }
    };

    let platform = Platform::current();
    let candidates = filter_candidates(platform, ports);
    debug!("Enumerated {} candidate ports on {:?}", candidates.len(), platform);
    candidates
}

/// Decides whether a port carries the target adapter
///
/// The default [`OpenProbe`] only checks that the port opens. A handshake
/// based probe can be plugged in here.
#[async_trait]
pub trait AdapterProbe: Send + Sync {
    /// Whether `port` carries an adapter
    async fn probe(&self, port: &str) -> bool;
}

/// Probe that accepts any port it can open
#[derive(Debug, Clone)]
pub struct OpenProbe {
    pub baud_rate: u32,
    pub timeout: Duration,
}

impl Default for OpenProbe {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: Duration::from_millis(PROBE_TIMEOUT_MS),
        }
    }
}

#[async_trait]
impl AdapterProbe for OpenProbe {
    async fn probe(&self, port: &str) -> bool {
        match open_port(port, self.baud_rate, self.timeout) {
            // Dropping the stream closes the port again
            Ok(_stream) => true,
            Err(e) => {
                debug!("Probe of {} failed: {}", port, e);
                false
            }
        }
    }
}

/// Probe a port with the default open check
pub async fn probe(port: &str) -> bool {
    OpenProbe::default().probe(port).await
}

/// Try each candidate in order and return the first connection that comes up.
///
/// `make_connection` builds a fresh, unconnected transport for each attempt.
/// Cancellation is observed between candidates. Running out of candidates is
/// a normal result (`None`).
pub async fn auto_connect<F>(
    candidates: Vec<String>,
    prober: &dyn AdapterProbe,
    make_connection: F,
    cancel: &CancellationToken,
) -> Option<Arc<dyn HardwareConnection>>
where
    F: Fn() -> Arc<dyn HardwareConnection> + Send + Sync,
{
    for port in candidates {
        if cancel.is_cancelled() {
            info!("Adapter discovery cancelled");
            return None;
        }

        if !prober.probe(&port).await {
            continue;
        }

        let connection = make_connection();
        let connected = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Adapter discovery cancelled during connect");
                return None;
            }
            connected = connection.connect(&port) => connected,
        };

        if connected {
            info!("Device found and connected on {}", port);
            return Some(connection);
        }
    }

    info!("No compatible adapter found");
    None
}
