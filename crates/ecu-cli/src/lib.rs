//! ECU Diagnostics Front End
//!
//! Wires configuration, logging, the connection manager, the PID registry and
//! the parameter store into one [`EcuContext`] that the commands run against.

pub mod config;

use anyhow::Result;
use can_slcan::{ConnectionManager, HardwareConnection};
use obd_protocol::{ObdClient, ParameterDefinition};
use obd_scanner::{BruteForceScanner, EcuDataService, InitReport, PidRegistry, ScanConfig, ScanResult, ScanSummary};
use std::sync::Arc;
use storage::{ParameterStore, Repository, StorageError, DEFAULT_VIN};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::{AppConfig, LoggingConfig};

/// Initialize logging
pub fn init_logging(config: &LoggingConfig, verbose: bool) {
    let level = if verbose {
        Level::DEBUG
    } else {
        config.level.parse().unwrap_or(Level::INFO)
    };
    let builder = FmtSubscriber::builder().with_max_level(level).with_target(true);

    let result = if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    if let Err(e) = result {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Result of the `init` command
#[derive(Debug, Clone)]
pub struct InitOutput {
    pub report: InitReport,
    pub parameters: Vec<ParameterDefinition>,
}

/// Everything a command needs, created once at startup
pub struct EcuContext {
    pub config: AppConfig,
    pub manager: ConnectionManager,
    pub registry: Arc<PidRegistry>,
    pub store: Arc<dyn ParameterStore>,
}

impl EcuContext {
    /// Context for real adapters with the JSON store from the configuration
    pub fn new(config: AppConfig) -> Result<Self, StorageError> {
        let store = Arc::new(Repository::open(&config.storage.path)?);
        let manager = ConnectionManager::new(config.serial.clone());
        Ok(Self::with_parts(config, manager, store))
    }

    /// Context over an injected manager and store
    pub fn with_parts(config: AppConfig, manager: ConnectionManager, store: Arc<dyn ParameterStore>) -> Self {
        Self {
            config,
            manager,
            registry: Arc::new(PidRegistry::new()),
            store,
        }
    }

    /// Connect to the configured port, or discover one
    pub async fn connect(&self, cancel: &CancellationToken) -> Option<Arc<dyn HardwareConnection>> {
        match &self.config.serial.port {
            Some(port) => self.manager.connect_to(port, cancel).await,
            None => self.manager.auto_connect(cancel).await,
        }
    }

    /// Identify the vehicle and seed the store with its supported PIDs.
    ///
    /// `None` when no adapter could be connected.
    pub async fn initialize(&self, cancel: &CancellationToken) -> Result<Option<InitOutput>> {
        let Some(connection) = self.connect(cancel).await else {
            return Ok(None);
        };

        let mut service = EcuDataService::new(ObdClient::new(connection), self.store.clone());
        let result = service.initialize(cancel).await;
        self.manager.disconnect().await;

        let report = result?;
        Ok(Some(InitOutput {
            report,
            parameters: service.parameters().to_vec(),
        }))
    }

    /// Brute-force scan `service_ids` (or the configured services), refine
    /// hits that have a well-known definition and save them for the vehicle.
    ///
    /// Hits found before a mid-scan failure are still saved.
    ///
    /// `None` when no adapter could be connected.
    pub async fn scan<F>(
        &self,
        service_ids: Option<Vec<u8>>,
        on_found: F,
        cancel: &CancellationToken,
    ) -> Result<Option<ScanSummary>>
    where
        F: FnMut(&ScanResult),
    {
        let Some(connection) = self.connect(cancel).await else {
            return Ok(None);
        };

        let client = ObdClient::new(connection);
        let result = self.scan_with(client, service_ids, on_found, cancel).await;
        self.manager.disconnect().await;
        result.map(Some)
    }

    async fn scan_with<F>(
        &self,
        client: ObdClient,
        service_ids: Option<Vec<u8>>,
        on_found: F,
        cancel: &CancellationToken,
    ) -> Result<ScanSummary>
    where
        F: FnMut(&ScanResult),
    {
        let vehicle_id = match client.read_vin(cancel).await? {
            Some(vin) => vin,
            None => {
                warn!("No VIN response, attributing scan results to {}", DEFAULT_VIN);
                DEFAULT_VIN.to_string()
            }
        };

        let config = ScanConfig {
            service_ids: service_ids.unwrap_or_else(|| self.config.scan.service_ids.clone()),
            ..self.config.scan.clone()
        };
        let scanner = BruteForceScanner::new(client.clone(), self.registry.clone(), config)
            .with_vehicle_id(vehicle_id.clone());
        let scanned = scanner.scan(on_found, cancel).await;

        let refined = self.registry.apply_well_known(&vehicle_id);
        let mut service = EcuDataService::new(client, self.store.clone());
        service.set_vehicle_id(vehicle_id);
        let saved = service.save_registry(&self.registry)?;
        info!(
            "Saved {} scanned parameters ({} well-known) for {}",
            saved,
            refined,
            service.vehicle_id()
        );

        Ok(scanned?)
    }

    /// Stored definitions for `vehicle_id`, or for every vehicle
    pub fn parameters(&self, vehicle_id: Option<&str>) -> Result<Vec<ParameterDefinition>, StorageError> {
        match vehicle_id {
            Some(vehicle_id) => self.store.get_all(vehicle_id),
            None => {
                let mut all = Vec::new();
                for vehicle in self.store.vehicles()? {
                    all.extend(self.store.get_all(&vehicle)?);
                }
                Ok(all)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use can_slcan::mock::MockConnection;
    use can_slcan::{AdapterProbe, CanFrame};

    struct AcceptAll;

    #[async_trait]
    impl AdapterProbe for AcceptAll {
        async fn probe(&self, _port: &str) -> bool {
            true
        }
    }

    fn frame(id: u32, data: &[u8]) -> CanFrame {
        CanFrame::new(id, data).unwrap()
    }

    /// Context whose "adapter" is a simulated ECU without a VIN that reports
    /// PIDs 0C and 0D and answers scans for 0C only
    fn context() -> EcuContext {
        let manager = ConnectionManager::with_parts(
            AcceptAll,
            || {
                let mock = MockConnection::disconnected();
                mock.set_responder(|request| match (request.data()[1], request.data()[2]) {
                    (0x01, 0x00) => vec![frame(0x7E8, &[0x06, 0x41, 0x00, 0x00, 0x18, 0x00, 0x00])],
                    (0x01, 0x0C) => vec![frame(0x7E8, &[0x04, 0x41, 0x0C, 0x1A, 0xF8])],
                    _ => Vec::new(),
                });
                Arc::new(mock) as Arc<dyn HardwareConnection>
            },
            || vec!["/dev/ttyUSB0".to_string()],
        );
        EcuContext::with_parts(AppConfig::default(), manager, Arc::new(Repository::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_seeds_store() {
        let ctx = context();
        let output = ctx.initialize(&CancellationToken::new()).await.unwrap().unwrap();

        assert_eq!(output.report.vehicle_id, DEFAULT_VIN);
        assert_eq!(output.report.registered, 2);
        assert_eq!(output.parameters.len(), 2);
        assert_eq!(ctx.parameters(Some(DEFAULT_VIN)).unwrap().len(), 2);
        assert!(ctx.manager.current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_persists_hits() {
        let ctx = context();
        let mut hits = Vec::new();

        let summary = ctx
            .scan(Some(vec![0x01]), |r| hits.push(r.parameter_id), &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(summary.found, 1);
        assert_eq!(hits, vec![0x0C]);
        let stored = ctx.parameters(None).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].key, "01-0C");
        assert_eq!(stored[0].bytes_returned, 2);
        assert_eq!(stored[0].name, "Engine speed");
        assert_eq!(stored[0].formula, "(A*256+B)/4");
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_failure_still_persists_earlier_hits() {
        // The adapter drops off the bus while PID 0D is being probed
        let manager = ConnectionManager::with_parts(
            AcceptAll,
            || {
                let mock = Arc::new(MockConnection::disconnected());
                let unplug = Arc::downgrade(&mock);
                mock.set_responder(move |request| match (request.data()[1], request.data()[2]) {
                    (0x01, 0x0C) => vec![frame(0x7E8, &[0x04, 0x41, 0x0C, 0x1A, 0xF8])],
                    (0x01, 0x0D) => {
                        if let Some(mock) = unplug.upgrade() {
                            mock.set_connected(false);
                        }
                        Vec::new()
                    }
                    _ => Vec::new(),
                });
                mock as Arc<dyn HardwareConnection>
            },
            || vec!["/dev/ttyUSB0".to_string()],
        );
        let ctx = EcuContext::with_parts(AppConfig::default(), manager, Arc::new(Repository::new()));

        let result = ctx.scan(Some(vec![0x01]), |_| {}, &CancellationToken::new()).await;
        assert!(result.is_err());

        let stored = ctx.parameters(Some(DEFAULT_VIN)).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].key, "01-0C");
        assert_eq!(stored[0].name, "Engine speed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_port_connect_observes_cancellation() {
        let mut config = AppConfig::default();
        config.serial.port = Some("/dev/ttyUSB0".to_string());
        let manager = ConnectionManager::with_parts(
            AcceptAll,
            || Arc::new(MockConnection::disconnected()) as Arc<dyn HardwareConnection>,
            Vec::new,
        );
        let ctx = EcuContext::with_parts(config, manager, Arc::new(Repository::new()));

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(ctx.initialize(&cancel).await.unwrap().is_none());
        assert!(ctx.manager.current().is_none());
    }

    #[tokio::test]
    async fn test_no_adapter() {
        let manager = ConnectionManager::with_parts(
            AcceptAll,
            || Arc::new(MockConnection::disconnected()) as Arc<dyn HardwareConnection>,
            Vec::new,
        );
        let ctx = EcuContext::with_parts(AppConfig::default(), manager, Arc::new(Repository::new()));
        assert!(ctx.initialize(&CancellationToken::new()).await.unwrap().is_none());
    }
}
