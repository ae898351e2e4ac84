//! ECU Data Service
//!
//! Identifies the vehicle and seeds the parameter store with the PIDs the
//! ECU reports as supported.

use crate::registry::PidRegistry;
use can_slcan::HardwareConnection;
use obd_protocol::{ObdClient, ObdError, ParameterDefinition, ServiceMode};
use std::sync::Arc;
use storage::{ParameterStore, StorageError, DEFAULT_VIN};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Description attached to PIDs taken from the supported-PID bitmap
pub const SUPPORTED_PID_DESCRIPTION: &str = "Auto-detected";

/// Errors raised while initializing from the ECU
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Obd(#[from] ObdError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Initialization cancelled")]
    Cancelled,
}

/// What [`EcuDataService::initialize`] found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitReport {
    pub vehicle_id: String,
    /// Whether the ECU answered the VIN request
    pub vin_answered: bool,
    /// Definitions were already stored for this vehicle
    pub from_store: bool,
    /// Supported PIDs written to the store
    pub registered: usize,
}

/// Vehicle identification and parameter bootstrap
pub struct EcuDataService {
    client: ObdClient,
    store: Arc<dyn ParameterStore>,
    vehicle_id: String,
    parameters: Vec<ParameterDefinition>,
}

impl EcuDataService {
    /// Service for the default vehicle until `initialize` identifies one
    pub fn new(client: ObdClient, store: Arc<dyn ParameterStore>) -> Self {
        Self {
            client,
            store,
            vehicle_id: DEFAULT_VIN.to_string(),
            parameters: Vec::new(),
        }
    }

    pub fn vehicle_id(&self) -> &str {
        &self.vehicle_id
    }

    /// Attribute later saves to `vehicle_id` without asking the ECU
    pub fn set_vehicle_id(&mut self, vehicle_id: impl Into<String>) {
        self.vehicle_id = vehicle_id.into();
    }

    /// Definitions loaded for the current vehicle
    pub fn parameters(&self) -> &[ParameterDefinition] {
        &self.parameters
    }

    /// Read the VIN, then register the supported PIDs 01-20 unless the
    /// vehicle is already known to the store.
    pub async fn initialize(&mut self, cancel: &CancellationToken) -> Result<InitReport, ServiceError> {
        if !self.client.connection().is_connected() {
            return Err(ObdError::NotConnected.into());
        }

        let vin = self.client.read_vin(cancel).await?;
        check_cancelled(cancel)?;

        let vin_answered = vin.is_some();
        match vin {
            Some(vin) => {
                info!("Vehicle identified: {}", vin);
                self.vehicle_id = vin;

                let known = self.store.get_all(&self.vehicle_id)?;
                if known.iter().any(|d| d.vehicle_id == self.vehicle_id) {
                    info!("Loaded {} stored parameters for {}", known.len(), self.vehicle_id);
                    self.parameters = known;
                    return Ok(self.report(true, true, 0));
                }
            }
            None => {
                warn!("No VIN response, using {}", DEFAULT_VIN);
                self.vehicle_id = DEFAULT_VIN.to_string();
            }
        }

        let mut registered = 0;
        match self.client.supported_pids(cancel).await? {
            Some(pids) => {
                for pid in &pids {
                    let definition = supported_pid_definition(*pid, &self.vehicle_id);
                    self.store.upsert(&definition, &self.vehicle_id)?;
                }
                registered = pids.len();
                info!("Registered {} PIDs for {}", registered, self.vehicle_id);
            }
            None => {
                check_cancelled(cancel)?;
                warn!("No supported-PID response");
            }
        }

        self.parameters = self.store.get_all(&self.vehicle_id)?;
        Ok(self.report(vin_answered, false, registered))
    }

    /// Persist every registry entry for the current vehicle
    pub fn save_registry(&self, registry: &PidRegistry) -> Result<usize, ServiceError> {
        let definitions = registry.all();
        for definition in &definitions {
            self.store.upsert(definition, &self.vehicle_id)?;
        }
        Ok(definitions.len())
    }

    fn report(&self, vin_answered: bool, from_store: bool, registered: usize) -> InitReport {
        InitReport {
            vehicle_id: self.vehicle_id.clone(),
            vin_answered,
            from_store,
            registered,
        }
    }
}

fn supported_pid_definition(pid: u8, vehicle_id: &str) -> ParameterDefinition {
    let mut definition = ParameterDefinition::unknown(ServiceMode::CurrentData.as_byte(), pid, 1, vehicle_id);
    definition.name = format!("Unknown PID {:02X}", pid);
    definition.description = SUPPORTED_PID_DESCRIPTION.to_string();
    definition
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), ServiceError> {
    if cancel.is_cancelled() {
        Err(ServiceError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use can_slcan::mock::MockConnection;
    use can_slcan::CanFrame;
    use std::time::Duration;
    use storage::Repository;

    const VIN_PAYLOAD: [u8; 8] = [0x06, 0x49, 0x02, 0x01, 0x31, 0x47, 0x31, 0x4A];
    const VIN_ID: &str = "06-49-02-01-31-47-31-4A";

    fn frame(id: u32, data: &[u8]) -> CanFrame {
        CanFrame::new(id, data).unwrap()
    }

    fn ecu(answer_vin: bool) -> Arc<MockConnection> {
        Arc::new(MockConnection::with_responder(move |request| {
            match (request.data()[1], request.data()[2]) {
                (0x09, 0x02) if answer_vin => vec![frame(0x7E8, &VIN_PAYLOAD)],
                // PIDs 01, 05, 0C, 0D
                (0x01, 0x00) => vec![frame(0x7E8, &[0x06, 0x41, 0x00, 0x88, 0x18, 0x00, 0x00])],
                _ => Vec::new(),
            }
        }))
    }

    fn service(mock: Arc<MockConnection>, store: Arc<Repository>) -> EcuDataService {
        let client = ObdClient::new(mock).with_timeout(Duration::from_millis(1000));
        EcuDataService::new(client, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_registers_supported_pids() {
        let store = Arc::new(Repository::new());
        let mut service = service(ecu(true), store.clone());

        let report = service.initialize(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.vehicle_id, VIN_ID);
        assert!(report.vin_answered);
        assert!(!report.from_store);
        assert_eq!(report.registered, 4);

        let keys: Vec<_> = service.parameters().iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, vec!["01-01", "01-05", "01-0C", "01-0D"]);

        let def = store.find(VIN_ID, "01-0C").unwrap().unwrap();
        assert_eq!(def.name, "Unknown PID 0C");
        assert_eq!(def.formula, "A");
        assert_eq!(def.bytes_returned, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_known_vehicle_loads_from_store() {
        let store = Arc::new(Repository::new());
        store
            .upsert(&ParameterDefinition::well_known(obd_protocol::Pid::Rpm, VIN_ID), VIN_ID)
            .unwrap();
        let mock = ecu(true);
        let mut service = service(mock.clone(), store);

        let report = service.initialize(&CancellationToken::new()).await.unwrap();
        assert!(report.from_store);
        assert_eq!(service.parameters().len(), 1);
        // Only the VIN request went out
        assert_eq!(mock.sent_frames().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_bucket_does_not_count_as_known() {
        let store = Arc::new(Repository::new());
        store
            .upsert(&ParameterDefinition::well_known(obd_protocol::Pid::Rpm, DEFAULT_VIN), DEFAULT_VIN)
            .unwrap();
        let mut service = service(ecu(true), store);

        let report = service.initialize(&CancellationToken::new()).await.unwrap();
        assert!(!report.from_store);
        assert_eq!(report.registered, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_vin_uses_default() {
        let store = Arc::new(Repository::new());
        let mut service = service(ecu(false), store.clone());

        let report = service.initialize(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.vehicle_id, DEFAULT_VIN);
        assert!(!report.vin_answered);
        assert_eq!(store.get_all(DEFAULT_VIN).unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_requires_connection() {
        let mut service = service(Arc::new(MockConnection::disconnected()), Arc::new(Repository::new()));
        let result = service.initialize(&CancellationToken::new()).await;
        assert!(matches!(result, Err(ServiceError::Obd(ObdError::NotConnected))));
    }

    #[tokio::test]
    async fn test_cancelled_initialization() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut service = service(ecu(true), Arc::new(Repository::new()));
        assert!(matches!(service.initialize(&cancel).await, Err(ServiceError::Cancelled)));
    }

    #[test]
    fn test_save_registry() {
        let store = Arc::new(Repository::new());
        let service = service(Arc::new(MockConnection::new()), store.clone());
        let registry = PidRegistry::new();
        registry.register(0x01, 0x0C, 2, DEFAULT_VIN);
        registry.register(0x01, 0x0D, 1, DEFAULT_VIN);

        assert_eq!(service.save_registry(&registry).unwrap(), 2);
        assert_eq!(store.get_all(DEFAULT_VIN).unwrap().len(), 2);
    }
}
