//! Connection Manager
//!
//! Owns the single active hardware connection and drives discovery.

use crate::connection::HardwareConnection;
use crate::discovery::{self, AdapterProbe, OpenProbe};
use crate::serial::{SerialConfig, SerialTransport};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Connection lifecycle as seen by upper layers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
}

type ConnectionFactory = Box<dyn Fn() -> Arc<dyn HardwareConnection> + Send + Sync>;
type PortSource = Box<dyn Fn() -> Vec<String> + Send + Sync>;

/// Discovers the adapter and holds the active connection
pub struct ConnectionManager {
    probe: Box<dyn AdapterProbe>,
    factory: ConnectionFactory,
    ports: PortSource,
    state: Mutex<ConnectionState>,
    active: Mutex<Option<Arc<dyn HardwareConnection>>>,
}

impl ConnectionManager {
    /// Manager for real serial adapters
    pub fn new(config: SerialConfig) -> Self {
        let probe = OpenProbe {
            baud_rate: config.baud_rate,
            ..OpenProbe::default()
        };
        Self::with_parts(
            probe,
            move || Arc::new(SerialTransport::new(config.clone())) as Arc<dyn HardwareConnection>,
            discovery::candidate_ports,
        )
    }

    /// Manager with custom probe, transport factory and port source
    pub fn with_parts<P, F, S>(probe: P, factory: F, ports: S) -> Self
    where
        P: AdapterProbe + 'static,
        F: Fn() -> Arc<dyn HardwareConnection> + Send + Sync + 'static,
        S: Fn() -> Vec<String> + Send + Sync + 'static,
    {
        Self {
            probe: Box::new(probe),
            factory: Box::new(factory),
            ports: Box::new(ports),
            state: Mutex::new(ConnectionState::Disconnected),
            active: Mutex::new(None),
        }
    }

    /// Current state, downgraded when the active transport dropped on its own
    pub fn state(&self) -> ConnectionState {
        let active_open = self.current().map(|c| c.is_connected());
        let state = *lock(&self.state);
        match (state, active_open) {
            // The transport may have dropped underneath us
            (ConnectionState::Open, Some(false)) => ConnectionState::Disconnected,
            (state, _) => state,
        }
    }

    /// The active connection, if any
    pub fn current(&self) -> Option<Arc<dyn HardwareConnection>> {
        lock(&self.active).clone()
    }

    /// Discover the adapter and connect to the first viable port.
    ///
    /// Any previous connection is closed first. Returns `None` when no
    /// candidate works or discovery was cancelled.
    pub async fn auto_connect(&self, cancel: &CancellationToken) -> Option<Arc<dyn HardwareConnection>> {
        self.disconnect().await;
        self.set_state(ConnectionState::Connecting);

        let candidates = (self.ports)();
        info!("Searching for SLCAN adapter on {} candidate ports", candidates.len());

        let found = discovery::auto_connect(candidates, self.probe.as_ref(), &self.factory, cancel).await;
        self.install(found)
    }

    /// Connect to a known port, skipping discovery.
    ///
    /// Cancellation abandons the open and init sequence and releases the port.
    pub async fn connect_to(&self, port: &str, cancel: &CancellationToken) -> Option<Arc<dyn HardwareConnection>> {
        self.disconnect().await;
        self.set_state(ConnectionState::Connecting);

        let connection = (self.factory)();
        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Connect to {} cancelled", port);
                connection.disconnect().await;
                false
            }
            connected = connection.connect(port) => {
                if !connected {
                    warn!("Could not connect to configured port {}", port);
                }
                connected
            }
        };

        self.install(connected.then_some(connection))
    }

    /// Close the active connection, if any
    pub async fn disconnect(&self) {
        let previous = lock(&self.active).take();
        if let Some(connection) = previous {
            connection.disconnect().await;
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn install(&self, found: Option<Arc<dyn HardwareConnection>>) -> Option<Arc<dyn HardwareConnection>> {
        let state = if found.is_some() {
            ConnectionState::Open
        } else {
            ConnectionState::Disconnected
        };
        *lock(&self.active) = found.clone();
        self.set_state(state);
        found
    }

    fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::FrameDispatcher;
    use crate::error::TransportError;
    use crate::frame::CanFrame;
    use crate::mock::MockConnection;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AcceptAll;

    #[async_trait]
    impl AdapterProbe for AcceptAll {
        async fn probe(&self, _port: &str) -> bool {
            true
        }
    }

    fn mock_manager(ports: Vec<&'static str>) -> ConnectionManager {
        ConnectionManager::with_parts(
            AcceptAll,
            || Arc::new(MockConnection::disconnected()) as Arc<dyn HardwareConnection>,
            move || ports.iter().map(|p| p.to_string()).collect(),
        )
    }

    #[tokio::test]
    async fn test_auto_connect_installs_connection() {
        let manager = mock_manager(vec!["/dev/ttyUSB0"]);
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        let connection = manager.auto_connect(&CancellationToken::new()).await.unwrap();
        assert!(connection.is_connected());
        assert_eq!(manager.state(), ConnectionState::Open);
        assert_eq!(manager.current().unwrap().port_name().as_deref(), Some("/dev/ttyUSB0"));
    }

    #[tokio::test]
    async fn test_no_ports_leaves_disconnected() {
        let manager = mock_manager(vec![]);
        assert!(manager.auto_connect(&CancellationToken::new()).await.is_none());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.current().is_none());
    }

    #[tokio::test]
    async fn test_reconnect_closes_previous() {
        let manager = mock_manager(vec!["/dev/ttyUSB0"]);
        let first = manager.auto_connect(&CancellationToken::new()).await.unwrap();
        let second = manager
            .connect_to("/dev/ttyACM0", &CancellationToken::new())
            .await
            .unwrap();

        assert!(!first.is_connected());
        assert!(second.is_connected());
        assert_eq!(second.port_name().as_deref(), Some("/dev/ttyACM0"));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let manager = mock_manager(vec!["/dev/ttyUSB0"]);
        manager.auto_connect(&CancellationToken::new()).await.unwrap();
        manager.disconnect().await;
        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    /// Transport whose open and init sequence never finishes
    struct StalledConnection {
        dispatcher: FrameDispatcher,
        disconnects: AtomicUsize,
    }

    #[async_trait]
    impl HardwareConnection for StalledConnection {
        async fn connect(&self, _port: &str) -> bool {
            std::future::pending().await
        }

        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }

        fn is_connected(&self) -> bool {
            false
        }

        async fn send(&self, _frame: &CanFrame) -> Result<(), TransportError> {
            Ok(())
        }

        fn dispatcher(&self) -> &FrameDispatcher {
            &self.dispatcher
        }

        fn port_name(&self) -> Option<String> {
            None
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_to_observes_cancellation() {
        let stalled = Arc::new(StalledConnection {
            dispatcher: FrameDispatcher::new(),
            disconnects: AtomicUsize::new(0),
        });
        let factory_conn = stalled.clone();
        let manager = ConnectionManager::with_parts(
            AcceptAll,
            move || factory_conn.clone() as Arc<dyn HardwareConnection>,
            Vec::new,
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let connect = manager.connect_to("/dev/ttyUSB0", &cancel);
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), connect).await;
        assert!(result.unwrap().is_none());
        assert_eq!(stalled.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.current().is_none());
    }
}
