//! Mock connection for testing (no adapter required)
//!
//! Simulates an ECU: every frame sent through the connection is passed to a
//! responder closure and whatever frames it returns are delivered back
//! through the dispatcher, as if read from the bus.

use crate::connection::{FrameDispatcher, HardwareConnection};
use crate::error::TransportError;
use crate::frame::CanFrame;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

type Responder = Box<dyn Fn(&CanFrame) -> Vec<CanFrame> + Send + Sync>;

/// In-memory [`HardwareConnection`]
pub struct MockConnection {
    dispatcher: FrameDispatcher,
    connected: AtomicBool,
    port: Mutex<Option<String>>,
    refused_ports: Mutex<Vec<String>>,
    sent: Mutex<Vec<CanFrame>>,
    responder: Mutex<Option<Responder>>,
}

impl MockConnection {
    /// A connected mock on port `"mock"` that never answers
    pub fn new() -> Self {
        let mock = Self::disconnected();
        mock.connected.store(true, Ordering::SeqCst);
        *lock(&mock.port) = Some("mock".to_string());
        mock
    }

    /// A mock that waits for `connect`
    pub fn disconnected() -> Self {
        Self {
            dispatcher: FrameDispatcher::new(),
            connected: AtomicBool::new(false),
            port: Mutex::new(None),
            refused_ports: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            responder: Mutex::new(None),
        }
    }

    /// A connected mock answering sent frames with `responder`
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&CanFrame) -> Vec<CanFrame> + Send + Sync + 'static,
    {
        let mock = Self::new();
        mock.set_responder(responder);
        mock
    }

    /// Replace the simulated ECU
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&CanFrame) -> Vec<CanFrame> + Send + Sync + 'static,
    {
        *lock(&self.responder) = Some(Box::new(responder));
    }

    /// Make `connect` fail for this port
    pub fn refuse_port(&self, port: &str) {
        lock(&self.refused_ports).push(port.to_string());
    }

    /// Deliver a frame as if it had been read from the bus
    pub fn inject(&self, frame: CanFrame) -> bool {
        self.dispatcher.dispatch(&frame)
    }

    /// Frames sent while connected, in order
    pub fn sent_frames(&self) -> Vec<CanFrame> {
        lock(&self.sent).clone()
    }

    /// Flip the connected flag without touching listeners
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl HardwareConnection for MockConnection {
    async fn connect(&self, port: &str) -> bool {
        if lock(&self.refused_ports).iter().any(|p| p == port) {
            debug!("Mock connection refusing {}", port);
            return false;
        }

        *lock(&self.port) = Some(port.to_string());
        self.connected.store(true, Ordering::SeqCst);
        true
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        *lock(&self.port) = None;
        self.dispatcher.close_listeners();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, frame: &CanFrame) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Ok(());
        }

        lock(&self.sent).push(frame.clone());

        let responses = match lock(&self.responder).as_ref() {
            Some(responder) => responder(frame),
            None => Vec::new(),
        };
        for response in responses {
            self.dispatcher.dispatch(&response);
        }

        Ok(())
    }

    fn dispatcher(&self) -> &FrameDispatcher {
        &self.dispatcher
    }

    fn port_name(&self) -> Option<String> {
        lock(&self.port).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_responder_answers_through_dispatcher() {
        let mock = MockConnection::with_responder(|req| {
            vec![CanFrame::new(0x7E8, &[0x01, req.data()[0]]).unwrap()]
        });
        let mut listener = mock.dispatcher().listen(|f| f.id() == 0x7E8);

        mock.send(&CanFrame::new(0x7DF, &[0xAB]).unwrap()).await.unwrap();

        assert_eq!(listener.recv().await.unwrap().data(), &[0x01, 0xAB]);
        assert_eq!(mock.sent_frames().len(), 1);
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_dropped() {
        let mock = MockConnection::disconnected();
        mock.send(&CanFrame::new(0x7DF, &[]).unwrap()).await.unwrap();
        assert!(mock.sent_frames().is_empty());
    }
}
