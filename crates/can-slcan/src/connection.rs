//! Hardware connection capability and frame dispatch
//!
//! Every transport owns a [`FrameDispatcher`]. The transport's receive path
//! is the only producer; it hands each decoded frame to the dispatcher, which
//! fans it out to broadcast subscribers and resolves at most one pending
//! one-shot listener whose predicate matches.

use crate::error::TransportError;
use crate::frame::CanFrame;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::{broadcast, oneshot};
use tracing::trace;

/// Default capacity of the broadcast subscriber channel
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// Predicate deciding whether a received frame answers a pending request
pub type FramePredicate = Box<dyn Fn(&CanFrame) -> bool + Send + Sync>;

/// Identifier of a registered listener
pub type ListenerId = u64;

/// A bidirectional CAN transport
///
/// Implemented by [`SerialTransport`](crate::SerialTransport) for real
/// adapters and by [`MockConnection`](crate::mock::MockConnection) in tests.
#[async_trait]
pub trait HardwareConnection: Send + Sync {
    /// Open the given port and bring the bus up. Failures are logged and
    /// reported as `false`.
    async fn connect(&self, port: &str) -> bool;

    /// Close the connection. Safe to call repeatedly.
    ///
    /// `is_connected` must report `false` before pending listeners are closed.
    async fn disconnect(&self);

    /// Whether the transport currently holds an open bus
    fn is_connected(&self) -> bool;

    /// Transmit a frame. A no-op when not connected.
    async fn send(&self, frame: &CanFrame) -> Result<(), TransportError>;

    /// Dispatcher fed by this transport's receive path
    fn dispatcher(&self) -> &FrameDispatcher;

    /// Name of the port currently in use
    fn port_name(&self) -> Option<String>;

    /// Subscribe to every received frame
    fn subscribe(&self) -> broadcast::Receiver<CanFrame> {
        self.dispatcher().subscribe()
    }
}

struct PendingListener {
    predicate: FramePredicate,
    tx: oneshot::Sender<CanFrame>,
}

/// Fan-out of received frames to subscribers and pending listeners
pub struct FrameDispatcher {
    next_id: AtomicU64,
    listeners: Mutex<BTreeMap<ListenerId, PendingListener>>,
    subscribers: broadcast::Sender<CanFrame>,
}

impl FrameDispatcher {
    /// Dispatcher with the default subscriber capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Dispatcher whose subscribers may lag by `capacity` frames
    pub fn with_capacity(capacity: usize) -> Self {
        let (subscribers, _) = broadcast::channel(capacity.max(1));
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(BTreeMap::new()),
            subscribers,
        }
    }

    /// Arm a one-shot listener. The returned guard deregisters it on drop.
    pub fn listen<F>(&self, predicate: F) -> FrameListener<'_>
    where
        F: Fn(&CanFrame) -> bool + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        self.lock().insert(
            id,
            PendingListener {
                predicate: Box::new(predicate),
                tx,
            },
        );
        trace!("Listener {} armed", id);

        FrameListener {
            dispatcher: self,
            id,
            rx,
        }
    }

    /// Deliver a received frame. Returns whether a pending listener took it.
    pub fn dispatch(&self, frame: &CanFrame) -> bool {
        let _ = self.subscribers.send(frame.clone());

        let mut listeners = self.lock();
        let matching: Vec<ListenerId> = listeners
            .iter()
            .filter(|(_, listener)| (listener.predicate)(frame))
            .map(|(id, _)| *id)
            .collect();

        for id in matching {
            if let Some(listener) = listeners.remove(&id) {
                // A closed receiver means the waiter already gave up; try the next one
                if listener.tx.send(frame.clone()).is_ok() {
                    trace!("Listener {} resolved", id);
                    return true;
                }
            }
        }

        false
    }

    /// Drop every pending listener so their waiters observe a closed channel
    pub fn close_listeners(&self) {
        let mut listeners = self.lock();
        if !listeners.is_empty() {
            trace!("Closing {} pending listeners", listeners.len());
        }
        listeners.clear();
    }

    /// Number of listeners currently armed
    pub fn listener_count(&self) -> usize {
        self.lock().len()
    }

    /// Receive every dispatched frame from now on
    pub fn subscribe(&self) -> broadcast::Receiver<CanFrame> {
        self.subscribers.subscribe()
    }

    fn remove(&self, id: ListenerId) {
        self.lock().remove(&id);
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ListenerId, PendingListener>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for FrameDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// An armed one-shot listener
///
/// Deregisters itself when dropped, whether it resolved, timed out or was
/// abandoned by a cancelled future.
pub struct FrameListener<'a> {
    dispatcher: &'a FrameDispatcher,
    id: ListenerId,
    rx: oneshot::Receiver<CanFrame>,
}

impl FrameListener<'_> {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Wait for the matching frame. `None` when the connection closed first.
    pub async fn recv(&mut self) -> Option<CanFrame> {
        (&mut self.rx).await.ok()
    }
}

impl Drop for FrameListener<'_> {
    fn drop(&mut self) {
        self.dispatcher.remove(self.id);
    }
}
