//! OBD-II Request/Response Client
//!
//! Sends a request over a [`HardwareConnection`] and waits for the first
//! received frame that answers it.

use crate::error::ObdError;
use crate::pid::parse_supported_pids;
use crate::protocol;
use can_slcan::{CanFrame, HardwareConnection};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default timeout for initialization requests (VIN, supported PIDs)
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// How a single request ended
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    /// A frame satisfying the predicate arrived in time
    Matched(CanFrame),
    /// Nothing matched within the timeout
    TimedOut,
    /// The caller's cancellation token fired first
    Cancelled,
}

impl RequestOutcome {
    /// Whether a response arrived
    pub fn is_matched(&self) -> bool {
        matches!(self, RequestOutcome::Matched(_))
    }

    /// The matched frame, if any
    pub fn into_frame(self) -> Option<CanFrame> {
        match self {
            RequestOutcome::Matched(frame) => Some(frame),
            _ => None,
        }
    }
}

/// OBD-II client correlating requests with ECU responses
#[derive(Clone)]
pub struct ObdClient {
    connection: Arc<dyn HardwareConnection>,
    timeout: Duration,
}

impl ObdClient {
    /// Client with the default request timeout
    pub fn new(connection: Arc<dyn HardwareConnection>) -> Self {
        Self {
            connection,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    /// Set the timeout used by [`query`](Self::query) and the helpers
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Underlying hardware connection
    pub fn connection(&self) -> &Arc<dyn HardwareConnection> {
        &self.connection
    }

    /// Send `request` and wait for the first frame satisfying `predicate`.
    ///
    /// The listener is armed before the request goes out so a fast answer
    /// cannot be missed, and it is removed on every exit path.
    pub async fn request_once<F>(
        &self,
        request: &CanFrame,
        predicate: F,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<RequestOutcome, ObdError>
    where
        F: Fn(&CanFrame) -> bool + Send + Sync + 'static,
    {
        if !self.connection.is_connected() {
            return Err(ObdError::NotConnected);
        }
        if cancel.is_cancelled() {
            return Ok(RequestOutcome::Cancelled);
        }

        let mut listener = self.connection.dispatcher().listen(predicate);
        // A disconnect racing the first check may already have closed the
        // listeners; this one would then wait out the whole timeout.
        if !self.connection.is_connected() {
            return Err(ObdError::ConnectionClosed);
        }
        counter!("obd_requests_total").increment(1);
        debug!("Sending request {}", request);
        self.connection.send(request).await?;

        tokio::select! {
            received = listener.recv() => match received {
                Some(frame) => {
                    debug!("Response {}", frame);
                    Ok(RequestOutcome::Matched(frame))
                }
                None => Err(ObdError::ConnectionClosed),
            },
            _ = tokio::time::sleep(timeout) => {
                counter!("obd_request_timeouts_total").increment(1);
                debug!("Request {} timed out after {:?}", request, timeout);
                Ok(RequestOutcome::TimedOut)
            }
            _ = cancel.cancelled() => Ok(RequestOutcome::Cancelled),
        }
    }

    /// Send a pre-built request and wait for the response its SID/PID implies
    pub async fn request(&self, request: &CanFrame, cancel: &CancellationToken) -> Result<RequestOutcome, ObdError> {
        let predicate = protocol::response_predicate(request)
            .ok_or_else(|| ObdError::InvalidRequest(format!("{} carries no SID/PID", request)))?;
        self.request_once(request, predicate, self.timeout, cancel).await
    }

    /// Send a functional `(sid, pid)` request and wait for its positive response
    pub async fn query(&self, sid: u8, pid: u8, cancel: &CancellationToken) -> Result<RequestOutcome, ObdError> {
        let request = protocol::request_frame(sid, pid)?;
        self.request(&request, cancel).await
    }

    /// Request the VIN (mode 09, PID 02).
    ///
    /// Only the first response frame is read, so the result is its payload
    /// rendered as dash-separated hex (`"06-49-02-01-31-47-31-4A"`), not a
    /// decoded VIN. `None` when the ECU does not answer.
    pub async fn read_vin(&self, cancel: &CancellationToken) -> Result<Option<String>, ObdError> {
        let outcome = self.request(&protocol::vin_request()?, cancel).await?;
        Ok(outcome.into_frame().map(|frame| hex_string(frame.data())))
    }

    /// Request the supported PIDs 01-20 (mode 01, PID 00)
    pub async fn supported_pids(&self, cancel: &CancellationToken) -> Result<Option<Vec<u8>>, ObdError> {
        let outcome = self.request(&protocol::supported_pids_request()?, cancel).await?;
        Ok(outcome.into_frame().map(|frame| parse_supported_pids(frame.data())))
    }
}

fn hex_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join("-")
}
