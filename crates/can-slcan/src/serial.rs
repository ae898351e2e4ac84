//! SLCAN Serial Transport
//!
//! Owns one serial port, brings the CAN channel up with the SLCAN init
//! sequence and runs a background reader task that decodes incoming lines
//! and hands the frames to the [`FrameDispatcher`].

use crate::codec::{command, LineBuffer, SlcanCodec};
use crate::connection::{FrameDispatcher, HardwareConnection};
use crate::error::TransportError;
use crate::frame::CanFrame;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Fixed line rate of SLCAN adapters
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default read/write timeout
const DEFAULT_TIMEOUT_MS: u64 = 500;

/// Delay after each bus init command
const DEFAULT_SETTLE_MS: u64 = 100;

/// Serial port configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Baud rate (default: 115200, 8-N-1)
    pub baud_rate: u32,
    /// Read/write timeout in milliseconds
    pub timeout_ms: u64,
    /// Settle delay after each init command in milliseconds
    pub settle_ms: u64,
    /// Fixed port to use instead of auto-discovery
    pub port: Option<String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            settle_ms: DEFAULT_SETTLE_MS,
            port: None,
        }
    }
}

impl SerialConfig {
    /// Read/write timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Lifecycle of the port handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Closed,
    Opening,
    Open,
}

/// Open a port at the adapter's line settings (8-N-1)
pub(crate) fn open_port(port: &str, baud_rate: u32, timeout: Duration) -> Result<SerialStream, TransportError> {
    let stream = tokio_serial::new(port, baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .timeout(timeout)
        .open_native_async()?;
    Ok(stream)
}

/// State shared with the reader task
struct Shared {
    dispatcher: FrameDispatcher,
    state: Mutex<TransportState>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: TransportState) {
        *self.state() = state;
    }
}

/// Reader task handle for the open port
struct ReaderLink {
    port: String,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// SLCAN transport over a serial port
pub struct SerialTransport {
    config: SerialConfig,
    shared: Arc<Shared>,
    writer: tokio::sync::Mutex<Option<WriteHalf<SerialStream>>>,
    link: Mutex<Option<ReaderLink>>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl SerialTransport {
    /// Closed transport; `connect` opens the port
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                dispatcher: FrameDispatcher::new(),
                state: Mutex::new(TransportState::Closed),
            }),
            writer: tokio::sync::Mutex::new(None),
            link: Mutex::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> TransportState {
        *self.shared.state()
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    /// Open the port and run the bus init sequence. The stream is only
    /// returned once fully initialized; on error it is dropped here, which
    /// releases the OS handle.
    async fn open_and_init(&self, port: &str) -> Result<SerialStream, TransportError> {
        let mut stream = open_port(port, self.config.baud_rate, self.config.timeout())?;
        debug!("Serial port {} opened, initializing CAN channel", port);

        for cmd in [command::CLOSE, command::BITRATE_500K, command::OPEN] {
            write_with_timeout(&mut stream, cmd.as_bytes(), self.config.timeout()).await?;
            tokio::time::sleep(self.config.settle()).await;
        }

        Ok(stream)
    }

    /// Install the writer, mark the transport open and spawn the reader. The
    /// state flips before the task exists so a reader that dies at once
    /// leaves it `Closed`.
    async fn start(&self, port: &str, stream: SerialStream) {
        let (reader, writer) = tokio::io::split(stream);
        let shutdown = CancellationToken::new();
        *self.writer.lock().await = Some(writer);
        self.shared.set_state(TransportState::Open);

        let task = tokio::spawn(read_loop(
            reader,
            Arc::clone(&self.shared),
            shutdown.clone(),
            port.to_string(),
        ));

        *self.link_slot() = Some(ReaderLink {
            port: port.to_string(),
            shutdown,
            task,
        });
    }

    fn link_slot(&self) -> MutexGuard<'_, Option<ReaderLink>> {
        self.link.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn close(&self) {
        let link = self.link_slot().take();
        self.shared.set_state(TransportState::Closed);

        if let Some(link) = &link {
            link.shutdown.cancel();
        }
        // Waiters on in-flight requests observe a closed channel right away
        self.shared.dispatcher.close_listeners();

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Error while shutting down serial writer: {}", e);
            }
        }

        if let Some(link) = link {
            if let Err(e) = link.task.await {
                if !e.is_cancelled() {
                    warn!("Serial reader task ended abnormally: {}", e);
                }
            }
            info!("Serial transport on {} disconnected", link.port);
        }
    }
}

#[async_trait]
impl HardwareConnection for SerialTransport {
    async fn connect(&self, port: &str) -> bool {
        let _guard = self.connect_lock.lock().await;

        if self.link_slot().is_some() {
            debug!("Transport already open, closing before reconnect");
            self.close().await;
        }

        self.shared.set_state(TransportState::Opening);
        info!("Connecting to SLCAN adapter on {} at {} baud", port, self.config.baud_rate);

        match self.open_and_init(port).await {
            Ok(stream) => {
                self.start(port, stream).await;
                info!("SLCAN adapter connected on {}, CAN bus open at 500 kbit/s", port);
                true
            }
            Err(e) => {
                self.shared.set_state(TransportState::Closed);
                error!("Failed to connect to SLCAN adapter on {}: {}", port, e);
                false
            }
        }
    }

    async fn disconnect(&self) {
        self.close().await;
    }

    fn is_connected(&self) -> bool {
        self.state() == TransportState::Open
    }

    async fn send(&self, frame: &CanFrame) -> Result<(), TransportError> {
        if !self.is_connected() {
            trace!("Send of {} skipped, transport not connected", frame);
            return Ok(());
        }

        let line = SlcanCodec::encode(frame);
        let mut slot = self.writer.lock().await;
        let Some(writer) = slot.as_mut() else {
            return Ok(());
        };

        write_with_timeout(writer, line.as_bytes(), self.config.timeout()).await?;
        metrics::counter!("slcan_frames_sent_total").increment(1);
        trace!("Frame sent: {}", frame);
        Ok(())
    }

    fn dispatcher(&self) -> &FrameDispatcher {
        &self.shared.dispatcher
    }

    fn port_name(&self) -> Option<String> {
        self.link_slot().as_ref().map(|link| link.port.clone())
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if let Some(link) = self.link_slot().take() {
            link.shutdown.cancel();
            link.task.abort();
        }
        self.shared.dispatcher.close_listeners();
    }
}

async fn write_with_timeout<W>(writer: &mut W, bytes: &[u8], timeout: Duration) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    match tokio::time::timeout(timeout, async {
        writer.write_all(bytes).await?;
        writer.flush().await
    })
    .await
    {
        Ok(result) => Ok(result?),
        Err(_) => Err(TransportError::WriteTimeout(timeout.as_millis() as u64)),
    }
}

/// Background receive loop. Runs until shutdown, EOF or a fatal read error.
async fn read_loop(
    mut reader: ReadHalf<SerialStream>,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    port: String,
) {
    let mut lines = LineBuffer::new();
    let mut chunk = [0u8; 256];
    debug!("Serial reader started on {}", port);

    loop {
        let read = tokio::select! {
            _ = shutdown.cancelled() => break,
            read = reader.read(&mut chunk) => read,
        };

        match read {
            Ok(0) => {
                warn!("Serial port {} reached end of stream", port);
                break;
            }
            Ok(n) => {
                for line in lines.push(&chunk[..n]) {
                    match SlcanCodec::decode(&line) {
                        Some(frame) => {
                            metrics::counter!("slcan_frames_received_total").increment(1);
                            trace!("Frame received: {}", frame);
                            shared.dispatcher.dispatch(&frame);
                        }
                        None => {
                            metrics::counter!("slcan_decode_errors_total").increment(1);
                            trace!("Dropped non-frame line: {}", line.escape_debug());
                        }
                    }
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                continue;
            }
            Err(e) => {
                error!("Serial read on {} failed: {}", port, e);
                break;
            }
        }
    }

    if !shutdown.is_cancelled() {
        // Port went away underneath us; fail anything still waiting
        shared.set_state(TransportState::Closed);
        shared.dispatcher.close_listeners();
    }
    debug!("Serial reader stopped on {}", port);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_default() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.timeout(), Duration::from_millis(500));
        assert_eq!(config.settle(), Duration::from_millis(100));
        assert!(config.port.is_none());
    }

    #[tokio::test]
    async fn test_send_is_noop_when_closed() {
        let transport = SerialTransport::new(SerialConfig::default());
        let frame = CanFrame::new(0x7DF, &[0x02, 0x01, 0x00]).unwrap();

        assert!(!transport.is_connected());
        assert!(transport.send(&frame).await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_to_missing_port_fails_cleanly() {
        let transport = SerialTransport::new(SerialConfig::default());

        assert!(!transport.connect("/dev/does-not-exist-slcan").await);
        assert_eq!(transport.state(), TransportState::Closed);
        assert!(transport.port_name().is_none());
    }

    #[cfg(unix)]
    mod pty {
        use super::*;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio_serial::SerialPort;

        const WAIT: Duration = Duration::from_secs(2);

        fn fast_config() -> SerialConfig {
            SerialConfig {
                settle_ms: 10,
                ..SerialConfig::default()
            }
        }

        async fn read_exactly(master: &mut SerialStream, len: usize) -> String {
            let mut buf = vec![0u8; len];
            tokio::time::timeout(WAIT, master.read_exact(&mut buf))
                .await
                .expect("adapter side read timed out")
                .unwrap();
            String::from_utf8(buf).unwrap()
        }

        #[tokio::test(flavor = "multi_thread")]
        async fn test_transport_over_pty() {
            let (mut master, slave) = SerialStream::pair().unwrap();
            let port = slave.name().unwrap();
            drop(slave);

            let transport = SerialTransport::new(fast_config());
            assert!(transport.connect(&port).await);
            assert!(transport.is_connected());
            assert_eq!(transport.port_name().as_deref(), Some(port.as_str()));

            // Bus init in order: close, 500 kbit/s, open
            assert_eq!(read_exactly(&mut master, 7).await, "C\rS5\rO\r");

            // Garbage lines are dropped, the reader keeps going
            let mut frames = transport.subscribe();
            master
                .write_all(b"garbage\r\x07zz\rt7E8 3410C\rt7E83410C1A\r")
                .await
                .unwrap();
            let frame = tokio::time::timeout(WAIT, frames.recv()).await.unwrap().unwrap();
            assert_eq!(frame.id(), 0x7E8);
            assert_eq!(frame.data(), &[0x41, 0x0C, 0x1A]);
            assert!(frames.try_recv().is_err());

            let request = CanFrame::new(0x7DF, &[0x02, 0x01, 0x0C]).unwrap();
            transport.send(&request).await.unwrap();
            assert_eq!(read_exactly(&mut master, 12).await, "t7DF302010C\r");

            // Adapter unplugged: pending listeners fail and the state follows
            let mut listener = transport.dispatcher().listen(|_| false);
            drop(master);
            let received = tokio::time::timeout(WAIT, listener.recv()).await.unwrap();
            assert!(received.is_none());
            assert_eq!(transport.state(), TransportState::Closed);
            assert!(!transport.is_connected());

            transport.disconnect().await;
        }

        #[tokio::test(flavor = "multi_thread")]
        async fn test_reader_dying_at_start_leaves_transport_closed() {
            let (master, slave) = SerialStream::pair().unwrap();
            drop(master);

            let transport = SerialTransport::new(fast_config());
            transport.start("pty", slave).await;
            assert_eq!(transport.port_name().as_deref(), Some("pty"));

            let closed = async {
                while transport.state() != TransportState::Closed {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            };
            tokio::time::timeout(WAIT, closed).await.unwrap();
            assert!(!transport.is_connected());
        }
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let transport = SerialTransport::new(SerialConfig::default());
        transport.disconnect().await;
        transport.disconnect().await;
        assert_eq!(transport.state(), TransportState::Closed);
    }
}
