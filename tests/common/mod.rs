//! Shared helpers for the integration tests: an in-memory serial device, a
//! connector handing it to the daemon and a config pointing at a temp dir.

#![allow(dead_code)]

use async_trait::async_trait;
use callisto_daq::config::DaemonConfig;
use callisto_daq::error::{AppResult, DaqError};
use callisto_daq::serial::{DynSerial, SerialConnector};
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{timeout, Duration};

// =============================================================================
// Mock Serial Port
// =============================================================================

/// Daemon-facing side of the mock receiver.
#[derive(Debug)]
pub struct MockSerialPort {
    writes_tx: UnboundedSender<Vec<u8>>,
    reads_rx: UnboundedReceiver<Vec<u8>>,
    read_buffer: VecDeque<u8>,
}

/// Test-facing side: sees what the daemon wrote and feeds receiver output.
#[derive(Debug)]
pub struct MockDevice {
    writes_rx: UnboundedReceiver<Vec<u8>>,
    reads_tx: UnboundedSender<Vec<u8>>,
    write_buffer: Vec<u8>,
}

pub fn new_mock_serial() -> (MockSerialPort, MockDevice) {
    let (client_to_device_tx, client_to_device_rx) = mpsc::unbounded_channel();
    let (device_to_client_tx, device_to_client_rx) = mpsc::unbounded_channel();

    let port = MockSerialPort {
        writes_tx: client_to_device_tx,
        reads_rx: device_to_client_rx,
        read_buffer: VecDeque::new(),
    };
    let device = MockDevice {
        writes_rx: client_to_device_rx,
        reads_tx: device_to_client_tx,
        write_buffer: Vec::new(),
    };
    (port, device)
}

impl AsyncRead for MockSerialPort {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.read_buffer.is_empty() {
            match self.reads_rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => self.read_buffer.extend(chunk),
                Poll::Ready(None) => return Poll::Ready(Ok(())), // EOF
                Poll::Pending => return Poll::Pending,
            }
        }
        let to_read = std::cmp::min(buf.remaining(), self.read_buffer.len());
        let chunk: Vec<u8> = self.read_buffer.drain(..to_read).collect();
        buf.put_slice(&chunk);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockSerialPort {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.writes_tx.send(buf.to_vec()) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock device disconnected",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl MockDevice {
    /// Emits receiver output.
    pub fn send(&self, data: &[u8]) {
        self.reads_tx
            .send(data.to_vec())
            .expect("daemon side of the mock port is gone");
    }

    /// Waits for the daemon to write exactly `expected` next.
    pub async fn expect_write(&mut self, expected: &[u8]) {
        while self.write_buffer.len() < expected.len() {
            match timeout(Duration::from_secs(2), self.writes_rx.recv()).await {
                Ok(Some(chunk)) => self.write_buffer.extend_from_slice(&chunk),
                Ok(None) => panic!("port closed while expecting a write"),
                Err(_) => panic!(
                    "timeout waiting for {:?}, got {:?}",
                    String::from_utf8_lossy(expected),
                    String::from_utf8_lossy(&self.write_buffer)
                ),
            }
        }
        let actual = &self.write_buffer[..expected.len()];
        assert_eq!(
            actual,
            expected,
            "expected {:?}, got {:?}",
            String::from_utf8_lossy(expected),
            String::from_utf8_lossy(actual)
        );
        self.write_buffer.drain(..expected.len());
    }

    /// Plays the receiver side of the start handshake.
    pub async fn answer_handshake(&mut self) {
        use callisto_daq::protocol::{ID_QUERY, ID_RESPONSE, RESET_STRING};

        self.expect_write(RESET_STRING.as_bytes()).await;
        self.send(ID_RESPONSE.as_bytes());
        self.expect_write(ID_QUERY.as_bytes()).await;
    }
}

/// Hands out prepared mock ports, one per `open`.
pub struct MockConnector {
    ports: Mutex<VecDeque<MockSerialPort>>,
}

impl MockConnector {
    pub fn new(ports: Vec<MockSerialPort>) -> Self {
        Self {
            ports: Mutex::new(ports.into()),
        }
    }
}

#[async_trait]
impl SerialConnector for MockConnector {
    async fn open(&self, _port: &str, _baud_rate: u32) -> AppResult<DynSerial> {
        match self.ports.lock().unwrap().pop_front() {
            Some(port) => Ok(Box::new(port)),
            None => Err(DaqError::SerialPortNotConnected),
        }
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// Hex data span carrying `samples`, terminated by the end marker.
pub fn data_span(samples: &[u8]) -> String {
    let mut span = String::from("2");
    for &sample in samples {
        span.push_str(&format!("{:04X}", u16::from(sample) << 2));
    }
    span.push_str("2323&");
    span
}

/// Config writing into `dir` with every delay shortened for tests.
pub fn test_config(dir: &Path) -> DaemonConfig {
    let mut config = DaemonConfig::default();
    config.receiver.port = "/dev/mock".to_string();
    config.receiver.handshake_timeout_ms = 500;
    config.receiver.read_timeout_ms = 20;
    config.receiver.timer_preread_ms = 0;
    config.receiver.timeout_hexdata_ms = 0;
    config.output.instrument = "TEST".to_string();
    config.output.nchannels = 4;
    config.output.samplerate = 4;
    config.output.filetime = 900;
    config.output.datadir = dir.join("data");
    config.output.ovsdir = dir.join("overview");
    config.control.net_port = 0;
    config
}

/// Files in `dir` with the given extension, sorted.
pub fn files_with_extension(dir: &Path, extension: &str) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == extension))
        .collect();
    files.sort();
    files
}

/// Polls `condition` every 10 ms for up to two seconds.
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
