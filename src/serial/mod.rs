//! Serial transport to the receiver.
//!
//! [`SerialLink`] owns the connection and a background I/O driver task. The driver
//! is the only code touching the port: it pushes every received byte into a
//! bounded queue and performs the writes handed to it through a channel. Callers
//! only ever wait on the queue with a timeout, so a stalled device never blocks
//! the daemon.
//!
//! The queue holds [`QUEUE_CAPACITY`] bytes. When the consumer falls behind,
//! newest bytes are dropped and counted (see [`SerialLink::dropped_bytes`]).

use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Bytes buffered between the driver and the reader.
pub const QUEUE_CAPACITY: usize = 65_536;
/// Upper bound on waiting for the driver task to exit.
pub const DRIVER_JOIN_TIMEOUT: Duration = Duration::from_millis(1500);
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);
const READ_CHUNK: usize = 4096;

/// Anything byte-oriented that can stand in for a serial port.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}
/// Boxed transport handed out by a [`SerialConnector`].
pub type DynSerial = Box<dyn SerialPortIO>;

/// Opens transports. Injected so tests can substitute an in-memory port.
#[async_trait]
pub trait SerialConnector: Send + Sync {
    /// Opens `port` at `baud_rate`.
    async fn open(&self, port: &str, baud_rate: u32) -> AppResult<DynSerial>;
}

/// Opens a native serial device, 8N1 without flow control.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeSerialConnector;

#[cfg(feature = "tokio_serial")]
#[async_trait]
impl SerialConnector for NativeSerialConnector {
    async fn open(&self, port: &str, baud_rate: u32) -> AppResult<DynSerial> {
        use tokio_serial::SerialPortBuilderExt;

        let port_path_owned = port.to_string();
        // Opening may block on the device node
        let stream = tokio::task::spawn_blocking(move || {
            tokio_serial::new(&port_path_owned, baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()
        })
        .await
        .map_err(|e| DaqError::SerialOpen {
            port: port.to_string(),
            reason: e.to_string(),
        })?
        .map_err(|e| DaqError::SerialOpen {
            port: port.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(stream))
    }
}

#[cfg(not(feature = "tokio_serial"))]
#[async_trait]
impl SerialConnector for NativeSerialConnector {
    async fn open(&self, _port: &str, _baud_rate: u32) -> AppResult<DynSerial> {
        Err(DaqError::SerialFeatureDisabled)
    }
}

struct Driver {
    task: JoinHandle<()>,
    writes: mpsc::UnboundedSender<Vec<u8>>,
    cancel: CancellationToken,
}

/// Byte-oriented handle on the receiver connection.
pub struct SerialLink {
    connector: Arc<dyn SerialConnector>,
    driver: Mutex<Option<Driver>>,
    rx: tokio::sync::Mutex<Option<mpsc::Receiver<u8>>>,
    dropped: Arc<AtomicU64>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl SerialLink {
    /// Closed link that opens through `connector`.
    pub fn new(connector: Arc<dyn SerialConnector>) -> Self {
        Self {
            connector,
            driver: Mutex::new(None),
            rx: tokio::sync::Mutex::new(None),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Link using the native serial connector.
    pub fn native() -> Self {
        Self::new(Arc::new(NativeSerialConnector))
    }

    /// Opens `port` and starts the I/O driver, replacing any previous connection.
    ///
    /// Returns `false` (and logs) on any failure; the link is then closed.
    pub async fn start(&self, port: &str, baud_rate: u32) -> bool {
        self.stop().await;

        let io = match timeout(OPEN_TIMEOUT, self.connector.open(port, baud_rate)).await {
            Ok(Ok(io)) => io,
            Ok(Err(e)) => {
                error!(port, baud_rate, error = %e, "Failed to open serial link");
                return false;
            }
            Err(_) => {
                error!(port, baud_rate, "Timed out opening serial link");
                return false;
            }
        };

        let (byte_tx, byte_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_driver(
            io,
            byte_tx,
            write_rx,
            cancel.clone(),
            self.dropped.clone(),
        ));

        *self.rx.lock().await = Some(byte_rx);
        *lock(&self.driver) = Some(Driver {
            task,
            writes: write_tx,
            cancel,
        });
        info!(port, baud_rate, "Serial link open");
        true
    }

    /// Closes the transport and joins the driver. Safe to call repeatedly.
    pub async fn stop(&self) {
        let driver = lock(&self.driver).take();
        self.rx.lock().await.take();

        let Some(Driver {
            task,
            writes,
            cancel,
        }) = driver
        else {
            return;
        };
        cancel.cancel();
        drop(writes);
        let abort = task.abort_handle();
        match timeout(DRIVER_JOIN_TIMEOUT, task).await {
            Ok(Ok(())) => debug!("Serial driver stopped"),
            Ok(Err(e)) => warn!(error = %e, "Serial driver task failed"),
            Err(_) => {
                warn!(
                    "Serial driver did not stop within {:?}, aborting",
                    DRIVER_JOIN_TIMEOUT
                );
                abort.abort();
            }
        }
        info!("Serial link closed");
    }

    /// The driver task is alive.
    pub fn is_open(&self) -> bool {
        lock(&self.driver)
            .as_ref()
            .is_some_and(|d| !d.task.is_finished())
    }

    /// Waits up to `wait` for the next received byte. `None` on timeout.
    pub async fn read_char(&self, wait: Duration) -> Option<char> {
        let mut guard = self.rx.lock().await;
        let received = match guard.as_mut() {
            Some(rx) => timeout(wait, rx.recv()).await,
            None => Ok(None),
        };
        match received {
            Ok(Some(byte)) => Some(char::from(byte)),
            Ok(None) => {
                // not started, or driver gone and queue drained
                drop(guard);
                tokio::time::sleep(wait).await;
                None
            }
            Err(_) => None,
        }
    }

    /// Queues `payload` for transmission. Non-ASCII characters are dropped; writes
    /// before a successful [`start`](Self::start) are ignored.
    pub fn write(&self, payload: &str) {
        let bytes: Vec<u8> = payload
            .chars()
            .filter(char::is_ascii)
            .map(|c| c as u8)
            .collect();
        match lock(&self.driver).as_ref() {
            Some(driver) => {
                if driver.writes.send(bytes).is_err() {
                    debug!("Serial driver gone, write dropped");
                }
            }
            None => trace!("Serial link not started, write ignored"),
        }
    }

    /// Bytes discarded because the receive queue was full.
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn run_driver(
    io: DynSerial,
    bytes: mpsc::Sender<u8>,
    mut writes: mpsc::UnboundedReceiver<Vec<u8>>,
    cancel: CancellationToken,
    dropped: Arc<AtomicU64>,
) {
    let (mut reader, mut writer) = tokio::io::split(io);
    let mut buf = vec![0u8; READ_CHUNK];
    let mut overflowing = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    warn!("Serial connection closed by peer");
                    break;
                }
                Ok(n) => {
                    let mut lost = 0u64;
                    for &byte in &buf[..n] {
                        if bytes.try_send(byte).is_err() {
                            lost += 1;
                        }
                    }
                    if lost > 0 {
                        dropped.fetch_add(lost, Ordering::Relaxed);
                        if !overflowing {
                            warn!(lost, "Serial receive queue full, dropping bytes");
                        }
                    }
                    overflowing = lost > 0;
                }
                Err(e) => {
                    error!(error = %e, "Serial read failed");
                    break;
                }
            },
            Some(payload) = writes.recv() => {
                let result = async {
                    writer.write_all(&payload).await?;
                    writer.flush().await
                }
                .await;
                if let Err(e) = result {
                    error!(error = %e, "Serial write failed");
                }
            }
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!(error = %e, "Serial shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    /// Hands out one end of an in-memory pipe.
    struct PipeConnector(Mutex<Option<DuplexStream>>);

    #[async_trait]
    impl SerialConnector for PipeConnector {
        async fn open(&self, _port: &str, _baud_rate: u32) -> AppResult<DynSerial> {
            match lock(&self.0).take() {
                Some(stream) => Ok(Box::new(stream)),
                None => Err(DaqError::SerialPortNotConnected),
            }
        }
    }

    fn pipe_link() -> (SerialLink, DuplexStream) {
        let (ours, device) = tokio::io::duplex(1024);
        let link = SerialLink::new(Arc::new(PipeConnector(Mutex::new(Some(ours)))));
        (link, device)
    }

    #[tokio::test]
    async fn reads_bytes_in_order() {
        let (link, mut device) = pipe_link();
        assert!(link.start("/dev/null", 115_200).await);
        device.write_all(b"$OK\r").await.unwrap();

        let mut got = String::new();
        for _ in 0..4 {
            got.push(link.read_char(Duration::from_secs(1)).await.unwrap());
        }
        assert_eq!(got, "$OK\r");
        assert!(link.read_char(Duration::from_millis(20)).await.is_none());
        link.stop().await;
    }

    #[tokio::test]
    async fn writes_reach_device_as_ascii() {
        let (link, mut device) = pipe_link();
        assert!(link.start("/dev/null", 115_200).await);
        link.write("S0\ré");

        let mut buf = [0u8; 3];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"S0\r");
        link.stop().await;
    }

    #[tokio::test]
    async fn failed_open_returns_false() {
        let (link, _device) = pipe_link();
        assert!(link.start("/dev/null", 115_200).await);
        // connector only had one stream to give
        assert!(!link.start("/dev/null", 115_200).await);
        assert!(!link.is_open());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_silences_writes() {
        let (link, _device) = pipe_link();
        link.stop().await;
        assert!(link.start("/dev/null", 115_200).await);
        link.stop().await;
        link.stop().await;
        link.write("ignored");
        assert!(!link.is_open());
        assert!(link.read_char(Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts_bytes() {
        let (link, mut device) = pipe_link();
        assert!(link.start("/dev/null", 115_200).await);

        let excess = 4_464;
        let mut flood = vec![b'A'; QUEUE_CAPACITY];
        flood.extend(std::iter::repeat(b'B').take(excess));
        device.write_all(&flood).await.unwrap();
        for _ in 0..200 {
            if link.dropped_bytes() >= excess as u64 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(link.dropped_bytes(), excess as u64);

        // what made it into the queue is still delivered in order
        for _ in 0..QUEUE_CAPACITY {
            assert_eq!(link.read_char(Duration::from_millis(100)).await, Some('A'));
        }
        assert!(link.read_char(Duration::from_millis(20)).await.is_none());

        // once drained, new bytes are accepted again
        device.write_all(b"$").await.unwrap();
        assert_eq!(link.read_char(Duration::from_secs(1)).await, Some('$'));
        assert_eq!(link.dropped_bytes(), excess as u64);
        link.stop().await;
    }

    #[tokio::test]
    async fn peer_close_ends_driver() {
        let (link, device) = pipe_link();
        assert!(link.start("/dev/null", 115_200).await);
        drop(device);
        assert!(link.read_char(Duration::from_millis(50)).await.is_none());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!link.is_open());
        link.stop().await;
    }
}
