//! ZeroMQ PUB streaming of spectrum frames.
//!
//! Every frame is one multipart message:
//!
//! | part | content                                      |
//! |------|----------------------------------------------|
//! | 0    | topic (ASCII)                                |
//! | 1    | JSON metadata, compact, keys sorted          |
//! | 2    | matrix, `uint8`, row-major                   |
//! | 3    | frequencies, `float64` little-endian         |
//! | 4    | sweep timestamps, `int64` little-endian (µs) |
//!
//! Publishing never blocks the writer: frames go through a bounded queue of
//! `hwm` entries to a socket task, and frames that do not fit are dropped and
//! counted.

use super::spectrum::SpectrumFrame;
use crate::config::StreamingConfig;
use crate::error::{AppResult, DaqError};
use bytes::Bytes;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Value of the `schema` metadata key.
pub const SCHEMA: &str = "callisto-zmq-1";

/// Scalar context of one published frame.
#[derive(Debug, Clone)]
pub struct FrameContext<'a> {
    /// Station name.
    pub instrument: &'a str,
    /// Frame start, µs since the epoch.
    pub ts_us: i64,
    /// Sweeps per second.
    pub samplerate: u32,
    /// Channels per sweep.
    pub nchannels: usize,
    /// Merged over the standard keys.
    pub extra: Map<String, Value>,
}

/// Builds the JSON metadata part.
pub fn frame_metadata(ctx: &FrameContext<'_>, frame: &SpectrumFrame) -> Map<String, Value> {
    let mut meta = Map::new();
    meta.insert("schema".into(), json!(SCHEMA));
    meta.insert("instrument".into(), json!(ctx.instrument));
    meta.insert("ts_us".into(), json!(ctx.ts_us));
    meta.insert("samplerate".into(), json!(ctx.samplerate));
    meta.insert("nchannels".into(), json!(ctx.nchannels));
    meta.insert("matrix_dtype".into(), json!("uint8"));
    meta.insert("matrix_shape".into(), json!([frame.sweeps, frame.channels]));
    meta.insert("freq_dtype".into(), json!("float64"));
    meta.insert("freq_shape".into(), json!([frame.frequencies_mhz.len()]));
    meta.insert("timestamps_dtype".into(), json!("int64"));
    meta.insert("timestamps_shape".into(), json!([frame.timestamps_us.len()]));
    for (key, value) in &ctx.extra {
        meta.insert(key.clone(), value.clone());
    }
    meta
}

/// Encodes the five message parts for `frame`.
pub fn encode_frame_message(
    topic: &str,
    ctx: &FrameContext<'_>,
    frame: &SpectrumFrame,
) -> AppResult<Vec<Bytes>> {
    // serde_json maps are ordered by key unless `preserve_order` is enabled.
    let meta = serde_json::to_vec(&Value::Object(frame_metadata(ctx, frame)))
        .map_err(|e| DaqError::Streaming(format!("metadata encoding: {}", e)))?;

    let freqs: Vec<u8> = frame
        .frequencies_mhz
        .iter()
        .flat_map(|f| f.to_le_bytes())
        .collect();
    let timestamps: Vec<u8> = frame
        .timestamps_us
        .iter()
        .flat_map(|t| t.to_le_bytes())
        .collect();

    Ok(vec![
        Bytes::from(normalize_topic(topic)),
        Bytes::from(meta),
        Bytes::copy_from_slice(&frame.matrix),
        Bytes::from(freqs),
        Bytes::from(timestamps),
    ])
}

/// ASCII-only topic, defaulting to `callisto`.
pub fn normalize_topic(topic: &str) -> String {
    let ascii: String = topic.chars().filter(char::is_ascii).collect();
    if ascii.is_empty() {
        "callisto".to_string()
    } else {
        ascii
    }
}

/// Handle to the publishing task.
pub struct ZmqPublisher {
    tx: mpsc::Sender<Vec<Bytes>>,
    dropped: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl ZmqPublisher {
    /// Binds (or connects) the PUB socket and spawns the sender task.
    pub async fn start(config: &StreamingConfig) -> AppResult<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| DaqError::Streaming("endpoint is required".into()))?;

        let socket = open_socket(endpoint, config.bind).await?;
        info!(endpoint, bind = config.bind, "ZeroMQ publisher ready");

        let (tx, rx) = mpsc::channel(config.hwm.max(1));
        let task = tokio::spawn(send_loop(socket, rx));
        Ok(Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            task,
        })
    }

    /// Queues one message without waiting. Returns `false` if it was dropped.
    pub fn publish(&self, parts: Vec<Bytes>) -> bool {
        match self.tx.try_send(parts) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(total, "Publisher queue full, frame dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Publisher task has exited, frame dropped");
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// A publisher whose queue is read by the caller instead of a socket task.
    #[cfg(test)]
    pub(crate) fn detached(hwm: usize) -> (Self, mpsc::Receiver<Vec<Bytes>>) {
        let (tx, rx) = mpsc::channel(hwm.max(1));
        let publisher = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            task: tokio::spawn(async {}),
        };
        (publisher, rx)
    }

    /// Frames dropped because the queue was full or the socket task gone.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Closes the queue and waits for queued frames to be handed to the socket.
    pub async fn shutdown(self) {
        drop(self.tx);
        if tokio::time::timeout(std::time::Duration::from_secs(1), self.task)
            .await
            .is_err()
        {
            warn!("Publisher task did not finish in time");
        }
    }
}

#[cfg(feature = "streaming_zmq")]
type PubSocket = zeromq::PubSocket;

#[cfg(feature = "streaming_zmq")]
async fn open_socket(endpoint: &str, bind: bool) -> AppResult<PubSocket> {
    use zeromq::Socket;

    let mut socket = zeromq::PubSocket::new();
    if bind {
        socket
            .bind(endpoint)
            .await
            .map_err(|e| DaqError::Streaming(format!("bind {}: {}", endpoint, e)))?;
    } else {
        socket
            .connect(endpoint)
            .await
            .map_err(|e| DaqError::Streaming(format!("connect {}: {}", endpoint, e)))?;
    }
    Ok(socket)
}

#[cfg(feature = "streaming_zmq")]
async fn send_loop(mut socket: PubSocket, mut rx: mpsc::Receiver<Vec<Bytes>>) {
    use zeromq::{SocketSend, ZmqMessage};

    while let Some(parts) = rx.recv().await {
        let mut parts = parts.into_iter();
        let Some(first) = parts.next() else {
            continue;
        };
        let mut message = ZmqMessage::from(first);
        for part in parts {
            message.push_back(part);
        }
        if let Err(e) = socket.send(message).await {
            warn!("ZeroMQ publish failed: {}", e);
        }
    }
    debug!("Publisher task finished");
}

#[cfg(not(feature = "streaming_zmq"))]
struct PubSocket;

#[cfg(not(feature = "streaming_zmq"))]
async fn open_socket(_endpoint: &str, _bind: bool) -> AppResult<PubSocket> {
    Err(DaqError::FeatureNotEnabled("streaming_zmq".into()))
}

#[cfg(not(feature = "streaming_zmq"))]
async fn send_loop(_socket: PubSocket, mut rx: mpsc::Receiver<Vec<Bytes>>) {
    while rx.recv().await.is_some() {}
}
