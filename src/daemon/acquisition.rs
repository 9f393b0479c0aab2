//! Receiver handshake and the acquisition loop.

use super::lock;
use crate::core::RawBuffer;
use crate::data::DataWriterEngine;
use crate::messages::DaemonCommand;
use crate::protocol::{FrameDecoder, FrameEvent, ID_QUERY, ID_RESPONSE, RESET_STRING};
use crate::serial::SerialLink;
use crate::timestamp::now_us;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const HANDSHAKE_POLL: Duration = Duration::from_millis(200);
const MIN_HANDSHAKE_WINDOW: Duration = Duration::from_millis(500);

/// Resets the receiver and waits for it to identify itself.
///
/// Sends [`RESET_STRING`], then watches the byte stream for [`ID_RESPONSE`] for at
/// most `window` (never less than 500 ms). [`ID_QUERY`] is sent afterwards in
/// either case. Returns whether the response was seen.
pub async fn handshake(link: &SerialLink, window: Duration) -> bool {
    link.write(RESET_STRING);

    let expected: Vec<char> = ID_RESPONSE.chars().collect();
    let mut seen: VecDeque<char> = VecDeque::with_capacity(expected.len());
    let deadline = Instant::now() + window.max(MIN_HANDSHAKE_WINDOW);
    let mut got_response = false;

    while Instant::now() < deadline {
        let Some(ch) = link.read_char(HANDSHAKE_POLL).await else {
            continue;
        };
        if seen.len() == expected.len() {
            seen.pop_front();
        }
        seen.push_back(ch);
        if seen.iter().eq(expected.iter()) {
            got_response = true;
            break;
        }
    }

    if got_response {
        info!("Receiver answered the identification handshake");
    } else {
        warn!(
            window_ms = window.max(MIN_HANDSHAKE_WINDOW).as_millis() as u64,
            "No identification response from receiver"
        );
    }
    link.write(ID_QUERY);
    got_response
}

/// Overview requests shared between the actor and the acquisition task.
#[derive(Debug, Default)]
pub struct OverviewControl {
    once: AtomicBool,
    continuous: AtomicBool,
}

impl OverviewControl {
    /// Requests one overview from the next frame.
    pub fn arm_once(&self) {
        self.once.store(true, Ordering::SeqCst);
    }

    /// Turns continuous overviews on or off.
    pub fn set_continuous(&self, enabled: bool) {
        self.continuous.store(enabled, Ordering::SeqCst);
    }

    /// Withdraws a pending one-shot request.
    pub fn cancel_once(&self) {
        self.once.store(false, Ordering::SeqCst);
    }

    /// A one-shot request is waiting for a frame.
    pub fn is_pending(&self) -> bool {
        self.once.load(Ordering::SeqCst)
    }

    /// Every frame produces an overview.
    pub fn is_continuous(&self) -> bool {
        self.continuous.load(Ordering::SeqCst)
    }

    /// Whether the next frame should produce an overview. Consumes a one-shot
    /// request.
    pub fn take_request(&self) -> bool {
        let once = self.once.swap(false, Ordering::SeqCst);
        once || self.is_continuous()
    }
}

/// Reads the receiver until cancelled, handing every data frame to the writer.
pub struct Acquisition {
    /// Open link to the receiver.
    pub link: Arc<SerialLink>,
    /// Shared with the actor, locked from blocking tasks only.
    pub engine: Arc<Mutex<DataWriterEngine>>,
    /// Overview requests set by the actor.
    pub overview: Arc<OverviewControl>,
    /// Receives [`DaemonCommand::OverviewCaptured`].
    pub events: mpsc::Sender<DaemonCommand>,
    /// Wait per `read_char` call.
    pub read_timeout: Duration,
    /// Ends the loop.
    pub cancel: CancellationToken,
}

impl Acquisition {
    /// Runs until `cancel` fires or the link closes.
    pub async fn run(self) {
        info!("Acquisition loop started");
        let mut decoder = FrameDecoder::new();

        loop {
            let ch = tokio::select! {
                _ = self.cancel.cancelled() => break,
                ch = self.link.read_char(self.read_timeout) => ch,
            };
            let Some(ch) = ch else {
                continue;
            };

            match decoder.push(ch, now_us()) {
                Some(FrameEvent::Message(text)) => debug!(message = %text, "Firmware message"),
                Some(FrameEvent::Data(raw)) => self.store(raw).await,
                None => {}
            }
        }

        let stats = decoder.stats();
        info!(
            frames = stats.frames,
            messages = stats.messages,
            bad_groups = stats.bad_groups,
            unexpected = stats.unexpected_chars,
            dropped_bytes = self.link.dropped_bytes(),
            "Acquisition loop stopped"
        );
    }

    async fn store(&self, raw: RawBuffer) {
        let capture = self.overview.take_request();
        let engine = self.engine.clone();
        let len = raw.len();

        let outcome = tokio::task::spawn_blocking(move || {
            let mut engine = lock(&engine);
            let written = engine.write_data_buffer(&raw);
            let overview = capture.then(|| {
                let points = engine.frame_for(&raw).last_sweep_overview();
                engine.save_overview(&points, raw.timestamp_us)
            });
            (written, overview)
        })
        .await;

        let (written, overview) = match outcome {
            Ok(result) => result,
            Err(e) => {
                error!("Writer task failed: {}", e);
                return;
            }
        };

        match written {
            Ok(Some(path)) => debug!(samples = len, path = %path.display(), "Buffer stored"),
            Ok(None) => {}
            Err(e) => error!(samples = len, "Failed to persist data buffer: {}", e),
        }

        if let Some(result) = overview {
            let path: Option<PathBuf> = match result {
                Ok(path) => path,
                Err(e) => {
                    error!("Failed to store overview: {}", e);
                    None
                }
            };
            if self
                .events
                .try_send(DaemonCommand::OverviewCaptured { path })
                .is_err()
            {
                debug!("Daemon busy, overview notification dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppResult, DaqError};
    use crate::serial::{DynSerial, SerialConnector};
    use async_trait::async_trait;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tracing_test::traced_test;

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

    async fn open_link() -> (SerialLink, DuplexStream) {
        let (ours, device) = tokio::io::duplex(1024);
        let link = SerialLink::new(Arc::new(PipeConnector(Mutex::new(Some(ours)))));
        assert!(link.start("/dev/mock", 115_200).await);
        (link, device)
    }

    async fn read_exactly(device: &mut DuplexStream, len: usize) -> String {
        let mut buf = vec![0u8; len];
        device.read_exact(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    #[traced_test]
    async fn handshake_sees_response_in_noise() {
        let (link, mut device) = open_link().await;
        let responder = tokio::spawn(async move {
            assert_eq!(read_exactly(&mut device, RESET_STRING.len()).await, RESET_STRING);
            device
                .write_all(format!("]$CRX:Running\r{}", ID_RESPONSE).as_bytes())
                .await
                .unwrap();
            assert_eq!(read_exactly(&mut device, ID_QUERY.len()).await, ID_QUERY);
            device
        });

        assert!(handshake(&link, Duration::from_secs(2)).await);
        let _device = responder.await.unwrap();
        assert!(logs_contain("Receiver answered the identification handshake"));
        link.stop().await;
    }

    #[tokio::test]
    #[traced_test]
    async fn handshake_times_out_on_silent_receiver() {
        let (link, mut device) = open_link().await;

        let started = Instant::now();
        assert!(!handshake(&link, Duration::from_millis(10)).await);
        // the window is never shorter than the minimum
        assert!(started.elapsed() >= MIN_HANDSHAKE_WINDOW);
        assert!(logs_contain("No identification response from receiver"));

        // the identification query still goes out
        let expected = format!("{}{}", RESET_STRING, ID_QUERY);
        assert_eq!(read_exactly(&mut device, expected.len()).await, expected);
        link.stop().await;
    }

    #[test]
    fn one_shot_request_is_consumed() {
        let control = OverviewControl::default();
        assert!(!control.take_request());
        control.arm_once();
        assert!(control.is_pending());
        assert!(control.take_request());
        assert!(!control.take_request());
    }

    #[test]
    fn continuous_request_persists() {
        let control = OverviewControl::default();
        control.set_continuous(true);
        assert!(control.take_request());
        assert!(control.take_request());
        control.set_continuous(false);
        assert!(!control.take_request());
    }
}
