//! The daemon actor.
//!
//! [`Daemon`] owns the [`RunState`], the serial link and the acquisition task.
//! Everything else reaches it through a [`DaemonHandle`], which turns calls into
//! [`DaemonCommand`]s processed one at a time, so start/stop guards never race.
//!
//! Lifecycle:
//!
//! ```text
//! STOPPED ──start──▶ STARTING ──handshake ok──▶ RUNNING ──stop──▶ STOPPING ──▶ STOPPED
//!                        └──── open/handshake failed ───────────────────────▶ STOPPED
//! RUNNING ──overview──▶ OVERVIEW ──row stored──▶ RUNNING
//! ```

pub mod acquisition;
pub mod runtime;

pub use acquisition::{handshake, OverviewControl};
pub use runtime::{load_frequency_table, load_schedule, serve, serve_with};

use crate::config::DaemonConfig;
use crate::core::{ControlActions, FrequencyTable, RunState};
use crate::data::DataWriterEngine;
use crate::data::publisher::ZmqPublisher;
use crate::error::{AppResult, DaqError};
use crate::messages::{DaemonCommand, DaemonStatus};
use crate::serial::SerialLink;
use acquisition::Acquisition;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Queue depth of the actor's command channel.
pub const COMMAND_CAPACITY: usize = 32;
/// Upper bound on waiting for the acquisition loop after cancelling it.
pub const ACQUISITION_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

struct AcquisitionTask {
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Single owner of the receiver lifecycle.
pub struct Daemon {
    config: DaemonConfig,
    state: RunState,
    link: Arc<SerialLink>,
    engine: Arc<Mutex<DataWriterEngine>>,
    overview: Arc<OverviewControl>,
    acquisition: Option<AcquisitionTask>,
    events: mpsc::Sender<DaemonCommand>,
    shutdown: CancellationToken,
}

impl Daemon {
    /// `events` must feed the receiver later passed to [`run`](Self::run); the
    /// acquisition task reports overview captures through it.
    pub fn new(
        config: DaemonConfig,
        table: FrequencyTable,
        link: Arc<SerialLink>,
        events: mpsc::Sender<DaemonCommand>,
        shutdown: CancellationToken,
    ) -> Self {
        let engine = DataWriterEngine::new(config.output.clone(), table);
        Self {
            config,
            state: RunState::Stopped,
            link,
            engine: Arc::new(Mutex::new(engine)),
            overview: Arc::new(OverviewControl::default()),
            acquisition: None,
            events,
            shutdown,
        }
    }

    /// Creates the command channel, the daemon and a handle to it.
    pub fn with_handle(
        config: DaemonConfig,
        table: FrequencyTable,
        link: Arc<SerialLink>,
        shutdown: CancellationToken,
    ) -> (Self, DaemonHandle, mpsc::Receiver<DaemonCommand>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let daemon = Self::new(config, table, link, tx.clone(), shutdown);
        (daemon, DaemonHandle::new(tx), rx)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Processes commands until [`DaemonCommand::Shutdown`].
    pub async fn run(mut self, mut command_rx: mpsc::Receiver<DaemonCommand>) {
        info!("Daemon actor started");
        self.attach_publisher().await;

        while let Some(command) = command_rx.recv().await {
            match command {
                DaemonCommand::Start { response } => {
                    let result = self.start().await;
                    let _ = response.send(result);
                }
                DaemonCommand::Stop { response } => {
                    self.stop().await;
                    let _ = response.send(());
                }
                DaemonCommand::OverviewOnce { response } => {
                    self.overview_once();
                    let _ = response.send(());
                }
                DaemonCommand::OverviewContinuous { response } => {
                    let result = self.overview_continuous().await;
                    let _ = response.send(result);
                }
                DaemonCommand::OverviewOff { response } => {
                    self.overview_off();
                    let _ = response.send(());
                }
                DaemonCommand::GetStatus { response } => {
                    let _ = response.send(self.status());
                }
                DaemonCommand::OverviewCaptured { path } => self.overview_captured(path),
                DaemonCommand::Shutdown { response } => {
                    self.stop().await;
                    self.detach_publisher().await;
                    let _ = response.send(());
                    break;
                }
            }
        }
        info!("Daemon actor stopped");
    }

    async fn attach_publisher(&mut self) {
        let streaming = &self.config.output.streaming;
        if streaming.endpoint.is_none() {
            return;
        }
        match ZmqPublisher::start(streaming).await {
            Ok(publisher) => lock(&self.engine).set_publisher(publisher),
            Err(e) => warn!("Streaming disabled: {}", e),
        }
    }

    async fn detach_publisher(&mut self) {
        let publisher = lock(&self.engine).take_publisher();
        if let Some(publisher) = publisher {
            let dropped = publisher.dropped();
            if dropped > 0 {
                warn!(dropped, "Frames dropped by the publisher queue");
            }
            publisher.shutdown().await;
        }
    }

    fn status(&self) -> DaemonStatus {
        DaemonStatus {
            state: self.state,
            acquiring: self.acquisition.is_some(),
            overview_pending: self.overview.is_pending(),
            overview_continuous: self.overview.is_continuous(),
            dropped_bytes: self.link.dropped_bytes(),
        }
    }

    async fn start(&mut self) -> bool {
        if self.acquisition.is_some() {
            debug!("Start requested while acquiring, ignored");
            return true;
        }
        let receiver = self.config.receiver.clone();
        info!(port = %receiver.port, baud_rate = receiver.baud_rate, "Starting recording");
        self.state = RunState::Starting;

        if !self.link.start(&receiver.port, receiver.baud_rate).await {
            self.state = RunState::Stopped;
            return false;
        }
        if !handshake(&self.link, receiver.handshake_timeout()).await {
            let err = DaqError::Handshake(receiver.handshake_timeout_ms);
            error!("Aborting start: {}", err);
            self.link.stop().await;
            self.state = RunState::Stopped;
            return false;
        }

        let cancel = self.shutdown.child_token();
        let acquisition = Acquisition {
            link: self.link.clone(),
            engine: self.engine.clone(),
            overview: self.overview.clone(),
            events: self.events.clone(),
            read_timeout: receiver.read_timeout(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(acquisition.run());
        self.acquisition = Some(AcquisitionTask { task, cancel });

        self.state = if self.overview.is_pending() {
            RunState::Overview
        } else {
            RunState::Running
        };
        info!(state = %self.state, "Recording started");
        true
    }

    async fn stop(&mut self) {
        let Some(AcquisitionTask { task, cancel }) = self.acquisition.take() else {
            if self.state != RunState::Stopped {
                self.overview.cancel_once();
                self.state = RunState::Stopped;
            }
            return;
        };
        info!("Stopping recording");
        self.state = RunState::Stopping;

        let receiver = &self.config.receiver;
        if !receiver.preread_delay().is_zero() {
            tokio::time::sleep(receiver.preread_delay()).await;
        }

        cancel.cancel();
        let abort = task.abort_handle();
        match tokio::time::timeout(ACQUISITION_JOIN_TIMEOUT, task).await {
            Ok(Ok(())) => debug!("Acquisition loop joined"),
            Ok(Err(e)) => warn!("Acquisition task failed: {}", e),
            Err(_) => {
                warn!(
                    "Acquisition loop did not stop within {:?}, aborting",
                    ACQUISITION_JOIN_TIMEOUT
                );
                abort.abort();
            }
        }

        if !receiver.drain_delay().is_zero() {
            tokio::time::sleep(receiver.drain_delay()).await;
        }
        self.link.stop().await;
        self.overview.cancel_once();
        self.state = RunState::Stopped;
        info!("Recording stopped");
    }

    fn overview_once(&mut self) {
        info!("One-shot spectral overview requested");
        if self.acquisition.is_none() {
            info!("Not recording; the overview is taken from the next acquired frame");
        }
        self.overview.arm_once();
        self.state = RunState::Overview;
    }

    async fn overview_continuous(&mut self) -> bool {
        let engine = self.engine.clone();
        let available = tokio::task::spawn_blocking(move || lock(&engine).hdf5_available())
            .await
            .unwrap_or(false);
        if available {
            info!("Continuous spectral overview enabled");
            self.overview.set_continuous(true);
        } else {
            warn!("Continuous overview refused: HDF5 backend unavailable");
        }
        available
    }

    fn overview_off(&mut self) {
        info!("Spectral overview disabled");
        self.overview.set_continuous(false);
        self.overview.cancel_once();
        self.state = self.idle_state();
    }

    fn overview_captured(&mut self, path: Option<PathBuf>) {
        match &path {
            Some(path) => info!(path = %path.display(), "Overview stored"),
            None => debug!("Overview capture produced no file"),
        }
        if self.state == RunState::Overview && !self.overview.is_pending() {
            self.state = self.idle_state();
        }
    }

    fn idle_state(&self) -> RunState {
        if self.acquisition.is_some() {
            RunState::Running
        } else {
            RunState::Stopped
        }
    }
}

/// Cloneable front end of the daemon actor.
#[derive(Clone)]
pub struct DaemonHandle {
    tx: mpsc::Sender<DaemonCommand>,
}

impl DaemonHandle {
    /// Handle on the actor fed by `tx`.
    pub fn new(tx: mpsc::Sender<DaemonCommand>) -> Self {
        Self { tx }
    }

    async fn request<T>(&self, (command, rx): (DaemonCommand, oneshot::Receiver<T>)) -> AppResult<T> {
        self.tx
            .send(command)
            .await
            .map_err(|_| DaqError::ActorUnavailable)?;
        rx.await.map_err(|_| DaqError::ActorUnavailable)
    }

    /// Starts recording; `true` when acquisition runs afterwards.
    pub async fn start_recording(&self) -> AppResult<bool> {
        self.request(DaemonCommand::start()).await
    }

    /// Stops recording. A no-op when already stopped.
    pub async fn stop_recording(&self) -> AppResult<()> {
        self.request(DaemonCommand::stop()).await
    }

    /// Arms a one-shot overview.
    pub async fn arm_overview(&self) -> AppResult<()> {
        self.request(DaemonCommand::overview_once()).await
    }

    /// `false` when HDF5 output is unavailable.
    pub async fn enable_continuous_overview(&self) -> AppResult<bool> {
        self.request(DaemonCommand::overview_continuous()).await
    }

    /// Ends continuous overviews and cancels a pending one-shot.
    pub async fn disable_overview(&self) -> AppResult<()> {
        self.request(DaemonCommand::overview_off()).await
    }

    /// Current [`DaemonStatus`].
    pub async fn status(&self) -> AppResult<DaemonStatus> {
        self.request(DaemonCommand::get_status()).await
    }

    /// Stops recording and ends the actor.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.request(DaemonCommand::shutdown()).await
    }
}

#[async_trait]
impl ControlActions for DaemonHandle {
    async fn start(&self) {
        match self.start_recording().await {
            Ok(true) => {}
            Ok(false) => warn!("Recording did not start"),
            Err(e) => error!("start: {}", e),
        }
    }

    async fn stop(&self) {
        if let Err(e) = self.stop_recording().await {
            error!("stop: {}", e);
        }
    }

    async fn overview_once(&self) {
        if let Err(e) = self.arm_overview().await {
            error!("overview: {}", e);
        }
    }

    async fn overview_continuous(&self) -> bool {
        self.enable_continuous_overview().await.unwrap_or_else(|e| {
            error!("overview-continuous: {}", e);
            false
        })
    }

    async fn overview_off(&self) {
        if let Err(e) = self.disable_overview().await {
            error!("overview-off: {}", e);
        }
    }
}
