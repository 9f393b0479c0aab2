//! Core domain types shared by the acquisition pipeline.
//!
//! These are plain values that flow between the serial decoder, the daemon actor,
//! the scheduler and the storage sinks. None of them own resources.
//!
//! [`ControlActions`] is the seam through which the TCP control server and the
//! scheduler drive the daemon.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operations the control surfaces may request from the daemon.
///
/// Implementations must be cheap to call concurrently; the daemon's handle
/// serialises them onto its actor.
#[async_trait]
pub trait ControlActions: Send + Sync {
    /// Start recording. No-op when already recording.
    async fn start(&self);
    /// Stop recording. No-op when stopped.
    async fn stop(&self);
    /// Capture one spectral overview.
    async fn overview_once(&self);
    /// Enable continuous overviews; `false` when the HDF5 backend is unavailable.
    async fn overview_continuous(&self) -> bool;
    /// Disable continuous overviews.
    async fn overview_off(&self);
}

/// Decoded sample bytes of one data frame together with the time the frame started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBuffer {
    /// One byte per decoded sample, in receipt order.
    pub data: Vec<u8>,
    /// Frame start, microseconds since the Unix epoch.
    pub timestamp_us: i64,
}

impl RawBuffer {
    /// Wraps decoded samples of a frame that started at `timestamp_us`.
    pub fn new(data: Vec<u8>, timestamp_us: i64) -> Self {
        Self { data, timestamp_us }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the frame decoded to no samples.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One point of a spectral overview.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverviewPoint {
    /// Centre frequency in MHz.
    pub freq_mhz: f64,
    /// Receiver amplitude in digits.
    pub value: i32,
}

/// Lifecycle state of the receiver, owned by the daemon actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunState {
    /// Idle, port closed.
    Stopped,
    /// Opening the port and running the handshake.
    Starting,
    /// Acquisition loop active.
    Running,
    /// Waiting for the acquisition loop to drain.
    Stopping,
    /// An overview capture is pending.
    Overview,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Stopped => "STOPPED",
            RunState::Starting => "STARTING",
            RunState::Running => "RUNNING",
            RunState::Stopping => "STOPPING",
            RunState::Overview => "OVERVIEW",
        };
        f.write_str(name)
    }
}

/// Action codes understood by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleAction {
    /// Code 3: start recording.
    Start,
    /// Code 0: stop recording.
    Stop,
    /// Code 8: take one spectral overview.
    Overview,
    /// Any other code; logged and ignored.
    Unsupported(i32),
}

impl From<i32> for ScheduleAction {
    fn from(code: i32) -> Self {
        match code {
            3 => ScheduleAction::Start,
            0 => ScheduleAction::Stop,
            8 => ScheduleAction::Overview,
            other => ScheduleAction::Unsupported(other),
        }
    }
}

/// One line of the schedule file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEntry {
    /// Seconds since UTC midnight, `0..=86399`.
    pub t: u32,
    /// Raw action code.
    pub action: i32,
    /// Focus code column, when present.
    pub focuscode: Option<i32>,
}

impl ScheduleEntry {
    /// The action encoded by [`action`](Self::action).
    pub fn kind(&self) -> ScheduleAction {
        ScheduleAction::from(self.action)
    }
}

/// Per-channel centre frequencies in MHz, loaded once at startup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrequencyTable {
    mhz: Vec<f64>,
}

impl FrequencyTable {
    /// Table with one entry per channel, in channel order.
    pub fn new(mhz: Vec<f64>) -> Self {
        Self { mhz }
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.mhz.len()
    }

    /// True when no frequency program was loaded.
    pub fn is_empty(&self) -> bool {
        self.mhz.is_empty()
    }

    /// Frequency of the zero-based `channel`.
    pub fn get(&self, channel: usize) -> Option<f64> {
        self.mhz.get(channel).copied()
    }

    /// All frequencies in channel order.
    pub fn as_slice(&self) -> &[f64] {
        &self.mhz
    }
}
