//! Message types for the daemon actor.
//!
//! The control server, the scheduler and the acquisition task never touch the
//! run state directly. They send a [`DaemonCommand`] over an mpsc channel and, when
//! they need an answer, await the oneshot receiver embedded in the command.
//!
//! ```text
//! ControlServer / Scheduler           Daemon actor
//! -------------------------           ------------
//! 1. (cmd, rx) = DaemonCommand::start()
//! 2. send cmd               ------>
//!                                     3. process sequentially
//!                                     4. response.send(result)
//! 5. rx.await               <------
//! ```
//!
//! Each variant with a response has a helper constructor returning the command
//! together with its receiver.

use crate::core::RunState;
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::oneshot;

/// Snapshot of the daemon returned by [`DaemonCommand::GetStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaemonStatus {
    /// Lifecycle state.
    pub state: RunState,
    /// The acquisition task is alive.
    pub acquiring: bool,
    /// A one-shot overview waits for a frame.
    pub overview_pending: bool,
    /// Every frame produces an overview.
    pub overview_continuous: bool,
    /// Serial bytes dropped because the receive queue was full.
    pub dropped_bytes: u64,
}

/// Requests processed by the daemon actor, one at a time.
#[derive(Debug)]
pub enum DaemonCommand {
    /// Open the port, handshake, and start the acquisition loop.
    ///
    /// Responds `true` when acquisition is running afterwards (including when
    /// it already was).
    Start {
        /// Reply channel.
        response: oneshot::Sender<bool>,
    },

    /// Stop acquisition and close the port. Acknowledged once stopped.
    Stop {
        /// Reply channel.
        response: oneshot::Sender<()>,
    },

    /// Arm a one-shot overview taken from the next data frame.
    OverviewOnce {
        /// Reply channel.
        response: oneshot::Sender<()>,
    },

    /// Enable continuous overviews. Responds `false` when HDF5 is unavailable.
    OverviewContinuous {
        /// Reply channel.
        response: oneshot::Sender<bool>,
    },

    /// Disable continuous overviews and cancel an armed one-shot.
    OverviewOff {
        /// Reply channel.
        response: oneshot::Sender<()>,
    },

    /// Report a [`DaemonStatus`].
    GetStatus {
        /// Reply channel.
        response: oneshot::Sender<DaemonStatus>,
    },

    /// Sent by the acquisition task after an overview row was stored (or
    /// failed to store). No response.
    OverviewCaptured {
        /// Overview file, `None` when storing failed.
        path: Option<PathBuf>,
    },

    /// Stop acquisition and end the actor loop.
    Shutdown {
        /// Reply channel.
        response: oneshot::Sender<()>,
    },
}

impl DaemonCommand {
    /// [`Start`](Self::Start) with its reply channel.
    pub fn start() -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        (Self::Start { response: tx }, rx)
    }

    /// [`Stop`](Self::Stop) with its reply channel.
    pub fn stop() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Stop { response: tx }, rx)
    }

    /// [`OverviewOnce`](Self::OverviewOnce) with its reply channel.
    pub fn overview_once() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::OverviewOnce { response: tx }, rx)
    }

    /// [`OverviewContinuous`](Self::OverviewContinuous) with its reply channel.
    pub fn overview_continuous() -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        (Self::OverviewContinuous { response: tx }, rx)
    }

    /// [`OverviewOff`](Self::OverviewOff) with its reply channel.
    pub fn overview_off() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::OverviewOff { response: tx }, rx)
    }

    /// [`GetStatus`](Self::GetStatus) with its reply channel.
    pub fn get_status() -> (Self, oneshot::Receiver<DaemonStatus>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetStatus { response: tx }, rx)
    }

    /// [`Shutdown`](Self::Shutdown) with its reply channel.
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Shutdown { response: tx }, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn helper_returns_matching_receiver() {
        let (cmd, rx) = DaemonCommand::overview_continuous();
        match cmd {
            DaemonCommand::OverviewContinuous { response } => {
                response.send(true).unwrap();
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(rx.await.unwrap());
    }
}
