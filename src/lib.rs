//! # e-Callisto acquisition daemon
//!
//! Drives an e-Callisto radio spectrometer over a serial link, decodes its
//! hex-encoded sweeps and stores them as FITS or HDF5 files, optionally
//! streaming every frame over ZeroMQ. Recording is controlled from a
//! line-oriented TCP protocol and a time-of-day schedule.
//!
//! ## Crate Structure
//!
//! - **`config`**: `DaemonConfig`, loaded with figment from TOML and `CALLISTO_` env vars.
//! - **`core`**: Shared value types (`RawBuffer`, `RunState`, `ScheduleEntry`, ...) and the
//!   `ControlActions` trait implemented by the daemon.
//! - **`daemon`**: The actor owning the run state, the acquisition loop and process wiring.
//! - **`data`**: Matrix reshaping, file rotation, FITS/HDF5 writers and the ZeroMQ sink.
//! - **`error`**: The `DaqError` enum used across the crate.
//! - **`frequencies`**: Loader for the receiver's frequency program.
//! - **`logging`**: `tracing-subscriber` initialisation.
//! - **`messages`**: Commands exchanged with the daemon actor.
//! - **`network`**: TCP control protocol and server.
//! - **`protocol`**: Serial wire constants and the frame decoder.
//! - **`scheduler`**: Schedule file loader and the periodic scheduler.
//! - **`serial`**: Serial transport with its background I/O driver.
//! - **`timestamp`**: Epoch-microsecond helpers.

pub mod config;
pub mod core;
pub mod daemon;
pub mod data;
pub mod error;
pub mod frequencies;
pub mod logging;
pub mod messages;
pub mod network;
pub mod protocol;
pub mod scheduler;
pub mod serial;
pub mod timestamp;

pub use config::DaemonConfig;
pub use error::{AppResult, DaqError};
