//! Custom error types for the daemon.
//!
//! `DaqError` is the single error type used across the crate. It is built with
//! `thiserror` and covers configuration loading, I/O, the serial transport, the
//! storage and streaming sinks, and the parsers for auxiliary input files.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps `figment` errors raised while merging the TOML file and the
//!   `CALLISTO_` environment overrides.
//! - **`Configuration`**: Semantic errors found by [`crate::config::DaemonConfig::validate`].
//! - **`Io`**: Wraps `std::io::Error` for file and network I/O.
//! - **`Serial*`**: Transport problems. These never terminate the process; the daemon
//!   falls back to `STOPPED`.
//! - **`Storage`** / **`Streaming`**: A single write or publish was abandoned.
//! - **`FeatureNotEnabled`**: Functionality compiled out via cargo features, with a hint
//!   on how to enable it.
//!
//! `#[from]` conversions keep `?` usable throughout.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Every failure the daemon reports.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Loading or merging configuration sources failed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but is not usable.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Filesystem or socket failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No transport is available.
    #[error("Serial port not connected")]
    SerialPortNotConnected,

    /// The serial device could not be opened.
    #[error("Failed to open serial port {port}: {reason}")]
    SerialOpen {
        /// Device path.
        port: String,
        /// Error reported by the OS.
        reason: String,
    },

    /// Built without native serial support.
    #[error("Serial support not enabled. Rebuild with --features tokio_serial")]
    SerialFeatureDisabled,

    /// No identification response within the window, in ms.
    #[error("Receiver did not answer the identification handshake within {0} ms")]
    Handshake(u64),

    /// A line of an auxiliary file could not be parsed.
    #[error("Parse error in {source_name} line {line}: {message}")]
    Parse {
        /// File being parsed.
        source_name: String,
        /// One-based line number.
        line: usize,
        /// What was wrong with the line.
        message: String,
    },

    /// A storage backend rejected a write.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Publisher setup or encoding failed.
    #[error("Streaming error: {0}")]
    Streaming(String),

    /// The requested cargo feature was not compiled in.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    /// The daemon actor has exited.
    #[error("Daemon actor is not running")]
    ActorUnavailable,

    /// Error from the HDF5 library.
    #[cfg(feature = "storage_hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

impl DaqError {
    /// Whether a failed operation may succeed if simply retried later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DaqError::Io(_)
                | DaqError::SerialPortNotConnected
                | DaqError::SerialOpen { .. }
                | DaqError::Handshake(_)
                | DaqError::Storage(_)
                | DaqError::Streaming(_)
        )
    }
}
