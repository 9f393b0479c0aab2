//! Daemon configuration using Figment.
//!
//! Configuration is layered:
//! 1. Built-in defaults (`DaemonConfig::default()`)
//! 2. A TOML file (usually `callisto.toml`)
//! 3. Environment variables prefixed with `CALLISTO_`, using `__` between nested keys
//!
//! # Example
//! ```no_run
//! use callisto_daq::config::DaemonConfig;
//!
//! let config = DaemonConfig::load_from("callisto.toml")?;
//! config.validate().map_err(callisto_daq::error::DaqError::Configuration)?;
//! println!("Instrument: {}", config.output.instrument);
//! # Ok::<(), callisto_daq::error::DaqError>(())
//! ```
//!
//! `CALLISTO_OUTPUT__FILETIME=900` overrides `output.filetime`. The legacy variable
//! `CALLISTO_ZMQ_PUB_ENDPOINT` is also honoured for the streaming endpoint.

use crate::error::AppResult;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level daemon configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Serial receiver settings
    pub receiver: ReceiverConfig,
    /// Data products and streaming
    pub output: OutputConfig,
    /// TCP control surface
    pub control: ControlConfig,
    /// Time-of-day automation
    pub scheduler: SchedulerConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Name sent as the control banner
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log format (pretty, compact, json)
    pub log_format: String,
    /// Optional file receiving a copy of every log line
    pub log_file: Option<PathBuf>,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "e-Callisto".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            log_file: None,
        }
    }
}

/// Serial link to the receiver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Device path, e.g. `/dev/ttyUSB0`
    pub port: String,
    /// Line speed, 8N1
    pub baud_rate: u32,
    /// Window in which the receiver must answer the reset sequence
    pub handshake_timeout_ms: u64,
    /// Poll interval of the acquisition loop
    pub read_timeout_ms: u64,
    /// Grace delay before stopping acquisition
    pub timer_preread_ms: u64,
    /// Drain delay after the acquisition loop has stopped
    pub timeout_hexdata_ms: u64,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            handshake_timeout_ms: 3000,
            read_timeout_ms: 500,
            timer_preread_ms: 2,
            timeout_hexdata_ms: 1000,
        }
    }
}

impl ReceiverConfig {
    /// [`handshake_timeout_ms`](Self::handshake_timeout_ms) as a duration.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// [`read_timeout_ms`](Self::read_timeout_ms) as a duration.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// [`timer_preread_ms`](Self::timer_preread_ms) as a duration.
    pub fn preread_delay(&self) -> Duration {
        Duration::from_millis(self.timer_preread_ms)
    }

    /// [`timeout_hexdata_ms`](Self::timeout_hexdata_ms) as a duration.
    pub fn drain_delay(&self) -> Duration {
        Duration::from_millis(self.timeout_hexdata_ms)
    }
}

/// Snapshot of everything the data writer needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Station name written into file names and headers
    pub instrument: String,
    /// Channels per sweep; replaced by the frequency table length when one is loaded
    pub nchannels: usize,
    /// Sweeps per second
    pub samplerate: u32,
    /// File rotation period in seconds
    pub filetime: u64,
    /// `fits` (default), `hdf5` or `h5`
    pub output_format: String,
    /// Directory for spectrum files
    pub datadir: PathBuf,
    /// Directory for overview files
    pub ovsdir: PathBuf,
    /// Frequency program file (`[0001]=0045.000,0` lines)
    pub frqfile: Option<PathBuf>,
    /// Focus code recorded in the headers
    pub focuscode: i32,
    /// AGC level recorded in the headers
    pub agclevel: i32,
    /// Charge pump setting recorded in the headers
    pub chargepump: i32,
    /// Clock source recorded in the headers
    pub clocksource: i32,
    /// Observatory altitude in metres
    pub height: Option<f64>,
    /// `ORIGIN` header, the observatory
    pub origin: Option<String>,
    /// Free text written as `TITLECOMMENT`
    pub titlecomment: Option<String>,
    /// Pub/sub republishing
    pub streaming: StreamingConfig,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            instrument: "CALLISTO".to_string(),
            nchannels: 1,
            samplerate: 1,
            filetime: 60,
            output_format: "fits".to_string(),
            datadir: PathBuf::from("/var/lib/callisto"),
            ovsdir: PathBuf::from("/var/lib/callisto/overview"),
            frqfile: None,
            focuscode: 1,
            agclevel: 0,
            chargepump: 1,
            clocksource: 1,
            height: None,
            origin: None,
            titlecomment: None,
            streaming: StreamingConfig::default(),
        }
    }
}

/// ZeroMQ PUB settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// `tcp://...` or `ipc://...`; streaming is off when unset
    pub endpoint: Option<String>,
    /// Bind (true) or connect (false) the PUB socket
    pub bind: bool,
    /// First message part of every frame
    pub topic: String,
    /// Frames queued for the publisher before new ones are dropped
    pub hwm: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            bind: true,
            topic: "callisto".to_string(),
            hwm: 10,
        }
    }
}

/// TCP control surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// 0 disables the control server
    pub net_port: u16,
    /// Listen address for the control server
    pub bind_address: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            net_port: 0,
            bind_address: "0.0.0.0".to_string(),
        }
    }
}

/// Scheduler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Schedule file (`HH:MM:SS,focus,action` lines); none disables scheduling
    pub schedule_file: Option<PathBuf>,
    /// Seconds between schedule checks
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Start recording as soon as the daemon is up
    pub autostart: bool,
}

fn default_check_interval() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            schedule_file: None,
            check_interval_secs: default_check_interval(),
            autostart: false,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from `callisto.toml` in the working directory and the
    /// environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from("callisto.toml")
    }

    /// Load configuration from a specific file path. A missing file leaves the
    /// defaults in place.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let mut config: DaemonConfig = Self::figment(path.as_ref()).extract()?;
        if config.output.streaming.endpoint.is_none() {
            if let Ok(endpoint) = std::env::var("CALLISTO_ZMQ_PUB_ENDPOINT") {
                if !endpoint.trim().is_empty() {
                    config.output.streaming.endpoint = Some(endpoint.trim().to_string());
                }
            }
        }
        config.resolve_relative_to(path.as_ref().parent());
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(DaemonConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("CALLISTO_").split("__"))
    }

    /// Relative paths in the config file (auxiliary files and output
    /// directories) are taken relative to that file.
    fn resolve_relative_to(&mut self, base: Option<&Path>) {
        let Some(base) = base.filter(|b| !b.as_os_str().is_empty()) else {
            return;
        };
        let output = &mut self.output;
        let paths = [
            output.frqfile.as_mut(),
            self.scheduler.schedule_file.as_mut(),
            Some(&mut output.datadir),
            Some(&mut output.ovsdir),
        ];
        for path in paths.into_iter().flatten() {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            ));
        }

        if self.receiver.baud_rate == 0 {
            return Err("receiver.baud_rate must be greater than 0".to_string());
        }

        if self.output.samplerate == 0 {
            return Err("output.samplerate must be greater than 0".to_string());
        }

        if self.output.nchannels == 0 {
            return Err("output.nchannels must be greater than 0".to_string());
        }

        let valid_outputs = ["fits", "hdf5", "h5"];
        if !valid_outputs.contains(&self.output.output_format.trim().to_lowercase().as_str()) {
            return Err(format!(
                "Invalid output_format '{}'. Must be one of: {}",
                self.output.output_format,
                valid_outputs.join(", ")
            ));
        }

        if self.output.streaming.hwm == 0 {
            return Err("output.streaming.hwm must be greater than 0".to_string());
        }

        if self.scheduler.check_interval_secs == 0 {
            return Err("scheduler.check_interval_secs must be greater than 0".to_string());
        }

        Ok(())
    }
}
