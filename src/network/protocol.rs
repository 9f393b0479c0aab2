//! Line-oriented control protocol.
//!
//! One command per line, case-insensitive, surrounding whitespace ignored. Every
//! response ends with a blank line so clients can read until `"\n\n"`.
//!
//! | command                                | response                                   |
//! |----------------------------------------|--------------------------------------------|
//! | *(empty)*                              | `OK`                                       |
//! | `quit`                                 | connection closed                          |
//! | `start` / `stop`                       | `OK starting new FITS file` / `OK stopping`|
//! | `overview`                             | `OK starting spectral overview`            |
//! | `overview-continuous`, `overview-cont` | `OK starting continuous ...` or `ERROR ...`|
//! | `overview-stop`, `overview-off`        | `OK stopping continuous spectral overview` |
//! | `get`                                  | `ERROR no data (yet)`                      |

use crate::core::ControlActions;

/// Reply to an empty line.
pub const RESP_OK: &str = "OK\n\n";
/// Reply to `start`.
pub const RESP_START: &str = "OK starting new FITS file\n\n";
/// Reply to `stop`.
pub const RESP_STOP: &str = "OK stopping\n\n";
/// Reply to `overview`.
pub const RESP_OVERVIEW: &str = "OK starting spectral overview\n\n";
/// Reply to `overview-continuous` when HDF5 is available.
pub const RESP_OVERVIEW_CONTINUOUS: &str =
    "OK starting continuous spectral overview in HDF5 (window=filetime)\n\n";
/// Reply to `overview-continuous` without HDF5.
pub const RESP_HDF5_UNAVAILABLE: &str = "ERROR HDF5 backend unavailable (install python3-h5py)\n\n";
/// Reply to `overview-off`.
pub const RESP_OVERVIEW_OFF: &str = "OK stopping continuous spectral overview\n\n";
/// Reply to `get`.
pub const RESP_NO_DATA: &str = "ERROR no data (yet)\n\n";
/// Sent once for a line that exceeded the server's line limit; nothing in it runs.
pub const RESP_LINE_TOO_LONG: &str = "ERROR command line too long\n\n";

/// A parsed control line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Blank line.
    Empty,
    /// `quit`
    Quit,
    /// `start`
    Start,
    /// `stop`
    Stop,
    /// `overview`
    Overview,
    /// `overview-continuous` or `overview-cont`
    OverviewContinuous,
    /// `overview-stop` or `overview-off`
    OverviewOff,
    /// `get`
    Get,
    /// Lowercased, trimmed text of an unknown command.
    Unknown(String),
}

impl ControlCommand {
    /// Parses one line, ignoring case and surrounding whitespace.
    pub fn parse(line: &str) -> Self {
        let cmd = line.trim().to_lowercase();
        match cmd.as_str() {
            "" => ControlCommand::Empty,
            "quit" => ControlCommand::Quit,
            "start" => ControlCommand::Start,
            "stop" => ControlCommand::Stop,
            "overview" => ControlCommand::Overview,
            "overview-continuous" | "overview-cont" => ControlCommand::OverviewContinuous,
            "overview-stop" | "overview-off" => ControlCommand::OverviewOff,
            "get" => ControlCommand::Get,
            _ => ControlCommand::Unknown(cmd),
        }
    }
}

/// What the connection should do after a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Write this text and keep reading.
    Respond(String),
    /// Close the connection without a reply.
    Close,
}

/// Handles one control line, invoking `actions` as required.
pub async fn handle<A: ControlActions + ?Sized>(line: &str, actions: &A) -> Reply {
    let text = match ControlCommand::parse(line) {
        ControlCommand::Empty => RESP_OK.to_string(),
        ControlCommand::Quit => return Reply::Close,
        ControlCommand::Start => {
            actions.start().await;
            RESP_START.to_string()
        }
        ControlCommand::Stop => {
            actions.stop().await;
            RESP_STOP.to_string()
        }
        ControlCommand::Overview => {
            actions.overview_once().await;
            RESP_OVERVIEW.to_string()
        }
        ControlCommand::OverviewContinuous => {
            if actions.overview_continuous().await {
                RESP_OVERVIEW_CONTINUOUS.to_string()
            } else {
                RESP_HDF5_UNAVAILABLE.to_string()
            }
        }
        ControlCommand::OverviewOff => {
            actions.overview_off().await;
            RESP_OVERVIEW_OFF.to_string()
        }
        ControlCommand::Get => RESP_NO_DATA.to_string(),
        ControlCommand::Unknown(cmd) => format!("ERROR unrecognized command ({})\n\n", cmd),
    };
    Reply::Respond(text)
}
