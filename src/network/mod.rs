//! TCP control surface.
//!
//! - [`protocol`]: pure mapping from one command line to a response
//! - [`server_actor`]: listener, banner and per-client tasks

pub mod protocol;
pub mod server_actor;

pub use protocol::{handle, ControlCommand, Reply};
pub use server_actor::{spawn_control_server, ControlServer};
