//! Serial wire protocol of the e-Callisto receiver.
//!
//! The receiver interleaves two kinds of spans on one byte stream:
//!
//! ```text
//! $CRX:Stopped\r          status message    '$' ... CR
//! 2 0A1B 0A1C ... 2323 &  sample data       '2' ... '&'  (4-digit hex groups)
//! ]                       EEPROM ready      ignored between spans
//! ```
//!
//! [`decoder::FrameDecoder`] demultiplexes the stream; the constants below are the
//! framing sentinels and the fixed command strings used by the start handshake.

pub mod decoder;

pub use decoder::{DecoderState, DecoderStats, FrameDecoder, FrameEvent};

/// Starts a status message.
pub const MESSAGE_START: char = '$';
/// Ends a status message.
pub const MESSAGE_END: char = '\r';
/// Starts a hex data span.
pub const DATA_START: char = '2';
/// Ends a hex data span.
pub const DATA_END: char = '&';
/// Sent by the firmware when its EEPROM is ready; carries no payload.
pub const EEPROM_READY: char = ']';

/// Longest status message kept; extra characters are dropped.
pub const MAX_MESSAGE: usize = 128;
/// Hex digits per sample group.
pub const HEX_GROUP: usize = 4;
/// Group code marking the end of a sweep, never a sample.
pub const END_MARKER_CODE: u16 = 0x2323;

/// Stop, reset and identify.
pub const RESET_STRING: &str = "D0\rGD\rS0\r";
/// Identification query sent once the receiver has answered the reset.
pub const ID_QUERY: &str = "S0\r";
/// Expected tail of the receiver output after [`RESET_STRING`].
pub const ID_RESPONSE: &str = "$CRX:Stopped\r";
