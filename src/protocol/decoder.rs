//! Character-level state machine for the receiver byte stream.
//!
//! The decoder is a pure function of `(character, current time)`: it owns no
//! transport and performs no I/O, so the acquisition loop and offline tools can
//! share it.
//!
//! ```text
//!            '$'                    '2'
//!   IDLE ───────────▶ IN_MESSAGE    IDLE ─────────▶ IN_DATA
//!    ▲                   │           ▲                 │
//!    └──── CR (emit) ────┘           └── '&' (flush) ──┘
//! ```

use super::{
    DATA_END, DATA_START, EEPROM_READY, END_MARKER_CODE, HEX_GROUP, MAX_MESSAGE, MESSAGE_END,
    MESSAGE_START,
};
use crate::core::RawBuffer;
use tracing::{trace, warn};

/// Where the decoder currently is in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Between spans.
    Idle,
    /// After `$`, collecting a status message.
    InMessage,
    /// After `2`, collecting hex groups.
    InData,
}

/// Output of one completed span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A status line from the firmware, without the sentinels.
    Message(String),
    /// Decoded samples of one data span.
    Data(RawBuffer),
}

/// Running counters, useful for diagnosing a noisy link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Status messages emitted.
    pub messages: u64,
    /// Data frames emitted.
    pub frames: u64,
    /// Data spans that decoded to no samples at all.
    pub empty_frames: u64,
    /// Samples across all frames.
    pub samples: u64,
    /// Hex groups that failed to parse.
    pub bad_groups: u64,
    /// `2323` groups seen.
    pub end_markers: u64,
    /// Characters outside any span, whitespace included.
    pub unexpected_chars: u64,
    /// Characters dropped from over-long messages.
    pub truncated_message_chars: u64,
}

/// Demultiplexes status messages and hex sample data.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecoderState,
    message: String,
    hex: String,
    frame_start_us: i64,
    stats: DecoderStats,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Decoder in [`DecoderState::Idle`] with zeroed counters.
    pub fn new() -> Self {
        Self {
            state: DecoderState::Idle,
            message: String::with_capacity(MAX_MESSAGE),
            hex: String::new(),
            frame_start_us: 0,
            stats: DecoderStats::default(),
        }
    }

    /// Current state.
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Counters so far.
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Drops any partial span and returns to `Idle`. Counters are kept.
    pub fn reset(&mut self) {
        self.state = DecoderState::Idle;
        self.message.clear();
        self.hex.clear();
    }

    /// Feeds one character received at `now_us`.
    pub fn push(&mut self, ch: char, now_us: i64) -> Option<FrameEvent> {
        match self.state {
            DecoderState::Idle => {
                match ch {
                    MESSAGE_START => {
                        self.message.clear();
                        self.state = DecoderState::InMessage;
                    }
                    DATA_START => {
                        self.hex.clear();
                        self.frame_start_us = now_us;
                        self.state = DecoderState::InData;
                    }
                    EEPROM_READY => trace!("EEPROM ready"),
                    c if c.is_whitespace() => {
                        // line endings between spans are routine on this link
                        self.stats.unexpected_chars += 1;
                        trace!(char = ?c, "Whitespace outside of any span");
                    }
                    c => {
                        self.stats.unexpected_chars += 1;
                        warn!(char = ?c, "Unexpected character outside of any span");
                    }
                }
                None
            }
            DecoderState::InMessage => match ch {
                MESSAGE_END => {
                    self.state = DecoderState::Idle;
                    self.stats.messages += 1;
                    Some(FrameEvent::Message(std::mem::take(&mut self.message)))
                }
                MESSAGE_START => {
                    // unterminated message, start over
                    self.message.clear();
                    None
                }
                c => {
                    if self.message.chars().count() < MAX_MESSAGE {
                        self.message.push(c);
                    } else {
                        self.stats.truncated_message_chars += 1;
                    }
                    None
                }
            },
            DecoderState::InData => match ch {
                DATA_END => {
                    self.state = DecoderState::Idle;
                    self.flush_data()
                }
                c if c.is_whitespace() => None,
                c => {
                    self.hex.push(c);
                    None
                }
            },
        }
    }

    fn flush_data(&mut self) -> Option<FrameEvent> {
        let decoded = decode_hex_samples(&self.hex);
        self.hex.clear();
        self.stats.bad_groups += decoded.bad_groups as u64;
        self.stats.end_markers += decoded.end_markers as u64;
        if decoded.samples.is_empty() {
            self.stats.empty_frames += 1;
            return None;
        }
        self.stats.frames += 1;
        self.stats.samples += decoded.samples.len() as u64;
        Some(FrameEvent::Data(RawBuffer::new(
            decoded.samples,
            self.frame_start_us,
        )))
    }
}

/// Result of decoding one hex span.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedSamples {
    /// Decoded samples in order.
    pub samples: Vec<u8>,
    /// Groups skipped as invalid.
    pub bad_groups: usize,
    /// End markers skipped.
    pub end_markers: usize,
}

/// Decodes complete 4-digit groups; a trailing partial group is ignored.
///
/// Each group is a 16-bit value whose bits 2..10 carry the 8-bit sample. Groups that
/// are not hexadecimal are skipped with a warning and `0x2323` end markers are
/// skipped silently.
pub fn decode_hex_samples(hex: &str) -> DecodedSamples {
    let chars: Vec<char> = hex.chars().collect();
    let mut out = DecodedSamples {
        samples: Vec::with_capacity(chars.len() / HEX_GROUP),
        ..Default::default()
    };
    for group in chars.chunks_exact(HEX_GROUP) {
        let text: String = group.iter().collect();
        let value = if group.iter().all(char::is_ascii_hexdigit) {
            u16::from_str_radix(&text, 16).ok()
        } else {
            None
        };
        match value {
            Some(END_MARKER_CODE) => out.end_markers += 1,
            Some(v) => out.samples.push(((v >> 2) & 0xFF) as u8),
            None => {
                out.bad_groups += 1;
                warn!(group = %text, "Skipping invalid hex group");
            }
        }
    }
    out
}

/// Runs a whole captured stream through a fresh decoder.
pub fn decode_stream(text: &str, mut now_us: impl FnMut() -> i64) -> (Vec<FrameEvent>, DecoderStats) {
    let mut decoder = FrameDecoder::new();
    let events = text
        .chars()
        .filter_map(|ch| decoder.push(ch, now_us()))
        .collect();
    (events, decoder.stats())
}

/// Status messages contained in `text`, in order. Unterminated spans are dropped.
pub fn extract_messages(text: &str) -> Vec<String> {
    decode_stream(text, || 0)
        .0
        .into_iter()
        .filter_map(|event| match event {
            FrameEvent::Message(m) => Some(m),
            FrameEvent::Data(_) => None,
        })
        .collect()
}
