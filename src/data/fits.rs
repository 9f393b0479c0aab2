//! Minimal FITS writer.
//!
//! Only what the spectrometer files need: 8-bit image HDUs (primary or `IMAGE`
//! extension) and `BINTABLE` extensions with `J`, `K`, `D` and fixed-width `A`
//! columns. Every HDU is a header of 80-character cards followed by big-endian
//! data, each padded to a 2880-byte block.

use super::metadata::{MetaValue, Metadata};
use super::spectrum::SpectrumFrame;
use super::SpectrumWriter;
use crate::error::AppResult;
use crate::timestamp::utc_iso;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Every HDU is padded to a multiple of this.
pub const BLOCK_LEN: usize = 2880;
/// Length of one header card.
pub const CARD_LEN: usize = 80;

/// Width of the `UTC_ISO` column.
const ISO_WIDTH: usize = 32;

/// Formats one header card, exactly [`CARD_LEN`] ASCII bytes.
///
/// Keywords longer than eight characters are written with the `HIERARCH`
/// convention. Text values are shortened to fit the card and always keep their
/// closing quote; a comment only gets whatever space is left.
pub fn format_card(key: &str, value: &MetaValue, comment: Option<&str>) -> String {
    let key = ascii(key).to_uppercase();
    let mut card = if key.len() > 8 {
        format!("HIERARCH {} = ", key)
    } else {
        format!("{:<8}= ", key)
    };
    let room = CARD_LEN.saturating_sub(card.len());
    card.push_str(&format_value(value, room));
    if let Some(comment) = comment {
        card.push_str(" / ");
        card.push_str(&ascii(comment));
    }
    pad_card(card)
}

fn format_value(value: &MetaValue, room: usize) -> String {
    match value {
        MetaValue::Bool(v) => format!("{:>20}", if *v { "T" } else { "F" }),
        MetaValue::Int(v) => format!("{:>20}", v),
        MetaValue::Float(v) => format!("{:>20}", format_float(*v)),
        MetaValue::Text(v) => quoted(v, room),
    }
}

/// `'text'` in at most `room` characters. Quotes are doubled and an escaped
/// pair is never split.
fn quoted(text: &str, room: usize) -> String {
    let budget = room.saturating_sub(2);
    let mut inner = String::with_capacity(budget);
    for c in ascii(text).chars() {
        let width = if c == '\'' { 2 } else { 1 };
        if inner.len() + width > budget {
            break;
        }
        inner.push(c);
        if c == '\'' {
            inner.push('\'');
        }
    }
    format!("'{:<width$}'", inner, width = budget.min(8))
}

fn format_float(v: f64) -> String {
    if !v.is_finite() {
        return "0.0".to_string();
    }
    if v.fract() == 0.0 && v.abs() < 1e15 {
        return format!("{:.1}", v);
    }
    let plain = format!("{}", v);
    if plain.len() <= 20 && (v.abs() >= 1e-4 || v == 0.0) {
        plain
    } else {
        format!("{:E}", v)
    }
}

fn ascii(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
        .collect()
}

fn pad_card(mut card: String) -> String {
    card.truncate(CARD_LEN);
    format!("{:<width$}", card, width = CARD_LEN)
}

fn pad_block(buf: &mut Vec<u8>, fill: u8) {
    let rem = buf.len() % BLOCK_LEN;
    if rem != 0 {
        buf.resize(buf.len() + BLOCK_LEN - rem, fill);
    }
}

/// An ordered list of header cards.
#[derive(Debug, Clone, Default)]
pub struct Header {
    cards: Vec<String>,
}

impl Header {
    /// Empty header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one card.
    pub fn push(&mut self, key: &str, value: impl Into<MetaValue>, comment: Option<&str>) {
        self.cards.push(format_card(key, &value.into(), comment));
    }

    /// Appends one card per entry of `meta`, in order.
    pub fn extend(&mut self, meta: &Metadata) {
        for (key, value) in meta.iter() {
            self.cards.push(format_card(key, value, None));
        }
    }

    /// Formatted cards, without `END`.
    pub fn cards(&self) -> &[String] {
        &self.cards
    }

    /// Serialised header including the `END` card, padded with spaces.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity((self.cards.len() + 1) * CARD_LEN);
        for card in &self.cards {
            out.extend_from_slice(card.as_bytes());
        }
        out.extend_from_slice(pad_card("END".to_string()).as_bytes());
        pad_block(&mut out, b' ');
        out
    }
}

/// An 8-bit image HDU holding `rows × cols` bytes, row-major.
pub fn image_hdu(primary: bool, rows: usize, cols: usize, data: &[u8], meta: &Metadata) -> Vec<u8> {
    let mut header = Header::new();
    if primary {
        header.push("SIMPLE", true, Some("file does conform to FITS standard"));
    } else {
        header.push("XTENSION", "IMAGE", Some("Image extension"));
    }
    header.push("BITPIX", 8, Some("array data type"));
    header.push("NAXIS", 2, Some("number of array dimensions"));
    header.push("NAXIS1", cols, None);
    header.push("NAXIS2", rows, None);
    if primary {
        header.push("EXTEND", true, None);
    } else {
        header.push("PCOUNT", 0, Some("number of parameters"));
        header.push("GCOUNT", 1, Some("number of groups"));
    }
    header.extend(meta);

    let mut out = header.to_bytes();
    if !data.is_empty() {
        out.extend_from_slice(data);
        pad_block(&mut out, 0);
    }
    out
}

/// Values of one binary table column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    /// `J`, 32-bit signed.
    Int32(Vec<i32>),
    /// `K`, 64-bit signed.
    Int64(Vec<i64>),
    /// `D`, 64-bit float.
    Float64(Vec<f64>),
    /// `nA`, fixed-width ASCII, space padded.
    Ascii(usize, Vec<String>),
}

impl ColumnData {
    fn len(&self) -> usize {
        match self {
            ColumnData::Int32(v) => v.len(),
            ColumnData::Int64(v) => v.len(),
            ColumnData::Float64(v) => v.len(),
            ColumnData::Ascii(_, v) => v.len(),
        }
    }

    fn width(&self) -> usize {
        match self {
            ColumnData::Int32(_) => 4,
            ColumnData::Int64(_) | ColumnData::Float64(_) => 8,
            ColumnData::Ascii(width, _) => *width,
        }
    }

    fn tform(&self) -> String {
        match self {
            ColumnData::Int32(_) => "1J".to_string(),
            ColumnData::Int64(_) => "1K".to_string(),
            ColumnData::Float64(_) => "1D".to_string(),
            ColumnData::Ascii(width, _) => format!("{}A", width),
        }
    }

    fn write_cell(&self, row: usize, out: &mut Vec<u8>) {
        match self {
            ColumnData::Int32(v) => out.extend_from_slice(&v[row].to_be_bytes()),
            ColumnData::Int64(v) => out.extend_from_slice(&v[row].to_be_bytes()),
            ColumnData::Float64(v) => out.extend_from_slice(&v[row].to_be_bytes()),
            ColumnData::Ascii(width, v) => {
                let mut cell: Vec<u8> = ascii(&v[row]).into_bytes();
                cell.resize(*width, b' ');
                out.extend_from_slice(&cell);
            }
        }
    }
}

/// A named binary table column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// `TTYPEn` value.
    pub name: &'static str,
    /// Cell values, one per row.
    pub data: ColumnData,
}

impl Column {
    /// Column `name` holding `data`.
    pub fn new(name: &'static str, data: ColumnData) -> Self {
        Self { name, data }
    }
}

/// A `BINTABLE` extension. Rows beyond the shortest column are not written.
pub fn bintable_hdu(extname: &str, columns: &[Column]) -> Vec<u8> {
    let nrows = columns.iter().map(|c| c.data.len()).min().unwrap_or(0);
    let row_width: usize = columns.iter().map(|c| c.data.width()).sum();

    let mut header = Header::new();
    header.push("XTENSION", "BINTABLE", Some("binary table extension"));
    header.push("BITPIX", 8, Some("array data type"));
    header.push("NAXIS", 2, Some("number of array dimensions"));
    header.push("NAXIS1", row_width, Some("length of dimension 1"));
    header.push("NAXIS2", nrows, Some("length of dimension 2"));
    header.push("PCOUNT", 0, Some("number of group parameters"));
    header.push("GCOUNT", 1, Some("number of groups"));
    header.push("TFIELDS", columns.len(), Some("number of table fields"));
    for (i, column) in columns.iter().enumerate() {
        header.push(&format!("TTYPE{}", i + 1), column.name, None);
        header.push(&format!("TFORM{}", i + 1), column.data.tform(), None);
    }
    header.push("EXTNAME", extname, None);

    let mut out = header.to_bytes();
    let start = out.len();
    for row in 0..nrows {
        for column in columns {
            column.data.write_cell(row, &mut out);
        }
    }
    if out.len() > start {
        pad_block(&mut out, 0);
    }
    out
}

/// Serialises one buffer as image + `FREQ` + `TIME` HDUs.
///
/// `primary` selects a primary image HDU (new file) over an `IMAGE` extension.
pub fn encode_frame(primary: bool, seq: u64, frame: &SpectrumFrame, header: &Metadata) -> Vec<u8> {
    let mut meta = header.clone();
    meta.set("EXTNAME", format!("DATA{:05}", seq));

    let mut out = image_hdu(primary, frame.sweeps, frame.channels, &frame.matrix, &meta);

    let channels: Vec<i32> = (1..=frame.channels)
        .map(|c| i32::try_from(c).unwrap_or(i32::MAX))
        .collect();
    out.extend(bintable_hdu(
        &format!("FREQ{:05}", seq),
        &[
            Column::new("CHANNEL", ColumnData::Int32(channels)),
            Column::new(
                "FREQUENCY_MHZ",
                ColumnData::Float64(frame.frequencies_mhz.clone()),
            ),
        ],
    ));

    let sweeps: Vec<i32> = (0..frame.sweeps)
        .map(|s| i32::try_from(s).unwrap_or(i32::MAX))
        .collect();
    let iso: Vec<String> = frame.timestamps_us.iter().map(|&ts| utc_iso(ts)).collect();
    out.extend(bintable_hdu(
        &format!("TIME{:05}", seq),
        &[
            Column::new("SWEEP", ColumnData::Int32(sweeps)),
            Column::new("UNIX_US", ColumnData::Int64(frame.timestamps_us.clone())),
            Column::new("UTC_ISO", ColumnData::Ascii(ISO_WIDTH, iso)),
        ],
    ));
    out
}

/// FITS backend of the data writer.
#[derive(Debug, Default)]
pub struct FitsWriter {
    ready: bool,
}

impl FitsWriter {
    /// Backend that is initialised on first use.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SpectrumWriter for FitsWriter {
    fn name(&self) -> &'static str {
        "fits"
    }

    fn extension(&self) -> &'static str {
        "fits"
    }

    fn init(&mut self) -> AppResult<()> {
        self.ready = true;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn write_frame(
        &mut self,
        path: &Path,
        seq: u64,
        frame: &SpectrumFrame,
        header: &Metadata,
    ) -> AppResult<()> {
        let primary = !path.exists();
        let bytes = encode_frame(primary, seq, frame, header);

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(())
    }
}
