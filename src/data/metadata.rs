//! Descriptive keywords attached to every FITS HDU and HDF5 group.

use crate::config::OutputConfig;
use crate::timestamp::{utc_date, utc_iso, utc_time};
use std::fmt;

/// A scalar keyword value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    /// `T` / `F` in FITS.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Quoted string in FITS.
    Text(String),
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Bool(v) => write!(f, "{}", v),
            MetaValue::Int(v) => write!(f, "{}", v),
            MetaValue::Float(v) => write!(f, "{}", v),
            MetaValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        MetaValue::Bool(v)
    }
}

impl From<i32> for MetaValue {
    fn from(v: i32) -> Self {
        MetaValue::Int(i64::from(v))
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        MetaValue::Int(v)
    }
}

impl From<u32> for MetaValue {
    fn from(v: u32) -> Self {
        MetaValue::Int(i64::from(v))
    }
}

impl From<usize> for MetaValue {
    fn from(v: usize) -> Self {
        MetaValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<u64> for MetaValue {
    fn from(v: u64) -> Self {
        MetaValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for MetaValue {
    fn from(v: f64) -> Self {
        MetaValue::Float(v)
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        MetaValue::Text(v)
    }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        MetaValue::Text(v.to_string())
    }
}

/// An ordered list of keyword/value pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    fields: Vec<(String, MetaValue)>,
}

impl Metadata {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, replacing an earlier value in place.
    pub fn set(&mut self, key: &str, value: impl Into<MetaValue>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| k == key) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((key.to_string(), value)),
        }
    }

    /// Value of `key`, if set.
    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetaValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when nothing is set.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Receiver settings shared by every header.
fn receiver_fields(meta: &mut Metadata, config: &OutputConfig) {
    meta.set("SAMPRATE", config.samplerate);
    meta.set("NCHAN", config.nchannels);
    meta.set("FOCUSCOD", config.focuscode);
    meta.set("AGCLEVEL", config.agclevel);
    meta.set("CHGPUMP", config.chargepump);
    meta.set("CLOCKSRC", config.clocksource);
}

/// FITS header keywords for a buffer spanning `start_us..=end_us`.
pub fn fits_header(config: &OutputConfig, start_us: i64, end_us: i64) -> Metadata {
    let mut meta = Metadata::new();
    meta.set("INSTRUME", config.instrument.as_str());
    meta.set("DATE-OBS", utc_date(start_us));
    meta.set("TIME-OBS", utc_time(start_us));
    meta.set("DATE-END", utc_date(end_us));
    meta.set("TIME-END", utc_time(end_us));
    receiver_fields(&mut meta, config);

    if let Some(height) = config.height {
        meta.set("OBS_ALT", height);
    }
    if let Some(origin) = config.origin.as_deref().filter(|s| !s.is_empty()) {
        meta.set("ORIGIN", origin);
    }
    if let Some(title) = config.titlecomment.as_deref().filter(|s| !s.is_empty()) {
        meta.set("TITLECOMMENT", title);
    }
    if let Some(frqfile) = &config.frqfile {
        meta.set("FRQFILE", frqfile.display().to_string());
    }
    meta.set("PWM_VAL", config.agclevel);
    meta
}

/// HDF5 group attributes for a buffer starting at `start_us`.
pub fn hdf5_attributes(config: &OutputConfig, start_us: i64) -> Metadata {
    let mut meta = Metadata::new();
    meta.set("INSTRUME", config.instrument.as_str());
    meta.set("DATE-OBS", utc_iso(start_us));
    receiver_fields(&mut meta, config);
    meta
}

/// HDF5 attributes of one overview row.
pub fn overview_attributes(config: &OutputConfig, ts_us: i64) -> Metadata {
    let mut meta = Metadata::new();
    meta.set("COLUMNS", "frequency_mhz,amplitude");
    meta.set("INSTRUME", config.instrument.as_str());
    meta.set("DATE-OBS", utc_iso(ts_us));
    meta.set("AGCLEVEL", config.agclevel);
    meta.set("CLOCKSRC", config.clocksource);
    meta.set("FILETIME", config.filetime);
    meta
}
