//! Reshaping a decoded buffer into a sweep × channel matrix with its axes.

use crate::core::{FrequencyTable, OverviewPoint, RawBuffer};

/// One write's worth of spectrum data.
///
/// `matrix` is row-major: `matrix[row * channels + col]` is the sample of channel
/// `col` in sweep `row`.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumFrame {
    /// Samples, `sweeps × channels`.
    pub matrix: Vec<u8>,
    /// Number of rows.
    pub sweeps: usize,
    /// Number of columns.
    pub channels: usize,
    /// Centre frequency per channel.
    pub frequencies_mhz: Vec<f64>,
    /// Start of each sweep, µs since the epoch.
    pub timestamps_us: Vec<i64>,
}

impl SpectrumFrame {
    /// Builds the frame for `raw`.
    ///
    /// The channel count is the table length when a table is loaded, else
    /// `nchannels` (at least 1). A buffer shorter than one sweep becomes a single
    /// row holding everything; otherwise trailing samples that do not fill a whole
    /// sweep are discarded.
    pub fn from_buffer(
        raw: &RawBuffer,
        table: &FrequencyTable,
        nchannels: usize,
        samplerate: u32,
    ) -> Self {
        let nchan = if table.is_empty() {
            nchannels.max(1)
        } else {
            table.len()
        };

        let (sweeps, channels) = if raw.len() < nchan {
            (1, raw.len())
        } else {
            (raw.len() / nchan, nchan)
        };
        let matrix = raw.data[..sweeps * channels].to_vec();

        let frequencies_mhz = (0..channels)
            .map(|i| table.get(i).unwrap_or(i as f64))
            .collect();

        let step = sweep_interval_us(samplerate);
        let timestamps_us = (0..sweeps as i64)
            .map(|i| raw.timestamp_us + i * step)
            .collect();

        Self {
            matrix,
            sweeps,
            channels,
            frequencies_mhz,
            timestamps_us,
        }
    }

    /// Samples of one sweep.
    pub fn row(&self, sweep: usize) -> Option<&[u8]> {
        if sweep >= self.sweeps {
            return None;
        }
        let start = sweep * self.channels;
        self.matrix.get(start..start + self.channels)
    }

    /// Timestamp of the first sweep.
    pub fn start_us(&self) -> i64 {
        self.timestamps_us.first().copied().unwrap_or_default()
    }

    /// Timestamp of the last sweep.
    pub fn end_us(&self) -> i64 {
        self.timestamps_us.last().copied().unwrap_or_default()
    }

    /// The last sweep as overview points `(frequency, amplitude)`.
    pub fn last_sweep_overview(&self) -> Vec<OverviewPoint> {
        let Some(row) = self.sweeps.checked_sub(1).and_then(|last| self.row(last)) else {
            return Vec::new();
        };
        row.iter()
            .zip(&self.frequencies_mhz)
            .map(|(&value, &freq_mhz)| OverviewPoint {
                freq_mhz,
                value: i32::from(value),
            })
            .collect()
    }
}

/// Microseconds between consecutive sweeps.
pub fn sweep_interval_us(samplerate: u32) -> i64 {
    1_000_000 / i64::from(samplerate.max(1))
}
