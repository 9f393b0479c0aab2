//! The data writer engine: format selection, file rotation and streaming.
//!
//! Each buffer is published first (best effort) and then persisted by the
//! selected backend. Overview rows always go to HDF5.

use super::fits::FitsWriter;
use super::hdf5_writer::Hdf5Writer;
use super::metadata::{fits_header, hdf5_attributes, overview_attributes};
use super::publisher::{encode_frame_message, FrameContext, ZmqPublisher};
use super::rotation::FileRotation;
use super::spectrum::SpectrumFrame;
use super::SpectrumWriter;
use crate::config::OutputConfig;
use crate::core::{FrequencyTable, OverviewPoint, RawBuffer};
use crate::error::AppResult;
use serde_json::{json, Map};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// File format selected by `output.output_format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFormat {
    /// One FITS file per window, an image HDU per frame.
    Fits,
    /// One HDF5 file per window, a group per frame.
    Hdf5,
}

impl StorageFormat {
    /// `"hdf5"` or `"h5"` (any case, surrounding whitespace ignored) select HDF5;
    /// anything else is FITS.
    pub fn normalize(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "hdf5" | "h5" => StorageFormat::Hdf5,
            _ => StorageFormat::Fits,
        }
    }
}

/// Counters kept by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Frames persisted.
    pub frames_written: u64,
    /// Failed persist attempts.
    pub write_errors: u64,
    /// Overview rows stored.
    pub overviews_written: u64,
    /// Frames accepted by the publisher queue.
    pub frames_published: u64,
}

/// Turns decoded buffers into files (and optionally a stream).
///
/// The engine is synchronous; the daemon calls it from blocking tasks.
pub struct DataWriterEngine {
    config: OutputConfig,
    table: FrequencyTable,
    format: StorageFormat,
    fits: FitsWriter,
    fits_rotation: FileRotation,
    hdf5: Hdf5Writer,
    hdf5_rotation: FileRotation,
    overview_rotation: FileRotation,
    publisher: Option<ZmqPublisher>,
    stats: WriterStats,
}

impl DataWriterEngine {
    /// When `table` is non-empty the configured channel count is replaced by its
    /// length.
    pub fn new(mut config: OutputConfig, table: FrequencyTable) -> Self {
        if !table.is_empty() && config.nchannels != table.len() {
            debug!(
                configured = config.nchannels,
                table = table.len(),
                "Channel count taken from frequency table"
            );
            config.nchannels = table.len();
        }

        let format = StorageFormat::normalize(&config.output_format);
        let data_prefix = format!("CALLISTO_{}", config.instrument);
        let fits = FitsWriter::new();
        let hdf5 = Hdf5Writer::new();
        let fits_rotation = FileRotation::new(
            &config.datadir,
            data_prefix.clone(),
            fits.extension(),
            config.filetime,
        );
        let hdf5_rotation = FileRotation::new(
            &config.datadir,
            data_prefix,
            hdf5.extension(),
            config.filetime,
        );
        let overview_rotation = FileRotation::new(
            &config.ovsdir,
            format!("OVS_{}", config.instrument),
            hdf5.extension(),
            config.filetime,
        );

        Self {
            config,
            table,
            format,
            fits,
            fits_rotation,
            hdf5,
            hdf5_rotation,
            overview_rotation,
            publisher: None,
            stats: WriterStats::default(),
        }
    }

    /// Output settings in effect, channel count included.
    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    /// Frequency program loaded at startup.
    pub fn frequency_table(&self) -> &FrequencyTable {
        &self.table
    }

    /// Selected data backend.
    pub fn format(&self) -> StorageFormat {
        self.format
    }

    /// Counters so far.
    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    /// Streams every following frame through `publisher`.
    pub fn set_publisher(&mut self, publisher: ZmqPublisher) {
        self.publisher = Some(publisher);
    }

    /// Detaches the publisher, e.g. to shut it down.
    pub fn take_publisher(&mut self) -> Option<ZmqPublisher> {
        self.publisher.take()
    }

    /// Current overview file, if any overview has been written.
    pub fn overview_path(&self) -> Option<&Path> {
        self.overview_rotation.current_path()
    }

    /// Current data file of the selected backend.
    pub fn data_path(&self) -> Option<&Path> {
        match self.format {
            StorageFormat::Fits => self.fits_rotation.current_path(),
            StorageFormat::Hdf5 => self.hdf5_rotation.current_path(),
        }
    }

    /// Initialises the HDF5 backend if needed; `false` when it is unavailable.
    pub fn hdf5_available(&mut self) -> bool {
        ensure_ready(&mut self.hdf5).is_ok()
    }

    /// Reshapes `raw` with the configured geometry.
    pub fn frame_for(&self, raw: &RawBuffer) -> SpectrumFrame {
        SpectrumFrame::from_buffer(
            raw,
            &self.table,
            self.config.nchannels,
            self.config.samplerate,
        )
    }

    /// Publishes and persists one buffer. Returns the file written, or `None`
    /// for an empty buffer.
    pub fn write_data_buffer(&mut self, raw: &RawBuffer) -> AppResult<Option<PathBuf>> {
        if raw.is_empty() {
            return Ok(None);
        }
        let frame = self.frame_for(raw);
        self.publish(&frame, raw.timestamp_us);

        let result = match self.format {
            StorageFormat::Fits => {
                let header = fits_header(&self.config, frame.start_us(), frame.end_us());
                persist(
                    &mut self.fits,
                    &mut self.fits_rotation,
                    &frame,
                    raw.timestamp_us,
                    &header,
                )
            }
            StorageFormat::Hdf5 => {
                let attrs = hdf5_attributes(&self.config, frame.start_us());
                persist(
                    &mut self.hdf5,
                    &mut self.hdf5_rotation,
                    &frame,
                    raw.timestamp_us,
                    &attrs,
                )
            }
        };

        match result {
            Ok(path) => {
                self.stats.frames_written += 1;
                Ok(Some(path))
            }
            Err(e) => {
                self.stats.write_errors += 1;
                Err(e)
            }
        }
    }

    /// Stores one overview row. An empty set of points writes nothing.
    pub fn save_overview(
        &mut self,
        points: &[OverviewPoint],
        ts_us: i64,
    ) -> AppResult<Option<PathBuf>> {
        if points.is_empty() {
            return Ok(None);
        }
        ensure_ready(&mut self.hdf5)?;

        let path = self.overview_rotation.path_for(ts_us).to_path_buf();
        std::fs::create_dir_all(self.overview_rotation.dir())?;
        let seq = self.overview_rotation.next_seq();
        let attrs = overview_attributes(&self.config, ts_us);
        self.hdf5.write_overview(&path, seq, points, ts_us, &attrs)?;

        self.stats.overviews_written += 1;
        Ok(Some(path))
    }

    fn publish(&mut self, frame: &SpectrumFrame, ts_us: i64) {
        let Some(publisher) = &self.publisher else {
            return;
        };

        let mut extra = Map::new();
        extra.insert("filetime".into(), json!(self.config.filetime));
        extra.insert("output_format".into(), json!(self.config.output_format));
        let ctx = FrameContext {
            instrument: &self.config.instrument,
            ts_us,
            samplerate: self.config.samplerate,
            nchannels: self.config.nchannels,
            extra,
        };

        match encode_frame_message(&self.config.streaming.topic, &ctx, frame) {
            Ok(parts) => {
                if publisher.publish(parts) {
                    self.stats.frames_published += 1;
                }
            }
            Err(e) => warn!("Frame not published: {}", e),
        }
    }
}

fn ensure_ready(writer: &mut dyn SpectrumWriter) -> AppResult<()> {
    if writer.is_ready() {
        return Ok(());
    }
    match writer.init() {
        Ok(()) => {
            debug!(backend = writer.name(), "Storage backend initialised");
            Ok(())
        }
        Err(e) => {
            error!(backend = writer.name(), "Storage backend unavailable: {}", e);
            Err(e)
        }
    }
}

fn persist(
    writer: &mut dyn SpectrumWriter,
    rotation: &mut FileRotation,
    frame: &SpectrumFrame,
    ts_us: i64,
    header: &super::Metadata,
) -> AppResult<PathBuf> {
    ensure_ready(writer)?;

    let path = rotation.path_for(ts_us).to_path_buf();
    std::fs::create_dir_all(rotation.dir())?;
    let seq = rotation.next_seq();
    writer.write_frame(&path, seq, frame, header)?;
    debug!(
        backend = writer.name(),
        path = %path.display(),
        seq,
        sweeps = frame.sweeps,
        channels = frame.channels,
        "Frame written"
    );
    Ok(path)
}
