//! HDF5 backend for spectra and overviews.
//!
//! Each write adds one group to the current file:
//!
//! ```text
//! CALLISTO_<inst>_<stamp>.h5
//! ├── DATA00000/
//! │   ├── matrix               u8   [sweeps, channels]
//! │   ├── frequencies_mhz      f64  [channels]
//! │   ├── timestamps_unix_us   i64  [sweeps]
//! │   └── timestamps_utc       S32  [sweeps]
//! └── DATA00001/ ...
//! ```
//!
//! Overview files use `OVERVIEWnnnnn` groups with a single f64 row.
//!
//! The backend is only functional with the `storage_hdf5` feature; without it
//! [`Hdf5Writer::init`] reports [`DaqError::FeatureNotEnabled`] so callers can
//! fall back or refuse continuous overviews.

use super::metadata::Metadata;
use super::spectrum::SpectrumFrame;
use super::SpectrumWriter;
use crate::core::OverviewPoint;
use crate::error::{AppResult, DaqError};
use std::path::Path;

/// Whether this build can write HDF5 files.
pub fn is_available() -> bool {
    cfg!(feature = "storage_hdf5")
}

/// HDF5 backend of the data writer, also storing overview rows.
#[derive(Debug, Default)]
pub struct Hdf5Writer {
    ready: bool,
}

impl Hdf5Writer {
    /// Backend that is initialised on first use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one overview row as group `OVERVIEWnnnnn`.
    pub fn write_overview(
        &mut self,
        path: &Path,
        seq: u64,
        points: &[OverviewPoint],
        ts_us: i64,
        attrs: &Metadata,
    ) -> AppResult<()> {
        if !self.ready {
            return Err(DaqError::Storage("HDF5 writer not initialised".into()));
        }
        let freqs: Vec<f64> = points.iter().map(|p| p.freq_mhz).collect();
        let values: Vec<f64> = points.iter().map(|p| f64::from(p.value)).collect();
        let group = format!("OVERVIEW{:05}", seq);
        imp::write_group(
            path,
            &group,
            imp::Matrix::Float64 {
                rows: 1,
                cols: values.len(),
                data: &values,
            },
            &freqs,
            &[ts_us],
            attrs,
        )
    }
}

impl SpectrumWriter for Hdf5Writer {
    fn name(&self) -> &'static str {
        "hdf5"
    }

    fn extension(&self) -> &'static str {
        "h5"
    }

    fn init(&mut self) -> AppResult<()> {
        if !is_available() {
            return Err(DaqError::FeatureNotEnabled("storage_hdf5".into()));
        }
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
        if !self.ready {
            return Err(DaqError::Storage("HDF5 writer not initialised".into()));
        }
        let group = format!("DATA{:05}", seq);
        imp::write_group(
            path,
            &group,
            imp::Matrix::UInt8 {
                rows: frame.sweeps,
                cols: frame.channels,
                data: &frame.matrix,
            },
            &frame.frequencies_mhz,
            &frame.timestamps_us,
            header,
        )
    }
}

#[cfg(feature = "storage_hdf5")]
mod imp {
    use super::super::metadata::{MetaValue, Metadata};
    use crate::error::{AppResult, DaqError};
    use crate::timestamp::utc_iso;
    use hdf5::types::{FixedAscii, VarLenUnicode};
    use hdf5::{File, Group};
    use std::path::Path;

    pub(super) enum Matrix<'a> {
        UInt8 { rows: usize, cols: usize, data: &'a [u8] },
        Float64 { rows: usize, cols: usize, data: &'a [f64] },
    }

    pub(super) fn write_group(
        path: &Path,
        name: &str,
        matrix: Matrix<'_>,
        freqs: &[f64],
        timestamps_us: &[i64],
        attrs: &Metadata,
    ) -> AppResult<()> {
        let file = if path.exists() {
            File::open_rw(path)?
        } else {
            File::create(path)?
        };
        let group = file.create_group(name)?;

        match matrix {
            Matrix::UInt8 { rows, cols, data } => {
                group
                    .new_dataset::<u8>()
                    .shape((rows, cols))
                    .create("matrix")?
                    .write_raw(data)?;
            }
            Matrix::Float64 { rows, cols, data } => {
                group
                    .new_dataset::<f64>()
                    .shape((rows, cols))
                    .create("matrix")?
                    .write_raw(data)?;
            }
        }

        group
            .new_dataset::<f64>()
            .shape(freqs.len())
            .create("frequencies_mhz")?
            .write_raw(freqs)?;
        group
            .new_dataset::<i64>()
            .shape(timestamps_us.len())
            .create("timestamps_unix_us")?
            .write_raw(timestamps_us)?;

        let iso = timestamps_us
            .iter()
            .map(|&ts| {
                FixedAscii::<32>::from_ascii(utc_iso(ts).as_bytes())
                    .map_err(|e| DaqError::Storage(format!("timestamp string: {}", e)))
            })
            .collect::<AppResult<Vec<_>>>()?;
        group
            .new_dataset::<FixedAscii<32>>()
            .shape(iso.len())
            .create("timestamps_utc")?
            .write_raw(&iso)?;

        write_attributes(&group, attrs)?;
        file.flush()?;
        Ok(())
    }

    fn write_attributes(group: &Group, attrs: &Metadata) -> AppResult<()> {
        for (key, value) in attrs.iter() {
            match value {
                MetaValue::Bool(v) => group
                    .new_attr::<bool>()
                    .create(key)?
                    .write_scalar(v)?,
                MetaValue::Int(v) => group.new_attr::<i64>().create(key)?.write_scalar(v)?,
                MetaValue::Float(v) => group.new_attr::<f64>().create(key)?.write_scalar(v)?,
                MetaValue::Text(v) => {
                    let text = v
                        .parse::<VarLenUnicode>()
                        .map_err(|e| DaqError::Storage(format!("attribute {}: {}", key, e)))?;
                    group
                        .new_attr::<VarLenUnicode>()
                        .create(key)?
                        .write_scalar(&text)?
                }
            }
        }
        Ok(())
    }
}

#[cfg(not(feature = "storage_hdf5"))]
mod imp {
    use super::super::metadata::Metadata;
    use crate::error::{AppResult, DaqError};
    use std::path::Path;

    #[allow(dead_code)]
    pub(super) enum Matrix<'a> {
        UInt8 { rows: usize, cols: usize, data: &'a [u8] },
        Float64 { rows: usize, cols: usize, data: &'a [f64] },
    }

    pub(super) fn write_group(
        _path: &Path,
        _name: &str,
        _matrix: Matrix<'_>,
        _freqs: &[f64],
        _timestamps_us: &[i64],
        _attrs: &Metadata,
    ) -> AppResult<()> {
        Err(DaqError::FeatureNotEnabled("storage_hdf5".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "storage_hdf5"))]
    #[test]
    fn init_reports_missing_feature() {
        let mut writer = Hdf5Writer::new();
        let err = writer.init().unwrap_err();
        assert!(matches!(err, DaqError::FeatureNotEnabled(ref f) if f == "storage_hdf5"));
        assert!(!writer.is_ready());
        assert!(!is_available());
    }

    #[test]
    fn writes_before_init_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = Hdf5Writer::new();
        let points = [OverviewPoint {
            freq_mhz: 45.0,
            value: 10,
        }];
        assert!(writer
            .write_overview(&dir.path().join("o.h5"), 0, &points, 0, &Metadata::new())
            .is_err());
        assert!(!dir.path().join("o.h5").exists());
    }

    #[cfg(feature = "storage_hdf5")]
    #[test]
    fn writes_data_group() {
        use crate::core::{FrequencyTable, RawBuffer};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.h5");
        let raw = RawBuffer::new(vec![1, 2, 3, 4, 5, 6], 1_714_536_000_000_000);
        let frame = SpectrumFrame::from_buffer(&raw, &FrequencyTable::default(), 3, 1);
        let mut attrs = Metadata::new();
        attrs.set("INSTRUME", "TEST");

        let mut writer = Hdf5Writer::new();
        writer.init().unwrap();
        writer.write_frame(&path, 0, &frame, &attrs).unwrap();
        writer.write_frame(&path, 1, &frame, &attrs).unwrap();

        let file = hdf5::File::open(&path).unwrap();
        let group = file.group("DATA00001").unwrap();
        let matrix: Vec<u8> = group.dataset("matrix").unwrap().read_raw().unwrap();
        assert_eq!(matrix, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(group.dataset("matrix").unwrap().shape(), vec![2, 3]);
        let ts: Vec<i64> = group
            .dataset("timestamps_unix_us")
            .unwrap()
            .read_raw()
            .unwrap();
        assert_eq!(ts, vec![1_714_536_000_000_000, 1_714_536_001_000_000]);
    }
}
