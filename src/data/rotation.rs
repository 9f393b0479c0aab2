//! Time-based output file rotation.

use crate::timestamp::file_stamp;
use std::path::{Path, PathBuf};
use tracing::info;

/// Tracks the current output file of one sink and the per-process sequence
/// number used to name the groups/HDUs written into it.
#[derive(Debug, Clone)]
pub struct FileRotation {
    dir: PathBuf,
    prefix: String,
    extension: &'static str,
    filetime_secs: u64,
    current: Option<(PathBuf, i64)>,
    seq: u64,
}

impl FileRotation {
    /// `prefix` is the file name up to the timestamp, e.g. `CALLISTO_BIR`.
    pub fn new(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        extension: &'static str,
        filetime_secs: u64,
    ) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            extension,
            filetime_secs,
            current: None,
            seq: 0,
        }
    }

    /// Returns the path to write a buffer stamped `ts_us` to, opening a new file
    /// on first use or once `filetime` seconds have elapsed since the current one
    /// started.
    pub fn path_for(&mut self, ts_us: i64) -> &Path {
        let window_us = i64::try_from(self.filetime_secs.max(1))
            .unwrap_or(i64::MAX)
            .saturating_mul(1_000_000);

        let current = match self.current.take() {
            Some((path, start)) if start > 0 && ts_us.saturating_sub(start) < window_us => {
                (path, start)
            }
            _ => {
                let path = self.new_path(ts_us);
                info!(path = %path.display(), "Opening new output file");
                (path, ts_us)
            }
        };
        &self.current.insert(current).0
    }

    /// Returns the current sequence number and advances it. Sequence numbers
    /// continue across files.
    pub fn next_seq(&mut self) -> u64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    /// File of the current window, if one was opened.
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|(p, _)| p.as_path())
    }

    /// Output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn new_path(&self, ts_us: i64) -> PathBuf {
        let stamp = file_stamp(ts_us);
        self.dir
            .join(format!("{}_{}.{}", self.prefix, stamp, self.extension))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_714_536_000_000_000;

    #[test]
    fn writes_within_window_share_a_path() {
        let mut rotation = FileRotation::new("/data", "CALLISTO_TEST", "fits", 60);
        let first = rotation.path_for(T0).to_path_buf();
        assert_eq!(
            first,
            PathBuf::from("/data/CALLISTO_TEST_20240501_040000.fits")
        );
        assert_eq!(rotation.path_for(T0 + 59_999_999), first);
    }

    #[test]
    fn rotates_at_filetime() {
        let mut rotation = FileRotation::new("/data", "CALLISTO_TEST", "h5", 60);
        let first = rotation.path_for(T0).to_path_buf();
        let second = rotation.path_for(T0 + 60_000_000).to_path_buf();
        assert_ne!(first, second);
        assert_eq!(
            second,
            PathBuf::from("/data/CALLISTO_TEST_20240501_040100.h5")
        );
    }

    #[test]
    fn zero_filetime_rotates_every_second() {
        let mut rotation = FileRotation::new("/data", "OVS_TEST", "h5", 0);
        let first = rotation.path_for(T0).to_path_buf();
        assert_eq!(rotation.path_for(T0 + 999_999), first);
        assert_ne!(rotation.path_for(T0 + 1_000_000), first);
    }

    #[test]
    fn sequence_continues_across_files() {
        let mut rotation = FileRotation::new("/data", "CALLISTO_TEST", "fits", 1);
        rotation.path_for(T0);
        assert_eq!(rotation.next_seq(), 0);
        assert_eq!(rotation.next_seq(), 1);
        rotation.path_for(T0 + 5_000_000);
        assert_eq!(rotation.next_seq(), 2);
    }

    #[test]
    fn nothing_allocated_before_first_write() {
        let rotation = FileRotation::new("/data", "OVS_TEST", "h5", 60);
        assert!(rotation.current_path().is_none());
    }
}
