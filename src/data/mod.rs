//! Spectrum storage and streaming.
//!
//! - [`spectrum`]: buffer → sweep × channel matrix with axes
//! - [`rotation`]: time-windowed output file naming
//! - [`metadata`]: header keywords and group attributes
//! - [`fits`] / [`hdf5_writer`]: file backends implementing [`SpectrumWriter`]
//! - [`publisher`]: ZeroMQ PUB sink
//! - [`writer`]: [`DataWriterEngine`], which ties the above together

pub mod fits;
pub mod hdf5_writer;
pub mod metadata;
pub mod publisher;
pub mod rotation;
pub mod spectrum;
pub mod writer;

use crate::error::AppResult;
use std::path::Path;

pub use metadata::{MetaValue, Metadata};
pub use spectrum::SpectrumFrame;
pub use writer::{DataWriterEngine, StorageFormat, WriterStats};

/// A file format that stores one [`SpectrumFrame`] per call.
///
/// Writers are initialised lazily by the engine; a failed `init` is retried on
/// the next write.
pub trait SpectrumWriter: Send {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    /// File name extension without the dot.
    fn extension(&self) -> &'static str;

    /// Prepares the backend; called again on the next write after a failure.
    fn init(&mut self) -> AppResult<()>;

    /// Whether [`init`](Self::init) has succeeded.
    fn is_ready(&self) -> bool;

    /// Appends `frame` to `path`, creating the file if needed. `seq` names the
    /// HDU or group.
    fn write_frame(
        &mut self,
        path: &Path,
        seq: u64,
        frame: &SpectrumFrame,
        header: &Metadata,
    ) -> AppResult<()>;
}
