use std::path::PathBuf;
use thiserror::Error;

/// Per-item failures of the rip pipeline.
///
/// The queue runner catches these at the item boundary and turns them into
/// skip-and-continue outcomes; only cancellation ends a run early. Transient
/// disc-tool failures never surface here at all -- the poll loops absorb them
/// as "disc absent".
#[derive(Debug, Error)]
pub enum RipError {
    /// ffprobe exited non-zero, could not be spawned, or produced
    /// unparseable output. Fatal to selection for that one file only.
    #[error("ffprobe failed for {path}: {detail}")]
    ProbeFailure { path: PathBuf, detail: String },

    /// No ripped title meets the minimum main-feature length.
    #[error("no title meets the minimum feature length of {min_secs} seconds")]
    NoCandidate { min_secs: f64 },

    /// The destination file already exists. The move step never overwrites;
    /// the keeper stays in its rip folder for manual handling.
    #[error("destination already exists: {0}")]
    DestinationExists(PathBuf),

    /// The rip folder has no job marker, so it is not owned by the pipeline.
    #[error("no job marker found in {0}")]
    MissingJobMarker(PathBuf),

    /// The rip produced zero MKV files.
    #[error("no .mkv output found in {0}")]
    NoRipOutput(PathBuf),
}
