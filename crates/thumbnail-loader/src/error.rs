//! Error type surfaced to thumbnail subscribers

use std::path::PathBuf;

use thiserror::Error;

/// Failures that terminate a thumbnail request.
///
/// All of these surface as a `Failed` delivery; none of them are fatal to
/// the loader itself. [`ThumbnailError::CacheWriteFailed`] is the one kind
/// that is also tolerated mid-pipeline: generated pixels are still handed
/// to subscribers when only the disk write failed.
#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("source is missing or not a readable image: {0}")]
    SourceUnreadable(PathBuf),

    #[error("decoding {0} produced no pixels")]
    DecodeFailed(PathBuf),

    #[error("thumbnail generator failed for {path}: {reason}")]
    GeneratorFailed { path: PathBuf, reason: String },

    #[error("could not write cache entry {0}")]
    CacheWriteFailed(PathBuf),

    #[error("no usable thumbnail size for a {width}x{height} request")]
    InvalidSizeSelection { width: u32, height: u32 },
}

pub type Result<T> = std::result::Result<T, ThumbnailError>;
