//! Error taxonomy shared by every pipeline stage.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while ingesting, accumulating or persisting event statistics.
///
/// None of these are recovered from inside the library. They carry enough
/// context (stage, key or file) for the caller to report the failure and exit.
#[derive(Error, Debug)]
pub enum StatsError {
    /// A required setting or store key is absent or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Records or arrays have the wrong shape or hold out-of-range values.
    #[error("data format error: {0}")]
    DataFormat(String),

    /// A pixel coordinate falls outside the buffer it addresses.
    #[error("index error: {0}")]
    Index(String),

    /// A backing store could not be opened, read or written.
    #[error("cannot access {path:?}: {source}")]
    Resource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode image {path:?}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl StatsError {
    pub(crate) fn resource(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Resource {
            path: path.into(),
            source,
        }
    }

    /// Classifies a JSON failure: I/O problems are resource errors,
    /// syntax and type mismatches are data format errors.
    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        let path = path.into();
        if source.is_io() {
            Self::Resource {
                path,
                source: source.into(),
            }
        } else {
            Self::DataFormat(format!("{:?}: {}", path, source))
        }
    }

    /// Same classification as [`StatsError::json`], for CSV tables.
    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        let path = path.into();
        if source.is_io_error() {
            Self::Resource {
                path,
                source: source.into(),
            }
        } else {
            Self::DataFormat(format!("{:?}: {}", path, source))
        }
    }
}

pub type Result<T> = std::result::Result<T, StatsError>;
