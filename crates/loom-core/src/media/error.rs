//! Media error types

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by demux/decode backends
///
/// Decoder nodes never let these cross into the graph: they log and
/// report "no frame" instead.
#[derive(Error, Debug)]
pub enum MediaError {
    /// File could not be opened or probed
    #[error("Failed to open {path:?}: {reason}")]
    Open { path: PathBuf, reason: String },

    /// Container has no stream of the requested kind
    #[error("No {0} stream found")]
    NoStream(&'static str),

    /// Stream parameters the pipeline cannot handle
    #[error("Unsupported media: {0}")]
    Unsupported(String),

    /// Decoder needs more input before producing output; retry the call
    #[error("Decoder not ready, try again")]
    TryAgain,

    /// Unrecoverable decode failure
    #[error("Decode error: {0}")]
    Decode(String),

    /// Seek rejected by the demuxer
    #[error("Seek error: {0}")]
    Seek(String),

    /// Resampler construction or processing failed
    #[error("Resampler error: {0}")]
    Resample(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for media operations
pub type MediaResult<T> = Result<T, MediaError>;
