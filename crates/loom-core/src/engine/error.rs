//! Pipeline worker error types

use thiserror::Error;

/// Errors raised while setting up pipeline workers
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Failed to build the background pass pool
    #[error("Failed to build pass worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Failed to spawn a named worker thread
    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for pipeline setup
pub type PipelineResult<T> = Result<T, PipelineError>;
