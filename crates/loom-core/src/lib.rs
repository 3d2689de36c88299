//! Loom Core - media decode, caching and mixing pipeline for the loom compositor
//!
//! - [`pool`]: per-instant decode contexts with tick-based eviction
//! - [`decode`]: audio decode/resample and keyframe-aware video decode nodes
//! - [`engine`]: bus mixing, graph passes and the real-time scheduler
//! - [`audio`]: cpal output driven by the scheduler
//! - [`waveform`]: background amplitude envelopes

pub mod audio;
pub mod config;
pub mod decode;
pub mod engine;
pub mod media;
pub mod pool;
pub mod timestretch;
pub mod types;
pub mod waveform;

#[cfg(test)]
mod testing;

pub use types::*;
