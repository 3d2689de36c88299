//! Decoder nodes: audio decode/resample and video decode/seek
//!
//! Each decoder node owns a [`ContextPool`](crate::pool::ContextPool) behind
//! one lock, held for the whole decode-plus-cache critical section. Nodes
//! never return errors to the graph: missing or broken media yields `None`.

mod audio;
mod keyframes;
mod resample;
mod rescale;
mod video;

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

pub use audio::{AudioContext, AudioDecoder, DecodeRequest};
pub use keyframes::KeyframeIndex;
pub use resample::ResampleQueue;
pub use rescale::{PixelBuffer, PixelData, PixelPrecision, Rescaler};
pub use video::{FrameRequest, VideoContext, VideoDecoder};

/// Seek request shared by every context of a decoder node
///
/// Writers overwrite the target and bump the epoch; each context compares
/// the epoch at its next decode call and reseeks once. Concurrent writers
/// resolve last-writer-wins.
#[derive(Debug, Default)]
pub struct SeekTarget {
    epoch: AtomicU64,
    seconds: AtomicU64,
}

impl SeekTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a seek to `seconds` (composition time)
    pub fn request(&self, seconds: f64) {
        self.seconds.store(seconds.to_bits(), Ordering::Release);
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Current epoch, bumped on every request
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Most recently requested target
    pub fn seconds(&self) -> f64 {
        f64::from_bits(self.seconds.load(Ordering::Acquire))
    }
}

/// Decode progress readable lock-free while a decode runs (0.0..=1.0)
#[derive(Debug, Default)]
pub struct DecodeProgress {
    bits: AtomicU32,
}

impl DecodeProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, fraction: f32) {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.bits.store(fraction.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seek_target_last_writer_wins() {
        let target = SeekTarget::new();
        assert_eq!(target.epoch(), 0);
        target.request(3.0);
        target.request(7.5);
        assert_eq!(target.epoch(), 2);
        assert_eq!(target.seconds(), 7.5);
    }

    #[test]
    fn test_progress_is_clamped() {
        let progress = DecodeProgress::new();
        assert_eq!(progress.get(), 0.0);
        progress.set(0.25);
        assert_eq!(progress.get(), 0.25);
        progress.set(4.0);
        assert_eq!(progress.get(), 1.0);
        progress.set(f32::NAN);
        assert_eq!(progress.get(), 0.0);
    }
}
