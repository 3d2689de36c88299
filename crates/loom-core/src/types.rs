//! Common types for Loom
//!
//! This module contains the fundamental audio types shared by the decode
//! pipelines, the bus graph, the scheduler and the waveform manager.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default sample rate of the mixing pipeline (48kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default number of interleaved output channels (stereo)
pub const DEFAULT_CHANNELS: u16 = 2;

/// Default number of frames processed per pass/callback
pub const DEFAULT_PERIOD: usize = 4096;

/// Audio sample type (32-bit float, interleaved)
pub type Sample = f32;

/// Fixed shape of one audio pass
///
/// Every buffer exchanged inside the pipeline is `period × channels`
/// interleaved samples at `sample_rate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub period: usize,
}

impl AudioSpec {
    pub fn new(sample_rate: u32, channels: u16, period: usize) -> Self {
        Self {
            sample_rate,
            channels,
            period,
        }
    }

    /// Interleaved sample count of one period
    #[inline]
    pub fn period_samples(&self) -> usize {
        self.period * self.channels as usize
    }

    /// Wall-clock length of one period
    pub fn period_duration(&self) -> Duration {
        Duration::from_secs_f64(self.period as f64 / self.sample_rate as f64)
    }

    /// Real-time budget of a synchronous pass: half the period's duration
    pub fn deadline(&self) -> Duration {
        self.period_duration() / 2
    }

    /// Seconds of audio covered by one period
    pub fn period_seconds(&self) -> f64 {
        self.period as f64 / self.sample_rate as f64
    }
}

impl Default for AudioSpec {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE, DEFAULT_CHANNELS, DEFAULT_PERIOD)
    }
}

/// Identifier of an audio bus inside a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusId(pub i32);

/// Identifier of a composition inside a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompositionId(pub i32);

/// Encoded image attached to decoded audio (e.g. embedded album art)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artwork {
    /// MIME type as reported by the container ("image/jpeg", "image/png", ...)
    pub media_type: String,
    /// Encoded image bytes, shared between every frame that carries them
    pub data: Arc<[u8]>,
}

impl Artwork {
    pub fn new(media_type: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            media_type: media_type.into(),
            data: data.into(),
        }
    }
}

/// One period of decoded, resampled audio
///
/// Produced fresh on every pass and never mutated once cached.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Sample rate of `samples` (always the pipeline rate)
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Interleaved samples, `period × channels` long
    pub samples: Vec<Sample>,
    /// Attached pictures, asset artwork first
    pub artwork: Vec<Artwork>,
}

impl AudioFrame {
    /// Create a silent frame shaped after `spec`
    pub fn silence(spec: &AudioSpec) -> Self {
        Self {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples: vec![0.0; spec.period_samples()],
            artwork: Vec::new(),
        }
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    /// True when every sample is exactly zero
    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0.0)
    }

    /// Peak absolute amplitude across all channels
    pub fn peak(&self) -> Sample {
        self.samples.iter().fold(0.0, |acc: f32, s| acc.max(s.abs()))
    }
}
