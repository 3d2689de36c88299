//! Audio pipeline configuration
//!
//! Defines the fixed shape of every audio pass (sample rate, channels,
//! period), output device selection and stretch/arena settings.

use serde::{Deserialize, Serialize};

use crate::types::{AudioSpec, DEFAULT_CHANNELS, DEFAULT_PERIOD, DEFAULT_SAMPLE_RATE};

/// Largest period accepted from configuration (frames)
pub const MAX_PERIOD: usize = 16384;

/// Smallest period accepted from configuration (frames)
pub const MIN_PERIOD: usize = 64;

/// Default size of the per-pass sample arena (16 MiB)
pub const DEFAULT_ARENA_BYTES: usize = 16 * 1024 * 1024;

/// Audio device identifier
///
/// Includes both the device name and the host backend (ALSA, JACK, CoreAudio...)
/// so devices can be selected from a non-default host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    /// Device name as reported by the system
    pub name: String,
    /// Audio host identifier. If None, uses the default host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
        }
    }

    pub fn with_host(name: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            host: Some(host.to_string()),
        }
    }

    /// Get a display label that includes the host if available
    pub fn display_label(&self) -> String {
        match &self.host {
            Some(host) => format!("[{}] {}", host, self.name),
            None => self.name.clone(),
        }
    }
}

/// Audio settings threaded through every pipeline component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Pipeline sample rate; decoded media is resampled to it
    pub sample_rate: u32,
    /// Interleaved channel count of every bus and frame
    pub channels: u16,
    /// Frames per pass/callback
    pub period: usize,
    /// Output device (None = system default)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceId>,
    /// Use the high-quality time-stretch preset
    pub high_quality_stretch: bool,
    /// Capacity of the per-pass sample arena in bytes
    pub arena_bytes: usize,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            period: DEFAULT_PERIOD,
            device: None,
            high_quality_stretch: false,
            arena_bytes: DEFAULT_ARENA_BYTES,
        }
    }
}

impl AudioSettings {
    /// Shape of one pass, with out-of-range values clamped
    pub fn spec(&self) -> AudioSpec {
        AudioSpec::new(
            self.sample_rate.max(1),
            self.channels.max(1),
            self.period.clamp(MIN_PERIOD, MAX_PERIOD),
        )
    }

    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_period(mut self, period: usize) -> Self {
        self.period = period;
        self
    }

    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Latency of one period in milliseconds
    pub fn latency_ms(&self) -> f32 {
        let spec = self.spec();
        (spec.period as f32 / spec.sample_rate as f32) * 1000.0
    }
}
