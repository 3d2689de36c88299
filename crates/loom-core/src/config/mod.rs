//! Pipeline configuration
//!
//! One YAML document holds everything the pipeline needs at construction
//! time. The value is passed explicitly into every component; nothing reads
//! process-wide audio globals.
//!
//! ```yaml
//! audio:
//!   sample_rate: 48000
//!   channels: 2
//!   period: 4096
//!   high_quality_stretch: false
//! waveform:
//!   bucket_width: 256
//!   poll_interval_ms: 1000
//! video:
//!   precision: u8
//! instant_grid: 1000
//! ```
//!
//! ```ignore
//! use loom_core::config::{default_config_path, load_config, save_config, PipelineConfig};
//!
//! let config: PipelineConfig = load_config(&default_config_path());
//! save_config(&config, &default_config_path())?;
//! ```

mod io;
mod paths;

use serde::{Deserialize, Serialize};

pub use crate::audio::AudioSettings;
pub use crate::waveform::WaveformSettings;
pub use io::{load_config, save_config};
pub use paths::{config_dir, default_config_path};

use crate::decode::PixelPrecision;
use crate::pool::{EvaluationInstant, DEFAULT_INSTANT_GRID};
use crate::types::AudioSpec;

/// Video decode settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    pub precision: PixelPrecision,
}

fn default_instant_grid() -> u32 {
    DEFAULT_INSTANT_GRID
}

/// Top-level pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub audio: AudioSettings,
    pub waveform: WaveformSettings,
    pub video: VideoSettings,
    /// Evaluation instants are snapped to this many steps per frame
    #[serde(default = "default_instant_grid")]
    pub instant_grid: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            audio: AudioSettings::default(),
            waveform: WaveformSettings::default(),
            video: VideoSettings::default(),
            instant_grid: DEFAULT_INSTANT_GRID,
        }
    }
}

impl PipelineConfig {
    pub fn spec(&self) -> AudioSpec {
        self.audio.spec()
    }

    /// Evaluation instant for a time-travel offset in frames
    pub fn instant(&self, offset_frames: f64) -> EvaluationInstant {
        let instant = EvaluationInstant::from_offset(offset_frames, self.instant_grid);
        if instant.offset_frames() == 0.0 {
            EvaluationInstant::LIVE
        } else {
            instant
        }
    }
}
