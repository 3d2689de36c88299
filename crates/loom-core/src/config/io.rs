//! YAML configuration files
//!
//! Works with any serde type. A missing or broken file never stops the
//! pipeline from starting: loading falls back to the type's defaults.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::Path;

/// Load a YAML configuration, falling back to `T::default()`
///
/// A missing file is expected on first start and only logged at info
/// level; unreadable or unparsable files are logged as warnings.
///
/// ```ignore
/// let config: PipelineConfig = load_config(&default_config_path());
/// ```
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::info!("No config at {:?}, using defaults", path);
            return T::default();
        }
        Err(e) => {
            log::warn!("Failed to read config {:?}: {}, using defaults", path, e);
            return T::default();
        }
    };

    match serde_yaml::from_str::<T>(&contents) {
        Ok(config) => {
            log::info!("Loaded config from {:?}", path);
            config
        }
        Err(e) => {
            log::warn!("Failed to parse config {:?}: {}, using defaults", path, e);
            T::default()
        }
    }
}

/// Write a configuration as YAML, creating parent directories
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;
    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("Saved config to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::decode::PixelPrecision;

    #[test]
    fn test_missing_file_gives_defaults() {
        let config: PipelineConfig = load_config(Path::new("/nonexistent/loom/pipeline.yaml"));
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_broken_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");
        std::fs::write(&path, "audio: [not, a, map").unwrap();
        let config: PipelineConfig = load_config(&path);
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_save_creates_directories_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pipeline.yaml");

        let mut config = PipelineConfig::default();
        config.audio.period = 1024;
        config.video.precision = PixelPrecision::F32;
        config.waveform.bucket_width = 512;

        save_config(&config, &path).unwrap();
        let loaded: PipelineConfig = load_config(&path);
        assert_eq!(loaded, config);
    }
}
