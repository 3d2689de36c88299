//! Standard locations of loom files

use std::path::PathBuf;

/// Per-user configuration directory
///
/// Returns: `~/.config/loom` on Linux, the platform equivalent elsewhere
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("loom")
}

/// Path of the pipeline configuration file
pub fn default_config_path() -> PathBuf {
    config_dir().join("pipeline.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_is_loom() {
        assert!(config_dir().ends_with("loom"));
    }

    #[test]
    fn test_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("loom/pipeline.yaml"));
    }
}
