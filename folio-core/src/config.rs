use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::raster::InversionStyle;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Renderer settings, read once when a document's worker starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Use a smoothing filter when downscaling thumbnails.
    pub thumbnail_filter: bool,
    /// Edge length of the square thumbnail in pixels.
    pub thumbnail_size: u32,
    pub inverted_color_contrast: f32,
    pub inverted_color_brightening: f32,
}

impl Default for Config {
    fn default() -> Self {
        let inversion = InversionStyle::default();
        Self {
            thumbnail_filter: true,
            thumbnail_size: 32,
            inverted_color_contrast: inversion.contrast,
            inverted_color_brightening: inversion.brightening,
        }
    }
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        let config: Config = toml::from_str(raw)?;
        Ok(config.normalized())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// `config.toml` in the platform config directory.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("net", "folio", "folio")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn inversion(&self) -> InversionStyle {
        InversionStyle {
            contrast: self.inverted_color_contrast,
            brightening: self.inverted_color_brightening,
        }
    }

    fn normalized(mut self) -> Self {
        self.thumbnail_size = self.thumbnail_size.max(1);
        self.inverted_color_contrast = clamp_unit(self.inverted_color_contrast, 0.5);
        self.inverted_color_brightening = clamp_unit(self.inverted_color_brightening, 0.15);
        self
    }
}

fn clamp_unit(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn partial_config_keeps_defaults() {
        let config = Config::from_toml_str("thumbnail_size = 48\n").unwrap();
        assert_eq!(config.thumbnail_size, 48);
        assert!(config.thumbnail_filter);
        assert_eq!(config.inversion(), InversionStyle::default());
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let config = Config::from_toml_str(
            "thumbnail_size = 0\ninverted_color_contrast = 3.0\ninverted_color_brightening = -1.0\n",
        )
        .unwrap();
        assert_eq!(config.thumbnail_size, 1);
        assert_eq!(config.inverted_color_contrast, 1.0);
        assert_eq!(config.inverted_color_brightening, 0.0);
    }

    #[test]
    fn load_reads_file_and_missing_file_falls_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert_eq!(Config::load_or_default(&path).unwrap(), Config::default());
        assert!(matches!(Config::load(&path), Err(ConfigError::Io { .. })));

        std::fs::write(&path, "thumbnail_filter = false\n").unwrap();
        let config = Config::load_or_default(&path).unwrap();
        assert!(!config.thumbnail_filter);
        assert_eq!(config.thumbnail_size, 32);
    }

    #[test]
    fn malformed_file_reports_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "thumbnail_size = \"big\"\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }
}
