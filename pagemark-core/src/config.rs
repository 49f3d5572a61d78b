use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::geometry::DEFAULT_MAX_POINTS;

/// Which render backend drives annotation pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Overlay,
    Canvas,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overlay" => Ok(BackendKind::Overlay),
            "canvas" => Ok(BackendKind::Canvas),
            other => Err(format!("unknown backend {other:?}; use overlay or canvas")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub backend: BackendKind,
    pub cache: CacheConfig,
    pub zoom: ZoomConfig,
    pub save: SaveConfig,
    pub ink: InkConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
    pub lookahead_px: f64,
    pub page_gap_px: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 15,
            lookahead_px: 200.0,
            page_gap_px: 8.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoomConfig {
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub default: f64,
}

impl Default for ZoomConfig {
    fn default() -> Self {
        Self {
            min: 0.5,
            max: 3.0,
            step: 0.25,
            default: 1.0,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveConfig {
    #[serde(rename = "debounce_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub debounce: Duration,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InkConfig {
    pub max_points: usize,
}

impl Default for InkConfig {
    fn default() -> Self {
        Self {
            max_points: DEFAULT_MAX_POINTS,
        }
    }
}

impl EditorConfig {
    pub fn from_toml(source: &str) -> Result<Self> {
        let config: EditorConfig = toml::from_str(source).context("invalid editor config")?;
        Ok(config.sanitized())
    }

    /// Reads `path` if it exists, otherwise returns the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        Self::from_toml(&source).with_context(|| format!("failed to parse {:?}", path))
    }

    /// Clamps out-of-range values instead of rejecting the file.
    pub fn sanitized(mut self) -> Self {
        let defaults = ZoomConfig::default();
        self.cache.capacity = self.cache.capacity.max(1);
        self.cache.lookahead_px = self.cache.lookahead_px.max(0.0);
        self.cache.page_gap_px = self.cache.page_gap_px.max(0.0);
        if !(self.zoom.min > 0.0 && self.zoom.min <= self.zoom.max) {
            self.zoom.min = defaults.min;
            self.zoom.max = defaults.max;
        }
        if !(self.zoom.step > 0.0) {
            self.zoom.step = defaults.step;
        }
        self.zoom.default = self.zoom.default.clamp(self.zoom.min, self.zoom.max);
        self.ink.max_points = self.ink.max_points.max(2);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = EditorConfig::from_toml("").unwrap();
        assert_eq!(config, EditorConfig::default());
        assert_eq!(config.cache.capacity, 15);
        assert_eq!(config.save.debounce, Duration::from_millis(500));
    }

    #[test]
    fn partial_file_overrides_selected_fields() {
        let config = EditorConfig::from_toml(
            r#"
            backend = "canvas"
            [cache]
            capacity = 4
            [save]
            debounce_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.backend, BackendKind::Canvas);
        assert_eq!(config.cache.capacity, 4);
        assert_eq!(config.cache.lookahead_px, 200.0);
        assert_eq!(config.save.debounce, Duration::from_millis(250));
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let config = EditorConfig::from_toml(
            r#"
            [cache]
            capacity = 0
            [zoom]
            min = 2.0
            max = 1.0
            default = 9.0
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.capacity, 1);
        assert_eq!(config.zoom.min, 0.5);
        assert_eq!(config.zoom.max, 3.0);
        assert_eq!(config.zoom.default, 3.0);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = EditorConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, EditorConfig::default());
    }
}
