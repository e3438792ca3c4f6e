//! Camera configuration
//!
//! The persisted configuration shape, deserialized from JSON. Every section
//! has defaults, so a partial file (or `{}`) is a valid configuration.
//! [`CameraConfig::validate`] converts the loose option values into typed
//! layout settings and rejects anything out of range.

use crate::command::{Dialect, VacuumTarget};
use crate::layout::{AspectRatio, LayoutOptions, Rotation, MAX_FRAME_EDGE};
use crate::palette::PaletteConfig;
use crate::render::{FontWeight, StatusTextOptions, TextPosition, MAX_TEXT_SIZE};
use crate::trims::{trim_file_path, Margins};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Which vacuum the camera follows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VacuumConfig {
    /// Topic prefix of the vacuum
    pub topic: String,
    pub dialect: Dialect,
    /// Display name used in the status text
    pub name: String,
}

impl Default for VacuumConfig {
    fn default() -> Self {
        Self {
            topic: "valetudo/robot".to_string(),
            dialect: Dialect::Valetudo,
            name: "Vacuum".to_string(),
        }
    }
}

/// Image options as stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// 0, 90, 180 or 270
    pub rotate: u16,
    pub auto_zoom: bool,
    /// `"None"` or `"W, H"`
    pub aspect_ratio: String,
    pub enable_snapshots: bool,
    pub target_width: u32,
    pub target_height: u32,
    pub cell_pixels: u32,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            rotate: 0,
            auto_zoom: false,
            aspect_ratio: "None".to_string(),
            enable_snapshots: false,
            target_width: 1024,
            target_height: 1024,
            cell_pixels: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusTextConfig {
    pub enabled: bool,
    pub position: TextPosition,
    pub size: u32,
    pub font: FontWeight,
}

impl Default for StatusTextConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            position: TextPosition::Top,
            size: 2,
            font: FontWeight::Regular,
        }
    }
}

/// Full camera configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Camera entity id, used for trim files and snapshot names
    pub entity_id: String,
    pub vacuum: VacuumConfig,
    pub palette: PaletteConfig,
    pub image: ImageConfig,
    pub status_text: StatusTextConfig,
    /// Padding around the cropped map for the active floor
    pub margins: Margins,
    /// Active floor name
    pub floor: String,
    /// Directory holding trim files
    pub storage_dir: PathBuf,
    /// Render deadline in milliseconds
    pub render_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            entity_id: "camera.vacuum_camera".to_string(),
            vacuum: VacuumConfig::default(),
            palette: PaletteConfig::default(),
            image: ImageConfig::default(),
            status_text: StatusTextConfig::default(),
            margins: Margins::default(),
            floor: "floor_0".to_string(),
            storage_dir: PathBuf::from("."),
            render_timeout_ms: 5000,
        }
    }
}

impl CameraConfig {
    /// Read and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: CameraConfig = serde_json::from_slice(&data)?;
        config.validate()?;
        debug!("Loaded camera config from {}", path.display());
        Ok(config)
    }

    /// Check every option without changing anything
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.layout_options()?;
        self.margins
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if !(1..=MAX_TEXT_SIZE).contains(&self.status_text.size) {
            return Err(ConfigError::Invalid(format!(
                "status_text.size {} outside 1..={}",
                self.status_text.size, MAX_TEXT_SIZE
            )));
        }
        if self.floor.trim().is_empty() {
            return Err(ConfigError::Invalid("floor name is empty".to_string()));
        }
        if self.vacuum.topic.trim().is_empty() {
            return Err(ConfigError::Invalid("vacuum.topic is empty".to_string()));
        }
        if self.render_timeout_ms == 0 {
            return Err(ConfigError::Invalid("render_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    /// Typed layout options
    pub fn layout_options(&self) -> Result<LayoutOptions, ConfigError> {
        let image = &self.image;
        let rotation =
            Rotation::try_from(image.rotate).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let aspect_ratio: AspectRatio = image
            .aspect_ratio
            .parse()
            .map_err(|e: crate::layout::LayoutError| ConfigError::Invalid(e.to_string()))?;

        for (name, value) in [
            ("image.target_width", image.target_width),
            ("image.target_height", image.target_height),
        ] {
            if value == 0 || value > MAX_FRAME_EDGE {
                return Err(ConfigError::Invalid(format!(
                    "{} = {} outside 1..={}",
                    name, value, MAX_FRAME_EDGE
                )));
            }
        }
        if image.cell_pixels == 0 {
            return Err(ConfigError::Invalid("image.cell_pixels must be positive".to_string()));
        }

        Ok(LayoutOptions {
            rotation,
            aspect_ratio,
            auto_zoom: image.auto_zoom,
            target_width: image.target_width,
            target_height: image.target_height,
            cell_pixels: image.cell_pixels,
        })
    }

    /// Status text options, `None` when disabled
    pub fn status_options(&self) -> Option<StatusTextOptions> {
        self.status_text.enabled.then(|| StatusTextOptions {
            position: self.status_text.position,
            size: self.status_text.size.clamp(1, MAX_TEXT_SIZE),
            font: self.status_text.font,
        })
    }

    pub fn target(&self) -> VacuumTarget {
        VacuumTarget::new(self.vacuum.topic.clone(), self.vacuum.dialect)
    }

    /// Trim file of this camera, `None` for non-camera entity ids
    pub fn trim_file(&self) -> Option<PathBuf> {
        trim_file_path(&self.storage_dir, &self.entity_id)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }
}
