//! Application configuration
//!
//! Loaded from `config.toml` in the platform config directory, or from the
//! path in `CAPTURE_STREAMER_CONFIG`. Every section falls back to defaults, so
//! a missing file or a partial file is fine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::capture::Facing;
use crate::constants::*;
use crate::error::{Error, Result};

/// Environment variable overriding the config file location
pub const CONFIG_ENV_VAR: &str = "CAPTURE_STREAMER_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub camera: CameraConfig,
    pub screen: ScreenConfig,
    pub pipeline: PipelineConfig,
    pub snapshot: SnapshotConfig,
    pub power: PowerConfig,
}

/// Camera capture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub facing: Facing,
    /// Requested preview width. Not negotiated against device sizes.
    pub width: u32,
    /// Requested preview height. Not negotiated against device sizes.
    pub height: u32,
    /// Frame rate used by synthetic backends
    pub fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            facing: Facing::Front,
            width: CAMERA_WIDTH,
            height: CAMERA_HEIGHT,
            fps: DEFAULT_FPS,
        }
    }
}

/// Screen mirroring settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    /// Images held by the receiving surface
    pub buffer_depth: usize,
    /// Keep mirroring while the host is in the background
    pub allow_background: bool,
    /// Frame rate used by synthetic backends
    pub fps: u32,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            buffer_depth: SCREEN_BUFFER_DEPTH,
            allow_background: true,
            fps: DEFAULT_FPS,
        }
    }
}

/// Frame pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Frames queued between producer and consumer before dropping
    pub depth: usize,
    /// Idle buffers retained by the frame pool
    pub frame_pool_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            depth: DEFAULT_PIPELINE_DEPTH,
            frame_pool_size: DEFAULT_FRAME_POOL_SIZE,
        }
    }
}

impl PipelineConfig {
    /// Depth matching the screen surface so neither side queues more than the other
    pub fn matching(screen: &ScreenConfig) -> Self {
        Self {
            depth: screen.buffer_depth,
            ..Self::default()
        }
    }
}

/// Local snapshot export
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub enabled: bool,
    pub directory: PathBuf,
    /// File name prefix, followed by the per-sink counter
    pub prefix: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: default_snapshot_dir(),
            prefix: SNAPSHOT_PREFIX.to_string(),
        }
    }
}

/// Wake lock settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    pub wake_lock_tag: String,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            wake_lock_tag: WAKE_LOCK_TAG.to_string(),
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "capture-streamer", "capture-streamer")
}

fn default_snapshot_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join("screenshots"))
        .unwrap_or_else(|| PathBuf::from("screenshots"))
}

impl AppConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Some(PathBuf::from(path));
        }
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Parse a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Load from the default location, using defaults if no file exists
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!(path = %path.display(), "Loading configuration");
                Self::from_file(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}
