// SPDX-License-Identifier: MPL-2.0
//! This module handles the player's configuration, including loading and saving
//! tuning values to a `settings.toml` file.
//!
//! # Examples
//!
//! ```no_run
//! use unified_player::config::{self, PlayerConfig};
//! use std::path::PathBuf;
//!
//! // Load existing configuration
//! let mut config = config::load().unwrap_or_default();
//!
//! // Record at 24 fps from now on
//! config.recording_fps = Some(24);
//!
//! // Save the modified configuration
//! config::save(&config).expect("Failed to save config");
//!
//! // To load/save from a specific path (e.g., for testing)
//! let temp_file = PathBuf::from("./temp_config_dir/test_settings.toml");
//! config::save_to_path(&config, &temp_file).expect("Failed to save to path");
//! let loaded = config::load_from_path(&temp_file).expect("Failed to load from path");
//! assert_eq!(loaded.recording_fps, Some(24));
//! ```

pub mod defaults;

pub use defaults::*;

use crate::error::Result;
use crate::video_player::{RecordingFps, SamplerRateHz};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "settings.toml";
const APP_NAME: &str = "UnifiedPlayer";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Frame sampler rate in Hz (display refresh rate).
    #[serde(default)]
    pub sampler_rate_hz: Option<u32>,
    /// Nominal frame rate of recorded files.
    #[serde(default)]
    pub recording_fps: Option<u32>,
    /// Interval between progress notifications, in milliseconds.
    #[serde(default)]
    pub progress_interval_ms: Option<u64>,
    /// Where `start_recording("")` places auto-named files.
    #[serde(default)]
    pub recordings_dir: Option<PathBuf>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            sampler_rate_hz: Some(DEFAULT_SAMPLER_RATE_HZ),
            recording_fps: Some(DEFAULT_RECORDING_FPS),
            progress_interval_ms: Some(DEFAULT_PROGRESS_INTERVAL_MS),
            recordings_dir: None,
        }
    }
}

impl PlayerConfig {
    /// Sampler rate, clamped to the supported range.
    #[must_use]
    pub fn sampler_rate(&self) -> SamplerRateHz {
        self.sampler_rate_hz
            .map(SamplerRateHz::new)
            .unwrap_or_default()
    }

    /// Recording frame rate, clamped to the supported range.
    #[must_use]
    pub fn recording_fps(&self) -> RecordingFps {
        self.recording_fps.map(RecordingFps::new).unwrap_or_default()
    }

    #[must_use]
    pub fn progress_interval(&self) -> Duration {
        let ms = self
            .progress_interval_ms
            .unwrap_or(DEFAULT_PROGRESS_INTERVAL_MS)
            .clamp(MIN_PROGRESS_INTERVAL_MS, MAX_PROGRESS_INTERVAL_MS);
        Duration::from_millis(ms)
    }

    /// Directory for auto-named recordings.
    ///
    /// Falls back to `<videos>/recordings`, then to the system temp directory.
    #[must_use]
    pub fn recordings_dir(&self) -> PathBuf {
        if let Some(dir) = &self.recordings_dir {
            return dir.clone();
        }
        dirs::video_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(DEFAULT_RECORDINGS_SUBDIR)
    }
}

fn get_default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut path| {
        path.push(APP_NAME);
        path.push(CONFIG_FILE);
        path
    })
}

pub fn load() -> Result<PlayerConfig> {
    if let Some(path) = get_default_config_path() {
        if path.exists() {
            return load_from_path(&path);
        }
    }
    Ok(PlayerConfig::default())
}

pub fn save(config: &PlayerConfig) -> Result<()> {
    if let Some(path) = get_default_config_path() {
        return save_to_path(config, &path);
    }
    Ok(())
}

pub fn load_from_path(path: &Path) -> Result<PlayerConfig> {
    let content = fs::read_to_string(path)?;
    match toml::from_str(&content) {
        Ok(config) => Ok(config),
        Err(e) => {
            log::warn!("Ignoring invalid config at {}: {}", path.display(), e);
            Ok(PlayerConfig::default())
        }
    }
}

pub fn save_to_path(config: &PlayerConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}
