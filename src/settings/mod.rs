//! Persisted preferences.
//!
//! A flat record kept in memory and, when a path is configured, mirrored to a
//! JSON file on every save. View-state fields are gated by "remember" flags;
//! tunables are always written.

use std::{
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    camera::types::{AntiFlickerMode, NoiseReductionMode},
    core::state::ViewState,
};

pub const DEFAULT_PORT: u16 = 8080;
const DEFAULT_QUALITY: u8 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RememberFlags {
    pub settings: bool,
    pub sensor: bool,
    pub resolution: bool,
    pub quality: bool,
    pub flash: bool,
    pub zoom: bool,
}

impl Default for RememberFlags {
    fn default() -> Self {
        Self {
            settings: true,
            sensor: true,
            resolution: true,
            quality: true,
            flash: true,
            zoom: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub preview: bool,
    pub stream: bool,
    pub camera_id: Option<String>,
    pub resolution_index: Option<usize>,
    pub quality: u8,
    pub flash: bool,
    pub zoom_ratio: f32,
    pub remember: RememberFlags,
    pub target_fps: u32,
    pub anti_flicker: AntiFlickerMode,
    pub noise_reduction: NoiseReductionMode,
    pub stabilization_off: bool,
    pub zoom_smoothing_delay_ms: u32,
    pub http_port: u16,
    pub background_streaming: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            preview: true,
            stream: false,
            camera_id: None,
            resolution_index: None,
            quality: DEFAULT_QUALITY,
            flash: false,
            zoom_ratio: 1.0,
            remember: RememberFlags::default(),
            target_fps: 30,
            anti_flicker: AntiFlickerMode::Auto,
            noise_reduction: NoiseReductionMode::Auto,
            stabilization_off: false,
            zoom_smoothing_delay_ms: 0,
            http_port: DEFAULT_PORT,
            background_streaming: true,
        }
    }
}

pub struct SettingsStore {
    path: Option<PathBuf>,
    current: Mutex<Settings>,
}

impl SettingsStore {
    pub fn in_memory(settings: Settings) -> Self {
        Self {
            path: None,
            current: Mutex::new(settings),
        }
    }

    /// Loads `path` if it exists; a missing or unreadable file starts from defaults.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let settings = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                warn!("settings file {} is invalid, using defaults: {err}", path.display());
                Settings::default()
            }),
            Err(_) => Settings::default(),
        };
        Self {
            path: Some(path),
            current: Mutex::new(settings),
        }
    }

    pub fn snapshot(&self) -> Settings {
        self.lock().clone()
    }

    pub fn update(&self, change: impl FnOnce(&mut Settings)) {
        let snapshot = {
            let mut settings = self.lock();
            change(&mut settings);
            settings.clone()
        };
        if let Err(err) = self.persist(&snapshot) {
            warn!("failed to persist settings: {err:#}");
        }
    }

    pub fn load_view_state(&self, default_sensor: &str) -> ViewState {
        let settings = self.lock();
        let remember = settings.remember;
        let gated = |flag: bool| remember.settings && flag;

        ViewState {
            preview_enabled: if remember.settings { settings.preview } else { true },
            stream_enabled: remember.settings && settings.stream,
            sensor_id: settings
                .camera_id
                .clone()
                .filter(|_| gated(remember.sensor))
                .unwrap_or_else(|| default_sensor.to_string()),
            resolution_index: settings
                .resolution_index
                .filter(|_| gated(remember.resolution)),
            quality: if gated(remember.quality) {
                settings.quality
            } else {
                DEFAULT_QUALITY
            },
            flash_enabled: gated(remember.flash) && settings.flash,
        }
    }

    pub fn save_view_state(&self, state: &ViewState) {
        self.update(|settings| {
            let remember = settings.remember;
            if !remember.settings {
                return;
            }
            settings.preview = state.preview_enabled;
            settings.stream = state.stream_enabled;
            if remember.sensor {
                settings.camera_id = Some(state.sensor_id.clone());
            }
            if remember.resolution {
                settings.resolution_index = state.resolution_index;
            }
            if remember.quality {
                settings.quality = state.quality;
            }
            if remember.flash {
                settings.flash = state.flash_enabled;
            }
        });
    }

    pub fn load_zoom_ratio(&self) -> f32 {
        let settings = self.lock();
        if settings.remember.settings && settings.remember.zoom {
            settings.zoom_ratio
        } else {
            1.0
        }
    }

    pub fn save_zoom_ratio(&self, ratio: f32) {
        self.update(|settings| {
            if settings.remember.settings && settings.remember.zoom {
                settings.zoom_ratio = ratio;
            }
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Settings> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, settings: &Settings) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let raw = serde_json::to_vec_pretty(settings)?;
        std::fs::write(path, raw)
            .with_context(|| format!("failed to write settings to {}", path.display()))
    }
}
