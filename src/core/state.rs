use serde::{Deserialize, Serialize};

use crate::camera::types::{SensorDesc, Size};

/// Lifecycle of the capture session owned by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Opening,
    Configuring,
    Streaming,
    Closing,
}

/// User-chosen camera configuration, passed to the controller by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewState {
    pub preview_enabled: bool,
    pub stream_enabled: bool,
    pub sensor_id: String,
    pub resolution_index: Option<usize>,
    pub quality: u8,
    pub flash_enabled: bool,
}

impl ViewState {
    pub fn new(sensor_id: impl Into<String>) -> Self {
        Self {
            preview_enabled: true,
            stream_enabled: false,
            sensor_id: sensor_id.into(),
            resolution_index: None,
            quality: 80,
            flash_enabled: false,
        }
    }
}

/// Published after every session (re)configuration and zoom change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraSnapshot {
    pub sensors: Vec<SensorDesc>,
    pub selected_sensor: SensorDesc,
    pub resolutions: Vec<Size>,
    pub resolution_index: usize,
    pub current_zoom: f32,
    pub min_zoom: f32,
    pub max_zoom: f32,
    pub has_flash: bool,
    pub quality: u8,
    pub flash_enabled: bool,
    pub sensor_orientation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThroughputSample {
    pub frame_interval_ms: u64,
    pub rate_kbs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CameraEvent {
    State(CameraSnapshot),
    Throughput(ThroughputSample),
    PortChanged(u16),
}

/// How far a new view state is from the one the session runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Only the stream flag (or nothing) moved.
    None,
    /// Flash or quality; the repeating request is updated in place.
    Minor,
    /// Sensor, resolution or preview; the session is rebuilt.
    Major,
}

impl ChangeKind {
    pub fn between(old: &ViewState, new: &ViewState) -> Self {
        if old.sensor_id != new.sensor_id
            || old.resolution_index != new.resolution_index
            || old.preview_enabled != new.preview_enabled
        {
            Self::Major
        } else if old.flash_enabled != new.flash_enabled || old.quality != new.quality {
            Self::Minor
        } else {
            Self::None
        }
    }
}
