use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} x {}", self.width, self.height)
    }
}

/// Pixel rectangle, `right`/`bottom` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub const fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width as i32, size.height as i32)
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// Auto-exposure target frame-rate range, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FpsRange {
    pub lower: u32,
    pub upper: u32,
}

impl FpsRange {
    pub const fn new(lower: u32, upper: u32) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, fps: u32) -> bool {
        self.lower <= fps && fps <= self.upper
    }

    pub fn span(&self) -> u32 {
        self.upper.saturating_sub(self.lower)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AntiFlickerMode {
    #[default]
    Auto,
    Off,
    #[serde(rename = "50hz")]
    Hz50,
    #[serde(rename = "60hz")]
    Hz60,
}

/// User-facing noise reduction preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseReductionMode {
    #[default]
    Auto,
    Off,
    Low,
    High,
}

/// Noise reduction modes as exposed by the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseReductionHwMode {
    Off,
    Fast,
    HighQuality,
}

impl From<NoiseReductionMode> for NoiseReductionHwMode {
    fn from(mode: NoiseReductionMode) -> Self {
        match mode {
            NoiseReductionMode::Off => Self::Off,
            NoiseReductionMode::High => Self::HighQuality,
            NoiseReductionMode::Auto | NoiseReductionMode::Low => Self::Fast,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilizationMode {
    Off,
    On,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashMode {
    Off,
    Torch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoomDirection {
    In,
    Out,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorDesc {
    pub camera_id: String,
    pub title: String,
    pub has_flash: bool,
}

/// How a sensor exposes magnification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ZoomCapability {
    /// Native zoom-ratio control over `[min, max]`.
    Ratio { min: f32, max: f32 },
    /// Crop-region emulation over `[1.0, max_digital_zoom]`.
    Crop { max_digital_zoom: f32 },
}

impl ZoomCapability {
    pub fn bounds(&self) -> (f32, f32) {
        match *self {
            Self::Ratio { min, max } => (min, max.max(min)),
            Self::Crop { max_digital_zoom } => (1.0, max_digital_zoom.max(1.0)),
        }
    }
}

/// Intrinsic properties of one sensor, fetched on every sensor selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorCapabilities {
    pub zoom: ZoomCapability,
    pub fps_ranges: Vec<FpsRange>,
    pub anti_flicker_modes: Vec<AntiFlickerMode>,
    pub noise_reduction_modes: Vec<NoiseReductionHwMode>,
    pub video_stabilization_modes: Vec<StabilizationMode>,
    pub optical_stabilization_modes: Vec<StabilizationMode>,
    pub sensor_orientation: u32,
    pub active_array: Rect,
    pub output_sizes: Vec<Size>,
    pub flash_available: bool,
}
