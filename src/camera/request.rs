use super::{
    traits::OutputTarget,
    types::{
        AntiFlickerMode, FlashMode, FpsRange, NoiseReductionHwMode, NoiseReductionMode, Rect,
        SensorCapabilities, StabilizationMode,
    },
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZoomControl {
    Ratio(f32),
    CropRegion(Rect),
}

/// Parameters of the repeating capture request.
///
/// `None` means the key is left to the driver default, which is how
/// unsupported modes end up: skipped rather than rejected.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub targets: Vec<OutputTarget>,
    pub flash: Option<FlashMode>,
    pub zoom: Option<ZoomControl>,
    pub fps_range: Option<FpsRange>,
    pub video_stabilization: Option<StabilizationMode>,
    pub optical_stabilization: Option<StabilizationMode>,
    pub noise_reduction: Option<NoiseReductionHwMode>,
    pub anti_flicker: Option<AntiFlickerMode>,
    pub jpeg_quality: u8,
}

impl CaptureRequest {
    pub fn new(targets: Vec<OutputTarget>) -> Self {
        Self {
            targets,
            flash: None,
            zoom: None,
            fps_range: None,
            video_stabilization: None,
            optical_stabilization: None,
            noise_reduction: None,
            anti_flicker: None,
            jpeg_quality: 95,
        }
    }

    pub fn has_preview_target(&self) -> bool {
        self.targets.iter().any(OutputTarget::is_preview)
    }
}

/// Request-level tunables that are not part of the view state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tunables {
    pub target_fps: u32,
    pub anti_flicker: AntiFlickerMode,
    pub noise_reduction: NoiseReductionMode,
    pub stabilization_off: bool,
    pub zoom_smoothing_delay_ms: u32,
}

pub fn apply_flash(request: &mut CaptureRequest, caps: &SensorCapabilities, enabled: bool) {
    if !caps.flash_available {
        return;
    }
    request.flash = Some(if enabled {
        FlashMode::Torch
    } else {
        FlashMode::Off
    });
}

/// Exact `[fps, fps]` first, then the narrowest range covering `fps`,
/// then the widest range available.
pub fn select_fps_range(ranges: &[FpsRange], fps: u32) -> Option<FpsRange> {
    if let Some(exact) = ranges.iter().find(|r| r.lower == fps && r.upper == fps) {
        return Some(*exact);
    }
    if let Some(covering) = ranges
        .iter()
        .filter(|r| r.contains(fps))
        .min_by_key(|r| (r.span(), r.upper))
    {
        return Some(*covering);
    }
    ranges.iter().max_by_key(|r| (r.upper, r.span())).copied()
}

pub fn apply_fps(request: &mut CaptureRequest, caps: &SensorCapabilities, fps: u32) {
    if let Some(range) = select_fps_range(&caps.fps_ranges, fps) {
        request.fps_range = Some(range);
    }
}

pub fn apply_stabilization(request: &mut CaptureRequest, caps: &SensorCapabilities, off: bool) {
    let wanted = if off {
        StabilizationMode::Off
    } else {
        StabilizationMode::On
    };
    if caps.video_stabilization_modes.contains(&wanted) {
        request.video_stabilization = Some(wanted);
    }
    if caps.optical_stabilization_modes.contains(&wanted) {
        request.optical_stabilization = Some(wanted);
    }
}

pub fn apply_noise_reduction(
    request: &mut CaptureRequest,
    caps: &SensorCapabilities,
    mode: NoiseReductionMode,
) {
    let hw = NoiseReductionHwMode::from(mode);
    if caps.noise_reduction_modes.contains(&hw) {
        request.noise_reduction = Some(hw);
    }
}

pub fn apply_anti_flicker(
    request: &mut CaptureRequest,
    caps: &SensorCapabilities,
    mode: AntiFlickerMode,
) {
    if caps.anti_flicker_modes.contains(&mode) {
        request.anti_flicker = Some(mode);
    }
}

pub fn apply_quality(request: &mut CaptureRequest, quality: u8) {
    request.jpeg_quality = quality.clamp(1, 100);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::types::{Size, ZoomCapability};

    fn caps() -> SensorCapabilities {
        SensorCapabilities {
            zoom: ZoomCapability::Ratio { min: 1.0, max: 4.0 },
            fps_ranges: vec![
                FpsRange::new(15, 30),
                FpsRange::new(24, 30),
                FpsRange::new(30, 30),
                FpsRange::new(7, 60),
            ],
            anti_flicker_modes: vec![AntiFlickerMode::Auto, AntiFlickerMode::Hz50],
            noise_reduction_modes: vec![NoiseReductionHwMode::Fast],
            video_stabilization_modes: vec![StabilizationMode::Off],
            optical_stabilization_modes: vec![StabilizationMode::On, StabilizationMode::Off],
            sensor_orientation: 90,
            active_array: Rect::new(0, 0, 4000, 3000),
            output_sizes: vec![Size::new(1280, 720)],
            flash_available: false,
        }
    }

    #[test]
    fn fps_prefers_exact_then_narrowest_then_widest() {
        let ranges = caps().fps_ranges;
        assert_eq!(select_fps_range(&ranges, 30), Some(FpsRange::new(30, 30)));
        assert_eq!(select_fps_range(&ranges, 25), Some(FpsRange::new(24, 30)));
        assert_eq!(select_fps_range(&ranges, 50), Some(FpsRange::new(7, 60)));
        assert_eq!(select_fps_range(&ranges, 120), Some(FpsRange::new(7, 60)));
        assert_eq!(select_fps_range(&[], 30), None);
    }

    #[test]
    fn unsupported_modes_are_skipped() {
        let caps = caps();
        let mut request = CaptureRequest::new(Vec::new());

        apply_stabilization(&mut request, &caps, false);
        assert_eq!(request.video_stabilization, None);
        assert_eq!(request.optical_stabilization, Some(StabilizationMode::On));

        apply_noise_reduction(&mut request, &caps, NoiseReductionMode::High);
        assert_eq!(request.noise_reduction, None);
        apply_noise_reduction(&mut request, &caps, NoiseReductionMode::Low);
        assert_eq!(request.noise_reduction, Some(NoiseReductionHwMode::Fast));

        apply_anti_flicker(&mut request, &caps, AntiFlickerMode::Hz60);
        assert_eq!(request.anti_flicker, None);
        apply_anti_flicker(&mut request, &caps, AntiFlickerMode::Hz50);
        assert_eq!(request.anti_flicker, Some(AntiFlickerMode::Hz50));
    }

    #[test]
    fn flash_is_only_set_on_sensors_with_a_flash() {
        let mut caps = caps();
        let mut request = CaptureRequest::new(Vec::new());
        apply_flash(&mut request, &caps, true);
        assert_eq!(request.flash, None);

        caps.flash_available = true;
        apply_flash(&mut request, &caps, true);
        assert_eq!(request.flash, Some(FlashMode::Torch));
        apply_flash(&mut request, &caps, false);
        assert_eq!(request.flash, Some(FlashMode::Off));
    }

    #[test]
    fn quality_is_clamped_to_jpeg_range() {
        let mut request = CaptureRequest::new(Vec::new());
        apply_quality(&mut request, 0);
        assert_eq!(request.jpeg_quality, 1);
        apply_quality(&mut request, 200);
        assert_eq!(request.jpeg_quality, 100);
    }
}
