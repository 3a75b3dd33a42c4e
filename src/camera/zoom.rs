//! Zoom math shared by the ratio and crop-emulation paths, plus the
//! cancellable smoothing animator.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{
    request::ZoomControl,
    types::{Rect, ZoomCapability, ZoomDirection},
};

pub const ANIMATION_STEPS: u32 = 10;
const STEP_FRACTION: f32 = 0.10;
const TOGGLE_ZOOM: f32 = 2.0;
const UNZOOMED_TOLERANCE: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomRange {
    pub min: f32,
    pub max: f32,
}

impl ZoomRange {
    pub fn new(min: f32, max: f32) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }

    pub fn from_capability(capability: &ZoomCapability) -> Self {
        let (min, max) = capability.bounds();
        Self::new(min, max)
    }

    pub fn clamp(&self, ratio: f32) -> f32 {
        if ratio.is_nan() {
            return self.min;
        }
        ratio.clamp(self.min, self.max)
    }

    /// Maps `0..=1` linearly onto the range; the endpoints are exact.
    pub fn from_normalized(&self, normalized: f32) -> f32 {
        if normalized.is_nan() || normalized <= 0.0 {
            return self.min;
        }
        if normalized >= 1.0 {
            return self.max;
        }
        self.clamp(self.min + (self.max - self.min) * normalized)
    }

    pub fn scaled(&self, current: f32, factor: f32) -> f32 {
        self.clamp(current * factor)
    }

    pub fn stepped(&self, current: f32, direction: ZoomDirection) -> f32 {
        let step = (self.max - self.min) * STEP_FRACTION;
        match direction {
            ZoomDirection::In => self.clamp(current + step),
            ZoomDirection::Out => self.clamp(current - step),
        }
    }

    /// Back to 1.0 when zoomed, otherwise to 2x (or the max if smaller).
    pub fn toggle_target(&self, current: f32) -> f32 {
        if (current - 1.0).abs() > UNZOOMED_TOLERANCE {
            self.clamp(1.0)
        } else {
            self.clamp(TOGGLE_ZOOM.min(self.max))
        }
    }
}

/// Centered crop of the active array scaled by `1 / ratio`.
pub fn crop_region(active: Rect, ratio: f32) -> Rect {
    let ratio = if ratio.is_nan() { 1.0 } else { ratio.max(1.0) };
    let zoom_width = (active.width() as f32 / ratio) as i32;
    let zoom_height = (active.height() as f32 / ratio) as i32;
    let center_x = active.left + active.width() / 2;
    let center_y = active.top + active.height() / 2;
    Rect::new(
        center_x - zoom_width / 2,
        center_y - zoom_height / 2,
        center_x + zoom_width / 2,
        center_y + zoom_height / 2,
    )
}

pub fn zoom_control(capability: &ZoomCapability, active: Rect, ratio: f32) -> ZoomControl {
    match capability {
        ZoomCapability::Ratio { .. } => ZoomControl::Ratio(ratio),
        ZoomCapability::Crop { .. } => ZoomControl::CropRegion(crop_region(active, ratio)),
    }
}

/// Intermediate ratios from `start` (exclusive) to `target` (inclusive).
pub fn interpolate(start: f32, target: f32, steps: u32) -> impl Iterator<Item = f32> {
    let steps = steps.max(1);
    (1..=steps).map(move |i| {
        if i == steps {
            target
        } else {
            start + (target - start) * (i as f32 / steps as f32)
        }
    })
}

/// Drives one zoom animation at a time; starting a new one cancels the old.
///
/// Every step carries the generation it was started with so that steps
/// already in flight when a newer target arrived can be discarded.
#[derive(Debug, Default)]
pub struct ZoomAnimator {
    generation: u64,
    running: Option<CancellationToken>,
}

impl ZoomAnimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel(&mut self) {
        if let Some(token) = self.running.take() {
            token.cancel();
        }
        self.generation += 1;
    }

    /// `apply` returns false once nobody is listening anymore.
    pub fn start<F>(&mut self, start: f32, target: f32, delay: Duration, apply: F) -> u64
    where
        F: Fn(u64, f32) -> bool + Send + 'static,
    {
        self.cancel();
        let generation = self.generation;
        let token = CancellationToken::new();
        self.running = Some(token.clone());

        tokio::spawn(async move {
            for ratio in interpolate(start, target, ANIMATION_STEPS) {
                if token.is_cancelled() || !apply(generation, ratio) {
                    return;
                }
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        });
        generation
    }
}
