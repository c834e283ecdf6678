// SPDX-License-Identifier: GPL-3.0-only

//! Pinch-to-zoom
//!
//! Each gesture sample moves the zoom factor by a fixed step in the direction
//! the fingers moved, and the sensor crop is re-derived from the new factor.
//! The first sample of a gesture only records the finger spacing.

use super::profile::DeviceProfile;
use crate::backends::camera::types::Rect;
use crate::constants;
use tracing::trace;

/// Distance between two touch points
pub fn finger_spacing(a: (f32, f32), b: (f32, f32)) -> f32 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    (dx * dx + dy * dy).sqrt()
}

/// Centered crop of `active` for a zoom factor
///
/// At least one pixel always stays visible in each direction.
pub fn crop_for_factor(active: Rect, factor: f32) -> Rect {
    let ratio = 1.0 / factor.max(constants::zoom::MIN_FACTOR);
    let width = active.width();
    let height = active.height();

    let cropped_width = (width - (width as f32 * ratio).round() as i32).clamp(0, width - 1);
    let cropped_height = (height - (height as f32 * ratio).round() as i32).clamp(0, height - 1);

    active.inset(cropped_width / 2, cropped_height / 2)
}

/// What the zoom indicator should show
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomIndicator {
    pub visible: bool,
    /// Remapped zoom value for the label
    pub display_zoom: f32,
    /// Progress bar position, `0..=max_progress`
    pub progress: u32,
    pub max_progress: u32,
}

impl ZoomIndicator {
    pub fn hidden(max_progress: u32) -> Self {
        Self {
            visible: false,
            display_zoom: constants::zoom::MIN_FACTOR,
            progress: 0,
            max_progress,
        }
    }
}

/// Owns the zoom factor and the crop derived from it
#[derive(Debug, Clone)]
pub struct ZoomController {
    active_array: Rect,
    max_zoom: f32,
    step: f32,
    display_baseline: f32,
    factor: f32,
    crop: Rect,
    last_spacing: Option<f32>,
}

impl ZoomController {
    pub fn new(profile: &DeviceProfile) -> Self {
        Self::with_tuning(
            profile,
            constants::zoom::STEP,
            constants::zoom::DISPLAY_BASELINE,
        )
    }

    pub fn with_tuning(profile: &DeviceProfile, step: f32, display_baseline: f32) -> Self {
        let active_array = profile.active_array();
        Self {
            active_array,
            max_zoom: profile.max_digital_zoom(),
            step,
            display_baseline,
            factor: constants::zoom::MIN_FACTOR,
            crop: active_array,
            last_spacing: None,
        }
    }

    pub fn factor(&self) -> f32 {
        self.factor
    }

    pub fn max_zoom(&self) -> f32 {
        self.max_zoom
    }

    pub fn crop(&self) -> Rect {
        self.crop
    }

    pub fn active_array(&self) -> Rect {
        self.active_array
    }

    /// Feed one two-finger spacing sample
    ///
    /// Returns `true` when the crop was re-derived and the repeating request
    /// should be resubmitted.
    pub fn on_gesture_sample(&mut self, spacing: f32) -> bool {
        let Some(previous) = self.last_spacing.replace(spacing) else {
            trace!(spacing, "Zoom gesture started");
            return false;
        };

        if spacing > previous {
            let step = self.step.min(self.max_zoom - self.factor);
            self.factor += step;
        } else if spacing < previous {
            let step = self.step.min(self.factor - constants::zoom::MIN_FACTOR);
            self.factor -= step;
        }
        self.factor = self.factor.clamp(constants::zoom::MIN_FACTOR, self.max_zoom);
        self.crop = crop_for_factor(self.active_array, self.factor);

        trace!(factor = self.factor, crop = %self.crop, "Zoom updated");
        true
    }

    /// Forget the finger spacing so the next sample starts a new gesture
    pub fn on_gesture_end(&mut self) {
        self.last_spacing = None;
    }

    pub fn is_gesture_active(&self) -> bool {
        self.last_spacing.is_some()
    }

    /// Jump straight to a factor, clamped to the supported range
    pub fn set_factor(&mut self, factor: f32) {
        self.factor = factor.clamp(constants::zoom::MIN_FACTOR, self.max_zoom);
        self.crop = crop_for_factor(self.active_array, self.factor);
    }

    /// Zoom value shown to the user
    ///
    /// Affine remap that reads 1.0 at the baseline factor and the true maximum
    /// at the maximum factor. Only affects display.
    pub fn display_zoom(&self) -> f32 {
        let span = self.max_zoom - self.display_baseline;
        if span.abs() < f32::EPSILON {
            return self.factor;
        }
        (self.factor - self.display_baseline) * (self.max_zoom - 1.0) / span + 1.0
    }

    pub fn indicator(&self) -> ZoomIndicator {
        let max_progress = ((self.max_zoom - 1.0) * 100.0).round() as u32;
        let display_zoom = self.display_zoom();
        if display_zoom <= constants::zoom::MIN_FACTOR {
            return ZoomIndicator::hidden(max_progress);
        }
        ZoomIndicator {
            visible: true,
            display_zoom,
            progress: ((display_zoom - 1.0) * 100.0).round().max(0.0) as u32,
            max_progress,
        }
    }
}
