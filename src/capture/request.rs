// SPDX-License-Identifier: GPL-3.0-only

//! Capture request derivation
//!
//! A [`CaptureRequestConfig`] is rebuilt from the device profile, the current
//! crop and the flash selection every time a request is submitted. Nothing
//! here is cached between submissions.

use super::profile::{AeMode, AfMode, AwbMode, DeviceProfile};
use crate::backends::camera::types::{OutputTarget, Rect};
use crate::flash::{FlashControl, FlashMode};

/// Request template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTemplate {
    /// Repeating preview stream
    Preview,
    /// One-shot still capture
    StillCapture,
}

/// One-shot auto-focus trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AfTrigger {
    #[default]
    Idle,
    /// Start an AF scan and lock when it settles
    Start,
    /// Release a previous AF lock
    Cancel,
}

/// One-shot AE precapture trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrecaptureTrigger {
    #[default]
    Idle,
    Start,
}

/// Everything the hardware needs to build one request
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequestConfig {
    pub template: RequestTemplate,
    pub targets: Vec<OutputTarget>,
    /// `None` on fixed-focus lenses
    pub af_mode: Option<AfMode>,
    pub ae_mode: AeMode,
    pub awb_mode: Option<AwbMode>,
    /// Explicit flash control when AE does not own the flash
    pub flash: Option<FlashControl>,
    /// Digital zoom crop in active-array coordinates
    pub crop: Rect,
    pub af_trigger: AfTrigger,
    pub precapture_trigger: PrecaptureTrigger,
    /// Rotation to record in the encoded still, in degrees
    pub jpeg_orientation: Option<u32>,
}

impl CaptureRequestConfig {
    /// Derive a request with 3A modes applied and all triggers idle
    pub fn derive(
        profile: &DeviceProfile,
        template: RequestTemplate,
        targets: Vec<OutputTarget>,
        crop: Rect,
        flash_mode: FlashMode,
    ) -> Self {
        let (ae_mode, flash) = if profile.flash_available() {
            let (ae, flash) = flash_mode.controls();
            // Fall back to plain AE when the sensor lacks the automatic flash mode
            if profile.supports_ae_mode(ae) {
                (ae, flash)
            } else {
                (AeMode::On, flash)
            }
        } else {
            (AeMode::On, None)
        };

        Self {
            template,
            targets,
            af_mode: profile.preferred_af_mode(),
            ae_mode,
            awb_mode: profile.preferred_awb_mode(),
            flash,
            crop,
            af_trigger: AfTrigger::Idle,
            precapture_trigger: PrecaptureTrigger::Idle,
            jpeg_orientation: None,
        }
    }

    /// Repeating preview request targeting the preview surface
    pub fn preview(
        profile: &DeviceProfile,
        preview: OutputTarget,
        crop: Rect,
        flash_mode: FlashMode,
    ) -> Self {
        Self::derive(profile, RequestTemplate::Preview, vec![preview], crop, flash_mode)
    }

    /// Still request targeting only the image reader
    pub fn still(
        profile: &DeviceProfile,
        reader: OutputTarget,
        crop: Rect,
        flash_mode: FlashMode,
        orientation: u32,
    ) -> Self {
        let mut request =
            Self::derive(profile, RequestTemplate::StillCapture, vec![reader], crop, flash_mode);
        request.jpeg_orientation = Some(orientation);
        request
    }

    pub fn with_af_trigger(mut self, trigger: AfTrigger) -> Self {
        self.af_trigger = trigger;
        self
    }

    pub fn with_precapture_trigger(mut self, trigger: PrecaptureTrigger) -> Self {
        self.precapture_trigger = trigger;
        self
    }

    /// Whether any one-shot trigger is set
    pub fn has_trigger(&self) -> bool {
        self.af_trigger != AfTrigger::Idle || self.precapture_trigger != PrecaptureTrigger::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::Size;
    use crate::capture::profile::HardwareLevel;

    fn profile(flash: bool) -> DeviceProfile {
        DeviceProfile::builder()
            .active_array(Rect::from_size(4000, 3000))
            .min_focus_distance(5.0)
            .af_modes([AfMode::Auto])
            .ae_modes([AeMode::On, AeMode::OnAutoFlash])
            .awb_modes([AwbMode::Auto, AwbMode::Daylight])
            .flash_available(flash)
            .hardware_level(HardwareLevel::Full)
            .build()
            .unwrap()
    }

    const PREVIEW: OutputTarget = OutputTarget::Preview(Size::new(1440, 1080));
    const READER: OutputTarget = OutputTarget::StillReader(Size::new(4000, 3000));

    #[test]
    fn test_preview_request_defaults() {
        let crop = Rect::from_size(4000, 3000);
        let request = CaptureRequestConfig::preview(&profile(true), PREVIEW, crop, FlashMode::Auto);
        assert_eq!(request.template, RequestTemplate::Preview);
        assert_eq!(request.targets, vec![PREVIEW]);
        assert_eq!(request.af_mode, Some(AfMode::Auto));
        assert_eq!(request.ae_mode, AeMode::OnAutoFlash);
        assert_eq!(request.awb_mode, Some(AwbMode::Auto));
        assert_eq!(request.flash, None);
        assert!(!request.has_trigger());
        assert_eq!(request.jpeg_orientation, None);
    }

    #[test]
    fn test_no_flash_unit_keeps_plain_ae() {
        let crop = Rect::from_size(4000, 3000);
        let request =
            CaptureRequestConfig::preview(&profile(false), PREVIEW, crop, FlashMode::Torch);
        assert_eq!(request.ae_mode, AeMode::On);
        assert_eq!(request.flash, None);
    }

    #[test]
    fn test_unsupported_red_eye_falls_back() {
        let crop = Rect::from_size(4000, 3000);
        let request =
            CaptureRequestConfig::preview(&profile(true), PREVIEW, crop, FlashMode::AutoRedEye);
        assert_eq!(request.ae_mode, AeMode::On);
    }

    #[test]
    fn test_still_request_targets_reader() {
        let crop = Rect::new(100, 75, 3900, 2925);
        let request =
            CaptureRequestConfig::still(&profile(true), READER, crop, FlashMode::Single, 90)
                .with_af_trigger(AfTrigger::Start);
        assert_eq!(request.template, RequestTemplate::StillCapture);
        assert_eq!(request.targets, vec![READER]);
        assert_eq!(request.crop, crop);
        assert_eq!(request.flash, Some(FlashControl::Single));
        assert_eq!(request.jpeg_orientation, Some(90));
        assert!(request.has_trigger());
    }
}
