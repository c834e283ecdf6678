// SPDX-License-Identifier: GPL-3.0-only

//! Static camera capabilities
//!
//! A [`DeviceProfile`] is computed once when a camera session starts (by
//! whatever enumerates devices, or deserialized from JSON) and shared
//! read-only with the state machine and the classification scheduler.

use crate::backends::camera::types::{Rect, Size};
use crate::constants;
use crate::errors::{CoreError, CoreResult};
use crate::flash::{FlashMode, FlashSupport};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Hardware support tier
///
/// Legacy devices do not reliably report AE/AWB convergence and cannot run
/// a precapture metering sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HardwareLevel {
    Legacy,
    Limited,
    #[default]
    Full,
}

/// Auto-focus modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AfMode {
    Off,
    Auto,
    Macro,
    ContinuousVideo,
    ContinuousPicture,
    Edof,
}

/// Auto-exposure modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AeMode {
    Off,
    On,
    OnAutoFlash,
    OnAlwaysFlash,
    OnAutoFlashRedeye,
}

/// Auto-white-balance modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AwbMode {
    Off,
    Auto,
    Incandescent,
    Fluorescent,
    Daylight,
    CloudyDaylight,
}

/// Aspect ratio as a reduced `long:short` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AspectRatio {
    pub long: u32,
    pub short: u32,
}

impl AspectRatio {
    pub const WIDE: AspectRatio = AspectRatio { long: 16, short: 9 };
    pub const STANDARD: AspectRatio = AspectRatio { long: 4, short: 3 };
    pub const SQUARE: AspectRatio = AspectRatio { long: 1, short: 1 };

    /// Exact reduced ratio of two edge lengths, in either orientation
    pub fn of(a: u32, b: u32) -> Option<Self> {
        if a == 0 || b == 0 {
            return None;
        }
        let (long, short) = if a >= b { (a, b) } else { (b, a) };
        let d = gcd(long, short);
        Some(Self {
            long: long / d,
            short: short / d,
        })
    }

    pub fn of_size(size: Size) -> Option<Self> {
        Self::of(size.width, size.height)
    }

    pub fn as_f32(&self) -> f32 {
        self.long as f32 / self.short as f32
    }

    /// Whether a landscape size matches this ratio within the pixel tolerance
    pub fn matches(&self, size: Size) -> bool {
        within_tolerance(size, self.long, self.short)
    }

    /// Region of `surface` this ratio occupies: the surface's short edge, the
    /// long edge derived from the ratio, in the surface's orientation
    pub fn view_on(&self, surface: Size) -> Size {
        if surface.is_empty() {
            return surface;
        }
        if surface.height >= surface.width {
            let height = surface.width as u64 * self.long as u64 / self.short as u64;
            Size::new(surface.width, height as u32)
        } else {
            let width = surface.height as u64 * self.long as u64 / self.short as u64;
            Size::new(width as u32, surface.height)
        }
    }

    /// Ordered list of ratios the user can cycle through
    ///
    /// The screen's own ratio always comes first so the default preview fills
    /// the display; the remaining entries are the still ratios the sensor
    /// supports.
    pub fn options_for_screen(screen: AspectRatio, supported: SupportedRatios) -> Vec<AspectRatio> {
        let mut options = vec![screen];
        if screen == Self::WIDE {
            if supported.standard {
                options.push(Self::STANDARD);
            }
            if supported.square {
                options.push(Self::SQUARE);
            }
        } else if screen == Self::STANDARD {
            if supported.square {
                options.push(Self::SQUARE);
            }
        } else if screen != Self::SQUARE {
            if supported.wide {
                options.push(Self::WIDE);
            }
            if supported.standard {
                options.push(Self::STANDARD);
            }
            if supported.square {
                options.push(Self::SQUARE);
            }
        }
        options
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.long, self.short)
    }
}

/// Height of a landscape `size` is within the pixel tolerance of
/// `width * short / long`
fn within_tolerance(size: Size, long: u32, short: u32) -> bool {
    if long == 0 {
        return false;
    }
    let expected = size.width as i64 * short as i64 / long as i64;
    (size.height as i64 - expected).abs() <= constants::capture::RATIO_TOLERANCE_PX
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Which of the common still ratios the sensor can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SupportedRatios {
    pub wide: bool,
    pub standard: bool,
    pub square: bool,
}

/// Static description of one camera's capabilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DeviceProfileBuilder")]
pub struct DeviceProfile {
    camera_id: String,
    active_array: Rect,
    min_focus_distance: f32,
    af_modes: BTreeSet<AfMode>,
    ae_modes: BTreeSet<AeMode>,
    awb_modes: BTreeSet<AwbMode>,
    max_digital_zoom: f32,
    flash_available: bool,
    hardware_level: HardwareLevel,
    still_sizes: Vec<Size>,
    preview_sizes: Vec<Size>,
}

/// Builder (and serde shape) for [`DeviceProfile`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProfileBuilder {
    pub camera_id: String,
    pub active_array: Rect,
    pub min_focus_distance: f32,
    pub af_modes: BTreeSet<AfMode>,
    pub ae_modes: BTreeSet<AeMode>,
    pub awb_modes: BTreeSet<AwbMode>,
    pub max_digital_zoom: f32,
    pub flash_available: bool,
    pub hardware_level: HardwareLevel,
    pub still_sizes: Vec<Size>,
    pub preview_sizes: Vec<Size>,
}

impl Default for DeviceProfileBuilder {
    fn default() -> Self {
        Self {
            camera_id: "0".to_string(),
            active_array: Rect::from_size(0, 0),
            min_focus_distance: 0.0,
            af_modes: BTreeSet::new(),
            ae_modes: BTreeSet::from([AeMode::On]),
            awb_modes: BTreeSet::new(),
            max_digital_zoom: 1.0,
            flash_available: false,
            hardware_level: HardwareLevel::default(),
            still_sizes: Vec::new(),
            preview_sizes: Vec::new(),
        }
    }
}

impl DeviceProfileBuilder {
    pub fn camera_id(mut self, id: impl Into<String>) -> Self {
        self.camera_id = id.into();
        self
    }

    pub fn active_array(mut self, rect: Rect) -> Self {
        self.active_array = rect;
        self
    }

    pub fn min_focus_distance(mut self, diopters: f32) -> Self {
        self.min_focus_distance = diopters;
        self
    }

    pub fn af_modes(mut self, modes: impl IntoIterator<Item = AfMode>) -> Self {
        self.af_modes = modes.into_iter().collect();
        self
    }

    pub fn ae_modes(mut self, modes: impl IntoIterator<Item = AeMode>) -> Self {
        self.ae_modes = modes.into_iter().collect();
        self
    }

    pub fn awb_modes(mut self, modes: impl IntoIterator<Item = AwbMode>) -> Self {
        self.awb_modes = modes.into_iter().collect();
        self
    }

    pub fn max_digital_zoom(mut self, factor: f32) -> Self {
        self.max_digital_zoom = factor;
        self
    }

    pub fn flash_available(mut self, available: bool) -> Self {
        self.flash_available = available;
        self
    }

    pub fn hardware_level(mut self, level: HardwareLevel) -> Self {
        self.hardware_level = level;
        self
    }

    pub fn still_sizes(mut self, sizes: impl IntoIterator<Item = Size>) -> Self {
        self.still_sizes = sizes.into_iter().collect();
        self
    }

    pub fn preview_sizes(mut self, sizes: impl IntoIterator<Item = Size>) -> Self {
        self.preview_sizes = sizes.into_iter().collect();
        self
    }

    /// Validate and freeze the profile
    pub fn build(self) -> CoreResult<DeviceProfile> {
        if self.active_array.is_empty() {
            return Err(CoreError::Configuration(format!(
                "active array {} is empty",
                self.active_array
            )));
        }
        if !self.max_digital_zoom.is_finite() || self.max_digital_zoom < constants::zoom::MIN_FACTOR
        {
            return Err(CoreError::Configuration(format!(
                "maximum digital zoom {} is below 1.0",
                self.max_digital_zoom
            )));
        }
        if !self.min_focus_distance.is_finite() || self.min_focus_distance < 0.0 {
            return Err(CoreError::Configuration(format!(
                "minimum focus distance {} is invalid",
                self.min_focus_distance
            )));
        }

        Ok(DeviceProfile {
            camera_id: self.camera_id,
            active_array: self.active_array,
            min_focus_distance: self.min_focus_distance,
            af_modes: self.af_modes,
            ae_modes: self.ae_modes,
            awb_modes: self.awb_modes,
            max_digital_zoom: self.max_digital_zoom,
            flash_available: self.flash_available,
            hardware_level: self.hardware_level,
            still_sizes: self.still_sizes,
            preview_sizes: self.preview_sizes,
        })
    }
}

impl TryFrom<DeviceProfileBuilder> for DeviceProfile {
    type Error = CoreError;

    fn try_from(builder: DeviceProfileBuilder) -> Result<Self, Self::Error> {
        builder.build()
    }
}

impl DeviceProfile {
    pub fn builder() -> DeviceProfileBuilder {
        DeviceProfileBuilder::default()
    }

    /// Parse a profile from JSON
    pub fn from_json(json: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn active_array(&self) -> Rect {
        self.active_array
    }

    pub fn min_focus_distance(&self) -> f32 {
        self.min_focus_distance
    }

    pub fn max_digital_zoom(&self) -> f32 {
        self.max_digital_zoom
    }

    pub fn flash_available(&self) -> bool {
        self.flash_available
    }

    pub fn hardware_level(&self) -> HardwareLevel {
        self.hardware_level
    }

    pub fn still_sizes(&self) -> &[Size] {
        &self.still_sizes
    }

    pub fn preview_sizes(&self) -> &[Size] {
        &self.preview_sizes
    }

    /// A minimum focus distance of zero means the lens cannot move
    pub fn is_fixed_focus(&self) -> bool {
        self.min_focus_distance <= 0.0
    }

    pub fn is_legacy(&self) -> bool {
        self.hardware_level == HardwareLevel::Legacy
    }

    /// Whether a precapture AE metering pass can be triggered
    pub fn supports_precapture_metering(&self) -> bool {
        !self.is_legacy() && self.ae_modes.iter().any(|mode| *mode != AeMode::Off)
    }

    pub fn supports_ae_mode(&self, mode: AeMode) -> bool {
        self.ae_modes.contains(&mode)
    }

    /// AF mode for requests: continuous-picture when available, else auto.
    /// Fixed-focus lenses get no AF mode at all.
    pub fn preferred_af_mode(&self) -> Option<AfMode> {
        if self.is_fixed_focus() {
            None
        } else if self.af_modes.contains(&AfMode::ContinuousPicture) {
            Some(AfMode::ContinuousPicture)
        } else {
            Some(AfMode::Auto)
        }
    }

    /// AWB mode for requests, when the sensor can run AWB on its own
    pub fn preferred_awb_mode(&self) -> Option<AwbMode> {
        self.awb_modes
            .contains(&AwbMode::Auto)
            .then_some(AwbMode::Auto)
    }

    pub fn flash_support(&self) -> FlashSupport {
        FlashSupport {
            auto_flash: self.supports_ae_mode(AeMode::OnAutoFlash),
            red_eye: self.supports_ae_mode(AeMode::OnAutoFlashRedeye),
        }
    }

    pub fn default_flash_mode(&self) -> FlashMode {
        self.flash_support().default_mode()
    }

    /// Which common ratios appear among the still output sizes
    pub fn supported_ratios(&self) -> SupportedRatios {
        let mut supported = SupportedRatios::default();
        for ratio in self.still_sizes.iter().filter_map(|s| AspectRatio::of_size(*s)) {
            match ratio {
                AspectRatio::WIDE => supported.wide = true,
                AspectRatio::STANDARD => supported.standard = true,
                AspectRatio::SQUARE => supported.square = true,
                _ => {}
            }
        }
        supported
    }

    /// Largest still size matching the ratio
    pub fn largest_still_size(&self, ratio: AspectRatio) -> Option<Size> {
        self.still_sizes
            .iter()
            .copied()
            .filter(|size| ratio.matches(*size))
            .max_by_key(Size::area)
    }

    /// Preview size for a still size: the largest matching size that fits the
    /// (portrait) display bounds, or the smallest matching size when none fit
    pub fn choose_preview_size(&self, max_width: u32, max_height: u32, still: Size) -> Option<Size> {
        choose_optimal_size(&self.preview_sizes, max_width, max_height, still)
    }
}

/// Pick an output size with the same ratio as `aspect`
///
/// Sizes are landscape while the display bounds are portrait, so a size fits
/// when its height is within `max_width` and its width within `max_height`.
pub fn choose_optimal_size(
    choices: &[Size],
    max_width: u32,
    max_height: u32,
    aspect: Size,
) -> Option<Size> {
    if aspect.width == 0 {
        return None;
    }

    let matching: Vec<Size> = choices
        .iter()
        .copied()
        .filter(|option| within_tolerance(*option, aspect.width, aspect.height))
        .collect();

    let fitting = matching
        .iter()
        .copied()
        .filter(|option| option.height <= max_width && option.width <= max_height)
        .max_by_key(Size::area);

    fitting.or_else(|| matching.iter().copied().min_by_key(Size::area))
}
