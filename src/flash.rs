// SPDX-License-Identifier: GPL-3.0-only

//! Flash mode selection
//!
//! The flash unit is driven through the auto-exposure routine: the two
//! automatic modes are AE modes of their own, the manual modes keep AE on and
//! set an explicit flash control.

use crate::capture::profile::AeMode;
use serde::{Deserialize, Serialize};

/// Flash operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlashMode {
    /// AE decides when to fire
    Auto,
    /// AE decides when to fire, with red-eye reduction pre-flash
    AutoRedEye,
    /// Fire once for every still
    Single,
    /// Never fire
    Off,
    /// LED stays on continuously
    Torch,
}

/// Explicit flash control carried by a request when AE does not own the flash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlashControl {
    Off,
    Single,
    Torch,
}

/// Which automatic flash modes the AE routine supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlashSupport {
    pub auto_flash: bool,
    pub red_eye: bool,
}

impl FlashSupport {
    /// First mode of the cycle for this hardware
    pub fn default_mode(&self) -> FlashMode {
        if self.auto_flash {
            FlashMode::Auto
        } else if self.red_eye {
            FlashMode::AutoRedEye
        } else {
            FlashMode::Single
        }
    }
}

impl FlashMode {
    /// Cycle to the next mode:
    /// Auto -> AutoRedEye -> Single -> Off -> Torch -> (first supported auto mode)
    ///
    /// Automatic modes the hardware lacks are skipped.
    pub fn next(self, support: FlashSupport) -> Self {
        match self {
            FlashMode::Auto => {
                if support.red_eye {
                    FlashMode::AutoRedEye
                } else {
                    FlashMode::Single
                }
            }
            FlashMode::AutoRedEye => FlashMode::Single,
            FlashMode::Single => FlashMode::Off,
            FlashMode::Off => FlashMode::Torch,
            FlashMode::Torch => support.default_mode(),
        }
    }

    /// AE mode and optional explicit flash control for a request
    pub fn controls(self) -> (AeMode, Option<FlashControl>) {
        match self {
            FlashMode::Auto => (AeMode::OnAutoFlash, None),
            FlashMode::AutoRedEye => (AeMode::OnAutoFlashRedeye, None),
            FlashMode::Single => (AeMode::On, Some(FlashControl::Single)),
            FlashMode::Off => (AeMode::On, Some(FlashControl::Off)),
            FlashMode::Torch => (AeMode::On, Some(FlashControl::Torch)),
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            FlashMode::Auto => "Auto",
            FlashMode::AutoRedEye => "Auto (red-eye)",
            FlashMode::Single => "On",
            FlashMode::Off => "Off",
            FlashMode::Torch => "Torch",
        }
    }
}
