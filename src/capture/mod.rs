// SPDX-License-Identifier: GPL-3.0-only

//! Capture control core
//!
//! - [`profile`]: static device capabilities and size selection
//! - [`zoom`]: pinch gesture to zoom factor and sensor crop
//! - [`convergence`]: 3A settle-or-timeout decision before a still
//! - [`request`]: per-submission request derivation
//! - [`state_machine`]: session lifecycle and still capture flow

pub mod convergence;
pub mod profile;
pub mod request;
pub mod state_machine;
pub mod zoom;

pub use convergence::{ConvergenceWatcher, Readiness, Verdict};
pub use profile::{AeMode, AfMode, AspectRatio, AwbMode, DeviceProfile, HardwareLevel};
pub use request::{AfTrigger, CaptureRequestConfig, PrecaptureTrigger, RequestTemplate};
pub use state_machine::{CaptureOutcome, CaptureStateMachine};
pub use zoom::{ZoomController, ZoomIndicator};

use crate::backends::camera::types::Size;
use crate::constants;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle state of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CaptureState {
    #[default]
    Closed,
    Opened,
    Previewing,
    AwaitingConvergence,
}

impl CaptureState {
    /// Whether a capture session is configured and streaming
    pub fn is_streaming(&self) -> bool {
        matches!(
            self,
            CaptureState::Previewing | CaptureState::AwaitingConvergence
        )
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureState::Closed => "closed",
            CaptureState::Opened => "opened",
            CaptureState::Previewing => "previewing",
            CaptureState::AwaitingConvergence => "awaiting convergence",
        };
        f.write_str(name)
    }
}

/// Timing and request knobs for the state machine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureTuning {
    pub lock_timeout: Duration,
    pub convergence_timeout: Duration,
    pub jpeg_orientation: u32,
    pub zoom_step: f32,
    pub display_zoom_baseline: f32,
    /// Portrait display bounds a preview size must fit
    pub max_preview: Size,
}

impl Default for CaptureTuning {
    fn default() -> Self {
        Self {
            lock_timeout: constants::timing::OPEN_CLOSE_LOCK_TIMEOUT,
            convergence_timeout: constants::timing::CONVERGENCE_TIMEOUT,
            jpeg_orientation: constants::capture::JPEG_ORIENTATION,
            zoom_step: constants::zoom::STEP,
            display_zoom_baseline: constants::zoom::DISPLAY_BASELINE,
            max_preview: Size::new(
                constants::capture::MAX_PREVIEW_WIDTH,
                constants::capture::MAX_PREVIEW_HEIGHT,
            ),
        }
    }
}
