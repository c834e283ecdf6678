// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants
//!
//! Every value here is also a default of [`crate::config::Config`]; the
//! config layer is the only place that should read these directly.

use std::time::Duration;

/// Timing constants
pub mod timing {
    use super::Duration;

    /// Maximum wait for 3A convergence before a still capture is forced
    pub const CONVERGENCE_TIMEOUT: Duration = Duration::from_millis(1000);

    /// Bound on acquiring the camera open/close lock
    pub const OPEN_CLOSE_LOCK_TIMEOUT: Duration = Duration::from_millis(2500);

    /// Interval between classification cycles
    pub const CLASSIFICATION_INTERVAL: Duration = Duration::from_millis(1000);

    /// Dwell before the zoom indicator is hidden after a gesture ends
    pub const ZOOM_INDICATOR_DWELL: Duration = Duration::from_millis(1200);

    /// Upper bound on how long `open` waits for the permission signal
    pub const PERMISSION_WAIT: Duration = Duration::from_secs(30);

    /// Worker wake-up when no timer is pending
    pub const WORKER_IDLE_POLL: Duration = Duration::from_millis(250);
}

/// Digital zoom constants
pub mod zoom {
    /// Zoom units added or removed per gesture update
    pub const STEP: f32 = 0.025;

    /// Zoom factor mapped to "1.0x" on the display remap
    pub const DISPLAY_BASELINE: f32 = 1.4;

    /// Smallest zoom factor (no crop)
    pub const MIN_FACTOR: f32 = 1.0;
}

/// Classification constants
pub mod classification {
    /// Default acceptance threshold; results at or below are discarded
    pub const ACCEPTANCE_THRESHOLD: f32 = 0.2;

    /// Aspect ratios above this are center-cropped to a square before inference
    pub const CROP_ASPECT_LIMIT: f32 = 1.5;

    /// Default model input edge length in pixels
    pub const INPUT_SIZE: u32 = 300;

    /// Default normalization mean for float models
    pub const IMAGE_MEAN: f32 = 127.5;

    /// Default normalization standard deviation for float models
    pub const IMAGE_STD: f32 = 127.5;

    /// Default inference thread count
    pub const NUM_THREADS: u32 = 2;
}

/// Capture request constants
pub mod capture {
    /// JPEG orientation applied to still requests (degrees clockwise)
    pub const JPEG_ORIENTATION: u32 = 90;

    /// Tolerance in pixels when matching an output size to an aspect ratio
    pub const RATIO_TOLERANCE_PX: i64 = 5;

    /// Preview sizes larger than this are not considered
    pub const MAX_PREVIEW_WIDTH: u32 = 1080;

    /// Preview sizes larger than this are not considered
    pub const MAX_PREVIEW_HEIGHT: u32 = 1920;
}

/// Application information utilities
pub mod app_info {
    /// Get the application version from build-time environment
    pub fn version() -> &'static str {
        env!("GIT_VERSION")
    }
}
