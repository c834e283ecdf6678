// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::camera::types::Size;
use crate::capture::CaptureTuning;
use crate::constants;
use crate::errors::{CoreError, CoreResult};
use crate::frame_processor::SchedulerTuning;
use crate::frame_processor::tasks::ClassifierOptions;
use crate::session::SessionSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// User configuration, stored as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Milliseconds between classification cycles
    pub classification_interval_ms: u64,
    /// Classification results below this confidence are not shown
    pub acceptance_threshold: f32,
    /// Maximum 3A convergence wait before a still is forced
    pub convergence_timeout_ms: u64,
    /// Bound on acquiring the camera open/close lock
    pub lock_timeout_ms: u64,
    /// Zoom units per pinch update
    pub zoom_step: f32,
    /// Zoom factor displayed as 1.0x
    pub display_zoom_baseline: f32,
    /// Zoom indicator dwell after a pinch ends
    pub zoom_indicator_dwell_ms: u64,
    /// Bound on waiting for camera permission
    pub permission_wait_ms: u64,
    /// Rotation recorded in stills
    pub jpeg_orientation: u32,
    /// Display bounds used when choosing the preview size
    pub max_preview_width: u32,
    pub max_preview_height: u32,
    /// Where stills are written (default: pictures folder)
    pub photo_dir: Option<PathBuf>,
    pub classifier: ClassifierOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            classification_interval_ms: constants::timing::CLASSIFICATION_INTERVAL.as_millis()
                as u64,
            acceptance_threshold: constants::classification::ACCEPTANCE_THRESHOLD,
            convergence_timeout_ms: constants::timing::CONVERGENCE_TIMEOUT.as_millis() as u64,
            lock_timeout_ms: constants::timing::OPEN_CLOSE_LOCK_TIMEOUT.as_millis() as u64,
            zoom_step: constants::zoom::STEP,
            display_zoom_baseline: constants::zoom::DISPLAY_BASELINE,
            zoom_indicator_dwell_ms: constants::timing::ZOOM_INDICATOR_DWELL.as_millis() as u64,
            permission_wait_ms: constants::timing::PERMISSION_WAIT.as_millis() as u64,
            jpeg_orientation: constants::capture::JPEG_ORIENTATION,
            max_preview_width: constants::capture::MAX_PREVIEW_WIDTH,
            max_preview_height: constants::capture::MAX_PREVIEW_HEIGHT,
            photo_dir: None,
            classifier: ClassifierOptions::default(),
        }
    }
}

impl Config {
    /// `<config dir>/aicamera/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("aicamera").join("config.json"))
    }

    /// Read and validate a config file
    pub fn load(path: &Path) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Load the default config file, falling back to defaults when it is
    /// missing or invalid
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring invalid config file");
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        if !(0.0..=1.0).contains(&self.acceptance_threshold) {
            return Err(CoreError::Configuration(format!(
                "acceptance_threshold {} is outside 0.0..=1.0",
                self.acceptance_threshold
            )));
        }
        if self.classification_interval_ms == 0 {
            return Err(CoreError::Configuration(
                "classification_interval_ms must be positive".to_string(),
            ));
        }
        if self.zoom_step.is_nan() || self.zoom_step <= 0.0 {
            return Err(CoreError::Configuration(format!(
                "zoom_step {} must be positive",
                self.zoom_step
            )));
        }
        if self.jpeg_orientation % 90 != 0 || self.jpeg_orientation >= 360 {
            return Err(CoreError::Configuration(format!(
                "jpeg_orientation {} must be 0, 90, 180 or 270",
                self.jpeg_orientation
            )));
        }
        if self.max_preview_width == 0 || self.max_preview_height == 0 {
            return Err(CoreError::Configuration(
                "preview bounds must be positive".to_string(),
            ));
        }
        if self.classifier.image_std == 0.0 {
            return Err(CoreError::Configuration(
                "classifier image_std must not be zero".to_string(),
            ));
        }
        if self.classifier.input_width == 0 || self.classifier.input_height == 0 {
            return Err(CoreError::Configuration(
                "classifier input size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_json_pretty(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Resolved output directory for stills
    pub fn photo_dir(&self) -> PathBuf {
        self.photo_dir
            .clone()
            .unwrap_or_else(crate::storage::default_photo_dir)
    }

    /// Classifier options with the configured acceptance threshold
    pub fn classifier_options(&self) -> ClassifierOptions {
        ClassifierOptions {
            threshold: self.acceptance_threshold,
            ..self.classifier.clone()
        }
    }

    pub fn capture_tuning(&self) -> CaptureTuning {
        CaptureTuning {
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            convergence_timeout: Duration::from_millis(self.convergence_timeout_ms),
            jpeg_orientation: self.jpeg_orientation,
            zoom_step: self.zoom_step,
            display_zoom_baseline: self.display_zoom_baseline,
            max_preview: Size::new(self.max_preview_width, self.max_preview_height),
        }
    }

    pub fn scheduler_tuning(&self) -> SchedulerTuning {
        SchedulerTuning {
            interval: Duration::from_millis(self.classification_interval_ms),
            threshold: self.acceptance_threshold,
            ..SchedulerTuning::default()
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            capture: self.capture_tuning(),
            scheduler: self.scheduler_tuning(),
            indicator_dwell: Duration::from_millis(self.zoom_indicator_dwell_ms),
            permission_wait: Duration::from_millis(self.permission_wait_ms),
            ..SessionSettings::default()
        }
    }
}
