// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the capture core
//!
//! Only two failure kinds are recovered locally: missing convergence metadata
//! (which is not an error at all, see [`crate::capture::convergence::Verdict`])
//! and an unavailable classifier. Everything else is surfaced to the owner of
//! the session, which decides whether to tear down or restart.

use std::fmt;
use std::time::Duration;

/// Result type alias using CoreError
pub type CoreResult<T> = Result<T, CoreError>;

/// Main error type of the capture core
#[derive(Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Device open/configure failed or the device disconnected
    HardwareUnavailable(String),
    /// A single still-capture request failed at the hardware level
    CaptureFailed(String),
    /// Model or label list could not be loaded
    ClassifierUnavailable(String),
    /// The open/close lock could not be taken within its bound
    ResourceAcquisitionTimeout(Duration),
    /// Invalid configuration or device profile
    Configuration(String),
    /// Still image persistence failed
    Storage(String),
}

/// Classifier boundary errors
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifierError {
    /// Reading the model or label file failed
    Io(String),
    /// Model bytes rejected by the inference engine
    InvalidModel(String),
    /// Label list was empty or does not match the model output
    InvalidLabels(String),
    /// Input image does not have the expected geometry
    InputMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    /// Inference failed at runtime
    Inference(String),
    /// The classifier was closed
    Closed,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::HardwareUnavailable(msg) => write!(f, "Camera hardware unavailable: {}", msg),
            CoreError::CaptureFailed(msg) => write!(f, "Still capture failed: {}", msg),
            CoreError::ClassifierUnavailable(msg) => write!(f, "Classifier unavailable: {}", msg),
            CoreError::ResourceAcquisitionTimeout(timeout) => write!(
                f,
                "Timed out after {} ms waiting to lock camera opening/closing",
                timeout.as_millis()
            ),
            CoreError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            CoreError::Storage(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl fmt::Display for ClassifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifierError::Io(msg) => write!(f, "I/O error: {}", msg),
            ClassifierError::InvalidModel(msg) => write!(f, "Invalid model: {}", msg),
            ClassifierError::InvalidLabels(msg) => write!(f, "Invalid label list: {}", msg),
            ClassifierError::InputMismatch { expected, actual } => write!(
                f,
                "Input is {}x{}, model expects {}x{}",
                actual.0, actual.1, expected.0, expected.1
            ),
            ClassifierError::Inference(msg) => write!(f, "Inference failed: {}", msg),
            ClassifierError::Closed => write!(f, "Classifier has been closed"),
        }
    }
}

impl std::error::Error for CoreError {}
impl std::error::Error for ClassifierError {}

impl CoreError {
    /// Whether the owning session should treat this error as fatal for the
    /// current camera session (state already forced to `Closed`).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::HardwareUnavailable(_)
                | CoreError::ResourceAcquisitionTimeout(_)
                | CoreError::Configuration(_)
        )
    }
}

impl From<ClassifierError> for CoreError {
    fn from(err: ClassifierError) -> Self {
        CoreError::ClassifierUnavailable(err.to_string())
    }
}

impl From<crate::backends::camera::BackendError> for CoreError {
    fn from(err: crate::backends::camera::BackendError) -> Self {
        CoreError::HardwareUnavailable(err.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for ClassifierError {
    fn from(err: std::io::Error) -> Self {
        ClassifierError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Configuration(err.to_string())
    }
}
