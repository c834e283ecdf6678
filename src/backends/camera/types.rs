// SPDX-License-Identifier: GPL-3.0-only
// Shared types for the camera hardware boundary

//! Shared types for camera backends

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel dimensions of an output surface or image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Pixel count, widened so 8K sizes never overflow
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Rectangle in sensor pixel coordinates (right/bottom exclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Rectangle anchored at the origin
    pub const fn from_size(width: i32, height: i32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    /// True when `other` lies entirely within this rectangle (equality included)
    pub fn contains(&self, other: &Rect) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right <= self.right
            && other.bottom <= self.bottom
    }

    /// Center point, doubled to stay in integer space
    pub fn center_x2(&self) -> (i32, i32) {
        (self.left + self.right, self.top + self.bottom)
    }

    /// Inset each side by the given amounts
    pub fn inset(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(
            self.left + dx,
            self.top + dy,
            self.right - dx,
            self.bottom - dy,
        )
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{},{} {}x{}]",
            self.left,
            self.top,
            self.width(),
            self.height()
        )
    }
}

/// Autofocus state reported in capture metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AfState {
    #[default]
    Inactive,
    PassiveScan,
    PassiveFocused,
    PassiveUnfocused,
    ActiveScan,
    /// Terminal AF outcome: lens locked in focus
    FocusedLocked,
    /// Terminal AF outcome: lens locked without reaching focus
    NotFocusedLocked,
}

impl AfState {
    /// Whether the AF routine has reached a locked outcome
    pub fn is_locked(&self) -> bool {
        matches!(self, AfState::FocusedLocked | AfState::NotFocusedLocked)
    }
}

/// Auto exposure state reported in capture metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AeState {
    #[default]
    Inactive,
    Searching,
    Converged,
    Locked,
    FlashRequired,
    Precapture,
}

/// Auto white balance state reported in capture metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AwbState {
    #[default]
    Inactive,
    Searching,
    Converged,
    Locked,
}

/// Whether a metadata update is a partial result or the final one for a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataKind {
    Partial,
    Final,
}

/// Per-frame 3A metadata
///
/// Every field is optional; hardware omits fields it has not computed yet,
/// and partial results routinely carry only a subset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameMetadata {
    /// Frame sequence number
    pub sequence: Option<u64>,
    /// Focus status
    pub af_state: Option<AfState>,
    /// Auto exposure state
    pub ae_state: Option<AeState>,
    /// Auto white balance state
    pub awb_state: Option<AwbState>,
}

impl FrameMetadata {
    /// Metadata where all of 3A has settled
    pub fn converged() -> Self {
        Self {
            sequence: None,
            af_state: Some(AfState::FocusedLocked),
            ae_state: Some(AeState::Converged),
            awb_state: Some(AwbState::Converged),
        }
    }

    /// Metadata with AF still searching
    pub fn scanning() -> Self {
        Self {
            sequence: None,
            af_state: Some(AfState::ActiveScan),
            ae_state: Some(AeState::Searching),
            awb_state: Some(AwbState::Searching),
        }
    }
}

/// Identifier the hardware hands back for a one-shot request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Output surface a request can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputTarget {
    /// Live preview surface at its configured buffer size
    Preview(Size),
    /// Encoded still image reader at its allocated size
    StillReader(Size),
}

/// Events delivered by the camera driver
///
/// The driver thread never touches core state; it sends one of these to the
/// session worker, which applies it on its own thread.
#[derive(Debug, Clone, PartialEq)]
pub enum HardwareEvent {
    DeviceOpened,
    DeviceDisconnected,
    DeviceError(String),
    SessionConfigured,
    SessionConfigureFailed(String),
    Metadata {
        kind: MetadataKind,
        metadata: FrameMetadata,
    },
    /// Encoded bytes of a finished still, read from the image reader
    StillImageAvailable(Vec<u8>),
    StillCaptureCompleted(RequestId),
    StillCaptureFailed {
        request: RequestId,
        reason: String,
    },
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Error types for backend operations
#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Camera device not found
    DeviceNotFound(String),
    /// Device is open by another client
    DeviceInUse(String),
    /// Device went away
    Disconnected,
    /// Operation requires a device/session that is not open
    NotOpen(&'static str),
    /// Session configuration was rejected
    ConfigurationRejected(String),
    /// Request submission rejected
    SubmitFailed(String),
    /// Other errors
    Other(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            BackendError::DeviceInUse(msg) => write!(f, "Device in use: {}", msg),
            BackendError::Disconnected => write!(f, "Device disconnected"),
            BackendError::NotOpen(what) => write!(f, "{} is not open", what),
            BackendError::ConfigurationRejected(msg) => {
                write!(f, "Session configuration rejected: {}", msg)
            }
            BackendError::SubmitFailed(msg) => write!(f, "Request submission failed: {}", msg),
            BackendError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}
