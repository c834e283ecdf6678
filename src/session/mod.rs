// SPDX-License-Identifier: GPL-3.0-only

//! Camera session worker
//!
//! One dedicated thread owns the capture state machine and the classification
//! scheduler. Everything else talks to it through messages:
//!
//! ```text
//!  UI context ── SessionCommand ──┐
//!                                 ├──► worker thread ──► watch channels (state,
//!  driver    ── HardwareEvent ────┘      (serialized)     label, zoom, flash)
//!                                                    └──► SessionNotice queue
//! ```

pub mod permissions;
pub mod worker;

pub use permissions::{PermissionGate, PermissionStatus};
pub use worker::{CameraSession, ClassifierFactory, EventSender, SessionHandle, SessionServices};

use crate::capture::{AspectRatio, CaptureTuning};
use crate::backends::camera::types::Size;
use crate::constants;
use crate::errors::CoreError;
use crate::frame_processor::SchedulerTuning;
use crate::storage::StoredStill;
use std::time::Duration;

/// Requests the UI context queues for the worker
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// Wait for permission, then open the camera
    Open,
    SurfaceAvailable(Size),
    SurfaceDestroyed,
    CaptureStill,
    /// Two-finger spacing sample of an ongoing pinch
    ZoomSample(f32),
    ZoomEnd,
    CycleFlash,
    SetAspectRatio(AspectRatio),
    CycleAspectRatio,
    ArmClassification,
    DisarmClassification,
    Close,
    Shutdown,
}

/// Things the worker reports that are not part of the watched state
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    StillSaved(StoredStill),
    /// Surfaced failure; the session decides nothing on its own beyond
    /// the cleanup already done
    Error(CoreError),
}

/// Worker knobs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSettings {
    pub capture: CaptureTuning,
    pub scheduler: SchedulerTuning,
    pub indicator_dwell: Duration,
    pub permission_wait: Duration,
    pub idle_poll: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            capture: CaptureTuning::default(),
            scheduler: SchedulerTuning::default(),
            indicator_dwell: constants::timing::ZOOM_INDICATOR_DWELL,
            permission_wait: constants::timing::PERMISSION_WAIT,
            idle_poll: constants::timing::WORKER_IDLE_POLL,
        }
    }
}
