// SPDX-License-Identifier: GPL-3.0-only

//! Camera hardware abstraction
//!
//! The capture core never talks to a driver directly. It issues calls through
//! [`CameraHardware`] and receives completions as [`HardwareEvent`]s that the
//! driver marshals onto the session worker.
//!
//! ```text
//! ┌─────────────────────┐
//! │    Session worker   │  ← serializes every call below
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐        HardwareEvent
//! │ CameraHardware trait│  ─────────────────────► worker queue
//! └──────────┬──────────┘
//!            │
//!            ▼
//!    ┌──────────────┐
//!    │VirtualCamera │  ← built-in implementation
//!    └──────────────┘
//! ```

pub mod lock;
pub mod types;

pub use lock::OpenCloseLock;
pub use types::*;

use crate::capture::request::CaptureRequestConfig;

/// Camera hardware session boundary
///
/// Each call only submits work. A `BackendResult` error means the driver
/// rejected the call outright; the outcome of accepted work always arrives
/// later as a [`HardwareEvent`].
pub trait CameraHardware: Send {
    // ===== Device =====

    /// Request the device be opened; answered by `DeviceOpened`,
    /// `DeviceDisconnected` or `DeviceError`
    fn open_device(&mut self, camera_id: &str) -> BackendResult<()>;

    /// Release the device handle
    fn close_device(&mut self) -> BackendResult<()>;

    // ===== Image reader =====

    /// Allocate the encoded still-image reader
    fn open_image_reader(&mut self, size: Size) -> BackendResult<()>;

    /// Release the still-image reader
    fn close_image_reader(&mut self) -> BackendResult<()>;

    // ===== Session =====

    /// Configure a capture session over the given outputs; answered by
    /// `SessionConfigured` or `SessionConfigureFailed`
    fn create_session(&mut self, outputs: &[OutputTarget]) -> BackendResult<()>;

    /// Tear down the capture session
    fn close_session(&mut self) -> BackendResult<()>;

    // ===== Requests =====

    /// Replace the repeating (preview) request; metadata for each frame is
    /// reported as `Metadata` events
    fn submit_repeating(&mut self, request: &CaptureRequestConfig) -> BackendResult<()>;

    /// Submit a one-shot request; stills report `StillImageAvailable` and then
    /// `StillCaptureCompleted`/`StillCaptureFailed` for the returned id
    fn submit_once(&mut self, request: &CaptureRequestConfig) -> BackendResult<RequestId>;
}

impl<H: CameraHardware + ?Sized> CameraHardware for Box<H> {
    fn open_device(&mut self, camera_id: &str) -> BackendResult<()> {
        (**self).open_device(camera_id)
    }

    fn close_device(&mut self) -> BackendResult<()> {
        (**self).close_device()
    }

    fn open_image_reader(&mut self, size: Size) -> BackendResult<()> {
        (**self).open_image_reader(size)
    }

    fn close_image_reader(&mut self) -> BackendResult<()> {
        (**self).close_image_reader()
    }

    fn create_session(&mut self, outputs: &[OutputTarget]) -> BackendResult<()> {
        (**self).create_session(outputs)
    }

    fn close_session(&mut self) -> BackendResult<()> {
        (**self).close_session()
    }

    fn submit_repeating(&mut self, request: &CaptureRequestConfig) -> BackendResult<()> {
        (**self).submit_repeating(request)
    }

    fn submit_once(&mut self, request: &CaptureRequestConfig) -> BackendResult<RequestId> {
        (**self).submit_once(request)
    }
}
