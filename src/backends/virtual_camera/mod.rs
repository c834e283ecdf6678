// SPDX-License-Identifier: GPL-3.0-only

//! Built-in software camera
//!
//! Implements [`CameraHardware`] without any device: open and session
//! configuration succeed immediately, a driver thread streams simulated 3A
//! metadata for the repeating request, and stills are synthetic JPEGs.
//!
//! # Architecture
//!
//! ```text
//! CameraHardware call (worker thread)
//!        │
//!        ▼
//! ┌──────────────────┐   triggers    ┌──────────────────┐
//! │  VirtualCamera   │ ────────────► │  Simulated 3A    │
//! └──────────────────┘               └──────────────────┘
//!        │ starts                           ▲ advance per frame
//!        ▼                                  │
//! ┌──────────────────┐  Metadata     ┌──────┴───────────┐
//! │   FrameLoop      │ ────────────► │  EventSender     │ → session worker
//! └──────────────────┘               └──────────────────┘
//! ```

mod frame_loop;
pub mod synthetic;

pub use frame_loop::{FrameLoop, LoopAction};
pub use synthetic::{DominantColorEngine, SyntheticFrameSource, COLOR_LABELS};

use crate::backends::camera::CameraHardware;
use crate::backends::camera::types::{
    AeState, AfState, AwbState, BackendError, BackendResult, FrameMetadata, HardwareEvent,
    MetadataKind, OutputTarget, Rect, RequestId, Size,
};
use crate::capture::request::{AfTrigger, CaptureRequestConfig, PrecaptureTrigger, RequestTemplate};
use crate::capture::{AeMode, AfMode, AwbMode, DeviceProfile, HardwareLevel};
use crate::errors::CoreResult;
use crate::session::EventSender;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Behaviour knobs of the virtual camera
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirtualCameraSettings {
    pub frame_interval: Duration,
    /// Frames an AF scan takes before it locks; `None` never locks
    pub focus_frames: Option<u32>,
    /// Frames a precapture metering pass takes
    pub precapture_frames: u32,
    pub jpeg_quality: u8,
}

impl Default for VirtualCameraSettings {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(33),
            focus_frames: Some(8),
            precapture_frames: 4,
            jpeg_quality: 85,
        }
    }
}

/// Simulated auto-focus/exposure/white-balance routines
#[derive(Debug, Clone)]
struct ThreeA {
    af: AfState,
    af_remaining: Option<u32>,
    ae: AeState,
    ae_remaining: u32,
    sequence: u64,
}

impl ThreeA {
    fn new() -> Self {
        Self {
            af: AfState::PassiveScan,
            af_remaining: None,
            ae: AeState::Searching,
            ae_remaining: 2,
            sequence: 0,
        }
    }

    fn apply(&mut self, request: &CaptureRequestConfig, settings: &VirtualCameraSettings) {
        match request.af_trigger {
            AfTrigger::Start => {
                self.af = AfState::ActiveScan;
                self.af_remaining = settings.focus_frames;
            }
            AfTrigger::Cancel => {
                self.af = AfState::PassiveScan;
                self.af_remaining = None;
            }
            AfTrigger::Idle => {}
        }
        if request.precapture_trigger == PrecaptureTrigger::Start {
            self.ae = AeState::Precapture;
            self.ae_remaining = settings.precapture_frames;
        }
    }

    /// Advance one frame and report its metadata
    fn advance(&mut self, af_enabled: bool) -> FrameMetadata {
        self.sequence += 1;

        if self.af == AfState::ActiveScan
            && let Some(remaining) = self.af_remaining.as_mut()
        {
            if *remaining == 0 {
                self.af = AfState::FocusedLocked;
                self.af_remaining = None;
            } else {
                *remaining -= 1;
            }
        } else if self.af == AfState::PassiveScan {
            self.af = AfState::PassiveFocused;
        }

        if self.ae_remaining == 0 {
            if matches!(self.ae, AeState::Searching | AeState::Precapture) {
                self.ae = AeState::Converged;
            }
        } else {
            self.ae_remaining -= 1;
        }

        FrameMetadata {
            sequence: Some(self.sequence),
            af_state: af_enabled.then_some(self.af),
            ae_state: Some(self.ae),
            awb_state: Some(if self.sequence > 1 {
                AwbState::Converged
            } else {
                AwbState::Searching
            }),
        }
    }
}

#[derive(Debug)]
struct Shared {
    three_a: ThreeA,
    /// AF mode of the current repeating request
    af_enabled: bool,
}

/// Software [`CameraHardware`] implementation
pub struct VirtualCamera {
    events: EventSender,
    settings: VirtualCameraSettings,
    shared: Arc<Mutex<Shared>>,
    device_open: bool,
    reader: Option<Size>,
    session: Option<Vec<OutputTarget>>,
    frame_loop: Option<FrameLoop>,
    next_request: u64,
}

impl VirtualCamera {
    /// Capabilities the virtual camera advertises
    ///
    /// A 4:3 sensor with auto-focus, auto-flash and 4x digital zoom; still
    /// sizes are kept small so synthetic JPEG encoding stays quick.
    pub fn sample_profile() -> CoreResult<DeviceProfile> {
        DeviceProfile::builder()
            .camera_id("virtual-0")
            .active_array(Rect::from_size(1600, 1200))
            .min_focus_distance(10.0)
            .af_modes([AfMode::Auto, AfMode::ContinuousPicture])
            .ae_modes([AeMode::Off, AeMode::On, AeMode::OnAutoFlash])
            .awb_modes([AwbMode::Auto])
            .max_digital_zoom(4.0)
            .flash_available(true)
            .hardware_level(HardwareLevel::Full)
            .still_sizes([
                Size::new(1600, 1200),
                Size::new(1600, 900),
                Size::new(1200, 1200),
                Size::new(800, 600),
            ])
            .preview_sizes([
                Size::new(1280, 960),
                Size::new(1280, 720),
                Size::new(960, 960),
                Size::new(640, 480),
            ])
            .build()
    }

    pub fn new(events: EventSender, settings: VirtualCameraSettings) -> Self {
        Self {
            events,
            settings,
            shared: Arc::new(Mutex::new(Shared {
                three_a: ThreeA::new(),
                af_enabled: false,
            })),
            device_open: false,
            reader: None,
            session: None,
            frame_loop: None,
            next_request: 0,
        }
    }

    fn emit(&self, event: HardwareEvent) -> BackendResult<()> {
        if self.events.send(event) {
            Ok(())
        } else {
            Err(BackendError::Disconnected)
        }
    }

    fn stop_streaming(&mut self) {
        if let Some(mut frame_loop) = self.frame_loop.take() {
            frame_loop.stop();
        }
    }

    fn start_streaming(&mut self) {
        if self.frame_loop.as_ref().is_some_and(FrameLoop::is_running) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let events = self.events.clone();
        self.frame_loop = Some(FrameLoop::start(
            "virtual-camera",
            self.settings.frame_interval,
            move |_| {
                let metadata = {
                    let mut shared = shared.lock().unwrap_or_else(|e| e.into_inner());
                    let af_enabled = shared.af_enabled;
                    shared.three_a.advance(af_enabled)
                };
                trace!(sequence = ?metadata.sequence, af = ?metadata.af_state, "Virtual frame");
                let delivered = events.send(HardwareEvent::Metadata {
                    kind: MetadataKind::Final,
                    metadata,
                });
                if delivered {
                    LoopAction::Continue
                } else {
                    LoopAction::Stop
                }
            },
        ));
    }

    fn capture_still(&mut self, id: RequestId) -> BackendResult<()> {
        let Some(size) = self.reader else {
            return Err(BackendError::NotOpen("image reader"));
        };
        let tint = id.0 as usize;
        match synthetic::encode_jpeg(&synthetic::gradient_frame(size, tint), self.settings.jpeg_quality) {
            Ok(bytes) => {
                debug!(request = %id, %size, bytes = bytes.len(), "Virtual still encoded");
                self.emit(HardwareEvent::StillImageAvailable(bytes))?;
                self.emit(HardwareEvent::StillCaptureCompleted(id))
            }
            Err(e) => {
                warn!(request = %id, error = %e, "Virtual still encoding failed");
                self.emit(HardwareEvent::StillCaptureFailed {
                    request: id,
                    reason: e.to_string(),
                })
            }
        }
    }
}

impl CameraHardware for VirtualCamera {
    fn open_device(&mut self, camera_id: &str) -> BackendResult<()> {
        if self.device_open {
            return Err(BackendError::DeviceInUse(camera_id.to_string()));
        }
        info!(camera = %camera_id, "Opening virtual camera");
        self.device_open = true;
        self.emit(HardwareEvent::DeviceOpened)
    }

    fn close_device(&mut self) -> BackendResult<()> {
        self.stop_streaming();
        self.session = None;
        if !self.device_open {
            return Err(BackendError::NotOpen("device"));
        }
        self.device_open = false;
        debug!("Virtual camera closed");
        Ok(())
    }

    fn open_image_reader(&mut self, size: Size) -> BackendResult<()> {
        if size.is_empty() {
            return Err(BackendError::Other(format!("invalid reader size {}", size)));
        }
        self.reader = Some(size);
        Ok(())
    }

    fn close_image_reader(&mut self) -> BackendResult<()> {
        self.reader
            .take()
            .map(|_| ())
            .ok_or(BackendError::NotOpen("image reader"))
    }

    fn create_session(&mut self, outputs: &[OutputTarget]) -> BackendResult<()> {
        if !self.device_open {
            return Err(BackendError::NotOpen("device"));
        }
        debug!(outputs = outputs.len(), "Virtual session configured");
        self.session = Some(outputs.to_vec());
        self.emit(HardwareEvent::SessionConfigured)
    }

    fn close_session(&mut self) -> BackendResult<()> {
        self.stop_streaming();
        self.session
            .take()
            .map(|_| ())
            .ok_or(BackendError::NotOpen("session"))
    }

    fn submit_repeating(&mut self, request: &CaptureRequestConfig) -> BackendResult<()> {
        if self.session.is_none() {
            return Err(BackendError::NotOpen("session"));
        }
        {
            let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
            shared.af_enabled = request.af_mode.is_some();
            shared.three_a.apply(request, &self.settings);
        }
        self.start_streaming();
        Ok(())
    }

    fn submit_once(&mut self, request: &CaptureRequestConfig) -> BackendResult<RequestId> {
        if self.session.is_none() {
            return Err(BackendError::NotOpen("session"));
        }
        self.next_request += 1;
        let id = RequestId(self.next_request);

        match request.template {
            RequestTemplate::StillCapture => self.capture_still(id)?,
            RequestTemplate::Preview => {
                let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
                shared.three_a.apply(request, &self.settings);
            }
        }
        Ok(id)
    }
}

impl Drop for VirtualCamera {
    fn drop(&mut self) {
        self.stop_streaming();
    }
}
