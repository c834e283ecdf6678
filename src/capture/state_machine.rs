// SPDX-License-Identifier: GPL-3.0-only

//! Capture session lifecycle
//!
//! ```text
//! Closed ──open──► (lock held) ──DeviceOpened──► Opened
//!   ▲                                             │ start_preview
//!   │ close / disconnect / error                  ▼
//!   └──────────────────────────────── Previewing ⇄ AwaitingConvergence
//! ```
//!
//! Every method runs on the session worker. Hardware completions arrive as
//! [`HardwareEvent`]s through [`CaptureStateMachine::handle_event`].

use super::convergence::ConvergenceWatcher;
use super::profile::{AspectRatio, DeviceProfile};
use super::request::{AfTrigger, CaptureRequestConfig, PrecaptureTrigger};
use super::zoom::ZoomController;
use super::{CaptureState, CaptureTuning};
use crate::backends::camera::types::{
    BackendResult, HardwareEvent, MetadataKind, OutputTarget, RequestId, Size,
};
use crate::backends::camera::{CameraHardware, OpenCloseLock};
use crate::errors::{CoreError, CoreResult};
use crate::flash::FlashMode;
use crate::storage::{StillImageSink, StoredStill};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Something the owner of the session should hear about
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    StillStored(StoredStill),
    /// The hardware accepted the still and finished it
    StillCompleted(RequestId),
}

/// Output sizes of the configured session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SessionOutputs {
    preview: Size,
    still: Size,
}

/// Owns capture state, zoom, the convergence deadline and the hardware
pub struct CaptureStateMachine<H: CameraHardware> {
    hardware: H,
    profile: Arc<DeviceProfile>,
    lock: Arc<OpenCloseLock>,
    sink: Box<dyn StillImageSink>,
    tuning: CaptureTuning,

    state: CaptureState,
    zoom: ZoomController,
    watcher: ConvergenceWatcher,
    flash_mode: FlashMode,
    aspect_ratio: Option<AspectRatio>,

    /// Open issued, lock held until the device answers
    opening: bool,
    device_open: bool,
    reader_open: bool,
    session_pending: bool,
    session_live: bool,
    preview_surface: Option<Size>,
    outputs: Option<SessionOutputs>,

    /// AF trigger was started for the in-flight still
    af_triggered: bool,
    pending_still: Option<RequestId>,
}

impl<H: CameraHardware> CaptureStateMachine<H> {
    pub fn new(
        hardware: H,
        profile: Arc<DeviceProfile>,
        lock: Arc<OpenCloseLock>,
        sink: Box<dyn StillImageSink>,
        tuning: CaptureTuning,
    ) -> Self {
        let zoom =
            ZoomController::with_tuning(&profile, tuning.zoom_step, tuning.display_zoom_baseline);
        Self {
            hardware,
            flash_mode: profile.default_flash_mode(),
            profile,
            lock,
            sink,
            watcher: ConvergenceWatcher::new(tuning.convergence_timeout),
            tuning,
            state: CaptureState::Closed,
            zoom,
            aspect_ratio: None,
            opening: false,
            device_open: false,
            reader_open: false,
            session_pending: false,
            session_live: false,
            preview_surface: None,
            outputs: None,
            af_triggered: false,
            pending_still: None,
        }
    }

    // ===== Accessors =====

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn profile(&self) -> &Arc<DeviceProfile> {
        &self.profile
    }

    pub fn zoom(&self) -> &ZoomController {
        &self.zoom
    }

    pub fn flash_mode(&self) -> FlashMode {
        self.flash_mode
    }

    pub fn aspect_ratio(&self) -> Option<AspectRatio> {
        self.aspect_ratio
    }

    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hardware
    }

    pub fn is_awaiting_convergence(&self) -> bool {
        self.state == CaptureState::AwaitingConvergence
    }

    /// Instant after which the pending still is forced
    pub fn convergence_deadline(&self) -> Option<Instant> {
        self.watcher
            .armed_at()
            .map(|armed_at| armed_at + self.watcher.timeout())
    }

    /// Ratio of the still outputs this session uses
    pub fn active_aspect_ratio(&self) -> Option<AspectRatio> {
        self.aspect_ratio
            .or_else(|| self.outputs.and_then(|o| AspectRatio::of_size(o.still)))
    }

    fn set_state(&mut self, state: CaptureState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "Capture state changed");
            self.state = state;
        }
    }

    // ===== Lifecycle =====

    /// Take the open/close lock and ask the hardware to open the device
    ///
    /// The lock stays held until the device reports opened, disconnected or
    /// failed. Calling this while not closed is a no-op.
    pub fn open(&mut self) -> CoreResult<()> {
        if self.state != CaptureState::Closed || self.opening {
            debug!(state = %self.state, "Open ignored, camera already open");
            return Ok(());
        }

        if !self.lock.try_acquire_for(self.tuning.lock_timeout) {
            error!(
                timeout_ms = self.tuning.lock_timeout.as_millis() as u64,
                "Timed out waiting to lock camera opening"
            );
            return Err(CoreError::ResourceAcquisitionTimeout(self.tuning.lock_timeout));
        }

        info!(camera = %self.profile.camera_id(), "Opening camera");
        self.opening = true;
        if let Err(e) = self.hardware.open_device(self.profile.camera_id()) {
            error!(camera = %self.profile.camera_id(), error = %e, "Camera open rejected");
            self.opening = false;
            self.set_state(CaptureState::Closed);
            self.lock.release();
            return Err(e.into());
        }
        Ok(())
    }

    /// Record the preview surface and start preview if the device is open
    pub fn start_preview(&mut self, surface: Size) -> CoreResult<()> {
        self.preview_surface = Some(surface);
        match self.state {
            CaptureState::Opened if !self.session_pending => self.configure_session(surface),
            CaptureState::Opened => Ok(()),
            CaptureState::Closed => {
                debug!(%surface, "Preview surface stored until the camera opens");
                Ok(())
            }
            CaptureState::Previewing | CaptureState::AwaitingConvergence => {
                trace!(%surface, "Preview already running");
                Ok(())
            }
        }
    }

    /// Forget the preview surface; a later open will wait for a new one
    pub fn surface_destroyed(&mut self) {
        self.preview_surface = None;
    }

    fn configure_session(&mut self, surface: Size) -> CoreResult<()> {
        let profile = Arc::clone(&self.profile);
        let ratio = self
            .aspect_ratio
            .or_else(|| AspectRatio::of_size(surface));

        let still = ratio
            .and_then(|r| profile.largest_still_size(r))
            .or_else(|| profile.still_sizes().iter().copied().max_by_key(Size::area))
            .unwrap_or(surface);
        // Bounds are portrait: short edge first
        let bounds = self.tuning.max_preview;
        let max_width = surface.width.min(surface.height).min(bounds.width);
        let max_height = surface.width.max(surface.height).min(bounds.height);
        let preview = profile
            .choose_preview_size(max_width, max_height, still)
            .unwrap_or(surface);

        info!(%preview, %still, "Configuring capture session");

        if !self.reader_open {
            if let Err(e) = self.hardware.open_image_reader(still) {
                warn!(error = %e, "Failed to open still image reader");
                return Err(e.into());
            }
            self.reader_open = true;
        }

        let targets = [OutputTarget::Preview(preview), OutputTarget::StillReader(still)];
        if let Err(e) = self.hardware.create_session(&targets) {
            warn!(error = %e, "Capture session creation rejected");
            return Err(e.into());
        }
        self.outputs = Some(SessionOutputs { preview, still });
        self.session_pending = true;
        Ok(())
    }

    /// Release session, device and image reader, then the lock
    ///
    /// Safe to call in any state and more than once. The first release error
    /// is returned after everything has been attempted.
    pub fn close(&mut self) -> CoreResult<()> {
        // An open in flight already holds the lock
        let holds_lock = if self.opening {
            true
        } else {
            self.lock.try_acquire_for(self.tuning.lock_timeout)
        };
        if !holds_lock {
            error!("Timed out waiting to lock camera closing");
            return Err(CoreError::ResourceAcquisitionTimeout(self.tuning.lock_timeout));
        }

        let mut first_error: Option<CoreError> = None;
        let mut keep = |result: BackendResult<()>, what: &str| {
            if let Err(e) = result {
                warn!(error = %e, "Failed to close {}", what);
                first_error.get_or_insert(e.into());
            }
        };

        if self.session_live || self.session_pending {
            keep(self.hardware.close_session(), "capture session");
        }
        if self.device_open || self.opening {
            keep(self.hardware.close_device(), "camera device");
        }
        if self.reader_open {
            keep(self.hardware.close_image_reader(), "image reader");
        }

        if self.state != CaptureState::Closed {
            info!(camera = %self.profile.camera_id(), "Camera closed");
        }
        self.reset_to_closed();
        self.lock.release();

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn reset_to_closed(&mut self) {
        self.opening = false;
        self.device_open = false;
        self.reader_open = false;
        self.session_pending = false;
        self.session_live = false;
        self.outputs = None;
        self.af_triggered = false;
        self.pending_still = None;
        self.watcher.reset();
        self.set_state(CaptureState::Closed);
    }

    /// Device went away or failed: close what is left and release the lock
    fn fail_device(&mut self, reason: String) -> CoreError {
        error!(camera = %self.profile.camera_id(), %reason, "Camera unavailable");
        let keep = |result: BackendResult<()>, what: &str| {
            if let Err(e) = result {
                warn!(error = %e, "Failed to close {} after device failure", what);
            }
        };
        if self.session_live || self.session_pending {
            keep(self.hardware.close_session(), "capture session");
        }
        keep(self.hardware.close_device(), "camera device");
        if self.reader_open {
            keep(self.hardware.close_image_reader(), "image reader");
        }
        self.reset_to_closed();
        self.lock.release();
        CoreError::HardwareUnavailable(reason)
    }

    // ===== Hardware events =====

    /// Apply one hardware completion
    pub fn handle_event(
        &mut self,
        event: HardwareEvent,
        now: Instant,
    ) -> CoreResult<Option<CaptureOutcome>> {
        match event {
            HardwareEvent::DeviceOpened => {
                if !self.opening {
                    warn!("Unexpected device-opened event ignored");
                    return Ok(None);
                }
                info!(camera = %self.profile.camera_id(), "Camera opened");
                self.opening = false;
                self.device_open = true;
                self.lock.release();
                self.set_state(CaptureState::Opened);
                match self.preview_surface {
                    Some(surface) => self.configure_session(surface).map(|_| None),
                    None => Ok(None),
                }
            }
            HardwareEvent::DeviceDisconnected => {
                Err(self.fail_device("camera disconnected".to_string()))
            }
            HardwareEvent::DeviceError(reason) => Err(self.fail_device(reason)),
            HardwareEvent::SessionConfigured => {
                if !self.session_pending {
                    warn!("Unexpected session-configured event ignored");
                    return Ok(None);
                }
                self.session_pending = false;
                self.session_live = true;
                self.set_state(CaptureState::Previewing);
                self.submit_preview().map(|_| None)
            }
            HardwareEvent::SessionConfigureFailed(reason) => {
                warn!(%reason, "Capture session configuration failed");
                self.session_pending = false;
                self.outputs = None;
                Err(CoreError::HardwareUnavailable(format!(
                    "session configuration failed: {}",
                    reason
                )))
            }
            HardwareEvent::Metadata { kind, metadata } => {
                if self.state != CaptureState::AwaitingConvergence {
                    return Ok(None);
                }
                trace!(?kind, sequence = ?metadata.sequence, "Convergence metadata");
                if self.watcher.proceed(&self.profile, Some(&metadata), now) {
                    self.capture_still().map(|_| None)
                } else {
                    if kind == MetadataKind::Final {
                        trace!("Final metadata without convergence");
                    }
                    Ok(None)
                }
            }
            HardwareEvent::StillImageAvailable(bytes) => {
                debug!(bytes = bytes.len(), "Still image available");
                let stored = self.sink.store(&bytes)?;
                Ok(Some(CaptureOutcome::StillStored(stored)))
            }
            HardwareEvent::StillCaptureCompleted(id) => {
                if self.pending_still != Some(id) {
                    debug!(request = %id, "Completion for unknown still ignored");
                    return Ok(None);
                }
                info!(request = %id, "Still capture completed");
                self.pending_still = None;
                self.unlock_focus()?;
                Ok(Some(CaptureOutcome::StillCompleted(id)))
            }
            HardwareEvent::StillCaptureFailed { request, reason } => {
                if self.pending_still != Some(request) {
                    debug!(%request, "Failure for unknown still ignored");
                    return Ok(None);
                }
                warn!(%request, %reason, "Still capture failed");
                self.pending_still = None;
                // Cleanup errors are secondary to the capture failure
                if let Err(e) = self.unlock_focus() {
                    warn!(error = %e, "Failed to reset focus after capture failure");
                }
                Err(CoreError::CaptureFailed(reason))
            }
        }
    }

    /// Force the still once the convergence wait exceeds its bound even when
    /// no metadata arrives
    pub fn poll_convergence(&mut self, now: Instant) -> CoreResult<()> {
        if self.state != CaptureState::AwaitingConvergence {
            return Ok(());
        }
        if self.watcher.proceed(&self.profile, None, now) {
            self.capture_still()?;
        }
        Ok(())
    }

    // ===== Still capture =====

    /// Start the still capture flow; ignored unless previewing with no still
    /// in flight
    pub fn request_still_capture(&mut self, now: Instant) -> CoreResult<()> {
        if self.state != CaptureState::Previewing {
            debug!(state = %self.state, "Still capture ignored");
            return Ok(());
        }
        if let Some(pending) = self.pending_still {
            debug!(request = %pending, "Still capture ignored, previous still in flight");
            return Ok(());
        }

        let trigger_af = !self.profile.is_fixed_focus();
        let precapture = self.profile.supports_precapture_metering();

        if !trigger_af && !precapture {
            debug!("Fixed focus without metering, capturing directly");
            return self.capture_still();
        }

        let mut request = self.preview_request()?;
        if trigger_af {
            request = request.with_af_trigger(AfTrigger::Start);
        }
        if precapture {
            request = request.with_precapture_trigger(PrecaptureTrigger::Start);
        }
        debug!(trigger_af, precapture, "Preparing for still capture");

        self.hardware.submit_once(&request).map_err(|e| {
            CoreError::CaptureFailed(format!("precapture trigger rejected: {}", e))
        })?;
        self.af_triggered = trigger_af;
        self.watcher.arm(now);
        self.set_state(CaptureState::AwaitingConvergence);
        Ok(())
    }

    /// Submit the one still request and return to preview
    fn capture_still(&mut self) -> CoreResult<()> {
        self.watcher.reset();
        self.set_state(CaptureState::Previewing);

        let Some(outputs) = self.outputs else {
            return Err(CoreError::CaptureFailed("no capture session".to_string()));
        };
        let request = CaptureRequestConfig::still(
            &self.profile,
            OutputTarget::StillReader(outputs.still),
            self.zoom.crop(),
            self.flash_mode,
            self.tuning.jpeg_orientation,
        );

        match self.hardware.submit_once(&request) {
            Ok(id) => {
                info!(request = %id, crop = %request.crop, "Still capture submitted");
                self.pending_still = Some(id);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Still capture submission rejected");
                if let Err(cleanup) = self.unlock_focus() {
                    warn!(error = %cleanup, "Failed to reset focus");
                }
                Err(CoreError::CaptureFailed(e.to_string()))
            }
        }
    }

    /// Release the AF lock after a still and return the preview to idle
    /// triggers
    fn unlock_focus(&mut self) -> CoreResult<()> {
        if !self.session_live {
            self.af_triggered = false;
            return Ok(());
        }
        let request = self.preview_request()?;
        if self.af_triggered {
            self.af_triggered = false;
            self.hardware
                .submit_once(&request.clone().with_af_trigger(AfTrigger::Cancel))?;
        }
        self.hardware.submit_repeating(&request)?;
        Ok(())
    }

    // ===== Requests =====

    fn preview_request(&self) -> CoreResult<CaptureRequestConfig> {
        let outputs = self
            .outputs
            .ok_or_else(|| CoreError::HardwareUnavailable("no capture session".to_string()))?;
        Ok(CaptureRequestConfig::preview(
            &self.profile,
            OutputTarget::Preview(outputs.preview),
            self.zoom.crop(),
            self.flash_mode,
        ))
    }

    fn submit_preview(&mut self) -> CoreResult<()> {
        let request = self.preview_request()?;
        trace!(crop = %request.crop, flash = ?self.flash_mode, "Submitting repeating request");
        self.hardware.submit_repeating(&request)?;
        Ok(())
    }

    fn refresh_preview(&mut self) -> CoreResult<()> {
        if self.session_live {
            self.submit_preview()
        } else {
            Ok(())
        }
    }

    // ===== User controls =====

    /// Feed one pinch sample; the new crop applies to the preview right away
    pub fn on_zoom_sample(&mut self, spacing: f32) -> CoreResult<()> {
        if self.zoom.on_gesture_sample(spacing) {
            self.refresh_preview()?;
        }
        Ok(())
    }

    pub fn on_zoom_end(&mut self) {
        self.zoom.on_gesture_end();
    }

    /// Advance to the next flash mode the hardware supports
    pub fn cycle_flash(&mut self) -> CoreResult<FlashMode> {
        let next = self.flash_mode.next(self.profile.flash_support());
        self.set_flash_mode(next)?;
        Ok(next)
    }

    pub fn set_flash_mode(&mut self, mode: FlashMode) -> CoreResult<()> {
        if self.flash_mode == mode {
            return Ok(());
        }
        info!(flash = mode.display_name(), "Flash mode changed");
        self.flash_mode = mode;
        self.refresh_preview()
    }

    /// Change the still aspect ratio and rebuild the session around it
    ///
    /// A torch selection does not survive the restart.
    pub fn set_aspect_ratio(&mut self, ratio: AspectRatio) -> CoreResult<()> {
        if self.aspect_ratio == Some(ratio) {
            return Ok(());
        }
        info!(%ratio, "Aspect ratio changed");
        self.aspect_ratio = Some(ratio);
        if self.flash_mode == FlashMode::Torch {
            self.flash_mode = self.profile.default_flash_mode();
        }

        if !(self.session_live || self.session_pending) {
            return Ok(());
        }

        if let Err(e) = self.hardware.close_session() {
            warn!(error = %e, "Failed to close session for ratio change");
        }
        if self.reader_open {
            if let Err(e) = self.hardware.close_image_reader() {
                warn!(error = %e, "Failed to close image reader for ratio change");
            }
            self.reader_open = false;
        }
        self.session_live = false;
        self.session_pending = false;
        self.outputs = None;
        self.pending_still = None;
        self.af_triggered = false;
        self.watcher.reset();
        self.set_state(CaptureState::Opened);

        match self.preview_surface {
            Some(surface) => self.configure_session(surface),
            None => Ok(()),
        }
    }
}

impl<H: CameraHardware> Drop for CaptureStateMachine<H> {
    fn drop(&mut self) {
        if self.state != CaptureState::Closed || self.opening {
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::{BackendError, FrameMetadata, Rect};
    use crate::capture::profile::{AeMode, AfMode, HardwareLevel};
    use crate::capture::request::RequestTemplate;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        OpenDevice(String),
        CloseDevice,
        OpenReader(Size),
        CloseReader,
        CreateSession(Vec<OutputTarget>),
        CloseSession,
        Repeating(CaptureRequestConfig),
        Once(CaptureRequestConfig),
    }

    #[derive(Default)]
    struct FakeHardware {
        calls: Vec<Call>,
        next_id: u64,
        fail_open: bool,
        fail_close_session: bool,
    }

    impl FakeHardware {
        fn stills(&self) -> Vec<&CaptureRequestConfig> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::Once(r) if r.template == RequestTemplate::StillCapture => Some(r),
                    _ => None,
                })
                .collect()
        }

        fn triggers(&self) -> Vec<&CaptureRequestConfig> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::Once(r) if r.template == RequestTemplate::Preview => Some(r),
                    _ => None,
                })
                .collect()
        }
    }

    impl CameraHardware for FakeHardware {
        fn open_device(&mut self, camera_id: &str) -> BackendResult<()> {
            self.calls.push(Call::OpenDevice(camera_id.to_string()));
            if self.fail_open {
                return Err(BackendError::DeviceInUse(camera_id.to_string()));
            }
            Ok(())
        }

        fn close_device(&mut self) -> BackendResult<()> {
            self.calls.push(Call::CloseDevice);
            Ok(())
        }

        fn open_image_reader(&mut self, size: Size) -> BackendResult<()> {
            self.calls.push(Call::OpenReader(size));
            Ok(())
        }

        fn close_image_reader(&mut self) -> BackendResult<()> {
            self.calls.push(Call::CloseReader);
            Ok(())
        }

        fn create_session(&mut self, outputs: &[OutputTarget]) -> BackendResult<()> {
            self.calls.push(Call::CreateSession(outputs.to_vec()));
            Ok(())
        }

        fn close_session(&mut self) -> BackendResult<()> {
            self.calls.push(Call::CloseSession);
            if self.fail_close_session {
                return Err(BackendError::Other("session stuck".into()));
            }
            Ok(())
        }

        fn submit_repeating(&mut self, request: &CaptureRequestConfig) -> BackendResult<()> {
            self.calls.push(Call::Repeating(request.clone()));
            Ok(())
        }

        fn submit_once(&mut self, request: &CaptureRequestConfig) -> BackendResult<RequestId> {
            self.calls.push(Call::Once(request.clone()));
            self.next_id += 1;
            Ok(RequestId(self.next_id))
        }
    }

    #[derive(Default, Clone)]
    struct MemorySink(Arc<Mutex<Vec<Vec<u8>>>>);

    impl StillImageSink for MemorySink {
        fn store(&mut self, encoded: &[u8]) -> CoreResult<StoredStill> {
            let mut stored = self.0.lock().unwrap();
            stored.push(encoded.to_vec());
            Ok(StoredStill {
                location: format!("memory/{}", stored.len()).into(),
                bytes: encoded.len(),
            })
        }
    }

    fn profile(min_focus: f32, level: HardwareLevel) -> Arc<DeviceProfile> {
        Arc::new(
            DeviceProfile::builder()
                .camera_id("0")
                .active_array(Rect::from_size(4000, 3000))
                .min_focus_distance(min_focus)
                .af_modes([AfMode::Auto, AfMode::ContinuousPicture])
                .ae_modes([AeMode::On, AeMode::OnAutoFlash])
                .max_digital_zoom(4.0)
                .flash_available(true)
                .hardware_level(level)
                .still_sizes([Size::new(4000, 3000), Size::new(1920, 1080)])
                .preview_sizes([Size::new(1440, 1080), Size::new(1920, 1080)])
                .build()
                .unwrap(),
        )
    }

    fn machine(profile: Arc<DeviceProfile>) -> CaptureStateMachine<FakeHardware> {
        CaptureStateMachine::new(
            FakeHardware::default(),
            profile,
            Arc::new(OpenCloseLock::new()),
            Box::new(MemorySink::default()),
            CaptureTuning::default(),
        )
    }

    const SURFACE: Size = Size::new(1080, 1920);

    fn previewing(profile: Arc<DeviceProfile>) -> CaptureStateMachine<FakeHardware> {
        let mut sm = machine(profile);
        let now = Instant::now();
        sm.start_preview(SURFACE).unwrap();
        sm.open().unwrap();
        sm.handle_event(HardwareEvent::DeviceOpened, now).unwrap();
        sm.handle_event(HardwareEvent::SessionConfigured, now).unwrap();
        assert_eq!(sm.state(), CaptureState::Previewing);
        sm
    }

    fn metadata(metadata: FrameMetadata) -> HardwareEvent {
        HardwareEvent::Metadata {
            kind: MetadataKind::Final,
            metadata,
        }
    }

    #[test]
    fn test_open_holds_lock_until_device_answers() {
        let mut sm = machine(profile(10.0, HardwareLevel::Full));
        sm.open().unwrap();
        assert!(sm.lock.is_held());
        assert_eq!(sm.state(), CaptureState::Closed);

        sm.handle_event(HardwareEvent::DeviceOpened, Instant::now())
            .unwrap();
        assert!(!sm.lock.is_held());
        assert_eq!(sm.state(), CaptureState::Opened);
    }

    #[test]
    fn test_open_starts_preview_when_surface_ready() {
        let sm = previewing(profile(10.0, HardwareLevel::Full));
        let calls = &sm.hardware().calls;
        assert!(calls.contains(&Call::OpenReader(Size::new(1920, 1080))));
        assert!(matches!(calls.last(), Some(Call::Repeating(_))));
    }

    #[test]
    fn test_rejected_open_releases_lock() {
        let mut sm = machine(profile(10.0, HardwareLevel::Full));
        sm.hardware_mut().fail_open = true;
        let err = sm.open().unwrap_err();
        assert!(matches!(err, CoreError::HardwareUnavailable(_)));
        assert!(!sm.lock.is_held());
        assert_eq!(sm.state(), CaptureState::Closed);
    }

    #[test]
    fn test_lock_timeout_is_reported() {
        let lock = Arc::new(OpenCloseLock::new());
        assert!(lock.try_acquire_for(Duration::from_millis(1)));
        let mut sm = CaptureStateMachine::new(
            FakeHardware::default(),
            profile(10.0, HardwareLevel::Full),
            Arc::clone(&lock),
            Box::new(MemorySink::default()),
            CaptureTuning {
                lock_timeout: Duration::from_millis(20),
                ..CaptureTuning::default()
            },
        );
        let err = sm.open().unwrap_err();
        assert!(matches!(err, CoreError::ResourceAcquisitionTimeout(_)));
        assert!(sm.hardware().calls.is_empty());
        lock.release();
    }

    #[test]
    fn test_disconnect_forces_closed() {
        let mut sm = previewing(profile(10.0, HardwareLevel::Full));
        let err = sm
            .handle_event(HardwareEvent::DeviceDisconnected, Instant::now())
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(sm.state(), CaptureState::Closed);
        assert!(!sm.lock.is_held());
    }

    #[test]
    fn test_session_failure_stays_opened() {
        let mut sm = machine(profile(10.0, HardwareLevel::Full));
        let now = Instant::now();
        sm.start_preview(SURFACE).unwrap();
        sm.open().unwrap();
        sm.handle_event(HardwareEvent::DeviceOpened, now).unwrap();
        let err = sm
            .handle_event(HardwareEvent::SessionConfigureFailed("busy".into()), now)
            .unwrap_err();
        assert!(matches!(err, CoreError::HardwareUnavailable(_)));
        assert_eq!(sm.state(), CaptureState::Opened);
    }

    #[test]
    fn test_still_ignored_unless_previewing() {
        let mut sm = machine(profile(10.0, HardwareLevel::Full));
        sm.request_still_capture(Instant::now()).unwrap();
        assert!(sm.hardware().calls.is_empty());
        assert_eq!(sm.state(), CaptureState::Closed);
    }

    #[test]
    fn test_converged_metadata_captures_once() {
        let mut sm = previewing(profile(10.0, HardwareLevel::Full));
        let start = Instant::now();
        sm.request_still_capture(start).unwrap();
        assert_eq!(sm.state(), CaptureState::AwaitingConvergence);

        let trigger = sm.hardware().triggers()[0].clone();
        assert_eq!(trigger.af_trigger, AfTrigger::Start);
        assert_eq!(trigger.precapture_trigger, PrecaptureTrigger::Start);

        sm.handle_event(metadata(FrameMetadata::converged()), start)
            .unwrap();
        assert_eq!(sm.state(), CaptureState::Previewing);
        // Later metadata must not trigger a second still
        sm.handle_event(metadata(FrameMetadata::converged()), start)
            .unwrap();

        let stills = sm.hardware().stills();
        assert_eq!(stills.len(), 1);
        assert_eq!(stills[0].jpeg_orientation, Some(90));
        assert!(!stills[0].has_trigger());
    }

    #[test]
    fn test_scanning_forces_capture_after_timeout() {
        let mut sm = previewing(profile(10.0, HardwareLevel::Full));
        let start = Instant::now();
        sm.request_still_capture(start).unwrap();

        for t in (0..=1000).step_by(100) {
            sm.handle_event(
                metadata(FrameMetadata::scanning()),
                start + Duration::from_millis(t),
            )
            .unwrap();
            assert_eq!(sm.state(), CaptureState::AwaitingConvergence);
        }
        sm.handle_event(
            metadata(FrameMetadata::scanning()),
            start + Duration::from_millis(1050),
        )
        .unwrap();
        assert_eq!(sm.state(), CaptureState::Previewing);
        assert_eq!(sm.hardware().stills().len(), 1);
    }

    #[test]
    fn test_poll_forces_capture_without_metadata() {
        let mut sm = previewing(profile(10.0, HardwareLevel::Full));
        let start = Instant::now();
        sm.request_still_capture(start).unwrap();
        sm.poll_convergence(start + Duration::from_millis(900))
            .unwrap();
        assert_eq!(sm.hardware().stills().len(), 0);
        sm.poll_convergence(start + Duration::from_millis(1001))
            .unwrap();
        assert_eq!(sm.hardware().stills().len(), 1);
    }

    #[test]
    fn test_fixed_focus_skips_af_trigger() {
        let mut sm = previewing(profile(0.0, HardwareLevel::Full));
        sm.request_still_capture(Instant::now()).unwrap();
        assert_eq!(sm.state(), CaptureState::AwaitingConvergence);

        let trigger = sm.hardware().triggers()[0].clone();
        assert_eq!(trigger.af_trigger, AfTrigger::Idle);
        assert_eq!(trigger.precapture_trigger, PrecaptureTrigger::Start);
        assert_eq!(trigger.af_mode, None);
    }

    #[test]
    fn test_fixed_focus_legacy_captures_directly() {
        let mut sm = previewing(profile(0.0, HardwareLevel::Legacy));
        sm.request_still_capture(Instant::now()).unwrap();
        assert_eq!(sm.state(), CaptureState::Previewing);
        assert!(sm.hardware().triggers().is_empty());
        assert_eq!(sm.hardware().stills().len(), 1);
    }

    #[test]
    fn test_completion_cancels_af_and_restores_preview() {
        let mut sm = previewing(profile(10.0, HardwareLevel::Full));
        let now = Instant::now();
        sm.request_still_capture(now).unwrap();
        sm.handle_event(metadata(FrameMetadata::converged()), now)
            .unwrap();

        let outcome = sm
            .handle_event(HardwareEvent::StillImageAvailable(vec![1, 2, 3]), now)
            .unwrap();
        assert!(matches!(outcome, Some(CaptureOutcome::StillStored(s)) if s.bytes == 3));

        let id = RequestId(sm.hardware().next_id);
        sm.handle_event(HardwareEvent::StillCaptureCompleted(id), now)
            .unwrap();

        let triggers = sm.hardware().triggers();
        assert_eq!(triggers.last().unwrap().af_trigger, AfTrigger::Cancel);
        match sm.hardware().calls.last() {
            Some(Call::Repeating(r)) => assert!(!r.has_trigger()),
            other => panic!("expected repeating request, got {:?}", other),
        }
    }

    #[test]
    fn test_tap_during_in_flight_still_is_ignored() {
        let mut sm = previewing(profile(10.0, HardwareLevel::Full));
        let now = Instant::now();
        sm.request_still_capture(now).unwrap();
        sm.handle_event(metadata(FrameMetadata::converged()), now)
            .unwrap();
        let first = RequestId(sm.hardware().next_id);
        let triggers_before = sm.hardware().triggers().len();

        // Second tap before the first still completes
        sm.request_still_capture(now).unwrap();
        assert_eq!(sm.state(), CaptureState::Previewing);
        assert_eq!(sm.hardware().triggers().len(), triggers_before);

        sm.handle_event(HardwareEvent::StillCaptureCompleted(first), now)
            .unwrap();
        assert_eq!(
            sm.hardware().triggers().last().unwrap().af_trigger,
            AfTrigger::Cancel
        );

        // Once the first still is done a new tap starts a fresh AF scan
        sm.request_still_capture(now).unwrap();
        assert_eq!(sm.state(), CaptureState::AwaitingConvergence);
        assert_eq!(
            sm.hardware().triggers().last().unwrap().af_trigger,
            AfTrigger::Start
        );
        sm.handle_event(metadata(FrameMetadata::converged()), now)
            .unwrap();
        assert_eq!(sm.hardware().stills().len(), 2);
        let second = RequestId(sm.hardware().next_id);
        sm.handle_event(HardwareEvent::StillCaptureCompleted(second), now)
            .unwrap();
        assert_eq!(
            sm.hardware().triggers().last().unwrap().af_trigger,
            AfTrigger::Cancel
        );
    }

    #[test]
    fn test_preview_size_respects_configured_bounds() {
        let profile = Arc::new(
            DeviceProfile::builder()
                .camera_id("0")
                .active_array(Rect::from_size(4000, 3000))
                .min_focus_distance(10.0)
                .af_modes([AfMode::Auto])
                .ae_modes([AeMode::On])
                .max_digital_zoom(4.0)
                .hardware_level(HardwareLevel::Full)
                .still_sizes([Size::new(1920, 1080)])
                .preview_sizes([Size::new(1920, 1080), Size::new(1280, 720)])
                .build()
                .unwrap(),
        );
        let mut sm = CaptureStateMachine::new(
            FakeHardware::default(),
            profile,
            Arc::new(OpenCloseLock::new()),
            Box::new(MemorySink::default()),
            CaptureTuning {
                max_preview: Size::new(720, 1280),
                ..CaptureTuning::default()
            },
        );
        sm.start_preview(SURFACE).unwrap();
        sm.open().unwrap();
        sm.handle_event(HardwareEvent::DeviceOpened, Instant::now())
            .unwrap();

        assert!(sm.hardware().calls.contains(&Call::CreateSession(vec![
            OutputTarget::Preview(Size::new(1280, 720)),
            OutputTarget::StillReader(Size::new(1920, 1080)),
        ])));
    }

    #[test]
    fn test_disconnect_logs_and_survives_close_failures() {
        let mut sm = previewing(profile(10.0, HardwareLevel::Full));
        sm.hardware_mut().fail_close_session = true;
        sm.hardware_mut().calls.clear();
        let err = sm
            .handle_event(HardwareEvent::DeviceDisconnected, Instant::now())
            .unwrap_err();
        assert!(matches!(err, CoreError::HardwareUnavailable(_)));
        assert_eq!(
            sm.hardware().calls,
            vec![Call::CloseSession, Call::CloseDevice, Call::CloseReader]
        );
        assert!(!sm.lock.is_held());
    }

    #[test]
    fn test_failed_capture_still_resets_focus() {
        let mut sm = previewing(profile(10.0, HardwareLevel::Full));
        let now = Instant::now();
        sm.request_still_capture(now).unwrap();
        sm.handle_event(metadata(FrameMetadata::converged()), now)
            .unwrap();
        let id = RequestId(sm.hardware().next_id);

        let err = sm
            .handle_event(
                HardwareEvent::StillCaptureFailed {
                    request: id,
                    reason: "sensor error".into(),
                },
                now,
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::CaptureFailed(_)));
        assert_eq!(
            sm.hardware().triggers().last().unwrap().af_trigger,
            AfTrigger::Cancel
        );
        assert_eq!(sm.state(), CaptureState::Previewing);
    }

    #[test]
    fn test_zoom_applies_to_requests() {
        let mut sm = previewing(profile(10.0, HardwareLevel::Full));
        sm.on_zoom_sample(100.0).unwrap();
        for i in 1..=40 {
            sm.on_zoom_sample(100.0 + i as f32).unwrap();
        }
        let crop = sm.zoom().crop();
        assert_ne!(crop, Rect::from_size(4000, 3000));
        match sm.hardware().calls.last() {
            Some(Call::Repeating(r)) => assert_eq!(r.crop, crop),
            other => panic!("expected repeating request, got {:?}", other),
        }
    }

    #[test]
    fn test_close_order_and_idempotence() {
        let mut sm = previewing(profile(10.0, HardwareLevel::Full));
        sm.hardware_mut().calls.clear();
        sm.close().unwrap();
        assert_eq!(
            sm.hardware().calls,
            vec![Call::CloseSession, Call::CloseDevice, Call::CloseReader]
        );
        assert_eq!(sm.state(), CaptureState::Closed);
        assert!(!sm.lock.is_held());

        sm.hardware_mut().calls.clear();
        sm.close().unwrap();
        assert!(sm.hardware().calls.is_empty());
    }

    #[test]
    fn test_close_releases_lock_after_failure() {
        let mut sm = previewing(profile(10.0, HardwareLevel::Full));
        sm.hardware_mut().fail_close_session = true;
        assert!(sm.close().is_err());
        assert!(sm.hardware().calls.contains(&Call::CloseReader));
        assert!(!sm.lock.is_held());
        assert_eq!(sm.state(), CaptureState::Closed);
    }

    #[test]
    fn test_close_during_open_does_not_deadlock() {
        let mut sm = machine(profile(10.0, HardwareLevel::Full));
        sm.open().unwrap();
        sm.close().unwrap();
        assert!(!sm.lock.is_held());
        assert!(sm.hardware().calls.contains(&Call::CloseDevice));
    }

    #[test]
    fn test_ratio_change_restarts_session_and_drops_torch() {
        let mut sm = previewing(profile(10.0, HardwareLevel::Full));
        sm.set_flash_mode(FlashMode::Torch).unwrap();
        sm.set_aspect_ratio(AspectRatio::STANDARD).unwrap();

        assert_eq!(sm.flash_mode(), FlashMode::Auto);
        assert_eq!(sm.state(), CaptureState::Opened);
        assert!(sm.hardware().calls.contains(&Call::OpenReader(Size::new(4000, 3000))));

        sm.handle_event(HardwareEvent::SessionConfigured, Instant::now())
            .unwrap();
        assert_eq!(sm.state(), CaptureState::Previewing);
    }
}
