// SPDX-License-Identifier: GPL-3.0-only
//! Session worker thread lifecycle
//!
//! The worker serializes every hardware call, every request submission and
//! the classification cycles. It sleeps on its message queue until either a
//! message arrives or the earliest timer (classification cycle, convergence
//! bound, zoom indicator dwell) comes due.

use super::permissions::{PermissionGate, PermissionStatus};
use super::{SessionCommand, SessionNotice, SessionSettings};
use crate::backends::camera::types::{HardwareEvent, Size};
use crate::backends::camera::{CameraHardware, OpenCloseLock};
use crate::capture::state_machine::CaptureOutcome;
use crate::capture::{AspectRatio, CaptureState, CaptureStateMachine, DeviceProfile, ZoomIndicator};
use crate::errors::{ClassifierError, CoreError, CoreResult};
use crate::flash::FlashMode;
use crate::frame_processor::tasks::Classifier;
use crate::frame_processor::{ClassificationResult, ClassificationScheduler, CycleOutcome, FrameSource};
use crate::storage::StillImageSink;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc as notice_mpsc, watch};
use tracing::{debug, error, info, trace, warn};

/// Builds the classifier on the worker thread
pub type ClassifierFactory =
    Box<dyn FnOnce() -> Result<Box<dyn Classifier>, ClassifierError> + Send>;

enum WorkerMessage {
    Command(SessionCommand),
    Hardware(HardwareEvent),
}

/// Handle the camera driver uses to marshal callbacks onto the worker
#[derive(Clone)]
pub struct EventSender {
    sender: mpsc::Sender<WorkerMessage>,
}

impl EventSender {
    /// Queue a hardware event; returns `false` once the worker has exited
    pub fn send(&self, event: HardwareEvent) -> bool {
        self.sender.send(WorkerMessage::Hardware(event)).is_ok()
    }
}

impl std::fmt::Debug for EventSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSender").finish_non_exhaustive()
    }
}

/// Collaborators the worker owns for the lifetime of the session
pub struct SessionServices {
    pub sink: Box<dyn StillImageSink>,
    pub frames: Box<dyn FrameSource>,
    pub classifier: Option<ClassifierFactory>,
    pub permissions: PermissionGate,
    pub lock: Arc<OpenCloseLock>,
}

/// UI-side handle to a running session
///
/// Every method only queues a message and returns immediately.
pub struct SessionHandle {
    commands: mpsc::Sender<WorkerMessage>,
    state: watch::Receiver<CaptureState>,
    label: watch::Receiver<Option<ClassificationResult>>,
    zoom: watch::Receiver<ZoomIndicator>,
    flash: watch::Receiver<FlashMode>,
    notices: Option<notice_mpsc::UnboundedReceiver<SessionNotice>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl SessionHandle {
    fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(WorkerMessage::Command(command)).is_ok()
    }

    pub fn open(&self) -> bool {
        self.send(SessionCommand::Open)
    }

    pub fn surface_available(&self, size: Size) -> bool {
        self.send(SessionCommand::SurfaceAvailable(size))
    }

    pub fn surface_destroyed(&self) -> bool {
        self.send(SessionCommand::SurfaceDestroyed)
    }

    pub fn capture_still(&self) -> bool {
        self.send(SessionCommand::CaptureStill)
    }

    pub fn zoom_sample(&self, spacing: f32) -> bool {
        self.send(SessionCommand::ZoomSample(spacing))
    }

    pub fn zoom_end(&self) -> bool {
        self.send(SessionCommand::ZoomEnd)
    }

    pub fn cycle_flash(&self) -> bool {
        self.send(SessionCommand::CycleFlash)
    }

    pub fn set_aspect_ratio(&self, ratio: AspectRatio) -> bool {
        self.send(SessionCommand::SetAspectRatio(ratio))
    }

    pub fn cycle_aspect_ratio(&self) -> bool {
        self.send(SessionCommand::CycleAspectRatio)
    }

    pub fn arm_classification(&self) -> bool {
        self.send(SessionCommand::ArmClassification)
    }

    pub fn disarm_classification(&self) -> bool {
        self.send(SessionCommand::DisarmClassification)
    }

    pub fn close(&self) -> bool {
        self.send(SessionCommand::Close)
    }

    /// Sender for the camera driver's callbacks
    pub fn event_sender(&self) -> EventSender {
        EventSender {
            sender: self.commands.clone(),
        }
    }

    pub fn state(&self) -> watch::Receiver<CaptureState> {
        self.state.clone()
    }

    pub fn label(&self) -> watch::Receiver<Option<ClassificationResult>> {
        self.label.clone()
    }

    pub fn zoom_indicator(&self) -> watch::Receiver<ZoomIndicator> {
        self.zoom.clone()
    }

    pub fn flash_mode(&self) -> watch::Receiver<FlashMode> {
        self.flash.clone()
    }

    /// Notice queue; can be taken once
    pub fn take_notices(&mut self) -> Option<notice_mpsc::UnboundedReceiver<SessionNotice>> {
        self.notices.take()
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stop classification, finish any in-flight cycle, close the camera and
    /// the classifier, then wait for the worker to exit
    pub fn shutdown(&mut self) {
        self.send(SessionCommand::Shutdown);
        if let Some(handle) = self.thread_handle.take() {
            debug!("Waiting for session worker to finish");
            if let Err(e) = handle.join() {
                warn!("Session worker panicked: {:?}", e);
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!("SessionHandle dropped, stopping worker");
            self.shutdown();
        }
    }
}

/// State owned by the worker thread
pub struct CameraSession<H: CameraHardware> {
    machine: CaptureStateMachine<H>,
    scheduler: ClassificationScheduler,
    frames: Box<dyn FrameSource>,
    permissions: PermissionGate,
    settings: SessionSettings,
    surface: Option<Size>,
    indicator_hide_at: Option<Instant>,

    state_tx: watch::Sender<CaptureState>,
    zoom_tx: watch::Sender<ZoomIndicator>,
    flash_tx: watch::Sender<FlashMode>,
    notice_tx: notice_mpsc::UnboundedSender<SessionNotice>,
}

impl<H: CameraHardware + 'static> CameraSession<H> {
    /// Start the worker thread
    ///
    /// `make_hardware` runs on the worker and receives the sender the driver
    /// must use for its callbacks.
    pub fn spawn<M>(
        profile: Arc<DeviceProfile>,
        settings: SessionSettings,
        services: SessionServices,
        make_hardware: M,
    ) -> SessionHandle
    where
        M: FnOnce(EventSender) -> H + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let (state_tx, state_rx) = watch::channel(CaptureState::Closed);
        let (zoom_tx, zoom_rx) = watch::channel(ZoomIndicator::hidden(0));
        let (flash_tx, flash_rx) = watch::channel(profile.default_flash_mode());
        let (notice_tx, notice_rx) = notice_mpsc::unbounded_channel();

        let scheduler = ClassificationScheduler::new(settings.scheduler);
        let label_rx = scheduler.subscribe();
        let driver_events = EventSender { sender: tx.clone() };

        info!(camera = %profile.camera_id(), "Starting camera session worker");

        let thread_handle = thread::Builder::new()
            .name("camera-session".to_string())
            .spawn(move || {
                debug!("Session worker started");
                let SessionServices {
                    sink,
                    frames,
                    classifier,
                    permissions,
                    lock,
                } = services;

                let hardware = make_hardware(driver_events);
                let machine =
                    CaptureStateMachine::new(hardware, profile, lock, sink, settings.capture);
                let mut session = CameraSession {
                    machine,
                    scheduler,
                    frames,
                    permissions,
                    settings,
                    surface: None,
                    indicator_hide_at: None,
                    state_tx,
                    zoom_tx,
                    flash_tx,
                    notice_tx,
                };
                session.zoom_tx.send_replace(session.machine.zoom().indicator());
                session.load_classifier(classifier);
                session.run(rx);
                info!("Session worker exiting");
            });

        let thread_handle = match thread_handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!(error = %e, "Failed to spawn session worker");
                None
            }
        };

        SessionHandle {
            commands: tx,
            state: state_rx,
            label: label_rx,
            zoom: zoom_rx,
            flash: flash_rx,
            notices: Some(notice_rx),
            thread_handle,
        }
    }

    fn load_classifier(&mut self, factory: Option<ClassifierFactory>) {
        let Some(factory) = factory else {
            debug!("No classifier configured");
            return;
        };
        match factory() {
            Ok(classifier) => self.scheduler.set_classifier(classifier),
            Err(e) => {
                warn!(error = %e, "Classifier unavailable, classification disabled");
                self.notify(SessionNotice::Error(e.into()));
            }
        }
    }

    fn run(&mut self, rx: mpsc::Receiver<WorkerMessage>) {
        loop {
            let now = Instant::now();
            let wait = self
                .next_timer()
                .map(|at| at.saturating_duration_since(now))
                .unwrap_or(self.settings.idle_poll)
                .min(self.settings.idle_poll);

            match rx.recv_timeout(wait) {
                Ok(WorkerMessage::Command(SessionCommand::Shutdown)) => break,
                Ok(WorkerMessage::Command(command)) => self.handle_command(command),
                Ok(WorkerMessage::Hardware(event)) => self.handle_hardware(event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            self.fire_timers(Instant::now());
            self.publish_state();
        }
        self.teardown();
    }

    fn next_timer(&self) -> Option<Instant> {
        [
            self.scheduler.next_due(),
            self.machine
                .convergence_deadline()
                .map(|deadline| deadline + Duration::from_millis(1)),
            self.indicator_hide_at,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn fire_timers(&mut self, now: Instant) {
        let result = self.machine.poll_convergence(now);
        self.report(result);

        let view = self.classification_view();
        match self.scheduler.run_due(now, self.frames.as_mut(), view) {
            CycleOutcome::Published(result) => {
                info!(label = %result.label, confidence = result.confidence, "Classified preview");
            }
            CycleOutcome::NotDue | CycleOutcome::NoClassifier | CycleOutcome::NoFrame => {}
            other => trace!(outcome = ?other, "Classification cycle finished"),
        }

        if let Some(hide_at) = self.indicator_hide_at
            && now >= hide_at
        {
            self.indicator_hide_at = None;
            let max_progress = self.machine.zoom().indicator().max_progress;
            self.zoom_tx.send_replace(ZoomIndicator::hidden(max_progress));
        }
    }

    /// Part of the preview surface the active aspect ratio shows
    fn classification_view(&self) -> Size {
        let Some(surface) = self.surface else {
            return Size::new(0, 0);
        };
        match self.machine.active_aspect_ratio() {
            Some(ratio) => ratio.view_on(surface),
            None => surface,
        }
    }

    fn handle_command(&mut self, command: SessionCommand) {
        trace!(?command, "Session command");
        let now = Instant::now();
        let result = match command {
            SessionCommand::Open => self.open(),
            SessionCommand::SurfaceAvailable(size) => {
                self.surface = Some(size);
                self.machine.start_preview(size)
            }
            SessionCommand::SurfaceDestroyed => {
                self.surface = None;
                self.machine.surface_destroyed();
                Ok(())
            }
            SessionCommand::CaptureStill => self.machine.request_still_capture(now),
            SessionCommand::ZoomSample(spacing) => {
                let result = self.machine.on_zoom_sample(spacing);
                self.indicator_hide_at = None;
                self.zoom_tx.send_replace(self.machine.zoom().indicator());
                result
            }
            SessionCommand::ZoomEnd => {
                self.machine.on_zoom_end();
                self.indicator_hide_at = Some(now + self.settings.indicator_dwell);
                Ok(())
            }
            SessionCommand::CycleFlash => self.machine.cycle_flash().map(|_| ()),
            SessionCommand::SetAspectRatio(ratio) => self.machine.set_aspect_ratio(ratio),
            SessionCommand::CycleAspectRatio => self.cycle_aspect_ratio(),
            SessionCommand::ArmClassification => {
                self.scheduler.arm(now);
                Ok(())
            }
            SessionCommand::DisarmClassification => {
                self.scheduler.disarm();
                Ok(())
            }
            SessionCommand::Close => self.machine.close(),
            // Handled by the run loop
            SessionCommand::Shutdown => Ok(()),
        };
        self.report(result);
    }

    fn handle_hardware(&mut self, event: HardwareEvent) {
        match self.machine.handle_event(event, Instant::now()) {
            Ok(Some(CaptureOutcome::StillStored(stored))) => {
                self.notify(SessionNotice::StillSaved(stored));
            }
            Ok(_) => {}
            Err(e) => self.report(Err(e)),
        }
    }

    fn open(&mut self) -> CoreResult<()> {
        match self.permissions.wait(self.settings.permission_wait) {
            PermissionStatus::Granted => self.machine.open(),
            PermissionStatus::Denied => Err(CoreError::HardwareUnavailable(
                "camera permission denied".to_string(),
            )),
            PermissionStatus::Pending => Err(CoreError::HardwareUnavailable(
                "camera permission not granted in time".to_string(),
            )),
        }
    }

    fn cycle_aspect_ratio(&mut self) -> CoreResult<()> {
        let Some(screen) = self.surface.and_then(AspectRatio::of_size) else {
            debug!("No preview surface, aspect ratio unchanged");
            return Ok(());
        };
        let options =
            AspectRatio::options_for_screen(screen, self.machine.profile().supported_ratios());
        let current = self.machine.active_aspect_ratio().unwrap_or(screen);
        let next = options
            .iter()
            .position(|ratio| *ratio == current)
            .map(|i| options[(i + 1) % options.len()])
            .unwrap_or(screen);
        self.machine.set_aspect_ratio(next)
    }

    fn report(&self, result: CoreResult<()>) {
        if let Err(e) = result {
            if e.is_fatal() {
                error!(error = %e, "Camera session error");
            } else {
                warn!(error = %e, "Camera session error");
            }
            self.notify(SessionNotice::Error(e));
        }
    }

    fn notify(&self, notice: SessionNotice) {
        // The UI may have dropped its receiver; nothing else to do then
        let _ = self.notice_tx.send(notice);
    }

    fn publish_state(&self) {
        let state = self.machine.state();
        self.state_tx.send_if_modified(|current| {
            if *current != state {
                *current = state;
                true
            } else {
                false
            }
        });
        let flash = self.machine.flash_mode();
        self.flash_tx.send_if_modified(|current| {
            if *current != flash {
                *current = flash;
                true
            } else {
                false
            }
        });
    }

    fn teardown(&mut self) {
        self.scheduler.disarm();
        let result = self.machine.close();
        self.report(result);
        self.scheduler.close_classifier();
        self.publish_state();
    }
}
