// SPDX-License-Identifier: MPL-2.0

//! Integration tests running a full session against the virtual camera

use aicamera::backends::camera::OpenCloseLock;
use aicamera::backends::camera::types::Size;
use aicamera::backends::virtual_camera::{
    COLOR_LABELS, DominantColorEngine, SyntheticFrameSource, VirtualCamera, VirtualCameraSettings,
};
use aicamera::capture::{AspectRatio, CaptureState};
use aicamera::flash::FlashMode;
use aicamera::frame_processor::{FrameSource, SchedulerTuning};
use aicamera::frame_processor::tasks::{Classifier, ClassifierOptions, ModelClassifier};
use aicamera::session::{
    CameraSession, ClassifierFactory, PermissionGate, SessionHandle, SessionNotice,
    SessionServices, SessionSettings,
};
use aicamera::storage::DirectorySink;
use image::RgbaImage;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SURFACE: Size = Size::new(1080, 1440);
const WAIT: Duration = Duration::from_secs(5);

fn output_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("aicamera-session-{}-{}", name, std::process::id()))
}

fn color_classifier() -> ClassifierFactory {
    Box::new(|| {
        let labels = COLOR_LABELS.iter().map(|l| l.to_string()).collect();
        let classifier = ModelClassifier::construct(
            &[],
            labels,
            ClassifierOptions::default(),
            |_, _| Ok(DominantColorEngine),
        )?;
        Ok(Box::new(classifier) as Box<dyn Classifier>)
    })
}

/// Synthetic preview that remembers every size it was asked for
struct RecordingFrames {
    inner: SyntheticFrameSource,
    sizes: Arc<Mutex<Vec<Size>>>,
}

impl FrameSource for RecordingFrames {
    fn frame_at(&mut self, size: Size) -> Option<RgbaImage> {
        self.sizes.lock().unwrap().push(size);
        self.inner.frame_at(size)
    }
}

fn spawn(
    dir: PathBuf,
    permissions: PermissionGate,
    camera: VirtualCameraSettings,
) -> SessionHandle {
    spawn_with_frames(dir, permissions, camera, Box::new(SyntheticFrameSource::default()))
}

fn spawn_with_frames(
    dir: PathBuf,
    permissions: PermissionGate,
    camera: VirtualCameraSettings,
    frames: Box<dyn FrameSource>,
) -> SessionHandle {
    let settings = SessionSettings {
        scheduler: SchedulerTuning {
            interval: Duration::from_millis(100),
            ..SchedulerTuning::default()
        },
        permission_wait: Duration::from_secs(2),
        ..SessionSettings::default()
    };
    let services = SessionServices {
        sink: Box::new(DirectorySink::new(dir)),
        frames,
        classifier: Some(color_classifier()),
        permissions,
        lock: Arc::new(OpenCloseLock::new()),
    };
    CameraSession::spawn(
        Arc::new(VirtualCamera::sample_profile().unwrap()),
        settings,
        services,
        move |events| VirtualCamera::new(events, camera),
    )
}

async fn wait_for_state(handle: &SessionHandle, wanted: CaptureState) {
    let mut state = handle.state();
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == wanted))
        .await
        .expect("timed out waiting for state")
        .expect("worker exited");
}

async fn next_saved(
    notices: &mut tokio::sync::mpsc::UnboundedReceiver<SessionNotice>,
) -> PathBuf {
    loop {
        let notice = tokio::time::timeout(WAIT, notices.recv())
            .await
            .expect("timed out waiting for a notice")
            .expect("worker exited");
        match notice {
            SessionNotice::StillSaved(stored) => return stored.location,
            SessionNotice::Error(e) => panic!("session error: {}", e),
        }
    }
}

#[tokio::test]
async fn test_still_is_written_after_focus_locks() {
    let dir = output_dir("still");
    let mut handle = spawn(dir.clone(), PermissionGate::granted(), VirtualCameraSettings::default());
    let mut notices = handle.take_notices().unwrap();

    handle.surface_available(SURFACE);
    handle.open();
    wait_for_state(&handle, CaptureState::Previewing).await;

    handle.capture_still();
    let path = next_saved(&mut notices).await;
    assert!(path.starts_with(&dir));
    let bytes = std::fs::read(&path).unwrap();
    // JPEG start-of-image marker
    assert_eq!(&bytes[..2], &[0xFF, 0xD8]);

    wait_for_state(&handle, CaptureState::Previewing).await;
    handle.shutdown();
    assert!(!handle.is_running());
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_still_is_forced_when_focus_never_locks() {
    let dir = output_dir("forced");
    let camera = VirtualCameraSettings {
        focus_frames: None,
        ..VirtualCameraSettings::default()
    };
    let mut handle = spawn(dir.clone(), PermissionGate::granted(), camera);
    let mut notices = handle.take_notices().unwrap();

    handle.surface_available(SURFACE);
    handle.open();
    wait_for_state(&handle, CaptureState::Previewing).await;

    let started = std::time::Instant::now();
    handle.capture_still();
    next_saved(&mut notices).await;
    assert!(started.elapsed() >= Duration::from_millis(1000));

    handle.shutdown();
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_labels_published_while_armed() {
    let mut handle = spawn(
        output_dir("labels"),
        PermissionGate::granted(),
        VirtualCameraSettings::default(),
    );
    handle.surface_available(SURFACE);
    handle.open();
    wait_for_state(&handle, CaptureState::Previewing).await;

    let mut label = handle.label();
    handle.arm_classification();
    tokio::time::timeout(WAIT, label.wait_for(Option::is_some))
        .await
        .expect("no label published")
        .expect("worker exited");
    let result = label.borrow().clone().unwrap();
    assert!(result.confidence >= 0.2);

    handle.disarm_classification();
    handle.shutdown();
}

#[tokio::test]
async fn test_denied_permission_keeps_camera_closed() {
    let gate = PermissionGate::new();
    gate.deny();
    let mut handle = spawn(output_dir("denied"), gate, VirtualCameraSettings::default());
    let mut notices = handle.take_notices().unwrap();

    handle.open();
    let notice = tokio::time::timeout(WAIT, notices.recv())
        .await
        .expect("timed out waiting for a notice")
        .expect("worker exited");
    assert!(matches!(notice, SessionNotice::Error(ref e) if e.is_fatal()));
    assert_eq!(*handle.state().borrow(), CaptureState::Closed);

    handle.shutdown();
}

#[tokio::test]
async fn test_zoom_indicator_hides_after_dwell() {
    let mut handle = spawn(
        output_dir("zoom"),
        PermissionGate::granted(),
        VirtualCameraSettings::default(),
    );
    handle.surface_available(SURFACE);
    handle.open();
    wait_for_state(&handle, CaptureState::Previewing).await;

    let mut zoom = handle.zoom_indicator();
    for step in 0..20 {
        handle.zoom_sample(100.0 + step as f32 * 10.0);
    }
    tokio::time::timeout(WAIT, zoom.wait_for(|z| z.visible && z.progress > 0))
        .await
        .expect("indicator never shown")
        .expect("worker exited");

    handle.zoom_end();
    tokio::time::timeout(WAIT, zoom.wait_for(|z| !z.visible))
        .await
        .expect("indicator never hidden")
        .expect("worker exited");

    handle.shutdown();
}

#[tokio::test]
async fn test_classification_follows_selected_aspect_ratio() {
    let sizes = Arc::new(Mutex::new(Vec::new()));
    let frames = RecordingFrames {
        inner: SyntheticFrameSource::default(),
        sizes: Arc::clone(&sizes),
    };
    let mut handle = spawn_with_frames(
        output_dir("ratio-view"),
        PermissionGate::granted(),
        VirtualCameraSettings::default(),
        Box::new(frames),
    );
    // 9:16 display, 4:3 stills: the visible view is 1080x1440 and is only
    // scaled, never cropped
    handle.surface_available(Size::new(1080, 1920));
    handle.open();
    wait_for_state(&handle, CaptureState::Previewing).await;

    handle.set_aspect_ratio(AspectRatio::STANDARD);
    let mut label = handle.label();
    handle.arm_classification();
    tokio::time::timeout(WAIT, label.wait_for(Option::is_some))
        .await
        .expect("no label published")
        .expect("worker exited");
    handle.disarm_classification();
    handle.shutdown();

    let options = ClassifierOptions::default();
    let input = Size::new(options.input_width, options.input_height);
    let requested = sizes.lock().unwrap().clone();
    assert!(!requested.is_empty());
    assert!(
        requested.iter().all(|size| *size == input),
        "frame requests = {:?}",
        requested
    );
}

#[tokio::test]
async fn test_cycling_aspect_ratio_restarts_session_and_drops_torch() {
    let dir = output_dir("ratio-cycle");
    let mut handle = spawn(dir.clone(), PermissionGate::granted(), VirtualCameraSettings::default());
    let mut notices = handle.take_notices().unwrap();

    handle.surface_available(Size::new(1080, 1920));
    handle.open();
    wait_for_state(&handle, CaptureState::Previewing).await;

    let mut flash = handle.flash_mode();
    for _ in 0..5 {
        if *flash.borrow_and_update() == FlashMode::Torch {
            break;
        }
        handle.cycle_flash();
        tokio::time::timeout(WAIT, flash.changed())
            .await
            .expect("flash mode never changed")
            .expect("worker exited");
    }
    assert_eq!(*flash.borrow(), FlashMode::Torch);

    // 16:9 screen cycles to 4:3 next
    handle.cycle_aspect_ratio();
    tokio::time::timeout(WAIT, flash.wait_for(|mode| *mode != FlashMode::Torch))
        .await
        .expect("torch survived the ratio change")
        .expect("worker exited");
    assert_eq!(*flash.borrow(), FlashMode::Auto);
    wait_for_state(&handle, CaptureState::Previewing).await;

    handle.capture_still();
    let path = next_saved(&mut notices).await;
    assert_eq!(image::image_dimensions(&path).unwrap(), (1600, 1200));

    handle.shutdown();
    let _ = std::fs::remove_dir_all(&dir);
}
