// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! This module provides command-line functionality for:
//! - Running a simulated capture session
//! - Inspecting device profiles
//! - Printing the effective configuration

use aicamera::backends::camera::OpenCloseLock;
use aicamera::backends::camera::types::Size;
use aicamera::backends::virtual_camera::{
    COLOR_LABELS, DominantColorEngine, SyntheticFrameSource, VirtualCamera, VirtualCameraSettings,
};
use aicamera::capture::{AspectRatio, CaptureState, DeviceProfile};
use aicamera::frame_processor::tasks::{Classifier, ModelClassifier};
use aicamera::session::{
    CameraSession, ClassifierFactory, PermissionGate, SessionHandle, SessionNotice,
    SessionServices,
};
use aicamera::storage::DirectorySink;
use aicamera::{Config, CoreError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Simulated display the preview is laid out on
const SIMULATED_SURFACE: Size = Size::new(1080, 1440);

/// Upper bound on any single wait for the worker
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

pub struct SimulateOptions {
    pub stills: u32,
    pub watch_secs: u64,
    pub zoom_steps: u32,
    pub output: Option<PathBuf>,
    pub profile: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

/// Run a full session against the virtual camera
pub fn simulate(options: SimulateOptions) -> CliResult<()> {
    let config = load_config(options.config.as_deref())?;
    let profile = Arc::new(load_profile(options.profile.as_deref())?);
    let plan = options.plan();
    let output_dir = options.output.unwrap_or_else(|| config.photo_dir());

    println!("Using camera: {}", profile.camera_id());
    println!("Output directory: {}", output_dir.display());

    let services = SessionServices {
        sink: Box::new(DirectorySink::new(output_dir)),
        frames: Box::new(SyntheticFrameSource::default()),
        classifier: Some(color_classifier(&config)),
        permissions: PermissionGate::granted(),
        lock: Arc::new(OpenCloseLock::new()),
    };
    let mut handle = CameraSession::spawn(
        Arc::clone(&profile),
        config.session_settings(),
        services,
        |events| VirtualCamera::new(events, VirtualCameraSettings::default()),
    );
    let mut notices = handle
        .take_notices()
        .ok_or("Session notices already taken")?;

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(run_simulation(&handle, &mut notices, &plan));

    handle.close();
    handle.shutdown();
    result
}

struct SimulationPlan {
    stills: u32,
    watch: Duration,
    zoom_steps: u32,
}

impl SimulateOptions {
    fn plan(&self) -> SimulationPlan {
        SimulationPlan {
            stills: self.stills,
            watch: Duration::from_secs(self.watch_secs),
            zoom_steps: self.zoom_steps,
        }
    }
}

async fn run_simulation(
    handle: &SessionHandle,
    notices: &mut UnboundedReceiver<SessionNotice>,
    plan: &SimulationPlan,
) -> CliResult<()> {
    handle.open();
    handle.surface_available(SIMULATED_SURFACE);
    wait_for_state(handle, CaptureState::Previewing).await?;
    println!("Preview running");

    handle.arm_classification();
    watch_labels(handle, plan.watch).await;
    handle.disarm_classification();

    if plan.zoom_steps > 0 {
        // Fingers moving apart by 10px per update
        for step in 0..=plan.zoom_steps {
            handle.zoom_sample(100.0 + step as f32 * 10.0);
        }
        let mut zoom = handle.zoom_indicator();
        // The worker publishes once per sample; the last one is what counts
        let _ = tokio::time::timeout(STEP_TIMEOUT, zoom.changed()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let indicator = *zoom.borrow_and_update();
        handle.zoom_end();
        if indicator.visible {
            println!(
                "Zoom: {:.1}x ({}/{})",
                indicator.display_zoom, indicator.progress, indicator.max_progress
            );
        } else {
            println!("Zoom below the display baseline, indicator hidden");
        }
    }

    for index in 1..=plan.stills {
        handle.capture_still();
        match wait_for_still(notices).await? {
            Some(path) => println!("Photo {} saved: {}", index, path.display()),
            None => return Err("Session ended before the still was saved".into()),
        }
        wait_for_state(handle, CaptureState::Previewing).await?;
    }

    Ok(())
}

async fn wait_for_state(handle: &SessionHandle, wanted: CaptureState) -> CliResult<()> {
    let mut state = handle.state();
    match tokio::time::timeout(STEP_TIMEOUT, state.wait_for(|s| *s == wanted)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(_)) => Err("Session worker exited".into()),
        Err(_) => Err(format!("Timed out waiting for camera state {}", wanted).into()),
    }
}

/// Print each new label until `duration` has passed
async fn watch_labels(handle: &SessionHandle, duration: Duration) {
    let deadline = tokio::time::Instant::now() + duration;
    let mut label = handle.label();
    loop {
        match tokio::time::timeout_at(deadline, label.changed()).await {
            Ok(Ok(())) => {
                if let Some(result) = label.borrow_and_update().clone() {
                    println!("Label: {}", result);
                }
            }
            // Worker gone or time is up
            Ok(Err(_)) | Err(_) => break,
        }
    }
}

async fn wait_for_still(
    notices: &mut UnboundedReceiver<SessionNotice>,
) -> CliResult<Option<PathBuf>> {
    loop {
        let notice = tokio::time::timeout(STEP_TIMEOUT, notices.recv())
            .await
            .map_err(|_| "Timed out waiting for the still")?;
        match notice {
            Some(SessionNotice::StillSaved(stored)) => return Ok(Some(stored.location)),
            Some(SessionNotice::Error(e)) if e.is_fatal() => return Err(e.into()),
            Some(SessionNotice::Error(e)) => eprintln!("Warning: {}", e),
            None => return Ok(None),
        }
    }
}

/// Classifier over the virtual camera's color labels
fn color_classifier(config: &Config) -> ClassifierFactory {
    let options = config.classifier_options();
    Box::new(move || {
        let labels = COLOR_LABELS.iter().map(|label| label.to_string()).collect();
        let classifier =
            ModelClassifier::construct(&[], labels, options, |_, _| Ok(DominantColorEngine))?;
        Ok(Box::new(classifier) as Box<dyn Classifier>)
    })
}

/// Print a device profile and the sizes derived from it
pub fn show_profile(file: Option<&Path>) -> CliResult<()> {
    let config = Config::load_or_default();
    let profile = load_profile(file)?;

    println!("{}", serde_json::to_string_pretty(&profile)?);
    println!();
    println!("Fixed focus: {}", profile.is_fixed_focus());
    println!("Legacy hardware: {}", profile.is_legacy());
    println!("Precapture metering: {}", profile.supports_precapture_metering());
    println!("Default flash mode: {:?}", profile.default_flash_mode());
    println!();

    let supported = profile.supported_ratios();
    let ratios = [
        (AspectRatio::WIDE, supported.wide),
        (AspectRatio::STANDARD, supported.standard),
        (AspectRatio::SQUARE, supported.square),
    ];
    for (ratio, available) in ratios {
        if !available {
            println!("  {}: not supported", ratio);
            continue;
        }
        let Some(still) = profile.largest_still_size(ratio) else {
            continue;
        };
        let preview = profile
            .choose_preview_size(config.max_preview_width, config.max_preview_height, still)
            .map(|size| size.to_string())
            .unwrap_or_else(|| "none".to_string());
        println!("  {}: still {}, preview {}", ratio, still, preview);
    }

    Ok(())
}

/// Print the effective configuration
pub fn show_config(file: Option<&Path>) -> CliResult<()> {
    let config = load_config(file)?;
    match file.map(Path::to_path_buf).or_else(Config::default_path) {
        Some(path) => println!("# {}", path.display()),
        None => println!("# defaults"),
    }
    println!("{}", config.to_json_pretty()?);
    Ok(())
}

fn load_config(file: Option<&Path>) -> Result<Config, CoreError> {
    match file {
        Some(path) => Config::load(path),
        None => Ok(Config::load_or_default()),
    }
}

fn load_profile(file: Option<&Path>) -> Result<DeviceProfile, CoreError> {
    match file {
        Some(path) => {
            let json = std::fs::read_to_string(path).map_err(|e| {
                CoreError::Configuration(format!("Failed to read {}: {}", path.display(), e))
            })?;
            DeviceProfile::from_json(&json)
        }
        None => VirtualCamera::sample_profile(),
    }
}
