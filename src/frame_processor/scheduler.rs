// SPDX-License-Identifier: GPL-3.0-only

//! Periodic classification of the live preview
//!
//! Once armed, a cycle is due every interval. Each cycle grabs the current
//! preview frame at the classifier's input geometry, classifies it and
//! publishes the label when it clears the acceptance threshold. The next cycle
//! is scheduled one interval after the current one finishes. Disarming takes
//! effect at the next cycle boundary.

use super::tasks::classifier::Classifier;
use super::types::ClassificationResult;
use crate::backends::camera::types::Size;
use crate::constants;
use image::RgbaImage;
use image::imageops;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

/// Pollable access to the current preview frame
pub trait FrameSource: Send {
    /// Current preview contents scaled to exactly `size`, or `None` when no
    /// frame is available yet
    fn frame_at(&mut self, size: Size) -> Option<RgbaImage>;
}

/// What one call to [`ClassificationScheduler::run_due`] did
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Disarmed or the interval has not elapsed
    NotDue,
    /// No classifier is loaded
    NoClassifier,
    /// The preview had no frame to offer
    NoFrame,
    /// Classification ran but nothing cleared the threshold
    Discarded(Option<ClassificationResult>),
    /// A label was published
    Published(ClassificationResult),
    /// The classifier failed on this frame
    Failed(String),
}

/// Tunables for the scheduler
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerTuning {
    pub interval: Duration,
    pub threshold: f32,
    /// Views wider than this ratio are center-cropped to a square
    pub crop_aspect_limit: f32,
}

impl Default for SchedulerTuning {
    fn default() -> Self {
        Self {
            interval: constants::timing::CLASSIFICATION_INTERVAL,
            threshold: constants::classification::ACCEPTANCE_THRESHOLD,
            crop_aspect_limit: constants::classification::CROP_ASPECT_LIMIT,
        }
    }
}

/// Frame size to request and whether to center-crop it afterwards
///
/// `view` is the on-screen preview size; `input` the classifier input size.
pub fn capture_geometry(view: Size, input: (u32, u32), crop_aspect_limit: f32) -> (Size, bool) {
    let (in_w, in_h) = input;
    if view.is_empty() {
        return (Size::new(in_w, in_h), false);
    }

    let long = view.width.max(view.height) as f32;
    let short = view.width.min(view.height) as f32;
    if long / short <= crop_aspect_limit {
        return (Size::new(in_w, in_h), false);
    }

    let capture = if view.height > view.width {
        let height = (view.height as u64 * in_w as u64 / view.width as u64) as u32;
        Size::new(in_w, height)
    } else {
        let width = (view.width as u64 * in_h as u64 / view.height as u64) as u32;
        Size::new(width, in_h)
    };
    (capture, true)
}

/// Grab a frame shaped for the classifier
pub fn prepare_frame(
    source: &mut dyn FrameSource,
    view: Size,
    input: (u32, u32),
    crop_aspect_limit: f32,
) -> Option<RgbaImage> {
    let (capture, crop) = capture_geometry(view, input, crop_aspect_limit);
    let frame = source.frame_at(capture)?;
    let frame = if frame.dimensions() != (capture.width, capture.height) {
        trace!(
            got_width = frame.width(),
            got_height = frame.height(),
            %capture,
            "Frame source returned a different size, rescaling"
        );
        imageops::resize(&frame, capture.width, capture.height, imageops::FilterType::Triangle)
    } else {
        frame
    };

    if !crop {
        return Some(frame);
    }

    let (in_w, in_h) = input;
    let x = frame.width().saturating_sub(in_w) / 2;
    let y = frame.height().saturating_sub(in_h) / 2;
    Some(imageops::crop_imm(&frame, x, y, in_w, in_h).to_image())
}

/// Armed/disarmed periodic classification
pub struct ClassificationScheduler {
    tuning: SchedulerTuning,
    classifier: Option<Box<dyn Classifier>>,
    next_due: Option<Instant>,
    publisher: watch::Sender<Option<ClassificationResult>>,
}

impl ClassificationScheduler {
    pub fn new(tuning: SchedulerTuning) -> Self {
        let (publisher, _) = watch::channel(None);
        Self {
            tuning,
            classifier: None,
            next_due: None,
            publisher,
        }
    }

    /// Receiver of the latest published label
    pub fn subscribe(&self) -> watch::Receiver<Option<ClassificationResult>> {
        self.publisher.subscribe()
    }

    pub fn latest(&self) -> Option<ClassificationResult> {
        self.publisher.borrow().clone()
    }

    pub fn set_classifier(&mut self, classifier: Box<dyn Classifier>) {
        if let Some(mut old) = self.classifier.replace(classifier) {
            old.close();
        }
    }

    pub fn has_classifier(&self) -> bool {
        self.classifier.is_some()
    }

    /// Close and drop the classifier; cycles become no-ops
    pub fn close_classifier(&mut self) {
        if let Some(mut classifier) = self.classifier.take() {
            classifier.close();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.next_due.is_some()
    }

    /// Start cycling; the first cycle is due one interval from `now`
    pub fn arm(&mut self, now: Instant) {
        if self.next_due.is_none() {
            debug!(interval_ms = self.tuning.interval.as_millis() as u64, "Classification armed");
            self.next_due = Some(now + self.tuning.interval);
        }
    }

    pub fn disarm(&mut self) {
        if self.next_due.take().is_some() {
            debug!("Classification disarmed");
        }
    }

    /// When the next cycle is due, if armed
    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    /// Run a cycle if one is due
    pub fn run_due(&mut self, now: Instant, source: &mut dyn FrameSource, view: Size) -> CycleOutcome {
        match self.next_due {
            Some(due) if now >= due => {}
            _ => return CycleOutcome::NotDue,
        }

        let started = Instant::now();
        let outcome = self.run_cycle(source, view);
        // Next wait starts after this cycle, including inference time
        self.next_due = Some(now + started.elapsed() + self.tuning.interval);
        outcome
    }

    fn run_cycle(&mut self, source: &mut dyn FrameSource, view: Size) -> CycleOutcome {
        let Some(classifier) = self.classifier.as_mut() else {
            trace!("No classifier, skipping cycle");
            return CycleOutcome::NoClassifier;
        };

        let input = classifier.input_size();
        let Some(frame) = prepare_frame(source, view, input, self.tuning.crop_aspect_limit) else {
            trace!("No preview frame available");
            return CycleOutcome::NoFrame;
        };

        let result = match classifier.classify(&frame) {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Classification failed");
                return CycleOutcome::Failed(e.to_string());
            }
        };

        match result {
            Some(result) if result.confidence >= self.tuning.threshold && !result.label.is_empty() => {
                let published = ClassificationResult::new(result.display_label(), result.confidence);
                debug!(label = %published.label, confidence = published.confidence, "Label published");
                self.publisher.send_replace(Some(published.clone()));
                CycleOutcome::Published(published)
            }
            other => {
                trace!(result = ?other, "Result below threshold discarded");
                CycleOutcome::Discarded(other)
            }
        }
    }
}

impl Default for ClassificationScheduler {
    fn default() -> Self {
        Self::new(SchedulerTuning::default())
    }
}

impl Drop for ClassificationScheduler {
    fn drop(&mut self) {
        self.close_classifier();
    }
}
