// SPDX-License-Identifier: GPL-3.0-only

//! Generated imagery for the virtual camera
//!
//! Frames are a diagonal gradient tinted by one of three primaries, so a
//! trivial colour "model" can label them.

use crate::backends::camera::types::Size;
use crate::errors::ClassifierError;
use crate::frame_processor::FrameSource;
use crate::frame_processor::tasks::{InferenceEngine, ModelInput, ModelOutput};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageError, Rgba, RgbaImage};

/// Labels understood by [`DominantColorEngine`], in score order
pub const COLOR_LABELS: [&str; 3] = ["red", "green", "blue"];

/// Gradient frame tinted towards `COLOR_LABELS[tint % 3]`
pub fn gradient_frame(size: Size, tint: usize) -> RgbaImage {
    let width = size.width.max(1);
    let height = size.height.max(1);
    let channel = tint % 3;
    RgbaImage::from_fn(width, height, |x, y| {
        let ramp = ((x + y) * 96 / (width + height)) as u8;
        let mut pixel = [ramp, ramp, ramp, 255];
        pixel[channel] = 160u8.saturating_add(ramp);
        Rgba(pixel)
    })
}

/// Encode an RGBA frame as JPEG (alpha dropped)
pub fn encode_jpeg(image: &RgbaImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let rgb = image::DynamicImage::ImageRgba8(image.clone()).to_rgb8();
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    encoder.encode(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(buffer)
}

/// Preview frames whose tint rotates every `frames_per_tint` grabs
#[derive(Debug, Clone)]
pub struct SyntheticFrameSource {
    grabs: usize,
    frames_per_tint: usize,
}

impl SyntheticFrameSource {
    pub fn new(frames_per_tint: usize) -> Self {
        Self {
            grabs: 0,
            frames_per_tint: frames_per_tint.max(1),
        }
    }

    pub fn current_tint(&self) -> usize {
        self.grabs / self.frames_per_tint
    }
}

impl Default for SyntheticFrameSource {
    fn default() -> Self {
        Self::new(3)
    }
}

impl FrameSource for SyntheticFrameSource {
    fn frame_at(&mut self, size: Size) -> Option<RgbaImage> {
        if size.is_empty() {
            return None;
        }
        let frame = gradient_frame(size, self.current_tint());
        self.grabs += 1;
        Some(frame)
    }
}

/// Scores each primary by its mean channel value
///
/// Serves as the inference engine of the simulated session; expects RGB
/// tensors and produces scores over [`COLOR_LABELS`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DominantColorEngine;

impl InferenceEngine for DominantColorEngine {
    fn run(&mut self, input: &ModelInput) -> Result<ModelOutput, ClassifierError> {
        let mut sums = [0f32; 3];
        let count = match input {
            ModelInput::Float(values) => {
                for (i, v) in values.iter().enumerate() {
                    // Undo (c - 127.5) / 127.5
                    sums[i % 3] += (v * 127.5 + 127.5).max(0.0);
                }
                values.len() / 3
            }
            ModelInput::Quantized(values) => {
                for (i, v) in values.iter().enumerate() {
                    sums[i % 3] += *v as f32;
                }
                values.len() / 3
            }
        };
        if count == 0 {
            return Err(ClassifierError::Inference("empty input".to_string()));
        }

        let total: f32 = sums.iter().sum::<f32>().max(f32::EPSILON);
        let scores = sums.iter().map(|s| s / total).collect::<Vec<_>>();
        match input {
            ModelInput::Float(_) => Ok(ModelOutput::Float(scores)),
            ModelInput::Quantized(_) => Ok(ModelOutput::Quantized(
                scores.iter().map(|s| (s * 255.0).round() as u8).collect(),
            )),
        }
    }
}
