// SPDX-License-Identifier: GPL-3.0-only

//! Image classifier
//!
//! The model itself is opaque: an [`InferenceEngine`] takes a normalized
//! input tensor and returns one score per label. [`ModelClassifier`] owns the
//! engine and the label list, prepares input tensors from RGBA frames and
//! ranks the scores.

use crate::constants;
use crate::errors::ClassifierError;
use crate::frame_processor::types::ClassificationResult;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, trace};

/// Preferred execution device for the inference engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Accelerator {
    #[default]
    Cpu,
    Gpu,
    Npu,
}

/// Fixed model contract and ranking knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierOptions {
    pub input_width: u32,
    pub input_height: u32,
    /// Model takes raw bytes and produces byte scores
    pub quantized: bool,
    pub image_mean: f32,
    pub image_std: f32,
    /// Scores must be strictly above this to be reported
    pub threshold: f32,
    pub max_results: usize,
    pub num_threads: u32,
    pub accelerator: Accelerator,
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        Self {
            input_width: constants::classification::INPUT_SIZE,
            input_height: constants::classification::INPUT_SIZE,
            quantized: false,
            image_mean: constants::classification::IMAGE_MEAN,
            image_std: constants::classification::IMAGE_STD,
            threshold: constants::classification::ACCEPTANCE_THRESHOLD,
            max_results: 1,
            num_threads: constants::classification::NUM_THREADS,
            accelerator: Accelerator::default(),
        }
    }
}

impl ClassifierOptions {
    pub fn input_size(&self) -> (u32, u32) {
        (self.input_width, self.input_height)
    }
}

/// Input tensor in HWC RGB order
#[derive(Debug, Clone, PartialEq)]
pub enum ModelInput {
    Float(Vec<f32>),
    Quantized(Vec<u8>),
}

impl ModelInput {
    pub fn len(&self) -> usize {
        match self {
            ModelInput::Float(values) => values.len(),
            ModelInput::Quantized(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Raw per-label scores
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    Float(Vec<f32>),
    Quantized(Vec<u8>),
}

impl ModelOutput {
    /// Scores as probabilities; byte scores are scaled by 1/255
    pub fn scores(&self) -> Vec<f32> {
        match self {
            ModelOutput::Float(values) => values.clone(),
            ModelOutput::Quantized(values) => values.iter().map(|v| *v as f32 / 255.0).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ModelOutput::Float(values) => values.len(),
            ModelOutput::Quantized(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Opaque inference backend
pub trait InferenceEngine: Send {
    fn run(&mut self, input: &ModelInput) -> Result<ModelOutput, ClassifierError>;

    /// Free engine resources; the engine is not used afterwards
    fn close(&mut self) {}
}

impl<F> InferenceEngine for F
where
    F: FnMut(&ModelInput) -> Result<ModelOutput, ClassifierError> + Send,
{
    fn run(&mut self, input: &ModelInput) -> Result<ModelOutput, ClassifierError> {
        self(input)
    }
}

/// What the classification scheduler needs from a classifier
pub trait Classifier: Send {
    /// Width and height the input image must have
    fn input_size(&self) -> (u32, u32);

    /// Best label above the acceptance threshold, if any
    fn classify(&mut self, image: &RgbaImage) -> Result<Option<ClassificationResult>, ClassifierError>;

    fn close(&mut self);
}

/// Classifier over a label list and an inference engine
pub struct ModelClassifier<E: InferenceEngine> {
    engine: Option<E>,
    labels: Vec<String>,
    options: ClassifierOptions,
}

/// Parse a label list, one label per line
pub fn parse_labels(text: &str) -> Result<Vec<String>, ClassifierError> {
    let labels: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    if labels.is_empty() {
        return Err(ClassifierError::InvalidLabels("label list is empty".to_string()));
    }
    Ok(labels)
}

impl<E: InferenceEngine> ModelClassifier<E> {
    /// Build from in-memory model bytes and labels
    ///
    /// `load` turns the model bytes into an engine and may fail.
    pub fn construct<L>(
        model: &[u8],
        labels: Vec<String>,
        options: ClassifierOptions,
        load: L,
    ) -> Result<Self, ClassifierError>
    where
        L: FnOnce(&[u8], &ClassifierOptions) -> Result<E, ClassifierError>,
    {
        if labels.is_empty() {
            return Err(ClassifierError::InvalidLabels("label list is empty".to_string()));
        }
        if options.input_width == 0 || options.input_height == 0 {
            return Err(ClassifierError::InvalidModel(format!(
                "input size {}x{} is empty",
                options.input_width, options.input_height
            )));
        }

        let engine = load(model, &options)?;
        info!(
            labels = labels.len(),
            input_width = options.input_width,
            input_height = options.input_height,
            quantized = options.quantized,
            threads = options.num_threads,
            accelerator = ?options.accelerator,
            "Classifier loaded"
        );
        Ok(Self {
            engine: Some(engine),
            labels,
            options,
        })
    }

    /// Build from a model file and a label file
    pub fn from_files<L>(
        model_path: &Path,
        labels_path: &Path,
        options: ClassifierOptions,
        load: L,
    ) -> Result<Self, ClassifierError>
    where
        L: FnOnce(&[u8], &ClassifierOptions) -> Result<E, ClassifierError>,
    {
        debug!(model = %model_path.display(), labels = %labels_path.display(), "Loading classifier");
        let model = std::fs::read(model_path).map_err(|e| {
            ClassifierError::Io(format!("{}: {}", model_path.display(), e))
        })?;
        let labels = std::fs::read_to_string(labels_path).map_err(|e| {
            ClassifierError::Io(format!("{}: {}", labels_path.display(), e))
        })?;
        Self::construct(&model, parse_labels(&labels)?, options, load)
    }

    pub fn options(&self) -> &ClassifierOptions {
        &self.options
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn is_closed(&self) -> bool {
        self.engine.is_none()
    }

    /// Normalize an image into the model's input tensor
    pub fn prepare_input(&self, image: &RgbaImage) -> Result<ModelInput, ClassifierError> {
        let expected = self.options.input_size();
        let actual = image.dimensions();
        if actual != expected {
            return Err(ClassifierError::InputMismatch { expected, actual });
        }

        let pixels = image.pixels();
        if self.options.quantized {
            let mut data = Vec::with_capacity((actual.0 * actual.1 * 3) as usize);
            for pixel in pixels {
                data.extend_from_slice(&pixel.0[..3]);
            }
            Ok(ModelInput::Quantized(data))
        } else {
            let mean = self.options.image_mean;
            let std = self.options.image_std;
            let mut data = Vec::with_capacity((actual.0 * actual.1 * 3) as usize);
            for pixel in pixels {
                for channel in &pixel.0[..3] {
                    data.push((*channel as f32 - mean) / std);
                }
            }
            Ok(ModelInput::Float(data))
        }
    }

    /// Up to `n` labels scoring above the threshold, best first
    pub fn classify_top(
        &mut self,
        image: &RgbaImage,
        n: usize,
    ) -> Result<Vec<ClassificationResult>, ClassifierError> {
        let input = self.prepare_input(image)?;
        let engine = self.engine.as_mut().ok_or(ClassifierError::Closed)?;

        let start = std::time::Instant::now();
        let output = engine.run(&input)?;
        trace!(elapsed_ms = start.elapsed().as_millis() as u64, "Inference complete");

        if output.len() != self.labels.len() {
            return Err(ClassifierError::InvalidLabels(format!(
                "model produced {} scores for {} labels",
                output.len(),
                self.labels.len()
            )));
        }

        let threshold = self.options.threshold;
        let mut ranked: Vec<ClassificationResult> = output
            .scores()
            .into_iter()
            .zip(&self.labels)
            .filter(|(score, _)| *score > threshold)
            .map(|(score, label)| ClassificationResult::new(label.clone(), score))
            .collect();
        ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        ranked.truncate(n);
        Ok(ranked)
    }
}

impl<E: InferenceEngine> Classifier for ModelClassifier<E> {
    fn input_size(&self) -> (u32, u32) {
        self.options.input_size()
    }

    fn classify(&mut self, image: &RgbaImage) -> Result<Option<ClassificationResult>, ClassifierError> {
        let results = self.classify_top(image, self.options.max_results.max(1))?;
        Ok(results.into_iter().next())
    }

    fn close(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.close();
            debug!("Classifier closed");
        }
    }
}

impl<E: InferenceEngine> Drop for ModelClassifier<E> {
    fn drop(&mut self) {
        Classifier::close(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    type ScoreFn = fn(&ModelInput) -> Result<ModelOutput, ClassifierError>;

    fn options(quantized: bool) -> ClassifierOptions {
        ClassifierOptions {
            input_width: 4,
            input_height: 4,
            quantized,
            ..ClassifierOptions::default()
        }
    }

    fn labels() -> Vec<String> {
        vec!["apple".into(), "banana".into(), "cherry".into()]
    }

    fn fixed_scores(_: &ModelInput) -> Result<ModelOutput, ClassifierError> {
        Ok(ModelOutput::Float(vec![0.15, 0.6, 0.25]))
    }

    fn classifier(engine: ScoreFn, quantized: bool) -> ModelClassifier<ScoreFn> {
        ModelClassifier::construct(b"model", labels(), options(quantized), |_, _| Ok(engine))
            .unwrap()
    }

    #[test]
    fn test_parse_labels_skips_blank_lines() {
        let labels = parse_labels("cat\n\n dog \r\n").unwrap();
        assert_eq!(labels, vec!["cat", "dog"]);
        assert!(parse_labels("\n \n").is_err());
    }

    #[test]
    fn test_float_normalization() {
        let classifier = classifier(fixed_scores, false);
        let image = RgbaImage::from_pixel(4, 4, Rgba([255, 0, 127, 9]));
        let ModelInput::Float(values) = classifier.prepare_input(&image).unwrap() else {
            panic!("expected float input");
        };
        assert_eq!(values.len(), 4 * 4 * 3);
        assert!((values[0] - 1.0).abs() < 1e-6);
        assert!((values[1] + 1.0).abs() < 1e-6);
        assert!((values[2] - (127.0 - 127.5) / 127.5).abs() < 1e-6);
    }

    #[test]
    fn test_quantized_input_is_raw_rgb() {
        let classifier = classifier(fixed_scores, true);
        let image = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 4]));
        let ModelInput::Quantized(values) = classifier.prepare_input(&image).unwrap() else {
            panic!("expected quantized input");
        };
        assert_eq!(&values[..6], &[1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn test_wrong_size_is_rejected() {
        let mut classifier = classifier(fixed_scores, false);
        let err = classifier.classify(&RgbaImage::new(8, 4)).unwrap_err();
        assert_eq!(
            err,
            ClassifierError::InputMismatch {
                expected: (4, 4),
                actual: (8, 4)
            }
        );
    }

    #[test]
    fn test_top_results_ranked_above_threshold() {
        let mut classifier = classifier(fixed_scores, false);
        let image = RgbaImage::new(4, 4);
        let top = classifier.classify_top(&image, 5).unwrap();
        let labels: Vec<_> = top.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["banana", "cherry"]);

        let best = classifier.classify(&image).unwrap().unwrap();
        assert_eq!(best.label, "banana");
    }

    #[test]
    fn test_quantized_scores_scaled() {
        fn bytes(_: &ModelInput) -> Result<ModelOutput, ClassifierError> {
            Ok(ModelOutput::Quantized(vec![0, 51, 255]))
        }
        let mut classifier = classifier(bytes, true);
        let top = classifier.classify_top(&RgbaImage::new(4, 4), 3).unwrap();
        assert_eq!(top[0].label, "cherry");
        assert!((top[0].confidence - 1.0).abs() < 1e-6);
        // 51/255 == 0.2 is not above the threshold
        assert_eq!(top.len(), 1);
    }

    #[test]
    fn test_nothing_above_threshold() {
        fn low(_: &ModelInput) -> Result<ModelOutput, ClassifierError> {
            Ok(ModelOutput::Float(vec![0.1, 0.05, 0.2]))
        }
        let mut classifier = classifier(low, false);
        assert_eq!(classifier.classify(&RgbaImage::new(4, 4)).unwrap(), None);
    }

    #[test]
    fn test_score_count_must_match_labels() {
        fn short(_: &ModelInput) -> Result<ModelOutput, ClassifierError> {
            Ok(ModelOutput::Float(vec![0.9]))
        }
        let mut classifier = classifier(short, false);
        assert!(matches!(
            classifier.classify(&RgbaImage::new(4, 4)),
            Err(ClassifierError::InvalidLabels(_))
        ));
    }

    #[test]
    fn test_closed_classifier_reports_closed() {
        let mut classifier = classifier(fixed_scores, false);
        classifier.close();
        assert!(classifier.is_closed());
        assert_eq!(
            classifier.classify(&RgbaImage::new(4, 4)).unwrap_err(),
            ClassifierError::Closed
        );
    }

    #[test]
    fn test_load_failure_propagates() {
        let result = ModelClassifier::<ScoreFn>::construct(b"", labels(), options(false), |_, _| {
            Err(ClassifierError::InvalidModel("truncated".into()))
        });
        assert!(matches!(result, Err(ClassifierError::InvalidModel(_))));
    }

    #[test]
    fn test_missing_files_are_io_errors() {
        let result = ModelClassifier::<ScoreFn>::from_files(
            Path::new("/nonexistent/model.bin"),
            Path::new("/nonexistent/labels.txt"),
            options(false),
            |_, _| Ok(fixed_scores as ScoreFn),
        );
        assert!(matches!(result, Err(ClassifierError::Io(_))));
    }
}
