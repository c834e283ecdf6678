// SPDX-License-Identifier: GPL-3.0-only

//! Frame processing tasks
//!
//! This module contains the classifier abstraction and its model-backed
//! implementation.

pub mod classifier;

pub use classifier::{
    Accelerator, Classifier, ClassifierOptions, InferenceEngine, ModelClassifier, ModelInput,
    ModelOutput,
};
