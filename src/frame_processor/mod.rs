// SPDX-License-Identifier: MPL-2.0

//! Frame processor module for periodic preview classification
//!
//! The scheduler samples the live preview once per interval and runs the
//! classifier on it. Currently implements image classification only.

pub mod scheduler;
pub mod tasks;
pub mod types;

pub use scheduler::{ClassificationScheduler, CycleOutcome, FrameSource, SchedulerTuning};
pub use tasks::classifier;
pub use types::{ClassificationResult, capitalize_first, format_results};
