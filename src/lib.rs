// SPDX-License-Identifier: MPL-2.0

//! AI Camera - camera capture core with live image classification
//!
//! This library drives a camera device through its lifecycle, runs the
//! auto-focus/auto-exposure convergence handshake before each still, applies
//! pinch-to-zoom as a sensor crop and periodically classifies preview frames.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Camera hardware abstraction and the virtual camera
//! - [`capture`]: Device profile, capture state machine, convergence and zoom
//! - [`frame_processor`]: Classifier contract and classification scheduler
//! - [`session`]: Worker thread serializing commands and hardware callbacks
//! - [`config`]: User configuration handling
//! - [`storage`]: Still image output
//!
//! # Example
//!
//! ```ignore
//! // Run a simulated session from the command line:
//! // aicamera simulate --stills 3
//! ```

pub mod backends;
pub mod capture;
pub mod config;
pub mod constants;
pub mod errors;
pub mod flash;
pub mod frame_processor;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use capture::{CaptureState, CaptureStateMachine, DeviceProfile, ZoomController};
pub use config::Config;
pub use errors::{ClassifierError, CoreError, CoreResult};
pub use flash::FlashMode;
pub use frame_processor::{ClassificationResult, ClassificationScheduler};
pub use session::{CameraSession, SessionHandle};
