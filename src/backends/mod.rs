// SPDX-License-Identifier: MPL-2.0

//! Backend abstraction layer for camera hardware
//!
//! This module provides the hardware boundary of the capture core and the
//! implementations that ship with the crate:
//! - The [`camera::CameraHardware`] trait, its event and error types, and the
//!   device open/close lock
//! - A software [`virtual_camera::VirtualCamera`] used for simulation and tests
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │          Session worker (capture core)       │
//! └────────────────────┬────────────────────────┘
//!                      │ CameraHardware
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                   │
//! │  ┌──────────────────┐  ┌─────────────────┐  │
//! │  │ Platform driver  │  │ Virtual Camera  │  │
//! │  │   (external)     │  │   (built-in)    │  │
//! │  └──────────────────┘  └─────────────────┘  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`camera`]: Hardware trait, shared types and the open/close lock
//! - [`virtual_camera`]: Software camera with simulated 3A

pub mod camera;
pub mod virtual_camera;
