// SPDX-License-Identifier: GPL-3.0-only

//! One-shot camera permission signal
//!
//! Whoever asks the user for consent calls [`PermissionGate::grant`] or
//! [`PermissionGate::deny`] once; the session worker blocks on
//! [`PermissionGate::wait`] before opening the device.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Answer to a permission wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
    /// No answer within the wait bound
    Pending,
}

#[derive(Debug, Default)]
struct Shared {
    decision: Mutex<Option<bool>>,
    decided: Condvar,
}

/// Cloneable handle to a single permission decision
#[derive(Debug, Clone, Default)]
pub struct PermissionGate {
    shared: Arc<Shared>,
}

impl PermissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate that is already open
    pub fn granted() -> Self {
        let gate = Self::new();
        gate.grant();
        gate
    }

    pub fn grant(&self) {
        self.decide(true);
    }

    pub fn deny(&self) {
        self.decide(false);
    }

    /// Only the first decision counts
    fn decide(&self, granted: bool) {
        let mut decision = self
            .shared
            .decision
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if decision.is_none() {
            info!(granted, "Camera permission decided");
            *decision = Some(granted);
            self.shared.decided.notify_all();
        }
    }

    pub fn status(&self) -> PermissionStatus {
        let decision = self
            .shared
            .decision
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        to_status(*decision)
    }

    /// Block until a decision arrives or `timeout` passes
    pub fn wait(&self, timeout: Duration) -> PermissionStatus {
        let guard = self
            .shared
            .decision
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            debug!(timeout_ms = timeout.as_millis() as u64, "Waiting for camera permission");
        }
        let (decision, _) = self
            .shared
            .decided
            .wait_timeout_while(guard, timeout, |decision| decision.is_none())
            .unwrap_or_else(|e| e.into_inner());
        to_status(*decision)
    }
}

fn to_status(decision: Option<bool>) -> PermissionStatus {
    match decision {
        Some(true) => PermissionStatus::Granted,
        Some(false) => PermissionStatus::Denied,
        None => PermissionStatus::Pending,
    }
}
