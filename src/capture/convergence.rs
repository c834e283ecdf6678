// SPDX-License-Identifier: GPL-3.0-only

//! 3A convergence handshake before a still capture
//!
//! The watcher is armed when the capture flow starts waiting and consulted
//! once per metadata update. It answers whether the still may be taken now,
//! either because focus, exposure and white balance settled or because the
//! wait exceeded its bound.

use super::profile::DeviceProfile;
use crate::backends::camera::types::{AeState, AwbState, FrameMetadata};
use crate::constants;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// How settled 3A is according to one metadata update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Everything required has converged
    Ready,
    /// A required field has not been reported yet
    Unknown,
    /// Reported, but still searching
    NotConverged,
}

/// Outcome of one convergence check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Converged,
    TimedOut,
    Waiting(Readiness),
    /// No wait in progress
    Idle,
}

impl Verdict {
    pub fn proceed(&self) -> bool {
        matches!(self, Verdict::Converged | Verdict::TimedOut)
    }
}

/// Classify one metadata update against the device capabilities
pub fn assess(profile: &DeviceProfile, metadata: Option<&FrameMetadata>) -> Readiness {
    let Some(metadata) = metadata else {
        return Readiness::Unknown;
    };

    if !profile.is_fixed_focus() {
        match metadata.af_state {
            None => return Readiness::Unknown,
            Some(af) if !af.is_locked() => return Readiness::NotConverged,
            Some(_) => {}
        }
    }

    // Legacy sensors do not report AE/AWB reliably
    if profile.is_legacy() {
        return Readiness::Ready;
    }

    match (metadata.ae_state, metadata.awb_state) {
        (Some(AeState::Converged), Some(AwbState::Converged)) => Readiness::Ready,
        (None, _) | (_, None) => Readiness::Unknown,
        _ => Readiness::NotConverged,
    }
}

/// Convergence deadline plus the decision over it
#[derive(Debug, Clone)]
pub struct ConvergenceWatcher {
    timeout: Duration,
    /// Instant the wait started; `None` when not waiting
    armed_at: Option<Instant>,
}

impl Default for ConvergenceWatcher {
    fn default() -> Self {
        Self::new(constants::timing::CONVERGENCE_TIMEOUT)
    }
}

impl ConvergenceWatcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            armed_at: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record the start of a wait
    pub fn arm(&mut self, now: Instant) {
        debug!(timeout_ms = self.timeout.as_millis() as u64, "Waiting for 3A convergence");
        self.armed_at = Some(now);
    }

    pub fn reset(&mut self) {
        self.armed_at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.armed_at.is_some()
    }

    pub fn armed_at(&self) -> Option<Instant> {
        self.armed_at
    }

    /// Decide without consuming the deadline
    ///
    /// Unknown and searching states are both subject to the timeout.
    pub fn evaluate(
        &self,
        profile: &DeviceProfile,
        metadata: Option<&FrameMetadata>,
        now: Instant,
    ) -> Verdict {
        let Some(armed_at) = self.armed_at else {
            return Verdict::Idle;
        };

        match assess(profile, metadata) {
            Readiness::Ready => Verdict::Converged,
            readiness => {
                let elapsed = now.saturating_duration_since(armed_at);
                if elapsed > self.timeout {
                    Verdict::TimedOut
                } else {
                    trace!(?readiness, elapsed_ms = elapsed.as_millis() as u64, "3A not settled");
                    Verdict::Waiting(readiness)
                }
            }
        }
    }

    /// Whether the still may be taken now
    ///
    /// Returns `true` at most once per wait: a positive verdict consumes the
    /// deadline.
    pub fn proceed(
        &mut self,
        profile: &DeviceProfile,
        metadata: Option<&FrameMetadata>,
        now: Instant,
    ) -> bool {
        let verdict = self.evaluate(profile, metadata, now);
        match verdict {
            Verdict::Converged => debug!("3A converged"),
            Verdict::TimedOut => debug!("3A convergence timed out, capturing anyway"),
            _ => return false,
        }
        self.armed_at = None;
        true
    }
}
