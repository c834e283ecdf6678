// SPDX-License-Identifier: GPL-3.0-only
//! Paced driver thread for the virtual camera
//!
//! Stands in for the camera driver's own thread: it ticks once per frame
//! interval and reports per-frame results through the session's event
//! sender until it is stopped or the tick asks to stop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Returned by each tick to control the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Continue,
    Stop,
}

/// Handle to a running frame loop; stops the thread when dropped
pub struct FrameLoop {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl FrameLoop {
    /// Spawn a loop calling `tick(frame_index)` every `interval`
    pub fn start<F>(name: &str, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut(u64) -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&stop_signal);
        let thread_name = name.to_string();

        debug!(name = %name, interval_ms = interval.as_millis() as u64, "Starting frame loop");

        let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
            let mut frame = 0u64;
            let mut next = Instant::now();
            while !stop.load(Ordering::SeqCst) {
                if tick(frame) == LoopAction::Stop {
                    debug!(name = %thread_name, "Frame loop requested stop");
                    break;
                }
                frame += 1;
                next += interval;
                let now = Instant::now();
                if next > now {
                    thread::sleep(next - now);
                } else {
                    next = now;
                }
            }
            debug!(name = %thread_name, frames = frame, "Frame loop exiting");
        });

        let thread_handle = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(name = %name, error = %e, "Failed to spawn frame loop");
                None
            }
        };

        Self {
            thread_handle,
            stop_signal,
            name: name.to_string(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop and wait for the thread to finish
    pub fn stop(&mut self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take()
            && let Err(e) = handle.join()
        {
            warn!(name = %self.name, "Frame loop thread panicked: {:?}", e);
        }
    }
}

impl Drop for FrameLoop {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            self.stop();
        }
    }
}
