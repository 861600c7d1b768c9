//! Heartbeat controller.
//!
//! Claims no interfaces and only counts control cycles, logging a line every
//! `log_every` updates. Useful to check that the RT loop is alive.

use evo_common::controller::{Controller, ControllerError, PluginError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Type name under which the heartbeat is registered.
pub const TYPE_NAME: &str = "heartbeat";

/// Updates between two heartbeat log lines.
pub const DEFAULT_LOG_EVERY: u64 = 1000;

/// Controller counting its `update` calls.
#[derive(Debug)]
pub struct HeartbeatController {
    beats: u64,
    log_every: u64,
    max_period: Duration,
}

impl HeartbeatController {
    /// Create a heartbeat logging every `log_every` beats (0 disables logging).
    pub fn new(log_every: u64) -> Self {
        Self {
            beats: 0,
            log_every,
            max_period: Duration::ZERO,
        }
    }

    /// Updates since the last activation.
    pub fn beats(&self) -> u64 {
        self.beats
    }

    /// Longest period seen since the last activation.
    pub fn max_period(&self) -> Duration {
        self.max_period
    }
}

impl Default for HeartbeatController {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_EVERY)
    }
}

impl Controller for HeartbeatController {
    fn configure(&mut self) -> Result<(), ControllerError> {
        debug!("Heartbeat configured (log every {} beats)", self.log_every);
        Ok(())
    }

    fn activate(&mut self, _interfaces: &[String]) -> Result<(), ControllerError> {
        self.beats = 0;
        self.max_period = Duration::ZERO;
        Ok(())
    }

    fn deactivate(&mut self, _interfaces: &[String]) -> Result<(), ControllerError> {
        debug!("Heartbeat stopped after {} beats", self.beats);
        Ok(())
    }

    fn update(&mut self, _now: Instant, period: Duration) -> Result<(), ControllerError> {
        self.beats += 1;
        self.max_period = self.max_period.max(period);
        if self.log_every > 0 && self.beats % self.log_every == 0 {
            debug!(
                "Heartbeat: {} beats, max period {}us",
                self.beats,
                self.max_period.as_micros()
            );
        }
        Ok(())
    }
}

/// Factory function to create a heartbeat controller instance.
pub fn create_controller() -> Result<Box<dyn Controller>, PluginError> {
    Ok(Box::new(HeartbeatController::default()))
}
