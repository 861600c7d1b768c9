//! Fixed-period real-time loop driving `ControlManager::update`.

use crate::error::{ManagerError, ManagerResult};
use crate::manager::ControlManager;
use evo_common::consts::{RT_ERROR_LOG_BURST, RT_ERROR_LOG_EVERY};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Cycles between two debug summaries.
const STATS_LOG_EVERY: u64 = 1000;

/// Timing statistics for RT loop monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Number of cycles executed.
    pub cycle_count: u64,
    /// Duration of the last cycle [µs].
    pub last_cycle_us: u64,
    /// Maximum observed cycle duration [µs].
    pub max_cycle_us: u64,
    /// Sum of cycle durations for average calculation [µs].
    pub total_cycle_us: u64,
    /// Cycles that took longer than the period.
    pub overruns: u64,
    /// Recoverable controller `update` failures.
    pub controller_errors: u64,
    /// Cycles that surfaced a fatal controller error.
    pub fatal_errors: u64,
}

impl CycleStats {
    /// Record one cycle's work time. Returns true on overrun. O(1), no allocation.
    #[inline]
    pub fn record(&mut self, duration: Duration, period: Duration) -> bool {
        let us = duration.as_micros() as u64;
        self.cycle_count += 1;
        self.last_cycle_us = us;
        self.total_cycle_us += us;
        if us > self.max_cycle_us {
            self.max_cycle_us = us;
        }
        let overrun = duration > period;
        if overrun {
            self.overruns += 1;
        }
        overrun
    }

    /// Average cycle duration [µs] (0 if no cycles).
    #[inline]
    pub fn avg_cycle_us(&self) -> u64 {
        if self.cycle_count == 0 {
            0
        } else {
            self.total_cycle_us / self.cycle_count
        }
    }
}

/// Rate limit shared by all RT-side log lines: first burst, then every N-th.
#[inline]
fn should_log(count: u64) -> bool {
    count <= RT_ERROR_LOG_BURST || count % RT_ERROR_LOG_EVERY == 0
}

/// Drives a `ControlManager` at a fixed period on the calling thread.
pub struct RtLoop {
    manager: Arc<ControlManager>,
    period: Duration,
    running: Arc<AtomicBool>,
    stats: CycleStats,
}

impl RtLoop {
    /// Create a loop calling `manager.update` every `period`.
    pub fn new(manager: Arc<ControlManager>, period: Duration) -> Self {
        Self {
            manager,
            period,
            running: Arc::new(AtomicBool::new(true)),
            stats: CycleStats::default(),
        }
    }

    /// Get the running flag for signal handlers and supervisors.
    ///
    /// Set on construction; clearing it ends `run` after the current cycle.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Loop period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Get timing statistics.
    pub fn stats(&self) -> CycleStats {
        self.stats
    }

    /// Run until the running flag is cleared, then clear it.
    ///
    /// Controller failures never stop the loop; they are counted and logged.
    ///
    /// # Errors
    /// `ConcurrentUpdate` if another thread drives the same manager.
    pub fn run(&mut self) -> ManagerResult<()> {
        info!(
            "Starting RT loop (period={}us)...",
            self.period.as_micros()
        );
        if detect_rt_mode() {
            info!("Running in real-time mode");
        } else {
            info!("Running in standard (non-RT) mode");
        }

        let result = self.drive(None);
        self.running.store(false, Ordering::SeqCst);

        info!(
            "RT loop stopped after {} cycles (overruns: {}, controller errors: {})",
            self.stats.cycle_count, self.stats.overruns, self.stats.controller_errors
        );
        result
    }

    /// Run at most `cycles` cycles, stopping early if the running flag is
    /// cleared.
    ///
    /// # Errors
    /// As [`run`](Self::run).
    pub fn run_cycles(&mut self, cycles: u64) -> ManagerResult<()> {
        self.drive(Some(cycles))
    }

    fn drive(&mut self, limit: Option<u64>) -> ManagerResult<()> {
        let mut last_cycle = Instant::now();
        let mut executed = 0u64;

        while self.running.load(Ordering::SeqCst) && limit.is_none_or(|n| executed < n) {
            let cycle_start = Instant::now();
            let dt = cycle_start.duration_since(last_cycle);
            last_cycle = cycle_start;

            match self.manager.update(cycle_start, dt) {
                Ok(outcome) => self.stats.controller_errors += outcome.failed as u64,
                Err(ManagerError::ConcurrentUpdate) => {
                    error!("RT loop aborted: manager is driven by another thread");
                    return Err(ManagerError::ConcurrentUpdate);
                }
                Err(e) => {
                    self.stats.controller_errors += 1;
                    self.stats.fatal_errors += 1;
                    if should_log(self.stats.fatal_errors) {
                        error!("Fatal controller error #{}: {}", self.stats.fatal_errors, e);
                    }
                }
            }

            let elapsed = cycle_start.elapsed();
            if self.stats.record(elapsed, self.period) && should_log(self.stats.overruns) {
                warn!(
                    "Timing violation #{}: cycle took {}us (target {}us)",
                    self.stats.overruns,
                    elapsed.as_micros(),
                    self.period.as_micros()
                );
            }
            if elapsed < self.period {
                std::thread::sleep(self.period - elapsed);
            }
            executed += 1;

            if self.stats.cycle_count % STATS_LOG_EVERY == 0 {
                debug!(
                    "RT loop: {} cycles, avg={}us, max={}us, overruns={}",
                    self.stats.cycle_count,
                    self.stats.avg_cycle_us(),
                    self.stats.max_cycle_us,
                    self.stats.overruns
                );
            }
        }
        Ok(())
    }
}

/// Detect if running in real-time mode by checking scheduler policy.
pub fn detect_rt_mode() -> bool {
    #[cfg(target_os = "linux")]
    {
        use libc::{SCHED_FIFO, SCHED_RR, sched_getscheduler};
        // SAFETY: queries the calling process; no pointers involved.
        let policy = unsafe { sched_getscheduler(0) };
        policy == SCHED_FIFO || policy == SCHED_RR
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}
