//! Controller switch coordinator.
//!
//! A switch is staged by a non-RT caller and executed by the RT thread,
//! one phase per cycle, so lifecycle calls never race with `update`.
//!
//! ```text
//!            switch_controller()           cycle N                 cycle N+1
//!   Idle ─────────────────────► Stopping ─────────► Starting ─────────────► Done ──► Idle
//!                                  │   deactivate         activate           (report
//!                                  │                                          collected)
//!                                  └── start_asap: deactivate + activate ──► Done
//! ```
//!
//! Only one switch may be in flight; a second request is rejected with
//! `ManagerError::SwitchPending` until the RT thread has finished the first.
//! The staged request lives in a single-slot mailbox whose ownership moves
//! between the threads through an atomic state:
//!
//! | state | owner |
//! |-------|-------|
//! | `Idle`, `Done` | non-RT (registry lock held) |
//! | `Stopping`, `Starting` | RT thread |
//!
//! A finished switch is settled into a [`SwitchReport`] by the next non-RT
//! call that looks at the mailbox; the report holds names only.
//!
//! The timeout is checked on the RT thread before each phase and after the
//! stop phase. Lifecycle calls are never interrupted: a `deactivate` that
//! stalls delays the timeout report until it returns, so the coordinator
//! reaches `Idle` at most one stalled call plus one cycle past the timeout.

use crate::error::{LifecycleOp, ManagerError, ManagerResult};
use crate::record::ControllerRecord;
use crate::registry::RegistryGuard;
use evo_common::consts::INFINITE_TIMEOUT;
use evo_common::controller::ControllerError;
use parking_lot::Mutex;
use std::cell::UnsafeCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Failure policy of a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    /// Skip unknown names and individual failures; switch the rest.
    #[default]
    BestEffort,
    /// Reject unknown names up front; any failure fails the switch.
    Strict,
}

/// Batch start/stop request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchRequest {
    /// Controllers to activate.
    pub start: Vec<String>,
    /// Controllers to deactivate (processed before `start`).
    pub stop: Vec<String>,
    /// Failure policy.
    pub strictness: Strictness,
    /// Run the start phase in the same cycle as the stop phase.
    pub start_asap: bool,
    /// Abort if not finished within this time.
    ///
    /// `None` takes the manager's default; `Some(Duration::ZERO)` waits
    /// forever regardless of that default.
    pub timeout: Option<Duration>,
}

impl SwitchRequest {
    /// Empty best-effort request using the manager's default timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the controllers to start.
    pub fn with_start<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.start = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the controllers to stop.
    pub fn with_stop<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the failure policy.
    pub fn with_strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = strictness;
        self
    }

    /// Allow stop and start in the same cycle.
    pub fn with_start_asap(mut self, start_asap: bool) -> Self {
        self.start_asap = start_asap;
        self
    }

    /// Set the timeout (`Duration::ZERO` = infinite).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Coordinator phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchPhase {
    /// No switch in flight.
    Idle,
    /// Waiting for the RT thread to deactivate the stop set.
    Stopping,
    /// Stop set done; waiting for the RT thread to activate the start set.
    Starting,
}

/// Why a requested controller was left out of a switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Not loaded.
    Unknown,
    /// An interface it claims is held by another active controller.
    ResourceConflict {
        /// Contested interface.
        interface: String,
        /// Controller holding it.
        holder: String,
    },
    /// Its own deactivation failed earlier in the same switch.
    StopFailed,
    /// A controller whose deactivation failed still holds this interface.
    HolderStillActive {
        /// Contested interface.
        interface: String,
        /// Controller that failed to stop.
        holder: String,
    },
}

/// A controller left out of a switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedController {
    /// Controller name.
    pub name: String,
    /// Reason.
    pub reason: SkipReason,
}

/// A lifecycle call that failed during a switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchFailure {
    /// Controller name.
    pub controller: String,
    /// Failed call.
    pub operation: LifecycleOp,
    /// Controller-reported error.
    pub error: ControllerError,
}

/// Immediate answer to `switch_controller`: what was staged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchAccepted {
    /// Controllers staged for activation.
    pub start: Vec<String>,
    /// Controllers staged for deactivation.
    pub stop: Vec<String>,
    /// Controllers dropped during validation (best-effort only).
    pub skipped: Vec<SkippedController>,
}

/// Final outcome of a switch.
///
/// `stopped` and `started` list every controller the switch processed
/// without error, including no-ops: stopping a controller that was not
/// active, or starting one that already was, is reported the same way as
/// a real transition. Compare `controller_state` before the switch if the
/// distinction matters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchReport {
    /// Policy the switch ran under.
    pub strictness: Strictness,
    /// Inactive after the stop phase (no-op if it was not active).
    pub stopped: Vec<String>,
    /// Active after the start phase (no-op if it already was).
    pub started: Vec<String>,
    /// Left out during validation or after a failed stop.
    pub skipped: Vec<SkippedController>,
    /// Failed lifecycle calls, in execution order.
    pub failures: Vec<SwitchFailure>,
    /// Staged but never attempted (abort or timeout).
    pub not_attempted: Vec<String>,
    /// Set when the switch was aborted by its timeout.
    pub timed_out: Option<Duration>,
}

impl SwitchReport {
    /// Governing result of the switch.
    ///
    /// - A timeout always fails with `SwitchTimeout`.
    /// - Under `Strict`, the first lifecycle failure fails the switch.
    /// - Under `BestEffort`, individual failures are only reported.
    pub fn outcome(&self) -> ManagerResult<()> {
        if let Some(elapsed) = self.timed_out {
            return Err(ManagerError::SwitchTimeout { elapsed });
        }
        if self.strictness == Strictness::Strict {
            if let Some(failure) = self.failures.first() {
                return Err(ManagerError::ControllerLifecycle {
                    controller: failure.controller.clone(),
                    operation: failure.operation,
                    source: failure.error.clone(),
                });
            }
        }
        Ok(())
    }

    /// True if `outcome()` is `Ok`.
    pub fn is_success(&self) -> bool {
        self.outcome().is_ok()
    }
}

/// Non-blocking view of the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchStatus {
    /// Nothing in flight.
    Idle,
    /// RT thread is working through the given phase.
    Pending(SwitchPhase),
    /// Finished; the report is handed out once.
    Finished(SwitchReport),
}

/// Per-record result written by the RT thread.
#[derive(Debug)]
enum ActionResult {
    Done,
    Failed(LifecycleOp, ControllerError),
    /// Start dropped because its own stop failed.
    Excluded,
    /// Start dropped because `stop[holder]` failed to stop and still claims
    /// `claimed_interfaces()[interface]` of the start.
    Blocked { holder: usize, interface: usize },
}

/// A validated request, resolved to records, ready for the RT thread.
pub(crate) struct StagedSwitch {
    stop: Vec<Arc<ControllerRecord>>,
    start: Vec<Arc<ControllerRecord>>,
    // Pre-sized so the RT thread writes results without allocating.
    stop_results: Vec<Option<ActionResult>>,
    start_results: Vec<Option<ActionResult>>,
    strictness: Strictness,
    start_asap: bool,
    timeout: Duration,
    issued_at: Instant,
    skipped: Vec<SkippedController>,
    timed_out: Option<Duration>,
}

impl StagedSwitch {
    /// Validate `request` against the current controller list.
    ///
    /// Strict requests fail on unknown names or resource conflicts without
    /// touching any state; best-effort requests drop the offending names.
    pub(crate) fn prepare(
        request: SwitchRequest,
        current: &[Arc<ControllerRecord>],
    ) -> ManagerResult<(Self, SwitchAccepted)> {
        let strict = request.strictness == Strictness::Strict;
        let mut unknown = Vec::new();

        let mut resolve = |names: &[String]| -> Vec<Arc<ControllerRecord>> {
            let mut seen = HashSet::new();
            let mut records = Vec::with_capacity(names.len());
            for name in names {
                if !seen.insert(name.as_str()) {
                    continue;
                }
                match current.iter().find(|r| r.name() == name) {
                    Some(record) => records.push(Arc::clone(record)),
                    None => unknown.push(name.clone()),
                }
            }
            records
        };
        let stop = resolve(request.stop.as_slice());
        let requested_start = resolve(request.start.as_slice());

        let mut skipped = Vec::new();
        if !unknown.is_empty() {
            if strict {
                return Err(ManagerError::UnknownController(unknown));
            }
            skipped.extend(unknown.into_iter().map(|name| SkippedController {
                name,
                reason: SkipReason::Unknown,
            }));
        }

        // Interface -> holder once the stop set is gone.
        let mut claims: HashMap<String, String> = HashMap::new();
        for record in current {
            if record.is_active() && !stop.iter().any(|s| Arc::ptr_eq(s, record)) {
                for interface in record.claimed_interfaces() {
                    claims.insert(interface.clone(), record.name().to_string());
                }
            }
        }

        let mut start = Vec::with_capacity(requested_start.len());
        for record in requested_start {
            let conflict = record.claimed_interfaces().iter().find_map(|interface| {
                claims
                    .get(interface)
                    .filter(|holder| holder.as_str() != record.name())
                    .map(|holder| (interface.clone(), holder.clone()))
            });
            match conflict {
                Some((interface, holder)) if strict => {
                    return Err(ManagerError::ResourceConflict {
                        interface,
                        holder,
                        requester: record.name().to_string(),
                    });
                }
                Some((interface, holder)) => skipped.push(SkippedController {
                    name: record.name().to_string(),
                    reason: SkipReason::ResourceConflict { interface, holder },
                }),
                None => {
                    for interface in record.claimed_interfaces() {
                        claims.insert(interface.clone(), record.name().to_string());
                    }
                    start.push(record);
                }
            }
        }

        let accepted = SwitchAccepted {
            start: start.iter().map(|r| r.name().to_string()).collect(),
            stop: stop.iter().map(|r| r.name().to_string()).collect(),
            skipped: skipped.clone(),
        };
        let staged = Self {
            stop_results: stop.iter().map(|_| None).collect(),
            start_results: start.iter().map(|_| None).collect(),
            stop,
            start,
            strictness: request.strictness,
            start_asap: request.start_asap,
            timeout: request.timeout.unwrap_or(INFINITE_TIMEOUT),
            issued_at: Instant::now(),
            skipped,
            timed_out: None,
        };
        Ok((staged, accepted))
    }

    fn expired(&self) -> Option<Duration> {
        if self.timeout == INFINITE_TIMEOUT {
            return None;
        }
        let elapsed = self.issued_at.elapsed();
        (elapsed > self.timeout).then_some(elapsed)
    }

    /// Deactivate the stop set. Returns false if a strict switch must abort.
    ///
    /// Staging freed the interfaces of the stop set. A best-effort stop that
    /// fails leaves its controller active, so every start that shares one of
    /// its interfaces is dropped along with a restart of the controller itself.
    fn run_stop_phase(&mut self) -> bool {
        let strict = self.strictness == Strictness::Strict;
        for (i, record) in self.stop.iter().enumerate() {
            match record.deactivate() {
                Ok(()) => self.stop_results[i] = Some(ActionResult::Done),
                Err((op, error)) => {
                    self.stop_results[i] = Some(ActionResult::Failed(op, error));
                    if strict {
                        return false;
                    }
                    for (j, started) in self.start.iter().enumerate() {
                        if self.start_results[j].is_some() {
                            continue;
                        }
                        let dropped = if Arc::ptr_eq(started, record) {
                            Some(ActionResult::Excluded)
                        } else {
                            started
                                .claimed_interfaces()
                                .iter()
                                .position(|interface| record.claimed_interfaces().contains(interface))
                                .map(|interface| ActionResult::Blocked { holder: i, interface })
                        };
                        if let Some(result) = dropped {
                            self.start_results[j] = Some(result);
                            started.set_pending_start(false);
                        }
                    }
                }
            }
        }
        true
    }

    /// Configure/activate the start set; failures do not stop the others.
    fn run_start_phase(&mut self) {
        for (i, record) in self.start.iter().enumerate() {
            if self.start_results[i].is_some() {
                continue;
            }
            let result = match record.activate() {
                Ok(()) => ActionResult::Done,
                Err((op, error)) => ActionResult::Failed(op, error),
            };
            record.set_pending_start(false);
            self.start_results[i] = Some(result);
        }
    }

    fn abort(&mut self) {
        for record in &self.start {
            record.set_pending_start(false);
        }
    }

    /// Execute one RT cycle's worth of the switch.
    fn advance(&mut self, state: MailboxState) -> MailboxState {
        if let Some(elapsed) = self.expired() {
            self.timed_out = Some(elapsed);
            self.abort();
            return MailboxState::Done;
        }
        match state {
            MailboxState::Stopping => {
                if !self.run_stop_phase() {
                    self.abort();
                    return MailboxState::Done;
                }
                if let Some(elapsed) = self.expired() {
                    self.timed_out = Some(elapsed);
                    self.abort();
                    return MailboxState::Done;
                }
                if self.start_asap {
                    self.run_start_phase();
                    MailboxState::Done
                } else {
                    MailboxState::Starting
                }
            }
            _ => {
                self.run_start_phase();
                MailboxState::Done
            }
        }
    }

    fn into_report(self) -> SwitchReport {
        let Self {
            stop,
            start,
            stop_results,
            start_results,
            strictness,
            mut skipped,
            timed_out,
            ..
        } = self;

        let mut report = SwitchReport {
            strictness,
            timed_out,
            ..SwitchReport::default()
        };
        for (record, result) in stop.iter().zip(stop_results) {
            let name = record.name().to_string();
            match result {
                Some(ActionResult::Done) => report.stopped.push(name),
                Some(ActionResult::Failed(operation, error)) => {
                    report.failures.push(SwitchFailure {
                        controller: name,
                        operation,
                        error,
                    })
                }
                Some(ActionResult::Excluded | ActionResult::Blocked { .. }) | None => {
                    report.not_attempted.push(name)
                }
            }
        }
        for (record, result) in start.iter().zip(start_results) {
            let name = record.name().to_string();
            match result {
                Some(ActionResult::Done) => report.started.push(name),
                Some(ActionResult::Failed(operation, error)) => {
                    report.failures.push(SwitchFailure {
                        controller: name,
                        operation,
                        error,
                    })
                }
                Some(ActionResult::Excluded) => skipped.push(SkippedController {
                    name,
                    reason: SkipReason::StopFailed,
                }),
                Some(ActionResult::Blocked { holder, interface }) => {
                    skipped.push(SkippedController {
                        name,
                        reason: SkipReason::HolderStillActive {
                            interface: record.claimed_interfaces()[interface].clone(),
                            holder: stop[holder].name().to_string(),
                        },
                    })
                }
                None => report.not_attempted.push(name),
            }
        }
        report.skipped = skipped;
        report
    }
}

/// Mailbox state; see the module table for ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum MailboxState {
    Idle = 0,
    Stopping = 1,
    Starting = 2,
    Done = 3,
}

impl MailboxState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Stopping,
            2 => Self::Starting,
            3 => Self::Done,
            _ => Self::Idle,
        }
    }
}

/// Single-slot handoff of a staged switch from non-RT to RT.
pub(crate) struct SwitchMailbox {
    state: AtomicU8,
    slot: UnsafeCell<Option<StagedSwitch>>,
    /// Non-RT side only; the RT thread never touches it.
    outbox: Mutex<Outbox>,
}

/// Non-RT bookkeeping around the slot.
#[derive(Default)]
struct Outbox {
    /// Names staged by the switch in flight.
    in_flight: Vec<String>,
    /// Finished report waiting to be collected. Holds names only, so it
    /// keeps no controller alive.
    report: Option<SwitchReport>,
}

// SAFETY: `slot` is accessed only by the side that owns the current `state`
// (see module docs); ownership moves with Release/Acquire on `state`, and
// the non-RT side is serialized by the registry lock.
unsafe impl Sync for SwitchMailbox {}

impl SwitchMailbox {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(MailboxState::Idle as u8),
            slot: UnsafeCell::new(None),
            outbox: Mutex::new(Outbox::default()),
        }
    }

    fn load_state(&self) -> MailboxState {
        MailboxState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Turn a finished switch into its report and drop its record handles.
    fn settle(&self, outbox: &mut Outbox) {
        if self.load_state() != MailboxState::Done {
            return;
        }
        // SAFETY: Done -> the non-RT side owns the slot; callers hold the
        // registry lock.
        let staged = unsafe { (*self.slot.get()).take() };
        self.state.store(MailboxState::Idle as u8, Ordering::Release);
        outbox.in_flight.clear();
        if let Some(staged) = staged {
            outbox.report = Some(staged.into_report());
        }
    }

    /// Hand a staged switch to the RT thread. Non-RT, lock held.
    ///
    /// An uncollected report of a finished switch is discarded.
    pub(crate) fn post<T>(
        &self,
        staged: StagedSwitch,
        _lock: &RegistryGuard<'_, T>,
    ) -> ManagerResult<()> {
        let mut outbox = self.outbox.lock();
        self.settle(&mut outbox);
        if self.load_state() != MailboxState::Idle {
            return Err(ManagerError::SwitchPending);
        }
        if outbox.report.take().is_some() {
            debug!("Discarding uncollected switch report");
        }

        outbox.in_flight = staged
            .stop
            .iter()
            .chain(&staged.start)
            .map(|record| record.name().to_string())
            .collect();
        for record in &staged.start {
            record.set_pending_start(true);
        }
        // SAFETY: Idle -> the non-RT side owns the slot, and the lock
        // excludes other non-RT callers.
        unsafe {
            *self.slot.get() = Some(staged);
        }
        self.state
            .store(MailboxState::Stopping as u8, Ordering::Release);
        Ok(())
    }

    /// Current status; collects a finished report. Non-RT, lock held.
    pub(crate) fn status<T>(&self, _lock: &RegistryGuard<'_, T>) -> SwitchStatus {
        let mut outbox = self.outbox.lock();
        self.settle(&mut outbox);
        if let Some(report) = outbox.report.take() {
            return SwitchStatus::Finished(report);
        }
        match self.load_state() {
            MailboxState::Idle => SwitchStatus::Idle,
            MailboxState::Stopping => SwitchStatus::Pending(SwitchPhase::Stopping),
            // Done here means the RT thread finished after `settle`; the
            // report is collected by the next call.
            MailboxState::Starting | MailboxState::Done => {
                SwitchStatus::Pending(SwitchPhase::Starting)
            }
        }
    }

    /// True if the switch in flight names `name`. Non-RT, lock held.
    ///
    /// Settles a finished switch first, so a false answer means the mailbox
    /// holds no handle to that controller.
    pub(crate) fn references<T>(&self, name: &str, _lock: &RegistryGuard<'_, T>) -> bool {
        let mut outbox = self.outbox.lock();
        self.settle(&mut outbox);
        outbox.in_flight.iter().any(|staged| staged == name)
    }

    /// Advance an in-flight switch by one phase. RT thread only.
    pub(crate) fn step(&self) {
        let state = self.load_state();
        if !matches!(state, MailboxState::Stopping | MailboxState::Starting) {
            return;
        }
        // SAFETY: Stopping/Starting -> the RT side owns the slot.
        let slot = unsafe { &mut *self.slot.get() };
        let next = match slot.as_mut() {
            Some(staged) => staged.advance(state),
            None => MailboxState::Done,
        };
        self.state.store(next as u8, Ordering::Release);
    }
}
