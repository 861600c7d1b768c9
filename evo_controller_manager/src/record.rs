//! Per-controller bookkeeping.
//!
//! A `ControllerRecord` owns exactly one controller instance. Records are
//! shared between the two registry snapshots through `Arc`; the instance is
//! shut down when the last snapshot releases the record.
//!
//! The instance lock is only ever taken by the RT thread (lifecycle calls
//! and `update`). Non-RT code reads the lifecycle state through atomics.

use crate::error::LifecycleOp;
use evo_common::controller::{Controller, ControllerError, LifecycleState};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Snapshot of a record returned by `list_controllers()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerInfo {
    /// Unique controller name.
    pub name: String,
    /// Plugin type name.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Interfaces claimed while active.
    pub claimed_interfaces: Vec<String>,
    /// Lifecycle state at the time of listing.
    pub state: LifecycleState,
}

/// Registry entry for one loaded controller.
pub struct ControllerRecord {
    name: String,
    type_name: String,
    /// Sorted, deduplicated.
    claimed_interfaces: Vec<String>,
    instance: Mutex<Box<dyn Controller>>,
    state: AtomicU8,
    /// Set while a staged switch intends to start this controller.
    pending_start: AtomicBool,
    update_failures: AtomicU64,
}

impl ControllerRecord {
    /// Wrap a freshly created controller instance.
    pub fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
        instance: Box<dyn Controller>,
    ) -> Self {
        let mut claimed_interfaces = instance.claimed_interfaces();
        claimed_interfaces.sort();
        claimed_interfaces.dedup();

        Self {
            name: name.into(),
            type_name: type_name.into(),
            claimed_interfaces,
            instance: Mutex::new(instance),
            state: AtomicU8::new(LifecycleState::Unconfigured.as_u8()),
            pending_start: AtomicBool::new(false),
            update_failures: AtomicU64::new(0),
        }
    }

    /// Controller name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plugin type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Interfaces claimed while active.
    pub fn claimed_interfaces(&self) -> &[String] {
        &self.claimed_interfaces
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True while the controller is active.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.state() == LifecycleState::Active
    }

    /// True while a pending switch intends to start this controller.
    #[inline]
    pub fn is_pending_start(&self) -> bool {
        self.pending_start.load(Ordering::Acquire)
    }

    /// Number of failed `update` calls since load.
    pub fn update_failures(&self) -> u64 {
        self.update_failures.load(Ordering::Relaxed)
    }

    /// Copy of the listing fields.
    pub fn info(&self) -> ControllerInfo {
        ControllerInfo {
            name: self.name.clone(),
            type_name: self.type_name.clone(),
            claimed_interfaces: self.claimed_interfaces.clone(),
            state: self.state(),
        }
    }

    pub(crate) fn set_pending_start(&self, pending: bool) {
        self.pending_start.store(pending, Ordering::Release);
    }

    fn set_state(&self, state: LifecycleState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Run `f` on the instance without blocking.
    fn with_instance<R>(
        &self,
        f: impl FnOnce(&mut Box<dyn Controller>) -> Result<R, ControllerError>,
    ) -> Result<R, ControllerError> {
        match self.instance.try_lock() {
            Some(mut guard) => f(&mut guard),
            None => Err(ControllerError::Failed(
                "controller instance is busy".to_string(),
            )),
        }
    }

    /// Configure (if needed) and activate. RT thread only.
    ///
    /// Already-active controllers are left untouched.
    pub(crate) fn activate(&self) -> Result<(), (LifecycleOp, ControllerError)> {
        let state = self.state();
        if state == LifecycleState::Active {
            return Ok(());
        }
        if state == LifecycleState::Unconfigured {
            self.with_instance(|c| c.configure())
                .map_err(|e| (LifecycleOp::Configure, e))?;
            self.set_state(LifecycleState::Inactive);
        }
        let interfaces = &self.claimed_interfaces;
        self.with_instance(|c| c.activate(interfaces))
            .map_err(|e| (LifecycleOp::Activate, e))?;
        self.set_state(LifecycleState::Active);
        Ok(())
    }

    /// Deactivate if active. RT thread only.
    pub(crate) fn deactivate(&self) -> Result<(), (LifecycleOp, ControllerError)> {
        if !self.is_active() {
            return Ok(());
        }
        let interfaces = &self.claimed_interfaces;
        self.with_instance(|c| c.deactivate(interfaces))
            .map_err(|e| (LifecycleOp::Deactivate, e))?;
        self.set_state(LifecycleState::Inactive);
        Ok(())
    }

    /// One control cycle. RT thread only.
    ///
    /// Returns the running failure count alongside the error.
    pub(crate) fn update(&self, now: Instant, period: Duration) -> Result<(), (u64, ControllerError)> {
        self.with_instance(|c| c.update(now, period)).map_err(|e| {
            let count = self.update_failures.fetch_add(1, Ordering::Relaxed) + 1;
            (count, e)
        })
    }
}

impl Drop for ControllerRecord {
    fn drop(&mut self) {
        debug!("Shutting down controller '{}'", self.name);
        self.instance.get_mut().shutdown();
    }
}

impl std::fmt::Debug for ControllerRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerRecord")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("claimed_interfaces", &self.claimed_interfaces)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
