//! Control manager.
//!
//! `ControlManager` is the single entry point for both threads:
//!
//! - non-RT callers load, unload, list and switch controllers; every such
//!   call is serialized by the registry lock and may block for up to one
//!   RT cycle while a new controller list is handed over;
//! - the RT loop calls [`ControlManager::update`] once per cycle, which
//!   never takes the lock.

use crate::error::{LifecycleOp, ManagerError, ManagerResult};
use crate::record::{ControllerInfo, ControllerRecord};
use crate::registry::{DoubleBufferedRegistry, RegistryGuard};
use crate::switch::{StagedSwitch, SwitchAccepted, SwitchMailbox, SwitchReport, SwitchRequest, SwitchStatus};
use evo_common::config::{ControllerEntry, ManagerConfig};
use evo_common::consts::{INFINITE_TIMEOUT, RT_ERROR_LOG_BURST, RT_ERROR_LOG_EVERY};
use evo_common::controller::{Controller, LifecycleState, PluginFactory};
use evo_common::prelude::DEFAULT_SWITCH_POLL_INTERVAL;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

type Guard<'a> = RegistryGuard<'a, Arc<ControllerRecord>>;

/// Result of one successful `update` cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Active controllers whose `update` succeeded.
    pub updated: usize,
    /// Active controllers whose `update` returned a recoverable error.
    pub failed: usize,
}

/// Hosts controllers and coordinates their lifecycle with the RT loop.
pub struct ControlManager {
    registry: DoubleBufferedRegistry<Arc<ControllerRecord>>,
    factory: Box<dyn PluginFactory>,
    /// Source of controller types for `load_configured_controller`.
    config: ManagerConfig,
    /// Applied to requests without their own timeout.
    default_switch_timeout: Duration,
    mailbox: SwitchMailbox,
    /// Set while a thread is inside `update`.
    rt_busy: AtomicBool,
}

static_assertions::assert_impl_all!(ControlManager: Send, Sync);

impl ControlManager {
    /// Create a manager with the default registry poll interval.
    pub fn new(factory: Box<dyn PluginFactory>) -> Self {
        Self::with_poll_interval(factory, DEFAULT_SWITCH_POLL_INTERVAL)
    }

    /// Create a manager whose registry polls at `poll_interval` while
    /// waiting for the RT thread.
    pub fn with_poll_interval(factory: Box<dyn PluginFactory>, poll_interval: Duration) -> Self {
        Self {
            registry: DoubleBufferedRegistry::with_poll_interval(poll_interval),
            factory,
            config: ManagerConfig::default(),
            default_switch_timeout: INFINITE_TIMEOUT,
            mailbox: SwitchMailbox::new(),
            rt_busy: AtomicBool::new(false),
        }
    }

    /// Set the name -> type table used by `load_configured_controller`.
    pub fn with_controller_types<I, N, T>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = (N, T)>,
        N: Into<String>,
        T: Into<String>,
    {
        self.config.controllers = types
            .into_iter()
            .map(|(name, type_name)| ControllerEntry {
                name: name.into(),
                type_name: type_name.into(),
                autostart: false,
            })
            .collect();
        self
    }

    /// Set the timeout applied to switch requests that carry none
    /// (`INFINITE_TIMEOUT` by default).
    pub fn with_default_switch_timeout(mut self, timeout: Duration) -> Self {
        self.default_switch_timeout = timeout;
        self
    }

    /// Create a manager from a validated configuration.
    ///
    /// # Errors
    /// `ManagerError::Config` if the configuration is invalid.
    pub fn from_config(config: &ManagerConfig, factory: Box<dyn PluginFactory>) -> ManagerResult<Self> {
        config.validate()?;
        let mut manager = Self::with_poll_interval(factory, config.poll_interval())
            .with_default_switch_timeout(config.default_switch_timeout());
        manager.config = config.clone();
        Ok(manager)
    }

    // ─── Loading ────────────────────────────────────────────────────

    /// Create a controller of `type_name` through the factory and register it
    /// as `name` (unconfigured).
    ///
    /// # Errors
    /// - `InvalidName` for an empty name
    /// - `DuplicateName` if `name` is already loaded
    /// - `PluginLoad` if the factory fails
    pub fn load_controller(&self, name: &str, type_name: &str) -> ManagerResult<ControllerInfo> {
        let guard = self.registry.lock();
        Self::check_new_name(&guard, name)?;

        let instance = self.factory.create(type_name).map_err(|source| {
            warn!("Failed to load controller '{}': {}", name, source);
            ManagerError::PluginLoad {
                name: name.to_string(),
                source,
            }
        })?;
        Ok(Self::insert(&guard, ControllerRecord::new(name, type_name, instance)))
    }

    /// Load `name` with the type configured for it.
    ///
    /// # Errors
    /// `UnknownControllerType` if no type is configured, otherwise as
    /// [`load_controller`](Self::load_controller).
    pub fn load_configured_controller(&self, name: &str) -> ManagerResult<ControllerInfo> {
        let type_name = self
            .config
            .controller_type(name)
            .ok_or_else(|| ManagerError::UnknownControllerType(name.to_string()))?;
        self.load_controller(name, type_name)
    }

    /// Register an already constructed controller instance.
    ///
    /// # Errors
    /// `InvalidName` or `DuplicateName`.
    pub fn add_controller(
        &self,
        name: &str,
        type_name: &str,
        instance: Box<dyn Controller>,
    ) -> ManagerResult<ControllerInfo> {
        let guard = self.registry.lock();
        Self::check_new_name(&guard, name)?;
        Ok(Self::insert(&guard, ControllerRecord::new(name, type_name, instance)))
    }

    fn check_new_name(guard: &Guard<'_>, name: &str) -> ManagerResult<()> {
        if name.is_empty() {
            warn!("Rejected controller with empty name");
            return Err(ManagerError::InvalidName(name.to_string()));
        }
        if guard.read_current().iter().any(|r| r.name() == name) {
            warn!("Controller '{}' is already loaded", name);
            return Err(ManagerError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    fn insert(guard: &Guard<'_>, record: ControllerRecord) -> ControllerInfo {
        let record = Arc::new(record);
        let info = record.info();

        let mut slot = guard.stage_from_current();
        slot.push(record);
        slot.commit();
        guard.release_stale();

        info!(
            "Loaded controller '{}' (type '{}', {} interfaces)",
            info.name,
            info.type_name,
            info.claimed_interfaces.len()
        );
        info
    }

    /// Remove an inactive controller; its instance is shut down before this
    /// returns.
    ///
    /// # Errors
    /// - `ControllerNotFound` if `name` is not loaded
    /// - `ControllerActive` if it is active or scheduled to start
    /// - `SwitchPending` if the switch in flight still names it
    pub fn unload_controller(&self, name: &str) -> ManagerResult<()> {
        let guard = self.registry.lock();
        let record = guard
            .read_current()
            .iter()
            .find(|r| r.name() == name)
            .cloned()
            .ok_or_else(|| {
                warn!("Cannot unload '{}': not loaded", name);
                ManagerError::ControllerNotFound(name.to_string())
            })?;

        // Pending first: the RT side marks a record active before clearing
        // its pending flag.
        if record.is_pending_start() || record.is_active() {
            warn!("Cannot unload '{}': controller is active", name);
            return Err(ManagerError::ControllerActive(name.to_string()));
        }
        // Also settles a finished switch, dropping its handle to the record.
        if self.mailbox.references(name, &guard) {
            warn!("Cannot unload '{}': named by the pending switch", name);
            return Err(ManagerError::SwitchPending);
        }

        let mut slot = guard.stage_from_current();
        slot.retain(|r| !Arc::ptr_eq(r, &record));
        slot.commit();
        guard.release_stale();
        drop(record);

        info!("Unloaded controller '{}'", name);
        Ok(())
    }

    // ─── Queries ────────────────────────────────────────────────────

    /// Snapshot of all loaded controllers, in load order.
    pub fn list_controllers(&self) -> Vec<ControllerInfo> {
        let guard = self.registry.lock();
        let current = guard.read_current();
        current.iter().map(|r| r.info()).collect()
    }

    /// Type names the factory can create, sorted.
    pub fn list_controller_types(&self) -> Vec<String> {
        let mut types = self.factory.available_types();
        types.sort();
        types.dedup();
        types
    }

    /// Lifecycle state of one controller.
    ///
    /// # Errors
    /// `ControllerNotFound` if `name` is not loaded.
    pub fn controller_state(&self, name: &str) -> ManagerResult<LifecycleState> {
        let guard = self.registry.lock();
        let current = guard.read_current();
        current
            .iter()
            .find(|r| r.name() == name)
            .map(|r| r.state())
            .ok_or_else(|| ManagerError::ControllerNotFound(name.to_string()))
    }

    /// Registry poll interval.
    pub fn poll_interval(&self) -> Duration {
        self.registry.poll_interval()
    }

    // ─── Switching ──────────────────────────────────────────────────

    /// Validate and stage a batch start/stop for the RT thread.
    ///
    /// Returns as soon as the request is staged; the RT thread executes it
    /// over the next one or two cycles. Collect the result with
    /// [`switch_status`](Self::switch_status) or
    /// [`wait_for_switch`](Self::wait_for_switch). A request without a
    /// timeout gets the manager's default; `Some(Duration::ZERO)` waits
    /// forever.
    ///
    /// # Errors
    /// - `UnknownController` / `ResourceConflict` (strict only)
    /// - `SwitchPending` if another switch is still executing
    pub fn switch_controller(&self, mut request: SwitchRequest) -> ManagerResult<SwitchAccepted> {
        request.timeout.get_or_insert(self.default_switch_timeout);

        let guard = self.registry.lock();
        let prepared = {
            let current = guard.read_current();
            StagedSwitch::prepare(request, &current)
        };
        let (staged, accepted) = prepared.inspect_err(|e| warn!("Switch rejected: {}", e))?;
        self.mailbox
            .post(staged, &guard)
            .inspect_err(|e| warn!("Switch rejected: {}", e))?;

        for skipped in &accepted.skipped {
            warn!("Switch skips '{}': {:?}", skipped.name, skipped.reason);
        }
        info!(
            "Switch staged: start={:?} stop={:?}",
            accepted.start, accepted.stop
        );
        Ok(accepted)
    }

    /// Non-blocking switch status. A finished report is returned once.
    pub fn switch_status(&self) -> SwitchStatus {
        let guard = self.registry.lock();
        let status = self.mailbox.status(&guard);
        if let SwitchStatus::Finished(report) = &status {
            debug!(
                "Switch finished: started={:?} stopped={:?} failures={}",
                report.started,
                report.stopped,
                report.failures.len()
            );
        }
        status
    }

    /// Poll until the staged switch finishes or `limit` elapses.
    ///
    /// Returns `None` if nothing is in flight or the limit is reached; the
    /// latter leaves the switch pending.
    pub fn wait_for_switch(&self, limit: Duration) -> Option<SwitchReport> {
        let deadline = Instant::now() + limit;
        loop {
            match self.switch_status() {
                SwitchStatus::Finished(report) => return Some(report),
                SwitchStatus::Idle => return None,
                SwitchStatus::Pending(_) => {}
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(self.registry.poll_interval());
        }
    }

    // ─── Real-time ──────────────────────────────────────────────────

    /// One control cycle. RT thread only.
    ///
    /// Advances a pending switch by one phase, moves onto the current
    /// controller list and calls `update` on every active controller.
    /// Recoverable controller errors are logged (rate-limited) and counted;
    /// the first fatal error is returned after all controllers have run.
    ///
    /// # Errors
    /// - `ConcurrentUpdate` if another thread is already inside `update`
    /// - `ControllerLifecycle` for the first fatal controller error
    pub fn update(&self, now: Instant, period: Duration) -> ManagerResult<CycleOutcome> {
        if self.rt_busy.swap(true, Ordering::Acquire) {
            return Err(ManagerError::ConcurrentUpdate);
        }

        self.mailbox.step();

        // SAFETY: `rt_busy` admits a single thread, and the view is not used
        // past this call.
        let records = unsafe { self.registry.advance_rt_view() };

        let mut outcome = CycleOutcome::default();
        let mut fatal = None;
        for record in records {
            if !record.is_active() {
                continue;
            }
            match record.update(now, period) {
                Ok(()) => outcome.updated += 1,
                Err((count, error)) => {
                    outcome.failed += 1;
                    if count <= RT_ERROR_LOG_BURST || count % RT_ERROR_LOG_EVERY == 0 {
                        warn!(
                            "Controller '{}' update failed (#{}): {}",
                            record.name(),
                            count,
                            error
                        );
                    }
                    if error.is_fatal() && fatal.is_none() {
                        fatal = Some((record, error));
                    }
                }
            }
        }

        self.rt_busy.store(false, Ordering::Release);

        match fatal {
            Some((record, source)) => Err(ManagerError::ControllerLifecycle {
                controller: record.name().to_string(),
                operation: LifecycleOp::Update,
                source,
            }),
            None => Ok(outcome),
        }
    }
}
