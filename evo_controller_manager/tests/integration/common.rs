//! Shared fixtures: spy controller and RT loop thread.

use evo_common::controller::{Controller, ControllerError};
use evo_controller_manager::controllers::register_builtin_controllers;
use evo_controller_manager::{ControlManager, ControllerTypeRegistry, CycleStats, RtLoop};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const RT_PERIOD: Duration = Duration::from_micros(200);
pub const POLL_INTERVAL: Duration = Duration::from_micros(20);
pub const WAIT_LIMIT: Duration = Duration::from_secs(2);

/// Ordered record of lifecycle calls across controllers.
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Per-spy call counters.
#[derive(Default)]
pub struct SpyCalls {
    pub configure: AtomicU64,
    pub activate: AtomicU64,
    pub deactivate: AtomicU64,
    pub update: AtomicU64,
    pub shutdown: AtomicU64,
}

impl SpyCalls {
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::SeqCst)
    }

    /// configure + activate + deactivate
    pub fn lifecycle_total(&self) -> u64 {
        Self::get(&self.configure) + Self::get(&self.activate) + Self::get(&self.deactivate)
    }
}

/// Controller recording every call it receives.
pub struct Spy {
    name: String,
    calls: Arc<SpyCalls>,
    interfaces: Vec<String>,
    stall_deactivate: Duration,
    log_updates: bool,
    events: Option<EventLog>,
}

impl Spy {
    pub fn new(name: &str, calls: &Arc<SpyCalls>) -> Self {
        Self {
            name: name.to_string(),
            calls: Arc::clone(calls),
            interfaces: Vec::new(),
            stall_deactivate: Duration::ZERO,
            log_updates: false,
            events: None,
        }
    }

    pub fn claiming(mut self, interface: &str) -> Self {
        self.interfaces.push(interface.to_string());
        self
    }

    pub fn stalling_deactivate(mut self, stall: Duration) -> Self {
        self.stall_deactivate = stall;
        self
    }

    /// Log lifecycle calls, and updates too if `updates` is set.
    pub fn logging_to(mut self, events: &EventLog, updates: bool) -> Self {
        self.events = Some(Arc::clone(events));
        self.log_updates = updates;
        self
    }

    fn log(&self, what: &str) {
        if let Some(events) = &self.events {
            events.lock().unwrap().push(format!("{}:{}", self.name, what));
        }
    }
}

impl Controller for Spy {
    fn claimed_interfaces(&self) -> Vec<String> {
        self.interfaces.clone()
    }

    fn configure(&mut self) -> Result<(), ControllerError> {
        self.calls.configure.fetch_add(1, Ordering::SeqCst);
        self.log("configure");
        Ok(())
    }

    fn activate(&mut self, _interfaces: &[String]) -> Result<(), ControllerError> {
        self.calls.activate.fetch_add(1, Ordering::SeqCst);
        self.log("activate");
        Ok(())
    }

    fn deactivate(&mut self, _interfaces: &[String]) -> Result<(), ControllerError> {
        self.calls.deactivate.fetch_add(1, Ordering::SeqCst);
        if !self.stall_deactivate.is_zero() {
            thread::sleep(self.stall_deactivate);
        }
        self.log("deactivate");
        Ok(())
    }

    fn update(&mut self, _now: Instant, _period: Duration) -> Result<(), ControllerError> {
        self.calls.update.fetch_add(1, Ordering::SeqCst);
        if self.log_updates {
            self.log("update");
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.calls.shutdown.fetch_add(1, Ordering::SeqCst);
    }
}

/// Manager with the built-in types and a short registry poll interval.
pub fn manager() -> Arc<ControlManager> {
    let mut types = ControllerTypeRegistry::new();
    register_builtin_controllers(&mut types);
    Arc::new(ControlManager::with_poll_interval(Box::new(types), POLL_INTERVAL))
}

/// Register a spy and return its name.
pub fn add_spy(manager: &ControlManager, spy: Spy) -> String {
    let name = spy.name.clone();
    manager.add_controller(&name, "spy", Box::new(spy)).unwrap();
    name
}

/// RT loop running on its own thread; stopped on drop.
pub struct RtThread {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<CycleStats>>,
}

impl RtThread {
    pub fn start(manager: &Arc<ControlManager>) -> Self {
        let mut rt = RtLoop::new(Arc::clone(manager), RT_PERIOD);
        let running = rt.running_flag();
        let handle = thread::spawn(move || {
            rt.run().unwrap();
            rt.stats()
        });
        Self {
            running,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) -> CycleStats {
        self.running.store(false, Ordering::SeqCst);
        match self.handle.take() {
            Some(handle) => handle.join().unwrap(),
            None => CycleStats::default(),
        }
    }
}

impl Drop for RtThread {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
