//! Error types for controller management.

use evo_common::config::ConfigError;
use evo_common::controller::{ControllerError, PluginError};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Controller lifecycle call that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleOp {
    /// `Controller::configure`
    Configure,
    /// `Controller::activate`
    Activate,
    /// `Controller::deactivate`
    Deactivate,
    /// `Controller::update`
    Update,
}

impl fmt::Display for LifecycleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Configure => "configure",
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
            Self::Update => "update",
        };
        f.write_str(s)
    }
}

/// Error types for controller manager operations.
///
/// Validation errors (`InvalidName`, `DuplicateName`, `ControllerNotFound`,
/// `ControllerActive`, `UnknownControllerType`, `UnknownController`,
/// `SwitchPending`, `ResourceConflict`) are raised before any state change.
#[derive(Debug, Clone, Error)]
pub enum ManagerError {
    /// Controller names must be non-empty.
    #[error("Invalid controller name: '{0}'")]
    InvalidName(String),

    /// A controller with this name is already loaded.
    #[error("Controller '{0}' is already loaded")]
    DuplicateName(String),

    /// No loaded controller has this name.
    #[error("Controller not found: {0}")]
    ControllerNotFound(String),

    /// Controller is active or scheduled to start by a pending switch.
    #[error("Controller '{0}' is active or scheduled to start")]
    ControllerActive(String),

    /// No type is configured for this controller name.
    #[error("No controller type configured for '{0}'")]
    UnknownControllerType(String),

    /// The plugin factory could not create the controller.
    #[error("Failed to load controller '{name}': {source}")]
    PluginLoad {
        /// Controller name being loaded.
        name: String,
        /// Factory error.
        #[source]
        source: PluginError,
    },

    /// A switch request names controllers that are not loaded.
    #[error("Switch request references unknown controllers: {}", .0.join(", "))]
    UnknownController(Vec<String>),

    /// A switch did not finish within its timeout.
    #[error("Controller switch timed out after {elapsed:?}")]
    SwitchTimeout {
        /// Time from acceptance until the switch was aborted.
        elapsed: Duration,
    },

    /// A controller lifecycle call failed.
    #[error("Controller '{controller}' failed to {operation}: {source}")]
    ControllerLifecycle {
        /// Controller name.
        controller: String,
        /// Lifecycle call that failed.
        operation: LifecycleOp,
        /// Controller-reported error.
        #[source]
        source: ControllerError,
    },

    /// Another switch is still in flight, or the switch in flight names the
    /// controller being unloaded.
    #[error("A controller switch is already pending")]
    SwitchPending,

    /// Two active controllers would claim the same interface.
    #[error("Interface '{interface}' would be claimed by both '{holder}' and '{requester}'")]
    ResourceConflict {
        /// Contested interface.
        interface: String,
        /// Controller already holding (or starting with) the interface.
        holder: String,
        /// Controller requesting it.
        requester: String,
    },

    /// `update` was entered from a second thread while already running.
    #[error("Real-time update entered concurrently from another thread")]
    ConcurrentUpdate,

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Convenience alias for manager results.
pub type ManagerResult<T> = Result<T, ManagerError>;
