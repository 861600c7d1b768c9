//! Controller capability trait and plugin factory contract.
//!
//! This module defines:
//! - `Controller` trait - Lifecycle interface every hosted controller implements
//! - `ControllerError` enum - Failures reported by a controller
//! - `PluginFactory` trait - Creates controller instances from a type name
//! - `PluginError` enum - Factory failures
//! - `LifecycleState` enum - Lifecycle state tracked by the manager per controller

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Error returned by a controller lifecycle call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    /// Recoverable failure; the control loop keeps calling the controller.
    #[error("Controller failure: {0}")]
    Failed(String),

    /// Non-recoverable failure; surfaced by the manager's cycle result.
    #[error("Fatal controller failure: {0}")]
    Fatal(String),
}

impl ControllerError {
    /// Returns true for non-recoverable failures.
    #[inline]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Error returned by a [`PluginFactory`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    /// No factory is registered under the requested type name.
    #[error("Unknown controller type: {0}")]
    UnknownType(String),

    /// The factory exists but construction failed.
    #[error("Failed to construct controller of type '{type_name}': {reason}")]
    ConstructionFailed {
        /// Requested type name.
        type_name: String,
        /// Factory-provided reason.
        reason: String,
    },
}

/// Lifecycle state of a hosted controller.
///
/// ```text
/// Unconfigured ──configure──► Inactive ──activate──► Active
///                                 ▲                    │
///                                 └─────deactivate─────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LifecycleState {
    /// Loaded, `configure` not yet called.
    Unconfigured = 0,
    /// Configured but not running.
    Inactive = 1,
    /// Running; `update` is called every cycle.
    Active = 2,
}

impl LifecycleState {
    /// Raw value for atomic storage.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a raw value; unknown values map to `Unconfigured`.
    #[inline]
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Inactive,
            2 => Self::Active,
            _ => Self::Unconfigured,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unconfigured => "unconfigured",
            Self::Inactive => "inactive",
            Self::Active => "active",
        };
        f.write_str(s)
    }
}

/// Trait defining the lifecycle interface of a hosted controller.
///
/// The controller manager drives implementations through this trait and
/// knows nothing else about them.
///
/// # Lifecycle
///
/// 1. `configure()` - Called once, on the first activation
/// 2. `activate()` - Called when a switch starts the controller
/// 3. `update()` - Called every cycle while active
/// 4. `deactivate()` - Called when a switch stops the controller
/// 5. `shutdown()` - Called once when the controller is unloaded
///
/// # Timing Contracts
///
/// | Operation | Thread | RT Constraint |
/// |-----------|--------|---------------|
/// | `claimed_interfaces()` | non-RT (load) | None |
/// | `configure()` / `activate()` / `deactivate()` | RT | Should be short |
/// | `update()` | RT | **HARD** (one period) |
/// | `shutdown()` | non-RT (unload) | None |
pub trait Controller: Send {
    /// Resource interfaces this controller needs exclusive access to while active
    /// (e.g. `"joint1/position"`).
    ///
    /// Queried once when the controller is loaded.
    fn claimed_interfaces(&self) -> Vec<String> {
        Vec::new()
    }

    /// Prepare the controller; called before the first activation.
    fn configure(&mut self) -> Result<(), ControllerError>;

    /// Start the controller on the given claimed interfaces.
    fn activate(&mut self, interfaces: &[String]) -> Result<(), ControllerError>;

    /// Stop the controller and release the given interfaces.
    fn deactivate(&mut self, interfaces: &[String]) -> Result<(), ControllerError>;

    /// Execute one control cycle.
    ///
    /// # Arguments
    /// * `now` - Timestamp of the current cycle
    /// * `period` - Actual elapsed time since the previous cycle
    ///
    /// # Timing
    /// - MUST complete within one period
    /// - Should be deterministic (no allocations, no blocking I/O)
    fn update(&mut self, now: Instant, period: Duration) -> Result<(), ControllerError>;

    /// Release resources when the controller is destroyed.
    ///
    /// Default: no-op.
    fn shutdown(&mut self) {}
}

/// Factory closure creating controller instances of one type.
pub type ControllerFactory =
    Arc<dyn Fn() -> Result<Box<dyn Controller>, PluginError> + Send + Sync>;

/// Creates controller instances from a type name.
///
/// The manager only sees this contract; how types are discovered (static
/// registration, dynamic libraries, ...) is up to the implementation.
pub trait PluginFactory: Send + Sync {
    /// Create a new, exclusively owned controller instance.
    ///
    /// # Errors
    /// `PluginError::UnknownType` if the type is not known,
    /// `PluginError::ConstructionFailed` if the constructor fails.
    fn create(&self, type_name: &str) -> Result<Box<dyn Controller>, PluginError>;

    /// Type names this factory can create.
    fn available_types(&self) -> Vec<String>;
}
