//! Prelude module for common re-exports.
//!
//! This module provides convenient re-exports of commonly used types
//! so that consumers can do `use evo_common::prelude::*;` and get
//! the most important types without listing individual paths.
//!
//! # Usage
//!
//! ```rust
//! use evo_common::prelude::*;
//! ```

use std::time::Duration;

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, ControllerEntry, ManagerConfig, SharedConfig};

// ─── Controller Contract ────────────────────────────────────────────
pub use crate::controller::{
    Controller, ControllerError, ControllerFactory, LifecycleState, PluginError, PluginFactory,
};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{DEFAULT_SWITCH_POLL_INTERVAL_US, DEFAULT_UPDATE_RATE_HZ, INFINITE_TIMEOUT};

/// Default registry poll interval as Duration.
pub const DEFAULT_SWITCH_POLL_INTERVAL: Duration =
    Duration::from_micros(DEFAULT_SWITCH_POLL_INTERVAL_US);
