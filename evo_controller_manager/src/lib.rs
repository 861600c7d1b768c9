//! # EVO Controller Manager Library
//!
//! Real-time-safe controller registry and switching core.
//!
//! Controllers implement the `Controller` trait defined in
//! `evo_common::controller` and are created by a `PluginFactory`. A
//! management thread loads, unloads and switches them while the RT loop
//! keeps calling `update` on the active set without ever taking a lock.
//!
//! # Module Structure
//!
//! - [`manager`] - ControlManager: load/unload/list/switch and the per-cycle update
//! - [`registry`] - Double-buffered controller list shared with the RT thread
//! - [`switch`] - Switch requests, reports and the RT-side switch state machine
//! - [`record`] - Per-controller bookkeeping and lifecycle state
//! - [`factory_registry`] - Controller type registry (default plugin factory)
//! - [`controllers`] - Built-in controller types
//! - [`rt_loop`] - Fixed-period RT loop and timing statistics
//! - [`error`] - Manager error types
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     evo_controller_manager                       │
//! │  ┌─────────────┐    ┌──────────────┐    ┌─────────────────────┐  │
//! │  │ management  │───►│ControlManager│◄───│  Controller Type    │  │
//! │  │  (non-RT)   │    │              │    │  Registry (factory) │  │
//! │  └─────────────┘    └──┬────────┬──┘    └─────────────────────┘  │
//! │                stage   │        │ update()                       │
//! │                        ▼        ▼                                │
//! │              ┌──────────────┐ ┌───────────────────────┐          │
//! │              │SwitchMailbox │ │DoubleBufferedRegistry │◄── RtLoop│
//! │              └──────────────┘ └───────────┬───────────┘          │
//! │                                           ▼                      │
//! │                                  ┌────────────────┐              │
//! │                                  │  Controller    │ (trait obj)  │
//! │                                  └────────────────┘              │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod controllers;
pub mod error;
pub mod factory_registry;
pub mod manager;
pub mod record;
pub mod registry;
pub mod rt_loop;
pub mod switch;

// Re-export key types for convenience
pub use crate::error::{LifecycleOp, ManagerError, ManagerResult};
pub use crate::factory_registry::ControllerTypeRegistry;
pub use crate::manager::{ControlManager, CycleOutcome};
pub use crate::record::{ControllerInfo, ControllerRecord};
pub use crate::registry::DoubleBufferedRegistry;
pub use crate::rt_loop::{CycleStats, RtLoop};
pub use crate::switch::{
    SkipReason, SkippedController, Strictness, SwitchAccepted, SwitchFailure, SwitchPhase,
    SwitchReport, SwitchRequest, SwitchStatus,
};
