//! EVO Common Library
//!
//! This crate provides the shared contract between the EVO controller manager
//! and the controllers it hosts, plus configuration loading utilities.
//!
//! # Module Structure
//!
//! - [`controller`] - Controller capability trait, plugin factory contract, errors
//! - [`config`] - Configuration loading traits and types
//! - [`consts`] - System-wide constants
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! Add to your `Cargo.toml` with alias for shorter imports:
//! ```toml
//! [dependencies]
//! evo = { package = "evo_common", path = "../evo_common" }
//! ```
//!
//! Then import:
//! ```rust
//! use evo_common::controller::{Controller, ControllerError};
//! use evo_common::config::{ConfigLoader, ManagerConfig};
//! ```

pub mod config;
pub mod consts;
pub mod controller;
pub mod prelude;
