//! System-wide constants for the EVO controller manager.
//!
//! Single source of truth for numeric limits and default paths.

/// Default real-time loop frequency [Hz].
pub const DEFAULT_UPDATE_RATE_HZ: u32 = 100;

/// Highest accepted real-time loop frequency [Hz].
pub const MAX_UPDATE_RATE_HZ: u32 = 10_000;

/// Default poll interval of the registry busy-wait [µs].
///
/// The non-RT side sleeps this long between checks while waiting for the
/// RT thread to move onto a freshly committed controller list.
pub const DEFAULT_SWITCH_POLL_INTERVAL_US: u64 = 200;

/// Switch timeout meaning "wait forever".
pub const INFINITE_TIMEOUT: std::time::Duration = std::time::Duration::ZERO;

/// Number of RT-side failures per controller that are always logged.
pub const RT_ERROR_LOG_BURST: u64 = 10;

/// After the burst, only every N-th RT-side failure is logged.
pub const RT_ERROR_LOG_EVERY: u64 = 1000;

/// Default service name used when no configuration file is given.
pub const DEFAULT_SERVICE_NAME: &str = "evo_controller_manager";

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/evo/controller_manager.toml";
