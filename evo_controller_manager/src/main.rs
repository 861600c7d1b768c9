//! # EVO Controller Manager Binary
//!
//! Hosts controllers on a fixed-period real-time loop.
//!
//! # Usage
//!
//! ```bash
//! # Run with a configuration file
//! evo_controller_manager --config config/controller_manager.toml
//!
//! # Verbose JSON logging
//! evo_controller_manager --config config/controller_manager.toml -v --json
//!
//! # List the built-in controller types
//! evo_controller_manager --list-types
//! ```

#![deny(warnings)]

use clap::Parser;
use evo_common::config::{ConfigError, ConfigLoader, LogLevel, ManagerConfig};
use evo_common::consts::DEFAULT_CONFIG_PATH;
use evo_common::controller::LifecycleState;
use evo_controller_manager::controllers::register_builtin_controllers;
use evo_controller_manager::{
    ControlManager, ControllerTypeRegistry, RtLoop, Strictness, SwitchRequest,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Upper bound for startup/shutdown switches when no timeout is configured.
const SWITCH_WAIT_LIMIT: Duration = Duration::from_secs(5);

/// EVO Controller Manager - real-time controller host
#[derive(Parser, Debug)]
#[command(name = "evo_controller_manager")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Real-time controller manager with double-buffered controller registry")]
#[command(long_about = None)]
struct Args {
    /// Path to the controller manager configuration file.
    /// Falls back to /etc/evo/controller_manager.toml, then to built-in
    /// defaults (100 Hz, no controllers).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,

    /// Print the available controller types as JSON and exit
    #[arg(long)]
    list_types: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("Controller manager failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), Path::new(DEFAULT_CONFIG_PATH));
    let config = load_config_with_tracing(&args, config_path.as_deref())?;

    let mut types = ControllerTypeRegistry::new();
    register_builtin_controllers(&mut types);

    if args.list_types {
        let manager = ControlManager::new(Box::new(types));
        println!("{}", serde_json::to_string_pretty(&manager.list_controller_types())?);
        return Ok(());
    }

    info!(
        "EVO Controller Manager v{} starting ({})...",
        env!("CARGO_PKG_VERSION"),
        config.shared.service_name
    );
    match &config_path {
        Some(path) => info!("Loaded configuration from {:?}", path),
        None => warn!(
            "No --config given and {} not found, using built-in defaults",
            DEFAULT_CONFIG_PATH
        ),
    }

    let manager = Arc::new(ControlManager::from_config(&config, Box::new(types))?);
    for entry in &config.controllers {
        manager.load_configured_controller(&entry.name)?;
    }

    // Setup signal handler.
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            info!("Received shutdown signal");
            shutdown.store(true, Ordering::SeqCst);
        })?;
    }

    // Start the RT loop.
    let mut rt_loop = RtLoop::new(Arc::clone(&manager), config.update_period());
    let running = rt_loop.running_flag();
    let rt_handle = thread::Builder::new()
        .name("rt_loop".to_string())
        .spawn(move || {
            let result = rt_loop.run();
            (result, rt_loop.stats())
        })?;

    let wait_limit = switch_wait_limit(&config);
    let autostart = config.autostart_controllers();
    if !autostart.is_empty() {
        let request = SwitchRequest::new()
            .with_start(autostart)
            .with_strictness(Strictness::Strict);
        run_switch(&manager, request, wait_limit);
    }

    while !shutdown.load(Ordering::SeqCst) && running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    // Stop and unload controllers while the RT loop is still ticking;
    // list handovers need it to move onto the new list.
    let active: Vec<String> = manager
        .list_controllers()
        .into_iter()
        .filter(|c| c.state == LifecycleState::Active)
        .map(|c| c.name)
        .collect();
    if !active.is_empty() {
        let request = SwitchRequest::new()
            .with_stop(active)
            .with_strictness(Strictness::Strict);
        run_switch(&manager, request, wait_limit);
    }
    if running.load(Ordering::SeqCst) {
        for info in manager.list_controllers() {
            if let Err(e) = manager.unload_controller(&info.name) {
                warn!("Failed to unload '{}': {}", info.name, e);
            }
        }
    }

    running.store(false, Ordering::SeqCst);
    match rt_handle.join() {
        Ok((result, stats)) => {
            info!(
                "RT loop: {} cycles, avg={}us, max={}us, overruns={}",
                stats.cycle_count,
                stats.avg_cycle_us(),
                stats.max_cycle_us,
                stats.overruns
            );
            result?;
        }
        Err(_) => error!("RT loop thread panicked"),
    }

    info!("EVO Controller Manager shutdown complete");
    Ok(())
}

/// `--config` if given, else `fallback` if that file exists.
fn resolve_config_path(explicit: Option<&Path>, fallback: &Path) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => fallback.exists().then(|| fallback.to_path_buf()),
    }
}

/// Load the configuration and install tracing.
///
/// The configured level is only known after loading, so a load error is
/// returned after tracing is up at the default level.
fn load_config_with_tracing(args: &Args, path: Option<&Path>) -> Result<ManagerConfig, ConfigError> {
    let config = match path {
        Some(path) => ManagerConfig::load(path),
        None => Ok(ManagerConfig::default()),
    };
    let level = match &config {
        Ok(config) => config.shared.log_level,
        Err(_) => LogLevel::default(),
    };
    setup_tracing(args, level);
    config
}

/// Stage a switch and wait for its report, logging the outcome.
fn run_switch(manager: &ControlManager, request: SwitchRequest, limit: Duration) {
    match manager.switch_controller(request) {
        Ok(accepted) => match manager.wait_for_switch(limit) {
            Some(report) => match report.outcome() {
                Ok(()) => info!(
                    "Switch done: started={:?} stopped={:?}",
                    report.started, report.stopped
                ),
                Err(e) => error!("Switch failed: {}", e),
            },
            None => warn!(
                "Switch start={:?} stop={:?} still pending after {:?}",
                accepted.start, accepted.stop, limit
            ),
        },
        Err(e) => error!("Switch rejected: {}", e),
    }
}

/// Wait at least as long as the configured switch timeout.
fn switch_wait_limit(config: &ManagerConfig) -> Duration {
    let timeout = config.default_switch_timeout();
    if timeout.is_zero() {
        SWITCH_WAIT_LIMIT
    } else {
        timeout + config.update_period() * 2
    }
}

/// Setup tracing subscriber based on CLI arguments and configured level.
fn setup_tracing(args: &Args, configured: LogLevel) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        configured.into()
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // A second install (only possible in tests) keeps the first subscriber.
    let installed = if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    if let Err(e) = installed {
        eprintln!("Tracing already initialized: {e}");
    }
}
