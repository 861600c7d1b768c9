//! Built-in controller types.
//!
//! - [`heartbeat`] - Liveness controller counting control cycles
//!
//! # Adding New Controllers
//!
//! 1. Create a new submodule under `controllers/`
//! 2. Implement the `Controller` trait from `evo_common::controller`
//! 3. Register its factory in [`register_builtin_controllers`]

pub mod heartbeat;

use crate::factory_registry::ControllerTypeRegistry;

/// Register all built-in controller types.
pub fn register_builtin_controllers(registry: &mut ControllerTypeRegistry) {
    registry.register(heartbeat::TYPE_NAME, heartbeat::create_controller);
}
