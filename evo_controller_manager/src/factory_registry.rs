//! Controller type registry.
//!
//! Provides a `ControllerTypeRegistry` struct mapping type names to controller
//! factories. It is the default `PluginFactory` handed to `ControlManager`.

use evo_common::controller::{Controller, ControllerFactory, PluginError, PluginFactory};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of available controller types.
///
/// Constructed at startup, populated via `register()`, and passed to
/// `ControlManager` by value.
pub struct ControllerTypeRegistry {
    factories: HashMap<String, ControllerFactory>,
}

impl ControllerTypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a controller factory.
    ///
    /// # Panics
    /// Panics if a type with the same name is already registered.
    pub fn register<F>(&mut self, type_name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Box<dyn Controller>, PluginError> + Send + Sync + 'static,
    {
        let type_name = type_name.into();
        if self.factories.contains_key(&type_name) {
            panic!("Controller type '{type_name}' is already registered");
        }
        self.factories.insert(type_name, Arc::new(factory));
    }

    /// Get a controller factory by type name.
    pub fn get_factory(&self, type_name: &str) -> Option<ControllerFactory> {
        self.factories.get(type_name).cloned()
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for ControllerTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginFactory for ControllerTypeRegistry {
    fn create(&self, type_name: &str) -> Result<Box<dyn Controller>, PluginError> {
        let factory = self
            .factories
            .get(type_name)
            .ok_or_else(|| PluginError::UnknownType(type_name.to_string()))?;
        factory()
    }

    fn available_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }
}
