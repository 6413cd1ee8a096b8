use std::collections::HashMap;
use std::sync::Arc;

use beamline_core::traits::StepUnit;

/// Registry of available step units, keyed by name.
pub struct StepRegistry {
    units: HashMap<String, Arc<dyn StepUnit>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self {
            units: HashMap::new(),
        }
    }

    /// Register a step unit under its own name.
    pub fn register(&mut self, unit: impl StepUnit) {
        let name = unit.name().to_string();
        self.units.insert(name, Arc::new(unit));
    }

    /// Unregister a step unit by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.units.remove(name).is_some()
    }

    /// Get a step unit by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn StepUnit>> {
        self.units.get(name).cloned()
    }

    /// List all registered unit names.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.units.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Create a registry with all built-in units registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(crate::builtin::EchoStep);
        registry.register(crate::builtin::ConstStep);
        registry.register(crate::builtin::SleepStep);
        registry.register(crate::builtin::FailStep);
        registry
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}
