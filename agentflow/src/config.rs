//! Engine configuration.
//!
//! The engine never reads configuration files itself; an external loader
//! produces a validated [`EngineConfig`] and hands it to the builder.

use serde::{Deserialize, Serialize};

use crate::resources::ResourceDescriptor;
use crate::stages::PluginDescriptor;

/// The default iteration ceiling for a run.
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

/// The validated output of the external configuration loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Resources to register with the container.
    #[serde(default)]
    pub resources: Vec<ResourceDescriptor>,
    /// Plugins to register with the stage registry, in execution order.
    #[serde(default)]
    pub plugins: Vec<PluginDescriptor>,
    /// Full stage passes allowed per run before the ERROR stage runs.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resources: Vec::new(),
            plugins: Vec::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl EngineConfig {
    /// Creates an empty configuration with the default iteration ceiling.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resource descriptor.
    #[must_use]
    pub fn with_resource(mut self, descriptor: ResourceDescriptor) -> Self {
        self.resources.push(descriptor);
        self
    }

    /// Adds a plugin descriptor.
    #[must_use]
    pub fn with_plugin(mut self, descriptor: PluginDescriptor) -> Self {
        self.plugins.push(descriptor);
        self
    }

    /// Sets the iteration ceiling.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::PluginKind;

    #[test]
    fn test_default_ceiling() {
        assert_eq!(EngineConfig::default().max_iterations, 5);
    }

    #[test]
    fn test_max_iterations_defaults_when_absent_from_json() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_iterations, DEFAULT_MAX_ITERATIONS);
    }

    #[test]
    fn test_builder_accumulates_descriptors() {
        let config = EngineConfig::new()
            .with_plugin(PluginDescriptor::new("echo", PluginKind::Adapter))
            .with_max_iterations(3);
        assert_eq!(config.plugins.len(), 1);
        assert_eq!(config.max_iterations, 3);
    }
}
