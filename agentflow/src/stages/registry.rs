//! Stage registry: the ordered mapping from stage to plugin list.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use super::{Plugin, PluginDescriptor, Stage, StageClassifier};
use crate::errors::{ConfigValidationError, ValidationFailure};

/// A plugin paired with its descriptor and resolved stage assignment.
#[derive(Debug, Clone)]
pub struct RegisteredPlugin {
    descriptor: PluginDescriptor,
    plugin: Arc<dyn Plugin>,
    stages: Vec<Stage>,
}

impl RegisteredPlugin {
    /// The plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// The configuration-time descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    /// The plugin implementation.
    #[must_use]
    pub fn plugin(&self) -> &Arc<dyn Plugin> {
        &self.plugin
    }

    /// The stages this plugin executes in, as resolved at registration.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }
}

/// Ordered plugin lists per stage.
///
/// Plugins execute in registration order within a stage; registration
/// order is whatever order the configuration loader supplied. There is no
/// priority resolution and no reordering. The registry is frozen once the
/// engine builder hands it to the orchestrator.
#[derive(Debug, Default)]
pub struct StageRegistry {
    by_stage: HashMap<Stage, Vec<Arc<RegisteredPlugin>>>,
    registration_order: Vec<String>,
}

impl StageRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin, resolving its stage assignment once.
    ///
    /// Precedence: explicit `stages` list, then the kind default, then the
    /// advisory classifier. An explicit list that disagrees with the kind
    /// default is logged, never rejected.
    ///
    /// # Errors
    ///
    /// Returns a validation error when no stage can be resolved at all.
    pub fn register(
        &mut self,
        descriptor: PluginDescriptor,
        plugin: Arc<dyn Plugin>,
        classifier: Option<&dyn StageClassifier>,
    ) -> Result<(), ConfigValidationError> {
        let stages = resolve_stages(&descriptor, classifier);
        if stages.is_empty() {
            return Err(ConfigValidationError::new(
                "syntax",
                vec![ValidationFailure::new(
                    format!("plugin:{}", descriptor.name),
                    format!(
                        "no resolvable stage assignment for kind '{}'; declare stages explicitly",
                        descriptor.kind
                    ),
                )],
            ));
        }

        let registered = Arc::new(RegisteredPlugin {
            descriptor,
            plugin,
            stages: stages.clone(),
        });

        self.registration_order.push(registered.name().to_string());
        for stage in stages {
            self.by_stage.entry(stage).or_default().push(registered.clone());
        }
        Ok(())
    }

    /// The plugins assigned to a stage, in registration order.
    #[must_use]
    pub fn plugins_for(&self, stage: Stage) -> &[Arc<RegisteredPlugin>] {
        self.by_stage.get(&stage).map_or(&[], Vec::as_slice)
    }

    /// All registered plugin names, in registration order.
    #[must_use]
    pub fn plugin_names(&self) -> &[String] {
        &self.registration_order
    }

    /// The number of registered plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registration_order.len()
    }

    /// Returns true when no plugin is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registration_order.is_empty()
    }
}

fn resolve_stages(
    descriptor: &PluginDescriptor,
    classifier: Option<&dyn StageClassifier>,
) -> Vec<Stage> {
    if !descriptor.stages.is_empty() {
        let defaults = descriptor.kind.default_stages();
        if !defaults.is_empty() && descriptor.stages.as_slice() != defaults {
            warn!(
                plugin = %descriptor.name,
                kind = %descriptor.kind,
                explicit = ?descriptor.stages,
                default = ?defaults,
                "explicit stage assignment overrides kind default"
            );
        }
        return descriptor.stages.clone();
    }

    let defaults = descriptor.kind.default_stages();
    if !defaults.is_empty() {
        return defaults.to_vec();
    }

    classifier
        .and_then(|c| c.classify(descriptor))
        .map(|stage| vec![stage])
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{NameHintClassifier, PluginKind};
    use crate::testing::NoOpPlugin;

    fn noop(name: &str) -> Arc<dyn Plugin> {
        Arc::new(NoOpPlugin::new(name))
    }

    #[test]
    fn test_registration_order_is_execution_order() {
        let mut registry = StageRegistry::new();
        registry
            .register(PluginDescriptor::new("first", PluginKind::Tool), noop("first"), None)
            .unwrap();
        registry
            .register(PluginDescriptor::new("second", PluginKind::Tool), noop("second"), None)
            .unwrap();

        let names: Vec<&str> = registry
            .plugins_for(Stage::Do)
            .iter()
            .map(|p| p.name())
            .collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_explicit_stages_override_kind_default() {
        let mut registry = StageRegistry::new();
        let descriptor =
            PluginDescriptor::new("odd_tool", PluginKind::Tool).with_stages([Stage::Parse]);
        registry.register(descriptor, noop("odd_tool"), None).unwrap();

        assert_eq!(registry.plugins_for(Stage::Parse).len(), 1);
        assert!(registry.plugins_for(Stage::Do).is_empty());
    }

    #[test]
    fn test_adapter_registers_in_both_default_stages() {
        let mut registry = StageRegistry::new();
        registry
            .register(PluginDescriptor::new("io", PluginKind::Adapter), noop("io"), None)
            .unwrap();

        assert_eq!(registry.plugins_for(Stage::Parse).len(), 1);
        assert_eq!(registry.plugins_for(Stage::Deliver).len(), 1);
    }

    #[test]
    fn test_classifier_used_as_last_resort() {
        let mut registry = StageRegistry::new();
        let classifier = NameHintClassifier::new();
        registry
            .register(
                PluginDescriptor::new("output_bridge", PluginKind::Resource),
                noop("output_bridge"),
                Some(&classifier),
            )
            .unwrap();

        assert_eq!(registry.plugins_for(Stage::Deliver).len(), 1);
    }

    #[test]
    fn test_unresolvable_assignment_is_rejected() {
        let mut registry = StageRegistry::new();
        let result = registry.register(
            PluginDescriptor::new("widget", PluginKind::Resource),
            noop("widget"),
            None,
        );

        let err = result.unwrap_err();
        assert_eq!(err.failures.len(), 1);
        assert!(err.failures[0].location.contains("widget"));
        assert!(registry.is_empty());
    }
}
