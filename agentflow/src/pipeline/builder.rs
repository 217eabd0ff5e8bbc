//! Engine assembly.
//!
//! The builder takes the loader's configuration plus the actual plugin,
//! resource, and tool implementations, runs the fatal validation phases,
//! freezes the stage registry, resolves the container fail-fast, spawns
//! the background runtime checks, and hands back a ready engine. There is
//! no partial or degraded startup: either every check passes or the
//! builder returns the whole validation report.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::errors::{ConfigValidationError, EngineError, ValidationFailure};
use crate::events::{EventSink, NoOpEventSink};
use crate::memory::{ConversationMemory, InMemoryConversationStore};
use crate::pipeline::PipelineEngine;
use crate::resources::{BreakerConfig, ResourceContainer, ResourceFactory, ResourceKind};
use crate::stages::{Plugin, StageClassifier, StageRegistry};
use crate::tools::{ToolHandler, ToolRegistry};
use crate::validation::{run_dependency_phase, run_syntax_phase, spawn_runtime_phase};

/// Assembles a [`PipelineEngine`] from configuration and implementations.
pub struct EngineBuilder {
    config: EngineConfig,
    plugins: HashMap<String, Arc<dyn Plugin>>,
    factories: HashMap<String, ResourceFactory>,
    tools: Vec<(String, Arc<dyn ToolHandler>)>,
    memory: Arc<dyn ConversationMemory>,
    sink: Arc<dyn EventSink>,
    classifier: Option<Arc<dyn StageClassifier>>,
    breaker_configs: Vec<(ResourceKind, BreakerConfig)>,
}

impl EngineBuilder {
    /// Starts a builder from loader output.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            plugins: HashMap::new(),
            factories: HashMap::new(),
            tools: Vec::new(),
            memory: Arc::new(InMemoryConversationStore::new()),
            sink: Arc::new(NoOpEventSink),
            classifier: None,
            breaker_configs: Vec::new(),
        }
    }

    /// Supplies the implementation for a configured plugin descriptor.
    #[must_use]
    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.insert(plugin.name().to_string(), plugin);
        self
    }

    /// Supplies the factory for a configured resource descriptor.
    #[must_use]
    pub fn resource_factory(mut self, name: impl Into<String>, factory: ResourceFactory) -> Self {
        self.factories.insert(name.into(), factory);
        self
    }

    /// Registers a tool handler.
    #[must_use]
    pub fn tool(mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) -> Self {
        self.tools.push((name.into(), handler));
        self
    }

    /// Sets the conversation persistence collaborator.
    #[must_use]
    pub fn memory(mut self, memory: Arc<dyn ConversationMemory>) -> Self {
        self.memory = memory;
        self
    }

    /// Sets the observability sink.
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the advisory stage classifier.
    #[must_use]
    pub fn classifier(mut self, classifier: Arc<dyn StageClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Overrides the circuit-breaker configuration for one resource kind.
    #[must_use]
    pub fn breaker_config(mut self, kind: ResourceKind, config: BreakerConfig) -> Self {
        self.breaker_configs.push((kind, config));
        self
    }

    /// Validates, wires, and initializes everything.
    ///
    /// # Errors
    ///
    /// `ConfigValidationError` with the whole report when a fatal phase
    /// rejects the configuration or a descriptor lacks an implementation;
    /// any container resolution error (cycles, unknown dependencies,
    /// fail-fast init/health failures) otherwise.
    pub async fn build(self) -> Result<PipelineEngine, EngineError> {
        if let Some(err) = run_syntax_phase(&self.config).into_error() {
            return Err(err.into());
        }
        if let Some(err) = run_dependency_phase(&self.config).into_error() {
            return Err(err.into());
        }

        let mut binding_failures = Vec::new();
        for descriptor in &self.config.plugins {
            if !self.plugins.contains_key(&descriptor.name) {
                binding_failures.push(ValidationFailure::new(
                    format!("plugin:{}", descriptor.name),
                    "no implementation registered for this descriptor",
                ));
            }
        }
        for descriptor in &self.config.resources {
            if !self.factories.contains_key(&descriptor.name) {
                binding_failures.push(ValidationFailure::new(
                    format!("resource:{}", descriptor.name),
                    "no factory registered for this descriptor",
                ));
            }
        }
        if !binding_failures.is_empty() {
            return Err(ConfigValidationError::new("dependency", binding_failures).into());
        }

        let mut registry = StageRegistry::new();
        let mut registration_failures = Vec::new();
        for descriptor in &self.config.plugins {
            let Some(plugin) = self.plugins.get(&descriptor.name).cloned() else {
                continue;
            };
            if let Err(err) = registry.register(
                descriptor.clone(),
                plugin,
                self.classifier.as_deref(),
            ) {
                registration_failures.extend(err.failures);
            }
        }
        if !registration_failures.is_empty() {
            return Err(ConfigValidationError::new("syntax", registration_failures).into());
        }

        let mut container = ResourceContainer::new().with_event_sink(self.sink.clone());
        for (kind, config) in self.breaker_configs {
            container = container.with_breaker_config(kind, config);
        }
        let container = Arc::new(container);

        let mut factories = self.factories;
        for descriptor in &self.config.resources {
            if let Some(factory) = factories.remove(&descriptor.name) {
                container.register(descriptor.clone(), factory)?;
            }
        }
        container.resolve().await?;

        let tools = Arc::new(ToolRegistry::new());
        for (name, handler) in self.tools {
            tools.register(name, handler);
        }

        // Runtime connectivity checks run in the background; startup does
        // not wait for them.
        drop(spawn_runtime_phase(container.clone(), self.sink.clone()));

        Ok(PipelineEngine::new(
            Arc::new(registry),
            container,
            tools,
            self.memory,
            self.sink,
            self.config.max_iterations,
        ))
    }
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("plugins", &self.plugins.len())
            .field("resources", &self.factories.len())
            .field("tools", &self.tools.len())
            .finish()
    }
}
