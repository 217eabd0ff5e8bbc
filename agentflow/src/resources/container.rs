//! The resource container: shared services with dependency resolution.
//!
//! Resources are registered as descriptors plus factories, resolved once
//! at startup into live instances in topological order, and torn down in
//! reverse order. The container is the only structure shared across
//! concurrent runs; after resolution it is read-mostly (lookups only).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{error, info, warn};

use super::{BreakerConfig, BreakerRegistry, CircuitBreaker, ResourceDescriptor, ResourceKind};
use crate::errors::{CircuitOpenError, CircularDependencyError, EngineError, ResourceError};
use crate::events::{EventSink, NoOpEventSink};

/// A shared, long-lived service managed by the container.
///
/// Lifecycle hooks default to no-ops; a resource overrides what it needs.
/// Dependencies arrive through `attach_dependency` after construction and
/// before `initialize` runs.
#[async_trait]
pub trait Resource: Send + Sync + std::fmt::Debug {
    /// The resource name; must match its descriptor.
    fn name(&self) -> &str;

    /// Receives an already-initialized dependency instance.
    fn attach_dependency(&self, _name: &str, _dep: Arc<dyn Resource>) {}

    /// Prepares the resource for use.
    async fn initialize(&self) -> Result<(), ResourceError> {
        Ok(())
    }

    /// Verifies the resource is reachable and usable.
    async fn health_check(&self) -> Result<(), ResourceError> {
        Ok(())
    }

    /// Releases the resource.
    async fn shutdown(&self) -> Result<(), ResourceError> {
        Ok(())
    }
}

/// Storage bag for attached dependencies.
///
/// Embed one and delegate `attach_dependency` to it; graphs of arbitrary
/// depth then need no per-resource wiring code.
#[derive(Default)]
pub struct ResourceDeps {
    inner: RwLock<HashMap<String, Arc<dyn Resource>>>,
}

impl ResourceDeps {
    /// Creates an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a dependency under its name.
    pub fn attach(&self, name: impl Into<String>, dep: Arc<dyn Resource>) {
        self.inner.write().insert(name.into(), dep);
    }

    /// Looks up an attached dependency.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Resource>> {
        self.inner.read().get(name).cloned()
    }

    /// Names of all attached dependencies.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }
}

impl std::fmt::Debug for ResourceDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceDeps")
            .field("names", &self.names())
            .finish()
    }
}

/// Builds an unconstructed resource instance.
pub type ResourceFactory = Box<dyn Fn() -> Arc<dyn Resource> + Send + Sync>;

/// A resolved resource paired with its kind's circuit breaker.
///
/// Calls that cross the resource boundary go through [`ResourceHandle::call`],
/// which refuses immediately while the circuit is open and records the
/// outcome otherwise.
pub struct ResourceHandle {
    name: String,
    kind: ResourceKind,
    resource: Arc<dyn Resource>,
    breaker: Arc<CircuitBreaker>,
    sink: Arc<dyn EventSink>,
}

impl ResourceHandle {
    /// The resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The resource kind.
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Direct access to the instance, bypassing the breaker. Use `call`
    /// for anything that crosses a network, database, or filesystem
    /// boundary.
    #[must_use]
    pub fn resource(&self) -> &Arc<dyn Resource> {
        &self.resource
    }

    /// Whether the kind's circuit currently refuses calls.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.breaker.can_execute()
    }

    /// Runs an operation against the resource under the circuit breaker.
    ///
    /// # Errors
    ///
    /// Returns `CircuitOpenError` without invoking the operation while the
    /// circuit is open, or `ResourceError::CallFailed` when the operation
    /// itself fails (the failure is counted toward the breaker).
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, EngineError>
    where
        F: FnOnce(Arc<dyn Resource>) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>> + Send,
    {
        if !self.breaker.try_acquire() {
            return Err(CircuitOpenError::new(self.kind, &self.name).into());
        }

        let start = std::time::Instant::now();
        let result = op(self.resource.clone()).await;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(value) => {
                self.breaker.record_success();
                self.sink.try_emit(
                    "resource.call_completed",
                    Some(serde_json::json!({
                        "resource": self.name,
                        "kind": self.kind.as_str(),
                        "duration_ms": duration_ms,
                        "success": true,
                    })),
                );
                Ok(value)
            }
            Err(err) => {
                self.breaker.record_failure();
                self.sink.try_emit(
                    "resource.call_failed",
                    Some(serde_json::json!({
                        "resource": self.name,
                        "kind": self.kind.as_str(),
                        "duration_ms": duration_ms,
                        "success": false,
                        "error": err.to_string(),
                    })),
                );
                Err(ResourceError::call_failed(&self.name, err.to_string()).into())
            }
        }
    }
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Holds named shared services and resolves their dependency graph.
pub struct ResourceContainer {
    descriptors: RwLock<Vec<ResourceDescriptor>>,
    factories: RwLock<HashMap<String, ResourceFactory>>,
    instances: DashMap<String, Arc<dyn Resource>>,
    kinds: RwLock<HashMap<String, ResourceKind>>,
    init_order: RwLock<Vec<String>>,
    breakers: BreakerRegistry,
    sink: Arc<dyn EventSink>,
}

impl Default for ResourceContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceContainer {
    /// Creates an empty container with default breakers and no sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptors: RwLock::new(Vec::new()),
            factories: RwLock::new(HashMap::new()),
            instances: DashMap::new(),
            kinds: RwLock::new(HashMap::new()),
            init_order: RwLock::new(Vec::new()),
            breakers: BreakerRegistry::new(),
            sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink for resource lifecycle events.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Overrides the breaker configuration for one resource kind.
    #[must_use]
    pub fn with_breaker_config(mut self, kind: ResourceKind, config: BreakerConfig) -> Self {
        self.breakers.configure(kind, config);
        self
    }

    /// Registers a resource descriptor and its factory.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRegistered` on a duplicate name.
    pub fn register(
        &self,
        descriptor: ResourceDescriptor,
        factory: ResourceFactory,
    ) -> Result<(), ResourceError> {
        let mut factories = self.factories.write();
        if factories.contains_key(&descriptor.name) {
            return Err(ResourceError::already_registered(&descriptor.name));
        }

        factories.insert(descriptor.name.clone(), factory);
        self.kinds.write().insert(descriptor.name.clone(), descriptor.kind);
        self.descriptors.write().push(descriptor);
        Ok(())
    }

    /// Registered resource names, in registration order.
    #[must_use]
    pub fn resource_names(&self) -> Vec<String> {
        self.descriptors.read().iter().map(|d| d.name.clone()).collect()
    }

    /// The kind a resource was registered with.
    #[must_use]
    pub fn kind_of(&self, name: &str) -> Option<ResourceKind> {
        self.kinds.read().get(name).copied()
    }

    /// The breaker registry guarding this container.
    #[must_use]
    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Computes the initialization order without constructing anything.
    ///
    /// # Errors
    ///
    /// Returns the cycle (as `CircularDependencyError`) or the first
    /// unknown dependency. Nothing is instantiated on failure.
    pub fn resolution_order(&self) -> Result<Vec<String>, EngineError> {
        let descriptors = self.descriptors.read();
        let by_name: HashMap<&str, &ResourceDescriptor> =
            descriptors.iter().map(|d| (d.name.as_str(), d)).collect();

        for descriptor in descriptors.iter() {
            for dep in &descriptor.dependencies {
                if !by_name.contains_key(dep.as_str()) {
                    return Err(
                        ResourceError::unknown_dependency(&descriptor.name, dep).into()
                    );
                }
            }
        }

        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut in_stack = HashSet::new();
        let mut path = Vec::new();

        fn visit(
            node: &str,
            by_name: &HashMap<&str, &ResourceDescriptor>,
            visited: &mut HashSet<String>,
            in_stack: &mut HashSet<String>,
            path: &mut Vec<String>,
            order: &mut Vec<String>,
        ) -> Result<(), CircularDependencyError> {
            if in_stack.contains(node) {
                let start = path.iter().position(|n| n == node).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].to_vec();
                cycle.push(node.to_string());
                return Err(CircularDependencyError::new(cycle));
            }
            if visited.contains(node) {
                return Ok(());
            }

            visited.insert(node.to_string());
            in_stack.insert(node.to_string());
            path.push(node.to_string());

            if let Some(descriptor) = by_name.get(node) {
                for dep in &descriptor.dependencies {
                    visit(dep, by_name, visited, in_stack, path, order)?;
                }
            }

            in_stack.remove(node);
            path.pop();
            order.push(node.to_string());
            Ok(())
        }

        for descriptor in descriptors.iter() {
            visit(
                &descriptor.name,
                &by_name,
                &mut visited,
                &mut in_stack,
                &mut path,
                &mut order,
            )?;
        }

        Ok(order)
    }

    /// Builds, wires, and initializes every registered resource in
    /// dependency order.
    ///
    /// Fail-fast: the first resource whose `initialize` or `health_check`
    /// fails aborts resolution immediately, and the error names it.
    ///
    /// # Errors
    ///
    /// `CircularDependencyError`, `UnknownDependency`, or the failing
    /// resource's `Init`/`Health` error.
    pub async fn resolve(&self) -> Result<Vec<Arc<dyn Resource>>, EngineError> {
        let order = self.resolution_order()?;

        let mut resolved = Vec::with_capacity(order.len());
        for name in order {
            let instance = {
                let factories = self.factories.read();
                match factories.get(&name) {
                    Some(factory) => factory(),
                    None => return Err(ResourceError::not_found(&name).into()),
                }
            };

            let dependencies = {
                let descriptors = self.descriptors.read();
                descriptors
                    .iter()
                    .find(|d| d.name == name)
                    .map(|d| d.dependencies.clone())
                    .unwrap_or_default()
            };
            for dep in dependencies {
                if let Some(built) = self.instances.get(&dep) {
                    instance.attach_dependency(&dep, built.clone());
                }
            }

            if let Err(err) = instance.initialize().await {
                error!(resource = %name, %err, "resource initialization failed; aborting startup");
                self.sink.try_emit(
                    "resource.init_failed",
                    Some(serde_json::json!({"resource": name, "error": err.to_string()})),
                );
                return Err(err.into());
            }
            if let Err(err) = instance.health_check().await {
                error!(resource = %name, %err, "resource health check failed; aborting startup");
                self.sink.try_emit(
                    "resource.health_failed",
                    Some(serde_json::json!({"resource": name, "error": err.to_string()})),
                );
                return Err(err.into());
            }

            info!(resource = %name, "resource initialized");
            self.sink.try_emit(
                "resource.initialized",
                Some(serde_json::json!({"resource": name})),
            );
            self.instances.insert(name.clone(), instance.clone());
            self.init_order.write().push(name);
            resolved.push(instance);
        }

        Ok(resolved)
    }

    /// Looks up a resolved instance.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the name is unknown or not yet resolved.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Resource>, ResourceError> {
        self.instances
            .get(name)
            .map(|entry| entry.clone())
            .ok_or_else(|| ResourceError::not_found(name))
    }

    /// Looks up a resolved instance together with its kind's breaker.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the name is unknown or not yet resolved.
    pub fn handle(&self, name: &str) -> Result<ResourceHandle, ResourceError> {
        let resource = self.get(name)?;
        let kind = self.kind_of(name).unwrap_or_default();
        Ok(ResourceHandle {
            name: name.to_string(),
            kind,
            resource,
            breaker: self.breakers.for_kind(kind),
            sink: self.sink.clone(),
        })
    }

    /// Shuts every resource down in reverse initialization order.
    ///
    /// Teardown continues past individual failures; every error is
    /// collected and returned so no resource is left half-closed because
    /// an earlier one failed.
    pub async fn shutdown(&self) -> Vec<ResourceError> {
        let order: Vec<String> = {
            let mut order = self.init_order.write();
            order.drain(..).rev().collect()
        };

        let mut failures = Vec::new();
        for name in order {
            let Some((_, instance)) = self.instances.remove(&name) else {
                continue;
            };
            if let Err(err) = instance.shutdown().await {
                warn!(resource = %name, %err, "resource shutdown failed; continuing teardown");
                self.sink.try_emit(
                    "resource.shutdown_failed",
                    Some(serde_json::json!({"resource": name, "error": err.to_string()})),
                );
                failures.push(ResourceError::shutdown(&name, err.to_string()));
            }
        }
        failures
    }
}

impl std::fmt::Debug for ResourceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceContainer")
            .field("registered", &self.resource_names())
            .field("resolved", &self.instances.len())
            .finish()
    }
}
