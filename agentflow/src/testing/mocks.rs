//! Mock plugins and resources.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::context::PluginContext;
use crate::errors::ResourceError;
use crate::resources::{Resource, ResourceDeps};
use crate::stages::{Plugin, Stage};

/// A plugin that does nothing and always succeeds.
#[derive(Debug)]
pub struct NoOpPlugin {
    name: String,
}

impl NoOpPlugin {
    /// Creates a no-op plugin.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Plugin for NoOpPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A plugin that records the stage and iteration of every call.
#[derive(Debug)]
pub struct RecordingPlugin {
    name: String,
    calls: Mutex<Vec<(Stage, u32)>>,
}

impl RecordingPlugin {
    /// Creates a recording plugin.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every `(stage, iteration)` pair seen so far, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<(Stage, u32)> {
        self.calls.lock().clone()
    }

    /// The number of times the plugin ran.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Plugin for RecordingPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &PluginContext) -> anyhow::Result<()> {
        self.calls.lock().push((ctx.stage(), ctx.iteration()));
        Ok(())
    }
}

/// A plugin that sets a fixed terminal response.
#[derive(Debug)]
pub struct RespondingPlugin {
    name: String,
    response: serde_json::Value,
}

impl RespondingPlugin {
    /// Creates a responding plugin.
    #[must_use]
    pub fn new(name: impl Into<String>, response: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            response,
        }
    }
}

#[async_trait]
impl Plugin for RespondingPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &PluginContext) -> anyhow::Result<()> {
        ctx.set_response(self.response.clone())?;
        Ok(())
    }
}

/// A plugin that always raises.
#[derive(Debug)]
pub struct FailingPlugin {
    name: String,
    message: String,
}

impl FailingPlugin {
    /// Creates a failing plugin.
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Plugin for FailingPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
        Err(anyhow::anyhow!(self.message.clone()))
    }
}

/// A plugin that stores one stage-data value.
#[derive(Debug)]
pub struct StoringPlugin {
    name: String,
    key: String,
    value: serde_json::Value,
}

impl StoringPlugin {
    /// Creates a storing plugin.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            value,
        }
    }
}

#[async_trait]
impl Plugin for StoringPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &PluginContext) -> anyhow::Result<()> {
        ctx.store(self.key.clone(), self.value.clone());
        Ok(())
    }
}

/// A plugin backed by a plain function.
pub struct FnPlugin<F>
where
    F: Fn(&PluginContext) -> anyhow::Result<()> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnPlugin<F>
where
    F: Fn(&PluginContext) -> anyhow::Result<()> + Send + Sync,
{
    /// Wraps a function as a plugin.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> std::fmt::Debug for FnPlugin<F>
where
    F: Fn(&PluginContext) -> anyhow::Result<()> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnPlugin").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Plugin for FnPlugin<F>
where
    F: Fn(&PluginContext) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &PluginContext) -> anyhow::Result<()> {
        (self.func)(ctx)
    }
}

/// Shared lifecycle log for [`ScriptedResource`] instances.
///
/// Resources append their name when initialized or shut down, letting
/// tests assert container ordering guarantees.
#[derive(Debug, Clone, Default)]
pub struct SharedInitLog {
    init: Arc<Mutex<Vec<String>>>,
    shutdown: Arc<Mutex<Vec<String>>>,
}

impl SharedInitLog {
    /// Names in initialization order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.init.lock().clone()
    }

    /// Names in shutdown order.
    #[must_use]
    pub fn shutdown_entries(&self) -> Vec<String> {
        self.shutdown.lock().clone()
    }

    /// Clears both logs.
    pub fn clear(&self) {
        self.init.lock().clear();
        self.shutdown.lock().clear();
    }

    fn record_init(&self, name: &str) {
        self.init.lock().push(name.to_string());
    }

    fn record_shutdown(&self, name: &str) {
        self.shutdown.lock().push(name.to_string());
    }
}

/// A resource whose lifecycle outcomes are scripted per test.
#[derive(Debug)]
pub struct ScriptedResource {
    name: String,
    log: SharedInitLog,
    deps: ResourceDeps,
    init_failure: Option<String>,
    shutdown_failure: Option<String>,
    health_failure: RwLock<Option<String>>,
}

impl ScriptedResource {
    /// Creates a resource that succeeds at everything.
    #[must_use]
    pub fn new(name: impl Into<String>, log: SharedInitLog) -> Self {
        Self {
            name: name.into(),
            log,
            deps: ResourceDeps::new(),
            init_failure: None,
            shutdown_failure: None,
            health_failure: RwLock::new(None),
        }
    }

    /// Scripts `initialize` to fail.
    #[must_use]
    pub fn failing_init(mut self, reason: impl Into<String>) -> Self {
        self.init_failure = Some(reason.into());
        self
    }

    /// Scripts `shutdown` to fail.
    #[must_use]
    pub fn failing_shutdown(mut self, reason: impl Into<String>) -> Self {
        self.shutdown_failure = Some(reason.into());
        self
    }

    /// Scripts `health_check` to fail from construction.
    #[must_use]
    pub fn failing_health(self, reason: impl Into<String>) -> Self {
        *self.health_failure.write() = Some(reason.into());
        self
    }

    /// Degrades the resource after construction: subsequent health checks
    /// fail with the given reason.
    pub fn start_failing_health(&self, reason: impl Into<String>) {
        *self.health_failure.write() = Some(reason.into());
    }

    /// Names of dependencies attached so far.
    #[must_use]
    pub fn attached_dependencies(&self) -> Vec<String> {
        self.deps.names()
    }
}

#[async_trait]
impl Resource for ScriptedResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn attach_dependency(&self, name: &str, dep: Arc<dyn Resource>) {
        self.deps.attach(name, dep);
    }

    async fn initialize(&self) -> Result<(), ResourceError> {
        if let Some(reason) = &self.init_failure {
            return Err(ResourceError::init(&self.name, reason));
        }
        self.log.record_init(&self.name);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ResourceError> {
        if let Some(reason) = self.health_failure.read().clone() {
            return Err(ResourceError::health(&self.name, reason));
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ResourceError> {
        self.log.record_shutdown(&self.name);
        if let Some(reason) = &self.shutdown_failure {
            return Err(ResourceError::shutdown(&self.name, reason));
        }
        Ok(())
    }
}
