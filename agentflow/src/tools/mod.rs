//! Tool invocation.
//!
//! Tools are named handlers plugins call through the context, either
//! synchronously (`tool_use`) or queued for concurrent execution at the
//! stage boundary (`queue_tool_use`). The registry only resolves and
//! invokes; event emission happens at the call sites that know the stage.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::errors::ToolError;

/// A callable tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Runs the tool against JSON parameters.
    async fn invoke(&self, params: serde_json::Value) -> anyhow::Result<serde_json::Value>;
}

/// A tool backed by a plain function, convenient for tests and adapters.
pub struct FnTool<F>
where
    F: Fn(serde_json::Value) -> anyhow::Result<serde_json::Value> + Send + Sync,
{
    func: F,
}

impl<F> FnTool<F>
where
    F: Fn(serde_json::Value) -> anyhow::Result<serde_json::Value> + Send + Sync,
{
    /// Wraps a function as a tool.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> ToolHandler for FnTool<F>
where
    F: Fn(serde_json::Value) -> anyhow::Result<serde_json::Value> + Send + Sync,
{
    async fn invoke(&self, params: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        (self.func)(params)
    }
}

/// Name-to-handler registry.
#[derive(Default)]
pub struct ToolRegistry {
    handlers: DashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under a name, replacing any previous one.
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Whether a tool is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// All registered tool names.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.handlers.iter().map(|e| e.key().clone()).collect()
    }

    /// Invokes a tool by name.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown name, `ExecutionFailed` when the handler
    /// returns an error.
    pub async fn invoke(
        &self,
        name: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let handler = self
            .handlers
            .get(name)
            .map(|entry| entry.clone())
            .ok_or_else(|| ToolError::not_found(name))?;

        handler
            .invoke(params)
            .await
            .map_err(|err| ToolError::execution_failed(name, err.to_string()))
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("names", &self.names())
            .finish()
    }
}
