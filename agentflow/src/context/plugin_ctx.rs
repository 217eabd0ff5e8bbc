//! The per-execution plugin context.
//!
//! Every plugin invocation receives a fresh `PluginContext` bound to the
//! run's shared state and the stage the plugin is executing in. The
//! context mediates all reads and writes; it enforces the one
//! authorization rule in the engine (who may set the response) and never
//! swallows a plugin's own errors.

use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use super::state::RunState;
use crate::errors::{CircuitOpenError, EngineError, StagePermissionError};
use crate::events::EventSink;
use crate::resources::{ResourceContainer, ResourceHandle};
use crate::stages::Stage;
use crate::tools::ToolRegistry;

/// The API surface a plugin sees during one execution.
pub struct PluginContext {
    state: Arc<RunState>,
    container: Arc<ResourceContainer>,
    tools: Arc<ToolRegistry>,
    sink: Arc<dyn EventSink>,
    plugin_name: String,
    stage: Stage,
}

impl PluginContext {
    /// Binds a context to a run for one plugin execution.
    #[must_use]
    pub fn new(
        state: Arc<RunState>,
        container: Arc<ResourceContainer>,
        tools: Arc<ToolRegistry>,
        sink: Arc<dyn EventSink>,
        plugin_name: impl Into<String>,
        stage: Stage,
    ) -> Self {
        Self {
            state,
            container,
            tools,
            sink,
            plugin_name: plugin_name.into(),
            stage,
        }
    }

    /// The stage this plugin is executing in.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The executing plugin's name.
    #[must_use]
    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    /// The run identifier.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.state.run_id()
    }

    /// The user identifier of the run.
    #[must_use]
    pub fn user_id(&self) -> &str {
        self.state.user_id()
    }

    /// The pipeline identifier of the run.
    #[must_use]
    pub fn pipeline_id(&self) -> &str {
        self.state.pipeline_id()
    }

    /// The zero-based iteration the run is on.
    #[must_use]
    pub fn iteration(&self) -> u32 {
        self.state.iteration()
    }

    /// Stores a stage-data value; last write wins, visible to every
    /// subsequently executed plugin in this run.
    pub fn store(&self, key: impl Into<String>, value: serde_json::Value) {
        self.state.store(key, value);
    }

    /// Loads a stage-data value.
    #[must_use]
    pub fn load(&self, key: &str) -> Option<serde_json::Value> {
        self.state.load(key)
    }

    /// Loads a stage-data value, falling back to a default.
    #[must_use]
    pub fn load_or(&self, key: &str, default: serde_json::Value) -> serde_json::Value {
        self.state.load(key).unwrap_or(default)
    }

    /// Whether a stage-data key has been stored this run.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.state.has(key)
    }

    /// Sets the terminal response for the run.
    ///
    /// # Errors
    ///
    /// `StagePermissionError` when called from any stage other than
    /// DELIVER (or ERROR on the recovery path); `ResponseConflictError`
    /// when a response was already set. Either way the stored response is
    /// unchanged.
    pub fn set_response(&self, value: serde_json::Value) -> Result<(), EngineError> {
        if !self.stage.may_set_response() {
            return Err(StagePermissionError::new(self.stage, &self.plugin_name).into());
        }
        self.state
            .set_response(value, &self.plugin_name)
            .map_err(Into::into)
    }

    /// Whether a terminal response has been set.
    #[must_use]
    pub fn has_response(&self) -> bool {
        self.state.has_response()
    }

    /// Appends a conversation entry.
    pub fn add_conversation_entry(&self, role: impl Into<String>, content: impl Into<String>) {
        self.state.push_entry(role, content);
    }

    /// The live failure record, if any. Populated before the ERROR stage
    /// runs so recovery plugins can see what went wrong.
    #[must_use]
    pub fn failure(&self) -> Option<super::FailureInfo> {
        self.state.failure()
    }

    /// A snapshot of the conversation so far.
    #[must_use]
    pub fn conversation(&self) -> Vec<super::ConversationEntry> {
        self.state.conversation()
    }

    /// Looks up a shared resource, guarded by its kind's circuit breaker.
    ///
    /// # Errors
    ///
    /// `ResourceError::NotFound` for an unknown name, `CircuitOpenError`
    /// while the kind's circuit refuses calls.
    pub fn get_resource(&self, name: &str) -> Result<ResourceHandle, EngineError> {
        let handle = self.container.handle(name)?;
        if handle.is_open() {
            self.sink.try_emit(
                "resource.call_refused",
                Some(serde_json::json!({
                    "resource": name,
                    "kind": handle.kind().as_str(),
                    "plugin": self.plugin_name,
                    "stage": self.stage.as_str(),
                })),
            );
            return Err(CircuitOpenError::new(handle.kind(), name).into());
        }
        Ok(handle)
    }

    /// Invokes a tool and waits for its result.
    ///
    /// # Errors
    ///
    /// `ToolError` when the tool is unknown or its handler fails.
    pub async fn tool_use(
        &self,
        name: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, EngineError> {
        self.sink.try_emit(
            "tool.invoked",
            Some(serde_json::json!({
                "tool": name,
                "plugin": self.plugin_name,
                "stage": self.stage.as_str(),
            })),
        );

        let start = Instant::now();
        let result = self.tools.invoke(name, params).await;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(value) => {
                self.sink.try_emit(
                    "tool.completed",
                    Some(serde_json::json!({
                        "tool": name,
                        "stage": self.stage.as_str(),
                        "duration_ms": duration_ms,
                        "success": true,
                    })),
                );
                Ok(value)
            }
            Err(err) => {
                self.sink.try_emit(
                    "tool.failed",
                    Some(serde_json::json!({
                        "tool": name,
                        "stage": self.stage.as_str(),
                        "duration_ms": duration_ms,
                        "success": false,
                        "error": err.to_string(),
                    })),
                );
                Err(err.into())
            }
        }
    }

    /// Queues a tool call for concurrent execution at the stage boundary.
    ///
    /// All calls queued during one stage run together before the next
    /// stage begins; each result lands in stage data under
    /// `tool:{position}:{name}`.
    pub fn queue_tool_use(&self, name: impl Into<String>, params: serde_json::Value) {
        let name = name.into();
        let position = self.state.queue_tool_call(&name, params);
        self.sink.try_emit(
            "tool.queued",
            Some(serde_json::json!({
                "tool": name,
                "position": position,
                "plugin": self.plugin_name,
                "stage": self.stage.as_str(),
            })),
        );
    }

}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin", &self.plugin_name)
            .field("stage", &self.stage)
            .field("run_id", &self.run_id())
            .finish()
    }
}

/// The deterministic stage-data key for a queued tool result.
#[must_use]
pub fn queued_result_key(position: usize, name: &str) -> String {
    format!("tool:{position}:{name}")
}
