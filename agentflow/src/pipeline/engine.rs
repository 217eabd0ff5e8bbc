//! The pipeline orchestrator.
//!
//! Drives one execution per inbound message: stages in fixed order,
//! plugins sequential within a stage, queued tools joined at each stage
//! boundary, and the bounded loop that re-enters the sequence until a
//! DELIVER-stage plugin produces a response or the iteration ceiling is
//! hit. Failures divert to the ERROR stage; if that also fails, the caller
//! gets the static fallback. One way or another, the caller always gets a
//! structured response.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::Serialize;
use tracing::{error, warn};

use crate::context::{queued_result_key, FailureInfo, PluginContext, RunState};
use crate::errors::{EngineError, MaxIterationsExceededError, PluginExecutionError};
use crate::events::{EventSink, PluginEvent};
use crate::memory::ConversationMemory;
use crate::resources::ResourceContainer;
use crate::stages::{Stage, StageRegistry};
use crate::tools::ToolRegistry;

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTermination {
    /// A DELIVER-stage plugin set the response.
    Success,
    /// The iteration ceiling was hit without a response.
    MaxIterations,
    /// A plugin failure diverted the run to the ERROR stage.
    Error,
}

impl RunTermination {
    /// Lowercase stable name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::MaxIterations => "max_iterations",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for RunTermination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller gets back from a run.
#[derive(Debug, Clone, Serialize)]
pub struct EngineResponse {
    /// The delivered, recovered, or fallback response value.
    pub response: serde_json::Value,
    /// Why the run ended.
    pub termination: RunTermination,
    /// Completed full stage passes (1-based; a partial pass counts).
    pub iterations: u32,
}

/// The fixed response returned when even the ERROR stage cannot produce one.
#[must_use]
pub fn static_fallback(pipeline_id: &str) -> serde_json::Value {
    serde_json::json!({
        "error": "System error occurred",
        "message": "An unexpected error prevented processing your request.",
        "pipeline_id": pipeline_id,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "type": "static_fallback",
    })
}

/// Drives pipeline executions against a frozen registry and container.
///
/// Built once via [`EngineBuilder`](crate::pipeline::EngineBuilder); safe
/// to share across concurrent runs, which only meet at the resource
/// container.
pub struct PipelineEngine {
    registry: Arc<StageRegistry>,
    container: Arc<ResourceContainer>,
    tools: Arc<ToolRegistry>,
    memory: Arc<dyn ConversationMemory>,
    sink: Arc<dyn EventSink>,
    max_iterations: u32,
}

impl PipelineEngine {
    pub(crate) fn new(
        registry: Arc<StageRegistry>,
        container: Arc<ResourceContainer>,
        tools: Arc<ToolRegistry>,
        memory: Arc<dyn ConversationMemory>,
        sink: Arc<dyn EventSink>,
        max_iterations: u32,
    ) -> Self {
        Self {
            registry,
            container,
            tools,
            memory,
            sink,
            max_iterations,
        }
    }

    /// The resource container backing this engine.
    #[must_use]
    pub fn container(&self) -> &Arc<ResourceContainer> {
        &self.container
    }

    /// The frozen stage registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<StageRegistry> {
        &self.registry
    }

    /// The configured iteration ceiling.
    #[must_use]
    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Executes one run with the configured iteration ceiling.
    pub async fn execute(
        &self,
        message: &str,
        user_id: &str,
        pipeline_id: &str,
    ) -> EngineResponse {
        self.execute_with_limit(message, user_id, pipeline_id, self.max_iterations)
            .await
    }

    /// Executes one run with a per-call iteration ceiling.
    pub async fn execute_with_limit(
        &self,
        message: &str,
        user_id: &str,
        pipeline_id: &str,
        max_iterations: u32,
    ) -> EngineResponse {
        let max_iterations = max_iterations.max(1);
        let state = Arc::new(RunState::new(user_id, pipeline_id));
        let key = state.conversation_key();

        match self.memory.load_conversation(&key).await {
            Ok(entries) => state.seed_conversation(entries),
            Err(err) => {
                warn!(key = %key, %err, "conversation load failed; starting with empty history");
            }
        }
        state.push_entry("user", message);

        self.sink.try_emit(
            "pipeline.started",
            Some(serde_json::json!({
                "run_id": state.run_id().to_string(),
                "user_id": user_id,
                "pipeline_id": pipeline_id,
                "max_iterations": max_iterations,
            })),
        );

        let termination = self.drive(&state, max_iterations).await;
        let iterations = state.iteration() + 1;

        let response = state
            .response()
            .unwrap_or_else(|| static_fallback(pipeline_id));

        if let Err(err) = self.memory.save_conversation(&key, &state.conversation()).await {
            warn!(key = %key, %err, "conversation save failed");
        }

        self.sink.try_emit(
            "pipeline.completed",
            Some(serde_json::json!({
                "run_id": state.run_id().to_string(),
                "pipeline_id": pipeline_id,
                "termination": termination.as_str(),
                "iterations": iterations,
            })),
        );

        EngineResponse {
            response,
            termination,
            iterations,
        }
    }

    /// Runs the bounded loop to a terminal state.
    async fn drive(&self, state: &Arc<RunState>, max_iterations: u32) -> RunTermination {
        loop {
            for stage in Stage::MAIN_SEQUENCE {
                if let Err(err) = self.run_stage(stage, state).await {
                    warn!(%err, "stage execution failed; dispatching to error stage");
                    self.run_error_stage(state).await;
                    return RunTermination::Error;
                }
            }

            if state.has_response() {
                return RunTermination::Success;
            }

            let completed = state.iteration() + 1;
            if completed >= max_iterations {
                let err = MaxIterationsExceededError::new(state.pipeline_id(), completed);
                warn!(%err, "iteration ceiling reached; dispatching to error stage");
                state.record_failure(FailureInfo::new(
                    Stage::Deliver,
                    "pipeline",
                    err.to_string(),
                ));
                self.run_error_stage(state).await;
                return RunTermination::MaxIterations;
            }

            state.advance_iteration();
        }
    }

    /// Executes one stage: its plugins sequentially in registration order,
    /// then every queued tool call concurrently.
    ///
    /// The first plugin failure aborts the remainder of the stage's plugin
    /// list for this iteration, records the failure, and discards the
    /// stage's queued calls.
    async fn run_stage(
        &self,
        stage: Stage,
        state: &Arc<RunState>,
    ) -> Result<(), PluginExecutionError> {
        state.enter_stage(stage);
        let stage_start = Instant::now();
        self.sink.try_emit(
            "stage.started",
            Some(serde_json::json!({
                "stage": stage.as_str(),
                "iteration": state.iteration(),
                "run_id": state.run_id().to_string(),
            })),
        );

        for registered in self.registry.plugins_for(stage) {
            let ctx = PluginContext::new(
                state.clone(),
                self.container.clone(),
                self.tools.clone(),
                self.sink.clone(),
                registered.name(),
                stage,
            );

            let start = Instant::now();
            let result = registered.plugin().execute(&ctx).await;
            let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

            match result {
                Ok(()) => {
                    self.sink.try_emit(
                        "plugin.completed",
                        Some(PluginEvent::success(stage, registered.name(), duration_ms).to_value()),
                    );
                }
                Err(source) => {
                    self.sink.try_emit(
                        "plugin.failed",
                        Some(
                            PluginEvent::failure(
                                stage,
                                registered.name(),
                                duration_ms,
                                error_tag(&source),
                            )
                            .to_value(),
                        ),
                    );
                    state.record_failure(FailureInfo::new(
                        stage,
                        registered.name(),
                        source.to_string(),
                    ));
                    state.clear_queued_calls();
                    return Err(PluginExecutionError::new(stage, registered.name(), source));
                }
            }
        }

        self.drain_queued_tools(stage, state).await;

        self.sink.try_emit(
            "stage.completed",
            Some(serde_json::json!({
                "stage": stage.as_str(),
                "iteration": state.iteration(),
                "duration_ms": stage_start.elapsed().as_secs_f64() * 1000.0,
            })),
        );
        Ok(())
    }

    /// Executes every call queued during the stage, concurrently, and
    /// merges the results into stage data before the next stage begins.
    async fn drain_queued_tools(&self, stage: Stage, state: &Arc<RunState>) {
        let calls = state.drain_queued_calls();
        if calls.is_empty() {
            return;
        }

        let futures: Vec<_> = calls
            .into_iter()
            .enumerate()
            .map(|(position, call)| {
                let tools = self.tools.clone();
                async move {
                    let result = tools.invoke(&call.name, call.params).await;
                    (position, call.name, result)
                }
            })
            .collect();

        for (position, name, result) in join_all(futures).await {
            let key = queued_result_key(position, &name);
            match result {
                Ok(value) => {
                    self.sink.try_emit(
                        "tool.completed",
                        Some(serde_json::json!({
                            "tool": name,
                            "stage": stage.as_str(),
                            "queued": true,
                            "success": true,
                        })),
                    );
                    state.store(key, value);
                }
                Err(err) => {
                    warn!(tool = %name, %err, "queued tool call failed");
                    self.sink.try_emit(
                        "tool.failed",
                        Some(serde_json::json!({
                            "tool": name,
                            "stage": stage.as_str(),
                            "queued": true,
                            "success": false,
                            "error": err.to_string(),
                        })),
                    );
                    state.store(key, serde_json::json!({"error": err.to_string()}));
                }
            }
        }
    }

    /// Runs the ERROR stage once. A failure here is terminal: it is logged
    /// and the static fallback takes over.
    async fn run_error_stage(&self, state: &Arc<RunState>) {
        if let Err(err) = self.run_stage(Stage::Error, state).await {
            error!(%err, "error-stage plugin failed; falling back to static response");
        }
    }

    /// Shuts down the backing resource container.
    pub async fn shutdown(&self) -> Vec<crate::errors::ResourceError> {
        self.container.shutdown().await
    }
}

impl std::fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEngine")
            .field("plugins", &self.registry.len())
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}

fn error_tag(err: &anyhow::Error) -> String {
    err.downcast_ref::<EngineError>()
        .map_or_else(|| "plugin_error".to_string(), |e| e.error_type().to_string())
}
