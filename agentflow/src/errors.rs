//! Error types for the agentflow engine.
//!
//! The taxonomy separates configuration-time failures (fatal to startup,
//! reported whole) from run-time failures (absorbed by the ERROR stage and
//! the static fallback). Callers never see a raw plugin panic or stack
//! trace; they see one of these types or a structured response.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resources::ResourceKind;
use crate::stages::Stage;

/// The main error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration validation rejected the descriptors (phase 1 or 2).
    #[error("{0}")]
    ConfigValidation(#[from] ConfigValidationError),

    /// A cycle was found in the resource dependency graph.
    #[error("{0}")]
    CircularDependency(#[from] CircularDependencyError),

    /// A plugin set the response from a stage that may not do so.
    #[error("{0}")]
    StagePermission(#[from] StagePermissionError),

    /// The response was already set for this run.
    #[error("{0}")]
    ResponseConflict(#[from] ResponseConflictError),

    /// A resource call was refused because its circuit is open.
    #[error("{0}")]
    CircuitOpen(#[from] CircuitOpenError),

    /// A plugin raised during stage execution.
    #[error("{0}")]
    PluginExecution(#[from] PluginExecutionError),

    /// The loop hit the iteration ceiling without producing a response.
    #[error("{0}")]
    MaxIterationsExceeded(#[from] MaxIterationsExceededError),

    /// A resource-level failure (lookup, init, health, shutdown).
    #[error("{0}")]
    Resource(#[from] ResourceError),

    /// A tool-level failure (lookup or invocation).
    #[error("{0}")]
    Tool(#[from] ToolError),
}

impl EngineError {
    /// A short stable tag for observability payloads.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::ConfigValidation(_) => "config_validation",
            Self::CircularDependency(_) => "circular_dependency",
            Self::StagePermission(_) => "stage_permission",
            Self::ResponseConflict(_) => "response_conflict",
            Self::CircuitOpen(_) => "circuit_open",
            Self::PluginExecution(_) => "plugin_execution",
            Self::MaxIterationsExceeded(_) => "max_iterations_exceeded",
            Self::Resource(_) => "resource",
            Self::Tool(_) => "tool",
        }
    }
}

/// A single `(location, message)` validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailure {
    /// The descriptor or graph location the failure points at.
    pub location: String,
    /// Human-readable explanation.
    pub message: String,
}

impl ValidationFailure {
    /// Creates a new failure entry.
    #[must_use]
    pub fn new(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
        }
    }
}

/// Error raised when a validation phase rejects the configuration.
///
/// The report is always whole: every failure found in the phase is carried,
/// not just the first one.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("configuration rejected in {phase} phase: {} failure(s)", failures.len())]
pub struct ConfigValidationError {
    /// The phase that rejected the configuration ("syntax" or "dependency").
    pub phase: String,
    /// All failures found by the phase.
    pub failures: Vec<ValidationFailure>,
}

impl ConfigValidationError {
    /// Creates a new validation error for a phase.
    #[must_use]
    pub fn new(phase: impl Into<String>, failures: Vec<ValidationFailure>) -> Self {
        Self {
            phase: phase.into(),
            failures,
        }
    }

    /// Formats the full report, one failure per line.
    #[must_use]
    pub fn report(&self) -> String {
        let mut out = format!("{self}");
        for failure in &self.failures {
            out.push_str(&format!("\n  {}: {}", failure.location, failure.message));
        }
        out
    }
}

/// Error raised when the resource dependency graph contains a cycle.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("circular resource dependency: {}", cycle.join(" -> "))]
pub struct CircularDependencyError {
    /// The resource names forming the cycle, first repeated at the end.
    pub cycle: Vec<String>,
}

impl CircularDependencyError {
    /// Creates a new cycle error.
    #[must_use]
    pub fn new(cycle: Vec<String>) -> Self {
        Self { cycle }
    }
}

/// Error raised when a plugin sets the response outside the permitted stages.
///
/// This is the single authorization check in the engine; it is what makes
/// the loop's termination condition deterministic and auditable.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("plugin '{plugin}' attempted to set the response from the {stage} stage")]
pub struct StagePermissionError {
    /// The offending stage.
    pub stage: Stage,
    /// The plugin that made the call.
    pub plugin: String,
}

impl StagePermissionError {
    /// Creates a new permission error.
    #[must_use]
    pub fn new(stage: Stage, plugin: impl Into<String>) -> Self {
        Self {
            stage,
            plugin: plugin.into(),
        }
    }
}

/// Error raised on a second response write within one run.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("response already set for this run; plugin '{plugin}' attempted a second write")]
pub struct ResponseConflictError {
    /// The plugin that attempted the second write.
    pub plugin: String,
}

impl ResponseConflictError {
    /// Creates a new conflict error.
    #[must_use]
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
        }
    }
}

/// Error raised when a resource call is refused by an open circuit.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("circuit open for {kind} resources; call to '{resource}' refused")]
pub struct CircuitOpenError {
    /// The resource kind whose circuit is open.
    pub kind: ResourceKind,
    /// The resource the caller asked for.
    pub resource: String,
}

impl CircuitOpenError {
    /// Creates a new circuit-open error.
    #[must_use]
    pub fn new(kind: ResourceKind, resource: impl Into<String>) -> Self {
        Self {
            kind,
            resource: resource.into(),
        }
    }
}

/// Error wrapping any failure a plugin raised during stage execution.
#[derive(Debug, Error)]
#[error("plugin '{plugin}' failed during {stage}: {source}")]
pub struct PluginExecutionError {
    /// The stage the plugin was executing in.
    pub stage: Stage,
    /// The plugin name.
    pub plugin: String,
    /// The underlying failure.
    #[source]
    pub source: anyhow::Error,
}

impl PluginExecutionError {
    /// Creates a new execution error.
    #[must_use]
    pub fn new(stage: Stage, plugin: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            stage,
            plugin: plugin.into(),
            source,
        }
    }
}

/// Error raised when a run exhausts its iteration ceiling.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("pipeline '{pipeline_id}' exhausted {iterations} iteration(s) without a response")]
pub struct MaxIterationsExceededError {
    /// The pipeline identifier of the run.
    pub pipeline_id: String,
    /// The number of completed full stage passes.
    pub iterations: u32,
}

impl MaxIterationsExceededError {
    /// Creates a new ceiling error.
    #[must_use]
    pub fn new(pipeline_id: impl Into<String>, iterations: u32) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            iterations,
        }
    }
}

/// Errors raised by the resource container and individual resources.
#[derive(Debug, Clone, Error)]
pub enum ResourceError {
    /// The requested resource is not registered.
    #[error("resource not found: {name}")]
    NotFound {
        /// The resource name.
        name: String,
    },

    /// A resource with this name is already registered.
    #[error("resource already registered: {name}")]
    AlreadyRegistered {
        /// The resource name.
        name: String,
    },

    /// A declared dependency does not resolve to a registered resource.
    #[error("resource '{name}' depends on unknown resource '{dependency}'")]
    UnknownDependency {
        /// The resource declaring the dependency.
        name: String,
        /// The missing dependency name.
        dependency: String,
    },

    /// `initialize` failed during container resolution.
    #[error("resource '{name}' failed to initialize: {reason}")]
    Init {
        /// The resource name.
        name: String,
        /// Why initialization failed.
        reason: String,
    },

    /// The post-init health check failed during container resolution.
    #[error("resource '{name}' failed its health check: {reason}")]
    Health {
        /// The resource name.
        name: String,
        /// Why the health check failed.
        reason: String,
    },

    /// `shutdown` failed during container teardown.
    #[error("resource '{name}' failed to shut down: {reason}")]
    Shutdown {
        /// The resource name.
        name: String,
        /// Why shutdown failed.
        reason: String,
    },

    /// A guarded call through a resource handle failed.
    #[error("call through resource '{name}' failed: {reason}")]
    CallFailed {
        /// The resource name.
        name: String,
        /// Why the call failed.
        reason: String,
    },
}

impl ResourceError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Creates an already-registered error.
    #[must_use]
    pub fn already_registered(name: impl Into<String>) -> Self {
        Self::AlreadyRegistered { name: name.into() }
    }

    /// Creates an unknown-dependency error.
    #[must_use]
    pub fn unknown_dependency(name: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::UnknownDependency {
            name: name.into(),
            dependency: dependency.into(),
        }
    }

    /// Creates an init error.
    #[must_use]
    pub fn init(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Init {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a health-check error.
    #[must_use]
    pub fn health(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Health {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a shutdown error.
    #[must_use]
    pub fn shutdown(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Shutdown {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a call-failed error.
    #[must_use]
    pub fn call_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CallFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the tool registry.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    /// The tool was not found in the registry.
    #[error("tool not found: {name}")]
    NotFound {
        /// The tool name.
        name: String,
    },

    /// The tool handler returned an error.
    #[error("tool '{name}' failed: {reason}")]
    ExecutionFailed {
        /// The tool name.
        name: String,
        /// Why the invocation failed.
        reason: String,
    },
}

impl ToolError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Creates an execution-failed error.
    #[must_use]
    pub fn execution_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
