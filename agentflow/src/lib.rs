//! # Agentflow
//!
//! A plugin-driven pipeline execution engine for AI-agent request
//! processing.
//!
//! Agentflow routes a single user message through a fixed sequence of
//! stages (PARSE, THINK, DO, REVIEW, DELIVER, with ERROR as the recovery
//! stage), runs the plugins registered for each stage, and re-enters the
//! sequence when no terminal response has been produced, up to a bounded
//! iteration count. Plugin authors see a flat stage model; the bounded
//! state machine stays inside the engine.
//!
//! - **Stage registry**: ordered plugin lists per stage, frozen at build
//! - **Plugin context**: the per-execution API mediating all shared state
//! - **Resource container**: shared services resolved in dependency order
//!   with fail-fast startup and reverse-order teardown
//! - **Validation pipeline**: syntax and dependency phases gate startup;
//!   runtime connectivity checks run in the background
//! - **Circuit breakers**: per-resource-kind guards on the resource
//!   boundary
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use agentflow::prelude::*;
//!
//! let config = EngineConfig::new()
//!     .with_plugin(PluginDescriptor::new("greeter", PluginKind::Adapter)
//!         .with_stages([Stage::Deliver]));
//!
//! let engine = EngineBuilder::new(config)
//!     .plugin(Arc::new(Greeter::new()))
//!     .build()
//!     .await?;
//!
//! let result = engine.execute("hello", "user-1", "support").await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod context;
pub mod errors;
pub mod events;
pub mod memory;
pub mod pipeline;
pub mod resources;
pub mod stages;
pub mod testing;
pub mod tools;
pub mod validation;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::context::{ConversationEntry, FailureInfo, PluginContext, RunState};
    pub use crate::errors::{
        CircuitOpenError, CircularDependencyError, ConfigValidationError, EngineError,
        MaxIterationsExceededError, PluginExecutionError, ResourceError, ResponseConflictError,
        StagePermissionError, ToolError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::memory::{ConversationMemory, InMemoryConversationStore};
    pub use crate::pipeline::{
        static_fallback, EngineBuilder, EngineResponse, PipelineEngine, RunTermination,
    };
    pub use crate::resources::{
        BreakerConfig, CircuitBreaker, CircuitState, Resource, ResourceContainer,
        ResourceDescriptor, ResourceHandle, ResourceKind,
    };
    pub use crate::stages::{
        NameHintClassifier, Plugin, PluginDescriptor, PluginKind, Stage, StageClassifier,
        StageRegistry,
    };
    pub use crate::tools::{FnTool, ToolHandler, ToolRegistry};
    pub use crate::validation::{ValidationPhase, ValidationResult};
}
