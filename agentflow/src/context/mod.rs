//! Run state and the plugin-facing context.
//!
//! This module owns the inter-stage communication contract: what plugins
//! may read and write, and when.

#[cfg(test)]
mod context_tests;
mod plugin_ctx;
mod state;

pub use plugin_ctx::{queued_result_key, PluginContext};
pub use state::{ConversationEntry, FailureInfo, QueuedToolCall, RunState};
